// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Kernel lifecycle events.

use std::fmt::{Display, Formatter};

use super::StructuredLog;

/// An unhealthy kernel is being restarted (once per execution attempt).
pub struct KernelRestarting<'a> {
    pub kernel_id: &'a str,
    pub reason: &'a str,
}

impl Display for KernelRestarting<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Kernel '{}' unhealthy ({}); restarting once",
            self.kernel_id, self.reason
        )
    }
}

impl StructuredLog for KernelRestarting<'_> {
    fn log(&self) {
        tracing::warn!(kernel_id = self.kernel_id, reason = self.reason, "{}", self);
    }
}
