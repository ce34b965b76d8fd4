// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod execution;
mod flow_file;
mod graph;
mod settings;

pub use execution::ExecutionError;
pub use flow_file::FlowFileError;
pub use graph::GraphError;
pub use settings::SettingsError;
