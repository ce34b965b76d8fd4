// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod api;           // control-plane HTTP surface
pub mod cache;         // fingerprint-keyed result cache
pub mod config;        // flow settings + environment config
pub mod engine;        // scheduler/runner + transform registry
pub mod errors;        // error taxonomy
pub mod fingerprint;   // digests, canonical encoding, keyed locks
pub mod flowfile;      // flow file load/save
pub mod graph;         // nodes, edges, validation, topology
pub mod kernel;        // kernel coordination + artifacts
pub mod observability; // structured log messages
pub mod plan;          // execution planner
pub mod registry;      // flow registry
pub mod worker;        // worker streaming dispatch
