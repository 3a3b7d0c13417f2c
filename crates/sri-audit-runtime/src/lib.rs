// Copyright 2026 SRI Audit Contributors
// SPDX-License-Identifier: Apache-2.0

//! sri-audit runtime: drives headless Chromium over one or many targets and
//! feeds what it observes through the core correlator and labeler.

pub mod collectors;
pub mod coordinator;
pub mod crawl;
pub mod error;
pub mod renderer;
pub mod targets;

pub use coordinator::{
    audit_target, decode_output_name, default_concurrency, encode_output_name, run_batch,
    OutputNaming, RunConfig, RunSummary, TargetFailure,
};
pub use crawl::{crawl_target, CrawlConfig};
pub use error::CrawlError;
