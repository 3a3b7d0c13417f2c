//! Per-crawl collectors.
//!
//! Each collector subscribes to a [`RenderContext`] before navigation
//! (`attach`) and hands back what it gathered once the page has settled
//! (`collect`). The orchestrator owns one of each per target; collectors never
//! share state with each other.

pub mod dom_tags;
pub mod logs;
pub mod requests;

pub use dom_tags::DomTagCollector;
pub use logs::LogCollector;
pub use requests::{RequestCollector, RequestLedger};

use crate::renderer::RenderContext;
use anyhow::Result;
use async_trait::async_trait;

/// The fixed set of collectors a crawl runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectorKind {
    DomTags,
    Logs,
    Requests,
}

impl CollectorKind {
    pub fn id(self) -> &'static str {
        match self {
            Self::DomTags => "dom-tags",
            Self::Logs => "logs",
            Self::Requests => "requests",
        }
    }
}

impl std::fmt::Display for CollectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// A source of one slice of a crawl bundle.
#[async_trait]
pub trait Collector: Send {
    type Output: Send;

    fn kind(&self) -> CollectorKind;

    /// Enable domains and subscribe. Called once, before navigation.
    async fn attach(&mut self, ctx: &dyn RenderContext) -> Result<()>;

    /// Return everything gathered. Called once, after the page settles.
    async fn collect(self, ctx: &dyn RenderContext) -> Result<Self::Output>;
}
