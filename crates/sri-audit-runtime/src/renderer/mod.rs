//! Renderer abstraction for browser-driven crawls.
//!
//! Defines the `Renderer` and `RenderContext` traits that abstract over
//! the browser engine (currently Chromium via chromiumoxide). Collectors and
//! the crawl orchestrator only ever talk to these traits.

pub mod chromium;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use sri_audit::{DomNode, LogEntry};
use std::collections::BTreeMap;

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// Protocol domains a collector may need switched on before events flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolDomain {
    Page,
    Dom,
    Log,
    Network,
}

/// Response metadata carried by network events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseInfo {
    pub url: String,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
}

/// Network activity observed in a context.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    RequestWillBeSent {
        request_id: String,
        url: String,
        method: String,
        resource_type: Option<String>,
        /// Initiator URL followed by stack-frame URLs.
        initiators: Vec<String>,
        /// Present when this request continues a redirect.
        redirect_response: Option<ResponseInfo>,
    },
    ResponseReceived {
        request_id: String,
        resource_type: Option<String>,
        response: ResponseInfo,
    },
    LoadingFinished {
        request_id: String,
        encoded_data_length: f64,
    },
    LoadingFailed {
        request_id: String,
        error_text: String,
        blocked_reason: Option<String>,
    },
}

impl NetworkEvent {
    pub fn request_id(&self) -> &str {
        match self {
            Self::RequestWillBeSent { request_id, .. }
            | Self::ResponseReceived { request_id, .. }
            | Self::LoadingFinished { request_id, .. }
            | Self::LoadingFailed { request_id, .. } => request_id,
        }
    }
}

/// A browser engine that can create isolated crawl contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a new isolated browser context with one page.
    async fn new_context(&self) -> Result<Box<dyn RenderContext>>;
    /// Shut down the browser engine.
    async fn shutdown(&self) -> Result<()>;
    /// Number of currently active contexts.
    fn active_contexts(&self) -> usize;
}

/// A single isolated browser context driving one page.
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Navigate to a URL with a timeout.
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult>;
    /// Switch on a protocol domain for this page.
    async fn enable(&self, domain: ProtocolDomain) -> Result<()>;
    /// Subscribe to diagnostic log entries. Entries only flow once the
    /// `Log` domain is enabled.
    async fn log_entries(&self) -> Result<BoxStream<'static, LogEntry>>;
    /// Subscribe to network events, for every frame of the page.
    async fn network_events(&self) -> Result<BoxStream<'static, NetworkEvent>>;
    /// Full node tree, piercing into frame documents.
    async fn document(&self) -> Result<DomNode>;
    /// Flat `[name, value, ...]` attribute list of a node.
    async fn attributes(&self, node_id: i64) -> Result<Vec<String>>;
    /// Body of a finished response.
    async fn response_body(&self, request_id: &str) -> Result<Vec<u8>>;
    /// Close this context.
    async fn close(self: Box<Self>) -> Result<()>;
}
