//! Chromium-based renderer using chromiumoxide.

use super::{NavigationResult, NetworkEvent, ProtocolDomain, RenderContext, Renderer, ResponseInfo};
use crate::error::CrawlError;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::dom::{self as cdp_dom, GetAttributesParams, GetDocumentParams, NodeId};
use chromiumoxide::cdp::browser_protocol::log::{self as cdp_log, EventEntryAdded};
use chromiumoxide::cdp::browser_protocol::network::{
    self as cdp_network, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
    EventResponseReceived, GetResponseBodyParams, Initiator, RequestId, Response,
};
use chromiumoxide::cdp::browser_protocol::page as cdp_page;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::page::Page;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use sri_audit::{DomNode, LogEntry};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Environment variable naming the browser executable.
pub const CHROMIUM_ENV: &str = "SRI_AUDIT_CHROMIUM_PATH";

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. SRI_AUDIT_CHROMIUM_PATH env
    if let Ok(p) = std::env::var(CHROMIUM_ENV) {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 3. ~/.sri-audit/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidates = if cfg!(target_os = "macos") {
            vec![
                home.join(".sri-audit/chromium/chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".sri-audit/chromium/chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
            ]
        } else {
            vec![
                home.join(".sri-audit/chromium/chrome-linux64/chrome"),
                home.join(".sri-audit/chromium/chrome"),
            ]
        };
        if let Some(found) = candidates.into_iter().find(|c| c.exists()) {
            return Some(found);
        }
    }

    // 4. Common macOS location
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Chromium-based renderer. One browser process, one browser context per crawl.
pub struct ChromiumRenderer {
    browser: Arc<Browser>,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumRenderer {
    /// Launch headless Chromium from `chrome_path`, or from [`find_chromium`].
    pub async fn new(chrome_path: Option<PathBuf>) -> Result<Self> {
        let chrome_path = chrome_path
            .or_else(find_chromium)
            .ok_or(CrawlError::BrowserNotFound)?;
        tracing::info!(path = %chrome_path.display(), "launching Chromium");

        // Site isolation off keeps cross-origin frames inside the page's own
        // target, so one set of subscriptions sees every frame.
        let config = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .arg("--disable-site-isolation-trials")
            .arg("--disable-features=IsolateOrigins,site-per-process")
            .build()
            .map_err(|e| anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        // Spawn the handler task
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::trace!("browser handler: {e}");
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            active_count: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let context_id = self
            .browser
            .execute(CreateBrowserContextParams::default())
            .await
            .context("failed to create browser context")?
            .result
            .browser_context_id;

        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(|e| anyhow!("failed to build target params: {e}"))?;
        let page = self
            .browser
            .new_page(params)
            .await
            .context("failed to create new page")?;

        self.active_count.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(ChromiumContext {
            page,
            browser: Arc::clone(&self.browser),
            context_id,
            active_count: Arc::clone(&self.active_count),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        // Browser is dropped when ChromiumRenderer is dropped
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

/// A single Chromium page inside its own browser context.
pub struct ChromiumContext {
    page: Page,
    browser: Arc<Browser>,
    context_id: BrowserContextId,
    active_count: Arc<AtomicUsize>,
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult> {
        let start = Instant::now();

        let result = tokio::time::timeout(
            std::time::Duration::from_millis(timeout_ms),
            self.page.goto(url),
        )
        .await;

        let load_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(_)) => {
                let final_url = self
                    .page
                    .url()
                    .await
                    .unwrap_or_default()
                    .unwrap_or_else(|| url.to_string());
                Ok(NavigationResult {
                    final_url,
                    load_time_ms,
                })
            }
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => bail!("navigation timed out after {timeout_ms}ms"),
        }
    }

    async fn enable(&self, domain: ProtocolDomain) -> Result<()> {
        match domain {
            ProtocolDomain::Page => {
                self.page.execute(cdp_page::EnableParams::default()).await?;
            }
            ProtocolDomain::Dom => {
                self.page.execute(cdp_dom::EnableParams::default()).await?;
            }
            ProtocolDomain::Log => {
                self.page.execute(cdp_log::EnableParams::default()).await?;
            }
            ProtocolDomain::Network => {
                self.page
                    .execute(cdp_network::EnableParams::default())
                    .await?;
            }
        }
        Ok(())
    }

    async fn log_entries(&self) -> Result<BoxStream<'static, LogEntry>> {
        let events = self
            .page
            .event_listener::<EventEntryAdded>()
            .await
            .context("failed to subscribe to log entries")?;
        Ok(events.map(|event| to_log_entry(&event)).boxed())
    }

    async fn network_events(&self) -> Result<BoxStream<'static, NetworkEvent>> {
        let sent = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .context("failed to subscribe to requests")?
            .map(|e| NetworkEvent::RequestWillBeSent {
                request_id: e.request_id.inner().clone(),
                url: e.request.url.clone(),
                method: e.request.method.clone(),
                resource_type: e.r#type.as_ref().map(json_string),
                initiators: initiator_chain(&e.initiator, &e.document_url),
                redirect_response: e.redirect_response.as_ref().map(to_response_info),
            })
            .boxed();
        let received = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .context("failed to subscribe to responses")?
            .map(|e| NetworkEvent::ResponseReceived {
                request_id: e.request_id.inner().clone(),
                resource_type: Some(json_string(&e.r#type)),
                response: to_response_info(&e.response),
            })
            .boxed();
        let finished = self
            .page
            .event_listener::<EventLoadingFinished>()
            .await
            .context("failed to subscribe to finished loads")?
            .map(|e| NetworkEvent::LoadingFinished {
                request_id: e.request_id.inner().clone(),
                encoded_data_length: e.encoded_data_length,
            })
            .boxed();
        let failed = self
            .page
            .event_listener::<EventLoadingFailed>()
            .await
            .context("failed to subscribe to failed loads")?
            .map(|e| NetworkEvent::LoadingFailed {
                request_id: e.request_id.inner().clone(),
                error_text: e.error_text.clone(),
                blocked_reason: e.blocked_reason.as_ref().map(json_string),
            })
            .boxed();

        Ok(stream::select_all([sent, received, finished, failed]).boxed())
    }

    async fn document(&self) -> Result<DomNode> {
        let params = GetDocumentParams::builder().depth(-1).pierce(true).build();
        let root = self
            .page
            .execute(params)
            .await
            .context("DOM.getDocument failed")?
            .result
            .root;
        let value = serde_json::to_value(&root).context("failed to encode DOM tree")?;
        serde_json::from_value(value).context("unexpected DOM tree shape")
    }

    async fn attributes(&self, node_id: i64) -> Result<Vec<String>> {
        let attrs = self
            .page
            .execute(GetAttributesParams::new(NodeId::new(node_id)))
            .await
            .with_context(|| format!("DOM.getAttributes failed for node {node_id}"))?
            .result
            .attributes;
        Ok(attrs)
    }

    async fn response_body(&self, request_id: &str) -> Result<Vec<u8>> {
        let body = self
            .page
            .execute(GetResponseBodyParams::new(RequestId::new(request_id)))
            .await
            .with_context(|| format!("Network.getResponseBody failed for {request_id}"))?
            .result;
        if body.base64_encoded {
            base64::engine::general_purpose::STANDARD
                .decode(body.body.as_bytes())
                .context("response body is not valid base64")
        } else {
            Ok(body.body.into_bytes())
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let ChromiumContext {
            page,
            browser,
            context_id,
            active_count,
        } = *self;
        active_count.fetch_sub(1, Ordering::Relaxed);
        let _ = page.close().await;
        browser
            .execute(DisposeBrowserContextParams::new(context_id))
            .await
            .context("failed to dispose browser context")?;
        Ok(())
    }
}

/// Protocol enums and newtypes serialize to their wire string.
fn json_string<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn to_log_entry(event: &EventEntryAdded) -> LogEntry {
    let entry = &event.entry;
    LogEntry {
        source: json_string(&entry.source),
        level: json_string(&entry.level),
        text: entry.text.clone(),
        url: entry.url.clone(),
        category: entry.category.as_ref().map(json_string),
        timestamp: serde_json::to_value(&entry.timestamp)
            .ok()
            .and_then(|v| v.as_f64())
            .unwrap_or_default(),
    }
}

fn to_response_info(response: &Response) -> ResponseInfo {
    let headers = match serde_json::to_value(&response.headers) {
        Ok(serde_json::Value::Object(map)) => map
            .into_iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, value)
            })
            .collect(),
        _ => BTreeMap::new(),
    };
    ResponseInfo {
        url: response.url.clone(),
        status: u16::try_from(response.status).unwrap_or_default(),
        headers,
    }
}

/// Initiator URL, then stack-frame URLs (parents included), deduplicated.
fn initiator_chain(initiator: &Initiator, document_url: &str) -> Vec<String> {
    let mut chain: Vec<String> = Vec::new();
    let mut push = |url: &str| {
        if !url.is_empty() && !chain.iter().any(|u| u == url) {
            chain.push(url.to_string());
        }
    };
    if let Some(url) = &initiator.url {
        push(url);
    }
    let mut stack = initiator.stack.as_ref();
    while let Some(trace) = stack {
        for frame in &trace.call_frames {
            push(&frame.url);
        }
        stack = trace.parent.as_deref();
    }
    push(document_url);
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_collects_dom_and_logs() {
        let renderer = ChromiumRenderer::new(None)
            .await
            .expect("failed to create renderer");
        let mut ctx = renderer
            .new_context()
            .await
            .expect("failed to create context");

        ctx.enable(ProtocolDomain::Dom).await.expect("DOM.enable failed");
        ctx.navigate(
            "data:text/html,<script src='https://example.invalid/a.js' integrity='md5-x'></script>",
            10000,
        )
        .await
        .expect("navigation failed");

        let root = ctx.document().await.expect("document failed");
        let nodes = sri_audit::find_tag_nodes(&root, "about:blank");
        assert_eq!(nodes.len(), 1);

        let attrs = ctx
            .attributes(nodes[0].node_id)
            .await
            .expect("attributes failed");
        assert!(attrs.contains(&"integrity".to_string()));

        ctx.close().await.expect("close failed");
        assert_eq!(renderer.active_contexts(), 0);

        renderer.shutdown().await.expect("shutdown failed");
    }
}
