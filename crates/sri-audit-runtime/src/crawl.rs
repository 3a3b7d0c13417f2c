//! Crawl orchestrator: one target, one browser context, one bundle.

use crate::collectors::{Collector, DomTagCollector, LogCollector, RequestCollector};
use crate::error::CrawlError;
use crate::renderer::{RenderContext, Renderer};
use anyhow::Result;
use sri_audit::CrawlBundle;
use std::time::Duration;
use tracing::{Instrument, Span};
use url::Url;

/// Knobs for a single crawl.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Upper bound on the whole crawl, navigation through collection.
    pub timeout: Duration,
    /// Upper bound on the navigation step alone.
    pub navigation_timeout_ms: u64,
    /// Network quiet period that counts as "idle".
    pub idle: Duration,
    /// Record `sha256-` digests of loaded script and stylesheet bodies.
    pub hash_bodies: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(30_000),
            navigation_timeout_ms: 30_000,
            idle: Duration::from_millis(500),
            hash_bodies: false,
        }
    }
}

/// Crawl `target` in a fresh context and return everything observed.
///
/// The context is always closed, whether the crawl succeeded, failed or
/// timed out.
pub async fn crawl_target(
    renderer: &dyn Renderer,
    target: &Url,
    config: &CrawlConfig,
) -> Result<CrawlBundle> {
    let span = tracing::info_span!("crawl", target = %target);
    let mut ctx = renderer.new_context().await?;

    let outcome = tokio::time::timeout(
        config.timeout,
        run_collectors(ctx.as_mut(), target, config, span.clone()).instrument(span.clone()),
    )
    .await;

    if let Err(e) = ctx.close().await {
        tracing::debug!(parent: &span, "failed to close context: {e:#}");
    }

    match outcome {
        Ok(result) => result,
        Err(_) => Err(CrawlError::TimedOut {
            target: target.to_string(),
            after_ms: config.timeout.as_millis() as u64,
        }
        .into()),
    }
}

async fn run_collectors(
    ctx: &mut dyn RenderContext,
    target: &Url,
    config: &CrawlConfig,
    span: Span,
) -> Result<CrawlBundle> {
    let mut tags = DomTagCollector::new(target.as_str(), span.clone());
    let mut logs = LogCollector::new(span.clone());
    let mut requests = RequestCollector::new(config.hash_bodies, span);

    tags.attach(&*ctx).await?;
    logs.attach(&*ctx).await?;
    requests.attach(&*ctx).await?;

    let nav = ctx
        .navigate(target.as_str(), config.navigation_timeout_ms)
        .await?;
    tracing::debug!(final_url = %nav.final_url, load_time_ms = nav.load_time_ms, "navigated");

    requests.wait_for_idle(config.idle).await;

    let tags = tags.collect(&*ctx).await?;
    let requests = requests.collect(&*ctx).await?;
    let logs = logs.collect(&*ctx).await?;

    tracing::info!(
        tags = tags.len(),
        requests = requests.len(),
        logs = logs.len(),
        "crawl complete"
    );

    Ok(CrawlBundle {
        target: target.to_string(),
        tags,
        requests,
        logs,
    })
}
