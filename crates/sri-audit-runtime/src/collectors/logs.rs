//! Accumulate browser diagnostics for the lifetime of one crawl.

use super::{Collector, CollectorKind};
use crate::renderer::{ProtocolDomain, RenderContext};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use sri_audit::LogEntry;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{Instrument, Span};

/// Raw pass-through of log entries, in arrival order.
pub struct LogCollector {
    span: Span,
    enabled: bool,
    stop: Option<oneshot::Sender<()>>,
    drain: Option<JoinHandle<Vec<LogEntry>>>,
}

impl LogCollector {
    pub fn new(span: Span) -> Self {
        Self {
            span,
            enabled: false,
            stop: None,
            drain: None,
        }
    }

    /// Switch the log domain on. Only the first call reaches the browser.
    pub async fn enable(&mut self, ctx: &dyn RenderContext) -> Result<()> {
        if self.enabled {
            return Ok(());
        }
        ctx.enable(ProtocolDomain::Log).await?;
        self.enabled = true;
        Ok(())
    }
}

#[async_trait]
impl Collector for LogCollector {
    type Output = Vec<LogEntry>;

    fn kind(&self) -> CollectorKind {
        CollectorKind::Logs
    }

    async fn attach(&mut self, ctx: &dyn RenderContext) -> Result<()> {
        // Subscribe first so nothing emitted on enable is missed.
        if self.drain.is_none() {
            let mut stream = ctx.log_entries().await?;
            let (stop, mut stopped) = oneshot::channel();
            self.stop = Some(stop);
            self.drain = Some(tokio::spawn(
                async move {
                    let mut entries = Vec::new();
                    loop {
                        // Entries already delivered win over the stop signal.
                        tokio::select! {
                            biased;
                            entry = stream.next() => match entry {
                                Some(entry) => {
                                    tracing::trace!(log_level = %entry.level, text = %entry.text, "log entry");
                                    entries.push(entry);
                                }
                                None => break,
                            },
                            _ = &mut stopped => break,
                        }
                    }
                    entries
                }
                .instrument(self.span.clone()),
            ));
        }
        self.enable(ctx).await
    }

    async fn collect(mut self, _ctx: &dyn RenderContext) -> Result<Vec<LogEntry>> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let entries = match self.drain.take() {
            Some(drain) => drain.await.context("log drain task failed")?,
            None => Vec::new(),
        };
        tracing::debug!(parent: &self.span, collector = %self.kind(), count = entries.len(), "collected log entries");
        Ok(entries)
    }
}

impl Drop for LogCollector {
    fn drop(&mut self) {
        if let Some(drain) = self.drain.take() {
            drain.abort();
        }
    }
}
