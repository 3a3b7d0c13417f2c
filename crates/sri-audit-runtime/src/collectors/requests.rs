//! Network request tracking and the network-idle signal.

use super::{Collector, CollectorKind};
use crate::renderer::{NetworkEvent, ProtocolDomain, RenderContext, ResponseInfo};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use sri_audit::RequestRecord;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{Instrument, Span};

/// Requests allowed to stay open while the network still counts as idle.
/// Long-polls and beacons would otherwise keep a page busy forever.
pub const IDLE_INFLIGHT_ALLOWANCE: usize = 2;

const IDLE_POLL: Duration = Duration::from_millis(50);

/// Folds network events into request records, one per redirect hop.
#[derive(Debug)]
pub struct RequestLedger {
    records: Vec<RequestRecord>,
    /// Request id → index of its latest hop.
    latest: HashMap<String, usize>,
    in_flight: HashSet<String>,
    last_activity: Instant,
}

impl Default for RequestLedger {
    fn default() -> Self {
        Self::new(Instant::now())
    }
}

impl RequestLedger {
    pub fn new(now: Instant) -> Self {
        Self {
            records: Vec::new(),
            latest: HashMap::new(),
            in_flight: HashSet::new(),
            last_activity: now,
        }
    }

    pub fn apply(&mut self, event: NetworkEvent, now: Instant) {
        self.last_activity = now;
        match event {
            NetworkEvent::RequestWillBeSent {
                request_id,
                url,
                method,
                resource_type,
                initiators,
                redirect_response,
            } => {
                let mut record = RequestRecord::new(request_id.clone(), url, method);
                record.resource_type = resource_type;
                record.initiators = initiators;

                if let Some(response) = redirect_response {
                    if let Some(&prev) = self.latest.get(&request_id) {
                        let hop = &mut self.records[prev];
                        apply_response(hop, response);
                        hop.redirected_to = Some(record.url.clone());
                        record.redirected_from = Some(hop.url.clone());
                        if record.resource_type.is_none() {
                            record.resource_type = hop.resource_type.clone();
                        }
                    }
                }

                self.latest.insert(request_id.clone(), self.records.len());
                self.in_flight.insert(request_id);
                self.records.push(record);
            }
            NetworkEvent::ResponseReceived {
                request_id,
                resource_type,
                response,
            } => {
                if let Some(record) = self.current_mut(&request_id) {
                    apply_response(record, response);
                    if resource_type.is_some() {
                        record.resource_type = resource_type;
                    }
                }
            }
            NetworkEvent::LoadingFinished {
                request_id,
                encoded_data_length,
            } => {
                if let Some(record) = self.current_mut(&request_id) {
                    record.size = Some(encoded_data_length.max(0.0) as u64);
                }
                self.in_flight.remove(&request_id);
            }
            NetworkEvent::LoadingFailed {
                request_id,
                error_text,
                blocked_reason,
            } => {
                if let Some(record) = self.current_mut(&request_id) {
                    record.failure_reason = Some(match blocked_reason {
                        Some(reason) => format!("{error_text} ({reason})"),
                        None => error_text,
                    });
                }
                self.in_flight.remove(&request_id);
            }
        }
    }

    fn current_mut(&mut self, request_id: &str) -> Option<&mut RequestRecord> {
        let index = *self.latest.get(request_id)?;
        self.records.get_mut(index)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether the network has been quiet for at least `idle` as of `now`.
    pub fn is_idle(&self, idle: Duration, now: Instant) -> bool {
        self.in_flight.len() <= IDLE_INFLIGHT_ALLOWANCE
            && now.saturating_duration_since(self.last_activity) >= idle
    }

    pub fn records(&self) -> &[RequestRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<RequestRecord> {
        self.records
    }
}

fn apply_response(record: &mut RequestRecord, response: ResponseInfo) {
    record.status = Some(response.status);
    record.response_headers = response.headers;
}

/// `sha256-<base64>` digest of a body.
pub fn body_digest(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    format!(
        "sha256-{}",
        base64::engine::general_purpose::STANDARD.encode(digest)
    )
}

/// Collects request records for one crawl.
pub struct RequestCollector {
    span: Span,
    hash_bodies: bool,
    ledger: Arc<Mutex<RequestLedger>>,
    stop: Option<oneshot::Sender<()>>,
    drain: Option<JoinHandle<()>>,
}

impl RequestCollector {
    pub fn new(hash_bodies: bool, span: Span) -> Self {
        Self {
            span,
            hash_bodies,
            ledger: Arc::new(Mutex::new(RequestLedger::default())),
            stop: None,
            drain: None,
        }
    }

    /// Resolve once the network has been idle for `idle`.
    pub async fn wait_for_idle(&self, idle: Duration) {
        loop {
            {
                let ledger = self.ledger.lock().await;
                if ledger.is_idle(idle, Instant::now()) {
                    tracing::debug!(parent: &self.span, in_flight = ledger.in_flight(), "network idle");
                    return;
                }
            }
            tokio::time::sleep(IDLE_POLL).await;
        }
    }

    async fn fill_body_hashes(&self, ctx: &dyn RenderContext, records: &mut [RequestRecord]) {
        for record in records.iter_mut() {
            let hashable = record.promotable_element().is_some()
                && record.size.is_some()
                && record.failure_reason.is_none()
                && record.redirected_to.is_none();
            if !hashable {
                continue;
            }
            match ctx.response_body(&record.id).await {
                Ok(body) => record.response_body_hash = Some(body_digest(&body)),
                Err(e) => {
                    tracing::debug!(parent: &self.span, url = %record.url, "no response body: {e:#}")
                }
            }
        }
    }
}

#[async_trait]
impl Collector for RequestCollector {
    type Output = Vec<RequestRecord>;

    fn kind(&self) -> CollectorKind {
        CollectorKind::Requests
    }

    async fn attach(&mut self, ctx: &dyn RenderContext) -> Result<()> {
        let mut stream = ctx.network_events().await?;
        let ledger = Arc::clone(&self.ledger);
        let (stop, mut stopped) = oneshot::channel();
        self.stop = Some(stop);
        self.drain = Some(tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        biased;
                        event = stream.next() => match event {
                            Some(event) => ledger.lock().await.apply(event, Instant::now()),
                            None => break,
                        },
                        _ = &mut stopped => break,
                    }
                }
            }
            .instrument(self.span.clone()),
        ));
        ctx.enable(ProtocolDomain::Network).await
    }

    async fn collect(mut self, ctx: &dyn RenderContext) -> Result<Vec<RequestRecord>> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(drain) = self.drain.take() {
            drain.await.context("request drain task failed")?;
        }
        let mut records = std::mem::take(&mut *self.ledger.lock().await).into_records();
        if self.hash_bodies {
            self.fill_body_hashes(ctx, &mut records).await;
        }
        tracing::debug!(parent: &self.span, collector = %self.kind(), count = records.len(), "collected requests");
        Ok(records)
    }
}

impl Drop for RequestCollector {
    fn drop(&mut self) {
        if let Some(drain) = self.drain.take() {
            drain.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sent(id: &str, url: &str, resource_type: &str) -> NetworkEvent {
        NetworkEvent::RequestWillBeSent {
            request_id: id.to_string(),
            url: url.to_string(),
            method: "GET".to_string(),
            resource_type: Some(resource_type.to_string()),
            initiators: vec!["https://example.com/".to_string()],
            redirect_response: None,
        }
    }

    fn response(url: &str, status: u16) -> ResponseInfo {
        ResponseInfo {
            url: url.to_string(),
            status,
            headers: BTreeMap::from([("content-type".to_string(), "text/javascript".to_string())]),
        }
    }

    #[test]
    fn test_request_lifecycle() {
        let start = Instant::now();
        let mut ledger = RequestLedger::new(start);
        ledger.apply(sent("1", "https://example.com/a.js", "Script"), start);
        assert_eq!(ledger.in_flight(), 1);

        ledger.apply(
            NetworkEvent::ResponseReceived {
                request_id: "1".to_string(),
                resource_type: Some("Script".to_string()),
                response: response("https://example.com/a.js", 200),
            },
            start,
        );
        ledger.apply(
            NetworkEvent::LoadingFinished {
                request_id: "1".to_string(),
                encoded_data_length: 1234.0,
            },
            start,
        );

        let records = ledger.into_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, Some(200));
        assert_eq!(records[0].size, Some(1234));
        assert_eq!(records[0].response_headers["content-type"], "text/javascript");
        assert_eq!(records[0].initiators, vec!["https://example.com/"]);
    }

    #[test]
    fn test_redirect_hops_are_linked() {
        let start = Instant::now();
        let mut ledger = RequestLedger::new(start);
        ledger.apply(sent("7", "http://cdn.example/a.js", "Script"), start);
        ledger.apply(
            NetworkEvent::RequestWillBeSent {
                request_id: "7".to_string(),
                url: "https://cdn.example/a.js".to_string(),
                method: "GET".to_string(),
                resource_type: None,
                initiators: vec![],
                redirect_response: Some(response("http://cdn.example/a.js", 301)),
            },
            start,
        );

        let records = ledger.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].status, Some(301));
        assert_eq!(records[0].redirected_to.as_deref(), Some("https://cdn.example/a.js"));
        assert_eq!(records[1].redirected_from.as_deref(), Some("http://cdn.example/a.js"));
        assert_eq!(records[1].resource_type.as_deref(), Some("Script"));
        assert_eq!(ledger.in_flight(), 1);
    }

    #[test]
    fn test_failure_reason_includes_blocked_reason() {
        let start = Instant::now();
        let mut ledger = RequestLedger::new(start);
        ledger.apply(sent("2", "https://cdn.example/s.css", "Stylesheet"), start);
        ledger.apply(
            NetworkEvent::LoadingFailed {
                request_id: "2".to_string(),
                error_text: "net::ERR_BLOCKED_BY_CLIENT".to_string(),
                blocked_reason: Some("inspector".to_string()),
            },
            start,
        );
        assert_eq!(
            ledger.records()[0].failure_reason.as_deref(),
            Some("net::ERR_BLOCKED_BY_CLIENT (inspector)")
        );
        assert_eq!(ledger.in_flight(), 0);
    }

    #[test]
    fn test_events_for_unknown_ids_are_ignored() {
        let start = Instant::now();
        let mut ledger = RequestLedger::new(start);
        ledger.apply(
            NetworkEvent::LoadingFinished {
                request_id: "ghost".to_string(),
                encoded_data_length: 10.0,
            },
            start,
        );
        assert!(ledger.records().is_empty());
    }

    #[test]
    fn test_idle_needs_quiet_period() {
        let start = Instant::now();
        let idle = Duration::from_millis(500);
        let mut ledger = RequestLedger::new(start);
        assert!(!ledger.is_idle(idle, start + Duration::from_millis(100)));
        assert!(ledger.is_idle(idle, start + Duration::from_millis(500)));

        for i in 0..=IDLE_INFLIGHT_ALLOWANCE {
            ledger.apply(sent(&i.to_string(), "https://example.com/poll", "XHR"), start);
        }
        assert!(!ledger.is_idle(idle, start + Duration::from_secs(10)));

        ledger.apply(
            NetworkEvent::LoadingFinished {
                request_id: "0".to_string(),
                encoded_data_length: 0.0,
            },
            start,
        );
        assert!(ledger.is_idle(idle, start + Duration::from_secs(10)));
    }

    #[test]
    fn test_body_digest() {
        // sha256 of the empty string
        assert_eq!(
            body_digest(b""),
            "sha256-47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }
}
