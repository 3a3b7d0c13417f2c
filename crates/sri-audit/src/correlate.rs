//! Correlator: attribute network requests and diagnostics to tags.
//!
//! Matching rules:
//! - a request belongs to a tag when its absolute URL equals the tag's
//!   `src`/`href` resolved against the tag's document (exact equality), plus
//!   any redirect hops that follow a request the tag already claimed;
//! - a log entry belongs to a tag when its text contains the raw or resolved
//!   resource URL, when its `url` field equals the resolved URL, or when its
//!   text contains the tag's `integrity` value.
//!
//! Tags claim in order; an observation is attributed to the first tag that
//! matches it. Script and stylesheet requests left over afterwards become
//! incomplete synthetic records. Everything else lands in [`Unmatched`].

use crate::origin::{normalize, resolve};
use crate::types::{
    Attributes, CorrelatedRecord, CorrelationReport, CrawlBundle, LogEntry, RequestRecord, Tag,
    Unmatched,
};

/// Identifiers a tag is recognised by in requests and diagnostic text.
#[derive(Debug, Default)]
struct Needles {
    raw: Option<String>,
    absolute: Option<String>,
    integrity: Option<String>,
}

impl Needles {
    fn for_tag(tag: &Tag) -> Self {
        let raw = tag.resource_value().map(|v| v.trim().to_string());
        let absolute = raw
            .as_deref()
            .and_then(|v| resolve(v, tag.resolution_base()))
            .map(String::from);
        let integrity = tag
            .non_empty_attribute("integrity")
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        Self {
            raw,
            absolute,
            integrity,
        }
    }

    fn matches_request(&self, request: &RequestRecord) -> bool {
        match (&self.absolute, normalize(&request.url)) {
            (Some(absolute), Some(url)) => *absolute == url,
            _ => false,
        }
    }

    fn matches_log(&self, log: &LogEntry) -> bool {
        let text_has = |needle: &Option<String>| {
            needle
                .as_deref()
                .is_some_and(|n| !n.is_empty() && log.text.contains(n))
        };
        if text_has(&self.raw) || text_has(&self.absolute) || text_has(&self.integrity) {
            return true;
        }
        match (&self.absolute, log.url.as_deref().and_then(normalize)) {
            (Some(absolute), Some(url)) => *absolute == url,
            _ => false,
        }
    }
}

/// Pool of observations not yet attributed to any record.
struct Pool<T> {
    items: Vec<Option<T>>,
}

impl<T> Pool<T> {
    fn new(items: Vec<T>) -> Self {
        Self {
            items: items.into_iter().map(Some).collect(),
        }
    }

    /// Remove and return every remaining item accepted by `pred`, in order.
    fn claim(&mut self, mut pred: impl FnMut(&T) -> bool) -> Vec<T> {
        let mut claimed = Vec::new();
        for slot in &mut self.items {
            if slot.as_ref().is_some_and(&mut pred) {
                claimed.extend(slot.take());
            }
        }
        claimed
    }

    fn remaining(&self) -> impl Iterator<Item = &T> {
        self.items.iter().flatten()
    }

    fn into_remaining(self) -> Vec<T> {
        self.items.into_iter().flatten().collect()
    }
}

/// Claim the requests matched by `needles`, then any redirect hops that
/// continue from a claimed request.
fn claim_requests(pool: &mut Pool<RequestRecord>, needles: &Needles) -> Vec<RequestRecord> {
    let mut claimed = pool.claim(|r| needles.matches_request(r));
    loop {
        let hops = pool.claim(|r| {
            claimed.iter().any(|c| {
                c.id == r.id
                    && r.redirected_from.as_deref() == Some(c.url.as_str())
            })
        });
        if hops.is_empty() {
            break;
        }
        claimed.extend(hops);
    }
    claimed
}

/// Correlate one crawl bundle into records plus the unmatched remainder.
pub fn correlate(bundle: CrawlBundle) -> CorrelationReport {
    let CrawlBundle {
        target,
        tags,
        requests,
        logs,
    } = bundle;

    let mut request_pool = Pool::new(requests);
    let mut log_pool = Pool::new(logs);
    let mut records = Vec::with_capacity(tags.len());

    for tag in tags {
        let needles = Needles::for_tag(&tag);
        let requests = claim_requests(&mut request_pool, &needles);
        let logs = log_pool.claim(|l| needles.matches_log(l));
        records.push(CorrelatedRecord {
            tag,
            target: target.clone(),
            complete: true,
            requests,
            logs,
        });
    }
    let from_dom = records.len();

    // Promote leftover script/stylesheet requests, one record per URL.
    let mut promoted_urls: Vec<String> = Vec::new();
    for request in request_pool.remaining() {
        if request.promotable_element().is_none() {
            continue;
        }
        let url = normalize(&request.url).unwrap_or_else(|| request.url.clone());
        if !promoted_urls.contains(&url) {
            promoted_urls.push(url);
        }
    }

    for url in promoted_urls {
        let requests = request_pool.claim(|r| {
            r.promotable_element().is_some()
                && normalize(&r.url).unwrap_or_else(|| r.url.clone()) == url
        });
        let Some(first) = requests.first() else {
            continue;
        };
        let Some(element) = first.promotable_element() else {
            continue;
        };
        let document = first
            .initiators
            .first()
            .cloned()
            .unwrap_or_else(|| target.clone());

        let mut attributes = Attributes::new();
        attributes.insert(element.resource_attribute().to_string(), url);
        let tag = Tag {
            element,
            attributes,
            document,
            base_url: None,
        };

        let needles = Needles::for_tag(&tag);
        let logs = log_pool.claim(|l| needles.matches_log(l));
        records.push(CorrelatedRecord {
            tag,
            target: target.clone(),
            complete: false,
            requests,
            logs,
        });
    }

    let unmatched = Unmatched {
        requests: request_pool.into_remaining(),
        logs: log_pool.into_remaining(),
    };

    tracing::debug!(
        target_url = %target,
        tags = from_dom,
        synthesized = records.len() - from_dom,
        unmatched_requests = unmatched.requests.len(),
        unmatched_logs = unmatched.logs.len(),
        "correlation complete"
    );

    CorrelationReport {
        target,
        records,
        unmatched,
    }
}
