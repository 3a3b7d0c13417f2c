//! Core data types: observed tags, diagnostics, network requests, and the
//! correlated and labelled records derived from them.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attribute name → value in element order. Keys are unique.
pub type Attributes = IndexMap<String, String>;

/// The kind of element a [`Tag`] was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ElementKind {
    Script,
    Link,
}

impl ElementKind {
    /// Map a DOM node name (`SCRIPT`, `link`, ...) to an element kind.
    pub fn from_node_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("script") {
            Some(Self::Script)
        } else if name.eq_ignore_ascii_case("link") {
            Some(Self::Link)
        } else {
            None
        }
    }

    /// The attribute that names the referenced resource.
    pub fn resource_attribute(self) -> &'static str {
        match self {
            Self::Script => "src",
            Self::Link => "href",
        }
    }

    /// The element a network request of the given resource type would have
    /// come from. Only scripts and stylesheets are recognised.
    pub fn from_request_type(resource_type: &str) -> Option<Self> {
        match resource_type {
            "Script" => Some(Self::Script),
            "Stylesheet" => Some(Self::Link),
            _ => None,
        }
    }
}

/// One `<script>` or `<link>` element found in a (possibly nested) document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub element: ElementKind,
    pub attributes: Attributes,
    /// URL of the document that directly contains the element.
    pub document: String,
    /// The document's base URL, when it differs from `document`
    /// (`<base href>`, `about:srcdoc` frames).
    #[serde(default, rename = "baseUrl", skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Tag {
    /// URL that relative `src`/`href` values resolve against.
    pub fn resolution_base(&self) -> &str {
        self.base_url.as_deref().unwrap_or(&self.document)
    }

    /// Raw value of `src` (scripts) or `href` (links). Empty values count as absent.
    pub fn resource_value(&self) -> Option<&str> {
        self.attributes
            .get(self.element.resource_attribute())
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Attribute value if present and non-empty.
    pub fn non_empty_attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// One browser diagnostic (console / security log) message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub source: String,
    pub level: String,
    pub text: String,
    pub url: Option<String>,
    pub category: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: f64,
}

/// One observed network request (a single redirect hop).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    /// Browser-assigned request id. Redirect hops share it.
    pub id: String,
    pub url: String,
    pub method: String,
    /// Resource type as reported by the browser (`Script`, `Stylesheet`, ...).
    #[serde(rename = "type")]
    pub resource_type: Option<String>,
    pub status: Option<u16>,
    /// Encoded bytes received.
    pub size: Option<u64>,
    pub failure_reason: Option<String>,
    pub response_headers: BTreeMap<String, String>,
    /// `sha256-<base64>` digest of the body, when body hashing is enabled.
    pub response_body_hash: Option<String>,
    /// Include chain, nearest initiator first.
    pub initiators: Vec<String>,
    pub redirected_from: Option<String>,
    pub redirected_to: Option<String>,
}

impl RequestRecord {
    /// A fresh record for a request that has just been issued.
    pub fn new(id: impl Into<String>, url: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            method: method.into(),
            resource_type: None,
            status: None,
            size: None,
            failure_reason: None,
            response_headers: BTreeMap::new(),
            response_body_hash: None,
            initiators: Vec::new(),
            redirected_from: None,
            redirected_to: None,
        }
    }

    /// The element this request would be promoted to when no tag claims it.
    pub fn promotable_element(&self) -> Option<ElementKind> {
        self.resource_type
            .as_deref()
            .and_then(ElementKind::from_request_type)
    }
}

/// Everything one crawl of one target observed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlBundle {
    pub target: String,
    pub tags: Vec<Tag>,
    pub requests: Vec<RequestRecord>,
    pub logs: Vec<LogEntry>,
}

/// A tag enriched with the requests and diagnostics attributed to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelatedRecord {
    #[serde(flatten)]
    pub tag: Tag,
    pub target: String,
    /// `false` when synthesized from a network request no tag claimed.
    pub complete: bool,
    pub requests: Vec<RequestRecord>,
    pub logs: Vec<LogEntry>,
}

/// Observations no record claimed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Unmatched {
    pub requests: Vec<RequestRecord>,
    pub logs: Vec<LogEntry>,
}

/// Correlator output for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationReport {
    pub target: String,
    pub records: Vec<CorrelatedRecord>,
    pub unmatched: Unmatched,
}

/// SRI/CORS classification of one correlated record.
///
/// `None` means unknown: the attribute or diagnostic evidence needed to
/// decide the field does not exist. It is never a stand-in for `false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelRecord {
    pub target: String,
    pub complete: bool,
    pub page_uses_https: bool,
    pub resource: Option<String>,
    pub resource_uses_https: bool,
    pub resource_cross_origin: bool,
    pub has_integrity: Option<bool>,
    pub has_crossorigin: Option<bool>,
    pub has_valid_integrity: Option<bool>,
    pub uses_unsupported_hash: bool,
    pub has_malformed_integrity: Option<bool>,
    pub has_valid_crossorigin: Option<bool>,
    /// Not evaluated; always unknown.
    pub has_multiple_integrity: Option<bool>,
    /// Not evaluated; always unknown.
    pub accepts_multiple_resources: Option<bool>,
}

/// Errors raised by the core library.
#[derive(thiserror::Error, Debug)]
pub enum AuditError {
    #[error("invalid target URL '{url}': {reason}")]
    InvalidTarget { url: String, reason: String },

    #[error("unsupported scheme '{scheme}' in target '{url}' (expected http or https)")]
    UnsupportedScheme { url: String, scheme: String },

    #[error("attribute list of node {node_id} has odd length {len}")]
    OddAttributeList { node_id: i64, len: usize },
}

/// Convenience result type.
pub type AuditResult<T> = Result<T, AuditError>;
