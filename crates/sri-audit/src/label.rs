//! Classifier: derive SRI/CORS labels from correlated records.
//!
//! Attribute presence gives the starting state; the record's own diagnostic
//! log entries can then override it through [`RULES`], an ordered table of
//! browser message patterns. The first rule with a matching entry wins.

use crate::origin::{is_cross_origin, is_https, resolve};
use crate::types::{CorrelatedRecord, LabelRecord, LogEntry, Tag};
use regex::Regex;
use std::sync::OnceLock;
use url::Url;

/// Base URL used for resource resolution and origin/https comparisons.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LabelBase {
    /// The top-level target, also for tags found in nested frames.
    #[default]
    Target,
    /// The document that directly contains the tag.
    Document,
}

/// How a rule changes one label field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Set {
    Keep,
    True,
    False,
    Unknown,
}

impl Set {
    fn apply(self, slot: &mut Option<bool>) {
        match self {
            Set::Keep => {}
            Set::True => *slot = Some(true),
            Set::False => *slot = Some(false),
            Set::Unknown => *slot = None,
        }
    }

    fn apply_flag(self, slot: &mut bool) {
        match self {
            Set::True => *slot = true,
            Set::False => *slot = false,
            Set::Keep | Set::Unknown => {}
        }
    }
}

/// Field updates applied when a rule fires.
#[derive(Debug, Clone, Copy)]
pub struct Effect {
    pub has_integrity: Set,
    pub has_valid_integrity: Set,
    pub uses_unsupported_hash: Set,
    pub has_malformed_integrity: Set,
    pub has_crossorigin: Set,
    pub has_valid_crossorigin: Set,
}

/// One entry of the diagnostic rule table.
#[derive(Debug, Clone, Copy)]
pub struct DiagnosticRule {
    pub name: &'static str,
    pub pattern: &'static str,
    pub effect: Effect,
}

const CORS_BLOCKED: Effect = Effect {
    has_integrity: Set::Keep,
    has_valid_integrity: Set::Unknown,
    uses_unsupported_hash: Set::False,
    has_malformed_integrity: Set::Unknown,
    has_crossorigin: Set::True,
    has_valid_crossorigin: Set::False,
};

/// Browser diagnostics that change a label, in priority order.
pub const RULES: &[DiagnosticRule] = &[
    DiagnosticRule {
        name: "integrity-without-cors",
        pattern: r"(?is)has an integrity attribute, but the resource requires the request to be CORS enabled",
        effect: Effect {
            has_integrity: Set::True,
            has_valid_integrity: Set::Unknown,
            uses_unsupported_hash: Set::False,
            has_malformed_integrity: Set::Unknown,
            has_crossorigin: Set::True,
            has_valid_crossorigin: Set::False,
        },
    },
    DiagnosticRule {
        name: "cors-wildcard-with-credentials",
        pattern: r"(?is)blocked by CORS policy.*must not be the wildcard '\*' when the request's credentials mode is 'include'",
        effect: CORS_BLOCKED,
    },
    DiagnosticRule {
        name: "cors-missing-allow-origin",
        pattern: r"(?is)blocked by CORS policy.*No 'Access-Control-Allow-Origin' header is present",
        effect: CORS_BLOCKED,
    },
    DiagnosticRule {
        name: "digest-mismatch",
        pattern: r"(?is)Failed to find a valid digest in the 'integrity' attribute.*computed SHA-(?:256|384|512) integrity.*blocked",
        effect: Effect {
            has_integrity: Set::True,
            has_valid_integrity: Set::False,
            uses_unsupported_hash: Set::False,
            has_malformed_integrity: Set::False,
            has_crossorigin: Set::Keep,
            has_valid_crossorigin: Set::True,
        },
    },
    DiagnosticRule {
        name: "unsupported-hash-algorithm",
        pattern: r"(?is)Error parsing 'integrity' attribute.*hash algorithm must be one of 'sha256', 'sha384',? or 'sha512'",
        effect: Effect {
            has_integrity: Set::True,
            has_valid_integrity: Set::False,
            uses_unsupported_hash: Set::True,
            has_malformed_integrity: Set::False,
            has_crossorigin: Set::Keep,
            has_valid_crossorigin: Set::Keep,
        },
    },
    DiagnosticRule {
        name: "malformed-integrity",
        pattern: r"(?is)Error parsing 'integrity' attribute.*algorithm must be followed by (?:a )?'-'",
        effect: Effect {
            has_integrity: Set::True,
            has_valid_integrity: Set::False,
            uses_unsupported_hash: Set::False,
            has_malformed_integrity: Set::True,
            has_crossorigin: Set::Keep,
            has_valid_crossorigin: Set::Keep,
        },
    },
];

fn compiled_rules() -> &'static [(DiagnosticRule, Regex)] {
    static COMPILED: OnceLock<Vec<(DiagnosticRule, Regex)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        RULES
            .iter()
            .map(|rule| {
                let re = Regex::new(rule.pattern).expect("diagnostic rule regex is valid");
                (*rule, re)
            })
            .collect()
    })
}

/// The first rule, in table order, matched by any of `logs`.
pub fn first_matching_rule(logs: &[LogEntry]) -> Option<&'static DiagnosticRule> {
    compiled_rules()
        .iter()
        .find(|(_, re)| logs.iter().any(|log| re.is_match(&log.text)))
        .map(|(rule, _)| rule)
}

/// Produces one [`LabelRecord`] per [`CorrelatedRecord`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Labeler {
    base: LabelBase,
}

impl Labeler {
    pub fn new(base: LabelBase) -> Self {
        Self { base }
    }

    /// Label `records` in order. Pure: equal input gives equal output.
    pub fn label(&self, target: &str, records: &[CorrelatedRecord]) -> Vec<LabelRecord> {
        let target_url = Url::parse(target).ok();
        let labels: Vec<LabelRecord> = records
            .iter()
            .map(|record| self.label_one(target, target_url.as_ref(), record))
            .collect();
        tracing::debug!(target_url = %target, records = labels.len(), "labelling complete");
        labels
    }

    fn label_one(&self, target: &str, target_url: Option<&Url>, record: &CorrelatedRecord) -> LabelRecord {
        let base = match self.base {
            LabelBase::Target => target,
            LabelBase::Document => record.tag.resolution_base(),
        };
        let base_url = match self.base {
            LabelBase::Target => target_url.cloned(),
            LabelBase::Document => document_origin_url(&record.tag),
        };

        let raw = record.tag.resource_value();
        let resolved = raw.and_then(|r| resolve(r, base));
        let resource = match (&resolved, raw) {
            (Some(url), _) => Some(url.to_string()),
            (None, Some(raw)) => Some(raw.to_string()),
            (None, None) => None,
        };
        let resource_uses_https = resolved.as_ref().is_some_and(is_https);
        let resource_cross_origin = match (&resolved, &base_url) {
            (Some(res), Some(base)) => is_cross_origin(res, base),
            _ => false,
        };

        // Synthetic records carry no attribute data to decide presence from.
        let (has_integrity, has_crossorigin) = if record.complete {
            (
                Some(record.tag.non_empty_attribute("integrity").is_some()),
                Some(record.tag.non_empty_attribute("crossorigin").is_some()),
            )
        } else {
            (None, None)
        };

        let mut label = LabelRecord {
            target: target.to_string(),
            complete: record.complete,
            page_uses_https: target_url.is_some_and(is_https),
            resource,
            resource_uses_https,
            resource_cross_origin,
            has_integrity,
            has_crossorigin,
            has_valid_integrity: has_integrity.filter(|present| *present),
            uses_unsupported_hash: false,
            has_malformed_integrity: Some(false),
            has_valid_crossorigin: has_crossorigin.filter(|present| *present),
            has_multiple_integrity: None,
            accepts_multiple_resources: None,
        };

        if let Some(rule) = first_matching_rule(&record.logs) {
            tracing::trace!(rule = rule.name, resource = ?label.resource, "diagnostic rule matched");
            let effect = rule.effect;
            effect.has_integrity.apply(&mut label.has_integrity);
            effect.has_valid_integrity.apply(&mut label.has_valid_integrity);
            effect
                .uses_unsupported_hash
                .apply_flag(&mut label.uses_unsupported_hash);
            effect
                .has_malformed_integrity
                .apply(&mut label.has_malformed_integrity);
            effect.has_crossorigin.apply(&mut label.has_crossorigin);
            effect
                .has_valid_crossorigin
                .apply(&mut label.has_valid_crossorigin);
        }

        label
    }
}

/// URL whose origin a tag's document has. Documents with an opaque origin
/// (`about:srcdoc`) fall back to their base URL.
fn document_origin_url(tag: &Tag) -> Option<Url> {
    Url::parse(&tag.document)
        .ok()
        .filter(|url| url.origin().is_tuple())
        .or_else(|| Url::parse(tag.resolution_base()).ok())
}

/// Label `records` against `target` using the default base.
pub fn label(target: &str, records: &[CorrelatedRecord]) -> Vec<LabelRecord> {
    Labeler::default().label(target, records)
}
