//! Run coordinator: audit many targets through a bounded pool.

use crate::crawl::{crawl_target, CrawlConfig};
use crate::renderer::Renderer;
use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use sri_audit::{correlate, LabelBase, Labeler};
use std::path::{Path, PathBuf};
use url::Url;

const SCRAPE_SUFFIX: &str = ".scrape.json";
const LABEL_SUFFIX: &str = ".label.json";
const SUMMARY_FILE: &str = "summary.json";

/// How artifacts are named in the output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputNaming {
    /// `scrape.json` / `label.json`. Only meaningful for a single target.
    Fixed,
    /// `<base64url(target)>.scrape.json` / `<base64url(target)>.label.json`.
    PerTarget,
}

/// Settings for a batch run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub output_dir: PathBuf,
    pub concurrency: usize,
    pub crawl: CrawlConfig,
    pub label_base: LabelBase,
    pub naming: OutputNaming,
}

impl RunConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            concurrency: default_concurrency(),
            crawl: CrawlConfig::default(),
            label_base: LabelBase::default(),
            naming: OutputNaming::PerTarget,
        }
    }
}

/// One less than the available parallelism, at least one.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// Reversible, filesystem-safe name for a target.
pub fn encode_output_name(target: &str) -> String {
    URL_SAFE_NO_PAD.encode(target.as_bytes())
}

/// Recover the target from an artifact file name (with or without suffix).
pub fn decode_output_name(name: &str) -> Option<String> {
    let stem = name
        .strip_suffix(SCRAPE_SUFFIX)
        .or_else(|| name.strip_suffix(LABEL_SUFFIX))
        .unwrap_or(name);
    let bytes = URL_SAFE_NO_PAD.decode(stem).ok()?;
    String::from_utf8(bytes).ok()
}

/// Paths of the correlation and label artifacts for `target`.
pub fn output_paths(dir: &Path, naming: OutputNaming, target: &str) -> (PathBuf, PathBuf) {
    match naming {
        OutputNaming::Fixed => (dir.join("scrape.json"), dir.join("label.json")),
        OutputNaming::PerTarget => {
            let name = encode_output_name(target);
            (
                dir.join(format!("{name}{SCRAPE_SUFFIX}")),
                dir.join(format!("{name}{LABEL_SUFFIX}")),
            )
        }
    }
}

/// A target that produced no output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetFailure {
    pub target: String,
    pub error: String,
}

/// Outcome of a batch, written as `summary.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub succeeded: Vec<String>,
    pub failed: Vec<TargetFailure>,
}

/// Audit every target. Per-target failures are logged and recorded in the
/// summary; they never stop the batch.
pub async fn run_batch(renderer: &dyn Renderer, targets: Vec<Url>, config: &RunConfig) -> RunSummary {
    let started_at = Utc::now();
    let labeler = Labeler::new(config.label_base);
    let labeler = &labeler;
    let concurrency = config.concurrency.max(1);
    tracing::info!(targets = targets.len(), concurrency, "starting batch");

    let outcomes: Vec<(Url, Result<()>)> = stream::iter(targets)
        .map(|target| async move {
            let result = audit_target(renderer, &target, config, labeler).await;
            (target, result)
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    let mut succeeded = Vec::new();
    let mut failed = Vec::new();
    for (target, result) in outcomes {
        match result {
            Ok(()) => succeeded.push(target.to_string()),
            Err(e) => {
                tracing::warn!(target = %target, "audit failed: {e:#}");
                failed.push(TargetFailure {
                    target: target.to_string(),
                    error: format!("{e:#}"),
                });
            }
        }
    }

    let summary = RunSummary {
        started_at,
        finished_at: Utc::now(),
        succeeded,
        failed,
    };
    tracing::info!(
        succeeded = summary.succeeded.len(),
        failed = summary.failed.len(),
        "batch complete"
    );

    if let Err(e) = write_json(&config.output_dir.join(SUMMARY_FILE), &summary).await {
        tracing::warn!("failed to write run summary: {e:#}");
    }
    summary
}

/// Crawl, correlate, label and persist one target.
pub async fn audit_target(
    renderer: &dyn Renderer,
    target: &Url,
    config: &RunConfig,
    labeler: &Labeler,
) -> Result<()> {
    let bundle = crawl_target(renderer, target, &config.crawl).await?;
    let report = correlate(bundle);
    let labels = labeler.label(&report.target, &report.records);

    let (scrape_path, label_path) = output_paths(&config.output_dir, config.naming, target.as_str());
    write_json(&scrape_path, &report).await?;
    write_json(&label_path, &labels).await?;
    tracing::debug!(target = %target, path = %label_path.display(), "wrote artifacts");
    Ok(())
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_name_is_reversible() {
        let target = "https://example.com/path?q=a+b&x=/y#frag";
        let name = encode_output_name(target);
        assert!(!name.contains('/'));
        assert!(!name.contains('='));
        assert_eq!(decode_output_name(&name).as_deref(), Some(target));
        assert_eq!(
            decode_output_name(&format!("{name}.label.json")).as_deref(),
            Some(target)
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(decode_output_name("not base64!"), None);
    }

    #[test]
    fn test_output_paths() {
        let dir = Path::new("/out");
        let (scrape, label) = output_paths(dir, OutputNaming::Fixed, "https://example.com/");
        assert_eq!(scrape, Path::new("/out/scrape.json"));
        assert_eq!(label, Path::new("/out/label.json"));

        let (scrape, label) = output_paths(dir, OutputNaming::PerTarget, "https://example.com/");
        let name = encode_output_name("https://example.com/");
        assert_eq!(scrape, dir.join(format!("{name}.scrape.json")));
        assert_eq!(label, dir.join(format!("{name}.label.json")));
    }

    #[test]
    fn test_default_concurrency_at_least_one() {
        assert!(default_concurrency() >= 1);
    }
}
