// Copyright 2026 SRI Audit Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser, ValueEnum};
use sri_audit::{parse_target, LabelBase};
use sri_audit_runtime::renderer::chromium::ChromiumRenderer;
use sri_audit_runtime::renderer::Renderer;
use sri_audit_runtime::targets::read_targets;
use sri_audit_runtime::{run_batch, CrawlConfig, OutputNaming, RunConfig};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "sri-audit",
    about = "Audit Subresource Integrity and CORS attributes on live pages",
    version
)]
#[command(group(ArgGroup::new("targets").required(true).args(["url", "input"])))]
struct Cli {
    /// Target URL (http or https)
    url: Option<String>,

    /// File of newline-separated target URLs
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output directory (created if missing)
    #[arg(short, long)]
    output: PathBuf,

    /// Per-target crawl timeout in milliseconds
    #[arg(long, default_value = "30000")]
    timeout: u64,

    /// Network quiet period in milliseconds that counts as idle
    #[arg(long, default_value = "500")]
    idle: u64,

    /// Concurrent crawls (default: CPU count - 1)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Base URL for https and cross-origin comparisons
    #[arg(long, value_enum, default_value = "target")]
    label_base: LabelBaseArg,

    /// Record sha256 digests of loaded script and stylesheet bodies
    #[arg(long)]
    hash_bodies: bool,

    /// Chromium executable (default: $SRI_AUDIT_CHROMIUM_PATH, then PATH)
    #[arg(long)]
    chromium: Option<PathBuf>,

    /// Log level filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum LabelBaseArg {
    Target,
    Document,
}

impl From<LabelBaseArg> for LabelBase {
    fn from(arg: LabelBaseArg) -> Self {
        match arg {
            LabelBaseArg::Target => LabelBase::Target,
            LabelBaseArg::Document => LabelBase::Document,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_json);

    if let Err(e) = run(cli).await {
        eprintln!("  Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_logging(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Input validation happens before any browser is launched.
    let (targets, naming) = match (&cli.url, &cli.input) {
        (Some(url), None) => (vec![parse_target(url)?], OutputNaming::Fixed),
        (None, Some(path)) => (read_targets(path)?, OutputNaming::PerTarget),
        _ => bail!("pass either a URL or --input"),
    };

    std::fs::create_dir_all(&cli.output)
        .with_context(|| format!("failed to create output directory {}", cli.output.display()))?;

    let mut config = RunConfig::new(&cli.output);
    config.naming = naming;
    config.label_base = cli.label_base.into();
    if let Some(n) = cli.concurrency {
        config.concurrency = n.max(1);
    }
    config.crawl = CrawlConfig {
        timeout: Duration::from_millis(cli.timeout),
        navigation_timeout_ms: cli.timeout,
        idle: Duration::from_millis(cli.idle),
        hash_bodies: cli.hash_bodies,
    };

    let renderer = ChromiumRenderer::new(cli.chromium).await?;
    let summary = run_batch(&renderer, targets, &config).await;
    renderer.shutdown().await?;

    if !summary.failed.is_empty() {
        tracing::warn!(
            "{} of {} targets failed",
            summary.failed.len(),
            summary.failed.len() + summary.succeeded.len()
        );
    }
    Ok(())
}
