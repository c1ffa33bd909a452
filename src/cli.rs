use std::path::PathBuf;

use anyhow::{bail, Result};

use crate::sync::{RecordFailure, SyncSummary};

const USAGE: &str = "\
trackbridge - keep a Jira project and a GitHub repo convergent

USAGE:
    trackbridge [OPTIONS]

OPTIONS:
    --dry-run          Read and decide everything, write nothing
                       (stale-metadata cleanup still runs)
    --config <PATH>    Config file (default: ~/.trackbridge/config.toml)
    -h, --help         Show this help
";

#[derive(Debug, Default)]
pub struct CliOptions {
    pub dry_run: bool,
    pub config_path: Option<PathBuf>,
    pub show_help: bool,
}

pub fn parse_args(args: &[String]) -> Result<CliOptions> {
    let mut opts = CliOptions::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--dry-run" => opts.dry_run = true,
            "--config" => match iter.next() {
                Some(path) => opts.config_path = Some(PathBuf::from(path)),
                None => bail!("--config requires a path"),
            },
            "-h" | "--help" => opts.show_help = true,
            other => bail!("unknown argument '{other}'\n\n{USAGE}"),
        }
    }
    Ok(opts)
}

pub fn usage() -> &'static str {
    USAGE
}

/// Human-readable run report. Never drops a failure silently: every failed
/// record is counted and the first few show up with their reasons.
pub fn render_summary(summary: &SyncSummary, failures: &[RecordFailure]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "created {}, updated {}, unchanged {}, filtered {}, errored {}\n",
        summary.created,
        summary.updated,
        summary.skipped_unchanged,
        summary.skipped_filtered,
        summary.errored
    ));
    out.push_str(&format!(
        "transitions {}, comments {}, stale cleaned {}\n",
        summary.transitions_applied, summary.comments_synced, summary.stale_cleaned
    ));
    if !failures.is_empty() {
        out.push_str("failures:\n");
        for failure in failures.iter().take(5) {
            out.push_str(&format!("  {}: {}\n", failure.identity, failure.message));
        }
        if failures.len() > 5 {
            out.push_str(&format!("  ... and {} more\n", failures.len() - 5));
        }
    }
    out
}
