mod cli;
mod clients;
mod comments;
mod config;
mod error;
mod fingerprint;
mod hierarchy;
mod metadata;
mod model;
mod status;
mod sync;
mod util;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use clients::github::GitHubClient;
use clients::jira::JiraClient;
use sync::{Orchestrator, SyncContext};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let opts = cli::parse_args(&args)?;
    if opts.show_help {
        print!("{}", cli::usage());
        return Ok(());
    }

    let config = match &opts.config_path {
        Some(path) => config::load_config_from(path)?,
        None => config::load_config()?,
    };

    let jira = JiraClient::new(&config.jira);
    let github = GitHubClient::new(&config.github, config.sync.sync_label.clone());

    let orchestrator = Orchestrator::new(&jira, &github, &config);
    let mut ctx = SyncContext::new(opts.dry_run || config.sync.dry_run);
    let summary = orchestrator.run(&mut ctx).await?;

    print!("{}", cli::render_summary(&summary, &ctx.failures));
    if summary.errored > 0 {
        std::process::exit(1);
    }
    Ok(())
}
