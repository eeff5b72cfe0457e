use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use palmboy_runner::{RunnerConfig, run};
use palmboy_test_engine::TestEngine;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Handheld frontend: runs a content file against the bundled engine.
#[derive(Parser)]
#[command(name = "palmboy", version, about)]
struct Cli {
    /// Content file to run (.gb, .sgb, .gbc, .gba)
    content: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    info!(content = %cli.content.display(), "starting session");

    let title = cli
        .content
        .file_name()
        .map_or_else(|| "palmboy".to_string(), |n| n.to_string_lossy().into_owned());

    run(
        Box::new(TestEngine::new()),
        RunnerConfig {
            title,
            content_path: cli.content.clone(),
        },
    )
    .with_context(|| format!("session for {} failed", cli.content.display()))
}
