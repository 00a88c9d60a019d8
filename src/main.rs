#![allow(missing_docs)]

//! Command-line shell over the query engine.
//!
//! One-shot subcommands for issuing a query, inspecting provider
//! health, and validating prompt templates. The HTTP service surface
//! lives outside this binary.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use nlquery::config::AppConfig;
use nlquery::engine::Engine;
use nlquery::logging;
use nlquery::prompt::TemplateValidator;

#[derive(Parser)]
#[command(name = "nlquery", about = "Natural-language audit query engine")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "nlquery.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process one query and print the raw model response.
    Query {
        /// The natural-language query text.
        text: String,
        /// Session to attach the query to; omitted starts a new one.
        #[arg(long)]
        session: Option<String>,
    },
    /// Probe every configured provider and print health state.
    Providers,
    /// Validate a prompt template file and print the report.
    ValidateTemplate {
        /// Path to the template file.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init_cli();

    let cli = Cli::parse();
    match cli.command {
        Command::Query { text, session } => run_query(&cli.config, &text, session).await,
        Command::Providers => run_providers(&cli.config).await,
        Command::ValidateTemplate { file } => run_validate_template(&file),
    }
}

async fn run_query(
    config_path: &std::path::Path,
    text: &str,
    session: Option<String>,
) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path)?;
    let engine = Engine::from_config(&config).await?;

    let loaded = engine.load_persisted_sessions().await?;
    if loaded > 0 {
        info!(loaded, "sessions restored");
    }

    // One synchronous round so a one-shot invocation sees health state.
    engine.selector().force_health_check().await;

    let session_id = session.unwrap_or_default();
    let response = engine.process_query(&session_id, text).await?;

    let rendered = serde_json::to_string_pretty(&response)
        .context("failed to render response as JSON")?;
    println!("{rendered}");

    engine.shutdown().await?;
    Ok(())
}

async fn run_providers(config_path: &std::path::Path) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path)?;
    let engine = Engine::from_config(&config).await?;
    engine.selector().force_health_check().await;

    let mut names: Vec<String> = engine.health_snapshot().keys().cloned().collect();
    names.sort();
    let snapshot = engine.health_snapshot();
    for name in names {
        let Some(health) = snapshot.get(&name) else {
            continue;
        };
        let status = if health.is_healthy { "healthy" } else { "down" };
        println!(
            "{name:24} {status:8} {:6}ms  checks={} errors={} {}",
            health.response_time_ms,
            health.check_count,
            health.error_count,
            health.last_error.as_deref().unwrap_or(""),
        );
    }

    engine.shutdown().await?;
    Ok(())
}

fn run_validate_template(file: &std::path::Path) -> anyhow::Result<()> {
    let template = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read template file {}", file.display()))?;

    let report = TemplateValidator::new().validate(&template);
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("failed to render report")?
    );
    if report.is_valid {
        Ok(())
    } else {
        anyhow::bail!("template is invalid ({} errors)", report.errors.len())
    }
}
