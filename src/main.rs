mod config;
mod connectors;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use calmirror_core::{CursorStore, Reconciler, RetryPolicy};
use connectors::{google, notion::NotionSink};

#[derive(Parser)]
#[command(name = "calmirror-cli")]
#[command(about = "Mirror a Google Calendar into a Notion database, incrementally and without duplicates")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate with Google Calendar
    Auth,
    /// Mirror calendar changes into the Notion database
    Sync,
    /// Show config, token and cursor state
    Status,
    /// Forget the sync cursor so the next sync relists the full calendar
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Auth => cmd_auth().await,
        Commands::Sync => cmd_sync().await,
        Commands::Status => cmd_status(),
        Commands::Reset => cmd_reset(),
    }
}

async fn cmd_auth() -> Result<()> {
    let cfg = config::load_config()?;

    println!("Authenticating with Google Calendar...");

    // Full OAuth flow: browser consent, localhost callback, code exchange
    let tokens = google::authenticate(&cfg.google).await?;
    config::save_tokens(&tokens)?;

    println!("\nTokens saved to {}", config::tokens_path()?.display());
    println!("\nRun `calmirror-cli sync` to mirror your calendar.");

    Ok(())
}

async fn cmd_sync() -> Result<()> {
    let cfg = config::load_config()?;
    let tokens = fresh_tokens(&cfg).await?;

    println!("📅 Mirroring calendar: {}", cfg.google.calendar_id);

    let source =
        google::GoogleCalendarSource::new(tokens.access_token, cfg.google.calendar_id.clone());
    let sink = NotionSink::new(&cfg.notion);
    let cursors = CursorStore::new(config::cursor_path()?);

    let engine = Reconciler::new(source, sink, cursors, RetryPolicy::standard());
    let report = engine.run_cycle().await?;

    println!(
        "  Fetched {} events ({} dropped): {} created, {} updated, {} unchanged",
        report.fetched, report.dropped, report.created, report.updated, report.skipped
    );

    if !report.is_clean() {
        println!("\n  {} events failed:", report.failures.len());
        for failure in &report.failures {
            println!(
                "    - {} ({}): {}",
                failure.title, failure.external_id, failure.error
            );
        }
    }

    if report.cursor_advanced {
        println!("\nSync cursor saved; the next sync picks up from here.");
    } else {
        println!("\nSync cursor kept; the next sync retries this window.");
    }

    Ok(())
}

fn cmd_status() -> Result<()> {
    let cfg = config::load_config()?;

    println!("Config:  {}", config::config_path()?.display());
    println!("Google:  calendar '{}'", cfg.google.calendar_id);
    println!("Notion:  database '{}'", cfg.notion.database_id);

    match config::load_tokens()? {
        Some(tokens) if !tokens.is_expired() => println!("Tokens:  valid"),
        Some(_) => println!("Tokens:  expired (refreshed automatically on the next sync)"),
        None => println!("Tokens:  missing, run `calmirror-cli auth`"),
    }

    let cursors = CursorStore::new(config::cursor_path()?);
    match cursors.load()? {
        Some(_) => println!("Cursor:  saved, the next sync is incremental"),
        None => println!("Cursor:  none, the next sync lists the full calendar"),
    }

    Ok(())
}

fn cmd_reset() -> Result<()> {
    let cursors = CursorStore::new(config::cursor_path()?);
    cursors.clear()?;

    println!("Sync cursor cleared. The next sync relists the full calendar.");
    println!("Existing Notion pages are matched by event ID, so nothing gets duplicated.");

    Ok(())
}

/// Load stored tokens, refreshing the access token if it has expired
async fn fresh_tokens(cfg: &config::Config) -> Result<config::Tokens> {
    let tokens = config::load_tokens()?.ok_or_else(|| {
        anyhow::anyhow!(
            "No stored tokens found.\n\
            Run `calmirror-cli auth` to connect your Google account first."
        )
    })?;

    if !tokens.is_expired() {
        return Ok(tokens);
    }

    println!("Access token expired, refreshing...");
    let refreshed = google::refresh_access_token(&cfg.google, &tokens).await?;
    config::save_tokens(&refreshed)?;

    Ok(refreshed)
}
