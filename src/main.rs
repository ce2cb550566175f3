//! CLI entry point for the workspace harvester.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use harvester_core::browser::BrowserLauncher;
use harvester_core::config::{Settings, load_env_file, overlay_process_env};
use harvester_core::orchestrator::Orchestrator;
use tracing::{debug, info};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");
    info!("Harvester starting");

    let (env_path, required) = args.env_file();
    let mut entries = overlay_process_env(
        load_env_file(&env_path, required)
            .with_context(|| format!("failed to load {}", env_path.display()))?,
    );
    args.apply_overrides(&mut entries);
    let settings = Settings::from_entries(&entries).context("invalid settings")?;
    info!(
        library = %settings.workspace.library_id,
        output = %settings.output_dir.display(),
        sessions = settings.workers.sessions,
        "settings resolved"
    );

    let launcher = launcher(&args)?;
    let run = Orchestrator::new(settings, launcher)
        .begin()
        .await
        .context("failed to start the crawl")?;

    prompt(&format!(
        "Log in to the workspace in all {} browser windows, then press Enter",
        run.session_count()
    ))
    .await?;
    run.confirm_login();

    prompt("Press Enter once all downloads are complete").await?;
    let report = run.drain_and_stop().await.context("failed to finish the run")?;

    println!("{}", report.render_summary());
    Ok(())
}

#[cfg(feature = "chromium")]
fn launcher(args: &Args) -> Result<Arc<dyn BrowserLauncher>> {
    use harvester_core::browser::chromium::{ChromiumLauncher, LaunchOptions};

    Ok(Arc::new(ChromiumLauncher::new(LaunchOptions {
        profile_root: args.profile_dir.clone(),
        base_port: args.base_port,
        headless: args.headless,
    })))
}

#[cfg(not(feature = "chromium"))]
fn launcher(args: &Args) -> Result<Arc<dyn BrowserLauncher>> {
    debug!(profile_dir = %args.profile_dir.display(), "no browser backend compiled in");
    anyhow::bail!("no browser backend available; rebuild with `--features chromium`")
}

/// Shows `message` and waits for a line on stdin without blocking the runtime.
async fn prompt(message: &str) -> Result<()> {
    let message = message.to_string();
    tokio::task::spawn_blocking(move || -> io::Result<()> {
        let mut stdout = io::stdout();
        writeln!(stdout, "{message}")?;
        stdout.flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(())
    })
    .await
    .context("prompt task failed")?
    .context("failed to read from stdin")
}
