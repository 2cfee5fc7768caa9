use std::{
    io::{self, BufRead},
    path::PathBuf,
    sync::Arc,
    thread,
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossbeam_channel::Receiver;
use monitor_core::{MonitorSession, PrinterUpdate, SessionOptions};
use thumbnails::ThumbnailLoader;
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod render;

#[derive(Parser, Debug)]
#[command(about = "Live status of Moonraker printers on the console")]
struct Args {
    /// Config file; defaults to ./printdesk.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    /// `name=address` or bare `address`; replaces the configured printers.
    #[arg(long = "printer")]
    printers: Vec<String>,
    #[arg(long)]
    tick_ms: Option<u64>,
    /// Start with console updates paused until Enter is pressed.
    #[arg(long)]
    paused: bool,
}

fn spawn_presenter(
    updates: Receiver<PrinterUpdate>,
    runtime: Handle,
    thumbnails: Arc<ThumbnailLoader>,
) -> Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("presenter".into())
        .spawn(move || {
            for update in updates.iter() {
                println!("{}", render::status_line(&update.snapshot));
                let Some(key) = update.thumbnail else {
                    continue;
                };
                let thumbnails = Arc::clone(&thumbnails);
                runtime.spawn(async move {
                    if let Some(bytes) = thumbnails.load(&key).await {
                        info!(
                            address = %key.address,
                            filename = %key.filename,
                            size = bytes.len(),
                            "thumbnail ready"
                        );
                    }
                });
            }
        })
        .context("failed to spawn presenter thread")
}

/// True once a line was entered, false at end of input.
fn read_resume_line(input: &mut impl BufRead) -> io::Result<bool> {
    let mut line = String::new();
    Ok(input.read_line(&mut line)? > 0)
}

/// Resolves on the first line read from stdin. At end of input it never
/// resolves, so updates stay paused until shutdown. The reader thread is
/// detached so a pending read never blocks shutdown.
async fn wait_for_enter() -> Result<()> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            let _ = tx.send(read_resume_line(&mut io::stdin().lock()));
        })
        .context("failed to spawn stdin reader")?;
    if rx.await?.context("failed to read stdin")? {
        return Ok(());
    }
    warn!("stdin closed; updates stay paused until shutdown");
    std::future::pending().await
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let mut settings = config::load_settings(args.config.as_deref())?;
    if !args.printers.is_empty() {
        settings.printers = args
            .printers
            .iter()
            .map(|raw| config::parse_printer_arg(raw))
            .collect::<Result<_>>()?;
    }
    if let Some(tick_ms) = args.tick_ms {
        settings.tick_ms = tick_ms;
    }

    let endpoints = settings.enabled_endpoints();
    if endpoints.is_empty() {
        return Err(anyhow!(
            "no enabled printers; add them to {} or pass --printer name=address",
            config::DEFAULT_CONFIG_FILE
        ));
    }

    let (updates_tx, updates_rx) = crossbeam_channel::unbounded();
    let options = SessionOptions {
        tick: settings.tick(),
        start_paused: args.paused,
        ..SessionOptions::default()
    };
    let session =
        MonitorSession::start(endpoints, options, updates_tx).context("invalid printer setup")?;
    for endpoint in session.endpoints() {
        info!(printer = %endpoint.name, address = %endpoint.address, "monitoring printer");
    }

    let thumbnails = Arc::new(ThumbnailLoader::moonraker()?);
    let presenter = spawn_presenter(updates_rx, Handle::current(), thumbnails)?;

    if args.paused {
        info!("updates paused; press Enter to resume");
        tokio::select! {
            result = wait_for_enter() => {
                result?;
                session.set_updates_paused(false);
                info!("updates resumed");
                tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
            }
            result = tokio::signal::ctrl_c() => result.context("failed to listen for ctrl-c")?,
        }
    } else {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for ctrl-c")?;
    }

    info!("shutting down");
    let snapshots = session.shutdown().await;
    let joined = tokio::time::timeout(
        Duration::from_secs(2),
        tokio::task::spawn_blocking(move || presenter.join()),
    )
    .await;
    if !matches!(joined, Ok(Ok(Ok(())))) {
        warn!("presenter did not finish cleanly");
    }

    println!("--- final state ---");
    for snapshot in &snapshots {
        println!("{}", render::status_line(snapshot));
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
