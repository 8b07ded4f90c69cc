//! Subagent Monitor - live job status from append-only event logs.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use subagent_monitor::config::{
    ConfigError, ConfigLoader, FixedSettings, MonitorConfig, ReloadingSettings, WatchBackend,
};
use subagent_monitor::dispatch::EventDispatcher;
use subagent_monitor::display::ConsoleSink;
use subagent_monitor::session::{MonitorSession, SessionOptions};
use subagent_monitor::watcher::{EventBatch, EventStreamReader, WatcherError};

/// How often `watch` re-reads the config file for notification settings.
const SETTINGS_RELOAD_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(
    name = "subagent-monitor",
    about = "Live job status from append-only event logs",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file to use instead of the default search paths.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Show long lines in full.
    #[arg(long, global = true)]
    raw: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a project for event logs until interrupted.
    Watch {
        /// Project root to search.
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// Glob for event logs, relative to the root.
        #[arg(long)]
        pattern: Option<String>,
        /// Poll file metadata instead of using native notifications.
        #[arg(long)]
        poll: bool,
        /// Only show events appended after startup.
        #[arg(long)]
        skip_existing: bool,
    },
    /// Read one event log from the start and print the resulting job summary.
    Replay {
        /// Event log to read.
        file: PathBuf,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Watcher(#[from] WatcherError),
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn watch(
    loader: ConfigLoader,
    config: MonitorConfig,
    root: PathBuf,
    raw: bool,
) -> Result<(), CliError> {
    let options = SessionOptions::from_config(&config.discovery)?;
    if config.watch.backend == WatchBackend::Poll {
        tracing::debug!(
            interval_ms = config.watch.poll_interval_ms,
            "Using polling backend"
        );
    }
    let subscriber = config.watch.subscriber();
    let settings = ReloadingSettings::spawn(
        config.notifications.auto_open_logs,
        loader,
        SETTINGS_RELOAD_INTERVAL,
    );

    let mut session = MonitorSession::start(
        &root,
        options,
        subscriber,
        Box::new(ConsoleSink::stdout(raw)),
        settings,
    )
    .await?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            }
            shutdown.cancel();
        });
    }

    session.run(shutdown).await;
    let dispatcher = session.dispose().await?;
    tracing::info!(summary = %dispatcher.summary(), "Stopped watching");
    Ok(())
}

async fn replay(config: &MonitorConfig, file: PathBuf, raw: bool) -> Result<(), CliError> {
    let mut reader = EventStreamReader::new(file.clone());
    let lines = reader.refresh(true).await?;
    tracing::info!(path = %file.display(), events = lines.len(), "Replaying event log");

    let settings = FixedSettings {
        auto_open_logs: config.notifications.auto_open_logs,
    };
    let mut dispatcher = EventDispatcher::new(Box::new(ConsoleSink::stdout(raw)), Arc::new(settings));
    dispatcher.dispatch_batch(EventBatch::new(file, lines));
    println!("{}", dispatcher.summary());
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let loader = cli
        .config
        .map_or_else(ConfigLoader::new, ConfigLoader::with_path);

    let result = match loader.load() {
        Ok(mut config) => match cli.command {
            Commands::Watch {
                root,
                pattern,
                poll,
                skip_existing,
            } => {
                if let Some(pattern) = pattern {
                    config.discovery.pattern = pattern;
                }
                if poll {
                    config.watch.backend = WatchBackend::Poll;
                }
                if skip_existing {
                    config.discovery.process_existing = false;
                }
                tracing::info!(
                    root = %root.display(),
                    pattern = %config.discovery.pattern,
                    backend = ?config.watch.backend,
                    "Starting subagent monitor"
                );
                watch(loader, config, root, cli.raw).await
            }
            Commands::Replay { file } => replay(&config, file, cli.raw).await,
        },
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "subagent-monitor failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
