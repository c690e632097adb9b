use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossterm::{
    cursor::Show,
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fleetview::app::{BackendCommand, StateSnapshot, UiApp};
use fleetview::backend::Backend;
use fleetview::config::{ClientConfig, ConnectArgs};
use fleetview::decoder::{Frame, TransportDecoder};
use fleetview::event::{Cadence, Event, EventHandler};
use fleetview::logging::{self, LogConfig, LogLevel};
use fleetview::protocol::Envelope;
use fleetview::transport::WebSocketConnector;
use fleetview::ui;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Parser)]
#[command(
    name = "fleetview",
    version,
    about = "Live terminal dashboard for a fleet of monitored servers"
)]
struct Cli {
    #[command(flatten)]
    connect: ConnectArgs,

    /// Log verbosity (overridden by FLEETVIEW_LOG)
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,

    /// Log file for the dashboard (defaults to the user state directory)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Wait for one full sync and print the replica as JSON
    Dump {
        /// Give up if no full sync completes within this many seconds
        #[arg(long, default_value_t = 35)]
        wait_secs: u64,
    },
    /// Decode a captured raw frame (text or gzip) and print its envelope
    Decode {
        /// File holding the raw frame bytes
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Dump { wait_secs }) => {
            init_logging(cli.log_level, None)?;
            let config = ClientConfig::from_args(&cli.connect)?;
            cmd_dump(config, Duration::from_secs(wait_secs)).await
        }
        Some(Commands::Decode { ref path }) => {
            init_logging(cli.log_level, None)?;
            cmd_decode(&cli.connect, path)
        }
        None => {
            let log_file = cli.log_file.clone().or_else(logging::default_log_file);
            init_logging(cli.log_level, log_file)?;
            let config = ClientConfig::from_args(&cli.connect)?;
            run_tui(config).await
        }
    }
}

fn init_logging(level: LogLevel, file: Option<PathBuf>) -> Result<()> {
    logging::init(&LogConfig { level, file }).context("Failed to initialize logging")
}

fn spawn_backend(
    config: &ClientConfig,
) -> (
    tokio::sync::mpsc::Sender<BackendCommand>,
    tokio::sync::watch::Receiver<Arc<StateSnapshot>>,
    tokio::task::JoinHandle<()>,
) {
    let (cmd_tx, cmd_rx) = tokio::sync::mpsc::channel(64);
    let (state_tx, state_rx) = tokio::sync::watch::channel(Arc::new(StateSnapshot::default()));
    let connector = WebSocketConnector::new(config.url.clone());
    let backend = Backend::new(Box::new(connector), config, state_tx);
    let task = tokio::spawn(backend.run(cmd_rx));
    (cmd_tx, state_rx, task)
}

async fn cmd_dump(config: ClientConfig, wait: Duration) -> Result<()> {
    let (cmd_tx, mut state_rx, task) = spawn_backend(&config);

    let waited = tokio::time::timeout(
        wait,
        state_rx.wait_for(|s| s.sync.last_completed.is_some()),
    )
    .await
    .map(|r| r.map(|guard| Arc::clone(&*guard)));
    let snapshot = match waited {
        Ok(Ok(snapshot)) => snapshot,
        Ok(Err(_)) => anyhow::bail!("backend stopped before a full sync completed"),
        Err(_) => {
            let last = Arc::clone(&*state_rx.borrow());
            let reason = last
                .connection
                .last_error
                .clone()
                .unwrap_or_else(|| last.sync.describe(chrono::Utc::now()));
            anyhow::bail!(
                "no full sync from {} within {}s ({reason})",
                config.url,
                wait.as_secs()
            );
        }
    };

    let _ = cmd_tx.send(BackendCommand::Quit).await;
    let _ = task.await;

    let json = serde_json::to_string_pretty(&*snapshot.replica)
        .context("Failed to serialize replica")?;
    println!("{json}");
    Ok(())
}

fn cmd_decode(args: &ConnectArgs, path: &Path) -> Result<()> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let frame = if bytes.starts_with(&GZIP_MAGIC) {
        Frame::Binary(bytes)
    } else {
        match String::from_utf8(bytes) {
            Ok(text) => Frame::Text(text),
            Err(err) => Frame::Binary(err.into_bytes()),
        }
    };

    let decoder = TransportDecoder::new(args.decompression);
    let envelope = decoder
        .decode(frame)
        .with_context(|| format!("Failed to decode {}", path.display()))?;
    println!("{}", describe_envelope(&envelope));
    Ok(())
}

fn describe_envelope(envelope: &Envelope) -> String {
    match envelope {
        Envelope::FullSyncStart { total_servers } => {
            format!("full_sync_start total_servers={total_servers}")
        }
        Envelope::ServerUpdate { server_id, .. } => format!("server_update server_id={server_id}"),
        Envelope::FullSyncComplete => "full_sync_complete".to_string(),
        Envelope::DeltaUpdate(delta) => format!(
            "delta_update changed={} removed={}",
            delta.changed_servers.as_ref().map_or(0, |m| m.len()),
            delta.removed_servers.as_ref().map_or(0, |v| v.len())
        ),
        Envelope::FullSnapshot { servers } => format!("full_sync servers={}", servers.len()),
        Envelope::Unknown { kind } => format!("{kind} (unrecognized, ignored)"),
    }
}

/// Raw mode plus the alternate screen. Both are undone on drop, including
/// when the UI loop bails out with an error.
struct TerminalGuard {
    restore: fn(),
}

impl TerminalGuard {
    fn enter() -> io::Result<Self> {
        enable_raw_mode()?;
        let guard = Self {
            restore: restore_terminal,
        };
        execute!(io::stdout(), EnterAlternateScreen)?;
        Ok(guard)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        (self.restore)();
    }
}

fn restore_terminal() {
    if let Err(err) = disable_raw_mode() {
        tracing::warn!(error = %err, "failed to leave raw mode");
    }
    if let Err(err) = execute!(io::stdout(), LeaveAlternateScreen, Show) {
        tracing::warn!(error = %err, "failed to leave alternate screen");
    }
}

async fn run_tui(config: ClientConfig) -> Result<()> {
    let (cmd_tx, state_rx, backend_task) = spawn_backend(&config);

    let guard = TerminalGuard::enter().context("Failed to set up terminal")?;
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;

    let mut app = UiApp::new(state_rx, cmd_tx);
    let mut events = EventHandler::new(Cadence::default());

    // Draw initial frame before entering event loop
    terminal.draw(|frame| ui::draw(frame, &app))?;

    // Main loop: no .await calls except the event queue; UI never blocks on I/O.
    while !app.should_quit {
        match events.next().await {
            Some(Event::Key(key)) => app.handle_key(key),
            Some(Event::Poll) => app.poll_state(),
            Some(Event::Clock) | Some(Event::Resize) => app.needs_redraw = true,
            None => break,
        }

        // Only redraw when state has actually changed
        if app.needs_redraw {
            terminal.draw(|frame| ui::draw(frame, &app))?;
            app.needs_redraw = false;
        }
    }

    drop(guard);
    let _ = tokio::time::timeout(Duration::from_secs(1), backend_task).await;
    Ok(())
}
