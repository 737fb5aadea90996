mod engines;
mod picker;
mod ui;

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use crossterm::{
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing_subscriber::{EnvFilter, fmt::writer::BoxMakeWriter};

use bndsync_core::backend::{Backend, Command};
use bndsync_core::config::SyncConfig;
use bndsync_core::dispatcher::{Action, Dispatcher};
use bndsync_core::drain::spawn_drain_timer;
use bndsync_core::event::{BackendEvent, EventEnvelope};
use bndsync_core::gateway::RequestId;
use bndsync_core::session::{Completions, Session};

use engines::{FakeBackend, StdioBackend};
use picker::{ConsoleNotifier, ModalQueue, PromptPicker, StaticPicker};

const LOG_ENV: &str = "BNDSYNC_LOG";

#[derive(Parser)]
#[command(name = "bndsync")]
#[command(about = "Follow a bndbuild engine live", long_about = None, version)]
struct Cli {
    /// Engine program speaking JSON lines on stdio (built-in demo engine otherwise)
    #[arg(long, global = true)]
    engine: Option<String>,

    /// Argument passed to the engine program, repeatable
    #[arg(long = "engine-arg", global = true, allow_hyphen_values = true)]
    engine_args: Vec<String>,

    /// Config file (default: $BNDSYNC_CONFIG or bndsync.yml in this directory or a parent)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive view (default)
    Tui {
        /// Build file to load on start
        file: Option<String>,
    },
    /// Feed a captured JSON-lines event stream through the dispatcher
    Replay { file: PathBuf },
    /// Load a build file, build one target and print the transcript
    Build {
        target: String,
        #[arg(short, long)]
        file: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Tui { file: None });

    let interactive = matches!(command, Commands::Tui { .. });
    init_tracing(cli.log_file.as_deref(), interactive, cli.verbose)?;

    let config = load_config(cli.config.as_deref())?;

    match command {
        Commands::Replay { file } => replay(&file, &config),
        Commands::Build { target, file } => {
            let backend = connect(cli.engine.as_deref(), &cli.engine_args, &config)?;
            build(backend, &config, target, file).await
        }
        Commands::Tui { file } => {
            let backend = connect(cli.engine.as_deref(), &cli.engine_args, &config)?;
            run_tui(backend, &config, file).await
        }
    }
}

fn init_tracing(log_file: Option<&Path>, interactive: bool, verbose: bool) -> Result<()> {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));

    // nothing may reach the terminal while the TUI owns it
    let writer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None if interactive => BoxMakeWriter::new(io::sink),
        None => BoxMakeWriter::new(io::stderr),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(log_file.is_none())
        .init();
    Ok(())
}

fn load_config(explicit: Option<&Path>) -> Result<SyncConfig> {
    if let Some(path) = explicit {
        let config = SyncConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?;
        tracing::info!(path = %path.display(), "config loaded");
        return Ok(config);
    }

    let cwd = std::env::current_dir().context("reading current directory")?;
    let (path, config) = SyncConfig::discover_or_default(&cwd)?;
    match path {
        Some(path) => tracing::info!(path = %path.display(), "config loaded"),
        None => tracing::debug!("no config file, using defaults"),
    }
    Ok(config)
}

fn connect(engine: Option<&str>, args: &[String], config: &SyncConfig) -> Result<Arc<dyn Backend>> {
    let backend: Arc<dyn Backend> = match engine {
        Some(program) => Arc::new(
            StdioBackend::spawn(program, args, config.channel_capacity)
                .with_context(|| format!("starting engine {program}"))?,
        ),
        None => Arc::new(FakeBackend::new(config.channel_capacity)),
    };
    tracing::info!(backend = backend.name(), "engine connected");
    Ok(backend)
}

fn start_drain(backend: &Arc<dyn Backend>, config: &SyncConfig) -> Option<JoinHandle<()>> {
    config
        .drain
        .enabled
        .then(|| spawn_drain_timer(Arc::clone(backend), config.drain.interval()))
}

fn replay(path: &Path, config: &SyncConfig) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let mut dispatcher = Dispatcher::new(config.log_cap, config.progress_label_budget);

    let mut seq = 0u64;
    let mut unreadable = 0usize;
    for (n, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match BackendEvent::from_json(line) {
            Ok(event) => {
                seq += 1;
                for effect in dispatcher.apply(&EventEnvelope::new(seq, event)) {
                    tracing::info!(line = n + 1, ?effect, "engine request not replayed");
                }
            }
            Err(e) => {
                unreadable += 1;
                tracing::warn!(line = n + 1, error = %e, "skipping unreadable line");
            }
        }
    }

    print!("{}", dispatcher.transcript().render_plain());
    let progress = dispatcher.progress();
    println!(
        "-- {} events, {} rules completed, {} still active, {} dropped, {} unreadable",
        seq,
        progress.completed,
        progress.active().len(),
        dispatcher.anomalies(),
        unreadable
    );
    if !dispatcher.status().is_empty() {
        println!("-- {}", dispatcher.status());
    }
    Ok(())
}

/// Feed events and completions to the session until `request` settled
async fn wait_for(
    session: &mut Session,
    events: &mut broadcast::Receiver<EventEnvelope>,
    completions: &mut Completions,
    request: RequestId,
) {
    let mut events_open = true;
    loop {
        tokio::select! {
            received = events.recv(), if events_open => match received {
                Ok(env) => session.handle_event(&env),
                Err(broadcast::error::RecvError::Lagged(skipped)) => session.note_lagged(skipped),
                Err(broadcast::error::RecvError::Closed) => events_open = false,
            },
            Some(completion) = completions.recv() => {
                if session.handle_completion(completion) == Some(request) {
                    break;
                }
            }
            else => break,
        }
    }
    drain_events(session, events);
}

fn drain_events(session: &mut Session, events: &mut broadcast::Receiver<EventEnvelope>) {
    loop {
        match events.try_recv() {
            Ok(env) => session.handle_event(&env),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => session.note_lagged(skipped),
            Err(_) => break,
        }
    }
}

async fn build(
    backend: Arc<dyn Backend>,
    config: &SyncConfig,
    target: String,
    file: Option<String>,
) -> Result<()> {
    let notifier = Arc::new(ConsoleNotifier::default());
    let picker = Arc::new(StaticPicker {
        build_file: config.picker.default_build_file.clone(),
        directory: config.picker.default_directory.clone(),
    });
    let mut events = backend.subscribe();
    let (session, mut completions) = Session::new(
        Dispatcher::new(config.log_cap, config.progress_label_budget),
        backend.clone(),
        picker,
        notifier.clone(),
    );
    let mut session = session.with_extensions(config.picker.build_file_extensions.clone());
    let drain = start_drain(&backend, config);

    if let Some(file) = file.or_else(|| config.picker.default_build_file.clone()) {
        if let Some(request) = session.perform(Action::LoadBuildFile(file)) {
            wait_for(&mut session, &mut events, &mut completions, request).await;
        }
    }
    if notifier.errors() == 0 {
        if let Some(request) = session.perform(Action::ExecuteTarget(target.clone())) {
            wait_for(&mut session, &mut events, &mut completions, request).await;
        }
    }

    if let Some(handle) = drain {
        handle.abort();
    }
    // one last flush of captured output
    if let Err(e) = backend.invoke(Command::EmptyGags {}).await {
        tracing::debug!(error = %e, "final flush failed");
    }
    drain_events(&mut session, &mut events);

    print!("{}", session.dispatcher().transcript().render_plain());
    if notifier.errors() > 0 {
        bail!("building {target} failed");
    }
    Ok(())
}

// --- Terminal setup/teardown ---
fn setup_terminal() -> io::Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

fn restore_terminal(mut terminal: Terminal<CrosstermBackend<io::Stdout>>) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

async fn run_tui(backend: Arc<dyn Backend>, config: &SyncConfig, file: Option<String>) -> Result<()> {
    let (picker, prompts) = PromptPicker::new();
    let modals = Arc::new(ModalQueue::default());
    let events = backend.subscribe();
    let (session, completions) = Session::new(
        Dispatcher::new(config.log_cap, config.progress_label_budget),
        backend.clone(),
        Arc::new(picker),
        modals.clone(),
    );
    let mut session = session.with_extensions(config.picker.build_file_extensions.clone());
    if let Some(file) = file {
        session.perform(Action::LoadBuildFile(file));
    }
    let drain = start_drain(&backend, config);

    let tui = ui::Tui {
        session,
        completions,
        events,
        prompts,
        modals,
        backend_name: backend.name(),
    };

    let mut terminal = setup_terminal()?;
    let res = tui.run(&mut terminal).await;
    restore_terminal(terminal)?;

    if let Some(handle) = drain {
        handle.abort();
    }
    res.context("terminal UI failed")
}
