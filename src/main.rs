use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use eye_refresh::cli::{Cli, Commands, ConfigAction, Display, EventArg, OutputFormat, RangeArg};
use eye_refresh::config::{AppPaths, RefreshConfig};
use eye_refresh::daemon::Daemon;
use eye_refresh::dispatcher::Dispatcher;
use eye_refresh::error::{RefreshError, Result};
use eye_refresh::history::{self, Range};
use eye_refresh::notification::{Notifier, spawn_observer};
use eye_refresh::output::OutputWriter;
use eye_refresh::state::{Event, EventLog, State};
use eye_refresh::timer::{Clock, DetachedTimers, SystemClock, TokioTimers};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            Display::new().print_error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("eye_refresh=debug")
    } else {
        EnvFilter::new("eye_refresh=info")
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let out = OutputWriter::new(cli.output);
    let paths = AppPaths::resolve(cli.data_dir)?;

    match cli.command {
        Commands::Init => cmd_init(&out, &paths).await,
        Commands::Run { start } => cmd_run(&out, &paths, start).await,
        Commands::Send { event } => cmd_send(&out, &paths, event).await,
        Commands::Status => cmd_status(&out, &paths).await,
        Commands::History { limit } => cmd_history(&out, &paths, limit).await,
        Commands::Sessions { range, ago } => cmd_sessions(&out, &paths, range, ago).await,
        Commands::Config { action } => cmd_config(&out, &paths, action).await,
    }
}

struct AppContext {
    config: RefreshConfig,
    log: EventLog,
}

async fn open_app(paths: &AppPaths) -> Result<AppContext> {
    if !paths.is_initialized() {
        return Err(RefreshError::NotInitialized);
    }
    let config = RefreshConfig::load(&paths.data_dir).await?;
    let log = EventLog::open(&paths.db_path)?;
    Ok(AppContext { config, log })
}

fn notifier(config: &RefreshConfig, paths: &AppPaths) -> Notifier {
    Notifier::new(config.notification.clone(), Some(paths.transitions_log()))
}

async fn cmd_init(out: &OutputWriter, paths: &AppPaths) -> Result<()> {
    if paths.is_initialized() {
        if out.format() == OutputFormat::Json {
            out.emit_message("Already initialized");
            return Ok(());
        }
        out.display().print_warning(&format!(
            "eye-refresh is already initialized in {}",
            paths.data_dir.display()
        ));
        return Ok(());
    }

    paths.ensure_dirs().await?;
    RefreshConfig::default().save(&paths.data_dir).await?;
    EventLog::open(&paths.db_path)?;

    out.emit_message(&format!("Initialized eye-refresh in {}", paths.data_dir.display()));
    if out.format() == OutputFormat::Text {
        out.display()
            .print_info(&format!("Configuration: {}", paths.config_path.display()));
        out.display()
            .print_info(&format!("Event log: {}", paths.db_path.display()));
    }

    Ok(())
}

async fn cmd_run(out: &OutputWriter, paths: &AppPaths, start: bool) -> Result<()> {
    let AppContext { config, log } = open_app(paths).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (timers, deliveries) = TokioTimers::new(clock.clone());
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(log.clone()),
        Arc::new(timers),
        clock,
        config.durations(),
    ));

    let notifier = notifier(&config, paths);
    let observer = spawn_observer(log.subscribe(), notifier.clone());

    let mut daemon = Daemon::new(
        dispatcher.clone(),
        deliveries,
        Duration::from_secs(config.state.health_check_interval_secs),
    )
    .with_poll_interval(Duration::from_millis(config.state.log_poll_interval_ms))
    .with_notifier(notifier);

    out.emit_recovery(&daemon.recover().await?);

    if start && dispatcher.current_state().await? == State::Paused {
        out.emit_outcome(&dispatcher.dispatch(Event::SchedulingTurnedOn).await?);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let daemon_handle = tokio::spawn(daemon.run(shutdown_rx));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => {
                        if !handle_action(out, &dispatcher, line.trim()).await {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("stdin closed, running until interrupted");
                        stdin_open = false;
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read stdin");
                        stdin_open = false;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = daemon_handle.await {
        warn!(error = %e, "Daemon task ended abnormally");
    }
    observer.abort();
    Ok(())
}

/// Returns false when the user asked to quit.
async fn handle_action(out: &OutputWriter, dispatcher: &Dispatcher, action: &str) -> bool {
    match action {
        "" => {}
        "quit" | "exit" => return false,
        "status" => match dispatcher.latest().await {
            Ok(latest) => out.emit_status(latest.as_ref(), dispatcher.now_ms()),
            Err(e) => out.emit_error(&e.to_string()),
        },
        _ => match EventArg::parse_action(action) {
            Some(event) => match dispatcher.trigger(event).await {
                Ok(triggered) => out.emit_triggered(&triggered),
                Err(e) => out.emit_error(&e.to_string()),
            },
            None => out.emit_error(&format!("Unknown action: {}", action)),
        },
    }
    true
}

async fn cmd_send(out: &OutputWriter, paths: &AppPaths, event: EventArg) -> Result<()> {
    let AppContext { config, log } = open_app(paths).await?;
    let dispatcher = Dispatcher::new(
        Arc::new(log.clone()),
        Arc::new(DetachedTimers::new()),
        Arc::new(SystemClock),
        config.durations(),
    );

    let mut updates = log.subscribe();
    let triggered = dispatcher.trigger(Event::from(event)).await?;
    out.emit_triggered(&triggered);

    // No daemon observer in a one-shot process; notify what this call committed.
    let notifier = notifier(&config, paths);
    while let Ok(entry) = updates.try_recv() {
        notifier.notify(&entry).await;
    }
    Ok(())
}

async fn cmd_status(out: &OutputWriter, paths: &AppPaths) -> Result<()> {
    let AppContext { log, .. } = open_app(paths).await?;
    let latest = log.latest().await?;
    out.emit_status(latest.as_ref(), SystemClock.now_ms());
    Ok(())
}

async fn cmd_history(out: &OutputWriter, paths: &AppPaths, limit: Option<usize>) -> Result<()> {
    let AppContext { config, log } = open_app(paths).await?;
    let limit = limit.unwrap_or(config.state.history_limit);
    let entries = history::history(&log, limit).await?;
    out.emit_history(&entries);
    Ok(())
}

async fn cmd_sessions(out: &OutputWriter, paths: &AppPaths, range: RangeArg, ago: u32) -> Result<()> {
    let AppContext { log, .. } = open_app(paths).await?;

    let mut range = Range::today(range.into());
    for _ in 0..ago {
        range = range.previous();
    }

    let sessions = history::sessions_in(&log, range).await?;
    let buckets = history::breakdown(range, &sessions);
    out.emit_sessions(range, &sessions, &buckets);
    Ok(())
}

async fn cmd_config(out: &OutputWriter, paths: &AppPaths, action: ConfigAction) -> Result<()> {
    if !paths.is_initialized() {
        return Err(RefreshError::NotInitialized);
    }

    match action {
        ConfigAction::Show => {
            let config = RefreshConfig::load(&paths.data_dir).await?;
            out.emit_config(&config);
        }
        ConfigAction::Reset => {
            RefreshConfig::default().save(&paths.data_dir).await?;
            out.emit_message("Configuration reset to defaults");
        }
    }
    Ok(())
}
