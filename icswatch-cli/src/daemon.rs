//! Daemon runtime: wiring, tick loop and shutdown.
//!
//! Startup order: tracing, persisted state, initial directory scans,
//! catch-up for any wall-clock gap, then the background tasks (watcher,
//! notifier sink) and the minute tick loop. Within a tick, requests are
//! handed to the notifier queue before `last_alert_tick` is advanced, so
//! a crash replays the most recent tick instead of losing it.

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use icswatch_core::config::{self, Config, LoggingConfig};
use icswatch_core::ics;
use icswatch_core::priority::PriorityClassifier;
use icswatch_core::scheduler::{
    gap_since, next_minute, truncate_to_minute, AlertRequest, CatchupOptions, TickEngine,
};
use icswatch_core::state::StateStore;
use icswatch_core::EventStore;

use crate::notifier::Notifier;
use crate::watcher;

/// Bound on the notifier queue; alerts are small and bursts are rare.
const ALERT_QUEUE_DEPTH: usize = 64;

/// Grace period for draining the notifier sink on shutdown.
const SINK_DRAIN_TIMEOUT: StdDuration = StdDuration::from_secs(5);

pub async fn run(config: Config) -> Result<()> {
    init_tracing(&config.logging)?;
    info!(version = env!("CARGO_PKG_VERSION"), "starting icswatch");

    let state = Arc::new(StateStore::open().context("failed to open state store")?);
    debug!(state_file = %state.path().display(), first_run = state.is_first_run(), "state loaded");

    let store = Arc::new(EventStore::new());
    populate_store(&store, &config);
    store.regenerate_index(Local::now().date_naive());
    info!(
        events = store.len(),
        calendars = config.directories.len(),
        "initial scan complete"
    );

    let cancel = CancellationToken::new();

    // Notification sink: a single consumer owns the transport.
    let (alert_tx, mut alert_rx) = mpsc::channel::<AlertRequest>(ALERT_QUEUE_DEPTH);
    let mut notifier = Notifier::new(config.notification.clone());
    let sink = tokio::spawn(async move {
        while let Some(request) = alert_rx.recv().await {
            notifier.deliver(&request).await;
        }
    });

    // Filesystem watcher; the handle must stay alive for the daemon's
    // lifetime.
    let (fs_tx, fs_rx) = mpsc::channel(ALERT_QUEUE_DEPTH);
    let _fs_watcher = watcher::start(
        config.directories.iter().map(|dir| dir.path()).collect(),
        fs_tx,
    )
    .context("failed to start filesystem watcher")?;
    let fs_task = tokio::spawn(watcher::process_changes(
        fs_rx,
        store.clone(),
        cancel.clone(),
    ));

    spawn_signal_listener(cancel.clone());

    let mut engine = TickEngine::new();
    let classifier = PriorityClassifier::new();
    let catchup = catchup_options(&config);

    // Replay anything missed while the daemon was down, before the first
    // normal tick. A fresh install has nothing to miss.
    if config.wakeup_handling.enable && !state.is_first_run() {
        let now = Utc::now();
        let last = state.last_alert_tick();
        if let Some(gap) = gap_since(last, now) {
            info!(
                gap_minutes = gap.num_minutes(),
                "wall-clock gap since last run; replaying missed alerts"
            );
            let requests = engine.check_missed(&store, last, now, &catchup, &classifier);
            send_all(&alert_tx, requests).await;
            persist_tick(&state, truncate_to_minute(now));
        }
    }

    info!("entering minute tick loop");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay_to_next_minute()) => {}
        }

        let now = truncate_to_minute(Utc::now());
        let last = state.last_alert_tick();
        let today = Local::now().date_naive();

        let requests = match gap_since(last, now) {
            Some(gap) if config.wakeup_handling.enable => {
                info!(
                    gap_minutes = gap.num_minutes(),
                    "wall-clock gap detected; replaying missed alerts"
                );
                engine.check_missed(&store, last, now, &catchup, &classifier)
            }
            _ => engine.check(&store, last, now, today),
        };

        send_all(&alert_tx, requests).await;
        persist_tick(&state, now);
    }

    // Shutdown: the in-flight tick has completed (the loop body is never
    // cancelled mid-iteration), so drain the sink and persist.
    info!("shutting down");
    drop(alert_tx);
    if tokio::time::timeout(SINK_DRAIN_TIMEOUT, sink).await.is_err() {
        warn!("notifier sink did not drain in time");
    }
    fs_task.abort();
    state.save().context("failed to persist state on shutdown")?;
    info!("icswatch stopped");
    Ok(())
}

/// Register every configured calendar and load its current files.
/// Per-directory and per-file failures are logged; the rest of the
/// configuration keeps working.
fn populate_store(store: &EventStore, config: &Config) {
    for dir in &config.directories {
        let alerts = match dir.alerts() {
            Ok(alerts) => alerts,
            Err(err) => {
                // Validation already checked these; a failure here is a
                // config edit race at worst.
                warn!(directory = %dir.path().display(), %err, "invalid automatic alerts; using none");
                Vec::new()
            }
        };
        let calendar = store.ensure_calendar(dir.path(), dir.template.clone(), alerts);
        match ics::scan_directory(&dir.path(), &calendar) {
            Ok(files) => {
                for (path, events) in files {
                    store.upsert_events_for_file(&path, events);
                }
            }
            Err(err) => {
                warn!(directory = %dir.path().display(), %err, "initial scan failed; continuing without it");
            }
        }
    }
}

fn catchup_options(config: &Config) -> CatchupOptions {
    let wakeup = &config.wakeup_handling;
    let max_catchup_time = if wakeup.max_catchup_time.is_until_dismissed() {
        warn!("max_catchup_time cannot be until_dismissed; using 30 seconds");
        StdDuration::from_secs(30)
    } else {
        wakeup
            .max_catchup_time
            .to_duration()
            .unwrap_or_else(|_| StdDuration::from_secs(30))
    };
    CatchupOptions {
        policy: wakeup.missed_event_policy,
        max_missed_days: wakeup.max_missed_days,
        summary_threshold: wakeup.summary_threshold,
        max_catchup_time,
    }
}

async fn send_all(tx: &mpsc::Sender<AlertRequest>, requests: Vec<AlertRequest>) {
    for request in requests {
        if let AlertRequest::Event { event, offset, late, .. } = &request {
            debug!(
                uid = event.uid(),
                offset_secs = offset.as_secs(),
                late,
                "alert due"
            );
        }
        if tx.send(request).await.is_err() {
            warn!("notifier queue closed; dropping alert");
            return;
        }
    }
}

/// Advance the persisted tick. A failed save is logged and the daemon
/// keeps ticking; the next successful save catches up.
fn persist_tick(state: &StateStore, now: chrono::DateTime<Utc>) {
    if let Err(err) = state.set_last_alert_tick(now) {
        error!(%err, "failed to persist last tick");
    }
}

fn delay_to_next_minute() -> StdDuration {
    let now = Utc::now();
    (next_minute(now) - now)
        .to_std()
        .unwrap_or(StdDuration::from_secs(1))
}

fn spawn_signal_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        cancel.cancel();
    });
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    match &logging.file {
        Some(path) => {
            let path = config::expand_path(path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create log directory {}", parent.display())
                })?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}
