use std::fs;
use std::path::Path;
use std::sync::Arc;

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use flowsync_core::{EngineConfig, RemoteApi, Sanitizer};
use flowsync_sync::files;

use crate::engine::SyncEngine;
use crate::error::{io_err, EngineError};

/// Build a runtime, start an engine for `config`, and block until ctrl-c.
pub fn start_blocking(
    config: EngineConfig,
    remote: Arc<dyn RemoteApi>,
    sanitizer: Arc<dyn Sanitizer>,
) -> Result<(), EngineError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;

    runtime.block_on(async move {
        let engine = SyncEngine::new(config, remote, sanitizer)?;
        run(engine).await
    })
}

/// Start `engine`, then feed it filesystem events and poll ticks until it is
/// shut down or ctrl-c arrives.
pub async fn run(engine: SyncEngine) -> Result<(), EngineError> {
    engine.start().await?;

    let dir = engine.config().sync_dir.clone();
    // Canonicalize so that FSEvents paths (which arrive as real paths, e.g.
    // /private/var/... on macOS) compare equal to the parent check.
    let dir = fs::canonicalize(&dir).unwrap_or(dir);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    tracing::info!(dir = %dir.display(), "watching sync directory");

    let mut ticker = tokio::time::interval(engine.config().poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately; startup already polled.
    ticker.tick().await;

    let shutdown = engine.shutdown_token();
    let signal_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => Ok(()),
                signal = tokio::signal::ctrl_c() => match signal {
                    Ok(()) => {
                        tracing::info!("received ctrl-c, shutting down");
                        shutdown.cancel();
                        Ok(())
                    }
                    Err(err) => Err(EngineError::Runtime(format!("ctrl-c handler failed: {err}"))),
                },
            }
        })
    };

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                match event {
                    Ok(event) => dispatch_event(&engine, &dir, event).await,
                    Err(err) => tracing::warn!(error = %err, "watcher event error"),
                }
            }
            _ = ticker.tick() => engine.spawn_poll(),
        }
    }

    engine.shutdown();
    drop(watcher);
    handle_join("signal_handler", signal_handle.await)?;
    tracing::info!("engine stopped");
    Ok(())
}

async fn dispatch_event(engine: &SyncEngine, dir: &Path, event: Event) {
    if !is_relevant_event_kind(&event.kind) {
        return;
    }
    for path in event.paths {
        let Some(filename) = files::workflow_filename(&path, dir, engine.config()) else {
            continue;
        };
        // Renames arrive as separate halves on most platforms; existence
        // decides which half this is.
        if path.exists() {
            engine.handle_local_change(&filename).await;
        } else {
            engine.handle_local_removal(&filename).await;
        }
    }
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

fn handle_join(
    task: &str,
    result: Result<Result<(), EngineError>, tokio::task::JoinError>,
) -> Result<(), EngineError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(EngineError::Runtime(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
