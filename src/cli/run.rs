use crate::client::{ClientRunner, DeliverySnapshot, DeliveryStats, HttpPushClient, PushError, PushSink};
use crate::config::parse::{load_config, ConfigError};
use crate::config::types::Config;
use crate::pipeline::{spawn_workers, Pipeline, PipelineError, StageError, WorkerPool};
use crate::source::tailer::{run_tailer, ResumePoint, TailError, Tailer};
use crate::source::watcher::{FileWatcher, WatchError, WatchEvent};
use crate::source::FileId;
use crate::storage::{
    OffsetTracker, Position, PositionCommitter, PositionError, PositionStore, SharedOffsetTracker,
    YamlFileBackend,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("pipeline compile error: {0}")]
    Stage(#[from] StageError),

    #[error("watch error: {0}")]
    Watch(#[from] WatchError),

    #[error("position store error: {0}")]
    Position(#[from] PositionError),

    #[error("client setup error: {0}")]
    Client(#[from] PushError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// What a finished run delivered and where it stopped
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// One snapshot per configured client, in config order
    pub deliveries: Vec<DeliverySnapshot>,
    pub positions: Vec<Position>,
}

pub async fn run(config_path: &Path) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_token.cancel();
        }
    });

    let sinks = http_sinks(&config)?;
    let summary = run_agent(config, sinks, shutdown).await?;

    for (index, stats) in summary.deliveries.iter().enumerate() {
        info!(
            client = index,
            entries_sent = stats.entries_sent,
            entries_dropped = stats.entries_dropped,
            retries = stats.retries,
            "Delivery summary"
        );
    }
    Ok(())
}

/// One HTTP sink per configured client
pub fn http_sinks(config: &Config) -> Result<Vec<Arc<dyn PushSink>>, RunError> {
    config
        .clients
        .iter()
        .map(|client| Ok(Arc::new(HttpPushClient::new(client)?) as Arc<dyn PushSink>))
        .collect()
}

struct ActiveTailer {
    path: std::path::PathBuf,
    wake: Arc<Notify>,
}

type TailerResult = (FileId, Option<ResumePoint>, Result<(), TailError>);

/// Run until `shutdown` fires or a fatal error occurs, then drain in order:
/// tailers, workers, clients, and finally the position committer.
pub async fn run_agent(
    config: Config,
    sinks: Vec<Arc<dyn PushSink>>,
    shutdown: CancellationToken,
) -> Result<RunSummary, RunError> {
    let mut pipelines = HashMap::new();
    for scrape in &config.scrape_configs {
        let pipeline = Pipeline::compile(scrape)?;
        info!(
            job = %pipeline.job(),
            stages = pipeline.stages().len(),
            "Pipeline compiled"
        );
        pipelines.insert(pipeline.job().to_string(), Arc::new(pipeline));
    }

    let store = PositionStore::open(Box::new(YamlFileBackend::new(
        &config.positions.filename,
        config.positions.ignore_invalid_yaml,
    )))
    .await?;
    let mut known: HashMap<FileId, ResumePoint> = store
        .positions()
        .map(|p| {
            (
                p.file_id(),
                ResumePoint {
                    file_id: p.file_id(),
                    epoch: p.epoch,
                    offset: p.offset,
                },
            )
        })
        .collect();

    let watcher = FileWatcher::new(&config.scrape_configs, config.target_config.debounce)?;

    let tracker = OffsetTracker::shared();
    let tasks = shutdown.child_token();
    let acks_needed = sinks.len();

    // Clients
    let mut client_senders = Vec::with_capacity(sinks.len());
    let mut client_handles = Vec::with_capacity(sinks.len());
    for (client, sink) in config.clients.iter().zip(sinks) {
        let (tx, rx) = mpsc::channel(config.pipeline.channel_capacity);
        let runner = ClientRunner::new(
            client,
            sink,
            tracker.clone(),
            config.server.graceful_shutdown_timeout,
        );
        client_senders.push(tx);
        client_handles.push(tokio::spawn(runner.run(rx, tasks.clone())));
    }

    // Workers
    let (pool, worker_handles) = spawn_workers(
        config.pipeline.workers,
        config.pipeline.channel_capacity,
        pipelines,
        client_senders,
        tracker.clone(),
    );

    // Committer
    let commit_token = CancellationToken::new();
    let committer = PositionCommitter::new(store, tracker.clone(), config.positions.sync_period);
    let mut committer_handle = Some(tokio::spawn(committer.run(commit_token.clone())));

    // Discovery loop
    let events = watcher.into_stream(config.target_config.sync_period);
    tokio::pin!(events);

    let mut active: HashMap<FileId, ActiveTailer> = HashMap::new();
    let mut tailers: JoinSet<TailerResult> = JoinSet::new();
    let mut fatal: Option<RunError> = None;

    info!(
        jobs = config.scrape_configs.len(),
        clients = acks_needed,
        workers = pool.workers(),
        "Agent started"
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Shutting down");
                break;
            }
            event = events.next() => match event {
                Some(Ok(event)) => {
                    handle_event(event, &config, &pool, &tracker, &known, &tasks, acks_needed, &mut active, &mut tailers);
                }
                Some(Err(e)) => {
                    error!(error = %e, "File discovery failed");
                    fatal = Some(e.into());
                    break;
                }
                None => break,
            },
            Some(joined) = tailers.join_next(), if !tailers.is_empty() => {
                finish_tailer(joined, &tracker, &mut known, &mut active);
            }
            result = wait_committer(&mut committer_handle), if committer_handle.is_some() => {
                committer_handle = None;
                fatal = Some(match result {
                    Ok(Err(e)) => e.into(),
                    Ok(Ok(_)) => PositionError::Write {
                        path: config.positions.filename.clone(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::Other,
                            "committer stopped unexpectedly",
                        ),
                    }
                    .into(),
                    Err(e) => e.into(),
                });
                error!("Position committer failed, shutting down");
                break;
            }
        }
    }

    // Stop tailers and wait for them to hand over their last lines
    tasks.cancel();
    while let Some(joined) = tailers.join_next().await {
        finish_tailer(joined, &tracker, &mut known, &mut active);
    }

    // Workers exit once the last pool handle is gone
    drop(pool);
    for handle in worker_handles {
        match handle.await {
            Ok(Ok(processed)) => debug!(processed, "Worker drained"),
            Ok(Err(e)) => warn!(error = %e, "Worker stopped with error"),
            Err(e) => warn!(error = %e, "Worker task failed"),
        }
    }

    let mut deliveries = Vec::with_capacity(client_handles.len());
    for handle in client_handles {
        let stats: Arc<DeliveryStats> = handle.await?;
        deliveries.push(stats.snapshot());
    }

    commit_token.cancel();
    let positions = match committer_handle {
        Some(handle) => match handle.await? {
            Ok(store) => store.positions().cloned().collect(),
            Err(e) => {
                error!(error = %e, "Failed to persist final positions");
                return Err(fatal.unwrap_or(e.into()));
            }
        },
        None => Vec::new(),
    };

    if let Some(e) = fatal {
        return Err(e);
    }

    info!(files = positions.len(), "Shutdown complete");
    Ok(RunSummary {
        deliveries,
        positions,
    })
}

async fn wait_committer(
    handle: &mut Option<JoinHandle<Result<PositionStore, PositionError>>>,
) -> Result<Result<PositionStore, PositionError>, tokio::task::JoinError> {
    match handle {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_event(
    event: WatchEvent,
    config: &Config,
    pool: &WorkerPool,
    tracker: &SharedOffsetTracker,
    known: &HashMap<FileId, ResumePoint>,
    tasks: &CancellationToken,
    acks_needed: usize,
    active: &mut HashMap<FileId, ActiveTailer>,
    tailers: &mut JoinSet<TailerResult>,
) {
    let (target, file_id) = match event {
        WatchEvent::Added { target, file_id } => (target, file_id),
        WatchEvent::Rotated {
            target,
            previous,
            file_id,
        } => {
            // The old tailer drains what is left and ends on its own
            if let Some(old) = active.get(&previous) {
                old.wake.notify_one();
            }
            (target, file_id)
        }
        WatchEvent::Removed { path, file_id } => {
            debug!(path = %path.display(), "File removed");
            if let Some(tailer) = active.get(&file_id) {
                tailer.wake.notify_one();
            }
            return;
        }
    };

    if let Some(existing) = active.get(&file_id) {
        debug!(
            path = %target.path.display(),
            tailing_as = %existing.path.display(),
            "File already tailed"
        );
        return;
    }

    let resume = tracker
        .lock()
        .ok()
        .and_then(|t| t.resume_point(&file_id))
        .map(|(epoch, offset)| ResumePoint {
            file_id,
            epoch,
            offset,
        })
        .or_else(|| known.get(&file_id).copied());

    let wake = Arc::new(Notify::new());
    let mut tailer = Tailer::new(target.clone(), config.tail.clone(), resume)
        .with_wake(wake.clone())
        .with_tracker(tracker.clone(), acks_needed);
    let pool = pool.clone();
    let token = tasks.clone();

    tailers.spawn(async move {
        let result = run_tailer(&mut tailer, pool, token).await;
        (file_id, tailer.resume_point(), result)
    });
    active.insert(
        file_id,
        ActiveTailer {
            path: target.path.clone(),
            wake,
        },
    );
}

fn finish_tailer(
    joined: Result<TailerResult, tokio::task::JoinError>,
    tracker: &SharedOffsetTracker,
    known: &mut HashMap<FileId, ResumePoint>,
    active: &mut HashMap<FileId, ActiveTailer>,
) {
    let (file_id, stopped_at, result) = match joined {
        Ok(joined) => joined,
        Err(e) => {
            error!(error = %e, "Tailer task panicked");
            return;
        }
    };
    active.remove(&file_id);

    // Lines still in flight pin the resume point below where the tailer stopped
    let resume = tracker
        .lock()
        .ok()
        .and_then(|t| t.resume_point(&file_id))
        .map(|(epoch, offset)| ResumePoint {
            file_id,
            epoch,
            offset,
        })
        .or(stopped_at);
    if let Some(resume) = resume {
        known.insert(file_id, resume);
    }

    if let Err(e) = result {
        error!(file_id = %file_id, error = %e, "Tailer gave up on file");
    }
}
