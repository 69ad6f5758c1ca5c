use crate::pipeline::engine::Pipeline;
use crate::pipeline::entry::{RawLine, ResolvedEntry};
use crate::source::file_id::FileId;
use crate::storage::offsets::SharedOffsetTracker;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("worker pool is closed")]
    PoolClosed,

    #[error("client channel closed while worker {worker} was running")]
    OutputClosed { worker: usize },
}

/// Handle for submitting raw lines to the pipeline workers.
///
/// Lines of one file always land on the same worker, so per-file order holds
/// all the way to the clients.
#[derive(Clone)]
pub struct WorkerPool {
    senders: Arc<[mpsc::Sender<RawLine>]>,
}

impl WorkerPool {
    pub fn workers(&self) -> usize {
        self.senders.len()
    }

    fn route(&self, file_id: &FileId) -> usize {
        let mut hasher = DefaultHasher::new();
        file_id.hash(&mut hasher);
        (hasher.finish() % self.senders.len() as u64) as usize
    }

    /// Waits while the chosen worker's queue is full
    pub async fn submit(&self, line: RawLine) -> Result<(), PipelineError> {
        let worker = self.route(&line.origin.file_id);
        self.senders[worker]
            .send(line)
            .await
            .map_err(|_| PipelineError::PoolClosed)
    }
}

/// Spawn `workers` tasks that run each line through its job's pipeline and
/// fan the result out to every client.
///
/// Workers exit once every [`WorkerPool`] clone is dropped and their queues drain.
pub fn spawn_workers(
    workers: usize,
    capacity: usize,
    pipelines: HashMap<String, Arc<Pipeline>>,
    outputs: Vec<mpsc::Sender<ResolvedEntry>>,
    tracker: SharedOffsetTracker,
) -> (WorkerPool, Vec<JoinHandle<Result<u64, PipelineError>>>) {
    let workers = workers.max(1);
    let pipelines = Arc::new(pipelines);
    let mut senders = Vec::with_capacity(workers);
    let mut handles = Vec::with_capacity(workers);

    for worker in 0..workers {
        let (tx, rx) = mpsc::channel(capacity);
        senders.push(tx);
        handles.push(tokio::spawn(run_worker(
            worker,
            rx,
            pipelines.clone(),
            outputs.clone(),
            tracker.clone(),
        )));
    }

    info!(workers, capacity, "Pipeline workers started");
    (
        WorkerPool {
            senders: senders.into(),
        },
        handles,
    )
}

async fn run_worker(
    worker: usize,
    mut input: mpsc::Receiver<RawLine>,
    pipelines: Arc<HashMap<String, Arc<Pipeline>>>,
    outputs: Vec<mpsc::Sender<ResolvedEntry>>,
    tracker: SharedOffsetTracker,
) -> Result<u64, PipelineError> {
    let mut processed = 0u64;

    while let Some(raw) = input.recv().await {
        let Some(pipeline) = pipelines.get(raw.target.job.as_ref()) else {
            warn!(
                job = %raw.target.job,
                path = %raw.target.path.display(),
                "No pipeline for job, dropping line"
            );
            if let Ok(mut guard) = tracker.lock() {
                for _ in &outputs {
                    guard.ack(&raw.origin);
                }
            }
            continue;
        };

        let entry = pipeline.process(raw);
        for output in &outputs {
            output
                .send(entry.clone())
                .await
                .map_err(|_| PipelineError::OutputClosed { worker })?;
        }
        processed += 1;
    }

    debug!(worker, processed, "Pipeline worker finished");
    Ok(processed)
}
