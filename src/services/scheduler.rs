//! Bounded-concurrency ingestion scheduler.
//!
//! A fixed pool of workers pulls jobs from one shared queue. Admission is
//! gated by a semaphore of `max_workers * max_inflight_multiplier` permits:
//! a permit is acquired before the next batch is read from the source and
//! travels with the job until its upsert has finished, so a slow store
//! stops the source from being read any further ahead.
//!
//! Sources are blocking iterators (stdin among them), so they are read on a
//! dedicated thread that pulls one batch per request. A stalled source
//! therefore never keeps the scheduler from seeing cancellation.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, IngestError};
use crate::models::{IngestionConfig, Record};
use crate::services::BatchProcessor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub max_workers: NonZeroUsize,
    pub max_inflight_multiplier: NonZeroUsize,
}

impl SchedulerConfig {
    pub fn new(max_workers: NonZeroUsize, max_inflight_multiplier: NonZeroUsize) -> Self {
        Self {
            max_workers,
            max_inflight_multiplier,
        }
    }

    /// Upper bound on batches admitted but not yet finished.
    pub fn capacity(&self) -> usize {
        self.max_workers
            .get()
            .saturating_mul(self.max_inflight_multiplier.get())
    }
}

impl TryFrom<&IngestionConfig> for SchedulerConfig {
    type Error = IngestError;

    fn try_from(config: &IngestionConfig) -> Result<Self, Self::Error> {
        let positive = |value: usize, name: &str| {
            NonZeroUsize::new(value).ok_or_else(|| {
                IngestError::Config(ConfigError::ValidationError(format!(
                    "{name} must be at least 1"
                )))
            })
        };
        Ok(Self::new(
            positive(config.max_workers, "max_workers")?,
            positive(config.max_inflight_multiplier, "max_inflight_multiplier")?,
        ))
    }
}

/// Live counters shared between the scheduler, its workers and observers.
#[derive(Debug, Default)]
pub struct IngestionProgress {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    points: AtomicU64,
    in_flight: AtomicU64,
    peak_in_flight: AtomicU64,
}

/// Point-in-time copy of [`IngestionProgress`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub points: u64,
    pub in_flight: u64,
    pub peak_in_flight: u64,
}

impl IngestionProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            submitted: self.submitted.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            points: self.points.load(Ordering::SeqCst),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
        }
    }

    fn admitted(&self) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn finished(&self, result: &Result<usize, IngestError>) {
        match result {
            Ok(points) => {
                self.points.fetch_add(*points as u64, Ordering::SeqCst);
                self.completed.fetch_add(1, Ordering::SeqCst);
            }
            Err(_) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct IngestReport {
    pub batches: u64,
    pub points: u64,
    pub peak_in_flight: u64,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

struct Job {
    index: u64,
    records: Vec<Record>,
    permit: OwnedSemaphorePermit,
}

struct Outcome {
    index: u64,
    result: Result<usize, IngestError>,
}

pub struct IngestionScheduler {
    processor: Arc<BatchProcessor>,
    config: SchedulerConfig,
    progress: Arc<IngestionProgress>,
}

impl IngestionScheduler {
    pub fn new(processor: Arc<BatchProcessor>, config: SchedulerConfig) -> Self {
        Self {
            processor,
            config,
            progress: Arc::new(IngestionProgress::new()),
        }
    }

    /// Report into an externally owned progress object.
    pub fn with_progress(mut self, progress: Arc<IngestionProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn progress(&self) -> Arc<IngestionProgress> {
        self.progress.clone()
    }

    /// Drive every batch through the worker pool.
    ///
    /// The first failing batch (or source error) becomes the result; batches
    /// already admitted still run to completion and any further failures are
    /// only logged. Cancelling the token stops admission the same way.
    pub async fn run<I, E>(
        &self,
        batches: I,
        cancel: CancellationToken,
    ) -> Result<IngestReport, IngestError>
    where
        I: Iterator<Item = Result<Vec<Record>, E>> + Send + 'static,
        E: Into<IngestError> + Send + 'static,
    {
        let started = Instant::now();
        let capacity = self.config.capacity();
        let permits = Arc::new(Semaphore::new(capacity));

        let (job_tx, job_rx) = mpsc::channel::<Job>(capacity);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Outcome>();

        info!(
            collection = self.processor.collection(),
            workers = self.config.max_workers.get(),
            capacity,
            "starting ingestion"
        );

        let (pull_tx, mut batch_rx) = spawn_reader(batches)?;

        let mut workers = JoinSet::new();
        for worker in 0..self.config.max_workers.get() {
            workers.spawn(worker_loop(
                worker,
                self.processor.clone(),
                job_rx.clone(),
                done_tx.clone(),
                self.progress.clone(),
            ));
        }
        drop(done_tx);

        let mut first_error: Option<IngestError> = None;
        let mut cancelled = false;
        let mut next_index = 0u64;

        while first_error.is_none() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                Some(outcome) = done_rx.recv() => {
                    record_outcome(outcome, &mut first_error);
                    continue;
                }
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(e) => {
                        first_error = Some(IngestError::Worker(e.to_string()));
                        break;
                    }
                },
            };

            if pull_tx.send(()).await.is_err() {
                first_error = Some(IngestError::Worker("record reader stopped".to_string()));
                break;
            }
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                next = batch_rx.recv() => next,
            };
            let records = match next {
                Some(Some(Ok(records))) => records,
                Some(Some(Err(e))) => {
                    first_error = Some(e);
                    break;
                }
                Some(None) => break,
                None => {
                    first_error = Some(IngestError::Worker("record reader stopped".to_string()));
                    break;
                }
            };

            self.progress.admitted();
            let job = Job {
                index: next_index,
                records,
                permit,
            };
            if job_tx.send(job).await.is_err() {
                first_error = Some(IngestError::Worker("job queue closed".to_string()));
                break;
            }
            next_index += 1;
        }

        // A reader still blocked in the source exits on its next request.
        drop(pull_tx);
        drop(batch_rx);

        // Workers drain whatever was admitted, then see the closed queue.
        drop(job_tx);
        while let Some(outcome) = done_rx.recv().await {
            record_outcome(outcome, &mut first_error);
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                let err = IngestError::Worker(e.to_string());
                match first_error {
                    None => first_error = Some(err),
                    Some(_) => warn!(error = %err, "worker task failed"),
                }
            }
        }

        let snapshot = self.progress.snapshot();
        if let Some(err) = first_error {
            return Err(err);
        }
        if cancelled {
            info!(completed = snapshot.completed, "ingestion cancelled");
            return Err(IngestError::Cancelled {
                completed: snapshot.completed,
            });
        }

        let report = IngestReport {
            batches: snapshot.completed,
            points: snapshot.points,
            peak_in_flight: snapshot.peak_in_flight,
            elapsed: started.elapsed(),
        };
        info!(
            batches = report.batches,
            points = report.points,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "ingestion finished"
        );
        Ok(report)
    }
}

type PullRequests = mpsc::Sender<()>;
type PulledBatches = mpsc::Receiver<Option<Result<Vec<Record>, IngestError>>>;

/// Read batches on a detached thread, one per request. `None` marks the end
/// of the source.
fn spawn_reader<I, E>(mut batches: I) -> Result<(PullRequests, PulledBatches), IngestError>
where
    I: Iterator<Item = Result<Vec<Record>, E>> + Send + 'static,
    E: Into<IngestError> + Send + 'static,
{
    let (pull_tx, mut pull_rx) = mpsc::channel::<()>(1);
    let (batch_tx, batch_rx) = mpsc::channel(1);

    thread::Builder::new()
        .name("record-reader".to_string())
        .spawn(move || {
            while pull_rx.blocking_recv().is_some() {
                let next = batches.next().map(|batch| batch.map_err(Into::into));
                let exhausted = next.is_none();
                if batch_tx.blocking_send(next).is_err() || exhausted {
                    break;
                }
            }
        })
        .map_err(|e| IngestError::Worker(format!("failed to start record reader: {e}")))?;

    Ok((pull_tx, batch_rx))
}

fn record_outcome(outcome: Outcome, first_error: &mut Option<IngestError>) {
    let Err(err) = outcome.result else {
        return;
    };
    if first_error.is_none() {
        warn!(batch = outcome.index, error = %err, "batch failed, stopping admission");
        *first_error = Some(err);
    } else {
        warn!(batch = outcome.index, error = %err, "additional batch failure");
    }
}

async fn worker_loop(
    worker: usize,
    processor: Arc<BatchProcessor>,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    done: mpsc::UnboundedSender<Outcome>,
    progress: Arc<IngestionProgress>,
) {
    loop {
        let job = { jobs.lock().await.recv().await };
        let Some(job) = job else {
            break;
        };

        debug!(worker, batch = job.index, records = job.records.len(), "processing batch");
        let result = processor.process(job.index, job.records).await;
        progress.finished(&result);

        if done
            .send(Outcome {
                index: job.index,
                result,
            })
            .is_err()
        {
            break;
        }
        // Permit is released here, after the outcome is visible.
        drop(job.permit);
    }
}
