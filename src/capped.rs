// Copyright 2020 Joyent, Inc.

//! Asynchronous trimming of capped sorted sets.
//!
//! A capped collection is a sorted set held near a configured maximum
//! length by background trimming rather than synchronous enforcement. The
//! insert path only decides whether a trim is warranted; the trim itself
//! runs on the [`ShrinkWorker`]'s own threads so callers are never slowed
//! by maintenance, and a saturated worker drops jobs rather than pushing
//! back.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use slog::{debug, o, warn, Logger};

use crate::error::Error;

/// Default maximum length of a capped sorted set.
pub const DEFAULT_MAX_LENGTH: u64 = 3000;
/// Slack above the maximum length before a shrink is scheduled. The slack
/// amortizes trimming over batches of inserts instead of re-scheduling on
/// every insert once the set is slightly oversized.
pub const LENGTH_THRESHOLD: u64 = 50;
/// Default number of shrink worker threads.
pub const DEFAULT_SHRINK_THREADS: usize = 4;
/// Default capacity of the pending shrink-job queue.
pub const DEFAULT_SHRINK_QUEUE_CAPACITY: usize = 50;

/// A point-in-time trim order: remove the lowest-ranked members so that a
/// set observed at `cardinality` members comes back down to `max_length`.
///
/// The job carries the cardinality observed when it was scheduled, not a
/// re-read at execution time. Jobs are executed at most once and never
/// retried.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShrinkJob {
    pub key: String,
    /// Cardinality observed in the round-trip that scheduled this job.
    pub cardinality: u64,
    pub max_length: u64,
}

impl ShrinkJob {
    /// The highest rank to remove; ranks `0..=stop_rank` go away.
    pub fn stop_rank(&self) -> i64 {
        self.cardinality as i64 - self.max_length as i64 - 1
    }

    /// How many members the trim should remove if no other writer touched
    /// the set in the meantime.
    pub fn expected_removals(&self) -> u64 {
        self.cardinality - self.max_length
    }
}

/// Configuration for a [`ShrinkWorker`].
pub struct ShrinkWorkerOptions {
    /// Number of worker threads. Default is 4.
    pub threads: Option<usize>,
    /// Pending-job queue capacity. Default is 50.
    pub queue_capacity: Option<usize>,
    /// Slack above `max_length` before a shrink is scheduled. Default is
    /// [`LENGTH_THRESHOLD`].
    pub threshold: Option<u64>,
}

impl Default for ShrinkWorkerOptions {
    fn default() -> Self {
        ShrinkWorkerOptions {
            threads: None,
            queue_capacity: None,
            threshold: None,
        }
    }
}

/// A fixed-size worker pool executing [`ShrinkJob`]s off a bounded queue.
pub struct ShrinkWorker {
    tx: Option<Sender<ShrinkJob>>,
    workers: Vec<thread::JoinHandle<()>>,
    threshold: u64,
    log: Logger,
}

impl ShrinkWorker {
    /// Start the worker threads. `execute` performs one rank-range removal
    /// and returns the number of members actually removed.
    pub fn new<E>(options: ShrinkWorkerOptions, execute: E, log: Logger) -> Self
    where
        E: Fn(&ShrinkJob) -> Result<u64, Error> + Send + Sync + 'static,
    {
        let threads = options.threads.unwrap_or(DEFAULT_SHRINK_THREADS);
        let queue_capacity = options
            .queue_capacity
            .unwrap_or(DEFAULT_SHRINK_QUEUE_CAPACITY);
        let threshold = options.threshold.unwrap_or(LENGTH_THRESHOLD);

        let (tx, rx) = bounded::<ShrinkJob>(queue_capacity);
        let execute = Arc::new(execute);
        let workers = (0..threads)
            .map(|n| {
                let rx: Receiver<ShrinkJob> = rx.clone();
                let execute = Arc::clone(&execute);
                let log = log.new(o!("shrink-worker" => n));
                thread::spawn(move || {
                    while let Ok(job) = rx.recv() {
                        run_job(&*execute, &job, &log);
                    }
                })
            })
            .collect();

        ShrinkWorker {
            tx: Some(tx),
            workers,
            threshold,
            log,
        }
    }

    /// Decide whether an insert observed at `cardinality` warrants a trim,
    /// and schedule one when it does. Never blocks.
    pub fn evaluate(&self, key: &str, cardinality: u64, max_length: u64) {
        if cardinality >= max_length + self.threshold {
            self.submit(ShrinkJob {
                key: key.to_string(),
                cardinality,
                max_length,
            });
        }
    }

    /// Hand a job to the workers. A full queue drops the job: callers must
    /// never be slowed or failed because maintenance is saturated, and the
    /// next oversized insert will schedule a fresh job anyway.
    pub fn submit(&self, job: ShrinkJob) {
        let tx = match &self.tx {
            Some(tx) => tx,
            None => return,
        };
        match tx.try_send(job) {
            Ok(()) => (),
            Err(TrySendError::Full(job)) => {
                debug!(
                    self.log,
                    "shrink queue full, dropping job";
                    "key" => job.key
                );
            }
            Err(TrySendError::Disconnected(_)) => (),
        }
    }

    /// Stop accepting jobs, let the queue drain, and join the workers.
    pub fn shutdown(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        // Closing the channel lets each worker finish its current job and
        // exit.
        self.tx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for ShrinkWorker {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn run_job(
    execute: &(dyn Fn(&ShrinkJob) -> Result<u64, Error> + Send + Sync),
    job: &ShrinkJob,
    log: &Logger,
) {
    let started = Instant::now();
    match execute(job) {
        Ok(removed) => {
            if removed != job.expected_removals() {
                // Another writer mutated the set between scheduling and
                // execution; tolerated, not corrected.
                warn!(
                    log,
                    "shrink removed a different number of members than \
                     expected";
                    "key" => job.key.as_str(),
                    "expected" => job.expected_removals(),
                    "removed" => removed
                );
            }
            debug!(
                log,
                "shrink complete";
                "key" => job.key.as_str(),
                "removed" => removed,
                "elapsed_ms" => started.elapsed().as_millis() as u64
            );
        }
        Err(err) => {
            warn!(
                log,
                "shrink job failed";
                "key" => job.key.as_str(),
                "error" => %err
            );
        }
    }
}
