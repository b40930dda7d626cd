//! Bounded worker pool for solve units
//!
//! A fixed set of worker threads pulls boxed jobs from a bounded
//! `crossbeam_channel` queue, so at most `limit` jobs run at any moment and
//! submitters block once `limit * QUEUE_FACTOR` jobs are waiting. Each job
//! reports through its own channel; a panicking job only fails its own
//! [JobHandle].
//!
//! The scheduler never cancels anything on its own: cooperative cancellation
//! goes through [CancellationToken]s that jobs poll.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender, TryRecvError};
use tracing::{debug, warn};

use crate::error::{InputError, JobError, SubmitError};

/// Queue slots per worker
const QUEUE_FACTOR: usize = 4;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Shared flag for cooperative cancellation
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Result slot of one submitted job
pub struct JobHandle<T> {
    pub(crate) receiver: Receiver<Result<T, JobError>>,
}

impl<T> JobHandle<T> {
    /// Block until the job has run
    pub fn join(self) -> Result<T, JobError> {
        self.receiver.recv().map_err(|_| JobError::Disconnected)?
    }

    /// `None` if the job has not finished within `timeout`
    pub fn join_timeout(&self, timeout: Duration) -> Option<Result<T, JobError>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => None,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Some(Err(JobError::Disconnected)),
        }
    }

    /// `None` if the job has not finished yet
    pub fn try_join(&self) -> Option<Result<T, JobError>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(JobError::Disconnected)),
        }
    }
}

/// Fixed-size pool of worker threads
pub struct Scheduler {
    limit: usize,
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Start `limit` workers
    pub fn new(limit: usize) -> Result<Self, InputError> {
        if limit == 0 {
            return Err(InputError::InvalidParameter(
                "scheduler needs at least one worker".to_string(),
            ));
        }
        let (sender, receiver) = bounded::<Job>(limit * QUEUE_FACTOR);

        let mut workers = Vec::with_capacity(limit);
        for worker_id in 0..limit {
            let receiver = receiver.clone();
            let handle = std::thread::spawn(move || {
                debug!("worker {} started", worker_id);
                while let Ok(job) = receiver.recv() {
                    job();
                }
                debug!("worker {} shutting down", worker_id);
            });
            workers.push(handle);
        }

        Ok(Self {
            limit,
            sender: Some(sender),
            workers,
        })
    }

    /// One worker per available core
    pub fn with_available_parallelism() -> Result<Self, InputError> {
        let limit = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(limit)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Queue `f`, blocking while the queue is full
    pub fn submit<F, T>(&self, f: F) -> Result<JobHandle<T>, SubmitError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (job, handle) = wrap(f);
        let sender = self.sender.as_ref().ok_or(SubmitError::Shutdown)?;
        sender.send(job).map_err(|_| SubmitError::Shutdown)?;
        Ok(handle)
    }

    /// Queue `f`, giving up with [SubmitError::Timeout] if the queue stays full
    /// past `deadline`
    pub fn submit_deadline<F, T>(&self, f: F, deadline: Instant) -> Result<JobHandle<T>, SubmitError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (job, handle) = wrap(f);
        let sender = self.sender.as_ref().ok_or(SubmitError::Shutdown)?;
        let timeout = deadline.saturating_duration_since(Instant::now());
        match sender.send_timeout(job, timeout) {
            Ok(()) => Ok(handle),
            Err(SendTimeoutError::Timeout(_)) => Err(SubmitError::Timeout),
            Err(SendTimeoutError::Disconnected(_)) => Err(SubmitError::Shutdown),
        }
    }

    /// Run every queued job, then stop the workers
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // closing the queue lets workers drain it and exit
        drop(self.sender.take());
        for (worker_id, handle) in self.workers.drain(..).enumerate() {
            if handle.join().is_err() {
                warn!("worker {} panicked", worker_id);
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn wrap<F, T>(f: F) -> (Job, JobHandle<T>)
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = bounded(1);
    let job: Job = Box::new(move || {
        let result = catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!("job panicked: {}", message);
            JobError::Panicked(message)
        });
        // the handle may already be gone
        let _ = tx.send(result);
    });
    (job, JobHandle { receiver: rx })
}
