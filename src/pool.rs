//! Bounded worker pool for batch lookups and object transfers.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::locked;

/// Unit of work run by the pool.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A job the pool did not accept, handed back to the submitter.
pub enum Rejected {
    /// Every worker is busy and the queue is full.
    Full(Job),
    /// The pool has been shut down.
    Shutdown(Job),
}

impl fmt::Debug for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejected::Full(_) => f.write_str("Full"),
            Rejected::Shutdown(_) => f.write_str("Shutdown"),
        }
    }
}

/// Fixed set of worker threads fed through a bounded queue.
///
/// Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    sender: Mutex<Option<SyncSender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stopped: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Start `threads` workers sharing a queue of `queue_capacity` jobs.
    pub fn new(threads: usize, queue_capacity: usize) -> Self {
        let (sender, receiver) = mpsc::sync_channel::<Job>(queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let stopped = Arc::new(AtomicBool::new(false));

        let workers = (0..threads.max(1))
            .map(|n| {
                let receiver = Arc::clone(&receiver);
                let stopped = Arc::clone(&stopped);
                thread::Builder::new()
                    .name(format!("lfs-worker-{}", n))
                    .spawn(move || run_worker(&receiver, &stopped))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to spawn worker thread");
                    None
                }
            })
            .collect();

        WorkerPool {
            inner: Arc::new(PoolInner {
                sender: Mutex::new(Some(sender)),
                workers: Mutex::new(workers),
                stopped,
            }),
        }
    }

    /// Queue a job without blocking.
    pub fn execute(&self, job: Job) -> Result<(), Rejected> {
        let sender = locked(&self.inner.sender);
        let Some(sender) = sender.as_ref() else {
            return Err(Rejected::Shutdown(job));
        };
        match sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => Err(Rejected::Full(job)),
            Err(TrySendError::Disconnected(job)) => Err(Rejected::Shutdown(job)),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Stop accepting jobs, drop queued ones and wait for running jobs.
    pub fn shutdown(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        locked(&self.inner.sender).take();

        let workers = std::mem::take(&mut *locked(&self.inner.workers));
        let current = thread::current().id();
        for worker in workers {
            // A job may shut the pool down from one of its own workers.
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                tracing::warn!("worker thread panicked");
            }
        }
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        // Workers exit once the queue is drained.
        locked(&self.sender).take();
    }
}

fn run_worker(receiver: &Mutex<Receiver<Job>>, stopped: &AtomicBool) {
    loop {
        let next = locked(receiver).recv();
        let Ok(job) = next else {
            break;
        };
        if stopped.load(Ordering::SeqCst) {
            drop(job);
            continue;
        }
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::warn!("worker job panicked");
        }
    }
}
