//! Request dispatch with a priority lane
//!
//! Urgent jobs (emergency stops) go to a dedicated worker and are also
//! preferred by every general worker through a biased `select!`, so they
//! never wait behind queued normal work.

use hearth_util::{HearthError, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
type SharedReceiver = Arc<Mutex<mpsc::Receiver<Job>>>;

const QUEUE_CAPACITY: usize = 1024;

/// Which queue a job goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Priority,
    Normal,
}

pub struct Dispatcher {
    priority_tx: mpsc::Sender<Job>,
    normal_tx: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawn `workers` general workers plus one priority-only worker
    pub fn new(workers: usize) -> Self {
        Self::with_capacity(workers, QUEUE_CAPACITY)
    }

    /// Like [`Dispatcher::new`] with `capacity` queued jobs per lane
    pub fn with_capacity(workers: usize, capacity: usize) -> Self {
        let (priority_tx, priority_rx) = mpsc::channel::<Job>(capacity.max(1));
        let (normal_tx, normal_rx) = mpsc::channel::<Job>(capacity.max(1));
        let priority_rx: SharedReceiver = Arc::new(Mutex::new(priority_rx));
        let normal_rx: SharedReceiver = Arc::new(Mutex::new(normal_rx));

        let mut handles = Vec::with_capacity(workers + 1);
        handles.push(tokio::spawn(priority_worker(priority_rx.clone())));
        for id in 0..workers.max(1) {
            handles.push(tokio::spawn(general_worker(
                id,
                priority_rx.clone(),
                normal_rx.clone(),
            )));
        }

        info!(workers = workers.max(1), "Dispatcher started");
        Self {
            priority_tx,
            normal_tx,
            workers: handles,
        }
    }

    /// Queue a job. Waits for room when the lane is full.
    pub async fn submit<F>(&self, lane: Lane, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let tx = match lane {
            Lane::Priority => &self.priority_tx,
            Lane::Normal => &self.normal_tx,
        };
        tx.send(Box::pin(job))
            .await
            .map_err(|_| HearthError::internal("dispatcher stopped"))
    }

    /// Queue a job without waiting. A full lane is reported as
    /// `RateLimited` so the caller can turn the request away.
    pub fn try_submit<F>(&self, lane: Lane, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let tx = match lane {
            Lane::Priority => &self.priority_tx,
            Lane::Normal => &self.normal_tx,
        };
        tx.try_send(Box::pin(job)).map_err(|e| match e {
            TrySendError::Full(_) => HearthError::RateLimited,
            TrySendError::Closed(_) => HearthError::internal("dispatcher stopped"),
        })
    }

    /// Stop accepting work and wait for queued jobs to drain
    pub async fn shutdown(self) {
        drop(self.priority_tx);
        drop(self.normal_tx);
        for handle in self.workers {
            let _ = handle.await;
        }
        debug!("Dispatcher drained");
    }
}

async fn recv(rx: &SharedReceiver) -> Option<Job> {
    rx.lock().await.recv().await
}

async fn priority_worker(priority_rx: SharedReceiver) {
    while let Some(job) = recv(&priority_rx).await {
        job.await;
    }
}

async fn general_worker(id: usize, priority_rx: SharedReceiver, normal_rx: SharedReceiver) {
    let mut priority_open = true;
    loop {
        let job = tokio::select! {
            biased;

            job = recv(&priority_rx), if priority_open => match job {
                Some(job) => job,
                None => {
                    priority_open = false;
                    continue;
                }
            },
            job = recv(&normal_rx) => match job {
                Some(job) => job,
                None => break,
            },
        };
        job.await;
    }
    debug!(worker = id, "Worker stopped");
}
