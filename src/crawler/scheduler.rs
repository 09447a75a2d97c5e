//! Worker pool for a single domain crawl
//!
//! This module handles:
//! - Bounding in-flight page fetches to the domain's politeness budget
//! - Draining the job queue until no job and no worker is left
//! - Per-job deadlines that abandon a stuck fetch without stalling the pool
//! - Handing successful jobs to the result queue and closing it with a sentinel

use crate::crawler::consolidator::ResultMessage;
use crate::crawler::fetcher::PageFetch;
use crate::crawler::job::Job;
use crate::CrawlError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a pool over one domain crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Jobs are being dispatched
    Filling,
    /// The queue is empty; waiting on in-flight workers
    Draining,
    /// Nothing queued and nothing running
    Quiescent,
}

impl PoolState {
    /// State after looking at the queue and the active worker count
    pub fn next(queue_empty: bool, active_workers: usize) -> Self {
        match (queue_empty, active_workers) {
            (false, _) => Self::Filling,
            (true, 0) => Self::Quiescent,
            (true, _) => Self::Draining,
        }
    }
}

/// Worker count for a domain
///
/// Any crawl-delay hint makes the domain strictly serial.
pub fn concurrency_for(crawl_delay: Option<Duration>, default_concurrency: usize) -> usize {
    match crawl_delay {
        Some(_) => 1,
        None => default_concurrency.max(1),
    }
}

/// Cancellation token paired with a wall-clock deadline
#[derive(Debug, Clone)]
pub struct JobDeadline {
    token: CancellationToken,
    deadline: Instant,
}

impl JobDeadline {
    pub fn new(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Instant::now() + timeout,
        }
    }

    /// Token cancelled once the deadline passes
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Runs `work` until it finishes, the token is cancelled or the deadline passes
    ///
    /// Returns `None` when the work was abandoned; the future is dropped at
    /// that point.
    pub async fn run<F: Future>(&self, work: F) -> Option<F::Output> {
        tokio::select! {
            output = work => Some(output),
            _ = self.token.cancelled() => None,
            _ = tokio::time::sleep_until(self.deadline) => {
                self.token.cancel();
                None
            }
        }
    }
}

/// Per-pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub dispatched: usize,
    pub fetched: usize,
    /// Failed jobs, timeouts included
    pub failed: usize,
    pub timed_out: usize,
}

enum JobOutcome {
    Fetched,
    Failed,
    TimedOut,
}

/// Bounded pool of page fetch workers
pub struct WorkerPool {
    fetcher: Arc<dyn PageFetch>,
    concurrency: usize,
    job_timeout: Duration,
}

impl WorkerPool {
    pub fn new(fetcher: Arc<dyn PageFetch>, concurrency: usize, job_timeout: Duration) -> Self {
        Self {
            fetcher,
            concurrency: concurrency.max(1),
            job_timeout,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Drains `jobs`, pushing fetched jobs to `results`
    ///
    /// Once quiescent, a [`ResultMessage::Done`] sentinel is sent. If the
    /// result receiver goes away, no further jobs are dispatched.
    pub async fn run(
        &self,
        mut jobs: mpsc::UnboundedReceiver<Job>,
        results: mpsc::Sender<ResultMessage>,
    ) -> PoolStats {
        let mut stats = PoolStats::default();
        let mut workers: JoinSet<JobOutcome> = JoinSet::new();
        let mut state = PoolState::Filling;

        tracing::debug!(concurrency = self.concurrency, "Worker pool filling");

        loop {
            if workers.len() >= self.concurrency {
                reap(workers.join_next().await, &mut stats);
                continue;
            }

            let next = if results.is_closed() {
                None
            } else {
                match jobs.try_recv() {
                    Ok(job) => Some(job),
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
                }
            };

            let next_state = PoolState::next(next.is_none(), workers.len());
            if next_state != state {
                tracing::debug!(from = ?state, to = ?next_state, active = workers.len(), "Worker pool state");
                state = next_state;
            }

            match (state, next) {
                (PoolState::Filling, Some(job)) => {
                    stats.dispatched += 1;
                    workers.spawn(self.work(job, results.clone()));
                }
                (PoolState::Draining, _) => reap(workers.join_next().await, &mut stats),
                _ => break,
            }
        }

        if results.is_closed() {
            let mut abandoned = 0usize;
            while jobs.try_recv().is_ok() {
                abandoned += 1;
            }
            tracing::warn!(abandoned, "Result queue closed, remaining jobs not dispatched");
        } else if results.send(ResultMessage::Done).await.is_err() {
            tracing::warn!("Result queue closed before the end of the crawl");
        }

        tracing::info!(
            dispatched = stats.dispatched,
            fetched = stats.fetched,
            failed = stats.failed,
            timed_out = stats.timed_out,
            "Worker pool quiescent"
        );

        stats
    }

    fn work(
        &self,
        mut job: Job,
        results: mpsc::Sender<ResultMessage>,
    ) -> impl Future<Output = JobOutcome> + Send + 'static {
        let fetcher = Arc::clone(&self.fetcher);
        let timeout = self.job_timeout;

        async move {
            let deadline = JobDeadline::new(timeout);
            let outcome = deadline.run(fetcher.fetch(&job)).await;

            match outcome {
                Some(Ok(data)) => {
                    tracing::debug!(url = %job.url, fields = data.len(), "Page fetched");
                    job.data = Some(data);
                    // Blocks while the consolidator is behind
                    if results.send(ResultMessage::Page(job)).await.is_err() {
                        return JobOutcome::Failed;
                    }
                    JobOutcome::Fetched
                }
                Some(Err(e)) => {
                    tracing::warn!(url = %job.url, kind = e.kind(), error = %e, "Page job failed");
                    JobOutcome::Failed
                }
                None => {
                    let err = CrawlError::JobTimeout {
                        url: job.url.clone(),
                        timeout,
                    };
                    tracing::warn!(url = %job.url, kind = err.kind(), error = %err, "Page job abandoned");
                    JobOutcome::TimedOut
                }
            }
        }
    }
}

fn reap(joined: Option<Result<JobOutcome, tokio::task::JoinError>>, stats: &mut PoolStats) {
    match joined {
        Some(Ok(JobOutcome::Fetched)) => stats.fetched += 1,
        Some(Ok(JobOutcome::Failed)) => stats.failed += 1,
        Some(Ok(JobOutcome::TimedOut)) => {
            stats.failed += 1;
            stats.timed_out += 1;
        }
        Some(Err(e)) => {
            tracing::error!(error = %e, "Page worker panicked");
            stats.failed += 1;
        }
        None => {}
    }
}
