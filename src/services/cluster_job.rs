use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::config::Config;
use crate::db::SuggestStore;
use crate::error::{AppError, AppResult};
use crate::services::cancel::Cancellation;

/// Proof of lock ownership, required to release it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Mutual exclusion between nodes running the same job
#[async_trait]
pub trait JobLock: Send + Sync {
    /// Returns `None` while another holder owns an unexpired lock
    async fn try_acquire(&self, name: &str, ttl: Duration) -> AppResult<Option<LockToken>>;

    /// Pushes the expiry to `ttl` from now; `false` once `token` no longer
    /// owns the lock
    async fn renew(&self, name: &str, token: &LockToken, ttl: Duration) -> AppResult<bool>;

    /// Releases the lock if `token` still owns it
    async fn release(&self, name: &str, token: &LockToken) -> AppResult<()>;
}

/// Job lock for a single process
#[derive(Debug, Default)]
pub struct LocalJobLock {
    held: Mutex<HashMap<String, (LockToken, Instant)>>,
}

impl LocalJobLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobLock for LocalJobLock {
    async fn try_acquire(&self, name: &str, ttl: Duration) -> AppResult<Option<LockToken>> {
        let mut held = self.held.lock().await;
        let now = Instant::now();

        if let Some((_, expires_at)) = held.get(name) {
            if *expires_at > now {
                return Ok(None);
            }
        }

        let token = LockToken::generate();
        held.insert(name.to_string(), (token.clone(), now + ttl));
        Ok(Some(token))
    }

    async fn renew(&self, name: &str, token: &LockToken, ttl: Duration) -> AppResult<bool> {
        let mut held = self.held.lock().await;
        let now = Instant::now();

        match held.get_mut(name) {
            Some((owner, expires_at)) if owner == token && *expires_at > now => {
                *expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, name: &str, token: &LockToken) -> AppResult<()> {
        let mut held = self.held.lock().await;
        if held.get(name).is_some_and(|(owner, _)| owner == token) {
            held.remove(name);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct JobSettings {
    pub name: String,
    /// Minimum time between two runs across the cluster
    pub interval: Duration,
    /// How often each node checks whether a run is due
    pub poll: Duration,
    pub lock_ttl: Duration,
    /// Run on the first poll even if the interval has not elapsed
    pub run_on_start: bool,
}

impl JobSettings {
    pub fn precalc(config: &Config) -> Self {
        Self {
            name: "precalc".to_string(),
            interval: Duration::from_secs(config.precalc_interval_secs),
            poll: Duration::from_secs(config.job_poll_secs),
            lock_ttl: Duration::from_secs(config.job_lock_ttl_secs),
            run_on_start: true,
        }
    }

    fn validate(&self) -> AppResult<()> {
        if self.interval.is_zero() || self.poll.is_zero() || self.lock_ttl.is_zero() {
            return Err(AppError::InvalidInput(format!(
                "Job {} needs non-zero interval, poll and lock TTL",
                self.name
            )));
        }
        Ok(())
    }
}

/// Handle for gracefully stopping a scheduled job
pub struct JobHandle {
    name: String,
    shutdown_tx: mpsc::Sender<()>,
    cancel: Cancellation,
    task: JoinHandle<()>,
}

impl JobHandle {
    /// Stops polling, cancels a run in progress and waits for it to return
    pub async fn close(self) {
        self.cancel.cancel();
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            tracing::error!(job = %self.name, error = %e, "Job task ended abnormally");
        }
        tracing::info!(job = %self.name, "Job stopped");
    }
}

/// Periodic job run by exactly one node per interval
pub struct ClusterJob;

impl ClusterJob {
    /// Starts polling in the background
    ///
    /// On each poll the node takes the job lock, runs `callback` if the
    /// interval since the last recorded run has elapsed, records the run and
    /// releases the lock. The lock is renewed while the callback runs; the
    /// callback's token is cancelled if the lock is lost or the job closed.
    pub fn schedule<F, Fut>(
        settings: JobSettings,
        lock: Arc<dyn JobLock>,
        store: SuggestStore,
        callback: F,
    ) -> AppResult<JobHandle>
    where
        F: Fn(Cancellation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<()>> + Send,
    {
        settings.validate()?;

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let name = settings.name.clone();
        let cancel = Cancellation::new();
        let job_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            tracing::info!(
                job = %settings.name,
                interval_secs = settings.interval.as_secs(),
                poll_secs = settings.poll.as_secs(),
                "Job scheduled"
            );

            let mut ticker = tokio::time::interval(settings.poll);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut first_poll = true;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let force = first_poll && settings.run_on_start;
                        first_poll = false;

                        let run = Run {
                            settings: &settings,
                            lock: lock.as_ref(),
                            store: &store,
                            cancel: &job_cancel,
                        };
                        if let Err(e) = run.run_if_due(&callback, force).await {
                            tracing::error!(job = %settings.name, error = %e, "Job poll failed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!(job = %settings.name, "Job shutting down");
                        break;
                    }
                }
            }
        });

        Ok(JobHandle {
            name,
            shutdown_tx,
            cancel,
            task,
        })
    }
}

/// Collaborators of one poll
struct Run<'a> {
    settings: &'a JobSettings,
    lock: &'a dyn JobLock,
    store: &'a SuggestStore,
    cancel: &'a Cancellation,
}

impl Run<'_> {
    async fn run_if_due<F, Fut>(&self, callback: &F, force: bool) -> AppResult<bool>
    where
        F: Fn(Cancellation) -> Fut,
        Fut: Future<Output = AppResult<()>>,
    {
        let name = &self.settings.name;
        let Some(token) = self.lock.try_acquire(name, self.settings.lock_ttl).await? else {
            tracing::debug!(job = %name, "Job lock held by another node");
            return Ok(false);
        };

        let outcome = self.run_locked(&token, callback, force).await;

        if let Err(e) = self.lock.release(name, &token).await {
            tracing::warn!(job = %name, error = %e, "Failed to release job lock");
        }
        outcome
    }

    async fn run_locked<F, Fut>(&self, token: &LockToken, callback: &F, force: bool) -> AppResult<bool>
    where
        F: Fn(Cancellation) -> Fut,
        Fut: Future<Output = AppResult<()>>,
    {
        let name = &self.settings.name;
        let due = force
            || match self.store.last_run(name).await? {
                None => true,
                // A last run in the future (clock skew) is treated as not due.
                Some(at) => (Utc::now() - at)
                    .to_std()
                    .map(|elapsed| elapsed >= self.settings.interval)
                    .unwrap_or(false),
            };
        if !due {
            return Ok(false);
        }

        let started = Instant::now();
        tracing::info!(job = %name, "Running job");
        let run_cancel = self.cancel.child();
        let (result, lease_lost) = self
            .hold_lease(token, &run_cancel, callback(run_cancel.clone()))
            .await;

        match result {
            Ok(()) => tracing::info!(
                job = %name,
                duration_ms = started.elapsed().as_millis() as u64,
                "Job finished"
            ),
            Err(e) => tracing::error!(job = %name, error = %e, "Job failed"),
        }

        if lease_lost {
            // Another node may own the interval now.
            tracing::warn!(job = %name, "Job lock lost during run, run not recorded");
            return Ok(false);
        }

        self.store.set_last_run(name, Utc::now()).await?;
        Ok(true)
    }

    /// Drives `work` to completion, renewing the lock every third of its TTL
    ///
    /// Losing the lock cancels `run_cancel`; the returned flag reports it.
    async fn hold_lease<Fut>(
        &self,
        token: &LockToken,
        run_cancel: &Cancellation,
        work: Fut,
    ) -> (AppResult<()>, bool)
    where
        Fut: Future<Output = AppResult<()>>,
    {
        let name = &self.settings.name;
        let ttl = self.settings.lock_ttl;
        let period = (ttl / 3).max(Duration::from_millis(1));
        let mut renew = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        renew.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(work);
        let mut lost = false;

        loop {
            tokio::select! {
                result = &mut work => return (result, lost),
                _ = renew.tick(), if !lost => {
                    match self.lock.renew(name, token, ttl).await {
                        Ok(true) => tracing::debug!(job = %name, "Job lock renewed"),
                        Ok(false) => {
                            tracing::error!(job = %name, "Job lock expired during run, cancelling");
                            lost = true;
                            run_cancel.cancel();
                        }
                        // Retried on the next tick while the TTL still covers us.
                        Err(e) => tracing::warn!(job = %name, error = %e, "Failed to renew job lock"),
                    }
                }
            }
        }
    }
}
