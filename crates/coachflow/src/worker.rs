//! Bounded worker pool: N independent executor loops claiming from one queue
//! and dispatching through a per-stage handler registry. A slow handler only
//! occupies its own executor; the lease heartbeat keeps long provider calls
//! from being reclaimed mid-flight.

use crate::jobs::error_codes::ErrorCode;
use crate::jobs::model::Job;
use crate::jobs::JobsRepo;
use crate::stages::{StageDeps, StageError};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

type HandlerFn = dyn for<'a> Fn(&'a Job, &'a StageDeps) -> BoxFuture<'a, Result<Value, StageError>>
    + Send
    + Sync;

pub fn boxed<'a, T>(fut: impl std::future::Future<Output = T> + Send + 'a) -> BoxFuture<'a, T> {
    Box::pin(fut)
}

#[derive(Clone)]
pub struct HandlerEntry {
    handler: Arc<HandlerFn>,
    timeout: Option<Duration>,
}

impl HandlerEntry {
    pub async fn run(&self, job: &Job, deps: &StageDeps) -> Result<Value, StageError> {
        let fut = (self.handler)(job, deps);
        match self.timeout {
            Some(dur) => match timeout(dur, fut).await {
                Ok(res) => res,
                Err(_) => Err(StageError::new(
                    ErrorCode::Timeout,
                    format!("handler timed out after {}ms", dur.as_millis()),
                )),
            },
            None => fut.await,
        }
    }
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerEntry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, stage: &str, handler: F)
    where
        F: for<'a> Fn(&'a Job, &'a StageDeps) -> BoxFuture<'a, Result<Value, StageError>>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(
            stage.to_string(),
            HandlerEntry {
                handler: Arc::new(handler),
                timeout: None,
            },
        );
    }

    pub fn register_with_timeout<F>(&mut self, stage: &str, handler: F, timeout_dur: Duration)
    where
        F: for<'a> Fn(&'a Job, &'a StageDeps) -> BoxFuture<'a, Result<Value, StageError>>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(
            stage.to_string(),
            HandlerEntry {
                handler: Arc::new(handler),
                timeout: Some(timeout_dur),
            },
        );
    }

    pub fn handler_for(&self, stage: &str) -> Option<HandlerEntry> {
        self.handlers.get(stage).cloned()
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub queue: String,
    pub concurrency: usize,
    pub lease_seconds: i64,
    pub heartbeat_interval: Duration,
    pub reap_interval: Duration,
    pub idle_sleep: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            queue: "tasks".to_string(),
            concurrency: 4,
            lease_seconds: 60,
            heartbeat_interval: Duration::from_secs(20),
            reap_interval: Duration::from_secs(5),
            idle_sleep: Duration::from_millis(250),
        }
    }
}

pub struct WorkerPool {
    registry: Arc<HandlerRegistry>,
    deps: Arc<StageDeps>,
    cfg: WorkerPoolConfig,
}

impl WorkerPool {
    pub fn new(registry: Arc<HandlerRegistry>, deps: Arc<StageDeps>, cfg: WorkerPoolConfig) -> Self {
        Self {
            registry,
            deps,
            cfg,
        }
    }

    /// Spawn the reaper plus `concurrency` executor loops. The tasks run
    /// until aborted; callers own the handles.
    pub fn spawn(&self, worker_id: &str) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.cfg.concurrency + 1);

        handles.push(tokio::spawn(reaper_loop(
            self.deps.jobs.clone(),
            self.cfg.reap_interval,
        )));

        for i in 0..self.cfg.concurrency {
            let executor_id = format!("{worker_id}-{i}");
            handles.push(tokio::spawn(executor_loop(
                Arc::clone(&self.registry),
                Arc::clone(&self.deps),
                self.cfg.clone(),
                executor_id,
            )));
        }

        info!(
            worker_id,
            concurrency = self.cfg.concurrency,
            queue = %self.cfg.queue,
            "worker pool started"
        );

        handles
    }
}

async fn reaper_loop(jobs: JobsRepo, interval: Duration) {
    loop {
        match jobs.reap_expired_leases().await {
            Ok(n) if n > 0 => info!(reclaimed = n, "returned expired leases to the queue"),
            Ok(_) => {}
            Err(err) => warn!(%err, "lease reaper pass failed"),
        }
        tokio::time::sleep(interval).await;
    }
}

async fn executor_loop(
    registry: Arc<HandlerRegistry>,
    deps: Arc<StageDeps>,
    cfg: WorkerPoolConfig,
    executor_id: String,
) {
    loop {
        match deps.jobs.claim(&cfg.queue, &executor_id, cfg.lease_seconds).await {
            Ok(Some(job)) => {
                execute_one(&registry, &deps, &cfg, &executor_id, job).await;
            }
            Ok(None) => tokio::time::sleep(cfg.idle_sleep).await,
            Err(err) => {
                warn!(%executor_id, %err, "claim failed");
                tokio::time::sleep(cfg.idle_sleep).await;
            }
        }
    }
}

async fn execute_one(
    registry: &HandlerRegistry,
    deps: &Arc<StageDeps>,
    cfg: &WorkerPoolConfig,
    executor_id: &str,
    job: Job,
) {
    debug!(
        executor_id,
        job_id = %job.id,
        stage = %job.stage,
        attempts = job.attempts,
        "claimed job"
    );

    let heartbeat = tokio::spawn(heartbeat_loop(
        deps.jobs.clone(),
        job.id,
        executor_id.to_string(),
        cfg.lease_seconds,
        cfg.heartbeat_interval,
    ));

    let result = match registry.handler_for(&job.stage) {
        Some(entry) => entry.run(&job, deps.as_ref()).await,
        None => {
            // forward-compatibility: an unknown stage is not this worker's
            // problem to fail, just to step over
            warn!(job_id = %job.id, stage = %job.stage, "no handler for stage, completing as no-op");
            Ok(json!({
                "skipped": true,
                "reason": format!("no handler registered for stage {}", job.stage),
            }))
        }
    };

    heartbeat.abort();

    match result {
        Ok(value) => {
            if let Err(err) = deps.runner.complete(job.id, executor_id, value).await {
                warn!(job_id = %job.id, %err, "completion write failed");
            }
        }
        Err(stage_err) => {
            warn!(
                job_id = %job.id,
                code = stage_err.code.as_str(),
                message = %stage_err.message,
                "stage handler failed"
            );
            if let Err(err) = deps
                .runner
                .fail(job.id, executor_id, stage_err.code, &stage_err.message)
                .await
            {
                warn!(job_id = %job.id, %err, "failure write failed");
            }
        }
    }
}

async fn heartbeat_loop(
    jobs: JobsRepo,
    job_id: Uuid,
    owner: String,
    lease_seconds: i64,
    interval: Duration,
) {
    loop {
        tokio::time::sleep(interval).await;
        match jobs.heartbeat(job_id, &owner, lease_seconds).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(%job_id, %owner, "lease no longer held, stopping heartbeat");
                break;
            }
            Err(err) => warn!(%job_id, %err, "heartbeat failed"),
        }
    }
}
