use coachflow::api::{self, ApiState};
use coachflow::config::Config;
use coachflow::db;
use coachflow::events::ProgressBus;
use coachflow::jobs::retry::RetryConfig;
use coachflow::jobs::{JobRunner, JobsRepo};
use coachflow::stages::{PollConfig, StageDeps};
use coachflow::transcriptions::TranscriptionsRepo;
use coachflow::worker::{WorkerPool, WorkerPoolConfig};

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

mod handlers;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = Config::from_env()?;

    info!(
        worker_id = %cfg.worker_id,
        queue = %cfg.queue,
        concurrency = cfg.concurrency,
        lease_seconds = cfg.lease_seconds,
        stt_provider = %cfg.stt_provider,
        coach_models = ?cfg.coach_models,
        api = %cfg.admin_addr.clone().unwrap_or_else(|| "disabled".to_string()),
        migrate_on_startup = cfg.migrate_on_startup,
        "coachflow worker starting"
    );

    let pool = db::make_pool(&cfg.database_url).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
    }

    let jobs = JobsRepo::new(pool.clone())
        .with_max_payload_bytes(cfg.max_payload_bytes)
        .with_retry_config(RetryConfig {
            jitter_pct: cfg.retry_jitter_pct,
            ..RetryConfig::default()
        });
    let transcriptions = TranscriptionsRepo::new(pool.clone());
    let bus = Arc::new(ProgressBus::new());
    let runner = JobRunner::new(jobs.clone(), bus.clone());

    let stt = handlers::build_stt_provider(&cfg)?;
    let coach = handlers::build_coach_chain(&cfg)?;

    let deps = Arc::new(StageDeps {
        queue: cfg.queue.clone(),
        jobs: jobs.clone(),
        transcriptions: transcriptions.clone(),
        runner: runner.clone(),
        stt,
        coach,
        poll: PollConfig {
            interval: Duration::from_secs(cfg.poll_interval_secs),
            max_attempts: cfg.poll_max_attempts,
        },
    });

    let registry = handlers::build_registry(&cfg);
    let pool_cfg = WorkerPoolConfig {
        queue: cfg.queue.clone(),
        concurrency: cfg.concurrency,
        lease_seconds: cfg.lease_seconds,
        heartbeat_interval: Duration::from_secs(cfg.heartbeat_seconds),
        reap_interval: Duration::from_millis(cfg.reap_interval_ms),
        idle_sleep: Duration::from_millis(250),
    };

    let worker_pool = WorkerPool::new(registry, deps, pool_cfg);
    let mut handles = worker_pool.spawn(&cfg.worker_id);

    // collaborator surface runs alongside the pool in the same process
    if let Some(addr) = cfg.admin_addr.clone() {
        let state = ApiState {
            queue: cfg.queue.clone(),
            jobs,
            transcriptions,
            runner,
            bus,
        };
        let app = api::router(state);
        handles.push(tokio::spawn(async move {
            match tokio::net::TcpListener::bind(&addr).await {
                Ok(listener) => {
                    info!("api listening on http://{addr}");
                    if let Err(err) = axum::serve(listener, app).await {
                        error!(%err, "api server exited");
                    }
                }
                Err(err) => error!(%err, %addr, "could not bind api listener"),
            }
        }));
    }

    for handle in handles {
        handle.await?;
    }

    Ok(())
}
