//! Pelago server entry point.
//!
//! The composition root: builds the worker pools, the processor, the
//! sandboxed transcoder pool and the scheduler; wires them in two phases;
//! recovers the persisted queue backlog; and runs the shutdown sequence
//! that persists whatever is still pending.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, extract::State as AxumState, routing::get};
use chrono::Utc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pelago_common::{Config, get_metrics};
use pelago_core::{MaintenanceStore, Processor, State};
use pelago_db::repositories::WorkerTaskRepository;
use pelago_media::MediaManager;
use pelago_media::sandbox::init_ffmpeg_pool;
use pelago_queue::workers::{
    DeliverContext, RequestSigner, WebPushContext, deliver_worker, web_push_worker,
};
use pelago_queue::{OneshotJob, RetryConfig, Workers};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pelago=debug,tower_http=debug".into()),
        )
        .init();

    info!("Starting pelago server...");

    // Load configuration
    let config = Config::load()?;
    let user_agent = format!("pelago/{}", env!("CARGO_PKG_VERSION"));

    // Connect to database
    let db = Arc::new(pelago_db::init(&config).await?);
    info!("Connected to database");

    info!("Running database migrations...");
    pelago_db::migrate(&db).await?;
    info!("Migrations completed");

    // Instance signing key for outbound delivery
    let instance_key =
        pelago_common::crypto::load_or_generate_key(&config.federation.instance_key_path).await?;
    let key_id = format!("{}/actor#main-key", config.server.url.trim_end_matches('/'));
    let signer = Arc::new(RequestSigner::new(instance_key, key_id));

    // Sandboxed transcoder pool, capacity independent of the worker counts
    let ffmpeg_pool = Arc::new(init_ffmpeg_pool(&config.media).await?);
    info!(
        capacity = config.media.sandbox_capacity,
        "Initialized transcoder sandbox pool"
    );

    // Phase one: construct all pools, empty and unstarted.
    let workers = Arc::new(Workers::new(&config.workers));

    // Composed state, passed by reference to everything that needs it.
    let task_store = Arc::new(WorkerTaskRepository::new(Arc::clone(&db)));
    let state = Arc::new(State::new(Arc::clone(&workers), task_store));

    let media_manager = Arc::new(MediaManager::new(
        Arc::clone(&ffmpeg_pool),
        workers.processing.queue().clone(),
        &config.media,
    ));

    // The consumer of the client/federator pools. Maintenance-backed jobs
    // need the wider application's database layer; deployments plug one in
    // here. For now, we set it to None.
    let maintenance: Option<Arc<dyn MaintenanceStore>> = None;
    let maintenance_enabled = maintenance.is_some();

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(user_agent.clone())
        .build()?;
    let mut processor = Processor::new(Arc::clone(&state), http_client);
    if let Some(store) = maintenance {
        processor = processor.with_maintenance(store);
    }
    let processor = Arc::new(processor);

    // Phase two: pools and consumer both exist, attach processing functions.
    {
        let p = Arc::clone(&processor);
        workers.client.set_processor(move |msg| {
            let p = Arc::clone(&p);
            async move { p.process_from_client_api(msg).await }
        });
    }
    {
        let p = Arc::clone(&processor);
        workers.federator.set_processor(move |msg| {
            let p = Arc::clone(&p);
            async move { p.process_from_fedi_api(msg).await }
        });
    }
    {
        let deliver_ctx = Arc::new(DeliverContext::new(
            signer,
            user_agent,
            RetryConfig::default(),
            workers.delivery.queue().clone(),
        ));
        workers.delivery.set_processor(move |job| {
            let ctx = Arc::clone(&deliver_ctx);
            async move { deliver_worker(job, ctx).await }
        });
    }
    workers
        .dereference
        .set_processor(|job: OneshotJob| job.run());
    workers
        .processing
        .set_processor(|job: OneshotJob| job.run());
    {
        let push_ctx = Arc::new(WebPushContext::new(&config.web_push)?);
        if !push_ctx.enabled() {
            info!("No VAPID key configured, web push fan-out disabled");
        }
        workers.web_push.set_processor(move |job| {
            let ctx = Arc::clone(&push_ctx);
            async move { web_push_worker(job, ctx).await }
        });
    }

    workers.start()?;

    // Recover the persisted backlog before admitting external traffic.
    processor.fill_worker_queues().await?;

    // Recurring maintenance. Registered fresh at every start; duplicate IDs
    // are startup misconfiguration.
    {
        let p = Arc::clone(&processor);
        let added = workers.scheduler.add_recurring(
            "@cachesweep",
            Utc::now(),
            Duration::from_secs(5 * 60),
            move |_now| {
                let p = Arc::clone(&p);
                async move {
                    p.sweep_caches();
                    Ok(())
                }
            },
        );
        anyhow::ensure!(added, "duplicate scheduler job id: @cachesweep");
    }
    {
        let m = Arc::clone(&media_manager);
        let added = workers.scheduler.add_recurring(
            "@tempclean",
            Utc::now(),
            Duration::from_secs(60 * 60),
            move |_now| {
                let m = Arc::clone(&m);
                async move { m.prune_work_dir().await.map(|_| ()) }
            },
        );
        anyhow::ensure!(added, "duplicate scheduler job id: @tempclean");
    }
    if maintenance_enabled {
        {
            let p = Arc::clone(&processor);
            let added = workers.scheduler.add_recurring(
                "@pollexpiry",
                Utc::now(),
                Duration::from_secs(60),
                move |now| {
                    let p = Arc::clone(&p);
                    async move { p.dispatch_poll_expiries(now).await }
                },
            );
            anyhow::ensure!(added, "duplicate scheduler job id: @pollexpiry");
        }
        {
            let p = Arc::clone(&processor);
            let added = workers.scheduler.add_recurring(
                "@statuspublish",
                Utc::now(),
                Duration::from_secs(60),
                move |now| {
                    let p = Arc::clone(&p);
                    async move { p.publish_scheduled_statuses(now).await }
                },
            );
            anyhow::ensure!(added, "duplicate scheduler job id: @statuspublish");
        }
        {
            let p = Arc::clone(&processor);
            let added = workers.scheduler.add_recurring(
                "@permsubs",
                Utc::now(),
                Duration::from_secs(24 * 60 * 60),
                move |now| {
                    let p = Arc::clone(&p);
                    async move { p.refresh_permission_subscriptions(now).await }
                },
            );
            anyhow::ensure!(added, "duplicate scheduler job id: @permsubs");
        }
    }

    // Observability surface
    let app = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::clone(&state));

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Shutdown sequence: routing has stopped; stop the pools with a bounded
    // drain, then persist whatever is still queued under a timeout detached
    // from the already-finished shutdown signal.
    info!("Routing stopped, stopping worker pools...");
    workers
        .stop(Duration::from_secs(config.workers.shutdown_timeout_secs))
        .await;

    let persist_timeout = Duration::from_secs(config.workers.persist_timeout_secs);
    match tokio::time::timeout(persist_timeout, processor.persist_worker_queues()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            // Data loss is preferred over a hung process.
            error!(error = %e, "Failed to persist worker queues");
        }
        Err(_) => {
            warn!(
                timeout_secs = persist_timeout.as_secs(),
                "Persisting worker queues timed out"
            );
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Prometheus text endpoint: counters plus the live pool gauges.
async fn metrics_handler(AxumState(state): AxumState<Arc<State>>) -> String {
    let mut output = get_metrics().to_prometheus();

    output.push_str("# HELP pelago_worker_busy Busy worker slots per pool\n");
    output.push_str("# TYPE pelago_worker_busy gauge\n");
    output.push_str("# HELP pelago_queue_backlog Queued messages per pool\n");
    output.push_str("# TYPE pelago_queue_backlog gauge\n");

    let workers = &state.workers;
    let pools: [(&str, usize, usize); 6] = [
        ("client", workers.client.len(), workers.client.queue().len()),
        (
            "federator",
            workers.federator.len(),
            workers.federator.queue().len(),
        ),
        (
            "delivery",
            workers.delivery.len(),
            workers.delivery.queue().len(),
        ),
        (
            "dereference",
            workers.dereference.len(),
            workers.dereference.queue().len(),
        ),
        (
            "processing",
            workers.processing.len(),
            workers.processing.queue().len(),
        ),
        (
            "web_push",
            workers.web_push.len(),
            workers.web_push.queue().len(),
        ),
    ];
    for (name, busy, backlog) in pools {
        output.push_str(&format!("pelago_worker_busy{{pool=\"{name}\"}} {busy}\n"));
        output.push_str(&format!(
            "pelago_queue_backlog{{pool=\"{name}\"}} {backlog}\n"
        ));
    }

    output
}
