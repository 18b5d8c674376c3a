//! API gateway entry point.

use api::config::Config;
use broker::{InMemoryBroker, MessageBroker};
use metrics_exporter_prometheus::PrometheusHandle;
use orchestrator::ReplyWorker;
use saga_store::{InMemorySagaStore, PostgresSagaStore, SagaStore};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Open the saga store
    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(&url)
                .await
                .expect("failed to connect to database");
            let store = PostgresSagaStore::new(pool);
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using postgres saga store");
            connect_broker(config, store, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, sagas are kept in memory");
            connect_broker(config, InMemorySagaStore::new(), metrics_handle).await;
        }
    }
}

/// 4. Picks the transport: Kafka when configured, otherwise in process.
async fn connect_broker<S: SagaStore + 'static>(
    config: Config,
    store: S,
    metrics_handle: PrometheusHandle,
) {
    #[cfg(feature = "kafka")]
    {
        if let Some(brokers) = config.kafka_brokers.clone() {
            let broker = broker::KafkaBroker::new(&brokers, &config.kafka_consumer_group)
                .expect("failed to create kafka broker")
                .with_send_timeout(config.publish_timeout);
            tracing::info!(%brokers, "using kafka broker");
            return serve(config, store, broker, metrics_handle).await;
        }
    }
    #[cfg(not(feature = "kafka"))]
    {
        if config.kafka_brokers.is_some() {
            tracing::warn!("KAFKA_BROKERS is set but the kafka feature is not enabled");
        }
    }

    tracing::warn!(
        "no external broker, requests reach in-process subscribers only and replies arrive over POST /replies"
    );
    serve(config, store, InMemoryBroker::new(), metrics_handle).await;
}

async fn serve<S, B>(config: Config, store: S, broker: B, metrics_handle: PrometheusHandle)
where
    S: SagaStore + 'static,
    B: MessageBroker + Clone + 'static,
{
    let state = api::create_state(store, broker.clone(), config.orchestrator())
        .expect("invalid saga catalog");

    // 5. Start the reply worker
    let (stop_worker, worker_stopped) = oneshot::channel::<()>();
    let worker = ReplyWorker::new(
        state.orchestrator.clone(),
        broker,
        config.worker_max_in_flight,
        config.retry_policy(),
    );
    let worker = tokio::spawn(worker.run(async {
        let _ = worker_stopped.await;
    }));

    // 6. Start server
    let app = api::create_app(state, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting API gateway");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 7. Drain in-flight replies
    let _ = stop_worker.send(());
    match worker.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "reply worker failed"),
        Err(e) => tracing::error!(error = %e, "reply worker panicked"),
    }

    tracing::info!("gateway shut down gracefully");
}
