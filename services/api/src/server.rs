use crate::cli::ServeArgs;
use crate::infra::{AppState, LoggingNotifier};
use crate::routes::with_subscription_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use drive_own::config::AppConfig;
use drive_own::error::AppError;
use drive_own::telemetry;
use drive_own::workflows::subscriptions::{InMemoryRecordStore, SubscriptionEngine};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let engine = Arc::new(SubscriptionEngine::new(
        Arc::new(InMemoryRecordStore::new()),
        Arc::new(LoggingNotifier::default()),
        config.engine.clone(),
    ));

    let app = with_subscription_routes(engine)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        completion = ?config.engine.completion,
        "subscription engine ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
