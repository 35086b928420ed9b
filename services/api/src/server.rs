use crate::cli::ServeArgs;
use crate::infra::{memory_api, postgres_api, AppState};
use crate::routes::with_visit_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use estate_visits::config::AppConfig;
use estate_visits::error::AppError;
use estate_visits::telemetry;
use estate_visits::workflows::visits::postgres;
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

    telemetry::init(&config.telemetry, config.environment)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let router = match config.database.postgres() {
        Some(settings) => {
            info!(max_connections = settings.max_connections, "using postgres visit store");
            with_visit_routes(postgres_api(&settings, config.scheduling.clone()).await?)
        }
        None => {
            info!("DATABASE_URL not set; visits are kept in memory");
            with_visit_routes(memory_api(
                config.scheduling.clone(),
                config.database.lock_timeout(),
            ))
        }
    };

    let app = router
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        timezone = %config.scheduling.timezone,
        "visit scheduling service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

/// Apply the PostgreSQL schema and exit.
pub(crate) async fn migrate() -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry, config.environment)?;

    let settings = config.database.require_postgres()?;
    let pool = postgres::connect(&settings).await?;
    postgres::migrate(&pool).await?;
    info!("visit schema is up to date");
    Ok(())
}
