use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use estate_visits::workflows::visits::postgres;
use estate_visits::workflows::visits::{
    AvailabilityService, InMemoryAvailabilityStore, InMemoryVisitStore, PgAvailabilityStore,
    PgSettings, PgVisitStore, RepositoryError, SchedulingPolicy, VisitApi, VisitService,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) type MemoryApi = VisitApi<InMemoryVisitStore, InMemoryAvailabilityStore>;
pub(crate) type PostgresApi = VisitApi<PgVisitStore, PgAvailabilityStore>;

/// Single-process backend used when no database is configured.
pub(crate) fn memory_api(policy: SchedulingPolicy, lock_timeout: Duration) -> Arc<MemoryApi> {
    let store = Arc::new(InMemoryVisitStore::with_lock_timeout(lock_timeout));
    let availability = Arc::new(InMemoryAvailabilityStore::default());
    let visits = VisitService::new(store, availability.clone(), policy);
    Arc::new(VisitApi::new(visits, AvailabilityService::new(availability)))
}

/// Connects, applies the schema and wires both PostgreSQL stores.
pub(crate) async fn postgres_api(
    settings: &PgSettings,
    policy: SchedulingPolicy,
) -> Result<Arc<PostgresApi>, RepositoryError> {
    let pool = postgres::connect(settings).await?;
    postgres::migrate(&pool).await?;

    let store = Arc::new(PgVisitStore::new(pool.clone(), settings.lock_timeout));
    let availability = Arc::new(PgAvailabilityStore::new(pool));
    let visits = VisitService::new(store, availability.clone(), policy);
    Ok(Arc::new(VisitApi::new(
        visits,
        AvailabilityService::new(availability),
    )))
}
