use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::availability::{AvailabilityService, AvailabilityServiceError, SlotRejection};
use super::domain::{
    AgentId, CallerRole, PropertyId, SlotId, UserId, VisitId, VisitRequest, VisitStatus,
};
use super::error::{VisitRejection, VisitServiceError};
use super::repository::{AvailabilityStore, RepositoryError, VisitStore};
use super::service::VisitService;

/// Shared handler state: the booking orchestrator and the availability service.
pub struct VisitApi<S, A> {
    pub visits: VisitService<S, A>,
    pub availability: AvailabilityService<A>,
}

impl<S, A> VisitApi<S, A>
where
    S: VisitStore + 'static,
    A: AvailabilityStore + 'static,
{
    pub fn new(visits: VisitService<S, A>, availability: AvailabilityService<A>) -> Self {
        Self {
            visits,
            availability,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub status: VisitStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub caller_role: CallerRole,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotRequest {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Router builder exposing booking, lifecycle and availability endpoints.
pub fn visit_router<S, A>(api: Arc<VisitApi<S, A>>) -> Router
where
    S: VisitStore + 'static,
    A: AvailabilityStore + 'static,
{
    Router::new()
        .route("/api/v1/visits", post(create_handler::<S, A>))
        .route("/api/v1/visits/:visit_id", get(get_handler::<S, A>))
        .route(
            "/api/v1/visits/:visit_id/status",
            put(status_handler::<S, A>),
        )
        .route(
            "/api/v1/visits/:visit_id/cancel",
            post(cancel_handler::<S, A>),
        )
        .route(
            "/api/v1/users/:user_id/visits",
            get(user_visits_handler::<S, A>),
        )
        .route(
            "/api/v1/agents/:agent_id/visits",
            get(agent_visits_handler::<S, A>),
        )
        .route(
            "/api/v1/properties/:property_id/visits",
            get(property_visits_handler::<S, A>),
        )
        .route(
            "/api/v1/agents/:agent_id/availability",
            post(declare_slot_handler::<S, A>).get(list_slots_handler::<S, A>),
        )
        .route(
            "/api/v1/availability/:slot_id",
            delete(remove_slot_handler::<S, A>),
        )
        .with_state(api)
}

pub(crate) async fn create_handler<S, A>(
    State(api): State<Arc<VisitApi<S, A>>>,
    axum::Json(request): axum::Json<VisitRequest>,
) -> Response
where
    S: VisitStore + 'static,
    A: AvailabilityStore + 'static,
{
    match api.visits.create_visit(request).await {
        Ok(visit) => (StatusCode::CREATED, axum::Json(visit)).into_response(),
        Err(err) => visit_error_response(err),
    }
}

pub(crate) async fn get_handler<S, A>(
    State(api): State<Arc<VisitApi<S, A>>>,
    Path(visit_id): Path<Uuid>,
) -> Response
where
    S: VisitStore + 'static,
    A: AvailabilityStore + 'static,
{
    match api.visits.get_visit(VisitId(visit_id)).await {
        Ok(visit) => (StatusCode::OK, axum::Json(visit)).into_response(),
        Err(err) => visit_error_response(err),
    }
}

pub(crate) async fn status_handler<S, A>(
    State(api): State<Arc<VisitApi<S, A>>>,
    Path(visit_id): Path<Uuid>,
    axum::Json(update): axum::Json<StatusUpdate>,
) -> Response
where
    S: VisitStore + 'static,
    A: AvailabilityStore + 'static,
{
    match api
        .visits
        .update_visit_status(VisitId(visit_id), update.status)
        .await
    {
        Ok(visit) => (StatusCode::OK, axum::Json(visit)).into_response(),
        Err(err) => visit_error_response(err),
    }
}

pub(crate) async fn cancel_handler<S, A>(
    State(api): State<Arc<VisitApi<S, A>>>,
    Path(visit_id): Path<Uuid>,
    axum::Json(request): axum::Json<CancelRequest>,
) -> Response
where
    S: VisitStore + 'static,
    A: AvailabilityStore + 'static,
{
    match api
        .visits
        .cancel_visit(VisitId(visit_id), request.caller_role)
        .await
    {
        Ok(visit) => (StatusCode::OK, axum::Json(visit)).into_response(),
        Err(err) => visit_error_response(err),
    }
}

async fn user_visits_handler<S, A>(
    State(api): State<Arc<VisitApi<S, A>>>,
    Path(user_id): Path<Uuid>,
) -> Response
where
    S: VisitStore + 'static,
    A: AvailabilityStore + 'static,
{
    match api.visits.visits_for_user(UserId(user_id)).await {
        Ok(visits) => (StatusCode::OK, axum::Json(visits)).into_response(),
        Err(err) => visit_error_response(err),
    }
}

async fn agent_visits_handler<S, A>(
    State(api): State<Arc<VisitApi<S, A>>>,
    Path(agent_id): Path<Uuid>,
) -> Response
where
    S: VisitStore + 'static,
    A: AvailabilityStore + 'static,
{
    match api.visits.visits_for_agent(AgentId(agent_id)).await {
        Ok(visits) => (StatusCode::OK, axum::Json(visits)).into_response(),
        Err(err) => visit_error_response(err),
    }
}

async fn property_visits_handler<S, A>(
    State(api): State<Arc<VisitApi<S, A>>>,
    Path(property_id): Path<Uuid>,
) -> Response
where
    S: VisitStore + 'static,
    A: AvailabilityStore + 'static,
{
    match api.visits.visits_for_property(PropertyId(property_id)).await {
        Ok(visits) => (StatusCode::OK, axum::Json(visits)).into_response(),
        Err(err) => visit_error_response(err),
    }
}

pub(crate) async fn declare_slot_handler<S, A>(
    State(api): State<Arc<VisitApi<S, A>>>,
    Path(agent_id): Path<Uuid>,
    axum::Json(request): axum::Json<SlotRequest>,
) -> Response
where
    S: VisitStore + 'static,
    A: AvailabilityStore + 'static,
{
    match api
        .availability
        .declare_slot(AgentId(agent_id), request.start_time, request.end_time)
        .await
    {
        Ok(slot) => (StatusCode::CREATED, axum::Json(slot)).into_response(),
        Err(err) => availability_error_response(err),
    }
}

async fn list_slots_handler<S, A>(
    State(api): State<Arc<VisitApi<S, A>>>,
    Path(agent_id): Path<Uuid>,
) -> Response
where
    S: VisitStore + 'static,
    A: AvailabilityStore + 'static,
{
    match api.availability.slots_for_agent(AgentId(agent_id)).await {
        Ok(slots) => (StatusCode::OK, axum::Json(slots)).into_response(),
        Err(err) => availability_error_response(err),
    }
}

async fn remove_slot_handler<S, A>(
    State(api): State<Arc<VisitApi<S, A>>>,
    Path(slot_id): Path<Uuid>,
) -> Response
where
    S: VisitStore + 'static,
    A: AvailabilityStore + 'static,
{
    match api.availability.remove_slot(SlotId(slot_id)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => availability_error_response(err),
    }
}

pub(crate) fn rejection_status(rejection: &VisitRejection) -> StatusCode {
    match rejection {
        VisitRejection::MissingInterval
        | VisitRejection::InvalidInterval
        | VisitRejection::TooSoon { .. }
        | VisitRejection::AgentNotAvailable => StatusCode::UNPROCESSABLE_ENTITY,
        VisitRejection::UserOverlap { .. }
        | VisitRejection::AgentDoubleBooked { .. }
        | VisitRejection::Overbooking { .. }
        | VisitRejection::IllegalTransition { .. }
        | VisitRejection::CancellationCutoff { .. } => StatusCode::CONFLICT,
        VisitRejection::AvailabilityCheckFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,
        VisitRejection::NotFound(_) => StatusCode::NOT_FOUND,
    }
}

fn visit_error_response(err: VisitServiceError) -> Response {
    match err {
        VisitServiceError::Rejected(rejection) => error_body(
            rejection_status(&rejection),
            rejection.kind(),
            rejection.errors(),
        ),
        VisitServiceError::Repository(err) => repository_error_response(&err),
    }
}

fn availability_error_response(err: AvailabilityServiceError) -> Response {
    match err {
        AvailabilityServiceError::Rejected(rejection) => {
            let status = match rejection {
                SlotRejection::InvalidInterval => StatusCode::UNPROCESSABLE_ENTITY,
                SlotRejection::SlotOverlap { .. } => StatusCode::CONFLICT,
                SlotRejection::SlotNotFound(_) => StatusCode::NOT_FOUND,
            };
            let mut errors = BTreeMap::new();
            errors.insert(rejection.field().to_string(), rejection.to_string());
            error_body(status, rejection.kind(), errors)
        }
        AvailabilityServiceError::Repository(err) => repository_error_response(&err),
    }
}

fn repository_error_response(err: &RepositoryError) -> Response {
    let (status, kind) = match err {
        RepositoryError::LockTimeout => (StatusCode::SERVICE_UNAVAILABLE, "LOCK_TIMEOUT"),
        RepositoryError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        RepositoryError::Conflict => (StatusCode::CONFLICT, "CONFLICT"),
        RepositoryError::Unavailable(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "REPOSITORY_UNAVAILABLE")
        }
    };
    let mut errors = BTreeMap::new();
    errors.insert("repository".to_string(), err.to_string());
    error_body(status, kind, errors)
}

fn error_body(status: StatusCode, kind: &str, errors: BTreeMap<String, String>) -> Response {
    let payload = json!({
        "error": kind,
        "errors": errors,
    });
    (status, axum::Json(payload)).into_response()
}
