use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::claims::ClaimDecision;
use super::commands::{ClaimSubmission, SubscriptionApplication, VehicleRegistration};
use super::domain::{Cadence, ClaimId, SubscriptionId, VehicleId};
use super::ledger::PaymentRequest;
use super::lifecycle::TerminationReason;
use super::repository::{LifecycleNotifier, RecordStore};
use super::service::{EngineError, ErrorKind, SubscriptionEngine};

type Engine<S, N> = Arc<SubscriptionEngine<S, N>>;

/// Router exposing the engine operations to the presentation layer.
pub fn subscription_router<S, N>(engine: Engine<S, N>) -> Router
where
    S: RecordStore + 'static,
    N: LifecycleNotifier + 'static,
{
    Router::new()
        .route("/api/v1/vehicles", post(register_vehicle_handler::<S, N>))
        .route("/api/v1/vehicles/:vehicle_id", get(vehicle_handler::<S, N>))
        .route(
            "/api/v1/vehicles/:vehicle_id/quote",
            get(quote_handler::<S, N>),
        )
        .route(
            "/api/v1/subscriptions",
            post(open_subscription_handler::<S, N>),
        )
        .route(
            "/api/v1/subscriptions/:subscription_id",
            get(subscription_handler::<S, N>),
        )
        .route(
            "/api/v1/subscriptions/:subscription_id/kyc",
            post(kyc_handler::<S, N>),
        )
        .route(
            "/api/v1/subscriptions/:subscription_id/reject",
            post(reject_handler::<S, N>),
        )
        .route(
            "/api/v1/subscriptions/:subscription_id/payments",
            post(record_payment_handler::<S, N>).get(list_payments_handler::<S, N>),
        )
        .route(
            "/api/v1/subscriptions/:subscription_id/evaluate",
            post(evaluate_handler::<S, N>),
        )
        .route(
            "/api/v1/subscriptions/:subscription_id/buyout",
            get(buyout_quote_handler::<S, N>),
        )
        .route(
            "/api/v1/subscriptions/:subscription_id/complete",
            post(complete_handler::<S, N>),
        )
        .route(
            "/api/v1/subscriptions/:subscription_id/collections",
            post(collections_handler::<S, N>),
        )
        .route(
            "/api/v1/subscriptions/:subscription_id/terminate",
            post(terminate_handler::<S, N>),
        )
        .route("/api/v1/claims", post(submit_claim_handler::<S, N>))
        .route(
            "/api/v1/claims/:claim_id/review",
            post(review_claim_handler::<S, N>),
        )
        .route(
            "/api/v1/claims/:claim_id/decision",
            post(decide_claim_handler::<S, N>),
        )
        .with_state(engine)
}

/// HTTP status for an engine failure.
pub fn engine_error_status(error: &EngineError) -> StatusCode {
    match error {
        EngineError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::StateConflict { .. } => StatusCode::CONFLICT,
        EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
        EngineError::Persistence(_) => match error.kind() {
            ErrorKind::RuleViolation => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        },
    }
}

pub(crate) fn engine_error_response(error: EngineError) -> Response {
    let status = engine_error_status(&error);
    let payload = json!({
        "error": error.to_string(),
        "kind": error.kind(),
        "retryable": error.is_retryable(),
    });
    (status, Json(payload)).into_response()
}

fn respond<T: Serialize>(status: StatusCode, result: Result<T, EngineError>) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(error) => engine_error_response(error),
    }
}

fn validation(message: String) -> Response {
    engine_error_response(EngineError::Validation(message))
}

#[derive(Debug, Deserialize)]
pub(crate) struct QuoteParams {
    cadence: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct KycUpdate {
    verified: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CollectionsSignal {
    event: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TerminationRequest {
    reason: TerminationReason,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DecisionRequest {
    decision: String,
}

pub(crate) async fn register_vehicle_handler<S, N>(
    State(engine): State<Engine<S, N>>,
    Json(registration): Json<VehicleRegistration>,
) -> Response
where
    S: RecordStore + 'static,
    N: LifecycleNotifier + 'static,
{
    respond(
        StatusCode::CREATED,
        engine.register_vehicle(registration).await,
    )
}

pub(crate) async fn vehicle_handler<S, N>(
    State(engine): State<Engine<S, N>>,
    Path(vehicle_id): Path<String>,
) -> Response
where
    S: RecordStore + 'static,
    N: LifecycleNotifier + 'static,
{
    respond(
        StatusCode::OK,
        engine.get_vehicle(&VehicleId(vehicle_id)).await,
    )
}

pub(crate) async fn quote_handler<S, N>(
    State(engine): State<Engine<S, N>>,
    Path(vehicle_id): Path<String>,
    Query(params): Query<QuoteParams>,
) -> Response
where
    S: RecordStore + 'static,
    N: LifecycleNotifier + 'static,
{
    let cadence = match params.cadence.as_deref() {
        None => Cadence::Weekly,
        Some(raw) => match Cadence::parse(raw) {
            Some(cadence) => cadence,
            None => return validation(format!("unknown cadence {raw:?}")),
        },
    };
    let result = engine
        .quote_price(&VehicleId(vehicle_id.clone()), cadence)
        .await
        .map(|charge| {
            json!({
                "vehicle_id": vehicle_id,
                "cadence": cadence.label(),
                "base": charge.base,
                "tax": charge.tax,
                "total": charge.total,
            })
        });
    respond(StatusCode::OK, result)
}

pub(crate) async fn open_subscription_handler<S, N>(
    State(engine): State<Engine<S, N>>,
    Json(application): Json<SubscriptionApplication>,
) -> Response
where
    S: RecordStore + 'static,
    N: LifecycleNotifier + 'static,
{
    respond(
        StatusCode::CREATED,
        engine.open_subscription(application).await,
    )
}

pub(crate) async fn subscription_handler<S, N>(
    State(engine): State<Engine<S, N>>,
    Path(subscription_id): Path<String>,
) -> Response
where
    S: RecordStore + 'static,
    N: LifecycleNotifier + 'static,
{
    respond(
        StatusCode::OK,
        engine
            .get_subscription(&SubscriptionId(subscription_id))
            .await,
    )
}

pub(crate) async fn kyc_handler<S, N>(
    State(engine): State<Engine<S, N>>,
    Path(subscription_id): Path<String>,
    Json(update): Json<KycUpdate>,
) -> Response
where
    S: RecordStore + 'static,
    N: LifecycleNotifier + 'static,
{
    respond(
        StatusCode::OK,
        engine
            .set_kyc_verification(&SubscriptionId(subscription_id), update.verified)
            .await,
    )
}

pub(crate) async fn reject_handler<S, N>(
    State(engine): State<Engine<S, N>>,
    Path(subscription_id): Path<String>,
) -> Response
where
    S: RecordStore + 'static,
    N: LifecycleNotifier + 'static,
{
    respond(
        StatusCode::OK,
        engine
            .reject_subscription(&SubscriptionId(subscription_id))
            .await,
    )
}

pub(crate) async fn record_payment_handler<S, N>(
    State(engine): State<Engine<S, N>>,
    Path(subscription_id): Path<String>,
    Json(request): Json<PaymentRequest>,
) -> Response
where
    S: RecordStore + 'static,
    N: LifecycleNotifier + 'static,
{
    respond(
        StatusCode::CREATED,
        engine
            .record_payment(&SubscriptionId(subscription_id), request)
            .await,
    )
}

pub(crate) async fn list_payments_handler<S, N>(
    State(engine): State<Engine<S, N>>,
    Path(subscription_id): Path<String>,
) -> Response
where
    S: RecordStore + 'static,
    N: LifecycleNotifier + 'static,
{
    respond(
        StatusCode::OK,
        engine.list_payments(&SubscriptionId(subscription_id)).await,
    )
}

pub(crate) async fn evaluate_handler<S, N>(
    State(engine): State<Engine<S, N>>,
    Path(subscription_id): Path<String>,
) -> Response
where
    S: RecordStore + 'static,
    N: LifecycleNotifier + 'static,
{
    respond(
        StatusCode::OK,
        engine
            .evaluate_subscription(&SubscriptionId(subscription_id))
            .await,
    )
}

pub(crate) async fn buyout_quote_handler<S, N>(
    State(engine): State<Engine<S, N>>,
    Path(subscription_id): Path<String>,
) -> Response
where
    S: RecordStore + 'static,
    N: LifecycleNotifier + 'static,
{
    respond(
        StatusCode::OK,
        engine.quote_buyout(&SubscriptionId(subscription_id)).await,
    )
}

pub(crate) async fn complete_handler<S, N>(
    State(engine): State<Engine<S, N>>,
    Path(subscription_id): Path<String>,
) -> Response
where
    S: RecordStore + 'static,
    N: LifecycleNotifier + 'static,
{
    respond(
        StatusCode::OK,
        engine
            .complete_subscription(&SubscriptionId(subscription_id))
            .await,
    )
}

pub(crate) async fn collections_handler<S, N>(
    State(engine): State<Engine<S, N>>,
    Path(subscription_id): Path<String>,
    Json(signal): Json<CollectionsSignal>,
) -> Response
where
    S: RecordStore + 'static,
    N: LifecycleNotifier + 'static,
{
    respond(
        StatusCode::OK,
        engine
            .signal_collections(&SubscriptionId(subscription_id), &signal.event)
            .await,
    )
}

pub(crate) async fn terminate_handler<S, N>(
    State(engine): State<Engine<S, N>>,
    Path(subscription_id): Path<String>,
    Json(request): Json<TerminationRequest>,
) -> Response
where
    S: RecordStore + 'static,
    N: LifecycleNotifier + 'static,
{
    respond(
        StatusCode::OK,
        engine
            .terminate_subscription(&SubscriptionId(subscription_id), request.reason)
            .await,
    )
}

pub(crate) async fn submit_claim_handler<S, N>(
    State(engine): State<Engine<S, N>>,
    Json(submission): Json<ClaimSubmission>,
) -> Response
where
    S: RecordStore + 'static,
    N: LifecycleNotifier + 'static,
{
    respond(StatusCode::CREATED, engine.submit_claim(submission).await)
}

pub(crate) async fn review_claim_handler<S, N>(
    State(engine): State<Engine<S, N>>,
    Path(claim_id): Path<String>,
) -> Response
where
    S: RecordStore + 'static,
    N: LifecycleNotifier + 'static,
{
    respond(
        StatusCode::OK,
        engine.start_claim_review(&ClaimId(claim_id)).await,
    )
}

pub(crate) async fn decide_claim_handler<S, N>(
    State(engine): State<Engine<S, N>>,
    Path(claim_id): Path<String>,
    Json(request): Json<DecisionRequest>,
) -> Response
where
    S: RecordStore + 'static,
    N: LifecycleNotifier + 'static,
{
    let Some(decision) = ClaimDecision::parse(&request.decision) else {
        return validation(format!(
            "decision must be approved or denied (got {:?})",
            request.decision
        ));
    };
    respond(
        StatusCode::OK,
        engine.decide_claim(&ClaimId(claim_id), decision).await,
    )
}
