//! Request handlers for the verification and workflow endpoints

use super::{ApiError, AppState, page};
use crate::application::token::{IssuedToken, TokenService};
use crate::application::verification::{QrStatus, VerificationResult};
use crate::application::workflow::{TransitionOutcome, WorkflowAction};
use crate::domain::actor::Actor;
use crate::domain::audit::{AuditTrailEntry, RequestContext, VerificationMethod, VerificationStats};
use crate::domain::payment::{ApprovalState, NewPayment, Payment, PaymentId};
use crate::error::WorkflowError;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

type AppResult<T> = Result<T, ApiError>;

/// Query parameters for the JSON verification call
#[derive(Debug, Default, Deserialize)]
pub struct VerifyQuery {
    pub method: Option<VerificationMethod>,
}

/// Request to move a payment through the workflow
#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub action: WorkflowAction,
    pub actor_id: String,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RouteQuery {
    pub actor_id: Option<String>,
}

/// Builds the audit context from proxy and client headers.
fn request_context(headers: &HeaderMap, method: VerificationMethod) -> RequestContext {
    let value_of = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    let mut context = RequestContext::public(method);
    let ip = value_of("x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .or_else(|| value_of("x-real-ip"));
    if let Some(ip) = ip {
        context = context.with_ip(ip);
    }
    if let Some(agent) = value_of(header::USER_AGENT.as_str()) {
        context = context.with_user_agent(agent);
    }
    context
}

/// Health check endpoint
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "payguard"
    }))
}

/// Human-readable verification page. Always 200.
pub async fn verify_page_handler(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> Html<String> {
    let context = request_context(&headers, VerificationMethod::QrScan);
    let result = state.services.verification.verify(&token, context).await;
    Html(page::render_verification(&result))
}

pub async fn verify_api_handler(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Query(query): Query<VerifyQuery>,
    headers: HeaderMap,
) -> Json<VerificationResult> {
    let method = query.method.unwrap_or(VerificationMethod::ApiCall);
    let context = request_context(&headers, method);
    Json(state.services.verification.verify(&token, context).await)
}

pub async fn qr_status_handler(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> AppResult<Json<QrStatus>> {
    Ok(Json(state.services.verification.status(&token).await?))
}

/// SVG QR code pointing at the verification page for `token`.
pub async fn qr_image_handler(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> AppResult<Response> {
    let tokens = &state.services.tokens;
    tokens.validate(&token).await?;
    let image = TokenService::render_code(&tokens.verification_url(&token))?;
    Ok(([(header::CONTENT_TYPE, "image/svg+xml")], image).into_response())
}

pub async fn create_payment_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewPayment>,
) -> AppResult<(StatusCode, Json<Payment>)> {
    let payment = state.services.workflow.create_payment(payload).await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

pub async fn get_payment_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> AppResult<Json<Payment>> {
    Ok(Json(state.services.workflow.get_payment(PaymentId(id)).await?))
}

pub async fn issue_token_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> AppResult<Json<IssuedToken>> {
    Ok(Json(state.services.tokens.issue_token(PaymentId(id)).await?))
}

pub async fn transition_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(request): Json<TransitionRequest>,
) -> AppResult<Json<TransitionOutcome>> {
    info!(payment = id, action = %request.action, actor = %request.actor_id, "transition requested");
    let outcome = state
        .services
        .workflow
        .transition(PaymentId(id), request.action, &request.actor_id, request.comment)
        .await?;
    Ok(Json(outcome))
}

pub async fn audit_trail_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> AppResult<Json<Vec<AuditTrailEntry>>> {
    Ok(Json(state.services.audit.get_audit_trail(PaymentId(id)).await?))
}

pub async fn verification_stats_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> AppResult<Json<VerificationStats>> {
    let payment = state.services.workflow.get_payment(PaymentId(id)).await?;
    Ok(Json(state.services.audit.verification_stats(payment.id).await?))
}

/// Routing preview for the given submitter (anonymous when omitted).
pub async fn route_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Query(query): Query<RouteQuery>,
) -> AppResult<Json<Vec<ApprovalState>>> {
    let submitter = match query.actor_id {
        Some(actor_id) => state
            .services
            .actors
            .resolve(&actor_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("actor", &actor_id))?,
        None => Actor::public(),
    };
    Ok(Json(
        state.services.workflow.route_for(PaymentId(id), &submitter).await?,
    ))
}
