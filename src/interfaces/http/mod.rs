//! HTTP surface.
//!
//! ## Endpoints
//!
//! Public:
//! - `GET /payment/verify/{token}` - verification page, always 200
//! - `POST /payment/verify/api/{token}` - verification as JSON
//! - `POST /payment/qr/status/{token}` - status check, records nothing
//! - `GET /payment/qr/{token}` - QR code for the verification URL (SVG)
//!
//! Internal (no CORS; the acting identity comes from the request body, so
//! these must only be reachable through the authenticating gateway):
//! - `POST /api/payments` - register a draft payment
//! - `GET /api/payments/{id}` - fetch a payment
//! - `POST /api/payments/{id}/token` - issue (or return) the verification token
//! - `POST /api/payments/{id}/transition` - apply a workflow action
//! - `GET /api/payments/{id}/audit-trail` - approval history
//! - `GET /api/payments/{id}/verification-stats` - verification outcome counts
//! - `GET /api/payments/{id}/route` - states the payment will pass through
//! - `GET /health` - health check

pub mod handlers;
pub mod page;

use crate::application::Services;
use crate::error::WorkflowError;
use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub services: Services,
}

impl AppState {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    let public = Router::new()
        .route("/payment/verify/{token}", get(handlers::verify_page_handler))
        .route("/payment/verify/api/{token}", post(handlers::verify_api_handler))
        .route("/payment/qr/status/{token}", post(handlers::qr_status_handler))
        .route("/payment/qr/{token}", get(handlers::qr_image_handler))
        .layer(CorsLayer::permissive());

    let internal = Router::new()
        .route("/api/payments", post(handlers::create_payment_handler))
        .route("/api/payments/{id}", get(handlers::get_payment_handler))
        .route("/api/payments/{id}/token", post(handlers::issue_token_handler))
        .route("/api/payments/{id}/transition", post(handlers::transition_handler))
        .route("/api/payments/{id}/audit-trail", get(handlers::audit_trail_handler))
        .route(
            "/api/payments/{id}/verification-stats",
            get(handlers::verification_stats_handler),
        )
        .route("/api/payments/{id}/route", get(handlers::route_handler));

    Router::new()
        .route("/health", get(handlers::health_handler))
        .merge(public)
        .merge(internal)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// API Error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "success": false,
            "code": self.code,
            "message": self.message,
        });

        (self.status, Json(body)).into_response()
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        let status = match &err {
            WorkflowError::NotFound { .. } => StatusCode::NOT_FOUND,
            WorkflowError::ExpiredToken { .. } => StatusCode::GONE,
            WorkflowError::MalformedToken => StatusCode::BAD_REQUEST,
            WorkflowError::InvalidTransition { .. } | WorkflowError::PersistenceConflict { .. } => {
                StatusCode::CONFLICT
            }
            WorkflowError::Permission { .. } => StatusCode::FORBIDDEN,
            WorkflowError::Validation(_) | WorkflowError::FeatureDisabled(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            WorkflowError::Posting(_) => StatusCode::BAD_GATEWAY,
            WorkflowError::DuplicateCode(_)
            | WorkflowError::DuplicateToken
            | WorkflowError::Storage(_)
            | WorkflowError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %err, "request failed");
        }
        ApiError {
            status,
            code: err.code(),
            message: err.to_string(),
        }
    }
}
