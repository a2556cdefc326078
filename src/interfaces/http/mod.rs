//! Inbound HTTP surface: the carrier's USSD callback, the ledger's settlement
//! webhook and a liveness probe.

use crate::application::audit::AuditEmitter;
use crate::application::engine::{UssdEngine, UssdRequest};
use crate::domain::audit::SettlementStatus;
use crate::domain::ports::AuditLogHandle;
use crate::error::GatewayError;
use axum::extract::{FromRequest, Request, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::middleware::{Next, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const TOKEN_HEADER: &str = "x-gateway-token";

#[derive(Clone)]
pub struct AppState {
    engine: Arc<UssdEngine>,
    audit: AuditEmitter,
    audit_log: AuditLogHandle,
    secret_digest: Option<[u8; 32]>,
}

impl AppState {
    pub fn new(
        engine: Arc<UssdEngine>,
        audit: AuditEmitter,
        audit_log: AuditLogHandle,
        inbound_secret: Option<String>,
    ) -> Self {
        Self {
            engine,
            audit,
            audit_log,
            secret_digest: inbound_secret.as_deref().map(digest),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/ussd", post(ussd))
        .route("/webhooks/transfer", post(settlement))
        .route_layer(from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .with_state(state)
}

/// Carrier callback body. Carriers post forms; some aggregators post JSON.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UssdCallback {
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl From<UssdCallback> for UssdRequest {
    fn from(callback: UssdCallback) -> Self {
        UssdRequest {
            phone: callback.phone_number,
            text: callback.text,
            carrier_session_id: callback.session_id.filter(|id| !id.is_empty()),
        }
    }
}

impl<S> FromRequest<S> for UssdCallback
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/json"));

        if is_json {
            let Json(callback) = Json::<UssdCallback>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            Ok(callback)
        } else {
            let Form(callback) = Form::<UssdCallback>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            Ok(callback)
        }
    }
}

async fn ussd(State(state): State<AppState>, callback: UssdCallback) -> String {
    let handled = state.engine.handle(callback.into()).await;
    let body = handled.reply.to_string();
    // The reply is final before any audit write is scheduled.
    state.audit.emit(handled.audit);
    body
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettlementNotice {
    reference: String,
    status: SettlementStatus,
    #[serde(default)]
    transaction_reference: Option<String>,
}

async fn settlement(
    State(state): State<AppState>,
    Json(notice): Json<SettlementNotice>,
) -> Result<StatusCode, GatewayError> {
    let known = state
        .audit_log
        .mark_settlement(
            &notice.reference,
            notice.status,
            notice.transaction_reference,
        )
        .await?;
    if known {
        info!(reference = %notice.reference, status = ?notice.status, "Settlement recorded");
        Ok(StatusCode::OK)
    } else {
        warn!(reference = %notice.reference, "Settlement for unknown reference");
        Ok(StatusCode::NOT_FOUND)
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn require_token(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.secret_digest else {
        return next.run(request).await;
    };
    let presented = request
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(digest);
    if presented == Some(expected) {
        next.run(request).await
    } else {
        debug!(path = %request.uri().path(), "Rejected unauthenticated request");
        (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
    }
}

fn digest(value: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(value.as_bytes()));
    out
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            GatewayError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            other => {
                error!(error = %other, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, message).into_response()
    }
}
