//! Request handlers

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use sg_core::{ConnectionState, DispatchError, OutboundMessage};

use crate::pairing::PairingView;
use crate::state::GatewayState;
use crate::supervisor::SupervisorError;

/// Error response with a JSON body
#[derive(Debug)]
pub(super) struct ApiError {
    status: StatusCode,
    body: Value,
}

impl ApiError {
    fn new(status: StatusCode, body: Value) -> Self {
        Self { status, body }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, json!({ "error": message.into() }))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Validation { .. } => Self::bad_request(err.to_string()),
            DispatchError::ServiceUnavailable { status } => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": "not connected", "status": status }),
            ),
            DispatchError::Transport(e) => Self::new(
                StatusCode::BAD_GATEWAY,
                json!({ "error": "Failed to send message", "detail": e.to_string() }),
            ),
        }
    }
}

impl From<SupervisorError> for ApiError {
    fn from(err: SupervisorError) -> Self {
        let status = match err {
            SupervisorError::Stopped => StatusCode::SERVICE_UNAVAILABLE,
            SupervisorError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, json!({ "error": err.to_string() }))
    }
}

/// Body of `POST /send`
#[derive(Debug, Deserialize)]
pub(super) struct SendRequest {
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub(super) async fn send(
    State(state): State<Arc<GatewayState>>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload.map_err(|e| {
        tracing::debug!("Rejected send body: {}", e);
        ApiError::bad_request(format!("Invalid request body: {}", e.body_text()))
    })?;

    let message = OutboundMessage::new(
        request.to.unwrap_or_default(),
        request.message.unwrap_or_default(),
    );
    let receipt = state.dispatcher.send(message).await?;

    let mut body = json!({ "success": true, "jid": receipt.recipient_address });
    if let Some(id) = receipt.message_id {
        body["messageId"] = Value::String(id);
    }
    Ok(Json(body))
}

pub(super) async fn qr(State(state): State<Arc<GatewayState>>) -> Result<Json<Value>, ApiError> {
    let body = match state.pairing.current().await {
        PairingView::Connected => json!({ "status": "connected", "message": "Already paired" }),
        PairingView::NoChallengeYet {
            status: ConnectionState::Disconnected,
        } => json!({
            "status": ConnectionState::Disconnected,
            "message": "Gateway is disconnected, POST /connect to start pairing",
        }),
        PairingView::NoChallengeYet { status } => json!({
            "status": status,
            "message": "QR code not available yet, try again in a few seconds",
        }),
        PairingView::Pending(challenge) => {
            let qr = state.renderer.render(&challenge.payload).map_err(|e| {
                tracing::warn!("Failed to render pairing challenge #{}: {}", challenge.sequence, e);
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Failed to render QR code, try again" }),
                )
            })?;
            json!({
                "status": "waiting_for_scan",
                "qr": qr,
                "sequence": challenge.sequence,
            })
        }
    };
    Ok(Json(body))
}

pub(super) async fn status(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    Json(json!({ "status": state.status.status() }))
}

pub(super) async fn connect(
    State(state): State<Arc<GatewayState>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let status = state.supervisor.start().await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": status }))))
}

pub(super) async fn logout(
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<Value>, ApiError> {
    let status = state.supervisor.logout().await?;
    tracing::info!("Operator logout completed");
    Ok(Json(json!({ "status": status })))
}

pub(super) async fn health() -> &'static str {
    "ok"
}
