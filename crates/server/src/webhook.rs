use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use intake_core::{ApplicationError, DialogueEngine, DialogueError, InterfaceError};
use intake_whatsapp::WebhookPayload;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const ONLINE_BANNER: &str = "CHATBOT OFICINA SULLATO ONLINE";
pub const EVENT_RECEIVED: &str = "EVENT_RECEIVED";
pub const IGNORED: &str = "IGNORADO";
pub const DISPATCH_OK: &str = "DISPARO_OK";

#[derive(Clone)]
pub struct WebhookState {
    engine: Arc<DialogueEngine>,
}

impl WebhookState {
    pub fn new(engine: Arc<DialogueEngine>) -> Self {
        Self { engine }
    }
}

pub fn router(engine: Arc<DialogueEngine>) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/webhook", post(receive))
        .with_state(WebhookState::new(engine))
}

async fn banner() -> &'static str {
    ONLINE_BANNER
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    correlation_id: String,
}

struct WebhookError(InterfaceError);

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.0.user_message(),
            message: self.0.to_string(),
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Image push requested by the spreadsheet side: `{numero, imagem_url}`.
#[derive(Debug, Deserialize)]
struct MediaDispatch {
    #[serde(rename = "numero")]
    contact_id: String,
    #[serde(rename = "imagem_url")]
    image_url: String,
}

impl MediaDispatch {
    fn matches(raw: &Value) -> bool {
        raw.get("numero").is_some() && raw.get("imagem_url").is_some()
    }
}

fn invalid_payload(correlation_id: &str, message: String) -> WebhookError {
    warn!(
        event_name = "webhook.payload.invalid",
        correlation_id = %correlation_id,
        error = %message,
        "webhook body is not a valid notification"
    );
    WebhookError(ApplicationError::InvalidPayload(message).into_interface(correlation_id))
}

/// Accepts one Cloud API notification, or a media dispatch request. Every
/// message in a notification is handed to the engine; the first failure
/// decides the response so the platform redelivers, and already-processed
/// messages are dropped as duplicates then.
async fn receive(
    State(state): State<WebhookState>,
    body: Bytes,
) -> Result<(StatusCode, &'static str), WebhookError> {
    let correlation_id = Uuid::new_v4().to_string();

    let raw: Value = serde_json::from_slice(&body)
        .map_err(|error| invalid_payload(&correlation_id, error.to_string()))?;
    if MediaDispatch::matches(&raw) {
        return dispatch_media(&state, raw, &correlation_id).await;
    }

    let payload: WebhookPayload = serde_json::from_value(raw)
        .map_err(|error| invalid_payload(&correlation_id, error.to_string()))?;

    let batch = payload.decode();
    for skipped in &batch.skipped {
        info!(
            event_name = "webhook.message.skipped",
            correlation_id = %correlation_id,
            contact_id = %skipped.contact_id,
            message_id = %skipped.message_id,
            kind = %skipped.kind,
            "unsupported message type ignored"
        );
    }
    if batch.events.is_empty() {
        debug!(
            event_name = "webhook.batch.empty",
            correlation_id = %correlation_id,
            status_updates = batch.status_updates,
            "notification carried no dialogue input"
        );
        return Ok((StatusCode::OK, IGNORED));
    }

    let mut first_failure: Option<DialogueError> = None;
    for event in batch.events {
        let contact_id = event.contact_id.clone();
        match state.engine.handle(event).await {
            Ok(prompts) => debug!(
                event_name = "webhook.event.handled",
                correlation_id = %correlation_id,
                contact_id = %contact_id,
                prompt_count = prompts.len(),
                "inbound event handled"
            ),
            Err(failure) => {
                error!(
                    event_name = "webhook.event.failed",
                    correlation_id = %correlation_id,
                    contact_id = %contact_id,
                    error = %failure,
                    "dialogue engine failed to handle event"
                );
                first_failure.get_or_insert(failure);
            }
        }
    }

    match first_failure {
        None => Ok((StatusCode::OK, EVENT_RECEIVED)),
        Some(failure) => {
            Err(WebhookError(ApplicationError::from(failure).into_interface(correlation_id)))
        }
    }
}

async fn dispatch_media(
    state: &WebhookState,
    raw: Value,
    correlation_id: &str,
) -> Result<(StatusCode, &'static str), WebhookError> {
    let dispatch: MediaDispatch = serde_json::from_value(raw)
        .map_err(|error| invalid_payload(correlation_id, error.to_string()))?;
    let contact_id = dispatch.contact_id.trim();
    if contact_id.is_empty() {
        return Err(invalid_payload(correlation_id, "`numero` is empty".to_string()));
    }

    match state.engine.gateway().send_image(contact_id, &dispatch.image_url).await {
        Ok(()) => {
            info!(
                event_name = "webhook.media.dispatched",
                correlation_id = %correlation_id,
                contact_id = %contact_id,
                "image dispatched"
            );
            Ok((StatusCode::OK, DISPATCH_OK))
        }
        Err(failure) => {
            error!(
                event_name = "webhook.media.failed",
                correlation_id = %correlation_id,
                contact_id = %contact_id,
                error = %failure,
                "image dispatch failed"
            );
            Err(WebhookError(
                ApplicationError::Integration(failure.to_string()).into_interface(correlation_id),
            ))
        }
    }
}
