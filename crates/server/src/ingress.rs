//! Slack Events API and interactivity endpoints.
//!
//! Every request is checked against the app's signing secret, acknowledged
//! straight away, and dispatched on its own task.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Form, FromRequest, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use knowbot_slack::events::{deliver_response, EventContext, EventDispatcher, SlackEnvelope};
use knowbot_slack::gateway::MessagingGateway;
use knowbot_slack::payload::{parse_events_api, parse_interaction, InboundPayload};
use knowbot_slack::signature::verify_request;

const MAX_BODY_BYTES: usize = 1024 * 1024;
const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
const SIGNATURE_HEADER: &str = "x-slack-signature";
const RETRY_HEADER: &str = "x-slack-retry-num";

#[derive(Clone)]
pub struct IngressState {
    dispatcher: Arc<EventDispatcher>,
    gateway: Arc<dyn MessagingGateway>,
    signing_secret: SecretString,
}

impl IngressState {
    pub fn new(
        dispatcher: Arc<EventDispatcher>,
        gateway: Arc<dyn MessagingGateway>,
        signing_secret: SecretString,
    ) -> Self {
        Self { dispatcher, gateway, signing_secret }
    }

    fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), Response> {
        let timestamp = header(headers, TIMESTAMP_HEADER);
        let signature = header(headers, SIGNATURE_HEADER);
        verify_request(
            self.signing_secret.expose_secret().as_bytes(),
            timestamp,
            signature,
            body,
            Utc::now().timestamp(),
        )
        .map_err(|error| {
            warn!(
                event_name = "ingress.slack.signature_rejected",
                error = %error,
                "rejected unsigned or stale slack request"
            );
            StatusCode::UNAUTHORIZED.into_response()
        })
    }

    fn spawn_dispatch(&self, envelope: SlackEnvelope) {
        let dispatcher = self.dispatcher.clone();
        let gateway = self.gateway.clone();
        tokio::spawn(async move {
            let context = EventContext { correlation_id: envelope.envelope_id.clone() };
            match dispatcher.dispatch(&envelope, &context).await {
                Ok(result) => {
                    if let Err(error) = deliver_response(gateway.as_ref(), &envelope, &result).await
                    {
                        warn!(
                            event_name = "ingress.slack.response_failed",
                            correlation_id = %context.correlation_id,
                            error = %error,
                            "failed to post handler response"
                        );
                    }
                }
                Err(error) => warn!(
                    event_name = "ingress.slack.dispatch_failed",
                    correlation_id = %context.correlation_id,
                    error = %error,
                    "event dispatch failed"
                ),
            }
        });
    }
}

pub fn router(state: IngressState) -> Router {
    Router::new()
        .route("/slack/events", post(events))
        .route("/slack/interactions", post(interactions))
        .with_state(state)
}

async fn events(State(state): State<IngressState>, headers: HeaderMap, body: Bytes) -> Response {
    if let Err(rejection) = state.verify(&headers, &body) {
        return rejection;
    }

    match parse_events_api(&body) {
        Ok(InboundPayload::UrlVerification { challenge }) => {
            info!(event_name = "ingress.slack.url_verified", "answered url verification");
            Json(json!({ "challenge": challenge })).into_response()
        }
        Ok(InboundPayload::Event(envelope)) => {
            // We ack within Slack's window, so a retry would only repeat work.
            if headers.contains_key(RETRY_HEADER) {
                debug!(
                    event_name = "ingress.slack.retry_skipped",
                    envelope_id = %envelope.envelope_id,
                    "skipping redelivered event"
                );
                return StatusCode::OK.into_response();
            }
            info!(
                event_name = "ingress.slack.envelope_received",
                envelope_id = %envelope.envelope_id,
                event_type = ?envelope.event.event_type(),
                correlation_id = %envelope.envelope_id,
                "received slack event"
            );
            state.spawn_dispatch(envelope);
            StatusCode::OK.into_response()
        }
        Ok(InboundPayload::Ignored { reason }) => {
            debug!(event_name = "ingress.slack.ignored", reason, "ignored slack event");
            StatusCode::OK.into_response()
        }
        Err(error) => {
            warn!(event_name = "ingress.slack.malformed", error = %error, "malformed events payload");
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct InteractionForm {
    payload: String,
}

async fn interactions(State(state): State<IngressState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::PAYLOAD_TOO_LARGE.into_response(),
    };
    if let Err(rejection) = state.verify(&parts.headers, &bytes) {
        return rejection;
    }

    let request = Request::from_parts(parts, Body::from(bytes));
    let Form(form) = match Form::<InteractionForm>::from_request(request, &()).await {
        Ok(form) => form,
        Err(rejection) => return rejection.into_response(),
    };

    let correlation_id = Uuid::new_v4().to_string();
    match parse_interaction(&form.payload, &correlation_id) {
        Ok(InboundPayload::Event(envelope)) => {
            info!(
                event_name = "ingress.slack.interaction_received",
                correlation_id = %correlation_id,
                event_type = ?envelope.event.event_type(),
                "received slack interaction"
            );
            state.spawn_dispatch(envelope);
            StatusCode::OK.into_response()
        }
        Ok(_) => StatusCode::OK.into_response(),
        Err(error) => {
            warn!(
                event_name = "ingress.slack.malformed",
                correlation_id = %correlation_id,
                error = %error,
                "malformed interaction payload"
            );
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers.get(name).and_then(|value| value.to_str().ok()).unwrap_or_default()
}
