//! Decoding of Slack's inbound JSON into [`SlackEnvelope`]s.
//!
//! The same shapes arrive over HTTP (Events API and interactivity requests)
//! and inside socket-mode frames.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::events::{BlockActionEvent, MentionEvent, MessageEvent, SlackEnvelope, SlackEvent};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("malformed slack payload: {0}")]
    Malformed(String),
    #[error("interaction payload has no actions")]
    NoActions,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundPayload {
    UrlVerification { challenge: String },
    Event(SlackEnvelope),
    Ignored { reason: &'static str },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum EventsApiBody {
    UrlVerification {
        challenge: String,
    },
    EventCallback {
        #[serde(default)]
        team_id: String,
        #[serde(default)]
        event_id: String,
        event: InnerEvent,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct InnerEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    channel_type: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    subtype: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InteractionBody {
    #[serde(rename = "type")]
    interaction_type: String,
    #[serde(default)]
    team: Option<IdRef>,
    user: IdRef,
    #[serde(default)]
    channel: Option<IdRef>,
    #[serde(default)]
    actions: Vec<ActionBody>,
}

#[derive(Debug, Deserialize)]
struct IdRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ActionBody {
    action_id: String,
    #[serde(default)]
    block_id: String,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SocketFrame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
}

/// A decoded socket-mode frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocketFrameKind {
    Hello,
    Disconnect,
    /// Needs an acknowledgement carrying `envelope_id`, whatever the payload.
    Envelope { envelope_id: String, payload: InboundPayload },
}

pub fn parse_events_api(body: &[u8]) -> Result<InboundPayload, PayloadError> {
    let parsed: EventsApiBody =
        serde_json::from_slice(body).map_err(|error| PayloadError::Malformed(error.to_string()))?;
    Ok(match parsed {
        EventsApiBody::UrlVerification { challenge } => {
            InboundPayload::UrlVerification { challenge }
        }
        EventsApiBody::EventCallback { team_id, event_id, event } => {
            event_callback(team_id, event_id, event)
        }
        EventsApiBody::Other => InboundPayload::Ignored { reason: "unsupported body type" },
    })
}

/// Decodes the JSON carried in an interactivity request's `payload` field.
pub fn parse_interaction(payload: &str, envelope_id: &str) -> Result<InboundPayload, PayloadError> {
    let parsed: InteractionBody =
        serde_json::from_str(payload).map_err(|error| PayloadError::Malformed(error.to_string()))?;
    interaction(parsed, envelope_id)
}

pub fn parse_socket_frame(text: &str) -> Result<SocketFrameKind, PayloadError> {
    let frame: SocketFrame =
        serde_json::from_str(text).map_err(|error| PayloadError::Malformed(error.to_string()))?;

    match frame.frame_type.as_str() {
        "hello" => return Ok(SocketFrameKind::Hello),
        "disconnect" => return Ok(SocketFrameKind::Disconnect),
        _ => {}
    }

    let envelope_id = frame
        .envelope_id
        .ok_or_else(|| PayloadError::Malformed("socket frame without envelope_id".to_owned()))?;
    let payload = match (frame.frame_type.as_str(), frame.payload) {
        ("events_api", Some(payload)) => {
            let body: EventsApiBody = serde_json::from_value(payload)
                .map_err(|error| PayloadError::Malformed(error.to_string()))?;
            match body {
                EventsApiBody::EventCallback { team_id, event, .. } => {
                    event_callback(team_id, envelope_id.clone(), event)
                }
                _ => InboundPayload::Ignored { reason: "unsupported events_api body" },
            }
        }
        ("interactive", Some(payload)) => {
            let body: InteractionBody = serde_json::from_value(payload)
                .map_err(|error| PayloadError::Malformed(error.to_string()))?;
            interaction(body, &envelope_id)?
        }
        _ => InboundPayload::Ignored { reason: "unsupported socket frame" },
    };

    Ok(SocketFrameKind::Envelope { envelope_id, payload })
}

fn event_callback(team_id: String, event_id: String, event: InnerEvent) -> InboundPayload {
    if event.bot_id.is_some() || event.subtype.is_some() {
        return InboundPayload::Ignored { reason: "bot or subtype message" };
    }
    let (Some(user_id), Some(channel_id)) = (event.user, event.channel) else {
        return InboundPayload::Ignored { reason: "event without user or channel" };
    };
    let text = event.text.unwrap_or_default();

    let slack_event = match (event.event_type.as_str(), event.channel_type.as_deref()) {
        ("message", Some("im")) => SlackEvent::DirectMessage(MessageEvent {
            team_id,
            channel_id,
            user_id,
            text,
            ts: event.ts.unwrap_or_default(),
        }),
        ("app_mention", _) => {
            let direct = text.trim_start().starts_with("<@");
            SlackEvent::Mention(MentionEvent { team_id, channel_id, user_id, text, direct })
        }
        ("message", _) => return InboundPayload::Ignored { reason: "non-im message" },
        (other, _) => SlackEvent::Unsupported { event_type: other.to_owned() },
    };

    InboundPayload::Event(SlackEnvelope { envelope_id: event_id, event: slack_event })
}

fn interaction(body: InteractionBody, envelope_id: &str) -> Result<InboundPayload, PayloadError> {
    if body.interaction_type != "block_actions" {
        return Ok(InboundPayload::Ignored { reason: "unsupported interaction type" });
    }
    let action = body.actions.into_iter().next().ok_or(PayloadError::NoActions)?;
    let channel_id = body.channel.map(|channel| channel.id).unwrap_or_default();

    Ok(InboundPayload::Event(SlackEnvelope {
        envelope_id: envelope_id.to_owned(),
        event: SlackEvent::BlockAction(BlockActionEvent {
            team_id: body.team.map(|team| team.id).unwrap_or_default(),
            channel_id,
            user_id: body.user.id,
            block_id: action.block_id,
            action_id: action.action_id,
            value: action.value,
        }),
    }))
}
