use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::events::{deliver_response, DispatchError, EventContext, EventDispatcher, SlackEnvelope};
use crate::gateway::MessagingGateway;
use crate::payload::{parse_socket_frame, InboundPayload, SocketFrameKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Debug, Error)]
pub enum SocketError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError>;
    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

struct PumpFailure {
    connected: bool,
    error: TransportError,
}

pub struct SocketModeRunner {
    transport: Arc<dyn SocketTransport>,
    dispatcher: Arc<EventDispatcher>,
    gateway: Arc<dyn MessagingGateway>,
    reconnect_policy: ReconnectPolicy,
}

impl SocketModeRunner {
    pub fn new(
        transport: Arc<dyn SocketTransport>,
        dispatcher: Arc<EventDispatcher>,
        gateway: Arc<dyn MessagingGateway>,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, dispatcher, gateway, reconnect_policy }
    }

    /// Pumps envelopes until the transport closes cleanly.
    ///
    /// Consecutive connection failures are retried with backoff up to the
    /// policy's limit; a session that connected resets the count. Running out
    /// of retries is logged, never returned as an error.
    pub async fn start(&self) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.connect_and_pump(attempt).await {
                Ok(()) => return Ok(()),
                Err(PumpFailure { connected, error }) => {
                    warn!(
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %error,
                        "socket mode transport failed"
                    );

                    if connected {
                        attempt = 0;
                        continue;
                    }

                    if attempt >= self.reconnect_policy.max_retries {
                        warn!(
                            max_retries = self.reconnect_policy.max_retries,
                            "socket mode retries exhausted; continuing process without crash"
                        );
                        return Ok(());
                    }

                    let delay = self.reconnect_policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn connect_and_pump(&self, attempt: u32) -> Result<(), PumpFailure> {
        info!(attempt, "opening socket mode transport connection");
        self.transport
            .connect()
            .await
            .map_err(|error| PumpFailure { connected: false, error })?;
        info!(attempt, "socket mode transport connected");

        let failed = |error| PumpFailure { connected: true, error };
        loop {
            let Some(envelope) = self.transport.next_envelope().await.map_err(failed)? else {
                info!(attempt, "socket mode transport stream closed");
                self.transport.disconnect().await.map_err(failed)?;
                return Ok(());
            };
            let user_id = envelope.event.user_id().unwrap_or("unknown");
            let channel_id = envelope.event.reply_channel().unwrap_or("unknown");

            info!(
                event_name = "ingress.slack.envelope_received",
                envelope_id = %envelope.envelope_id,
                event_type = ?envelope.event.event_type(),
                correlation_id = %envelope.envelope_id,
                user_id,
                channel_id,
                "received slack envelope"
            );

            if let Err(error) = self.transport.acknowledge(&envelope.envelope_id).await {
                warn!(
                    event_name = "ingress.slack.ack_sent",
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %envelope.envelope_id,
                    error = %error,
                    "failed to acknowledge slack envelope"
                );
            } else {
                debug!(
                    event_name = "ingress.slack.ack_sent",
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %envelope.envelope_id,
                    "acknowledged slack envelope"
                );
            }

            let context = EventContext { correlation_id: envelope.envelope_id.clone() };
            match self.dispatcher.dispatch(&envelope, &context).await {
                Ok(result) => {
                    if let Err(error) =
                        deliver_response(self.gateway.as_ref(), &envelope, &result).await
                    {
                        warn!(
                            envelope_id = %envelope.envelope_id,
                            correlation_id = %envelope.envelope_id,
                            error = %error,
                            "failed to post handler response"
                        );
                    }
                }
                Err(error) => {
                    warn!(
                        envelope_id = %envelope.envelope_id,
                        correlation_id = %envelope.envelope_id,
                        user_id,
                        error = %error,
                        "event dispatch failed; continuing socket loop"
                    );
                }
            }
        }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Deserialize)]
struct ConnectionsOpenResponse {
    ok: bool,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Slack socket mode over a websocket opened with `apps.connections.open`.
pub struct SlackSocketTransport {
    client: Client,
    api_base_url: String,
    app_token: SecretString,
    stream: Mutex<Option<WsStream>>,
}

impl SlackSocketTransport {
    pub fn new(api_base_url: impl Into<String>, app_token: SecretString) -> Self {
        Self {
            client: Client::new(),
            api_base_url: api_base_url.into().trim_end_matches('/').to_owned(),
            app_token,
            stream: Mutex::new(None),
        }
    }

    async fn open_url(&self) -> Result<String, TransportError> {
        let response = self
            .client
            .post(format!("{}/apps.connections.open", self.api_base_url))
            .bearer_auth(self.app_token.expose_secret())
            .send()
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        let body: ConnectionsOpenResponse =
            response.json().await.map_err(|error| TransportError::Connect(error.to_string()))?;

        match (body.ok, body.url) {
            (true, Some(url)) => Ok(url),
            _ => Err(TransportError::Connect(
                body.error.unwrap_or_else(|| "apps.connections.open returned no url".to_owned()),
            )),
        }
    }

    async fn send_ack(stream: &mut WsStream, envelope_id: &str) -> Result<(), TransportError> {
        let ack = serde_json::json!({ "envelope_id": envelope_id }).to_string();
        stream
            .send(Message::Text(ack))
            .await
            .map_err(|error| TransportError::Acknowledge(error.to_string()))
    }
}

#[async_trait]
impl SocketTransport for SlackSocketTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let url = self.open_url().await?;
        let (stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        *self.stream.lock().await = Some(stream);
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError> {
        let mut guard = self.stream.lock().await;
        let stream =
            guard.as_mut().ok_or_else(|| TransportError::Receive("not connected".to_owned()))?;

        loop {
            let text = match stream.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(_))) | None => {
                    return Err(TransportError::Receive("socket closed by server".to_owned()));
                }
                Some(Ok(_)) => continue,
                Some(Err(error)) => return Err(TransportError::Receive(error.to_string())),
            };

            let frame = match parse_socket_frame(&text) {
                Ok(frame) => frame,
                Err(error) => {
                    warn!(error = %error, "unreadable socket mode frame skipped");
                    continue;
                }
            };

            match frame {
                SocketFrameKind::Hello => debug!("socket mode hello received"),
                SocketFrameKind::Disconnect => {
                    return Err(TransportError::Receive("server requested reconnect".to_owned()));
                }
                SocketFrameKind::Envelope { payload: InboundPayload::Event(envelope), .. } => {
                    return Ok(Some(envelope));
                }
                SocketFrameKind::Envelope { envelope_id, payload } => {
                    debug!(envelope_id = %envelope_id, payload = ?payload, "socket envelope ignored");
                    Self::send_ack(stream, &envelope_id).await?;
                }
            }
        }
    }

    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
        let mut guard = self.stream.lock().await;
        let stream = guard
            .as_mut()
            .ok_or_else(|| TransportError::Acknowledge("not connected".to_owned()))?;
        Self::send_ack(stream, envelope_id).await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.lock().await.take() {
            stream.close(None).await.map_err(|error| TransportError::Disconnect(error.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::{ReconnectPolicy, SocketModeRunner, SocketTransport, TransportError};
    use crate::blocks::{pong_message, MessageTemplate};
    use crate::conversation::ConversationHub;
    use crate::events::{
        build_dispatcher, DirectMessageService, EventContext, EventDispatcher, EventHandlerError,
        MentionEvent, MentionService, MessageEvent, SlackEnvelope, SlackEvent,
    };
    use crate::gateway::{GatewayError, MessagingGateway};

    #[derive(Default)]
    struct ScriptedTransport {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        connect_results: VecDeque<Result<(), TransportError>>,
        envelopes: VecDeque<Result<Option<SlackEnvelope>, TransportError>>,
        connect_attempts: usize,
        acknowledgements: Vec<String>,
        disconnect_calls: usize,
    }

    impl ScriptedTransport {
        fn with_script(
            connect_results: Vec<Result<(), TransportError>>,
            envelopes: Vec<Result<Option<SlackEnvelope>, TransportError>>,
        ) -> Self {
            Self {
                state: Mutex::new(ScriptedState {
                    connect_results: connect_results.into(),
                    envelopes: envelopes.into(),
                    ..ScriptedState::default()
                }),
            }
        }

        async fn connect_attempts(&self) -> usize {
            self.state.lock().await.connect_attempts
        }

        async fn acknowledgements(&self) -> Vec<String> {
            self.state.lock().await.acknowledgements.clone()
        }
    }

    #[async_trait]
    impl SocketTransport for ScriptedTransport {
        async fn connect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.connect_attempts += 1;
            state.connect_results.pop_front().unwrap_or(Ok(()))
        }

        async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError> {
            let mut state = self.state.lock().await;
            state.envelopes.pop_front().unwrap_or(Ok(None))
        }

        async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.acknowledgements.push(envelope_id.to_owned());
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            self.state.lock().await.disconnect_calls += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingGateway {
        posted: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl MessagingGateway for RecordingGateway {
        async fn open_direct_channel(&self, user_id: &str) -> Result<String, GatewayError> {
            Ok(format!("D-{user_id}"))
        }

        async fn post_message(
            &self,
            channel_id: &str,
            message: &MessageTemplate,
        ) -> Result<(), GatewayError> {
            self.posted.lock().await.push((channel_id.to_owned(), message.fallback_text.clone()));
            Ok(())
        }
    }

    struct PingOnly;

    #[async_trait]
    impl DirectMessageService for PingOnly {
        async fn handle_direct_message(
            &self,
            event: &MessageEvent,
            _ctx: &EventContext,
        ) -> Result<Option<MessageTemplate>, EventHandlerError> {
            Ok((event.text == "ping").then(pong_message))
        }
    }

    #[async_trait]
    impl MentionService for PingOnly {
        async fn handle_mention(
            &self,
            _event: &MentionEvent,
            _ctx: &EventContext,
        ) -> Result<Option<MessageTemplate>, EventHandlerError> {
            Ok(None)
        }
    }

    fn unsupported(envelope_id: &str) -> SlackEnvelope {
        SlackEnvelope {
            envelope_id: envelope_id.to_owned(),
            event: SlackEvent::Unsupported { event_type: "test".to_owned() },
        }
    }

    fn runner(
        transport: Arc<ScriptedTransport>,
        dispatcher: EventDispatcher,
        gateway: Arc<RecordingGateway>,
    ) -> SocketModeRunner {
        SocketModeRunner::new(
            transport,
            Arc::new(dispatcher),
            gateway,
            ReconnectPolicy { max_retries: 2, base_delay_ms: 0, max_delay_ms: 0 },
        )
    }

    #[tokio::test]
    async fn reconnects_after_initial_connect_failure() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Err(TransportError::Connect("network down".to_owned())), Ok(())],
            vec![Ok(Some(unsupported("env-1"))), Ok(None)],
        ));

        runner(transport.clone(), EventDispatcher::default(), Arc::default())
            .start()
            .await
            .expect("runner should not fail");

        assert_eq!(transport.connect_attempts().await, 2);
        assert_eq!(transport.acknowledgements().await, vec!["env-1"]);
    }

    #[tokio::test]
    async fn exhausts_retries_without_crashing() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![
                Err(TransportError::Connect("fail-1".to_owned())),
                Err(TransportError::Connect("fail-2".to_owned())),
                Err(TransportError::Connect("fail-3".to_owned())),
            ],
            vec![],
        ));

        runner(transport.clone(), EventDispatcher::default(), Arc::default())
            .start()
            .await
            .expect("runner should degrade gracefully");
        assert_eq!(transport.connect_attempts().await, 3);
    }

    #[tokio::test]
    async fn dropped_session_reconnects_without_spending_retries() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![
                Ok(()),
                Err(TransportError::Connect("blip-1".to_owned())),
                Err(TransportError::Connect("blip-2".to_owned())),
                Ok(()),
            ],
            vec![
                Ok(Some(unsupported("env-1"))),
                Err(TransportError::Receive("server requested reconnect".to_owned())),
                Ok(Some(unsupported("env-2"))),
                Ok(None),
            ],
        ));

        runner(transport.clone(), EventDispatcher::default(), Arc::default())
            .start()
            .await
            .expect("runner");

        assert_eq!(transport.connect_attempts().await, 4);
        assert_eq!(transport.acknowledgements().await, vec!["env-1", "env-2"]);
    }

    #[tokio::test]
    async fn responded_messages_are_posted_through_gateway() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(())],
            vec![
                Ok(Some(SlackEnvelope {
                    envelope_id: "env-ping".to_owned(),
                    event: SlackEvent::DirectMessage(MessageEvent {
                        team_id: "T1".to_owned(),
                        channel_id: "D-U1".to_owned(),
                        user_id: "U1".to_owned(),
                        text: "ping".to_owned(),
                        ts: "1.0".to_owned(),
                    }),
                })),
                Ok(None),
            ],
        ));
        let gateway = Arc::new(RecordingGateway::default());
        let dispatcher = build_dispatcher(ConversationHub::new(), PingOnly, PingOnly);

        runner(transport, dispatcher, gateway.clone()).start().await.expect("runner");

        assert_eq!(
            gateway.posted.lock().await.clone(),
            vec![("D-U1".to_owned(), "pong".to_owned())]
        );
    }
}
