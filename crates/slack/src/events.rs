use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use knowbot_core::domain::answer::CallbackToken;

use crate::blocks::MessageTemplate;
use crate::conversation::{ConversationHub, ConversationKey, Reply};
use crate::gateway::{GatewayError, MessagingGateway};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackEnvelope {
    pub envelope_id: String,
    pub event: SlackEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    DirectMessage(MessageEvent),
    Mention(MentionEvent),
    BlockAction(BlockActionEvent),
    Unsupported { event_type: String },
}

impl SlackEvent {
    pub fn event_type(&self) -> SlackEventType {
        match self {
            Self::DirectMessage(_) => SlackEventType::DirectMessage,
            Self::Mention(_) => SlackEventType::Mention,
            Self::BlockAction(_) => SlackEventType::BlockAction,
            Self::Unsupported { .. } => SlackEventType::Unsupported,
        }
    }

    /// Channel a `HandlerResult::Responded` message goes back to.
    pub fn reply_channel(&self) -> Option<&str> {
        match self {
            Self::DirectMessage(event) => Some(&event.channel_id),
            Self::Mention(event) => Some(&event.channel_id),
            Self::BlockAction(event) => Some(&event.channel_id),
            Self::Unsupported { .. } => None,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::DirectMessage(event) => Some(&event.user_id),
            Self::Mention(event) => Some(&event.user_id),
            Self::BlockAction(event) => Some(&event.user_id),
            Self::Unsupported { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    DirectMessage,
    Mention,
    BlockAction,
    Unsupported,
}

/// A message posted in the DM channel between a user and the bot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageEvent {
    pub team_id: String,
    pub channel_id: String,
    pub user_id: String,
    pub text: String,
    pub ts: String,
}

/// A message mentioning the bot in a shared channel. `direct` is set when the
/// mention opens the message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MentionEvent {
    pub team_id: String,
    pub channel_id: String,
    pub user_id: String,
    pub text: String,
    pub direct: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockActionEvent {
    pub team_id: String,
    pub channel_id: String,
    pub user_id: String,
    pub block_id: String,
    pub action_id: String,
    pub value: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(MessageTemplate),
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("direct message handler failure: {0}")]
    DirectMessage(String),
    #[error("mention handler failure: {0}")]
    Mention(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> SlackEventType;
    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<SlackEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Wires the three handlers the bot needs around one conversation hub.
pub fn build_dispatcher<D, M>(
    hub: Arc<ConversationHub>,
    direct_messages: D,
    mentions: M,
) -> EventDispatcher
where
    D: DirectMessageService + 'static,
    M: MentionService + 'static,
{
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(DirectMessageHandler::new(hub.clone(), direct_messages));
    dispatcher.register(MentionHandler::new(mentions));
    dispatcher.register(BlockActionHandler::new(hub));
    dispatcher
}

/// Posts a handler's response back to the channel the event came from.
pub async fn deliver_response(
    gateway: &dyn MessagingGateway,
    envelope: &SlackEnvelope,
    result: &HandlerResult,
) -> Result<bool, GatewayError> {
    let (HandlerResult::Responded(message), Some(channel_id)) =
        (result, envelope.event.reply_channel())
    else {
        return Ok(false);
    };
    gateway.post_message(channel_id, message).await?;
    Ok(true)
}

/// Handles a direct message that is not a reply to an open conversation.
#[async_trait]
pub trait DirectMessageService: Send + Sync {
    async fn handle_direct_message(
        &self,
        event: &MessageEvent,
        ctx: &EventContext,
    ) -> Result<Option<MessageTemplate>, EventHandlerError>;
}

#[async_trait]
pub trait MentionService: Send + Sync {
    async fn handle_mention(
        &self,
        event: &MentionEvent,
        ctx: &EventContext,
    ) -> Result<Option<MessageTemplate>, EventHandlerError>;
}

pub struct DirectMessageHandler<S> {
    hub: Arc<ConversationHub>,
    service: S,
}

impl<S> DirectMessageHandler<S>
where
    S: DirectMessageService,
{
    pub fn new(hub: Arc<ConversationHub>, service: S) -> Self {
        Self { hub, service }
    }
}

#[async_trait]
impl<S> EventHandler for DirectMessageHandler<S>
where
    S: DirectMessageService + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::DirectMessage
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::DirectMessage(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let key = ConversationKey::Direct {
            user_id: event.user_id.clone(),
            channel_id: event.channel_id.clone(),
        };
        if self.hub.deliver(&key, Reply::Text(event.text.clone())) {
            debug!(
                event_name = "ingress.slack.reply_delivered",
                correlation_id = %ctx.correlation_id,
                user_id = %event.user_id,
                "delivered direct message to open conversation"
            );
            return Ok(HandlerResult::Processed);
        }

        let message = self.service.handle_direct_message(event, ctx).await?;
        Ok(match message {
            Some(message) => HandlerResult::Responded(message),
            None => HandlerResult::Processed,
        })
    }
}

pub struct MentionHandler<S> {
    service: S,
}

impl<S> MentionHandler<S>
where
    S: MentionService,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for MentionHandler<S>
where
    S: MentionService + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::Mention
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::Mention(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let message = self.service.handle_mention(event, ctx).await?;
        Ok(match message {
            Some(message) => HandlerResult::Responded(message),
            None => HandlerResult::Processed,
        })
    }
}

/// Routes button clicks to the relay waiting on the message's callback token.
pub struct BlockActionHandler {
    hub: Arc<ConversationHub>,
}

impl BlockActionHandler {
    pub fn new(hub: Arc<ConversationHub>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl EventHandler for BlockActionHandler {
    fn event_type(&self) -> SlackEventType {
        SlackEventType::BlockAction
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::BlockAction(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let Some(token) = CallbackToken::parse(&event.block_id) else {
            debug!(
                correlation_id = %ctx.correlation_id,
                block_id = %event.block_id,
                "block action without callback token ignored"
            );
            return Ok(HandlerResult::Ignored);
        };

        let reply = Reply::Action {
            value: event.value.clone().unwrap_or_default(),
            callback_id: event.block_id.clone(),
        };
        if !self.hub.deliver(&ConversationKey::Callback(token), reply) {
            warn!(
                event_name = "ingress.slack.unknown_callback",
                correlation_id = %ctx.correlation_id,
                callback_token = %token,
                user_id = %event.user_id,
                "no pending decision for callback token; action dropped"
            );
        }
        Ok(HandlerResult::Processed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use knowbot_core::domain::answer::CallbackToken;

    use super::{
        build_dispatcher, deliver_response, BlockActionEvent, DirectMessageService,
        EventContext, EventDispatcher, EventHandlerError, HandlerResult, MentionEvent,
        MentionService, MessageEvent, SlackEnvelope, SlackEvent,
    };
    use crate::blocks::{pong_message, MessageTemplate};
    use crate::conversation::{ConversationHub, Reply};
    use crate::gateway::{GatewayError, MessagingGateway};

    #[derive(Clone, Default)]
    struct EchoService {
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl DirectMessageService for EchoService {
        async fn handle_direct_message(
            &self,
            event: &MessageEvent,
            _ctx: &EventContext,
        ) -> Result<Option<MessageTemplate>, EventHandlerError> {
            self.seen.lock().await.push(event.text.clone());
            Ok((event.text == "ping").then(pong_message))
        }
    }

    #[async_trait]
    impl MentionService for EchoService {
        async fn handle_mention(
            &self,
            event: &MentionEvent,
            _ctx: &EventContext,
        ) -> Result<Option<MessageTemplate>, EventHandlerError> {
            Ok(event.text.ends_with("ping").then(pong_message))
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

    fn direct_message(user_id: &str, text: &str) -> SlackEnvelope {
        SlackEnvelope {
            envelope_id: format!("env-{text}"),
            event: SlackEvent::DirectMessage(MessageEvent {
                team_id: "T1".to_owned(),
                channel_id: format!("D-{user_id}"),
                user_id: user_id.to_owned(),
                text: text.to_owned(),
                ts: "1730000000.0001".to_owned(),
            }),
        }
    }

    fn block_action(block_id: &str, value: &str) -> SlackEnvelope {
        SlackEnvelope {
            envelope_id: "env-action".to_owned(),
            event: SlackEvent::BlockAction(BlockActionEvent {
                team_id: "T1".to_owned(),
                channel_id: "D-U1".to_owned(),
                user_id: "U1".to_owned(),
                block_id: block_id.to_owned(),
                action_id: "knowbot.answer.accept.v1".to_owned(),
                value: Some(value.to_owned()),
            }),
        }
    }

    #[tokio::test]
    async fn direct_message_without_open_conversation_reaches_service() {
        let service = EchoService::default();
        let dispatcher = build_dispatcher(ConversationHub::new(), service.clone(), service.clone());

        let result = dispatcher
            .dispatch(&direct_message("U1", "ping"), &EventContext::default())
            .await
            .expect("dispatch");

        assert_eq!(result, HandlerResult::Responded(pong_message()));
        assert_eq!(service.seen.lock().await.clone(), vec!["ping"]);
    }

    #[tokio::test]
    async fn direct_message_is_routed_to_open_conversation_first() {
        let hub = ConversationHub::new();
        let service = EchoService::default();
        let dispatcher = build_dispatcher(hub.clone(), service.clone(), service.clone());
        let gateway = Arc::new(RecordingGateway::default());
        let mut conversation = hub.open_direct(gateway, "U2").await.expect("open");

        let result = dispatcher
            .dispatch(&direct_message("U2", "yes"), &EventContext::default())
            .await
            .expect("dispatch");

        assert_eq!(result, HandlerResult::Processed);
        assert!(service.seen.lock().await.is_empty());
        let reply = conversation.next_reply(Duration::from_secs(1)).await.expect("reply");
        assert_eq!(reply, Some(Reply::Text("yes".to_owned())));
    }

    #[tokio::test]
    async fn block_action_is_delivered_by_callback_token() {
        let hub = ConversationHub::new();
        let service = EchoService::default();
        let dispatcher = build_dispatcher(hub.clone(), service.clone(), service);
        let token = CallbackToken::generate();
        let mut decision = hub.open_callback(token);

        let result = dispatcher
            .dispatch(&block_action(&token.to_string(), "reject"), &EventContext::default())
            .await
            .expect("dispatch");

        assert_eq!(result, HandlerResult::Processed);
        let reply = decision.next_reply(Duration::from_secs(1)).await.expect("reply");
        assert_eq!(
            reply,
            Some(Reply::Action { value: "reject".to_owned(), callback_id: token.to_string() })
        );
    }

    #[tokio::test]
    async fn unknown_or_malformed_callback_tokens_are_dropped() {
        let service = EchoService::default();
        let dispatcher = build_dispatcher(ConversationHub::new(), service.clone(), service);

        let unknown = dispatcher
            .dispatch(
                &block_action(&CallbackToken::generate().to_string(), "accept"),
                &EventContext::default(),
            )
            .await
            .expect("dispatch");
        let malformed = dispatcher
            .dispatch(&block_action("not-a-token", "accept"), &EventContext::default())
            .await
            .expect("dispatch");

        assert_eq!(unknown, HandlerResult::Processed);
        assert_eq!(malformed, HandlerResult::Ignored);
    }

    #[tokio::test]
    async fn dispatcher_returns_ignored_when_no_handler_registered() {
        let dispatcher = EventDispatcher::new();

        let result = dispatcher
            .dispatch(&direct_message("U2", "hello"), &EventContext::default())
            .await
            .expect("dispatch");

        assert_eq!(result, HandlerResult::Ignored);
    }

    #[test]
    fn build_dispatcher_registers_handlers() {
        let service = EchoService::default();
        let dispatcher = build_dispatcher(ConversationHub::new(), service.clone(), service);
        assert_eq!(dispatcher.handler_count(), 3);
    }

    #[tokio::test]
    async fn responses_are_posted_to_the_event_channel() {
        let gateway = RecordingGateway::default();
        let envelope = direct_message("U1", "ping");

        let posted =
            deliver_response(&gateway, &envelope, &HandlerResult::Responded(pong_message()))
                .await
                .expect("post");
        let skipped = deliver_response(&gateway, &envelope, &HandlerResult::Processed)
            .await
            .expect("skip");

        assert!(posted);
        assert!(!skipped);
        assert_eq!(
            gateway.posted.lock().await.clone(),
            vec![("D-U1".to_owned(), "pong".to_owned())]
        );
    }
}
