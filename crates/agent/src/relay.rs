use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use knowbot_core::domain::answer::{ArchiveEntry, CallbackToken, Decision, PendingAnswer};
use knowbot_core::flows::{
    ConversationAction, ConversationContext, ConversationEvent, ConversationOutcome,
    ConversationState, DecisionFlow, FlowEngine,
};
use knowbot_core::register::AnswerRegister;
use knowbot_db::ArchiveRepository;
use knowbot_slack::blocks::{
    accepted_thanks, answer_decision_message, rejected_apology, MessageTemplate,
};
use knowbot_slack::conversation::{ConversationHub, Reply};
use knowbot_slack::gateway::{GatewayError, MessagingGateway};

/// Everything the relay needs to know about one candidate's answer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayRequest {
    pub correlation_id: String,
    pub team_id: String,
    pub asker_id: String,
    pub question: String,
    pub answerer_id: String,
    pub answer: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecisionOutcome {
    Archived,
    /// Accepted, but the archive write failed.
    ArchiveFailed,
    Rejected,
    /// Accepted with a token that no longer maps to a pending answer.
    MissingRecord,
    Expired,
    /// The decision message never reached the asker.
    Undelivered,
}

impl DecisionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Archived => "archived",
            Self::ArchiveFailed => "archive_failed",
            Self::Rejected => "rejected",
            Self::MissingRecord => "missing_record",
            Self::Expired => "expired",
            Self::Undelivered => "undelivered",
        }
    }
}

/// Shows an answer to the asker and acts on their accept/reject click.
pub struct AnswerRelay {
    gateway: Arc<dyn MessagingGateway>,
    hub: Arc<ConversationHub>,
    register: Arc<AnswerRegister>,
    archive: Arc<dyn ArchiveRepository>,
    decision_timeout: Duration,
    engine: FlowEngine<DecisionFlow>,
}

impl AnswerRelay {
    pub fn new(
        gateway: Arc<dyn MessagingGateway>,
        hub: Arc<ConversationHub>,
        register: Arc<AnswerRegister>,
        archive: Arc<dyn ArchiveRepository>,
        decision_timeout: Duration,
    ) -> Self {
        Self { gateway, hub, register, archive, decision_timeout, engine: FlowEngine::default() }
    }

    pub fn register(&self) -> &Arc<AnswerRegister> {
        &self.register
    }

    pub async fn relay_answer(&self, request: RelayRequest) -> DecisionOutcome {
        let token = CallbackToken::generate();
        // The register entry expires `ttl` after this point; a click after that would be lost.
        let entry_deadline = Instant::now() + self.register.settings().ttl;
        let evicted = self
            .register
            .put(
                token,
                PendingAnswer {
                    question: request.question.clone(),
                    answer: request.answer.clone(),
                    asked_by: request.asker_id.clone(),
                    answered_by: request.answerer_id.clone(),
                    team_id: request.team_id.clone(),
                },
            )
            .await;
        if !evicted.is_empty() {
            warn!(
                event_name = "relay.register.evicted",
                correlation_id = %request.correlation_id,
                evicted = evicted.len(),
                "answer register full; dropped oldest pending answers"
            );
        }

        // Listen before posting so an immediate click is not lost.
        let mut waiting = self.hub.open_callback(token);

        let channel_id = match self.post_decision_message(&token, &request).await {
            Ok(channel_id) => channel_id,
            Err(detail) => {
                warn!(
                    event_name = "relay.decision.undelivered",
                    correlation_id = %request.correlation_id,
                    callback_token = %token,
                    asker_id = %request.asker_id,
                    error = %detail,
                    "failed to show answer to asker"
                );
                self.register.remove(&token).await;
                return DecisionOutcome::Undelivered;
            }
        };
        info!(
            event_name = "relay.decision.requested",
            correlation_id = %request.correlation_id,
            callback_token = %token,
            asker_id = %request.asker_id,
            answerer_id = %request.answerer_id,
            "answer relayed to asker"
        );

        let context = ConversationContext::default();
        let deadline = (Instant::now() + self.decision_timeout).min(entry_deadline);
        let mut state = self.engine.initial_state();
        let mut outcome = DecisionOutcome::Expired;

        while !state.is_terminal() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let (event, callback_id) = match waiting.next_reply(remaining).await {
                Ok(Some(Reply::Action { value, callback_id })) => {
                    match Decision::from_action_value(&value) {
                        Some(Decision::Accept) => {
                            (ConversationEvent::AnswerAccepted, Some(callback_id))
                        }
                        Some(Decision::Reject) => {
                            (ConversationEvent::AnswerRejected, Some(callback_id))
                        }
                        None => {
                            debug!(
                                event_name = "relay.decision.ignored",
                                callback_token = %token,
                                value = %value,
                                "ignoring unknown action value"
                            );
                            (ConversationEvent::UnrecognizedReply, None)
                        }
                    }
                }
                Ok(Some(Reply::Text(_))) => (ConversationEvent::UnrecognizedReply, None),
                Ok(None) => (ConversationEvent::ReplyTimedOut, None),
                Err(error) => {
                    warn!(
                        event_name = "relay.decision.closed",
                        callback_token = %token,
                        error = %error,
                        "decision wait ended unexpectedly"
                    );
                    (ConversationEvent::ReplyTimedOut, None)
                }
            };

            let transition = match self.engine.apply(&state, &event, &context) {
                Ok(transition) => transition,
                Err(error) => {
                    error!(
                        event_name = "relay.decision.invalid_transition",
                        callback_token = %token,
                        error = %error,
                        "decision flow rejected event"
                    );
                    break;
                }
            };

            for action in &transition.actions {
                match action {
                    ConversationAction::ThankAsker => {
                        self.notify(&channel_id, &accepted_thanks(), &token).await;
                    }
                    ConversationAction::ApologizeToAsker => {
                        self.notify(&channel_id, &rejected_apology(), &token).await;
                    }
                    ConversationAction::ArchiveAnswer => {
                        outcome = self.archive_accepted(callback_id.as_deref(), &request).await;
                    }
                    ConversationAction::DiscardAnswer => {
                        self.register.remove(&token).await;
                    }
                    other => {
                        debug!(
                            event_name = "relay.decision.action_skipped",
                            action = ?other,
                            "action does not apply to decisions"
                        );
                    }
                }
            }

            state = transition.to;
        }

        match state {
            ConversationState::Done(ConversationOutcome::Rejected) => {
                outcome = DecisionOutcome::Rejected;
            }
            ConversationState::Done(ConversationOutcome::Expired) => {
                outcome = DecisionOutcome::Expired;
            }
            _ => {}
        }

        self.register.remove(&token).await;
        info!(
            event_name = "relay.decision.finished",
            correlation_id = %request.correlation_id,
            callback_token = %token,
            outcome = outcome.as_str(),
            "decision finished"
        );
        outcome
    }

    async fn post_decision_message(
        &self,
        token: &CallbackToken,
        request: &RelayRequest,
    ) -> Result<String, GatewayError> {
        let channel_id = self.gateway.open_direct_channel(&request.asker_id).await?;
        let message =
            answer_decision_message(token, &request.answerer_id, &request.question, &request.answer);
        self.gateway.post_message(&channel_id, &message).await?;
        Ok(channel_id)
    }

    async fn notify(
        &self,
        channel_id: &str,
        message: &MessageTemplate,
        token: &CallbackToken,
    ) {
        if let Err(error) = self.gateway.post_message(channel_id, message).await {
            warn!(
                event_name = "relay.notify.failed",
                callback_token = %token,
                error = %error,
                "failed to post decision follow-up"
            );
        }
    }

    /// Archives the record named by the token the click carried.
    async fn archive_accepted(
        &self,
        callback_id: Option<&str>,
        request: &RelayRequest,
    ) -> DecisionOutcome {
        let Some(token) = callback_id.and_then(CallbackToken::parse) else {
            error!(
                event_name = "relay.archive.missing_record",
                correlation_id = %request.correlation_id,
                callback_id = callback_id.unwrap_or_default(),
                "accepted answer carried no usable callback token"
            );
            return DecisionOutcome::MissingRecord;
        };

        let Some(record) = self.register.take(&token).await else {
            error!(
                event_name = "relay.archive.missing_record",
                correlation_id = %request.correlation_id,
                callback_token = %token,
                "no pending answer for accepted callback token"
            );
            return DecisionOutcome::MissingRecord;
        };

        match self.archive.insert(ArchiveEntry::from_pending(&token, record)).await {
            Ok(()) => {
                info!(
                    event_name = "relay.archive.saved",
                    correlation_id = %request.correlation_id,
                    callback_token = %token,
                    "accepted answer archived"
                );
                DecisionOutcome::Archived
            }
            Err(error) => {
                error!(
                    event_name = "relay.archive.failed",
                    correlation_id = %request.correlation_id,
                    callback_token = %token,
                    error = %error,
                    "failed to archive accepted answer"
                );
                DecisionOutcome::ArchiveFailed
            }
        }
    }
}
