use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use knowbot_core::config::RoutingConfig;
use knowbot_core::domain::question::Question;
use knowbot_core::flows::{
    CandidateFlow, ConversationAction, ConversationContext, ConversationEvent,
    ConversationOutcome, ConversationState, FlowEngine,
};
use knowbot_core::utterances::{classify_availability, Availability};
use knowbot_slack::blocks::{
    answer_acknowledgement, answer_reprompt, availability_prompt, availability_reprompt,
    candidates_found_message, decline_acknowledgement, giving_up_message, nobody_found_message,
    question_message, searching_message, superseded_message, MessageTemplate,
};
use knowbot_slack::conversation::{Conversation, ConversationError, ConversationHub, Reply};
use knowbot_slack::gateway::MessagingGateway;

use crate::finder::CandidateFinder;
use crate::relay::{AnswerRelay, DecisionOutcome, RelayRequest};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouterSettings {
    pub max_reprompts: u32,
    pub availability_timeout: Duration,
    pub answer_timeout: Duration,
    /// Tell the other candidates to stand down once one answer is relayed.
    pub cancel_siblings: bool,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            max_reprompts: 2,
            availability_timeout: Duration::from_secs(30 * 60),
            answer_timeout: Duration::from_secs(2 * 60 * 60),
            cancel_siblings: true,
        }
    }
}

impl RouterSettings {
    pub fn from_config(routing: &RoutingConfig) -> Self {
        Self {
            max_reprompts: routing.max_reprompts,
            availability_timeout: routing.availability_timeout(),
            answer_timeout: routing.answer_timeout(),
            cancel_siblings: routing.cancel_siblings,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateReport {
    pub candidate_id: String,
    pub outcome: ConversationOutcome,
    /// Set when this candidate's answer went to the asker.
    pub decision: Option<DecisionOutcome>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EpisodeSummary {
    pub correlation_id: String,
    pub asker_id: String,
    pub candidates: Vec<String>,
    pub reports: Vec<CandidateReport>,
}

impl EpisodeSummary {
    pub fn outcome_for(&self, candidate_id: &str) -> Option<ConversationOutcome> {
        self.report_for(candidate_id).map(|report| report.outcome)
    }

    pub fn report_for(&self, candidate_id: &str) -> Option<&CandidateReport> {
        self.reports.iter().find(|report| report.candidate_id == candidate_id)
    }

    pub fn decisions(&self) -> Vec<DecisionOutcome> {
        self.reports.iter().filter_map(|report| report.decision).collect()
    }
}

/// Runs one routing episode per question: find candidates, talk to each of
/// them concurrently, and relay any answer back to the asker.
pub struct QuestionRouter {
    gateway: Arc<dyn MessagingGateway>,
    hub: Arc<ConversationHub>,
    finder: Arc<dyn CandidateFinder>,
    relay: Arc<AnswerRelay>,
    settings: RouterSettings,
}

impl QuestionRouter {
    pub fn new(
        gateway: Arc<dyn MessagingGateway>,
        hub: Arc<ConversationHub>,
        finder: Arc<dyn CandidateFinder>,
        relay: Arc<AnswerRelay>,
        settings: RouterSettings,
    ) -> Self {
        Self { gateway, hub, finder, relay, settings }
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    pub async fn route_question(&self, question: Question) -> EpisodeSummary {
        info!(
            event_name = "routing.episode.started",
            correlation_id = %question.correlation_id,
            asker_id = %question.asker_id,
            team_id = %question.team_id,
            "question received"
        );
        self.tell_asker(&question, &searching_message()).await;

        let candidates = self
            .finder
            .find_candidates(&question.team_id, &question.asker_id, &question.text)
            .await;

        let mut summary = EpisodeSummary {
            correlation_id: question.correlation_id.clone(),
            asker_id: question.asker_id.clone(),
            candidates: candidates.clone(),
            reports: Vec::new(),
        };

        if candidates.is_empty() {
            self.tell_asker(&question, &nobody_found_message()).await;
            info!(
                event_name = "routing.episode.no_candidates",
                correlation_id = %question.correlation_id,
                asker_id = %question.asker_id,
                "nobody found for question"
            );
            return summary;
        }
        self.tell_asker(&question, &candidates_found_message(&candidates)).await;

        let question = Arc::new(question);
        let (answered_tx, answered_rx) = watch::channel(false);
        let answered_tx = Arc::new(answered_tx);

        let mut conversations = JoinSet::new();
        for (index, candidate_id) in candidates.iter().enumerate() {
            let task = CandidateConversation {
                candidate_id: candidate_id.clone(),
                question: question.clone(),
                gateway: self.gateway.clone(),
                hub: self.hub.clone(),
                relay: self.relay.clone(),
                settings: self.settings.clone(),
                answered_tx: answered_tx.clone(),
                answered_rx: answered_rx.clone(),
            };
            conversations.spawn(async move { (index, task.run().await) });
        }

        let mut reports = Vec::with_capacity(candidates.len());
        while let Some(joined) = conversations.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(join_error) => error!(
                    event_name = "routing.candidate.panicked",
                    correlation_id = %question.correlation_id,
                    error = %join_error,
                    "candidate conversation task failed"
                ),
            }
        }
        reports.sort_by_key(|(index, _)| *index);
        summary.reports = reports.into_iter().map(|(_, report)| report).collect();

        info!(
            event_name = "routing.episode.finished",
            correlation_id = %question.correlation_id,
            asker_id = %question.asker_id,
            candidates = summary.candidates.len(),
            answered = summary.decisions().len(),
            "routing episode finished"
        );
        summary
    }

    async fn tell_asker(&self, question: &Question, message: &MessageTemplate) {
        if let Err(error) = self.gateway.post_message(&question.channel_id, message).await {
            warn!(
                event_name = "routing.asker.notify_failed",
                correlation_id = %question.correlation_id,
                asker_id = %question.asker_id,
                error = %error,
                "failed to post to asker"
            );
        }
    }
}

/// One candidate's side of an episode.
struct CandidateConversation {
    candidate_id: String,
    question: Arc<Question>,
    gateway: Arc<dyn MessagingGateway>,
    hub: Arc<ConversationHub>,
    relay: Arc<AnswerRelay>,
    settings: RouterSettings,
    answered_tx: Arc<watch::Sender<bool>>,
    answered_rx: watch::Receiver<bool>,
}

impl CandidateConversation {
    async fn run(mut self) -> CandidateReport {
        let opened = tokio::select! {
            opened = self.hub.open_direct(self.gateway.clone(), &self.candidate_id) => opened,
            _ = sibling_answered(&mut self.answered_rx, self.settings.cancel_siblings) => {
                debug!(
                    event_name = "routing.candidate.superseded_before_start",
                    correlation_id = %self.question.correlation_id,
                    candidate_id = %self.candidate_id,
                    "question answered while waiting for candidate"
                );
                return self.report(ConversationOutcome::Superseded, None);
            }
        };
        let mut conversation = match opened {
            Ok(conversation) => conversation,
            Err(error) => {
                warn!(
                    event_name = "routing.candidate.open_failed",
                    correlation_id = %self.question.correlation_id,
                    candidate_id = %self.candidate_id,
                    error = %error,
                    "failed to open conversation with candidate"
                );
                return self.report(ConversationOutcome::Unresponsive, None);
            }
        };

        let engine = FlowEngine::<CandidateFlow>::default();
        let mut context = ConversationContext::with_max_reprompts(self.settings.max_reprompts);
        let mut state = engine.initial_state();
        let mut answer: Option<String> = None;
        let mut prompt = Some(availability_prompt(&self.question.asker_id));

        while !state.is_terminal() {
            let timeout = match state {
                ConversationState::AwaitingAnswer => self.settings.answer_timeout,
                _ => self.settings.availability_timeout,
            };
            let (event, text) = tokio::select! {
                reply = prompt_and_wait(&mut conversation, prompt.take(), timeout) => {
                    if let Err(error) = &reply {
                        warn!(
                            event_name = "routing.candidate.prompt_failed",
                            correlation_id = %self.question.correlation_id,
                            candidate_id = %self.candidate_id,
                            error = %error,
                            "candidate conversation broke off"
                        );
                    }
                    classify_reply(state, reply)
                }
                _ = sibling_answered(&mut self.answered_rx, self.settings.cancel_siblings) => {
                    (ConversationEvent::SiblingAnswered, None)
                }
            };

            let transition = match engine.apply(&state, &event, &context) {
                Ok(transition) => transition,
                Err(error) => {
                    error!(
                        event_name = "routing.candidate.invalid_transition",
                        correlation_id = %self.question.correlation_id,
                        candidate_id = %self.candidate_id,
                        error = %error,
                        "candidate flow rejected event"
                    );
                    return self.report(ConversationOutcome::Unresponsive, None);
                }
            };
            debug!(
                event_name = "routing.candidate.transition",
                correlation_id = %self.question.correlation_id,
                candidate_id = %self.candidate_id,
                from = ?transition.from,
                to = ?transition.to,
                event = ?transition.event,
                "candidate conversation advanced"
            );

            for action in &transition.actions {
                self.perform(
                    *action,
                    &conversation,
                    &mut context,
                    &mut prompt,
                    &mut answer,
                    text.as_deref(),
                )
                .await;
            }
            state = transition.to;
        }

        let outcome = state.outcome().unwrap_or(ConversationOutcome::Unresponsive);
        info!(
            event_name = "routing.candidate.finished",
            correlation_id = %self.question.correlation_id,
            candidate_id = %self.candidate_id,
            outcome = outcome.as_str(),
            "candidate conversation finished"
        );

        // Free the candidate's channel before waiting on the asker.
        drop(conversation);

        let decision = match answer {
            Some(answer) => Some(
                self.relay
                    .relay_answer(RelayRequest {
                        correlation_id: self.question.correlation_id.clone(),
                        team_id: self.question.team_id.clone(),
                        asker_id: self.question.asker_id.clone(),
                        question: self.question.text.clone(),
                        answerer_id: self.candidate_id.clone(),
                        answer,
                    })
                    .await,
            ),
            None => None,
        };

        self.report(outcome, decision)
    }

    async fn perform(
        &self,
        action: ConversationAction,
        conversation: &Conversation,
        context: &mut ConversationContext,
        prompt: &mut Option<MessageTemplate>,
        answer: &mut Option<String>,
        text: Option<&str>,
    ) {
        let asker_id = self.question.asker_id.as_str();
        match action {
            ConversationAction::AskQuestion => {
                // The re-prompt budget is per question asked of the candidate.
                context.reprompts_used = 0;
                *prompt = Some(question_message(asker_id, &self.question.text));
            }
            ConversationAction::AcknowledgeDecline => {
                self.say(conversation, &decline_acknowledgement()).await;
            }
            ConversationAction::RepromptAvailability => {
                context.reprompts_used += 1;
                *prompt = Some(availability_reprompt());
            }
            ConversationAction::RepromptAnswer => {
                context.reprompts_used += 1;
                *prompt = Some(answer_reprompt());
            }
            ConversationAction::AcknowledgeAnswer => {
                self.say(conversation, &answer_acknowledgement(asker_id)).await;
            }
            ConversationAction::RelayAnswer => {
                *answer = text.map(str::to_owned);
                if self.settings.cancel_siblings {
                    self.answered_tx.send_replace(true);
                }
            }
            ConversationAction::NotifyGivingUp => {
                self.say(conversation, &giving_up_message()).await;
            }
            ConversationAction::NotifySuperseded => {
                self.say(conversation, &superseded_message(asker_id)).await;
            }
            ConversationAction::ThankAsker
            | ConversationAction::ArchiveAnswer
            | ConversationAction::ApologizeToAsker
            | ConversationAction::DiscardAnswer => {}
        }
    }

    async fn say(&self, conversation: &Conversation, message: &MessageTemplate) {
        if let Err(error) = conversation.say(message).await {
            warn!(
                event_name = "routing.candidate.say_failed",
                correlation_id = %self.question.correlation_id,
                candidate_id = %self.candidate_id,
                error = %error,
                "failed to message candidate"
            );
        }
    }

    fn report(&self, outcome: ConversationOutcome, decision: Option<DecisionOutcome>) -> CandidateReport {
        CandidateReport { candidate_id: self.candidate_id.clone(), outcome, decision }
    }
}

/// Sends the pending prompt, if any, then waits for the candidate's reply.
async fn prompt_and_wait(
    conversation: &mut Conversation,
    prompt: Option<MessageTemplate>,
    timeout: Duration,
) -> Result<Option<Reply>, ConversationError> {
    match prompt {
        Some(prompt) => conversation.ask(&prompt, timeout).await,
        None => conversation.next_reply(timeout).await,
    }
}

/// Maps a reply (or its absence) onto a flow event, keeping answer text.
fn classify_reply(
    state: ConversationState,
    reply: Result<Option<Reply>, ConversationError>,
) -> (ConversationEvent, Option<String>) {
    match reply {
        Ok(Some(Reply::Text(text))) => match state {
            ConversationState::AwaitingAnswer if text.trim().is_empty() => {
                (ConversationEvent::UnrecognizedReply, None)
            }
            ConversationState::AwaitingAnswer => {
                (ConversationEvent::AnswerReceived, Some(text.trim().to_owned()))
            }
            _ => match classify_availability(&text) {
                Availability::Affirmative => (ConversationEvent::AvailabilityConfirmed, None),
                Availability::Negative => (ConversationEvent::AvailabilityDeclined, None),
                Availability::Unrecognized => (ConversationEvent::UnrecognizedReply, None),
            },
        },
        Ok(Some(Reply::Action { .. })) => (ConversationEvent::UnrecognizedReply, None),
        Ok(None) | Err(_) => (ConversationEvent::ReplyTimedOut, None),
    }
}

/// Resolves once another candidate's answer has been relayed. Never resolves
/// when sibling cancellation is off.
async fn sibling_answered(answered: &mut watch::Receiver<bool>, enabled: bool) {
    if enabled {
        let closed = answered.wait_for(|answered| *answered).await.is_err();
        if !closed {
            return;
        }
    }
    std::future::pending::<()>().await
}
