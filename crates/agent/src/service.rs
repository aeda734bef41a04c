use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use knowbot_core::domain::question::Question;
use knowbot_slack::blocks::{pong_message, MessageTemplate};
use knowbot_slack::events::{
    DirectMessageService, EventContext, EventHandlerError, MentionEvent, MentionService,
    MessageEvent,
};

use crate::ping::is_ping;
use crate::router::{EpisodeSummary, QuestionRouter};

/// Bot behaviour behind the Slack event handlers.
#[derive(Clone)]
pub struct KnowbotService {
    router: Arc<QuestionRouter>,
}

impl KnowbotService {
    pub fn new(router: Arc<QuestionRouter>) -> Self {
        Self { router }
    }

    /// Starts a routing episode in the background.
    pub fn spawn_episode(&self, question: Question) -> JoinHandle<EpisodeSummary> {
        let router = self.router.clone();
        tokio::spawn(async move { router.route_question(question).await })
    }
}

#[async_trait]
impl DirectMessageService for KnowbotService {
    async fn handle_direct_message(
        &self,
        event: &MessageEvent,
        ctx: &EventContext,
    ) -> Result<Option<MessageTemplate>, EventHandlerError> {
        if is_ping(&event.text) {
            debug!(
                event_name = "ping.answered",
                correlation_id = %ctx.correlation_id,
                user_id = %event.user_id,
                "ping"
            );
            return Ok(Some(pong_message()));
        }

        let question = match Question::new(
            &event.user_id,
            &event.team_id,
            &event.channel_id,
            &event.text,
            &ctx.correlation_id,
        ) {
            Ok(question) => question,
            Err(error) => {
                debug!(
                    event_name = "routing.question.ignored",
                    correlation_id = %ctx.correlation_id,
                    user_id = %event.user_id,
                    error = %error,
                    "direct message is not a routable question"
                );
                return Ok(None);
            }
        };

        info!(
            event_name = "routing.question.accepted",
            correlation_id = %ctx.correlation_id,
            asker_id = %question.asker_id,
            "starting routing episode"
        );
        // Episodes can run for hours; the handler only starts them.
        drop(self.spawn_episode(question));
        Ok(None)
    }
}

#[async_trait]
impl MentionService for KnowbotService {
    async fn handle_mention(
        &self,
        event: &MentionEvent,
        ctx: &EventContext,
    ) -> Result<Option<MessageTemplate>, EventHandlerError> {
        if is_ping(&event.text) {
            debug!(
                event_name = "ping.answered",
                correlation_id = %ctx.correlation_id,
                user_id = %event.user_id,
                direct = event.direct,
                "ping"
            );
            return Ok(Some(pong_message()));
        }
        Ok(None)
    }
}
