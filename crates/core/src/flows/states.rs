use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationState {
    AwaitingAvailability,
    AwaitingAnswer,
    AwaitingDecision,
    Done(ConversationOutcome),
}

impl ConversationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    pub fn outcome(&self) -> Option<ConversationOutcome> {
        match self {
            Self::Done(outcome) => Some(*outcome),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationOutcome {
    Declined,
    Answered,
    Unresponsive,
    Superseded,
    Accepted,
    Rejected,
    Expired,
}

impl ConversationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Declined => "declined",
            Self::Answered => "answered",
            Self::Unresponsive => "unresponsive",
            Self::Superseded => "superseded",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationEvent {
    AvailabilityConfirmed,
    AvailabilityDeclined,
    AnswerReceived,
    AnswerAccepted,
    AnswerRejected,
    UnrecognizedReply,
    ReplyTimedOut,
    SiblingAnswered,
}

/// Per-conversation counters the transition rules depend on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConversationContext {
    pub reprompts_used: u32,
    pub max_reprompts: u32,
}

impl ConversationContext {
    pub fn with_max_reprompts(max_reprompts: u32) -> Self {
        Self { reprompts_used: 0, max_reprompts }
    }

    pub fn can_reprompt(&self) -> bool {
        self.reprompts_used < self.max_reprompts
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationAction {
    AskQuestion,
    AcknowledgeDecline,
    RepromptAvailability,
    RepromptAnswer,
    AcknowledgeAnswer,
    RelayAnswer,
    NotifyGivingUp,
    NotifySuperseded,
    ThankAsker,
    ArchiveAnswer,
    ApologizeToAsker,
    DiscardAnswer,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: ConversationState,
    pub to: ConversationState,
    pub event: ConversationEvent,
    pub actions: Vec<ConversationAction>,
}
