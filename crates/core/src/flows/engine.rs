use thiserror::Error;

use crate::flows::states::{
    ConversationAction, ConversationContext, ConversationEvent, ConversationOutcome,
    ConversationState, TransitionOutcome,
};

pub trait FlowDefinition {
    fn initial_state(&self) -> ConversationState;
    fn transition(
        &self,
        current: &ConversationState,
        event: &ConversationEvent,
        context: &ConversationContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

#[derive(Clone, Debug, Default)]
pub struct CandidateFlow;

impl FlowDefinition for CandidateFlow {
    fn initial_state(&self) -> ConversationState {
        ConversationState::AwaitingAvailability
    }

    fn transition(
        &self,
        current: &ConversationState,
        event: &ConversationEvent,
        context: &ConversationContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_candidate(current, event, context)
    }
}

#[derive(Clone, Debug, Default)]
pub struct DecisionFlow;

impl FlowDefinition for DecisionFlow {
    fn initial_state(&self) -> ConversationState {
        ConversationState::AwaitingDecision
    }

    fn transition(
        &self,
        current: &ConversationState,
        event: &ConversationEvent,
        _context: &ConversationContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_decision(current, event)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> ConversationState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &ConversationState,
        event: &ConversationEvent,
        context: &ConversationContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }
}

impl Default for FlowEngine<CandidateFlow> {
    fn default() -> Self {
        Self::new(CandidateFlow)
    }
}

impl Default for FlowEngine<DecisionFlow> {
    fn default() -> Self {
        Self::new(DecisionFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("conversation already finished with {0:?}")]
    AlreadyFinished(ConversationOutcome),
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: ConversationState, event: ConversationEvent },
}

fn transition_candidate(
    current: &ConversationState,
    event: &ConversationEvent,
    context: &ConversationContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use ConversationAction::{
        AcknowledgeAnswer, AcknowledgeDecline, AskQuestion, NotifyGivingUp, NotifySuperseded,
        RelayAnswer, RepromptAnswer, RepromptAvailability,
    };
    use ConversationEvent::{
        AnswerReceived, AvailabilityConfirmed, AvailabilityDeclined, ReplyTimedOut,
        SiblingAnswered, UnrecognizedReply,
    };
    use ConversationOutcome::{Answered, Declined, Superseded, Unresponsive};
    use ConversationState::{AwaitingAnswer, AwaitingAvailability, Done};

    if let Done(outcome) = current {
        return Err(FlowTransitionError::AlreadyFinished(*outcome));
    }

    let (to, actions) = match (current, event) {
        (AwaitingAvailability, AvailabilityConfirmed) => (AwaitingAnswer, vec![AskQuestion]),
        (AwaitingAvailability, AvailabilityDeclined) => {
            (Done(Declined), vec![AcknowledgeDecline])
        }
        (AwaitingAvailability, UnrecognizedReply) if context.can_reprompt() => {
            (AwaitingAvailability, vec![RepromptAvailability])
        }
        (AwaitingAnswer, AnswerReceived) => {
            (Done(Answered), vec![AcknowledgeAnswer, RelayAnswer])
        }
        (AwaitingAnswer, UnrecognizedReply) if context.can_reprompt() => {
            (AwaitingAnswer, vec![RepromptAnswer])
        }
        (AwaitingAvailability, UnrecognizedReply) | (AwaitingAnswer, UnrecognizedReply) => {
            (Done(Unresponsive), vec![NotifyGivingUp])
        }
        (AwaitingAvailability, ReplyTimedOut) | (AwaitingAnswer, ReplyTimedOut) => {
            (Done(Unresponsive), Vec::new())
        }
        (AwaitingAvailability, SiblingAnswered) | (AwaitingAnswer, SiblingAnswered) => {
            (Done(Superseded), vec![NotifySuperseded])
        }
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                state: *current,
                event: *event,
            });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: *event, actions })
}

fn transition_decision(
    current: &ConversationState,
    event: &ConversationEvent,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use ConversationAction::{ApologizeToAsker, ArchiveAnswer, DiscardAnswer, ThankAsker};
    use ConversationEvent::{AnswerAccepted, AnswerRejected, ReplyTimedOut, UnrecognizedReply};
    use ConversationOutcome::{Accepted, Expired, Rejected};
    use ConversationState::{AwaitingDecision, Done};

    if let Done(outcome) = current {
        return Err(FlowTransitionError::AlreadyFinished(*outcome));
    }

    let (to, actions) = match (current, event) {
        (AwaitingDecision, AnswerAccepted) => (Done(Accepted), vec![ThankAsker, ArchiveAnswer]),
        (AwaitingDecision, AnswerRejected) => {
            (Done(Rejected), vec![ApologizeToAsker, DiscardAnswer])
        }
        // Anything other than the two button values leaves the decision open.
        (AwaitingDecision, UnrecognizedReply) => (AwaitingDecision, Vec::new()),
        (AwaitingDecision, ReplyTimedOut) => (Done(Expired), vec![DiscardAnswer]),
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                state: *current,
                event: *event,
            });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: *event, actions })
}
