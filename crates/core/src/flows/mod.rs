pub mod engine;
pub mod states;

pub use engine::{CandidateFlow, DecisionFlow, FlowDefinition, FlowEngine, FlowTransitionError};
pub use states::{
    ConversationAction, ConversationContext, ConversationEvent, ConversationOutcome,
    ConversationState, TransitionOutcome,
};
