//! Knowbot core - domain model and routing state machines
//!
//! Everything here is transport-agnostic:
//! - **Configuration** (`config`) - layered defaults, TOML file, env, overrides
//! - **Domain** (`domain`) - questions, pending answers, callback tokens, archive entries
//! - **Flows** (`flows`) - per-conversation state machines for candidates and askers
//! - **Register** (`register`) - bounded, expiring store of answers awaiting a decision
//! - **Utterances** (`utterances`) - yes/no classification of free-text replies

pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod register;
pub mod utterances;

pub use domain::answer::{ArchiveEntry, CallbackToken, Decision, PendingAnswer};
pub use domain::question::Question;
pub use errors::{ApplicationError, DomainError};
pub use flows::{
    ConversationAction, ConversationEvent, ConversationOutcome, ConversationState, FlowEngine,
};
pub use register::{AnswerRegister, RegisterSettings};
pub use utterances::{classify_availability, Availability};
