use thiserror::Error;

use crate::flows::FlowTransitionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("messaging failure: {0}")]
    Messaging(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    /// Whether the failure came from a collaborator and may clear up on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Integration(_) | Self::Messaging(_))
    }

    /// Stable label used as a structured logging field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Domain(_) => "domain",
            Self::Persistence(_) => "persistence",
            Self::Integration(_) => "integration",
            Self::Messaging(_) => "messaging",
            Self::Configuration(_) => "configuration",
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, DomainError};
    use crate::flows::{ConversationEvent, ConversationState, FlowTransitionError};

    #[test]
    fn collaborator_failures_are_transient() {
        assert!(ApplicationError::Persistence("database is locked".to_owned()).is_transient());
        assert!(ApplicationError::Integration("finder timed out".to_owned()).is_transient());
        assert!(ApplicationError::Messaging("channel_not_found".to_owned()).is_transient());
        assert!(!ApplicationError::Configuration("missing bot token".to_owned()).is_transient());
    }

    #[test]
    fn flow_errors_lift_into_application_errors() {
        let error = ApplicationError::from(DomainError::from(
            FlowTransitionError::InvalidTransition {
                state: ConversationState::AwaitingDecision,
                event: ConversationEvent::AvailabilityConfirmed,
            },
        ));

        assert_eq!(error.kind(), "domain");
        assert!(!error.is_transient());
        assert!(error.to_string().contains("AwaitingDecision"));
    }
}
