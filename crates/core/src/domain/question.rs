use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// A question received as a direct message. Lives for one routing episode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub asker_id: String,
    pub team_id: String,
    pub channel_id: String,
    pub text: String,
    pub correlation_id: String,
}

impl Question {
    pub fn new(
        asker_id: impl Into<String>,
        team_id: impl Into<String>,
        channel_id: impl Into<String>,
        text: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let asker_id = asker_id.into();
        let text = text.into().trim().to_owned();

        if asker_id.trim().is_empty() {
            return Err(DomainError::InvariantViolation("question has no asker".to_owned()));
        }
        if text.is_empty() {
            return Err(DomainError::InvariantViolation("question text is empty".to_owned()));
        }

        Ok(Self {
            asker_id,
            team_id: team_id.into(),
            channel_id: channel_id.into(),
            text,
            correlation_id: correlation_id.into(),
        })
    }
}
