use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque token correlating an asker's decision with a pending answer.
///
/// Tokens are UUID v7, so ordering by token is ordering by creation time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CallbackToken(Uuid);

impl CallbackToken {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value.trim()).ok().map(Self)
    }
}

impl fmt::Display for CallbackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAnswer {
    pub question: String,
    pub answer: String,
    pub asked_by: String,
    pub answered_by: String,
    pub team_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub id: String,
    pub question: String,
    pub answer: String,
    pub asked_by: String,
    pub answered_by: String,
    pub team_id: String,
    pub archived_at: DateTime<Utc>,
}

impl ArchiveEntry {
    pub fn from_pending(token: &CallbackToken, record: PendingAnswer) -> Self {
        Self {
            id: token.to_string(),
            question: record.question,
            answer: record.answer,
            asked_by: record.asked_by,
            answered_by: record.answered_by,
            team_id: record.team_id,
            archived_at: Utc::now(),
        }
    }
}

/// The asker's verdict on a relayed answer. Matched by exact action value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Accept,
    Reject,
}

impl Decision {
    pub const ACCEPT_VALUE: &'static str = "accept";
    pub const REJECT_VALUE: &'static str = "reject";

    pub fn from_action_value(value: &str) -> Option<Self> {
        match value {
            Self::ACCEPT_VALUE => Some(Self::Accept),
            Self::REJECT_VALUE => Some(Self::Reject),
            _ => None,
        }
    }

    pub fn action_value(&self) -> &'static str {
        match self {
            Self::Accept => Self::ACCEPT_VALUE,
            Self::Reject => Self::REJECT_VALUE,
        }
    }
}
