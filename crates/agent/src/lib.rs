//! Question routing for knowbot.
//!
//! A direct message to the bot starts an *episode*:
//! 1. **Finder** (`finder`) asks the social-search service who might know.
//! 2. **Router** (`router`) talks to each candidate concurrently, driven by
//!    the candidate flow in `knowbot_core::flows`.
//! 3. **Relay** (`relay`) shows the first answer to the asker and archives it
//!    when they accept.
//!
//! `KnowbotService` plugs all of this, plus the ping responder, into the
//! Slack event handlers.

pub mod finder;
pub mod ping;
pub mod relay;
pub mod router;
pub mod service;

pub use finder::{select_candidates, CandidateFinder, FinderError, HttpCandidateFinder};
pub use ping::is_ping;
pub use relay::{AnswerRelay, DecisionOutcome, RelayRequest};
pub use router::{CandidateReport, EpisodeSummary, QuestionRouter, RouterSettings};
pub use service::KnowbotService;
