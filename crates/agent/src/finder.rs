use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use knowbot_core::config::{FinderConfig, RoutingConfig};

/// Looks up the people most likely to answer a question.
///
/// Implementations never fail: an unreachable or misbehaving backend yields an
/// empty list, which the router reports to the asker as "nobody found".
#[async_trait]
pub trait CandidateFinder: Send + Sync {
    async fn find_candidates(&self, team_id: &str, asker_id: &str, question: &str) -> Vec<String>;
}

#[derive(Debug, Error)]
pub enum FinderError {
    #[error("failed to build finder client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("finder request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("finder returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("finder response could not be decoded: {0}")]
    Decode(#[source] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct FinderResponse {
    #[serde(default)]
    users: Vec<FinderUser>,
}

#[derive(Debug, Deserialize)]
struct FinderUser {
    user_id: String,
}

/// Client for the social-search service's `GET /ask` endpoint.
#[derive(Clone, Debug)]
pub struct HttpCandidateFinder {
    client: reqwest::Client,
    ask_url: String,
    max_candidates: usize,
}

impl HttpCandidateFinder {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        max_candidates: usize,
    ) -> Result<Self, FinderError> {
        let client =
            reqwest::Client::builder().timeout(timeout).build().map_err(FinderError::Client)?;
        Ok(Self {
            client,
            ask_url: format!("{}/ask", base_url.trim_end_matches('/')),
            max_candidates,
        })
    }

    pub fn from_config(finder: &FinderConfig, routing: &RoutingConfig) -> Result<Self, FinderError> {
        Self::new(
            &finder.base_url,
            Duration::from_secs(finder.timeout_secs),
            routing.max_candidates,
        )
    }

    async fn fetch(&self, team_id: &str, question: &str) -> Result<Vec<String>, FinderError> {
        let response = self
            .client
            .get(&self.ask_url)
            .query(&[("q", question), ("team", team_id)])
            .send()
            .await
            .map_err(FinderError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FinderError::Status(status));
        }

        let body: FinderResponse = response.json().await.map_err(FinderError::Decode)?;
        Ok(body.users.into_iter().map(|user| user.user_id).collect())
    }
}

#[async_trait]
impl CandidateFinder for HttpCandidateFinder {
    async fn find_candidates(&self, team_id: &str, asker_id: &str, question: &str) -> Vec<String> {
        match self.fetch(team_id, question).await {
            Ok(users) => {
                let candidates = select_candidates(users, asker_id, self.max_candidates);
                debug!(
                    event_name = "finder.lookup.completed",
                    asker_id,
                    candidate_count = candidates.len(),
                    "candidate lookup completed"
                );
                candidates
            }
            Err(error) => {
                warn!(
                    event_name = "finder.lookup.failed",
                    asker_id,
                    error = %error,
                    "candidate lookup failed; treating as no candidates"
                );
                Vec::new()
            }
        }
    }
}

/// Drops the asker and keeps at most `limit` users, in the finder's order.
pub fn select_candidates<I>(users: I, asker_id: &str, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    users.into_iter().filter(|user_id| user_id != asker_id).take(limit).collect()
}
