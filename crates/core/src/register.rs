use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::domain::answer::{CallbackToken, PendingAnswer};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterSettings {
    pub capacity: usize,
    pub ttl: Duration,
}

impl Default for RegisterSettings {
    fn default() -> Self {
        Self { capacity: 1_024, ttl: Duration::from_secs(25 * 60 * 60) }
    }
}

#[derive(Clone, Debug)]
struct RegisterEntry {
    record: PendingAnswer,
    inserted_at: Instant,
}

/// Answers awaiting the asker's accept/reject decision, keyed by callback token.
///
/// Every mutation happens under one write lock, so a token is either absent or
/// maps to a complete record. Because tokens are time-ordered, the first key of
/// the map is always the oldest entry.
#[derive(Debug)]
pub struct AnswerRegister {
    entries: RwLock<BTreeMap<CallbackToken, RegisterEntry>>,
    settings: RegisterSettings,
}

impl Default for AnswerRegister {
    fn default() -> Self {
        Self::new(RegisterSettings::default())
    }
}

impl AnswerRegister {
    pub fn new(settings: RegisterSettings) -> Self {
        Self { entries: RwLock::new(BTreeMap::new()), settings }
    }

    pub fn settings(&self) -> &RegisterSettings {
        &self.settings
    }

    /// Stores `record` under `token`. Returns the tokens evicted to make room.
    pub async fn put(&self, token: CallbackToken, record: PendingAnswer) -> Vec<CallbackToken> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let mut evicted = expire_locked(&mut entries, now, self.settings.ttl);

        while !entries.contains_key(&token) && entries.len() >= self.settings.capacity.max(1) {
            match entries.pop_first() {
                Some((oldest, _)) => evicted.push(oldest),
                None => break,
            }
        }

        entries.insert(token, RegisterEntry { record, inserted_at: now });
        evicted
    }

    pub async fn get(&self, token: &CallbackToken) -> Option<PendingAnswer> {
        let entries = self.entries.read().await;
        entries
            .get(token)
            .filter(|entry| !is_expired(entry, Instant::now(), self.settings.ttl))
            .map(|entry| entry.record.clone())
    }

    /// Removes and returns the record, unless it is missing or already expired.
    pub async fn take(&self, token: &CallbackToken) -> Option<PendingAnswer> {
        let mut entries = self.entries.write().await;
        entries
            .remove(token)
            .filter(|entry| !is_expired(entry, Instant::now(), self.settings.ttl))
            .map(|entry| entry.record)
    }

    pub async fn remove(&self, token: &CallbackToken) -> bool {
        self.entries.write().await.remove(token).is_some()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drops every entry older than the configured TTL. Returns how many went.
    pub async fn evict_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        expire_locked(&mut entries, Instant::now(), self.settings.ttl).len()
    }
}

fn is_expired(entry: &RegisterEntry, now: Instant, ttl: Duration) -> bool {
    now.saturating_duration_since(entry.inserted_at) >= ttl
}

fn expire_locked(
    entries: &mut BTreeMap<CallbackToken, RegisterEntry>,
    now: Instant,
    ttl: Duration,
) -> Vec<CallbackToken> {
    let expired: Vec<CallbackToken> = entries
        .iter()
        .filter(|(_, entry)| is_expired(entry, now, ttl))
        .map(|(token, _)| *token)
        .collect();
    for token in &expired {
        entries.remove(token);
    }
    expired
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{AnswerRegister, RegisterSettings};
    use crate::domain::answer::{CallbackToken, PendingAnswer};

    fn record(answer: &str) -> PendingAnswer {
        PendingAnswer {
            question: "how do I deploy?".to_owned(),
            answer: answer.to_owned(),
            asked_by: "U1".to_owned(),
            answered_by: "U3".to_owned(),
            team_id: "T1".to_owned(),
        }
    }

    #[tokio::test]
    async fn put_then_get_returns_identical_record() {
        let register = AnswerRegister::default();
        let token = CallbackToken::generate();

        register.put(token, record("use script X")).await;

        assert_eq!(register.get(&token).await, Some(record("use script X")));
        assert_eq!(register.get(&token).await, Some(record("use script X")));
        assert_eq!(register.len().await, 1);
    }

    #[tokio::test]
    async fn unknown_token_is_absent() {
        let register = AnswerRegister::default();
        register.put(CallbackToken::generate(), record("a")).await;

        assert_eq!(register.get(&CallbackToken::generate()).await, None);
        assert_eq!(register.take(&CallbackToken::generate()).await, None);
    }

    #[tokio::test]
    async fn take_and_remove_clear_the_entry() {
        let register = AnswerRegister::default();
        let accepted = CallbackToken::generate();
        let rejected = CallbackToken::generate();
        register.put(accepted, record("a")).await;
        register.put(rejected, record("b")).await;

        assert_eq!(register.take(&accepted).await, Some(record("a")));
        assert_eq!(register.take(&accepted).await, None);
        assert!(register.remove(&rejected).await);
        assert!(!register.remove(&rejected).await);
        assert!(register.is_empty().await);
    }

    #[tokio::test]
    async fn full_register_evicts_oldest_token() {
        let register =
            AnswerRegister::new(RegisterSettings { capacity: 2, ttl: Duration::from_secs(60) });
        let first = CallbackToken::generate();
        let second = CallbackToken::generate();
        let third = CallbackToken::generate();

        assert!(register.put(first, record("1")).await.is_empty());
        assert!(register.put(second, record("2")).await.is_empty());
        let evicted = register.put(third, record("3")).await;

        assert_eq!(evicted, vec![first]);
        assert_eq!(register.get(&first).await, None);
        assert_eq!(register.get(&third).await, Some(record("3")));
        assert_eq!(register.len().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let register =
            AnswerRegister::new(RegisterSettings { capacity: 8, ttl: Duration::from_secs(30) });
        let stale = CallbackToken::generate();
        register.put(stale, record("old")).await;

        tokio::time::advance(Duration::from_secs(20)).await;
        let fresh = CallbackToken::generate();
        register.put(fresh, record("new")).await;
        assert_eq!(register.get(&stale).await, Some(record("old")));

        tokio::time::advance(Duration::from_secs(15)).await;
        assert_eq!(register.get(&stale).await, None);
        assert_eq!(register.take(&stale).await, None);
        assert_eq!(register.evict_expired().await, 0);
        assert_eq!(register.get(&fresh).await, Some(record("new")));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(register.evict_expired().await, 1);
        assert!(register.is_empty().await);
    }

    #[tokio::test]
    async fn concurrent_puts_are_all_visible() {
        let register = Arc::new(AnswerRegister::default());
        let mut handles = Vec::new();
        for index in 0..32 {
            let register = register.clone();
            handles.push(tokio::spawn(async move {
                let token = CallbackToken::generate();
                register.put(token, record(&format!("answer-{index}"))).await;
                token
            }));
        }

        let mut tokens = Vec::new();
        for handle in handles {
            tokens.push(handle.await.expect("task"));
        }

        assert_eq!(register.len().await, 32);
        for token in tokens {
            assert!(register.get(&token).await.is_some());
        }
    }
}
