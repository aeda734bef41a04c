use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use knowbot_core::register::AnswerRegister;

/// Periodically drops answers the asker never decided on.
pub fn spawn(
    register: Arc<AnswerRegister>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = register.evict_expired().await;
                    if evicted > 0 {
                        let remaining = register.len().await;
                        info!(
                            event_name = "register.sweep.evicted",
                            evicted,
                            remaining,
                            "expired pending answers dropped"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    debug!(event_name = "register.sweep.stopped", "register sweeper stopping");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::watch;

    use knowbot_core::domain::answer::{CallbackToken, PendingAnswer};
    use knowbot_core::register::{AnswerRegister, RegisterSettings};

    fn pending() -> PendingAnswer {
        PendingAnswer {
            question: "q".to_string(),
            answer: "a".to_string(),
            asked_by: "U1".to_string(),
            answered_by: "U2".to_string(),
            team_id: "T1".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sweeps_expired_entries_until_shutdown() {
        let register = Arc::new(AnswerRegister::new(RegisterSettings {
            capacity: 16,
            ttl: Duration::from_secs(10),
        }));
        register.put(CallbackToken::generate(), pending()).await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = super::spawn(register.clone(), Duration::from_secs(5), shutdown_rx);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(register.len().await, 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(register.is_empty().await);

        shutdown_tx.send_replace(true);
        handle.await.expect("sweeper stops cleanly");
    }
}
