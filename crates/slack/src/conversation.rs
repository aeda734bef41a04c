use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use knowbot_core::domain::answer::CallbackToken;

use crate::blocks::MessageTemplate;
use crate::gateway::{GatewayError, MessagingGateway};

/// Where an inbound reply is addressed.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConversationKey {
    Direct { user_id: String, channel_id: String },
    Callback(CallbackToken),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    /// A button click. `callback_id` is the block id the click came from.
    Action { value: String, callback_id: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConversationError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("conversation has no outbound channel")]
    NoChannel,
    #[error("conversation reply stream closed")]
    Closed,
}

#[derive(Default)]
struct Slot {
    turn: Arc<tokio::sync::Mutex<()>>,
    sender: Option<UnboundedSender<Reply>>,
    holders: usize,
}

/// Routing table from a user's DM channel or a callback token to the
/// conversation currently suspended on it.
///
/// At most one direct conversation per (user, channel) is open at a time;
/// later openers wait for their turn.
#[derive(Default)]
pub struct ConversationHub {
    slots: Mutex<HashMap<ConversationKey, Slot>>,
}

impl ConversationHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<ConversationKey, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn open_direct(
        self: &Arc<Self>,
        gateway: Arc<dyn MessagingGateway>,
        user_id: &str,
    ) -> Result<Conversation, ConversationError> {
        let channel_id = gateway.open_direct_channel(user_id).await?;
        let key = ConversationKey::Direct { user_id: user_id.to_owned(), channel_id: channel_id.clone() };

        let hold = self.hold(&key);
        let turn = {
            let mut slots = self.slots();
            slots.entry(key.clone()).or_default().turn.clone()
        };
        let guard = turn.lock_owned().await;

        let receiver = self.install(&key);
        debug!(event_name = "conversation.direct.opened", user_id, channel_id = %channel_id, "direct conversation opened");
        Ok(Conversation {
            hub: self.clone(),
            key,
            outbound: Some((gateway, channel_id)),
            receiver,
            _turn: Some(guard),
            _hold: hold,
        })
    }

    /// Opens the wait for a button click on the message tagged with `token`.
    pub fn open_callback(self: &Arc<Self>, token: CallbackToken) -> Conversation {
        let key = ConversationKey::Callback(token);
        let hold = self.hold(&key);
        let receiver = self.install(&key);
        Conversation {
            hub: self.clone(),
            key,
            outbound: None,
            receiver,
            _turn: None,
            _hold: hold,
        }
    }

    /// Hands `reply` to the conversation waiting on `key`. Returns false when
    /// nothing is listening there.
    pub fn deliver(&self, key: &ConversationKey, reply: Reply) -> bool {
        let slots = self.slots();
        match slots.get(key).and_then(|slot| slot.sender.as_ref()) {
            Some(sender) => sender.send(reply).is_ok(),
            None => false,
        }
    }

    pub fn is_listening(&self, key: &ConversationKey) -> bool {
        self.slots().get(key).is_some_and(|slot| slot.sender.is_some())
    }

    pub fn open_count(&self) -> usize {
        self.slots().values().filter(|slot| slot.sender.is_some()).count()
    }

    fn hold(self: &Arc<Self>, key: &ConversationKey) -> SlotHold {
        self.slots().entry(key.clone()).or_default().holders += 1;
        SlotHold { hub: self.clone(), key: key.clone() }
    }

    fn install(&self, key: &ConversationKey) -> UnboundedReceiver<Reply> {
        let (sender, receiver) = unbounded_channel();
        self.slots().entry(key.clone()).or_default().sender = Some(sender);
        receiver
    }

    fn clear_sender(&self, key: &ConversationKey) {
        if let Some(slot) = self.slots().get_mut(key) {
            slot.sender = None;
        }
    }

    fn release(&self, key: &ConversationKey) {
        let mut slots = self.slots();
        let empty = match slots.get_mut(key) {
            Some(slot) => {
                slot.holders = slot.holders.saturating_sub(1);
                slot.holders == 0
            }
            None => false,
        };
        if empty {
            slots.remove(key);
        }
    }
}

struct SlotHold {
    hub: Arc<ConversationHub>,
    key: ConversationKey,
}

impl Drop for SlotHold {
    fn drop(&mut self) {
        self.hub.release(&self.key);
    }
}

/// A suspended exchange with one user (or one interactive message).
///
/// Dropping the conversation stops delivery to it and lets the next waiter
/// for the same channel proceed.
pub struct Conversation {
    hub: Arc<ConversationHub>,
    key: ConversationKey,
    outbound: Option<(Arc<dyn MessagingGateway>, String)>,
    receiver: UnboundedReceiver<Reply>,
    // Field order matters: the turn is released before the slot hold.
    _turn: Option<OwnedMutexGuard<()>>,
    _hold: SlotHold,
}

impl Conversation {
    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    pub async fn say(&self, message: &MessageTemplate) -> Result<(), ConversationError> {
        let (gateway, channel_id) = self.outbound.as_ref().ok_or(ConversationError::NoChannel)?;
        gateway.post_message(channel_id, message).await.map_err(ConversationError::from)
    }

    /// Waits for the next reply. `Ok(None)` means the timeout elapsed.
    pub async fn next_reply(&mut self, timeout: Duration) -> Result<Option<Reply>, ConversationError> {
        match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Ok(Some(reply)) => Ok(Some(reply)),
            Ok(None) => Err(ConversationError::Closed),
            Err(_) => Ok(None),
        }
    }

    pub async fn ask(
        &mut self,
        message: &MessageTemplate,
        timeout: Duration,
    ) -> Result<Option<Reply>, ConversationError> {
        self.say(message).await?;
        self.next_reply(timeout).await
    }
}

impl Drop for Conversation {
    fn drop(&mut self) {
        self.hub.clear_sender(&self.key);
    }
}
