//! Slack Integration - the bot's chat surface
//!
//! This crate provides the Slack interface for knowbot:
//! - **Events** (`events`) - direct messages, mentions, and button clicks routed to handlers
//! - **Conversations** (`conversation`) - suspended per-user exchanges the router and relay wait on
//! - **Gateway** (`gateway`) - outbound Web API calls (`conversations.open`, `chat.postMessage`)
//! - **Block Kit** (`blocks`) - message templates, including the accept/reject answer card
//! - **Socket Mode** (`socket`) - websocket event loop for custom integrations
//! - **Payloads** (`payload`, `signature`) - Events API / interactivity decoding and request verification
//!
//! # Architecture
//!
//! ```text
//! Slack Events → EventDispatcher → open conversation? → ConversationHub → waiting task
//!                       ↓ otherwise
//!              DirectMessageService / MentionService (knowbot-agent)
//!                       ↓
//!              MessagingGateway → Slack Web API
//! ```
//!
//! # Key Types
//!
//! - `SocketModeRunner` - WebSocket event loop with reconnection logic
//! - `EventDispatcher` - Routes events to appropriate handlers
//! - `ConversationHub` - Delivers replies to the conversation waiting for them
//! - `MessagingGateway` - Trait for posting messages and opening DM channels

pub mod blocks;
pub mod conversation;
pub mod events;
pub mod gateway;
pub mod payload;
pub mod signature;
pub mod socket;

pub use conversation::{Conversation, ConversationError, ConversationHub, ConversationKey, Reply};
pub use gateway::{GatewayError, MessagingGateway, SlackWebApiGateway};
