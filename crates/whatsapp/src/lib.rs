//! WhatsApp Cloud API integration.
//!
//! - **Events** (`events`) - decode webhook notifications into dialogue input events
//! - **Messages** (`messages`) - text, reply-button and list message payloads
//! - **Gateway** (`gateway`) - `MessagingGateway` backed by the Cloud API with retry
//!
//! # Flow
//!
//! ```text
//! Webhook POST → WebhookPayload::decode → DialogueEngine::handle
//!                                              ↓
//!                     CloudApiGateway ← OutboundPrompt
//! ```

pub mod events;
pub mod gateway;
pub mod messages;

pub use events::{DecodedBatch, SkippedMessage, WebhookPayload};
pub use gateway::{CloudApiGateway, RetryPolicy};
pub use messages::{MessageBuilder, MessageError, OutboundMessage};
