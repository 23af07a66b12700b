//! Free-text fallback for the intake dialogue.
//!
//! The dialogue itself is a deterministic state machine. This crate is only
//! consulted when a contact writes something the main menu cannot match:
//! - `llm` talks to an OpenAI-compatible chat completions endpoint
//! - `guardrails` checks each generated reply before it is sent
//! - `fallback` adapts both to the core `FallbackResponder` seam
//!
//! The model never writes form fields and never decides the next state.

pub mod fallback;
pub mod guardrails;
pub mod llm;

pub use fallback::{LlmFallbackResponder, DEFAULT_PERSONA};
pub use guardrails::{GuardrailDecision, ReplyPolicy};
pub use llm::{ChatCompletionsClient, ChatRequest, LlmClient, LlmError};
