pub mod concurrency;
pub mod engine;
pub mod graph;
pub mod prompts;
pub mod session;
pub mod states;

pub use concurrency::{ContactGuard, ContactLocks, DeliveryLedger};
pub use engine::{Collaborators, DialogueEngine, DialogueError, EngineSettings};
pub use graph::{evaluate, missing_fields, required_fields, GraphError, Outcome, Rejection};
pub use session::{InMemorySessionStore, Session, SessionStore, StoreError};
pub use states::{
    DialogueState, Field, InboundEvent, Input, Intent, OutboundPrompt, PromptKind, ReplyOption,
};
