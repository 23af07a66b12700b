pub mod audit;
pub mod collaborators;
pub mod config;
pub mod dialogue;
pub mod errors;
pub mod validators;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use collaborators::{
    AddressEnrichment, CollaboratorError, FallbackResponder, MessagingGateway, RecordSink,
    RecordSubmission,
};
pub use dialogue::{
    Collaborators, DialogueEngine, DialogueError, DialogueState, EngineSettings, Field,
    InMemorySessionStore, InboundEvent, Input, Intent, OutboundPrompt, ReplyOption, Session,
    SessionStore, StoreError,
};
pub use errors::{ApplicationError, InterfaceError};
pub use validators::{FieldKind, ValidationError};
