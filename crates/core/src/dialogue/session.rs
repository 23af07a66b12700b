use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::dialogue::graph::Advance;
use crate::dialogue::states::{DialogueState, Field, Intent};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub contact_id: String,
    pub display_name: String,
    pub state: DialogueState,
    pub intent: Option<Intent>,
    pub returning: bool,
    pub fields: BTreeMap<Field, String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub version: u64,
    pub submit_attempts: u32,
}

impl Session {
    pub fn new(contact_id: &str, display_name: &str, channel: &str) -> Self {
        Self::started_at(contact_id, display_name, channel, Utc::now())
    }

    pub fn started_at(
        contact_id: &str,
        display_name: &str,
        channel: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(Field::Phone, contact_id.to_string());
        fields.insert(Field::DisplayName, display_name.to_string());
        fields.insert(Field::Channel, channel.to_string());

        Self {
            contact_id: contact_id.to_string(),
            display_name: display_name.to_string(),
            state: DialogueState::Welcome,
            intent: None,
            returning: false,
            fields,
            created_at: now,
            last_activity_at: now,
            version: 0,
            submit_attempts: 0,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let idle = now.signed_duration_since(self.last_activity_at);
        idle.to_std().map(|idle| idle > timeout).unwrap_or(false)
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity_at = now;
    }

    /// Applies an accepted answer. The intent is write-once.
    pub fn apply(&mut self, advance: &Advance) {
        if self.intent.is_none() {
            self.intent = advance.intent;
        }
        if let Some(returning) = advance.returning {
            self.returning = returning;
        }
        for (field, value) in &advance.writes {
            if matches!(field, Field::Intent | Field::RecordType)
                && self.fields.contains_key(field)
            {
                continue;
            }
            self.fields.insert(*field, value.clone());
        }
        self.state = advance.to;
    }

    /// Drops every collected answer while keeping context and the chosen intent.
    pub fn rewind_for_edit(&mut self) {
        self.fields.retain(|field, _| field.is_context());
        self.returning = false;
        self.submit_attempts = 0;
        self.state = DialogueState::ReturningContact;
    }

    pub fn field(&self, field: Field) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    pub fn pending_record(&self) -> BTreeMap<String, String> {
        self.fields.iter().map(|(field, value)| (field.as_str().to_string(), value.clone())).collect()
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("session store backend error: {0}")]
    Backend(String),
    #[error("session decode error: {0}")]
    Decode(String),
}

/// Keyed session persistence. `compare_and_swap` writes only when the stored
/// version equals `expected_version` (`None` means "no session stored").
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, contact_id: &str) -> Result<Option<Session>, StoreError>;
    async fn put(&self, session: Session) -> Result<(), StoreError>;
    async fn delete(&self, contact_id: &str) -> Result<(), StoreError>;
    async fn compare_and_swap(
        &self,
        expected_version: Option<u64>,
        session: Session,
    ) -> Result<bool, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, contact_id: &str) -> Result<Option<Session>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(contact_id).cloned())
    }

    async fn put(&self, session: Session) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.contact_id.clone(), session);
        Ok(())
    }

    async fn delete(&self, contact_id: &str) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(contact_id);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        expected_version: Option<u64>,
        session: Session,
    ) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.write().await;
        let current = sessions.get(&session.contact_id).map(|stored| stored.version);
        if current != expected_version {
            return Ok(false);
        }
        sessions.insert(session.contact_id.clone(), session);
        Ok(true)
    }
}
