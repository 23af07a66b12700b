use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
use crate::collaborators::{
    AddressEnrichment, DiscardingRecordSink, FallbackResponder, LoggingGateway, MessagingGateway,
    NoopAddressEnrichment, NoopFallbackResponder, RecordSink, RecordSubmission,
};
use crate::config::AppConfig;
use crate::dialogue::concurrency::{ContactLocks, DeliveryLedger};
use crate::dialogue::graph::{
    self, Advance, Expect, GraphError, Outcome, Rejection, CONFIRMATION_OPTIONS, MAIN_MENU,
};
use crate::dialogue::prompts;
use crate::dialogue::session::{Session, SessionStore, StoreError};
use crate::dialogue::states::{DialogueState, Field, InboundEvent, Input, OutboundPrompt};
use crate::validators::fold;

const CAS_ATTEMPTS: usize = 3;

#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub session_timeout: Duration,
    pub dedup_window: Duration,
    pub dedup_per_contact: usize,
    pub max_submit_attempts: u32,
    pub reset_keywords: Vec<String>,
    pub route: String,
    pub secret: SecretString,
    pub channel: String,
    pub directory_text: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(600),
            dedup_window: Duration::from_secs(3600),
            dedup_per_contact: 64,
            max_submit_attempts: 3,
            reset_keywords: vec!["reiniciar".to_string(), "cancelar".to_string()],
            route: "chatbot".to_string(),
            secret: String::new().into(),
            channel: "chatbot oficina".to_string(),
            directory_text: prompts::DEFAULT_DIRECTORY.to_string(),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let dialogue = &config.dialogue;
        Self {
            session_timeout: Duration::from_secs(dialogue.session_timeout_secs),
            dedup_window: Duration::from_secs(dialogue.dedup_window_secs),
            dedup_per_contact: dialogue.dedup_per_contact,
            max_submit_attempts: dialogue.max_submit_attempts,
            reset_keywords: dialogue.reset_keywords.clone(),
            route: config.record_sink.route.clone(),
            secret: config.record_sink.secret.clone(),
            channel: dialogue.channel.clone(),
            directory_text: dialogue
                .directory_text
                .clone()
                .unwrap_or_else(|| prompts::DEFAULT_DIRECTORY.to_string()),
        }
    }

    fn is_reset_keyword(&self, text: &str) -> bool {
        let folded = fold(text);
        self.reset_keywords.iter().any(|keyword| fold(keyword) == folded)
    }
}

#[derive(Clone)]
pub struct Collaborators {
    pub gateway: Arc<dyn MessagingGateway>,
    pub sink: Arc<dyn RecordSink>,
    pub address: Arc<dyn AddressEnrichment>,
    pub fallback: Arc<dyn FallbackResponder>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            gateway: Arc::new(LoggingGateway),
            sink: Arc::new(DiscardingRecordSink),
            address: Arc::new(NoopAddressEnrichment),
            fallback: Arc::new(NoopFallbackResponder),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DialogueError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("missing required fields before {state:?}: {missing:?}")]
    MissingRequiredFields { state: DialogueState, missing: Vec<Field> },
    #[error("session for contact `{contact_id}` was modified concurrently")]
    ConcurrentModification { contact_id: String },
}

/// Drives one contact's questionnaire per inbound event.
///
/// Mutation is serialized per contact; every persisted write is a
/// compare-and-swap on the session version, and outbound prompts are sent only
/// after the new state is stored.
pub struct DialogueEngine {
    store: Arc<dyn SessionStore>,
    collaborators: Collaborators,
    audit: Arc<dyn AuditSink>,
    settings: EngineSettings,
    locks: ContactLocks,
    ledger: DeliveryLedger,
}

impl DialogueEngine {
    pub fn new(
        store: Arc<dyn SessionStore>,
        collaborators: Collaborators,
        settings: EngineSettings,
    ) -> Self {
        let ledger = DeliveryLedger::new(settings.dedup_window, settings.dedup_per_contact);
        Self {
            store,
            collaborators,
            audit: Arc::new(TracingAuditSink),
            settings,
            locks: ContactLocks::new(),
            ledger,
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn gateway(&self) -> &Arc<dyn MessagingGateway> {
        &self.collaborators.gateway
    }

    pub async fn handle(&self, event: InboundEvent) -> Result<Vec<OutboundPrompt>, DialogueError> {
        self.handle_at(event, Utc::now()).await
    }

    pub async fn handle_at(
        &self,
        event: InboundEvent,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboundPrompt>, DialogueError> {
        let correlation_id =
            event.delivery_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        let _guard = self.locks.acquire(&event.contact_id).await;

        if let Some(delivery_id) = event.delivery_id.as_deref() {
            if self.ledger.contains(&event.contact_id, delivery_id, now) {
                info!(
                    event_name = "dialogue.delivery.duplicate",
                    contact_id = %event.contact_id,
                    correlation_id = %correlation_id,
                    "duplicate delivery acknowledged without processing"
                );
                self.emit(
                    &event.contact_id,
                    &correlation_id,
                    "ingress.duplicate_ignored",
                    AuditCategory::Ingress,
                    AuditOutcome::Rejected,
                );
                return Ok(Vec::new());
            }
        }

        let mut attempt = 0;
        let prompts = loop {
            attempt += 1;
            match self.process(&event, now, &correlation_id).await {
                Err(DialogueError::ConcurrentModification { .. }) if attempt < CAS_ATTEMPTS => {
                    warn!(
                        event_name = "dialogue.session.conflict",
                        contact_id = %event.contact_id,
                        correlation_id = %correlation_id,
                        attempt,
                        "session changed underneath; re-evaluating"
                    );
                }
                other => break other?,
            }
        };

        if let Some(delivery_id) = event.delivery_id.as_deref() {
            self.ledger.record(&event.contact_id, delivery_id, now);
        }
        self.deliver(&prompts, &correlation_id).await;
        Ok(prompts)
    }

    async fn process(
        &self,
        event: &InboundEvent,
        now: DateTime<Utc>,
        correlation_id: &str,
    ) -> Result<Vec<OutboundPrompt>, DialogueError> {
        let contact_id = event.contact_id.as_str();

        let Some(session) = self.store.get(contact_id).await? else {
            return self.start_session(event, now, correlation_id, None).await;
        };

        if session.is_expired(now, self.settings.session_timeout) {
            self.store.delete(contact_id).await?;
            info!(
                event_name = "dialogue.session.expired",
                contact_id,
                correlation_id,
                state = session.state.as_str(),
                "session expired; starting over"
            );
            self.emit(
                contact_id,
                correlation_id,
                "session.expired",
                AuditCategory::Dialogue,
                AuditOutcome::Success,
            );
            let notice = OutboundPrompt::text(contact_id, prompts::SESSION_EXPIRED);
            return self.start_session(event, now, correlation_id, Some(notice)).await;
        }

        if let Input::Text(text) = &event.input {
            if self.settings.is_reset_keyword(text) {
                self.store.delete(contact_id).await?;
                info!(
                    event_name = "dialogue.session.reset",
                    contact_id,
                    correlation_id,
                    state = session.state.as_str(),
                    "session reset by contact"
                );
                self.emit(
                    contact_id,
                    correlation_id,
                    "session.reset",
                    AuditCategory::Dialogue,
                    AuditOutcome::Success,
                );
                return self.start_session(event, now, correlation_id, None).await;
            }
        }

        match graph::evaluate(&session, &event.input)? {
            Outcome::Advanced(advance) => self.advance(session, advance, now, correlation_id).await,
            Outcome::Rejected(rejection) => self.reject(&session, &rejection, correlation_id),
            Outcome::Unmatched => self.fallback(&session, event.input.value(), correlation_id).await,
            Outcome::Informational(intent) => {
                self.store.delete(contact_id).await?;
                self.emit(
                    contact_id,
                    correlation_id,
                    "session.informational_completed",
                    AuditCategory::Dialogue,
                    AuditOutcome::Success,
                );
                debug!(
                    event_name = "dialogue.session.informational",
                    contact_id,
                    intent = intent.as_str(),
                    "informational intent served"
                );
                Ok(vec![
                    OutboundPrompt::text(contact_id, self.settings.directory_text.clone()),
                    OutboundPrompt::text(contact_id, prompts::DIRECTORY_CLOSING),
                ])
            }
            Outcome::Commit => {
                self.commit(session, now, correlation_id, event.delivery_id.as_deref()).await
            }
            Outcome::Edit => self.edit(session, now, correlation_id).await,
        }
    }

    async fn start_session(
        &self,
        event: &InboundEvent,
        now: DateTime<Utc>,
        correlation_id: &str,
        preface: Option<OutboundPrompt>,
    ) -> Result<Vec<OutboundPrompt>, DialogueError> {
        let session = Session::started_at(
            &event.contact_id,
            &event.display_name,
            &self.settings.channel,
            now,
        );
        self.swap(None, session.clone()).await?;

        info!(
            event_name = "dialogue.session.started",
            contact_id = %event.contact_id,
            correlation_id,
            "session started"
        );
        self.emit(
            &event.contact_id,
            correlation_id,
            "session.started",
            AuditCategory::Dialogue,
            AuditOutcome::Success,
        );

        let mut out: Vec<OutboundPrompt> = preface.into_iter().collect();
        out.push(self.prompt_for(&session)?);
        Ok(out)
    }

    async fn advance(
        &self,
        mut session: Session,
        advance: Advance,
        now: DateTime<Utc>,
        correlation_id: &str,
    ) -> Result<Vec<OutboundPrompt>, DialogueError> {
        let from = session.state;
        let expected = session.version;
        session.apply(&advance);

        if from == DialogueState::PostalCode {
            self.enrich_address(&mut session, correlation_id).await;
        }
        if from == DialogueState::Cpf && session.returning {
            self.prefill_returning(&mut session, correlation_id).await;
        }
        if session.state == DialogueState::Confirmation {
            let missing = graph::missing_fields(&session)?;
            if !missing.is_empty() {
                return Err(DialogueError::MissingRequiredFields { state: from, missing });
            }
        }

        session.touch(now);
        session.version += 1;
        self.swap(Some(expected), session.clone()).await?;

        self.audit.emit(
            AuditEvent::new(
                &session.contact_id,
                correlation_id,
                "dialogue.transition_applied",
                AuditCategory::Dialogue,
                AuditOutcome::Success,
            )
            .with_metadata("from", from.as_str())
            .with_metadata("to", session.state.as_str()),
        );

        Ok(vec![self.prompt_for(&session)?])
    }

    fn reject(
        &self,
        session: &Session,
        rejection: &Rejection,
        correlation_id: &str,
    ) -> Result<Vec<OutboundPrompt>, DialogueError> {
        let reason = match rejection {
            Rejection::Invalid(error) => error.user_message(),
            Rejection::InvalidOption => prompts::INVALID_OPTION.to_string(),
            Rejection::UnexpectedOption => prompts::TYPED_ANSWER_EXPECTED.to_string(),
        };
        debug!(
            event_name = "dialogue.input.rejected",
            contact_id = %session.contact_id,
            correlation_id,
            state = session.state.as_str(),
            reason = ?rejection,
            "input rejected"
        );
        self.audit.emit(
            AuditEvent::new(
                &session.contact_id,
                correlation_id,
                "dialogue.input_rejected",
                AuditCategory::Validation,
                AuditOutcome::Rejected,
            )
            .with_metadata("state", session.state.as_str()),
        );

        let mut prompt = self.question_for(session)?;
        prompt.body = format!("{reason}\n\n{}", prompt.body);
        Ok(vec![prompt])
    }

    async fn fallback(
        &self,
        session: &Session,
        text: &str,
        correlation_id: &str,
    ) -> Result<Vec<OutboundPrompt>, DialogueError> {
        let contact_id = session.contact_id.as_str();
        let menu = OutboundPrompt::options(
            contact_id,
            prompts::MENU_REMINDER,
            prompts::reply_options(MAIN_MENU),
        );

        match self.collaborators.fallback.fallback_reply(contact_id, text).await {
            Ok(Some(reply)) => Ok(vec![OutboundPrompt::text(contact_id, reply), menu]),
            Ok(None) => self.reject(session, &Rejection::InvalidOption, correlation_id),
            Err(error) => {
                warn!(
                    event_name = "dialogue.fallback.failed",
                    contact_id,
                    correlation_id,
                    error = %error,
                    "fallback responder failed"
                );
                Ok(vec![OutboundPrompt::text(contact_id, prompts::FALLBACK_UNAVAILABLE), menu])
            }
        }
    }

    async fn commit(
        &self,
        mut session: Session,
        now: DateTime<Utc>,
        correlation_id: &str,
        delivery_id: Option<&str>,
    ) -> Result<Vec<OutboundPrompt>, DialogueError> {
        let contact_id = session.contact_id.clone();
        let missing = graph::missing_fields(&session)?;
        if !missing.is_empty() {
            return Err(DialogueError::MissingRequiredFields { state: session.state, missing });
        }

        let submission = RecordSubmission {
            route: self.settings.route.clone(),
            secret: self.settings.secret.clone(),
            fields: session.pending_record(),
        };

        match self.collaborators.sink.submit_record(&submission).await {
            Ok(()) => {
                if let Some(delivery_id) = delivery_id {
                    self.ledger.record(&contact_id, delivery_id, now);
                }
                // The sink accepted the record: a teardown failure must not lead
                // to a second submission, so the acknowledgment still goes out.
                if let Err(store_error) = self.store.delete(&contact_id).await {
                    error!(
                        event_name = "dialogue.session.teardown_failed",
                        contact_id = %contact_id,
                        correlation_id,
                        error = %store_error,
                        "session teardown failed after record submission"
                    );
                }
                info!(
                    event_name = "dialogue.record.submitted",
                    contact_id = %contact_id,
                    correlation_id,
                    route = %submission.route,
                    "record submitted"
                );
                self.audit.emit(
                    AuditEvent::new(
                        &contact_id,
                        correlation_id,
                        "record.submitted",
                        AuditCategory::Submission,
                        AuditOutcome::Success,
                    )
                    .with_metadata("route", submission.route.clone()),
                );
                Ok(vec![OutboundPrompt::text(&contact_id, prompts::SUBMITTED)])
            }
            Err(failure) => {
                session.submit_attempts += 1;
                self.audit.emit(
                    AuditEvent::new(
                        &contact_id,
                        correlation_id,
                        "record.submission_failed",
                        AuditCategory::Submission,
                        AuditOutcome::Failed,
                    )
                    .with_metadata("attempt", session.submit_attempts.to_string())
                    .with_metadata("error", failure.to_string()),
                );

                if session.submit_attempts >= self.settings.max_submit_attempts {
                    self.store.delete(&contact_id).await?;
                    error!(
                        event_name = "dialogue.record.abandoned",
                        contact_id = %contact_id,
                        correlation_id,
                        attempts = session.submit_attempts,
                        error = %failure,
                        "record submission retries exhausted; manual follow-up required"
                    );
                    return Ok(vec![OutboundPrompt::text(&contact_id, prompts::MANUAL_FOLLOW_UP)]);
                }

                warn!(
                    event_name = "dialogue.record.failed",
                    contact_id = %contact_id,
                    correlation_id,
                    attempts = session.submit_attempts,
                    error = %failure,
                    "record submission failed"
                );
                let expected = session.version;
                session.touch(now);
                session.version += 1;
                self.swap(Some(expected), session).await?;

                Ok(vec![OutboundPrompt::options(
                    &contact_id,
                    prompts::SUBMIT_RETRY,
                    prompts::reply_options(CONFIRMATION_OPTIONS),
                )])
            }
        }
    }

    async fn edit(
        &self,
        mut session: Session,
        now: DateTime<Utc>,
        correlation_id: &str,
    ) -> Result<Vec<OutboundPrompt>, DialogueError> {
        let expected = session.version;
        session.rewind_for_edit();
        session.touch(now);
        session.version += 1;
        self.swap(Some(expected), session.clone()).await?;

        self.emit(
            &session.contact_id,
            correlation_id,
            "dialogue.edit_requested",
            AuditCategory::Dialogue,
            AuditOutcome::Success,
        );

        let mut prompt = self.prompt_for(&session)?;
        prompt.body = format!("{} {}", prompts::EDIT_PREFIX, prompt.body);
        Ok(vec![prompt])
    }

    async fn enrich_address(&self, session: &mut Session, correlation_id: &str) {
        let Some(postal_code) = session.field(Field::PostalCode).map(str::to_string) else {
            return;
        };
        let address = match self.collaborators.address.lookup_address(&postal_code).await {
            Ok(found) => found.unwrap_or_default(),
            Err(error) => {
                warn!(
                    event_name = "dialogue.address.lookup_failed",
                    contact_id = %session.contact_id,
                    correlation_id,
                    error = %error,
                    "postal code enrichment failed"
                );
                String::new()
            }
        };
        session.fields.insert(Field::Address, address);
    }

    async fn prefill_returning(&self, session: &mut Session, correlation_id: &str) {
        let Some(cpf) = session.field(Field::Cpf).map(str::to_string) else {
            return;
        };
        match self.collaborators.sink.lookup_contact(&self.settings.secret, &cpf).await {
            Ok(Some(known)) => {
                let mut filled = 0;
                for field in graph::prefill_fields() {
                    let Some(value) = known.get(field.as_str()) else {
                        continue;
                    };
                    if value.trim().is_empty() || session.fields.contains_key(&field) {
                        continue;
                    }
                    session.fields.insert(field, value.clone());
                    filled += 1;
                }
                debug!(
                    event_name = "dialogue.returning.prefilled",
                    contact_id = %session.contact_id,
                    correlation_id,
                    filled,
                    "returning contact pre-filled"
                );
            }
            Ok(None) => {}
            Err(error) => warn!(
                event_name = "dialogue.returning.lookup_failed",
                contact_id = %session.contact_id,
                correlation_id,
                error = %error,
                "returning contact lookup failed"
            ),
        }
    }

    /// Full prompt for entering the session's current state.
    fn prompt_for(&self, session: &Session) -> Result<OutboundPrompt, DialogueError> {
        let mut prompt = self.question_for(session)?;
        match session.state {
            DialogueState::Welcome => {
                prompt.body = format!("{}\n\n{}", prompts::greeting(&session.display_name), prompt.body);
            }
            DialogueState::Confirmation => {
                prompt.body = format!("{}\n\n{}", prompts::summary(session), prompt.body);
            }
            _ => {}
        }
        Ok(prompt)
    }

    /// The bare question for the current state, used when re-prompting.
    fn question_for(&self, session: &Session) -> Result<OutboundPrompt, DialogueError> {
        let node = graph::node(session.state)?;
        let body = if session.state == DialogueState::Confirmation {
            prompts::confirmation_question(session.intent)
        } else {
            node.prompt
        };
        Ok(match node.expect {
            Expect::Options(options) => OutboundPrompt::options(
                &session.contact_id,
                body,
                prompts::reply_options(options),
            ),
            Expect::Text(_) => OutboundPrompt::text(&session.contact_id, body),
        })
    }

    async fn swap(&self, expected: Option<u64>, session: Session) -> Result<(), DialogueError> {
        let contact_id = session.contact_id.clone();
        if self.store.compare_and_swap(expected, session).await? {
            Ok(())
        } else {
            Err(DialogueError::ConcurrentModification { contact_id })
        }
    }

    async fn deliver(&self, out: &[OutboundPrompt], correlation_id: &str) {
        let gateway = &self.collaborators.gateway;
        for prompt in out {
            let result = match &prompt.options {
                Some(options) => gateway.send_options(&prompt.contact_id, &prompt.body, options).await,
                None => gateway.send_text(&prompt.contact_id, &prompt.body).await,
            };
            if let Err(error) = result {
                warn!(
                    event_name = "dialogue.gateway.send_failed",
                    contact_id = %prompt.contact_id,
                    correlation_id,
                    error = %error,
                    "outbound prompt not delivered"
                );
            }
        }
    }

    fn emit(
        &self,
        contact_id: &str,
        correlation_id: &str,
        event_type: &str,
        category: AuditCategory,
        outcome: AuditOutcome,
    ) {
        self.audit.emit(AuditEvent::new(contact_id, correlation_id, event_type, category, outcome));
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use secrecy::{ExposeSecret, SecretString};

    use super::{Collaborators, DialogueEngine, DialogueError, EngineSettings};
    use crate::audit::InMemoryAuditSink;
    use crate::collaborators::{
        AddressEnrichment, CollaboratorError, FallbackResponder, MessagingGateway, RecordSink,
        RecordSubmission,
    };
    use crate::dialogue::graph::SHARED_PREFIX;
    use crate::dialogue::prompts;
    use crate::dialogue::session::{InMemorySessionStore, Session, SessionStore, StoreError};
    use crate::dialogue::states::{
        DialogueState, Field, InboundEvent, Intent, OutboundPrompt, PromptKind, ReplyOption,
    };

    const CONTACT: &str = "5511900000000";

    #[derive(Default)]
    struct RecordingGateway {
        sent: Mutex<Vec<(String, String, Option<Vec<String>>)>>,
    }

    impl RecordingGateway {
        fn sent(&self) -> Vec<(String, String, Option<Vec<String>>)> {
            self.sent.lock().expect("gateway lock").clone()
        }
    }

    #[async_trait]
    impl MessagingGateway for RecordingGateway {
        async fn send_text(&self, contact_id: &str, text: &str) -> Result<(), CollaboratorError> {
            self.sent.lock().expect("gateway lock").push((
                contact_id.to_string(),
                text.to_string(),
                None,
            ));
            Ok(())
        }

        async fn send_options(
            &self,
            contact_id: &str,
            prompt: &str,
            options: &[ReplyOption],
        ) -> Result<(), CollaboratorError> {
            self.sent.lock().expect("gateway lock").push((
                contact_id.to_string(),
                prompt.to_string(),
                Some(options.iter().map(|option| option.id.clone()).collect()),
            ));
            Ok(())
        }
    }

    /// Fails the first `failures` submissions, then accepts.
    #[derive(Default)]
    struct ScriptedSink {
        failures: Mutex<u32>,
        submitted: Mutex<Vec<RecordSubmission>>,
        attempts: Mutex<u32>,
        known: Option<BTreeMap<String, String>>,
    }

    impl ScriptedSink {
        fn failing(failures: u32) -> Self {
            Self { failures: Mutex::new(failures), ..Self::default() }
        }

        fn submitted(&self) -> Vec<RecordSubmission> {
            self.submitted.lock().expect("sink lock").clone()
        }

        fn attempts(&self) -> u32 {
            *self.attempts.lock().expect("sink lock")
        }
    }

    #[async_trait]
    impl RecordSink for ScriptedSink {
        async fn submit_record(
            &self,
            submission: &RecordSubmission,
        ) -> Result<(), CollaboratorError> {
            *self.attempts.lock().expect("sink lock") += 1;
            let mut failures = self.failures.lock().expect("sink lock");
            if *failures > 0 {
                *failures -= 1;
                return Err(CollaboratorError::Rejected { status: 503, body: "busy".to_string() });
            }
            self.submitted.lock().expect("sink lock").push(submission.clone());
            Ok(())
        }

        async fn lookup_contact(
            &self,
            _secret: &SecretString,
            _cpf: &str,
        ) -> Result<Option<BTreeMap<String, String>>, CollaboratorError> {
            Ok(self.known.clone())
        }
    }

    struct FixedAddress(Result<Option<String>, CollaboratorError>);

    #[async_trait]
    impl AddressEnrichment for FixedAddress {
        async fn lookup_address(
            &self,
            _postal_code: &str,
        ) -> Result<Option<String>, CollaboratorError> {
            self.0.clone()
        }
    }

    struct FixedFallback(Result<Option<String>, CollaboratorError>);

    #[async_trait]
    impl FallbackResponder for FixedFallback {
        async fn fallback_reply(
            &self,
            _contact_id: &str,
            _text: &str,
        ) -> Result<Option<String>, CollaboratorError> {
            self.0.clone()
        }
    }

    struct Harness {
        engine: DialogueEngine,
        store: Arc<dyn SessionStore>,
        gateway: Arc<RecordingGateway>,
        sink: Arc<ScriptedSink>,
        audit: InMemoryAuditSink,
    }

    fn harness_with(
        sink: ScriptedSink,
        address: FixedAddress,
        fallback: FixedFallback,
    ) -> Harness {
        harness_with_store(Arc::new(InMemorySessionStore::new()), sink, address, fallback)
    }

    fn harness_with_store(
        store: Arc<dyn SessionStore>,
        sink: ScriptedSink,
        address: FixedAddress,
        fallback: FixedFallback,
    ) -> Harness {
        let gateway = Arc::new(RecordingGateway::default());
        let sink = Arc::new(sink);
        let audit = InMemoryAuditSink::default();
        let settings = EngineSettings {
            secret: SecretString::from("sheet-secret".to_string()),
            ..EngineSettings::default()
        };
        let engine = DialogueEngine::new(
            store.clone(),
            Collaborators {
                gateway: gateway.clone(),
                sink: sink.clone(),
                address: Arc::new(address),
                fallback: Arc::new(fallback),
            },
            settings,
        )
        .with_audit_sink(Arc::new(audit.clone()));
        Harness { engine, store, gateway, sink, audit }
    }

    fn harness() -> Harness {
        harness_with(
            ScriptedSink::default(),
            FixedAddress(Ok(Some("Av. Amador Bueno da Veiga, Penha, São Paulo - SP".to_string()))),
            FixedFallback(Ok(None)),
        )
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("timestamp")
            + chrono::Duration::seconds(seconds)
    }

    impl Harness {
        async fn text(&self, text: &str) -> Vec<OutboundPrompt> {
            self.text_at(text, 0).await
        }

        async fn text_at(&self, text: &str, seconds: i64) -> Vec<OutboundPrompt> {
            self.engine
                .handle_at(InboundEvent::text(CONTACT, text).with_display_name("Ana"), at(seconds))
                .await
                .expect("handle")
        }

        async fn option(&self, id: &str) -> Vec<OutboundPrompt> {
            self.engine
                .handle_at(InboundEvent::option(CONTACT, id).with_display_name("Ana"), at(0))
                .await
                .expect("handle")
        }

        async fn session(&self) -> Option<Session> {
            self.store.get(CONTACT).await.expect("get")
        }

        async fn state(&self) -> Option<DialogueState> {
            self.session().await.map(|session| session.state)
        }

        /// Answers every new-contact question for the given menu option up to confirmation.
        async fn complete_new_contact(&self, menu_option: &str, branch_answers: &[&str]) {
            self.text("oi").await;
            self.option(menu_option).await;
            self.option("cad_nao").await;
            for answer in [
                "Ana Souza",
                "123.456.789-00",
                "01/02/1990",
            ] {
                self.text(answer).await;
            }
            self.option("tv_passeio").await;
            for answer in ["Fiat Ducato", "2019/2020", "85000", "diesel", "ABC1D23", "03652000", "4222"]
            {
                self.text(answer).await;
            }
            self.option("comp_nao").await;
            for answer in branch_answers {
                self.text(answer).await;
            }
        }
    }

    #[tokio::test]
    async fn first_message_starts_session_with_menu() {
        let harness = harness();
        let out = harness.text("oi").await;

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind(), PromptKind::Options);
        assert!(out[0].body.starts_with("Olá Ana! 👋"));
        let ids: Vec<&str> = out[0]
            .options
            .as_ref()
            .expect("options")
            .iter()
            .map(|option| option.id.as_str())
            .collect();
        assert_eq!(ids, vec!["op_servicos", "op_pecas", "op_pos_venda", "op_retorno", "op_endereco"]);
        assert_eq!(harness.state().await, Some(DialogueState::Welcome));
        assert_eq!(harness.gateway.sent().len(), 1);
    }

    #[tokio::test]
    async fn service_scenario_commits_exactly_once() {
        let harness = harness();
        harness.text("oi").await;
        harness.option("op_servicos").await;

        let session = harness.session().await.expect("session");
        assert_eq!(session.intent, Some(Intent::Service));
        assert_eq!(session.state, DialogueState::ReturningContact);

        harness.option("cad_nao").await;
        harness.text("Ana Souza").await;
        harness.text("123.456.789-00").await;
        let session = harness.session().await.expect("session");
        assert_eq!(session.field(Field::Cpf), Some("123.456.789-00"));
        assert_eq!(session.state, DialogueState::BirthDate);

        harness.text("01/02/1990").await;
        harness.option("tv_utilitario").await;
        for answer in ["Renault Master", "2021", "40000", "FLEX", "XYZ9A87", "03652-000", "100"] {
            harness.text(answer).await;
        }
        harness.option("comp_sim").await;
        harness.text("fundos").await;
        harness.text("revisão de 40 mil").await;
        let out = harness.text("2").await;

        assert_eq!(harness.state().await, Some(DialogueState::Confirmation));
        assert!(out[0].body.contains("*CPF:* 123.456.789-00"));
        assert!(out[0].body.contains("*Combustível:* Flex"));
        assert!(out[0].body.contains("*Como nos conheceu:* Facebook"));
        assert!(out[0].body.ends_with("Confirma?"));

        let out = harness.text("confirmar").await;
        assert_eq!(out, vec![OutboundPrompt::text(CONTACT, prompts::SUBMITTED)]);
        assert!(harness.session().await.is_none());

        let submitted = harness.sink.submitted();
        assert_eq!(submitted.len(), 1);
        let record = &submitted[0];
        assert_eq!(record.route, "chatbot");
        assert_eq!(record.secret.expose_secret(), "sheet-secret");
        assert_eq!(record.fields.get("record_type").map(String::as_str), Some("Serviço"));
        assert_eq!(record.fields.get("complement").map(String::as_str), Some("fundos"));
        assert_eq!(record.fields.get("postal_code").map(String::as_str), Some("03652-000"));
        assert_eq!(
            record.fields.get("address").map(String::as_str),
            Some("Av. Amador Bueno da Veiga, Penha, São Paulo - SP")
        );
        assert_eq!(record.fields.get("channel").map(String::as_str), Some("chatbot oficina"));
    }

    #[tokio::test]
    async fn invalid_option_reprompts_without_mutation() {
        let harness = harness();
        harness.complete_new_contact("op_pecas", &[]).await;
        // complete_new_contact answered comp_nao; step back to the complement question.
        let mut session = harness.session().await.expect("session");
        session.state = DialogueState::ComplementChoice;
        session.fields.remove(&Field::Complement);
        harness.store.put(session.clone()).await.expect("put");

        let out = harness.text("999").await;

        let after = harness.session().await.expect("session");
        assert_eq!(after, session);
        assert_eq!(out.len(), 1);
        assert!(out[0].body.starts_with(prompts::INVALID_OPTION));
        let ids: Vec<String> =
            out[0].options.clone().expect("options").into_iter().map(|option| option.id).collect();
        assert_eq!(ids, vec!["comp_sim".to_string(), "comp_nao".to_string()]);
    }

    #[tokio::test]
    async fn invalid_cpf_keeps_fields_and_state() {
        let harness = harness();
        harness.text("oi").await;
        harness.option("op_servicos").await;
        harness.option("cad_nao").await;
        harness.text("Ana Souza").await;
        let before = harness.session().await.expect("session");

        let out = harness.text("123.456").await;

        assert_eq!(harness.session().await.expect("session"), before);
        assert!(out[0].body.starts_with("CPF inválido"));
    }

    #[tokio::test]
    async fn duplicate_delivery_is_acknowledged_but_not_processed() {
        let harness = harness();
        harness.complete_new_contact("op_servicos", &["troca de óleo", "Google"]).await;
        assert_eq!(harness.state().await, Some(DialogueState::Confirmation));
        let sent_before = harness.gateway.sent().len();

        let confirm = InboundEvent::option(CONTACT, "confirmar").with_delivery_id("wamid.confirm");
        let first = harness.engine.handle_at(confirm.clone(), at(5)).await.expect("first");
        let second = harness.engine.handle_at(confirm, at(6)).await.expect("second");

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(harness.sink.submitted().len(), 1);
        assert_eq!(harness.gateway.sent().len(), sent_before + 1);
        assert!(harness.session().await.is_none());
        assert!(harness.audit.event_types().contains(&"ingress.duplicate_ignored".to_string()));
    }

    #[tokio::test]
    async fn expired_session_restarts_and_ignores_input() {
        let harness = harness();
        harness.text_at("oi", 0).await;
        harness.engine
            .handle_at(InboundEvent::option(CONTACT, "op_servicos"), at(10))
            .await
            .expect("menu");

        let out = harness.text_at("cad_sim", 10 + 601).await;

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].body, prompts::SESSION_EXPIRED);
        assert!(out[1].body.contains("Escolha uma opção"));
        let session = harness.session().await.expect("fresh session");
        assert_eq!(session.state, DialogueState::Welcome);
        assert_eq!(session.intent, None);
        assert!(!session.returning);
    }

    #[tokio::test]
    async fn activity_within_timeout_keeps_session() {
        let harness = harness();
        harness.text_at("oi", 0).await;
        harness.text_at("1", 590).await;
        let out = harness.text_at("nao", 1180).await;

        assert_eq!(out[0].body, "Digite seu nome completo:");
        assert_eq!(harness.state().await, Some(DialogueState::Name));
    }

    #[tokio::test]
    async fn reset_keyword_restarts_from_any_state() {
        let harness = harness();
        harness.text("oi").await;
        harness.text("2").await;
        harness.text("não").await;

        let out = harness.text("Reiniciar").await;

        assert_eq!(out.len(), 1);
        assert!(out[0].body.starts_with("Olá Ana!"));
        let session = harness.session().await.expect("session");
        assert_eq!(session.state, DialogueState::Welcome);
        assert_eq!(session.intent, None);
    }

    #[tokio::test]
    async fn address_info_sends_directory_and_ends_session() {
        let harness = harness();
        harness.text("oi").await;
        let out = harness.option("op_endereco").await;

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].body, prompts::DEFAULT_DIRECTORY);
        assert!(harness.session().await.is_none());
        assert_eq!(harness.sink.attempts(), 0);
    }

    #[tokio::test]
    async fn returning_contact_skips_prefix_and_lead_source() {
        let mut known = BTreeMap::new();
        known.insert("name".to_string(), "Ana Souza".to_string());
        known.insert("plate".to_string(), "ABC1D23".to_string());
        known.insert("cpf".to_string(), "999.999.999-99".to_string());
        let harness = harness_with(
            ScriptedSink { known: Some(known), ..ScriptedSink::default() },
            FixedAddress(Ok(None)),
            FixedFallback(Ok(None)),
        );

        harness.text("oi").await;
        harness.option("op_servicos").await;
        let out = harness.option("cad_sim").await;
        assert_eq!(out[0].body, "Digite seu *CPF* (ex: 123.456.789-00):");

        let out = harness.text("12345678900").await;
        assert_eq!(out[0].body, "Descreva o serviço desejado:");
        let session = harness.session().await.expect("session");
        assert!(session.returning);
        assert_eq!(session.field(Field::Name), Some("Ana Souza"));
        assert_eq!(session.field(Field::Plate), Some("ABC1D23"));
        assert_eq!(session.field(Field::Cpf), Some("123.456.789-00"));

        harness.text("alinhamento").await;
        assert_eq!(harness.state().await, Some(DialogueState::Confirmation));
        harness.option("confirmar").await;

        let submitted = harness.sink.submitted();
        assert_eq!(submitted.len(), 1);
        assert!(!submitted[0].fields.contains_key("lead_source"));
    }

    #[tokio::test]
    async fn fields_only_come_from_visited_states() {
        let harness = harness();
        harness.text("oi").await;
        harness.option("op_retorno").await;
        harness.option("cad_nao").await;

        let mut visited = vec![];
        for answer in ["Ana Souza", "123.456.789-00", "01/02/1990"] {
            visited.push(harness.state().await.expect("state"));
            harness.text(answer).await;
            let session = harness.session().await.expect("session");
            for field in session.fields.keys().filter(|field| !field.is_context()) {
                let produced = visited.iter().any(|state| {
                    crate::dialogue::graph::node(*state).expect("node").field == Some(*field)
                });
                assert!(produced, "{field:?} written without visiting its state");
            }
        }
        assert!(SHARED_PREFIX.starts_with(&visited));
    }

    #[tokio::test]
    async fn failed_submission_keeps_confirmation_then_succeeds() {
        let harness = harness_with(
            ScriptedSink::failing(1),
            FixedAddress(Ok(None)),
            FixedFallback(Ok(None)),
        );
        harness.complete_new_contact("op_pos_venda", &["10/01/2026", "porta travando", "nada"]).await;
        assert_eq!(harness.state().await, Some(DialogueState::Confirmation));

        let out = harness.text("ok").await;
        assert_eq!(out[0].body, prompts::SUBMIT_RETRY);
        let session = harness.session().await.expect("session kept");
        assert_eq!(session.state, DialogueState::Confirmation);
        assert_eq!(session.submit_attempts, 1);

        let out = harness.option("confirmar").await;
        assert_eq!(out[0].body, prompts::SUBMITTED);
        assert_eq!(harness.sink.attempts(), 2);
        assert_eq!(harness.sink.submitted().len(), 1);
        assert!(harness.session().await.is_none());
    }

    #[tokio::test]
    async fn exhausted_submissions_hand_off_to_manual_follow_up() {
        let harness = harness_with(
            ScriptedSink::failing(10),
            FixedAddress(Ok(None)),
            FixedFallback(Ok(None)),
        );
        harness.complete_new_contact("op_pecas", &["filtro de ar", "Instagram"]).await;

        harness.option("confirmar").await;
        harness.option("confirmar").await;
        let out = harness.option("confirmar").await;

        assert_eq!(out, vec![OutboundPrompt::text(CONTACT, prompts::MANUAL_FOLLOW_UP)]);
        assert_eq!(harness.sink.attempts(), 3);
        assert!(harness.sink.submitted().is_empty());
        assert!(harness.session().await.is_none());
    }

    #[tokio::test]
    async fn edit_rewinds_questionnaire_and_keeps_intent() {
        let harness = harness();
        harness.complete_new_contact("op_pecas", &["pastilha", "Outros"]).await;

        let out = harness.text("corrigir").await;

        assert!(out[0].body.starts_with("Vamos corrigir. Você já fez atendimento"));
        let session = harness.session().await.expect("session");
        assert_eq!(session.state, DialogueState::ReturningContact);
        assert_eq!(session.intent, Some(Intent::Part));
        assert_eq!(session.field(Field::RecordType), Some("Peça"));
        assert_eq!(session.field(Field::Name), None);
        assert_eq!(session.field(Field::Description), None);
    }

    #[tokio::test]
    async fn confirmation_is_unreachable_with_missing_fields() {
        let harness = harness();
        let mut session = Session::started_at(CONTACT, "Ana", "chatbot oficina", at(0));
        session.state = DialogueState::Feedback;
        session.intent = Some(Intent::PostSale);
        session.fields.insert(Field::Intent, "post_sale".to_string());
        session.fields.insert(Field::RecordType, "Pós-venda".to_string());
        harness.store.put(session).await.expect("put");

        let error = harness
            .engine
            .handle_at(InboundEvent::text(CONTACT, "tudo certo"), at(1))
            .await
            .expect_err("missing fields");

        assert!(matches!(error, DialogueError::MissingRequiredFields { ref missing, .. }
            if missing.contains(&Field::Cpf) && missing.contains(&Field::PurchaseDate)));
        assert_eq!(harness.state().await, Some(DialogueState::Feedback));
    }

    #[tokio::test]
    async fn enrichment_failure_yields_empty_address() {
        let harness = harness_with(
            ScriptedSink::default(),
            FixedAddress(Err(CollaboratorError::Transport("timeout".to_string()))),
            FixedFallback(Ok(None)),
        );
        harness.complete_new_contact("op_servicos", &[]).await;

        let session = harness.session().await.expect("session");
        assert_eq!(session.field(Field::Address), Some(""));
        assert_eq!(session.field(Field::PostalCode), Some("03652-000"));
        assert_eq!(session.state, DialogueState::ServiceDescription);
    }

    #[tokio::test]
    async fn unmatched_menu_text_consults_fallback() {
        let harness = harness_with(
            ScriptedSink::default(),
            FixedAddress(Ok(None)),
            FixedFallback(Ok(Some("Abrimos às 8h.".to_string()))),
        );
        harness.text("oi").await;
        let out = harness.text("que horas vocês abrem?").await;

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].body, "Abrimos às 8h.");
        assert_eq!(out[1].body, prompts::MENU_REMINDER);
        assert_eq!(harness.state().await, Some(DialogueState::Welcome));
    }

    #[tokio::test]
    async fn fallback_failure_degrades_to_restart_hint() {
        let harness = harness_with(
            ScriptedSink::default(),
            FixedAddress(Ok(None)),
            FixedFallback(Err(CollaboratorError::Transport("down".to_string()))),
        );
        harness.text("oi").await;
        let out = harness.text("???").await;

        assert_eq!(out[0].body, prompts::FALLBACK_UNAVAILABLE);
        assert_eq!(harness.state().await, Some(DialogueState::Welcome));
    }

    #[tokio::test]
    async fn concurrent_events_for_one_contact_are_serialized() {
        let harness = Arc::new(harness());
        harness.text("oi").await;

        let mut tasks = Vec::new();
        for (index, text) in ["1", "1", "1"].into_iter().enumerate() {
            let harness = Arc::clone(&harness);
            tasks.push(tokio::spawn(async move {
                harness
                    .engine
                    .handle_at(
                        InboundEvent::text(CONTACT, text).with_delivery_id(format!("wamid.{index}")),
                        at(1),
                    )
                    .await
            }));
        }
        for task in tasks {
            task.await.expect("join").expect("handle");
        }

        let session = harness.session().await.expect("session");
        assert_eq!(session.version, 1);
        assert_eq!(session.state, DialogueState::ReturningContact);
    }

    struct ConflictingStore {
        inner: InMemorySessionStore,
    }

    #[async_trait]
    impl SessionStore for ConflictingStore {
        async fn get(&self, contact_id: &str) -> Result<Option<Session>, StoreError> {
            self.inner.get(contact_id).await
        }
        async fn put(&self, session: Session) -> Result<(), StoreError> {
            self.inner.put(session).await
        }
        async fn delete(&self, contact_id: &str) -> Result<(), StoreError> {
            self.inner.delete(contact_id).await
        }
        async fn compare_and_swap(
            &self,
            _expected_version: Option<u64>,
            _session: Session,
        ) -> Result<bool, StoreError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn persistent_conflicts_surface_after_retries() {
        let engine = DialogueEngine::new(
            Arc::new(ConflictingStore { inner: InMemorySessionStore::new() }),
            Collaborators::default(),
            EngineSettings { session_timeout: Duration::from_secs(60), ..EngineSettings::default() },
        );

        let error = engine.handle(InboundEvent::text(CONTACT, "oi")).await.expect_err("conflict");
        assert_eq!(error, DialogueError::ConcurrentModification { contact_id: CONTACT.to_string() });
    }

    /// Fails the first `delete` call, as a locked database would.
    struct FlakyDeleteStore {
        inner: InMemorySessionStore,
        fail_next_delete: Mutex<bool>,
    }

    #[async_trait]
    impl SessionStore for FlakyDeleteStore {
        async fn get(&self, contact_id: &str) -> Result<Option<Session>, StoreError> {
            self.inner.get(contact_id).await
        }
        async fn put(&self, session: Session) -> Result<(), StoreError> {
            self.inner.put(session).await
        }
        async fn delete(&self, contact_id: &str) -> Result<(), StoreError> {
            if std::mem::take(&mut *self.fail_next_delete.lock().expect("store lock")) {
                return Err(StoreError::Backend("database is locked".to_string()));
            }
            self.inner.delete(contact_id).await
        }
        async fn compare_and_swap(
            &self,
            expected_version: Option<u64>,
            session: Session,
        ) -> Result<bool, StoreError> {
            self.inner.compare_and_swap(expected_version, session).await
        }
    }

    #[tokio::test]
    async fn accepted_record_is_acknowledged_when_teardown_fails() {
        let harness = harness_with_store(
            Arc::new(FlakyDeleteStore {
                inner: InMemorySessionStore::new(),
                fail_next_delete: Mutex::new(true),
            }),
            ScriptedSink::default(),
            FixedAddress(Ok(None)),
            FixedFallback(Ok(None)),
        );
        harness.complete_new_contact("op_pecas", &["pastilha de freio", "Google"]).await;
        assert_eq!(harness.state().await, Some(DialogueState::Confirmation));

        let out = harness
            .engine
            .handle_at(
                InboundEvent::text(CONTACT, "confirmar").with_delivery_id("wamid.confirm"),
                at(0),
            )
            .await
            .expect("an accepted record is not an error");
        assert_eq!(out, vec![OutboundPrompt::text(CONTACT, prompts::SUBMITTED)]);
        assert_eq!(harness.sink.submitted().len(), 1);

        let redelivered = harness
            .engine
            .handle_at(
                InboundEvent::text(CONTACT, "confirmar").with_delivery_id("wamid.confirm"),
                at(1),
            )
            .await
            .expect("duplicate");
        assert!(redelivered.is_empty());
        assert_eq!(harness.sink.submitted().len(), 1);
    }
}
