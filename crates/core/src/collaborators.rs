//! Narrow interfaces to the outside world. The dialogue engine only talks to
//! these traits; transports and HTTP clients live in other crates.

use std::collections::BTreeMap;

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;
use tracing::info;

use crate::dialogue::states::ReplyOption;

pub const MAX_REPLY_OPTIONS: usize = 10;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("remote rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("unexpected response: {0}")]
    Protocol(String),
    #[error("collaborator not configured: {0}")]
    NotConfigured(&'static str),
}

#[async_trait]
pub trait MessagingGateway: Send + Sync {
    async fn send_text(&self, contact_id: &str, text: &str) -> Result<(), CollaboratorError>;

    async fn send_options(
        &self,
        contact_id: &str,
        prompt: &str,
        options: &[ReplyOption],
    ) -> Result<(), CollaboratorError>;

    /// Sends an image by public URL. Transports without media support refuse it.
    async fn send_image(
        &self,
        _contact_id: &str,
        _image_url: &str,
    ) -> Result<(), CollaboratorError> {
        Err(CollaboratorError::NotConfigured("image messages"))
    }
}

/// A finished record on its way to the external store.
#[derive(Clone, Debug)]
pub struct RecordSubmission {
    pub route: String,
    pub secret: SecretString,
    pub fields: BTreeMap<String, String>,
}

#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn submit_record(&self, submission: &RecordSubmission) -> Result<(), CollaboratorError>;

    /// Previously submitted fields for a CPF, used to pre-fill returning contacts.
    async fn lookup_contact(
        &self,
        _secret: &SecretString,
        _cpf: &str,
    ) -> Result<Option<BTreeMap<String, String>>, CollaboratorError> {
        Ok(None)
    }
}

#[async_trait]
pub trait AddressEnrichment: Send + Sync {
    /// Locality text for a normalized postal code; `None` when unknown.
    async fn lookup_address(&self, postal_code: &str) -> Result<Option<String>, CollaboratorError>;
}

#[async_trait]
pub trait FallbackResponder: Send + Sync {
    async fn fallback_reply(
        &self,
        contact_id: &str,
        text: &str,
    ) -> Result<Option<String>, CollaboratorError>;
}

/// Gateway that only logs, used when no messaging credentials are configured.
#[derive(Clone, Debug, Default)]
pub struct LoggingGateway;

#[async_trait]
impl MessagingGateway for LoggingGateway {
    async fn send_text(&self, contact_id: &str, text: &str) -> Result<(), CollaboratorError> {
        info!(event_name = "gateway.log.text", contact_id, body = text, "outbound text");
        Ok(())
    }

    async fn send_options(
        &self,
        contact_id: &str,
        prompt: &str,
        options: &[ReplyOption],
    ) -> Result<(), CollaboratorError> {
        let ids: Vec<&str> = options.iter().map(|option| option.id.as_str()).collect();
        info!(
            event_name = "gateway.log.options",
            contact_id,
            body = prompt,
            options = ?ids,
            "outbound options"
        );
        Ok(())
    }

    async fn send_image(&self, contact_id: &str, image_url: &str) -> Result<(), CollaboratorError> {
        info!(event_name = "gateway.log.image", contact_id, image_url, "outbound image");
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct NoopAddressEnrichment;

#[async_trait]
impl AddressEnrichment for NoopAddressEnrichment {
    async fn lookup_address(&self, _postal_code: &str) -> Result<Option<String>, CollaboratorError> {
        Ok(None)
    }
}

#[derive(Clone, Debug, Default)]
pub struct NoopFallbackResponder;

#[async_trait]
impl FallbackResponder for NoopFallbackResponder {
    async fn fallback_reply(
        &self,
        _contact_id: &str,
        _text: &str,
    ) -> Result<Option<String>, CollaboratorError> {
        Ok(None)
    }
}

/// Sink that accepts and drops records. Stands in when no endpoint is configured.
#[derive(Clone, Debug, Default)]
pub struct DiscardingRecordSink;

#[async_trait]
impl RecordSink for DiscardingRecordSink {
    async fn submit_record(&self, submission: &RecordSubmission) -> Result<(), CollaboratorError> {
        info!(
            event_name = "sink.discarded",
            route = %submission.route,
            field_count = submission.fields.len(),
            "record sink not configured; record discarded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use secrecy::SecretString;

    use super::{
        AddressEnrichment, DiscardingRecordSink, FallbackResponder, LoggingGateway,
        MessagingGateway, NoopAddressEnrichment, NoopFallbackResponder, RecordSink,
        RecordSubmission,
    };
    use crate::dialogue::states::ReplyOption;

    #[tokio::test]
    async fn default_collaborators_never_fail() {
        let gateway = LoggingGateway;
        gateway.send_text("5511", "oi").await.expect("text");
        gateway
            .send_options("5511", "Escolha", &[ReplyOption::new("cad_sim", "Sim")])
            .await
            .expect("options");
        gateway.send_image("5511", "https://example.com/oficina.jpg").await.expect("image");

        assert_eq!(NoopAddressEnrichment.lookup_address("03652-000").await, Ok(None));
        assert_eq!(NoopFallbackResponder.fallback_reply("5511", "?").await, Ok(None));

        let sink = DiscardingRecordSink;
        let submission = RecordSubmission {
            route: "chatbot".to_string(),
            secret: SecretString::from("s3cret".to_string()),
            fields: BTreeMap::new(),
        };
        sink.submit_record(&submission).await.expect("submit");
        assert_eq!(sink.lookup_contact(&submission.secret, "123.456.789-00").await, Ok(None));
    }
}
