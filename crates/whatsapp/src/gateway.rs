use std::time::Duration;

use async_trait::async_trait;
use intake_core::collaborators::{CollaboratorError, MessagingGateway};
use intake_core::config::WhatsAppConfig;
use intake_core::dialogue::ReplyOption;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use crate::messages::{MessageBuilder, OutboundMessage};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 2, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Sends prompts through the Cloud API `/{phone_number_id}/messages` endpoint.
pub struct CloudApiGateway {
    client: Client,
    endpoint: String,
    access_token: SecretString,
    retry: RetryPolicy,
}

impl CloudApiGateway {
    pub fn from_config(config: &WhatsAppConfig) -> Result<Self, CollaboratorError> {
        let phone_number_id = config
            .phone_number_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or(CollaboratorError::NotConfigured("whatsapp.phone_number_id"))?;
        if config.access_token.expose_secret().trim().is_empty() {
            return Err(CollaboratorError::NotConfigured("whatsapp.access_token"));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| CollaboratorError::Transport(error.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/{}/messages",
                config.api_base_url.trim_end_matches('/'),
                phone_number_id
            ),
            access_token: config.access_token.clone(),
            retry: RetryPolicy { max_retries: config.max_retries, ..RetryPolicy::default() },
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn post(&self, message: &OutboundMessage) -> Result<(), CollaboratorError> {
        let mut attempt = 0;
        loop {
            match self.post_once(message).await {
                Ok(()) => return Ok(()),
                Err(error) if is_retryable(&error) && attempt < self.retry.max_retries => {
                    warn!(
                        event_name = "gateway.whatsapp.retry",
                        contact_id = %message.to,
                        attempt,
                        error = %error,
                        "retrying cloud api send"
                    );
                    let delay = self.retry.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn post_once(&self, message: &OutboundMessage) -> Result<(), CollaboratorError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.access_token.expose_secret())
            .json(message)
            .send()
            .await
            .map_err(|error| CollaboratorError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Rejected { status: status.as_u16(), body });
        }

        debug!(
            event_name = "gateway.whatsapp.sent",
            contact_id = %message.to,
            status = status.as_u16(),
            "cloud api accepted message"
        );
        Ok(())
    }
}

fn is_retryable(error: &CollaboratorError) -> bool {
    match error {
        CollaboratorError::Transport(_) => true,
        CollaboratorError::Rejected { status, .. } => *status == 429 || *status >= 500,
        CollaboratorError::Protocol(_) | CollaboratorError::NotConfigured(_) => false,
    }
}

#[async_trait]
impl MessagingGateway for CloudApiGateway {
    async fn send_text(&self, contact_id: &str, text: &str) -> Result<(), CollaboratorError> {
        self.post(&MessageBuilder::to(contact_id).text(text)).await
    }

    async fn send_options(
        &self,
        contact_id: &str,
        prompt: &str,
        options: &[ReplyOption],
    ) -> Result<(), CollaboratorError> {
        let sequence = MessageBuilder::to(contact_id)
            .options(prompt, options)
            .map_err(|error| CollaboratorError::Protocol(error.to_string()))?;
        for message in &sequence {
            self.post(message).await?;
        }
        Ok(())
    }

    async fn send_image(&self, contact_id: &str, image_url: &str) -> Result<(), CollaboratorError> {
        if image_url.trim().is_empty() {
            return Err(CollaboratorError::Protocol("image link is empty".to_string()));
        }
        self.post(&MessageBuilder::to(contact_id).image(image_url)).await
    }
}
