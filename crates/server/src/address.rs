use std::time::Duration;

use async_trait::async_trait;
use intake_core::collaborators::{AddressEnrichment, CollaboratorError};
use intake_core::config::AddressConfig;
use reqwest::Client;
use serde::Deserialize;

const NOT_INFORMED: &str = "Não informado";

#[derive(Debug, Default, Deserialize)]
struct ViaCepResponse {
    #[serde(default)]
    erro: Option<serde_json::Value>,
    #[serde(default)]
    logradouro: String,
    #[serde(default)]
    bairro: String,
    #[serde(default)]
    localidade: String,
    #[serde(default)]
    uf: String,
}

impl ViaCepResponse {
    fn locality(&self) -> String {
        let part = |value: &str| {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                NOT_INFORMED.to_string()
            } else {
                trimmed.to_string()
            }
        };
        format!(
            "{}, {}, {} - {}",
            part(&self.logradouro),
            part(&self.bairro),
            part(&self.localidade),
            part(&self.uf)
        )
    }
}

/// Postal code lookup against a ViaCEP-compatible service.
pub struct ViaCepEnrichment {
    client: Client,
    base_url: String,
}

impl ViaCepEnrichment {
    pub fn from_config(config: &AddressConfig) -> Result<Self, CollaboratorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| CollaboratorError::Transport(error.to_string()))?;
        Ok(Self { client, base_url: config.base_url.trim_end_matches('/').to_string() })
    }
}

#[async_trait]
impl AddressEnrichment for ViaCepEnrichment {
    async fn lookup_address(&self, postal_code: &str) -> Result<Option<String>, CollaboratorError> {
        let digits: String = postal_code.chars().filter(char::is_ascii_digit).collect();
        if digits.len() != 8 {
            return Ok(None);
        }

        let response = self
            .client
            .get(format!("{}/{digits}/json/", self.base_url))
            .send()
            .await
            .map_err(|error| CollaboratorError::Transport(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Rejected { status: status.as_u16(), body });
        }

        let decoded: ViaCepResponse =
            response.json().await.map_err(|error| CollaboratorError::Protocol(error.to_string()))?;
        if decoded.erro.is_some() {
            return Ok(None);
        }
        Ok(Some(decoded.locality()))
    }
}
