use std::sync::Arc;

use async_trait::async_trait;
use intake_core::collaborators::{CollaboratorError, FallbackResponder};
use tracing::{info, warn};

use crate::guardrails::{GuardrailDecision, ReplyPolicy};
use crate::llm::{ChatRequest, LlmClient, LlmError};

pub const DEFAULT_PERSONA: &str = "Você é um atendente do Grupo Sullato, especializado em venda \
de veículos de passeio e utilitários e no atendimento da oficina. Seja sempre claro, simpático e \
direto ao ponto. Responda em português do Brasil, em no máximo três frases. Não informe preços, \
não confirme agendamentos e não diga que dados foram registrados.";

const TEMPERATURE: f32 = 0.5;
const MAX_TOKENS: u32 = 300;

/// Answers free-text questions that fall outside the menu, through an LLM
/// constrained by [`ReplyPolicy`].
pub struct LlmFallbackResponder {
    client: Arc<dyn LlmClient>,
    persona: String,
    policy: ReplyPolicy,
}

impl LlmFallbackResponder {
    pub fn new(client: Arc<dyn LlmClient>, policy: ReplyPolicy) -> Self {
        Self { client, persona: DEFAULT_PERSONA.to_string(), policy }
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }
}

#[async_trait]
impl FallbackResponder for LlmFallbackResponder {
    async fn fallback_reply(
        &self,
        contact_id: &str,
        text: &str,
    ) -> Result<Option<String>, CollaboratorError> {
        let request = ChatRequest {
            system: self.persona.clone(),
            user: text.trim().to_string(),
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let raw = self.client.complete(&request).await.map_err(|error| {
            warn!(event_name = "fallback.llm.failed", contact_id, error = %error, "llm call failed");
            collaborator_error(error)
        })?;

        let decision = self.policy.evaluate(&raw);
        match &decision {
            GuardrailDecision::Allow(_) => {}
            GuardrailDecision::Degrade { reason_code, .. }
            | GuardrailDecision::Deny { reason_code } => {
                info!(
                    event_name = "fallback.guardrail.applied",
                    contact_id,
                    reason_code,
                    "fallback reply adjusted by guardrail"
                );
            }
        }
        Ok(decision.into_reply())
    }
}

fn collaborator_error(error: LlmError) -> CollaboratorError {
    match error {
        LlmError::Transport(message) => CollaboratorError::Transport(message),
        LlmError::Status { status, body } => CollaboratorError::Rejected { status, body },
        LlmError::Decode(message) => CollaboratorError::Protocol(message),
        LlmError::NotConfigured(key) => CollaboratorError::NotConfigured(key),
    }
}
