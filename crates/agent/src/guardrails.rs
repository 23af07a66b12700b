/// Outcome of checking a generated reply before it reaches a contact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow(String),
    Degrade { reason_code: &'static str, reply: String },
    Deny { reason_code: &'static str },
}

impl GuardrailDecision {
    pub fn into_reply(self) -> Option<String> {
        match self {
            Self::Allow(reply) | Self::Degrade { reply, .. } => Some(reply),
            Self::Deny { .. } => None,
        }
    }
}

/// The model may only answer questions. It never fills form fields, confirms
/// submissions or quotes prices on the workshop's behalf.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyPolicy {
    pub max_chars: usize,
    pub blocked_phrases: Vec<String>,
}

impl Default for ReplyPolicy {
    fn default() -> Self {
        Self {
            max_chars: 700,
            blocked_phrases: vec![
                "r$".to_string(),
                "seus dados foram enviados".to_string(),
                "atendimento registrado".to_string(),
            ],
        }
    }
}

impl ReplyPolicy {
    pub fn with_max_chars(max_chars: usize) -> Self {
        Self { max_chars, ..Self::default() }
    }

    pub fn evaluate(&self, raw: &str) -> GuardrailDecision {
        let reply = raw.trim();
        if reply.is_empty() {
            return GuardrailDecision::Deny { reason_code: "empty_reply" };
        }

        let lowered = reply.to_lowercase();
        if self.blocked_phrases.iter().any(|phrase| lowered.contains(phrase.as_str())) {
            return GuardrailDecision::Deny { reason_code: "blocked_phrase" };
        }

        if reply.chars().count() <= self.max_chars {
            return GuardrailDecision::Allow(reply.to_string());
        }

        GuardrailDecision::Degrade {
            reason_code: "reply_truncated",
            reply: truncate_at_sentence(reply, self.max_chars),
        }
    }
}

fn truncate_at_sentence(text: &str, max_chars: usize) -> String {
    let clipped: String = text.chars().take(max_chars).collect();
    let sentence_end = clipped.rfind(['.', '!', '?']).filter(|index| *index > 0);
    match sentence_end {
        Some(index) => clipped[..=index].to_string(),
        None => format!("{}…", clipped.trim_end()),
    }
}
