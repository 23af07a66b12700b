//! Console conversation against a local dialogue engine.
//!
//! Each input line is one inbound message. A line starting with `/` selects a
//! reply option by id (`/op_servicos`), anything else is sent as typed text.
//! `/sair` or end of input closes the conversation.

use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use intake_core::collaborators::{CollaboratorError, MessagingGateway, RecordSink, RecordSubmission};
use intake_core::config::{AppConfig, LoadOptions};
use intake_core::{
    Collaborators, DialogueEngine, EngineSettings, InMemorySessionStore, InboundEvent, ReplyOption,
};

use crate::commands::CommandResult;

const QUIT: &str = "/sair";

#[derive(Default)]
pub struct Transcript {
    lines: Mutex<Vec<String>>,
}

impl Transcript {
    fn push(&self, line: String) {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).push(line);
    }

    fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

pub struct ConsoleGateway {
    transcript: Arc<Transcript>,
}

#[async_trait]
impl MessagingGateway for ConsoleGateway {
    async fn send_text(&self, _contact_id: &str, text: &str) -> Result<(), CollaboratorError> {
        self.transcript.push(format!("bot> {text}"));
        Ok(())
    }

    async fn send_options(
        &self,
        _contact_id: &str,
        prompt: &str,
        options: &[ReplyOption],
    ) -> Result<(), CollaboratorError> {
        self.transcript.push(format!("bot> {prompt}"));
        for option in options {
            self.transcript.push(format!("     /{}  {}", option.id, option.label));
        }
        Ok(())
    }
}

/// Prints submitted records instead of posting them anywhere.
pub struct ConsoleRecordSink {
    transcript: Arc<Transcript>,
}

#[async_trait]
impl RecordSink for ConsoleRecordSink {
    async fn submit_record(&self, submission: &RecordSubmission) -> Result<(), CollaboratorError> {
        self.transcript.push(format!("record submitted (route `{}`):", submission.route));
        for (field, value) in &submission.fields {
            self.transcript.push(format!("  {field}: {value}"));
        }
        Ok(())
    }
}

pub fn run(contact_id: &str, display_name: &str) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let stdin = io::stdin();
    let stdout = io::stdout();
    let settings = EngineSettings::from_config(&config);
    match runtime.block_on(converse(settings, contact_id, display_name, stdin.lock(), stdout.lock()))
    {
        Ok(messages) => CommandResult::success(
            "chat",
            format!("conversation closed after {messages} messages"),
        ),
        Err(error) => CommandResult::failure("chat", "console_io", error.to_string(), 4),
    }
}

pub async fn converse<R: BufRead, W: Write>(
    settings: EngineSettings,
    contact_id: &str,
    display_name: &str,
    input: R,
    mut output: W,
) -> io::Result<usize> {
    let transcript = Arc::new(Transcript::default());
    let collaborators = Collaborators {
        gateway: Arc::new(ConsoleGateway { transcript: transcript.clone() }),
        sink: Arc::new(ConsoleRecordSink { transcript: transcript.clone() }),
        ..Collaborators::default()
    };
    let engine = DialogueEngine::new(Arc::new(InMemorySessionStore::new()), collaborators, settings);

    let mut messages = 0;
    for line in input.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == QUIT {
            break;
        }

        messages += 1;
        let event = match trimmed.strip_prefix('/') {
            Some(option_id) => InboundEvent::option(contact_id, option_id),
            None => InboundEvent::text(contact_id, trimmed),
        }
        .with_display_name(display_name)
        .with_delivery_id(format!("console-{messages}"));

        if let Err(error) = engine.handle(event).await {
            transcript.push(format!("error: {error}"));
        }
        for rendered in transcript.drain() {
            writeln!(output, "{rendered}")?;
        }
        output.flush()?;
    }

    Ok(messages)
}

#[cfg(test)]
mod tests {
    use intake_core::dialogue::prompts;
    use intake_core::EngineSettings;

    use super::converse;

    async fn transcript(script: &str) -> (usize, String) {
        let mut output = Vec::new();
        let messages =
            converse(EngineSettings::default(), "5511900000000", "Ana", script.as_bytes(), &mut output)
                .await
                .expect("converse");
        (messages, String::from_utf8(output).expect("utf8"))
    }

    #[tokio::test]
    async fn greeting_lists_menu_options_as_slash_commands() {
        let (messages, output) = transcript("oi\n").await;

        assert_eq!(messages, 1);
        assert!(output.starts_with("bot> Olá Ana! 👋"));
        assert!(output.contains("/op_servicos"));
        assert!(output.contains("/op_endereco"));
    }

    #[tokio::test]
    async fn quit_command_and_blank_lines_are_not_messages() {
        let (messages, _) = transcript("oi\n\n   \n/sair\nnever sent\n").await;
        assert_eq!(messages, 1);
    }

    #[tokio::test]
    async fn address_option_prints_directory() {
        let (_, output) = transcript("oi\n/op_endereco\n").await;
        assert!(output.contains("Endereços e Contatos"));
        assert!(output.contains(prompts::DIRECTORY_CLOSING));
    }

    #[tokio::test]
    async fn full_service_conversation_prints_the_submitted_record() {
        let script = [
            "oi",
            "/op_servicos",
            "/cad_nao",
            "Ana Souza",
            "123.456.789-00",
            "01/02/1990",
            "/tv_utilitario",
            "Renault Master",
            "2021",
            "40000",
            "FLEX",
            "XYZ9A87",
            "03652-000",
            "100",
            "/comp_sim",
            "fundos",
            "revisão de 40 mil",
            "2",
            "confirmar",
        ]
        .join("\n");

        let (messages, output) = transcript(&script).await;

        assert_eq!(messages, 19);
        assert!(output.contains("record submitted (route `chatbot`):"));
        assert!(output.contains("  cpf: 123.456.789-00"));
        assert!(output.contains("  record_type: Serviço"));
        assert!(output.contains(prompts::SUBMITTED));
    }
}
