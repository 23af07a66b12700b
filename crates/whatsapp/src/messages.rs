use intake_core::dialogue::ReplyOption;
use serde::Serialize;
use thiserror::Error;

pub const MAX_BUTTONS: usize = 3;
pub const MAX_LIST_ROWS: usize = 10;
pub const MAX_BUTTON_TITLE_CHARS: usize = 20;
pub const MAX_ROW_TITLE_CHARS: usize = 24;
pub const MAX_INTERACTIVE_BODY_CHARS: usize = 1024;
pub const MAX_TEXT_BODY_CHARS: usize = 4096;
pub const LIST_BUTTON_LABEL: &str = "Ver opções";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("at most {MAX_LIST_ROWS} options can be offered, got {0}")]
    TooManyOptions(usize),
    #[error("an option prompt needs at least one option")]
    NoOptions,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    pub messaging_product: &'static str,
    pub recipient_type: &'static str,
    pub to: String,
    #[serde(flatten)]
    pub content: MessageContent,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text { text: TextContent },
    Image { image: ImageContent },
    Interactive { interactive: Interactive },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImageContent {
    pub link: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TextContent {
    pub preview_url: bool,
    pub body: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Interactive {
    Button { body: BodyText, action: ButtonAction },
    List { body: BodyText, action: ListAction },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BodyText {
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ButtonAction {
    pub buttons: Vec<ReplyButton>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReplyButton {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub reply: ButtonReply,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ButtonReply {
    pub id: String,
    pub title: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ListAction {
    pub button: String,
    pub sections: Vec<ListSection>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ListSection {
    pub rows: Vec<ListRow>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ListRow {
    pub id: String,
    pub title: String,
}

pub struct MessageBuilder {
    to: String,
}

impl MessageBuilder {
    pub fn to(recipient: impl Into<String>) -> Self {
        Self { to: recipient.into() }
    }

    pub fn text(&self, body: &str) -> OutboundMessage {
        self.wrap(MessageContent::Text {
            text: TextContent { preview_url: false, body: clip(body, MAX_TEXT_BODY_CHARS) },
        })
    }

    pub fn image(&self, link: &str) -> OutboundMessage {
        self.wrap(MessageContent::Image { image: ImageContent { link: link.trim().to_string() } })
    }

    /// Builds the message sequence for an option prompt. Up to three options
    /// render as reply buttons, more as a single-section list. A body too long
    /// for an interactive message is sent as plain text first, keeping only its
    /// last paragraph as the interactive body.
    pub fn options(
        &self,
        body: &str,
        options: &[ReplyOption],
    ) -> Result<Vec<OutboundMessage>, MessageError> {
        if options.is_empty() {
            return Err(MessageError::NoOptions);
        }
        if options.len() > MAX_LIST_ROWS {
            return Err(MessageError::TooManyOptions(options.len()));
        }

        let mut sequence = Vec::new();
        let interactive_body = if body.chars().count() > MAX_INTERACTIVE_BODY_CHARS {
            match split_last_paragraph(body) {
                Some((lead, tail)) => {
                    sequence.push(self.text(lead));
                    clip(tail, MAX_INTERACTIVE_BODY_CHARS)
                }
                None => clip(body, MAX_INTERACTIVE_BODY_CHARS),
            }
        } else {
            body.to_string()
        };

        let interactive = if options.len() <= MAX_BUTTONS {
            Interactive::Button {
                body: BodyText { text: interactive_body },
                action: ButtonAction {
                    buttons: options
                        .iter()
                        .map(|option| ReplyButton {
                            kind: "reply",
                            reply: ButtonReply {
                                id: option.id.clone(),
                                title: clip(&option.label, MAX_BUTTON_TITLE_CHARS),
                            },
                        })
                        .collect(),
                },
            }
        } else {
            Interactive::List {
                body: BodyText { text: interactive_body },
                action: ListAction {
                    button: LIST_BUTTON_LABEL.to_string(),
                    sections: vec![ListSection {
                        rows: options
                            .iter()
                            .map(|option| ListRow {
                                id: option.id.clone(),
                                title: clip(&option.label, MAX_ROW_TITLE_CHARS),
                            })
                            .collect(),
                    }],
                },
            }
        };

        sequence.push(self.wrap(MessageContent::Interactive { interactive }));
        Ok(sequence)
    }

    fn wrap(&self, content: MessageContent) -> OutboundMessage {
        OutboundMessage {
            messaging_product: "whatsapp",
            recipient_type: "individual",
            to: self.to.clone(),
            content,
        }
    }
}

fn split_last_paragraph(body: &str) -> Option<(&str, &str)> {
    let index = body.trim_end().rfind("\n\n")?;
    let (lead, tail) = (body[..index].trim_end(), body[index..].trim());
    (!lead.is_empty() && !tail.is_empty()).then_some((lead, tail))
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    clipped.push('…');
    clipped
}

#[cfg(test)]
mod tests {
    use intake_core::dialogue::ReplyOption;
    use serde_json::json;

    use super::{MessageBuilder, MessageError, MAX_INTERACTIVE_BODY_CHARS};

    fn yes_no() -> Vec<ReplyOption> {
        vec![ReplyOption::new("cad_sim", "Sim"), ReplyOption::new("cad_nao", "Não")]
    }

    #[test]
    fn text_message_matches_cloud_api_shape() {
        let message = MessageBuilder::to("5511900000000").text("Olá!");
        let value = serde_json::to_value(&message).expect("serialize");

        assert_eq!(
            value,
            json!({
                "messaging_product": "whatsapp",
                "recipient_type": "individual",
                "to": "5511900000000",
                "type": "text",
                "text": { "preview_url": false, "body": "Olá!" }
            })
        );
    }

    #[test]
    fn image_message_carries_the_link() {
        let message =
            MessageBuilder::to("5511900000000").image(" https://cdn.example.com/oficina.jpg ");
        let value = serde_json::to_value(&message).expect("serialize");

        assert_eq!(value["type"], "image");
        assert_eq!(value["image"], json!({ "link": "https://cdn.example.com/oficina.jpg" }));
        assert_eq!(value["to"], "5511900000000");
    }

    #[test]
    fn up_to_three_options_render_as_buttons() {
        let messages =
            MessageBuilder::to("5511").options("Já é cliente?", &yes_no()).expect("options");
        assert_eq!(messages.len(), 1);

        let value = serde_json::to_value(&messages[0]).expect("serialize");
        assert_eq!(value["type"], "interactive");
        assert_eq!(value["interactive"]["type"], "button");
        assert_eq!(value["interactive"]["body"]["text"], "Já é cliente?");
        assert_eq!(value["interactive"]["action"]["buttons"][0]["type"], "reply");
        assert_eq!(value["interactive"]["action"]["buttons"][1]["reply"]["id"], "cad_nao");
    }

    #[test]
    fn larger_option_sets_render_as_list_with_clipped_titles() {
        let options: Vec<ReplyOption> = (1..=5)
            .map(|index| {
                ReplyOption::new(format!("op_{index}"), format!("Opção número {index} com texto longo"))
            })
            .collect();

        let messages = MessageBuilder::to("5511").options("Escolha:", &options).expect("options");
        let value = serde_json::to_value(&messages[0]).expect("serialize");

        assert_eq!(value["interactive"]["type"], "list");
        assert_eq!(value["interactive"]["action"]["button"], "Ver opções");
        let rows = value["interactive"]["action"]["sections"][0]["rows"]
            .as_array()
            .expect("rows")
            .clone();
        assert_eq!(rows.len(), 5);
        let title = rows[0]["title"].as_str().expect("title");
        assert_eq!(title.chars().count(), 24);
        assert!(title.ends_with('…'));
    }

    #[test]
    fn too_many_or_no_options_are_rejected() {
        let options: Vec<ReplyOption> =
            (0..11).map(|index| ReplyOption::new(format!("id{index}"), "x")).collect();
        assert_eq!(
            MessageBuilder::to("5511").options("?", &options),
            Err(MessageError::TooManyOptions(11))
        );
        assert_eq!(MessageBuilder::to("5511").options("?", &[]), Err(MessageError::NoOptions));
    }

    #[test]
    fn long_body_is_split_into_text_and_interactive() {
        let summary = "✅ Resumo\n".to_string() + &"*Campo:* valor\n".repeat(90);
        let body = format!("{summary}\n\nConfirma?");
        assert!(body.chars().count() > MAX_INTERACTIVE_BODY_CHARS);

        let options = vec![ReplyOption::new("confirmar", "Confirmar"), ReplyOption::new("editar", "Editar")];
        let messages = MessageBuilder::to("5511").options(&body, &options).expect("options");

        assert_eq!(messages.len(), 2);
        let lead = serde_json::to_value(&messages[0]).expect("serialize");
        let prompt = serde_json::to_value(&messages[1]).expect("serialize");
        assert_eq!(lead["type"], "text");
        assert!(lead["text"]["body"].as_str().expect("body").starts_with("✅ Resumo"));
        assert_eq!(prompt["interactive"]["body"]["text"], "Confirma?");
    }
}
