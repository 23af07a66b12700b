//! Decoding of Cloud API webhook notifications into dialogue input events.
//!
//! One notification can batch several messages across `entry[].changes[]`.
//! Each supported message becomes one [`InboundEvent`]; status callbacks and
//! media messages are reported as [`SkippedMessage`]s so the caller can log them.

use intake_core::dialogue::InboundEvent;
use serde::Deserialize;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebhookChange {
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub value: ChangeValue,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub contacts: Vec<ContactProfile>,
    #[serde(default)]
    pub messages: Vec<WebhookMessage>,
    #[serde(default)]
    pub statuses: Vec<serde_json::Value>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ContactProfile {
    pub wa_id: String,
    #[serde(default)]
    pub profile: Option<ProfileName>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProfileName {
    #[serde(default)]
    pub name: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebhookMessage {
    pub from: String,
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<TextBody>,
    #[serde(default)]
    pub interactive: Option<InteractiveReply>,
    #[serde(default)]
    pub button: Option<LegacyButton>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct TextBody {
    pub body: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct InteractiveReply {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub button_reply: Option<ReplySelection>,
    #[serde(default)]
    pub list_reply: Option<ReplySelection>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ReplySelection {
    pub id: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct LegacyButton {
    #[serde(default)]
    pub payload: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedMessage {
    pub message_id: String,
    pub contact_id: String,
    pub kind: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecodedBatch {
    pub events: Vec<InboundEvent>,
    pub skipped: Vec<SkippedMessage>,
    pub status_updates: usize,
}

impl WebhookPayload {
    pub fn decode(&self) -> DecodedBatch {
        let mut batch = DecodedBatch::default();

        for change in self.entry.iter().flat_map(|entry| entry.changes.iter()) {
            let value = &change.value;
            batch.status_updates += value.statuses.len();

            for message in &value.messages {
                let display_name = display_name_for(&value.contacts, &message.from);
                match input_for(message) {
                    Some(event) => batch.events.push(
                        event.with_display_name(display_name).with_delivery_id(message.id.clone()),
                    ),
                    None => batch.skipped.push(SkippedMessage {
                        message_id: message.id.clone(),
                        contact_id: message.from.clone(),
                        kind: message.kind.clone(),
                    }),
                }
            }
        }

        batch
    }
}

fn display_name_for(contacts: &[ContactProfile], wa_id: &str) -> String {
    contacts
        .iter()
        .find(|contact| contact.wa_id == wa_id)
        .or_else(|| contacts.first())
        .and_then(|contact| contact.profile.as_ref())
        .map(|profile| profile.name.trim().to_string())
        .unwrap_or_default()
}

fn input_for(message: &WebhookMessage) -> Option<InboundEvent> {
    let contact = message.from.as_str();

    if let Some(button) = &message.button {
        if let Some(payload) = button.payload.as_deref().filter(|value| !value.is_empty()) {
            return Some(InboundEvent::option(contact, payload));
        }
        if let Some(text) = button.text.as_deref().filter(|value| !value.is_empty()) {
            return Some(InboundEvent::text(contact, text));
        }
    }

    match message.kind.as_str() {
        "text" => message.text.as_ref().map(|text| InboundEvent::text(contact, text.body.clone())),
        "interactive" => {
            let interactive = message.interactive.as_ref()?;
            let selection = match interactive.kind.as_str() {
                "button_reply" => interactive.button_reply.as_ref(),
                "list_reply" => interactive.list_reply.as_ref(),
                _ => None,
            }?;
            Some(InboundEvent::option(contact, selection.id.clone()))
        }
        _ => None,
    }
}
