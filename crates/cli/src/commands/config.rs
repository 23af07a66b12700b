use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use intake_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

struct Entry {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

pub fn run() -> String {
    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            let path = detect_config_path();
            let doc = load_config_file_doc(path.as_deref());
            render(&config, doc.as_ref(), path.as_deref())
        }
        Err(error) => format!("config validation failed: {error}"),
    }
}

fn entries(config: &AppConfig) -> Vec<Entry> {
    vec![
        Entry {
            key: "session_store.backend",
            value: format!("{:?}", config.session_store.backend).to_lowercase(),
            env_keys: &["INTAKE_SESSION_STORE_BACKEND"],
        },
        Entry {
            key: "session_store.url",
            value: config.session_store.url.clone(),
            env_keys: &["INTAKE_SESSION_STORE_URL"],
        },
        Entry {
            key: "dialogue.session_timeout_secs",
            value: config.dialogue.session_timeout_secs.to_string(),
            env_keys: &["INTAKE_DIALOGUE_SESSION_TIMEOUT_SECS"],
        },
        Entry {
            key: "dialogue.reset_keywords",
            value: config.dialogue.reset_keywords.join(", "),
            env_keys: &["INTAKE_DIALOGUE_RESET_KEYWORDS"],
        },
        Entry {
            key: "dialogue.channel",
            value: config.dialogue.channel.clone(),
            env_keys: &["INTAKE_DIALOGUE_CHANNEL"],
        },
        Entry {
            key: "whatsapp.access_token",
            value: redact_token(config.whatsapp.access_token.expose_secret()),
            env_keys: &["INTAKE_WHATSAPP_ACCESS_TOKEN", "WA_ACCESS_TOKEN"],
        },
        Entry {
            key: "whatsapp.phone_number_id",
            value: config.whatsapp.phone_number_id.clone().unwrap_or_else(|| "<unset>".to_string()),
            env_keys: &["INTAKE_WHATSAPP_PHONE_NUMBER_ID", "WA_PHONE_NUMBER_ID"],
        },
        Entry {
            key: "record_sink.url",
            value: config.record_sink.url.clone().unwrap_or_else(|| "<unset>".to_string()),
            env_keys: &["INTAKE_RECORD_SINK_URL", "OFICINA_SHEET_WEBHOOK_URL"],
        },
        Entry {
            key: "record_sink.secret",
            value: redact_token(config.record_sink.secret.expose_secret()),
            env_keys: &["INTAKE_RECORD_SINK_SECRET", "OFICINA_SHEETS_SECRET"],
        },
        Entry {
            key: "address.enabled",
            value: config.address.enabled.to_string(),
            env_keys: &["INTAKE_ADDRESS_ENABLED"],
        },
        Entry {
            key: "llm.enabled",
            value: config.llm.enabled.to_string(),
            env_keys: &["INTAKE_LLM_ENABLED"],
        },
        Entry {
            key: "llm.model",
            value: config.llm.model.clone(),
            env_keys: &["INTAKE_LLM_MODEL"],
        },
        Entry {
            key: "llm.api_key",
            value: if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" }.to_string(),
            env_keys: &["INTAKE_LLM_API_KEY", "OPENAI_API_KEY"],
        },
        Entry {
            key: "server.port",
            value: config.server.port.to_string(),
            env_keys: &["INTAKE_SERVER_PORT", "PORT"],
        },
        Entry {
            key: "logging.level",
            value: config.logging.level.clone(),
            env_keys: &["INTAKE_LOGGING_LEVEL", "INTAKE_LOG_LEVEL"],
        },
        Entry {
            key: "logging.format",
            value: format!("{:?}", config.logging.format).to_lowercase(),
            env_keys: &["INTAKE_LOGGING_FORMAT", "INTAKE_LOG_FORMAT"],
        },
    ]
}

fn render(config: &AppConfig, doc: Option<&Value>, path: Option<&Path>) -> String {
    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(entries(config).into_iter().map(|entry| {
        let source = field_source(entry.key, entry.env_keys, doc, path);
        format!("- {} = {} (source: {source})", entry.key, entry.value)
    }));
    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("intake.toml"), PathBuf::from("config/intake.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

/// Keeps a short prefix so operators can tell which credential is loaded.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    let prefix: String = trimmed.chars().take(4).collect();
    if trimmed.chars().count() > 8 {
        format!("{prefix}***")
    } else {
        "<redacted>".to_string()
    }
}
