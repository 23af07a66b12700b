use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub session_store: SessionStoreConfig,
    pub dialogue: DialogueConfig,
    pub whatsapp: WhatsAppConfig,
    pub record_sink: RecordSinkConfig,
    pub address: AddressConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct SessionStoreConfig {
    pub backend: SessionBackend,
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct DialogueConfig {
    pub session_timeout_secs: u64,
    pub dedup_window_secs: u64,
    pub dedup_per_contact: usize,
    pub max_submit_attempts: u32,
    pub reset_keywords: Vec<String>,
    pub channel: String,
    pub directory_text: Option<String>,
}

#[derive(Clone, Debug)]
pub struct WhatsAppConfig {
    pub access_token: SecretString,
    pub phone_number_id: Option<String>,
    pub api_base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl WhatsAppConfig {
    pub fn is_configured(&self) -> bool {
        !self.access_token.expose_secret().trim().is_empty()
            && self.phone_number_id.as_deref().is_some_and(|id| !id.trim().is_empty())
    }
}

#[derive(Clone, Debug)]
pub struct RecordSinkConfig {
    pub url: Option<String>,
    pub secret: SecretString,
    pub route: String,
    pub timeout_secs: u64,
    pub lookup_enabled: bool,
}

#[derive(Clone, Debug)]
pub struct AddressConfig {
    pub enabled: bool,
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub enabled: bool,
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub max_reply_chars: usize,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionBackend {
    Memory,
    Sqlite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai", alias = "open_ai")]
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub session_backend: Option<SessionBackend>,
    pub session_store_url: Option<String>,
    pub log_level: Option<String>,
    pub session_timeout_secs: Option<u64>,
    pub record_sink_url: Option<String>,
    pub llm_enabled: Option<bool>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            session_store: SessionStoreConfig {
                backend: SessionBackend::Memory,
                url: "sqlite://intake.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            dialogue: DialogueConfig {
                session_timeout_secs: 600,
                dedup_window_secs: 3600,
                dedup_per_contact: 64,
                max_submit_attempts: 3,
                reset_keywords: vec!["reiniciar".to_string(), "cancelar".to_string()],
                channel: "chatbot oficina".to_string(),
                directory_text: None,
            },
            whatsapp: WhatsAppConfig {
                access_token: String::new().into(),
                phone_number_id: None,
                api_base_url: "https://graph.facebook.com/v17.0".to_string(),
                timeout_secs: 15,
                max_retries: 2,
            },
            record_sink: RecordSinkConfig {
                url: None,
                secret: String::new().into(),
                route: "chatbot".to_string(),
                timeout_secs: 15,
                lookup_enabled: false,
            },
            address: AddressConfig {
                enabled: true,
                base_url: "https://viacep.com.br/ws".to_string(),
                timeout_secs: 5,
            },
            llm: LlmConfig {
                enabled: false,
                provider: LlmProvider::OpenAi,
                api_key: None,
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-4o-mini".to_string(),
                timeout_secs: 30,
                max_retries: 1,
                max_reply_chars: 700,
            },
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 10000,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for SessionBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(ConfigError::Validation(format!(
                "unsupported session backend `{other}` (expected memory|sqlite)"
            ))),
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("intake.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(store) = patch.session_store {
            if let Some(backend) = store.backend {
                self.session_store.backend = backend;
            }
            if let Some(url) = store.url {
                self.session_store.url = url;
            }
            if let Some(max_connections) = store.max_connections {
                self.session_store.max_connections = max_connections;
            }
            if let Some(timeout_secs) = store.timeout_secs {
                self.session_store.timeout_secs = timeout_secs;
            }
        }

        if let Some(dialogue) = patch.dialogue {
            if let Some(value) = dialogue.session_timeout_secs {
                self.dialogue.session_timeout_secs = value;
            }
            if let Some(value) = dialogue.dedup_window_secs {
                self.dialogue.dedup_window_secs = value;
            }
            if let Some(value) = dialogue.dedup_per_contact {
                self.dialogue.dedup_per_contact = value;
            }
            if let Some(value) = dialogue.max_submit_attempts {
                self.dialogue.max_submit_attempts = value;
            }
            if let Some(value) = dialogue.reset_keywords {
                self.dialogue.reset_keywords = value;
            }
            if let Some(value) = dialogue.channel {
                self.dialogue.channel = value;
            }
            if let Some(value) = dialogue.directory_text {
                self.dialogue.directory_text = Some(value);
            }
        }

        if let Some(whatsapp) = patch.whatsapp {
            if let Some(access_token_value) = whatsapp.access_token {
                self.whatsapp.access_token = secret_value(access_token_value);
            }
            if let Some(phone_number_id) = whatsapp.phone_number_id {
                self.whatsapp.phone_number_id = Some(phone_number_id);
            }
            if let Some(api_base_url) = whatsapp.api_base_url {
                self.whatsapp.api_base_url = api_base_url;
            }
            if let Some(timeout_secs) = whatsapp.timeout_secs {
                self.whatsapp.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = whatsapp.max_retries {
                self.whatsapp.max_retries = max_retries;
            }
        }

        if let Some(sink) = patch.record_sink {
            if let Some(url) = sink.url {
                self.record_sink.url = Some(url);
            }
            if let Some(sink_secret_value) = sink.secret {
                self.record_sink.secret = secret_value(sink_secret_value);
            }
            if let Some(route) = sink.route {
                self.record_sink.route = route;
            }
            if let Some(timeout_secs) = sink.timeout_secs {
                self.record_sink.timeout_secs = timeout_secs;
            }
            if let Some(lookup_enabled) = sink.lookup_enabled {
                self.record_sink.lookup_enabled = lookup_enabled;
            }
        }

        if let Some(address) = patch.address {
            if let Some(enabled) = address.enabled {
                self.address.enabled = enabled;
            }
            if let Some(base_url) = address.base_url {
                self.address.base_url = base_url;
            }
            if let Some(timeout_secs) = address.timeout_secs {
                self.address.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(enabled) = llm.enabled {
                self.llm.enabled = enabled;
            }
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
            if let Some(max_reply_chars) = llm.max_reply_chars {
                self.llm.max_reply_chars = max_reply_chars;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("INTAKE_SESSION_STORE_BACKEND") {
            self.session_store.backend = value.parse()?;
        }
        if let Some(value) = read_env("INTAKE_SESSION_STORE_URL") {
            self.session_store.url = value;
        }
        if let Some(value) = read_env("INTAKE_SESSION_STORE_MAX_CONNECTIONS") {
            self.session_store.max_connections =
                parse_u32("INTAKE_SESSION_STORE_MAX_CONNECTIONS", &value)?;
        }

        if let Some(value) = read_env("INTAKE_DIALOGUE_SESSION_TIMEOUT_SECS") {
            self.dialogue.session_timeout_secs =
                parse_u64("INTAKE_DIALOGUE_SESSION_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("INTAKE_DIALOGUE_MAX_SUBMIT_ATTEMPTS") {
            self.dialogue.max_submit_attempts =
                parse_u32("INTAKE_DIALOGUE_MAX_SUBMIT_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("INTAKE_DIALOGUE_RESET_KEYWORDS") {
            self.dialogue.reset_keywords = value
                .split(',')
                .map(|keyword| keyword.trim().to_string())
                .filter(|keyword| !keyword.is_empty())
                .collect();
        }
        if let Some(value) = read_env("INTAKE_DIALOGUE_CHANNEL") {
            self.dialogue.channel = value;
        }

        let access_token =
            read_env("INTAKE_WHATSAPP_ACCESS_TOKEN").or_else(|| read_env("WA_ACCESS_TOKEN"));
        if let Some(value) = access_token {
            self.whatsapp.access_token = secret_value(value);
        }
        let phone_number_id =
            read_env("INTAKE_WHATSAPP_PHONE_NUMBER_ID").or_else(|| read_env("WA_PHONE_NUMBER_ID"));
        if let Some(value) = phone_number_id {
            self.whatsapp.phone_number_id = Some(value);
        }
        if let Some(value) = read_env("INTAKE_WHATSAPP_API_BASE_URL") {
            self.whatsapp.api_base_url = value;
        }

        let sink_url = read_env("INTAKE_RECORD_SINK_URL")
            .or_else(|| read_env("OFICINA_SHEET_WEBHOOK_URL"));
        if let Some(value) = sink_url {
            self.record_sink.url = Some(value);
        }
        let sink_secret =
            read_env("INTAKE_RECORD_SINK_SECRET").or_else(|| read_env("OFICINA_SHEETS_SECRET"));
        if let Some(value) = sink_secret {
            self.record_sink.secret = secret_value(value);
        }
        if let Some(value) = read_env("INTAKE_RECORD_SINK_ROUTE") {
            self.record_sink.route = value;
        }
        if let Some(value) = read_env("INTAKE_RECORD_SINK_LOOKUP_ENABLED") {
            self.record_sink.lookup_enabled =
                parse_bool("INTAKE_RECORD_SINK_LOOKUP_ENABLED", &value)?;
        }

        if let Some(value) = read_env("INTAKE_ADDRESS_ENABLED") {
            self.address.enabled = parse_bool("INTAKE_ADDRESS_ENABLED", &value)?;
        }
        if let Some(value) = read_env("INTAKE_ADDRESS_BASE_URL") {
            self.address.base_url = value;
        }

        if let Some(value) = read_env("INTAKE_LLM_ENABLED") {
            self.llm.enabled = parse_bool("INTAKE_LLM_ENABLED", &value)?;
        }
        if let Some(value) = read_env("INTAKE_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        let llm_api_key = read_env("INTAKE_LLM_API_KEY").or_else(|| read_env("OPENAI_API_KEY"));
        if let Some(value) = llm_api_key {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("INTAKE_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("INTAKE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("INTAKE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("INTAKE_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("INTAKE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        let port = read_env("INTAKE_SERVER_PORT").map(|value| ("INTAKE_SERVER_PORT", value));
        if let Some((key, value)) = port.or_else(|| read_env("PORT").map(|value| ("PORT", value)))
        {
            self.server.port = parse_u16(key, &value)?;
        }
        if let Some(value) = read_env("INTAKE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("INTAKE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("INTAKE_LOGGING_LEVEL").or_else(|| read_env("INTAKE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("INTAKE_LOGGING_FORMAT").or_else(|| read_env("INTAKE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(backend) = overrides.session_backend {
            self.session_store.backend = backend;
        }
        if let Some(url) = overrides.session_store_url {
            self.session_store.url = url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(timeout) = overrides.session_timeout_secs {
            self.dialogue.session_timeout_secs = timeout;
        }
        if let Some(url) = overrides.record_sink_url {
            self.record_sink.url = Some(url);
        }
        if let Some(enabled) = overrides.llm_enabled {
            self.llm.enabled = enabled;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_session_store(&self.session_store)?;
        validate_dialogue(&self.dialogue)?;
        validate_whatsapp(&self.whatsapp)?;
        validate_record_sink(&self.record_sink)?;
        validate_address(&self.address)?;
        validate_llm(&self.llm)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("intake.toml"), PathBuf::from("config/intake.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_session_store(store: &SessionStoreConfig) -> Result<(), ConfigError> {
    if store.backend == SessionBackend::Memory {
        return Ok(());
    }

    let url = store.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "session_store.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if store.max_connections == 0 {
        return Err(ConfigError::Validation(
            "session_store.max_connections must be greater than zero".to_string(),
        ));
    }

    if store.timeout_secs == 0 || store.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "session_store.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_dialogue(dialogue: &DialogueConfig) -> Result<(), ConfigError> {
    if dialogue.session_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "dialogue.session_timeout_secs must be greater than zero".to_string(),
        ));
    }
    if dialogue.max_submit_attempts == 0 {
        return Err(ConfigError::Validation(
            "dialogue.max_submit_attempts must be at least 1".to_string(),
        ));
    }
    if dialogue.dedup_per_contact == 0 {
        return Err(ConfigError::Validation(
            "dialogue.dedup_per_contact must be greater than zero".to_string(),
        ));
    }
    if dialogue.channel.trim().is_empty() {
        return Err(ConfigError::Validation("dialogue.channel must not be empty".to_string()));
    }
    Ok(())
}

fn validate_whatsapp(whatsapp: &WhatsAppConfig) -> Result<(), ConfigError> {
    let has_token = !whatsapp.access_token.expose_secret().trim().is_empty();
    let has_phone_id = whatsapp.phone_number_id.as_deref().is_some_and(|id| !id.trim().is_empty());
    if has_token != has_phone_id {
        return Err(ConfigError::Validation(
            "whatsapp.access_token and whatsapp.phone_number_id must be set together".to_string(),
        ));
    }
    validate_http_url("whatsapp.api_base_url", &whatsapp.api_base_url)?;
    if whatsapp.timeout_secs == 0 || whatsapp.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "whatsapp.timeout_secs must be in range 1..=120".to_string(),
        ));
    }
    Ok(())
}

fn validate_record_sink(sink: &RecordSinkConfig) -> Result<(), ConfigError> {
    if let Some(url) = &sink.url {
        validate_http_url("record_sink.url", url)?;
        if sink.secret.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "record_sink.secret is required when record_sink.url is set".to_string(),
            ));
        }
    }
    if sink.route.trim().is_empty() {
        return Err(ConfigError::Validation("record_sink.route must not be empty".to_string()));
    }
    if sink.timeout_secs == 0 || sink.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "record_sink.timeout_secs must be in range 1..=120".to_string(),
        ));
    }
    Ok(())
}

fn validate_address(address: &AddressConfig) -> Result<(), ConfigError> {
    if address.enabled {
        validate_http_url("address.base_url", &address.base_url)?;
    }
    if address.timeout_secs == 0 || address.timeout_secs > 60 {
        return Err(ConfigError::Validation(
            "address.timeout_secs must be in range 1..=60".to_string(),
        ));
    }
    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    if llm.max_reply_chars == 0 {
        return Err(ConfigError::Validation(
            "llm.max_reply_chars must be greater than zero".to_string(),
        ));
    }
    if !llm.enabled {
        return Ok(());
    }

    validate_http_url("llm.base_url", &llm.base_url)?;
    if llm.provider == LlmProvider::OpenAi {
        let missing = llm
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "llm.api_key is required for the openai provider".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_http_url(key: &str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!("{key} must start with http:// or https://")))
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    session_store: Option<SessionStorePatch>,
    dialogue: Option<DialoguePatch>,
    whatsapp: Option<WhatsAppPatch>,
    record_sink: Option<RecordSinkPatch>,
    address: Option<AddressPatch>,
    llm: Option<LlmPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionStorePatch {
    backend: Option<SessionBackend>,
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct DialoguePatch {
    session_timeout_secs: Option<u64>,
    dedup_window_secs: Option<u64>,
    dedup_per_contact: Option<usize>,
    max_submit_attempts: Option<u32>,
    reset_keywords: Option<Vec<String>>,
    channel: Option<String>,
    directory_text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WhatsAppPatch {
    access_token: Option<String>,
    phone_number_id: Option<String>,
    api_base_url: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct RecordSinkPatch {
    url: Option<String>,
    secret: Option<String>,
    route: Option<String>,
    timeout_secs: Option<u64>,
    lookup_enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct AddressPatch {
    enabled: Option<bool>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    enabled: Option<bool>,
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    max_reply_chars: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
