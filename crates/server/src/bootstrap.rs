use std::sync::Arc;

use intake_agent::{ChatCompletionsClient, LlmError, LlmFallbackResponder, ReplyPolicy};
use intake_core::collaborators::{
    AddressEnrichment, CollaboratorError, DiscardingRecordSink, FallbackResponder, LoggingGateway,
    MessagingGateway, NoopAddressEnrichment, NoopFallbackResponder, RecordSink,
};
use intake_core::config::{AppConfig, ConfigError, LoadOptions, SessionBackend};
use intake_core::{Collaborators, DialogueEngine, EngineSettings, InMemorySessionStore, SessionStore};
use intake_db::connection::connect_from_config;
use intake_db::{migrations, DbPool, SqlSessionStore};
use intake_whatsapp::CloudApiGateway;
use thiserror::Error;
use tracing::info;

use crate::address::ViaCepEnrichment;
use crate::sink::HttpRecordSink;

pub struct Application {
    pub config: AppConfig,
    pub engine: Arc<DialogueEngine>,
    pub db_pool: Option<DbPool>,
}

impl Application {
    pub fn store_backend(&self) -> &'static str {
        match self.config.session_store.backend {
            SessionBackend::Memory => "memory",
            SessionBackend::Sqlite => "sqlite",
        }
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("collaborator setup failed: {0}")]
    Collaborator(#[from] CollaboratorError),
    #[error("llm client setup failed: {0}")]
    Llm(#[from] LlmError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let (store, db_pool) = session_store(&config).await?;
    let collaborators = collaborators(&config)?;
    let engine = DialogueEngine::new(store, collaborators, EngineSettings::from_config(&config));

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        whatsapp = config.whatsapp.is_configured(),
        record_sink = config.record_sink.url.is_some(),
        address_enrichment = config.address.enabled,
        llm_fallback = config.llm.enabled,
        "dialogue engine assembled"
    );

    Ok(Application { config, engine: Arc::new(engine), db_pool })
}

async fn session_store(
    config: &AppConfig,
) -> Result<(Arc<dyn SessionStore>, Option<DbPool>), BootstrapError> {
    match config.session_store.backend {
        SessionBackend::Memory => Ok((Arc::new(InMemorySessionStore::new()), None)),
        SessionBackend::Sqlite => {
            let pool = connect_from_config(&config.session_store)
                .await
                .map_err(BootstrapError::DatabaseConnect)?;
            info!(
                event_name = "system.bootstrap.database_connected",
                correlation_id = "bootstrap",
                "database connection established"
            );

            migrations::run_pending(&pool).await.map_err(BootstrapError::Migration)?;
            info!(
                event_name = "system.bootstrap.migrations_applied",
                correlation_id = "bootstrap",
                "database migrations applied"
            );

            Ok((Arc::new(SqlSessionStore::new(pool.clone())), Some(pool)))
        }
    }
}

fn collaborators(config: &AppConfig) -> Result<Collaborators, BootstrapError> {
    let gateway: Arc<dyn MessagingGateway> = if config.whatsapp.is_configured() {
        Arc::new(CloudApiGateway::from_config(&config.whatsapp)?)
    } else {
        Arc::new(LoggingGateway)
    };

    let sink: Arc<dyn RecordSink> = if config.record_sink.url.is_some() {
        Arc::new(HttpRecordSink::from_config(&config.record_sink)?)
    } else {
        Arc::new(DiscardingRecordSink)
    };

    let address: Arc<dyn AddressEnrichment> = if config.address.enabled {
        Arc::new(ViaCepEnrichment::from_config(&config.address)?)
    } else {
        Arc::new(NoopAddressEnrichment)
    };

    let fallback: Arc<dyn FallbackResponder> = if config.llm.enabled {
        let client = ChatCompletionsClient::from_config(&config.llm)?;
        Arc::new(LlmFallbackResponder::new(
            Arc::new(client),
            ReplyPolicy::with_max_chars(config.llm.max_reply_chars),
        ))
    } else {
        Arc::new(NoopFallbackResponder)
    };

    Ok(Collaborators { gateway, sink, address, fallback })
}

#[cfg(test)]
mod tests {
    use intake_core::config::{ConfigOverrides, LoadOptions, SessionBackend};
    use intake_core::{DialogueState, InboundEvent, SessionStore};
    use tempfile::TempDir;

    use crate::bootstrap::{bootstrap, BootstrapError};

    fn options(overrides: ConfigOverrides) -> LoadOptions {
        LoadOptions { overrides, ..LoadOptions::default() }
    }

    #[tokio::test]
    async fn memory_backend_needs_no_database() {
        let app = bootstrap(options(ConfigOverrides {
            session_backend: Some(SessionBackend::Memory),
            ..ConfigOverrides::default()
        }))
        .await
        .expect("bootstrap should succeed");

        assert!(app.db_pool.is_none());
        assert_eq!(app.store_backend(), "memory");
    }

    #[tokio::test]
    async fn sqlite_backend_applies_migrations_and_persists_sessions() {
        let dir = TempDir::new().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("intake.db").display());
        let app = bootstrap(options(ConfigOverrides {
            session_backend: Some(SessionBackend::Sqlite),
            session_store_url: Some(url),
            ..ConfigOverrides::default()
        }))
        .await
        .expect("bootstrap should succeed");

        let pool = app.db_pool.clone().expect("pool");
        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'dialogue_session'",
        )
        .fetch_one(&pool)
        .await
        .expect("sqlite_master");
        assert_eq!(table_count, 1);

        app.engine
            .handle(InboundEvent::text("5511900000000", "oi").with_display_name("Ana"))
            .await
            .expect("handle");
        let session = app.engine.store().get("5511900000000").await.expect("get").expect("session");
        assert_eq!(session.state, DialogueState::Welcome);

        pool.close().await;
    }

    #[tokio::test]
    async fn unreachable_database_fails_fast() {
        let dir = TempDir::new().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("missing").join("intake.db").display());
        let result = bootstrap(options(ConfigOverrides {
            session_backend: Some(SessionBackend::Sqlite),
            session_store_url: Some(url),
            ..ConfigOverrides::default()
        }))
        .await;

        assert!(matches!(result, Err(BootstrapError::DatabaseConnect(_))));
    }
}
