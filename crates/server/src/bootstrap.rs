use std::sync::Arc;
use std::time::Duration;

use concierge_agent::{
    AgentRuntime, BingSpellCorrector, ClassifierError, IntentClassifier, KeywordClassifier,
    LuisClassifier, SpellError,
};
use concierge_channel::{
    default_dispatcher, ChannelRunner, ChannelTransport, ConsoleTransport, NoopTransport,
    ReconnectPolicy,
};
use concierge_core::config::{AppConfig, ChannelMode, ClassifierProvider, ConfigError, LoadOptions};
use concierge_core::dialogs::{
    default_registry, DialogEngine, DialogRegistry, EngineSettings, RegistryError,
};
use concierge_core::session::SessionStore;
use concierge_core::TracingAuditSink;
use concierge_db::{
    connect_with_settings, migrations, DbPool, FixtureHotelStore, SqlSessionRepository,
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub registry: Arc<DialogRegistry>,
    pub runtime: Arc<AgentRuntime>,
    pub channel_runner: ChannelRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("dialog registry is invalid: {0}")]
    Registry(#[from] RegistryError),
    #[error("intent classifier could not be created: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("spell corrector could not be created: {0}")]
    SpellCheck(#[from] SpellError),
    #[error("missing required setting `{0}`")]
    MissingSetting(&'static str),
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

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let registry = Arc::new(default_registry()?);
    let store: Arc<dyn SessionStore> = Arc::new(SqlSessionRepository::new(db_pool.clone()));
    let runtime = Arc::new(build_runtime(&config, registry.clone(), store)?);
    info!(
        event_name = "system.bootstrap.runtime_ready",
        correlation_id = "bootstrap",
        dialogs = registry.len(),
        classifier = runtime.classifier_name(),
        spell_check = config.spell_check.enabled,
        "agent runtime initialized"
    );

    let channel_runner = build_channel_runner(&config, runtime.clone());

    Ok(Application { config, db_pool, registry, runtime, channel_runner })
}

pub fn build_runtime(
    config: &AppConfig,
    registry: Arc<DialogRegistry>,
    store: Arc<dyn SessionStore>,
) -> Result<AgentRuntime, BootstrapError> {
    let search = Arc::new(FixtureHotelStore::new(Duration::from_millis(config.search.latency_ms)));
    let engine = DialogEngine::new(registry, search, store)
        .with_audit(Arc::new(TracingAuditSink))
        .with_settings(EngineSettings {
            max_chained_steps: config.engine.max_chained_steps,
            rng_seed: config.engine.rng_seed,
        });

    let classifier: Arc<dyn IntentClassifier> = match config.classifier.provider {
        ClassifierProvider::Luis => {
            let model_url = config
                .classifier
                .model_url
                .clone()
                .ok_or(BootstrapError::MissingSetting("classifier.model_url"))?;
            Arc::new(LuisClassifier::new(
                model_url,
                Duration::from_secs(config.classifier.timeout_secs),
            )?)
        }
        ClassifierProvider::Keyword => Arc::new(KeywordClassifier::new()),
    };

    let mut runtime = AgentRuntime::new(classifier, Arc::new(engine));
    if config.spell_check.enabled {
        let api_key = config
            .spell_check
            .api_key
            .clone()
            .ok_or(BootstrapError::MissingSetting("spell_check.api_key"))?;
        let timeout = Duration::from_millis(config.spell_check.timeout_ms);
        let corrector =
            BingSpellCorrector::new(config.spell_check.endpoint.clone(), api_key, timeout)?;
        runtime = runtime.with_spell_corrector(Arc::new(corrector), timeout);
    }

    Ok(runtime)
}

fn build_channel_runner(config: &AppConfig, runtime: Arc<AgentRuntime>) -> ChannelRunner {
    let transport: Arc<dyn ChannelTransport> = match config.channel.mode {
        ChannelMode::Noop => Arc::new(NoopTransport),
        ChannelMode::Console => Arc::new(ConsoleTransport::stdio()),
    };
    ChannelRunner::new(transport, Arc::new(default_dispatcher(runtime)), ReconnectPolicy::default())
        .with_simulate_typing(config.channel.simulate_typing)
}
