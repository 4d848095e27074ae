use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub classifier: ClassifierConfig,
    pub spell_check: SpellCheckConfig,
    pub search: SearchConfig,
    pub engine: EngineConfig,
    pub channel: ChannelConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ClassifierConfig {
    pub provider: ClassifierProvider,
    /// Full LUIS endpoint URL; the subscription key travels in its query string.
    pub model_url: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SpellCheckConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub api_key: Option<SecretString>,
    pub timeout_ms: u64,
}

#[derive(Clone, Debug)]
pub struct SearchConfig {
    pub latency_ms: u64,
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub max_chained_steps: u32,
    pub rng_seed: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub mode: ChannelMode,
    pub app_id: Option<String>,
    pub app_password: Option<SecretString>,
    pub simulate_typing: bool,
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
pub enum ClassifierProvider {
    Luis,
    Keyword,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMode {
    Noop,
    Console,
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
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub classifier_provider: Option<ClassifierProvider>,
    pub classifier_model_url: Option<String>,
    pub spell_check_enabled: Option<bool>,
    pub channel_mode: Option<ChannelMode>,
    pub simulate_typing: Option<bool>,
    pub rng_seed: Option<u64>,
    pub search_latency_ms: Option<u64>,
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
            database: DatabaseConfig {
                url: "sqlite://concierge.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            classifier: ClassifierConfig {
                provider: ClassifierProvider::Keyword,
                model_url: None,
                timeout_secs: 10,
            },
            spell_check: SpellCheckConfig {
                enabled: false,
                endpoint: "https://api.cognitive.microsoft.com/bing/v7.0/spellcheck".to_string(),
                api_key: None,
                timeout_ms: 1_500,
            },
            search: SearchConfig { latency_ms: 1_000 },
            engine: EngineConfig { max_chained_steps: 32, rng_seed: None },
            channel: ChannelConfig {
                mode: ChannelMode::Noop,
                app_id: None,
                app_password: None,
                simulate_typing: true,
            },
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 3978,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for ClassifierProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "luis" => Ok(Self::Luis),
            "keyword" => Ok(Self::Keyword),
            other => Err(ConfigError::Validation(format!(
                "unsupported classifier provider `{other}` (expected luis|keyword)"
            ))),
        }
    }
}

impl std::str::FromStr for ChannelMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "noop" => Ok(Self::Noop),
            "console" => Ok(Self::Console),
            other => Err(ConfigError::Validation(format!(
                "unsupported channel mode `{other}` (expected noop|console)"
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
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("concierge.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(classifier) = patch.classifier {
            if let Some(provider) = classifier.provider {
                self.classifier.provider = provider;
            }
            if let Some(model_url) = classifier.model_url {
                self.classifier.model_url = Some(secret_value(model_url));
            }
            if let Some(timeout_secs) = classifier.timeout_secs {
                self.classifier.timeout_secs = timeout_secs;
            }
        }

        if let Some(spell_check) = patch.spell_check {
            if let Some(enabled) = spell_check.enabled {
                self.spell_check.enabled = enabled;
            }
            if let Some(endpoint) = spell_check.endpoint {
                self.spell_check.endpoint = endpoint;
            }
            if let Some(api_key) = spell_check.api_key {
                self.spell_check.api_key = Some(secret_value(api_key));
            }
            if let Some(timeout_ms) = spell_check.timeout_ms {
                self.spell_check.timeout_ms = timeout_ms;
            }
        }

        if let Some(search) = patch.search {
            if let Some(latency_ms) = search.latency_ms {
                self.search.latency_ms = latency_ms;
            }
        }

        if let Some(engine) = patch.engine {
            if let Some(max_chained_steps) = engine.max_chained_steps {
                self.engine.max_chained_steps = max_chained_steps;
            }
            if let Some(rng_seed) = engine.rng_seed {
                self.engine.rng_seed = Some(rng_seed);
            }
        }

        if let Some(channel) = patch.channel {
            if let Some(mode) = channel.mode {
                self.channel.mode = mode;
            }
            if let Some(app_id) = channel.app_id {
                self.channel.app_id = Some(app_id);
            }
            if let Some(app_password) = channel.app_password {
                self.channel.app_password = Some(secret_value(app_password));
            }
            if let Some(simulate_typing) = channel.simulate_typing {
                self.channel.simulate_typing = simulate_typing;
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
        if let Some(value) = read_env("CONCIERGE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CONCIERGE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("CONCIERGE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("CONCIERGE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_CLASSIFIER_PROVIDER") {
            self.classifier.provider = value.parse()?;
        }
        let model_url =
            read_env("CONCIERGE_CLASSIFIER_MODEL_URL").or_else(|| read_env("LUIS_MODEL_URL"));
        if let Some(value) = model_url {
            self.classifier.model_url = Some(secret_value(value));
        }
        if let Some(value) = read_env("CONCIERGE_CLASSIFIER_TIMEOUT_SECS") {
            self.classifier.timeout_secs = parse_u64("CONCIERGE_CLASSIFIER_TIMEOUT_SECS", &value)?;
        }

        let spell_enabled = read_env("CONCIERGE_SPELL_CHECK_ENABLED")
            .map(|value| ("CONCIERGE_SPELL_CHECK_ENABLED", value))
            .or_else(|| {
                read_env("IS_SPELL_CORRECTION_ENABLED")
                    .map(|value| ("IS_SPELL_CORRECTION_ENABLED", value))
            });
        if let Some((key, value)) = spell_enabled {
            self.spell_check.enabled = parse_bool(key, &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_SPELL_CHECK_ENDPOINT") {
            self.spell_check.endpoint = value;
        }
        if let Some(value) = read_env("CONCIERGE_SPELL_CHECK_API_KEY") {
            self.spell_check.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CONCIERGE_SPELL_CHECK_TIMEOUT_MS") {
            self.spell_check.timeout_ms = parse_u64("CONCIERGE_SPELL_CHECK_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_SEARCH_LATENCY_MS") {
            self.search.latency_ms = parse_u64("CONCIERGE_SEARCH_LATENCY_MS", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_ENGINE_MAX_CHAINED_STEPS") {
            self.engine.max_chained_steps =
                parse_u32("CONCIERGE_ENGINE_MAX_CHAINED_STEPS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_ENGINE_RNG_SEED") {
            self.engine.rng_seed = Some(parse_u64("CONCIERGE_ENGINE_RNG_SEED", &value)?);
        }

        if let Some(value) = read_env("CONCIERGE_CHANNEL_MODE") {
            self.channel.mode = value.parse()?;
        }
        let app_id = read_env("CONCIERGE_CHANNEL_APP_ID").or_else(|| read_env("MICROSOFT_APP_ID"));
        if let Some(value) = app_id {
            self.channel.app_id = Some(value);
        }
        let app_password = read_env("CONCIERGE_CHANNEL_APP_PASSWORD")
            .or_else(|| read_env("MICROSOFT_APP_PASSWORD"));
        if let Some(value) = app_password {
            self.channel.app_password = Some(secret_value(value));
        }
        if let Some(value) = read_env("CONCIERGE_CHANNEL_SIMULATE_TYPING") {
            self.channel.simulate_typing = parse_bool("CONCIERGE_CHANNEL_SIMULATE_TYPING", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        let port = read_env("CONCIERGE_SERVER_PORT")
            .map(|value| ("CONCIERGE_SERVER_PORT", value))
            .or_else(|| read_env("PORT").map(|value| ("PORT", value)));
        if let Some((key, value)) = port {
            self.server.port = parse_u16(key, &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CONCIERGE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("CONCIERGE_LOGGING_LEVEL").or_else(|| read_env("CONCIERGE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CONCIERGE_LOGGING_FORMAT").or_else(|| read_env("CONCIERGE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(provider) = overrides.classifier_provider {
            self.classifier.provider = provider;
        }
        if let Some(model_url) = overrides.classifier_model_url {
            self.classifier.model_url = Some(secret_value(model_url));
        }
        if let Some(enabled) = overrides.spell_check_enabled {
            self.spell_check.enabled = enabled;
        }
        if let Some(mode) = overrides.channel_mode {
            self.channel.mode = mode;
        }
        if let Some(simulate_typing) = overrides.simulate_typing {
            self.channel.simulate_typing = simulate_typing;
        }
        if let Some(rng_seed) = overrides.rng_seed {
            self.engine.rng_seed = Some(rng_seed);
        }
        if let Some(latency_ms) = overrides.search_latency_ms {
            self.search.latency_ms = latency_ms;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_classifier(&self.classifier)?;
        validate_spell_check(&self.spell_check)?;
        validate_search(&self.search)?;
        validate_engine(&self.engine)?;
        validate_channel(&self.channel)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("concierge.toml"), PathBuf::from("config/concierge.toml")]
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

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn secret_is_blank(secret: Option<&SecretString>) -> bool {
    secret.map(|value| value.expose_secret().trim().is_empty()).unwrap_or(true)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_classifier(classifier: &ClassifierConfig) -> Result<(), ConfigError> {
    if classifier.timeout_secs == 0 || classifier.timeout_secs > 60 {
        return Err(ConfigError::Validation(
            "classifier.timeout_secs must be in range 1..=60".to_string(),
        ));
    }

    if classifier.provider == ClassifierProvider::Luis {
        if secret_is_blank(classifier.model_url.as_ref()) {
            return Err(ConfigError::Validation(
                "classifier.model_url is required for the luis provider (set LUIS_MODEL_URL or CONCIERGE_CLASSIFIER_MODEL_URL)"
                    .to_string(),
            ));
        }
        let url_ok = classifier
            .model_url
            .as_ref()
            .map(|value| is_http_url(value.expose_secret().trim()))
            .unwrap_or(false);
        if !url_ok {
            return Err(ConfigError::Validation(
                "classifier.model_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_spell_check(spell_check: &SpellCheckConfig) -> Result<(), ConfigError> {
    if !spell_check.enabled {
        return Ok(());
    }

    if !is_http_url(spell_check.endpoint.trim()) {
        return Err(ConfigError::Validation(
            "spell_check.endpoint must start with http:// or https://".to_string(),
        ));
    }
    if secret_is_blank(spell_check.api_key.as_ref()) {
        return Err(ConfigError::Validation(
            "spell_check.api_key is required when spell_check.enabled is true".to_string(),
        ));
    }
    if spell_check.timeout_ms == 0 || spell_check.timeout_ms > 30_000 {
        return Err(ConfigError::Validation(
            "spell_check.timeout_ms must be in range 1..=30000".to_string(),
        ));
    }

    Ok(())
}

fn validate_search(search: &SearchConfig) -> Result<(), ConfigError> {
    if search.latency_ms > 60_000 {
        return Err(ConfigError::Validation(
            "search.latency_ms must not exceed 60000".to_string(),
        ));
    }
    Ok(())
}

fn validate_engine(engine: &EngineConfig) -> Result<(), ConfigError> {
    if engine.max_chained_steps == 0 || engine.max_chained_steps > 1_024 {
        return Err(ConfigError::Validation(
            "engine.max_chained_steps must be in range 1..=1024".to_string(),
        ));
    }
    Ok(())
}

fn validate_channel(channel: &ChannelConfig) -> Result<(), ConfigError> {
    if channel.app_id.is_some() && secret_is_blank(channel.app_password.as_ref()) {
        return Err(ConfigError::Validation(
            "channel.app_password is required when channel.app_id is set (MICROSOFT_APP_PASSWORD)"
                .to_string(),
        ));
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
    value.trim().to_ascii_lowercase().parse::<bool>().map_err(|_| {
        ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    classifier: Option<ClassifierPatch>,
    spell_check: Option<SpellCheckPatch>,
    search: Option<SearchPatch>,
    engine: Option<EnginePatch>,
    channel: Option<ChannelPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ClassifierPatch {
    provider: Option<ClassifierProvider>,
    model_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SpellCheckPatch {
    enabled: Option<bool>,
    endpoint: Option<String>,
    api_key: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchPatch {
    latency_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct EnginePatch {
    max_chained_steps: Option<u32>,
    rng_seed: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelPatch {
    mode: Option<ChannelMode>,
    app_id: Option<String>,
    app_password: Option<String>,
    simulate_typing: Option<bool>,
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
