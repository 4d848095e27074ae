use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use concierge_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl Field {
    fn new(key: &'static str, value: impl Into<String>, env_keys: &'static [&'static str]) -> Self {
        Self { key, value: value.into(), env_keys }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in effective_fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn effective_fields(config: &AppConfig) -> Vec<Field> {
    vec![
        Field::new("database.url", &config.database.url, &["CONCIERGE_DATABASE_URL"]),
        Field::new(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["CONCIERGE_DATABASE_MAX_CONNECTIONS"],
        ),
        Field::new(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["CONCIERGE_DATABASE_TIMEOUT_SECS"],
        ),
        Field::new(
            "classifier.provider",
            format!("{:?}", config.classifier.provider),
            &["CONCIERGE_CLASSIFIER_PROVIDER"],
        ),
        Field::new(
            "classifier.model_url",
            redact_url(config.classifier.model_url.as_ref()),
            &["CONCIERGE_CLASSIFIER_MODEL_URL", "LUIS_MODEL_URL"],
        ),
        Field::new(
            "classifier.timeout_secs",
            config.classifier.timeout_secs.to_string(),
            &["CONCIERGE_CLASSIFIER_TIMEOUT_SECS"],
        ),
        Field::new(
            "spell_check.enabled",
            config.spell_check.enabled.to_string(),
            &["CONCIERGE_SPELL_CHECK_ENABLED", "IS_SPELL_CORRECTION_ENABLED"],
        ),
        Field::new(
            "spell_check.endpoint",
            &config.spell_check.endpoint,
            &["CONCIERGE_SPELL_CHECK_ENDPOINT"],
        ),
        Field::new(
            "spell_check.api_key",
            redact_secret(config.spell_check.api_key.as_ref()),
            &["CONCIERGE_SPELL_CHECK_API_KEY"],
        ),
        Field::new(
            "search.latency_ms",
            config.search.latency_ms.to_string(),
            &["CONCIERGE_SEARCH_LATENCY_MS"],
        ),
        Field::new(
            "engine.max_chained_steps",
            config.engine.max_chained_steps.to_string(),
            &["CONCIERGE_ENGINE_MAX_CHAINED_STEPS"],
        ),
        Field::new(
            "engine.rng_seed",
            config.engine.rng_seed.map(|seed| seed.to_string()).unwrap_or_else(|| "<unset>".into()),
            &["CONCIERGE_ENGINE_RNG_SEED"],
        ),
        Field::new(
            "channel.mode",
            format!("{:?}", config.channel.mode),
            &["CONCIERGE_CHANNEL_MODE"],
        ),
        Field::new(
            "channel.app_id",
            config.channel.app_id.as_deref().unwrap_or("<unset>"),
            &["CONCIERGE_CHANNEL_APP_ID", "MICROSOFT_APP_ID"],
        ),
        Field::new(
            "channel.app_password",
            redact_secret(config.channel.app_password.as_ref()),
            &["CONCIERGE_CHANNEL_APP_PASSWORD", "MICROSOFT_APP_PASSWORD"],
        ),
        Field::new(
            "channel.simulate_typing",
            config.channel.simulate_typing.to_string(),
            &["CONCIERGE_CHANNEL_SIMULATE_TYPING"],
        ),
        Field::new(
            "server.bind_address",
            &config.server.bind_address,
            &["CONCIERGE_SERVER_BIND_ADDRESS"],
        ),
        Field::new(
            "server.port",
            config.server.port.to_string(),
            &["CONCIERGE_SERVER_PORT", "PORT"],
        ),
        Field::new(
            "logging.level",
            &config.logging.level,
            &["CONCIERGE_LOGGING_LEVEL", "CONCIERGE_LOG_LEVEL"],
        ),
        Field::new(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["CONCIERGE_LOGGING_FORMAT", "CONCIERGE_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("concierge.toml"), PathBuf::from("config/concierge.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
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

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: Option<&SecretString>) -> String {
    match secret {
        Some(value) if !value.expose_secret().trim().is_empty() => "<redacted>".to_string(),
        Some(_) => "<empty>".to_string(),
        None => "<unset>".to_string(),
    }
}

/// Keeps scheme, host and path; the query string carries the subscription key.
fn redact_url(secret: Option<&SecretString>) -> String {
    let Some(value) = secret else {
        return "<unset>".to_string();
    };
    let raw = value.expose_secret().trim();
    match raw.split_once('?') {
        Some((base, _)) => format!("{base}?<redacted>"),
        None if raw.is_empty() => "<empty>".to_string(),
        None => raw.to_string(),
    }
}
