use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use concierge_core::intent::{Entity, IntentResult};

use crate::classifier::{ClassifierError, IntentClassifier};

/// Client for a hosted LUIS v2 application. The model URL carries the app id
/// and subscription key, so it is kept as a secret and never logged.
pub struct LuisClassifier {
    http: Client,
    model_url: SecretString,
    timeout: Duration,
}

impl LuisClassifier {
    pub fn new(model_url: SecretString, timeout: Duration) -> Result<Self, ClassifierError> {
        Url::parse(model_url.expose_secret())
            .map_err(|error| ClassifierError::Transport(format!("invalid model url: {error}")))?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| ClassifierError::Transport(error.to_string()))?;
        Ok(Self { http, model_url, timeout })
    }

    fn request_url(&self, text: &str) -> Result<Url, ClassifierError> {
        build_query_url(self.model_url.expose_secret(), text)
    }
}

fn build_query_url(model_url: &str, text: &str) -> Result<Url, ClassifierError> {
    let mut url = Url::parse(model_url)
        .map_err(|error| ClassifierError::Transport(format!("invalid model url: {error}")))?;
    let retained = url
        .query_pairs()
        .filter(|(key, _)| key != "q")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect::<Vec<_>>();
    url.query_pairs_mut().clear().extend_pairs(retained).append_pair("q", text);
    Ok(url)
}

#[async_trait]
impl IntentClassifier for LuisClassifier {
    fn name(&self) -> &'static str {
        "luis"
    }

    async fn classify(&self, text: &str) -> Result<IntentResult, ClassifierError> {
        let url = self.request_url(text)?;
        let response = self.http.get(url).send().await.map_err(|error| {
            if error.is_timeout() {
                ClassifierError::Timeout(self.timeout.as_millis() as u64)
            } else {
                ClassifierError::Transport(error.without_url().to_string())
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| ClassifierError::Transport(error.without_url().to_string()))?;
        if !status.is_success() {
            return Err(ClassifierError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let intent = parse_luis_response(&body)?;
        debug!(
            event_name = "classifier.luis.completed",
            intent = %intent.intent,
            score = intent.score,
            entities = intent.entities.len(),
            "luis classification completed"
        );
        Ok(intent)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LuisResponse {
    top_scoring_intent: Option<LuisIntent>,
    #[serde(default)]
    intents: Vec<LuisIntent>,
    #[serde(default)]
    entities: Vec<LuisEntity>,
}

#[derive(Debug, Deserialize)]
struct LuisIntent {
    intent: String,
    #[serde(default)]
    score: f64,
}

#[derive(Debug, Deserialize)]
struct LuisEntity {
    entity: String,
    #[serde(rename = "type")]
    entity_type: String,
    score: Option<f64>,
}

/// Maps a LUIS v2 prediction body to an [`IntentResult`]. Prebuilt entities
/// come back without a score; they are treated as certain.
pub fn parse_luis_response(body: &str) -> Result<IntentResult, ClassifierError> {
    let response: LuisResponse =
        serde_json::from_str(body).map_err(|error| ClassifierError::Decode(error.to_string()))?;

    let top = response.top_scoring_intent.or_else(|| {
        response.intents.into_iter().max_by(|left, right| left.score.total_cmp(&right.score))
    });
    let Some(top) = top else {
        return Ok(IntentResult::none());
    };

    let entities = response
        .entities
        .into_iter()
        .map(|entity| Entity::new(entity.entity_type, entity.entity, entity.score.unwrap_or(1.0)))
        .collect();

    Ok(IntentResult::new(top.intent, top.score, entities))
}
