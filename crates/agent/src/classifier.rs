use async_trait::async_trait;
use thiserror::Error;

use concierge_core::dialogs::builtin::{
    AIRPORT_ENTITY, CITY_ENTITY, HELP, HOTEL_ENTITY, OVERSEAS_FAIRS, SEARCH_HOTELS, SHOW_REVIEWS,
};
use concierge_core::intent::{Entity, IntentResult};

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier request failed: {0}")]
    Transport(String),
    #[error("classifier returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("classifier response could not be decoded: {0}")]
    Decode(String),
    #[error("classifier did not answer within {0}ms")]
    Timeout(u64),
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    fn name(&self) -> &'static str;
    async fn classify(&self, text: &str) -> Result<IntentResult, ClassifierError>;
}

const MATCH_SCORE: f64 = 0.9;
const ENTITY_SCORE: f64 = 0.85;

const REVIEW_MARKERS: [&str; 5] =
    ["reviews of ", "reviews for ", "review of ", "review for ", "reviews about "];
const FAIR_KEYWORDS: [&str; 5] = ["fair", "fairs", "exhibition", "exhibitions", "hktdc"];

/// Offline rule-based classifier. Recognises the same intents and entity
/// types as the hosted model so the dialogs behave identically in local runs.
#[derive(Clone, Debug, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify_text(&self, text: &str) -> IntentResult {
        let normalized_text = normalize_text(text);
        let tokens = tokenize(&normalized_text);
        let has_token = |candidates: &[&str]| {
            tokens.iter().any(|token| candidates.contains(&token.as_str()))
        };

        if has_token(&["review", "reviews"]) {
            let entities = extract_after_marker(text, &normalized_text, &REVIEW_MARKERS)
                .map(|hotel| vec![Entity::new(HOTEL_ENTITY, hotel, ENTITY_SCORE)])
                .unwrap_or_default();
            return IntentResult::new(SHOW_REVIEWS, MATCH_SCORE, entities);
        }

        if has_token(&["help"]) || normalized_text.contains("what can you do") {
            return IntentResult::new(HELP, MATCH_SCORE, Vec::new());
        }

        if has_token(&FAIR_KEYWORDS) || normalized_text.contains("trade event") {
            return IntentResult::new(OVERSEAS_FAIRS, MATCH_SCORE, Vec::new());
        }

        if has_token(&["hotel", "hotels"]) {
            let entities = match extract_airport_code(&tokens) {
                Some(code) => vec![Entity::new(AIRPORT_ENTITY, code, ENTITY_SCORE)],
                None => extract_after_marker(text, &normalized_text, &[" in "])
                    .map(|city| vec![Entity::new(CITY_ENTITY, city, ENTITY_SCORE)])
                    .unwrap_or_default(),
            };
            return IntentResult::new(SEARCH_HOTELS, MATCH_SCORE, entities);
        }

        IntentResult::none()
    }
}

#[async_trait]
impl IntentClassifier for KeywordClassifier {
    fn name(&self) -> &'static str {
        "keyword"
    }

    async fn classify(&self, text: &str) -> Result<IntentResult, ClassifierError> {
        Ok(self.classify_text(text))
    }
}

fn normalize_text(text: &str) -> String {
    text.to_ascii_lowercase()
}

fn tokenize(text: &str) -> Vec<String> {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.chars() {
        if character.is_ascii_alphanumeric() {
            sanitized.push(character);
        } else {
            sanitized.push(' ');
        }
    }
    sanitized.split_whitespace().map(|token| token.to_string()).collect()
}

/// "near LAX airport" style codes: three letters directly before "airport".
fn extract_airport_code(tokens: &[String]) -> Option<String> {
    tokens.windows(2).find_map(|pair| {
        let candidate = &pair[0];
        let is_code =
            candidate.len() == 3 && candidate.chars().all(|character| character.is_ascii_alphabetic());
        (pair[1] == "airport" && is_code).then(|| candidate.to_ascii_uppercase())
    })
}

/// Returns the original-case text following the first marker found.
///
/// `normalized_text` must be the ASCII-lowercased form of `text`, so byte
/// offsets line up between the two.
fn extract_after_marker(text: &str, normalized_text: &str, markers: &[&str]) -> Option<String> {
    markers.iter().find_map(|marker| {
        let start = normalized_text.find(marker)? + marker.len();
        let tail = text.get(start..)?;
        let value = tail
            .split(['?', '!', ','])
            .next()
            .unwrap_or(tail)
            .trim()
            .trim_end_matches('.')
            .trim();
        (!value.is_empty()).then(|| value.to_owned())
    })
}
