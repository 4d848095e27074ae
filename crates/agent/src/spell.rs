use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SpellError {
    #[error("spell-check request failed: {0}")]
    Transport(String),
    #[error("spell-check service returned HTTP {status}")]
    Status { status: u16 },
    #[error("spell-check response could not be decoded: {0}")]
    Decode(String),
}

#[async_trait]
pub trait SpellCorrector: Send + Sync {
    async fn correct(&self, text: &str) -> Result<String, SpellError>;
}

/// One flagged token and its replacement. `offset` is a character offset
/// into the original text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpellCorrection {
    pub offset: usize,
    pub token: String,
    pub suggestion: String,
}

/// Applies corrections right to left so earlier offsets stay valid.
/// Corrections whose token does not match the text at its offset are skipped.
pub fn apply_corrections(text: &str, corrections: &[SpellCorrection]) -> String {
    let mut ordered = corrections.iter().collect::<Vec<_>>();
    ordered.sort_by(|left, right| right.offset.cmp(&left.offset));

    let mut characters = text.chars().collect::<Vec<_>>();
    let mut floor = characters.len();
    for correction in ordered {
        let token = correction.token.chars().collect::<Vec<_>>();
        let Some(end) = correction.offset.checked_add(token.len()) else {
            continue;
        };
        if end > floor || characters.get(correction.offset..end) != Some(token.as_slice()) {
            continue;
        }
        characters.splice(correction.offset..end, correction.suggestion.chars());
        floor = correction.offset;
    }
    characters.into_iter().collect()
}

/// Bing Spell Check v7 client (`mode=spell`).
pub struct BingSpellCorrector {
    http: Client,
    endpoint: String,
    api_key: SecretString,
}

impl BingSpellCorrector {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, SpellError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| SpellError::Transport(error.to_string()))?;
        Ok(Self { http, endpoint: endpoint.into(), api_key })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpellCheckResponse {
    #[serde(default)]
    flagged_tokens: Vec<FlaggedToken>,
}

#[derive(Debug, Deserialize)]
struct FlaggedToken {
    offset: usize,
    token: String,
    #[serde(default)]
    suggestions: Vec<Suggestion>,
}

#[derive(Debug, Deserialize)]
struct Suggestion {
    suggestion: String,
}

pub fn parse_spell_response(body: &str) -> Result<Vec<SpellCorrection>, SpellError> {
    let response: SpellCheckResponse =
        serde_json::from_str(body).map_err(|error| SpellError::Decode(error.to_string()))?;
    Ok(response
        .flagged_tokens
        .into_iter()
        .filter_map(|flagged| {
            let suggestion = flagged.suggestions.into_iter().next()?.suggestion;
            Some(SpellCorrection { offset: flagged.offset, token: flagged.token, suggestion })
        })
        .collect())
}

#[async_trait]
impl SpellCorrector for BingSpellCorrector {
    async fn correct(&self, text: &str) -> Result<String, SpellError> {
        let response = self
            .http
            .post(&self.endpoint)
            .query(&[("mode", "spell"), ("mkt", "en-US")])
            .header("Ocp-Apim-Subscription-Key", self.api_key.expose_secret())
            .form(&[("text", text)])
            .send()
            .await
            .map_err(|error| SpellError::Transport(error.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SpellError::Status { status: status.as_u16() });
        }
        let body = response
            .text()
            .await
            .map_err(|error| SpellError::Transport(error.without_url().to_string()))?;

        let corrections = parse_spell_response(&body)?;
        debug!(
            event_name = "spell.corrected",
            corrections = corrections.len(),
            "spell check completed"
        );
        Ok(apply_corrections(text, &corrections))
    }
}

#[cfg(test)]
mod tests {
    use super::{apply_corrections, parse_spell_response, SpellCorrection, SpellError};

    fn correction(offset: usize, token: &str, suggestion: &str) -> SpellCorrection {
        SpellCorrection { offset, token: token.to_owned(), suggestion: suggestion.to_owned() }
    }

    #[test]
    fn corrections_apply_regardless_of_input_order() {
        let text = "serch hotls in Seatle";
        let corrections = vec![
            correction(0, "serch", "search"),
            correction(15, "Seatle", "Seattle"),
            correction(6, "hotls", "hotels"),
        ];

        assert_eq!(apply_corrections(text, &corrections), "search hotels in Seattle");
    }

    #[test]
    fn mismatched_or_out_of_range_corrections_are_skipped() {
        let text = "hotels in Zürich";
        let corrections =
            vec![correction(0, "motels", "hotels"), correction(40, "x", "y"), correction(10, "Zürich", "Zurich")];

        assert_eq!(apply_corrections(text, &corrections), "hotels in Zurich");
    }

    #[test]
    fn offsets_near_usize_max_are_skipped() {
        let corrections =
            vec![correction(usize::MAX - 1, "hotls", "hotels"), correction(0, "serch", "search")];

        assert_eq!(apply_corrections("serch hotels", &corrections), "search hotels");
    }

    #[test]
    fn parses_first_suggestion_for_each_flagged_token() {
        let body = r#"{
            "_type": "SpellCheck",
            "flaggedTokens": [
                { "offset": 0, "token": "serch", "type": "UnknownToken",
                  "suggestions": [ { "suggestion": "search", "score": 0.9 }, { "suggestion": "sech", "score": 0.1 } ] },
                { "offset": 6, "token": "hotls", "type": "UnknownToken", "suggestions": [] }
            ]
        }"#;

        let corrections = parse_spell_response(body).expect("parse");

        assert_eq!(corrections, vec![correction(0, "serch", "search")]);
    }

    #[test]
    fn undecodable_body_is_reported() {
        assert!(matches!(parse_spell_response("nope"), Err(SpellError::Decode(_))));
    }
}
