use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Hotel, Review};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SearchError {
    #[error("search service unavailable: {0}")]
    Unavailable(String),
    #[error("search timed out after {0}ms")]
    Timeout(u64),
}

#[async_trait]
pub trait HotelSearch: Send + Sync {
    async fn search_hotels(&self, destination: &str) -> Result<Vec<Hotel>, SearchError>;
    async fn search_reviews(&self, hotel_name: &str) -> Result<Vec<Review>, SearchError>;
}

/// A long-latency lookup a step asked for. Persisted with the frame so an
/// interrupted turn can re-issue it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LookupRequest {
    Hotels { destination: String },
    Reviews { hotel_name: String },
}

impl LookupRequest {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Hotels { .. } => "hotels",
            Self::Reviews { .. } => "reviews",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum LookupResult {
    Hotels(Vec<Hotel>),
    Reviews(Vec<Review>),
    Failed { reason: String },
}

impl LookupResult {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

pub async fn perform_lookup(search: &dyn HotelSearch, request: &LookupRequest) -> LookupResult {
    let result = match request {
        LookupRequest::Hotels { destination } => {
            search.search_hotels(destination).await.map(LookupResult::Hotels)
        }
        LookupRequest::Reviews { hotel_name } => {
            search.search_reviews(hotel_name).await.map(LookupResult::Reviews)
        }
    };
    result.unwrap_or_else(|error| LookupResult::Failed { reason: error.to_string() })
}
