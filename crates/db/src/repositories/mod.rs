use thiserror::Error;

use concierge_core::session::SessionStoreError;

pub mod memory;
pub mod session;

pub use memory::InMemorySessionRepository;
pub use session::SqlSessionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl RepositoryError {
    pub(crate) fn into_store_error(self, address: &str) -> SessionStoreError {
        match self {
            Self::Database(error) => SessionStoreError::Unavailable(error.to_string()),
            Self::Decode(reason) => {
                SessionStoreError::Corrupt { address: address.to_owned(), reason }
            }
        }
    }
}
