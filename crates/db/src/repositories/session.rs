use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use tracing::debug;

use concierge_core::session::{
    ConversationAddress, DialogStack, InboundMessage, Session, SessionStore, SessionStoreError,
};

use super::RepositoryError;
use crate::DbPool;

/// Conversation state keyed by channel address. The stack and last message
/// are stored as JSON so a restarted process resumes every conversation at
/// the step it was suspended on.
pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find(
        &self,
        address: &ConversationAddress,
    ) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT address, stack_json, last_message_json, updated_at
            FROM conversation_session
            WHERE address = ?
            "#,
        )
        .bind(address.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| session_from_row(&r)).transpose()
    }

    pub async fn upsert(&self, session: &Session) -> Result<(), RepositoryError> {
        let stack_json = serde_json::to_string(&session.stack)
            .map_err(|error| RepositoryError::Decode(format!("encode stack: {error}")))?;
        let last_message_json = session
            .last_message
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|error| RepositoryError::Decode(format!("encode last message: {error}")))?;

        sqlx::query(
            r#"
            INSERT INTO conversation_session (address, stack_json, last_message_json, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(address) DO UPDATE SET
                stack_json = excluded.stack_json,
                last_message_json = excluded.last_message_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(session.address.as_str())
        .bind(stack_json)
        .bind(last_message_json)
        .bind(session.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(
            event_name = "db.session.saved",
            conversation = %session.address,
            stack_depth = session.stack.depth(),
            "conversation session saved"
        );
        Ok(())
    }

    pub async fn delete(&self, address: &ConversationAddress) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM conversation_session WHERE address = ?")
            .bind(address.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count(&self) -> Result<i64, RepositoryError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM conversation_session")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("count"))
    }
}

#[async_trait::async_trait]
impl SessionStore for SqlSessionRepository {
    async fn load(
        &self,
        address: &ConversationAddress,
    ) -> Result<Option<Session>, SessionStoreError> {
        self.find(address).await.map_err(|error| error.into_store_error(address.as_str()))
    }

    async fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
        self.upsert(session).await.map_err(|error| error.into_store_error(session.address.as_str()))
    }
}

fn session_from_row(row: &SqliteRow) -> Result<Session, RepositoryError> {
    let address: String = row.try_get("address")?;
    let stack_json: String = row.try_get("stack_json")?;
    let last_message_json: Option<String> = row.try_get("last_message_json")?;
    let updated_at: String = row.try_get("updated_at")?;

    let stack = serde_json::from_str::<DialogStack>(&stack_json)
        .map_err(|error| RepositoryError::Decode(format!("stack_json: {error}")))?;
    let last_message = last_message_json
        .as_deref()
        .map(serde_json::from_str::<InboundMessage>)
        .transpose()
        .map_err(|error| RepositoryError::Decode(format!("last_message_json: {error}")))?;
    let updated_at = DateTime::parse_from_rfc3339(&updated_at)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("updated_at: {error}")))?;

    Ok(Session { address: ConversationAddress(address), stack, last_message, updated_at })
}
