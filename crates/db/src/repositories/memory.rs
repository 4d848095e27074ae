use std::collections::HashMap;

use tokio::sync::RwLock;

use concierge_core::session::{ConversationAddress, Session, SessionStore, SessionStoreError};

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<ConversationAddress, Session>>,
}

impl InMemorySessionRepository {
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionRepository {
    async fn load(
        &self,
        address: &ConversationAddress,
    ) -> Result<Option<Session>, SessionStoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(address).cloned())
    }

    async fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.address.clone(), session.clone());
        Ok(())
    }
}
