use std::sync::Arc;

use crate::{
    domain::UserId,
    errors::Error,
    ports::{SessionStore, SourceReader, SourceSession},
    Result,
};

/// Turns a requester's stored token into an open delegated session.
///
/// Tokens are issued and refreshed by the external login flow; the broker
/// only reads them.
pub struct SessionBroker {
    tokens: Arc<dyn SessionStore>,
    reader: Arc<dyn SourceReader>,
}

impl SessionBroker {
    pub fn new(tokens: Arc<dyn SessionStore>, reader: Arc<dyn SourceReader>) -> Self {
        Self { tokens, reader }
    }

    pub async fn acquire(&self, user: UserId) -> Result<Arc<dyn SourceSession>> {
        let token = self.tokens.get(user).await?.ok_or(Error::SessionMissing)?;

        match self.reader.connect(&token).await {
            Ok(session) => {
                tracing::debug!(user = user.0, "delegated session opened");
                Ok(session)
            }
            Err(e) => {
                tracing::info!(user = user.0, error = %e, "delegated session rejected");
                Err(Error::SessionInvalid(e.to_string()))
            }
        }
    }
}
