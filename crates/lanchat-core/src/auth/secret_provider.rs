//! Where the initiator's secret comes from.
//!
//! When the initiator is challenged it needs the names the local human
//! agreed on.  A console app prompts for them; a headless node reads them
//! from its config.  Either way the answer may take arbitrarily long, so the
//! seam is async and the handshake keeps its timeout running meanwhile.

use async_trait::async_trait;

use crate::domain::peer::ConnectionId;
use crate::domain::secret::Secret;

/// Supplies the local secret when an initiator is challenged.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Returns the names to send for `connection_id`, or `None` if the user
    /// cancelled.
    async fn request_secret(&self, connection_id: &ConnectionId) -> Option<Secret>;
}

/// Answers every challenge with the same preconfigured secret.
#[derive(Debug, Clone)]
pub struct StaticSecretProvider {
    secret: Option<Secret>,
}

impl StaticSecretProvider {
    pub fn new(secret: Secret) -> Self {
        Self {
            secret: Some(secret),
        }
    }

    /// A provider that always cancels.  Useful for nodes that never dial out.
    pub fn cancelling() -> Self {
        Self { secret: None }
    }
}

#[async_trait]
impl SecretProvider for StaticSecretProvider {
    async fn request_secret(&self, _connection_id: &ConnectionId) -> Option<Secret> {
        self.secret.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider_returns_configured_secret() {
        let provider = StaticSecretProvider::new(Secret::parse("lion,tiger,bear"));
        let secret = provider.request_secret(&ConnectionId::new()).await;
        assert_eq!(secret, Some(Secret::parse("lion,tiger,bear")));
    }

    #[tokio::test]
    async fn test_cancelling_provider_returns_none() {
        let provider = StaticSecretProvider::cancelling();
        assert_eq!(provider.request_secret(&ConnectionId::new()).await, None);
    }
}
