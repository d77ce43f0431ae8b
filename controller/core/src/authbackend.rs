use crate::model::AuthBackend;
use anyhow::Result;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

/// An application as it is registered on an OIDC identity backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OidcApp {
    pub id: String,
    pub name: String,
    pub callback_url: String,
}

/// Credentials issued by an identity backend for a registered [`OidcApp`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OidcAppRegistryData {
    pub client_id: String,
    pub client_secret: String,
}

/// Registers OIDC applications on an identity backend.
///
/// Both operations must be idempotent: registering an already registered application keeps its
/// credentials, and unregistering an unknown application succeeds.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait AppRegisterer: Send + Sync {
    async fn register_app(&self, app: &OidcApp) -> Result<OidcAppRegistryData>;

    async fn unregister_app(&self, app_id: &str) -> Result<()>;
}

/// Selects the [`AppRegisterer`] that talks to a specific [`AuthBackend`].
#[cfg_attr(test, automock)]
pub trait AppRegistererFactory: Send + Sync {
    fn get_app_registerer(&self, backend: &AuthBackend) -> Result<Arc<dyn AppRegisterer>>;
}
