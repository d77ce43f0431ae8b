use crate::api::{Client, DexApi};
use anyhow::{Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use bilrost_controller_core::{AppRegisterer, OidcApp, OidcAppRegistryData};
use bilrost_controller_k8s_api::{labels, ObjectMeta, Secret, SecretRepository};
use k8s_openapi::ByteString;
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub const CLIENT_SECRET_KEY: &str = "clientSecret";

const SECRET_PREFIX: &str = "bilrost-dex-cli";
const CLIENT_ID_ANNOTATION: &str = "bilrost.slok.dev/dex-client-id";

/// Registers apps on a single Dex instance.
///
/// Client secrets are kept in secrets in the controller's namespace, named after a hash of the
/// app ID, so they survive controller restarts and are reused on every registration.
#[derive(Clone)]
pub struct DexAppRegisterer {
    api: Arc<dyn DexApi>,
    secrets: Arc<dyn SecretRepository>,
    namespace: String,
    generate: fn() -> String,
}

/// Name of the secret holding the app's client secret.
pub fn secret_name(app_id: &str) -> String {
    let mut sum = format!("{:x}", Sha256::digest(app_id.as_bytes()));
    sum.truncate(32);
    format!("{SECRET_PREFIX}-{sum}")
}

/// 32 random bytes, base64url encoded.
fn generate_secret() -> String {
    URL_SAFE_NO_PAD.encode(rand::random::<[u8; 32]>())
}

// === impl DexAppRegisterer ===

impl DexAppRegisterer {
    pub fn new(
        api: Arc<dyn DexApi>,
        secrets: Arc<dyn SecretRepository>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            api,
            secrets,
            namespace: namespace.into(),
            generate: generate_secret,
        }
    }

    #[cfg(test)]
    fn with_generator(mut self, generate: fn() -> String) -> Self {
        self.generate = generate;
        self
    }

    async fn stored_secret(&self, name: &str) -> Result<Option<String>> {
        let secret = self
            .secrets
            .get_secret(&self.namespace, name)
            .await
            .context("could not get client secret")?;
        Ok(secret
            .and_then(|s| s.data)
            .and_then(|mut data| data.remove(CLIENT_SECRET_KEY))
            .map(|ByteString(v)| String::from_utf8_lossy(&v).into_owned())
            .filter(|v| !v.is_empty()))
    }

    fn secret(&self, app: &OidcApp, name: &str, client_secret: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels::standard(name, "bilrost", "dex-client-data")),
                annotations: Some(
                    Some((CLIENT_ID_ANNOTATION.to_string(), app.id.clone()))
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            },
            data: Some(
                Some((
                    CLIENT_SECRET_KEY.to_string(),
                    ByteString(client_secret.as_bytes().to_vec()),
                ))
                .into_iter()
                .collect(),
            ),
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl AppRegisterer for DexAppRegisterer {
    async fn register_app(&self, app: &OidcApp) -> Result<OidcAppRegistryData> {
        let name = secret_name(&app.id);
        let (client_secret, changed) = match self.stored_secret(&name).await? {
            Some(secret) => (secret, false),
            None => {
                let secret = (self.generate)();
                self.secrets
                    .ensure_secret(&self.secret(app, &name, &secret))
                    .await
                    .context("could not store client secret")?;
                (secret, true)
            }
        };

        // Dex keeps the secret of an existing client on create, so a new secret needs the old
        // client gone first.
        if changed {
            self.api
                .delete_client(&app.id)
                .await
                .context("could not delete Dex client")?;
        }

        let rsp = self
            .api
            .create_client(Client {
                id: app.id.clone(),
                name: app.name.clone(),
                secret: client_secret.clone(),
                redirect_uris: vec![app.callback_url.clone()],
                ..Default::default()
            })
            .await
            .context("could not create Dex client")?;
        if rsp.already_exists {
            tracing::debug!(app = %app.id, "Dex client already registered");
        } else {
            tracing::info!(app = %app.id, "Registered Dex client");
        }

        Ok(OidcAppRegistryData {
            client_id: app.id.clone(),
            client_secret,
        })
    }

    async fn unregister_app(&self, app_id: &str) -> Result<()> {
        let rsp = self
            .api
            .delete_client(app_id)
            .await
            .context("could not delete Dex client")?;
        if rsp.not_found {
            tracing::debug!(app = %app_id, "Dex client already deleted");
        }

        self.secrets
            .delete_secret(&self.namespace, &secret_name(app_id))
            .await
            .context("could not delete client secret")?;
        tracing::info!(app = %app_id, "Unregistered Dex client");
        Ok(())
    }
}
