use crate::model::App;
use anyhow::Result;

#[cfg(test)]
use mockall::automock;

/// Describes the OIDC proxy that secures an app.
#[derive(Clone, Debug, PartialEq)]
pub struct OidcProxySettings {
    /// Public URL of the app, e.g. `https://my.app.slok.dev`.
    pub url: String,
    /// URL of the app's original service, e.g. `http://internal-app.ns.svc.cluster.local:8080`.
    pub upstream_url: String,
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub app: App,
}

/// Describes how to restore an ingress once its proxy is removed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnprovisionSettings {
    pub ingress_name: String,
    pub ingress_namespace: String,
    pub original_service_name: String,
    pub original_service_port_or_name_port: String,
}

/// Provisions an OIDC proxy in front of an app and points the app's ingress at it.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait OidcProvisioner: Send + Sync {
    async fn provision(&self, settings: &OidcProxySettings) -> Result<()>;

    /// Points the ingress back at the original service and removes the proxy.
    async fn unprovision(&self, settings: &UnprovisionSettings) -> Result<()>;
}
