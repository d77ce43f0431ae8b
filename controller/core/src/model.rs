use k8s_openapi::api::core::v1::ResourceRequirements;

/// An application that wants to be secured.
///
/// An `App` is derived from its ingress on every reconciliation; it is never stored.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct App {
    /// Stable identifier, `<namespace>/<name>` of the ingress.
    pub id: String,
    pub auth_backend_id: String,
    /// Public hostname the ingress serves.
    pub host: String,
    pub ingress: KubernetesIngress,
    pub proxy_settings: ProxySettings,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KubernetesIngress {
    pub name: String,
    pub namespace: String,
    pub upstream: KubernetesService,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KubernetesService {
    pub name: String,
    pub namespace: String,
    /// Either a port number (`"8080"`) or a port name (`"http"`).
    pub port_or_port_name: String,
}

/// Optional proxy overrides. Unset values fall back to the provisioner's defaults.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProxySettings {
    pub scopes: Vec<String>,
    pub oauth2_proxy: Option<Oauth2ProxySettings>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Oauth2ProxySettings {
    pub image: Option<String>,
    pub replicas: Option<i32>,
    pub resources: Option<ResourceRequirements>,
}

/// An identity backend able to register OIDC clients.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthBackend {
    pub id: String,
    /// `None` when the backend declares no variant we know about.
    pub kind: Option<AuthBackendKind>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthBackendKind {
    Dex(DexBackend),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DexBackend {
    /// Address of Dex's gRPC API, reachable from the controller.
    pub api_url: String,
    /// Issuer URL exposed to browsers.
    pub public_url: String,
}

// === impl AuthBackend ===

impl AuthBackend {
    /// The issuer URL the proxy uses to discover the backend's OIDC configuration.
    pub fn public_url(&self) -> Option<&str> {
        match self.kind.as_ref()? {
            AuthBackendKind::Dex(dex) => Some(dex.public_url.as_str()),
        }
    }
}

// === impl App ===

impl App {
    /// The URL the identity backend redirects to once the user has authenticated.
    pub fn callback_url(&self) -> String {
        format!("https://{}/oauth2/callback", self.host)
    }

    pub fn public_url(&self) -> String {
        format!("https://{}", self.host)
    }
}
