use k8s_openapi::{api::core::v1::ResourceRequirements, apimachinery::pkg::api::resource::Quantity};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An OIDC identity backend that ingresses can be secured with.
///
/// Ingresses reference it by name through the `auth.bilrost.slok.dev/backend` annotation.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(group = "auth.bilrost.slok.dev", version = "v1", kind = "AuthBackend")]
#[serde(rename_all = "camelCase")]
pub struct AuthBackendSpec {
    /// Only one backend type may be set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dex: Option<DexSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct DexSpec {
    /// Address of Dex's gRPC API, e.g. `dex-api.auth:5557`.
    #[serde(rename = "apiAddress")]
    pub api_address: String,
    /// Issuer URL users are redirected to.
    #[serde(rename = "publicURL")]
    pub public_url: String,
}

/// Per-ingress proxy settings, named like the ingress it configures.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "auth.bilrost.slok.dev",
    version = "v1",
    kind = "IngressAuth",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct IngressAuthSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_settings: Option<AuthSettings>,
    #[serde(
        default,
        rename = "oauth2Proxy",
        skip_serializing_if = "Option::is_none"
    )]
    pub oauth2_proxy: Option<Oauth2ProxySpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthSettings {
    #[serde(default)]
    pub scope_or_claims: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct Oauth2ProxySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
}

/// Compute resources, as quantity strings (`15m`, `20Mi`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct Resources {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

// === impl Resources ===

impl Resources {
    /// Returns `None` when neither requests nor limits are set.
    pub fn to_requirements(&self) -> Option<ResourceRequirements> {
        if self.requests.is_empty() && self.limits.is_empty() {
            return None;
        }

        fn quantities(m: &BTreeMap<String, String>) -> Option<BTreeMap<String, Quantity>> {
            if m.is_empty() {
                return None;
            }
            Some(
                m.iter()
                    .map(|(k, v)| (k.clone(), Quantity(v.clone())))
                    .collect(),
            )
        }

        Some(ResourceRequirements {
            requests: quantities(&self.requests),
            limits: quantities(&self.limits),
            ..Default::default()
        })
    }
}
