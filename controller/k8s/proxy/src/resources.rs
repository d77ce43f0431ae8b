//! Builds the secret, deployment and service that run oauth2-proxy for an app.

use bilrost_controller_core::OidcProxySettings;
use bilrost_controller_k8s_api::{labels, ObjectMeta, Quantity, ResourceRequirements};
use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{
            Container, ContainerPort, EnvFromSource, PodSpec, PodTemplateSpec, Secret,
            SecretEnvSource, Service, ServicePort, ServiceSpec,
        },
    },
    apimachinery::pkg::{apis::meta::v1::LabelSelector, util::intstr::IntOrString},
    ByteString,
};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const DEFAULT_IMAGE: &str = "quay.io/oauth2-proxy/oauth2-proxy:v5.1.0";
pub const DEFAULT_SCOPES: [&str; 5] = ["openid", "email", "profile", "groups", "offline_access"];
pub const DEFAULT_REPLICAS: i32 = 1;

pub const PORT_NAME: &str = "http";
pub const CONTAINER_PORT: i32 = 4180;
pub const SERVICE_PORT: i32 = 80;

pub const CLIENT_ID_KEY: &str = "OIDC_CLIENT_ID";
pub const CLIENT_SECRET_KEY: &str = "OIDC_CLIENT_SECRET";
pub const COOKIE_SECRET_KEY: &str = "OIDC_COOKIE_SECRET";

/// Forces a rollout of the proxy pods when their credentials change.
pub const CHECKSUM_LABEL: &str = "bilrost.slok.dev/secret-checksum-to-force-update";

const NAME_SUFFIX: &str = "bilrost-proxy";
const CONTAINER_NAME: &str = "app";

// oauth2-proxy accepts cookie secrets of 16, 24 or 32 bytes.
const COOKIE_SECRET_LEN: usize = 32;

/// Name of every resource generated for the ingress.
pub fn base_name(ingress: &str) -> String {
    format!("{ingress}-{NAME_SUFFIX}")
}

pub(crate) struct Resources {
    pub secret: Secret,
    pub deployment: Deployment,
    pub service: Service,
}

pub(crate) fn build(settings: &OidcProxySettings) -> Resources {
    let ingress = &settings.app.ingress;
    let name = base_name(&ingress.name);
    let labels = labels::proxy_labels(&name, &ingress.namespace, &ingress.name);
    let meta = ObjectMeta {
        name: Some(name.clone()),
        namespace: Some(ingress.namespace.clone()),
        labels: Some(labels.clone()),
        ..Default::default()
    };

    let secret = secret(settings, meta.clone());
    let deployment = deployment(settings, meta.clone(), &labels, checksum(&secret));
    let service = service(meta, labels);
    Resources {
        secret,
        deployment,
        service,
    }
}

/// Derives a cookie secret of a fixed length, whatever the client secret's length.
fn cookie_secret(client_secret: &str) -> String {
    let mut sum = format!("{:x}", Sha256::digest(client_secret.as_bytes()));
    sum.truncate(COOKIE_SECRET_LEN);
    sum
}

fn secret(settings: &OidcProxySettings, metadata: ObjectMeta) -> Secret {
    let cookie_secret = cookie_secret(&settings.client_secret);
    let data = [
        (CLIENT_ID_KEY, settings.client_id.as_str()),
        (CLIENT_SECRET_KEY, settings.client_secret.as_str()),
        (COOKIE_SECRET_KEY, cookie_secret.as_str()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
    .collect();

    Secret {
        metadata,
        data: Some(data),
        ..Default::default()
    }
}

/// A stable digest of the secret's data, short enough to be a label value.
pub(crate) fn checksum(secret: &Secret) -> String {
    let mut hasher = Sha256::new();
    for (k, v) in secret.data.iter().flatten() {
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(&v.0);
        hasher.update(b"\n");
    }
    let mut sum = format!("{:x}", hasher.finalize());
    sum.truncate(32);
    sum
}

fn deployment(
    settings: &OidcProxySettings,
    metadata: ObjectMeta,
    labels: &labels::Map,
    checksum: String,
) -> Deployment {
    let proxy = settings.app.proxy_settings.oauth2_proxy.as_ref();
    let image = proxy
        .and_then(|p| p.image.clone())
        .filter(|i| !i.is_empty())
        .unwrap_or_else(|| DEFAULT_IMAGE.to_string());
    let replicas = proxy
        .and_then(|p| p.replicas)
        .filter(|r| *r > 0)
        .unwrap_or(DEFAULT_REPLICAS);
    let resources = proxy
        .and_then(|p| p.resources.clone())
        .unwrap_or_else(default_resources);

    let mut pod_labels = labels.clone();
    pod_labels.insert(CHECKSUM_LABEL.to_string(), checksum);

    let name = metadata.name.clone().unwrap_or_default();
    Deployment {
        metadata,
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: CONTAINER_NAME.to_string(),
                        image: Some(image),
                        args: Some(args(settings)),
                        ports: Some(vec![ContainerPort {
                            name: Some(PORT_NAME.to_string()),
                            container_port: CONTAINER_PORT,
                            protocol: Some("TCP".to_string()),
                            ..Default::default()
                        }]),
                        env_from: Some(vec![EnvFromSource {
                            secret_ref: Some(SecretEnvSource {
                                name,
                                optional: None,
                            }),
                            ..Default::default()
                        }]),
                        resources: Some(resources),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn args(settings: &OidcProxySettings) -> Vec<String> {
    let scopes = &settings.app.proxy_settings.scopes;
    let scopes = if scopes.is_empty() {
        DEFAULT_SCOPES.join(" ")
    } else {
        scopes.join(" ")
    };

    vec![
        format!("--oidc-issuer-url={}", settings.issuer_url),
        format!("--client-id=$({CLIENT_ID_KEY})"),
        format!("--client-secret=$({CLIENT_SECRET_KEY})"),
        format!("--http-address=0.0.0.0:{CONTAINER_PORT}"),
        format!("--redirect-url={}/oauth2/callback", settings.url),
        format!("--upstream={}", settings.upstream_url),
        format!("--scope={scopes}"),
        format!("--cookie-secret=$({COOKIE_SECRET_KEY})"),
        "--cookie-secure=false".to_string(),
        "--provider=oidc".to_string(),
        "--skip-provider-button".to_string(),
        "--email-domain=*".to_string(),
    ]
}

fn default_resources() -> ResourceRequirements {
    let requests: BTreeMap<String, Quantity> = [("cpu", "15m"), ("memory", "20Mi")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
        .collect();
    ResourceRequirements {
        requests: Some(requests),
        ..Default::default()
    }
}

fn service(metadata: ObjectMeta, selector: labels::Map) -> Service {
    Service {
        metadata,
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(selector),
            ports: Some(vec![ServicePort {
                name: Some(PORT_NAME.to_string()),
                port: SERVICE_PORT,
                target_port: Some(IntOrString::String(PORT_NAME.to_string())),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
