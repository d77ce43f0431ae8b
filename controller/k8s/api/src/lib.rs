#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod ingress;
pub mod labels;
pub mod repo;
#[cfg(feature = "test-util")]
pub mod test_util;

pub use self::{
    auth::{AuthBackend, AuthBackendSpec, DexSpec, IngressAuth, IngressAuthSpec},
    ingress::InvalidIngress,
    labels::DecodeSourceError,
    repo::{
        IngressAuthRepository, IngressRepository, ProxyRepository, SecretRepository,
        WorkloadRepository,
    },
};
pub use k8s_openapi::{
    api::{
        apps::v1::Deployment,
        core::v1::{ResourceRequirements, Secret, Service},
        networking::v1::Ingress,
    },
    apimachinery::pkg::api::resource::Quantity,
};
pub use kube::api::{ObjectMeta, ResourceExt};
