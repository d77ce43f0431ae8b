//! The cluster operations the controller's components are built on.

use crate::IngressAuth;
use anyhow::Result;
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{Secret, Service},
    networking::v1::Ingress,
};

#[async_trait::async_trait]
pub trait IngressRepository: Send + Sync {
    /// Reads the ingress from the API server, bypassing any cache.
    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Ingress>;

    /// Replaces the ingress. Fails on a resource version conflict.
    async fn update_ingress(&self, ingress: &Ingress) -> Result<Ingress>;
}

#[async_trait::async_trait]
pub trait SecretRepository: Send + Sync {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    /// Creates the secret, or replaces it when it already exists.
    async fn ensure_secret(&self, secret: &Secret) -> Result<()>;

    /// Deleting a missing secret succeeds.
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;
}

#[async_trait::async_trait]
pub trait WorkloadRepository: Send + Sync {
    async fn ensure_deployment(&self, deployment: &Deployment) -> Result<()>;

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service>;

    async fn ensure_service(&self, service: &Service) -> Result<()>;

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()>;
}

#[async_trait::async_trait]
pub trait IngressAuthRepository: Send + Sync {
    async fn get_ingress_auth(&self, namespace: &str, name: &str) -> Result<Option<IngressAuth>>;
}

/// Everything needed to provision a proxy in front of an ingress.
pub trait ProxyRepository: IngressRepository + SecretRepository + WorkloadRepository {}

impl<T> ProxyRepository for T where T: IngressRepository + SecretRepository + WorkloadRepository {}
