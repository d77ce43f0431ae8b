//! An in-memory cluster for testing components built on the repository traits.

use crate::{
    repo::{IngressAuthRepository, IngressRepository, SecretRepository, WorkloadRepository},
    IngressAuth,
};
use anyhow::{anyhow, Result};
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{Secret, Service},
    networking::v1::Ingress,
};
use kube::{Resource, ResourceExt};
use parking_lot::Mutex;
use std::collections::BTreeMap;

type Key = (String, String);

#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<State>,
}

/// Number of create/update/delete calls per resource kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Writes {
    pub ingresses: usize,
    pub secrets: usize,
    pub deployments: usize,
    pub services: usize,
}

#[derive(Default)]
struct State {
    ingresses: BTreeMap<Key, Ingress>,
    ingress_auths: BTreeMap<Key, IngressAuth>,
    secrets: BTreeMap<Key, Secret>,
    deployments: BTreeMap<Key, Deployment>,
    services: BTreeMap<Key, Service>,
    writes: Writes,
}

fn key<K: Resource>(obj: &K) -> Key {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

fn k(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

// === impl InMemoryRepository ===

impl InMemoryRepository {
    /// Stores an object without counting it as a write.
    pub fn with_ingress(self, ingress: Ingress) -> Self {
        self.state.lock().ingresses.insert(key(&ingress), ingress);
        self
    }

    pub fn with_ingress_auth(self, auth: IngressAuth) -> Self {
        self.state.lock().ingress_auths.insert(key(&auth), auth);
        self
    }

    pub fn with_secret(self, secret: Secret) -> Self {
        self.state.lock().secrets.insert(key(&secret), secret);
        self
    }

    pub fn with_service(self, service: Service) -> Self {
        self.state.lock().services.insert(key(&service), service);
        self
    }

    pub fn ingress(&self, namespace: &str, name: &str) -> Option<Ingress> {
        self.state
            .lock()
            .ingresses
            .get(&k(namespace, name))
            .cloned()
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.state.lock().secrets.get(&k(namespace, name)).cloned()
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.state
            .lock()
            .deployments
            .get(&k(namespace, name))
            .cloned()
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.state.lock().services.get(&k(namespace, name)).cloned()
    }

    pub fn writes(&self) -> Writes {
        self.state.lock().writes
    }
}

#[async_trait::async_trait]
impl IngressRepository for InMemoryRepository {
    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Ingress> {
        self.ingress(namespace, name)
            .ok_or_else(|| anyhow!("ingress {namespace}/{name} not found"))
    }

    async fn update_ingress(&self, ingress: &Ingress) -> Result<Ingress> {
        let mut state = self.state.lock();
        let key = key(ingress);
        if !state.ingresses.contains_key(&key) {
            return Err(anyhow!("ingress {}/{} not found", key.0, key.1));
        }
        state.writes.ingresses += 1;
        state.ingresses.insert(key, ingress.clone());
        Ok(ingress.clone())
    }
}

#[async_trait::async_trait]
impl SecretRepository for InMemoryRepository {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.secret(namespace, name))
    }

    async fn ensure_secret(&self, secret: &Secret) -> Result<()> {
        let mut state = self.state.lock();
        state.writes.secrets += 1;
        state.secrets.insert(key(secret), secret.clone());
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.writes.secrets += 1;
        state.secrets.remove(&k(namespace, name));
        Ok(())
    }
}

#[async_trait::async_trait]
impl WorkloadRepository for InMemoryRepository {
    async fn ensure_deployment(&self, deployment: &Deployment) -> Result<()> {
        let mut state = self.state.lock();
        state.writes.deployments += 1;
        state
            .deployments
            .insert(key(deployment), deployment.clone());
        Ok(())
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.writes.deployments += 1;
        state.deployments.remove(&k(namespace, name));
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service> {
        self.service(namespace, name)
            .ok_or_else(|| anyhow!("service {namespace}/{name} not found"))
    }

    async fn ensure_service(&self, service: &Service) -> Result<()> {
        let mut state = self.state.lock();
        state.writes.services += 1;
        state.services.insert(key(service), service.clone());
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.writes.services += 1;
        state.services.remove(&k(namespace, name));
        Ok(())
    }
}

#[async_trait::async_trait]
impl IngressAuthRepository for InMemoryRepository {
    async fn get_ingress_auth(&self, namespace: &str, name: &str) -> Result<Option<IngressAuth>> {
        Ok(self
            .state
            .lock()
            .ingress_auths
            .get(&k(namespace, name))
            .cloned())
    }
}
