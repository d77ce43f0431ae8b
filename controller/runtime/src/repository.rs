use anyhow::{bail, Context, Result};
use bilrost_controller_core::{
    AuthBackend, AuthBackendKind, AuthBackendRepository, DexBackend, KubernetesService,
    ServiceTranslator,
};
use bilrost_controller_k8s_api::{
    self as k8s, Deployment, Ingress, IngressAuth, IngressAuthRepository, IngressRepository,
    ResourceExt, Secret, SecretRepository, Service, WorkloadRepository,
};
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, DeleteParams, Patch, PatchParams, PostParams},
    Resource,
};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;

const FIELD_MANAGER: &str = "bilrost.slok.dev";

/// Reads and writes the controller's resources through the Kubernetes API.
#[derive(Clone)]
pub struct KubeRepository {
    client: kube::Client,
    cluster_domain: String,
}

// === impl KubeRepository ===

impl KubeRepository {
    pub fn new(client: kube::Client, cluster_domain: impl Into<String>) -> Self {
        Self {
            client,
            cluster_domain: cluster_domain.into(),
        }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Server-side applies the object, creating it if it does not exist.
    async fn apply<K>(&self, obj: &K) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + DeserializeOwned
            + Serialize,
    {
        let ns = obj.namespace().context("resource must be namespaced")?;
        let name = obj.name_any();
        let params = PatchParams::apply(FIELD_MANAGER).force();
        self.api::<K>(&ns)
            .patch(&name, &params, &Patch::Apply(obj))
            .await
            .with_context(|| format!("could not apply {} {ns}/{name}", K::kind(&())))?;
        tracing::debug!(kind = %K::kind(&()), namespace = %ns, %name, "Applied");
        Ok(())
    }

    /// Deletes the object. A missing object is not an error.
    async fn delete<K>(&self, namespace: &str, name: &str) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + DeserializeOwned,
    {
        match self
            .api::<K>(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => {
                tracing::debug!(kind = %K::kind(&()), %namespace, %name, "Deleted");
                Ok(())
            }
            Err(kube::Error::Api(rsp)) if rsp.code == 404 => Ok(()),
            Err(error) => {
                let obj = format!("{} {namespace}/{name}", K::kind(&()));
                Err(error).with_context(|| format!("could not delete {obj}"))
            }
        }
    }
}

#[async_trait::async_trait]
impl IngressRepository for KubeRepository {
    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Ingress> {
        self.api::<Ingress>(namespace)
            .get(name)
            .await
            .with_context(|| format!("could not get ingress {namespace}/{name}"))
    }

    async fn update_ingress(&self, ingress: &Ingress) -> Result<Ingress> {
        let ns = ingress.namespace().unwrap_or_default();
        let name = ingress.name_any();
        self.api::<Ingress>(&ns)
            .replace(&name, &PostParams::default(), ingress)
            .await
            .with_context(|| format!("could not update ingress {ns}/{name}"))
    }
}

#[async_trait::async_trait]
impl SecretRepository for KubeRepository {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        self.api::<Secret>(namespace)
            .get_opt(name)
            .await
            .with_context(|| format!("could not get secret {namespace}/{name}"))
    }

    async fn ensure_secret(&self, secret: &Secret) -> Result<()> {
        self.apply(secret).await
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete::<Secret>(namespace, name).await
    }
}

#[async_trait::async_trait]
impl WorkloadRepository for KubeRepository {
    async fn ensure_deployment(&self, deployment: &Deployment) -> Result<()> {
        self.apply(deployment).await
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete::<Deployment>(namespace, name).await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service> {
        self.api::<Service>(namespace)
            .get(name)
            .await
            .with_context(|| format!("could not get service {namespace}/{name}"))
    }

    async fn ensure_service(&self, service: &Service) -> Result<()> {
        self.apply(service).await
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete::<Service>(namespace, name).await
    }
}

#[async_trait::async_trait]
impl IngressAuthRepository for KubeRepository {
    async fn get_ingress_auth(&self, namespace: &str, name: &str) -> Result<Option<IngressAuth>> {
        self.api::<IngressAuth>(namespace)
            .get_opt(name)
            .await
            .with_context(|| format!("could not get ingress auth {namespace}/{name}"))
    }
}

#[async_trait::async_trait]
impl AuthBackendRepository for KubeRepository {
    async fn get_auth_backend(&self, id: &str) -> Result<AuthBackend> {
        let backend = Api::<k8s::AuthBackend>::all(self.client.clone())
            .get(id)
            .await
            .with_context(|| format!("could not get auth backend {id}"))?;
        Ok(to_auth_backend(backend))
    }
}

#[async_trait::async_trait]
impl ServiceTranslator for KubeRepository {
    async fn get_service_host_and_port(&self, svc: &KubernetesService) -> Result<(String, u16)> {
        let host = format!("{}.{}.svc.{}", svc.name, svc.namespace, self.cluster_domain);
        if let Ok(port) = svc.port_or_port_name.parse::<u16>() {
            return Ok((host, port));
        }

        let service = self.get_service(&svc.namespace, &svc.name).await?;
        Ok((host, named_port(&service, &svc.port_or_port_name)?))
    }
}

pub(crate) fn to_auth_backend(backend: k8s::AuthBackend) -> AuthBackend {
    let id = backend.name_any();
    let kind = backend.spec.dex.map(|dex| {
        AuthBackendKind::Dex(DexBackend {
            api_url: dex.api_address,
            public_url: dex.public_url,
        })
    });
    AuthBackend { id, kind }
}

fn named_port(service: &Service, name: &str) -> Result<u16> {
    let port = service
        .spec
        .iter()
        .flat_map(|spec| spec.ports.iter().flatten())
        .find(|p| p.name.as_deref() == Some(name));
    match port {
        Some(p) => u16::try_from(p.port).with_context(|| format!("invalid port {}", p.port)),
        None => bail!(
            "service {}/{} has no port named {name}",
            service.namespace().unwrap_or_default(),
            service.name_any()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bilrost_controller_k8s_api::{auth::DexSpec, AuthBackendSpec, ObjectMeta};
    use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};
    use pretty_assertions::assert_eq;

    #[test]
    fn finds_named_ports() {
        let service = Service {
            metadata: ObjectMeta {
                name: Some("internal-app".to_string()),
                namespace: Some("test-ns".to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(vec![
                    ServicePort {
                        name: Some("metrics".to_string()),
                        port: 9090,
                        ..Default::default()
                    },
                    ServicePort {
                        name: Some("http".to_string()),
                        port: 8080,
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert_eq!(named_port(&service, "http").unwrap(), 8080);
        let error = named_port(&service, "grpc").unwrap_err();
        assert_eq!(
            error.to_string(),
            "service test-ns/internal-app has no port named grpc"
        );
    }

    #[test]
    fn maps_auth_backends() {
        let mut backend = k8s::AuthBackend::new(
            "test-ns-dex-backend",
            AuthBackendSpec {
                dex: Some(DexSpec {
                    api_address: "dex-api.auth:5557".to_string(),
                    public_url: "https://test-dex.dev".to_string(),
                }),
            },
        );
        assert_eq!(
            to_auth_backend(backend.clone()),
            AuthBackend {
                id: "test-ns-dex-backend".to_string(),
                kind: Some(AuthBackendKind::Dex(DexBackend {
                    api_url: "dex-api.auth:5557".to_string(),
                    public_url: "https://test-dex.dev".to_string(),
                })),
            }
        );

        backend.spec.dex = None;
        assert_eq!(to_auth_backend(backend).kind, None);
    }
}
