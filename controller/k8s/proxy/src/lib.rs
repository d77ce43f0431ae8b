//! Provisions oauth2-proxy in front of an ingress' upstream.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod resources;

pub use self::resources::{base_name, CHECKSUM_LABEL, DEFAULT_IMAGE, DEFAULT_SCOPES};

use anyhow::{Context, Result};
use bilrost_controller_core::{OidcProvisioner, OidcProxySettings, UnprovisionSettings};
use bilrost_controller_k8s_api::{ingress, ProxyRepository};
use k8s_openapi::api::networking::v1::IngressServiceBackend;
use std::sync::Arc;

#[derive(Clone)]
pub struct Oauth2ProxyProvisioner {
    repo: Arc<dyn ProxyRepository>,
}

// === impl Oauth2ProxyProvisioner ===

impl Oauth2ProxyProvisioner {
    pub fn new(repo: Arc<dyn ProxyRepository>) -> Self {
        Self { repo }
    }

    /// Points the ingress at `backend`, unless it already points there.
    async fn swap_backend(
        &self,
        namespace: &str,
        name: &str,
        backend: IngressServiceBackend,
    ) -> Result<()> {
        let mut ing = self
            .repo
            .get_ingress(namespace, name)
            .await
            .context("could not get ingress")?;

        let current = ingress::service_backend(&ing)?;
        if current.name == backend.name
            && ingress::port_or_name(current.port.as_ref())
                == ingress::port_or_name(backend.port.as_ref())
        {
            tracing::debug!(%namespace, %name, service = %backend.name, "Ingress backend up to date");
            return Ok(());
        }

        let service = backend.name.clone();
        ingress::set_service_backend(&mut ing, backend)?;
        self.repo
            .update_ingress(&ing)
            .await
            .context("could not update ingress backend")?;
        tracing::info!(%namespace, %name, %service, "Swapped ingress backend");
        Ok(())
    }
}

#[async_trait::async_trait]
impl OidcProvisioner for Oauth2ProxyProvisioner {
    async fn provision(&self, settings: &OidcProxySettings) -> Result<()> {
        let target = &settings.app.ingress;
        let res = resources::build(settings);

        self.repo
            .ensure_secret(&res.secret)
            .await
            .context("could not ensure proxy secret")?;
        self.repo
            .ensure_deployment(&res.deployment)
            .await
            .context("could not ensure proxy deployment")?;
        self.repo
            .ensure_service(&res.service)
            .await
            .context("could not ensure proxy service")?;

        let name = base_name(&target.name);
        self.swap_backend(
            &target.namespace,
            &target.name,
            ingress::service_backend_for(&name, resources::PORT_NAME),
        )
        .await
    }

    async fn unprovision(&self, settings: &UnprovisionSettings) -> Result<()> {
        let ns = &settings.ingress_namespace;
        self.swap_backend(
            ns,
            &settings.ingress_name,
            ingress::service_backend_for(
                &settings.original_service_name,
                &settings.original_service_port_or_name_port,
            ),
        )
        .await?;

        let name = base_name(&settings.ingress_name);
        self.repo
            .delete_service(ns, &name)
            .await
            .context("could not delete proxy service")?;
        self.repo
            .delete_deployment(ns, &name)
            .await
            .context("could not delete proxy deployment")?;
        self.repo
            .delete_secret(ns, &name)
            .await
            .context("could not delete proxy secret")?;
        tracing::info!(namespace = %ns, %name, "Removed proxy");
        Ok(())
    }
}
