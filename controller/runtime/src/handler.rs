//! Decides, for each ingress, whether to secure it, keep it secured or roll its security back.

use anyhow::{Context, Result};
use bilrost_controller_core::{
    App, KubernetesIngress, KubernetesService, Oauth2ProxySettings, ProxySettings, SecurityService,
};
use bilrost_controller_k8s_api::{
    ingress::{self, BACKEND_ANNOTATION, FINALIZER, HANDLED_ANNOTATION, HANDLED_VALUE},
    Ingress, IngressAuth, IngressAuthRepository, IngressRepository, ResourceExt,
};
use std::sync::Arc;

/// The ingress operations the handler needs.
pub trait HandlerRepository: IngressRepository + IngressAuthRepository {}

impl<T> HandlerRepository for T where T: IngressRepository + IngressAuthRepository {}

#[derive(Clone)]
pub struct Handler {
    repo: Arc<dyn HandlerRepository>,
    security: Arc<dyn SecurityService>,
}

/// What a reconciliation did.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The ingress never asked to be secured.
    Ignored,
    /// The ingress is being deleted and has already been cleaned up.
    Clean,
    /// The ingress was marked to be secured on the next reconciliation.
    MarkedReady,
    Secured,
    RolledBack,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct State {
    want_handle: bool,
    ready: bool,
    want_delete: bool,
    finalizer: bool,
}

// === impl Outcome ===

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ignored => "ignored",
            Self::Clean => "clean",
            Self::MarkedReady => "marked_ready",
            Self::Secured => "secured",
            Self::RolledBack => "rolled_back",
        }
    }
}

// === impl State ===

impl State {
    fn of(ing: &Ingress) -> Self {
        let annotations = ing.annotations();
        Self {
            want_handle: annotations
                .get(BACKEND_ANNOTATION)
                .is_some_and(|v| !v.is_empty()),
            ready: annotations.contains_key(HANDLED_ANNOTATION),
            want_delete: ing.metadata.deletion_timestamp.is_some(),
            finalizer: has_finalizer(ing),
        }
    }

    fn clean(&self) -> bool {
        self.want_delete && !self.finalizer
    }
}

fn has_finalizer(ing: &Ingress) -> bool {
    ing.finalizers().iter().any(|f| f == FINALIZER)
}

fn is_marked(ing: &Ingress) -> bool {
    let handled = ing.annotations().get(HANDLED_ANNOTATION);
    handled.is_some_and(|v| v == HANDLED_VALUE) && has_finalizer(ing)
}

fn is_unmarked(ing: &Ingress) -> bool {
    !ing.annotations().contains_key(HANDLED_ANNOTATION) && !has_finalizer(ing)
}

// === impl Handler ===

impl Handler {
    pub fn new(repo: Arc<dyn HandlerRepository>, security: Arc<dyn SecurityService>) -> Self {
        Self { repo, security }
    }

    pub async fn handle(&self, ing: &Ingress) -> Result<Outcome> {
        let state = State::of(ing);
        let ns = ing.namespace().unwrap_or_default();
        let name = ing.name_any();

        if !state.want_handle && !state.ready {
            return Ok(Outcome::Ignored);
        }

        ingress::validate(ing)?;

        if state.clean() {
            tracing::debug!("Already cleaned up");
            return Ok(Outcome::Clean);
        }

        if state.want_handle && !state.want_delete {
            if !state.ready {
                self.ensure_ready(&ns, &name).await?;
                tracing::info!("Marked ready to be secured");
                return Ok(Outcome::MarkedReady);
            }

            let app = self.app(ing).await?;
            self.security
                .secure_app(&app)
                .await
                .context("could not secure app")?;
            // Self-heals markers removed by someone else.
            self.ensure_ready(&ns, &name).await?;
            tracing::info!(app = %app.id, "Secured");
            return Ok(Outcome::Secured);
        }

        let app = self.app(ing).await?;
        self.security
            .rollback_app_security(&app)
            .await
            .context("could not rollback app security")?;
        self.ensure_clean(&ns, &name).await?;
        tracing::info!(app = %app.id, "Rolled back security");
        Ok(Outcome::RolledBack)
    }

    /// Adds the handled marker and the finalizer, unless both are already set.
    async fn ensure_ready(&self, ns: &str, name: &str) -> Result<()> {
        let mut ing = self.repo.get_ingress(ns, name).await?;
        if is_marked(&ing) {
            return Ok(());
        }

        ing.annotations_mut()
            .insert(HANDLED_ANNOTATION.to_string(), HANDLED_VALUE.to_string());
        if !has_finalizer(&ing) {
            ing.finalizers_mut().push(FINALIZER.to_string());
        }
        self.repo
            .update_ingress(&ing)
            .await
            .context("could not mark ingress as handled")?;
        Ok(())
    }

    /// Removes the handled marker and the finalizer in a single update.
    async fn ensure_clean(&self, ns: &str, name: &str) -> Result<()> {
        let mut ing = self.repo.get_ingress(ns, name).await?;
        if is_unmarked(&ing) {
            return Ok(());
        }

        ing.annotations_mut().remove(HANDLED_ANNOTATION);
        ing.finalizers_mut().retain(|f| f != FINALIZER);
        self.repo
            .update_ingress(&ing)
            .await
            .context("could not unmark ingress as handled")?;
        Ok(())
    }

    async fn app(&self, ing: &Ingress) -> Result<App> {
        let ns = ing.namespace().unwrap_or_default();
        let name = ing.name_any();
        let backend = ingress::service_backend(ing)?;

        let auth = self
            .repo
            .get_ingress_auth(&ns, &name)
            .await
            .context("could not get ingress proxy settings")?;

        Ok(App {
            id: format!("{ns}/{name}"),
            auth_backend_id: ing
                .annotations()
                .get(BACKEND_ANNOTATION)
                .cloned()
                .unwrap_or_default(),
            host: ingress::host(ing)?,
            ingress: KubernetesIngress {
                upstream: KubernetesService {
                    name: backend.name.clone(),
                    namespace: ns.clone(),
                    port_or_port_name: ingress::port_or_name(backend.port.as_ref()),
                },
                name,
                namespace: ns,
            },
            proxy_settings: auth.map(proxy_settings).unwrap_or_default(),
        })
    }
}

fn proxy_settings(auth: IngressAuth) -> ProxySettings {
    let spec = auth.spec;
    ProxySettings {
        scopes: spec
            .auth_settings
            .map(|s| s.scope_or_claims)
            .unwrap_or_default(),
        oauth2_proxy: spec.oauth2_proxy.map(|p| Oauth2ProxySettings {
            image: p.image.filter(|i| !i.is_empty()),
            replicas: p.replicas.filter(|r| *r > 0),
            resources: p.resources.and_then(|r| r.to_requirements()),
        }),
    }
}
