//! Runs the [`Handler`] for every ingress as cluster events arrive.

use crate::{
    handler::{Handler, Outcome},
    metrics::Metrics,
};
use bilrost_controller_core::MissingBackup;
use bilrost_controller_k8s_api::{
    labels::{self, SOURCE_LABEL},
    Deployment, Ingress, IngressAuth, InvalidIngress, ResourceExt, Secret, Service,
};
use futures::prelude::*;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::DynamicObject,
    runtime::{
        controller::{self, Action},
        reflector::ObjectRef,
        watcher, Controller,
    },
    Api, Resource,
};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tokio::time::Duration;
use tracing::{info_span, Instrument};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Handle(#[from] anyhow::Error),
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Watches a single namespace when set.
    pub namespace: Option<String>,
    pub workers: u16,
    pub resync: Duration,
    pub retries: u32,
    pub retry_backoff: Duration,
}

pub struct Context {
    handler: Handler,
    metrics: Metrics,
    config: Config,
    failures: Mutex<HashMap<ObjectRef<Ingress>, u32>>,
}

// === impl Error ===

impl Error {
    /// Errors that fail the same way until the ingress is changed.
    fn is_permanent(&self) -> bool {
        let Self::Handle(error) = self;
        error
            .chain()
            .any(|e| e.is::<InvalidIngress>() || e.is::<MissingBackup>())
    }
}

// === impl Context ===

impl Context {
    pub fn new(handler: Handler, metrics: Metrics, config: Config) -> Self {
        Self {
            handler,
            metrics,
            config,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Decides when a failed ingress is reconciled again: after a short backoff while retries
    /// remain, then at the next resync.
    fn retry(&self, obj: ObjectRef<Ingress>, error: &Error) -> Action {
        let mut failures = self.failures.lock();
        let attempts = failures.entry(obj.clone()).or_default();
        *attempts += 1;

        if error.is_permanent() || *attempts > self.config.retries {
            tracing::error!(ingress = %obj, attempts = *attempts, error = %format!("{error:#}"), "Failed to reconcile");
            failures.remove(&obj);
            return Action::requeue(self.config.resync);
        }

        tracing::warn!(ingress = %obj, attempt = *attempts, error = %format!("{error:#}"), "Retrying reconciliation");
        Action::requeue(self.config.retry_backoff)
    }

    /// Drops the retry state of an ingress that no longer exists.
    fn forget(&self, obj: &ObjectRef<DynamicObject>) {
        self.failures
            .lock()
            .retain(|o, _| o.name != obj.name || o.namespace != obj.namespace);
    }
}

pub async fn run(client: kube::Client, ctx: Arc<Context>, drain: kubert::shutdown::Watch) {
    let ns = ctx.config.namespace.clone();
    let workers = ctx.config.workers;

    let (close_tx, close_rx) = tokio::sync::oneshot::channel::<()>();
    let controller = Controller::new(api::<Ingress>(&client, &ns), watcher::Config::default())
        .with_config(controller::Config::default().concurrency(workers))
        .watches(
            api::<Deployment>(&client, &ns),
            watcher::Config::default().labels(SOURCE_LABEL),
            owner_of,
        )
        .watches(
            api::<Service>(&client, &ns),
            watcher::Config::default().labels(SOURCE_LABEL),
            owner_of,
        )
        .watches(
            api::<Secret>(&client, &ns),
            watcher::Config::default().labels(SOURCE_LABEL),
            owner_of,
        )
        .watches(
            api::<IngressAuth>(&client, &ns),
            watcher::Config::default(),
            configured_ingress,
        )
        .graceful_shutdown_on(async move {
            let _ = close_rx.await;
        })
        .run(reconcile, error_policy, ctx.clone())
        .for_each(move |res| {
            match res {
                Ok(_) => {}
                Err(controller::Error::ObjectNotFound(obj)) => {
                    tracing::debug!(ingress = %obj, "Ingress no longer exists");
                    ctx.forget(&obj);
                }
                Err(error) => tracing::debug!(%error, "Reconciliation failed"),
            }
            future::ready(())
        });
    tokio::pin!(controller);

    tracing::info!(namespace = ?ns, workers, "Ingress controller running");
    tokio::select! {
        _ = (&mut controller) => {}
        handle = drain.signaled() => {
            let _ = close_tx.send(());
            handle.release_after(controller).await;
        }
    }
}

async fn reconcile(ing: Arc<Ingress>, ctx: Arc<Context>) -> Result<Action, Error> {
    let obj = ObjectRef::from_obj(&*ing);
    let span = info_span!("reconcile", namespace = %ing.namespace().unwrap_or_default(), name = %ing.name_any());

    match ctx.handler.handle(&ing).instrument(span).await {
        Ok(outcome) => {
            ctx.failures.lock().remove(&obj);
            ctx.metrics.reconciled(outcome.as_str());
            // Deleted ingresses do not come back.
            if outcome == Outcome::Clean {
                return Ok(Action::await_change());
            }
            Ok(Action::requeue(ctx.config.resync))
        }
        Err(error) => {
            ctx.metrics.reconciled("error");
            Err(error.into())
        }
    }
}

fn error_policy(ing: Arc<Ingress>, error: &Error, ctx: Arc<Context>) -> Action {
    ctx.retry(ObjectRef::from_obj(&*ing), error)
}

fn api<K>(client: &kube::Client, namespace: &Option<String>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Maps a generated resource to the ingress it was generated for.
fn owner_of<K: Resource<DynamicType = ()>>(obj: K) -> Option<ObjectRef<Ingress>> {
    let value = obj.labels().get(SOURCE_LABEL)?;
    match labels::decode_source(value) {
        Ok((ns, name)) => Some(ObjectRef::new(&name).within(&ns)),
        Err(error) => {
            tracing::warn!(
                kind = %K::kind(&()),
                namespace = ?obj.namespace(),
                name = %obj.name_any(),
                %error,
                "Ignoring resource with invalid source label"
            );
            None
        }
    }
}

/// Proxy settings are named like the ingress they configure.
fn configured_ingress(auth: IngressAuth) -> Option<ObjectRef<Ingress>> {
    let ns = auth.namespace()?;
    Some(ObjectRef::new(&auth.name_any()).within(&ns))
}
