use anyhow::Result;
use bilrost_controller_core::{
    App, AppRegisterer, AppRegistererFactory, AuthBackend, BackupData, Backupper, OidcApp,
    OidcAppRegistryData, OidcProvisioner, OidcProxySettings, SecurityService, UnprovisionSettings,
};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::{Registry, Unit},
};
use std::{future::Future, sync::Arc};
use tokio::time;

#[derive(Clone, Debug)]
pub struct Metrics {
    operations: Family<OperationLabels, Histogram>,
    reconciles: Family<OutcomeLabels, Counter>,
}

/// Records the duration and result of every call through to `inner`.
pub struct Measured<T: ?Sized> {
    inner: Arc<T>,
    metrics: Metrics,
    component: &'static str,
    kind: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct OperationLabels {
    component: &'static str,
    kind: &'static str,
    operation: &'static str,
    success: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct OutcomeLabels {
    outcome: &'static str,
}

// === impl Metrics ===

impl Metrics {
    pub fn register(reg: &mut Registry) -> Self {
        let operations = Family::<OperationLabels, Histogram>::new_with_constructor(|| {
            Histogram::new([0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0])
        });
        reg.register_with_unit(
            "operation_duration",
            "Duration of the operations run to secure apps",
            Unit::Seconds,
            operations.clone(),
        );

        let reconciles = Family::<OutcomeLabels, Counter>::default();
        reg.register(
            "reconcile",
            "Total number of ingress reconciliations by outcome",
            reconciles.clone(),
        );

        Self {
            operations,
            reconciles,
        }
    }

    pub fn reconciled(&self, outcome: &'static str) {
        self.reconciles
            .get_or_create(&OutcomeLabels { outcome })
            .inc();
    }

    pub fn measure<T: ?Sized>(
        &self,
        inner: Arc<T>,
        component: &'static str,
        kind: &'static str,
    ) -> Measured<T> {
        Measured {
            inner,
            metrics: self.clone(),
            component,
            kind,
        }
    }
}

// === impl Measured ===

impl<T: ?Sized> Measured<T> {
    async fn observe<R>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<R>>,
    ) -> Result<R> {
        let start = time::Instant::now();
        let res = fut.await;
        let labels = OperationLabels {
            component: self.component,
            kind: self.kind,
            operation,
            success: if res.is_ok() { "true" } else { "false" },
        };
        self.metrics
            .operations
            .get_or_create(&labels)
            .observe(start.elapsed().as_secs_f64());
        res
    }
}

#[async_trait::async_trait]
impl Backupper for Measured<dyn Backupper> {
    async fn backup_or_get(&self, app: &App, data: BackupData) -> Result<BackupData> {
        self.observe("backup_or_get", self.inner.backup_or_get(app, data))
            .await
    }

    async fn get_backup(&self, app: &App) -> Result<Option<BackupData>> {
        self.observe("get_backup", self.inner.get_backup(app)).await
    }

    async fn delete_backup(&self, app: &App) -> Result<()> {
        self.observe("delete_backup", self.inner.delete_backup(app))
            .await
    }
}

#[async_trait::async_trait]
impl OidcProvisioner for Measured<dyn OidcProvisioner> {
    async fn provision(&self, settings: &OidcProxySettings) -> Result<()> {
        self.observe("provision", self.inner.provision(settings))
            .await
    }

    async fn unprovision(&self, settings: &UnprovisionSettings) -> Result<()> {
        self.observe("unprovision", self.inner.unprovision(settings))
            .await
    }
}

#[async_trait::async_trait]
impl AppRegisterer for Measured<dyn AppRegisterer> {
    async fn register_app(&self, app: &OidcApp) -> Result<OidcAppRegistryData> {
        self.observe("register_app", self.inner.register_app(app))
            .await
    }

    async fn unregister_app(&self, app_id: &str) -> Result<()> {
        self.observe("unregister_app", self.inner.unregister_app(app_id))
            .await
    }
}

impl AppRegistererFactory for Measured<dyn AppRegistererFactory> {
    fn get_app_registerer(&self, backend: &AuthBackend) -> Result<Arc<dyn AppRegisterer>> {
        let registerer = self.inner.get_app_registerer(backend)?;
        let measured: Arc<dyn AppRegisterer> =
            Arc::new(self.metrics.measure(registerer, self.component, self.kind));
        Ok(measured)
    }
}

#[async_trait::async_trait]
impl SecurityService for Measured<dyn SecurityService> {
    async fn secure_app(&self, app: &App) -> Result<()> {
        self.observe("secure_app", self.inner.secure_app(app)).await
    }

    async fn rollback_app_security(&self, app: &App) -> Result<()> {
        self.observe(
            "rollback_app_security",
            self.inner.rollback_app_security(app),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    struct NoIngress;

    #[async_trait::async_trait]
    impl Backupper for NoIngress {
        async fn backup_or_get(&self, _: &App, data: BackupData) -> Result<BackupData> {
            Ok(data)
        }

        async fn get_backup(&self, _: &App) -> Result<Option<BackupData>> {
            anyhow::bail!("no ingress")
        }

        async fn delete_backup(&self, _: &App) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn records_operations() {
        let mut prom = Registry::default();
        let metrics = Metrics::register(prom.sub_registry_with_prefix("bilrost"));
        let inner: Arc<dyn Backupper> = Arc::new(NoIngress);
        let backupper = metrics.measure(inner, "backupper", "ingress_annotation");

        backupper
            .backup_or_get(&App::default(), BackupData::default())
            .await
            .unwrap();
        assert!(backupper.get_backup(&App::default()).await.is_err());
        metrics.reconciled("secured");

        let mut text = String::new();
        encode(&mut text, &prom).unwrap();
        assert!(text.contains(
            r#"bilrost_operation_duration_seconds_count{component="backupper",kind="ingress_annotation",operation="backup_or_get",success="true"} 1"#
        ));
        assert!(text.contains(
            r#"bilrost_operation_duration_seconds_count{component="backupper",kind="ingress_annotation",operation="get_backup",success="false"} 1"#
        ));
        assert!(text.contains(r#"bilrost_reconcile_total{outcome="secured"} 1"#));
    }
}
