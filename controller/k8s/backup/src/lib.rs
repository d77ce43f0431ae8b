//! Stores the backup of a secured app in an annotation on the app's own ingress.
//!
//! The backup is written through the same optimistic-concurrency update as the ingress it
//! describes, so it lives exactly as long as the ingress and never needs to be collected.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use bilrost_controller_core::{App, BackupData, Backupper};
use bilrost_controller_k8s_api::{ingress::BACKUP_ANNOTATION, IngressRepository, ResourceExt};
use std::sync::Arc;

#[derive(Clone)]
pub struct IngressBackupper {
    repo: Arc<dyn IngressRepository>,
}

// === impl IngressBackupper ===

impl IngressBackupper {
    pub fn new(repo: Arc<dyn IngressRepository>) -> Self {
        Self { repo }
    }

    async fn read(&self, app: &App) -> Result<Option<BackupData>> {
        let ingress = self
            .repo
            .get_ingress(&app.ingress.namespace, &app.ingress.name)
            .await
            .context("could not get ingress")?;
        ingress
            .annotations()
            .get(BACKUP_ANNOTATION)
            .map(|raw| serde_json::from_str(raw).context("could not decode backup data"))
            .transpose()
    }
}

#[async_trait::async_trait]
impl Backupper for IngressBackupper {
    async fn backup_or_get(&self, app: &App, data: BackupData) -> Result<BackupData> {
        let mut ingress = self
            .repo
            .get_ingress(&app.ingress.namespace, &app.ingress.name)
            .await
            .context("could not get ingress")?;

        if let Some(raw) = ingress.annotations().get(BACKUP_ANNOTATION) {
            tracing::debug!(app = %app.id, "Backup already present");
            return serde_json::from_str(raw).context("could not decode backup data");
        }

        let raw = serde_json::to_string(&data).context("could not encode backup data")?;
        ingress
            .annotations_mut()
            .insert(BACKUP_ANNOTATION.to_string(), raw);
        self.repo
            .update_ingress(&ingress)
            .await
            .context("could not store backup on ingress")?;
        tracing::info!(app = %app.id, service = %data.service_name, "Stored backup");

        Ok(data)
    }

    async fn get_backup(&self, app: &App) -> Result<Option<BackupData>> {
        self.read(app).await
    }

    async fn delete_backup(&self, app: &App) -> Result<()> {
        let mut ingress = self
            .repo
            .get_ingress(&app.ingress.namespace, &app.ingress.name)
            .await
            .context("could not get ingress")?;
        let removed = ingress.annotations_mut().remove(BACKUP_ANNOTATION);
        if removed.is_none() {
            return Ok(());
        }

        self.repo
            .update_ingress(&ingress)
            .await
            .context("could not remove backup from ingress")?;
        tracing::info!(app = %app.id, "Deleted backup");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bilrost_controller_core::KubernetesIngress;
    use bilrost_controller_k8s_api::{test_util::InMemoryRepository, Ingress, ObjectMeta};
    use pretty_assertions::assert_eq;

    fn app() -> App {
        App {
            id: "test-ns/my-app".to_string(),
            ingress: KubernetesIngress {
                name: "my-app".to_string(),
                namespace: "test-ns".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn data(service: &str) -> BackupData {
        BackupData {
            auth_backend_id: "test-ns-dex-backend".to_string(),
            service_name: service.to_string(),
            service_port_or_name_port: "http".to_string(),
        }
    }

    fn repo() -> Arc<InMemoryRepository> {
        Arc::new(InMemoryRepository::default().with_ingress(Ingress {
            metadata: ObjectMeta {
                name: Some("my-app".to_string()),
                namespace: Some("test-ns".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }))
    }

    #[tokio::test]
    async fn backup_is_written_once() {
        let repo = repo();
        let backupper = IngressBackupper::new(repo.clone());

        let first = backupper
            .backup_or_get(&app(), data("internal-app"))
            .await
            .unwrap();
        let second = backupper
            .backup_or_get(&app(), data("my-app-bilrost-proxy"))
            .await
            .unwrap();

        assert_eq!(first, data("internal-app"));
        assert_eq!(second, data("internal-app"));
        assert_eq!(repo.writes().ingresses, 1);
        let stored = repo.ingress("test-ns", "my-app").unwrap();
        assert_eq!(
            stored.annotations()[BACKUP_ANNOTATION],
            r#"{"authBackendID":"test-ns-dex-backend","serviceName":"internal-app","servicePortOrNamePort":"http"}"#
        );
    }

    #[tokio::test]
    async fn get_missing_backup() {
        let backupper = IngressBackupper::new(repo());
        assert_eq!(backupper.get_backup(&app()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_backup() {
        let repo = repo();
        let backupper = IngressBackupper::new(repo.clone());
        backupper
            .backup_or_get(&app(), data("internal-app"))
            .await
            .unwrap();
        assert_eq!(
            backupper.get_backup(&app()).await.unwrap(),
            Some(data("internal-app"))
        );

        backupper.delete_backup(&app()).await.unwrap();
        assert_eq!(backupper.get_backup(&app()).await.unwrap(), None);
        assert_eq!(repo.writes().ingresses, 2);

        // Deleting again does not touch the ingress.
        backupper.delete_backup(&app()).await.unwrap();
        assert_eq!(repo.writes().ingresses, 2);
    }

    #[tokio::test]
    async fn missing_ingress_is_an_error() {
        let backupper = IngressBackupper::new(Arc::new(InMemoryRepository::default()));
        assert!(backupper.get_backup(&app()).await.is_err());
    }
}
