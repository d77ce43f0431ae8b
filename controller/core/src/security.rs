use crate::{
    authbackend::{AppRegistererFactory, OidcApp},
    backup::{BackupData, Backupper},
    model::{App, AuthBackend, KubernetesService},
    proxy::{OidcProvisioner, OidcProxySettings, UnprovisionSettings},
};
use anyhow::{Context, Result};
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

/// Looks up identity backends by ID.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait AuthBackendRepository: Send + Sync {
    async fn get_auth_backend(&self, id: &str) -> Result<AuthBackend>;
}

/// Translates a service reference into the host and port the proxy can reach it on.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait ServiceTranslator: Send + Sync {
    async fn get_service_host_and_port(&self, svc: &KubernetesService) -> Result<(String, u16)>;
}

/// Secures apps and rolls their security back.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait SecurityService: Send + Sync {
    async fn secure_app(&self, app: &App) -> Result<()>;

    async fn rollback_app_security(&self, app: &App) -> Result<()>;
}

/// A rollback was requested for an app that has no backup to restore from.
#[derive(Debug, thiserror::Error)]
#[error("app {app} has no backup to roll back from")]
pub struct MissingBackup {
    pub app: String,
}

/// Orchestrates the backup store, the identity backend registry and the proxy provisioner.
#[derive(Clone)]
pub struct Security {
    backupper: Arc<dyn Backupper>,
    provisioner: Arc<dyn OidcProvisioner>,
    backends: Arc<dyn AuthBackendRepository>,
    registerers: Arc<dyn AppRegistererFactory>,
    translator: Arc<dyn ServiceTranslator>,
}

// === impl Security ===

impl Security {
    pub fn new(
        backupper: Arc<dyn Backupper>,
        provisioner: Arc<dyn OidcProvisioner>,
        backends: Arc<dyn AuthBackendRepository>,
        registerers: Arc<dyn AppRegistererFactory>,
        translator: Arc<dyn ServiceTranslator>,
    ) -> Self {
        Self {
            backupper,
            provisioner,
            backends,
            registerers,
            translator,
        }
    }
}

#[async_trait::async_trait]
impl SecurityService for Security {
    #[tracing::instrument(skip_all, fields(app = %app.id))]
    async fn secure_app(&self, app: &App) -> Result<()> {
        let backend = self
            .backends
            .get_auth_backend(&app.auth_backend_id)
            .await
            .context("could not retrieve backend information")?;

        let registerer = self
            .registerers
            .get_app_registerer(&backend)
            .with_context(|| format!("could not get app registerer for backend {}", backend.id))?;
        let oidc_app = OidcApp {
            id: app.id.clone(),
            name: app.id.clone(),
            callback_url: app.callback_url(),
        };
        let credentials = registerer
            .register_app(&oidc_app)
            .await
            .context("could not register oauth application on backend")?;

        // Repeated reconciles must keep proxying to the original service, never to the proxy
        // that a previous run already swapped in.
        let current = BackupData {
            auth_backend_id: app.auth_backend_id.clone(),
            service_name: app.ingress.upstream.name.clone(),
            service_port_or_name_port: app.ingress.upstream.port_or_port_name.clone(),
        };
        let backup = self
            .backupper
            .backup_or_get(app, current)
            .await
            .context("could not backup or get backup data")?;
        let mut app = app.clone();
        app.ingress.upstream.name = backup.service_name;
        app.ingress.upstream.port_or_port_name = backup.service_port_or_name_port;

        let (host, port) = self
            .translator
            .get_service_host_and_port(&app.ingress.upstream)
            .await
            .context("could not translate ingress upstream service to host and port")?;

        let settings = OidcProxySettings {
            url: app.public_url(),
            upstream_url: format!("http://{host}:{port}"),
            issuer_url: backend.public_url().unwrap_or_default().to_string(),
            client_id: credentials.client_id,
            client_secret: credentials.client_secret,
            app,
        };
        self.provisioner
            .provision(&settings)
            .await
            .context("could not provision OIDC proxy")?;

        tracing::debug!("App secured");
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(app = %app.id))]
    async fn rollback_app_security(&self, app: &App) -> Result<()> {
        let backup = self
            .backupper
            .get_backup(app)
            .await
            .context("could not get backup data")?
            .ok_or_else(|| MissingBackup { app: app.id.clone() })?;

        // Traffic goes back to the original service before anything else is torn down.
        let settings = UnprovisionSettings {
            ingress_name: app.ingress.name.clone(),
            ingress_namespace: app.ingress.namespace.clone(),
            original_service_name: backup.service_name.clone(),
            original_service_port_or_name_port: backup.service_port_or_name_port.clone(),
        };
        self.provisioner
            .unprovision(&settings)
            .await
            .context("could not unprovision OIDC proxy")?;

        let backend = self
            .backends
            .get_auth_backend(&backup.auth_backend_id)
            .await
            .context("could not retrieve backend information")?;
        let registerer = self
            .registerers
            .get_app_registerer(&backend)
            .with_context(|| format!("could not get app registerer for backend {}", backend.id))?;
        registerer
            .unregister_app(&app.id)
            .await
            .context("could not unregister oauth application on backend")?;

        // The backup goes last so an interrupted rollback can always be run again.
        self.backupper
            .delete_backup(app)
            .await
            .context("could not delete backup")?;

        tracing::debug!("App security rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        authbackend::{AppRegisterer, MockAppRegisterer, MockAppRegistererFactory},
        backup::MockBackupper,
        model::{AuthBackendKind, DexBackend, KubernetesIngress},
        proxy::MockOidcProvisioner,
        OidcAppRegistryData,
    };
    use mockall::{predicate::eq, Sequence};

    fn test_app() -> App {
        App {
            id: "test-ns/my-app".to_string(),
            auth_backend_id: "test-ns-dex-backend".to_string(),
            host: "my.app.slok.dev".to_string(),
            ingress: KubernetesIngress {
                name: "my-app".to_string(),
                namespace: "test-ns".to_string(),
                upstream: KubernetesService {
                    name: "internal-app".to_string(),
                    namespace: "test-ns".to_string(),
                    port_or_port_name: "http".to_string(),
                },
            },
            ..Default::default()
        }
    }

    fn test_backend() -> AuthBackend {
        AuthBackend {
            id: "test-ns-dex-backend".to_string(),
            kind: Some(AuthBackendKind::Dex(DexBackend {
                api_url: "dex-api.auth:5557".to_string(),
                public_url: "https://test-dex.dev".to_string(),
            })),
        }
    }

    fn test_backup() -> BackupData {
        BackupData {
            auth_backend_id: "test-ns-dex-backend".to_string(),
            service_name: "internal-app".to_string(),
            service_port_or_name_port: "http".to_string(),
        }
    }

    #[derive(Default)]
    struct Mocks {
        backupper: MockBackupper,
        provisioner: MockOidcProvisioner,
        backends: MockAuthBackendRepository,
        registerers: MockAppRegistererFactory,
        translator: MockServiceTranslator,
    }

    impl Mocks {
        fn with_registerer(&mut self, registerer: MockAppRegisterer) {
            let registerer: Arc<dyn AppRegisterer> = Arc::new(registerer);
            self.registerers
                .expect_get_app_registerer()
                .with(eq(test_backend()))
                .returning(move |_| Ok(registerer.clone()));
        }

        fn build(self) -> Security {
            Security::new(
                Arc::new(self.backupper),
                Arc::new(self.provisioner),
                Arc::new(self.backends),
                Arc::new(self.registerers),
                Arc::new(self.translator),
            )
        }
    }

    #[tokio::test]
    async fn secure_registers_backs_up_and_provisions() {
        let mut mocks = Mocks::default();
        mocks
            .backends
            .expect_get_auth_backend()
            .withf(|id| id == "test-ns-dex-backend")
            .times(1)
            .returning(|_| Ok(test_backend()));

        let mut registerer = MockAppRegisterer::new();
        registerer
            .expect_register_app()
            .with(eq(OidcApp {
                id: "test-ns/my-app".to_string(),
                name: "test-ns/my-app".to_string(),
                callback_url: "https://my.app.slok.dev/oauth2/callback".to_string(),
            }))
            .times(1)
            .returning(|_| {
                Ok(OidcAppRegistryData {
                    client_id: "test-ns/my-app".to_string(),
                    client_secret: "s3cr3t".to_string(),
                })
            });
        mocks.with_registerer(registerer);

        mocks
            .backupper
            .expect_backup_or_get()
            .with(eq(test_app()), eq(test_backup()))
            .times(1)
            .returning(|_, data| Ok(data));

        mocks
            .translator
            .expect_get_service_host_and_port()
            .with(eq(test_app().ingress.upstream))
            .times(1)
            .returning(|_| Ok(("internal-app.test-ns.svc.cluster.local".to_string(), 8080)));

        mocks
            .provisioner
            .expect_provision()
            .with(eq(OidcProxySettings {
                url: "https://my.app.slok.dev".to_string(),
                upstream_url: "http://internal-app.test-ns.svc.cluster.local:8080".to_string(),
                issuer_url: "https://test-dex.dev".to_string(),
                client_id: "test-ns/my-app".to_string(),
                client_secret: "s3cr3t".to_string(),
                app: test_app(),
            }))
            .times(1)
            .returning(|_| Ok(()));

        mocks.build().secure_app(&test_app()).await.unwrap();
    }

    #[tokio::test]
    async fn secure_uses_the_previous_backup_upstream() {
        // The ingress already points at the proxy; the upstream must come from the backup.
        let mut app = test_app();
        app.ingress.upstream.name = "my-app-bilrost-proxy".to_string();

        let mut mocks = Mocks::default();
        mocks
            .backends
            .expect_get_auth_backend()
            .returning(|_| Ok(test_backend()));
        let mut registerer = MockAppRegisterer::new();
        registerer.expect_register_app().returning(|app| {
            Ok(OidcAppRegistryData {
                client_id: app.id.clone(),
                client_secret: "s3cr3t".to_string(),
            })
        });
        mocks.with_registerer(registerer);
        mocks
            .backupper
            .expect_backup_or_get()
            .returning(|_, _| Ok(test_backup()));
        mocks
            .translator
            .expect_get_service_host_and_port()
            .withf(|svc| svc.name == "internal-app" && svc.port_or_port_name == "http")
            .times(1)
            .returning(|svc| Ok((format!("{}.test-ns.svc.cluster.local", svc.name), 80)));
        mocks
            .provisioner
            .expect_provision()
            .withf(|settings| {
                settings.upstream_url == "http://internal-app.test-ns.svc.cluster.local:80"
                    && settings.app.ingress.upstream.name == "internal-app"
            })
            .times(1)
            .returning(|_| Ok(()));

        mocks.build().secure_app(&app).await.unwrap();
    }

    #[tokio::test]
    async fn secure_aborts_when_registration_fails() {
        let mut mocks = Mocks::default();
        mocks
            .backends
            .expect_get_auth_backend()
            .returning(|_| Ok(test_backend()));
        let mut registerer = MockAppRegisterer::new();
        registerer
            .expect_register_app()
            .returning(|_| Err(anyhow::anyhow!("dex unavailable")));
        mocks.with_registerer(registerer);
        mocks.backupper.expect_backup_or_get().never();
        mocks.provisioner.expect_provision().never();

        let error = mocks.build().secure_app(&test_app()).await.unwrap_err();
        assert!(error.to_string().contains("could not register"));
    }

    #[tokio::test]
    async fn rollback_restores_then_unregisters_then_deletes_backup() {
        let mut seq = Sequence::new();
        let mut mocks = Mocks::default();
        mocks
            .backupper
            .expect_get_backup()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Some(test_backup())));
        mocks
            .provisioner
            .expect_unprovision()
            .with(eq(UnprovisionSettings {
                ingress_name: "my-app".to_string(),
                ingress_namespace: "test-ns".to_string(),
                original_service_name: "internal-app".to_string(),
                original_service_port_or_name_port: "http".to_string(),
            }))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        mocks
            .backends
            .expect_get_auth_backend()
            .withf(|id| id == "test-ns-dex-backend")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(test_backend()));
        let mut registerer = MockAppRegisterer::new();
        registerer
            .expect_unregister_app()
            .withf(|id| id == "test-ns/my-app")
            .times(1)
            .returning(|_| Ok(()));
        mocks.with_registerer(registerer);
        mocks
            .backupper
            .expect_delete_backup()
            .with(eq(test_app()))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let security = mocks.build();
        security.rollback_app_security(&test_app()).await.unwrap();
    }

    #[tokio::test]
    async fn rollback_without_backup_is_an_inconsistency() {
        let mut mocks = Mocks::default();
        mocks.backupper.expect_get_backup().returning(|_| Ok(None));
        mocks.provisioner.expect_unprovision().never();
        mocks.backupper.expect_delete_backup().never();

        let error = mocks
            .build()
            .rollback_app_security(&test_app())
            .await
            .unwrap_err();
        assert!(error.downcast_ref::<MissingBackup>().is_some());
    }

    #[tokio::test]
    async fn rollback_keeps_backup_when_unregistering_fails() {
        let mut mocks = Mocks::default();
        mocks
            .backupper
            .expect_get_backup()
            .returning(|_| Ok(Some(test_backup())));
        mocks.provisioner.expect_unprovision().returning(|_| Ok(()));
        mocks
            .backends
            .expect_get_auth_backend()
            .returning(|_| Ok(test_backend()));
        let mut registerer = MockAppRegisterer::new();
        registerer
            .expect_unregister_app()
            .returning(|_| Err(anyhow::anyhow!("dex unavailable")));
        mocks.with_registerer(registerer);
        mocks.backupper.expect_delete_backup().never();

        assert!(mocks
            .build()
            .rollback_app_security(&test_app())
            .await
            .is_err());
    }
}
