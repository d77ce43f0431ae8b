use crate::{
    api::{DexApi, GrpcDexApi},
    DexAppRegisterer,
};
use anyhow::{bail, Result};
use bilrost_controller_core::{AppRegisterer, AppRegistererFactory, AuthBackend, AuthBackendKind};
use bilrost_controller_k8s_api::SecretRepository;
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};

type Connect = dyn Fn(&str) -> Result<Arc<dyn DexApi>> + Send + Sync;

/// Hands out one registerer per Dex API address, created on first use and kept for the life of
/// the process.
pub struct DexRegistererFactory {
    secrets: Arc<dyn SecretRepository>,
    namespace: String,
    connect: Box<Connect>,
    pool: Mutex<HashMap<String, Arc<dyn AppRegisterer>>>,
}

// === impl DexRegistererFactory ===

impl DexRegistererFactory {
    pub fn new(secrets: Arc<dyn SecretRepository>, namespace: impl Into<String>) -> Self {
        Self::with_connector(secrets, namespace, |addr| {
            let api: Arc<dyn DexApi> = Arc::new(GrpcDexApi::connect_lazy(addr)?);
            Ok(api)
        })
    }

    pub fn with_connector(
        secrets: Arc<dyn SecretRepository>,
        namespace: impl Into<String>,
        connect: impl Fn(&str) -> Result<Arc<dyn DexApi>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            secrets,
            namespace: namespace.into(),
            connect: Box::new(connect),
            pool: Mutex::new(HashMap::new()),
        }
    }
}

impl AppRegistererFactory for DexRegistererFactory {
    fn get_app_registerer(&self, backend: &AuthBackend) -> Result<Arc<dyn AppRegisterer>> {
        let dex = match backend.kind.as_ref() {
            Some(AuthBackendKind::Dex(dex)) => dex,
            None => bail!("unknown auth backend type for {}", backend.id),
        };

        let key = format!("dex-{}", dex.api_url);
        let mut pool = self.pool.lock();
        if let Some(registerer) = pool.get(&key) {
            return Ok(registerer.clone());
        }

        tracing::debug!(backend = %backend.id, addr = %dex.api_url, "Connecting to Dex");
        let api = (self.connect)(&dex.api_url)?;
        let registerer: Arc<dyn AppRegisterer> =
            Arc::new(DexAppRegisterer::new(api, self.secrets.clone(), self.namespace.clone()));
        pool.insert(key, registerer.clone());
        Ok(registerer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockDexApi;
    use bilrost_controller_core::DexBackend;
    use bilrost_controller_k8s_api::test_util::InMemoryRepository;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dex(id: &str, api_url: &str) -> AuthBackend {
        AuthBackend {
            id: id.to_string(),
            kind: Some(AuthBackendKind::Dex(DexBackend {
                api_url: api_url.to_string(),
                public_url: "https://test-dex.dev".to_string(),
            })),
        }
    }

    fn factory(connects: Arc<AtomicUsize>) -> DexRegistererFactory {
        DexRegistererFactory::with_connector(
            Arc::new(InMemoryRepository::default()),
            "bilrost",
            move |_| {
                connects.fetch_add(1, Ordering::SeqCst);
                let api: Arc<dyn DexApi> = Arc::new(MockDexApi::new());
                Ok(api)
            },
        )
    }

    #[test]
    fn pools_registerers_by_address() {
        let connects = Arc::new(AtomicUsize::new(0));
        let factory = factory(connects.clone());

        let a = factory.get_app_registerer(&dex("a", "dex-a:5557")).unwrap();
        let b = factory.get_app_registerer(&dex("b", "dex-a:5557")).unwrap();
        let c = factory.get_app_registerer(&dex("c", "dex-c:5557")).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(connects.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn rejects_unknown_backend_types() {
        let factory = factory(Arc::new(AtomicUsize::new(0)));
        let error = factory
            .get_app_registerer(&AuthBackend {
                id: "unknown".to_string(),
                kind: None,
            })
            .err()
            .unwrap();
        assert!(error.to_string().contains("unknown auth backend type"));
    }
}
