use crate::{
    controller::{self, Context},
    core::{
        AppRegistererFactory, AuthBackendRepository, Backupper, OidcProvisioner, Security,
        SecurityService, ServiceTranslator,
    },
    dex::DexRegistererFactory,
    handler::Handler,
    metrics::Metrics,
    repository::KubeRepository,
};
use anyhow::{bail, Result};
use bilrost_controller_k8s_backup::IngressBackupper;
use bilrost_controller_k8s_proxy::Oauth2ProxyProvisioner;
use clap::Parser;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "bilrost-controller",
    about = "Secures ingresses with an OIDC authenticating proxy"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "bilrost=info,warn",
        env = "BILROST_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Namespace to watch for ingresses. All namespaces are watched when unset.
    #[clap(short = 'n', long, env = "BILROST_NAMESPACE_FILTER")]
    namespace_filter: Option<String>,

    /// Namespace the controller runs in, where OIDC client secrets are stored.
    #[clap(short = 'r', long, env = "BILROST_NAMESPACE_RUNNING")]
    namespace_running: String,

    /// Maximum number of ingresses reconciled concurrently.
    #[clap(short = 'w', long, default_value = "5")]
    workers: u16,

    #[clap(long, default_value = "180")]
    resync_interval_secs: u64,

    /// Number of times a failed reconciliation is retried before waiting for the next resync.
    #[clap(long, default_value = "2")]
    retries: u32,

    #[clap(long, default_value = "1000")]
    retry_backoff_ms: u64,

    #[clap(long, default_value = "cluster.local")]
    cluster_domain: String,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            namespace_filter,
            namespace_running,
            workers,
            resync_interval_secs,
            retries,
            retry_backoff_ms,
            cluster_domain,
        } = self;

        let mut prom = <Registry>::default();
        let metrics = Metrics::register(prom.sub_registry_with_prefix("bilrost"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let repo = Arc::new(KubeRepository::new(runtime.client(), cluster_domain));

        let backupper: Arc<dyn Backupper> = Arc::new(IngressBackupper::new(repo.clone()));
        let provisioner: Arc<dyn OidcProvisioner> =
            Arc::new(Oauth2ProxyProvisioner::new(repo.clone()));
        let registerers: Arc<dyn AppRegistererFactory> =
            Arc::new(DexRegistererFactory::new(repo.clone(), namespace_running));
        let security: Arc<dyn SecurityService> = Arc::new(Security::new(
            Arc::new(metrics.measure(backupper, "backupper", "ingress_annotation")),
            Arc::new(metrics.measure(provisioner, "oidc_provisioner", "oauth2_proxy")),
            repo.clone() as Arc<dyn AuthBackendRepository>,
            Arc::new(metrics.measure(registerers, "app_registerer", "dex")),
            repo.clone() as Arc<dyn ServiceTranslator>,
        ));
        let security = Arc::new(metrics.measure(security, "security_service", "default"));

        let handler = Handler::new(repo, security);
        let ctx = Arc::new(Context::new(
            handler,
            metrics,
            controller::Config {
                namespace: namespace_filter,
                workers,
                resync: Duration::from_secs(resync_interval_secs),
                retries,
                retry_backoff: Duration::from_millis(retry_backoff_ms),
            },
        ));

        tokio::spawn(
            controller::run(runtime.client(), ctx, runtime.shutdown_handle())
                .instrument(info_span!("ingresses")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background
        // tasks to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
