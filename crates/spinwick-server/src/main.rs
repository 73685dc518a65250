use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use spinwick_cloud::HttpCloudClient;
use spinwick_core::EnvironmentKind;
use spinwick_cws::HttpCwsClient;
use spinwick_github::HttpGithubClient;
use spinwick_kube::{
    ClusterApi, KubeClusterClient, KubeError, WorkspaceDeployment, WorkspaceService,
};
use spinwick_registry::HttpRegistryClient;
use spinwick_server::config::{self, LogConfig};
use spinwick_server::bootstrap::HttpWorkspaceBootstrap;
use spinwick_server::builds::{Builds, MockedBuilds, RegistryBuilds};
use spinwick_server::env_cache::EnvVarCache;
use spinwick_server::notify::OperatorWebhookNotifier;
use spinwick_server::waiter::{PollingStateWaiter, StateWaiter, WebhookStateWaiter};
use spinwick_server::{LifecycleController, Server, WebhookChannelRegistry};
use tracing::info;
use tracing_subscriber::EnvFilter;

const ENV_BUILD_OVERRIDE: &str = "SPINWICK_BUILD_OVERRIDE";

#[derive(Debug, Parser)]
#[command(name = "spinwick-server", about = "SpinWick preview environment orchestrator")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = "config/spinwick.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = std::env::var(config::ENV_SPINWICK_CONFIG)
        .map(PathBuf::from)
        .unwrap_or(cli.config);
    let config = Arc::new(config::load_from_path(&config_path)?);

    init_logging(&config.log);
    info!(path = %config_path.display(), "loaded config");

    let github = Arc::new(HttpGithubClient::new(config.github_access_token.clone()));
    let cloud = Arc::new(HttpCloudClient::new(
        config.provisioner.server_url.clone(),
        config.provisioner.api_key.clone(),
    ));
    let cws = Arc::new(HttpCwsClient::new(
        config.customer_service.public_api_url.clone(),
        config.customer_service.internal_api_url.clone(),
        config.customer_service.api_key.clone(),
    ));

    let builds: Arc<dyn Builds> = match std::env::var(ENV_BUILD_OVERRIDE) {
        Ok(version) if !version.is_empty() => {
            info!("using mocked build tools");
            Arc::new(MockedBuilds::new(version))
        }
        _ => {
            let registry = HttpRegistryClient::new(
                config.registry.url.clone(),
                config.registry.username.clone(),
                config.registry.password.clone(),
            )
            .context("invalid docker registry configuration")?;
            Arc::new(RegistryBuilds::new(Arc::new(registry)))
        }
    };

    // The cluster client is only dialed when some repository actually
    // provisions into Kubernetes.
    let uses_kubernetes = config
        .repositories
        .environment_kinds
        .values()
        .any(|kind| *kind == EnvironmentKind::KubernetesNamespace);
    let cluster: Arc<dyn ClusterApi> = if uses_kubernetes {
        Arc::new(
            KubeClusterClient::connect()
                .await
                .context("unable to connect to the kubernetes cluster")?,
        )
    } else {
        Arc::new(UnconfiguredCluster)
    };

    let channels = Arc::new(WebhookChannelRegistry::new());
    let waiter: Arc<dyn StateWaiter> = if config.poll_installation_state {
        Arc::new(PollingStateWaiter::new(
            cloud.clone(),
            github.clone(),
            config.labels.clone(),
        ))
    } else {
        Arc::new(WebhookStateWaiter::new(
            Arc::clone(&channels),
            github.clone(),
            config.labels.clone(),
        ))
    };

    let env_cache = Arc::new(EnvVarCache::new());
    let comment_lock = Arc::new(tokio::sync::Mutex::new(()));
    let controller = Arc::new(LifecycleController {
        config: Arc::clone(&config),
        github: github.clone(),
        cloud: cloud.clone(),
        cws: cws.clone(),
        cluster,
        builds,
        waiter,
        notifier: Arc::new(OperatorWebhookNotifier::new(&config.notify)),
        bootstrap: Arc::new(HttpWorkspaceBootstrap::new()),
        env_cache: Arc::clone(&env_cache),
        comment_lock: Arc::clone(&comment_lock),
    });

    let server = Arc::new(Server {
        config: Arc::clone(&config),
        github,
        controller,
        channels,
        env_cache,
        comment_lock,
        start_time: Instant::now(),
    });

    let listener = tokio::net::TcpListener::bind(&config.listen_address)
        .await
        .with_context(|| format!("unable to bind {}", config.listen_address))?;
    info!(addr = %config.listen_address, "API server listening");

    axum::serve(listener, server.router())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

fn init_logging(log: &LogConfig) {
    let default_level = if log.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if log.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");
}

/// Placeholder cluster collaborator for deployments with no Kubernetes
/// environment kinds configured.
struct UnconfiguredCluster;

impl UnconfiguredCluster {
    fn error() -> KubeError {
        KubeError::Configuration(
            "no kubernetes cluster configured; assign a kubernetes-namespace environment kind to enable it"
                .to_owned(),
        )
    }
}

#[async_trait]
impl ClusterApi for UnconfiguredCluster {
    async fn namespace_exists(&self, _name: &str) -> Result<bool, KubeError> {
        Err(Self::error())
    }

    async fn ensure_namespace(&self, _name: &str) -> Result<(), KubeError> {
        Err(Self::error())
    }

    async fn delete_namespace(&self, _name: &str) -> Result<(), KubeError> {
        Err(Self::error())
    }

    async fn apply_deployment(
        &self,
        _namespace: &str,
        _deployment: &WorkspaceDeployment,
    ) -> Result<(), KubeError> {
        Err(Self::error())
    }

    async fn apply_service(
        &self,
        _namespace: &str,
        _service: &WorkspaceService,
    ) -> Result<(), KubeError> {
        Err(Self::error())
    }

    async fn set_deployment_image(
        &self,
        _namespace: &str,
        _name: &str,
        _image: &str,
    ) -> Result<(), KubeError> {
        Err(Self::error())
    }

    async fn load_balancer_ingress(
        &self,
        _namespace: &str,
        _service: &str,
    ) -> Result<Option<String>, KubeError> {
        Err(Self::error())
    }
}
