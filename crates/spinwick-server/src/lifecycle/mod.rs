mod cloud;
mod cws;
mod kube;

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use spinwick_cloud::CloudApi;
use spinwick_core::{EnvironmentKind, LifecycleRequest, PullRequest, Spinwick, SpinwickKind};
use spinwick_cws::CwsApi;
use spinwick_github::{GithubApi, IssueComment};
use spinwick_kube::ClusterApi;
use tracing::{error, info, warn};

use crate::bootstrap::WorkspaceBootstrap;
use crate::builds::Builds;
use crate::comments;
use crate::config::SpinwickConfig;
use crate::env_cache::EnvVarCache;
use crate::notify::Notifier;
use crate::waiter::{StateWaiter, WaitStateError};

pub(crate) const CREATE_STABLE_WAIT: Duration = Duration::from_secs(1200);
pub(crate) const UPDATE_STABLE_WAIT: Duration = Duration::from_secs(600);
pub(crate) const DELETE_WAIT: Duration = Duration::from_secs(900);
pub(crate) const IMAGE_WAIT: Duration = Duration::from_secs(45 * 60);
pub(crate) const FALLBACK_IMAGE_WAIT: Duration = Duration::from_secs(30 * 60);
pub(crate) const UPDATE_BUILD_GRACE: Duration = Duration::from_secs(60);

/// Orchestrates the end-to-end create/update/destroy workflows. One
/// invocation owns one [`LifecycleRequest`] accumulator; the environment
/// kind is resolved once per event and dispatched through a single match.
pub struct LifecycleController {
    pub config: Arc<SpinwickConfig>,
    pub github: Arc<dyn GithubApi>,
    pub cloud: Arc<dyn CloudApi>,
    pub cws: Arc<dyn CwsApi>,
    pub cluster: Arc<dyn ClusterApi>,
    pub builds: Arc<dyn Builds>,
    pub waiter: Arc<dyn StateWaiter>,
    pub notifier: Arc<dyn Notifier>,
    pub bootstrap: Arc<dyn WorkspaceBootstrap>,
    pub env_cache: Arc<EnvVarCache>,
    pub comment_lock: Arc<tokio::sync::Mutex<()>>,
}

impl LifecycleController {
    pub async fn handle_create(&self, pr: &PullRequest, kind: SpinwickKind) {
        info!(repo = %pr.repo_name, pr = pr.number, ?kind, "handling SpinWick creation");

        if pr.is_closed() {
            info!(repo = %pr.repo_name, pr = pr.number, "PR is closed/merged, will not create a test server");
            self.send_comment(pr, "PR is closed/merged, not creating a SpinWick test server")
                .await;
            return;
        }

        let environment = self.config.environment_kind(&pr.repo_name, kind);
        let request = match environment {
            EnvironmentKind::KubernetesNamespace => {
                self.send_comment(pr, "Creating a SpinWick customer-service test server")
                    .await;
                self.create_kube(pr).await
            }
            EnvironmentKind::CustomerServiceCloud => {
                self.send_comment(
                    pr,
                    "Creating a new SpinWick test cloud server with customer service",
                )
                .await;
                self.create_cws_cloud(pr).await
            }
            EnvironmentKind::PlainCloud => {
                let message = if kind.with_license() {
                    "Creating a new HA SpinWick test server"
                } else {
                    "Creating a new SpinWick test server"
                };
                self.send_comment(pr, message).await;
                self.create_cloud(pr, kind).await
            }
        };

        self.finish_create(pr, request).await;
    }

    pub async fn handle_update(&self, pr: &PullRequest, kind: SpinwickKind) {
        info!(repo = %pr.repo_name, pr = pr.number, ?kind, "handling SpinWick update");

        let environment = self.config.environment_kind(&pr.repo_name, kind);
        let request = match environment {
            EnvironmentKind::KubernetesNamespace => self.update_kube(pr).await,
            EnvironmentKind::CustomerServiceCloud | EnvironmentKind::PlainCloud => {
                self.update_cloud(pr, kind).await
            }
        };

        if let Some(failure) = &request.error {
            if request.aborted {
                warn!(installation_id = %request.installation_id, error = %format!("{failure:#}"), "aborted update of SpinWick");
            } else {
                error!(installation_id = %request.installation_id, error = %format!("{failure:#}"), "failed to update SpinWick");
                self.send_comment(pr, &self.config.messages.setup_failed).await;
            }
            if request.report_error {
                self.notifier
                    .report_failure(
                        "[ SpinWick ] Update Failed",
                        pr,
                        failure,
                        &[("Installation ID".to_owned(), request.installation_id.clone())],
                    )
                    .await;
            }
        }
    }

    pub async fn handle_destroy(&self, pr: &PullRequest, kind: SpinwickKind) {
        info!(repo = %pr.repo_name, pr = pr.number, ?kind, "handling SpinWick destruction");

        let environment = self.config.environment_kind(&pr.repo_name, kind);
        let request = match environment {
            EnvironmentKind::KubernetesNamespace => self.destroy_kube(pr).await,
            EnvironmentKind::CustomerServiceCloud => self.destroy_cws_cloud(pr).await,
            EnvironmentKind::PlainCloud => self.destroy_cloud(pr).await,
        };

        if let Some(failure) = &request.error {
            if request.aborted {
                warn!(installation_id = %request.installation_id, error = %format!("{failure:#}"), "aborted deletion of SpinWick");
            } else {
                error!(installation_id = %request.installation_id, error = %format!("{failure:#}"), "failed to delete SpinWick");
            }
            if request.report_error {
                self.notifier
                    .report_failure(
                        "[ SpinWick ] Destroy Failed",
                        pr,
                        failure,
                        &[("Installation ID".to_owned(), request.installation_id.clone())],
                    )
                    .await;
            }
        }
    }

    async fn finish_create(&self, pr: &PullRequest, request: LifecycleRequest) {
        let Some(failure) = &request.error else {
            return;
        };

        if request.aborted {
            warn!(installation_id = %request.installation_id, error = %format!("{failure:#}"), "aborted creation of SpinWick");
            return;
        }
        error!(installation_id = %request.installation_id, error = %format!("{failure:#}"), "failed to create SpinWick");

        match self
            .github
            .list_comments(&pr.repo_owner, &pr.repo_name, pr.number)
            .await
        {
            Ok(comments) => self.remove_stale_comments(pr, &comments).await,
            Err(err) => error!(error = %err, "error getting comments"),
        }
        self.strip_spinwick_labels(pr).await;
        self.send_comment(pr, &self.config.messages.setup_failed).await;

        if request.report_error {
            self.notifier
                .report_failure(
                    "[ SpinWick ] Creation Failed",
                    pr,
                    failure,
                    &[("Installation ID".to_owned(), request.installation_id.clone())],
                )
                .await;
        }
    }

    pub(crate) fn spinwick_for(&self, pr: &PullRequest) -> Spinwick {
        Spinwick::new(&pr.repo_name, pr.number, &self.config.provisioner.base_domain)
    }

    pub(crate) async fn send_comment(&self, pr: &PullRequest, body: &str) {
        info!(pr = pr.number, comment = body, "sending GitHub comment");
        if let Err(err) = self
            .github
            .create_comment(&pr.repo_owner, &pr.repo_name, pr.number, body)
            .await
        {
            error!(pr = pr.number, error = %err, "error commenting");
        }
    }

    pub(crate) async fn strip_spinwick_labels(&self, pr: &PullRequest) {
        for label in &pr.labels {
            if !self.config.is_spinwick_label(label) {
                continue;
            }
            info!(pr = pr.number, label = %label, "removing label on issue");
            if let Err(err) = self
                .github
                .remove_label(&pr.repo_owner, &pr.repo_name, pr.number, label)
                .await
            {
                error!(pr = pr.number, label = %label, error = %err, "error removing the label");
            }
        }
    }

    /// Prunes every status comment this bot may have posted for earlier
    /// workflow runs on this PR.
    pub(crate) async fn remove_stale_comments(&self, pr: &PullRequest, comments: &[IssueComment]) {
        let destroyed = self.config.messages.destroyed.clone();
        let setup_failed = self.config.messages.setup_failed.clone();
        let stale: Vec<&str> = vec![
            destroyed.as_str(),
            setup_failed.as_str(),
            "Creating a new SpinWick test server",
            "Creating a new HA SpinWick test server",
            "Creating a new SpinWick test cloud server with customer service",
            "Creating a SpinWick customer-service test server",
            "New commit detected.",
            "created! :tada:",
            "updated with git commit",
            "Enterprise edition image not available",
            "No compatible clusters available",
            "has been destroyed",
        ];

        comments::remove_comments_with_messages(
            self.github.as_ref(),
            pr,
            comments,
            &self.config.username,
            &stale,
        )
        .await;
    }

    pub(crate) async fn remove_comments_containing(
        &self,
        pr: &PullRequest,
        comments: &[IssueComment],
        messages: &[&str],
    ) {
        comments::remove_comments_with_messages(
            self.github.as_ref(),
            pr,
            comments,
            &self.config.username,
            messages,
        )
        .await;
    }

    /// Folds a state-wait outcome into the request accumulator, posting the
    /// distinct user-facing message for the no-capacity case.
    pub(crate) async fn apply_wait_outcome(
        &self,
        request: LifecycleRequest,
        outcome: Result<(), WaitStateError>,
        pr: &PullRequest,
        context: &str,
    ) -> LifecycleRequest {
        match outcome {
            Ok(()) => request,
            Err(WaitStateError::NoCompatibleClusters { id }) => {
                self.send_comment(
                    pr,
                    "No compatible clusters available at the moment, please contact the cloud team or wait a bit",
                )
                .await;
                request
                    .with_error(anyhow!("no compatible clusters available for installation {id}"))
                    .intentional_abort()
            }
            Err(err @ WaitStateError::LabelRemoved) => {
                request.with_error(anyhow!(err)).intentional_abort()
            }
            Err(err) => request
                .with_error(anyhow!(err).context(context.to_owned()))
                .should_report_error(),
        }
    }
}
