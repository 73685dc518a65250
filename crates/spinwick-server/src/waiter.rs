use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use spinwick_cloud::{CloudApi, InstallationState};
use spinwick_core::PullRequest;
use spinwick_github::GithubApi;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::LabelConfig;
use crate::registry::WebhookChannelRegistry;

/// Cadence of direct status queries in the polling variant.
pub const STATE_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum WaitStateError {
    #[error("timed out waiting for installation {id} to become {target}")]
    Timeout { id: String, target: &'static str },
    #[error("installation {id}: {message}")]
    Failed { id: String, message: String },
    #[error("the SpinWick label has been removed, aborting")]
    LabelRemoved,
    #[error("no compatible clusters available for installation {id}")]
    NoCompatibleClusters { id: String },
    #[error(transparent)]
    Dependency(#[from] anyhow::Error),
}

impl WaitStateError {
    /// Expected stops, as opposed to failures worth escalating.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::LabelRemoved | Self::NoCompatibleClusters { .. })
    }
}

/// Blocks until an installation reaches a terminal state, translating the
/// provider's state codes into the orchestrator's outcome taxonomy. The two
/// implementations are interchangeable: one consumes pushed webhook
/// payloads, the other polls the provisioner directly.
#[async_trait]
pub trait StateWaiter: Send + Sync {
    async fn wait_for_stable(
        &self,
        deadline: Instant,
        installation_id: &str,
        pr: &PullRequest,
    ) -> Result<(), WaitStateError>;

    async fn wait_for_deleted(
        &self,
        deadline: Instant,
        installation_id: &str,
    ) -> Result<(), WaitStateError>;
}

/// Decides what a state observation means while waiting for `stable`.
enum StableStep {
    Done,
    KeepWaiting,
    RecheckLabels(String),
}

fn classify_for_stable(state: &InstallationState, installation_id: &str) -> Result<StableStep, WaitStateError> {
    match state {
        InstallationState::Stable => Ok(StableStep::Done),
        InstallationState::CreationFailed => Err(WaitStateError::Failed {
            id: installation_id.to_owned(),
            message: "the installation creation failed".to_owned(),
        }),
        InstallationState::CreationNoCompatibleClusters => {
            Err(WaitStateError::NoCompatibleClusters {
                id: installation_id.to_owned(),
            })
        }
        state if state.is_deletion_phase() => {
            Ok(StableStep::RecheckLabels(state.as_wire().to_owned()))
        }
        _ => Ok(StableStep::KeepWaiting),
    }
}

async fn recheck_labels(
    github: &dyn GithubApi,
    labels: &LabelConfig,
    pr: &PullRequest,
    observed_state: &str,
) -> Result<(), WaitStateError> {
    // Another actor may have deleted the installation. If the triggering
    // label is gone this wait should stop quietly; otherwise keep waiting.
    let refreshed = github
        .get_pull_request(&pr.repo_owner, &pr.repo_name, pr.number)
        .await
        .map_err(|error| {
            anyhow!(error).context(format!(
                "received state update {observed_state}, but was unable to check PR labels"
            ))
        })?;

    if !labels.any_spinwick_label(&refreshed.labels) {
        return Err(WaitStateError::LabelRemoved);
    }
    Ok(())
}

/// Push variant: consumes the webhook channel registry.
pub struct WebhookStateWaiter {
    channels: Arc<WebhookChannelRegistry>,
    github: Arc<dyn GithubApi>,
    labels: LabelConfig,
}

impl WebhookStateWaiter {
    pub fn new(
        channels: Arc<WebhookChannelRegistry>,
        github: Arc<dyn GithubApi>,
        labels: LabelConfig,
    ) -> Self {
        Self {
            channels,
            github,
            labels,
        }
    }

    async fn wait_stable_on_channel(
        &self,
        channel: &mut tokio::sync::mpsc::Receiver<spinwick_cloud::WebhookPayload>,
        deadline: Instant,
        installation_id: &str,
        pr: &PullRequest,
    ) -> Result<(), WaitStateError> {
        loop {
            tokio::select! {
                () = tokio::time::sleep_until(deadline) => {
                    return Err(WaitStateError::Timeout {
                        id: installation_id.to_owned(),
                        target: "stable",
                    });
                }
                payload = channel.recv() => {
                    let Some(payload) = payload else {
                        return Err(anyhow!("webhook channel closed while waiting").into());
                    };
                    // The registry fans every payload out to every
                    // subscriber; skip the ones for other installations.
                    if payload.id != installation_id {
                        continue;
                    }
                    info!(installation_id, state = %payload.new_state, "installation changed state");

                    match classify_for_stable(&payload.state(), installation_id)? {
                        StableStep::Done => return Ok(()),
                        StableStep::KeepWaiting => {}
                        StableStep::RecheckLabels(observed) => {
                            recheck_labels(self.github.as_ref(), &self.labels, pr, &observed)
                                .await?;
                        }
                    }
                }
            }
        }
    }

    async fn wait_deleted_on_channel(
        &self,
        channel: &mut tokio::sync::mpsc::Receiver<spinwick_cloud::WebhookPayload>,
        deadline: Instant,
        installation_id: &str,
    ) -> Result<(), WaitStateError> {
        loop {
            tokio::select! {
                () = tokio::time::sleep_until(deadline) => {
                    return Err(WaitStateError::Timeout {
                        id: installation_id.to_owned(),
                        target: "deleted",
                    });
                }
                payload = channel.recv() => {
                    let Some(payload) = payload else {
                        return Err(anyhow!("webhook channel closed while waiting").into());
                    };
                    if payload.id != installation_id {
                        continue;
                    }
                    info!(installation_id, state = %payload.new_state, "installation changed state");

                    match payload.state() {
                        InstallationState::Deleted => return Ok(()),
                        InstallationState::DeletionFailed => {
                            return Err(WaitStateError::Failed {
                                id: installation_id.to_owned(),
                                message: "the installation deletion failed".to_owned(),
                            });
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

#[async_trait]
impl StateWaiter for WebhookStateWaiter {
    async fn wait_for_stable(
        &self,
        deadline: Instant,
        installation_id: &str,
        pr: &PullRequest,
    ) -> Result<(), WaitStateError> {
        let mut channel = self
            .channels
            .request_channel(installation_id)
            .map_err(|error| anyhow!(error).context("unable to register webhook channel"))?;

        let result = self
            .wait_stable_on_channel(&mut channel, deadline, installation_id, pr)
            .await;
        // Removal must happen on every exit path, or the fan-out loop would
        // keep delivering into an abandoned channel.
        self.channels.remove_channel(installation_id);
        result
    }

    async fn wait_for_deleted(
        &self,
        deadline: Instant,
        installation_id: &str,
    ) -> Result<(), WaitStateError> {
        let mut channel = self
            .channels
            .request_channel(installation_id)
            .map_err(|error| anyhow!(error).context("unable to register webhook channel"))?;

        let result = self
            .wait_deleted_on_channel(&mut channel, deadline, installation_id)
            .await;
        self.channels.remove_channel(installation_id);
        result
    }
}

/// Poll variant: used when webhook delivery cannot be guaranteed (local or
/// offline operation).
pub struct PollingStateWaiter {
    cloud: Arc<dyn CloudApi>,
    github: Arc<dyn GithubApi>,
    labels: LabelConfig,
}

impl PollingStateWaiter {
    pub fn new(
        cloud: Arc<dyn CloudApi>,
        github: Arc<dyn GithubApi>,
        labels: LabelConfig,
    ) -> Self {
        Self {
            cloud,
            github,
            labels,
        }
    }

    async fn next_tick(deadline: Instant, target: &'static str, id: &str) -> Result<(), WaitStateError> {
        let now = Instant::now();
        let next_poll = now + STATE_POLL_INTERVAL;
        if now >= deadline || next_poll >= deadline {
            tokio::time::sleep_until(deadline).await;
            return Err(WaitStateError::Timeout {
                id: id.to_owned(),
                target,
            });
        }
        tokio::time::sleep_until(next_poll).await;
        Ok(())
    }
}

#[async_trait]
impl StateWaiter for PollingStateWaiter {
    async fn wait_for_stable(
        &self,
        deadline: Instant,
        installation_id: &str,
        pr: &PullRequest,
    ) -> Result<(), WaitStateError> {
        loop {
            Self::next_tick(deadline, "stable", installation_id).await?;

            let installation = match self.cloud.get_installation(installation_id).await {
                Ok(installation) => installation,
                Err(error) => {
                    warn!(installation_id, error = %error, "status query failed, retrying");
                    continue;
                }
            };

            let state = match installation {
                Some(installation) => installation.installation_state(),
                // The installation is gone entirely; same ambiguity as a
                // deletion-phase state change.
                None => InstallationState::Deleted,
            };
            info!(installation_id, state = %state.as_wire(), "installation state polled");

            match classify_for_stable(&state, installation_id)? {
                StableStep::Done => return Ok(()),
                StableStep::KeepWaiting => {}
                StableStep::RecheckLabels(observed) => {
                    recheck_labels(self.github.as_ref(), &self.labels, pr, &observed).await?;
                }
            }
        }
    }

    async fn wait_for_deleted(
        &self,
        deadline: Instant,
        installation_id: &str,
    ) -> Result<(), WaitStateError> {
        loop {
            Self::next_tick(deadline, "deleted", installation_id).await?;

            let installation = match self.cloud.get_installation(installation_id).await {
                Ok(installation) => installation,
                Err(error) => {
                    warn!(installation_id, error = %error, "status query failed, retrying");
                    continue;
                }
            };

            match installation.map(|installation| installation.installation_state()) {
                None | Some(InstallationState::Deleted) => return Ok(()),
                Some(InstallationState::DeletionFailed) => {
                    return Err(WaitStateError::Failed {
                        id: installation_id.to_owned(),
                        message: "the installation deletion failed".to_owned(),
                    });
                }
                Some(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use spinwick_cloud::{
        CloudError, CreateInstallationRequest, CreateWebhookRequest, Installation,
        PatchInstallationRequest, Webhook, WebhookPayload,
    };
    use spinwick_github::{GithubError, IssueComment};
    use time::OffsetDateTime;

    struct StubGithub {
        labels: Mutex<Vec<String>>,
    }

    impl StubGithub {
        fn with_labels(labels: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                labels: Mutex::new(labels.iter().map(|label| (*label).to_owned()).collect()),
            })
        }
    }

    #[async_trait]
    impl GithubApi for StubGithub {
        async fn get_pull_request(
            &self,
            _owner: &str,
            _repo: &str,
            _number: u64,
        ) -> Result<spinwick_core::PullRequest, GithubError> {
            let mut pr = sample_pr();
            pr.labels = self.labels.lock().unwrap().clone();
            Ok(pr)
        }

        async fn list_comments(
            &self,
            _owner: &str,
            _repo: &str,
            _number: u64,
        ) -> Result<Vec<IssueComment>, GithubError> {
            Ok(Vec::new())
        }

        async fn create_comment(
            &self,
            _owner: &str,
            _repo: &str,
            _number: u64,
            _body: &str,
        ) -> Result<(), GithubError> {
            Ok(())
        }

        async fn delete_comment(
            &self,
            _owner: &str,
            _repo: &str,
            _comment_id: u64,
        ) -> Result<(), GithubError> {
            Ok(())
        }

        async fn add_label(
            &self,
            _owner: &str,
            _repo: &str,
            _number: u64,
            _label: &str,
        ) -> Result<(), GithubError> {
            Ok(())
        }

        async fn remove_label(
            &self,
            _owner: &str,
            _repo: &str,
            _number: u64,
            _label: &str,
        ) -> Result<(), GithubError> {
            Ok(())
        }

        async fn is_org_member(&self, _org: &str, _user: &str) -> Result<bool, GithubError> {
            Ok(true)
        }

        async fn open_pull_requests_by_head(
            &self,
            _owner: &str,
            _repo: &str,
            _head_ref: &str,
        ) -> Result<Vec<spinwick_core::PullRequest>, GithubError> {
            Ok(Vec::new())
        }

        async fn remaining_rate_limit(&self) -> Result<u64, GithubError> {
            Ok(u64::MAX)
        }
    }

    struct ScriptedCloud {
        states: Mutex<Vec<Option<&'static str>>>,
    }

    impl ScriptedCloud {
        fn new(states: Vec<Option<&'static str>>) -> Arc<Self> {
            Arc::new(Self {
                states: Mutex::new(states),
            })
        }
    }

    #[async_trait]
    impl CloudApi for ScriptedCloud {
        async fn create_installation(
            &self,
            _request: &CreateInstallationRequest,
        ) -> Result<Installation, CloudError> {
            unimplemented!("not exercised")
        }

        async fn get_installation(&self, id: &str) -> Result<Option<Installation>, CloudError> {
            let mut states = self.states.lock().unwrap();
            let state = if states.len() > 1 {
                states.remove(0)
            } else {
                states[0]
            };
            Ok(state.map(|state| Installation {
                id: id.to_owned(),
                owner_id: "owner".to_owned(),
                version: String::new(),
                image: String::new(),
                state: state.to_owned(),
                dns: String::new(),
            }))
        }

        async fn get_installations_by_owner(
            &self,
            _owner_id: &str,
        ) -> Result<Vec<Installation>, CloudError> {
            unimplemented!("not exercised")
        }

        async fn update_installation(
            &self,
            _id: &str,
            _request: &PatchInstallationRequest,
        ) -> Result<Installation, CloudError> {
            unimplemented!("not exercised")
        }

        async fn delete_installation(&self, _id: &str) -> Result<(), CloudError> {
            unimplemented!("not exercised")
        }

        async fn create_webhook(
            &self,
            _request: &CreateWebhookRequest,
        ) -> Result<Webhook, CloudError> {
            unimplemented!("not exercised")
        }

        async fn get_webhooks_by_owner(&self, _owner_id: &str) -> Result<Vec<Webhook>, CloudError> {
            unimplemented!("not exercised")
        }

        async fn delete_webhook(&self, _id: &str) -> Result<(), CloudError> {
            unimplemented!("not exercised")
        }
    }

    fn sample_pr() -> spinwick_core::PullRequest {
        spinwick_core::PullRequest {
            repo_owner: "octo".to_owned(),
            repo_name: "server".to_owned(),
            full_name: "octo/server".to_owned(),
            number: 42,
            username: "alice".to_owned(),
            head_ref: "feature".to_owned(),
            sha: "f88f7bd".to_owned(),
            labels: vec![LabelConfig::default().setup],
            state: "open".to_owned(),
            url: String::new(),
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    fn payload(id: &str, state: &str) -> WebhookPayload {
        WebhookPayload {
            id: id.to_owned(),
            new_state: state.to_owned(),
            old_state: String::new(),
        }
    }

    fn push_waiter(
        channels: &Arc<WebhookChannelRegistry>,
        github: Arc<dyn GithubApi>,
    ) -> WebhookStateWaiter {
        WebhookStateWaiter::new(Arc::clone(channels), github, LabelConfig::default())
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stable_payload_completes_the_wait() {
        let channels = Arc::new(WebhookChannelRegistry::new());
        let github = StubGithub::with_labels(&["Setup Cloud Test Server"]);
        let waiter = Arc::new(push_waiter(&channels, github));

        let wait_channels = Arc::clone(&channels);
        let wait = tokio::spawn({
            let waiter = Arc::clone(&waiter);
            async move {
                waiter
                    .wait_for_stable(Instant::now() + Duration::from_secs(600), "inst-1", &sample_pr())
                    .await
            }
        });
        settle().await;
        assert_eq!(wait_channels.len(), 1);

        // Payloads for other installations are skipped, not consumed as
        // terminal states.
        channels.dispatch(&payload("inst-other", "creation-failed"));
        settle().await;
        channels.dispatch(&payload("inst-1", "creation-in-progress"));
        settle().await;
        channels.dispatch(&payload("inst-1", "stable"));

        wait.await.unwrap().expect("stable payload should finish the wait");
        assert!(channels.is_empty(), "channel must be removed after the wait");
    }

    #[tokio::test(start_paused = true)]
    async fn creation_failure_is_terminal() {
        let channels = Arc::new(WebhookChannelRegistry::new());
        let github = StubGithub::with_labels(&["Setup Cloud Test Server"]);
        let waiter = Arc::new(push_waiter(&channels, github));

        let wait = tokio::spawn({
            let waiter = Arc::clone(&waiter);
            async move {
                waiter
                    .wait_for_stable(Instant::now() + Duration::from_secs(600), "inst-1", &sample_pr())
                    .await
            }
        });
        settle().await;
        channels.dispatch(&payload("inst-1", "creation-failed"));

        let error = wait.await.unwrap().expect_err("creation failure is terminal");
        assert!(matches!(error, WaitStateError::Failed { .. }));
        assert!(!error.is_abort());
        assert!(channels.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deletion_state_aborts_once_the_label_is_gone() {
        let channels = Arc::new(WebhookChannelRegistry::new());
        let github = StubGithub::with_labels(&["unrelated-label"]);
        let waiter = Arc::new(push_waiter(&channels, github));

        let wait = tokio::spawn({
            let waiter = Arc::clone(&waiter);
            async move {
                waiter
                    .wait_for_stable(Instant::now() + Duration::from_secs(600), "inst-1", &sample_pr())
                    .await
            }
        });
        settle().await;
        channels.dispatch(&payload("inst-1", "deletion-requested"));

        let error = wait.await.unwrap().expect_err("label removal aborts the wait");
        assert!(matches!(error, WaitStateError::LabelRemoved));
        assert!(error.is_abort());
        assert!(channels.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deletion_state_keeps_waiting_while_the_label_remains() {
        let channels = Arc::new(WebhookChannelRegistry::new());
        let github = StubGithub::with_labels(&["Setup Cloud Test Server"]);
        let waiter = Arc::new(push_waiter(&channels, github));

        let wait = tokio::spawn({
            let waiter = Arc::clone(&waiter);
            async move {
                waiter
                    .wait_for_stable(Instant::now() + Duration::from_secs(600), "inst-1", &sample_pr())
                    .await
            }
        });
        settle().await;
        channels.dispatch(&payload("inst-1", "deletion-requested"));
        settle().await;
        channels.dispatch(&payload("inst-1", "stable"));

        wait.await
            .unwrap()
            .expect("wait continues until a terminal state arrives");
    }

    #[tokio::test(start_paused = true)]
    async fn no_compatible_clusters_is_a_distinct_abort() {
        let channels = Arc::new(WebhookChannelRegistry::new());
        let github = StubGithub::with_labels(&["Setup Cloud Test Server"]);
        let waiter = Arc::new(push_waiter(&channels, github));

        let wait = tokio::spawn({
            let waiter = Arc::clone(&waiter);
            async move {
                waiter
                    .wait_for_stable(Instant::now() + Duration::from_secs(600), "inst-1", &sample_pr())
                    .await
            }
        });
        settle().await;
        channels.dispatch(&payload("inst-1", "creation-no-compatible-clusters"));

        let error = wait.await.unwrap().expect_err("no clusters aborts the wait");
        assert!(matches!(error, WaitStateError::NoCompatibleClusters { .. }));
        assert!(error.is_abort());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_times_out_and_removes_the_channel() {
        let channels = Arc::new(WebhookChannelRegistry::new());
        let github = StubGithub::with_labels(&["Setup Cloud Test Server"]);
        let waiter = push_waiter(&channels, github);

        let error = waiter
            .wait_for_stable(Instant::now() + Duration::from_secs(1), "inst-1", &sample_pr())
            .await
            .expect_err("no payloads means timeout");
        assert!(matches!(error, WaitStateError::Timeout { target: "stable", .. }));
        assert!(channels.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_wait_on_the_same_installation_fails_fast() {
        let channels = Arc::new(WebhookChannelRegistry::new());
        let github = StubGithub::with_labels(&["Setup Cloud Test Server"]);
        let waiter = push_waiter(&channels, github);

        let _held = channels.request_channel("inst-1").unwrap();
        let error = waiter
            .wait_for_stable(Instant::now() + Duration::from_secs(600), "inst-1", &sample_pr())
            .await
            .expect_err("a second wait on a live ID must fail");
        assert!(matches!(error, WaitStateError::Dependency(_)));
        // The held registration stays; failing fast must not tear down the
        // first waiter's channel.
        assert_eq!(channels.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deleted_payload_completes_the_deletion_wait() {
        let channels = Arc::new(WebhookChannelRegistry::new());
        let github = StubGithub::with_labels(&["Setup Cloud Test Server"]);
        let waiter = Arc::new(push_waiter(&channels, github));

        let wait = tokio::spawn({
            let waiter = Arc::clone(&waiter);
            async move {
                waiter
                    .wait_for_deleted(Instant::now() + Duration::from_secs(600), "inst-1")
                    .await
            }
        });
        settle().await;
        channels.dispatch(&payload("inst-1", "deletion-in-progress"));
        settle().await;
        channels.dispatch(&payload("inst-1", "deleted"));

        wait.await.unwrap().expect("deleted payload finishes the wait");
        assert!(channels.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn polling_variant_reaches_stable() {
        let cloud = ScriptedCloud::new(vec![
            Some("creation-in-progress"),
            Some("creation-in-progress"),
            Some("stable"),
        ]);
        let github = StubGithub::with_labels(&["Setup Cloud Test Server"]);
        let waiter = PollingStateWaiter::new(cloud, github, LabelConfig::default());

        waiter
            .wait_for_stable(Instant::now() + Duration::from_secs(600), "inst-1", &sample_pr())
            .await
            .expect("polling reaches stable");
    }

    #[tokio::test(start_paused = true)]
    async fn polling_variant_treats_missing_installation_as_deleted() {
        let cloud = ScriptedCloud::new(vec![None]);
        let github = StubGithub::with_labels(&["Setup Cloud Test Server"]);
        let waiter = PollingStateWaiter::new(cloud, github, LabelConfig::default());

        waiter
            .wait_for_deleted(Instant::now() + Duration::from_secs(600), "inst-1")
            .await
            .expect("a vanished installation counts as deleted");
    }
}
