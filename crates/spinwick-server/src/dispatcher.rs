use spinwick_core::{PullRequest, SpinwickKind};
use spinwick_github::events::PullRequestEvent;
use tracing::{error, info, warn};

use crate::comments;
use crate::server::Server;

impl Server {
    /// Maps an inbound PR webhook event to a lifecycle operation. Each
    /// invocation runs in its own task and re-fetches the PR so it works
    /// from a fresh snapshot, not the (possibly stale) event payload.
    pub async fn handle_pull_request_event(&self, event: PullRequestEvent) {
        let repo_owner = event.repository.owner.login.clone();
        let repo_name = event.repository.name.clone();
        info!(repo = %repo_name, pr = event.number, action = %event.action, "pr event");

        let pr = match self
            .github
            .get_pull_request(&repo_owner, &repo_name, event.number)
            .await
        {
            Ok(pr) => pr,
            Err(err) => {
                error!(pr = event.number, error = %err, "unable to get PR from GitHub");
                return;
            }
        };

        match event.action.as_str() {
            "opened" => info!(repo = %repo_name, pr = pr.number, "PR opened"),
            "reopened" => info!(repo = %repo_name, pr = pr.number, "PR reopened"),
            "labeled" => {
                let Some(label) = &event.label else {
                    error!("label event received, but the label object was empty");
                    return;
                };

                self.handle_pr_labeled(&pr, &label.name).await;

                if let Some(kind) = self.config.spinwick_kind_for_label(&label.name) {
                    info!(repo = %repo_name, pr = pr.number, label = %label.name, "PR received SpinWick label");
                    self.controller.handle_create(&pr, kind).await;
                }
            }
            "unlabeled" => {
                let Some(label) = &event.label else {
                    error!("unlabel event received, but the label object was empty");
                    return;
                };

                if let Some(kind) = self.config.spinwick_kind_for_label(&label.name) {
                    info!(repo = %repo_name, pr = pr.number, label = %label.name, "PR SpinWick label was removed");
                    self.controller.handle_destroy(&pr, kind).await;
                }
            }
            "synchronize" => {
                info!(repo = %repo_name, pr = pr.number, "PR has a new commit");
                if self.config.spinwick_label_in(&pr.labels) {
                    let kind = self
                        .config
                        .spinwick_kind_in(&pr.labels)
                        .unwrap_or(SpinwickKind::Standard);
                    info!(repo = %repo_name, pr = pr.number, "PR has a SpinWick label, starting upgrade");
                    self.controller.handle_update(&pr, kind).await;
                    self.update_sibling_pull_requests(&pr).await;
                }
            }
            "closed" => {
                info!(repo = %repo_name, pr = pr.number, "PR was closed");
                if let Some(kind) = self.config.spinwick_kind_in(&pr.labels) {
                    self.controller.handle_destroy(&pr, kind).await;
                }
            }
            other => info!(action = %other, "ignoring PR action"),
        }
    }

    /// The server and webapp repositories build one combined image, so a new
    /// commit on either side also refreshes sibling SpinWicks whose PR uses
    /// the same branch name in the partner repository. The sibling reuses
    /// the triggering PR's commit SHA.
    async fn update_sibling_pull_requests(&self, pr: &PullRequest) {
        let Some(partner) = self.config.paired_repository(&pr.repo_name) else {
            return;
        };

        let siblings = match self
            .github
            .open_pull_requests_by_head(&pr.repo_owner, partner, &pr.head_ref)
            .await
        {
            Ok(siblings) => siblings,
            Err(err) => {
                warn!(partner, error = %err, "unable to look up sibling PRs");
                return;
            }
        };

        for mut sibling in siblings {
            if !self.config.spinwick_label_in(&sibling.labels) {
                continue;
            }
            let kind = self
                .config
                .spinwick_kind_in(&sibling.labels)
                .unwrap_or(SpinwickKind::Standard);
            info!(
                repo = %sibling.repo_name,
                pr = sibling.number,
                branch = %pr.head_ref,
                "updating sibling SpinWick for matching branch"
            );
            sibling.sha = pr.sha.clone();
            self.controller.handle_update(&sibling, kind).await;
        }
    }

    /// Posts the configured guidance comment for a newly added label, once.
    /// Serialized per server instance so two near-simultaneous events cannot
    /// both decide the comment is missing and post it twice.
    pub(crate) async fn handle_pr_labeled(&self, pr: &PullRequest, added_label: &str) {
        info!(pr = pr.number, label = added_label, "new PR label detected");

        let _guard = self.comment_lock.lock().await;

        let comments = match self
            .github
            .list_comments(&pr.repo_owner, &pr.repo_name, pr.number)
            .await
        {
            Ok(comments) => comments,
            Err(err) => {
                error!(pr = pr.number, error = %err, "unable to list comments for PR");
                return;
            }
        };

        // A label re-add after a destroy should read like a fresh start.
        comments::remove_comments_with_messages(
            self.github.as_ref(),
            pr,
            &comments,
            &self.config.username,
            &[self.config.messages.destroyed.as_str()],
        )
        .await;

        for entry in &self.config.pr_label_messages {
            if entry.label != added_label {
                continue;
            }
            let message = entry.message.replace("USERNAME", &pr.username);
            if comments::contains_message_from(&comments, &self.config.username, &message) {
                continue;
            }

            info!(pr = pr.number, label = %entry.label, "posting message for label on PR");
            self.controller.send_comment(pr, &message).await;
        }
    }
}
