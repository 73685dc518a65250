use anyhow::anyhow;
use spinwick_cloud::{installation_for_owner, CreateInstallationRequest, PatchInstallationRequest};
use spinwick_core::{LifecycleRequest, PullRequest, SpinwickKind};
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::{
    LifecycleController, CREATE_STABLE_WAIT, FALLBACK_IMAGE_WAIT, IMAGE_WAIT, UPDATE_BUILD_GRACE,
    UPDATE_STABLE_WAIT,
};
use crate::bootstrap::{ADMIN_PASSWORD, ADMIN_USERNAME, TEST_PASSWORD, TEST_USERNAME};

const INSTALLATION_AFFINITY: &str = "multitenant";
const INSTALLATION_DATABASE: &str = "multitenant-rds-postgres-pgbouncer";
const INSTALLATION_FILESTORE: &str = "bifrost";
const MULTI_TENANT_ANNOTATION: &str = "multi-tenant";

impl LifecycleController {
    /// Creates a plain cloud SpinWick:
    /// - no installation found = a new one is created
    /// - installation found = intentional abort carrying its ID
    /// - any error = the error is returned in the accumulator
    pub(crate) async fn create_cloud(
        &self,
        pr: &PullRequest,
        kind: SpinwickKind,
    ) -> LifecycleRequest {
        let request = LifecycleRequest::new();
        let spinwick = self.spinwick_for(pr);
        let owner_id = spinwick.repeatable_id.clone();

        let existing = match installation_for_owner(self.cloud.as_ref(), &owner_id).await {
            Ok(existing) => existing,
            Err(err) => {
                return request
                    .with_error(anyhow!(err).context("error trying to get existing installations"))
                    .should_report_error();
            }
        };
        if let Some(installation) = existing {
            return request
                .with_installation_id(installation.id)
                .with_error(anyhow!("already found an installation belonging to {owner_id}"))
                .intentional_abort();
        }

        // Reduce the pile of similar bot messages before posting new ones.
        match self
            .github
            .list_comments(&pr.repo_owner, &pr.repo_name, pr.number)
            .await
        {
            Ok(comments) => {
                self.remove_comments_containing(
                    pr,
                    &comments,
                    &[self.config.messages.destroyed.as_str()],
                )
                .await;
            }
            Err(err) => error!(error = %err, "error getting comments"),
        }

        info!(pr = pr.number, "no SpinWick found for this PR, creating a new one");

        let mut version = "master".to_owned();
        let mut image = self.config.images.enterprise.clone();
        let tag = self.builds.installation_version(pr);

        if pr.repo_name == self.config.repositories.webapp {
            info!("waiting for docker image to set up SpinWick");
            if let Err(err) = self
                .builds
                .wait_for_image(Instant::now() + IMAGE_WAIT, &image, &tag)
                .await
            {
                return request
                    .with_error(anyhow!(err).context("error waiting for the docker image, aborting"))
                    .intentional_abort();
            }
            version = tag.clone();
        } else if pr.repo_name == self.config.repositories.server {
            info!("waiting for docker image to set up SpinWick");
            if let Err(err) = self
                .builds
                .wait_for_image(Instant::now() + FALLBACK_IMAGE_WAIT, &image, &tag)
                .await
            {
                if kind.with_license() {
                    // Licensed HA servers must run the enterprise image, so
                    // there is nothing to fall back to.
                    self.send_comment(
                        pr,
                        "Enterprise edition image not available in the 30 minute timeframe.\nPlease check that the enterprise pipeline was triggered and, if not, trigger it and re-add the HA label.",
                    )
                    .await;
                    return request
                        .with_error(anyhow!(err).context(
                            "error waiting for the enterprise docker image, check if the enterprise pipeline ran",
                        ))
                        .intentional_abort();
                }

                warn!(sha = %pr.sha, "did not find the enterprise image, falling back to the team image");
                self.send_comment(
                    pr,
                    "Enterprise edition image not available in the 30 minute timeframe, checking the team edition image and using that if available",
                )
                .await;
                image = self.config.images.team.clone();
                if let Err(err) = self
                    .builds
                    .wait_for_image(Instant::now() + FALLBACK_IMAGE_WAIT, &image, &tag)
                    .await
                {
                    warn!(sha = %pr.sha, "did not find the team image either");
                    return request
                        .with_error(anyhow!(err).context("error waiting for the team docker image"))
                        .should_report_error();
                }
            }
            version = tag.clone();
        }

        info!("provisioning server, installation request");
        let create_request = CreateInstallationRequest {
            owner_id: owner_id.clone(),
            version,
            image,
            dns: spinwick.dns(&self.config.provisioner.base_domain),
            size: self.config.size_for(kind).to_owned(),
            affinity: INSTALLATION_AFFINITY.to_owned(),
            database: INSTALLATION_DATABASE.to_owned(),
            filestore: INSTALLATION_FILESTORE.to_owned(),
            annotations: vec![MULTI_TENANT_ANNOTATION.to_owned()],
            group_id: self.config.provisioner.group_id.clone(),
            license: kind
                .with_license()
                .then(|| self.config.provisioner.ha_license.clone()),
            env: self.env_cache.get(&owner_id),
        };

        let installation = match self.cloud.create_installation(&create_request).await {
            Ok(installation) => installation,
            Err(err) => {
                return request
                    .with_error(anyhow!(err).context(
                        "unable to make the installation creation request to the provisioning server",
                    ))
                    .should_report_error();
            }
        };
        let request = request.with_installation_id(installation.id.clone());

        info!(installation_id = %installation.id, "waiting for the installation to become stable");
        let outcome = self
            .waiter
            .wait_for_stable(Instant::now() + CREATE_STABLE_WAIT, &installation.id, pr)
            .await;
        let request = self
            .apply_wait_outcome(
                request,
                outcome,
                pr,
                "error waiting for the installation to become stable",
            )
            .await;
        if request.failed() {
            return request;
        }

        let url = spinwick.url(&self.config.provisioner.base_domain);
        if let Err(err) = self.bootstrap.initialize(&url, pr.number).await {
            return request
                .with_error(err.context("failed to initialize the installation"))
                .should_report_error();
        }

        let user_table = format!(
            "| Account Type | Username | Password |\n|---|---|---|\n| Admin | {ADMIN_USERNAME} | {ADMIN_PASSWORD} |\n| User | {TEST_USERNAME} | {TEST_PASSWORD} |"
        );
        self.send_comment(
            pr,
            &format!("Test server created! :tada:\n\nAccess here: {url}\n\n{user_table}"),
        )
        .await;

        request
    }

    /// Updates an existing cloud SpinWick:
    /// - no installation found = reportable error
    /// - version already applied by another actor = intentional abort
    pub(crate) async fn update_cloud(
        &self,
        pr: &PullRequest,
        kind: SpinwickKind,
    ) -> LifecycleRequest {
        let request = LifecycleRequest::new();
        let spinwick = self.spinwick_for(pr);

        let owner_id = if kind.with_customer_service() {
            match self.customer_owner_id(&spinwick.repeatable_id).await {
                Ok(owner_id) => owner_id,
                Err(err) => {
                    return request
                        .with_error(err.context("error getting the owner id from the customer service"))
                        .should_report_error();
                }
            }
        } else {
            spinwick.repeatable_id.clone()
        };

        let installation = match installation_for_owner(self.cloud.as_ref(), &owner_id).await {
            Ok(Some(installation)) => installation,
            Ok(None) => {
                return request
                    .with_error(anyhow!("no installation found with owner {owner_id}"))
                    .should_report_error();
            }
            Err(err) => {
                return request
                    .with_error(anyhow!(err).context("error trying to get existing installations"))
                    .should_report_error();
            }
        };
        let request = request.with_installation_id(installation.id.clone());

        info!(sha = %pr.sha, "sleeping a bit to let the build pipeline start");
        tokio::time::sleep(UPDATE_BUILD_GRACE).await;

        let comments = match self
            .github
            .list_comments(&pr.repo_owner, &pr.repo_name, pr.number)
            .await
        {
            Ok(comments) => {
                self.remove_comments_containing(pr, &comments, &["New commit detected."])
                    .await;
                Some(comments)
            }
            Err(err) => {
                error!(error = %err, "error getting comments");
                None
            }
        };
        self.send_comment(
            pr,
            "New commit detected. SpinWick will upgrade if the updated docker image is available.",
        )
        .await;

        let image = if installation.image.is_empty() {
            self.config.images.enterprise.clone()
        } else {
            installation.image.clone()
        };
        let tag = self.builds.installation_version(pr);

        info!("waiting for the docker image to update SpinWick");
        if let Err(err) = self
            .builds
            .wait_for_image(Instant::now() + IMAGE_WAIT, &image, &tag)
            .await
        {
            return request
                .with_error(anyhow!(err).context("error waiting for the docker image, aborting"))
                .intentional_abort();
        }

        // Final upgrade check: if the remote version already matches, another
        // actor got here first.
        match self.cloud.get_installation(&installation.id).await {
            Ok(Some(current)) if current.version == tag => {
                return request
                    .with_error(anyhow!(
                        "another process already updated the installation version, aborting"
                    ))
                    .intentional_abort();
            }
            Ok(_) => {}
            Err(err) => {
                return request
                    .with_error(anyhow!(err).context("unable to get the installation"))
                    .should_report_error();
            }
        }

        info!("provisioning server, upgrade request");
        let patch = PatchInstallationRequest {
            version: Some(tag),
            image: Some(image),
            license: (kind.with_license() && !kind.with_customer_service())
                .then(|| self.config.provisioner.ha_license.clone()),
            env: self.env_cache.get(&spinwick.repeatable_id),
        };
        let updated = match self.cloud.update_installation(&installation.id, &patch).await {
            Ok(updated) => updated,
            Err(err) => {
                return request
                    .with_error(anyhow!(err).context(
                        "unable to make the upgrade request to the provisioning server",
                    ))
                    .should_report_error();
            }
        };

        info!(installation_id = %installation.id, "waiting for the installation to become stable");
        let outcome = self
            .waiter
            .wait_for_stable(Instant::now() + UPDATE_STABLE_WAIT, &installation.id, pr)
            .await;
        let request = self
            .apply_wait_outcome(
                request,
                outcome,
                pr,
                "error waiting for the installation to become stable",
            )
            .await;
        if request.failed() {
            return request;
        }

        if let Some(comments) = comments {
            self.remove_comments_containing(pr, &comments, &["updated with git commit"])
                .await;
        }

        let url = if updated.dns.is_empty() {
            spinwick.url(&self.config.provisioner.base_domain)
        } else {
            format!("https://{}", updated.dns)
        };
        self.send_comment(
            pr,
            &format!("Test server updated with git commit `{}`.\n\nAccess here: {url}", pr.sha),
        )
        .await;

        request
    }

    /// Destroys a plain cloud SpinWick:
    /// - no installation found = intentional abort (nothing to delete)
    pub(crate) async fn destroy_cloud(&self, pr: &PullRequest) -> LifecycleRequest {
        let request = LifecycleRequest::new();
        let spinwick = self.spinwick_for(pr);
        let owner_id = spinwick.repeatable_id.clone();

        let installation = match installation_for_owner(self.cloud.as_ref(), &owner_id).await {
            Ok(Some(installation)) => installation,
            Ok(None) => {
                return request
                    .with_installation_id("")
                    .with_error(anyhow!("no SpinWick found for this PR, skipping deletion"))
                    .intentional_abort();
            }
            Err(err) => {
                return request
                    .with_error(anyhow!(err).context("error trying to get existing installations"))
                    .should_report_error();
            }
        };
        let request = request.with_installation_id(installation.id.clone());

        info!(installation_id = %installation.id, "destroying SpinWick");
        if let Err(err) = self.cloud.delete_installation(&installation.id).await {
            return request
                .with_error(anyhow!(err).context(
                    "unable to make the installation delete request to the provisioning server",
                ))
                .should_report_error();
        }
        self.env_cache.remove(&spinwick.repeatable_id);

        // Old bot comments are deleted here; hold the comment lock so a
        // concurrent label event cannot interleave its own posting.
        let _guard = self.comment_lock.lock().await;
        match self
            .github
            .list_comments(&pr.repo_owner, &pr.repo_name, pr.number)
            .await
        {
            Ok(comments) => self.remove_stale_comments(pr, &comments).await,
            Err(err) => {
                return request
                    .with_error(anyhow!(err).context("unable to get the list of old comments"))
                    .should_report_error();
            }
        }
        self.send_comment(pr, &self.config.messages.destroyed).await;

        request
    }
}
