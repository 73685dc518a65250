use anyhow::{anyhow, Context};
use spinwick_cloud::InstallationState;
use spinwick_core::{LifecycleRequest, PullRequest};
use spinwick_cws::{CreateInstallationRequest, CwsInstallation};
use tokio::time::Instant;
use tracing::info;

use super::{LifecycleController, CREATE_STABLE_WAIT, DELETE_WAIT, IMAGE_WAIT};

const DEFAULT_USER_EMAIL_DOMAIN: &str = "example.com";

impl LifecycleController {
    /// Creates a cloud SpinWick through the customer service so a synthetic
    /// user, customer, and subscription exist alongside the installation.
    pub(crate) async fn create_cws_cloud(&self, pr: &PullRequest) -> LifecycleRequest {
        let request = LifecycleRequest::new();
        let spinwick = self.spinwick_for(pr);

        let username = self.customer_username(&spinwick.repeatable_id);
        let password = self.config.customer_service.user_password.clone();

        // Log in with the PR's synthetic account and reuse its customer; a
        // fresh PR gets a fresh signup instead.
        let customer_id = match self.cws.login(&username, &password).await {
            Ok(_) => {
                let customers = match self.cws.my_customers().await {
                    Ok(customers) => customers,
                    Err(err) => {
                        return request
                            .with_error(anyhow!(err).context(
                                "error occurred while logging in or creating the customer-service user",
                            ))
                            .should_report_error();
                    }
                };
                match customers.into_iter().next() {
                    Some(customer) => customer.id,
                    None => {
                        return request
                            .with_error(anyhow!(
                                "customer-service user {username} does not have any customer"
                            ))
                            .should_report_error();
                    }
                }
            }
            Err(_) => {
                let response = match self.cws.sign_up(&username, &password).await {
                    Ok(response) => response,
                    Err(err) => {
                        return request
                            .with_error(anyhow!(err).context(
                                "error occurred while logging in or creating the customer-service user",
                            ))
                            .should_report_error();
                    }
                };
                if let Err(err) = self.cws.verify_user(&response.user.id).await {
                    return request
                        .with_error(anyhow!(err).context(
                            "error occurred verifying the new customer-service user",
                        ))
                        .should_report_error();
                }
                response.customer.id
            }
        };

        // Abort if this customer already has a live installation.
        match self.active_customer_installation().await {
            Ok(Some(installation)) => {
                return request
                    .with_installation_id(installation.id)
                    .with_error(anyhow!(
                        "already found an installation belonging to {customer_id}"
                    ))
                    .intentional_abort();
            }
            Ok(None) => {}
            Err(err) => {
                return request
                    .with_error(err.context("error trying to get existing installations"))
                    .should_report_error();
            }
        }

        let image = self.config.images.enterprise.clone();
        let tag = self.builds.installation_version(pr);
        if let Err(err) = self
            .builds
            .wait_for_image(Instant::now() + IMAGE_WAIT, &image, &tag)
            .await
        {
            return request
                .with_error(anyhow!(err).context("error waiting for the docker image, aborting"))
                .intentional_abort();
        }

        let create_request = CreateInstallationRequest {
            customer_id,
            workspace_name: spinwick.unique_id.clone(),
            version: tag,
            image,
            group_id: self.config.customer_service.group_id.clone(),
            api_lock: false,
        };
        let response = match self.cws.create_installation(&create_request).await {
            Ok(response) => response,
            Err(err) => {
                return request
                    .with_error(anyhow!(err).context("error occurred while creating the installation"))
                    .should_report_error();
            }
        };
        let request = request.with_installation_id(response.installation_id.clone());

        let outcome = self
            .waiter
            .wait_for_stable(
                Instant::now() + CREATE_STABLE_WAIT,
                &response.installation_id,
                pr,
            )
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

        let url = format!(
            "https://{}.{}",
            spinwick.unique_id, self.config.provisioner.base_domain
        );
        let user_table = format!(
            "| Account Type | Username | Password |\n|---|---|---|\n| Admin | {username} | {password} |"
        );
        self.send_comment(
            pr,
            &format!(
                "Test server with customer service created! :tada:\n\nAccess here: {url}\n\n{user_table}"
            ),
        )
        .await;

        request
    }

    /// Destroys a customer-service SpinWick, waiting until the provisioner
    /// reports the installation deleted so the customer metadata can be
    /// cleaned up with it.
    pub(crate) async fn destroy_cws_cloud(&self, pr: &PullRequest) -> LifecycleRequest {
        let request = LifecycleRequest::new();
        let spinwick = self.spinwick_for(pr);

        let username = self.customer_username(&spinwick.repeatable_id);
        if let Err(err) = self
            .cws
            .login(&username, &self.config.customer_service.user_password)
            .await
        {
            return request
                .with_error(anyhow!(err).context("error trying to log in to the customer service"))
                .should_report_error();
        }

        let installation = match self.active_customer_installation().await {
            Ok(Some(installation)) => installation,
            Ok(None) => {
                return request
                    .with_error(anyhow!("there is no installation for this PR"))
                    .should_report_error();
            }
            Err(err) => {
                return request
                    .with_error(err.context("error trying to get existing installations"))
                    .should_report_error();
            }
        };
        let request = request.with_installation_id(installation.id.clone());

        info!(installation_id = %installation.id, "found installation, starting deletion");
        if let Err(err) = self.cws.delete_installation(&installation.id).await {
            return request
                .with_error(anyhow!(err).context(
                    "error trying to initiate the installation deletion for the PR",
                ))
                .should_report_error();
        }

        let outcome = self
            .waiter
            .wait_for_deleted(Instant::now() + DELETE_WAIT, &installation.id)
            .await;
        if let Err(err) = outcome {
            return request
                .with_error(anyhow!(err).context("error waiting for the installation to be deleted"))
                .should_report_error();
        }
        self.env_cache.remove(&spinwick.repeatable_id);

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

    pub(crate) fn customer_username(&self, repeatable_id: &str) -> String {
        let domain = if self.config.customer_service.user_email_domain.is_empty() {
            DEFAULT_USER_EMAIL_DOMAIN
        } else {
            &self.config.customer_service.user_email_domain
        };
        format!("user-{repeatable_id}@{domain}")
    }

    /// Owner ID the provisioner knows the customer's installation under.
    pub(crate) async fn customer_owner_id(&self, repeatable_id: &str) -> anyhow::Result<String> {
        let username = self.customer_username(repeatable_id);
        self.cws
            .login(&username, &self.config.customer_service.user_password)
            .await?;
        let customers = self.cws.my_customers().await?;
        let customer = customers
            .into_iter()
            .next()
            .context("customer-service user does not have any customer")?;
        Ok(format!("cws-{}", customer.id))
    }

    /// First installation of the logged-in customer that is not already
    /// failed or being torn down.
    pub(crate) async fn active_customer_installation(
        &self,
    ) -> anyhow::Result<Option<CwsInstallation>> {
        let installations = self.cws.installations().await?;
        Ok(installations.into_iter().find(|installation| {
            let state = InstallationState::from_wire(&installation.state);
            !state.is_deletion_phase() && state != InstallationState::CreationFailed
        }))
    }
}
