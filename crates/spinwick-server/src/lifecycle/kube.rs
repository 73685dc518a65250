use std::time::Duration;

use anyhow::{anyhow, bail};
use spinwick_cloud::CreateWebhookRequest;
use spinwick_core::{LifecycleRequest, PullRequest};
use spinwick_kube::{workspace_deployment, workspace_service};
use tokio::time::Instant;
use tracing::{debug, info};

use super::{LifecycleController, IMAGE_WAIT};

const INGRESS_WAIT: Duration = Duration::from_secs(300);
const INGRESS_POLL_INTERVAL: Duration = Duration::from_secs(30);

impl LifecycleController {
    /// Creates a namespace-based SpinWick: one namespace per PR, a single
    /// workspace deployment behind a LoadBalancer service, plus the
    /// provisioner and payment webhooks that feed state back into it.
    pub(crate) async fn create_kube(&self, pr: &PullRequest) -> LifecycleRequest {
        let request = LifecycleRequest::new();
        let spinwick = self.spinwick_for(pr);
        let namespace = spinwick.repeatable_id.clone();

        if let Err(err) = self.cluster.ensure_namespace(&namespace).await {
            return request
                .with_error(anyhow!(err).context("error occurred while creating the namespace"))
                .should_report_error();
        }
        let request = request.with_installation_id(namespace.clone());

        let image = self.config.images.customer_service.clone();
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

        // The service goes out first so the load balancer can provision
        // while the deployment is prepared; its ingress feeds the site URL
        // and payment webhook into the workspace environment.
        let service = workspace_service(&self.config.kubernetes.service_name, &namespace);
        if let Err(err) = self.cluster.apply_service(&namespace, &service).await {
            return request
                .with_error(anyhow!(err).context("error deploying the workspace service"))
                .should_report_error();
        }

        let lb_host = match self.wait_for_ingress(&namespace).await {
            Ok(host) => host,
            Err(err) => {
                return request
                    .with_error(err.context("timed out waiting for load balancer assignment"))
                    .should_report_error();
            }
        };
        let site_url = format!("http://{lb_host}");

        let secret = match self
            .cws
            .register_payment_webhook(&site_url, &namespace)
            .await
        {
            Ok(secret) => secret,
            Err(err) => {
                return request
                    .with_error(anyhow!(err).context("error registering the payment webhook"))
                    .should_report_error();
            }
        };

        let mut env: Vec<(String, String)> = self
            .config
            .kubernetes
            .env
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        env.push(("WORKSPACE_ID".to_owned(), namespace.clone()));
        env.push(("SITE_URL".to_owned(), site_url.clone()));
        env.push(("PAYMENT_WEBHOOK_SECRET".to_owned(), secret));

        let deployment = workspace_deployment(
            &self.config.kubernetes.deployment_name,
            &namespace,
            &image,
            &tag,
            &env,
        );
        if let Err(err) = self.cluster.apply_deployment(&namespace, &deployment).await {
            return request
                .with_error(anyhow!(err).context("error deploying the workspace deployment"))
                .should_report_error();
        }
        info!(namespace = %namespace, "deployment created successfully");

        let webhook_url = format!(
            "http://{}.{}:{}/api/v1/internal/webhook",
            self.config.kubernetes.service_name, namespace, self.config.kubernetes.internal_webhook_port
        );
        if let Err(err) = self
            .cloud
            .create_webhook(&CreateWebhookRequest {
                // The namespace doubles as the owner so the hooks are easily
                // fetched again at destroy time.
                owner_id: namespace.clone(),
                url: webhook_url,
            })
            .await
        {
            return request
                .with_error(anyhow!(err).context("error creating the provisioner webhook"))
                .should_report_error();
        }

        match self
            .github
            .list_comments(&pr.repo_owner, &pr.repo_name, pr.number)
            .await
        {
            Ok(comments) => {
                self.remove_comments_containing(
                    pr,
                    &comments,
                    &["Creating a SpinWick customer-service test server"],
                )
                .await;
            }
            Err(err) => debug!(error = %err, "error getting comments"),
        }

        self.send_comment(
            pr,
            &format!("Customer-service test server created! :tada:\n\nAccess here: {site_url}"),
        )
        .await;

        request
    }

    pub(crate) async fn update_kube(&self, pr: &PullRequest) -> LifecycleRequest {
        let request = LifecycleRequest::new();
        let spinwick = self.spinwick_for(pr);
        let namespace = spinwick.repeatable_id.clone();

        match self.cluster.namespace_exists(&namespace).await {
            Ok(true) => {}
            Ok(false) => {
                return request
                    .with_error(anyhow!("no namespace found with name {namespace}"))
                    .should_report_error();
            }
            Err(err) => {
                return request
                    .with_error(anyhow!(err).context("failed while checking for the namespace"));
            }
        }
        let request = request.with_installation_id(namespace.clone());

        match self
            .github
            .list_comments(&pr.repo_owner, &pr.repo_name, pr.number)
            .await
        {
            Ok(comments) => {
                self.remove_comments_containing(pr, &comments, &["New commit detected."])
                    .await;
            }
            Err(err) => debug!(error = %err, "error getting comments"),
        }
        self.send_comment(
            pr,
            "New commit detected. SpinWick will upgrade if the updated docker image is available.",
        )
        .await;

        let image = self.config.images.customer_service.clone();
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

        if let Err(err) = self
            .cluster
            .set_deployment_image(
                &namespace,
                &self.config.kubernetes.deployment_name,
                &format!("{image}:{tag}"),
            )
            .await
        {
            return request
                .with_error(anyhow!(err).context("failed while updating the deployment with the latest image"))
                .should_report_error();
        }

        match self
            .github
            .list_comments(&pr.repo_owner, &pr.repo_name, pr.number)
            .await
        {
            Ok(comments) => {
                self.remove_comments_containing(pr, &comments, &["updated with git commit"])
                    .await;
            }
            Err(err) => debug!(error = %err, "error getting comments"),
        }

        let lb_host = match self.wait_for_ingress(&namespace).await {
            Ok(host) => host,
            Err(err) => {
                return request
                    .with_error(err.context("timed out waiting for load balancer assignment"))
                    .should_report_error();
            }
        };
        self.send_comment(
            pr,
            &format!(
                "Customer-service test server updated with git commit `{}`.\n\nAccess here: http://{lb_host}",
                pr.sha
            ),
        )
        .await;

        request
    }

    /// Destroys a namespace-based SpinWick and releases its registered
    /// notification hooks.
    pub(crate) async fn destroy_kube(&self, pr: &PullRequest) -> LifecycleRequest {
        info!("received request to destroy kubernetes namespace");
        let request = LifecycleRequest::new();
        let spinwick = self.spinwick_for(pr);
        let namespace = spinwick.repeatable_id.clone();

        match self.cluster.namespace_exists(&namespace).await {
            Ok(true) => {}
            Ok(false) => {
                // Nothing was ever provisioned; nothing to report either.
                return request.with_installation_id("");
            }
            Err(err) => {
                return request
                    .with_error(anyhow!(err).context("failed while checking for the namespace"));
            }
        }

        if let Err(err) = self.cluster.delete_namespace(&namespace).await {
            return request
                .with_error(anyhow!(err).context("failed while deleting the namespace"));
        }
        let request = request.with_installation_id(namespace.clone());
        info!(namespace = %namespace, "kubernetes namespace has been destroyed");

        let webhooks = match self.cloud.get_webhooks_by_owner(&namespace).await {
            Ok(webhooks) => webhooks,
            Err(err) => {
                return request
                    .with_error(anyhow!(err).context("failed to get the provisioner webhooks for the SpinWick"));
            }
        };
        for webhook in webhooks {
            if let Err(err) = self.cloud.delete_webhook(&webhook.id).await {
                return request
                    .with_error(anyhow!(err).context("failed to delete the provisioner webhook"));
            }
        }

        if let Err(err) = self.cws.delete_payment_webhook(&namespace).await {
            return request
                .with_error(anyhow!(err).context("failed to delete the payment webhook"));
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
        self.send_comment(pr, "SpinWick customer-service test server has been destroyed")
            .await;

        request
    }

    async fn wait_for_ingress(&self, namespace: &str) -> anyhow::Result<String> {
        let deadline = Instant::now() + INGRESS_WAIT;
        loop {
            if let Some(host) = self
                .cluster
                .load_balancer_ingress(namespace, &self.config.kubernetes.service_name)
                .await?
            {
                return Ok(host);
            }

            debug!(namespace, "no load balancer ingress found yet, waiting");
            if Instant::now() + INGRESS_POLL_INTERVAL >= deadline {
                bail!("no load balancer ingress within the wait window");
            }
            tokio::time::sleep(INGRESS_POLL_INTERVAL).await;
        }
    }
}
