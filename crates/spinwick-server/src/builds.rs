use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use spinwick_core::PullRequest;
use spinwick_registry::RegistryApi;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

/// Fixed polling cadence for registry lookups; not caller-configurable.
pub const IMAGE_POLL_INTERVAL: Duration = Duration::from_secs(10);

const VERSION_LEN: usize = 7;

#[derive(Debug, Error)]
pub enum WaitImageError {
    #[error("timed out waiting for {image}:{tag} to publish")]
    Timeout { image: String, tag: String },
}

/// Resolves which image version a PR's build produces and waits for it to
/// appear in the registry. Fallback across candidate images (enterprise,
/// then team) is the caller's job: it invokes `wait_for_image` once per
/// candidate under its own sub-deadline.
#[async_trait]
pub trait Builds: Send + Sync {
    fn installation_version(&self, pr: &PullRequest) -> String;
    async fn wait_for_image(
        &self,
        deadline: Instant,
        image: &str,
        tag: &str,
    ) -> Result<(), WaitImageError>;
}

pub struct RegistryBuilds {
    registry: Arc<dyn RegistryApi>,
}

impl RegistryBuilds {
    pub fn new(registry: Arc<dyn RegistryApi>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Builds for RegistryBuilds {
    fn installation_version(&self, pr: &PullRequest) -> String {
        pr.sha.chars().take(VERSION_LEN).collect()
    }

    async fn wait_for_image(
        &self,
        deadline: Instant,
        image: &str,
        tag: &str,
    ) -> Result<(), WaitImageError> {
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(WaitImageError::Timeout {
                    image: image.to_owned(),
                    tag: tag.to_owned(),
                });
            }

            let next_poll = now + IMAGE_POLL_INTERVAL;
            if next_poll >= deadline {
                tokio::time::sleep_until(deadline).await;
                return Err(WaitImageError::Timeout {
                    image: image.to_owned(),
                    tag: tag.to_owned(),
                });
            }
            tokio::time::sleep_until(next_poll).await;

            match self.registry.manifest_digest(image, tag).await {
                Ok(_) => {
                    info!(image, tag, "docker tag found, image was uploaded");
                    return Ok(());
                }
                Err(error) if error.is_not_found() => {
                    info!(image, tag, "docker tag for the build not found, waiting a bit more");
                }
                Err(error) => {
                    // Registry hiccups are transient; the deadline is the
                    // only thing that stops this loop.
                    warn!(image, tag, error = %error, "registry lookup failed, retrying");
                }
            }
        }
    }
}

/// Fixed-version builds used for local development and testing, enabled via
/// the build-override environment variable.
pub struct MockedBuilds {
    version: String,
}

impl MockedBuilds {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }
}

#[async_trait]
impl Builds for MockedBuilds {
    fn installation_version(&self, _pr: &PullRequest) -> String {
        self.version.clone()
    }

    async fn wait_for_image(
        &self,
        _deadline: Instant,
        _image: &str,
        _tag: &str,
    ) -> Result<(), WaitImageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use spinwick_registry::RegistryError;
    use time::OffsetDateTime;

    struct ScriptedRegistry {
        calls: Mutex<usize>,
        not_found_polls: usize,
        transient_error_polls: usize,
    }

    impl ScriptedRegistry {
        fn not_found_then_found(polls: usize) -> Self {
            Self {
                calls: Mutex::new(0),
                not_found_polls: polls,
                transient_error_polls: 0,
            }
        }

        fn errors_then_found(polls: usize) -> Self {
            Self {
                calls: Mutex::new(0),
                not_found_polls: 0,
                transient_error_polls: polls,
            }
        }

        fn call_count(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl RegistryApi for ScriptedRegistry {
        async fn manifest_digest(&self, image: &str, tag: &str) -> Result<String, RegistryError> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls <= self.not_found_polls {
                return Err(RegistryError::NotFound {
                    image: image.to_owned(),
                    tag: tag.to_owned(),
                });
            }
            if *calls <= self.transient_error_polls {
                return Err(RegistryError::Api {
                    status: 500,
                    message: "upstream unavailable".to_owned(),
                });
            }
            Ok("sha256:abc".to_owned())
        }
    }

    fn pr(sha: &str) -> PullRequest {
        PullRequest {
            repo_owner: "octo".to_owned(),
            repo_name: "server".to_owned(),
            full_name: "octo/server".to_owned(),
            number: 1,
            username: "alice".to_owned(),
            head_ref: "feature".to_owned(),
            sha: sha.to_owned(),
            labels: Vec::new(),
            state: "open".to_owned(),
            url: String::new(),
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn installation_version_is_the_short_sha() {
        let builds = RegistryBuilds::new(Arc::new(ScriptedRegistry::not_found_then_found(0)));
        assert_eq!(
            builds.installation_version(&pr("f88f7bd4250b963752d615e491b7e676ce5eb7f0")),
            "f88f7bd"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_the_poll_after_the_tag_appears() {
        let registry = Arc::new(ScriptedRegistry::not_found_then_found(3));
        let builds = RegistryBuilds::new(registry.clone());

        let deadline = Instant::now() + Duration::from_secs(120);
        builds
            .wait_for_image(deadline, "example/enterprise", "f88f7bd")
            .await
            .expect("image appears before the deadline");
        assert_eq!(registry.call_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_registry_errors_do_not_abort_the_wait() {
        let registry = Arc::new(ScriptedRegistry::errors_then_found(2));
        let builds = RegistryBuilds::new(registry.clone());

        let deadline = Instant::now() + Duration::from_secs(120);
        builds
            .wait_for_image(deadline, "example/enterprise", "f88f7bd")
            .await
            .expect("transient errors are retried");
        assert_eq!(registry.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_deadline_times_out_without_polling() {
        let registry = Arc::new(ScriptedRegistry::not_found_then_found(0));
        let builds = RegistryBuilds::new(registry.clone());

        let error = builds
            .wait_for_image(Instant::now(), "example/enterprise", "f88f7bd")
            .await
            .expect_err("expired deadline must time out");
        assert!(matches!(error, WaitImageError::Timeout { .. }));
        assert_eq!(registry.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cuts_off_an_image_that_never_appears() {
        let registry = Arc::new(ScriptedRegistry::not_found_then_found(usize::MAX));
        let builds = RegistryBuilds::new(registry.clone());

        let error = builds
            .wait_for_image(
                Instant::now() + Duration::from_secs(35),
                "example/enterprise",
                "f88f7bd",
            )
            .await
            .expect_err("missing image must time out");
        assert!(matches!(error, WaitImageError::Timeout { .. }));
        assert_eq!(registry.call_count(), 3);
    }
}
