//! Docker-registry manifest lookups. The image waiter polls
//! [`RegistryApi::manifest_digest`] until a tag exists; a missing manifest is
//! the expected answer while CI is still building, so it gets its own error
//! variant instead of being folded into generic API failures.

use async_trait::async_trait;
use thiserror::Error;

const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json";
const DIGEST_HEADER: &str = "Docker-Content-Digest";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no manifest for {image}:{tag}")]
    NotFound { image: String, tag: String },
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("registry returned status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("invalid registry url {url}: {message}")]
    InvalidUrl { url: String, message: String },
}

impl RegistryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[async_trait]
pub trait RegistryApi: Send + Sync {
    async fn manifest_digest(&self, image: &str, tag: &str) -> Result<String, RegistryError>;
}

pub struct HttpRegistryClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl HttpRegistryClient {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, RegistryError> {
        let base_url = base_url.into();
        reqwest::Url::parse(&base_url).map_err(|error| RegistryError::InvalidUrl {
            url: base_url.clone(),
            message: error.to_string(),
        })?;

        Ok(Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            username: username.into(),
            password: password.into(),
        })
    }
}

#[async_trait]
impl RegistryApi for HttpRegistryClient {
    async fn manifest_digest(&self, image: &str, tag: &str) -> Result<String, RegistryError> {
        let response = self
            .http
            .get(format!("{}/v2/{image}/manifests/{tag}", self.base_url))
            .header(reqwest::header::ACCEPT, MANIFEST_ACCEPT)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound {
                image: image.to_owned(),
                tag: tag.to_owned(),
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RegistryError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let digest = response
            .headers()
            .get(DIGEST_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        Ok(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_base_url_is_rejected_at_construction() {
        let error = HttpRegistryClient::new("not a url", "user", "pass")
            .err()
            .expect("invalid url must fail");
        assert!(matches!(error, RegistryError::InvalidUrl { .. }));
    }

    #[test]
    fn not_found_is_distinguishable() {
        let error = RegistryError::NotFound {
            image: "example/image".to_owned(),
            tag: "abc1234".to_owned(),
        };
        assert!(error.is_not_found());
        assert!(!RegistryError::Api {
            status: 500,
            message: String::new()
        }
        .is_not_found());
    }
}
