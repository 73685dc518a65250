use async_trait::async_trait;
use thiserror::Error;

use crate::model::{
    CreateInstallationRequest, CreateWebhookRequest, Installation, PatchInstallationRequest,
    Webhook,
};

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("provisioner request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provisioner returned status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("found {count} installations with owner {owner_id}")]
    MultipleInstallations { owner_id: String, count: usize },
}

#[async_trait]
pub trait CloudApi: Send + Sync {
    async fn create_installation(
        &self,
        request: &CreateInstallationRequest,
    ) -> Result<Installation, CloudError>;
    async fn get_installation(&self, id: &str) -> Result<Option<Installation>, CloudError>;
    async fn get_installations_by_owner(
        &self,
        owner_id: &str,
    ) -> Result<Vec<Installation>, CloudError>;
    async fn update_installation(
        &self,
        id: &str,
        request: &PatchInstallationRequest,
    ) -> Result<Installation, CloudError>;
    async fn delete_installation(&self, id: &str) -> Result<(), CloudError>;
    async fn create_webhook(&self, request: &CreateWebhookRequest) -> Result<Webhook, CloudError>;
    async fn get_webhooks_by_owner(&self, owner_id: &str) -> Result<Vec<Webhook>, CloudError>;
    async fn delete_webhook(&self, id: &str) -> Result<(), CloudError>;
}

/// Resolves the single installation owned by `owner_id`, if any. More than
/// one match is an error: owner IDs are derived from the repeatable SpinWick
/// ID and must identify at most one environment.
pub async fn installation_for_owner(
    client: &dyn CloudApi,
    owner_id: &str,
) -> Result<Option<Installation>, CloudError> {
    let mut installations = client.get_installations_by_owner(owner_id).await?;
    match installations.len() {
        0 => Ok(None),
        1 => Ok(Some(installations.remove(0))),
        count => Err(CloudError::MultipleInstallations {
            owner_id: owner_id.to_owned(),
            count,
        }),
    }
}

pub struct HttpCloudClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpCloudClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, CloudError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(CloudError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl CloudApi for HttpCloudClient {
    async fn create_installation(
        &self,
        request: &CreateInstallationRequest,
    ) -> Result<Installation, CloudError> {
        let response = self
            .http
            .post(self.url("/api/installations"))
            .header(API_KEY_HEADER, &self.api_key)
            .json(request)
            .send()
            .await?;
        Ok(self.check(response).await?.json().await?)
    }

    async fn get_installation(&self, id: &str) -> Result<Option<Installation>, CloudError> {
        let response = self
            .http
            .get(self.url(&format!("/api/installations/{id}")))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(self.check(response).await?.json().await?))
    }

    async fn get_installations_by_owner(
        &self,
        owner_id: &str,
    ) -> Result<Vec<Installation>, CloudError> {
        let response = self
            .http
            .get(self.url("/api/installations"))
            .header(API_KEY_HEADER, &self.api_key)
            .query(&[
                ("owner", owner_id),
                ("page", "0"),
                ("per_page", "100"),
                ("include_deleted", "false"),
            ])
            .send()
            .await?;
        Ok(self.check(response).await?.json().await?)
    }

    async fn update_installation(
        &self,
        id: &str,
        request: &PatchInstallationRequest,
    ) -> Result<Installation, CloudError> {
        let response = self
            .http
            .put(self.url(&format!("/api/installations/{id}")))
            .header(API_KEY_HEADER, &self.api_key)
            .json(request)
            .send()
            .await?;
        Ok(self.check(response).await?.json().await?)
    }

    async fn delete_installation(&self, id: &str) -> Result<(), CloudError> {
        let response = self
            .http
            .delete(self.url(&format!("/api/installations/{id}")))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        self.check(response).await.map(|_| ())
    }

    async fn create_webhook(&self, request: &CreateWebhookRequest) -> Result<Webhook, CloudError> {
        let response = self
            .http
            .post(self.url("/api/webhooks"))
            .header(API_KEY_HEADER, &self.api_key)
            .json(request)
            .send()
            .await?;
        Ok(self.check(response).await?.json().await?)
    }

    async fn get_webhooks_by_owner(&self, owner_id: &str) -> Result<Vec<Webhook>, CloudError> {
        let response = self
            .http
            .get(self.url("/api/webhooks"))
            .header(API_KEY_HEADER, &self.api_key)
            .query(&[("owner", owner_id)])
            .send()
            .await?;
        Ok(self.check(response).await?.json().await?)
    }

    async fn delete_webhook(&self, id: &str) -> Result<(), CloudError> {
        let response = self
            .http
            .delete(self.url(&format!("/api/webhooks/{id}")))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        self.check(response).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedOwnerClient {
        installations: Vec<Installation>,
    }

    #[async_trait]
    impl CloudApi for FixedOwnerClient {
        async fn create_installation(
            &self,
            _request: &CreateInstallationRequest,
        ) -> Result<Installation, CloudError> {
            unimplemented!("not exercised")
        }

        async fn get_installation(&self, _id: &str) -> Result<Option<Installation>, CloudError> {
            unimplemented!("not exercised")
        }

        async fn get_installations_by_owner(
            &self,
            _owner_id: &str,
        ) -> Result<Vec<Installation>, CloudError> {
            Ok(self.installations.clone())
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

    fn installation(id: &str) -> Installation {
        Installation {
            id: id.to_owned(),
            owner_id: "repo-pr-1".to_owned(),
            version: "abc1234".to_owned(),
            image: "example/image".to_owned(),
            state: "stable".to_owned(),
            dns: String::new(),
        }
    }

    #[tokio::test]
    async fn no_installations_resolves_to_none() {
        let client = FixedOwnerClient {
            installations: Vec::new(),
        };
        let found = installation_for_owner(&client, "repo-pr-1").await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn single_installation_is_returned() {
        let client = FixedOwnerClient {
            installations: vec![installation("inst-1")],
        };
        let found = installation_for_owner(&client, "repo-pr-1").await.unwrap();
        assert_eq!(found.unwrap().id, "inst-1");
    }

    #[tokio::test]
    async fn multiple_installations_are_an_error() {
        let client = FixedOwnerClient {
            installations: vec![installation("inst-1"), installation("inst-2")],
        };
        let error = installation_for_owner(&client, "repo-pr-1")
            .await
            .expect_err("two installations for one owner must fail");
        assert!(matches!(
            error,
            CloudError::MultipleInstallations { count: 2, .. }
        ));
    }
}
