use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use spinwick_core::PullRequest;
use thiserror::Error;

use crate::events::{Label, PullRequestPayload};

const DEFAULT_API_URL: &str = "https://api.github.com";
const USER_AGENT: &str = "spinwick";
const ACCEPT: &str = "application/vnd.github+json";

#[derive(Debug, Error)]
pub enum GithubError {
    #[error("github request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("github returned status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("github url error: {0}")]
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IssueComment {
    pub id: u64,
    pub body: String,
    pub user: crate::events::Actor,
}

#[async_trait]
pub trait GithubApi: Send + Sync {
    /// Fetches a fresh PR snapshot, including its current label set.
    async fn get_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<PullRequest, GithubError>;
    async fn list_comments(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<IssueComment>, GithubError>;
    async fn create_comment(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<(), GithubError>;
    async fn delete_comment(
        &self,
        owner: &str,
        repo: &str,
        comment_id: u64,
    ) -> Result<(), GithubError>;
    async fn add_label(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        label: &str,
    ) -> Result<(), GithubError>;
    async fn remove_label(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        label: &str,
    ) -> Result<(), GithubError>;
    async fn is_org_member(&self, org: &str, user: &str) -> Result<bool, GithubError>;
    /// Open PRs in `owner/repo` whose head branch is `head_ref`; used to
    /// locate sibling PRs in paired repositories.
    async fn open_pull_requests_by_head(
        &self,
        owner: &str,
        repo: &str,
        head_ref: &str,
    ) -> Result<Vec<PullRequest>, GithubError>;
    async fn remaining_rate_limit(&self) -> Result<u64, GithubError>;
}

pub struct HttpGithubClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpGithubClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(DEFAULT_API_URL, token)
    }

    pub fn with_base_url(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            token: token.into(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.base_url))
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", self.token))
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT, ACCEPT)
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, GithubError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(GithubError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn labels_for(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<String>, GithubError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/repos/{owner}/{repo}/issues/{number}/labels?per_page=100"),
            )
            .send()
            .await?;
        let labels: Vec<Label> = self.check(response).await?.json().await?;
        Ok(labels.into_iter().map(|label| label.name).collect())
    }
}

#[async_trait]
impl GithubApi for HttpGithubClient {
    async fn get_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<PullRequest, GithubError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/repos/{owner}/{repo}/pulls/{number}"),
            )
            .send()
            .await?;
        let payload: PullRequestPayload = self.check(response).await?.json().await?;
        let labels = self.labels_for(owner, repo, number).await?;
        Ok(payload.to_model(labels))
    }

    async fn list_comments(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<IssueComment>, GithubError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/repos/{owner}/{repo}/issues/{number}/comments?per_page=100"),
            )
            .send()
            .await?;
        Ok(self.check(response).await?.json().await?)
    }

    async fn create_comment(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<(), GithubError> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/repos/{owner}/{repo}/issues/{number}/comments"),
            )
            .json(&json!({ "body": body }))
            .send()
            .await?;
        self.check(response).await.map(|_| ())
    }

    async fn delete_comment(
        &self,
        owner: &str,
        repo: &str,
        comment_id: u64,
    ) -> Result<(), GithubError> {
        let response = self
            .request(
                reqwest::Method::DELETE,
                &format!("/repos/{owner}/{repo}/issues/comments/{comment_id}"),
            )
            .send()
            .await?;
        self.check(response).await.map(|_| ())
    }

    async fn add_label(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        label: &str,
    ) -> Result<(), GithubError> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/repos/{owner}/{repo}/issues/{number}/labels"),
            )
            .json(&json!({ "labels": [label] }))
            .send()
            .await?;
        self.check(response).await.map(|_| ())
    }

    async fn remove_label(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        label: &str,
    ) -> Result<(), GithubError> {
        // Labels may contain spaces, so the segment has to be percent-encoded.
        let mut url = reqwest::Url::parse(&format!(
            "{}/repos/{owner}/{repo}/issues/{number}/labels",
            self.base_url
        ))
        .map_err(|error| GithubError::Url(error.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| GithubError::Url("github base url cannot be a base".to_owned()))?
            .push(label);

        let response = self
            .http
            .delete(url)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", self.token))
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT, ACCEPT)
            .send()
            .await?;
        self.check(response).await.map(|_| ())
    }

    async fn is_org_member(&self, org: &str, user: &str) -> Result<bool, GithubError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/orgs/{org}/members/{user}"))
            .send()
            .await?;
        match response.status().as_u16() {
            204 => Ok(true),
            302 | 404 => Ok(false),
            _ => {
                self.check(response).await?;
                Ok(false)
            }
        }
    }

    async fn open_pull_requests_by_head(
        &self,
        owner: &str,
        repo: &str,
        head_ref: &str,
    ) -> Result<Vec<PullRequest>, GithubError> {
        let head = format!("{owner}:{head_ref}");
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/repos/{owner}/{repo}/pulls"),
            )
            .query(&[("state", "open"), ("head", head.as_str())])
            .send()
            .await?;
        let payloads: Vec<PullRequestPayload> = self.check(response).await?.json().await?;

        let mut pull_requests = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let labels = self.labels_for(owner, repo, payload.number).await?;
            pull_requests.push(payload.to_model(labels));
        }
        Ok(pull_requests)
    }

    async fn remaining_rate_limit(&self) -> Result<u64, GithubError> {
        #[derive(Deserialize)]
        struct RateLimitResponse {
            resources: RateLimitResources,
        }
        #[derive(Deserialize)]
        struct RateLimitResources {
            core: RateLimitCore,
        }
        #[derive(Deserialize)]
        struct RateLimitCore {
            remaining: u64,
        }

        let response = self.request(reqwest::Method::GET, "/rate_limit").send().await?;
        let parsed: RateLimitResponse = self.check(response).await?.json().await?;
        Ok(parsed.resources.core.remaining)
    }
}
