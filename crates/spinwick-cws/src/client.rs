use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::model::{
    CreateInstallationRequest, CreateInstallationResponse, Customer, CwsInstallation,
    SignupResponse, User,
};

const SESSION_HEADER: &str = "Token";
const INTERNAL_API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Error)]
pub enum CwsError {
    #[error("customer service request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("customer service returned status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("customer service call requires a prior login")]
    NotLoggedIn,
}

#[async_trait]
pub trait CwsApi: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> Result<User, CwsError>;
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignupResponse, CwsError>;
    async fn verify_user(&self, user_id: &str) -> Result<(), CwsError>;
    async fn my_customers(&self) -> Result<Vec<Customer>, CwsError>;
    async fn installations(&self) -> Result<Vec<CwsInstallation>, CwsError>;
    async fn create_installation(
        &self,
        request: &CreateInstallationRequest,
    ) -> Result<CreateInstallationResponse, CwsError>;
    async fn delete_installation(&self, id: &str) -> Result<(), CwsError>;
    async fn register_payment_webhook(&self, url: &str, owner: &str) -> Result<String, CwsError>;
    async fn delete_payment_webhook(&self, owner: &str) -> Result<(), CwsError>;
}

/// Talks to the customer service over its public API (session-token
/// authenticated, obtained by `login`) and its internal API (static API
/// key).
pub struct HttpCwsClient {
    http: reqwest::Client,
    public_url: String,
    internal_url: String,
    api_key: String,
    session_token: Mutex<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct RegisterWebhookResponse {
    secret: String,
}

impl HttpCwsClient {
    pub fn new(
        public_url: impl Into<String>,
        internal_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            public_url: public_url.into().trim_end_matches('/').to_owned(),
            internal_url: internal_url.into().trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
            session_token: Mutex::new(None),
        }
    }

    fn bearer(&self) -> Result<String, CwsError> {
        self.session_token
            .lock()
            .expect("cws session token lock poisoned")
            .as_ref()
            .map(|token| format!("BEARER {token}"))
            .ok_or(CwsError::NotLoggedIn)
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, CwsError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(CwsError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl CwsApi for HttpCwsClient {
    async fn login(&self, email: &str, password: &str) -> Result<User, CwsError> {
        let response = self
            .http
            .post(format!("{}/api/v1/users/login", self.public_url))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let response = self.check(response).await?;

        if let Some(token) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            *self
                .session_token
                .lock()
                .expect("cws session token lock poisoned") = Some(token.to_owned());
        }

        Ok(response.json().await?)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignupResponse, CwsError> {
        let response = self
            .http
            .post(format!("{}/api/v1/users/signup", self.public_url))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        Ok(self.check(response).await?.json().await?)
    }

    async fn verify_user(&self, user_id: &str) -> Result<(), CwsError> {
        let response = self
            .http
            .post(format!(
                "{}/api/v1/internal/users/{user_id}/verify",
                self.internal_url
            ))
            .header(INTERNAL_API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        self.check(response).await.map(|_| ())
    }

    async fn my_customers(&self) -> Result<Vec<Customer>, CwsError> {
        let response = self
            .http
            .get(format!("{}/api/v1/customers", self.public_url))
            .header(reqwest::header::AUTHORIZATION, self.bearer()?)
            .send()
            .await?;
        Ok(self.check(response).await?.json().await?)
    }

    async fn installations(&self) -> Result<Vec<CwsInstallation>, CwsError> {
        let response = self
            .http
            .get(format!("{}/api/v1/installations", self.public_url))
            .header(reqwest::header::AUTHORIZATION, self.bearer()?)
            .send()
            .await?;
        Ok(self.check(response).await?.json().await?)
    }

    async fn create_installation(
        &self,
        request: &CreateInstallationRequest,
    ) -> Result<CreateInstallationResponse, CwsError> {
        let response = self
            .http
            .post(format!("{}/api/v1/internal/installations", self.internal_url))
            .header(INTERNAL_API_KEY_HEADER, &self.api_key)
            .json(request)
            .send()
            .await?;
        Ok(self.check(response).await?.json().await?)
    }

    async fn delete_installation(&self, id: &str) -> Result<(), CwsError> {
        let response = self
            .http
            .delete(format!(
                "{}/api/v1/internal/installations/{id}",
                self.internal_url
            ))
            .header(INTERNAL_API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        self.check(response).await.map(|_| ())
    }

    async fn register_payment_webhook(&self, url: &str, owner: &str) -> Result<String, CwsError> {
        let response = self
            .http
            .post(format!(
                "{}/api/v1/internal/payment-webhook",
                self.internal_url
            ))
            .header(INTERNAL_API_KEY_HEADER, &self.api_key)
            .json(&json!({ "url": url, "owner": owner }))
            .send()
            .await?;
        let parsed: RegisterWebhookResponse = self.check(response).await?.json().await?;
        Ok(parsed.secret)
    }

    async fn delete_payment_webhook(&self, owner: &str) -> Result<(), CwsError> {
        let response = self
            .http
            .delete(format!(
                "{}/api/v1/internal/payment-webhook/{owner}",
                self.internal_url
            ))
            .header(INTERNAL_API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        self.check(response).await.map(|_| ())
    }
}
