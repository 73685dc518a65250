use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::info;

pub const ADMIN_USERNAME: &str = "sysadmin";
pub const ADMIN_PASSWORD: &str = "Sys@dmin123";
pub const TEST_USERNAME: &str = "user-1";
pub const TEST_PASSWORD: &str = "User-1@123";

const REACHABILITY_WAIT: Duration = Duration::from_secs(600);
const RETRY_INTERVAL: Duration = Duration::from_secs(10);
const DIAL_TIMEOUT: Duration = Duration::from_secs(2);
const SESSION_HEADER: &str = "Token";

/// Post-creation initialization of a freshly provisioned workspace: wait for
/// its DNS name to become reachable, wait for the API to answer, then create
/// the admin and test accounts the success comment advertises.
#[async_trait]
pub trait WorkspaceBootstrap: Send + Sync {
    async fn initialize(&self, workspace_url: &str, pr_number: u64) -> anyhow::Result<()>;
}

pub struct HttpWorkspaceBootstrap {
    http: reqwest::Client,
}

impl Default for HttpWorkspaceBootstrap {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpWorkspaceBootstrap {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    async fn wait_for_dns(&self, address: &str) -> anyhow::Result<()> {
        let deadline = Instant::now() + REACHABILITY_WAIT;
        loop {
            if tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(address))
                .await
                .is_ok_and(|connected| connected.is_ok())
            {
                return Ok(());
            }

            if Instant::now() + RETRY_INTERVAL >= deadline {
                bail!("timed out waiting for {address} to become reachable");
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    async fn wait_for_ping(&self, workspace_url: &str) -> anyhow::Result<()> {
        let deadline = Instant::now() + REACHABILITY_WAIT;
        loop {
            let ready = self
                .http
                .get(format!("{workspace_url}/api/v4/system/ping"))
                .send()
                .await
                .is_ok_and(|response| response.status() == reqwest::StatusCode::OK);
            if ready {
                return Ok(());
            }

            if Instant::now() + RETRY_INTERVAL >= deadline {
                bail!("timed out waiting for an ok ping response");
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    async fn create_user(
        &self,
        workspace_url: &str,
        username: &str,
        password: &str,
        token: Option<&str>,
    ) -> anyhow::Result<ApiUser> {
        let mut request = self.http.post(format!("{workspace_url}/api/v4/users")).json(&json!({
            "username": username,
            "email": format!("{username}@example.com"),
            "password": password,
        }));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            bail!(
                "workspace user creation for {username} returned status {}",
                response.status()
            );
        }
        Ok(response.json().await?)
    }

    async fn login(&self, workspace_url: &str) -> anyhow::Result<(String, ApiUser)> {
        let response = self
            .http
            .post(format!("{workspace_url}/api/v4/users/login"))
            .json(&json!({ "login_id": ADMIN_USERNAME, "password": ADMIN_PASSWORD }))
            .send()
            .await?;
        if !response.status().is_success() {
            bail!("workspace login returned status {}", response.status());
        }

        let token = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .context("workspace login response carried no session token")?
            .to_owned();
        let user = response.json().await?;
        Ok((token, user))
    }

    async fn create_team(
        &self,
        workspace_url: &str,
        token: &str,
        name: &str,
    ) -> anyhow::Result<ApiTeam> {
        let response = self
            .http
            .post(format!("{workspace_url}/api/v4/teams"))
            .bearer_auth(token)
            .json(&json!({ "name": name, "display_name": name, "type": "O" }))
            .send()
            .await?;
        if !response.status().is_success() {
            bail!("workspace team creation returned status {}", response.status());
        }
        Ok(response.json().await?)
    }

    async fn add_team_member(
        &self,
        workspace_url: &str,
        token: &str,
        team_id: &str,
        user_id: &str,
    ) -> anyhow::Result<()> {
        let response = self
            .http
            .post(format!("{workspace_url}/api/v4/teams/{team_id}/members"))
            .bearer_auth(token)
            .json(&json!({ "team_id": team_id, "user_id": user_id }))
            .send()
            .await?;
        if !response.status().is_success() {
            bail!(
                "adding workspace team member returned status {}",
                response.status()
            );
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiTeam {
    id: String,
}

#[async_trait]
impl WorkspaceBootstrap for HttpWorkspaceBootstrap {
    async fn initialize(&self, workspace_url: &str, pr_number: u64) -> anyhow::Result<()> {
        info!(url = workspace_url, "initializing test workspace");

        let host = reqwest::Url::parse(workspace_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_owned))
            .with_context(|| format!("unable to parse workspace url {workspace_url}"))?;
        self.wait_for_dns(&format!("{host}:443"))
            .await
            .context("timed out waiting for DNS to propagate for installation")?;
        self.wait_for_ping(workspace_url)
            .await
            .context("failed to get workspace ping response")?;

        self.create_user(workspace_url, ADMIN_USERNAME, ADMIN_PASSWORD, None)
            .await
            .context("failed to create initial admin user")?;
        let (token, admin) = self
            .login(workspace_url)
            .await
            .context("failed to log in with initial admin user")?;

        let team_name = format!("pr{pr_number}");
        let team = self
            .create_team(workspace_url, &token, &team_name)
            .await
            .context("failed to create initial team")?;
        self.add_team_member(workspace_url, &token, &team.id, &admin.id)
            .await
            .context("failed adding admin user to initial team")?;

        let test_user = self
            .create_user(workspace_url, TEST_USERNAME, TEST_PASSWORD, Some(&token))
            .await
            .context("failed to create standard test user")?;
        self.add_team_member(workspace_url, &token, &team.id, &test_user.id)
            .await
            .context("failed adding standard test user to initial team")?;

        info!("workspace configuration complete");
        Ok(())
    }
}
