use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use spinwick_core::{CoreError, EnvironmentKind, SpinwickKind};

pub const ENV_SPINWICK_CONFIG: &str = "SPINWICK_CONFIG";

const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:8077";
const DEFAULT_BOT_USERNAME: &str = "spinwick";
const DEFAULT_TOKEN_RESERVE: u64 = 200;
const DEFAULT_SETUP_LABEL: &str = "Setup Cloud Test Server";
const DEFAULT_SETUP_HA_LABEL: &str = "Setup HA Cloud Test Server";
const DEFAULT_SETUP_CWS_LABEL: &str = "Setup Cloud Test Server With CWS";
const DEFAULT_SETUP_FAILED_MESSAGE: &str =
    "Failed to create SpinWick test server. An admin will take a look.";
const DEFAULT_DESTROYED_MESSAGE: &str = "Test server destroyed";
const DEFAULT_SIZE: &str = "miniSingleton";
const DEFAULT_HA_SIZE: &str = "miniHA";
const DEFAULT_REGISTRY_URL: &str = "https://registry.hub.docker.com";
const DEFAULT_DEPLOYMENT_NAME: &str = "cws-test";
const DEFAULT_SERVICE_NAME: &str = "cws-test-service";
const DEFAULT_INTERNAL_WEBHOOK_PORT: u16 = 8077;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpinwickConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    pub github_access_token: String,
    #[serde(default)]
    pub github_webhook_secret: String,
    #[serde(default)]
    pub org: String,
    #[serde(default = "default_bot_username")]
    pub username: String,
    #[serde(default = "default_token_reserve")]
    pub github_token_reserve: u64,
    /// Skip the org-membership check on slash commands. Local testing only.
    #[serde(default)]
    pub disable_permission_check: bool,
    /// Poll the provisioner for state changes instead of relying on webhook
    /// delivery. Used when the server is not reachable from the provisioner.
    #[serde(default)]
    pub poll_installation_state: bool,

    #[serde(default)]
    pub labels: LabelConfig,
    #[serde(default)]
    pub messages: MessageConfig,
    #[serde(default)]
    pub sizes: SizeConfig,
    #[serde(default)]
    pub pr_label_messages: Vec<LabelMessage>,

    pub provisioner: ProvisionerConfig,
    #[serde(default)]
    pub customer_service: CustomerServiceConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    pub images: ImageConfig,
    #[serde(default)]
    pub repositories: RepositoryConfig,
    #[serde(default)]
    pub kubernetes: KubernetesConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LabelConfig {
    #[serde(default = "default_setup_label")]
    pub setup: String,
    #[serde(default = "default_setup_ha_label")]
    pub setup_ha: String,
    #[serde(default = "default_setup_cws_label")]
    pub setup_with_customer_service: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            setup: default_setup_label(),
            setup_ha: default_setup_ha_label(),
            setup_with_customer_service: default_setup_cws_label(),
        }
    }
}

impl LabelConfig {
    pub fn is_spinwick_label(&self, label: &str) -> bool {
        label == self.setup || label == self.setup_ha || label == self.setup_with_customer_service
    }

    pub fn any_spinwick_label<'a>(&self, labels: impl IntoIterator<Item = &'a String>) -> bool {
        labels.into_iter().any(|label| self.is_spinwick_label(label))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageConfig {
    #[serde(default = "default_setup_failed_message")]
    pub setup_failed: String,
    #[serde(default = "default_destroyed_message")]
    pub destroyed: String,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            setup_failed: default_setup_failed_message(),
            destroyed: default_destroyed_message(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SizeConfig {
    #[serde(default = "default_size")]
    pub default: String,
    #[serde(default = "default_ha_size")]
    pub ha: String,
}

impl Default for SizeConfig {
    fn default() -> Self {
        Self {
            default: default_size(),
            ha: default_ha_size(),
        }
    }
}

/// Guidance comment posted when a configured label is newly added to a PR.
/// `USERNAME` in the message is replaced with the PR author's login.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LabelMessage {
    pub label: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProvisionerConfig {
    pub server_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub group_id: Option<String>,
    /// Base domain under which test-server DNS names are allocated.
    pub base_domain: String,
    #[serde(default)]
    pub ha_license: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CustomerServiceConfig {
    #[serde(default)]
    pub public_api_url: String,
    #[serde(default)]
    pub internal_api_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub user_password: String,
    #[serde(default)]
    pub group_id: Option<String>,
    /// Domain for the synthetic accounts created per environment.
    #[serde(default)]
    pub user_email_domain: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_url")]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: default_registry_url(),
            username: String::new(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageConfig {
    pub enterprise: String,
    pub team: String,
    #[serde(default)]
    pub customer_service: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RepositoryConfig {
    /// The paired server/webapp repositories: a `synchronize` event on one
    /// also updates sibling PRs with the same branch name in the other.
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub webapp: String,
    /// Repository-name to environment-kind overrides; repositories not
    /// listed here provision plain cloud installations (or the
    /// customer-service variant when the label asks for it).
    #[serde(default)]
    pub environment_kinds: BTreeMap<String, EnvironmentKind>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KubernetesConfig {
    #[serde(default = "default_deployment_name")]
    pub deployment_name: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_internal_webhook_port")]
    pub internal_webhook_port: u16,
    /// Extra environment injected into the workspace deployment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            deployment_name: default_deployment_name(),
            service_name: default_service_name(),
            internal_webhook_port: default_internal_webhook_port(),
            env: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NotifyConfig {
    /// Operator escalation webhook; empty disables escalation.
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default)]
    pub footer: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub json: bool,
}

impl SpinwickConfig {
    pub fn spinwick_kind_for_label(&self, label: &str) -> Option<SpinwickKind> {
        if label == self.labels.setup {
            Some(SpinwickKind::Standard)
        } else if label == self.labels.setup_ha {
            Some(SpinwickKind::Ha)
        } else if label == self.labels.setup_with_customer_service {
            Some(SpinwickKind::WithCustomerService)
        } else {
            None
        }
    }

    pub fn is_spinwick_label(&self, label: &str) -> bool {
        self.spinwick_kind_for_label(label).is_some()
    }

    pub fn spinwick_label_in<'a>(&self, labels: impl IntoIterator<Item = &'a String>) -> bool {
        labels.into_iter().any(|label| self.is_spinwick_label(label))
    }

    pub fn spinwick_kind_in<'a>(
        &self,
        labels: impl IntoIterator<Item = &'a String>,
    ) -> Option<SpinwickKind> {
        // HA wins over standard when both labels are present, matching the
        // priority the update path has always used.
        let mut found = None;
        for label in labels {
            match self.spinwick_kind_for_label(label) {
                Some(SpinwickKind::Ha) => return Some(SpinwickKind::Ha),
                Some(kind) if found.is_none() => found = Some(kind),
                _ => {}
            }
        }
        found
    }

    /// Resolves how the environment for `repo_name` is provisioned. Called
    /// once per event; the rest of the workflow dispatches on the result.
    pub fn environment_kind(&self, repo_name: &str, kind: SpinwickKind) -> EnvironmentKind {
        if let Some(overridden) = self.repositories.environment_kinds.get(repo_name) {
            return *overridden;
        }
        if kind.with_customer_service() {
            EnvironmentKind::CustomerServiceCloud
        } else {
            EnvironmentKind::PlainCloud
        }
    }

    pub fn paired_repository(&self, repo_name: &str) -> Option<&str> {
        if repo_name == self.repositories.server && !self.repositories.webapp.is_empty() {
            Some(&self.repositories.webapp)
        } else if repo_name == self.repositories.webapp && !self.repositories.server.is_empty() {
            Some(&self.repositories.server)
        } else {
            None
        }
    }

    pub fn size_for(&self, kind: SpinwickKind) -> &str {
        match kind {
            SpinwickKind::Ha => &self.sizes.ha,
            SpinwickKind::Standard | SpinwickKind::WithCustomerService => &self.sizes.default,
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.github_access_token.trim().is_empty() {
            return Err(CoreError::Configuration(
                "github_access_token must be set".to_owned(),
            ));
        }
        if self.provisioner.server_url.trim().is_empty() {
            return Err(CoreError::Configuration(
                "provisioner.server_url must be set".to_owned(),
            ));
        }
        if self.provisioner.base_domain.trim().is_empty() {
            return Err(CoreError::Configuration(
                "provisioner.base_domain must be set".to_owned(),
            ));
        }
        Ok(())
    }
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<SpinwickConfig, CoreError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|error| {
        CoreError::Configuration(format!(
            "unable to read config file '{}': {error}",
            path.display()
        ))
    })?;
    let config: SpinwickConfig = toml::from_str(&raw).map_err(|error| {
        CoreError::Configuration(format!(
            "unable to parse config file '{}': {error}",
            path.display()
        ))
    })?;
    config.validate()?;
    Ok(config)
}

fn default_listen_address() -> String {
    DEFAULT_LISTEN_ADDRESS.to_owned()
}

fn default_bot_username() -> String {
    DEFAULT_BOT_USERNAME.to_owned()
}

fn default_token_reserve() -> u64 {
    DEFAULT_TOKEN_RESERVE
}

fn default_setup_label() -> String {
    DEFAULT_SETUP_LABEL.to_owned()
}

fn default_setup_ha_label() -> String {
    DEFAULT_SETUP_HA_LABEL.to_owned()
}

fn default_setup_cws_label() -> String {
    DEFAULT_SETUP_CWS_LABEL.to_owned()
}

fn default_setup_failed_message() -> String {
    DEFAULT_SETUP_FAILED_MESSAGE.to_owned()
}

fn default_destroyed_message() -> String {
    DEFAULT_DESTROYED_MESSAGE.to_owned()
}

fn default_size() -> String {
    DEFAULT_SIZE.to_owned()
}

fn default_ha_size() -> String {
    DEFAULT_HA_SIZE.to_owned()
}

fn default_registry_url() -> String {
    DEFAULT_REGISTRY_URL.to_owned()
}

fn default_deployment_name() -> String {
    DEFAULT_DEPLOYMENT_NAME.to_owned()
}

fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.to_owned()
}

fn default_internal_webhook_port() -> u16 {
    DEFAULT_INTERNAL_WEBHOOK_PORT
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        github_access_token = "token"

        [provisioner]
        server_url = "https://provisioner.internal"
        base_domain = "spinwick.example.com"

        [images]
        enterprise = "example/enterprise"
        team = "example/team"
    "#;

    fn minimal() -> SpinwickConfig {
        toml::from_str(MINIMAL).expect("minimal config parses")
    }

    #[test]
    fn minimal_config_fills_defaults() {
        let config = minimal();
        assert_eq!(config.listen_address, DEFAULT_LISTEN_ADDRESS);
        assert_eq!(config.labels.setup, DEFAULT_SETUP_LABEL);
        assert_eq!(config.sizes.ha, DEFAULT_HA_SIZE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn label_resolution_covers_all_kinds() {
        let config = minimal();
        assert_eq!(
            config.spinwick_kind_for_label(DEFAULT_SETUP_LABEL),
            Some(SpinwickKind::Standard)
        );
        assert_eq!(
            config.spinwick_kind_for_label(DEFAULT_SETUP_HA_LABEL),
            Some(SpinwickKind::Ha)
        );
        assert_eq!(
            config.spinwick_kind_for_label(DEFAULT_SETUP_CWS_LABEL),
            Some(SpinwickKind::WithCustomerService)
        );
        assert_eq!(config.spinwick_kind_for_label("unrelated"), None);
    }

    #[test]
    fn ha_label_takes_priority_over_standard() {
        let config = minimal();
        let labels = vec![DEFAULT_SETUP_LABEL.to_owned(), DEFAULT_SETUP_HA_LABEL.to_owned()];
        assert_eq!(config.spinwick_kind_in(&labels), Some(SpinwickKind::Ha));
    }

    #[test]
    fn environment_kind_prefers_repository_override() {
        let mut config = minimal();
        config
            .repositories
            .environment_kinds
            .insert("customer-web-server".to_owned(), EnvironmentKind::KubernetesNamespace);

        assert_eq!(
            config.environment_kind("customer-web-server", SpinwickKind::Standard),
            EnvironmentKind::KubernetesNamespace
        );
        assert_eq!(
            config.environment_kind("other", SpinwickKind::WithCustomerService),
            EnvironmentKind::CustomerServiceCloud
        );
        assert_eq!(
            config.environment_kind("other", SpinwickKind::Standard),
            EnvironmentKind::PlainCloud
        );
    }

    #[test]
    fn paired_repositories_resolve_both_ways() {
        let mut config = minimal();
        config.repositories.server = "server".to_owned();
        config.repositories.webapp = "webapp".to_owned();

        assert_eq!(config.paired_repository("server"), Some("webapp"));
        assert_eq!(config.paired_repository("webapp"), Some("server"));
        assert_eq!(config.paired_repository("other"), None);
    }

    #[test]
    fn missing_token_fails_validation() {
        let mut config = minimal();
        config.github_access_token = " ".to_owned();
        assert!(config.validate().is_err());
    }
}
