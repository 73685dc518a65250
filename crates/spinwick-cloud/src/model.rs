use serde::{Deserialize, Serialize};
use spinwick_core::EnvVarMap;

/// Provider-defined installation states, translated into the orchestrator's
/// own taxonomy by the state waiters. Any state this crate does not know is
/// carried verbatim in [`InstallationState::InProgress`] and treated as
/// "still converging".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallationState {
    Stable,
    CreationFailed,
    CreationNoCompatibleClusters,
    DeletionRequested,
    DeletionInProgress,
    DeletionFailed,
    Deleted,
    InProgress(String),
}

impl InstallationState {
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "stable" => Self::Stable,
            "creation-failed" => Self::CreationFailed,
            "creation-no-compatible-clusters" => Self::CreationNoCompatibleClusters,
            "deletion-requested" => Self::DeletionRequested,
            "deletion-in-progress" => Self::DeletionInProgress,
            "deletion-failed" => Self::DeletionFailed,
            "deleted" => Self::Deleted,
            other => Self::InProgress(other.to_owned()),
        }
    }

    pub fn as_wire(&self) -> &str {
        match self {
            Self::Stable => "stable",
            Self::CreationFailed => "creation-failed",
            Self::CreationNoCompatibleClusters => "creation-no-compatible-clusters",
            Self::DeletionRequested => "deletion-requested",
            Self::DeletionInProgress => "deletion-in-progress",
            Self::DeletionFailed => "deletion-failed",
            Self::Deleted => "deleted",
            Self::InProgress(raw) => raw,
        }
    }

    /// States in which another actor is tearing the installation down (or
    /// already has). A waiter seeing one of these re-checks the PR labels.
    pub fn is_deletion_phase(&self) -> bool {
        matches!(
            self,
            Self::DeletionRequested | Self::DeletionInProgress | Self::Deleted
        )
    }
}

/// State-change notification delivered by the provisioner, keyed by
/// installation ID. Consumed at most once by whichever task is waiting on
/// that installation's channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub id: String,
    pub new_state: String,
    #[serde(default)]
    pub old_state: String,
}

impl WebhookPayload {
    pub fn state(&self) -> InstallationState {
        InstallationState::from_wire(&self.new_state)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installation {
    pub id: String,
    pub owner_id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub dns: String,
}

impl Installation {
    pub fn installation_state(&self) -> InstallationState {
        InstallationState::from_wire(&self.state)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CreateInstallationRequest {
    pub owner_id: String,
    pub version: String,
    pub image: String,
    pub dns: String,
    pub size: String,
    pub affinity: String,
    pub database: String,
    pub filestore: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<EnvVarMap>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PatchInstallationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<EnvVarMap>,
}

/// A state-change webhook subscription registered with the provisioner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Webhook {
    pub id: String,
    pub owner_id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateWebhookRequest {
    pub owner_id: String,
    pub url: String,
}
