use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    #[serde(default)]
    pub creator_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SignupResponse {
    pub user: User,
    pub customer: Customer,
}

/// An installation as the customer service sees it; its `state` mirrors the
/// provisioner's state strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CwsInstallation {
    pub id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub subscription_id: String,
    #[serde(default)]
    pub customer_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CreateInstallationRequest {
    pub customer_id: String,
    pub workspace_name: String,
    pub version: String,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub api_lock: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateInstallationResponse {
    pub installation_id: String,
    #[serde(default)]
    pub token: String,
}
