//! Client for the external cloud-installation provisioning service.

mod client;
mod model;

pub use client::{installation_for_owner, CloudApi, CloudError, HttpCloudClient};
pub use model::{
    CreateInstallationRequest, CreateWebhookRequest, Installation, InstallationState,
    PatchInstallationRequest, Webhook, WebhookPayload,
};
