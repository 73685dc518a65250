//! Client for the external customer-management service ("CWS"). Licensed
//! cloud environments are created through this service so the customer and
//! subscription metadata exist alongside the installation itself.

mod client;
mod model;

pub use client::{CwsApi, CwsError, HttpCwsClient};
pub use model::{
    CreateInstallationRequest, CreateInstallationResponse, Customer, CwsInstallation,
    SignupResponse, User,
};
