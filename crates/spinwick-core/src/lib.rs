//! SpinWick domain types shared by the collaborator clients and the server.

pub mod env;
pub mod error;
pub mod identity;
pub mod kind;
pub mod pull_request;
pub mod request;

pub use env::{parse_env_arg, split_comma_separated, EnvVar, EnvVarMap};
pub use error::CoreError;
pub use identity::Spinwick;
pub use kind::{EnvironmentKind, SpinwickKind};
pub use pull_request::PullRequest;
pub use request::LifecycleRequest;
