//! GitHub REST collaborator. The server core only sees the [`GithubApi`]
//! trait and the slim webhook event models in [`events`].

mod client;
pub mod events;

pub use client::{GithubApi, GithubError, HttpGithubClient, IssueComment};
