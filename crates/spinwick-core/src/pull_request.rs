use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Immutable snapshot of a pull request, fetched fresh on every event. A
/// later fetch replaces the working copy; snapshots are never merged in
/// place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub repo_owner: String,
    pub repo_name: String,
    pub full_name: String,
    pub number: u64,
    pub username: String,
    pub head_ref: String,
    pub sha: String,
    pub labels: Vec<String>,
    pub state: String,
    pub url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl PullRequest {
    pub fn is_closed(&self) -> bool {
        self.state == "closed"
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|candidate| candidate == label)
    }
}
