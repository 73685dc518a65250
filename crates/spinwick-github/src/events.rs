//! Stripped-down webhook event payloads, deserializing only the fields the
//! dispatcher consumes.

use serde::Deserialize;
use time::OffsetDateTime;

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub number: u64,
    #[serde(default)]
    pub label: Option<Label>,
    pub pull_request: PullRequestPayload,
    pub repository: Repository,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueCommentEvent {
    pub action: String,
    pub issue: Issue,
    pub comment: Comment,
    pub repository: Repository,
    pub sender: Actor,
}

impl IssueCommentEvent {
    pub fn is_pull_request(&self) -> bool {
        self.issue.pull_request.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PingEvent {
    #[serde(default)]
    pub hook_id: Option<u64>,
    #[serde(default)]
    pub zen: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Label {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Actor {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub name: String,
    #[serde(default)]
    pub full_name: String,
    pub owner: Actor,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Issue {
    pub number: u64,
    #[serde(default)]
    pub pull_request: Option<PullRequestLink>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestLink {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Comment {
    pub body: String,
    pub user: Actor,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitRef {
    #[serde(rename = "ref")]
    pub branch: String,
    pub sha: String,
    #[serde(default)]
    pub repo: Option<Repository>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BaseRef {
    pub repo: Repository,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestPayload {
    pub number: u64,
    pub state: String,
    pub user: Actor,
    pub head: GitRef,
    pub base: BaseRef,
    #[serde(default)]
    pub html_url: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
}

impl PullRequestPayload {
    /// Builds the domain snapshot from the payload plus a freshly fetched
    /// label set (the payload's embedded labels can lag behind the event).
    pub fn to_model(&self, labels: Vec<String>) -> spinwick_core::PullRequest {
        spinwick_core::PullRequest {
            repo_owner: self.base.repo.owner.login.clone(),
            repo_name: self.base.repo.name.clone(),
            full_name: self
                .head
                .repo
                .as_ref()
                .map(|repo| repo.full_name.clone())
                .unwrap_or_default(),
            number: self.number,
            username: self.user.login.clone(),
            head_ref: self.head.branch.clone(),
            sha: self.head.sha.clone(),
            labels,
            state: self.state.clone(),
            url: self.html_url.clone(),
            created_at: self.created_at.unwrap_or(OffsetDateTime::UNIX_EPOCH),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LABELED_EVENT: &str = r#"{
        "action": "labeled",
        "number": 42,
        "label": { "name": "spinwick" },
        "repository": { "name": "repo", "full_name": "octo/repo", "owner": { "login": "octo" } },
        "pull_request": {
            "number": 42,
            "state": "open",
            "user": { "login": "alice" },
            "head": {
                "ref": "feature-branch",
                "sha": "f88f7bd4250b963752d615e491b7e676ce5eb7f0",
                "repo": { "name": "repo", "full_name": "alice/repo", "owner": { "login": "alice" } }
            },
            "base": { "repo": { "name": "repo", "full_name": "octo/repo", "owner": { "login": "octo" } } },
            "html_url": "https://github.com/octo/repo/pull/42",
            "created_at": "2024-05-01T10:00:00Z"
        }
    }"#;

    const COMMENT_EVENT: &str = r#"{
        "action": "created",
        "issue": { "number": 42, "pull_request": { "url": "https://api.github.com/repos/octo/repo/pulls/42" } },
        "comment": { "body": "/spinwick create", "user": { "login": "alice" } },
        "repository": { "name": "repo", "full_name": "octo/repo", "owner": { "login": "octo" } },
        "sender": { "login": "alice" }
    }"#;

    #[test]
    fn labeled_event_deserializes() {
        let event: PullRequestEvent = serde_json::from_str(LABELED_EVENT).unwrap();
        assert_eq!(event.action, "labeled");
        assert_eq!(event.label.unwrap().name, "spinwick");
        assert_eq!(event.pull_request.head.branch, "feature-branch");
    }

    #[test]
    fn payload_converts_to_domain_model() {
        let event: PullRequestEvent = serde_json::from_str(LABELED_EVENT).unwrap();
        let pr = event.pull_request.to_model(vec!["spinwick".to_owned()]);

        assert_eq!(pr.repo_owner, "octo");
        assert_eq!(pr.repo_name, "repo");
        assert_eq!(pr.full_name, "alice/repo");
        assert_eq!(pr.number, 42);
        assert_eq!(pr.head_ref, "feature-branch");
        assert_eq!(pr.sha, "f88f7bd4250b963752d615e491b7e676ce5eb7f0");
        assert!(pr.has_label("spinwick"));
        assert!(!pr.is_closed());
    }

    #[test]
    fn issue_comment_event_identifies_pull_requests() {
        let event: IssueCommentEvent = serde_json::from_str(COMMENT_EVENT).unwrap();
        assert!(event.is_pull_request());
        assert_eq!(event.comment.body, "/spinwick create");

        let plain: IssueCommentEvent = serde_json::from_str(
            &COMMENT_EVENT.replace(
                r#""pull_request": { "url": "https://api.github.com/repos/octo/repo/pulls/42" }"#,
                r#""pull_request": null"#,
            ),
        )
        .unwrap();
        assert!(!plain.is_pull_request());
    }
}
