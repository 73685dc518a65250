use spinwick_core::PullRequest;
use spinwick_github::{GithubApi, IssueComment};
use tracing::{error, info};

/// True when `username` has already posted a comment containing `text`.
pub fn contains_message_from(comments: &[IssueComment], username: &str, text: &str) -> bool {
    comments
        .iter()
        .any(|comment| comment.user.login == username && comment.body.contains(text))
}

/// Deletes this bot's old comments whose body contains any of `messages`.
/// Pruning keeps the PR conversation readable when workflows repost similar
/// status comments; deletion failures are logged and never abort a workflow.
pub async fn remove_comments_with_messages(
    github: &dyn GithubApi,
    pr: &PullRequest,
    comments: &[IssueComment],
    bot_username: &str,
    messages: &[&str],
) {
    info!(pr = pr.number, "removing old SpinWick comments");
    for comment in comments {
        if comment.user.login != bot_username {
            continue;
        }
        if !messages.iter().any(|message| comment.body.contains(message)) {
            continue;
        }

        info!(comment_id = comment.id, "removing old SpinWick comment");
        if let Err(err) =
            github.delete_comment(&pr.repo_owner, &pr.repo_name, comment.id).await
        {
            error!(comment_id = comment.id, error = %err, "unable to remove old SpinWick comment");
        }
    }
}
