use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use spinwick_cloud::WebhookPayload;
use spinwick_github::events::{IssueCommentEvent, PingEvent, PullRequestEvent};
use spinwick_github::GithubApi;
use tracing::{debug, error, info};

use crate::config::SpinwickConfig;
use crate::env_cache::EnvVarCache;
use crate::lifecycle::LifecycleController;
use crate::registry::WebhookChannelRegistry;
use crate::signature::validate_signature;

const SIGNATURE_HEADER: &str = "X-Hub-Signature";
const EVENT_TYPE_HEADER: &str = "X-GitHub-Event";

/// The SpinWick server: HTTP surface plus the shared registries every
/// per-event task works against.
pub struct Server {
    pub config: Arc<SpinwickConfig>,
    pub github: Arc<dyn GithubApi>,
    pub controller: Arc<LifecycleController>,
    pub channels: Arc<WebhookChannelRegistry>,
    pub env_cache: Arc<EnvVarCache>,
    pub comment_lock: Arc<tokio::sync::Mutex<()>>,
    pub start_time: Instant,
}

impl Server {
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/", get(ping))
            .route("/github_event", post(github_event))
            .route("/cloud_webhooks", post(cloud_webhook))
            .with_state(Arc::clone(self))
    }
}

async fn ping(State(server): State<Arc<Server>>) -> impl IntoResponse {
    Json(json!({
        "spinwick_uptime": format!("{:?}", server.start_time.elapsed()),
    }))
}

/// Inbound GitHub events. The HMAC signature is validated against the raw
/// body before any parsing; recognized events are dispatched asynchronously
/// and acknowledged with 202 without waiting for the workflow.
async fn github_event(
    State(server): State<Arc<Server>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    match server.github.remaining_rate_limit().await {
        Ok(remaining) if remaining <= server.config.github_token_reserve => {
            error!(remaining, "rate limit reserve reached, aborting request");
            return StatusCode::SERVICE_UNAVAILABLE;
        }
        Ok(remaining) => debug!(remaining, "current rate limit"),
        Err(err) => error!(error = %err, "error getting the rate limit"),
    }

    let Some(signature) = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        error!("missing webhook signature header");
        return StatusCode::FORBIDDEN;
    };
    if let Err(err) = validate_signature(signature, &body, &server.config.github_webhook_secret) {
        error!(error = %err, "invalid webhook signature");
        return StatusCode::FORBIDDEN;
    }

    let event_type = headers
        .get(EVENT_TYPE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    match event_type {
        "ping" => match serde_json::from_slice::<PingEvent>(&body) {
            Ok(event) => info!(hook_id = ?event.hook_id, "ping event"),
            Err(err) => {
                error!(error = %err, "failed to parse ping event");
                return StatusCode::BAD_REQUEST;
            }
        },
        "pull_request" => match serde_json::from_slice::<PullRequestEvent>(&body) {
            Ok(event) if event.number != 0 => {
                info!(pr = event.number, action = %event.action, "pr event");
                let server = Arc::clone(&server);
                tokio::spawn(async move {
                    server.handle_pull_request_event(event).await;
                });
            }
            Ok(_) => {}
            Err(err) => {
                error!(error = %err, "failed to parse pull request event");
                return StatusCode::BAD_REQUEST;
            }
        },
        "issue_comment" => match serde_json::from_slice::<IssueCommentEvent>(&body) {
            Ok(event) => {
                if !event.is_pull_request() {
                    return StatusCode::ACCEPTED;
                }
                if event.action == "created" && event.comment.body.trim_start().starts_with('/') {
                    let server = Arc::clone(&server);
                    tokio::spawn(async move {
                        server.handle_slash_command(event).await;
                    });
                }
            }
            Err(err) => {
                error!(error = %err, "failed to parse issue comment event");
                return StatusCode::BAD_REQUEST;
            }
        },
        other => {
            info!(event_type = %other, "unhandled event type");
            return StatusCode::NOT_IMPLEMENTED;
        }
    }

    StatusCode::ACCEPTED
}

/// Provisioner state-change notifications, forwarded verbatim into the
/// webhook channel registry's fan-out.
async fn cloud_webhook(
    State(server): State<Arc<Server>>,
    Json(payload): Json<WebhookPayload>,
) -> StatusCode {
    debug!(
        channels = server.channels.len(),
        payload = ?payload,
        "received cloud webhook payload"
    );
    server.channels.dispatch(&payload);
    StatusCode::OK
}
