use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{Json, Response},
    routing::post,
    Router,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{error, info, warn};

use anyhow::{Context, Result};
use compliancebot_core::{evaluate, CommitRecord, PrEventKind, PullRequestSnapshot};

use crate::github::{bot_comment_bodies, CommitIdentity, FileProbe, GitHubClient};
use crate::repo_config::resolve_config;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub action: Option<String>,
    pub pull_request: Option<PullRequestPayload>,
    pub repository: Option<RepositoryPayload>,
    pub repositories_added: Option<Vec<RepositorySummary>>,
    pub installation: Option<InstallationPayload>,
    pub sender: Option<UserPayload>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PullRequestPayload {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub head: PullRequestRef,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PullRequestRef {
    pub sha: String,
    #[serde(rename = "ref")]
    pub ref_name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RepositoryPayload {
    pub name: String,
    pub full_name: String,
    pub owner: UserPayload,
}

/// Repository entry of an `installation_repositories` payload; these carry
/// no owner object, only the `owner/name` full name.
#[derive(Debug, Deserialize, Clone)]
pub struct RepositorySummary {
    pub name: String,
    pub full_name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InstallationPayload {
    pub id: u64,
    pub account: Option<UserPayload>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UserPayload {
    pub login: String,
}

#[derive(Serialize)]
pub struct WebhookResponse {
    pub message: String,
}

type HmacSha256 = Hmac<Sha256>;

fn verify_github_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    if !signature.starts_with("sha256=") {
        return false;
    }

    let signature_hex = &signature[7..]; // Remove "sha256=" prefix

    let signature_bytes = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };

    mac.update(payload);

    // Constant-time verification
    mac.verify_slice(&signature_bytes).is_ok()
}

async fn verify_webhook_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let signature = parts
        .headers
        .get("x-hub-signature-256")
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !verify_github_signature(&state.webhook_secret, &bytes, signature) {
        error!("Invalid webhook signature");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let request = Request::from_parts(parts, axum::body::Body::from(bytes));
    Ok(next.run(request).await)
}

/// Where a webhook delivery is routed, from the event header plus the
/// payload action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventDispatch {
    PullRequest(PrEventKind),
    RepositoryCreated,
    RepositoriesAdded,
    InstallationLifecycle,
    Ignore,
}

/// The `repository` and `issue_comment` events both use a "created" action;
/// the `X-GitHub-Event` header is what actually distinguishes deliveries.
fn classify_event(event: &str, action: Option<&str>) -> EventDispatch {
    match (event, action) {
        ("pull_request", Some(action)) => action
            .parse::<PrEventKind>()
            .map(EventDispatch::PullRequest)
            .unwrap_or(EventDispatch::Ignore),
        ("repository", Some("created")) => EventDispatch::RepositoryCreated,
        ("installation_repositories", Some("added")) => EventDispatch::RepositoriesAdded,
        ("installation", _) => EventDispatch::InstallationLifecycle,
        _ => EventDispatch::Ignore,
    }
}

pub async fn github_webhook_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<WebhookResponse>, StatusCode> {
    let event_name = request
        .headers()
        .get("x-github-event")
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let (_parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    let payload: WebhookPayload =
        serde_json::from_slice(&bytes).map_err(|_| StatusCode::BAD_REQUEST)?;

    info!("Received {} webhook, action: {:?}", event_name, payload.action);

    match classify_event(&event_name, payload.action.as_deref()) {
        EventDispatch::PullRequest(kind) => {
            if let (Some(pr), Some(repo), Some(installation)) = (
                payload.pull_request,
                payload.repository,
                payload.installation,
            ) {
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) =
                        process_pull_request(state, installation.id, repo, pr, kind).await
                    {
                        error!("Failed to process pull request event: {}", e);
                    }
                });
            } else {
                warn!("Pull request event missing pull_request, repository, or installation data");
            }
        }
        EventDispatch::RepositoryCreated => {
            if let (Some(repo), Some(installation)) = (payload.repository, payload.installation) {
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = process_repository_created(state, installation.id, repo).await {
                        error!("Failed to provision new repository: {}", e);
                    }
                });
            } else {
                warn!("Repository event missing repository or installation data");
            }
        }
        EventDispatch::RepositoriesAdded => {
            if let (Some(repos), Some(installation)) =
                (payload.repositories_added, payload.installation)
            {
                if let Some(account) = &installation.account {
                    info!("App installed on new repositories for {}", account.login);
                }
                let state = state.clone();
                tokio::spawn(async move {
                    process_repositories_added(state, installation.id, repos).await;
                });
            } else {
                warn!("Installation repositories event missing repository list or installation");
            }
        }
        EventDispatch::InstallationLifecycle => {
            let account = payload
                .installation
                .and_then(|installation| installation.account)
                .map(|account| account.login)
                .unwrap_or_else(|| "unknown".to_string());
            info!("Installation event from {}", account);
        }
        EventDispatch::Ignore => {
            info!(
                "Ignoring webhook event: {} / {:?}",
                event_name, payload.action
            );
        }
    }

    Ok(Json(WebhookResponse {
        message: "Webhook received".to_string(),
    }))
}

/// Evaluate the compliance rules for one pull request event and post one
/// advisory comment per violation. A failed comment is logged and must not
/// block the remaining violations.
async fn process_pull_request(
    state: Arc<AppState>,
    installation_id: u64,
    repo: RepositoryPayload,
    pr: PullRequestPayload,
    kind: PrEventKind,
) -> Result<()> {
    info!(
        "Evaluating compliance for PR #{} in {} ({})",
        pr.number, repo.full_name, kind
    );

    let client = &state.github_client;
    let repo_owner = &repo.owner.login;
    let repo_name = &repo.name;

    let config = resolve_config(
        client,
        installation_id,
        repo_owner,
        repo_name,
        &state.default_config,
    )
    .await?;

    // A failed commit listing skips the commit rule, not the whole event
    let commits: Vec<CommitRecord> =
        if matches!(kind, PrEventKind::Opened | PrEventKind::Synchronize) {
            match client
                .list_pr_commits(installation_id, repo_owner, repo_name, pr.number)
                .await
            {
                Ok(listing) => listing
                    .iter()
                    .map(|item| CommitRecord::new(item.sha.clone(), &item.commit.message))
                    .collect(),
                Err(e) => {
                    error!("Failed to check commit messages: {}", e);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

    // The length rules deduplicate against prior bot comments; only the
    // event kinds they apply to pay for the listing.
    let existing_bot_comments = if matches!(kind, PrEventKind::Opened | PrEventKind::Edited) {
        fetch_bot_comment_bodies(client, installation_id, repo_owner, repo_name, pr.number).await
    } else {
        Vec::new()
    };

    let snapshot = PullRequestSnapshot {
        repo_full_name: repo.full_name.clone(),
        number: pr.number,
        branch_name: pr.head.ref_name.clone(),
        title: pr.title.clone(),
        body: pr.body.clone(),
        event_kind: kind,
    };

    let violations = evaluate(&snapshot, &commits, &config, &existing_bot_comments)
        .with_context(|| format!("configuration for {} is invalid", repo.full_name))?;

    if violations.is_empty() {
        info!("PR #{} in {} is compliant", pr.number, repo.full_name);
        return Ok(());
    }

    for violation in &violations {
        if violation.commit_refs.is_empty() {
            warn!(
                "{:?} violation in {}#{}",
                violation.rule, repo.full_name, pr.number
            );
        } else {
            warn!(
                "{:?} violation in {}#{} (commits: {})",
                violation.rule,
                repo.full_name,
                pr.number,
                violation.commit_refs.join(", ")
            );
        }

        if let Err(e) = client
            .post_issue_comment(
                installation_id,
                repo_owner,
                repo_name,
                pr.number,
                &violation.message,
            )
            .await
        {
            error!(
                "Failed to post {:?} comment on {}#{}: {}",
                violation.rule, repo.full_name, pr.number, e
            );
        }
    }

    Ok(())
}

/// Listing failures degrade to an empty list: the bot is advisory, and a
/// duplicate warning beats a silently suppressed one.
async fn fetch_bot_comment_bodies(
    client: &GitHubClient,
    installation_id: u64,
    repo_owner: &str,
    repo_name: &str,
    pr_number: u64,
) -> Vec<String> {
    let bot_login = match client.get_bot_login().await {
        Ok(login) => login,
        Err(e) => {
            error!("Failed to resolve bot login: {}", e);
            return Vec::new();
        }
    };

    match client
        .list_issue_comments(installation_id, repo_owner, repo_name, pr_number)
        .await
    {
        Ok(comments) => bot_comment_bodies(comments, &bot_login),
        Err(e) => {
            error!(
                "Failed to list comments on {}/{}#{}: {}",
                repo_owner, repo_name, pr_number, e
            );
            Vec::new()
        }
    }
}

/// Ensure the baseline files exist and open the setup checklist issue in a
/// newly created repository. Each file and the issue are independently
/// fallible; there is no rollback.
async fn process_repository_created(
    state: Arc<AppState>,
    installation_id: u64,
    repo: RepositoryPayload,
) -> Result<()> {
    info!("Repository created: {}", repo.full_name);

    let client = &state.github_client;
    let repo_owner = &repo.owner.login;
    let repo_name = &repo.name;

    let config = resolve_config(
        client,
        installation_id,
        repo_owner,
        repo_name,
        &state.default_config,
    )
    .await?;

    let identity = CommitIdentity::bot();
    for (path, content) in &config.ensure_files {
        match client
            .get_file(installation_id, repo_owner, repo_name, path)
            .await
        {
            Ok(FileProbe::Found(_)) => {
                info!("File {} already exists in {}", path, repo.full_name);
            }
            Ok(FileProbe::NotFound) => {
                let commit_message = format!("docs: Add initial {}", path);
                match client
                    .create_file(
                        installation_id,
                        repo_owner,
                        repo_name,
                        path,
                        &commit_message,
                        content,
                        &identity,
                    )
                    .await
                {
                    Ok(()) => info!("Created {} in {}", path, repo.full_name),
                    Err(e) => error!(
                        "Failed to ensure/create file {} in {}: {}",
                        path, repo.full_name, e
                    ),
                }
            }
            Err(e) => error!(
                "Failed to ensure/create file {} in {}: {}",
                path, repo.full_name, e
            ),
        }
    }

    match client
        .create_issue(
            installation_id,
            repo_owner,
            repo_name,
            &config.new_repo_issue_title,
            &config.new_repo_issue_body,
        )
        .await
    {
        Ok(_) => info!("Created setup checklist issue in {}", repo.full_name),
        Err(e) => error!(
            "Failed to create setup issue in {}: {}",
            repo.full_name, e
        ),
    }

    Ok(())
}

/// Open the setup checklist issue in each repository newly added to the
/// installation. Per-repository failures do not block siblings.
async fn process_repositories_added(
    state: Arc<AppState>,
    installation_id: u64,
    repos: Vec<RepositorySummary>,
) {
    let client = &state.github_client;

    for repo in repos {
        info!("New repo added to installation: {}", repo.full_name);

        let Some(repo_owner) = repo.full_name.split('/').next().filter(|s| !s.is_empty()) else {
            warn!("Cannot determine owner of {}", repo.full_name);
            continue;
        };

        let config = match resolve_config(
            client,
            installation_id,
            repo_owner,
            &repo.name,
            &state.default_config,
        )
        .await
        {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to resolve config for {}: {}", repo.full_name, e);
                continue;
            }
        };

        match client
            .create_issue(
                installation_id,
                repo_owner,
                &repo.name,
                &config.new_repo_issue_title,
                &config.new_repo_issue_body,
            )
            .await
        {
            Ok(_) => info!("Created setup checklist issue in {}", repo.full_name),
            Err(e) => error!(
                "Failed to create setup issue in {}: {}",
                repo.full_name, e
            ),
        }
    }
}

pub fn webhook_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhook", post(github_webhook_handler))
        .route_layer(middleware::from_fn_with_state(
            middleware_state,
            verify_webhook_signature,
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sign(secret: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_signature_round_trip() {
        let secret = "webhook-secret";
        let payload = br#"{"action":"opened"}"#;
        let signature = sign(secret, payload);
        assert!(verify_github_signature(secret, payload, &signature));
    }

    #[test]
    fn test_signature_rejects_wrong_secret() {
        let payload = br#"{"action":"opened"}"#;
        let signature = sign("right-secret", payload);
        assert!(!verify_github_signature("wrong-secret", payload, &signature));
    }

    #[test]
    fn test_signature_rejects_tampered_payload() {
        let secret = "webhook-secret";
        let signature = sign(secret, br#"{"action":"opened"}"#);
        assert!(!verify_github_signature(
            secret,
            br#"{"action":"edited"}"#,
            &signature
        ));
    }

    #[test]
    fn test_signature_requires_sha256_prefix() {
        let secret = "webhook-secret";
        let payload = b"data";
        let signature = sign(secret, payload);
        assert!(!verify_github_signature(
            secret,
            payload,
            signature.trim_start_matches("sha256=")
        ));
    }

    #[test]
    fn test_signature_rejects_invalid_hex() {
        assert!(!verify_github_signature("secret", b"data", "sha256=zzzz"));
    }

    #[test]
    fn test_classify_pull_request_actions() {
        assert_eq!(
            classify_event("pull_request", Some("opened")),
            EventDispatch::PullRequest(PrEventKind::Opened)
        );
        assert_eq!(
            classify_event("pull_request", Some("synchronize")),
            EventDispatch::PullRequest(PrEventKind::Synchronize)
        );
        // Actions the rules do not cover are ignored, not errors
        assert_eq!(
            classify_event("pull_request", Some("closed")),
            EventDispatch::Ignore
        );
        assert_eq!(classify_event("pull_request", None), EventDispatch::Ignore);
    }

    #[test]
    fn test_classify_created_action_depends_on_event_header() {
        // "created" on the repository event provisions the repo; the same
        // action on a comment event must not.
        assert_eq!(
            classify_event("repository", Some("created")),
            EventDispatch::RepositoryCreated
        );
        assert_eq!(
            classify_event("issue_comment", Some("created")),
            EventDispatch::Ignore
        );
    }

    #[test]
    fn test_classify_installation_events() {
        assert_eq!(
            classify_event("installation_repositories", Some("added")),
            EventDispatch::RepositoriesAdded
        );
        assert_eq!(
            classify_event("installation_repositories", Some("removed")),
            EventDispatch::Ignore
        );
        assert_eq!(
            classify_event("installation", Some("created")),
            EventDispatch::InstallationLifecycle
        );
    }

    #[test]
    fn test_pull_request_payload_deserialization() {
        let json_payload = json!({
            "action": "opened",
            "pull_request": {
                "number": 7,
                "title": "Fix bug",
                "body": null,
                "head": {
                    "sha": "0123456789abcdef",
                    "ref": "feature-x"
                },
                "base": {
                    "sha": "fedcba9876543210",
                    "ref": "main"
                }
            },
            "repository": {
                "name": "widgets",
                "full_name": "aiwa/widgets",
                "owner": {
                    "login": "aiwa"
                }
            },
            "sender": {
                "login": "developer123"
            },
            "installation": {
                "id": 999
            }
        });

        let payload: WebhookPayload = serde_json::from_value(json_payload).unwrap();
        assert_eq!(payload.action.as_deref(), Some("opened"));

        let pr = payload.pull_request.unwrap();
        assert_eq!(pr.number, 7);
        assert_eq!(pr.head.ref_name, "feature-x");
        assert!(pr.body.is_none());

        let repo = payload.repository.unwrap();
        assert_eq!(repo.owner.login, "aiwa");
        assert_eq!(payload.installation.unwrap().id, 999);
    }

    #[test]
    fn test_repository_created_payload_deserialization() {
        let json_payload = json!({
            "action": "created",
            "repository": {
                "name": "new-service",
                "full_name": "aiwa/new-service",
                "owner": {
                    "login": "aiwa"
                }
            },
            "installation": {
                "id": 42
            },
            "sender": {
                "login": "founder"
            }
        });

        let payload: WebhookPayload = serde_json::from_value(json_payload).unwrap();
        assert!(payload.pull_request.is_none());
        assert_eq!(payload.repository.unwrap().name, "new-service");
    }

    #[test]
    fn test_installation_repositories_payload_deserialization() {
        let json_payload = json!({
            "action": "added",
            "installation": {
                "id": 11,
                "account": {
                    "login": "aiwa"
                }
            },
            "repositories_added": [
                { "name": "alpha", "full_name": "aiwa/alpha" },
                { "name": "beta", "full_name": "aiwa/beta" }
            ]
        });

        let payload: WebhookPayload = serde_json::from_value(json_payload).unwrap();
        let repos = payload.repositories_added.unwrap();
        assert_eq!(repos.len(), 2);
        assert_eq!(repos[1].full_name, "aiwa/beta");
        assert_eq!(
            payload.installation.unwrap().account.unwrap().login,
            "aiwa"
        );
    }
}
