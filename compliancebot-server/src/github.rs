use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

const GITHUB_API_BASE: &str = "https://api.github.com";
const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";
const USER_AGENT: &str = "aiwa-compliancebot/0.1.0";

/// GitHub App client: RS256 app JWTs exchanged for cached installation
/// tokens, and the handful of REST operations the bot performs.
#[derive(Clone)]
pub struct GitHubClient {
    client: Client,
    app_id: u64,
    private_key: String,
    token_cache: Arc<RwLock<HashMap<u64, (String, SystemTime)>>>,
}

#[derive(Debug, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub body: String,
    pub user: CommentUser,
}

#[derive(Debug, Deserialize)]
pub struct CommentUser {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct Issue {
    pub number: u64,
}

/// One entry of the pull request commit listing.
#[derive(Debug, Deserialize)]
pub struct PrCommit {
    pub sha: String,
    pub commit: PrCommitDetail,
}

#[derive(Debug, Deserialize)]
pub struct PrCommitDetail {
    pub message: String,
}

/// Result of probing a repository path: the decoded content, or a normal
/// "not there" outcome. Any other failure mode propagates as an error.
#[derive(Debug)]
pub enum FileProbe {
    Found(String),
    NotFound,
}

/// Committer/author identity stamped onto files the bot creates.
#[derive(Debug, Clone, Serialize)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
}

impl CommitIdentity {
    pub fn bot() -> Self {
        Self {
            name: "AiWA ComplianceBot".to_string(),
            email: "bot@aiwa.example.com".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateCommentRequest {
    body: String,
}

#[derive(Debug, Serialize)]
struct CreateIssueRequest {
    title: String,
    body: String,
}

#[derive(Debug, Serialize)]
struct CreateFileRequest {
    message: String,
    content: String,
    committer: CommitIdentity,
    author: CommitIdentity,
}

#[derive(Debug, Serialize)]
struct GitHubAppClaims {
    iss: u64,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct InstallationTokenResponse {
    token: String,
    expires_at: String,
}

#[derive(Debug, Deserialize)]
struct FileContentsResponse {
    content: String,
}

#[derive(Debug, Deserialize)]
struct AppInfoResponse {
    slug: String,
}

impl GitHubClient {
    pub fn new(app_id: u64, private_key: String) -> Self {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            app_id,
            private_key,
            token_cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn generate_jwt(&self) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("Failed to get current time")?
            .as_secs();

        let claims = GitHubAppClaims {
            iss: self.app_id,
            iat: now - 60,  // Issued 60 seconds ago to account for clock skew
            exp: now + 600, // Expires in 10 minutes
        };

        let header = Header::new(Algorithm::RS256);
        let encoding_key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .context("Failed to parse private key")?;

        encode(&header, &claims, &encoding_key).context("Failed to encode JWT")
    }

    async fn get_installation_token(&self, installation_id: u64) -> Result<String> {
        // Reuse the cached token while it has more than a 5 minute buffer left
        {
            let cache = self.token_cache.read().await;
            if let Some((token, expires_at)) = cache.get(&installation_id) {
                if expires_at
                    .duration_since(SystemTime::now())
                    .unwrap_or_default()
                    .as_secs()
                    > 300
                {
                    return Ok(token.clone());
                }
            }
        }

        let jwt = self.generate_jwt()?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            GITHUB_API_BASE, installation_id
        );

        info!("Requesting new installation access token");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", jwt))
            .header("Accept", GITHUB_ACCEPT)
            .send()
            .await
            .context("Failed to send installation token request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!(
                "GitHub App token request failed: {} - {}",
                status, error_text
            );
            return Err(anyhow!(
                "GitHub App token request failed: {} - {}",
                status,
                error_text
            ));
        }

        let token_response: InstallationTokenResponse = response
            .json()
            .await
            .context("Failed to parse installation token response")?;

        let expires_at = chrono::DateTime::parse_from_rfc3339(&token_response.expires_at)
            .context("Failed to parse token expiration")?
            .with_timezone(&Utc);
        let expires_at_system =
            UNIX_EPOCH + std::time::Duration::from_secs(expires_at.timestamp() as u64);

        {
            let mut cache = self.token_cache.write().await;
            cache.insert(
                installation_id,
                (token_response.token.clone(), expires_at_system),
            );
        }

        Ok(token_response.token)
    }

    async fn invalidate_token(&self, installation_id: u64) {
        let mut cache = self.token_cache.write().await;
        cache.remove(&installation_id);
    }

    pub async fn post_issue_comment(
        &self,
        installation_id: u64,
        repo_owner: &str,
        repo_name: &str,
        issue_number: u64,
        comment_body: &str,
    ) -> Result<Comment> {
        let url = format!(
            "{}/repos/{}/{}/issues/{}/comments",
            GITHUB_API_BASE, repo_owner, repo_name, issue_number
        );

        info!(
            "Posting comment to #{} in {}/{}",
            issue_number, repo_owner, repo_name
        );

        let token = self.get_installation_token(installation_id).await?;
        let request_body = CreateCommentRequest {
            body: comment_body.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", GITHUB_ACCEPT)
            .json(&request_body)
            .send()
            .await
            .context("Failed to send comment request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!("GitHub API error posting comment: {} - {}", status, error_text);
            return Err(anyhow!(
                "GitHub API error posting comment: {} - {}",
                status,
                error_text
            ));
        }

        let comment: Comment = response
            .json()
            .await
            .context("Failed to parse comment response")?;
        info!("Successfully posted comment with ID: {}", comment.id);

        Ok(comment)
    }

    /// List every comment on an issue or pull request, 100 per page.
    ///
    /// A 401 mid-listing usually means the installation token expired under
    /// us; the cache entry is dropped and the page retried once with a fresh
    /// token.
    pub async fn list_issue_comments(
        &self,
        installation_id: u64,
        repo_owner: &str,
        repo_name: &str,
        issue_number: u64,
    ) -> Result<Vec<Comment>> {
        let mut all_comments = Vec::new();
        let mut page = 1;
        let per_page = 100;

        info!(
            "Fetching comments for #{} in {}/{}",
            issue_number, repo_owner, repo_name
        );

        loop {
            let url = format!(
                "{}/repos/{}/{}/issues/{}/comments?page={}&per_page={}",
                GITHUB_API_BASE, repo_owner, repo_name, issue_number, page, per_page
            );

            let token = self.get_installation_token(installation_id).await?;
            let response = self.get_json(&url, &token).await?;

            let response = if response.status() == StatusCode::UNAUTHORIZED {
                warn!("Got 401 on comment page {}, retrying with fresh token", page);
                self.invalidate_token(installation_id).await;
                let fresh_token = self.get_installation_token(installation_id).await?;
                self.get_json(&url, &fresh_token).await?
            } else {
                response
            };

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response.text().await.unwrap_or_default();
                error!(
                    "GitHub API error fetching comments: {} - {}",
                    status, error_text
                );
                return Err(anyhow!(
                    "GitHub API error fetching comments: {} - {}",
                    status,
                    error_text
                ));
            }

            let comments: Vec<Comment> = response
                .json()
                .await
                .context("Failed to parse comments response")?;
            let comments_count = comments.len();
            all_comments.extend(comments);

            // Fewer than a full page means we are on the last one
            if comments_count < per_page {
                break;
            }
            page += 1;
        }

        info!(
            "Found {} total comments on #{}",
            all_comments.len(),
            issue_number
        );
        Ok(all_comments)
    }

    /// Fetch the commits on a pull request, one page of up to 100.
    /// Pagination beyond the first page is out of scope.
    pub async fn list_pr_commits(
        &self,
        installation_id: u64,
        repo_owner: &str,
        repo_name: &str,
        pr_number: u64,
    ) -> Result<Vec<PrCommit>> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}/commits?per_page=100",
            GITHUB_API_BASE, repo_owner, repo_name, pr_number
        );

        info!(
            "Fetching commits for PR #{} in {}/{}",
            pr_number, repo_owner, repo_name
        );

        let token = self.get_installation_token(installation_id).await?;
        let response = self.get_json(&url, &token).await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!(
                "GitHub API error fetching commits: {} - {}",
                status, error_text
            );
            return Err(anyhow!(
                "GitHub API error fetching commits: {} - {}",
                status,
                error_text
            ));
        }

        let commits: Vec<PrCommit> = response
            .json()
            .await
            .context("Failed to parse commits response")?;
        info!("Found {} commits on PR #{}", commits.len(), pr_number);

        Ok(commits)
    }

    pub async fn create_issue(
        &self,
        installation_id: u64,
        repo_owner: &str,
        repo_name: &str,
        title: &str,
        body: &str,
    ) -> Result<Issue> {
        let url = format!(
            "{}/repos/{}/{}/issues",
            GITHUB_API_BASE, repo_owner, repo_name
        );

        info!("Creating issue in {}/{}", repo_owner, repo_name);

        let token = self.get_installation_token(installation_id).await?;
        let request_body = CreateIssueRequest {
            title: title.to_string(),
            body: body.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", GITHUB_ACCEPT)
            .json(&request_body)
            .send()
            .await
            .context("Failed to send issue request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!("GitHub API error creating issue: {} - {}", status, error_text);
            return Err(anyhow!(
                "GitHub API error creating issue: {} - {}",
                status,
                error_text
            ));
        }

        let issue: Issue = response
            .json()
            .await
            .context("Failed to parse issue response")?;
        info!("Successfully created issue #{}", issue.number);

        Ok(issue)
    }

    /// Probe a repository path. A 404 is the normal "create it" branch, not
    /// an error; anything else unsuccessful propagates.
    pub async fn get_file(
        &self,
        installation_id: u64,
        repo_owner: &str,
        repo_name: &str,
        path: &str,
    ) -> Result<FileProbe> {
        let url = format!(
            "{}/repos/{}/{}/contents/{}",
            GITHUB_API_BASE, repo_owner, repo_name, path
        );

        let token = self.get_installation_token(installation_id).await?;
        let response = self.get_json(&url, &token).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(FileProbe::NotFound);
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!(
                "GitHub API error fetching file {}: {} - {}",
                path, status, error_text
            );
            return Err(anyhow!(
                "GitHub API error fetching file {}: {} - {}",
                path,
                status,
                error_text
            ));
        }

        let file_response: FileContentsResponse = response
            .json()
            .await
            .context("Failed to parse file contents response")?;
        let decoded = general_purpose::STANDARD
            .decode(file_response.content.replace('\n', ""))
            .context("Failed to decode base64 file content")?;
        let content = String::from_utf8(decoded).context("File content is not valid UTF-8")?;

        Ok(FileProbe::Found(content))
    }

    pub async fn create_file(
        &self,
        installation_id: u64,
        repo_owner: &str,
        repo_name: &str,
        path: &str,
        commit_message: &str,
        content: &str,
        identity: &CommitIdentity,
    ) -> Result<()> {
        let url = format!(
            "{}/repos/{}/{}/contents/{}",
            GITHUB_API_BASE, repo_owner, repo_name, path
        );

        info!("Creating file {} in {}/{}", path, repo_owner, repo_name);

        let token = self.get_installation_token(installation_id).await?;
        let request_body = CreateFileRequest {
            message: commit_message.to_string(),
            content: general_purpose::STANDARD.encode(content),
            committer: identity.clone(),
            author: identity.clone(),
        };

        let response = self
            .client
            .put(&url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", GITHUB_ACCEPT)
            .json(&request_body)
            .send()
            .await
            .context("Failed to send file creation request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!(
                "GitHub API error creating file {}: {} - {}",
                path, status, error_text
            );
            return Err(anyhow!(
                "GitHub API error creating file {}: {} - {}",
                path,
                status,
                error_text
            ));
        }

        Ok(())
    }

    /// Resolve the login this app comments under, `{slug}[bot]`.
    pub async fn get_bot_login(&self) -> Result<String> {
        let url = format!("{}/app", GITHUB_API_BASE);

        let jwt = self.generate_jwt()?;
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", jwt))
            .header("Accept", GITHUB_ACCEPT)
            .send()
            .await
            .context("Failed to send app info request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!(
                "GitHub API error fetching app info: {} - {}",
                status, error_text
            );
            return Err(anyhow!(
                "GitHub API error fetching app info: {} - {}",
                status,
                error_text
            ));
        }

        let app_info: AppInfoResponse = response
            .json()
            .await
            .context("Failed to parse app info response")?;
        Ok(format!("{}[bot]", app_info.slug))
    }

    async fn get_json(&self, url: &str, token: &str) -> Result<reqwest::Response> {
        self.client
            .get(url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", GITHUB_ACCEPT)
            .send()
            .await
            .context("Failed to send GitHub API request")
    }
}

/// Keep only the bodies of comments authored by the bot itself, for the
/// duplicate-advisory check.
pub fn bot_comment_bodies(comments: Vec<Comment>, bot_login: &str) -> Vec<String> {
    comments
        .into_iter()
        .filter(|comment| comment.user.login == bot_login)
        .map(|comment| comment.body)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(login: &str, body: &str) -> Comment {
        Comment {
            id: 1,
            body: body.to_string(),
            user: CommentUser {
                login: login.to_string(),
            },
        }
    }

    #[test]
    fn test_bot_comment_bodies_filters_by_login() {
        let comments = vec![
            comment("aiwa-compliancebot[bot]", "⚠️ Pull Request title is too short."),
            comment("human-reviewer", "LGTM"),
            comment("aiwa-compliancebot[bot]", "⚠️ Branch name `x` does not follow conventions."),
        ];
        let bodies = bot_comment_bodies(comments, "aiwa-compliancebot[bot]");
        assert_eq!(bodies.len(), 2);
        assert!(bodies[0].contains("title is too short"));
    }

    #[test]
    fn test_bot_comment_bodies_empty_when_no_bot_comments() {
        let comments = vec![comment("human-reviewer", "LGTM")];
        assert!(bot_comment_bodies(comments, "aiwa-compliancebot[bot]").is_empty());
    }

    #[test]
    fn test_create_file_request_serializes_identity() {
        let request = CreateFileRequest {
            message: "docs: Add initial SECURITY.md".to_string(),
            content: general_purpose::STANDARD.encode("hello"),
            committer: CommitIdentity::bot(),
            author: CommitIdentity::bot(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["committer"]["name"], "AiWA ComplianceBot");
        assert_eq!(json["author"]["email"], "bot@aiwa.example.com");
        assert_eq!(json["content"], "aGVsbG8=");
    }
}
