pub mod config;
pub mod github;
pub mod repo_config;
pub mod webhook;

use compliancebot_core::ComplianceConfig;

pub use github::GitHubClient;

pub struct AppState {
    pub github_client: GitHubClient,
    pub webhook_secret: String,
    /// Built-in rule defaults, constructed once at startup; per-repository
    /// overlays are merged over this for each event.
    pub default_config: ComplianceConfig,
}
