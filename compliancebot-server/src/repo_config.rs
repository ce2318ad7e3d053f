use anyhow::{Context, Result};
use compliancebot_core::{ComplianceConfig, ConfigOverlay};
use tracing::info;

use crate::github::{FileProbe, GitHubClient};

/// Repository-local configuration file, merged over the built-in defaults.
pub const REPO_CONFIG_PATH: &str = ".github/aiwa-compliance.yml";

/// Resolve the effective configuration for one repository.
///
/// Absent file: the defaults apply unchanged. Present file: parsed as a
/// partial overlay where each missing key falls back to the corresponding
/// default. A present-but-broken file is a configuration error and aborts
/// the event; defaults are not silently substituted for it.
pub async fn resolve_config(
    client: &GitHubClient,
    installation_id: u64,
    repo_owner: &str,
    repo_name: &str,
    defaults: &ComplianceConfig,
) -> Result<ComplianceConfig> {
    match client
        .get_file(installation_id, repo_owner, repo_name, REPO_CONFIG_PATH)
        .await?
    {
        FileProbe::NotFound => Ok(defaults.clone()),
        FileProbe::Found(text) => {
            info!(
                "Using repository configuration from {} in {}/{}",
                REPO_CONFIG_PATH, repo_owner, repo_name
            );
            let overlay = parse_overlay(&text).with_context(|| {
                format!("invalid {} in {}/{}", REPO_CONFIG_PATH, repo_owner, repo_name)
            })?;
            Ok(defaults.with_overlay(overlay))
        }
    }
}

fn parse_overlay(text: &str) -> Result<ConfigOverlay, serde_yaml::Error> {
    // An empty or comment-only file is a valid "no overrides" document,
    // which serde_yaml would otherwise reject as a unit value.
    if serde_yaml::from_str::<serde_yaml::Value>(text)
        .map(|value| value.is_null())
        .unwrap_or(false)
    {
        return Ok(ConfigOverlay::default());
    }
    serde_yaml::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_overlay_partial_file() {
        let overlay = parse_overlay("prTitleMinLength: 30\n").unwrap();
        assert_eq!(overlay.pr_title_min_length, Some(30));
        assert!(overlay.branch_pattern.is_none());
    }

    #[test]
    fn test_parse_overlay_empty_file_means_no_overrides() {
        let overlay = parse_overlay("").unwrap();
        assert!(overlay.branch_pattern.is_none());
        let overlay = parse_overlay("# all defaults\n").unwrap();
        assert!(overlay.pr_body_min_length.is_none());
    }

    #[test]
    fn test_parse_overlay_rejects_malformed_yaml() {
        assert!(parse_overlay("prTitleMinLength: [unterminated\n").is_err());
    }

    #[test]
    fn test_parse_overlay_rejects_wrong_type() {
        assert!(parse_overlay("prTitleMinLength: \"not a number\"\n").is_err());
    }

    #[test]
    fn test_overlay_merge_keeps_unset_defaults() {
        let overlay = parse_overlay("branchPattern: \"^team/.+$\"\n").unwrap();
        let merged = ComplianceConfig::default().with_overlay(overlay);
        assert_eq!(merged.branch_pattern, "^team/.+$");
        assert_eq!(merged.pr_title_min_length, 10);
    }
}
