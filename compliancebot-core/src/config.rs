use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// A configuration field that failed validation.
///
/// Pattern fields must compile; a broken pattern is a configuration error
/// for the whole event, not a per-rule runtime fault, since all rules share
/// one configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid regular expression in `{field}`: {source}")]
    InvalidPattern {
        field: &'static str,
        #[source]
        source: regex::Error,
    },
}

/// Effective rule configuration for one repository.
///
/// Resolved once per event by merging a per-repository overlay over the
/// built-in defaults; immutable for the duration of evaluation.
#[derive(Debug, Clone)]
pub struct ComplianceConfig {
    pub branch_pattern: String,
    pub branch_pattern_message: String,
    pub commit_message_pattern: String,
    pub commit_message_pattern_message: String,
    pub pr_title_min_length: usize,
    pub pr_title_min_length_message: String,
    pub pr_body_min_length: usize,
    pub pr_body_min_length_message: String,
    /// Files to ensure exist in newly created repositories, path -> initial
    /// content. BTreeMap keeps creation order stable.
    pub ensure_files: BTreeMap<String, String>,
    pub new_repo_issue_title: String,
    pub new_repo_issue_body: String,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        let mut ensure_files = BTreeMap::new();
        ensure_files.insert(
            "SECURITY.md".to_string(),
            "Please refer to our security policy at [link-to-your-org-security-policy].\n\n\
             ## Reporting a Vulnerability\n\n\
             Please report suspected security vulnerabilities to `security@example.com` privately. \
             Please do NOT create a public GitHub issue."
                .to_string(),
        );
        ensure_files.insert(
            "CODE_OF_CONDUCT.md".to_string(),
            "# Contributor Covenant Code of Conduct\n\n\
             (Content from https://www.contributor-covenant.org/version/2/1/code_of_conduct/code_of_conduct.md \
             or your own CoC)"
                .to_string(),
        );

        ComplianceConfig {
            // Allows aiwa/feature-name or aiwa/feature-name/sub-task
            branch_pattern: r"^aiwa/[a-z0-9\-]+(/.+)?$".to_string(),
            branch_pattern_message: "⚠️ Branch name `%BRANCH_NAME%` does not follow AiWA's naming \
                                     conventions. Please rename it to match `aiwa/feature-name` or \
                                     `aiwa/type/feature-name` (e.g., `aiwa/feat/add-login`)."
                .to_string(),
            // Conventional Commits, first line only
            commit_message_pattern:
                r"^(feat|fix|docs|style|refactor|perf|test|chore)(\([a-zA-Z0-9\-]+\))?: .{1,100}"
                    .to_string(),
            commit_message_pattern_message: "⚠️ Commit message `%COMMIT_MESSAGE%` (SHA: `%COMMIT_SHA%`) \
                                             does not follow Conventional Commits format (e.g., `feat: \
                                             add new login button`). See https://www.conventionalcommits.org/"
                .to_string(),
            pr_title_min_length: 10,
            pr_title_min_length_message: "⚠️ Pull Request title is too short. Please provide a more \
                                          descriptive title (min %MIN_LENGTH% characters)."
                .to_string(),
            pr_body_min_length: 20,
            pr_body_min_length_message: "⚠️ Pull Request body is too short. Please provide a more \
                                         detailed description of the changes (min %MIN_LENGTH% \
                                         characters). Consider using a PR template."
                .to_string(),
            ensure_files,
            new_repo_issue_title: "🚀 New Repository Setup Checklist".to_string(),
            new_repo_issue_body: "Welcome to your new repository! Please complete the following setup tasks:\n\
                                  - [ ] Configure branch protection rules.\n\
                                  - [ ] Add relevant repository topics/tags.\n\
                                  - [ ] Review and customize `SECURITY.md`.\n\
                                  - [ ] Review and customize `CODE_OF_CONDUCT.md`.\n\
                                  - [ ] Setup Dependabot if not already present (`.github/dependabot.yml`).\n\
                                  - [ ] Add a comprehensive `README.md`.\n\
                                  - [ ] Consider adding issue and PR templates (`.github/`)."
                .to_string(),
        }
    }
}

impl ComplianceConfig {
    /// Merge a per-repository overlay over this configuration.
    ///
    /// Each missing overlay key falls back to the corresponding value of
    /// `self`, never to an empty value.
    pub fn with_overlay(&self, overlay: ConfigOverlay) -> ComplianceConfig {
        ComplianceConfig {
            branch_pattern: overlay.branch_pattern.unwrap_or_else(|| self.branch_pattern.clone()),
            branch_pattern_message: overlay
                .branch_pattern_message
                .unwrap_or_else(|| self.branch_pattern_message.clone()),
            commit_message_pattern: overlay
                .commit_message_pattern
                .unwrap_or_else(|| self.commit_message_pattern.clone()),
            commit_message_pattern_message: overlay
                .commit_message_pattern_message
                .unwrap_or_else(|| self.commit_message_pattern_message.clone()),
            pr_title_min_length: overlay.pr_title_min_length.unwrap_or(self.pr_title_min_length),
            pr_title_min_length_message: overlay
                .pr_title_min_length_message
                .unwrap_or_else(|| self.pr_title_min_length_message.clone()),
            pr_body_min_length: overlay.pr_body_min_length.unwrap_or(self.pr_body_min_length),
            pr_body_min_length_message: overlay
                .pr_body_min_length_message
                .unwrap_or_else(|| self.pr_body_min_length_message.clone()),
            ensure_files: overlay.ensure_files.unwrap_or_else(|| self.ensure_files.clone()),
            new_repo_issue_title: overlay
                .new_repo_issue_title
                .unwrap_or_else(|| self.new_repo_issue_title.clone()),
            new_repo_issue_body: overlay
                .new_repo_issue_body
                .unwrap_or_else(|| self.new_repo_issue_body.clone()),
        }
    }

    /// Validate that both pattern fields compile, reporting the first
    /// offending field.
    pub fn validate_patterns(&self) -> Result<(), ConfigError> {
        compile_pattern(&self.branch_pattern, "branchPattern")?;
        compile_pattern(&self.commit_message_pattern, "commitMessagePattern")?;
        Ok(())
    }
}

pub(crate) fn compile_pattern(pattern: &str, field: &'static str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern { field, source })
}

/// Contents of a per-repository `aiwa-compliance.yml`.
///
/// Every key is optional; unknown keys are ignored so a repository can carry
/// forward-compatible settings without breaking older deployments.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOverlay {
    pub branch_pattern: Option<String>,
    pub branch_pattern_message: Option<String>,
    pub commit_message_pattern: Option<String>,
    pub commit_message_pattern_message: Option<String>,
    pub pr_title_min_length: Option<usize>,
    pub pr_title_min_length_message: Option<String>,
    pub pr_body_min_length: Option<usize>,
    pub pr_body_min_length_message: Option<String>,
    pub ensure_files: Option<BTreeMap<String, String>>,
    pub new_repo_issue_title: Option<String>,
    pub new_repo_issue_body: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_patterns_compile() {
        ComplianceConfig::default()
            .validate_patterns()
            .expect("built-in defaults must be valid");
    }

    #[test]
    fn test_default_ensure_files() {
        let config = ComplianceConfig::default();
        assert!(config.ensure_files.contains_key("SECURITY.md"));
        assert!(config.ensure_files.contains_key("CODE_OF_CONDUCT.md"));
    }

    #[test]
    fn test_empty_overlay_keeps_defaults() {
        let defaults = ComplianceConfig::default();
        let merged = defaults.with_overlay(ConfigOverlay::default());
        assert_eq!(merged.branch_pattern, defaults.branch_pattern);
        assert_eq!(merged.pr_title_min_length, defaults.pr_title_min_length);
        assert_eq!(merged.ensure_files, defaults.ensure_files);
    }

    #[test]
    fn test_partial_overlay_merges_per_key() {
        let defaults = ComplianceConfig::default();
        let overlay = ConfigOverlay {
            pr_title_min_length: Some(25),
            branch_pattern: Some("^topic/.+$".to_string()),
            ..ConfigOverlay::default()
        };
        let merged = defaults.with_overlay(overlay);
        assert_eq!(merged.pr_title_min_length, 25);
        assert_eq!(merged.branch_pattern, "^topic/.+$");
        // Untouched keys fall back to the default, not to an empty value.
        assert_eq!(merged.pr_body_min_length, defaults.pr_body_min_length);
        assert_eq!(merged.branch_pattern_message, defaults.branch_pattern_message);
    }

    #[test]
    fn test_overlay_parses_from_yaml() {
        let overlay: ConfigOverlay = serde_yaml::from_str(
            "prTitleMinLength: 15\nbranchPattern: \"^team/.+$\"\n",
        )
        .expect("well-formed overlay");
        assert_eq!(overlay.pr_title_min_length, Some(15));
        assert_eq!(overlay.branch_pattern, Some("^team/.+$".to_string()));
        assert!(overlay.pr_body_min_length.is_none());
    }

    #[test]
    fn test_overlay_ignores_unknown_keys() {
        let overlay: ConfigOverlay =
            serde_yaml::from_str("someFutureKey: true\nprBodyMinLength: 5\n")
                .expect("unknown keys are tolerated");
        assert_eq!(overlay.pr_body_min_length, Some(5));
    }

    #[test]
    fn test_overlay_ensure_files_replaces_wholesale() {
        let defaults = ComplianceConfig::default();
        let overlay: ConfigOverlay = serde_yaml::from_str(
            "ensureFiles:\n  CONTRIBUTING.md: \"How to contribute\"\n",
        )
        .expect("well-formed overlay");
        let merged = defaults.with_overlay(overlay);
        assert_eq!(merged.ensure_files.len(), 1);
        assert!(merged.ensure_files.contains_key("CONTRIBUTING.md"));
    }

    #[test]
    fn test_invalid_pattern_reports_field() {
        let config = ComplianceConfig {
            branch_pattern: "[unclosed".to_string(),
            ..ComplianceConfig::default()
        };
        let err = config.validate_patterns().unwrap_err();
        assert!(err.to_string().contains("branchPattern"));
    }
}
