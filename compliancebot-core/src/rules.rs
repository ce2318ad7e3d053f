use regex::Regex;

use crate::config::{compile_pattern, ComplianceConfig, ConfigError};
use crate::event::{CommitRecord, PrEventKind, PullRequestSnapshot};
use crate::template::render_template;

/// Stable identifier of a compliance rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleId {
    BranchNaming,
    CommitMessage,
    TitleTooShort,
    BodyTooShort,
}

/// Marker substring recognizing a prior title-length advisory comment.
///
/// Fixed independently of the configured message template so deduplication
/// keeps working when a repository overrides the wording.
pub const TITLE_TOO_SHORT_MARKER: &str = "Pull Request title is too short";

/// Marker substring recognizing a prior body-length advisory comment.
pub const BODY_TOO_SHORT_MARKER: &str = "Pull Request body is too short";

const COMMIT_COMMENT_HEADER: &str = "⚠️ Some commit messages do not follow AiWA's conventions:\n\n";
const COMMIT_COMMENT_TRAILER: &str = "\nPlease rebase and squash/fixup these commits.";

/// A detected non-compliance, ready to be posted as one advisory comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub rule: RuleId,
    /// User-facing comment body with all placeholders substituted.
    pub message: String,
    /// Present for the rules that deduplicate against prior bot comments.
    pub dedupe_marker: Option<&'static str>,
    /// Truncated shas of the offending commits; empty for non-commit rules.
    pub commit_refs: Vec<String>,
}

/// Evaluate all compliance rules for one event.
///
/// Pure: the caller supplies the pull request snapshot, the commit page, the
/// resolved configuration, and the bodies of existing bot comments; every
/// external action is left to the caller. Rules are independent; the output
/// order (branch, commits, title, body) only fixes comment ordering.
///
/// A pattern that fails to compile aborts the whole evaluation with a
/// [`ConfigError`], since all rules share one configuration.
pub fn evaluate(
    pr: &PullRequestSnapshot,
    commits: &[CommitRecord],
    config: &ComplianceConfig,
    existing_bot_comments: &[String],
) -> Result<Vec<Violation>, ConfigError> {
    let branch_pattern = compile_pattern(&config.branch_pattern, "branchPattern")?;
    let commit_pattern = compile_pattern(&config.commit_message_pattern, "commitMessagePattern")?;

    let mut violations = Vec::new();
    violations.extend(check_branch_name(pr, &branch_pattern, config));
    violations.extend(check_commit_messages(pr, commits, &commit_pattern, config));
    violations.extend(check_title_length(pr, config, existing_bot_comments));
    violations.extend(check_body_length(pr, config, existing_bot_comments));
    Ok(violations)
}

/// Branch naming applies on every event kind and never deduplicates: the
/// branch name cannot change without a new ref, and re-notification on
/// resync is accepted.
fn check_branch_name(
    pr: &PullRequestSnapshot,
    pattern: &Regex,
    config: &ComplianceConfig,
) -> Option<Violation> {
    if pattern.is_match(&pr.branch_name) {
        return None;
    }
    Some(Violation {
        rule: RuleId::BranchNaming,
        message: render_template(
            &config.branch_pattern_message,
            &[("%BRANCH_NAME%", &pr.branch_name)],
        ),
        dedupe_marker: None,
        commit_refs: Vec::new(),
    })
}

/// Non-compliant commits aggregate into a single combined comment rather
/// than one comment per commit. No violation when the set is empty, even if
/// previously flagged.
fn check_commit_messages(
    pr: &PullRequestSnapshot,
    commits: &[CommitRecord],
    pattern: &Regex,
    config: &ComplianceConfig,
) -> Option<Violation> {
    if !matches!(pr.event_kind, PrEventKind::Opened | PrEventKind::Synchronize) {
        return None;
    }

    let non_compliant: Vec<&CommitRecord> = commits
        .iter()
        .filter(|commit| !pattern.is_match(&commit.first_line))
        .collect();
    if non_compliant.is_empty() {
        return None;
    }

    let mut message = String::from(COMMIT_COMMENT_HEADER);
    let mut commit_refs = Vec::with_capacity(non_compliant.len());
    for commit in non_compliant {
        let short_sha = commit.short_sha();
        message.push_str("- ");
        message.push_str(&render_template(
            &config.commit_message_pattern_message,
            &[
                ("%COMMIT_MESSAGE%", commit.first_line.as_str()),
                ("%COMMIT_SHA%", short_sha),
            ],
        ));
        message.push('\n');
        commit_refs.push(short_sha.to_string());
    }
    message.push_str(COMMIT_COMMENT_TRAILER);

    Some(Violation {
        rule: RuleId::CommitMessage,
        message,
        dedupe_marker: None,
        commit_refs,
    })
}

fn check_title_length(
    pr: &PullRequestSnapshot,
    config: &ComplianceConfig,
    existing_bot_comments: &[String],
) -> Option<Violation> {
    if !matches!(pr.event_kind, PrEventKind::Opened | PrEventKind::Edited) {
        return None;
    }
    if pr.title.chars().count() >= config.pr_title_min_length {
        return None;
    }
    if !should_post(pr.event_kind, TITLE_TOO_SHORT_MARKER, existing_bot_comments) {
        return None;
    }
    Some(Violation {
        rule: RuleId::TitleTooShort,
        message: render_template(
            &config.pr_title_min_length_message,
            &[("%MIN_LENGTH%", &config.pr_title_min_length.to_string())],
        ),
        dedupe_marker: Some(TITLE_TOO_SHORT_MARKER),
        commit_refs: Vec::new(),
    })
}

/// Identical contract to the title rule; an absent body measures as empty.
fn check_body_length(
    pr: &PullRequestSnapshot,
    config: &ComplianceConfig,
    existing_bot_comments: &[String],
) -> Option<Violation> {
    if !matches!(pr.event_kind, PrEventKind::Opened | PrEventKind::Edited) {
        return None;
    }
    let body_length = pr.body.as_deref().unwrap_or("").chars().count();
    if body_length >= config.pr_body_min_length {
        return None;
    }
    if !should_post(pr.event_kind, BODY_TOO_SHORT_MARKER, existing_bot_comments) {
        return None;
    }
    Some(Violation {
        rule: RuleId::BodyTooShort,
        message: render_template(
            &config.pr_body_min_length_message,
            &[("%MIN_LENGTH%", &config.pr_body_min_length.to_string())],
        ),
        dedupe_marker: Some(BODY_TOO_SHORT_MARKER),
        commit_refs: Vec::new(),
    })
}

/// Edits always re-post so the advisory reflects the latest state, even when
/// an identical prior comment exists; otherwise a prior marker comment
/// suppresses the repeat.
fn should_post(kind: PrEventKind, marker: &str, existing_bot_comments: &[String]) -> bool {
    kind == PrEventKind::Edited || !existing_bot_comments.iter().any(|body| body.contains(marker))
}
