use std::fmt;
use std::str::FromStr;

/// Pull request lifecycle actions the compliance rules distinguish.
///
/// Each rule guards on this enumeration explicitly; there is no dynamic
/// dispatch over event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrEventKind {
    Opened,
    Reopened,
    Synchronize,
    Edited,
}

impl fmt::Display for PrEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            PrEventKind::Opened => "opened",
            PrEventKind::Reopened => "reopened",
            PrEventKind::Synchronize => "synchronize",
            PrEventKind::Edited => "edited",
        };
        write!(f, "{value}")
    }
}

impl FromStr for PrEventKind {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "opened" => Ok(PrEventKind::Opened),
            "reopened" => Ok(PrEventKind::Reopened),
            "synchronize" => Ok(PrEventKind::Synchronize),
            "edited" => Ok(PrEventKind::Edited),
            other => Err(format!("unsupported pull request action: {other}")),
        }
    }
}

/// The slice of a pull request payload the rules inspect.
#[derive(Debug, Clone)]
pub struct PullRequestSnapshot {
    pub repo_full_name: String,
    pub number: u64,
    /// Head ref of the pull request.
    pub branch_name: String,
    pub title: String,
    /// Absent bodies are measured as empty by the body-length rule.
    pub body: Option<String>,
    pub event_kind: PrEventKind,
}

/// One commit on the pull request, reduced to what the rules inspect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub sha: String,
    /// Commit message truncated at the first newline.
    pub first_line: String,
}

impl CommitRecord {
    pub fn new(sha: impl Into<String>, message: &str) -> Self {
        Self {
            sha: sha.into(),
            first_line: message.lines().next().unwrap_or_default().to_string(),
        }
    }

    /// Sha abbreviated to 7 characters for display in comments and logs.
    pub fn short_sha(&self) -> &str {
        &self.sha[..self.sha.len().min(7)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_round_trip() {
        for kind in [
            PrEventKind::Opened,
            PrEventKind::Reopened,
            PrEventKind::Synchronize,
            PrEventKind::Edited,
        ] {
            assert_eq!(kind.to_string().parse::<PrEventKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_event_kind_rejects_unknown_action() {
        assert!("closed".parse::<PrEventKind>().is_err());
        assert!("".parse::<PrEventKind>().is_err());
    }

    #[test]
    fn test_commit_record_keeps_first_line_only() {
        let record = CommitRecord::new("abc", "feat: add login\n\nLonger explanation here");
        assert_eq!(record.first_line, "feat: add login");
    }

    #[test]
    fn test_commit_record_empty_message() {
        let record = CommitRecord::new("abc", "");
        assert_eq!(record.first_line, "");
    }

    #[test]
    fn test_short_sha_truncates_to_seven() {
        let record = CommitRecord::new("0123456789abcdef", "feat: x");
        assert_eq!(record.short_sha(), "0123456");
    }

    #[test]
    fn test_short_sha_handles_short_input() {
        let record = CommitRecord::new("abc", "feat: x");
        assert_eq!(record.short_sha(), "abc");
    }
}
