pub mod config;
pub mod event;
pub mod rules;
pub mod template;

pub use config::{ComplianceConfig, ConfigError, ConfigOverlay};
pub use event::{CommitRecord, PrEventKind, PullRequestSnapshot};
pub use rules::{evaluate, RuleId, Violation, BODY_TOO_SHORT_MARKER, TITLE_TOO_SHORT_MARKER};
pub use template::render_template;
