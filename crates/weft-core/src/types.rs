use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeftError};

/// Thread-scoped session key.
///
/// Sessions belong to Slack threads: `{channel}:{thread_ts}` when the message
/// lives in a thread, or `{channel}` alone for a bare channel message. The
/// `thread_ts` component is never mutated once set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    /// Opaque Slack channel id (e.g. `C0123ABCD`).
    pub channel: String,
    /// Opaque Slack thread timestamp (e.g. `1712345678.000100`).
    pub thread_ts: Option<String>,
}

impl SessionKey {
    pub fn new(channel: impl Into<String>, thread_ts: Option<String>) -> Self {
        Self {
            channel: channel.into(),
            thread_ts,
        }
    }

    /// Return the canonical wire-format string.
    ///
    /// Format: `{channel}:{thread_ts}` or `{channel}` when no thread exists.
    pub fn format(&self) -> String {
        match &self.thread_ts {
            Some(ts) => format!("{}:{}", self.channel, ts),
            None => self.channel.clone(),
        }
    }

    /// Parse a wire-format key string back into a `SessionKey`.
    ///
    /// The channel id never contains a colon, so the first colon (if any)
    /// separates channel from thread timestamp.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(WeftError::InvalidKey("empty key".to_string()));
        }
        match s.split_once(':') {
            Some((channel, ts)) => {
                if channel.is_empty() || ts.is_empty() {
                    return Err(WeftError::InvalidKey(format!(
                        "key components must not be empty: {s}"
                    )));
                }
                Ok(Self {
                    channel: channel.to_string(),
                    thread_ts: Some(ts.to_string()),
                })
            }
            None => Ok(Self {
                channel: s.to_string(),
                thread_ts: None,
            }),
        }
    }

    /// The message all status/context reactions attach to: the thread root.
    /// For bare-channel sessions there is no root until the first reply.
    pub fn root_ts(&self) -> Option<&str> {
        self.thread_ts.as_deref()
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

/// Closed set of workflows a user message can be classified into.
///
/// The classifier returns the kebab-case wire name; anything outside this set
/// downgrades to [`Workflow::Default`] at the dispatch layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Workflow {
    Onboarding,
    JiraExecutiveSummary,
    JiraBrainstorming,
    JiraPlanning,
    JiraCreatePr,
    PrReview,
    PrFixAndUpdate,
    PrDocsConfluence,
    Deploy,
    #[default]
    Default,
}

impl Workflow {
    /// All recognised wire names, in classifier-prompt order.
    pub const ALL: [Workflow; 10] = [
        Workflow::Onboarding,
        Workflow::JiraExecutiveSummary,
        Workflow::JiraBrainstorming,
        Workflow::JiraPlanning,
        Workflow::JiraCreatePr,
        Workflow::PrReview,
        Workflow::PrFixAndUpdate,
        Workflow::PrDocsConfluence,
        Workflow::Deploy,
        Workflow::Default,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Workflow::Onboarding => "onboarding",
            Workflow::JiraExecutiveSummary => "jira-executive-summary",
            Workflow::JiraBrainstorming => "jira-brainstorming",
            Workflow::JiraPlanning => "jira-planning",
            Workflow::JiraCreatePr => "jira-create-pr",
            Workflow::PrReview => "pr-review",
            Workflow::PrFixAndUpdate => "pr-fix-and-update",
            Workflow::PrDocsConfluence => "pr-docs-confluence",
            Workflow::Deploy => "deploy",
            Workflow::Default => "default",
        }
    }
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Workflow {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Workflow::ALL
            .iter()
            .find(|w| w.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown workflow: {s}"))
    }
}

/// Lifecycle state of a session. Exactly one holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Created but no agent turn has completed yet.
    #[default]
    Initializing,
    /// At least one turn completed; the normal conversational state.
    Main,
    /// Idled past the sleep threshold; eligible for expiry.
    Sleeping,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Initializing => write!(f, "initializing"),
            SessionState::Main => write!(f, "main"),
            SessionState::Sleeping => write!(f, "sleeping"),
        }
    }
}

/// Phase of the save→reset→load renew protocol.
///
/// `None` (no renew in progress) is modelled as `Option<RenewPhase>` on the
/// session; a non-`None` phase excludes new agent turns via the normal path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenewPhase {
    /// Waiting for the agent to report a `SAVE_CONTEXT_RESULT`.
    PendingSave,
    /// Save captured; the continuation load turn has not completed yet.
    PendingLoad,
}

/// Kind of external resource a session link points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Issue,
    Pr,
    Doc,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Issue => "issue",
            LinkType::Pr => "pr",
            LinkType::Doc => "doc",
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LinkType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "issue" => Ok(LinkType::Issue),
            "pr" => Ok(LinkType::Pr),
            "doc" => Ok(LinkType::Doc),
            other => Err(format!("unknown link type: {other}")),
        }
    }
}

/// Hosting provider derived from a link URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LinkProvider {
    Github,
    Jira,
    Confluence,
    Linear,
    #[default]
    Unknown,
}

impl fmt::Display for LinkProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkProvider::Github => write!(f, "github"),
            LinkProvider::Jira => write!(f, "jira"),
            LinkProvider::Confluence => write!(f, "confluence"),
            LinkProvider::Linear => write!(f, "linear"),
            LinkProvider::Unknown => write!(f, "unknown"),
        }
    }
}

/// A resource attached to a session. At most one link per [`LinkType`] is
/// held; setting a link replaces the previous one of that type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionLink {
    pub url: String,
    pub link_type: LinkType,
    pub provider: LinkProvider,
    /// Short human label, e.g. `PTN-123` or `PR #456`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_checked_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl SessionLink {
    pub fn new(url: impl Into<String>, link_type: LinkType, provider: LinkProvider) -> Self {
        Self {
            url: url.into(),
            link_type,
            provider,
            label: None,
            title: None,
            status: None,
            status_checked_at: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// The label when present, else the raw URL.
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.url)
    }
}

/// Payload captured from the agent's `SAVE_CONTEXT_RESULT` during renew.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SaveResult {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Truncate `s` to at most `max` characters, appending `…` when cut.
///
/// Operates on char boundaries so multi-byte text never splits mid-codepoint.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{cut}…")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn key_roundtrip_with_thread() {
        let key = SessionKey::new("C0123", Some("1712.000100".to_string()));
        let s = key.format();
        assert_eq!(s, "C0123:1712.000100");
        assert_eq!(SessionKey::parse(&s).unwrap(), key);
    }

    #[test]
    fn key_roundtrip_channel_only() {
        let key = SessionKey::new("C0123", None);
        assert_eq!(key.format(), "C0123");
        assert_eq!(SessionKey::parse("C0123").unwrap(), key);
    }

    #[test]
    fn key_parse_rejects_empty() {
        assert!(SessionKey::parse("").is_err());
        assert!(SessionKey::parse(":1712").is_err());
        assert!(SessionKey::parse("C0123:").is_err());
    }

    #[test]
    fn workflow_wire_names_roundtrip() {
        for w in Workflow::ALL {
            assert_eq!(Workflow::from_str(w.as_str()).unwrap(), w);
        }
    }

    #[test]
    fn workflow_unknown_is_err() {
        assert!(Workflow::from_str("jira-rewrite-everything").is_err());
    }

    #[test]
    fn truncate_char_boundaries() {
        assert_eq!(truncate_chars("short", 60), "short");
        let cut = truncate_chars("가나다라마바사", 4);
        assert_eq!(cut, "가나다…");
    }
}
