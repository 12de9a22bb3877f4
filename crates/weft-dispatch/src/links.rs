//! Structural link recognition.
//!
//! Known URL shapes: Jira issues (`atlassian.net/browse/KEY` or
//! `selectedIssue=KEY`), GitHub pulls/issues, Confluence pages
//! (`atlassian.net/wiki/spaces/…`), and Linear issues
//! (`linear.app/team/issue/KEY`). Labels are short human handles:
//! `PTN-123`, `PR #456`, `#123`.

use weft_core::types::{LinkProvider, LinkType, SessionLink};

/// Per-slot result of scanning a text for links: at most one of each type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedLinks {
    pub issue: Option<SessionLink>,
    pub pr: Option<SessionLink>,
    pub doc: Option<SessionLink>,
}

impl ExtractedLinks {
    pub fn is_empty(&self) -> bool {
        self.issue.is_none() && self.pr.is_none() && self.doc.is_none()
    }

    /// Per-slot merge where `self` wins; `other` only fills empty slots.
    pub fn or(mut self, other: ExtractedLinks) -> ExtractedLinks {
        self.issue = self.issue.or(other.issue);
        self.pr = self.pr.or(other.pr);
        self.doc = self.doc.or(other.doc);
        self
    }

    pub fn set(&mut self, link: SessionLink) {
        match link.link_type {
            LinkType::Issue => self.issue = Some(link),
            LinkType::Pr => self.pr = Some(link),
            LinkType::Doc => self.doc = Some(link),
        }
    }
}

/// Classify one URL into a typed, labelled [`SessionLink`].
///
/// Returns `None` for URLs that match no known provider shape.
pub fn classify_url(url: &str) -> Option<SessionLink> {
    let trimmed = url.trim().trim_end_matches(['.', ',', ')', '>']);
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        return None;
    }

    // Jira issue: …atlassian.net/browse/KEY
    if trimmed.contains("atlassian.net/browse/") {
        let key = segment_after(trimmed, "/browse/")?;
        return Some(
            SessionLink::new(trimmed, LinkType::Issue, LinkProvider::Jira).with_label(key),
        );
    }
    // Jira issue via board deep link: …?selectedIssue=KEY
    if let Some(key) = param_value(trimmed, "selectedIssue=") {
        if trimmed.contains("atlassian.net") {
            return Some(
                SessionLink::new(trimmed, LinkType::Issue, LinkProvider::Jira).with_label(key),
            );
        }
    }
    // Confluence page: …atlassian.net/wiki/spaces/…
    if trimmed.contains("atlassian.net/wiki/spaces/") {
        let label = trimmed
            .rsplit('/')
            .find(|seg| !seg.is_empty() && !seg.chars().all(|c| c.is_ascii_digit()))
            .map(|seg| seg.replace(['-', '+'], " "))
            .unwrap_or_else(|| "Confluence".to_string());
        return Some(
            SessionLink::new(trimmed, LinkType::Doc, LinkProvider::Confluence).with_label(label),
        );
    }
    // GitHub PR / issue: github.com/{owner}/{repo}/pull/N | /issues/N
    if trimmed.contains("github.com/") {
        if let Some(n) = segment_after(trimmed, "/pull/") {
            return Some(
                SessionLink::new(trimmed, LinkType::Pr, LinkProvider::Github)
                    .with_label(format!("PR #{n}")),
            );
        }
        if let Some(n) = segment_after(trimmed, "/issues/") {
            return Some(
                SessionLink::new(trimmed, LinkType::Issue, LinkProvider::Github)
                    .with_label(format!("#{n}")),
            );
        }
    }
    // Linear issue: linear.app/{team}/issue/{KEY}
    if trimmed.contains("linear.app/") {
        if let Some(key) = segment_after(trimmed, "/issue/") {
            return Some(
                SessionLink::new(trimmed, LinkType::Issue, LinkProvider::Linear).with_label(key),
            );
        }
    }

    None
}

/// Scan free text for known links, filling at most one slot per type.
///
/// The first Jira hit wins the issue slot over any GitHub issue; within a
/// provider, first occurrence wins.
pub fn extract_links(text: &str) -> ExtractedLinks {
    let mut links = ExtractedLinks::default();

    for url in url_candidates(text) {
        let Some(link) = classify_url(&url) else {
            continue;
        };
        match link.link_type {
            LinkType::Issue => match &links.issue {
                None => links.issue = Some(link),
                // Jira outranks a previously seen GitHub issue.
                Some(existing)
                    if existing.provider != LinkProvider::Jira
                        && link.provider == LinkProvider::Jira =>
                {
                    links.issue = Some(link)
                }
                Some(_) => {}
            },
            LinkType::Pr => {
                if links.pr.is_none() {
                    links.pr = Some(link);
                }
            }
            LinkType::Doc => {
                if links.doc.is_none() {
                    links.doc = Some(link);
                }
            }
        }
    }
    links
}

/// All http(s) URL substrings in `text`, unwrapping Slack's `<url|label>`
/// and `<url>` angle forms.
fn url_candidates(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cursor = 0;
    while let Some(rel) = text[cursor..].find("http") {
        let start = cursor + rel;
        let rest = &text[start..];
        if !rest.starts_with("http://") && !rest.starts_with("https://") {
            cursor = start + 4;
            continue;
        }
        let end = rest
            .find(|c: char| c.is_whitespace() || c == '|' || c == '>' || c == '<')
            .unwrap_or(rest.len());
        out.push(rest[..end].to_string());
        cursor = start + end.max(1);
    }
    out
}

/// The path segment following `marker`, cut at the next delimiter.
fn segment_after(url: &str, marker: &str) -> Option<String> {
    let idx = url.find(marker)? + marker.len();
    let rest = &url[idx..];
    let end = rest.find(['/', '?', '#', '&']).unwrap_or(rest.len());
    let seg = &rest[..end];
    (!seg.is_empty()).then(|| seg.to_string())
}

/// The query-parameter value following `marker` (e.g. `selectedIssue=`).
fn param_value(url: &str, marker: &str) -> Option<String> {
    let idx = url.find(marker)? + marker.len();
    let rest = &url[idx..];
    let end = rest.find(['&', '#']).unwrap_or(rest.len());
    let value = &rest[..end];
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jira_browse_url() {
        let link = classify_url("https://acme.atlassian.net/browse/PTN-1234").unwrap();
        assert_eq!(link.link_type, LinkType::Issue);
        assert_eq!(link.provider, LinkProvider::Jira);
        assert_eq!(link.label.as_deref(), Some("PTN-1234"));
    }

    #[test]
    fn jira_selected_issue_param() {
        let link = classify_url(
            "https://acme.atlassian.net/jira/software/projects/PTN/boards/1?selectedIssue=PTN-77",
        )
        .unwrap();
        assert_eq!(link.label.as_deref(), Some("PTN-77"));
        assert_eq!(link.provider, LinkProvider::Jira);
    }

    #[test]
    fn github_pull_and_issue() {
        let pr = classify_url("https://github.com/acme/svc/pull/456").unwrap();
        assert_eq!(pr.link_type, LinkType::Pr);
        assert_eq!(pr.label.as_deref(), Some("PR #456"));

        let issue = classify_url("https://github.com/acme/svc/issues/9").unwrap();
        assert_eq!(issue.link_type, LinkType::Issue);
        assert_eq!(issue.label.as_deref(), Some("#9"));
    }

    #[test]
    fn confluence_doc() {
        let doc =
            classify_url("https://acme.atlassian.net/wiki/spaces/ENG/pages/123/Deploy-Guide")
                .unwrap();
        assert_eq!(doc.link_type, LinkType::Doc);
        assert_eq!(doc.provider, LinkProvider::Confluence);
        assert_eq!(doc.label.as_deref(), Some("Deploy Guide"));
    }

    #[test]
    fn linear_issue() {
        let link = classify_url("https://linear.app/acme/issue/ENG-42").unwrap();
        assert_eq!(link.provider, LinkProvider::Linear);
        assert_eq!(link.label.as_deref(), Some("ENG-42"));
    }

    #[test]
    fn unknown_urls_skipped() {
        assert!(classify_url("https://example.com/whatever").is_none());
        assert!(classify_url("not a url").is_none());
    }

    #[test]
    fn jira_wins_issue_slot_over_github() {
        let links = extract_links(
            "see https://github.com/acme/svc/issues/9 and https://acme.atlassian.net/browse/PTN-1",
        );
        assert_eq!(links.issue.unwrap().label.as_deref(), Some("PTN-1"));
    }

    #[test]
    fn slack_angle_form_unwrapped() {
        let links =
            extract_links("check <https://github.com/acme/svc/pull/7|PR #7> please");
        assert_eq!(links.pr.unwrap().label.as_deref(), Some("PR #7"));
    }

    #[test]
    fn merge_prefers_self() {
        let a = extract_links("https://github.com/acme/svc/pull/1");
        let b = extract_links("https://github.com/acme/svc/pull/2 https://acme.atlassian.net/browse/X-1");
        let merged = a.or(b);
        assert_eq!(merged.pr.unwrap().label.as_deref(), Some("PR #1"));
        assert_eq!(merged.issue.unwrap().label.as_deref(), Some("X-1"));
    }
}
