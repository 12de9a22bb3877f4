//! Session resource snapshot and optimistically-locked updates.
//!
//! `GET_SESSION` hands the model a snapshot with per-type resource arrays, an
//! active map, and an integer sequence. `UPDATE_SESSION` applies operations
//! against an `expectedSequence`; a stale sequence is rejected without
//! mutating, and any applied request bumps the sequence by exactly one.

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use weft_core::types::{LinkType, SessionKey, SessionLink};

use crate::error::{Result, SessionError};
use crate::store::SessionStore;
use crate::types::Session;

/// Wire-shaped snapshot of a session's attached resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub issues: Vec<SessionLink>,
    pub prs: Vec<SessionLink>,
    pub docs: Vec<SessionLink>,
    /// resource type → active url.
    pub active: HashMap<String, String>,
    pub sequence: u64,
}

impl ResourceSnapshot {
    pub fn of(session: &Session) -> Self {
        Self {
            issues: session.links.issue.clone().into_iter().collect(),
            prs: session.links.pr.clone().into_iter().collect(),
            docs: session.links.doc.clone().into_iter().collect(),
            active: session.active_resources.clone(),
            sequence: session.sequence,
        }
    }
}

/// One `UPDATE_SESSION` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum ResourceOp {
    Add {
        resource_type: String,
        #[serde(default)]
        link: Option<Value>,
        #[serde(default)]
        url: Option<String>,
    },
    Remove {
        resource_type: String,
    },
    SetActive {
        resource_type: String,
        url: String,
    },
}

/// Apply `UPDATE_SESSION` operations under the optimistic lock.
///
/// All operations validate against a scratch copy first; nothing commits on
/// any failure. One applied request bumps the sequence once, regardless of
/// how many operations it carried.
pub fn apply_operations(
    store: &SessionStore,
    key: &SessionKey,
    expected_sequence: Option<u64>,
    operations: &[ResourceOp],
    classify: impl Fn(&str) -> Option<SessionLink>,
) -> Result<ResourceSnapshot> {
    if operations.is_empty() {
        return Err(SessionError::InvalidArgs("operations must not be empty".into()));
    }

    let Some(session) = store.get(key) else {
        return Err(SessionError::NotFound { key: key.format() });
    };

    if let Some(expected) = expected_sequence {
        if expected != session.sequence {
            return Err(SessionError::SequenceMismatch {
                expected,
                current: session.sequence,
            });
        }
    }

    // Validate and stage on a scratch copy.
    let mut staged = session.clone();
    for op in operations {
        apply_one(&mut staged, op, &classify)?;
    }
    staged.sequence += 1;

    let snapshot = ResourceSnapshot::of(&staged);
    let committed = store.update(key, |s| {
        s.links = staged.links.clone();
        s.active_resources = staged.active_resources.clone();
        s.sequence = staged.sequence;
    });
    if !committed {
        return Err(SessionError::NotFound { key: key.format() });
    }
    Ok(snapshot)
}

fn apply_one(
    session: &mut Session,
    op: &ResourceOp,
    classify: &impl Fn(&str) -> Option<SessionLink>,
) -> Result<()> {
    match op {
        ResourceOp::Add {
            resource_type,
            link,
            url,
        } => {
            let link_type = parse_type(resource_type)?;
            let parsed = match (link, url) {
                (Some(link), _) => {
                    let mut parsed: SessionLink = serde_json::from_value(link.clone())
                        .map_err(|e| SessionError::InvalidArgs(format!("bad link object: {e}")))?;
                    parsed.link_type = link_type;
                    parsed
                }
                (None, Some(url)) => classify(url)
                    .filter(|l| l.link_type == link_type)
                    .ok_or_else(|| {
                        SessionError::InvalidOperation(format!(
                            "url does not resolve to a {resource_type}: {url}"
                        ))
                    })?,
                (None, None) => {
                    return Err(SessionError::InvalidArgs(
                        "add requires `link` or `url`".into(),
                    ))
                }
            };
            session.links.set(parsed);
        }
        ResourceOp::Remove { resource_type } => {
            let link_type = parse_type(resource_type)?;
            if !session.links.clear(link_type) {
                return Err(SessionError::InvalidOperation(format!(
                    "no {resource_type} attached"
                )));
            }
            session.active_resources.remove(resource_type);
        }
        ResourceOp::SetActive { resource_type, url } => {
            let link_type = parse_type(resource_type)?;
            let attached = session
                .links
                .get(link_type)
                .is_some_and(|l| &l.url == url);
            if !attached {
                return Err(SessionError::InvalidOperation(format!(
                    "{resource_type} {url} is not attached"
                )));
            }
            session
                .active_resources
                .insert(resource_type.clone(), url.clone());
        }
    }
    Ok(())
}

fn parse_type(raw: &str) -> Result<LinkType> {
    LinkType::from_str(raw)
        .map_err(|_| SessionError::InvalidArgs(format!("unknown resource type: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::types::LinkProvider;

    fn classify(url: &str) -> Option<SessionLink> {
        if url.contains("/pull/") {
            Some(SessionLink::new(url, LinkType::Pr, LinkProvider::Github))
        } else if url.contains("/issues/") {
            Some(SessionLink::new(url, LinkType::Issue, LinkProvider::Github))
        } else {
            None
        }
    }

    fn store_with_session() -> (SessionStore, SessionKey) {
        let store = SessionStore::new("m", "/w");
        let key = SessionKey::parse("C1:1.0").unwrap();
        store.get_or_create(&key, "U1");
        (store, key)
    }

    #[test]
    fn add_by_url_bumps_sequence_once() {
        let (store, key) = store_with_session();
        let ops = vec![
            ResourceOp::Add {
                resource_type: "pr".into(),
                link: None,
                url: Some("https://github.com/a/b/pull/7".into()),
            },
            ResourceOp::Add {
                resource_type: "issue".into(),
                link: None,
                url: Some("https://github.com/a/b/issues/9".into()),
            },
        ];
        let snap = apply_operations(&store, &key, Some(0), &ops, classify).unwrap();
        // Two operations, one sequence bump.
        assert_eq!(snap.sequence, 1);
        assert_eq!(snap.prs.len(), 1);
        assert_eq!(snap.issues.len(), 1);
    }

    #[test]
    fn stale_sequence_rejected_without_mutation() {
        let (store, key) = store_with_session();
        let op = vec![ResourceOp::Add {
            resource_type: "pr".into(),
            link: None,
            url: Some("https://github.com/a/b/pull/7".into()),
        }];

        apply_operations(&store, &key, Some(0), &op, classify).unwrap();

        // Same expectedSequence replayed — second call must be rejected.
        let err = apply_operations(&store, &key, Some(0), &op, classify).unwrap_err();
        assert!(matches!(err, SessionError::SequenceMismatch { expected: 0, current: 1 }));
        assert_eq!(store.get(&key).unwrap().sequence, 1);
    }

    #[test]
    fn failed_operation_commits_nothing() {
        let (store, key) = store_with_session();
        let ops = vec![
            ResourceOp::Add {
                resource_type: "pr".into(),
                link: None,
                url: Some("https://github.com/a/b/pull/7".into()),
            },
            // Invalid: removing a doc that was never attached.
            ResourceOp::Remove {
                resource_type: "doc".into(),
            },
        ];
        assert!(apply_operations(&store, &key, Some(0), &ops, classify).is_err());

        let session = store.get(&key).unwrap();
        assert_eq!(session.sequence, 0);
        assert!(session.links.pr.is_none());
    }

    #[test]
    fn set_active_requires_attachment() {
        let (store, key) = store_with_session();
        let err = apply_operations(
            &store,
            &key,
            None,
            &[ResourceOp::SetActive {
                resource_type: "pr".into(),
                url: "https://github.com/a/b/pull/7".into(),
            }],
            classify,
        )
        .unwrap_err();
        assert!(matches!(err, SessionError::InvalidOperation(_)));
    }

    #[test]
    fn wire_shape_deserializes() {
        let op: ResourceOp = serde_json::from_str(
            r#"{"action":"set_active","resource_type":"pr","url":"https://x"}"#,
        )
        .unwrap();
        assert!(matches!(op, ResourceOp::SetActive { .. }));
    }
}
