//! In-memory session store keyed by `{channel}:{thread_ts}`.
//!
//! The store exclusively owns session records; callers read clones and
//! mutate through the named operations only. A `DashMap` shards the lock so
//! unrelated sessions never contend.

use dashmap::DashMap;
use tracing::{debug, info};

use weft_core::types::{SessionKey, SessionLink, SessionState};
use weft_core::usage::SessionUsage;

use crate::types::Session;

pub struct SessionStore {
    sessions: DashMap<String, Session>,
    default_model: String,
    default_working_dir: String,
}

impl SessionStore {
    pub fn new(default_model: impl Into<String>, default_working_dir: impl Into<String>) -> Self {
        Self {
            sessions: DashMap::new(),
            default_model: default_model.into(),
            default_working_dir: default_working_dir.into(),
        }
    }

    pub fn get(&self, key: &SessionKey) -> Option<Session> {
        self.sessions.get(&key.format()).map(|s| s.value().clone())
    }

    /// Return the existing session or create one owned by `owner`.
    pub fn get_or_create(&self, key: &SessionKey, owner: &str) -> Session {
        self.sessions
            .entry(key.format())
            .or_insert_with(|| {
                info!(session = %key, owner, "session created");
                Session::new(
                    key.clone(),
                    owner,
                    &self.default_model,
                    &self.default_working_dir,
                )
            })
            .clone()
    }

    /// Apply `mutate` to the stored session. Returns `false` when absent.
    pub fn update<F>(&self, key: &SessionKey, mutate: F) -> bool
    where
        F: FnOnce(&mut Session),
    {
        match self.sessions.get_mut(&key.format()) {
            Some(mut entry) => {
                mutate(&mut entry);
                true
            }
            None => false,
        }
    }

    /// Reset the agent-side context: clears the SDK session id, workflow,
    /// usage, and renew state, and returns to `Initializing`. Owner, working
    /// directory, and attached links survive. Returns whether a session
    /// existed.
    pub fn reset_context(&self, key: &SessionKey) -> bool {
        let existed = self.update(key, |s| {
            s.agent_session_id = None;
            s.workflow = None;
            s.usage = SessionUsage::default();
            s.renew = None;
            s.renew_user_message = None;
            s.renew_save_result = None;
            s.state = SessionState::Initializing;
            s.sleep_started_at = None;
            s.touch();
        });
        if existed {
            debug!(session = %key, "context reset");
        }
        existed
    }

    /// Remove the session entirely. The caller cancels any active request
    /// and drops tracked reactions for the key.
    pub fn terminate(&self, key: &SessionKey) -> Option<Session> {
        let removed = self.sessions.remove(&key.format()).map(|(_, s)| s);
        if removed.is_some() {
            info!(session = %key, "session terminated");
        }
        removed
    }

    /// Upsert one link, replacing any previous link of the same type.
    pub fn set_link(&self, key: &SessionKey, link: SessionLink) -> bool {
        self.update(key, |s| {
            s.links.set(link);
        })
    }

    pub fn get_all(&self) -> Vec<Session> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
