//! Status-reaction mirror: one emoji on the thread-root message reflecting
//! the session's processing state.
//!
//! Transitions remove the previous emoji before adding the new one. The state
//! change only commits when the add succeeds, so a failed transition retries
//! naturally on the next update. Mutations are serialized per session.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::api::SlackApi;
use crate::error::SlackError;

/// Fixed vocabulary of status reactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Thinking,
    Working,
    Completed,
    Error,
    Cancelled,
}

impl Status {
    pub fn emoji(&self) -> &'static str {
        match self {
            Status::Thinking => "thought_balloon",
            Status::Working => "hammer_and_wrench",
            Status::Completed => "white_check_mark",
            Status::Error => "x",
            Status::Cancelled => "octagonal_sign",
        }
    }
}

#[derive(Default)]
struct Slot {
    channel: String,
    ts: String,
    current: Option<Status>,
}

/// Per-session status reaction state over a shared [`SlackApi`].
pub struct StatusReactions<S: ?Sized> {
    api: Arc<S>,
    slots: DashMap<String, Arc<Mutex<Slot>>>,
}

impl<S: SlackApi + ?Sized> StatusReactions<S> {
    pub fn new(api: Arc<S>) -> Self {
        Self {
            api,
            slots: DashMap::new(),
        }
    }

    fn slot(&self, session_key: &str) -> Arc<Mutex<Slot>> {
        self.slots
            .entry(session_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Slot::default())))
            .clone()
    }

    /// Transition the session's status emoji on its thread-root message.
    pub async fn update(&self, session_key: &str, channel: &str, root_ts: &str, status: Status) {
        let slot = self.slot(session_key);
        let mut slot = slot.lock().await;

        // Same emoji on the same message — nothing to do.
        if slot.current == Some(status) && slot.channel == channel && slot.ts == root_ts {
            return;
        }

        // Remove the previous emoji first (from the old binding if it moved).
        if let Some(old) = slot.current {
            let (ch, ts) = (slot.channel.clone(), slot.ts.clone());
            if !ch.is_empty() {
                swallow_benign(self.api.remove_reaction(&ch, &ts, old.emoji()).await);
            }
        }

        match self.api.add_reaction(channel, root_ts, status.emoji()).await {
            Ok(()) => {
                slot.channel = channel.to_string();
                slot.ts = root_ts.to_string();
                slot.current = Some(status);
            }
            Err(e) if e.is_benign_reaction_error() => {
                slot.channel = channel.to_string();
                slot.ts = root_ts.to_string();
                slot.current = Some(status);
            }
            Err(e) => {
                // Do not commit — the next update retries the transition.
                debug!(session = session_key, error = %e, "status reaction add failed");
            }
        }
    }

    /// Remove the current emoji and forget the session's slot.
    pub async fn clear(&self, session_key: &str) {
        if let Some((_, slot)) = self.slots.remove(session_key) {
            let slot = slot.lock().await;
            if let Some(status) = slot.current {
                swallow_benign(
                    self.api
                        .remove_reaction(&slot.channel, &slot.ts, status.emoji())
                        .await,
                );
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn current(&self, session_key: &str) -> Option<Status> {
        let slot = self.slot(session_key);
        let slot = slot.lock().await;
        slot.current
    }
}

fn swallow_benign(result: crate::error::Result<()>) {
    if let Err(e) = result {
        if !matches!(&e, SlackError::Api { .. }) || !e.is_benign_reaction_error() {
            debug!(error = %e, "reaction removal failed");
        }
    }
}
