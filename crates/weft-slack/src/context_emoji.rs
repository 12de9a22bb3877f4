//! Context-window emoji mirror: one bucket emoji on the thread-root message
//! showing how much of the model's context window remains.
//!
//! Buckets are floors: 82% remaining shows `80p`, 58% shows `40p`, 18% shows
//! `0p`. A "prompt too long" signal forces the `0p` bucket regardless of the
//! computed percentage.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::api::SlackApi;

/// Remaining-context bucket. The emoji names double as the wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextBucket {
    P80,
    P60,
    P40,
    P20,
    P0,
}

impl ContextBucket {
    /// Floor `remaining_percent` into a bucket.
    pub fn from_remaining(remaining_percent: u8) -> Self {
        match remaining_percent {
            80..=100 => ContextBucket::P80,
            60..=79 => ContextBucket::P60,
            40..=59 => ContextBucket::P40,
            20..=39 => ContextBucket::P20,
            _ => ContextBucket::P0,
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            ContextBucket::P80 => "80p",
            ContextBucket::P60 => "60p",
            ContextBucket::P40 => "40p",
            ContextBucket::P20 => "20p",
            ContextBucket::P0 => "0p",
        }
    }
}

#[derive(Default)]
struct Slot {
    channel: String,
    ts: String,
    current: Option<ContextBucket>,
}

/// Per-session context-window emoji state over a shared [`SlackApi`].
pub struct ContextEmoji<S: ?Sized> {
    api: Arc<S>,
    slots: DashMap<String, Arc<Mutex<Slot>>>,
}

impl<S: SlackApi + ?Sized> ContextEmoji<S> {
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

    /// Recompute the bucket from `remaining_percent` and reconcile the emoji.
    pub async fn update(
        &self,
        session_key: &str,
        channel: &str,
        root_ts: &str,
        remaining_percent: u8,
    ) {
        self.apply(
            session_key,
            channel,
            root_ts,
            ContextBucket::from_remaining(remaining_percent),
        )
        .await;
    }

    /// Force the empty bucket — used on a "prompt too long" model error.
    pub async fn force_empty(&self, session_key: &str, channel: &str, root_ts: &str) {
        self.apply(session_key, channel, root_ts, ContextBucket::P0)
            .await;
    }

    async fn apply(&self, session_key: &str, channel: &str, root_ts: &str, bucket: ContextBucket) {
        let slot = self.slot(session_key);
        let mut slot = slot.lock().await;

        let rebound = !slot.channel.is_empty() && (slot.channel != channel || slot.ts != root_ts);
        if slot.current == Some(bucket) && !rebound {
            return;
        }

        // Remove the old bucket — from the old message when the root rebinds.
        if let Some(old) = slot.current {
            let _ = self
                .api
                .remove_reaction(&slot.channel, &slot.ts, old.emoji())
                .await;
        }

        match self.api.add_reaction(channel, root_ts, bucket.emoji()).await {
            Ok(()) => {
                slot.channel = channel.to_string();
                slot.ts = root_ts.to_string();
                slot.current = Some(bucket);
            }
            Err(e) if e.is_benign_reaction_error() => {
                slot.channel = channel.to_string();
                slot.ts = root_ts.to_string();
                slot.current = Some(bucket);
            }
            Err(e) => {
                debug!(session = session_key, error = %e, "context emoji add failed");
            }
        }
    }

    /// Remove the current emoji and forget the session's slot.
    pub async fn clear(&self, session_key: &str) {
        if let Some((_, slot)) = self.slots.remove(session_key) {
            let slot = slot.lock().await;
            if let Some(bucket) = slot.current {
                let _ = self
                    .api
                    .remove_reaction(&slot.channel, &slot.ts, bucket.emoji())
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactions::tests::RecordingApi;

    #[test]
    fn bucket_floors() {
        assert_eq!(ContextBucket::from_remaining(100), ContextBucket::P80);
        assert_eq!(ContextBucket::from_remaining(82), ContextBucket::P80);
        assert_eq!(ContextBucket::from_remaining(80), ContextBucket::P80);
        assert_eq!(ContextBucket::from_remaining(79), ContextBucket::P60);
        assert_eq!(ContextBucket::from_remaining(58), ContextBucket::P40);
        assert_eq!(ContextBucket::from_remaining(20), ContextBucket::P20);
        assert_eq!(ContextBucket::from_remaining(18), ContextBucket::P0);
        assert_eq!(ContextBucket::from_remaining(0), ContextBucket::P0);
    }

    #[tokio::test]
    async fn transitions_skip_untouched_buckets() {
        let api = Arc::new(RecordingApi::default());
        let ctx = ContextEmoji::new(api.clone());

        // 82 → 58 → 18: only 80p, 40p, 0p ever appear.
        ctx.update("k", "C1", "1.0", 82).await;
        ctx.update("k", "C1", "1.0", 58).await;
        ctx.update("k", "C1", "1.0", 18).await;

        let log = api.log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec![
                "add:1.0:80p",
                "del:1.0:80p",
                "add:1.0:40p",
                "del:1.0:40p",
                "add:1.0:0p",
            ]
        );
    }

    #[tokio::test]
    async fn rebind_removes_from_old_message() {
        let api = Arc::new(RecordingApi::default());
        let ctx = ContextEmoji::new(api.clone());

        ctx.update("k", "C1", "1.0", 85).await;
        ctx.update("k", "C1", "2.0", 85).await;

        let log = api.log.lock().unwrap().clone();
        assert_eq!(log, vec!["add:1.0:80p", "del:1.0:80p", "add:2.0:80p"]);
    }

    #[tokio::test]
    async fn prompt_too_long_forces_empty() {
        let api = Arc::new(RecordingApi::default());
        let ctx = ContextEmoji::new(api.clone());

        ctx.update("k", "C1", "1.0", 90).await;
        ctx.force_empty("k", "C1", "1.0").await;

        let log = api.log.lock().unwrap().clone();
        assert_eq!(log.last().unwrap(), "add:1.0:0p");
    }
}
