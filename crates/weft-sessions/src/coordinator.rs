//! Single-in-flight request discipline per session.
//!
//! `try_begin` hands out an RAII guard holding the request's cancellation
//! token; dropping the guard releases the slot and wakes any `cancel` waiter.
//! Exactly zero or one stream runs per session key at any time.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use weft_core::types::SessionKey;

use crate::error::{Result, SessionError};

struct ActiveRequest {
    id: Uuid,
    token: CancellationToken,
    done_rx: watch::Receiver<bool>,
}

#[derive(Default)]
pub struct RequestCoordinator {
    active: DashMap<String, ActiveRequest>,
}

/// RAII handle for one in-flight request. Dropping it releases the session's
/// slot and signals completion to any canceller waiting to join.
pub struct RequestGuard {
    key: String,
    id: Uuid,
    token: CancellationToken,
    done_tx: watch::Sender<bool>,
    coordinator: Arc<RequestCoordinator>,
}

impl RequestGuard {
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn request_id(&self) -> Uuid {
        self.id
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        // Remove only our own registration — a racing try_begin may have
        // already installed a newer request under the same key.
        self.coordinator
            .active
            .remove_if(&self.key, |_, req| req.id == self.id);
        let _ = self.done_tx.send(true);
    }
}

impl RequestCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim the session's request slot. Fails with `RequestActive` when a
    /// request is already running for this key.
    pub fn try_begin(self: &Arc<Self>, key: &SessionKey) -> Result<RequestGuard> {
        let key_str = key.format();
        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);

        let entry = self.active.entry(key_str.clone());
        match entry {
            dashmap::Entry::Occupied(_) => Err(SessionError::RequestActive { key: key_str }),
            dashmap::Entry::Vacant(slot) => {
                slot.insert(ActiveRequest {
                    id,
                    token: token.clone(),
                    done_rx,
                });
                debug!(session = %key, request = %id, "request slot claimed");
                Ok(RequestGuard {
                    key: key_str,
                    id,
                    token,
                    done_tx,
                    coordinator: Arc::clone(self),
                })
            }
        }
    }

    /// Cancel the active request (if any) and wait for it to finish.
    pub async fn cancel(&self, key: &SessionKey) {
        let waiter = {
            let Some(req) = self.active.get(&key.format()) else {
                return;
            };
            req.token.cancel();
            req.done_rx.clone()
            // Guard dropped here — never await while holding a shard lock.
        };
        let mut waiter = waiter;
        while !*waiter.borrow() {
            if waiter.changed().await.is_err() {
                break;
            }
        }
        debug!(session = %key, "request cancelled and joined");
    }

    /// Truthful snapshot for UI rendering and command gating.
    pub fn is_active(&self, key: &SessionKey) -> bool {
        self.active.contains_key(&key.format())
    }
}
