//! The save→reset→load renew protocol.
//!
//! Renew preserves conversational continuity across a deliberate context
//! reset: the agent first persists a context snapshot (`SAVE_CONTEXT_RESULT`),
//! the session's agent-side context is reset, and a continuation prompt
//! reloads the snapshot in the fresh context.
//!
//! Phases on `session.renew`:
//!   `None → PendingSave` on command acceptance,
//!   `PendingSave → PendingLoad` once a save payload is captured,
//!   `PendingLoad → None` after the load turn completes.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use weft_agent::scan::extract_object;
use weft_core::types::{RenewPhase, SaveResult, SessionKey};

use crate::coordinator::RequestCoordinator;
use crate::error::{Result, SessionError};
use crate::store::SessionStore;

pub struct RenewController {
    store: Arc<SessionStore>,
    coordinator: Arc<RequestCoordinator>,
}

impl RenewController {
    pub fn new(store: Arc<SessionStore>, coordinator: Arc<RequestCoordinator>) -> Self {
        Self { store, coordinator }
    }

    /// Accept a `renew` command: enter `PendingSave`.
    ///
    /// Preconditions: the session exists, no request is in flight, and no
    /// renew is already running. A stale save result from a previously
    /// aborted attempt is cleared on entry.
    pub fn begin(&self, key: &SessionKey, user_message: Option<String>) -> Result<()> {
        let Some(session) = self.store.get(key) else {
            return Err(SessionError::NotFound { key: key.format() });
        };
        if self.coordinator.is_active(key) {
            return Err(SessionError::RequestActive { key: key.format() });
        }
        if session.renew.is_some() {
            return Err(SessionError::Renew("renew already in progress".into()));
        }

        self.store.update(key, |s| {
            s.renew = Some(RenewPhase::PendingSave);
            s.renew_user_message = user_message.clone();
            s.renew_save_result = None;
        });
        info!(session = %key, "renew entered pending_save");
        Ok(())
    }

    /// Capture a save payload from the `SAVE_CONTEXT_RESULT` model command.
    /// Only admissible while `PendingSave`.
    pub fn capture_save_result(&self, key: &SessionKey, save: SaveResult) -> Result<()> {
        let Some(session) = self.store.get(key) else {
            return Err(SessionError::NotFound { key: key.format() });
        };
        if session.renew != Some(RenewPhase::PendingSave) {
            return Err(SessionError::Renew(format!(
                "SAVE_CONTEXT_RESULT outside pending_save (phase: {:?})",
                session.renew
            )));
        }

        info!(session = %key, save_id = %save.id, "renew save captured");
        self.store.update(key, |s| {
            s.renew_save_result = Some(save.clone());
            s.renew = Some(RenewPhase::PendingLoad);
        });
        Ok(())
    }

    /// Settle the save turn. If the tool path already advanced the phase this
    /// is a no-op; otherwise the turn's collected text is scanned for the
    /// `{"save_result": …}` fallback. When neither produced a payload the
    /// renew fails visibly and the session is left untouched (flags cleared,
    /// no reset).
    pub fn resolve_after_save_turn(&self, key: &SessionKey, collected_text: &str) -> Result<SaveResult> {
        let Some(session) = self.store.get(key) else {
            return Err(SessionError::NotFound { key: key.format() });
        };

        match session.renew {
            Some(RenewPhase::PendingLoad) => {
                // Tool path already captured the payload.
                session
                    .renew_save_result
                    .ok_or_else(|| SessionError::Renew("pending_load without save result".into()))
            }
            Some(RenewPhase::PendingSave) => match scan_save_result(collected_text) {
                Some(save) => {
                    self.capture_save_result(key, save.clone())?;
                    Ok(save)
                }
                None => {
                    warn!(session = %key, "no SAVE_CONTEXT_RESULT detected in save turn");
                    self.clear(key);
                    Err(SessionError::Renew(
                        "save step produced no SAVE_CONTEXT_RESULT".into(),
                    ))
                }
            },
            _ => Err(SessionError::Renew("no renew in progress".into())),
        }
    }

    /// The prompt that re-enters the stream after `reset_context`:
    /// `load <save_id> then <renew message>`.
    pub fn continuation_prompt(&self, key: &SessionKey) -> Option<String> {
        let session = self.store.get(key)?;
        if session.renew != Some(RenewPhase::PendingLoad) {
            return None;
        }
        let save = session.renew_save_result?;
        Some(match session.renew_user_message {
            Some(message) if !message.trim().is_empty() => {
                format!("load {} then {}", save.id, message.trim())
            }
            _ => format!("load {}", save.id),
        })
    }

    /// Reset the agent-side context and arm the load turn.
    ///
    /// `reset_context` clears renew state wholesale, so the pending-load
    /// phase and save payload are re-armed on the fresh session before the
    /// continuation prompt is returned.
    pub fn prepare_load(&self, key: &SessionKey) -> Result<String> {
        let prompt = self
            .continuation_prompt(key)
            .ok_or_else(|| SessionError::Renew("prepare_load outside pending_load".into()))?;
        let session = self.store.get(key).ok_or_else(|| SessionError::NotFound {
            key: key.format(),
        })?;
        let (save, message) = (session.renew_save_result, session.renew_user_message);

        self.store.reset_context(key);
        self.store.update(key, |s| {
            s.renew = Some(RenewPhase::PendingLoad);
            s.renew_save_result = save.clone();
            s.renew_user_message = message.clone();
        });
        Ok(prompt)
    }

    /// Exit the protocol after a successful load turn: phase, carry-over
    /// message, and save id are all cleared.
    pub fn complete_load(&self, key: &SessionKey) -> Result<()> {
        let Some(session) = self.store.get(key) else {
            return Err(SessionError::NotFound { key: key.format() });
        };
        if session.renew != Some(RenewPhase::PendingLoad) {
            return Err(SessionError::Renew("complete_load outside pending_load".into()));
        }
        self.clear(key);
        info!(session = %key, "renew completed");
        Ok(())
    }

    /// Abandon the protocol, clearing all renew state.
    pub fn clear(&self, key: &SessionKey) {
        self.store.update(key, |s| {
            s.renew = None;
            s.renew_user_message = None;
            s.renew_save_result = None;
        });
    }
}

/// Scan assistant text for the `{"save_result": …}` fallback object.
pub fn scan_save_result(text: &str) -> Option<SaveResult> {
    let (value, _) = extract_object(text, |v| v.get("save_result").is_some())?;
    parse_save_payload(&value["save_result"])
}

/// Parse a save payload (`result` of the tool, or the fallback object).
///
/// `success: false` or a missing/empty id yields `None`; `path` is accepted
/// as an alias for `dir`; file entries contribute their names.
pub fn parse_save_payload(value: &Value) -> Option<SaveResult> {
    if value["success"] == Value::Bool(false) || value.get("error").is_some_and(|e| !e.is_null()) {
        return None;
    }
    let id = value["id"].as_str()?.trim().to_string();
    if id.is_empty() {
        return None;
    }

    let files = value["files"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|f| f["name"].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    Some(SaveResult {
        id,
        dir: value["dir"]
            .as_str()
            .or_else(|| value["path"].as_str())
            .map(String::from),
        files,
        summary: value["summary"]
            .as_str()
            .or_else(|| value["title"].as_str())
            .map(String::from),
    })
}
