//! The session record and its attached state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use weft_core::types::{
    LinkType, RenewPhase, SaveResult, SessionKey, SessionLink, SessionState, Workflow,
};
use weft_core::usage::SessionUsage;

/// Per-type link slots. At most one link of each type; setting replaces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkSlots {
    pub issue: Option<SessionLink>,
    pub pr: Option<SessionLink>,
    pub doc: Option<SessionLink>,
}

impl LinkSlots {
    pub fn get(&self, link_type: LinkType) -> Option<&SessionLink> {
        match link_type {
            LinkType::Issue => self.issue.as_ref(),
            LinkType::Pr => self.pr.as_ref(),
            LinkType::Doc => self.doc.as_ref(),
        }
    }

    pub fn set(&mut self, link: SessionLink) {
        match link.link_type {
            LinkType::Issue => self.issue = Some(link),
            LinkType::Pr => self.pr = Some(link),
            LinkType::Doc => self.doc = Some(link),
        }
    }

    pub fn clear(&mut self, link_type: LinkType) -> bool {
        let slot = match link_type {
            LinkType::Issue => &mut self.issue,
            LinkType::Pr => &mut self.pr,
            LinkType::Doc => &mut self.doc,
        };
        slot.take().is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SessionLink> {
        [self.issue.as_ref(), self.pr.as_ref(), self.doc.as_ref()]
            .into_iter()
            .flatten()
    }
}

/// Transient action-panel state: where the dashboard message lives and the
/// render key of the last payload posted there.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PanelState {
    pub message_ts: Option<String>,
    pub render_key: Option<String>,
    pub active_tool: Option<String>,
}

/// Bookkeeping for the scheduler's idle/warning/sleep transitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepState {
    /// When the "still working?" card was posted, if at all.
    pub idle_card_at: Option<DateTime<Utc>>,
    /// Message ts of the expiry warning, updated in place on later sweeps.
    pub warning_ts: Option<String>,
}

/// A live session: one Slack thread bound to one agent conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub key: SessionKey,
    /// The user whose message created the session. Immutable.
    pub owner: String,
    /// Whoever sent the current turn's message.
    pub initiator: String,
    pub title: Option<String>,
    pub workflow: Option<Workflow>,
    pub state: SessionState,
    pub model: String,
    pub working_dir: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub sleep_started_at: Option<DateTime<Utc>>,
    pub usage: SessionUsage,
    /// Renew protocol phase; `None` means no renew in progress.
    pub renew: Option<RenewPhase>,
    /// Carry-over message replayed after the renew load turn.
    pub renew_user_message: Option<String>,
    /// Captured `SAVE_CONTEXT_RESULT` payload.
    pub renew_save_result: Option<SaveResult>,
    pub links: LinkSlots,
    /// Which link per type the agent marked active (resource type → url).
    pub active_resources: HashMap<String, String>,
    /// Optimistic lock for `UPDATE_SESSION`; bumps once per applied request.
    pub sequence: u64,
    /// SDK-side conversation id; empty until the first turn completes.
    pub agent_session_id: Option<String>,
    /// Conversation-journal record id.
    pub conversation_id: Option<String>,
    pub panel: PanelState,
    pub sweep: SweepState,
}

impl Session {
    pub fn new(
        key: SessionKey,
        owner: impl Into<String>,
        model: impl Into<String>,
        working_dir: impl Into<String>,
    ) -> Self {
        let owner = owner.into();
        let now = Utc::now();
        Self {
            key,
            initiator: owner.clone(),
            owner,
            title: None,
            workflow: None,
            state: SessionState::Initializing,
            model: model.into(),
            working_dir: working_dir.into(),
            created_at: now,
            last_activity: now,
            sleep_started_at: None,
            usage: SessionUsage::default(),
            renew: None,
            renew_user_message: None,
            renew_save_result: None,
            links: LinkSlots::default(),
            active_resources: HashMap::new(),
            sequence: 0,
            agent_session_id: None,
            conversation_id: None,
            panel: PanelState::default(),
            sweep: SweepState::default(),
        }
    }

    /// Sessions join the scheduler sweep only once the agent side exists.
    pub fn is_sweepable(&self) -> bool {
        self.agent_session_id
            .as_deref()
            .is_some_and(|id| !id.is_empty())
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}
