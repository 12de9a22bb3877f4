//! Process-level application state.
//!
//! Everything that used to be a module-scoped singleton lives here, created
//! once at startup and threaded through the components explicitly. Teardown
//! happens in `main`: shutdown watch → sweeper notice → request cancellation.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use weft_agent::client::AgentClient;
use weft_core::config::WeftConfig;
use weft_dispatch::DispatchService;
use weft_recorder::Recorder;
use weft_sessions::coordinator::RequestCoordinator;
use weft_sessions::renew::RenewController;
use weft_sessions::store::SessionStore;
use weft_slack::api::SlackApi;
use weft_slack::context_emoji::ContextEmoji;
use weft_slack::reactions::StatusReactions;

use crate::forms::ChoiceCoordinator;

/// Per-user knobs consumed by the router and the turn pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPrefs {
    /// Tool-permission bypass flag, read by the permission UI.
    pub bypass: bool,
    pub persona: Option<String>,
    pub model: Option<String>,
}

/// A message (re-)entering the pipeline: fresh from Slack or synthesized by
/// a completed choice form.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub user: String,
    pub channel: String,
    pub thread_ts: Option<String>,
    pub text: String,
}

pub struct AppState {
    pub config: WeftConfig,
    pub slack: Arc<dyn SlackApi>,
    pub agent: Arc<dyn AgentClient>,
    pub store: Arc<SessionStore>,
    pub coordinator: Arc<RequestCoordinator>,
    pub renew: RenewController,
    pub dispatch: DispatchService,
    pub recorder: Arc<Recorder>,
    pub reactions: StatusReactions<dyn SlackApi>,
    pub context_emoji: ContextEmoji<dyn SlackApi>,
    pub forms: ChoiceCoordinator,
    pub prefs: DashMap<String, UserPrefs>,
    /// Feeds completed forms and continuations back into the message loop.
    pub reentry_tx: mpsc::Sender<InboundMessage>,
}

impl AppState {
    pub fn new(
        config: WeftConfig,
        slack: Arc<dyn SlackApi>,
        agent: Arc<dyn AgentClient>,
        recorder: Arc<Recorder>,
        reentry_tx: mpsc::Sender<InboundMessage>,
    ) -> Arc<Self> {
        let store = Arc::new(SessionStore::new(
            &config.agent.model,
            &config.agent.working_dir,
        ));
        let coordinator = RequestCoordinator::new();
        let renew = RenewController::new(Arc::clone(&store), Arc::clone(&coordinator));
        let dispatch = DispatchService::new(Arc::clone(&agent), &config.agent.classifier_model);

        Arc::new(Self {
            reactions: StatusReactions::new(Arc::clone(&slack)),
            context_emoji: ContextEmoji::new(Arc::clone(&slack)),
            forms: ChoiceCoordinator::new(Arc::clone(&slack), reentry_tx.clone()),
            config,
            slack,
            agent,
            store,
            coordinator,
            renew,
            dispatch,
            recorder,
            prefs: DashMap::new(),
            reentry_tx,
        })
    }

    pub fn prefs_for(&self, user: &str) -> UserPrefs {
        self.prefs
            .get(user)
            .map(|p| p.value().clone())
            .unwrap_or_default()
    }

    pub fn update_prefs<F: FnOnce(&mut UserPrefs)>(&self, user: &str, mutate: F) {
        let mut entry = self.prefs.entry(user.to_string()).or_default();
        mutate(&mut entry);
    }
}
