//! The periodic session sweep.
//!
//! Only sessions with a non-empty agent-side session id participate. Default
//! thresholds: 12 h idle → "still working?" card; the final hour before sleep
//! → expiry warning (updated in place on later sweeps); 24 h → sleeping with
//! a zzz emoji; sleeping + 7 d → deletion. On process shutdown every active
//! thread gets a short notice under a 5-second global cap.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use weft_core::config::{SchedulerConfig, SHUTDOWN_BROADCAST_MS};
use weft_core::types::SessionState;
use weft_sessions::coordinator::RequestCoordinator;
use weft_sessions::store::SessionStore;
use weft_sessions::types::Session;
use weft_slack::api::SlackApi;
use weft_slack::blocks;
use weft_slack::system::post_system_message;

/// Emoji marking an idle thread awaiting the user's check-in answer.
const IDLE_MARK: &str = "hourglass";
/// Emoji marking a sleeping session's thread.
const SLEEP_MARK: &str = "zzz";

pub struct SessionSweeper {
    store: Arc<SessionStore>,
    coordinator: Arc<RequestCoordinator>,
    slack: Arc<dyn SlackApi>,
    cfg: SchedulerConfig,
}

impl SessionSweeper {
    pub fn new(
        store: Arc<SessionStore>,
        coordinator: Arc<RequestCoordinator>,
        slack: Arc<dyn SlackApi>,
        cfg: SchedulerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            coordinator,
            slack,
            cfg,
        })
    }

    /// Main loop: sweep on an interval until `shutdown` broadcasts `true`,
    /// then notify active threads.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.cfg.sweep_interval_secs,
            "session sweeper started"
        );
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.cfg.sweep_interval_secs.max(1)));
        loop {
            tokio::select! {
                _ = interval.tick() => self.sweep().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("session sweeper shutting down");
                        self.notify_shutdown().await;
                        break;
                    }
                }
            }
        }
    }

    /// One pass over all sweepable sessions.
    pub async fn sweep(&self) {
        for session in self.store.get_all() {
            if !session.is_sweepable() {
                continue;
            }
            if let Err(e) = self.check_session(&session).await {
                error!(session = %session.key, error = %e, "sweep step failed");
            }
        }
    }

    async fn check_session(&self, session: &Session) -> weft_slack::Result<()> {
        let now = Utc::now();
        let key = &session.key;
        let idle = now.signed_duration_since(session.last_activity);
        let idle_secs = idle.num_seconds().max(0) as u64;

        if session.state == SessionState::Sleeping {
            let asleep_secs = session
                .sleep_started_at
                .map(|t| now.signed_duration_since(t).num_seconds().max(0) as u64)
                .unwrap_or(0);
            if asleep_secs >= self.cfg.expire_days * 24 * 3600 {
                info!(session = %key, "sleeping session expired — deleting");
                self.coordinator.cancel(key).await;
                self.store.terminate(key);
                let _ = post_system_message(
                    self.slack.as_ref(),
                    &key.channel,
                    key.root_ts(),
                    "7일간 잠들어 있던 세션이 만료되어 삭제되었습니다.",
                )
                .await;
            }
            return Ok(());
        }

        let sleep_secs = self.cfg.sleep_hours * 3600;
        let warn_secs = sleep_secs.saturating_sub(self.cfg.final_warning_minutes * 60);
        let idle_card_secs = self.cfg.idle_warning_hours * 3600;

        if idle_secs >= sleep_secs {
            self.put_to_sleep(session).await?;
        } else if idle_secs >= warn_secs {
            self.post_or_update_warning(session, sleep_secs - idle_secs)
                .await?;
        } else if idle_secs >= idle_card_secs && session.sweep.idle_card_at.is_none() {
            self.post_idle_card(session).await?;
        }
        Ok(())
    }

    async fn put_to_sleep(&self, session: &Session) -> weft_slack::Result<()> {
        let key = &session.key;
        info!(session = %key, "session entering sleep");

        self.store.update(key, |s| {
            s.state = SessionState::Sleeping;
            s.sleep_started_at = Some(Utc::now());
        });

        if let Some(root) = key.root_ts() {
            let _ = self.slack.add_reaction(&key.channel, root, SLEEP_MARK).await;
        }

        let text = format!(
            "24시간 동안 활동이 없어 세션이 잠들었습니다. {}일 후 자동 삭제됩니다. \
             메시지를 보내면 다시 깨어납니다.",
            self.cfg.expire_days
        );
        // Update the prior warning in place when one exists.
        match &session.sweep.warning_ts {
            Some(ts) => {
                self.slack
                    .update_message(&key.channel, ts, &text, None)
                    .await?
            }
            None => {
                post_system_message(self.slack.as_ref(), &key.channel, key.root_ts(), &text)
                    .await?;
            }
        }
        Ok(())
    }

    async fn post_or_update_warning(
        &self,
        session: &Session,
        remaining_secs: u64,
    ) -> weft_slack::Result<()> {
        let key = &session.key;
        let minutes = (remaining_secs / 60).max(1);
        let text = format!("이 세션은 약 {minutes}분 후 잠듭니다. 계속하려면 메시지를 보내주세요.");

        match &session.sweep.warning_ts {
            Some(ts) => {
                self.slack
                    .update_message(&key.channel, ts, &text, None)
                    .await?;
            }
            None => {
                let posted =
                    post_system_message(self.slack.as_ref(), &key.channel, key.root_ts(), &text)
                        .await?;
                self.store.update(key, |s| {
                    s.sweep.warning_ts = Some(posted.ts.clone());
                });
                debug!(session = %key, "expiry warning posted");
            }
        }
        Ok(())
    }

    async fn post_idle_card(&self, session: &Session) -> weft_slack::Result<()> {
        let key = &session.key;
        let value = json!({ "session": key.format() }).to_string();
        let card = vec![
            blocks::section("아직 작업 중이신가요? 이 세션은 12시간째 조용합니다."),
            blocks::actions(vec![
                blocks::button_styled("계속할게요", "session_keep", &value, "primary"),
                blocks::button_styled("닫아주세요", "session_close", &value, "danger"),
            ]),
        ];

        let opts = match key.root_ts() {
            Some(ts) => weft_slack::MessageOptions::in_thread(ts).with_blocks(card),
            None => weft_slack::MessageOptions::default().with_blocks(card),
        };
        self.slack
            .post_message(&key.channel, "아직 작업 중이신가요?", &opts)
            .await?;

        if let Some(root) = key.root_ts() {
            let _ = self.slack.add_reaction(&key.channel, root, IDLE_MARK).await;
        }
        self.store.update(key, |s| {
            s.sweep.idle_card_at = Some(Utc::now());
        });
        Ok(())
    }

    /// Best-effort shutdown notice to every active thread, capped globally.
    pub async fn notify_shutdown(&self) {
        let broadcast = async {
            for session in self.store.get_all() {
                if !session.is_sweepable() {
                    continue;
                }
                let key = &session.key;
                let _ = post_system_message(
                    self.slack.as_ref(),
                    &key.channel,
                    key.root_ts(),
                    "봇이 재시작됩니다. 진행 중이던 작업은 잠시 후 다시 요청해주세요.",
                )
                .await;
            }
        };
        if tokio::time::timeout(Duration::from_millis(SHUTDOWN_BROADCAST_MS), broadcast)
            .await
            .is_err()
        {
            warn!("shutdown broadcast hit the 5s cap — remaining threads skipped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::Mutex as StdMutex;
    use weft_core::types::SessionKey;
    use weft_slack::api::{BotIdentity, MessageOptions, PostedMessage};
    use weft_slack::error::Result as SlackResult;

    #[derive(Default)]
    struct FakeSlack {
        log: StdMutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl SlackApi for FakeSlack {
        async fn post_message(
            &self,
            channel: &str,
            text: &str,
            _opts: &MessageOptions,
        ) -> SlackResult<PostedMessage> {
            self.log
                .lock()
                .unwrap()
                .push(format!("post:{channel}:{text}"));
            Ok(PostedMessage { ts: "9.0".into() })
        }
        async fn update_message(
            &self,
            channel: &str,
            ts: &str,
            text: &str,
            _blocks: Option<Vec<serde_json::Value>>,
        ) -> SlackResult<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("update:{channel}:{ts}:{text}"));
            Ok(())
        }
        async fn post_ephemeral(&self, _: &str, _: &str, _: &str, _: Option<&str>) -> SlackResult<()> {
            Ok(())
        }
        async fn delete_message(&self, _: &str, _: &str) -> SlackResult<()> {
            Ok(())
        }
        async fn add_reaction(&self, channel: &str, ts: &str, emoji: &str) -> SlackResult<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("react:{channel}:{ts}:{emoji}"));
            Ok(())
        }
        async fn remove_reaction(&self, _: &str, _: &str, _: &str) -> SlackResult<()> {
            Ok(())
        }
        async fn get_permalink(&self, _: &str, _: &str) -> SlackResult<String> {
            Ok(String::new())
        }
        async fn conversations_info(&self, _: &str) -> SlackResult<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
        async fn users_info(&self, _: &str) -> SlackResult<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
        async fn auth_test(&self) -> SlackResult<BotIdentity> {
            Ok(BotIdentity {
                user_id: "U0".into(),
                team_id: "T0".into(),
            })
        }
        async fn open_view(&self, _: &str, _: serde_json::Value) -> SlackResult<()> {
            Ok(())
        }
        async fn set_thread_status(&self, _: &str, _: &str, _: &str) -> SlackResult<()> {
            Ok(())
        }
        async fn set_thread_title(&self, _: &str, _: &str, _: &str) -> SlackResult<()> {
            Ok(())
        }
    }

    fn setup() -> (Arc<SessionStore>, Arc<FakeSlack>, Arc<SessionSweeper>, SessionKey) {
        let store = Arc::new(SessionStore::new("m", "/w"));
        let coordinator = RequestCoordinator::new();
        let slack = Arc::new(FakeSlack::default());
        let sweeper = SessionSweeper::new(
            Arc::clone(&store),
            coordinator,
            slack.clone() as Arc<dyn SlackApi>,
            SchedulerConfig::default(),
        );
        let key = SessionKey::parse("C1:1.0").unwrap();
        store.get_or_create(&key, "U1");
        store.update(&key, |s| {
            s.agent_session_id = Some("sdk-1".into());
            s.state = SessionState::Main;
        });
        (store, slack, sweeper, key)
    }

    fn age(store: &SessionStore, key: &SessionKey, hours: i64) {
        store.update(key, |s| {
            s.last_activity = Utc::now() - ChronoDuration::hours(hours);
        });
    }

    #[tokio::test]
    async fn fresh_session_is_untouched() {
        let (_store, slack, sweeper, _key) = setup();
        sweeper.sweep().await;
        assert!(slack.log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sessions_without_agent_id_are_skipped() {
        let (store, slack, sweeper, key) = setup();
        store.update(&key, |s| s.agent_session_id = None);
        age(&store, &key, 30);
        sweeper.sweep().await;
        assert!(slack.log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn idle_card_posts_once() {
        let (store, slack, sweeper, key) = setup();
        age(&store, &key, 13);

        sweeper.sweep().await;
        sweeper.sweep().await;

        let log = slack.log.lock().unwrap().clone();
        let cards = log.iter().filter(|l| l.starts_with("post:")).count();
        assert_eq!(cards, 1);
        assert!(log.iter().any(|l| l == "react:C1:1.0:hourglass"));
        assert!(store.get(&key).unwrap().sweep.idle_card_at.is_some());
    }

    #[tokio::test]
    async fn warning_posts_then_updates_in_place() {
        let (store, slack, sweeper, key) = setup();
        age(&store, &key, 23);
        sweeper.sweep().await;
        assert_eq!(store.get(&key).unwrap().sweep.warning_ts.as_deref(), Some("9.0"));

        sweeper.sweep().await;
        let log = slack.log.lock().unwrap().clone();
        assert!(log.iter().any(|l| l.starts_with("update:C1:9.0:")));
    }

    #[tokio::test]
    async fn sleep_transition_marks_and_stamps() {
        let (store, slack, sweeper, key) = setup();
        age(&store, &key, 25);
        sweeper.sweep().await;

        let session = store.get(&key).unwrap();
        assert_eq!(session.state, SessionState::Sleeping);
        assert!(session.sleep_started_at.is_some());
        assert!(slack
            .log
            .lock()
            .unwrap()
            .iter()
            .any(|l| l == "react:C1:1.0:zzz"));
    }

    #[tokio::test]
    async fn expired_sleeping_session_is_deleted() {
        let (store, _slack, sweeper, key) = setup();
        store.update(&key, |s| {
            s.state = SessionState::Sleeping;
            s.sleep_started_at = Some(Utc::now() - ChronoDuration::days(8));
        });
        sweeper.sweep().await;
        assert!(store.get(&key).is_none());
    }

    #[tokio::test]
    async fn shutdown_notifies_active_threads() {
        let (_store, slack, sweeper, _key) = setup();
        sweeper.notify_shutdown().await;
        assert!(slack
            .log
            .lock()
            .unwrap()
            .iter()
            .any(|l| l.starts_with("post:C1:")));
    }
}
