//! Process-wide token-bucket limiter for Slack API calls.
//!
//! Defaults: 10-token burst, 3 tokens/s refill, 100 ms minimum gap between
//! calls. On a `ratelimited` response the bucket is drained, the call waits
//! out the Retry-After hint, and is retried exactly once.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use weft_core::config::LimiterConfig;

use crate::api::{BotIdentity, MessageOptions, PostedMessage, SlackApi};
use crate::error::{Result, SlackError};

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_call: Option<Instant>,
    /// Set after a `ratelimited` response; no call proceeds before this.
    blocked_until: Option<Instant>,
}

pub struct RateLimiter {
    burst: f64,
    refill_per_sec: f64,
    min_gap: Duration,
    state: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(cfg: &LimiterConfig) -> Self {
        Self {
            burst: cfg.burst as f64,
            refill_per_sec: cfg.refill_per_sec as f64,
            min_gap: Duration::from_millis(cfg.min_gap_ms),
            state: Mutex::new(Bucket {
                tokens: cfg.burst as f64,
                last_refill: Instant::now(),
                last_call: None,
                blocked_until: None,
            }),
        }
    }

    /// Wait until a token, the minimum gap, and any rate-limit penalty all
    /// permit the next call, then consume one token.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.state.lock().await;
                let now = Instant::now();

                // Refill from elapsed time, capped at the burst size.
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.burst);
                bucket.last_refill = now;

                let mut earliest = now;
                if let Some(blocked) = bucket.blocked_until {
                    if blocked > earliest {
                        earliest = blocked;
                    }
                }
                if let Some(last) = bucket.last_call {
                    let gap_end = last + self.min_gap;
                    if gap_end > earliest {
                        earliest = gap_end;
                    }
                }

                if earliest <= now && bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    bucket.last_call = Some(now);
                    bucket.blocked_until = None;
                    return;
                }

                if earliest > now {
                    earliest - now
                } else {
                    // Token shortfall: time until one token refills.
                    Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_per_sec)
                }
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Drain the bucket and block all callers for `retry_after`.
    pub async fn penalize(&self, retry_after: Duration) {
        let mut bucket = self.state.lock().await;
        bucket.tokens = 0.0;
        bucket.blocked_until = Some(Instant::now() + retry_after);
        debug!(retry_after_ms = retry_after.as_millis() as u64, "rate limiter penalized");
    }
}

/// [`SlackApi`] wrapper that routes every call through the shared limiter.
pub struct Limited<S> {
    inner: S,
    limiter: RateLimiter,
}

impl<S: SlackApi> Limited<S> {
    pub fn new(inner: S, cfg: &LimiterConfig) -> Self {
        Self {
            inner,
            limiter: RateLimiter::new(cfg),
        }
    }

    /// Acquire, call, and retry at most once after a `ratelimited` response.
    async fn call<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.limiter.acquire().await;
        match f().await {
            Err(SlackError::RateLimited { retry_after_secs }) => {
                warn!(retry_after_secs, "Slack rate limited — requeueing call");
                self.limiter
                    .penalize(Duration::from_secs(retry_after_secs))
                    .await;
                self.limiter.acquire().await;
                f().await
            }
            other => other,
        }
    }
}

#[async_trait::async_trait]
impl<S: SlackApi> SlackApi for Limited<S> {
    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        opts: &MessageOptions,
    ) -> Result<PostedMessage> {
        self.call(|| self.inner.post_message(channel, text, opts))
            .await
    }

    async fn update_message(
        &self,
        channel: &str,
        ts: &str,
        text: &str,
        blocks: Option<Vec<serde_json::Value>>,
    ) -> Result<()> {
        self.call(|| self.inner.update_message(channel, ts, text, blocks.clone()))
            .await
    }

    async fn post_ephemeral(
        &self,
        channel: &str,
        user: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<()> {
        self.call(|| self.inner.post_ephemeral(channel, user, text, thread_ts))
            .await
    }

    async fn delete_message(&self, channel: &str, ts: &str) -> Result<()> {
        self.call(|| self.inner.delete_message(channel, ts)).await
    }

    async fn add_reaction(&self, channel: &str, ts: &str, emoji: &str) -> Result<()> {
        self.call(|| self.inner.add_reaction(channel, ts, emoji))
            .await
    }

    async fn remove_reaction(&self, channel: &str, ts: &str, emoji: &str) -> Result<()> {
        self.call(|| self.inner.remove_reaction(channel, ts, emoji))
            .await
    }

    async fn get_permalink(&self, channel: &str, ts: &str) -> Result<String> {
        self.call(|| self.inner.get_permalink(channel, ts)).await
    }

    async fn conversations_info(&self, channel: &str) -> Result<serde_json::Value> {
        self.call(|| self.inner.conversations_info(channel)).await
    }

    async fn users_info(&self, user: &str) -> Result<serde_json::Value> {
        self.call(|| self.inner.users_info(user)).await
    }

    async fn auth_test(&self) -> Result<BotIdentity> {
        self.call(|| self.inner.auth_test()).await
    }

    async fn open_view(&self, trigger_id: &str, view: serde_json::Value) -> Result<()> {
        self.call(|| self.inner.open_view(trigger_id, view.clone()))
            .await
    }

    async fn set_thread_status(&self, channel: &str, thread_ts: &str, status: &str) -> Result<()> {
        self.call(|| self.inner.set_thread_status(channel, thread_ts, status))
            .await
    }

    async fn set_thread_title(&self, channel: &str, thread_ts: &str, title: &str) -> Result<()> {
        self.call(|| self.inner.set_thread_title(channel, thread_ts, title))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn limiter(burst: u32, refill: u32, gap_ms: u64) -> RateLimiter {
        RateLimiter::new(&LimiterConfig {
            burst,
            refill_per_sec: refill,
            min_gap_ms: gap_ms,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn burst_then_refill() {
        let l = limiter(2, 1, 0);
        l.acquire().await;
        l.acquire().await;

        // Bucket empty: the third acquire needs ~1s of refill.
        let start = Instant::now();
        l.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn min_gap_enforced() {
        let l = limiter(10, 10, 100);
        let start = Instant::now();
        l.acquire().await;
        l.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn penalty_blocks_until_retry_after() {
        let l = limiter(10, 10, 0);
        l.penalize(Duration::from_secs(3)).await;
        let start = Instant::now();
        l.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    struct FlakyApi {
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl SlackApi for FlakyApi {
        async fn post_message(
            &self,
            _channel: &str,
            _text: &str,
            _opts: &MessageOptions,
        ) -> Result<PostedMessage> {
            // First call rate-limited, second succeeds.
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(SlackError::RateLimited {
                    retry_after_secs: 1,
                })
            } else {
                Ok(PostedMessage { ts: "1.0".into() })
            }
        }

        async fn update_message(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: Option<Vec<serde_json::Value>>,
        ) -> Result<()> {
            Ok(())
        }
        async fn post_ephemeral(&self, _: &str, _: &str, _: &str, _: Option<&str>) -> Result<()> {
            Ok(())
        }
        async fn delete_message(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn add_reaction(&self, _: &str, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn remove_reaction(&self, _: &str, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn get_permalink(&self, _: &str, _: &str) -> Result<String> {
            Ok(String::new())
        }
        async fn conversations_info(&self, _: &str) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
        async fn users_info(&self, _: &str) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
        async fn auth_test(&self) -> Result<BotIdentity> {
            Ok(BotIdentity {
                user_id: "U0".into(),
                team_id: "T0".into(),
            })
        }
        async fn open_view(&self, _: &str, _: serde_json::Value) -> Result<()> {
            Ok(())
        }
        async fn set_thread_status(&self, _: &str, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn set_thread_title(&self, _: &str, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ratelimited_call_retries_once() {
        let api = Limited::new(
            FlakyApi {
                calls: AtomicU32::new(0),
            },
            &LimiterConfig::default(),
        );
        let posted = api
            .post_message("C1", "hello", &MessageOptions::default())
            .await
            .expect("retry should succeed");
        assert_eq!(posted.ts, "1.0");
        assert_eq!(api.inner.calls.load(Ordering::SeqCst), 2);
    }
}
