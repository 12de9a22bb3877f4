use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Questions per chunk when a multi-question form is split across messages.
/// Six keeps the rendered card under Slack's 50-block message cap.
pub const FORM_CHUNK_QUESTIONS: usize = 6;
/// Slack's hard limit on blocks per message.
pub const MAX_BLOCKS_PER_MESSAGE: usize = 50;
/// Global cap on the shutdown notice broadcast.
pub const SHUTDOWN_BROADCAST_MS: u64 = 5_000;

/// Top-level config (weft.toml + WEFT_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WeftConfig {
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub limiter: LimiterConfig,
    #[serde(default)]
    pub viewer: ViewerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SlackConfig {
    /// Bot token (xoxb-…). Resolved at startup; empty means offline/test mode.
    #[serde(default)]
    pub bot_token: String,
    /// Socket-mode app token (xapp-…).
    #[serde(default)]
    pub app_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Main conversational model.
    #[serde(default = "default_model")]
    pub model: String,
    /// Cheap model for classification and summaries.
    #[serde(default = "default_classifier_model")]
    pub classifier_model: String,
    /// Fixed working directory handed to the agent; `cwd` setting is disabled.
    #[serde(default = "default_working_dir")]
    pub working_dir: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            classifier_model: default_classifier_model(),
            working_dir: default_working_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Base directory; conversation records live in `{base_dir}/conversations`.
    #[serde(default = "default_base_dir")]
    pub base_dir: String,
    /// External tool-server configuration consumed by the `mcp` command.
    #[serde(default = "default_mcp_servers")]
    pub mcp_servers: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            mcp_servers: default_mcp_servers(),
        }
    }
}

impl DataConfig {
    pub fn conversations_dir(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.base_dir).join("conversations")
    }
}

/// Idle/warning/sleep/expiry thresholds for the session sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Hours of inactivity before the "still working?" card.
    #[serde(default = "default_idle_warning_hours")]
    pub idle_warning_hours: u64,
    /// Minutes before sleep when the expiry warning posts.
    #[serde(default = "default_final_warning_minutes")]
    pub final_warning_minutes: u64,
    /// Hours of inactivity before the session sleeps.
    #[serde(default = "default_sleep_hours")]
    pub sleep_hours: u64,
    /// Days asleep before the session is deleted.
    #[serde(default = "default_expire_days")]
    pub expire_days: u64,
    /// Sweep cadence in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_warning_hours: default_idle_warning_hours(),
            final_warning_minutes: default_final_warning_minutes(),
            sleep_hours: default_sleep_hours(),
            expire_days: default_expire_days(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Token-bucket tuning for the shared Slack API limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    #[serde(default = "default_burst")]
    pub burst: u32,
    #[serde(default = "default_refill_per_sec")]
    pub refill_per_sec: u32,
    #[serde(default = "default_min_gap_ms")]
    pub min_gap_ms: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            burst: default_burst(),
            refill_per_sec: default_refill_per_sec(),
            min_gap_ms: default_min_gap_ms(),
        }
    }
}

/// Listen address for the conversation viewer (served out-of-process).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerConfig {
    #[serde(default = "default_viewer_host")]
    pub host: String,
    #[serde(default = "default_viewer_port")]
    pub port: u16,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            host: default_viewer_host(),
            port: default_viewer_port(),
        }
    }
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}
fn default_classifier_model() -> String {
    "claude-haiku-4-5".to_string()
}
fn default_working_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/work")
}
fn default_base_dir() -> String {
    "data".to_string()
}
fn default_mcp_servers() -> String {
    "mcp-servers.json".to_string()
}
fn default_idle_warning_hours() -> u64 {
    12
}
fn default_final_warning_minutes() -> u64 {
    60
}
fn default_sleep_hours() -> u64 {
    24
}
fn default_expire_days() -> u64 {
    7
}
fn default_sweep_interval_secs() -> u64 {
    300
}
fn default_burst() -> u32 {
    10
}
fn default_refill_per_sec() -> u32 {
    3
}
fn default_min_gap_ms() -> u64 {
    100
}
fn default_viewer_host() -> String {
    "127.0.0.1".to_string()
}
fn default_viewer_port() -> u16 {
    8787
}

impl WeftConfig {
    /// Load config from a TOML file with WEFT_* env var overrides.
    ///
    /// Checks in order: explicit path argument, then `./weft.toml`.
    /// A missing file is fine — defaults plus env cover the minimal setup.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path.unwrap_or("weft.toml");

        let config: WeftConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("WEFT_").split("_"))
            .extract()
            .map_err(|e| crate::error::WeftError::Config(e.to_string()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = WeftConfig::default();
        assert_eq!(cfg.scheduler.idle_warning_hours, 12);
        assert_eq!(cfg.scheduler.sleep_hours, 24);
        assert_eq!(cfg.scheduler.expire_days, 7);
        assert_eq!(cfg.limiter.burst, 10);
        assert_eq!(cfg.limiter.refill_per_sec, 3);
        assert!(cfg.data.conversations_dir().ends_with("conversations"));
    }
}
