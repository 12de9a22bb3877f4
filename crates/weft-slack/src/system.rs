//! System messages: operator-visible notices posted into the thread.
//!
//! Every system message carries a ⚡ reaction so users can tell it apart from
//! model output. All callers go through this one helper.

use tracing::warn;

use crate::api::{MessageOptions, PostedMessage, SlackApi};
use crate::error::Result;

const SYSTEM_MARK: &str = "zap";

/// Post `text` into the thread and mark it with ⚡.
///
/// The reaction is best-effort: a failed add logs and the message stands.
pub async fn post_system_message<S: SlackApi + ?Sized>(
    api: &S,
    channel: &str,
    thread_ts: Option<&str>,
    text: &str,
) -> Result<PostedMessage> {
    let opts = match thread_ts {
        Some(ts) => MessageOptions::in_thread(ts),
        None => MessageOptions::default(),
    };
    let posted = api.post_message(channel, text, &opts).await?;

    if let Err(e) = api.add_reaction(channel, &posted.ts, SYSTEM_MARK).await {
        if !e.is_benign_reaction_error() {
            warn!(channel, error = %e, "system message mark failed");
        }
    }
    Ok(posted)
}
