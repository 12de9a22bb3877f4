//! Tool-use bookkeeping for one session.
//!
//! Maps tool-use ids to tool names (for result formatting) and to external
//! call ids (for tools that also register with an out-of-band tracker).
//! Entries are cleared on `cleanup()`, optionally after a delay.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;

#[derive(Default)]
pub struct ToolUseTracker {
    names: DashMap<String, String>,
    external: DashMap<String, String>,
}

impl ToolUseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool_use_id: &str, tool_name: &str) {
        self.names
            .insert(tool_use_id.to_string(), tool_name.to_string());
    }

    pub fn name_for(&self, tool_use_id: &str) -> Option<String> {
        self.names.get(tool_use_id).map(|v| v.value().clone())
    }

    pub fn register_external(&self, tool_use_id: &str, call_id: &str) {
        self.external
            .insert(tool_use_id.to_string(), call_id.to_string());
    }

    /// Remove and return the external call id for a tool-use, if any.
    pub fn take_external(&self, tool_use_id: &str) -> Option<String> {
        self.external.remove(tool_use_id).map(|(_, v)| v)
    }

    pub fn cleanup(&self) {
        self.names.clear();
        self.external.clear();
    }

    /// Clear all entries after `delay`. Used when results may still arrive
    /// shortly after the turn ends.
    pub fn cleanup_after(self: &Arc<Self>, delay: Duration) {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!(entries = tracker.names.len(), "delayed tool tracker cleanup");
            tracker.cleanup();
        });
    }
}
