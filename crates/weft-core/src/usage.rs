//! Token/cost usage accounting for a session.
//!
//! The LLM re-sends the whole history on every call, so the context window in
//! use after a turn is exactly `current_input + current_output`. Cumulative
//! totals are summed across turns; the snapshot is replaced per turn.

use serde::{Deserialize, Serialize};

/// Usage reported by one completed agent turn.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct TurnUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_create_tokens: u64,
    pub cost_usd: f64,
}

impl TurnUsage {
    /// Merge another model's usage into this one (per-model map summation).
    pub fn add(&mut self, other: &TurnUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_create_tokens += other.cache_create_tokens;
        self.cost_usd += other.cost_usd;
    }

    pub fn is_empty(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0
    }
}

/// Rolling usage snapshot held on a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUsage {
    pub current_input: u64,
    pub current_output: u64,
    pub current_cache_read: u64,
    pub current_cache_create: u64,
    /// Model context window size in tokens.
    pub context_window: u64,
    pub total_input: u64,
    pub total_output: u64,
    pub total_cost_usd: f64,
    pub last_updated: chrono::DateTime<chrono::Utc>,
}

/// Default context window when the model does not report one.
pub const DEFAULT_CONTEXT_WINDOW: u64 = 200_000;

impl Default for SessionUsage {
    fn default() -> Self {
        Self {
            current_input: 0,
            current_output: 0,
            current_cache_read: 0,
            current_cache_create: 0,
            context_window: DEFAULT_CONTEXT_WINDOW,
            total_input: 0,
            total_output: 0,
            total_cost_usd: 0.0,
            last_updated: chrono::Utc::now(),
        }
    }
}

impl SessionUsage {
    /// Fold one completed turn into the snapshot: current values are
    /// replaced, cumulative totals accumulate.
    pub fn apply_turn(&mut self, turn: &TurnUsage) {
        self.current_input = turn.input_tokens;
        self.current_output = turn.output_tokens;
        self.current_cache_read = turn.cache_read_tokens;
        self.current_cache_create = turn.cache_create_tokens;
        self.total_input += turn.input_tokens;
        self.total_output += turn.output_tokens;
        self.total_cost_usd += turn.cost_usd;
        self.last_updated = chrono::Utc::now();
    }

    /// Tokens of context window currently in use.
    pub fn in_use(&self) -> u64 {
        self.current_input + self.current_output
    }

    /// Remaining context window as a percentage, clamped to `[0, 100]`.
    pub fn remaining_percent(&self) -> u8 {
        if self.context_window == 0 {
            return 0;
        }
        let used = self.in_use().min(self.context_window);
        let remaining = self.context_window - used;
        ((remaining * 100) / self.context_window) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(input: u64, output: u64, cost: f64) -> TurnUsage {
        TurnUsage {
            input_tokens: input,
            output_tokens: output,
            cache_read_tokens: 0,
            cache_create_tokens: 0,
            cost_usd: cost,
        }
    }

    #[test]
    fn totals_sum_across_turns() {
        let mut usage = SessionUsage::default();
        usage.apply_turn(&turn(1_000, 200, 0.01));
        usage.apply_turn(&turn(2_000, 300, 0.02));
        assert_eq!(usage.current_input, 2_000);
        assert_eq!(usage.total_input, 3_000);
        assert_eq!(usage.total_output, 500);
        assert!((usage.total_cost_usd - 0.03).abs() < 1e-9);
    }

    #[test]
    fn remaining_percent_clamps() {
        let mut usage = SessionUsage {
            context_window: 100,
            ..Default::default()
        };
        usage.current_input = 250; // over the window — clamp, never negative
        assert_eq!(usage.remaining_percent(), 0);

        usage.current_input = 18;
        usage.current_output = 0;
        assert_eq!(usage.remaining_percent(), 82);
    }

    #[test]
    fn per_model_summation() {
        let mut a = turn(100, 10, 0.001);
        a.add(&turn(50, 5, 0.002));
        assert_eq!(a.input_tokens, 150);
        assert_eq!(a.output_tokens, 15);
    }
}
