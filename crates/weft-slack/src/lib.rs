//! Slack surface: the abstract client contract, the process-wide rate
//! limiter, Block Kit builders, and the per-session UI mirrors (status
//! reaction, context-window emoji, ⚡-marked system messages).
//!
//! The wire transport is an external collaborator — everything here speaks
//! through the [`api::SlackApi`] trait with opaque channel/ts strings.

pub mod api;
pub mod blocks;
pub mod context_emoji;
pub mod error;
pub mod limiter;
pub mod reactions;
pub mod system;

pub use api::{MessageOptions, PostedMessage, SlackApi};
pub use error::{Result, SlackError};
