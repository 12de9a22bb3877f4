//! Agent surface: the abstract LLM SDK contract, the embedded-directive
//! parsers, the streaming turn processor, and tool-use bookkeeping.
//!
//! The SDK itself is an external collaborator: it exposes an async stream of
//! typed events ([`events::AgentEvent`]) and a one-shot classification call,
//! both behind the [`client::AgentClient`] trait.

pub mod choice;
pub mod client;
pub mod directives;
pub mod error;
pub mod events;
pub mod processor;
pub mod scan;
pub mod summary;
pub mod tools;
pub mod tracker;

pub use client::{AgentClient, AgentRequest, ClassifyRequest};
pub use error::{AgentError, Result};
pub use events::AgentEvent;
