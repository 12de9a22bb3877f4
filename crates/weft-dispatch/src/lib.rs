//! Dispatch: classify an incoming user message into a workflow and extract
//! structural links from its text.
//!
//! Classification is best-effort — every failure mode (no prompt, no
//! credentials, timeout, parse failure, cancellation) falls back to the
//! `default` workflow with a heuristic title. Link extraction always runs.

pub mod links;
pub mod service;

pub use links::{classify_url, extract_links, ExtractedLinks};
pub use service::{DispatchResult, DispatchService};
