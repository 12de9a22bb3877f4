//! Session lifecycle sweep: idle check-in, expiry warning, sleep, and
//! deletion, plus the best-effort shutdown broadcast.

pub mod engine;

pub use engine::SessionSweeper;
