pub mod config;
pub mod error;
pub mod types;
pub mod usage;

pub use error::{Result, WeftError};
