//! Session lifecycle: the keyed store, the single-in-flight request
//! coordinator, the resource snapshot with optimistic sequencing, and the
//! save→reset→load renew state machine.

pub mod coordinator;
pub mod error;
pub mod renew;
pub mod snapshot;
pub mod store;
pub mod types;

pub use coordinator::{RequestCoordinator, RequestGuard};
pub use error::{Result, SessionError};
pub use store::SessionStore;
pub use types::Session;
