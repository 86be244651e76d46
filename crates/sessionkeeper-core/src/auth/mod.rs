//! Session management for the wallet auth backend.
//!
//! This module provides:
//! - `SessionManager`: Token lifecycle (proactive refresh, passcode-session
//!   expiry, periodic health check) plus the login/register/passcode flows
//! - `SessionStore`: The observable session record, persisted on every change
//! - `SessionPersistence`: Versioned JSON storage backends for the record
//!
//! Primary sessions last 7 days and are refreshed 5 minutes before expiry;
//! passcode sessions lapse after 10 minutes.

pub mod clock;
pub mod error;
pub mod flows;
pub mod manager;
pub mod persistence;
pub mod policy;
pub mod record;
pub mod store;
pub mod timer;

#[cfg(test)]
pub(crate) mod testing;

pub use clock::{Clock, SystemClock, TokioClock};
pub use error::AuthError;
pub use manager::{SessionEvent, SessionManager};
pub use persistence::{
    FileSessionPersistence, MemorySessionPersistence, SessionPersistence, StoreError,
};
pub use policy::{RetryPolicy, SessionPolicy};
pub use record::{AuthRoute, SessionRecord};
pub use store::SessionStore;
