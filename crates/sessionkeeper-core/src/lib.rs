//! sessionkeeper core - session lifecycle for a wallet client.
//!
//! Keeps a user's authenticated session alive against the auth backend:
//! persists the session record, refreshes tokens ahead of expiry, locks the
//! app behind a short-lived passcode session, and wipes state on hard expiry.

pub mod api;
pub mod auth;
pub mod config;
pub mod validation;

pub use api::{ApiError, AuthApi, HttpAuthApi};
pub use auth::{
    AuthError, AuthRoute, FileSessionPersistence, SessionEvent, SessionManager, SessionRecord,
    SessionStore,
};
pub use config::Config;
