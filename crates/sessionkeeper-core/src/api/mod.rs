//! REST API client module for the wallet auth backend.
//!
//! This module provides the `AuthApi` trait the session manager depends on
//! and `HttpAuthApi`, which talks to the backend's `/auth/*` endpoints.
//!
//! Access tokens are sent as bearer credentials on the passcode and logout
//! endpoints; login, registration and refresh are unauthenticated.

pub mod client;
pub mod error;
pub mod types;

pub use client::{AuthApi, HttpAuthApi, DEFAULT_API_BASE_URL, DEFAULT_REQUEST_TIMEOUT_SECS};
pub use error::ApiError;
pub use types::{
    CreatePasscodeRequest, Credentials, PasscodeVerification, RefreshRequest, RefreshResponse,
    RegisterResponse, SessionGrant, User, VerifyEmailRequest, VerifyPasscodeRequest,
};
