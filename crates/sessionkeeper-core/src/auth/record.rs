use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::api::User;

/// Where the UI should send the user for a given record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub enum AuthRoute {
    Unauthenticated,
    PasscodeLocked,
    Authenticated,
}

/// Authentication state that survives restarts.
///
/// Transient UI state (loading flags, error strings) is deliberately not
/// part of the record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase", default)]
pub struct SessionRecord {
    // User & session
    pub user: Option<User>,
    pub is_authenticated: bool,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub token_issued_at: Option<DateTime<Utc>>,
    pub token_expires_at: Option<DateTime<Utc>>,

    // Onboarding
    pub has_completed_onboarding: bool,
    pub onboarding_status: Option<String>,
    pub current_onboarding_step: Option<String>,

    // Email verification
    pub pending_verification_email: Option<String>,

    // Passcode/biometric
    pub has_passcode: bool,
    pub is_biometric_enabled: bool,
    pub passcode_session_token: Option<String>,
    pub passcode_session_expires_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    /// Authenticated with both tokens present. No expiry check, no network.
    pub fn is_session_valid(&self) -> bool {
        self.is_authenticated && self.access_token.is_some() && self.refresh_token.is_some()
    }

    /// Whether the primary session window has elapsed.
    ///
    /// An unauthenticated record has nothing to expire. An authenticated one
    /// without a recorded expiry is treated as expired.
    pub fn check_token_expiry(&self, now: DateTime<Utc>) -> bool {
        if !self.is_authenticated {
            return false;
        }
        match self.token_expires_at {
            Some(expires_at) => now >= expires_at,
            None => true,
        }
    }

    /// Whether the passcode session is missing or elapsed.
    pub fn check_passcode_session_expiry(&self, now: DateTime<Utc>) -> bool {
        if !self.is_authenticated {
            return false;
        }
        match (&self.passcode_session_token, self.passcode_session_expires_at) {
            (Some(_), Some(expires_at)) => now >= expires_at,
            _ => true,
        }
    }

    pub fn route(&self, now: DateTime<Utc>) -> AuthRoute {
        if !self.is_session_valid() || self.check_token_expiry(now) {
            AuthRoute::Unauthenticated
        } else if self.has_passcode && self.check_passcode_session_expiry(now) {
            AuthRoute::PasscodeLocked
        } else {
            AuthRoute::Authenticated
        }
    }

    /// True when this record still carries `refresh_token`.
    pub fn holds_refresh_token(&self, refresh_token: &str) -> bool {
        self.refresh_token.as_deref() == Some(refresh_token)
    }

    /// Begin a primary session issued at `now`.
    ///
    /// Without an explicit expiry the window defaults to `now + window`. An
    /// explicit expiry earlier than issuance is clamped to issuance.
    pub fn start_primary_session(
        &mut self,
        access_token: String,
        refresh_token: String,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        window: Duration,
    ) {
        self.access_token = Some(access_token);
        self.refresh_token = Some(refresh_token);
        self.is_authenticated = true;
        self.last_activity_at = Some(now);
        self.token_issued_at = Some(now);
        self.token_expires_at = Some(expires_at.unwrap_or(now + window).max(now));
    }

    /// Replace the token pair in one step, extending the window when given.
    pub fn rotate_tokens(
        &mut self,
        access_token: String,
        refresh_token: String,
        expires_at: Option<DateTime<Utc>>,
    ) {
        self.access_token = Some(access_token);
        self.refresh_token = Some(refresh_token);
        if let Some(expires_at) = expires_at {
            self.token_expires_at = Some(match self.token_issued_at {
                Some(issued_at) => expires_at.max(issued_at),
                None => expires_at,
            });
        }
    }

    pub fn set_passcode_session(&mut self, token: String, expires_at: DateTime<Utc>) {
        self.passcode_session_token = Some(token);
        self.passcode_session_expires_at = Some(expires_at);
    }

    /// Soft reset: primary tokens and `is_authenticated` are untouched.
    pub fn clear_passcode_session(&mut self) {
        self.passcode_session_token = None;
        self.passcode_session_expires_at = None;
    }

    /// Hard reset after the primary session ends.
    ///
    /// Device-level preferences (passcode set, biometrics, completed
    /// onboarding, pending email) survive so the user can sign back in.
    pub fn clear_expired_session(&mut self) {
        self.user = None;
        self.is_authenticated = false;
        self.access_token = None;
        self.refresh_token = None;
        self.last_activity_at = None;
        self.token_issued_at = None;
        self.token_expires_at = None;
        self.onboarding_status = None;
        self.current_onboarding_step = None;
        self.clear_passcode_session();
    }

    /// Full reset used on logout.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Re-establish invariants on a record from an untrusted source.
    pub fn normalize(&mut self) {
        if self.access_token.is_none() || self.refresh_token.is_none() {
            self.is_authenticated = false;
        }
        if let (Some(issued_at), Some(expires_at)) = (self.token_issued_at, self.token_expires_at) {
            if expires_at < issued_at {
                self.token_expires_at = Some(issued_at);
            }
        }
    }
}
