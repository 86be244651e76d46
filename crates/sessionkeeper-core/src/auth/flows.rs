//! User-driven auth flows layered on top of the session lifecycle.
//!
//! Each flow validates its input before touching the network and mutates the
//! record only through the store, so a failed call leaves the session as it
//! was.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::{
    CreatePasscodeRequest, Credentials, SessionGrant, VerifyEmailRequest, VerifyPasscodeRequest,
};
use crate::validation::{validate_code, validate_email, validate_password};

use super::error::AuthError;
use super::manager::{SessionEvent, SessionManager};
use super::record::SessionRecord;

impl SessionManager {
    // =========================================================================
    // Sign-in flows
    // =========================================================================

    pub async fn login(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let email = email.trim();
        validate_email(email)?;
        validate_password(password)?;

        info!("Logging in");
        let credentials = Credentials {
            email: email.to_string(),
            password: password.to_string(),
        };
        let grant = self.api().login(&credentials).await?;
        self.start_session(grant);
        Ok(())
    }

    /// Create an account. The session stays unauthenticated until the
    /// emailed code is confirmed with `verify_email`.
    pub async fn register(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let email = email.trim();
        validate_email(email)?;
        validate_password(password)?;

        info!("Registering new account");
        let credentials = Credentials {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response = self.api().register(&credentials).await?;
        debug!(identifier = %response.identifier, "Registration accepted, awaiting verification");

        self.cleanup();
        self.store().update(|r| {
            r.clear_expired_session();
            r.pending_verification_email = Some(email.to_string());
        });
        Ok(())
    }

    /// Complete registration with the code sent to the pending email.
    pub async fn verify_email(&self, code: &str) -> Result<(), AuthError> {
        let code = code.trim();
        let email = self
            .store()
            .read(|r| r.pending_verification_email.clone())
            .ok_or(AuthError::NoPendingVerification)?;
        validate_code(code)?;

        info!("Verifying email");
        let request = VerifyEmailRequest {
            email,
            code: code.to_string(),
        };
        let grant = self.api().verify_email(&request).await?;
        self.start_session(grant);
        Ok(())
    }

    fn start_session(&self, grant: SessionGrant) {
        let SessionGrant {
            user,
            access_token,
            refresh_token,
            expires_at,
        } = grant;
        let now = self.now();
        let window = self.policy().session_window;

        self.cleanup();
        self.store().update(|r| {
            r.clear_passcode_session();
            r.pending_verification_email = None;
            r.onboarding_status = user.onboarding_status.clone();
            r.has_passcode = user.has_passcode.unwrap_or(false);
            r.user = Some(user);
            r.start_primary_session(access_token, refresh_token, now, expires_at, window);
        });

        info!("Signed in");
        self.initialize();
        self.emit(SessionEvent::SignedIn);
    }

    // =========================================================================
    // Passcode
    // =========================================================================

    /// Unlock with the app passcode. Any failure reports `false` and leaves
    /// the record untouched.
    pub async fn verify_passcode(&self, passcode: &str) -> bool {
        if validate_code(passcode).is_err() {
            debug!("Rejecting malformed passcode");
            return false;
        }

        let access_token = self.store().read(|r| r.access_token.clone());
        let request = VerifyPasscodeRequest {
            passcode: passcode.to_string(),
        };
        let result = match self.api().verify_passcode(access_token.as_deref(), &request).await {
            Ok(result) if result.verified => result,
            Ok(_) => {
                info!("Passcode rejected");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "Passcode verification failed");
                return false;
            }
        };

        let now = self.now();
        let window = self.policy().session_window;
        let passcode_expires_at = result
            .passcode_session_expires_at
            .unwrap_or(now + self.policy().passcode_window);

        let applied = self.store().update_if(|r| {
            if let (Some(access), Some(refresh)) = (result.access_token, result.refresh_token) {
                r.start_primary_session(access, refresh, now, result.expires_at, window);
            }
            if !r.is_session_valid() {
                return false;
            }
            // Without a dedicated token the unlock is keyed to the access token in force
            let Some(token) = result.passcode_session_token.or_else(|| r.access_token.clone()) else {
                return false;
            };
            r.set_passcode_session(token, passcode_expires_at);
            true
        });

        if !applied {
            warn!("Passcode verified but no session to unlock");
            return false;
        }

        info!("Passcode verified");
        self.schedule_passcode_session_expiry(passcode_expires_at);
        self.initialize();
        true
    }

    pub async fn create_passcode(&self, passcode: &str) -> Result<(), AuthError> {
        validate_code(passcode)?;
        let access_token = self
            .store()
            .read(|r| r.access_token.clone().filter(|_| r.is_authenticated))
            .ok_or(AuthError::NotAuthenticated)?;

        let request = CreatePasscodeRequest {
            passcode: passcode.to_string(),
            confirm_passcode: passcode.to_string(),
        };
        self.api().create_passcode(Some(&access_token), &request).await?;

        info!("Passcode created");
        self.store().update(|r| r.has_passcode = true);
        Ok(())
    }

    // =========================================================================
    // Sign-out
    // =========================================================================

    /// Sign out everywhere we can. The backend call is best-effort; local
    /// state is always wiped.
    pub async fn logout(&self) {
        let access_token = self.store().read(|r| r.access_token.clone());
        if access_token.is_some() {
            if let Err(e) = self.api().logout(access_token.as_deref()).await {
                warn!(error = %e, "Logout request failed, clearing local session anyway");
            }
        }

        self.cleanup();
        self.store().wipe();
        info!("Signed out");
        self.emit(SessionEvent::SignedOut);
    }

    // =========================================================================
    // Profile and preferences
    // =========================================================================

    pub fn set_onboarding_status(&self, status: impl Into<String>, step: Option<String>) {
        let status = status.into();
        self.store().update(|r| {
            r.onboarding_status = Some(status);
            r.current_onboarding_step = step;
        });
    }

    pub fn set_has_completed_onboarding(&self, completed: bool) {
        self.store().update(|r| r.has_completed_onboarding = completed);
    }

    pub fn set_biometric_enabled(&self, enabled: bool) {
        self.store().update(|r| r.is_biometric_enabled = enabled);
    }

    /// Merge `patch` into the stored profile. Does nothing when signed out.
    pub fn update_user(&self, patch: &Value) -> Result<(), AuthError> {
        let mut outcome = Ok(());
        self.store().update_if(|r: &mut SessionRecord| {
            let Some(user) = r.user.as_mut() else {
                return false;
            };
            let mut merged = user.clone();
            match merged.merge(patch) {
                Ok(()) => {
                    *user = merged;
                    true
                }
                Err(e) => {
                    outcome = Err(e);
                    false
                }
            }
        });
        Ok(outcome?)
    }
}
