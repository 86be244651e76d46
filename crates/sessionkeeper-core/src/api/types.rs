//! Wire types exchanged with the auth backend.
//!
//! All bodies are camelCase JSON. Expiry timestamps are optional everywhere:
//! when the server omits one, the session policy supplies the default window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// User profile as returned by the backend.
///
/// Only the fields the session layer reads are typed; everything else is
/// kept in `extra` so a round-trip through the persisted record is lossless.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase", default)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onboarding_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_passcode: Option<bool>,
    #[serde(flatten)]
    #[cfg_attr(feature = "ts", ts(skip))]
    pub extra: Map<String, Value>,
}

impl User {
    /// Shallow-merge a JSON patch into the profile.
    ///
    /// Typed fields are updated when present in the patch; unknown keys land
    /// in `extra`. A patch that is not an object is ignored.
    pub fn merge(&mut self, patch: &Value) -> serde_json::Result<()> {
        let Value::Object(patch) = patch else {
            return Ok(());
        };
        let mut current = serde_json::to_value(&*self)?;
        if let Value::Object(ref mut fields) = current {
            for (key, value) in patch {
                fields.insert(key.clone(), value.clone());
            }
        }
        *self = serde_json::from_value(current)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Tokens and profile returned by login and by email verification.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionGrant {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub identifier: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyEmailRequest {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPasscodeRequest {
    pub passcode: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePasscodeRequest {
    pub passcode: String,
    pub confirm_passcode: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasscodeVerification {
    pub verified: bool,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub passcode_session_token: Option<String>,
    #[serde(default)]
    pub passcode_session_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}
