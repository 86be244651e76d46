use thiserror::Error;

use crate::api::ApiError;
use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("No email is awaiting verification")]
    NoPendingVerification,

    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Invalid profile update: {0}")]
    Profile(#[from] serde_json::Error),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl AuthError {
    /// Short message suitable for showing next to a form.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Validation(e) => e.to_string(),
            AuthError::NoPendingVerification => "Please register before verifying your email".to_string(),
            AuthError::NotAuthenticated => "Please sign in first".to_string(),
            AuthError::Profile(_) => "Could not update your profile".to_string(),
            AuthError::Api(ApiError::Unauthorized) => "Invalid email or password".to_string(),
            AuthError::Api(ApiError::NetworkError(_)) => {
                "Unable to connect to server. Check your internet connection.".to_string()
            }
            AuthError::Api(ApiError::Timeout) => "Connection timed out. Please try again.".to_string(),
            AuthError::Api(e) => format!("Request failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message() {
        assert_eq!(
            AuthError::Api(ApiError::Unauthorized).user_message(),
            "Invalid email or password"
        );
        assert_eq!(
            AuthError::from(ValidationError::InvalidCode).user_message(),
            "Code must be exactly 6 digits"
        );
        assert!(AuthError::Api(ApiError::RateLimited).user_message().starts_with("Request failed"));
    }
}
