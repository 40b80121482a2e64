use std::fmt;

use garde::Validate;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::Result;
use crate::models::user::ProfileUpdate;

/// Email/password pair for the credentials flow.
#[derive(Clone, Serialize, Deserialize, Validate, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    #[garde(email)]
    pub email: String,
    #[garde(length(min = 1, max = 128))]
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"[redacted]")
            .finish()
    }
}

/// A request for a password reset link.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PasswordResetRequest {
    #[garde(email)]
    pub email: String,
}

/// A new password together with the reset token mailed to the user.
#[derive(Clone, Serialize, Deserialize, Validate, Zeroize, ZeroizeOnDrop)]
pub struct PasswordReset {
    #[garde(length(min = 1, max = 512))]
    pub token: String,
    #[garde(length(min = 8, max = 128))]
    pub password: String,
}

impl fmt::Debug for PasswordReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordReset")
            .field("token", &"[redacted]")
            .field("password", &"[redacted]")
            .finish()
    }
}

/// Validates login credentials.
///
/// # Arguments
///
/// * `credentials` - The credentials to validate.
///
/// # Returns
///
/// A `Result<()>` indicating whether the credentials are well-formed.
pub fn validate_credentials(credentials: &Credentials) -> Result<()> {
    credentials.validate()?;
    Ok(())
}

/// Validates a reset link request.
pub fn validate_reset_request(request: &PasswordResetRequest) -> Result<()> {
    request.validate()?;
    Ok(())
}

/// Validates a password reset.
///
/// # Arguments
///
/// * `reset` - The reset token and the new password.
///
/// # Returns
///
/// A `Result<()>`; the new password must be 8 to 128 characters long.
pub fn validate_password_reset(reset: &PasswordReset) -> Result<()> {
    reset.validate()?;
    Ok(())
}

/// Validates a partial profile update.
pub fn validate_profile_update(update: &ProfileUpdate) -> Result<()> {
    update.validate()?;
    Ok(())
}
