use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, info};

use crate::api::{normalize_email, UserInfo};
use crate::data::AccountService;

pub const OTP_LEN: usize = 6;
pub const ACTION_MFA_REQUIRED: &str = "MFA_REQUIRED";
pub const ACTION_INVITED: &str = "INVITED_SEND";

pub const MFA_ENABLED_MESSAGE: &str = "MFA has been enabled successfully!";
pub const MFA_DISABLED_MESSAGE: &str = "MFA has been disabled successfully!";
pub const INVITE_SENT_MESSAGE: &str = "We've sent you an email. Please check your inbox";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Please enter a valid email address")]
    InvalidEmail,
    #[error("Please enter a valid 6-digit code")]
    InvalidCode,
    #[error("no sign-in is waiting for a code")]
    NoPendingLogin,
    #[error("sign in first")]
    NotSignedIn,
    #[error("start MFA setup before enabling it")]
    SetupNotStarted,
    #[error("server did not return a session token")]
    MissingToken,
}

/// Accepts exactly six ASCII digits, ignoring surrounding whitespace.
pub fn validate_otp(code: &str) -> Result<&str, AuthError> {
    let code = code.trim();
    if code.len() == OTP_LEN && code.bytes().all(|b| b.is_ascii_digit()) {
        Ok(code)
    } else {
        Err(AuthError::InvalidCode)
    }
}

pub fn validate_email(email: &str) -> Result<String, AuthError> {
    let email = normalize_email(email);
    let valid = email
        .split_once('@')
        .is_some_and(|(user, domain)| !user.is_empty() && domain.contains('.'))
        && !email.chars().any(char::is_whitespace);
    if valid {
        Ok(email)
    } else {
        Err(AuthError::InvalidEmail)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedInUser {
    pub email: String,
    pub jwt: String,
    pub mfa_enabled: bool,
}

/// Sign-in waiting for the second factor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLogin {
    pub email: String,
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    SignedIn(SignedInUser),
    MfaRequired(PendingLogin),
    InviteSent { email: String },
}

pub fn interpret_join(email: &str, info: UserInfo) -> Result<JoinOutcome, AuthError> {
    let email = info
        .user
        .as_ref()
        .map(|user| user.email.trim())
        .filter(|e| !e.is_empty())
        .map(normalize_email)
        .unwrap_or_else(|| normalize_email(email));
    match info.action.as_deref() {
        Some(ACTION_MFA_REQUIRED) => Ok(JoinOutcome::MfaRequired(PendingLogin {
            email,
            session_token: info.session_token,
        })),
        Some(ACTION_INVITED) => Ok(JoinOutcome::InviteSent { email }),
        _ => {
            let jwt = info
                .jwt
                .filter(|jwt| !jwt.trim().is_empty())
                .ok_or(AuthError::MissingToken)?;
            let mfa_enabled = info.user.map(|user| user.mfa_enabled).unwrap_or(false);
            Ok(JoinOutcome::SignedIn(SignedInUser {
                email,
                jwt,
                mfa_enabled,
            }))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MfaEnrollment {
    pub secret: String,
    pub qr_png: Vec<u8>,
}

/// Decodes the base64 PNG returned by MFA setup. Data URL prefixes are
/// tolerated.
pub fn decode_qr(qr_code: &str) -> Result<Vec<u8>> {
    let payload = qr_code
        .trim()
        .split_once("base64,")
        .map(|(_, data)| data)
        .unwrap_or_else(|| qr_code.trim());
    STANDARD
        .decode(payload)
        .context("auth: decode MFA QR code")
}

/// Writes the QR image into `dir` and returns its path. The file is kept so
/// an image viewer can open it.
pub fn write_qr_image(dir: &Path, png: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("auth: create directory {}", dir.display()))?;
    let mut file = tempfile::Builder::new()
        .prefix("mfa-qr-")
        .suffix(".png")
        .tempfile_in(dir)
        .context("auth: create QR image file")?;
    file.write_all(png).context("auth: write QR image")?;
    let (_, path) = file.keep().context("auth: persist QR image")?;
    Ok(path)
}

pub fn default_qr_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("funny-tui"))
}

/// Network side of signing in and MFA management.
pub struct Flow {
    accounts: Arc<dyn AccountService>,
}

impl Flow {
    pub fn new(accounts: Arc<dyn AccountService>) -> Self {
        Self { accounts }
    }

    pub fn join(&self, email: &str) -> Result<JoinOutcome> {
        let email = validate_email(email)?;
        let info = self.accounts.join(&email)?;
        let outcome = interpret_join(&email, info)?;
        match &outcome {
            JoinOutcome::SignedIn(user) => info!(email = %user.email, "signed in"),
            JoinOutcome::MfaRequired(pending) => info!(email = %pending.email, "mfa required"),
            JoinOutcome::InviteSent { email } => info!(%email, "invite sent"),
        }
        Ok(outcome)
    }

    pub fn verify(&self, pending: &PendingLogin, code: &str) -> Result<SignedInUser> {
        let code = validate_otp(code)?;
        let info = self
            .accounts
            .verify_mfa(&pending.email, code, pending.session_token.as_deref())?;
        match interpret_join(&pending.email, info)? {
            JoinOutcome::SignedIn(mut user) => {
                user.mfa_enabled = true;
                Ok(user)
            }
            _ => Err(AuthError::MissingToken.into()),
        }
    }

    pub fn begin_enrollment(&self, email: &str) -> Result<MfaEnrollment> {
        let setup = self.accounts.mfa_setup(email)?;
        let qr_png = decode_qr(&setup.qr_code)?;
        debug!(bytes = qr_png.len(), "mfa setup received");
        Ok(MfaEnrollment {
            secret: setup.secret,
            qr_png,
        })
    }

    pub fn enable(&self, email: &str, secret: &str, code: &str) -> Result<()> {
        let code = validate_otp(code)?;
        self.accounts.enable_mfa(email, secret, code)
    }

    pub fn disable(&self, email: &str, code: &str) -> Result<()> {
        let code = validate_otp(code)?;
        self.accounts.disable_mfa(email, code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::UserDetail;
    use tempfile::tempdir;

    #[test]
    fn otp_must_be_six_digits() {
        assert_eq!(validate_otp(" 123456 "), Ok("123456"));
        for bad in ["", "12345", "1234567", "12a456", "１２３４５６"] {
            assert_eq!(validate_otp(bad), Err(AuthError::InvalidCode), "{bad:?}");
        }
        assert_eq!(
            AuthError::InvalidCode.to_string(),
            "Please enter a valid 6-digit code"
        );
    }

    #[test]
    fn email_validation_normalizes() {
        assert_eq!(validate_email(" Me@Example.COM ").unwrap(), "me@example.com");
        assert!(validate_email("nobody").is_err());
        assert!(validate_email("@x.io").is_err());
        assert!(validate_email("a b@x.io").is_err());
    }

    #[test]
    fn join_outcomes_follow_action() {
        let signed_in = interpret_join(
            "me@x.io",
            UserInfo {
                jwt: Some("jwt".into()),
                user: Some(UserDetail {
                    email: "me@x.io".into(),
                    mfa_enabled: false,
                }),
                ..UserInfo::default()
            },
        )
        .unwrap();
        assert!(matches!(signed_in, JoinOutcome::SignedIn(ref u) if u.jwt == "jwt"));

        let mfa = interpret_join(
            "me@x.io",
            UserInfo {
                action: Some(ACTION_MFA_REQUIRED.into()),
                session_token: Some("s".into()),
                ..UserInfo::default()
            },
        )
        .unwrap();
        assert_eq!(
            mfa,
            JoinOutcome::MfaRequired(PendingLogin {
                email: "me@x.io".into(),
                session_token: Some("s".into()),
            })
        );

        let invited = interpret_join(
            "New@x.io",
            UserInfo {
                action: Some(ACTION_INVITED.into()),
                ..UserInfo::default()
            },
        )
        .unwrap();
        assert_eq!(
            invited,
            JoinOutcome::InviteSent {
                email: "new@x.io".into()
            }
        );

        assert_eq!(
            interpret_join("me@x.io", UserInfo::default()),
            Err(AuthError::MissingToken)
        );
    }

    #[test]
    fn qr_is_decoded_and_written() {
        let png = decode_qr("data:image/png;base64,iVBORw0KGgo=").unwrap();
        assert_eq!(&png[..4], b"\x89PNG");
        assert!(decode_qr("***").is_err());

        let dir = tempdir().unwrap();
        let path = write_qr_image(dir.path(), &png).unwrap();
        assert!(path.exists());
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("png"));
        assert_eq!(fs::read(path).unwrap(), png);
    }
}
