use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::api::TokenProvider;
use crate::auth::{
    write_qr_image, AuthError, Flow as AuthFlow, JoinOutcome, PendingLogin, SignedInUser,
};
use crate::storage::{self, StoredSession};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not signed in")]
    NotSignedIn,
    #[error("no MFA setup in progress")]
    NoEnrollment,
}

/// Bearer token shared between the session manager and the API client.
#[derive(Clone, Default)]
pub struct SharedToken(Arc<RwLock<Option<String>>>);

impl SharedToken {
    pub fn set(&self, token: Option<String>) {
        *self.0.write() = token;
    }
}

impl TokenProvider for SharedToken {
    fn token(&self) -> Option<String> {
        self.0.read().clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrollment {
    pub secret: String,
    pub qr_path: PathBuf,
}

pub struct Manager {
    store: Arc<storage::Store>,
    flow: AuthFlow,
    token: SharedToken,
    qr_dir: PathBuf,
    active: RwLock<Option<SignedInUser>>,
    pending: RwLock<Option<PendingLogin>>,
    enrollment: RwLock<Option<Enrollment>>,
}

impl Manager {
    pub fn new(
        store: Arc<storage::Store>,
        flow: AuthFlow,
        token: SharedToken,
        qr_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            flow,
            token,
            qr_dir,
            active: RwLock::new(None),
            pending: RwLock::new(None),
            enrollment: RwLock::new(None),
        }
    }

    /// Restores the session saved by a previous run.
    pub fn load_existing(&self) -> Result<Option<SignedInUser>> {
        let Some(saved) = self.store.load_session()? else {
            return Ok(None);
        };
        let user = SignedInUser {
            email: saved.email,
            jwt: saved.jwt,
            mfa_enabled: saved.mfa_enabled,
        };
        info!(email = %user.email, "restored session");
        self.activate(user.clone());
        Ok(Some(user))
    }

    pub fn active(&self) -> Option<SignedInUser> {
        self.active.read().clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.active.read().is_some()
    }

    pub fn pending_login(&self) -> Option<PendingLogin> {
        self.pending.read().clone()
    }

    pub fn enrollment(&self) -> Option<Enrollment> {
        self.enrollment.read().clone()
    }

    pub fn begin_login(&self, email: &str) -> Result<JoinOutcome> {
        let outcome = self.flow.join(email)?;
        match &outcome {
            JoinOutcome::SignedIn(user) => {
                self.persist(user)?;
                self.activate(user.clone());
                *self.pending.write() = None;
            }
            JoinOutcome::MfaRequired(pending) => {
                *self.pending.write() = Some(pending.clone());
            }
            JoinOutcome::InviteSent { .. } => {
                *self.pending.write() = None;
            }
        }
        Ok(outcome)
    }

    pub fn complete_login(&self, code: &str) -> Result<SignedInUser> {
        let pending = self.pending_login().ok_or(AuthError::NoPendingLogin)?;
        let user = self.flow.verify(&pending, code)?;
        self.persist(&user)?;
        self.activate(user.clone());
        *self.pending.write() = None;
        Ok(user)
    }

    pub fn cancel_login(&self) {
        *self.pending.write() = None;
    }

    pub fn begin_mfa_setup(&self) -> Result<Enrollment> {
        let user = self.active().ok_or(SessionError::NotSignedIn)?;
        let enrollment = self.flow.begin_enrollment(&user.email)?;
        let qr_path = write_qr_image(&self.qr_dir, &enrollment.qr_png)?;
        let enrollment = Enrollment {
            secret: enrollment.secret,
            qr_path,
        };
        *self.enrollment.write() = Some(enrollment.clone());
        Ok(enrollment)
    }

    pub fn enable_mfa(&self, code: &str) -> Result<()> {
        let user = self.active().ok_or(SessionError::NotSignedIn)?;
        let enrollment = self.enrollment().ok_or(SessionError::NoEnrollment)?;
        self.flow.enable(&user.email, &enrollment.secret, code)?;
        self.set_mfa(user, true)?;
        *self.enrollment.write() = None;
        Ok(())
    }

    pub fn disable_mfa(&self, code: &str) -> Result<()> {
        let user = self.active().ok_or(SessionError::NotSignedIn)?;
        self.flow.disable(&user.email, code)?;
        self.set_mfa(user, false)
    }

    pub fn logout(&self) -> Result<()> {
        if let Some(user) = self.active.write().take() {
            info!(email = %user.email, "signed out");
        }
        self.token.set(None);
        *self.pending.write() = None;
        *self.enrollment.write() = None;
        self.store.clear_session()
    }

    fn set_mfa(&self, mut user: SignedInUser, enabled: bool) -> Result<()> {
        if let Err(err) = self.store.set_user_mfa(&user.email, enabled) {
            warn!(%err, "failed to record mfa status");
        }
        user.mfa_enabled = enabled;
        self.persist(&user)?;
        self.activate(user);
        Ok(())
    }

    fn persist(&self, user: &SignedInUser) -> Result<()> {
        self.store.save_session(&StoredSession {
            email: user.email.clone(),
            jwt: user.jwt.clone(),
            mfa_enabled: user.mfa_enabled,
            updated_at: Utc::now(),
        })?;
        self.store.set_user_mfa(&user.email, user.mfa_enabled)
    }

    fn activate(&self, user: SignedInUser) {
        self.token.set(Some(user.jwt.clone()));
        *self.active.write() = Some(user);
    }
}
