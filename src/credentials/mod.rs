//! Parent password and the one-time recovery secret.
//!
//! Only verifiers are stored: an Argon2 hash of the password, an Argon2 hash
//! of the recovery secret, and the secret sealed under a key derived from the
//! password. Revealing the secret therefore always requires the password.

pub mod crypto;
pub mod rate_limit;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{error, info, warn};
use zeroize::Zeroizing;

use crate::error::{GuardError, GuardResult};
use crypto::SealedSecret;
use rate_limit::RateLimiter;

pub use rate_limit::Caller;

const CREDENTIALS_VERSION: u32 = 1;
pub const MIN_PASSWORD_LEN: usize = 6;
const MAX_ATTEMPTS: usize = 5;
const ATTEMPT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CredentialFile {
    version: u32,
    password_hash: String,
    recovery_verifier: String,
    sealed_secret: SealedSecret,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

enum State {
    Unconfigured,
    Configured(CredentialFile),
    Corrupted(String),
}

pub struct CredentialStore {
    path: PathBuf,
    state: Mutex<State>,
    /// Attempt windows per caller, so one client's failures never lock out another
    limiters: Mutex<HashMap<Caller, RateLimiter>>,
}

fn check_new_password(password: &str) -> GuardResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(GuardError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

impl CredentialStore {
    /// Load `credentials.json`; a missing file means setup has not happened
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<CredentialFile>(&content) {
                Ok(file) if file.version == CREDENTIALS_VERSION => State::Configured(file),
                Ok(file) => State::Corrupted(format!("unsupported credentials version {}", file.version)),
                Err(e) => State::Corrupted(e.to_string()),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => State::Unconfigured,
            Err(e) => State::Corrupted(e.to_string()),
        };

        if let State::Corrupted(reason) = &state {
            error!("Credential store {} unreadable: {}", path.display(), reason);
        }

        Self {
            path,
            state: Mutex::new(state),
            limiters: Mutex::new(HashMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once a password exists; an unreadable store counts as configured
    pub fn is_configured(&self) -> bool {
        !matches!(*self.lock_state(), State::Unconfigured)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, file: &CredentialFile) -> GuardResult<()> {
        let content = serde_json::to_string_pretty(file)?;
        crate::platform::common::atomic_write_restricted(&self.path, content.as_bytes())
            .map_err(|e| GuardError::from_write_failure("save credentials", e))
    }

    fn configured<'a>(state: &'a State) -> GuardResult<&'a CredentialFile> {
        match state {
            State::Configured(file) => Ok(file),
            State::Unconfigured => Err(GuardError::NotConfigured),
            State::Corrupted(reason) => Err(GuardError::StorageCorruption(reason.clone())),
        }
    }

    /// Count an attempt against the caller's rate limit
    fn attempt(&self, caller: Caller) -> GuardResult<()> {
        let mut limiters = self.limiters.lock().unwrap_or_else(PoisonError::into_inner);
        limiters.retain(|_, limiter| !limiter.is_idle());
        limiters
            .entry(caller)
            .or_insert_with(|| RateLimiter::new(MAX_ATTEMPTS, ATTEMPT_WINDOW))
            .check()
    }

    fn succeeded(&self, caller: Caller) {
        self.limiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&caller);
    }

    /// First-time setup; returns the recovery secret, which is never shown again
    /// without the password
    pub fn setup(&self, password: &str) -> GuardResult<Zeroizing<String>> {
        check_new_password(password)?;

        let mut state = self.lock_state();
        if !matches!(*state, State::Unconfigured) {
            return Err(GuardError::AlreadyConfigured);
        }

        let secret = crypto::generate_recovery_secret();
        let now = Utc::now();
        let file = CredentialFile {
            version: CREDENTIALS_VERSION,
            password_hash: crypto::hash_secret(password)?,
            recovery_verifier: crypto::hash_secret(&secret)?,
            sealed_secret: crypto::seal(&secret, password)?,
            created_at: now,
            updated_at: now,
        };

        self.persist(&file)?;
        *state = State::Configured(file);
        info!("Parent password configured");
        Ok(secret)
    }

    pub fn verify_password(&self, caller: Caller, password: &str) -> GuardResult<bool> {
        let state = self.lock_state();
        let file = Self::configured(&state)?;
        self.attempt(caller)?;

        let ok = crypto::verify_secret(password, &file.password_hash)?;
        if ok {
            self.succeeded(caller);
        } else {
            warn!("Incorrect parent password attempt from {:?}", caller);
        }
        Ok(ok)
    }

    /// Break-glass disclosure of the recovery secret, gated by the current password
    pub fn verify_and_reveal(&self, caller: Caller, password: &str) -> GuardResult<Zeroizing<String>> {
        if !self.verify_password(caller, password)? {
            return Err(GuardError::IncorrectPassword);
        }
        let state = self.lock_state();
        crypto::unseal(&Self::configured(&state)?.sealed_secret, password)
    }

    pub fn change_password(&self, caller: Caller, old: &str, new: &str) -> GuardResult<()> {
        check_new_password(new)?;
        if !self.verify_password(caller, old)? {
            return Err(GuardError::IncorrectPassword);
        }

        let mut state = self.lock_state();
        let mut file = Self::configured(&state)?.clone();
        let secret = crypto::unseal(&file.sealed_secret, old)?;

        file.password_hash = crypto::hash_secret(new)?;
        file.sealed_secret = crypto::seal(&secret, new)?;
        file.updated_at = Utc::now();

        self.persist(&file)?;
        *state = State::Configured(file);
        info!("Parent password changed");
        Ok(())
    }

    /// Set a new password using the recovery secret instead of the old password
    pub fn reset_with_recovery(
        &self,
        caller: Caller,
        recovery_secret: &str,
        new_password: &str,
    ) -> GuardResult<()> {
        check_new_password(new_password)?;

        let mut state = self.lock_state();
        let mut file = Self::configured(&state)?.clone();
        self.attempt(caller)?;

        let secret = crypto::normalize_recovery_secret(recovery_secret);
        if !crypto::verify_secret(&secret, &file.recovery_verifier)? {
            warn!("Incorrect recovery secret attempt from {:?}", caller);
            return Err(GuardError::IncorrectPassword);
        }
        self.succeeded(caller);

        file.password_hash = crypto::hash_secret(new_password)?;
        file.sealed_secret = crypto::seal(&secret, new_password)?;
        file.updated_at = Utc::now();

        self.persist(&file)?;
        *state = State::Configured(file);
        info!("Parent password reset with recovery secret");
        Ok(())
    }
}
