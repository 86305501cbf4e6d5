//! Argon2id-backed password history.
//!
//! History entries are PHC strings, newest first. Entries that no longer
//! parse (imported from another system, truncated) are ignored when checking
//! reuse and dropped the next time a password is recorded.

use argon2::password_hash::{Error as HashError, SaltString, rand_core::OsRng};
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use provisio_application::PasswordHistoryHasher;
use provisio_core::{AppError, AppResult};
use tracing::warn;

/// Default memory cost in KiB.
const DEFAULT_MEMORY_KIB: u32 = 19_456;
/// Default number of passes.
const DEFAULT_ITERATIONS: u32 = 2;

/// Password history kept as Argon2id hashes.
#[derive(Clone)]
pub struct Argon2PasswordHistoryHasher {
    argon2: Argon2<'static>,
}

impl Argon2PasswordHistoryHasher {
    /// Creates a history hasher with the default cost.
    #[must_use]
    pub fn new() -> Self {
        let params = Params::new(DEFAULT_MEMORY_KIB, DEFAULT_ITERATIONS, 1, None)
            .unwrap_or_else(|_| Params::default());
        Self::from_params(params)
    }

    /// Creates a history hasher with an explicit memory and time cost.
    pub fn with_cost(memory_kib: u32, iterations: u32) -> AppResult<Self> {
        let params = Params::new(memory_kib, iterations, 1, None).map_err(|error| {
            AppError::Validation(format!("invalid password history cost: {error}"))
        })?;
        Ok(Self::from_params(params))
    }

    fn from_params(params: Params) -> Self {
        Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        }
    }

    fn matches(&self, password: &str, position: usize, entry: &str) -> AppResult<Option<bool>> {
        let Ok(parsed) = PasswordHash::new(entry) else {
            return Ok(None);
        };
        match self.argon2.verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(Some(true)),
            Err(HashError::Password) => Ok(Some(false)),
            Err(error) => Err(AppError::Internal(format!(
                "password history entry {position} could not be checked: {error}"
            ))),
        }
    }
}

impl Default for Argon2PasswordHistoryHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordHistoryHasher for Argon2PasswordHistoryHasher {
    fn hash_password(&self, password: &str) -> AppResult<String> {
        if password.is_empty() {
            return Err(AppError::Validation(
                "an empty password cannot enter the password history".to_owned(),
            ));
        }

        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|error| {
                AppError::Internal(format!("failed to hash password history entry: {error}"))
            })
    }

    fn find_in_history(&self, password: &str, history: &[String]) -> AppResult<Option<usize>> {
        for (position, entry) in history.iter().enumerate() {
            match self.matches(password, position, entry)? {
                Some(true) => return Ok(Some(position)),
                Some(false) => {}
                None => warn!(position, "skipping unreadable password history entry"),
            }
        }
        Ok(None)
    }

    fn record_in_history(
        &self,
        password: &str,
        history: &mut Vec<String>,
        limit: usize,
    ) -> AppResult<()> {
        let entry = self.hash_password(password)?;
        let before = history.len();
        history.retain(|previous| PasswordHash::new(previous).is_ok());
        if history.len() < before {
            warn!(
                dropped = before - history.len(),
                "dropped unreadable password history entries"
            );
        }
        history.insert(0, entry);
        history.truncate(limit);
        Ok(())
    }
}
