use provisio_core::AppResult;

/// Port protecting secret attribute values at rest.
pub trait SecretCipher: Send + Sync {
    /// Encrypts a secret into a printable string.
    fn encrypt(&self, plaintext: &str) -> AppResult<String>;

    /// Decrypts a value produced by `encrypt`.
    fn decrypt(&self, ciphertext: &str) -> AppResult<String>;
}

/// Port keeping hashed passwords in a bounded, newest-first history.
pub trait PasswordHistoryHasher: Send + Sync {
    /// Hashes a plaintext password into a history entry.
    fn hash_password(&self, password: &str) -> AppResult<String>;

    /// Returns the position of the newest entry matching `password`.
    fn find_in_history(&self, password: &str, history: &[String]) -> AppResult<Option<usize>>;

    /// Puts `password` at the front of `history` and drops entries past `limit`.
    fn record_in_history(
        &self,
        password: &str,
        history: &mut Vec<String>,
        limit: usize,
    ) -> AppResult<()> {
        let entry = self.hash_password(password)?;
        history.insert(0, entry);
        history.truncate(limit);
        Ok(())
    }
}
