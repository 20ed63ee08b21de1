//! Password hashing and verification against the credential store

use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use super::{AuthError, Authenticator, CredentialStore};

/// Argon2id authenticator backed by a [`CredentialStore`]
pub struct PasswdBackend {
    store: CredentialStore,
    argon2: Argon2<'static>,
}

impl PasswdBackend {
    /// Backend with the default Argon2id parameters
    pub fn new(store: CredentialStore) -> Self {
        Self {
            store,
            argon2: Argon2::default(),
        }
    }

    /// Backend hashing new passwords with custom Argon2id parameters
    ///
    /// Verification always uses the parameters encoded in the stored hash.
    pub fn with_params(store: CredentialStore, params: Params) -> Self {
        Self {
            store,
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        }
    }

    /// The underlying credential store
    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Hash `new_password` with a fresh salt and replace the stored credential
    pub fn set_password(&self, new_password: &[u8]) -> Result<(), AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        let password = Zeroizing::new(new_password.to_vec());

        let hash = self
            .argon2
            .hash_password(&password, &salt)
            .map_err(|e| AuthError::Hash(format!("Failed to hash password: {}", e)))?
            .to_string();

        self.store.store(&hash)?;
        tracing::info!("Password updated in {:?}", self.store.path());
        Ok(())
    }

    /// Make sure the stored credential can actually be verified against
    ///
    /// Run before grabbing input: a hash that cannot be parsed would turn
    /// every unlock attempt into a rejection.
    pub fn check_credential(&self) -> Result<(), AuthError> {
        let stored = Zeroizing::new(self.store.load()?);
        parse_stored_hash(&stored)?;
        Ok(())
    }
}

/// Parse a stored PHC string and require one of the Argon2 variants
fn parse_stored_hash(stored: &str) -> Result<PasswordHash<'_>, AuthError> {
    let parsed = PasswordHash::new(stored).map_err(|e| AuthError::InvalidHash(e.to_string()))?;
    Algorithm::try_from(parsed.algorithm)
        .map_err(|_| AuthError::InvalidHash(format!("unsupported algorithm {}", parsed.algorithm)))?;
    Ok(parsed)
}

impl Authenticator for PasswdBackend {
    fn verify(&self, candidate: &[u8]) -> Result<bool, AuthError> {
        let stored = Zeroizing::new(self.store.load()?);
        let parsed_hash = parse_stored_hash(&stored)?;

        // Constant-time comparison inside the verifier
        match self.argon2.verify_password(candidate, &parsed_hash) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AuthError::InvalidHash(e.to_string())),
        }
    }
}
