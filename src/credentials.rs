use std::fmt;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand_core::OsRng;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::errors::AccessError;
use crate::models::resource::ResourceId;

/// Plaintext password supplied by a caller.
///
/// The buffer is wiped when the value is dropped. The engine only ever
/// borrows it, and every derived copy it makes is wiped before the call that
/// made it returns.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PasswordCredentials {
    password: Vec<u8>,
}

impl PasswordCredentials {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into().into_bytes(),
        }
    }

    pub fn from_bytes(password: Vec<u8>) -> Self {
        Self { password }
    }

    pub(crate) fn expose(&self) -> &[u8] {
        &self.password
    }

    pub fn len(&self) -> usize {
        self.password.len()
    }

    pub fn is_empty(&self) -> bool {
        self.password.is_empty()
    }
}

impl fmt::Debug for PasswordCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordCredentials")
            .field("password", &"[REDACTED]")
            .finish()
    }
}

pub fn validate_password(credentials: &PasswordCredentials, min_length: usize) -> Result<(), AccessError> {
    if credentials.is_empty() {
        return Err(AccessError::invalid_argument("password required, none specified"));
    }

    if credentials.len() < min_length {
        return Err(AccessError::invalid_argument(format!(
            "password must be at least {} characters",
            min_length
        )));
    }

    Ok(())
}

/// Prefix the password with a digest of the resource id so a stored hash only
/// ever verifies for the resource it was computed for.
fn bound_password(resource_id: ResourceId, credentials: &PasswordCredentials) -> Zeroizing<Vec<u8>> {
    let mut hasher = Sha256::new();
    hasher.update(b"permgraph.resource:");
    hasher.update(resource_id.to_be_bytes());
    let binding = hasher.finalize();

    let password = credentials.expose();
    let mut bound = Zeroizing::new(Vec::with_capacity(binding.len() + password.len()));
    bound.extend_from_slice(&binding);
    bound.extend_from_slice(password);
    bound
}

pub fn hash_password(resource_id: ResourceId, credentials: &PasswordCredentials) -> Result<String, AccessError> {
    let bound = bound_password(resource_id, credentials);
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(&bound, &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AccessError::internal(format!("failed to hash password: {err}")))
}

pub fn verify_password(
    resource_id: ResourceId,
    credentials: &PasswordCredentials,
    password_hash: &str,
) -> Result<bool, AccessError> {
    let parsed_hash = PasswordHash::new(password_hash)
        .map_err(|err| AccessError::internal(format!("invalid password hash: {err}")))?;
    let bound = bound_password(resource_id, credentials);

    Ok(Argon2::default().verify_password(&bound, &parsed_hash).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_verifies_only_for_its_resource() {
        let credentials = PasswordCredentials::new("s3cret-pass");
        let hash = hash_password(7, &credentials).unwrap();

        assert!(verify_password(7, &credentials, &hash).unwrap());
        assert!(!verify_password(8, &credentials, &hash).unwrap());
        assert!(!verify_password(7, &PasswordCredentials::new("other"), &hash).unwrap());
    }

    #[test]
    fn debug_output_is_redacted() {
        let rendered = format!("{:?}", PasswordCredentials::new("hunter2"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn zeroize_wipes_the_buffer() {
        let mut credentials = PasswordCredentials::new("wipe-me");
        credentials.zeroize();
        assert!(credentials.is_empty());
    }

    #[test]
    fn short_passwords_are_rejected() {
        let err = validate_password(&PasswordCredentials::new("abc"), 8).unwrap_err();
        assert!(err.to_string().contains("at least 8"));
        assert!(validate_password(&PasswordCredentials::new(""), 1).is_err());
        assert!(validate_password(&PasswordCredentials::new("abc"), 1).is_ok());
    }
}
