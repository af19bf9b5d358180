use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use secrecy::{ExposeSecret, Secret};
use std::sync::OnceLock;

/// Plaintext password. Redacted in `Debug` and zeroized on drop.
#[derive(Debug, Clone)]
pub struct Password(Secret<String>);

impl Password {
    pub fn new(password: impl Into<String>) -> Self {
        Self(Secret::new(password.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

// Hash of a throwaway password, verified against when the username is
// unknown so both paths cost the same.
static DUMMY_HASH: OnceLock<String> = OnceLock::new();

/// Argon2id with default parameters and a random salt.
pub fn hash_password(password: &Password) -> Result<String, anyhow::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.expose().as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))
}

/// `true` only when `password` matches `password_hash`. A malformed hash
/// never matches.
pub fn verify_password(password: &Password, password_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(password_hash) else {
        tracing::error!("Stored password hash is not a valid PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(password.expose().as_bytes(), &parsed)
        .is_ok()
}

/// Burn one verification for an unknown user.
pub fn dummy_verify(password: &Password) {
    let hash = DUMMY_HASH.get_or_init(|| {
        hash_password(&Password::new(uuid::Uuid::new_v4().to_string())).unwrap_or_default()
    });
    let _ = verify_password(password, hash);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let password = Password::new("kebun-sawit-2024");
        let hash = hash_password(&password).unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password(&password, &hash));
        assert!(!verify_password(&Password::new("wrong"), &hash));
    }

    #[test]
    fn test_salts_differ() {
        let password = Password::new("kebun-sawit-2024");
        assert_ne!(hash_password(&password).unwrap(), hash_password(&password).unwrap());
    }

    #[test]
    fn test_malformed_hash_never_matches() {
        assert!(!verify_password(&Password::new("x"), "not-a-hash"));
    }

    #[test]
    fn test_debug_is_redacted() {
        let rendered = format!("{:?}", Password::new("kebun-sawit-2024"));
        assert!(!rendered.contains("kebun"));
    }
}
