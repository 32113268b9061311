//! Argon2id password hashing

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use super::AuthError;

/// PHC string suitable for the users table
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(hash).map_err(|e| AuthError::Hashing(e.to_string()))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(AuthError::Hashing(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_argon2id() {
        let hash = hash_password("root").unwrap();
        assert!(hash.starts_with("$argon2id$"));
    }

    #[test]
    fn test_verify() {
        let hash = hash_password("root").unwrap();
        assert!(verify_password("root", &hash).unwrap());
        assert!(!verify_password("toor", &hash).unwrap());
    }

    #[test]
    fn test_same_password_different_salt() {
        assert_ne!(hash_password("root").unwrap(), hash_password("root").unwrap());
    }

    #[test]
    fn test_malformed_hash() {
        assert!(matches!(
            verify_password("root", "not-a-hash"),
            Err(AuthError::Hashing(_))
        ));
    }
}
