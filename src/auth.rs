//! Authentication primitives: JWT issuance/validation and password hashing.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ApiError;

/// Claims carried by an access token.
///
/// `tenant_active` caches the tenant's active flag at login time so the
/// tenant resolver can skip a lookup on every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub tenant_id: i64,
    pub email: String,
    pub role: String,
    pub tenant_active: bool,
    pub exp: i64,
    pub iat: i64,
}

/// Claims carried by a refresh token.
#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub user_id: i64,
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
}

pub const REFRESH_SUBJECT: &str = "refresh";

#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl JwtKeys {
    pub fn new(secret: &str, access_ttl_minutes: i64, refresh_ttl_days: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl: Duration::minutes(access_ttl_minutes),
            refresh_ttl: Duration::days(refresh_ttl_days),
        }
    }

    pub fn issue_access(
        &self,
        user_id: i64,
        tenant_id: i64,
        email: &str,
        role: &str,
        tenant_active: bool,
    ) -> Result<String, ApiError> {
        let now = Utc::now();
        let claims = Claims {
            user_id,
            tenant_id,
            email: email.to_string(),
            role: role.to_string(),
            tenant_active,
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
        };
        jsonwebtoken::encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| ApiError::internal(format!("token encoding failed: {e}")))
    }

    pub fn issue_refresh(&self, user_id: i64) -> Result<String, ApiError> {
        let now = Utc::now();
        let claims = RefreshClaims {
            user_id,
            sub: REFRESH_SUBJECT.to_string(),
            iat: now.timestamp(),
            exp: (now + self.refresh_ttl).timestamp(),
        };
        jsonwebtoken::encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| ApiError::internal(format!("token encoding failed: {e}")))
    }

    /// Validate an access token. The algorithm is pinned to HS256 so a forged
    /// header cannot downgrade verification.
    pub fn verify_access(&self, token: &str) -> Result<Claims, ApiError> {
        let validation = Validation::new(Algorithm::HS256);
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|_| ApiError::Unauthorized("invalid or expired token".into()))
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, ApiError> {
        let validation = Validation::new(Algorithm::HS256);
        let claims = jsonwebtoken::decode::<RefreshClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|_| ApiError::Unauthorized("invalid or expired refresh token".into()))?;
        if claims.sub != REFRESH_SUBJECT {
            return Err(ApiError::Unauthorized("invalid token type".into()));
        }
        Ok(claims)
    }

    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl.num_seconds()
    }

    pub fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl.num_seconds()
    }
}

/// Hash a password with argon2id and a random salt.
pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ApiError::internal(format!("password hashing failed: {e}")))
}

/// Verify a password against a stored argon2 hash.
pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// API keys are stored hashed; the original key is shown once at generation.
pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Generate a new tenant API key. Prefixed so keys are recognizable in
/// configuration files without being guessable.
pub fn generate_api_key() -> String {
    format!("mk_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> JwtKeys {
        JwtKeys::new("test-secret", 15, 7)
    }

    #[test]
    fn access_token_round_trip() {
        let keys = keys();
        let token = keys
            .issue_access(7, 3, "dentist@clinic.test", "dentist", true)
            .unwrap();
        let claims = keys.verify_access(&token).unwrap();
        assert_eq!(claims.user_id, 7);
        assert_eq!(claims.tenant_id, 3);
        assert_eq!(claims.role, "dentist");
        assert!(claims.tenant_active);
    }

    #[test]
    fn refresh_token_is_not_a_valid_access_token() {
        let keys = keys();
        let refresh = keys.issue_refresh(7).unwrap();
        assert!(keys.verify_access(&refresh).is_err());
    }

    #[test]
    fn access_token_is_not_a_valid_refresh_token() {
        let keys = keys();
        let access = keys.issue_access(7, 3, "a@b.c", "admin", true).unwrap();
        assert!(keys.verify_refresh(&access).is_err());
    }

    #[test]
    fn tampered_token_is_rejected() {
        let keys = keys();
        let other = JwtKeys::new("other-secret", 15, 7);
        let token = other.issue_access(1, 1, "a@b.c", "admin", true).unwrap();
        assert!(keys.verify_access(&token).is_err());
    }

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn api_key_hash_is_stable_hex() {
        let key = generate_api_key();
        assert!(key.starts_with("mk_"));
        let h = hash_api_key(&key);
        assert_eq!(h.len(), 64);
        assert_eq!(h, hash_api_key(&key));
    }
}
