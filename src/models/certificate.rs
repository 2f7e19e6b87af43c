use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// An encrypted PKCS#12 signing certificate owned by a user
/// (`public.user_certificates`). The bundle is stored AES-256-GCM encrypted
/// under a key derived from the certificate password; the password itself is
/// never stored.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserCertificate {
    pub id: i64,
    pub user_id: i64,

    pub name: String,
    pub subject_cn: Option<String>,
    pub issuer_cn: Option<String>,
    pub serial_number: String,
    pub thumbprint: String, // SHA-256 of the certificate DER, hex
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,

    #[serde(skip_serializing)]
    pub encrypted_pfx: Vec<u8>,
    #[serde(skip_serializing)]
    pub encryption_salt: Vec<u8>,
    /// Certificate DER (public material), kept in clear for verification.
    #[serde(skip_serializing)]
    pub certificate_der: Vec<u8>,

    pub active: bool,
    pub last_used_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl UserCertificate {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.not_after
    }

    pub fn is_not_yet_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.not_before
    }

    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        (self.not_after - now).num_days()
    }
}
