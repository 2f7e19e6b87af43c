use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A patient's dental record entry (tenant schema). Once signed, a record is
/// immutable.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MedicalRecord {
    pub id: i64,

    pub patient_id: i64,
    pub dentist_id: i64,
    pub appointment_id: Option<i64>,

    pub kind: Option<String>, // anamnesis, treatment, procedure

    /// Tooth-by-tooth status, free-form JSON maintained by the frontend.
    pub odontogram: Option<serde_json::Value>,

    pub diagnosis: Option<String>,
    pub treatment_plan: Option<String>,
    pub procedure_done: Option<String>,
    pub materials: Option<String>,
    pub evolution: Option<String>,
    pub notes: Option<String>,

    // Digital signature
    pub is_signed: bool,
    pub signed_at: Option<DateTime<Utc>>,
    pub signed_by_id: Option<i64>,
    pub signed_by_name: Option<String>,
    pub signed_by_cro: Option<String>,
    pub certificate_thumbprint: Option<String>,
    pub signature_hash: Option<String>, // SHA-256 hex of the signed content
    #[serde(skip_serializing)]
    pub signature: Option<String>, // base64 RSA PKCS#1 v1.5 signature

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A prescription or similar issued document (tenant schema).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Prescription {
    pub id: i64,

    pub patient_id: i64,
    pub dentist_id: i64,

    pub kind: String, // prescription, medical_report, certificate, referral
    pub title: Option<String>,
    pub medications: Option<String>,
    pub content: String,
    pub diagnosis: Option<String>,

    pub valid_until: Option<DateTime<Utc>>,
    pub prescription_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,

    // Snapshot of signer/clinic data so reprints stay stable
    pub clinic_name: Option<String>,
    pub dentist_name: Option<String>,
    pub dentist_cro: Option<String>,

    pub status: String, // draft, issued, cancelled
    pub issued_at: Option<DateTime<Utc>>,
    pub printed_at: Option<DateTime<Utc>>,
    pub print_count: i32,

    // Digital signature
    pub is_signed: bool,
    pub signed_at: Option<DateTime<Utc>>,
    pub signed_by_id: Option<i64>,
    pub certificate_thumbprint: Option<String>,
    pub signature_hash: Option<String>,
    #[serde(skip_serializing)]
    pub signature: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

pub mod prescription_status {
    pub const DRAFT: &str = "draft";
    pub const ISSUED: &str = "issued";
    pub const CANCELLED: &str = "cancelled";
}

pub mod prescription_kind {
    pub const ALL: &[&str] = &["prescription", "medical_report", "certificate", "referral"];

    pub fn is_valid(s: &str) -> bool {
        ALL.contains(&s)
    }
}
