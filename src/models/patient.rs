use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A clinic patient (tenant schema).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Patient {
    pub id: i64,

    // Personal information
    pub name: String,
    pub cpf: Option<String>,
    pub rg: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<String>, // M, F, other

    // Contact
    pub email: Option<String>,
    pub phone: Option<String>,
    pub cell_phone: Option<String>,

    // Address
    pub address: Option<String>,
    pub number: Option<String>,
    pub complement: Option<String>,
    pub district: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,

    // Medical information
    pub allergies: Option<String>,
    pub medications: Option<String>,
    pub systemic_diseases: Option<String>,
    pub blood_type: Option<String>,

    // Insurance
    pub has_insurance: bool,
    pub insurance_name: Option<String>,
    pub insurance_number: Option<String>,

    pub tags: Option<String>, // comma-separated
    pub active: bool,
    pub notes: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}
