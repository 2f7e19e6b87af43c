use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A potential patient, typically captured from WhatsApp (tenant schema).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Lead {
    pub id: i64,

    pub name: String,
    pub phone: String, // primary identifier for WhatsApp lookup
    pub email: Option<String>,
    pub birth_date: Option<NaiveDate>,

    pub source: String, // whatsapp, website, referral, instagram, facebook, other
    pub contact_reason: Option<String>,

    pub status: String, // new, contacted, qualified, converted, lost

    pub converted_to_patient_id: Option<i64>,
    pub converted_at: Option<DateTime<Utc>>,

    pub notes: Option<String>,
    pub created_by: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

pub mod lead_status {
    pub const NEW: &str = "new";
    pub const CONTACTED: &str = "contacted";
    pub const QUALIFIED: &str = "qualified";
    pub const CONVERTED: &str = "converted";
    pub const LOST: &str = "lost";

    pub const ALL: &[&str] = &[NEW, CONTACTED, QUALIFIED, CONVERTED, LOST];

    pub fn is_valid(s: &str) -> bool {
        ALL.contains(&s)
    }
}

/// A clinic task (tenant schema). Responsible users live in `task_users`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: i64,

    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: String, // low, medium, high, urgent
    pub status: String,   // pending, in_progress, completed, cancelled

    pub created_by: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

pub mod task_status {
    pub const PENDING: &str = "pending";
    pub const IN_PROGRESS: &str = "in_progress";
    pub const COMPLETED: &str = "completed";
    pub const CANCELLED: &str = "cancelled";

    pub const ALL: &[&str] = &[PENDING, IN_PROGRESS, COMPLETED, CANCELLED];

    pub fn is_valid(s: &str) -> bool {
        ALL.contains(&s)
    }
}

pub mod task_priority {
    pub const ALL: &[&str] = &["low", "medium", "high", "urgent"];

    pub fn is_valid(s: &str) -> bool {
        ALL.contains(&s)
    }
}

/// A waiting-list entry for patients hoping for an earlier slot
/// (tenant schema).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WaitingListEntry {
    pub id: i64,

    pub patient_id: i64,
    pub dentist_id: Option<i64>, // any dentist when null
    pub procedure: Option<String>,
    pub preferred_dates: Option<serde_json::Value>, // array of date ranges

    pub priority: String, // normal, urgent
    pub status: String,   // waiting, contacted, scheduled, cancelled

    pub contacted_at: Option<DateTime<Utc>>,
    pub contacted_by: Option<i64>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub appointment_id: Option<i64>,

    pub notes: Option<String>,
    pub created_by: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

pub mod waiting_status {
    pub const WAITING: &str = "waiting";
    pub const CONTACTED: &str = "contacted";
    pub const SCHEDULED: &str = "scheduled";
    pub const CANCELLED: &str = "cancelled";

    pub const ALL: &[&str] = &[WAITING, CONTACTED, SCHEDULED, CANCELLED];

    pub fn is_valid(s: &str) -> bool {
        ALL.contains(&s)
    }
}
