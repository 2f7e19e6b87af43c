use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A scheduled appointment (tenant schema).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Appointment {
    pub id: i64,

    pub patient_id: i64,
    pub dentist_id: i64,

    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,

    pub kind: Option<String>, // consultation, treatment, emergency, return
    pub procedure: Option<String>,

    pub status: String, // scheduled, confirmed, in_progress, completed, cancelled, no_show

    pub confirmed: bool,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub reminder_sent: bool,

    pub notes: Option<String>,
    pub room: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Listing row joined with patient and dentist names.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AppointmentListRow {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub appointment: Appointment,
    pub patient_name: String,
    pub dentist_name: String,
}

pub mod status {
    pub const SCHEDULED: &str = "scheduled";
    pub const CONFIRMED: &str = "confirmed";
    pub const IN_PROGRESS: &str = "in_progress";
    pub const COMPLETED: &str = "completed";
    pub const CANCELLED: &str = "cancelled";
    pub const NO_SHOW: &str = "no_show";

    pub const ALL: &[&str] = &[SCHEDULED, CONFIRMED, IN_PROGRESS, COMPLETED, CANCELLED, NO_SHOW];

    pub fn is_valid(s: &str) -> bool {
        ALL.contains(&s)
    }
}

#[cfg(test)]
mod tests {
    use super::status;
    use test_case::test_case;

    #[test_case("scheduled", true)]
    #[test_case("confirmed", true)]
    #[test_case("no_show", true)]
    #[test_case("noshow", false)]
    #[test_case("", false)]
    #[test_case("SCHEDULED", false)]
    fn status_validation(input: &str, expected: bool) {
        assert_eq!(status::is_valid(input), expected);
    }
}
