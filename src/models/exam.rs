use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A patient exam file stored in S3 (tenant schema holds the metadata).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Exam {
    pub id: i64,

    pub patient_id: i64,

    pub name: String,
    pub description: Option<String>,
    pub exam_type: Option<String>, // x_ray, tomography, photo, report
    pub exam_date: Option<NaiveDate>,

    // Object storage
    pub s3_key: String,
    pub file_name: String,
    pub file_type: Option<String>, // MIME type
    pub file_size: i64,

    pub uploaded_by_id: i64,
    pub notes: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}
