//! S3 object storage for patient exam files.
//!
//! Objects are keyed `exams/<cpf>/<timestamp>_<sanitized name>`; downloads
//! go through short-lived presigned URLs so the bucket stays private.

use std::time::Duration;

use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use chrono::Utc;

use crate::config::StorageConfig;
use crate::error::ApiError;

/// Presigned URL lifetime.
const DOWNLOAD_URL_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Clone)]
pub struct ExamStorage {
    client: aws_sdk_s3::Client,
    bucket: String,
    base_folder: String,
}

impl ExamStorage {
    pub async fn new(cfg: &StorageConfig) -> Self {
        let aws_cfg = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(cfg.region.clone()))
            .load()
            .await;
        Self {
            client: aws_sdk_s3::Client::new(&aws_cfg),
            bucket: cfg.bucket.clone(),
            base_folder: cfg.base_folder.trim_matches('/').to_string(),
        }
    }

    /// Build the object key for an upload.
    pub fn object_key(&self, patient_ref: &str, file_name: &str) -> String {
        let timestamp = Utc::now().timestamp();
        format!(
            "{}/{}/{timestamp}_{}",
            self.base_folder,
            sanitize_segment(patient_ref),
            sanitize_segment(file_name)
        )
    }

    pub async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), ApiError> {
        let mut req = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes));
        if let Some(ct) = content_type {
            req = req.content_type(ct);
        }
        req.send()
            .await
            .map_err(|e| ApiError::Integration(format!("s3 upload failed: {e}")))?;
        Ok(())
    }

    /// Presigned GET URL for a stored object.
    pub async fn presigned_download_url(&self, key: &str) -> Result<String, ApiError> {
        let presigning = PresigningConfig::expires_in(DOWNLOAD_URL_TTL)
            .map_err(|e| ApiError::internal(format!("presigning config: {e}")))?;
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| ApiError::Integration(format!("s3 presign failed: {e}")))?;
        Ok(presigned.uri().to_string())
    }

    pub async fn delete(&self, key: &str) -> Result<(), ApiError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| ApiError::Integration(format!("s3 delete failed: {e}")))?;
        Ok(())
    }
}

/// Object key segments come from user input (CPF, original file name), so
/// anything outside a conservative set becomes `_`.
fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_safe_characters() {
        assert_eq!(sanitize_segment("raio-x_01.jpg"), "raio-x_01.jpg");
    }

    #[test]
    fn sanitize_replaces_path_separators() {
        assert_eq!(sanitize_segment("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_segment("laudo final.pdf"), "laudo_final.pdf");
    }

    #[test]
    fn sanitize_never_returns_empty() {
        assert_eq!(sanitize_segment(""), "unnamed");
    }
}
