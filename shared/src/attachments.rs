use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

#[derive(Deserialize)]
pub struct UploadAttachmentRequest {
    pub site_id: String,
    pub document_number: String,
    pub revision_number: u32,
    pub file_name: String,
    pub content_type: String,
    pub file_data: String, // base64 encoded
}

#[derive(Serialize)]
pub struct UploadAttachmentResponse {
    pub attachment_id: String,
    pub key: String,
    pub url: String,
}

/// Attachment staging for document revisions. Files live under
/// sites/{site_id}/documents/{document_number}/rev{n}/{attachment_id}.{ext}.
pub struct AttachmentStore {
    client: S3Client,
    bucket: String,
}

impl AttachmentStore {
    pub fn new(client: S3Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    pub async fn upload(
        &self,
        request: UploadAttachmentRequest,
    ) -> CoreResult<UploadAttachmentResponse> {
        let attachment_id = Uuid::new_v4().to_string();

        let extension = request.file_name.split('.').last().unwrap_or("pdf");

        let s3_key = format!(
            "sites/{}/documents/{}/rev{}/{}.{}",
            request.site_id,
            request.document_number,
            request.revision_number,
            attachment_id,
            extension
        );

        let file_bytes = general_purpose::STANDARD
            .decode(&request.file_data)
            .map_err(|e| CoreError::Validation(format!("Failed to decode base64: {}", e)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&s3_key)
            .body(ByteStream::from(file_bytes))
            .content_type(&request.content_type)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to upload attachment {}: {:?}", s3_key, e);
                CoreError::StoreUnavailable(format!("Failed to upload to S3: {}", e))
            })?;

        let url = format!("https://{}.s3.amazonaws.com/{}", self.bucket, s3_key);

        Ok(UploadAttachmentResponse {
            attachment_id,
            key: s3_key,
            url,
        })
    }

    pub async fn delete(&self, key: &str) -> CoreResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to delete attachment {}: {:?}", key, e);
                CoreError::StoreUnavailable(format!("Failed to delete from S3: {}", e))
            })?;
        Ok(())
    }
}
