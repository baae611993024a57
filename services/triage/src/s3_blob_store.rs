use crate::blob_store::{extension_for_content_type, BlobStore, UploadTarget};
use crate::config::{BlobStoreConfig, MIN_PART_SIZE_BYTES};
use crate::photo::BlobRef;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Blob store backed by an S3 bucket, handing out presigned URLs
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
    config: BlobStoreConfig,
}

impl S3BlobStore {
    /// Create a new S3 blob store
    pub async fn new(config: &BlobStoreConfig) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 blob store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            config: config.clone(),
        })
    }

    fn presign_expiry(&self) -> Duration {
        Duration::from_secs(self.config.presigned_url_expiry_secs)
    }

    fn expires_at(&self) -> Result<DateTime<Utc>> {
        Ok(Utc::now() + chrono::Duration::from_std(self.presign_expiry())?)
    }

    /// Simple single-part upload for small blobs
    async fn simple_upload(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .context("Failed to upload blob to S3")?;

        Ok(())
    }

    /// Multipart upload for large blobs; an upload that fails part way is
    /// aborted so S3 drops the parts already sent
    async fn multipart_upload(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .context("Failed to create multipart upload")?;

        let upload_id = create_response
            .upload_id()
            .context("No upload ID in response")?;

        let result = self.upload_parts(key, upload_id, bytes).await;
        if let Err(e) = &result {
            warn!(key = %key, upload_id = %upload_id, error = %e, "Aborting multipart upload");
            if let Err(abort_error) = self
                .client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .send()
                .await
            {
                warn!(
                    key = %key,
                    upload_id = %upload_id,
                    error = %abort_error,
                    "Failed to abort multipart upload"
                );
            }
        }
        result
    }

    /// Upload every part of an open multipart upload, then complete it
    async fn upload_parts(&self, key: &str, upload_id: &str, bytes: &[u8]) -> Result<()> {
        let mut completed_parts = Vec::new();

        for (index, chunk) in bytes.chunks(part_size(self.config.part_size_bytes)).enumerate() {
            let part_number = index as i32 + 1;

            let upload_part_response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk.to_vec()))
                .send()
                .await
                .with_context(|| format!("Failed to upload part {part_number}"))?;

            completed_parts.push(
                aws_sdk_s3::types::CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(upload_part_response.e_tag().unwrap_or_default())
                    .build(),
            );
        }

        let completed_upload = aws_sdk_s3::types::CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .context("Failed to complete multipart upload")?;

        Ok(())
    }

    /// Check if an object exists
    async fn object_exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(e).context("Failed to check blob existence")
                }
            }
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[instrument(skip(self))]
    async fn generate_upload_target(&self) -> Result<UploadTarget> {
        let key = object_key(&self.config.key_prefix, "uploads", Utc::now(), Uuid::new_v4(), None);
        let presigning_config = PresigningConfig::expires_in(self.presign_expiry())
            .context("Failed to create presigning config")?;

        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .presigned(presigning_config)
            .await
            .context("Failed to presign upload URL")?;

        Ok(UploadTarget {
            blob_ref: BlobRef::new(key),
            upload_url: presigned.uri().to_string(),
            expires_at: self.expires_at()?,
        })
    }

    async fn read_url(&self, blob_ref: &BlobRef) -> Result<Option<String>> {
        if !self.object_exists(blob_ref.as_str()).await? {
            return Ok(None);
        }

        let presigning_config = PresigningConfig::expires_in(self.presign_expiry())
            .context("Failed to create presigning config")?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(blob_ref.as_str())
            .presigned(presigning_config)
            .await
            .context("Failed to generate presigned URL")?;

        Ok(Some(presigned.uri().to_string()))
    }

    #[instrument(skip(self, bytes), fields(size_bytes = bytes.len()))]
    async fn store(&self, bytes: Vec<u8>, content_type: &str) -> Result<BlobRef> {
        let key = object_key(
            &self.config.key_prefix,
            "enhanced",
            Utc::now(),
            Uuid::new_v4(),
            Some(extension_for_content_type(content_type)),
        );
        let size = bytes.len();

        if size > self.config.multipart_threshold_bytes {
            self.multipart_upload(&key, &bytes, content_type).await?;
        } else {
            self.simple_upload(&key, bytes, content_type).await?;
        }

        debug!(key = %key, size_bytes = size, "Blob stored in S3");

        Ok(BlobRef::new(key))
    }

    #[instrument(skip(self), fields(key = %blob_ref))]
    async fn delete(&self, blob_ref: &BlobRef) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(blob_ref.as_str())
            .send()
            .await
            .context("Failed to delete blob from S3")?;

        debug!("Blob deleted from S3");
        Ok(())
    }
}

/// Object key partitioned by kind and date
/// Format: {prefix}/{kind}/{date}/{id}[.{ext}]
fn object_key(
    prefix: &str,
    kind: &str,
    at: DateTime<Utc>,
    id: Uuid,
    extension: Option<&str>,
) -> String {
    let mut key = format!(
        "{}/{}/{}/{}",
        sanitize_path_component(prefix.trim_matches('/')),
        kind,
        at.format("%Y-%m-%d"),
        id
    );
    if let Some(ext) = extension {
        key.push('.');
        key.push_str(ext);
    }
    key
}

/// Part size actually used for multipart uploads, never below the S3 minimum
fn part_size(configured: usize) -> usize {
    configured.max(MIN_PART_SIZE_BYTES)
}

/// Sanitize a path component to prevent path traversal
fn sanitize_path_component(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}
