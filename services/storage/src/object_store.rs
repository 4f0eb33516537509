use crate::config::ObjectStoreConfig;
use crate::error::ExportError;
use async_trait::async_trait;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, info, instrument};

/// Content type of archive objects
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Cold storage for archived rows
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write an immutable object. Returns only once the write is acknowledged.
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ExportError>;
}

/// Generate the archive object key for a partition export.
///
/// Format: `{prefix}/{partition}/{timestamp}_{suffix}.json`
///
/// The RFC 3339 timestamp keeps keys of one partition in export order; the
/// suffix keeps two exports in the same millisecond apart.
pub fn archive_key(prefix: &str, partition: &str, exported_at: DateTime<Utc>, suffix: &str) -> String {
    format!(
        "{prefix}/{partition}/{timestamp}_{suffix}.json",
        prefix = prefix.trim_end_matches('/'),
        partition = sanitize_path_component(partition),
        timestamp = exported_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        suffix = sanitize_path_component(suffix),
    )
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

/// S3-backed object store
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
    config: ObjectStoreConfig,
}

impl S3ObjectStore {
    /// Create a new S3 object store
    pub async fn new(config: &ObjectStoreConfig) -> Self {
        let sdk_config = crate::config::load_sdk_config(&config.region).await;

        let mut s3_config_builder = S3ConfigBuilder::from(&sdk_config);

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
            "S3 object store initialized"
        );

        Self {
            client,
            bucket: config.bucket.clone(),
            config: config.clone(),
        }
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Simple single-part upload for small objects
    async fn simple_upload(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ExportError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| put_error(key, e))?;

        Ok(())
    }

    /// Multipart upload for large archives
    async fn multipart_upload(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ExportError> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| put_error(key, e))?;

        let upload_id = create_response
            .upload_id()
            .ok_or_else(|| ExportError::MissingUploadId {
                key: key.to_string(),
            })?;

        let mut completed_parts = Vec::new();

        for (index, chunk) in body.chunks(self.config.part_size_bytes).enumerate() {
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
                .map_err(|e| put_error(key, e))?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(upload_part_response.e_tag().unwrap_or_default())
                    .build(),
            );
        }

        let completed_upload = CompletedMultipartUpload::builder()
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
            .map_err(|e| put_error(key, e))?;

        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, body), fields(bucket = %self.bucket, size_bytes = body.len()))]
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ExportError> {
        let size = body.len();
        debug!(key = %key, size_bytes = size, "Uploading object to S3");

        if size > self.config.multipart_threshold_bytes {
            self.multipart_upload(key, body, content_type).await?;
        } else {
            self.simple_upload(key, body, content_type).await?;
        }

        metrics::counter!("storage.objects.uploaded").increment(1);
        metrics::counter!("storage.bytes.uploaded").increment(size as u64);

        info!(key = %key, size_bytes = size, "Object uploaded");
        Ok(())
    }
}

fn put_error<E: std::error::Error>(key: &str, error: E) -> ExportError {
    ExportError::Put {
        key: key.to_string(),
        message: DisplayErrorContext(&error).to_string(),
    }
}
