use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    primitives::ByteStream as AwsByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
    Client,
};
use bytes::Bytes;
use std::env;
use tracing::debug;

use crate::{
    ByteRange, ByteStream, MultipartError, MultipartResult, ObjectHead, ObjectStore, PartRecord,
    UploadId,
};

/// S3-compatible endpoint configuration
#[derive(Debug, Clone)]
pub struct S3Config {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint_url: String,
    pub bucket: String,
}

impl S3Config {
    /// Read `S3_REGION`, `S3_ACCESS_KEY_ID`, `S3_SECRET_ACCESS_KEY`,
    /// `S3_ENDPOINT_URL` and `S3_BUCKET`
    pub fn from_env() -> MultipartResult<Self> {
        fn get_env(key: &str) -> MultipartResult<String> {
            env::var(key).map_err(|_| {
                MultipartError::invalid(format!("{} environment variable required", key))
            })
        }

        Ok(Self {
            region: get_env("S3_REGION")?,
            access_key_id: get_env("S3_ACCESS_KEY_ID")?,
            secret_access_key: get_env("S3_SECRET_ACCESS_KEY")?,
            endpoint_url: get_env("S3_ENDPOINT_URL")?,
            bucket: get_env("S3_BUCKET")?,
        })
    }
}

/// Object store backed by the AWS SDK, usable against MinIO, RustFS or S3
#[derive(Clone)]
pub struct S3CompatibleStore {
    client: Client,
    bucket: String,
    endpoint_url: String,
}

impl S3CompatibleStore {
    pub async fn new(config: S3Config) -> Self {
        let bucket = config.bucket.clone();
        let endpoint_url = config.endpoint_url.clone();
        let client = Self::create_client(config).await;
        Self {
            client,
            bucket,
            endpoint_url,
        }
    }

    /// Build from `S3_*` environment variables
    pub async fn from_env() -> MultipartResult<Self> {
        Ok(Self::new(S3Config::from_env()?).await)
    }

    /// Wrap an already configured client
    pub fn with_client(client: Client, bucket: String, endpoint_url: String) -> Self {
        Self {
            client,
            bucket,
            endpoint_url,
        }
    }

    async fn create_client(config: S3Config) -> Client {
        let credentials = Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            None,
            None,
            "dog-multipart",
        );

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .endpoint_url(config.endpoint_url)
            .load()
            .await;

        Client::from_conf(
            aws_sdk_s3::config::Builder::from(&aws_config)
                .force_path_style(true) // MinIO/RustFS need path-style addressing
                .build(),
        )
    }

    fn fallback_location(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint_url.trim_end_matches('/'), self.bucket, key)
    }

    fn sdk_part_number(operation: &'static str, part_number: u32) -> MultipartResult<i32> {
        i32::try_from(part_number).map_err(|_| {
            let message = format!("part number {} out of range", part_number);
            MultipartError::upstream_message(operation, message)
        })
    }
}

#[async_trait]
impl ObjectStore for S3CompatibleStore {
    async fn create_multipart_upload(&self, key: &str) -> MultipartResult<UploadId> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| MultipartError::upstream("CreateMultipartUpload", e))?;

        let upload_id = output.upload_id().ok_or_else(|| {
            MultipartError::upstream_message(
                "CreateMultipartUpload",
                "response carried no upload id",
            )
        })?;

        Ok(UploadId::from(upload_id))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &UploadId,
        part_number: u32,
        body: Bytes,
    ) -> MultipartResult<String> {
        let content_length = body.len() as i64;
        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id.as_str())
            .part_number(Self::sdk_part_number("UploadPart", part_number)?)
            .content_length(content_length)
            .body(AwsByteStream::from(body))
            .send()
            .await
            .map_err(|e| MultipartError::upstream("UploadPart", e))?;

        output
            .e_tag()
            .map(str::to_string)
            .ok_or_else(|| {
                MultipartError::upstream_message("UploadPart", "response carried no etag")
            })
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &UploadId,
        parts: &[PartRecord],
    ) -> MultipartResult<String> {
        let completed_parts = parts
            .iter()
            .map(|part| {
                let part_number =
                    Self::sdk_part_number("CompleteMultipartUpload", part.part_number)?;
                Ok(CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(&part.e_tag)
                    .build())
            })
            .collect::<MultipartResult<Vec<_>>>()?;

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id.as_str())
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| MultipartError::upstream("CompleteMultipartUpload", e))?;

        Ok(output
            .location()
            .map(str::to_string)
            .unwrap_or_else(|| self.fallback_location(key)))
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &UploadId) -> MultipartResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id.as_str())
            .send()
            .await
            .map_err(|e| MultipartError::upstream("AbortMultipartUpload", e))?;
        Ok(())
    }

    async fn head_object(&self, key: &str) -> MultipartResult<ObjectHead> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| MultipartError::upstream("HeadObject", e))?;

        let content_length = output.content_length().ok_or_else(|| {
            MultipartError::upstream_message("HeadObject", "response carried no content length")
        })?;
        let size_bytes = u64::try_from(content_length).map_err(|_| {
            let message = format!("negative content length {}", content_length);
            MultipartError::upstream_message("HeadObject", message)
        })?;

        Ok(ObjectHead { size_bytes })
    }

    async fn get_object(&self, key: &str, range: ByteRange) -> MultipartResult<ByteStream> {
        debug!(key, %range, "ranged read");
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .range(range.header_value())
            .send()
            .await
            .map_err(|e| MultipartError::upstream("GetObject", e))?;

        // Forward the body as it arrives rather than collecting it
        let mut body = output.body;
        let stream = async_stream::stream! {
            while let Some(chunk) = body.next().await {
                yield chunk.map_err(std::io::Error::other);
            }
        };
        Ok(Box::pin(stream))
    }
}
