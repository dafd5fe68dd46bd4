use async_trait::async_trait;
use bytes::Bytes;

use crate::{ByteRange, ByteStream, MultipartResult, ObjectHead, PartRecord, UploadId};

/// Object store primitives the coordinator and downloader are built on.
///
/// Implemented by [`crate::S3CompatibleStore`]; anything speaking the S3
/// multipart protocol can stand in.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Open a multipart session for `key`
    async fn create_multipart_upload(&self, key: &str) -> MultipartResult<UploadId>;

    /// Upload one part, returning the store-issued etag
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &UploadId,
        part_number: u32,
        body: Bytes,
    ) -> MultipartResult<String>;

    /// Merge the parts into one object. `parts` is sorted by part number.
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &UploadId,
        parts: &[PartRecord],
    ) -> MultipartResult<String>;

    /// Discard a multipart session and any parts already stored
    async fn abort_multipart_upload(&self, key: &str, upload_id: &UploadId) -> MultipartResult<()>;

    /// Get object metadata without content
    async fn head_object(&self, key: &str) -> MultipartResult<ObjectHead>;

    /// Read an inclusive byte range of an object
    async fn get_object(&self, key: &str, range: ByteRange) -> MultipartResult<ByteStream>;
}
