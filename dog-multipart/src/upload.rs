use async_trait::async_trait;
use bytes::Bytes;

use crate::{MultipartResult, PartRecord, UploadId};

/// Coordinates multipart uploads against an object store.
///
/// A session is identified by `(file_name, upload_id)`. The object store
/// issues the id on [`initiate`](UploadCoordinator::initiate); the part
/// registry is the only record of which parts it has accepted.
#[async_trait]
pub trait UploadCoordinator: Send + Sync {
    /// Open a multipart session for `file_name`. No registry entry is created.
    async fn initiate(&self, file_name: &str) -> MultipartResult<UploadId>;

    /// Forward one part to the store and register its etag.
    ///
    /// Fails with `Upstream` when the store rejects the part and with
    /// `PartUntracked` when the store accepted it but registration failed.
    async fn upload_part(
        &self,
        file_name: &str,
        upload_id: &UploadId,
        part_number: u32,
        body: Bytes,
    ) -> MultipartResult<String>;

    /// Register a part the store already holds, without re-sending bytes
    async fn register_part(&self, upload_id: &UploadId, part: PartRecord) -> MultipartResult<()>;

    /// Validate the registered parts and merge them into the final object.
    /// Returns the object location.
    async fn complete(&self, file_name: &str, upload_id: &UploadId) -> MultipartResult<String>;

    /// Abort the session on the store and purge its registry entry
    async fn abort(&self, file_name: &str, upload_id: &UploadId) -> MultipartResult<()>;

    /// Registered parts, sorted by part number
    async fn list_parts(&self, upload_id: &UploadId) -> MultipartResult<Vec<PartRecord>>;
}
