use std::sync::Arc;
use std::time::Duration;

use crate::{
    backend::RegistryBackend, LeaseToken, MultipartError, MultipartResult, PartRecord, UploadId,
};

/// Durable, TTL-bounded record of the parts accepted for each upload.
///
/// The registry owns no state: everything lives in the injected
/// [`RegistryBackend`], so any number of coordinators sharing a backend stay
/// consistent.
#[derive(Clone)]
pub struct PartRegistry {
    backend: Arc<dyn RegistryBackend>,
    ttl: Duration,
}

fn parts_key(upload_id: &UploadId) -> String {
    format!("upload:parts:{}", upload_id)
}

fn lease_key(upload_id: &UploadId) -> String {
    format!("upload:lease:{}", upload_id)
}

impl PartRegistry {
    pub fn new<B: RegistryBackend + 'static>(backend: B, ttl: Duration) -> Self {
        Self::from_arc(Arc::new(backend), ttl)
    }

    pub fn from_arc(backend: Arc<dyn RegistryBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    /// Sliding TTL applied on every `add_part`
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Append `record` to the entry for `upload_id` and reset its TTL
    pub async fn add_part(&self, upload_id: &UploadId, record: &PartRecord) -> MultipartResult<()> {
        let value = serde_json::to_string(record).map_err(MultipartError::registry)?;
        self.backend
            .append_with_ttl(&parts_key(upload_id), value, self.ttl)
            .await
    }

    /// All records for `upload_id` in insertion order; empty when absent or expired
    pub async fn get_parts(&self, upload_id: &UploadId) -> MultipartResult<Vec<PartRecord>> {
        self.backend
            .range_all(&parts_key(upload_id))
            .await?
            .iter()
            .map(|value| serde_json::from_str(value).map_err(MultipartError::registry))
            .collect()
    }

    /// Drop the entry for `upload_id`; a missing entry is not an error
    pub async fn remove_upload(&self, upload_id: &UploadId) -> MultipartResult<()> {
        self.backend.delete(&parts_key(upload_id)).await
    }

    /// Try to take the completion lease. `None` means another holder has it.
    pub async fn acquire_completion_lease(
        &self,
        upload_id: &UploadId,
        ttl: Duration,
    ) -> MultipartResult<Option<LeaseToken>> {
        let token = LeaseToken::new();
        let acquired = self
            .backend
            .set_if_absent(&lease_key(upload_id), token.as_str(), ttl)
            .await?;
        Ok(acquired.then_some(token))
    }

    /// Push the lease's expiry out by `ttl`. Returns false when `token` no
    /// longer holds it.
    pub async fn renew_completion_lease(
        &self,
        upload_id: &UploadId,
        token: &LeaseToken,
        ttl: Duration,
    ) -> MultipartResult<bool> {
        self.backend
            .extend_if_equals(&lease_key(upload_id), token.as_str(), ttl)
            .await
    }

    /// Release a lease held with `token`. Returns false when it already expired
    /// or was taken over.
    pub async fn release_completion_lease(
        &self,
        upload_id: &UploadId,
        token: &LeaseToken,
    ) -> MultipartResult<bool> {
        self.backend
            .delete_if_equals(&lease_key(upload_id), token.as_str())
            .await
    }
}
