use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::{
    backend::RegistryBackend, LeaseToken, MultipartConfig, MultipartError, MultipartResult,
    ObjectStore, PartRecord, PartRegistry, UploadCoordinator, UploadId,
};

/// Upload coordinator backed by an object store and a shared part registry.
///
/// Holds no locks and no per-upload state of its own; concurrent callers on
/// one upload are safe because the registry append is atomic, and concurrent
/// completions are serialized by the registry's completion lease.
pub struct DefaultUploadCoordinator {
    store: Arc<dyn ObjectStore>,
    registry: PartRegistry,
    config: MultipartConfig,
}

impl DefaultUploadCoordinator {
    pub fn new<S>(store: S, registry: PartRegistry, config: MultipartConfig) -> Self
    where
        S: ObjectStore + 'static,
    {
        Self {
            store: Arc::new(store),
            registry,
            config,
        }
    }

    /// Build the registry from `backend` using `config.part_ttl`
    pub fn with_backend<S, B>(store: S, backend: B, config: MultipartConfig) -> Self
    where
        S: ObjectStore + 'static,
        B: RegistryBackend + 'static,
    {
        let registry = PartRegistry::new(backend, config.part_ttl);
        Self::new(store, registry, config)
    }

    pub fn registry(&self) -> &PartRegistry {
        &self.registry
    }

    pub fn config(&self) -> &MultipartConfig {
        &self.config
    }

    fn validate_file_name(file_name: &str) -> MultipartResult<()> {
        if file_name.trim().is_empty() {
            return Err(MultipartError::invalid("File name must not be empty"));
        }
        Ok(())
    }

    fn validate_part_number(&self, part_number: u32) -> MultipartResult<()> {
        if part_number == 0 || part_number > self.config.max_parts {
            return Err(MultipartError::invalid(format!(
                "Invalid part number: {} (must be 1-{})",
                part_number, self.config.max_parts
            )));
        }
        Ok(())
    }

    /// Renew the completion lease every third of its TTL until it is lost.
    ///
    /// Only returns once a renewal finds the lease gone. A renewal that fails
    /// to reach the backend is retried on the next tick.
    async fn hold_lease(&self, upload_id: &UploadId, token: &LeaseToken) -> MultipartError {
        let ttl = self.config.completion_lease_ttl;
        let period = (ttl / 3).max(Duration::from_millis(1));
        let mut ticks = interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticks.tick().await;
            match self.registry.renew_completion_lease(upload_id, token, ttl).await {
                Ok(true) => debug!("completion lease renewed"),
                Ok(false) => {
                    return MultipartError::CompletionLeaseLost {
                        upload_id: upload_id.clone(),
                    }
                }
                Err(err) => warn!(error = %err, "failed to renew completion lease"),
            }
        }
    }

    /// Everything `complete` does while holding the lease
    async fn finalize(&self, file_name: &str, upload_id: &UploadId) -> MultipartResult<String> {
        let mut parts = self.registry.get_parts(upload_id).await?;
        if parts.is_empty() {
            return Err(MultipartError::not_found(upload_id));
        }

        parts.sort_by_key(|part| part.part_number);

        if let Err(err) = check_contiguous(upload_id, &parts) {
            // The sequence is known bad; drop it so a retry can't reuse it
            warn!(error = %err, "purging registered parts");
            if let Err(purge_err) = self.registry.remove_upload(upload_id).await {
                warn!(error = %purge_err, "failed to purge registered parts");
            }
            return Err(err);
        }

        let location = self
            .store
            .complete_multipart_upload(file_name, upload_id, &parts)
            .await
            .map_err(|source| MultipartError::CompletionFailed {
                upload_id: upload_id.clone(),
                source: Box::new(source),
            })?;

        // The object exists now; a leftover entry only lives until its TTL
        if let Err(err) = self.registry.remove_upload(upload_id).await {
            warn!(error = %err, "completed upload but failed to clear registered parts");
        }

        info!(parts = parts.len(), %location, "multipart upload completed");
        Ok(location)
    }
}

/// Check that sorted `parts` are exactly `1..=N`
fn check_contiguous(upload_id: &UploadId, parts: &[PartRecord]) -> MultipartResult<()> {
    for (index, part) in parts.iter().enumerate() {
        let expected = index as u32 + 1;
        if part.part_number != expected {
            return Err(MultipartError::MissingParts {
                upload_id: upload_id.clone(),
                expected,
                found: part.part_number,
            });
        }
    }
    Ok(())
}

#[async_trait]
impl UploadCoordinator for DefaultUploadCoordinator {
    #[instrument(skip_all, fields(file_name = %file_name))]
    async fn initiate(&self, file_name: &str) -> MultipartResult<UploadId> {
        Self::validate_file_name(file_name)?;

        let upload_id = self.store.create_multipart_upload(file_name).await?;
        info!(%upload_id, "multipart upload initiated");
        Ok(upload_id)
    }

    #[instrument(
        skip_all,
        fields(file_name = %file_name, upload_id = %upload_id, part_number = part_number)
    )]
    async fn upload_part(
        &self,
        file_name: &str,
        upload_id: &UploadId,
        part_number: u32,
        body: Bytes,
    ) -> MultipartResult<String> {
        Self::validate_file_name(file_name)?;
        self.validate_part_number(part_number)?;

        let size = body.len();
        let e_tag = self
            .store
            .upload_part(file_name, upload_id, part_number, body)
            .await?;
        if e_tag.is_empty() {
            return Err(MultipartError::upstream_message(
                "UploadPart",
                "store returned an empty etag",
            ));
        }

        let record = PartRecord::new(part_number, e_tag.clone());
        if let Err(err) = self.registry.add_part(upload_id, &record).await {
            warn!(error = %err, %e_tag, "part stored but not registered");
            return Err(MultipartError::PartUntracked {
                upload_id: upload_id.clone(),
                part_number,
                e_tag,
                source: Box::new(err),
            });
        }

        debug!(size, %e_tag, "part accepted");
        Ok(e_tag)
    }

    #[instrument(skip_all, fields(upload_id = %upload_id, part_number = part.part_number))]
    async fn register_part(&self, upload_id: &UploadId, part: PartRecord) -> MultipartResult<()> {
        self.validate_part_number(part.part_number)?;
        if part.e_tag.is_empty() {
            return Err(MultipartError::invalid("ETag must not be empty"));
        }

        self.registry.add_part(upload_id, &part).await
    }

    #[instrument(skip_all, fields(file_name = %file_name, upload_id = %upload_id))]
    async fn complete(&self, file_name: &str, upload_id: &UploadId) -> MultipartResult<String> {
        Self::validate_file_name(file_name)?;

        let token = self
            .registry
            .acquire_completion_lease(upload_id, self.config.completion_lease_ttl)
            .await?
            .ok_or_else(|| MultipartError::CompletionInProgress {
                upload_id: upload_id.clone(),
            })?;

        // Dropping `finalize` on a lost lease skips the purge, so the new
        // holder still sees the parts
        let result = tokio::select! {
            result = self.finalize(file_name, upload_id) => result,
            lost = self.hold_lease(upload_id, &token) => {
                warn!(error = %lost, "abandoning completion");
                Err(lost)
            }
        };

        match self.registry.release_completion_lease(upload_id, &token).await {
            Ok(true) => {}
            Ok(false) => warn!("completion lease expired before release"),
            Err(err) => warn!(error = %err, "failed to release completion lease"),
        }

        result
    }

    #[instrument(skip_all, fields(file_name = %file_name, upload_id = %upload_id))]
    async fn abort(&self, file_name: &str, upload_id: &UploadId) -> MultipartResult<()> {
        Self::validate_file_name(file_name)?;

        let aborted = self.store.abort_multipart_upload(file_name, upload_id).await;
        let purged = self.registry.remove_upload(upload_id).await;

        if let Err(err) = &purged {
            warn!(error = %err, "failed to clear registered parts");
        }
        aborted?;
        purged?;

        info!("multipart upload aborted");
        Ok(())
    }

    async fn list_parts(&self, upload_id: &UploadId) -> MultipartResult<Vec<PartRecord>> {
        let mut parts = self.registry.get_parts(upload_id).await?;
        parts.sort_by_key(|part| part.part_number);
        Ok(parts)
    }
}
