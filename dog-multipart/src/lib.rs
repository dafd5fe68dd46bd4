//! # dog-multipart: multipart uploads and chunked downloads for S3-compatible stores
//!
//! `dog-multipart` coordinates the session state of S3 multipart uploads and
//! streams objects back through bounded-memory ranged reads.
//!
//! ## Key Features
//!
//! - **Out-of-order, concurrent parts**: parts may arrive in any order from any
//!   number of callers; the registry append is atomic on the backing store
//! - **Gap detection**: completion requires exactly parts `1..=N`; a gap purges
//!   the registered parts so a known-bad sequence is never retried
//! - **Guarded completion**: a compare-and-set lease lets one completion per
//!   upload reach the store
//! - **Bounded-memory downloads**: one chunk (5 MiB by default) in memory at a
//!   time, with per-chunk retry of the identical byte range
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐   ┌───────────────────┐
//! │ DefaultUploadCoordinator │   │ ChunkedDownloader │
//! ├──────────────────────────┤   └─────────┬─────────┘
//! │ PartRegistry             │             │
//! │   └ RegistryBackend      │             │
//! │      (Redis / memory)    │             │
//! └────────────┬─────────────┘             │
//!              └────────── ObjectStore ────┘
//!                      (S3CompatibleStore)
//! ```
//!
//! The registry keeps no state of its own. Every coordinator sharing a
//! backend sees the same parts.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dog_multipart::prelude::*;
//! use dog_multipart::backend::memory::MemoryBackend;
//!
//! # async fn run() -> MultipartResult<()> {
//! let config = MultipartConfig::default();
//! let store = S3CompatibleStore::from_env().await?;
//! let uploads =
//!     DefaultUploadCoordinator::with_backend(store.clone(), MemoryBackend::new(), config.clone());
//!
//! let upload_id = uploads.initiate("video.mp4").await?;
//! uploads.upload_part("video.mp4", &upload_id, 2, bytes::Bytes::from(vec![0u8; 1024])).await?;
//! uploads.upload_part("video.mp4", &upload_id, 1, bytes::Bytes::from(vec![0u8; 5 << 20])).await?;
//! let location = uploads.complete("video.mp4", &upload_id).await?;
//!
//! let downloads = ChunkedDownloader::new(store, &config);
//! let mut file = tokio::io::sink();
//! downloads.download("video.mp4", &mut file).await?;
//! # let _ = location;
//! # Ok(())
//! # }
//! ```

pub mod backend;
mod config;
mod coordinator;
mod download;
mod error;
mod registry;
mod s3_store;
pub mod store;
mod types;
mod upload;

pub use backend::RegistryBackend;
#[cfg(feature = "redis")]
pub use backend::redis::RedisBackend;
pub use backend::memory::MemoryBackend;
pub use config::{MultipartConfig, RetryPolicy, MAX_DOWNLOAD_CHUNK_SIZE};
pub use coordinator::DefaultUploadCoordinator;
pub use download::{chunk_ranges, ChunkedDownloader, DownloadSummary};
pub use error::{MultipartError, MultipartResult};
pub use registry::PartRegistry;
pub use s3_store::{S3CompatibleStore, S3Config};
pub use store::ObjectStore;
pub use types::{ByteRange, ByteStream, LeaseToken, ObjectHead, PartRecord, UploadId};
pub use upload::UploadCoordinator;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        ChunkedDownloader, DefaultUploadCoordinator, MultipartConfig, MultipartError,
        MultipartResult, ObjectStore, PartRecord, PartRegistry, S3CompatibleStore,
        UploadCoordinator, UploadId,
    };
}
