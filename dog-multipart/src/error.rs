use thiserror::Error;

use crate::UploadId;

/// Result type for multipart operations
pub type MultipartResult<T> = Result<T, MultipartError>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while coordinating uploads and downloads
#[derive(Error, Debug)]
pub enum MultipartError {
    #[error("Invalid request: {message}")]
    Validation { message: String },

    #[error("Missing part(s) for upload {upload_id}: expected part {expected}, found {found}")]
    MissingParts {
        upload_id: UploadId,
        expected: u32,
        found: u32,
    },

    #[error("No uploaded parts found for upload {upload_id}")]
    NotFound { upload_id: UploadId },

    #[error("Object store {operation} failed: {source}")]
    Upstream {
        operation: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("Part registry error: {source}")]
    Registry {
        #[source]
        source: BoxError,
    },

    #[error(
        "Part {part_number} of upload {upload_id} was stored (etag {e_tag}) \
         but could not be registered: {source}"
    )]
    PartUntracked {
        upload_id: UploadId,
        part_number: u32,
        e_tag: String,
        #[source]
        source: Box<MultipartError>,
    },

    #[error("Complete multipart upload {upload_id} failed: {source}")]
    CompletionFailed {
        upload_id: UploadId,
        #[source]
        source: Box<MultipartError>,
    },

    #[error("Upload {upload_id} is already being completed")]
    CompletionInProgress { upload_id: UploadId },

    #[error("Completion lease for upload {upload_id} was lost before the store finished")]
    CompletionLeaseLost { upload_id: UploadId },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl MultipartError {
    /// Create an object store error from any error type
    pub fn upstream<E>(operation: &'static str, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Upstream {
            operation,
            source: Box::new(error),
        }
    }

    /// Create an object store error for a malformed response
    pub fn upstream_message<S: Into<String>>(operation: &'static str, message: S) -> Self {
        let message: String = message.into();
        Self::Upstream {
            operation,
            source: message.into(),
        }
    }

    /// Create a registry error from any error type
    pub fn registry<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Registry {
            source: Box::new(error),
        }
    }

    /// Create an invalid request error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(upload_id: &UploadId) -> Self {
        Self::NotFound {
            upload_id: upload_id.clone(),
        }
    }

    /// True for the validation family: bad input or a non-contiguous part sequence
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::MissingParts { .. })
    }

    /// Whether repeating the same call unchanged can succeed.
    ///
    /// `PartUntracked` is not retryable as-is: the bytes are already stored,
    /// so callers should use `register_part` instead of re-uploading.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Upstream { .. }
                | Self::Registry { .. }
                | Self::CompletionFailed { .. }
                | Self::CompletionInProgress { .. }
                | Self::CompletionLeaseLost { .. }
        )
    }
}
