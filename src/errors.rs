use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::uploader::asset_store::AssetListStore;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid upload endpoint: {url}")]
    InvalidEndpoint { url: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid file type: {path}. Only image files are supported.")]
    InvalidFileType { path: String },

    #[error("Upload failed with status {status}: {message}")]
    UploadFailed { status: u16, message: String },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Media library permission denied")]
    PermissionDenied,

    #[error("Asset {id} is already claimed by an in-flight upload")]
    AlreadyClaimed { id: String },

    #[error("Asset store was torn down during {operation}")]
    Detached { operation: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Custom result type
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn file_not_found(path: &str) -> Self {
        Self::FileNotFound {
            path: path.to_string(),
        }
    }

    pub fn invalid_file_type(path: &str) -> Self {
        Self::InvalidFileType {
            path: path.to_string(),
        }
    }

    pub fn invalid_endpoint(url: &str) -> Self {
        Self::InvalidEndpoint {
            url: url.to_string(),
        }
    }

    pub fn upload_failed(status: u16, message: &str) -> Self {
        Self::UploadFailed {
            status,
            message: message.to_string(),
        }
    }

    pub fn already_claimed(id: &str) -> Self {
        Self::AlreadyClaimed { id: id.to_string() }
    }

    pub fn detached(operation: &str) -> Self {
        Self::Detached {
            operation: operation.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            AppError::UploadFailed { status, .. } => {
                matches!(status, 429 | 500 | 502 | 503 | 504)
            }
            AppError::Io(_) => true,
            _ => false,
        }
    }

    /// Text suitable for a user-facing alert. Server-provided messages are
    /// passed through; everything else collapses to a generic sentence.
    pub fn user_message(&self) -> String {
        match self {
            AppError::UploadFailed { message, .. } if !message.trim().is_empty() => {
                message.clone()
            }
            AppError::PermissionDenied => {
                "Permission to access your media library is required to attach images."
                    .to_string()
            }
            _ => GENERIC_UPLOAD_FAILURE.to_string(),
        }
    }
}

pub const GENERIC_UPLOAD_FAILURE: &str = "Failed to upload image. Please try again.";

/// Shared handle to the owner's asset list
pub type SharedAssetStore = Arc<Mutex<AssetListStore>>;

/// Apply a mutation to the shared store, logging instead of panicking when the
/// lock is poisoned. Returns `None` when the lock could not be taken.
pub fn safe_store_update<F, R>(store: &SharedAssetStore, operation: &str, f: F) -> Option<R>
where
    F: FnOnce(&mut AssetListStore) -> R,
{
    match store.lock() {
        Ok(mut guard) => Some(f(&mut guard)),
        Err(e) => {
            log::error!(
                "Failed to acquire asset store lock for {} (non-critical): {}",
                operation,
                e
            );
            None
        }
    }
}

pub fn safe_store_read<F, R>(store: &SharedAssetStore, operation: &str, f: F) -> Option<R>
where
    F: FnOnce(&AssetListStore) -> R,
{
    match store.lock() {
        Ok(guard) => Some(f(&guard)),
        Err(e) => {
            log::error!(
                "Failed to acquire asset store lock for {} (non-critical): {}",
                operation,
                e
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_prefers_server_text() {
        let err = AppError::upload_failed(413, "Image exceeds 10MB limit");
        assert_eq!(err.user_message(), "Image exceeds 10MB limit");
    }

    #[test]
    fn test_user_message_falls_back_to_generic() {
        let err = AppError::upload_failed(500, "  ");
        assert_eq!(err.user_message(), GENERIC_UPLOAD_FAILURE);

        let err = AppError::Internal("boom".to_string());
        assert_eq!(err.user_message(), GENERIC_UPLOAD_FAILURE);
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(AppError::upload_failed(503, "").is_retryable());
        assert!(AppError::upload_failed(429, "").is_retryable());
        assert!(!AppError::upload_failed(400, "").is_retryable());
        assert!(!AppError::PermissionDenied.is_retryable());
    }

    #[test]
    fn test_safe_store_update_runs_closure() {
        let store: SharedAssetStore = Arc::new(Mutex::new(AssetListStore::new()));
        let len = safe_store_update(&store, "test", |s| s.len());
        assert_eq!(len, Some(0));
    }
}
