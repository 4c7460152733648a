use bytes::Bytes;
use std::path::Path;

use crate::errors::{AppError, AppResult};
use crate::security::{mime_type_for, InputValidator};

use super::asset_store::AssetRef;

/// File contents of one asset, ready to go into a multipart part
#[derive(Debug, Clone)]
pub struct PreparedAsset {
    pub asset_id: String,
    pub file_name: String,
    pub mime_type: String,
    pub data: Bytes,
}

impl PreparedAsset {
    pub async fn load(asset: &AssetRef) -> AppResult<Self> {
        let local_uri = asset
            .local_uri
            .as_deref()
            .ok_or_else(|| AppError::validation("local_uri", &format!("asset {} has no local file", asset.id)))?;
        let path = InputValidator::normalize_local_uri(local_uri);

        let data = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::file_not_found(&path)
            } else {
                AppError::Io(e)
            }
        })?;

        let file_name = Path::new(&path)
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        Ok(Self {
            asset_id: asset.id.clone(),
            file_name: InputValidator::sanitize_filename(&file_name),
            mime_type: mime_type_for(&path).to_string(),
            data: Bytes::from(data),
        })
    }
}

/// Hints a transform may honour. The size hint is advisory.
#[derive(Debug, Clone, Copy)]
pub struct TransformOptions {
    pub quality: u8,
    pub max_size_hint_bytes: u64,
}

/// Stage run on every asset right before dispatch
pub trait Transform: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, asset: PreparedAsset, options: &TransformOptions) -> AppResult<PreparedAsset>;
}

/// Pass-through stage; assets are uploaded exactly as picked
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTransform;

impl Transform for NoTransform {
    fn name(&self) -> &'static str {
        "none"
    }

    fn apply(&self, asset: PreparedAsset, options: &TransformOptions) -> AppResult<PreparedAsset> {
        if asset.data.len() as u64 > options.max_size_hint_bytes {
            log::debug!(
                "{} is {} bytes, above the {} byte hint; uploading unchanged",
                asset.file_name,
                asset.data.len(),
                options.max_size_hint_bytes
            );
        }
        Ok(asset)
    }
}
