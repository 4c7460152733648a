use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    Pending,
    Uploading,
    Uploaded,
    Failed,
}

/// One attached media item, local or remote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRef {
    pub id: String,
    pub local_uri: Option<String>,
    pub remote_url: Option<String>,
    pub status: AssetStatus,
    pub position: usize,
}

impl AssetRef {
    pub fn pending(id: String, local_uri: String, position: usize) -> Self {
        Self {
            id,
            local_uri: Some(local_uri),
            remote_url: None,
            status: AssetStatus::Pending,
            position,
        }
    }

    /// The reference a UI should render: the durable URL once uploaded,
    /// otherwise the device-local one.
    pub fn display_uri(&self) -> &str {
        self.remote_url
            .as_deref()
            .or(self.local_uri.as_deref())
            .unwrap_or_default()
    }

    pub fn is_in_flight(&self) -> bool {
        self.status == AssetStatus::Uploading
    }
}

/// Ordered list of assets owned by a single form.
///
/// Every mutation keeps `position` equal to the asset's index. Once detached
/// (the owning form was torn down) all mutations become no-ops so that late
/// upload results cannot write into a discarded list.
#[derive(Debug, Default)]
pub struct AssetListStore {
    assets: Vec<AssetRef>,
    detached: bool,
}

impl AssetListStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assets(&self) -> &[AssetRef] {
        &self.assets
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&AssetRef> {
        self.assets.iter().find(|a| a.id == id)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.assets.iter().position(|a| a.id == id)
    }

    pub fn display_uris(&self) -> Vec<String> {
        self.assets
            .iter()
            .map(|a| a.display_uri().to_string())
            .collect()
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    pub fn detach(&mut self) {
        if !self.detached {
            log::debug!("Detaching asset store with {} assets", self.assets.len());
        }
        self.detached = true;
    }

    /// Append new assets after the existing ones. Returns the index of the
    /// first appended asset.
    pub fn append(&mut self, new_assets: Vec<AssetRef>) -> usize {
        let start_index = self.assets.len();
        if self.detached {
            log::debug!("Dropping append of {} assets to detached store", new_assets.len());
            return start_index;
        }

        self.assets.extend(new_assets);
        self.reindex();
        start_index
    }

    /// Replace the whole list (single-slot fields hold at most one asset)
    pub fn replace_all(&mut self, new_assets: Vec<AssetRef>) {
        if self.detached {
            return;
        }
        self.assets = new_assets;
        self.reindex();
    }

    /// Move every listed asset from `pending` to `uploading`.
    ///
    /// Either all assets are claimed or none is: an asset that is missing or
    /// not pending makes the whole claim fail.
    pub fn claim(&mut self, ids: &[String]) -> AppResult<()> {
        if self.detached {
            return Err(AppError::detached("claim"));
        }

        for id in ids {
            match self.get(id) {
                Some(asset) if asset.status == AssetStatus::Pending => {}
                Some(_) => return Err(AppError::already_claimed(id)),
                None => {
                    return Err(AppError::validation(
                        "asset_id",
                        &format!("unknown asset {}", id),
                    ))
                }
            }
        }

        for asset in self.assets.iter_mut().filter(|a| ids.contains(&a.id)) {
            asset.status = AssetStatus::Uploading;
        }
        Ok(())
    }

    /// Confirm an upload: the asset becomes durable and loses its local reference.
    pub fn confirm(&mut self, id: &str, remote_url: String) -> bool {
        if self.detached {
            return false;
        }

        match self.assets.iter_mut().find(|a| a.id == id) {
            Some(asset) => {
                asset.status = AssetStatus::Uploaded;
                asset.remote_url = Some(remote_url);
                asset.local_uri = None;
                true
            }
            None => {
                log::warn!("Cannot confirm asset {}: no longer in store", id);
                false
            }
        }
    }

    /// Flag an asset as failed. This is a transient signal; recovery removes it.
    pub fn mark_failed(&mut self, id: &str) -> bool {
        if self.detached {
            return false;
        }

        match self.assets.iter_mut().find(|a| a.id == id) {
            Some(asset) => {
                asset.status = AssetStatus::Failed;
                asset.remote_url = None;
                true
            }
            None => false,
        }
    }

    /// Remove `[start, start + len)` as it stands right now, clamped to the
    /// current length. Survivors keep their relative order.
    pub fn remove_range(&mut self, start: usize, len: usize) -> Vec<AssetRef> {
        if self.detached || start >= self.assets.len() {
            return Vec::new();
        }

        let end = start.saturating_add(len).min(self.assets.len());
        let removed: Vec<AssetRef> = self.assets.drain(start..end).collect();
        self.reindex();
        removed
    }

    pub fn clear(&mut self) -> Vec<AssetRef> {
        if self.detached {
            return Vec::new();
        }
        std::mem::take(&mut self.assets)
    }

    fn reindex(&mut self) {
        for (index, asset) in self.assets.iter_mut().enumerate() {
            asset.position = index;
        }
    }
}
