use serde::{Deserialize, Serialize};

use crate::config::UploadMode;
use crate::errors::{safe_store_update, AppError, SharedAssetStore};

use super::asset_store::AssetRef;

/// How much of a submitted batch is reverted when one sequential upload fails.
///
/// `WholeBatch` reverts every asset of the intake batch, including the ones
/// already confirmed, and stops the batch. `FailedAssetOnly` reverts only the
/// asset that failed and lets the rest of the batch continue.
/// Batch-strategy units have no partial success and always revert whole.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackScope {
    #[default]
    WholeBatch,
    FailedAssetOnly,
}

impl RollbackScope {
    /// Assets to revert when `failed` fails inside the intake batch `batch`
    pub fn affected<'a>(self, batch: &'a [AssetRef], failed: &'a AssetRef) -> &'a [AssetRef] {
        match self {
            RollbackScope::WholeBatch => batch,
            RollbackScope::FailedAssetOnly => std::slice::from_ref(failed),
        }
    }
}

/// User-visible failure notice
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub title: String,
    pub message: String,
}

impl Alert {
    pub fn upload_failed(error: &AppError) -> Self {
        Self {
            title: "Upload failed".to_string(),
            message: error.user_message(),
        }
    }

    pub fn permission_denied() -> Self {
        Self {
            title: "Permission required".to_string(),
            message: AppError::PermissionDenied.user_message(),
        }
    }
}

/// Outcome of a rollback, handed back to the owner so it can notify the UI
#[derive(Debug, Clone)]
pub struct RollbackReport {
    /// `None` in single mode, where the whole slot is cleared
    pub start_index: Option<usize>,
    pub failed_uris: Vec<String>,
    pub removed: Vec<AssetRef>,
    pub survivors: Vec<AssetRef>,
    pub alert: Alert,
    /// `false` when the store was already torn down and nothing was touched
    pub applied: bool,
}

/// Removes the assets of a failed upload unit from the owner's list
#[derive(Debug, Clone, Copy)]
pub struct FailureRecovery {
    mode: UploadMode,
}

impl FailureRecovery {
    pub fn new(mode: UploadMode) -> Self {
        Self { mode }
    }

    /// Remove the failed `assets` from the store as it stands now.
    ///
    /// The range is located by id at rollback time, so batches that shrank or
    /// shifted since intake are still removed exactly. The assets of one
    /// intake batch stay contiguous, and the span between the lowest and the
    /// highest of their current indices is removed whatever the status of its
    /// members, undoing confirmations already written for them as well.
    pub fn rollback(
        &self,
        store: &SharedAssetStore,
        assets: &[AssetRef],
        error: &AppError,
    ) -> RollbackReport {
        let alert = Alert::upload_failed(error);
        let failed_uris: Vec<String> = assets
            .iter()
            .map(|a| a.local_uri.clone().unwrap_or_default())
            .collect();

        let outcome = safe_store_update(store, "rollback", |store| {
            if store.is_detached() {
                return None;
            }

            let indices: Vec<usize> = assets.iter().filter_map(|a| store.index_of(&a.id)).collect();
            let (first, last) = (*indices.iter().min()?, *indices.iter().max()?);

            for asset in assets {
                store.mark_failed(&asset.id);
            }
            let removed = match self.mode {
                UploadMode::Single => store.clear(),
                UploadMode::Multiple => store.remove_range(first, last - first + 1),
            };
            Some((first, removed, store.assets().to_vec()))
        })
        .flatten();

        let Some((start_index, removed, survivors)) = outcome else {
            log::debug!(
                "Skipping rollback of {} asset(s): store is gone or they were already removed",
                assets.len()
            );
            return RollbackReport {
                start_index: None,
                failed_uris,
                removed: Vec::new(),
                survivors: Vec::new(),
                alert,
                applied: false,
            };
        };

        log::warn!(
            "Rolled back {} asset(s) at index {} after failure: {} ({} remain)",
            removed.len(),
            start_index,
            error,
            survivors.len()
        );

        RollbackReport {
            start_index: self.report_index(start_index),
            failed_uris,
            removed,
            survivors,
            alert,
            applied: true,
        }
    }

    fn report_index(&self, start_index: usize) -> Option<usize> {
        match self.mode {
            UploadMode::Single => None,
            UploadMode::Multiple => Some(start_index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::asset_store::{AssetListStore, AssetStatus};
    use std::sync::{Arc, Mutex};

    fn store_with(n: usize) -> SharedAssetStore {
        let mut store = AssetListStore::new();
        store.append(
            (0..n)
                .map(|i| AssetRef::pending(format!("a{}", i), format!("/tmp/{}.png", i), 0))
                .collect(),
        );
        Arc::new(Mutex::new(store))
    }

    fn batch(store: &SharedAssetStore, ids: &[&str]) -> Vec<AssetRef> {
        let guard = store.lock().unwrap();
        ids.iter().filter_map(|id| guard.get(id).cloned()).collect()
    }

    #[test]
    fn test_rollback_exact_slice() {
        let store = store_with(5);
        {
            let mut guard = store.lock().unwrap();
            guard.claim(&["a2".into(), "a3".into(), "a4".into()]).unwrap();
            guard.confirm("a2", "https://cdn/a2.png".into());
        }
        let failed = batch(&store, &["a2", "a3", "a4"]);

        let report = FailureRecovery::new(UploadMode::Multiple).rollback(
            &store,
            &failed,
            &AppError::upload_failed(500, ""),
        );

        assert!(report.applied);
        assert_eq!(report.start_index, Some(2));
        assert_eq!(report.removed.len(), 3);
        assert!(report.removed.iter().all(|a| a.status == AssetStatus::Failed));
        assert!(report.removed.iter().all(|a| a.remote_url.is_none()));
        let survivors: Vec<&str> = report.survivors.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(survivors, vec!["a0", "a1"]);
        assert_eq!(store.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_rollback_follows_assets_after_earlier_removal() {
        let store = store_with(5);
        let failed = batch(&store, &["a3", "a4"]);
        store.lock().unwrap().remove_range(0, 2);

        let report = FailureRecovery::new(UploadMode::Multiple).rollback(
            &store,
            &failed,
            &AppError::upload_failed(500, ""),
        );

        assert!(report.applied);
        assert_eq!(report.start_index, Some(1));
        let removed: Vec<&str> = report.removed.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(removed, vec!["a3", "a4"]);
        let guard = store.lock().unwrap();
        assert_eq!(guard.assets().len(), 1);
        assert_eq!(guard.assets()[0].id, "a2");
    }

    #[test]
    fn test_rollback_of_vanished_assets_is_not_applied() {
        let store = store_with(3);
        let failed = batch(&store, &["a1"]);
        store.lock().unwrap().remove_range(1, 1);

        let report = FailureRecovery::new(UploadMode::Multiple).rollback(
            &store,
            &failed,
            &AppError::upload_failed(500, ""),
        );

        assert!(!report.applied);
        assert_eq!(store.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_single_mode_clears_slot() {
        let store = store_with(1);
        let failed = batch(&store, &["a0"]);
        let report = FailureRecovery::new(UploadMode::Single).rollback(
            &store,
            &failed,
            &AppError::Internal("offline".into()),
        );

        assert_eq!(report.start_index, None);
        assert!(store.lock().unwrap().is_empty());
        assert_eq!(report.alert.message, crate::errors::GENERIC_UPLOAD_FAILURE);
    }

    #[test]
    fn test_single_mode_keeps_replacement_asset() {
        let store = store_with(1);
        let failed = batch(&store, &["a0"]);
        store.lock().unwrap().replace_all(vec![AssetRef::pending(
            "b0".into(),
            "/tmp/b0.png".into(),
            0,
        )]);

        let report = FailureRecovery::new(UploadMode::Single).rollback(
            &store,
            &failed,
            &AppError::upload_failed(500, ""),
        );

        assert!(!report.applied);
        assert_eq!(store.lock().unwrap().assets()[0].id, "b0");
    }

    #[test]
    fn test_alert_uses_server_message() {
        let store = store_with(2);
        let failed = batch(&store, &["a0", "a1"]);
        let report = FailureRecovery::new(UploadMode::Multiple).rollback(
            &store,
            &failed,
            &AppError::upload_failed(413, "Image too large"),
        );
        assert_eq!(report.alert.message, "Image too large");
    }

    #[test]
    fn test_rollback_on_detached_store_is_noop() {
        let store = store_with(3);
        let failed = batch(&store, &["a0", "a1", "a2"]);
        store.lock().unwrap().detach();

        let report = FailureRecovery::new(UploadMode::Multiple).rollback(
            &store,
            &failed,
            &AppError::upload_failed(500, ""),
        );
        assert!(!report.applied);
        assert_eq!(store.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_scope_selects_affected_assets() {
        let store = store_with(3);
        let all = batch(&store, &["a0", "a1", "a2"]);

        assert_eq!(RollbackScope::WholeBatch.affected(&all, &all[1]).len(), 3);
        let only = RollbackScope::FailedAssetOnly.affected(&all, &all[1]);
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].id, "a1");
    }
}
