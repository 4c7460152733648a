use uuid::Uuid;

use crate::config::UploadMode;
use crate::errors::{safe_store_update, AppError, AppResult, SharedAssetStore};
use crate::security::InputValidator;

use super::asset_store::AssetRef;

/// What the owner's "selected" callback receives
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Full list after the append, in display order
    Multiple(Vec<String>),
    Single(String),
}

/// Assets produced by one picker invocation, already in the store
#[derive(Debug, Clone)]
pub struct IntakeBatch {
    pub assets: Vec<AssetRef>,
    pub start_index: usize,
    pub selection: Selection,
}

impl IntakeBatch {
    pub fn local_uris(&self) -> Vec<String> {
        self.assets
            .iter()
            .filter_map(|a| a.local_uri.clone())
            .collect()
    }
}

/// Turns picker output into pending assets
#[derive(Debug, Clone, Copy)]
pub struct SelectionIntake {
    mode: UploadMode,
    limit: usize,
}

impl SelectionIntake {
    pub fn new(mode: UploadMode, limit: usize) -> Self {
        let limit = match mode {
            UploadMode::Single => 1,
            UploadMode::Multiple => limit,
        };
        Self { mode, limit }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Slots still free given the current list length
    pub fn remaining_capacity(&self, existing_count: usize) -> usize {
        match self.mode {
            UploadMode::Single => 1,
            UploadMode::Multiple => self.limit.saturating_sub(existing_count),
        }
    }

    /// Build pending assets for a selection, truncated to the free capacity.
    /// Ids are provisional: intake timestamp, position and a random suffix, so
    /// two selections landing in the same millisecond never share an id.
    pub fn intake(selected_uris: &[String], existing_count: usize, limit: usize) -> Vec<AssetRef> {
        let capacity = limit.saturating_sub(existing_count);
        if selected_uris.len() > capacity {
            log::warn!(
                "Selection of {} exceeds remaining capacity {}, truncating",
                selected_uris.len(),
                capacity
            );
        }

        let stamp = chrono::Utc::now().timestamp_millis();
        let nonce = Uuid::new_v4().simple().to_string();
        selected_uris
            .iter()
            .take(capacity)
            .enumerate()
            .map(|(index, uri)| {
                let position = existing_count + index;
                AssetRef::pending(
                    format!("local-{}-{}-{}", stamp, position, &nonce[..8]),
                    InputValidator::normalize_local_uri(uri),
                    position,
                )
            })
            .collect()
    }

    /// Validate, truncate and append a selection to the store.
    ///
    /// Returns `None` when nothing was added (empty or fully rejected
    /// selection, or a torn-down store).
    pub fn intake_into(
        &self,
        store: &SharedAssetStore,
        selected_uris: &[String],
    ) -> AppResult<Option<IntakeBatch>> {
        let valid: Vec<String> = selected_uris
            .iter()
            .filter(|uri| match InputValidator::validate_local_uri(uri) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("Skipping selected asset {}: {}", uri, e);
                    false
                }
            })
            .cloned()
            .collect();

        if valid.is_empty() {
            return Ok(None);
        }

        let mode = self.mode;
        let limit = self.limit;
        safe_store_update(store, "intake", |store| {
            if store.is_detached() {
                return None;
            }

            match mode {
                UploadMode::Multiple => {
                    let assets = Self::intake(&valid, store.len(), limit);
                    if assets.is_empty() {
                        return None;
                    }
                    let start_index = store.append(assets.clone());
                    Some(IntakeBatch {
                        assets,
                        start_index,
                        selection: Selection::Multiple(store.display_uris()),
                    })
                }
                UploadMode::Single => {
                    let assets = Self::intake(&valid, 0, 1);
                    let asset = assets.first()?.clone();
                    store.replace_all(assets.clone());
                    Some(IntakeBatch {
                        selection: Selection::Single(asset.display_uri().to_string()),
                        assets,
                        start_index: 0,
                    })
                }
            }
        })
        .ok_or_else(|| AppError::Internal("asset store lock poisoned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::asset_store::{AssetListStore, AssetStatus};
    use std::sync::{Arc, Mutex};

    fn shared() -> SharedAssetStore {
        Arc::new(Mutex::new(AssetListStore::new()))
    }

    fn uris(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| format!("/photos/{}.jpg", n)).collect()
    }

    #[test]
    fn test_intake_truncates_to_capacity() {
        let assets = SelectionIntake::intake(&uris(&["a", "b", "c"]), 4, 6);

        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].position, 4);
        assert_eq!(assets[1].position, 5);
        assert!(assets.iter().all(|a| a.status == AssetStatus::Pending));
        assert!(assets[0].id.starts_with("local-"));
        assert_ne!(assets[0].id, assets[1].id);
    }

    #[test]
    fn test_back_to_back_single_selections_get_distinct_ids() {
        let first = SelectionIntake::intake(&uris(&["a"]), 0, 1);
        let second = SelectionIntake::intake(&uris(&["a"]), 0, 1);

        assert_eq!(first[0].position, second[0].position);
        assert_ne!(first[0].id, second[0].id);
    }

    #[test]
    fn test_intake_with_full_store_is_empty() {
        assert!(SelectionIntake::intake(&uris(&["a"]), 6, 6).is_empty());
        assert!(SelectionIntake::intake(&uris(&["a"]), 9, 6).is_empty());
    }

    #[test]
    fn test_order_is_existing_then_selection() {
        let store = shared();
        let intake = SelectionIntake::new(UploadMode::Multiple, 6);

        intake.intake_into(&store, &uris(&["a", "b"])).unwrap().unwrap();
        let batch = intake.intake_into(&store, &uris(&["c", "d"])).unwrap().unwrap();

        assert_eq!(batch.start_index, 2);
        assert_eq!(
            batch.selection,
            Selection::Multiple(uris(&["a", "b", "c", "d"]))
        );
        assert_eq!(batch.local_uris(), uris(&["c", "d"]));
    }

    #[test]
    fn test_invalid_uris_are_dropped() {
        let store = shared();
        let intake = SelectionIntake::new(UploadMode::Multiple, 6);

        let selection = vec![
            "/photos/ok.png".to_string(),
            "/photos/readme.txt".to_string(),
            "/photos/../secret.png".to_string(),
        ];
        let batch = intake.intake_into(&store, &selection).unwrap().unwrap();
        assert_eq!(batch.assets.len(), 1);

        let none = intake
            .intake_into(&store, &["notes.txt".to_string()])
            .unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_single_mode_replaces_slot() {
        let store = shared();
        let intake = SelectionIntake::new(UploadMode::Single, 6);
        assert_eq!(intake.limit(), 1);

        intake.intake_into(&store, &uris(&["first"])).unwrap();
        let batch = intake
            .intake_into(&store, &uris(&["second", "third"]))
            .unwrap()
            .unwrap();

        assert_eq!(batch.selection, Selection::Single("/photos/second.jpg".into()));
        let guard = store.lock().unwrap();
        assert_eq!(guard.len(), 1);
        assert_eq!(guard.assets()[0].local_uri.as_deref(), Some("/photos/second.jpg"));
    }

    #[test]
    fn test_remaining_capacity() {
        let intake = SelectionIntake::new(UploadMode::Multiple, 6);
        assert_eq!(intake.remaining_capacity(2), 4);
        assert_eq!(intake.remaining_capacity(8), 0);
    }
}
