use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::config::{validate_config, UploadMode, UploaderConfig};
use crate::errors::{safe_store_read, safe_store_update, AppError, AppResult, SharedAssetStore};
use crate::picker::{MediaPicker, PermissionStatus, PickOptions, PickResult};
use crate::uploader::http_client::{Transport, UploadResponse};
use crate::uploader::intake::{IntakeBatch, Selection, SelectionIntake};
use crate::uploader::progress_tracker::ProgressTracker;
use crate::uploader::recovery::Alert;
use crate::uploader::transform::Transform;
use crate::uploader::upload_queue::{EventSink, RunEvent, RunReport, UploadOrchestrator};
use crate::uploader::{AssetListStore, AssetRef};

/// Notifications for the form that embeds a media field. Every method has a
/// no-op default so owners implement only what they render.
pub trait MediaFieldCallbacks: Send + Sync {
    fn on_selected(&self, _selection: &Selection) {}

    /// Multi mode only: the URIs added by this selection
    fn on_added(&self, _uris: &[String]) {}

    /// `(index, survivors)` in multi mode, `(None, None)` in single mode
    fn on_removed(&self, _index: Option<usize>, _survivors: Option<&[AssetRef]>) {}

    fn on_upload_complete(&self, _response: &UploadResponse, _index: Option<usize>) {}

    fn on_alert(&self, _alert: &Alert) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallbacks;

impl MediaFieldCallbacks for NoopCallbacks {}

/// Callbacks that only log; used by the command line front end
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingCallbacks;

impl MediaFieldCallbacks for LoggingCallbacks {
    fn on_selected(&self, selection: &Selection) {
        match selection {
            Selection::Multiple(uris) => log::info!("Selected: {} asset(s) in field", uris.len()),
            Selection::Single(uri) => log::info!("Selected: {}", uri),
        }
    }

    fn on_removed(&self, index: Option<usize>, survivors: Option<&[AssetRef]>) {
        log::info!(
            "Removed assets at {:?}, {} remain",
            index,
            survivors.map_or(0, <[AssetRef]>::len)
        );
    }

    fn on_upload_complete(&self, response: &UploadResponse, index: Option<usize>) {
        log::info!("Upload complete at {:?}: {}", index, response.body);
    }

    fn on_alert(&self, alert: &Alert) {
        log::error!("{}: {}", alert.title, alert.message);
    }
}

/// Result of a pick or attach
pub enum SelectOutcome {
    /// Assets were added and their upload is running
    Started {
        batch: IntakeBatch,
        upload: JoinHandle<RunReport>,
    },
    Cancelled,
    /// The selection added nothing (all rejected, or the field is full)
    NothingAdded,
}

/// A media attachment field: owns the asset list and runs uploads for it.
///
/// Each field is independent; two forms each hold their own field.
pub struct MediaField {
    config: UploaderConfig,
    store: SharedAssetStore,
    tracker: ProgressTracker,
    intake: SelectionIntake,
    orchestrator: Arc<UploadOrchestrator>,
    picker: Arc<dyn MediaPicker>,
    callbacks: Arc<dyn MediaFieldCallbacks>,
}

impl MediaField {
    pub fn new(
        config: UploaderConfig,
        transport: Arc<dyn Transport>,
        picker: Arc<dyn MediaPicker>,
        callbacks: Arc<dyn MediaFieldCallbacks>,
    ) -> AppResult<Self> {
        validate_config(&config)?;

        let store: SharedAssetStore = Arc::new(Mutex::new(AssetListStore::new()));
        let tracker = ProgressTracker::new(Duration::from_millis(config.heartbeat_interval_ms));
        let orchestrator = UploadOrchestrator::new(&config, store.clone(), tracker.clone(), transport);

        Ok(Self {
            intake: SelectionIntake::new(config.mode, config.max_assets),
            config,
            store,
            tracker,
            orchestrator: Arc::new(orchestrator),
            picker,
            callbacks,
        })
    }

    pub fn with_transform(mut self, transform: Arc<dyn Transform>) -> Self {
        let orchestrator = (*self.orchestrator).clone().with_transform(transform);
        self.orchestrator = Arc::new(orchestrator);
        self
    }

    pub fn store(&self) -> SharedAssetStore {
        self.store.clone()
    }

    pub fn tracker(&self) -> ProgressTracker {
        self.tracker.clone()
    }

    pub fn assets(&self) -> Vec<AssetRef> {
        safe_store_read(&self.store, "assets", |store| store.assets().to_vec()).unwrap_or_default()
    }

    pub fn pick_options(&self) -> PickOptions {
        let existing = safe_store_read(&self.store, "pick options", |store| store.len()).unwrap_or(0);
        PickOptions {
            multiple: self.config.mode == UploadMode::Multiple,
            selection_limit: self.intake.remaining_capacity(existing),
            aspect_lock: self.config.aspect_lock,
            quality: f32::from(self.config.quality) / 100.0,
        }
    }

    /// Ask for permission, open the picker and attach what comes back
    pub async fn pick(&self) -> AppResult<SelectOutcome> {
        if self.picker.request_permission().await == PermissionStatus::Denied {
            log::warn!("Media library permission denied");
            self.callbacks.on_alert(&Alert::permission_denied());
            return Err(AppError::PermissionDenied);
        }

        let options = self.pick_options();
        if options.selection_limit == 0 {
            log::info!("Field already holds {} assets", self.config.max_assets);
            return Ok(SelectOutcome::NothingAdded);
        }

        match self.picker.pick_images(&options).await {
            PickResult::Cancelled => {
                log::debug!("Picker cancelled");
                Ok(SelectOutcome::Cancelled)
            }
            PickResult::Selected(uris) => self.attach(&uris),
        }
    }

    /// Optimistically add `uris` and start uploading them in the background.
    /// The selection callbacks fire before any request is made; completion
    /// and removal callbacks fire as each upload unit settles.
    pub fn attach(&self, uris: &[String]) -> AppResult<SelectOutcome> {
        let Some(batch) = self.intake.intake_into(&self.store, uris)? else {
            return Ok(SelectOutcome::NothingAdded);
        };

        self.callbacks.on_selected(&batch.selection);
        if self.config.mode == UploadMode::Multiple {
            self.callbacks.on_added(&batch.local_uris());
        }

        let callbacks = self.callbacks.clone();
        let store = self.store.clone();
        let mode = self.config.mode;
        let sink: EventSink = Arc::new(move |event: &RunEvent| {
            notify_owner(callbacks.as_ref(), &store, mode, event);
        });

        let orchestrator = self.orchestrator.clone();
        let assets = batch.assets.clone();
        let start_index = batch.start_index;
        let upload = tokio::spawn(async move {
            orchestrator
                .run_with_events(assets, start_index, sink)
                .await
        });

        Ok(SelectOutcome::Started { batch, upload })
    }

    /// User-initiated removal of a settled asset. Assets still uploading
    /// cannot be removed; their unit owns them until it settles.
    pub fn remove(&self, index: usize) -> AppResult<AssetRef> {
        let (removed, survivors) = safe_store_update(&self.store, "remove", |store| {
            if store.is_detached() {
                return Err(AppError::detached("remove"));
            }
            match store.assets().get(index) {
                Some(asset) if asset.is_in_flight() => Err(AppError::already_claimed(&asset.id)),
                Some(_) => {
                    let removed = store.remove_range(index, 1);
                    Ok((removed, store.assets().to_vec()))
                }
                None => Err(AppError::validation("index", "No asset at that position")),
            }
        })
        .unwrap_or_else(|| Err(AppError::Internal("asset store lock poisoned".to_string())))?;

        match self.config.mode {
            UploadMode::Multiple => self.callbacks.on_removed(Some(index), Some(&survivors)),
            UploadMode::Single => self.callbacks.on_removed(None, None),
        }

        removed
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Internal("removal produced no asset".to_string()))
    }

    /// Close the field: late upload results are dropped and every heartbeat stops
    pub fn teardown(&self) {
        safe_store_update(&self.store, "teardown", |store| store.detach());
        self.tracker.clear_all();
        log::info!("Media field torn down");
    }
}

impl Drop for MediaField {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Turn one settled unit into owner callbacks
fn notify_owner(
    callbacks: &dyn MediaFieldCallbacks,
    store: &SharedAssetStore,
    mode: UploadMode,
    event: &RunEvent,
) {
    let detached = safe_store_read(store, "notify", |store| store.is_detached()).unwrap_or(true);
    if detached {
        log::debug!("Field closed; dropping upload event");
        return;
    }

    match event {
        RunEvent::Completed(completion) => {
            callbacks.on_upload_complete(&completion.response, completion.index);
        }
        RunEvent::RolledBack(rollback) if rollback.applied => {
            match mode {
                UploadMode::Multiple => {
                    callbacks.on_removed(rollback.start_index, Some(&rollback.survivors))
                }
                UploadMode::Single => callbacks.on_removed(None, None),
            }
            callbacks.on_alert(&rollback.alert);
        }
        RunEvent::RolledBack(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::http_client::{ProgressCallback, UploadRequest};
    use async_trait::async_trait;

    struct DeniedPicker;

    #[async_trait]
    impl MediaPicker for DeniedPicker {
        async fn request_permission(&self) -> PermissionStatus {
            PermissionStatus::Denied
        }

        async fn pick_images(&self, _options: &PickOptions) -> PickResult {
            PickResult::Cancelled
        }
    }

    struct OkTransport;

    #[async_trait]
    impl Transport for OkTransport {
        async fn post_multipart(
            &self,
            _request: UploadRequest,
            _on_progress: ProgressCallback,
        ) -> AppResult<String> {
            Ok(r#"{"url": "https://cdn/x.png"}"#.to_string())
        }
    }

    #[derive(Default)]
    struct Alerts(Mutex<Vec<Alert>>);

    impl MediaFieldCallbacks for Alerts {
        fn on_alert(&self, alert: &Alert) {
            self.0.lock().unwrap().push(alert.clone());
        }
    }

    #[tokio::test]
    async fn test_permission_denied_alerts_without_mutation() {
        let alerts = Arc::new(Alerts::default());
        let field = MediaField::new(
            UploaderConfig::default(),
            Arc::new(OkTransport),
            Arc::new(DeniedPicker),
            alerts.clone(),
        )
        .unwrap();

        let result = field.pick().await;
        assert!(matches!(result, Err(AppError::PermissionDenied)));
        assert_eq!(alerts.0.lock().unwrap().len(), 1);
        assert!(field.assets().is_empty());
    }

    #[test]
    fn test_pick_options_reflect_remaining_capacity() {
        let field = MediaField::new(
            UploaderConfig {
                max_assets: 4,
                aspect_lock: Some((4, 3)),
                ..UploaderConfig::default()
            },
            Arc::new(OkTransport),
            Arc::new(DeniedPicker),
            Arc::new(NoopCallbacks),
        )
        .unwrap();

        let options = field.pick_options();
        assert!(options.multiple);
        assert_eq!(options.selection_limit, 4);
        assert_eq!(options.aspect_lock, Some((4, 3)));
        assert!((options.quality - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = MediaField::new(
            UploaderConfig {
                endpoint: "nope".to_string(),
                ..UploaderConfig::default()
            },
            Arc::new(OkTransport),
            Arc::new(DeniedPicker),
            Arc::new(NoopCallbacks),
        );
        assert!(result.is_err());
    }
}
