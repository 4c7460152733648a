use std::sync::Arc;
use uuid::Uuid;

use crate::config::{UploadMode, UploaderConfig};
use crate::errors::{safe_store_read, safe_store_update, AppError, AppResult, SharedAssetStore};

use super::asset_store::AssetRef;
use super::http_client::{FilePart, ProgressCallback, Transport, UploadRequest, UploadResponse};
use super::progress_tracker::{ProgressTracker, UnitId};
use super::recovery::{FailureRecovery, RollbackReport, RollbackScope};
use super::transform::{NoTransform, PreparedAsset, Transform, TransformOptions};

/// Multipart field used for every file of a batch request
const BATCH_FIELD_NAME: &str = "files";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    /// One request to `<endpoint>/multiple` carrying every asset
    Batch,
    /// One request per asset, in selection order
    Sequential,
}

/// Batch only when there is more than one asset and the endpoint takes
/// multiple files. Nothing is negotiated at runtime.
pub fn choose_strategy(asset_count: usize, supports_multiple: bool) -> UploadStrategy {
    if asset_count > 1 && supports_multiple {
        UploadStrategy::Batch
    } else {
        UploadStrategy::Sequential
    }
}

/// A unit that settled successfully
#[derive(Debug, Clone)]
pub struct UnitCompletion {
    pub unit_id: UnitId,
    pub asset_ids: Vec<String>,
    pub response: UploadResponse,
    /// Index handed to the owner's completion callback; `None` in single mode
    pub index: Option<usize>,
    /// Progress reported at confirmation time
    pub final_progress: f64,
}

#[derive(Debug, Clone)]
pub enum RunEvent {
    Completed(UnitCompletion),
    RolledBack(RollbackReport),
}

/// Receives each event the moment its unit settles, before the run goes on
pub type EventSink = Arc<dyn Fn(&RunEvent) + Send + Sync>;

/// Everything that happened during one orchestrator run, in order
#[derive(Debug, Clone)]
pub struct RunReport {
    pub strategy: UploadStrategy,
    pub start_index: usize,
    pub events: Vec<RunEvent>,
    /// Set when the run could not start or stopped because the store went away
    pub aborted: Option<String>,
}

impl RunReport {
    fn new(strategy: UploadStrategy, start_index: usize) -> Self {
        Self {
            strategy,
            start_index,
            events: Vec::new(),
            aborted: None,
        }
    }

    fn record(&mut self, event: RunEvent, sink: &EventSink) {
        sink(&event);
        self.events.push(event);
    }

    pub fn completions(&self) -> impl Iterator<Item = &UnitCompletion> {
        self.events.iter().filter_map(|event| match event {
            RunEvent::Completed(completion) => Some(completion),
            RunEvent::RolledBack(_) => None,
        })
    }

    pub fn rollbacks(&self) -> impl Iterator<Item = &RollbackReport> {
        self.events.iter().filter_map(|event| match event {
            RunEvent::RolledBack(report) => Some(report),
            RunEvent::Completed(_) => None,
        })
    }

    pub fn is_success(&self) -> bool {
        self.aborted.is_none() && self.rollbacks().next().is_none()
    }
}

/// Drives the uploads of one form: picks a strategy, claims assets, keeps
/// progress moving and either confirms or rolls back every unit.
#[derive(Clone)]
pub struct UploadOrchestrator {
    endpoint: String,
    batch_endpoint: String,
    field_name: String,
    mode: UploadMode,
    supports_multiple: bool,
    rollback_scope: RollbackScope,
    transform_options: TransformOptions,
    transport: Arc<dyn Transport>,
    transform: Arc<dyn Transform>,
    store: SharedAssetStore,
    tracker: ProgressTracker,
    recovery: FailureRecovery,
}

impl UploadOrchestrator {
    pub fn new(
        config: &UploaderConfig,
        store: SharedAssetStore,
        tracker: ProgressTracker,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            endpoint: config.endpoint.trim().to_string(),
            batch_endpoint: config.batch_endpoint(),
            field_name: config.field_name.clone(),
            mode: config.mode,
            supports_multiple: config.supports_multiple,
            rollback_scope: config.rollback_scope,
            transform_options: TransformOptions {
                quality: config.quality,
                max_size_hint_bytes: config.max_size_hint_mb * 1024 * 1024,
            },
            transport,
            transform: Arc::new(NoTransform),
            store,
            tracker,
            recovery: FailureRecovery::new(config.mode),
        }
    }

    pub fn with_transform(mut self, transform: Arc<dyn Transform>) -> Self {
        self.transform = transform;
        self
    }

    pub fn strategy_for(&self, asset_count: usize) -> UploadStrategy {
        choose_strategy(asset_count, self.supports_multiple)
    }

    /// Upload one intake batch that starts at `start_index` in the store.
    ///
    /// Never returns an error: failures end up as rollbacks in the report.
    pub async fn run(&self, assets: Vec<AssetRef>, start_index: usize) -> RunReport {
        self.run_with_events(assets, start_index, Arc::new(|_: &RunEvent| {}))
            .await
    }

    /// Same as [`run`](Self::run), handing every event to `sink` as soon as
    /// it happens.
    pub async fn run_with_events(
        &self,
        assets: Vec<AssetRef>,
        start_index: usize,
        sink: EventSink,
    ) -> RunReport {
        let strategy = self.strategy_for(assets.len());
        let mut report = RunReport::new(strategy, start_index);

        if assets.is_empty() {
            return report;
        }

        log::info!(
            "Uploading {} asset(s) from index {} ({:?}, transform: {})",
            assets.len(),
            start_index,
            strategy,
            self.transform.name()
        );

        match strategy {
            UploadStrategy::Batch => {
                self.run_batch(&assets, start_index, &mut report, &sink).await
            }
            UploadStrategy::Sequential => {
                self.run_sequential(&assets, start_index, &mut report, &sink)
                    .await
            }
        }

        log::info!(
            "Upload run from index {} finished: {} completed, {} rolled back",
            start_index,
            report.completions().count(),
            report.rollbacks().count()
        );
        report
    }

    async fn run_batch(
        &self,
        assets: &[AssetRef],
        start_index: usize,
        report: &mut RunReport,
        sink: &EventSink,
    ) {
        let ids: Vec<String> = assets.iter().map(|a| a.id.clone()).collect();

        if let Err(e) = self.claim(&ids) {
            log::error!("Cannot start batch upload at index {}: {}", start_index, e);
            report.aborted = Some(e.to_string());
            return;
        }

        let unit_id = Uuid::new_v4();
        let result = self
            .settle_unit(unit_id, assets, &self.batch_endpoint, BATCH_FIELD_NAME)
            .await;

        if self.is_detached() {
            report.aborted = Some("store torn down during batch upload".to_string());
            return;
        }

        match result {
            Ok(response) => {
                let current_index = ids
                    .first()
                    .and_then(|id| self.current_index(id))
                    .unwrap_or(start_index);
                let final_progress = self.confirm_unit(unit_id, &ids, &response);
                let completion = UnitCompletion {
                    unit_id,
                    asset_ids: ids,
                    response,
                    index: self.callback_index(current_index),
                    final_progress,
                };
                report.record(RunEvent::Completed(completion), sink);
            }
            Err(e) => {
                let rollback = self.recovery.rollback(&self.store, assets, &e);
                report.record(RunEvent::RolledBack(rollback), sink);
            }
        }
    }

    async fn run_sequential(
        &self,
        assets: &[AssetRef],
        start_index: usize,
        report: &mut RunReport,
        sink: &EventSink,
    ) {
        for (offset, asset) in assets.iter().enumerate() {
            if self.is_detached() {
                report.aborted = Some("store torn down during sequential upload".to_string());
                return;
            }

            let ids = vec![asset.id.clone()];
            if let Err(e) = self.claim(&ids) {
                log::error!("Skipping asset {} at offset {}: {}", asset.id, offset, e);
                report.aborted = Some(e.to_string());
                return;
            }

            let unit_id = Uuid::new_v4();
            let result = self
                .settle_unit(unit_id, std::slice::from_ref(asset), &self.endpoint, &self.field_name)
                .await;

            if self.is_detached() {
                report.aborted = Some("store torn down during sequential upload".to_string());
                return;
            }

            let current_index = self
                .current_index(&asset.id)
                .unwrap_or(start_index + offset);

            match result {
                Ok(response) => {
                    let final_progress = self.confirm_unit(unit_id, &ids, &response);
                    let completion = UnitCompletion {
                        unit_id,
                        asset_ids: ids,
                        response,
                        index: self.callback_index(current_index),
                        final_progress,
                    };
                    report.record(RunEvent::Completed(completion), sink);
                }
                Err(e) => {
                    let affected = self.rollback_scope.affected(assets, asset);
                    log::warn!(
                        "Asset {} of batch at index {} failed; rolling back {} asset(s)",
                        offset + 1,
                        start_index,
                        affected.len()
                    );
                    let rollback = self.recovery.rollback(&self.store, affected, &e);
                    report.record(RunEvent::RolledBack(rollback), sink);

                    if self.rollback_scope == RollbackScope::WholeBatch {
                        return;
                    }
                }
            }
        }
    }

    /// Send one unit with its heartbeat running. The heartbeat is cleared on
    /// every exit path before the result is looked at.
    async fn settle_unit(
        &self,
        unit_id: UnitId,
        assets: &[AssetRef],
        url: &str,
        field_name: &str,
    ) -> AppResult<UploadResponse> {
        self.tracker.register(unit_id);
        let mut heartbeat = self.tracker.start_heartbeat(unit_id);

        let result = self.dispatch(unit_id, assets, url, field_name).await;
        heartbeat.clear();

        match result {
            Ok(raw) => Ok(UploadResponse::parse(&raw)),
            Err(e) => {
                self.tracker.discard(unit_id);
                Err(e)
            }
        }
    }

    async fn dispatch(
        &self,
        unit_id: UnitId,
        assets: &[AssetRef],
        url: &str,
        field_name: &str,
    ) -> AppResult<String> {
        let mut parts = Vec::with_capacity(assets.len());
        for asset in assets {
            let prepared = PreparedAsset::load(asset).await?;
            let prepared = self.transform.apply(prepared, &self.transform_options)?;
            parts.push(FilePart {
                field_name: field_name.to_string(),
                file_name: prepared.file_name,
                mime_type: prepared.mime_type,
                data: prepared.data,
            });
        }

        let tracker = self.tracker.clone();
        let on_progress: ProgressCallback = Arc::new(move |written, expected| {
            tracker.observe(unit_id, written, expected);
        });

        self.transport
            .post_multipart(
                UploadRequest {
                    url: url.to_string(),
                    parts,
                },
                on_progress,
            )
            .await
    }

    /// Force 100%, mark every asset uploaded, then drop the unit's progress
    fn confirm_unit(&self, unit_id: UnitId, ids: &[String], response: &UploadResponse) -> f64 {
        self.tracker.complete(unit_id);
        let final_progress = self.tracker.reported(unit_id).unwrap_or(1.0);

        safe_store_update(&self.store, "confirm", |store| {
            for (index, id) in ids.iter().enumerate() {
                let remote_url = response.remote_url_for(index).unwrap_or_else(|| {
                    log::warn!("Upload response carries no URL for asset {}, keeping body", id);
                    response.body.to_string()
                });
                store.confirm(id, remote_url);
            }
        });

        self.tracker.discard(unit_id);
        final_progress
    }

    fn claim(&self, ids: &[String]) -> AppResult<()> {
        safe_store_update(&self.store, "claim", |store| store.claim(ids))
            .unwrap_or_else(|| Err(AppError::Internal("asset store lock poisoned".to_string())))
    }

    fn current_index(&self, id: &str) -> Option<usize> {
        safe_store_read(&self.store, "index lookup", |store| store.index_of(id)).flatten()
    }

    fn is_detached(&self) -> bool {
        safe_store_read(&self.store, "detached check", |store| store.is_detached()).unwrap_or(true)
    }

    fn callback_index(&self, index: usize) -> Option<usize> {
        match self.mode {
            UploadMode::Single => None,
            UploadMode::Multiple => Some(index),
        }
    }
}
