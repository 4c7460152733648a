// Upload pipeline - intake, orchestration, progress and rollback
//
// The owner (see `media_field`) holds one store and one tracker and hands them
// to the orchestrator; nothing in here is global.

pub mod asset_store;
pub mod http_client;
pub mod intake;
pub mod progress_tracker;
pub mod recovery;
pub mod transform;
pub mod upload_queue;

pub use asset_store::{AssetListStore, AssetRef, AssetStatus};
pub use http_client::{Transport, UploadClient, UploadRequest, UploadResponse};
pub use intake::{IntakeBatch, Selection, SelectionIntake};
pub use progress_tracker::{ProgressState, ProgressTracker, UnitId};
pub use recovery::{Alert, FailureRecovery, RollbackReport, RollbackScope};
pub use transform::{NoTransform, Transform};
pub use upload_queue::{EventSink, RunEvent, RunReport, UploadOrchestrator, UploadStrategy};
