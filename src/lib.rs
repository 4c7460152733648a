//! Optimistic media attachment for content forms.
//!
//! A [`media_field::MediaField`] takes a selection from a picker, shows it
//! immediately, uploads it (one batch request or one request per asset),
//! reports blended simulated/real progress per upload unit, and removes the
//! assets of any unit that fails.

pub mod config;
pub mod errors;
pub mod media_field;
pub mod picker;
pub mod security;
pub mod token;
pub mod uploader;

pub use config::{UploadMode, UploaderConfig};
pub use errors::{AppError, AppResult, SharedAssetStore};
pub use media_field::{MediaField, MediaFieldCallbacks, SelectOutcome};
