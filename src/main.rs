use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{interval, Duration};

use media_upload_pipeline::config::{self, UploadMode, UploaderConfig};
use media_upload_pipeline::media_field::{LoggingCallbacks, MediaField, SelectOutcome};
use media_upload_pipeline::picker::PathListPicker;
use media_upload_pipeline::token::EnvTokenProvider;
use media_upload_pipeline::uploader::UploadClient;

/// Upload local images to a media endpoint the way an attachment field does
#[derive(Debug, Parser)]
#[command(name = "media-upload", version)]
struct Args {
    /// Image files to attach
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Config file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the upload endpoint
    #[arg(long)]
    endpoint: Option<String>,

    /// Single-slot field (e.g. a profile image)
    #[arg(long)]
    single: bool,

    /// Endpoint has no `/multiple` route; upload one file per request
    #[arg(long)]
    sequential: bool,

    /// Prefix for the token environment variable (`<PREFIX>_AUTH_TOKEN`)
    #[arg(long)]
    token_env_prefix: Option<String>,
}

fn load_settings(args: &Args) -> anyhow::Result<UploaderConfig> {
    let mut settings = match &args.config {
        Some(path) => config::load_config_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => config::load_config().context("loading user config")?,
    };

    if let Some(endpoint) = &args.endpoint {
        settings.endpoint = endpoint.clone();
    }
    if args.single {
        settings.mode = UploadMode::Single;
    }
    if args.sequential {
        settings.supports_multiple = false;
    }

    config::validate_config(&settings).context("invalid configuration")?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings = load_settings(&args)?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&settings.log_level))
        .init();

    log::info!(
        "Starting media upload to {} ({:?} mode)",
        settings.endpoint,
        settings.mode
    );

    let tokens = match &args.token_env_prefix {
        Some(prefix) => EnvTokenProvider::with_prefix(prefix),
        None => EnvTokenProvider::new(),
    };
    let client = UploadClient::new(&settings, Arc::new(tokens))?;
    let picker = PathListPicker::new(
        args.files
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect(),
    );

    let field = MediaField::new(
        settings,
        Arc::new(client),
        Arc::new(picker),
        Arc::new(LoggingCallbacks),
    )?;

    let (batch, mut upload) = match field.pick().await? {
        SelectOutcome::Started { batch, upload } => (batch, upload),
        SelectOutcome::Cancelled | SelectOutcome::NothingAdded => {
            bail!("none of the given files could be attached")
        }
    };
    log::info!("Attached {} asset(s)", batch.assets.len());

    let tracker = field.tracker();
    let mut ticker = interval(Duration::from_millis(500));
    let report = loop {
        tokio::select! {
            joined = &mut upload => break joined.context("upload task failed")?,
            _ = ticker.tick() => {
                for (unit_id, state) in tracker.snapshot() {
                    log::info!("Unit {}: {:.0}%", unit_id, state.reported * 100.0);
                }
            }
        }
    };

    println!("{}", serde_json::to_string_pretty(&field.assets())?);

    if !report.is_success() {
        bail!("upload failed; the field was rolled back");
    }
    Ok(())
}
