use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{AppError, AppResult};
use crate::security::InputValidator;
use crate::uploader::recovery::RollbackScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    Single,
    Multiple,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderConfig {
    pub endpoint: String,
    pub extra_headers: HashMap<String, String>,
    pub field_name: String,
    pub quality: u8,
    pub max_size_hint_mb: u64, // advisory only
    pub mode: UploadMode,
    pub max_assets: usize,
    pub supports_multiple: bool,
    pub aspect_lock: Option<(u32, u32)>,
    pub heartbeat_interval_ms: u64,
    pub request_timeout_secs: u64,
    pub max_retry_attempts: u32,
    pub rollback_scope: RollbackScope,
    pub token_key: String,
    pub log_level: String,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3000/api/upload".to_string(),
            extra_headers: HashMap::new(),
            field_name: "file".to_string(),
            quality: 80,
            max_size_hint_mb: 5,
            mode: UploadMode::Multiple,
            max_assets: 6,
            supports_multiple: true,
            aspect_lock: None,
            heartbeat_interval_ms: 150,
            request_timeout_secs: 120,
            max_retry_attempts: 0,
            rollback_scope: RollbackScope::WholeBatch,
            token_key: "auth_token".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl UploaderConfig {
    pub fn is_multiple(&self) -> bool {
        self.mode == UploadMode::Multiple
    }

    /// Capacity of the field; single mode always holds one slot
    pub fn capacity(&self) -> usize {
        if self.is_multiple() {
            self.max_assets
        } else {
            1
        }
    }

    pub fn batch_endpoint(&self) -> String {
        format!("{}/multiple", self.endpoint.trim().trim_end_matches('/'))
    }
}

fn get_config_path() -> AppResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| AppError::Config("Could not find config directory".to_string()))?
        .join("media-upload-pipeline");

    fs::create_dir_all(&config_dir)?;
    Ok(config_dir.join("config.json"))
}

pub fn load_config() -> AppResult<UploaderConfig> {
    let config_path = get_config_path()?;

    if config_path.exists() {
        load_config_from(&config_path)
    } else {
        let default_config = UploaderConfig::default();
        save_config_to(&default_config, &config_path)?;
        Ok(default_config)
    }
}

pub fn load_config_from(path: &Path) -> AppResult<UploaderConfig> {
    let config_str = fs::read_to_string(path)?;
    let config: UploaderConfig = serde_json::from_str(&config_str).unwrap_or_else(|e| {
        log::warn!("Failed to parse config file {}: {}. Using defaults.", path.display(), e);
        UploaderConfig::default()
    });

    validate_config(&config)?;
    Ok(config)
}

pub fn save_config(config: &UploaderConfig) -> AppResult<()> {
    validate_config(config)?;
    save_config_to(config, &get_config_path()?)
}

pub fn save_config_to(config: &UploaderConfig, path: &Path) -> AppResult<()> {
    if path.exists() {
        let backup_path = path.with_extension("json.bak");
        if let Err(e) = fs::copy(path, &backup_path) {
            log::warn!("Failed to create config backup: {}", e);
        }
    }

    let config_str = serde_json::to_string_pretty(config)?;
    fs::write(path, config_str)?;

    log::info!("Configuration saved to {}", path.display());
    Ok(())
}

pub fn validate_config(config: &UploaderConfig) -> AppResult<()> {
    InputValidator::validate_endpoint_url(&config.endpoint)?;
    InputValidator::validate_upload_settings(config.capacity(), config.is_multiple())?;

    if config.field_name.trim().is_empty() {
        return Err(AppError::validation("field_name", "Must not be empty"));
    }

    if config.quality == 0 || config.quality > 100 {
        return Err(AppError::validation("quality", "Must be between 1 and 100"));
    }

    if config.heartbeat_interval_ms < 10 {
        return Err(AppError::validation("heartbeat_interval_ms", "Must be at least 10ms"));
    }

    if config.request_timeout_secs == 0 {
        return Err(AppError::validation("request_timeout_secs", "Must be greater than 0"));
    }

    if config.max_retry_attempts > 10 {
        return Err(AppError::validation("max_retry_attempts", "Must be 10 or fewer"));
    }

    if let Some((w, h)) = config.aspect_lock {
        if w == 0 || h == 0 {
            return Err(AppError::validation("aspect_lock", "Ratio terms must be positive"));
        }
    }

    let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
    if !valid_log_levels.contains(&config.log_level.as_str()) {
        return Err(AppError::validation("log_level", "Must be a valid log level"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = UploaderConfig::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.field_name, "file");
        assert_eq!(config.heartbeat_interval_ms, 150);
        assert_eq!(config.rollback_scope, RollbackScope::WholeBatch);
    }

    #[test]
    fn test_batch_endpoint_trims_trailing_slash() {
        let config = UploaderConfig {
            endpoint: "https://api.example.com/upload/".to_string(),
            ..UploaderConfig::default()
        };
        assert_eq!(config.batch_endpoint(), "https://api.example.com/upload/multiple");
    }

    #[test]
    fn test_single_mode_capacity_is_one() {
        let config = UploaderConfig {
            mode: UploadMode::Single,
            max_assets: 6,
            ..UploaderConfig::default()
        };
        assert_eq!(config.capacity(), 1);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_quality = UploaderConfig {
            quality: 0,
            ..UploaderConfig::default()
        };
        assert!(validate_config(&bad_quality).is_err());

        let bad_endpoint = UploaderConfig {
            endpoint: "not a url".to_string(),
            ..UploaderConfig::default()
        };
        assert!(validate_config(&bad_endpoint).is_err());

        let bad_level = UploaderConfig {
            log_level: "loud".to_string(),
            ..UploaderConfig::default()
        };
        assert!(validate_config(&bad_level).is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = UploaderConfig {
            endpoint: "https://media.example.com/v1/upload".to_string(),
            supports_multiple: false,
            ..UploaderConfig::default()
        };
        save_config_to(&config, &path).unwrap();
        save_config_to(&config, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.endpoint, config.endpoint);
        assert!(!loaded.supports_multiple);
        assert!(path.with_extension("json.bak").exists());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"endpoint": "https://x.example.com/up", "mode": "single"}"#).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.mode, UploadMode::Single);
        assert_eq!(loaded.field_name, "file");
    }
}
