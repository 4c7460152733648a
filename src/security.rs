use regex::Regex;
use std::path::Path;

use crate::errors::{AppError, AppResult};

const SUPPORTED_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "webp", "gif", "heic", "bmp"];

pub struct InputValidator;

impl InputValidator {
    pub fn validate_endpoint_url(url: &str) -> AppResult<()> {
        let trimmed = url.trim();

        if trimmed.is_empty() {
            return Err(AppError::validation("endpoint", "Upload endpoint cannot be empty"));
        }

        if trimmed.len() > 2048 {
            return Err(AppError::validation("endpoint", "Upload endpoint too long"));
        }

        let endpoint_pattern = Regex::new(r"^https?://[^\s/?#]+(/[^\s?#]*)?$")
            .map_err(|e| AppError::Internal(e.to_string()))?;

        if !endpoint_pattern.is_match(trimmed) {
            return Err(AppError::invalid_endpoint(trimmed));
        }

        Ok(())
    }

    /// Strip a `file://` scheme so picker output and plain paths look the same
    pub fn normalize_local_uri(uri: &str) -> String {
        let trimmed = uri.trim();
        trimmed
            .strip_prefix("file://")
            .unwrap_or(trimmed)
            .to_string()
    }

    /// Check a picker URI without touching the filesystem
    pub fn validate_local_uri(uri: &str) -> AppResult<()> {
        let path = Self::normalize_local_uri(uri);

        if path.is_empty() {
            return Err(AppError::validation("local_uri", "Asset path cannot be empty"));
        }

        if path.split(['/', '\\']).any(|segment| segment == "..") {
            return Err(AppError::validation("local_uri", "Invalid asset path detected"));
        }

        match Path::new(&path).extension() {
            Some(extension) => {
                let ext = extension.to_string_lossy().to_lowercase();
                if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
                    return Err(AppError::invalid_file_type(&path));
                }
            }
            None => {
                return Err(AppError::validation("local_uri", "Asset must have an extension"));
            }
        }

        Ok(())
    }

    /// Like `validate_local_uri`, but also requires the file to exist
    pub fn validate_local_file(uri: &str) -> AppResult<()> {
        Self::validate_local_uri(uri)?;

        let path = Self::normalize_local_uri(uri);
        let path_obj = Path::new(&path);
        if !path_obj.exists() {
            return Err(AppError::file_not_found(&path));
        }
        if !path_obj.is_file() {
            return Err(AppError::validation("local_uri", "Path is not a file"));
        }

        Ok(())
    }

    pub fn sanitize_filename(filename: &str) -> String {
        let sanitized = match Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#) {
            Ok(unsafe_chars) => unsafe_chars.replace_all(filename.trim(), "_").to_string(),
            Err(_) => filename.trim().to_string(),
        };

        if sanitized.chars().count() > 255 {
            let truncated: String = sanitized.chars().take(252).collect();
            format!("{}...", truncated)
        } else {
            sanitized
        }
    }

    pub fn validate_upload_settings(max_assets: usize, multiple: bool) -> AppResult<()> {
        if max_assets == 0 || max_assets > 50 {
            return Err(AppError::validation("max_assets", "Must be between 1 and 50"));
        }

        if !multiple && max_assets != 1 {
            return Err(AppError::validation(
                "max_assets",
                "Single mode holds exactly one asset",
            ));
        }

        Ok(())
    }
}

/// MIME type for a multipart part, derived from the file extension
pub fn mime_type_for(path: &str) -> &'static str {
    match Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("heic") => "image/heic",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_endpoint_url() {
        assert!(InputValidator::validate_endpoint_url("https://api.example.com/upload").is_ok());
        assert!(InputValidator::validate_endpoint_url("http://localhost:8080/upload").is_ok());
        assert!(InputValidator::validate_endpoint_url("ftp://example.com/upload").is_err());
        assert!(InputValidator::validate_endpoint_url("https://exa mple.com").is_err());
        assert!(InputValidator::validate_endpoint_url("").is_err());
    }

    #[test]
    fn test_validate_local_uri() {
        assert!(InputValidator::validate_local_uri("file:///data/photo.JPG").is_ok());
        assert!(InputValidator::validate_local_uri("/data/photo.png").is_ok());
        assert!(InputValidator::validate_local_uri("/data/../etc/passwd.png").is_err());
        assert!(InputValidator::validate_local_uri("/data/notes.txt").is_err());
        assert!(InputValidator::validate_local_uri("/data/noext").is_err());
        assert!(InputValidator::validate_local_uri("   ").is_err());
    }

    #[test]
    fn test_validate_local_file_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.png");
        std::fs::write(&path, b"png").unwrap();

        assert!(InputValidator::validate_local_file(&path.to_string_lossy()).is_ok());

        let missing = dir.path().join("missing.png");
        let err = InputValidator::validate_local_file(&missing.to_string_lossy()).unwrap_err();
        assert!(matches!(err, AppError::FileNotFound { .. }));
    }

    #[test]
    fn test_sanitize_filename() {
        let safe = InputValidator::sanitize_filename("my<photo>:1.png");
        assert_eq!(safe, "my_photo__1.png");
    }

    #[test]
    fn test_validate_upload_settings() {
        assert!(InputValidator::validate_upload_settings(6, true).is_ok());
        assert!(InputValidator::validate_upload_settings(1, false).is_ok());
        assert!(InputValidator::validate_upload_settings(0, true).is_err());
        assert!(InputValidator::validate_upload_settings(3, false).is_err());
    }

    #[test]
    fn test_mime_type_for() {
        assert_eq!(mime_type_for("/a/b.JPEG"), "image/jpeg");
        assert_eq!(mime_type_for("/a/b.webp"), "image/webp");
        assert_eq!(mime_type_for("/a/b"), "application/octet-stream");
    }
}
