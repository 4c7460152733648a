use async_trait::async_trait;

use crate::security::InputValidator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PickOptions {
    pub multiple: bool,
    /// Remaining capacity of the field
    pub selection_limit: usize,
    pub aspect_lock: Option<(u32, u32)>,
    /// 0.0..=1.0
    pub quality: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PickResult {
    Selected(Vec<String>),
    Cancelled,
}

/// Boundary to whatever lets the user choose media (OS picker, file dialog, CLI args)
#[async_trait]
pub trait MediaPicker: Send + Sync {
    async fn request_permission(&self) -> PermissionStatus;

    async fn pick_images(&self, options: &PickOptions) -> PickResult;
}

/// Picker over a fixed list of paths, e.g. from the command line.
/// Paths that do not exist or are not images are skipped.
#[derive(Debug, Clone, Default)]
pub struct PathListPicker {
    paths: Vec<String>,
}

impl PathListPicker {
    pub fn new(paths: Vec<String>) -> Self {
        Self { paths }
    }
}

#[async_trait]
impl MediaPicker for PathListPicker {
    async fn request_permission(&self) -> PermissionStatus {
        PermissionStatus::Granted
    }

    async fn pick_images(&self, options: &PickOptions) -> PickResult {
        let limit = if options.multiple {
            options.selection_limit
        } else {
            options.selection_limit.min(1)
        };

        let picked: Vec<String> = self
            .paths
            .iter()
            .filter(|path| match InputValidator::validate_local_file(path) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("Ignoring {}: {}", path, e);
                    false
                }
            })
            .take(limit)
            .cloned()
            .collect();

        if picked.is_empty() {
            PickResult::Cancelled
        } else {
            PickResult::Selected(picked)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(multiple: bool, selection_limit: usize) -> PickOptions {
        PickOptions {
            multiple,
            selection_limit,
            aspect_lock: None,
            quality: 0.8,
        }
    }

    #[tokio::test]
    async fn test_path_list_picker_filters_and_limits() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for name in ["a.png", "b.jpg", "c.webp"] {
            let path = dir.path().join(name);
            std::fs::write(&path, b"img").unwrap();
            paths.push(path.to_string_lossy().to_string());
        }
        paths.insert(1, dir.path().join("missing.png").to_string_lossy().to_string());

        let picker = PathListPicker::new(paths.clone());
        assert_eq!(picker.request_permission().await, PermissionStatus::Granted);

        match picker.pick_images(&options(true, 2)).await {
            PickResult::Selected(picked) => {
                assert_eq!(picked, vec![paths[0].clone(), paths[2].clone()]);
            }
            PickResult::Cancelled => panic!("expected a selection"),
        }

        match picker.pick_images(&options(false, 6)).await {
            PickResult::Selected(picked) => assert_eq!(picked.len(), 1),
            PickResult::Cancelled => panic!("expected a selection"),
        }
    }

    #[tokio::test]
    async fn test_empty_pick_is_cancelled() {
        let picker = PathListPicker::default();
        assert_eq!(picker.pick_images(&options(true, 6)).await, PickResult::Cancelled);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        std::fs::write(&path, b"img").unwrap();
        let picker = PathListPicker::new(vec![path.to_string_lossy().to_string()]);
        assert_eq!(picker.pick_images(&options(true, 0)).await, PickResult::Cancelled);
    }
}
