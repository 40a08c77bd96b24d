use std::path::{Path, PathBuf};

use crate::capture::domain::capture_sink::{CaptureEvent, CaptureSink, SinkError};
use crate::identity::domain::identity::StableId;
use crate::shared::constants::CROP_EXTENSION;

const CUSTOMER_DIR_PREFIX: &str = "customer_";

/// Writes each granted capture as a JPEG under
/// `<root>/customer_<id>/visit_<id>_<YYYYmmdd_HHMMSS_mmm>.jpg`.
///
/// The capture reference is the path of the crop produced upstream; it is
/// decoded and re-encoded with the `image` crate, optionally resized.
pub struct DirectoryCaptureSink {
    root: PathBuf,
    size: Option<(u32, u32)>,
}

impl DirectoryCaptureSink {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            size: None,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.size = Some((width, height));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn identity_dir(&self, stable_id: StableId) -> PathBuf {
        self.root.join(format!("{CUSTOMER_DIR_PREFIX}{stable_id}"))
    }

    /// Path the capture for `event` is written to.
    pub fn artifact_path(&self, event: &CaptureEvent<PathBuf>) -> PathBuf {
        let stamp = event.timestamp.format("%Y%m%d_%H%M%S_%3f");
        self.identity_dir(event.stable_id).join(format!(
            "visit_{}_{stamp}.{CROP_EXTENSION}",
            event.stable_id
        ))
    }

    /// First saved crop of `stable_id` in file-name order, if any.
    pub fn first_capture(&self, stable_id: StableId) -> Option<PathBuf> {
        let entries = std::fs::read_dir(self.identity_dir(stable_id)).ok()?;
        let mut crops: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(CROP_EXTENSION))
            })
            .collect();
        crops.sort();
        crops.into_iter().next()
    }
}

impl CaptureSink<PathBuf> for DirectoryCaptureSink {
    fn capture(&self, event: &CaptureEvent<PathBuf>) -> Result<(), SinkError> {
        let path = self.artifact_path(event);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let img = image::open(&event.capture_ref)
            .map_err(|e| format!("cannot read crop {}: {e}", event.capture_ref.display()))?
            .to_rgb8();
        let img = match self.size {
            Some((w, h)) => image::imageops::resize(&img, w, h, image::imageops::FilterType::Triangle),
            None => img,
        };
        img.save(&path)?;

        log::debug!("Saved capture for identity {} to {}", event.stable_id, path.display());
        Ok(())
    }

    fn discard(&self, event: &CaptureEvent<PathBuf>) -> Result<(), SinkError> {
        match std::fs::remove_file(self.artifact_path(event)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn clear(&self) -> Result<(), SinkError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let is_customer_dir = entry.file_type()?.is_dir()
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.starts_with(CUSTOMER_DIR_PREFIX));
            if is_customer_dir {
                std::fs::remove_dir_all(entry.path())?;
            }
        }
        Ok(())
    }
}
