//! Per-session output directories.
//!
//! A [`PreviewDir`] owns the directory the transcoder writes into. It is
//! removed exactly once: explicitly through [`PreviewDir::remove`] on the
//! termination path, or on drop if a failure branch abandons it.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::transcode::SegmentLayout;

/// Name prefix shared by every session directory.
pub const PREVIEW_DIR_PREFIX: &str = "preview_";

/// Output directory of one preview session.
///
/// # Example
///
/// ```
/// use previewly_av::{PreviewDir, SegmentLayout};
///
/// let root = tempfile::tempdir().unwrap();
/// let dir = PreviewDir::create(root.path(), "preview_demo", SegmentLayout::default()).unwrap();
/// assert!(dir.path().is_dir());
/// assert_eq!(dir.count_segments().unwrap(), 0);
/// dir.remove().unwrap();
/// assert!(!root.path().join("preview_demo").exists());
/// ```
#[derive(Debug)]
pub struct PreviewDir {
    path: PathBuf,
    layout: SegmentLayout,
    removed: AtomicBool,
}

impl PreviewDir {
    /// Create `<root>/<name>`, creating `root` if needed.
    pub fn create(root: &Path, name: &str, layout: SegmentLayout) -> previewly_common::Result<Self> {
        let path = root.join(name);
        std::fs::create_dir_all(&path).map_err(|e| {
            previewly_common::Error::Internal(format!(
                "failed to create output dir {}: {e}",
                path.display()
            ))
        })?;

        Ok(Self {
            path,
            layout,
            removed: AtomicBool::new(false),
        })
    }

    /// Directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File naming used inside this directory.
    pub fn layout(&self) -> &SegmentLayout {
        &self.layout
    }

    /// Full path of the HLS manifest.
    pub fn manifest_path(&self) -> PathBuf {
        self.path.join(&self.layout.manifest_name)
    }

    /// Full printf-style segment path handed to the transcoder.
    pub fn segment_pattern(&self) -> PathBuf {
        self.path.join(self.layout.segment_pattern())
    }

    /// Whether the manifest has been written.
    pub fn manifest_exists(&self) -> bool {
        self.manifest_path().is_file()
    }

    /// Number of segment artifacts currently on disk.
    ///
    /// A directory that no longer exists holds zero segments.
    pub fn count_segments(&self) -> io::Result<usize> {
        let entries = match std::fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut count = 0;
        for entry in entries {
            let entry = entry?;
            if entry
                .file_name()
                .to_str()
                .is_some_and(|name| self.layout.is_segment(name))
            {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Whether [`remove`](Self::remove) has already run.
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    /// Delete the directory and everything in it.
    ///
    /// Returns `Ok(true)` on the call that performed the removal and
    /// `Ok(false)` on every later call.
    pub fn remove(&self) -> io::Result<bool> {
        if self.removed.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e),
        }
    }
}

impl Drop for PreviewDir {
    fn drop(&mut self) {
        if let Err(e) = self.remove() {
            tracing::warn!("Failed to remove {}: {e}", self.path.display());
        }
    }
}

/// Remove leftover `preview_*` directories under `root`.
///
/// Run once at startup, before any session exists, to clear output left
/// behind by a previous crash. Returns the number of directories removed.
pub fn remove_stale_dirs(root: &Path) -> io::Result<usize> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let is_preview = entry
            .file_name()
            .to_str()
            .is_some_and(|n| n.starts_with(PREVIEW_DIR_PREFIX));
        if is_preview && entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}
