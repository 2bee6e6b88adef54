//! Media file storage
//!
//! Uploaded captures and generated images live side by side in one
//! directory, which the HTTP layer also serves statically under `/captures`.

use std::path::{Path, PathBuf};

use chrono::Utc;

use super::StorageError;

/// Extension used when neither the content type nor the upload name gives one
const FALLBACK_EXTENSION: &str = "jpg";

#[derive(Debug, Clone)]
pub struct MediaStore {
    dir: PathBuf,
}

impl MediaStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create the media directory if missing
    pub async fn ensure_dir(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Absolute path of a stored file.
    ///
    /// Only the final path component of `filename` is used so record
    /// filenames can never point outside the media directory.
    pub fn path_for(&self, filename: &str) -> PathBuf {
        let name = Path::new(filename)
            .file_name()
            .map_or_else(|| filename.into(), std::ffi::OsStr::to_os_string);
        self.dir.join(name)
    }

    /// Write an uploaded frame, returning its generated filename
    pub async fn save_capture(&self, bytes: &[u8], extension: &str) -> Result<String, StorageError> {
        let filename = unique_filename("capture", extension);
        self.write(&filename, bytes).await?;
        Ok(filename)
    }

    /// Write a rendered image, returning its generated filename
    pub async fn save_generated(&self, bytes: &[u8], extension: &str) -> Result<String, StorageError> {
        let filename = unique_filename("generated", extension);
        self.write(&filename, bytes).await?;
        Ok(filename)
    }

    async fn write(&self, filename: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.ensure_dir().await?;
        let path = self.path_for(filename);
        tokio::fs::write(&path, bytes).await?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "Wrote media file");
        Ok(())
    }

    /// Delete one file; a missing file is not an error
    pub async fn remove(&self, filename: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.path_for(filename)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every regular file in the media directory
    pub async fn clear(&self) -> Result<usize, StorageError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        tracing::info!(dir = %self.dir.display(), removed, "Cleared media directory");
        Ok(removed)
    }
}

/// `<kind>_<unix ms>_<4 hex>.<ext>`
fn unique_filename(kind: &str, extension: &str) -> String {
    format!(
        "{}_{}_{:04x}.{}",
        kind,
        Utc::now().timestamp_millis(),
        rand::random::<u16>(),
        extension.trim_start_matches('.')
    )
}

/// Pick a file extension for an upload from its content type, then its
/// original file name.
pub fn extension_for_upload(content_type: Option<&str>, original_name: Option<&str>) -> String {
    if let Some(ext) = content_type
        .and_then(mime_guess::get_mime_extensions_str)
        .and_then(|exts| exts.first())
    {
        // mime_guess lists "jfif"/"jpe" before "jpg" for image/jpeg
        if content_type == Some("image/jpeg") {
            return "jpg".to_string();
        }
        return (*ext).to_string();
    }

    original_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| mime_guess::from_ext(ext).first().is_some())
        .map_or_else(|| FALLBACK_EXTENSION.to_string(), str::to_ascii_lowercase)
}
