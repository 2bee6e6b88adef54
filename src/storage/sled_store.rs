//! Sled-backed record store
//!
//! One sled DB with a tree per record kind, values JSON-encoded and keyed by
//! record id:
//!
//! - `captures`            id → CapturedImage
//! - `descriptions`        id → Description
//! - `generated_images`    id → GeneratedImage
//! - `capture_description` capture id → description id
//!
//! Status writes go through `compare_and_swap` so concurrent writers never
//! lose an update or regress a status.

use std::path::Path;

use chrono::Utc;
use sled::{Db, Tree};

use super::{
    is_undescribed, sort_captures_newest_first, sort_descriptions_newest_first,
    sort_generated_newest_first, RecordStore, StorageError,
};
use crate::types::{
    generate_id, CaptureStatus, CapturedImage, Description, GeneratedImage, NewCapture,
    CAPTURE_ID_PREFIX, DESCRIPTION_ID_PREFIX, GENERATED_ID_PREFIX,
};

const CAPTURES_TREE: &str = "captures";
const DESCRIPTIONS_TREE: &str = "descriptions";
const GENERATED_TREE: &str = "generated_images";
const CAPTURE_DESCRIPTION_TREE: &str = "capture_description";

/// Persistent record store
#[derive(Clone)]
pub struct SledStore {
    db: Db,
    captures: Tree,
    descriptions: Tree,
    generated: Tree,
    capture_description: Tree,
}

impl SledStore {
    /// Open or create the record database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path_ref = path.as_ref();
        let db = sled::open(path_ref)?;
        tracing::info!(path = %path_ref.display(), "Record store opened");
        Self::from_db(db)
    }

    /// Store backed by a temporary sled DB, removed on drop
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, StorageError> {
        Ok(Self {
            captures: db.open_tree(CAPTURES_TREE)?,
            descriptions: db.open_tree(DESCRIPTIONS_TREE)?,
            generated: db.open_tree(GENERATED_TREE)?,
            capture_description: db.open_tree(CAPTURE_DESCRIPTION_TREE)?,
            db,
        })
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    fn decode_all<T: serde::de::DeserializeOwned>(tree: &Tree) -> Result<Vec<T>, StorageError> {
        tree.iter()
            .values()
            .map(|value| -> Result<T, StorageError> { Ok(serde_json::from_slice(&value?)?) })
            .collect()
    }

    fn decode_one<T: serde::de::DeserializeOwned>(
        tree: &Tree,
        id: &str,
    ) -> Result<Option<T>, StorageError> {
        match tree.get(id)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Read-modify-CAS loop on one capture row.
    ///
    /// `apply` returns `false` to abort without writing. Returns whether a
    /// write happened.
    fn update_capture<F>(&self, id: &str, mut apply: F) -> Result<bool, StorageError>
    where
        F: FnMut(&mut CapturedImage) -> bool,
    {
        loop {
            let Some(current) = self.captures.get(id)? else {
                return Err(StorageError::capture_not_found(id));
            };
            let mut capture: CapturedImage = serde_json::from_slice(&current)?;
            if !apply(&mut capture) {
                return Ok(false);
            }
            let next = serde_json::to_vec(&capture)?;
            match self.captures.compare_and_swap(id, Some(&current), Some(next))? {
                Ok(()) => return Ok(true),
                Err(_) => {
                    tracing::trace!(capture_id = id, "Capture row changed underneath CAS, retrying");
                }
            }
        }
    }
}

impl RecordStore for SledStore {
    fn insert_capture(&self, capture: NewCapture) -> Result<CapturedImage, StorageError> {
        let record = CapturedImage {
            id: generate_id(CAPTURE_ID_PREFIX),
            filename: capture.filename,
            camera_id: capture.camera_id,
            frame_rate: capture.frame_rate,
            captured_at: Utc::now(),
            status: capture.status,
        };
        self.captures
            .insert(record.id.as_str(), serde_json::to_vec(&record)?)?;
        self.captures.flush()?;

        tracing::debug!(capture_id = %record.id, filename = %record.filename, "Stored capture");
        Ok(record)
    }

    fn get_capture(&self, id: &str) -> Result<Option<CapturedImage>, StorageError> {
        Self::decode_one(&self.captures, id)
    }

    fn list_captures(&self) -> Result<Vec<CapturedImage>, StorageError> {
        let mut captures: Vec<CapturedImage> = Self::decode_all(&self.captures)?;
        sort_captures_newest_first(&mut captures);
        Ok(captures)
    }

    fn set_capture_status(&self, id: &str, status: CaptureStatus) -> Result<(), StorageError> {
        let mut rejected = None;
        let written = self.update_capture(id, |capture| {
            rejected = None;
            if capture.status == status {
                return false;
            }
            if !capture.status.can_transition_to(status) {
                rejected = Some(capture.status);
                return false;
            }
            capture.status = status;
            true
        })?;

        if let Some(from) = rejected {
            return Err(StorageError::InvalidTransition {
                id: id.to_string(),
                from,
                to: status,
            });
        }
        if written {
            tracing::debug!(capture_id = id, status = %status, "Capture status set");
        }
        Ok(())
    }

    fn transition_capture_status(
        &self,
        id: &str,
        from: CaptureStatus,
        to: CaptureStatus,
    ) -> Result<bool, StorageError> {
        self.update_capture(id, |capture| {
            if capture.status != from {
                return false;
            }
            capture.status = to;
            true
        })
    }

    fn insert_description(&self, capture_id: &str, text: &str) -> Result<Description, StorageError> {
        let record = Description {
            id: generate_id(DESCRIPTION_ID_PREFIX),
            camera_image_id: capture_id.to_string(),
            description: text.to_string(),
            generated_at: Utc::now(),
        };
        self.descriptions
            .insert(record.id.as_str(), serde_json::to_vec(&record)?)?;
        self.capture_description
            .insert(capture_id, record.id.as_bytes())?;
        self.db.flush()?;

        tracing::debug!(description_id = %record.id, capture_id, "Stored description");
        Ok(record)
    }

    fn get_description(&self, id: &str) -> Result<Option<Description>, StorageError> {
        Self::decode_one(&self.descriptions, id)
    }

    fn description_for_capture(&self, capture_id: &str) -> Result<Option<Description>, StorageError> {
        let Some(description_id) = self.capture_description.get(capture_id)? else {
            return Ok(None);
        };
        let description_id = String::from_utf8_lossy(&description_id);
        self.get_description(&description_id)
    }

    fn list_descriptions(&self) -> Result<Vec<Description>, StorageError> {
        let mut descriptions: Vec<Description> = Self::decode_all(&self.descriptions)?;
        sort_descriptions_newest_first(&mut descriptions);
        Ok(descriptions)
    }

    fn insert_generated_image(
        &self,
        filename: &str,
        description_id: &str,
        prompt: &str,
    ) -> Result<GeneratedImage, StorageError> {
        let record = GeneratedImage {
            id: generate_id(GENERATED_ID_PREFIX),
            filename: filename.to_string(),
            text_description_id: description_id.to_string(),
            prompt: prompt.to_string(),
            generated_at: Utc::now(),
        };
        self.generated
            .insert(record.id.as_str(), serde_json::to_vec(&record)?)?;
        self.generated.flush()?;

        tracing::debug!(generated_id = %record.id, description_id, "Stored generated image");
        Ok(record)
    }

    fn get_generated_image(&self, id: &str) -> Result<Option<GeneratedImage>, StorageError> {
        Self::decode_one(&self.generated, id)
    }

    fn list_generated_images(&self) -> Result<Vec<GeneratedImage>, StorageError> {
        let mut images: Vec<GeneratedImage> = Self::decode_all(&self.generated)?;
        sort_generated_newest_first(&mut images);
        Ok(images)
    }

    fn delete_undescribed_except(&self, keep_id: &str) -> Result<usize, StorageError> {
        let doomed: Vec<CapturedImage> = Self::decode_all::<CapturedImage>(&self.captures)?
            .into_iter()
            .filter(|capture| is_undescribed(capture, keep_id))
            .collect();

        for capture in &doomed {
            self.captures.remove(capture.id.as_str())?;
            // An error capture may still own a description if the status
            // write failed after the insert.
            if let Some(description_id) = self.capture_description.remove(capture.id.as_str())? {
                self.descriptions.remove(description_id)?;
            }
        }
        self.db.flush()?;

        tracing::info!(deleted = doomed.len(), keep_id, "Deleted undescribed captures");
        Ok(doomed.len())
    }

    fn clear_all(&self) -> Result<(), StorageError> {
        self.captures.clear()?;
        self.descriptions.clear()?;
        self.generated.clear()?;
        self.capture_description.clear()?;
        self.db.flush()?;
        tracing::info!("Cleared all records");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SledStore {
        SledStore::temporary().unwrap()
    }

    #[test]
    fn test_insert_capture_defaults_to_pending() {
        let store = store();
        let capture = store.insert_capture(NewCapture::pending("a.jpg")).unwrap();
        assert!(capture.id.starts_with("cam_"));
        assert_eq!(capture.status, CaptureStatus::Pending);

        let loaded = store.get_capture(&capture.id).unwrap().unwrap();
        assert_eq!(loaded, capture);
    }

    #[test]
    fn test_transition_only_from_expected_status() {
        let store = store();
        let capture = store.insert_capture(NewCapture::pending("a.jpg")).unwrap();

        assert!(store
            .transition_capture_status(&capture.id, CaptureStatus::Pending, CaptureStatus::Processing)
            .unwrap());
        // Second claim loses
        assert!(!store
            .transition_capture_status(&capture.id, CaptureStatus::Pending, CaptureStatus::Processing)
            .unwrap());
        assert_eq!(
            store.get_capture(&capture.id).unwrap().unwrap().status,
            CaptureStatus::Processing
        );
    }

    #[test]
    fn test_transition_missing_capture_is_not_found() {
        let store = store();
        let err = store
            .transition_capture_status("cam_missing", CaptureStatus::Pending, CaptureStatus::Processing)
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[test]
    fn test_set_status_twice_is_idempotent() {
        let store = store();
        let capture = store.insert_capture(NewCapture::pending("a.jpg")).unwrap();
        store
            .transition_capture_status(&capture.id, CaptureStatus::Pending, CaptureStatus::Processing)
            .unwrap();
        store.set_capture_status(&capture.id, CaptureStatus::Error).unwrap();
        store.set_capture_status(&capture.id, CaptureStatus::Error).unwrap();

        let all = store.list_captures().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, CaptureStatus::Error);
    }

    #[test]
    fn test_status_write_rejects_regression() {
        let store = store();
        let capture = store.insert_capture(NewCapture::pending("a.jpg")).unwrap();

        // pending → described skips processing
        let err = store
            .set_capture_status(&capture.id, CaptureStatus::Described)
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidTransition { .. }));

        store
            .transition_capture_status(&capture.id, CaptureStatus::Pending, CaptureStatus::Processing)
            .unwrap();
        store.set_capture_status(&capture.id, CaptureStatus::Described).unwrap();

        let err = store
            .set_capture_status(&capture.id, CaptureStatus::Pending)
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::InvalidTransition {
                from: CaptureStatus::Described,
                to: CaptureStatus::Pending,
                ..
            }
        ));
        assert_eq!(
            store.get_capture(&capture.id).unwrap().unwrap().status,
            CaptureStatus::Described
        );
    }

    #[test]
    fn test_description_index_and_chain() {
        let store = store();
        let capture = store.insert_capture(NewCapture::pending("a.jpg")).unwrap();
        let description = store.insert_description(&capture.id, "a red door").unwrap();
        let generation = store
            .insert_generated_image("generated_1.webp", &description.id, "a red door")
            .unwrap();

        let found = store.description_for_capture(&capture.id).unwrap().unwrap();
        assert_eq!(found.id, description.id);

        let chain = store.resolve_chain(&generation.id).unwrap().unwrap();
        assert_eq!(chain.capture.id, capture.id);
        assert_eq!(chain.description.id, description.id);
        assert!(chain.timestamps_ordered());
    }

    #[test]
    fn test_delete_undescribed_keeps_described_and_kept() {
        let store = store();
        let keep = store.insert_capture(NewCapture::pending("keep.jpg")).unwrap();
        let pending = store.insert_capture(NewCapture::pending("p.jpg")).unwrap();
        let failed = store
            .insert_capture(NewCapture {
                status: CaptureStatus::Error,
                ..NewCapture::pending("e.jpg")
            })
            .unwrap();
        let described = store
            .insert_capture(NewCapture {
                status: CaptureStatus::Described,
                ..NewCapture::pending("d.jpg")
            })
            .unwrap();

        let deleted = store.delete_undescribed_except(&keep.id).unwrap();
        assert_eq!(deleted, 2);
        assert!(store.get_capture(&keep.id).unwrap().is_some());
        assert!(store.get_capture(&described.id).unwrap().is_some());
        assert!(store.get_capture(&pending.id).unwrap().is_none());
    }

    #[test]
    fn test_clear_all_empties_every_tree() {
        let store = store();
        let capture = store.insert_capture(NewCapture::pending("a.jpg")).unwrap();
        let description = store.insert_description(&capture.id, "text").unwrap();
        store
            .insert_generated_image("g.webp", &description.id, "text")
            .unwrap();

        store.clear_all().unwrap();
        assert!(store.list_captures().unwrap().is_empty());
        assert!(store.list_generated_images().unwrap().is_empty());
        assert!(store.description_for_capture(&capture.id).unwrap().is_none());
    }

    #[test]
    fn test_reopen_preserves_records() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = SledStore::open(dir.path().join("db")).unwrap();
            let capture = store.insert_capture(NewCapture::pending("a.jpg")).unwrap();
            store.flush().unwrap();
            capture.id
        };
        let store = SledStore::open(dir.path().join("db")).unwrap();
        assert!(store.get_capture(&id).unwrap().is_some());
    }
}
