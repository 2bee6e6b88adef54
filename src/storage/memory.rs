//! In-memory record store for tests and throwaway runs
//!
//! Thread-safe via `RwLock`. Not durable: data is lost on restart.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use super::{
    is_undescribed, sort_captures_newest_first, sort_descriptions_newest_first,
    sort_generated_newest_first, RecordStore, StorageError,
};
use crate::types::{
    generate_id, CaptureStatus, CapturedImage, Description, GeneratedImage, NewCapture,
    CAPTURE_ID_PREFIX, DESCRIPTION_ID_PREFIX, GENERATED_ID_PREFIX,
};

#[derive(Default)]
struct Tables {
    captures: HashMap<String, CapturedImage>,
    descriptions: HashMap<String, Description>,
    generated: HashMap<String, GeneratedImage>,
}

/// Record store held entirely in memory
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StorageError> {
        self.tables
            .read()
            .map_err(|e| StorageError::Database(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StorageError> {
        self.tables
            .write()
            .map_err(|e| StorageError::Database(e.to_string()))
    }
}

impl RecordStore for InMemoryStore {
    fn insert_capture(&self, capture: NewCapture) -> Result<CapturedImage, StorageError> {
        let record = CapturedImage {
            id: generate_id(CAPTURE_ID_PREFIX),
            filename: capture.filename,
            camera_id: capture.camera_id,
            frame_rate: capture.frame_rate,
            captured_at: Utc::now(),
            status: capture.status,
        };
        self.write()?
            .captures
            .insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn get_capture(&self, id: &str) -> Result<Option<CapturedImage>, StorageError> {
        Ok(self.read()?.captures.get(id).cloned())
    }

    fn list_captures(&self) -> Result<Vec<CapturedImage>, StorageError> {
        let mut captures: Vec<_> = self.read()?.captures.values().cloned().collect();
        sort_captures_newest_first(&mut captures);
        Ok(captures)
    }

    fn set_capture_status(&self, id: &str, status: CaptureStatus) -> Result<(), StorageError> {
        let mut tables = self.write()?;
        let capture = tables
            .captures
            .get_mut(id)
            .ok_or_else(|| StorageError::capture_not_found(id))?;
        if !capture.status.can_transition_to(status) {
            return Err(StorageError::InvalidTransition {
                id: id.to_string(),
                from: capture.status,
                to: status,
            });
        }
        capture.status = status;
        Ok(())
    }

    fn transition_capture_status(
        &self,
        id: &str,
        from: CaptureStatus,
        to: CaptureStatus,
    ) -> Result<bool, StorageError> {
        let mut tables = self.write()?;
        let capture = tables
            .captures
            .get_mut(id)
            .ok_or_else(|| StorageError::capture_not_found(id))?;
        if capture.status != from {
            return Ok(false);
        }
        capture.status = to;
        Ok(true)
    }

    fn insert_description(&self, capture_id: &str, text: &str) -> Result<Description, StorageError> {
        let record = Description {
            id: generate_id(DESCRIPTION_ID_PREFIX),
            camera_image_id: capture_id.to_string(),
            description: text.to_string(),
            generated_at: Utc::now(),
        };
        self.write()?
            .descriptions
            .insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn get_description(&self, id: &str) -> Result<Option<Description>, StorageError> {
        Ok(self.read()?.descriptions.get(id).cloned())
    }

    fn description_for_capture(&self, capture_id: &str) -> Result<Option<Description>, StorageError> {
        Ok(self
            .read()?
            .descriptions
            .values()
            .find(|d| d.camera_image_id == capture_id)
            .cloned())
    }

    fn list_descriptions(&self) -> Result<Vec<Description>, StorageError> {
        let mut descriptions: Vec<_> = self.read()?.descriptions.values().cloned().collect();
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
        self.write()?
            .generated
            .insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn get_generated_image(&self, id: &str) -> Result<Option<GeneratedImage>, StorageError> {
        Ok(self.read()?.generated.get(id).cloned())
    }

    fn list_generated_images(&self) -> Result<Vec<GeneratedImage>, StorageError> {
        let mut images: Vec<_> = self.read()?.generated.values().cloned().collect();
        sort_generated_newest_first(&mut images);
        Ok(images)
    }

    fn delete_undescribed_except(&self, keep_id: &str) -> Result<usize, StorageError> {
        let mut tables = self.write()?;
        let before = tables.captures.len();
        tables
            .captures
            .retain(|_, capture| !is_undescribed(capture, keep_id));
        let deleted = before - tables.captures.len();

        let Tables {
            captures,
            descriptions,
            ..
        } = &mut *tables;
        descriptions.retain(|_, d| captures.contains_key(&d.camera_image_id));
        Ok(deleted)
    }

    fn clear_all(&self) -> Result<(), StorageError> {
        *self.write()? = Tables::default();
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_newest_first() {
        let store = InMemoryStore::new();
        let first = store.insert_capture(NewCapture::pending("1.jpg")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = store.insert_capture(NewCapture::pending("2.jpg")).unwrap();

        let list = store.list_captures().unwrap();
        assert_eq!(list[0].id, second.id);
        assert_eq!(list[1].id, first.id);
        assert_eq!(store.latest_capture().unwrap().unwrap().id, second.id);
    }

    #[test]
    fn test_pending_filter() {
        let store = InMemoryStore::new();
        let a = store.insert_capture(NewCapture::pending("a.jpg")).unwrap();
        let b = store.insert_capture(NewCapture::pending("b.jpg")).unwrap();
        store
            .transition_capture_status(&a.id, CaptureStatus::Pending, CaptureStatus::Processing)
            .unwrap();
        store.set_capture_status(&a.id, CaptureStatus::Described).unwrap();

        let pending = store.list_pending_captures().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b.id);
    }

    #[test]
    fn test_status_write_cannot_leave_described() {
        let store = InMemoryStore::new();
        let capture = store
            .insert_capture(NewCapture {
                status: CaptureStatus::Described,
                ..NewCapture::pending("a.jpg")
            })
            .unwrap();

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
        // Re-applying the current status is still fine
        store.set_capture_status(&capture.id, CaptureStatus::Described).unwrap();
        assert_eq!(
            store.get_capture(&capture.id).unwrap().unwrap().status,
            CaptureStatus::Described
        );
    }

    #[test]
    fn test_resolve_chain_missing_link() {
        let store = InMemoryStore::new();
        let generation = store
            .insert_generated_image("g.webp", "desc_missing", "prompt")
            .unwrap();
        assert!(store.resolve_chain(&generation.id).unwrap().is_none());
        assert!(store.resolve_chain("gen_missing").unwrap().is_none());
    }

    #[test]
    fn test_trait_object() {
        let store: Box<dyn RecordStore> = Box::new(InMemoryStore::new());
        assert_eq!(store.backend_name(), "InMemory");
        store.insert_capture(NewCapture::pending("a.jpg")).unwrap();
        assert_eq!(store.list_captures().unwrap().len(), 1);
    }
}
