use async_trait::async_trait;
use hoard::file_store::{FileHandle, FileStore, FileStoreError};
use std::collections::HashMap;
use std::sync::Mutex;

struct Object {
    data: Vec<u8>,
    refs: u32,
}

/// In-memory file store with observable reference counts
#[derive(Default)]
pub struct MockFileStore {
    objects: Mutex<HashMap<String, Object>>,
}

impl MockFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reference count of every object still holding bytes
    pub fn counts(&self) -> HashMap<String, u32> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .map(|(hash, object)| (hash.clone(), object.refs))
            .collect()
    }

    /// Counts of objects with at least one reference
    pub fn live_counts(&self) -> HashMap<String, u32> {
        self.counts().into_iter().filter(|(_, refs)| *refs > 0).collect()
    }

    pub fn count_of(&self, handle: &FileHandle) -> u32 {
        self.objects
            .lock()
            .unwrap()
            .get(&handle.hash)
            .map(|o| o.refs)
            .unwrap_or(0)
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl FileStore for MockFileStore {
    async fn add(&self, data: &[u8]) -> Result<FileHandle, FileStoreError> {
        let handle = FileHandle::for_bytes(data);
        let mut objects = self.objects.lock().unwrap();
        objects
            .entry(handle.hash.clone())
            .or_insert_with(|| Object {
                data: data.to_vec(),
                refs: 0,
            })
            .refs += 1;
        Ok(handle)
    }

    async fn reference(&self, handles: &[FileHandle]) -> Result<(), FileStoreError> {
        let mut objects = self.objects.lock().unwrap();
        for handle in handles {
            let object = objects
                .get_mut(&handle.hash)
                .ok_or_else(|| FileStoreError::NotFound(handle.hash.clone()))?;
            object.refs += 1;
        }
        Ok(())
    }

    async fn dereference(&self, handles: &[FileHandle]) -> Result<(), FileStoreError> {
        let mut objects = self.objects.lock().unwrap();
        for handle in handles {
            if let Some(object) = objects.get_mut(&handle.hash) {
                object.refs = object.refs.saturating_sub(1);
            }
        }
        Ok(())
    }

    async fn open_read(&self, handle: &FileHandle) -> Result<Vec<u8>, FileStoreError> {
        self.objects
            .lock()
            .unwrap()
            .get(&handle.hash)
            .map(|o| o.data.clone())
            .ok_or_else(|| FileStoreError::NotFound(handle.hash.clone()))
    }

    async fn ref_count(&self, handle: &FileHandle) -> Result<u32, FileStoreError> {
        Ok(self.count_of(handle))
    }

    async fn cleanup(&self, retain: &[FileHandle]) -> Result<usize, FileStoreError> {
        let mut objects = self.objects.lock().unwrap();
        let before = objects.len();
        objects.retain(|hash, o| o.refs > 0 || retain.iter().any(|h| &h.hash == hash));
        Ok(before - objects.len())
    }
}
