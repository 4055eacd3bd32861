//! In-memory host used by tests and embedders that keep notes outside a
//! filesystem. Records every note write so callers can assert on them.

use crate::error::HostError;
use crate::host::{BlobStore, NoteHost, NoteId, TagMetadata};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryHost {
    /// Insertion order is the host's iteration order. `None` content means
    /// the note is listed but cannot be read.
    notes: Mutex<Vec<(NoteId, Option<String>)>>,
    metadata: Mutex<HashMap<NoteId, TagMetadata>>,
    blobs: Mutex<HashMap<String, String>>,
    active: Mutex<Option<NoteId>>,
    writes: Mutex<Vec<NoteId>>,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_note(self, id: &str, content: &str) -> Self {
        self.put_note(id, content);
        self
    }

    pub fn with_listed_only(self, id: &str) -> Self {
        lock(&self.notes).push((id.to_string(), None));
        self
    }

    pub fn with_metadata(self, id: &str, metadata: TagMetadata) -> Self {
        lock(&self.metadata).insert(id.to_string(), metadata);
        self
    }

    pub fn with_blob(self, name: &str, text: &str) -> Self {
        lock(&self.blobs).insert(name.to_string(), text.to_string());
        self
    }

    pub fn with_active(self, id: &str) -> Self {
        self.set_active(Some(id));
        self
    }

    /// Create or overwrite a note without recording it as a write.
    pub fn put_note(&self, id: &str, content: &str) {
        let mut notes = lock(&self.notes);
        match notes.iter_mut().find(|(n, _)| n == id) {
            Some(entry) => entry.1 = Some(content.to_string()),
            None => notes.push((id.to_string(), Some(content.to_string()))),
        }
    }

    pub fn remove_note(&self, id: &str) {
        lock(&self.notes).retain(|(n, _)| n != id);
        lock(&self.metadata).remove(id);
    }

    /// Rename in place, keeping the note's position in iteration order.
    pub fn rename_note(&self, old_id: &str, new_id: &str) {
        if let Some(entry) = lock(&self.notes).iter_mut().find(|(n, _)| n == old_id) {
            entry.0 = new_id.to_string();
        }
        let mut metadata = lock(&self.metadata);
        if let Some(m) = metadata.remove(old_id) {
            metadata.insert(new_id.to_string(), m);
        }
    }

    pub fn set_active(&self, id: Option<&str>) {
        *lock(&self.active) = id.map(str::to_string);
    }

    pub fn note(&self, id: &str) -> Option<String> {
        lock(&self.notes)
            .iter()
            .find(|(n, _)| n == id)
            .and_then(|(_, content)| content.clone())
    }

    pub fn blob(&self, name: &str) -> Option<String> {
        lock(&self.blobs).get(name).cloned()
    }

    /// Ids of every note written through `write_note`, in call order.
    pub fn writes(&self) -> Vec<NoteId> {
        lock(&self.writes).clone()
    }

    pub fn clear_writes(&self) {
        lock(&self.writes).clear();
    }
}

#[async_trait]
impl NoteHost for MemoryHost {
    async fn read_note(&self, id: &str) -> Result<String, HostError> {
        self.note(id)
            .ok_or_else(|| HostError::NotFound(id.to_string()))
    }

    async fn write_note(&self, id: &str, content: &str) -> Result<(), HostError> {
        if self.note(id).is_none() {
            return Err(HostError::NotFound(id.to_string()));
        }
        self.put_note(id, content);
        lock(&self.writes).push(id.to_string());
        Ok(())
    }

    async fn list_notes(&self) -> Result<Vec<NoteId>, HostError> {
        Ok(lock(&self.notes).iter().map(|(n, _)| n.clone()).collect())
    }

    async fn tag_metadata(&self, id: &str, _content: &str) -> Option<TagMetadata> {
        lock(&self.metadata).get(id).cloned()
    }

    fn active_note(&self) -> Option<NoteId> {
        lock(&self.active).clone()
    }
}

#[async_trait]
impl BlobStore for MemoryHost {
    async fn read_blob(&self, name: &str) -> Result<String, HostError> {
        self.blob(name)
            .ok_or_else(|| HostError::NotFound(name.to_string()))
    }

    async fn write_blob(&self, name: &str, text: &str) -> Result<(), HostError> {
        lock(&self.blobs).insert(name.to_string(), text.to_string());
        Ok(())
    }
}
