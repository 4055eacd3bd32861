use crate::error::{HostError, TagFlowError};
use crate::host::{BlobStore, NoteId};
use serde::{Deserialize, Serialize};

/// A user request: keep a live list of every note carrying `tag` inside
/// `owner_note`. `id` is the creation time in milliseconds and, together
/// with the tag, names the region's markers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagList {
    pub tag: String,
    #[serde(rename = "notePath")]
    pub owner_note: NoteId,
    pub id: i64,
}

/// On-disk shape of the registry blob: `{"lists": [...]}`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedLists {
    lists: Vec<TagList>,
}

/// The set of active tag lists. Only regions named by an entry here are
/// ever touched.
#[derive(Debug, Default, Clone)]
pub struct ListRegistry {
    lists: Vec<TagList>,
    last_id: i64,
}

impl ListRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new list. The id is `now_ms`, bumped past the last issued
    /// id so two lists created in the same millisecond never share markers.
    pub fn create(&mut self, tag: &str, owner_note: &str, now_ms: i64) -> TagList {
        let id = now_ms.max(self.last_id + 1);
        self.last_id = id;
        let list = TagList {
            tag: tag.to_string(),
            owner_note: owner_note.to_string(),
            id,
        };
        self.lists.push(list.clone());
        list
    }

    /// Drop every list matching `predicate`, returning the removed lists.
    pub fn remove<F>(&mut self, mut predicate: F) -> Vec<TagList>
    where
        F: FnMut(&TagList) -> bool,
    {
        let (removed, kept): (Vec<TagList>, Vec<TagList>) = std::mem::take(&mut self.lists)
            .into_iter()
            .partition(|l| predicate(l));
        self.lists = kept;
        removed
    }

    pub fn all(&self) -> &[TagList] {
        &self.lists
    }

    pub fn get(&self, id: i64) -> Option<&TagList> {
        self.lists.iter().find(|l| l.id == id)
    }

    pub fn owned_by<'a>(&'a self, note: &'a str) -> impl Iterator<Item = &'a TagList> + 'a {
        self.lists.iter().filter(move |l| l.owner_note == note)
    }

    /// Point every list owned by `old_note` at `new_note`. Returns how many
    /// lists moved.
    pub fn rename(&mut self, old_note: &str, new_note: &str) -> usize {
        let mut moved = 0;
        for list in self.lists.iter_mut().filter(|l| l.owner_note == old_note) {
            list.owner_note = new_note.to_string();
            moved += 1;
        }
        moved
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&PersistedLists {
            lists: self.lists.clone(),
        })
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let persisted: PersistedLists = serde_json::from_str(json)?;
        let last_id = persisted.lists.iter().map(|l| l.id).max().unwrap_or(0);
        Ok(Self {
            lists: persisted.lists,
            last_id,
        })
    }

    pub async fn save<B: BlobStore + ?Sized>(
        &self,
        store: &B,
        blob_name: &str,
    ) -> Result<(), TagFlowError> {
        let json = self.to_json()?;
        store.write_blob(blob_name, &json).await?;
        tracing::debug!("Saved {} tag list(s) to {}", self.lists.len(), blob_name);
        Ok(())
    }

    /// Load the registry from the blob store. A missing or malformed blob is
    /// not fatal: the failure is logged and an empty registry is returned.
    pub async fn load<B: BlobStore + ?Sized>(store: &B, blob_name: &str) -> Self {
        let json = match store.read_blob(blob_name).await {
            Ok(json) => json,
            Err(HostError::NotFound(_)) => {
                tracing::info!("No {} yet, starting with no tag lists", blob_name);
                return Self::new();
            }
            Err(e) => {
                tracing::error!("Failed to read {}: {}", blob_name, e);
                return Self::new();
            }
        };
        match Self::from_json(&json) {
            Ok(registry) => {
                tracing::info!("Loaded {} tag list(s) from {}", registry.len(), blob_name);
                registry
            }
            Err(e) => {
                tracing::error!("Failed to parse {}: {}", blob_name, e);
                Self::new()
            }
        }
    }
}
