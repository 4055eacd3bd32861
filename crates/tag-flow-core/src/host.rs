use crate::error::HostError;
use async_trait::async_trait;

/// Path-like identity of a note inside the workspace, e.g. "Recipes/pie.md".
pub type NoteId = String;

/// Tag information the host has already parsed for a note.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagMetadata {
    /// Tags the host found in the note body. May or may not carry the `#` sigil.
    pub tags: Vec<String>,
    /// Raw value of the front-matter `tags` field, e.g. "apple, pie".
    pub frontmatter_tags: Option<String>,
}

/// Note storage supplied by the host application.
///
/// The caller guarantees a single in-flight write per note.
#[async_trait]
pub trait NoteHost: Send + Sync {
    async fn read_note(&self, id: &str) -> Result<String, HostError>;

    async fn write_note(&self, id: &str, content: &str) -> Result<(), HostError>;

    /// All notes in the workspace, in the host's iteration order.
    async fn list_notes(&self) -> Result<Vec<NoteId>, HostError>;

    /// Structured tag metadata, if the host has indexed this note. `content`
    /// is the text the caller just read, so a host that parses notes itself
    /// derives the metadata from the same version without reading again.
    async fn tag_metadata(&self, id: &str, content: &str) -> Option<TagMetadata>;

    /// The note currently open in the focused editor, if any.
    fn active_note(&self) -> Option<NoteId>;
}

/// Named text blobs persisted by the host (plugin data).
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fails with `HostError::NotFound` when no blob with this name exists.
    async fn read_blob(&self, name: &str) -> Result<String, HostError>;

    async fn write_blob(&self, name: &str, text: &str) -> Result<(), HostError>;
}

/// Last path component with its extension removed: "Recipes/pie.md" -> "pie".
pub fn basename(id: &str) -> &str {
    let file_name = id.rsplit('/').next().unwrap_or(id);
    match file_name.rfind('.') {
        Some(dot) if dot > 0 => &file_name[..dot],
        _ => file_name,
    }
}
