//! Filesystem host: a directory of markdown notes ("vault"). Note ids are
//! paths relative to the vault root with `/` separators, e.g.
//! "Recipes/pie.md". The registry blob lives at the vault root.

use async_trait::async_trait;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;
use tag_flow_core::tag_extractor::{scan_inline_tags, strip_anchored_regions};
use tag_flow_core::{BlobStore, HostError, NoteHost, NoteId, TagMetadata};
use walkdir::{DirEntry, WalkDir};

pub struct FsVault {
    root: PathBuf,
    active: RwLock<Option<NoteId>>,
}

fn io_error(what: &str, e: io::Error) -> HostError {
    if e.kind() == io::ErrorKind::NotFound {
        HostError::NotFound(what.to_string())
    } else {
        HostError::Io(format!("{}: {}", what, e))
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

fn is_markdown(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "md")
}

impl FsVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            active: RwLock::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn set_active(&self, id: Option<NoteId>) {
        *self.active.write().unwrap_or_else(|e| e.into_inner()) = id;
    }

    /// Resolve a note id to a path inside the vault. Ids that would escape
    /// the root are rejected.
    fn note_path(&self, id: &str) -> Result<PathBuf, HostError> {
        let relative = Path::new(id);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if id.is_empty() || escapes {
            return Err(HostError::Io(format!("invalid note id {:?}", id)));
        }
        Ok(self.root.join(relative))
    }
}

/// `path` relative to `root` as a `/`-separated note id. `None` for paths
/// outside the root, hidden paths and non-markdown files.
pub fn note_id_under(root: &Path, path: &Path) -> Option<NoteId> {
    if !is_markdown(path) {
        return None;
    }
    relative_path_under(root, path)
}

/// `path` relative to `root` with `/` separators, for any visible path
/// strictly below the root.
pub fn relative_path_under(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        let Component::Normal(part) = component else {
            return None;
        };
        let part = part.to_str()?;
        if part.starts_with('.') {
            return None;
        }
        parts.push(part);
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Split off a leading `---` front-matter block: (front matter, body).
fn split_frontmatter(content: &str) -> (Option<&str>, &str) {
    let Some(after_open) = content.strip_prefix("---") else {
        return (None, content);
    };
    if !after_open.starts_with('\n') && !after_open.starts_with("\r\n") {
        return (None, content);
    }
    match after_open.find("\n---") {
        Some(close) => {
            let yaml = &after_open[..close];
            let rest = &after_open[close + 4..];
            let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
            (Some(yaml), body)
        }
        None => (None, content),
    }
}

/// Raw value of the front-matter `tags` field. A YAML block list
/// (`tags:` followed by `- item` lines) is flattened to "a, b".
fn frontmatter_tags_field(yaml: &str) -> Option<String> {
    let mut lines = yaml.lines().peekable();
    while let Some(line) = lines.next() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key.trim() != "tags" || line.starts_with(char::is_whitespace) {
            continue;
        }
        let value = value.trim();
        if !value.is_empty() {
            return Some(value.to_string());
        }
        let mut items = Vec::new();
        while let Some(item) = lines
            .peek()
            .and_then(|l| l.trim().strip_prefix('-'))
            .map(|i| i.trim().to_string())
        {
            items.push(item);
            lines.next();
        }
        return Some(items.join(", "));
    }
    None
}

/// What a markdown-aware host would index for `content`: inline tags of
/// the body (managed regions excluded) and the raw front-matter field.
pub fn parse_tag_metadata(content: &str) -> TagMetadata {
    let (frontmatter, body) = split_frontmatter(content);
    TagMetadata {
        tags: scan_inline_tags(&strip_anchored_regions(body))
            .into_iter()
            .collect(),
        frontmatter_tags: frontmatter.and_then(frontmatter_tags_field),
    }
}

#[async_trait]
impl NoteHost for FsVault {
    async fn read_note(&self, id: &str) -> Result<String, HostError> {
        let path = self.note_path(id)?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| io_error(id, e))
    }

    async fn write_note(&self, id: &str, content: &str) -> Result<(), HostError> {
        let path = self.note_path(id)?;
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| io_error(id, e))
    }

    async fn list_notes(&self) -> Result<Vec<NoteId>, HostError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<NoteId>, HostError> {
            let mut notes = Vec::new();
            let walker = WalkDir::new(&root)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| !is_hidden(e));
            for entry in walker {
                let entry = entry.map_err(|e| HostError::Io(e.to_string()))?;
                if entry.file_type().is_file() {
                    if let Some(id) = note_id_under(&root, entry.path()) {
                        notes.push(id);
                    }
                }
            }
            Ok(notes)
        })
        .await
        .map_err(|e| HostError::Io(format!("vault walk panicked: {}", e)))?
    }

    async fn tag_metadata(&self, _id: &str, content: &str) -> Option<TagMetadata> {
        Some(parse_tag_metadata(content))
    }

    fn active_note(&self) -> Option<NoteId> {
        self.active
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl BlobStore for FsVault {
    async fn read_blob(&self, name: &str) -> Result<String, HostError> {
        tokio::fs::read_to_string(self.root.join(name))
            .await
            .map_err(|e| io_error(name, e))
    }

    async fn write_blob(&self, name: &str, text: &str) -> Result<(), HostError> {
        tokio::fs::write(self.root.join(name), text)
            .await
            .map_err(|e| io_error(name, e))
    }
}
