use crate::error::HostError;
use crate::host::{NoteHost, NoteId};
use crate::tag_extractor::{TagExtractor, TagSet};
use std::collections::{BTreeSet, HashMap};

/// Index from note identity to the tags that note currently carries.
///
/// A missing entry means "not scanned yet", which is different from an
/// entry holding an empty set.
#[derive(Debug, Default, Clone)]
pub struct TagCache {
    entries: HashMap<NoteId, TagSet>,
}

impl TagCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&TagSet> {
        self.entries.get(id)
    }

    pub fn set(&mut self, id: &str, tags: TagSet) {
        self.entries.insert(id.to_string(), tags);
    }

    pub fn delete(&mut self, id: &str) -> Option<TagSet> {
        self.entries.remove(id)
    }

    /// Move an entry to a new key, keeping its tags. Returns false if
    /// `old_id` had no entry.
    pub fn rename(&mut self, old_id: &str, new_id: &str) -> bool {
        match self.entries.remove(old_id) {
            Some(tags) => {
                self.entries.insert(new_id.to_string(), tags);
                true
            }
            None => false,
        }
    }

    /// Store freshly extracted tags and report whether they differ from the
    /// cached ones (added or removed in either direction). The entry is
    /// always overwritten. An unscanned note counts as having no tags.
    pub fn update(&mut self, id: &str, tags: TagSet) -> bool {
        let changed = match self.entries.get(id) {
            Some(old) => old.symmetric_difference(&tags).next().is_some(),
            None => !tags.is_empty(),
        };
        self.entries.insert(id.to_string(), tags);
        changed
    }

    /// Swap in a complete replacement index.
    pub fn replace_all(&mut self, fresh: TagCache) {
        self.entries = fresh.entries;
    }

    pub fn has_tag(&self, id: &str, tag: &str) -> bool {
        self.entries.get(id).is_some_and(|tags| tags.contains(tag))
    }

    /// Notes from `order` whose cached tags contain `tag`, in that order.
    pub fn notes_with_tag<'a>(
        &'a self,
        tag: &'a str,
        order: &'a [NoteId],
    ) -> impl Iterator<Item = &'a NoteId> + 'a {
        order.iter().filter(move |id| self.has_tag(id, tag))
    }

    /// Every tag carried by at least one cached note, sorted.
    pub fn all_tags(&self) -> BTreeSet<String> {
        self.entries.values().flatten().cloned().collect()
    }

    /// Ids of every cached note, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = &NoteId> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(NoteId, TagSet)> for TagCache {
    fn from_iter<I: IntoIterator<Item = (NoteId, TagSet)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Re-extract the tags of every note the host lists.
///
/// Reads fan out concurrently; the returned cache is only handed back once
/// every read has finished. Notes that fail to read are left out and logged.
pub async fn rebuild<H: NoteHost + ?Sized>(
    host: &H,
    extractor: &TagExtractor,
) -> Result<TagCache, HostError> {
    let notes = host.list_notes().await?;

    let reads = notes.iter().map(|id| async move {
        let content = host.read_note(id).await;
        let metadata = match &content {
            Ok(text) => host.tag_metadata(id, text).await,
            Err(_) => None,
        };
        (id, content, metadata)
    });
    let results = futures::future::join_all(reads).await;

    let mut skipped = 0;
    let cache: TagCache = results
        .into_iter()
        .filter_map(|(id, content, metadata)| match content {
            Ok(content) => Some((id.clone(), extractor.extract(&content, metadata.as_ref()))),
            Err(e) => {
                tracing::warn!("Skipping {} during tag cache rebuild: {}", id, e);
                skipped += 1;
                None
            }
        })
        .collect();

    tracing::info!(
        "Tag cache rebuilt: {} notes indexed, {} skipped",
        cache.len(),
        skipped
    );
    Ok(cache)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_host::MemoryHost;

    fn tags(list: &[&str]) -> TagSet {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn missing_entry_differs_from_empty_entry() {
        let mut cache = TagCache::new();
        assert!(cache.get("a.md").is_none());
        cache.set("a.md", TagSet::new());
        assert_eq!(cache.get("a.md"), Some(&TagSet::new()));
    }

    #[test]
    fn update_detects_added_tag() {
        let mut cache = TagCache::new();
        cache.set("a.md", tags(&["#apple"]));
        assert!(cache.update("a.md", tags(&["#apple", "#pie"])));
        assert_eq!(cache.get("a.md"), Some(&tags(&["#apple", "#pie"])));
    }

    #[test]
    fn update_detects_removed_tag() {
        let mut cache = TagCache::new();
        cache.set("a.md", tags(&["#apple", "#pie"]));
        assert!(cache.update("a.md", tags(&["#apple"])));
    }

    #[test]
    fn update_with_same_tags_is_unchanged() {
        let mut cache = TagCache::new();
        cache.set("a.md", tags(&["#apple"]));
        assert!(!cache.update("a.md", tags(&["#apple"])));
    }

    #[test]
    fn update_of_unscanned_note() {
        let mut cache = TagCache::new();
        assert!(!cache.update("a.md", TagSet::new()), "no tags, nothing changed");
        assert!(cache.get("a.md").is_some(), "entry is still recorded");
        assert!(cache.update("b.md", tags(&["#apple"])));
    }

    #[test]
    fn rename_moves_entry() {
        let mut cache = TagCache::new();
        cache.set("a.md", tags(&["#apple"]));
        assert!(cache.rename("a.md", "b.md"));
        assert!(cache.get("a.md").is_none());
        assert_eq!(cache.get("b.md"), Some(&tags(&["#apple"])));
        assert!(!cache.rename("missing.md", "c.md"));
    }

    #[test]
    fn notes_with_tag_follows_given_order() {
        let mut cache = TagCache::new();
        cache.set("b.md", tags(&["#apple"]));
        cache.set("a.md", tags(&["#apple"]));
        cache.set("c.md", tags(&["#pear"]));
        let order = vec!["b.md".to_string(), "c.md".to_string(), "a.md".to_string()];
        let found: Vec<&NoteId> = cache.notes_with_tag("#apple", &order).collect();
        assert_eq!(found, vec!["b.md", "a.md"]);
    }

    #[test]
    fn all_tags_is_sorted_union() {
        let mut cache = TagCache::new();
        cache.set("a.md", tags(&["#pie", "#apple"]));
        cache.set("b.md", tags(&["#apple", "#bread"]));
        let all: Vec<String> = cache.all_tags().into_iter().collect();
        assert_eq!(all, vec!["#apple", "#bread", "#pie"]);
    }

    #[tokio::test]
    async fn rebuild_indexes_every_listed_note() {
        let host = MemoryHost::new()
            .with_note("fruit.md", "I like #apple")
            .with_note("pie.md", "#apple and #pie")
            .with_note("empty.md", "nothing here");
        let extractor = TagExtractor::with_defaults(true);

        let cache = rebuild(&host, &extractor).await.unwrap();

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("fruit.md"), Some(&tags(&["#apple"])));
        assert_eq!(cache.get("pie.md"), Some(&tags(&["#apple", "#pie"])));
        assert_eq!(cache.get("empty.md"), Some(&TagSet::new()));
    }

    #[tokio::test]
    async fn rebuild_skips_unreadable_notes() {
        let host = MemoryHost::new()
            .with_note("fruit.md", "#apple")
            .with_listed_only("ghost.md");
        let extractor = TagExtractor::with_defaults(true);

        let cache = rebuild(&host, &extractor).await.unwrap();

        assert_eq!(cache.len(), 1);
        assert!(cache.get("ghost.md").is_none());
    }
}
