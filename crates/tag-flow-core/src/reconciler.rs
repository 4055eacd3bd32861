use crate::anchor::{self, Convergence};
use crate::config::{ReconcileScope, TagFlowConfig};
use crate::error::{Result, TagFlowError};
use crate::events::{actions_for, Action, HostEvent, ScopeChoice};
use crate::host::{basename, BlobStore, NoteHost, NoteId};
use crate::list_registry::{ListRegistry, TagList};
use crate::tag_cache::{self, TagCache};
use crate::tag_extractor::{is_valid_tag, normalize_tag, TagExtractor};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Counts from one reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub rewritten: usize,
    pub unchanged: usize,
    /// Lists whose start marker was no longer in the owning note.
    pub missing_markers: usize,
    /// Lists whose owning note could not be read or written.
    pub skipped: usize,
    /// Lists whose membership became empty: region removed, list retired.
    pub retired: Vec<i64>,
}

/// Owns the tag cache and list registry and keeps every managed region in
/// line with them.
///
/// All mutation goes through `&mut self`, so a single task drives the
/// engine and no locking is needed. A note written here is re-read right
/// before the write, but an edit landing between that read and the write is
/// overwritten (last write wins).
pub struct TagFlow<H> {
    host: Arc<H>,
    config: TagFlowConfig,
    extractor: TagExtractor,
    cache: TagCache,
    registry: ListRegistry,
}

impl<H: NoteHost + BlobStore> TagFlow<H> {
    pub fn new(host: Arc<H>, config: TagFlowConfig) -> Self {
        let extractor = TagExtractor::with_defaults(config.use_metadata);
        Self {
            host,
            config,
            extractor,
            cache: TagCache::new(),
            registry: ListRegistry::new(),
        }
    }

    pub fn with_extractor(mut self, extractor: TagExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    pub fn config(&self) -> &TagFlowConfig {
        &self.config
    }

    pub fn cache(&self) -> &TagCache {
        &self.cache
    }

    pub fn registry(&self) -> &ListRegistry {
        &self.registry
    }

    /// Load the persisted lists and index every note.
    pub async fn initialize(&mut self) -> Result<()> {
        self.registry = ListRegistry::load(self.host.as_ref(), &self.config.blob_name).await;
        self.rebuild_cache().await?;
        tracing::info!(
            "Tag flow ready: {} notes indexed, {} tag list(s)",
            self.cache.len(),
            self.registry.len()
        );
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.save_registry().await?;
        tracing::info!("Tag flow shut down");
        Ok(())
    }

    async fn save_registry(&self) -> Result<()> {
        self.registry
            .save(self.host.as_ref(), &self.config.blob_name)
            .await
    }

    // -----------------------------------------------------------------------
    // Tag cache maintenance
    // -----------------------------------------------------------------------

    /// Re-index every note and swap the result in once all reads are done.
    pub async fn rebuild_cache(&mut self) -> Result<usize> {
        let fresh = tag_cache::rebuild(self.host.as_ref(), &self.extractor).await?;
        self.cache.replace_all(fresh);
        Ok(self.cache.len())
    }

    /// Re-extract one note's tags. Returns whether they changed.
    pub async fn refresh_note(&mut self, id: &str) -> Result<bool> {
        let content = self.host.read_note(id).await?;
        let metadata = self.host.tag_metadata(id, &content).await;
        let tags = self.extractor.extract(&content, metadata.as_ref());
        let changed = self.cache.update(id, tags);
        if changed {
            tracing::info!("Tags changed in {}: {:?}", id, self.cache.get(id));
        }
        Ok(changed)
    }

    pub async fn rename_note(&mut self, old_id: &str, new_id: &str) -> Result<()> {
        self.cache.rename(old_id, new_id);
        let moved = self.registry.rename(old_id, new_id);
        if moved > 0 {
            tracing::info!("Rename {} -> {}: moved {} tag list(s)", old_id, new_id, moved);
            self.save_registry().await?;
        }
        Ok(())
    }

    /// Re-key every cached note and list owner under folder `old_path` to
    /// the same relative place under `new_path`. Returns how many notes moved.
    pub async fn rename_folder(&mut self, old_path: &str, new_path: &str) -> Result<usize> {
        let old_prefix = format!("{}/", old_path.trim_end_matches('/'));
        let new_prefix = format!("{}/", new_path.trim_end_matches('/'));

        let affected: BTreeSet<NoteId> = self
            .cache
            .ids()
            .chain(self.registry.all().iter().map(|l| &l.owner_note))
            .filter(|id| id.starts_with(&old_prefix))
            .cloned()
            .collect();

        let mut lists_moved = 0;
        for old_id in &affected {
            let new_id = format!("{}{}", new_prefix, &old_id[old_prefix.len()..]);
            self.cache.rename(old_id, &new_id);
            lists_moved += self.registry.rename(old_id, &new_id);
        }
        if lists_moved > 0 {
            self.save_registry().await?;
        }
        tracing::info!(
            "Folder rename {} -> {}: moved {} note(s), {} tag list(s)",
            old_path,
            new_path,
            affected.len(),
            lists_moved
        );
        Ok(affected.len())
    }

    pub async fn forget_note(&mut self, id: &str) -> Result<()> {
        self.cache.delete(id);
        let removed = self.registry.remove(|l| l.owner_note == id);
        if !removed.is_empty() {
            tracing::info!("Deleted {}: dropped {} tag list(s)", id, removed.len());
            self.save_registry().await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Event dispatch
    // -----------------------------------------------------------------------

    fn is_registry_blob(&self, id: &str) -> bool {
        basename(id) == basename(&self.config.blob_name)
    }

    fn scope_for(&self, choice: ScopeChoice) -> ReconcileScope {
        match choice {
            ScopeChoice::Interactive => self.config.interactive_scope,
            ScopeChoice::AllLists => ReconcileScope::AllLists,
        }
    }

    /// Run the actions the event table lists for `event`, in order.
    pub async fn handle_event(&mut self, event: HostEvent) -> Result<()> {
        if let Some(id) = event.note() {
            if self.is_registry_blob(id) {
                tracing::debug!("Ignoring event for registry blob {}", id);
                return Ok(());
            }
        }

        for action in actions_for(&event) {
            match action {
                Action::RefreshNote => {
                    let Some(id) = event.note() else { continue };
                    match self.refresh_note(id).await {
                        Ok(true) => {
                            let scope = self.config.interactive_scope;
                            self.reconcile_all(scope).await?;
                        }
                        Ok(false) => {}
                        Err(TagFlowError::Host(e)) if e.is_not_found() => {
                            tracing::warn!("Note {} vanished before it could be indexed", id);
                        }
                        Err(e) => return Err(e),
                    }
                }
                Action::RenameNote => {
                    if let HostEvent::Renamed { id, old_id } = &event {
                        self.rename_note(old_id, id).await?;
                    }
                }
                Action::RenameFolder => {
                    if let HostEvent::FolderRenamed { path, old_path } = &event {
                        self.rename_folder(old_path, path).await?;
                    }
                }
                Action::ForgetNote => {
                    if let Some(id) = event.note() {
                        self.forget_note(id).await?;
                    }
                }
                Action::RebuildCache => {
                    self.rebuild_cache().await?;
                }
                Action::Reconcile(choice) => {
                    let scope = self.scope_for(*choice);
                    self.reconcile_all(scope).await?;
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    /// Links for every note in `notes` whose cached tags include `tag`.
    pub fn member_links(&self, tag: &str, notes: &[NoteId]) -> Vec<String> {
        anchor::render_links(self.cache.notes_with_tag(tag, notes))
    }

    /// Converge the region of every list in `scope`.
    ///
    /// A list whose owning note cannot be read or written is skipped for
    /// this pass. A list whose membership is empty has its region removed
    /// and is retired from the registry.
    pub async fn reconcile_all(&mut self, scope: ReconcileScope) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        if self.registry.is_empty() {
            tracing::debug!("No tag lists to reconcile");
            return Ok(report);
        }

        let targets: Vec<TagList> = match scope {
            ReconcileScope::AllLists => self.registry.all().to_vec(),
            ReconcileScope::ActiveNoteOnly => match self.host.active_note() {
                Some(active) => self.registry.owned_by(&active).cloned().collect(),
                None => {
                    tracing::debug!("No active note, nothing to reconcile");
                    return Ok(report);
                }
            },
        };
        if targets.is_empty() {
            return Ok(report);
        }

        let mut notes = self.host.list_notes().await?;
        if self.config.sort_members {
            notes.sort();
        }

        for list in &targets {
            let links = self.member_links(&list.tag, &notes);

            let content = match self.host.read_note(&list.owner_note).await {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!(
                        "Skipping list {} {}: cannot read {}: {}",
                        list.tag, list.id, list.owner_note, e
                    );
                    report.skipped += 1;
                    continue;
                }
            };

            let outcome = anchor::converge(&content, &list.tag, list.id, &links);
            let updated = match &outcome {
                Convergence::Unchanged => {
                    report.unchanged += 1;
                    continue;
                }
                Convergence::MarkerMissing => {
                    tracing::debug!(
                        "Markers for {} {} not found in {}, leaving note alone",
                        list.tag, list.id, list.owner_note
                    );
                    report.missing_markers += 1;
                    continue;
                }
                Convergence::Rewritten(updated) | Convergence::Removed(updated) => updated,
            };

            if let Err(e) = self.host.write_note(&list.owner_note, updated).await {
                tracing::error!(
                    "Failed to write list {} {} into {}: {}",
                    list.tag, list.id, list.owner_note, e
                );
                report.skipped += 1;
                continue;
            }

            if matches!(outcome, Convergence::Removed(_)) {
                tracing::info!(
                    "List {} {} in {} has no members, region removed",
                    list.tag, list.id, list.owner_note
                );
                report.retired.push(list.id);
            } else {
                tracing::info!(
                    "Updated list {} {} in {}: {} link(s)",
                    list.tag, list.id, list.owner_note, links.len()
                );
                report.rewritten += 1;
            }
        }

        if !report.retired.is_empty() {
            let retired = report.retired.clone();
            self.registry.remove(|l| retired.contains(&l.id));
            self.save_registry().await?;
        }

        Ok(report)
    }

    // -----------------------------------------------------------------------
    // UI entry points
    // -----------------------------------------------------------------------

    /// Every tag currently carried by some note, for the tag picker.
    pub fn all_tags(&self) -> Vec<String> {
        self.cache.all_tags().into_iter().collect()
    }

    pub fn lists_in_note(&self, id: &str) -> Vec<TagList> {
        self.registry.owned_by(id).cloned().collect()
    }

    /// Lists owned by the active note, for the list-deletion picker.
    pub fn lists_in_active_note(&self) -> Vec<TagList> {
        self.host
            .active_note()
            .map(|id| self.lists_in_note(&id))
            .unwrap_or_default()
    }

    /// The user picked `tag`: insert an empty marker pair into the active
    /// note at `cursor` (byte offset, end of note when `None`), register the
    /// list and fill it.
    pub async fn on_tag_selected(&mut self, tag: &str, cursor: Option<usize>) -> Result<TagList> {
        let tag = normalize_tag(tag);
        if !is_valid_tag(&tag) {
            return Err(TagFlowError::InvalidTag(tag));
        }
        let owner = self.host.active_note().ok_or(TagFlowError::NoActiveNote)?;
        let content = self.host.read_note(&owner).await?;

        let list = self
            .registry
            .create(&tag, &owner, chrono::Utc::now().timestamp_millis());
        let updated = anchor::insert_markers(&content, &list.tag, list.id, cursor);
        if let Err(e) = self.host.write_note(&owner, &updated).await {
            self.registry.remove(|l| l.id == list.id);
            return Err(e.into());
        }
        tracing::info!("Created tag list {} {} in {}", list.tag, list.id, owner);
        self.save_registry().await?;

        let scope = self.config.interactive_scope;
        self.reconcile_all(scope).await?;
        Ok(list)
    }

    /// The user asked to delete a list: remove its region from the owning
    /// note and drop it from the registry.
    pub async fn on_list_delete_requested(&mut self, id: i64) -> Result<()> {
        let list = self
            .registry
            .get(id)
            .cloned()
            .ok_or(TagFlowError::UnknownList(id))?;

        match self.host.read_note(&list.owner_note).await {
            Ok(content) => {
                if let Some(updated) = anchor::remove_region(&content, &list.tag, list.id) {
                    self.host.write_note(&list.owner_note, &updated).await?;
                }
            }
            Err(e) if e.is_not_found() => {
                tracing::warn!("Owner {} of list {} is gone", list.owner_note, id);
            }
            Err(e) => return Err(e.into()),
        }

        self.registry.remove(|l| l.id == id);
        tracing::info!("Deleted tag list {} {} from {}", list.tag, id, list.owner_note);
        self.save_registry().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_host::MemoryHost;

    const ID: i64 = 1700000000000;
    const BLOB: &str = "tagFlowData.json";

    fn start(tag: &str, id: i64) -> String {
        anchor::start_marker(tag, id)
    }

    fn end(tag: &str, id: i64) -> String {
        anchor::end_marker(tag, id)
    }

    fn empty_region(tag: &str, id: i64) -> String {
        format!("{}\n{}\n", start(tag, id), end(tag, id))
    }

    fn blob_for(lists: &[(&str, &str, i64)]) -> String {
        let entries: Vec<String> = lists
            .iter()
            .map(|(tag, note, id)| {
                format!(r#"{{"tag":"{}","notePath":"{}","id":{}}}"#, tag, note, id)
            })
            .collect();
        format!(r#"{{"lists":[{}]}}"#, entries.join(","))
    }

    /// fruit.md carries #apple; basket.md holds an empty #apple list and is
    /// the active note.
    fn fruit_basket() -> MemoryHost {
        MemoryHost::new()
            .with_note("fruit.md", "An apple a day #apple")
            .with_note("basket.md", &format!("# Basket\n{}", empty_region("#apple", ID)))
            .with_blob(BLOB, &blob_for(&[("#apple", "basket.md", ID)]))
            .with_active("basket.md")
    }

    async fn start_flow(host: MemoryHost) -> (Arc<MemoryHost>, TagFlow<MemoryHost>) {
        start_flow_with(host, TagFlowConfig::default()).await
    }

    async fn start_flow_with(
        host: MemoryHost,
        config: TagFlowConfig,
    ) -> (Arc<MemoryHost>, TagFlow<MemoryHost>) {
        let host = Arc::new(host);
        let mut flow = TagFlow::new(host.clone(), config);
        flow.initialize().await.unwrap();
        (host, flow)
    }

    // === End-to-end scenarios ===

    #[tokio::test]
    async fn fills_list_then_picks_up_new_member() {
        let (host, mut flow) = start_flow(fruit_basket()).await;

        flow.reconcile_all(ReconcileScope::AllLists).await.unwrap();
        let basket = host.note("basket.md").unwrap();
        assert!(
            basket.contains(
                "<!--tag-list #apple 1700000000000-->\n[[fruit]]\n<!--end-tag-list #apple 1700000000000-->"
            ),
            "unexpected basket: {:?}",
            basket
        );

        host.put_note("pie.md", "Apple pie #apple");
        flow.handle_event(HostEvent::Created("pie.md".into())).await.unwrap();

        assert_eq!(
            host.note("basket.md").unwrap(),
            format!(
                "# Basket\n{}\n[[fruit]]\n[[pie]]\n{}\n",
                start("#apple", ID),
                end("#apple", ID)
            )
        );
    }

    #[tokio::test]
    async fn deleting_only_member_collapses_region_and_retires_list() {
        let (host, mut flow) = start_flow(fruit_basket()).await;
        flow.reconcile_all(ReconcileScope::AllLists).await.unwrap();

        host.remove_note("fruit.md");
        flow.handle_event(HostEvent::Deleted("fruit.md".into())).await.unwrap();

        assert_eq!(host.note("basket.md").unwrap(), "# Basket\n\n");
        assert!(flow.registry().is_empty());
        assert_eq!(host.blob(BLOB).unwrap(), r#"{"lists":[]}"#);
    }

    // === Idempotence ===

    #[tokio::test]
    async fn repeated_reconcile_writes_nothing() {
        let (host, mut flow) = start_flow(fruit_basket()).await;
        let first = flow.reconcile_all(ReconcileScope::AllLists).await.unwrap();
        assert_eq!(first.rewritten, 1);

        host.clear_writes();
        let second = flow.reconcile_all(ReconcileScope::AllLists).await.unwrap();

        assert_eq!(second.unchanged, 1);
        assert_eq!(second.rewritten, 0);
        assert!(host.writes().is_empty(), "second pass must not write");
    }

    #[tokio::test]
    async fn own_write_does_not_trigger_another_pass() {
        let (host, mut flow) = start_flow(fruit_basket()).await;
        flow.reconcile_all(ReconcileScope::AllLists).await.unwrap();
        host.clear_writes();

        // The host reports our own write back to us.
        flow.handle_event(HostEvent::Modified("basket.md".into())).await.unwrap();

        assert!(host.writes().is_empty());
        assert_eq!(flow.cache().get("basket.md").map(|t| t.len()), Some(0));
    }

    #[tokio::test]
    async fn edit_without_tag_change_does_not_reconcile() {
        let (host, mut flow) = start_flow(fruit_basket()).await;
        host.put_note("fruit.md", "Still about #apple, longer now");

        flow.handle_event(HostEvent::Modified("fruit.md".into())).await.unwrap();

        assert!(host.writes().is_empty());
    }

    // === Rename / delete lifecycle ===

    #[tokio::test]
    async fn renaming_owner_moves_lists() {
        let (host, mut flow) = start_flow(fruit_basket()).await;

        host.rename_note("basket.md", "crate.md");
        host.set_active(Some("crate.md"));
        flow.handle_event(HostEvent::Renamed {
            id: "crate.md".into(),
            old_id: "basket.md".into(),
        })
        .await
        .unwrap();

        assert_eq!(flow.registry().all()[0].owner_note, "crate.md");
        assert!(flow.cache().get("basket.md").is_none());
        assert!(flow.cache().get("crate.md").is_some());
        assert!(host.note("crate.md").unwrap().contains("[[fruit]]"));
        assert!(host.blob(BLOB).unwrap().contains(r#""notePath":"crate.md""#));
    }

    #[tokio::test]
    async fn renaming_member_relinks_it() {
        let (host, mut flow) = start_flow(fruit_basket()).await;
        flow.reconcile_all(ReconcileScope::AllLists).await.unwrap();

        host.rename_note("fruit.md", "apples.md");
        flow.handle_event(HostEvent::Renamed {
            id: "apples.md".into(),
            old_id: "fruit.md".into(),
        })
        .await
        .unwrap();

        let basket = host.note("basket.md").unwrap();
        assert!(basket.contains("\n[[apples]]\n"), "got {:?}", basket);
        assert!(!basket.contains("[[fruit]]"));
    }

    #[tokio::test]
    async fn renaming_a_folder_moves_owners_and_members() {
        let host = MemoryHost::new()
            .with_note("Recipes/pie.md", "#apple")
            .with_note("Recipes/index.md", &empty_region("#apple", ID))
            .with_note("Recipes2/other.md", "#apple")
            .with_blob(BLOB, &blob_for(&[("#apple", "Recipes/index.md", ID)]));
        let (host, mut flow) = start_flow(host).await;

        host.rename_note("Recipes/pie.md", "Cooking/pie.md");
        host.rename_note("Recipes/index.md", "Cooking/index.md");
        host.set_active(Some("Cooking/index.md"));
        flow.handle_event(HostEvent::FolderRenamed {
            path: "Cooking".into(),
            old_path: "Recipes".into(),
        })
        .await
        .unwrap();

        assert_eq!(flow.registry().all()[0].owner_note, "Cooking/index.md");
        assert!(flow.cache().get("Cooking/pie.md").is_some());
        assert!(flow.cache().get("Recipes/pie.md").is_none());
        assert!(
            flow.cache().get("Recipes2/other.md").is_some(),
            "sibling folder sharing the prefix must not move"
        );
        assert!(host
            .note("Cooking/index.md")
            .unwrap()
            .contains("[[pie]]\n[[other]]"));
        assert!(host.blob(BLOB).unwrap().contains(r#""notePath":"Cooking/index.md""#));
    }

    #[tokio::test]
    async fn deleting_owner_drops_its_lists() {
        let (host, mut flow) = start_flow(fruit_basket()).await;

        host.remove_note("basket.md");
        flow.handle_event(HostEvent::Deleted("basket.md".into())).await.unwrap();

        assert!(flow.registry().is_empty());
        assert!(flow.cache().get("basket.md").is_none());
        assert!(host.writes().is_empty());
    }

    // === Scope ===

    #[tokio::test]
    async fn interactive_pass_only_touches_active_note() {
        let host = fruit_basket()
            .with_note("shelf.md", &empty_region("#apple", ID + 1))
            .with_blob(
                BLOB,
                &blob_for(&[("#apple", "basket.md", ID), ("#apple", "shelf.md", ID + 1)]),
            );
        let (host, mut flow) = start_flow(host).await;

        flow.handle_event(HostEvent::ActiveViewChanged).await.unwrap();
        assert_eq!(host.writes(), vec!["basket.md"]);

        flow.handle_event(HostEvent::SweepTick).await.unwrap();
        assert_eq!(host.writes(), vec!["basket.md", "shelf.md"]);
    }

    #[tokio::test]
    async fn no_active_note_means_no_interactive_pass() {
        let (host, mut flow) = start_flow(fruit_basket()).await;
        host.set_active(None);

        let report = flow
            .reconcile_all(ReconcileScope::ActiveNoteOnly)
            .await
            .unwrap();

        assert_eq!(report, ReconcileReport::default());
        assert!(host.writes().is_empty());
    }

    #[tokio::test]
    async fn hidden_graph_view_is_ignored() {
        let (host, mut flow) = start_flow(fruit_basket()).await;
        flow.handle_event(HostEvent::LayoutChanged {
            graph_view_visible: false,
        })
        .await
        .unwrap();
        assert!(host.writes().is_empty());

        flow.handle_event(HostEvent::LayoutChanged {
            graph_view_visible: true,
        })
        .await
        .unwrap();
        assert_eq!(host.writes(), vec!["basket.md"]);
    }

    // === Failure containment ===

    #[tokio::test]
    async fn unreadable_owner_is_skipped() {
        let host = fruit_basket().with_blob(
            BLOB,
            &blob_for(&[("#apple", "gone.md", ID + 1), ("#apple", "basket.md", ID)]),
        );
        let (host, mut flow) = start_flow(host).await;

        let report = flow.reconcile_all(ReconcileScope::AllLists).await.unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.rewritten, 1);
        assert_eq!(flow.registry().len(), 2, "skipped lists stay registered");
        assert!(host.note("basket.md").unwrap().contains("[[fruit]]"));
    }

    #[tokio::test]
    async fn removed_markers_are_not_recreated() {
        let host = fruit_basket().with_note("basket.md", "markers deleted by hand");
        let (host, mut flow) = start_flow(host).await;

        let report = flow.reconcile_all(ReconcileScope::AllLists).await.unwrap();

        assert_eq!(report.missing_markers, 1);
        assert_eq!(host.note("basket.md").unwrap(), "markers deleted by hand");
        assert_eq!(flow.registry().len(), 1);
    }

    #[tokio::test]
    async fn malformed_blob_starts_empty() {
        let host = fruit_basket().with_blob(BLOB, "]]]");
        let (_host, flow) = start_flow(host).await;
        assert!(flow.registry().is_empty());
        assert_eq!(flow.cache().len(), 2);
    }

    #[tokio::test]
    async fn registry_blob_events_are_ignored() {
        let (host, mut flow) = start_flow(fruit_basket()).await;
        host.put_note("tagFlowData.md", "#apple");

        flow.handle_event(HostEvent::Modified("tagFlowData.md".into()))
            .await
            .unwrap();

        assert!(flow.cache().get("tagFlowData.md").is_none());
    }

    // === Membership ordering ===

    #[tokio::test]
    async fn members_follow_host_order_unless_sorted() {
        let host = MemoryHost::new()
            .with_note("zebra.md", "#apple")
            .with_note("basket.md", &empty_region("#apple", ID))
            .with_note("aardvark.md", "#apple")
            .with_blob(BLOB, &blob_for(&[("#apple", "basket.md", ID)]));

        let (host_a, mut unsorted) = start_flow(host).await;
        unsorted.reconcile_all(ReconcileScope::AllLists).await.unwrap();
        assert!(host_a
            .note("basket.md")
            .unwrap()
            .contains("[[zebra]]\n[[aardvark]]"));

        let host = MemoryHost::new()
            .with_note("zebra.md", "#apple")
            .with_note("basket.md", &empty_region("#apple", ID))
            .with_note("aardvark.md", "#apple")
            .with_blob(BLOB, &blob_for(&[("#apple", "basket.md", ID)]));
        let config = TagFlowConfig {
            sort_members: true,
            ..TagFlowConfig::default()
        };
        let (host_b, mut sorted) = start_flow_with(host, config).await;
        sorted.reconcile_all(ReconcileScope::AllLists).await.unwrap();
        assert!(host_b
            .note("basket.md")
            .unwrap()
            .contains("[[aardvark]]\n[[zebra]]"));
    }

    // === Cache rebuild on metadata resolution ===

    #[tokio::test]
    async fn metadata_resolved_rebuilds_cache() {
        let (host, mut flow) = start_flow(fruit_basket()).await;
        // Arrives without a create notification.
        host.put_note("pie.md", "#apple");

        flow.handle_event(HostEvent::MetadataResolved).await.unwrap();

        assert!(flow.cache().has_tag("pie.md", "#apple"));
        assert!(host.note("basket.md").unwrap().contains("[[fruit]]\n[[pie]]"));
    }

    // === UI entry points ===

    #[tokio::test]
    async fn selecting_a_tag_creates_and_fills_a_list() {
        let host = MemoryHost::new()
            .with_note("fruit.md", "#apple")
            .with_note("basket.md", "Basket\n")
            .with_active("basket.md");
        let (host, mut flow) = start_flow(host).await;
        assert_eq!(flow.all_tags(), vec!["#apple"]);

        let list = flow.on_tag_selected("apple", None).await.unwrap();

        assert_eq!(list.tag, "#apple");
        assert_eq!(list.owner_note, "basket.md");
        assert_eq!(
            host.note("basket.md").unwrap(),
            format!(
                "Basket\n{}\n[[fruit]]\n{}\n",
                start("#apple", list.id),
                end("#apple", list.id)
            )
        );
        assert_eq!(flow.lists_in_active_note(), vec![list.clone()]);
        assert!(host.blob(BLOB).unwrap().contains(&list.id.to_string()));
    }

    #[tokio::test]
    async fn selecting_without_active_note_fails() {
        let host = MemoryHost::new().with_note("fruit.md", "#apple");
        let (_host, mut flow) = start_flow(host).await;

        let err = flow.on_tag_selected("#apple", None).await.unwrap_err();

        assert!(matches!(err, TagFlowError::NoActiveNote));
        assert!(flow.registry().is_empty());
    }

    #[tokio::test]
    async fn selecting_an_empty_tag_fails() {
        let (_host, mut flow) = start_flow(fruit_basket()).await;
        let err = flow.on_tag_selected("#", None).await.unwrap_err();
        assert!(matches!(err, TagFlowError::InvalidTag(_)));
    }

    #[tokio::test]
    async fn selecting_a_malformed_tag_fails_without_touching_the_note() {
        let (host, mut flow) = start_flow(fruit_basket()).await;

        for tag in ["apple pie", "a-->b", "#apple/pie"] {
            let err = flow.on_tag_selected(tag, None).await.unwrap_err();
            assert!(matches!(err, TagFlowError::InvalidTag(_)), "{:?} accepted", tag);
        }

        assert_eq!(flow.registry().len(), 1);
        assert!(host.writes().is_empty());
    }

    #[tokio::test]
    async fn deleting_a_list_removes_region_and_entry() {
        let (host, mut flow) = start_flow(fruit_basket()).await;
        flow.reconcile_all(ReconcileScope::AllLists).await.unwrap();

        flow.on_list_delete_requested(ID).await.unwrap();

        assert_eq!(host.note("basket.md").unwrap(), "# Basket\n\n");
        assert!(flow.registry().is_empty());
        assert_eq!(host.blob(BLOB).unwrap(), r#"{"lists":[]}"#);
    }

    #[tokio::test]
    async fn deleting_unknown_list_fails() {
        let (_host, mut flow) = start_flow(fruit_basket()).await;
        let err = flow.on_list_delete_requested(42).await.unwrap_err();
        assert!(matches!(err, TagFlowError::UnknownList(42)));
    }

    #[tokio::test]
    async fn shutdown_persists_registry() {
        let host = MemoryHost::new()
            .with_note("basket.md", "")
            .with_active("basket.md");
        let (host, mut flow) = start_flow(host).await;
        flow.registry.create("#apple", "basket.md", ID);

        flow.shutdown().await.unwrap();

        assert_eq!(host.blob(BLOB).unwrap(), blob_for(&[("#apple", "basket.md", ID)]));
    }
}
