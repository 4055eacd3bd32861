use crate::vault::{note_id_under, relative_path_under};
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use tag_flow_core::{HostEvent, NoteId};
use tokio::sync::mpsc;

/// Translate one filesystem notification into host events for the notes it
/// touches. Paths outside the vault, hidden paths and non-markdown files
/// are dropped.
///
/// A rename reported as a single from/to pair becomes `Renamed`, or
/// `FolderRenamed` when neither side is a note. When only
/// the destination half is reported the note is treated as modified; the
/// source half alone is ignored, since members are always resolved against
/// the current note listing.
pub fn map_event(root: &Path, event: &Event) -> Vec<HostEvent> {
    match event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let [from, to] = event.paths.as_slice() else {
                return Vec::new();
            };
            match (note_id_under(root, from), note_id_under(root, to)) {
                (Some(old_id), Some(id)) => vec![HostEvent::Renamed { id, old_id }],
                (Some(old_id), None) => vec![HostEvent::Deleted(old_id)],
                (None, Some(id)) => vec![HostEvent::Created(id)],
                (None, None) => folder_rename(root, from, to).into_iter().collect(),
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Vec::new(),
        EventKind::Create(_) => note_ids(root, event).map(HostEvent::Created).collect(),
        EventKind::Modify(_) => note_ids(root, event).map(HostEvent::Modified).collect(),
        EventKind::Remove(_) => note_ids(root, event).map(HostEvent::Deleted).collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

/// A rename where neither side is a note is taken as a folder move. Moving
/// a plain file this way is harmless: no note id lives under its path.
fn folder_rename(root: &Path, from: &Path, to: &Path) -> Option<HostEvent> {
    Some(HostEvent::FolderRenamed {
        old_path: relative_path_under(root, from)?,
        path: relative_path_under(root, to)?,
    })
}

fn note_ids<'a>(root: &'a Path, event: &'a Event) -> impl Iterator<Item = NoteId> + 'a {
    event.paths.iter().filter_map(move |p| note_id_under(root, p))
}

/// Watch `root` recursively, forwarding mapped events into `tx`. The
/// watcher stops when the returned handle is dropped.
pub fn spawn_watcher(
    root: &Path,
    tx: mpsc::Sender<HostEvent>,
) -> notify::Result<RecommendedWatcher> {
    let watch_root = root.to_path_buf();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for host_event in map_event(&watch_root, &event) {
                    if tx.blocking_send(host_event).is_err() {
                        tracing::debug!("Event queue closed, dropping watcher event");
                        return;
                    }
                }
            }
            Err(e) => tracing::warn!("Watcher error: {}", e),
        },
        Config::default(),
    )?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    tracing::info!("Watching {} for note changes", root.display());
    Ok(watcher)
}
