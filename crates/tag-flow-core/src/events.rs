use crate::host::NoteId;

/// Notifications delivered by the host, plus the periodic sweep tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Created(NoteId),
    Modified(NoteId),
    Renamed { id: NoteId, old_id: NoteId },
    /// A folder moved; every note under `old_path` now lives under `path`.
    FolderRenamed { path: String, old_path: String },
    Deleted(NoteId),
    /// The host finished its initial metadata resolution pass.
    MetadataResolved,
    ActiveViewChanged,
    LayoutChanged { graph_view_visible: bool },
    SweepTick,
}

impl HostEvent {
    /// The note an event is about, if any.
    pub fn note(&self) -> Option<&str> {
        match self {
            HostEvent::Created(id)
            | HostEvent::Modified(id)
            | HostEvent::Deleted(id)
            | HostEvent::Renamed { id, .. } => Some(id.as_str()),
            _ => None,
        }
    }
}

/// Which scope a reconcile step runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeChoice {
    /// The configured interactive scope.
    Interactive,
    AllLists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Re-extract the event note's tags; reconcile only if they changed.
    RefreshNote,
    /// Move the cache entry and list ownership to the new id.
    RenameNote,
    /// Re-key every note under the old folder, cache and lists alike.
    RenameFolder,
    /// Drop the cache entry and every list the note owned.
    ForgetNote,
    RebuildCache,
    Reconcile(ScopeChoice),
}

/// Event-to-action table. Steps run in order.
pub fn actions_for(event: &HostEvent) -> &'static [Action] {
    use Action::*;
    match event {
        HostEvent::Created(_) | HostEvent::Modified(_) => &[RefreshNote],
        HostEvent::Renamed { .. } => &[RenameNote, Reconcile(ScopeChoice::Interactive)],
        HostEvent::FolderRenamed { .. } => &[RenameFolder, Reconcile(ScopeChoice::Interactive)],
        HostEvent::Deleted(_) => &[ForgetNote, Reconcile(ScopeChoice::Interactive)],
        HostEvent::MetadataResolved => &[RebuildCache, Reconcile(ScopeChoice::Interactive)],
        HostEvent::ActiveViewChanged => &[Reconcile(ScopeChoice::Interactive)],
        HostEvent::LayoutChanged {
            graph_view_visible: true,
        } => &[Reconcile(ScopeChoice::Interactive)],
        HostEvent::LayoutChanged {
            graph_view_visible: false,
        } => &[],
        HostEvent::SweepTick => &[Reconcile(ScopeChoice::AllLists)],
    }
}
