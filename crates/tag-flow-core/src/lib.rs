//! Live tag lists for a workspace of markdown notes.
//!
//! A tag list is a marker-delimited region inside an owning note that holds
//! one `[[link]]` per note carrying a given tag. [`TagFlow`] keeps every
//! registered region in line with the notes' current tags as host events
//! arrive. Storage is reached only through the [`NoteHost`] and
//! [`BlobStore`] traits.

pub mod anchor;
pub mod config;
pub mod error;
pub mod events;
pub mod host;
pub mod list_registry;
pub mod memory_host;
pub mod reconciler;
pub mod tag_cache;
pub mod tag_extractor;
pub mod worker;

pub use config::{ReconcileScope, TagFlowConfig};
pub use error::{HostError, Result, TagFlowError};
pub use events::HostEvent;
pub use host::{BlobStore, NoteHost, NoteId, TagMetadata};
pub use list_registry::{ListRegistry, TagList};
pub use reconciler::{ReconcileReport, TagFlow};
pub use worker::run_worker;
