use thiserror::Error;

/// Failure reported by a host collaborator (note storage or blob storage).
#[derive(Debug, Error)]
pub enum HostError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("host i/o failed: {0}")]
    Io(String),
}

impl HostError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, HostError::NotFound(_))
    }
}

#[derive(Debug, Error)]
pub enum TagFlowError {
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("list registry blob is malformed: {0}")]
    Blob(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
    #[error("cannot read configuration: {0}")]
    ConfigRead(#[from] std::io::Error),
    #[error("no tag list with id {0}")]
    UnknownList(i64),
    #[error("not a usable tag: {0:?}")]
    InvalidTag(String),
    #[error("no active note to attach a tag list to")]
    NoActiveNote,
}

pub type Result<T> = std::result::Result<T, TagFlowError>;
