use thiserror::Error;

/// Error kinds surfaced by the storage engine, one per `spec.md` §7 kind.
///
/// Each variant carries a stable integer code via [`StorageError::code`] so
/// collaborators (an HTTP layer, a CLI) can map it without matching on the
/// variant shape.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bad parameter: {reason}")]
    BadParam { reason: String },

    #[error("not found: {path}")]
    NotExist { path: String },

    #[error("already exists: {path}")]
    Exists { path: String },

    #[error("permission denied: {reason}")]
    Permission { reason: String },

    #[error("unsupported media: {reason}")]
    UnsupportedMedia { reason: String },

    #[error("bad thumbnail size: {size}")]
    BadThumbnail { size: String },

    #[error("volume id predates the epoch floor: {id}")]
    BadTimestamp { id: u64 },

    #[error("resource busy: {resource}")]
    Busy { resource: String },

    #[error("storage full: {free} bytes free, {reserved} reserved")]
    StorageFull { free: u64, reserved: u64 },

    #[error("io error: {source}")]
    Io {
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    /// Stable integer code for this error kind, independent of the variant's
    /// field contents. Mirrors the `code` field the spec requires on HTTP
    /// error envelopes.
    pub fn code(&self) -> i32 {
        match self {
            StorageError::BadParam { .. } => 1,
            StorageError::NotExist { .. } => 2,
            StorageError::Exists { .. } => 3,
            StorageError::Permission { .. } => 4,
            StorageError::UnsupportedMedia { .. } => 5,
            StorageError::BadThumbnail { .. } => 6,
            StorageError::BadTimestamp { .. } => 7,
            StorageError::Busy { .. } => 8,
            StorageError::StorageFull { .. } => 9,
            StorageError::Io { .. } => 10,
        }
    }

    pub fn not_exist(path: impl Into<String>) -> Self {
        StorageError::NotExist { path: path.into() }
    }

    pub fn exists(path: impl Into<String>) -> Self {
        StorageError::Exists { path: path.into() }
    }

    pub fn bad_param(reason: impl Into<String>) -> Self {
        StorageError::BadParam {
            reason: reason.into(),
        }
    }

    pub fn bad_thumbnail(size: impl Into<String>) -> Self {
        StorageError::BadThumbnail { size: size.into() }
    }

    pub fn unsupported_media(reason: impl Into<String>) -> Self {
        StorageError::UnsupportedMedia {
            reason: reason.into(),
        }
    }

    pub fn busy(resource: impl Into<String>) -> Self {
        StorageError::Busy {
            resource: resource.into(),
        }
    }

    pub fn storage_full(free: u64, reserved: u64) -> Self {
        StorageError::StorageFull { free, reserved }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotExist {
                path: source.to_string(),
            },
            std::io::ErrorKind::PermissionDenied => StorageError::Permission {
                reason: source.to_string(),
            },
            _ => StorageError::Io { source },
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
