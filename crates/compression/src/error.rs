use thiserror::Error;

/// Errors produced while gzip-streaming an index snapshot.
#[derive(Debug, Error)]
pub enum CompressionError {
    /// The gzip backend produced an IO error while reading from the source
    /// or writing to the sink.
    #[error("IO error while gzip-streaming: {source}")]
    Io {
        #[source]
        source: std::io::Error,
    },
}

impl CompressionError {
    pub fn io(source: std::io::Error) -> Self {
        CompressionError::Io { source }
    }
}

impl From<std::io::Error> for CompressionError {
    fn from(source: std::io::Error) -> Self {
        CompressionError::Io { source }
    }
}

impl From<CompressionError> for common::StorageError {
    fn from(value: CompressionError) -> Self {
        match value {
            CompressionError::Io { source } => common::StorageError::from(source),
        }
    }
}
