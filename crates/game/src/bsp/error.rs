use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read map {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported map version {0}")]
    UnsupportedVersion(i32),
    #[error("malformed map file: {0}")]
    MalformedFile(String),
}

impl LoadError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedFile(reason.into())
    }
}
