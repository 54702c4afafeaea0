use thiserror::Error;

/// Failures surfaced by catalog and settings collaborators.
#[derive(Debug, Error)]
pub enum Error {
    /// The configured photo library is missing or unreadable.
    #[error("invalid photo library: {0}")]
    BadLibrary(String),

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// YAML/serde configuration error.
    #[error(transparent)]
    Config(#[from] serde_yaml::Error),

    /// Filesystem watcher error.
    #[error(transparent)]
    Watch(#[from] notify::Error),

    /// The image header could not be probed for dimensions.
    #[error("unreadable image dimensions: {0}")]
    BadImage(String),
}
