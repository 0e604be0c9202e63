use std::io;
use std::path::PathBuf;

/// The primary error type for all operations in the `simfetch` crate.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The upload endpoint could not bind its port, typically because another
    /// receiver is still holding it.
    #[error("could not bind upload endpoint on port {port}: {source}")]
    Bind { port: u16, source: io::Error },

    /// The transfer resolved without a received file: the upload either never
    /// arrived or could not be persisted.
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// The bundle could not be opened or read as a tar archive.
    #[error("could not read archive '{}': {}", path.display(), source)]
    ArchiveOpen { path: PathBuf, source: io::Error },

    /// A member could not be written while unpacking a bundle.
    #[error("could not extract '{}': {}", path.display(), source)]
    Extraction { path: PathBuf, source: io::Error },

    /// An archive member resolves outside the destination directory.
    #[error("archive member '{}' escapes the destination directory", .0.display())]
    PathEscape(PathBuf),

    /// The extraction destination already exists and overwriting was not
    /// requested.
    #[error("destination '{}' already exists (pass --force to overwrite)", .0.display())]
    DestinationExists(PathBuf),

    /// A file the finalize step relies on is absent from the extracted tree.
    #[error("expected file '{}' is missing from the extracted bundle", .0.display())]
    MissingFile(PathBuf),

    /// The remote service reported a failure or could not be reached.
    #[error("remote action failed: {0}")]
    RemoteAction(String),

    /// An I/O error outside of archive member handling. Includes the path
    /// where the error happened.
    #[error("I/O error on path '{}': {}", path.display(), source)]
    Io { path: PathBuf, source: io::Error },
}

// Generic IO error conversion that doesn't require a path
impl From<io::Error> for FetchError {
    fn from(err: io::Error) -> Self {
        FetchError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}
