use std::path::PathBuf;

/// Errors raised while loading a prompt file.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Cannot read prompt file {}: {source}", .path.display())]
    SourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
