use std::io;
use std::path::PathBuf;

use framepipe_node::NodeError;

/// Errors that end a stage.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Node(#[from] NodeError),

    #[error("cannot use {}: {source}", .resource.display())]
    Payload {
        resource: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid stage configuration: {0}")]
    Config(String),

    #[error("failed to install signal handlers: {0}")]
    Signal(#[source] io::Error),
}

impl StageError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
