use std::io;
use std::time::Duration;

use crate::geometry::Geometry;
use crate::layout::LayoutError;

/// Errors from channel setup and the read/write handshake.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("invalid channel name `{name}`: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("channel `{name}` is already bound by live process {pid}")]
    NameInUse { name: String, pid: u32 },

    #[error("sink is already bound to `{0}`")]
    AlreadyBound(String),

    #[error("sink has not been bound")]
    NotBound,

    #[error("channel `{name}` not found after waiting {waited:?}")]
    ChannelNotFound { name: String, waited: Duration },

    #[error("channel `{name}` carries {found}, expected {expected}")]
    GeometryMismatch {
        name: String,
        expected: Geometry,
        found: Geometry,
    },

    #[error("channel `{0}` has no free reader entries")]
    TooManyReaders(String),

    #[error("channel `{0}` was closed by its sink")]
    ChannelClosed(String),

    #[error("interrupted")]
    Interrupted,

    #[error("channel `{name}` has a malformed segment: {source}")]
    Layout {
        name: String,
        #[source]
        source: LayoutError,
    },

    #[error("{context} for channel `{name}`: {source}")]
    Io {
        name: String,
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

impl NodeError {
    pub(crate) fn io(name: &str, context: &'static str, source: io::Error) -> Self {
        Self::Io {
            name: name.to_string(),
            context,
            source,
        }
    }

    pub(crate) fn layout(name: &str, source: LayoutError) -> Self {
        Self::Layout {
            name: name.to_string(),
            source,
        }
    }

    /// Whether the error happened while setting a channel up, as opposed to
    /// during the per-sample handshake.
    pub fn is_setup_error(&self) -> bool {
        !matches!(self, Self::ChannelClosed(_) | Self::Interrupted)
    }

    /// The upstream sink went away; no more samples will arrive.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::ChannelClosed(_))
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}
