//! Error type shared by every part of the protocol engine.

use std::io;
use std::path::PathBuf;

use crate::ack::Severity;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid combination of Config fields, raised before any I/O
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A line or byte does not match any header or ack shape
    #[error("protocol error: {0}")]
    ProtocolSyntax(String),

    /// Both sides disagree about the position in the stream
    #[error("protocol desync: {0}")]
    Desync(String),

    #[error("{}: {source}", path.display())]
    Filesystem { path: PathBuf, source: io::Error },

    /// The remote side sent a warning or fatal acknowledgment
    #[error("remote {severity}: {message}")]
    Peer { severity: Severity, message: String },

    #[error("{}: is a directory (recursive mode not enabled)", path.display())]
    RecursionDisabled { path: PathBuf },

    #[error("stream error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn fs(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Whether the peer can still be told about this failure.
    ///
    /// A broken stream cannot carry a reply, and a peer that already reported
    /// an error is not waiting for one.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, Error::Io(_) | Error::Peer { .. })
    }
}
