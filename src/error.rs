//! Crate-wide error type shared by every subsystem.

use std::fmt;

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while ingesting kernel events, resolving paths, or
/// serving the index.
#[derive(Debug)]
pub enum Error {
    /// Failure while reading or parsing `/proc/self/mountinfo`.
    Mount(String),
    /// Failure while decoding a netlink message or talking to the kernel socket.
    Netlink(String),
    /// Failure originating in the index engine (`tantivy`).
    Index(tantivy::TantivyError),
    /// Failure loading or parsing the on-disk configuration file.
    Config(String),
    /// Wrapped `std::io::Error`, for the many leaf operations (`lstat`, `read_dir`, ...)
    /// that don't warrant their own variant.
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Mount(msg) => write!(f, "mount table error: {msg}"),
            Error::Netlink(msg) => write!(f, "netlink error: {msg}"),
            Error::Index(err) => write!(f, "index error: {err}"),
            Error::Config(msg) => write!(f, "configuration error: {msg}"),
            Error::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Index(err) => Some(err),
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<tantivy::TantivyError> for Error {
    fn from(err: tantivy::TantivyError) -> Self {
        Error::Index(err)
    }
}
