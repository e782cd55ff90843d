use std::sync::Arc;
use thiserror::Error;

use crate::hash::Hash;

pub type Result<T> = std::result::Result<T, GroveError>;

/// Errors surfaced by the mount core.
///
/// The enum is `Clone` so a single in-flight inode load can hand the same
/// failure to every caller waiting on it.
#[derive(Error, Debug, Clone)]
pub enum GroveError {
    #[error("commit {0} not found")]
    CommitNotFound(Hash),

    #[error("{0}: No such file or directory")]
    NotFound(String),

    #[error("{0}: Not a directory")]
    NotADirectory(String),

    #[error("{0}: Is a directory")]
    IsADirectory(String),

    #[error("{0}: File exists")]
    AlreadyExists(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}: symlink target points outside the mount")]
    CrossDevice(String),

    #[error("{0}: absolute symlink targets are not resolved")]
    PermissionDenied(String),

    #[error("{0}: Too many levels of symbolic links")]
    TooManyLinks(String),

    #[error("mount failed: {0}")]
    MountFailure(String),

    #[error("FUSE channel error: {0}")]
    Channel(String),

    #[error("invalid mount state: {0}")]
    InvalidState(String),

    #[error("Backing store error: {0}")]
    Store(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),
}

impl GroveError {
    /// The errno reported to the kernel for this failure.
    pub fn errno(&self) -> i32 {
        match self {
            GroveError::CommitNotFound(_) | GroveError::NotFound(_) => libc::ENOENT,
            GroveError::NotADirectory(_) => libc::ENOTDIR,
            GroveError::IsADirectory(_) => libc::EISDIR,
            GroveError::AlreadyExists(_) => libc::EEXIST,
            GroveError::InvalidArgument(_) => libc::EINVAL,
            GroveError::CrossDevice(_) => libc::EXDEV,
            GroveError::PermissionDenied(_) => libc::EPERM,
            GroveError::TooManyLinks(_) => libc::ELOOP,
            GroveError::MountFailure(_) | GroveError::Channel(_) => libc::EIO,
            GroveError::InvalidState(_) => libc::EBUSY,
            GroveError::Store(_) | GroveError::Config(_) => libc::EIO,
            GroveError::Io(e) => io_error_to_libc(e),
        }
    }
}

impl From<std::io::Error> for GroveError {
    fn from(err: std::io::Error) -> Self {
        GroveError::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for GroveError {
    fn from(err: serde_json::Error) -> Self {
        GroveError::Config(err.to_string())
    }
}

/// Map std::io::Error to the closest libc error code.
pub(crate) fn io_error_to_libc(e: &std::io::Error) -> i32 {
    if let Some(code) = e.raw_os_error() {
        return code;
    }

    match e.kind() {
        std::io::ErrorKind::NotFound => libc::ENOENT,
        std::io::ErrorKind::PermissionDenied => libc::EACCES,
        std::io::ErrorKind::AlreadyExists => libc::EEXIST,
        std::io::ErrorKind::InvalidInput => libc::EINVAL,
        std::io::ErrorKind::InvalidData => libc::EINVAL,
        std::io::ErrorKind::TimedOut => libc::ETIMEDOUT,
        std::io::ErrorKind::Interrupted => libc::EINTR,
        std::io::ErrorKind::WouldBlock => libc::EAGAIN,
        std::io::ErrorKind::Unsupported => libc::ENOTSUP,
        std::io::ErrorKind::NotConnected => libc::ENOTCONN,
        _ => libc::EIO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping_for_symlink_failures() {
        assert_eq!(GroveError::TooManyLinks("a".into()).errno(), libc::ELOOP);
        assert_eq!(GroveError::CrossDevice("a".into()).errno(), libc::EXDEV);
        assert_eq!(GroveError::PermissionDenied("a".into()).errno(), libc::EPERM);
        assert_eq!(GroveError::NotFound("a".into()).errno(), libc::ENOENT);
    }

    #[test]
    fn test_io_error_prefers_raw_os_error() {
        let err: GroveError = std::io::Error::from_raw_os_error(libc::ENOSPC).into();
        assert_eq!(err.errno(), libc::ENOSPC);

        let err: GroveError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.errno(), libc::ENOENT);
    }
}
