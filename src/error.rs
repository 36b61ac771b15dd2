use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::probe::Stage;

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("failed to allocate {bytes} bytes for a file handle")]
    AllocationFailed { bytes: usize },

    #[error("handle payload of {len} bytes exceeds the {max} byte limit")]
    Oversized { len: usize, max: u32 },
}

/// Failure of `name_to_handle_at`.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The buffer was too small; the kernel asked for `required` payload bytes.
    #[error("name_to_handle_at: handle needs {required} bytes")]
    TooSmall { required: u32 },

    #[error("name_to_handle_at: {0}")]
    Unsupported(io::Error),

    #[error("name_to_handle_at: {0}")]
    Lookup(io::Error),

    #[error(transparent)]
    Resource(#[from] ResourceError),
}

impl EncodeError {
    /// Classify the errno left by a failed call. `required` is the size the
    /// kernel wrote back into the handle header after `offered` was refused.
    pub(crate) fn from_os(error: io::Error, offered: u32, required: u32) -> Self {
        match error.raw_os_error() {
            // a filesystem that cannot encode this file also reports EOVERFLOW
            Some(libc::EOVERFLOW) if required <= offered => EncodeError::Unsupported(error),
            Some(libc::EOVERFLOW) => EncodeError::TooSmall { required },
            Some(libc::EOPNOTSUPP) | Some(libc::ENOSYS) => EncodeError::Unsupported(error),
            _ => EncodeError::Lookup(error),
        }
    }
}

/// Failure of `open_by_handle_at`, or of locating the mount it needs.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("open_by_handle_at: {0}")]
    StaleHandle(io::Error),

    #[error("open_by_handle_at: {0}")]
    PermissionDenied(io::Error),

    #[error("open_by_handle_at: {0}")]
    Unsupported(io::Error),

    #[error("open_by_handle_at: {0}")]
    Other(io::Error),

    /// The mount table could not be read.
    #[error("{}: {}", crate::mountinfo::MOUNTINFO, .0)]
    MountTable(io::Error),

    /// The mount point of the handle's volume could not be opened.
    #[error("{}: {}", .path.display(), .error)]
    Mount { path: PathBuf, error: io::Error },

    #[error(transparent)]
    Resource(#[from] ResourceError),
}

impl ResolveError {
    pub(crate) fn from_os(error: io::Error) -> Self {
        match error.raw_os_error() {
            Some(libc::ESTALE) => ResolveError::StaleHandle(error),
            Some(libc::EPERM) | Some(libc::EACCES) => ResolveError::PermissionDenied(error),
            Some(libc::EOPNOTSUPP) | Some(libc::ENOSYS) => ResolveError::Unsupported(error),
            _ => ResolveError::Other(error),
        }
    }

    pub(crate) fn stale() -> Self {
        ResolveError::StaleHandle(io::Error::from_raw_os_error(libc::ESTALE))
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("fstat: {0}")]
    Identity(io::Error),

    #[error("close: {0}")]
    Close(io::Error),
}

impl ProbeError {
    /// The stage the probe had reached when it failed.
    pub fn stage(&self) -> Stage {
        match self {
            ProbeError::Encode(_) => Stage::Start,
            ProbeError::Resolve(_) => Stage::Encoded,
            ProbeError::Identity(_) | ProbeError::Close(_) => Stage::Resolved,
        }
    }
}
