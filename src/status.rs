use std::process::ExitCode;

use crate::error::EncodeError;
use crate::error::ProbeError;
use crate::error::ResolveError;

/// Process exit status, one per failure kind.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Success = 0,
    Failure = 1,
    /// Same code clap exits with on a bad command line.
    Usage = 2,
    TooSmall = 3,
    Unsupported = 4,
    Lookup = 5,
    StaleHandle = 6,
    PermissionDenied = 7,
    ResolveUnsupported = 8,
    AllocationFailed = 9,
}

impl From<&ProbeError> for Status {
    fn from(error: &ProbeError) -> Self {
        match error {
            ProbeError::Encode(EncodeError::TooSmall { .. }) => Status::TooSmall,
            ProbeError::Encode(EncodeError::Unsupported(_)) => Status::Unsupported,
            ProbeError::Encode(EncodeError::Lookup(_)) => Status::Lookup,
            ProbeError::Encode(EncodeError::Resource(_)) => Status::AllocationFailed,
            ProbeError::Resolve(ResolveError::StaleHandle(_)) => Status::StaleHandle,
            ProbeError::Resolve(ResolveError::PermissionDenied(_)) => Status::PermissionDenied,
            ProbeError::Resolve(ResolveError::Unsupported(_)) => Status::ResolveUnsupported,
            ProbeError::Resolve(ResolveError::Resource(_)) => Status::AllocationFailed,
            ProbeError::Resolve(ResolveError::Mount { error, .. })
                if matches!(error.raw_os_error(), Some(libc::EACCES) | Some(libc::EPERM)) =>
            {
                Status::PermissionDenied
            }
            ProbeError::Resolve(ResolveError::Mount { .. })
            | ProbeError::Resolve(ResolveError::MountTable(_))
            | ProbeError::Resolve(ResolveError::Other(_))
            | ProbeError::Identity(_)
            | ProbeError::Close(_) => Status::Failure,
        }
    }
}

impl From<Status> for ExitCode {
    fn from(status: Status) -> Self {
        ExitCode::from(status as u8)
    }
}
