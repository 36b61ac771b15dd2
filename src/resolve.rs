use std::fs::File;
use std::io;
use std::os::fd::AsFd as _;
use std::os::fd::AsRawFd as _;
use std::os::fd::BorrowedFd;
use std::os::fd::FromRawFd as _;
use std::os::fd::IntoRawFd as _;
use std::os::fd::OwnedFd;
use std::os::fd::RawFd;
use std::path::Path;

use crate::error::EncodeError;
use crate::error::ResolveError;
use crate::handle;
use crate::handle::EncodeOptions;
use crate::handle::FileHandle;
use crate::handle::VolumeId;
use crate::mountinfo;

/// How the resolved file is opened.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum AccessMode {
    #[default]
    ReadOnly,
    WriteOnly,
    ReadWrite,
    /// `O_PATH`: a location-only descriptor, no read or write access
    Path,
}

impl AccessMode {
    fn flags(self) -> libc::c_int {
        let access = match self {
            AccessMode::ReadOnly => libc::O_RDONLY,
            AccessMode::WriteOnly => libc::O_WRONLY,
            AccessMode::ReadWrite => libc::O_RDWR,
            AccessMode::Path => libc::O_PATH,
        };
        access | libc::O_CLOEXEC
    }
}

/// Open the file behind `handle` on mount `volume`.
///
/// The mount is located through the mount table and opened only for the
/// duration of the call.
pub fn resolve(
    volume: VolumeId,
    handle: &FileHandle,
    access: AccessMode,
) -> Result<OwnedFd, ResolveError> {
    let mount = open_mount(volume)?;
    resolve_in(mount.as_fd(), handle, access)
}

/// Open the file behind `handle` on the filesystem `mount` belongs to.
pub fn resolve_in(
    mount: BorrowedFd,
    handle: &FileHandle,
    access: AccessMode,
) -> Result<OwnedFd, ResolveError> {
    match unsafe {
        libc::syscall(
            libc::SYS_open_by_handle_at,
            mount.as_raw_fd(),
            handle.as_ptr(),
            access.flags(),
        )
    } {
        fd if fd >= 0 => {
            log::debug!("open_by_handle_at -> fd={}", fd);
            Ok(unsafe { OwnedFd::from_raw_fd(fd as RawFd) })
        }
        _ => Err(ResolveError::from_os(io::Error::last_os_error())),
    }
}

/// Close `fd`, reporting the result of `close(2)`.
pub fn close(fd: OwnedFd) -> io::Result<()> {
    match unsafe { libc::close(fd.into_raw_fd()) } {
        0 => Ok(()),
        _ => Err(io::Error::last_os_error()),
    }
}

fn open_mount(volume: VolumeId) -> Result<File, ResolveError> {
    let Some(mount_point) = mountinfo::mount_point(volume).map_err(ResolveError::MountTable)? else {
        log::debug!("mount {} is no longer listed", volume);
        return Err(ResolveError::stale());
    };

    log::debug!("mount {} is at {}", volume, mount_point.display());

    // open_by_handle_at rejects O_PATH descriptors as its mount argument
    let mount = match File::open(&mount_point) {
        Ok(mount) => mount,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            log::debug!("{} vanished: {}", mount_point.display(), error);
            return Err(ResolveError::stale());
        }
        Err(error) => {
            return Err(ResolveError::Mount {
                path: mount_point,
                error,
            })
        }
    };

    // Another filesystem may since have been mounted over the same directory.
    match mount_id(mount.as_fd()) {
        Ok(found) if found != volume => {
            log::debug!(
                "{} now belongs to mount {}, not {}",
                mount_point.display(),
                found,
                volume
            );
            Err(ResolveError::stale())
        }
        Ok(_) => Ok(mount),
        Err(error) => {
            log::debug!("Cannot verify mount {}: {}", volume, error);
            Ok(mount)
        }
    }
}

fn mount_id(fd: BorrowedFd) -> Result<VolumeId, EncodeError> {
    handle::encode_at(Some(fd), Path::new(""), &EncodeOptions::default()).map(|(_, id)| id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_flags() {
        assert_eq!(AccessMode::default(), AccessMode::ReadOnly);
        assert_eq!(AccessMode::ReadOnly.flags(), libc::O_RDONLY | libc::O_CLOEXEC);
        assert_eq!(AccessMode::ReadWrite.flags(), libc::O_RDWR | libc::O_CLOEXEC);
        assert_eq!(AccessMode::Path.flags() & libc::O_PATH, libc::O_PATH);
    }

    #[test]
    fn unknown_volume_is_stale() {
        let handle = FileHandle::from_parts(1, &[0; 8]).unwrap();
        match resolve(VolumeId(-7), &handle, AccessMode::ReadOnly) {
            Err(ResolveError::StaleHandle(error)) => {
                assert_eq!(error.raw_os_error(), Some(libc::ESTALE))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn close_reports_success() {
        let file = File::open("/proc/self/status").unwrap();
        close(OwnedFd::from(file)).unwrap();
    }
}
