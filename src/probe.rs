//! One encode, resolve and close round trip.
//!
//! ```text
//! Start --encode--> Encoded --resolve--> Resolved --close--> Closed
//! ```
//!
//! A failed encode or resolve ends the probe; nothing is retried apart from
//! the buffer size negotiation inside [`encode_at`](crate::encode_at).

use std::io;
use std::mem;
use std::os::fd::AsFd as _;
use std::os::fd::AsRawFd as _;
use std::os::fd::BorrowedFd;
use std::path::Path;

use crate::error::ProbeError;
use crate::handle;
use crate::handle::EncodeOptions;
use crate::handle::VolumeId;
use crate::resolve;
use crate::resolve::AccessMode;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    Start,
    Encoded,
    Resolved,
    Closed,
}

pub struct Target<'a> {
    /// Directory `path` is relative to; the working directory when `None`.
    pub dir: Option<BorrowedFd<'a>>,
    pub path: &'a Path,
    pub encode: EncodeOptions,
    pub access: AccessMode,
}

impl<'a> Target<'a> {
    pub fn new(path: &'a Path) -> Self {
        Target {
            dir: None,
            path,
            encode: EncodeOptions::default(),
            access: AccessMode::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Report {
    pub volume: VolumeId,
    /// Rendering of the handle; the handle itself is gone once resolved.
    pub handle: String,
    /// `st_dev` of the resolved descriptor
    pub device: u64,
    /// `st_ino` of the resolved descriptor
    pub inode: u64,
}

pub fn run(target: &Target) -> Result<Report, ProbeError> {
    let (handle, volume) = handle::encode_at(target.dir, target.path, &target.encode)?;
    log::debug!("{:?} -> {:?}", Stage::Start, Stage::Encoded);

    let resolved = resolve::resolve(volume, &handle, target.access);
    let rendered = handle.to_string();
    drop(handle);
    let fd = resolved?;
    log::debug!("{:?} -> {:?}", Stage::Encoded, Stage::Resolved);

    let identity = identity(fd.as_fd());
    resolve::close(fd).map_err(ProbeError::Close)?;
    log::debug!("{:?} -> {:?}", Stage::Resolved, Stage::Closed);

    let (device, inode) = identity.map_err(ProbeError::Identity)?;

    Ok(Report {
        volume,
        handle: rendered,
        device,
        inode,
    })
}

fn identity(fd: BorrowedFd) -> io::Result<(u64, u64)> {
    let mut stat = unsafe { mem::zeroed::<libc::stat>() };

    match unsafe { libc::fstat(fd.as_raw_fd(), &mut stat) } {
        0 => Ok((stat.st_dev as u64, stat.st_ino as u64)),
        _ => Err(io::Error::last_os_error()),
    }
}
