use std::ffi::CStr;
use std::ffi::CString;
use std::fmt;
use std::io;
use std::mem;
use std::os::fd::AsRawFd as _;
use std::os::fd::BorrowedFd;
use std::os::unix::ffi::OsStrExt as _;
use std::path::Path;
use std::slice;

use crate::error::EncodeError;
use crate::error::ResourceError;
use crate::MAX_HANDLE_SZ;

/// Fixed part of the kernel's `struct file_handle`; the payload follows it.
#[repr(C)]
pub(crate) struct Header {
    handle_bytes: u32,
    handle_type: libc::c_int,
}

const HEADER_LEN: usize = mem::size_of::<Header>();

/// Kernel mount id of the filesystem a handle was minted on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct VolumeId(pub libc::c_int);

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle returned by `name_to_handle_at`.
///
/// Backed by `u32` words so the header is suitably aligned for the kernel.
pub struct FileHandle {
    words: Vec<u32>,
}

impl FileHandle {
    fn with_capacity(capacity: u32) -> Result<Self, ResourceError> {
        let bytes = HEADER_LEN + capacity as usize;
        let len = bytes.div_ceil(mem::size_of::<u32>());

        let mut words = Vec::new();
        words
            .try_reserve_exact(len)
            .map_err(|_| ResourceError::AllocationFailed { bytes })?;
        words.resize(len, 0);

        let mut handle = FileHandle { words };
        handle.header_mut().handle_bytes = capacity;
        Ok(handle)
    }

    /// Rebuild a handle from a type tag and payload previously taken from
    /// [`FileHandle::kind`] and [`FileHandle::payload`].
    pub fn from_parts(kind: i32, payload: &[u8]) -> Result<Self, ResourceError> {
        if payload.len() > MAX_HANDLE_SZ as usize {
            return Err(ResourceError::Oversized {
                len: payload.len(),
                max: MAX_HANDLE_SZ,
            });
        }

        let mut handle = FileHandle::with_capacity(payload.len() as u32)?;
        handle.header_mut().handle_type = kind;
        handle.bytes_mut()[HEADER_LEN..HEADER_LEN + payload.len()].copy_from_slice(payload);
        Ok(handle)
    }

    pub fn capacity(&self) -> u32 {
        self.header().handle_bytes
    }

    pub fn kind(&self) -> i32 {
        self.header().handle_type
    }

    pub fn payload(&self) -> &[u8] {
        let bytes = self.bytes();
        let len = (self.capacity() as usize).min(bytes.len() - HEADER_LEN);
        &bytes[HEADER_LEN..HEADER_LEN + len]
    }

    pub(crate) fn as_ptr(&self) -> *const Header {
        self.words.as_ptr().cast()
    }

    fn as_mut_ptr(&mut self) -> *mut Header {
        self.words.as_mut_ptr().cast()
    }

    fn header(&self) -> &Header {
        unsafe { &*self.as_ptr() }
    }

    fn header_mut(&mut self) -> &mut Header {
        unsafe { &mut *self.as_mut_ptr() }
    }

    fn bytes(&self) -> &[u8] {
        unsafe {
            slice::from_raw_parts(
                self.words.as_ptr().cast::<u8>(),
                mem::size_of_val(self.words.as_slice()),
            )
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe {
            slice::from_raw_parts_mut(
                self.words.as_mut_ptr().cast::<u8>(),
                mem::size_of_val(self.words.as_slice()),
            )
        }
    }
}

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "type={} bytes={} ", self.kind(), self.capacity())?;
        for byte in self.payload() {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("kind", &self.kind())
            .field("capacity", &self.capacity())
            .field("payload", &self.payload())
            .finish()
    }
}

#[derive(Copy, Clone, Debug)]
pub struct EncodeOptions {
    /// Payload bytes offered on the first attempt.
    pub max_payload: u32,
    pub follow_symlinks: bool,
    /// Retry once with the size the kernel reports when the first buffer is too small.
    pub retry: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        EncodeOptions {
            max_payload: MAX_HANDLE_SZ,
            follow_symlinks: false,
            retry: true,
        }
    }
}

/// Encode `path` relative to the working directory.
pub fn encode(path: &Path, max_payload: u32) -> Result<(FileHandle, VolumeId), EncodeError> {
    let options = EncodeOptions {
        max_payload,
        ..EncodeOptions::default()
    };
    encode_at(None, path, &options)
}

/// Encode `path` relative to `dir`, or to the working directory when `dir` is
/// `None`. An empty `path` encodes `dir` itself.
pub fn encode_at(
    dir: Option<BorrowedFd>,
    path: &Path,
    options: &EncodeOptions,
) -> Result<(FileHandle, VolumeId), EncodeError> {
    let path = CString::new(path.as_os_str().as_bytes())
        .map_err(|error| EncodeError::Lookup(io::Error::new(io::ErrorKind::InvalidInput, error)))?;

    let mut flags = 0;
    if options.follow_symlinks {
        flags |= libc::AT_SYMLINK_FOLLOW;
    }
    if path.is_empty() {
        flags |= libc::AT_EMPTY_PATH;
    }

    let capacity = if options.max_payload > MAX_HANDLE_SZ {
        log::warn!(
            "Clamping handle buffer from {} to {} bytes",
            options.max_payload,
            MAX_HANDLE_SZ
        );
        MAX_HANDLE_SZ
    } else {
        options.max_payload
    };

    match name_to_handle_at(dir, &path, flags, capacity) {
        Err(EncodeError::TooSmall { required }) if options.retry && required > capacity => {
            log::debug!(
                "{:?} needs a {} byte handle, retrying (offered {})",
                path,
                required,
                capacity
            );
            name_to_handle_at(dir, &path, flags, required)
        }
        result => result,
    }
}

fn name_to_handle_at(
    dir: Option<BorrowedFd>,
    path: &CStr,
    flags: libc::c_int,
    capacity: u32,
) -> Result<(FileHandle, VolumeId), EncodeError> {
    let mut handle = FileHandle::with_capacity(capacity)?;
    let mut mount_id: libc::c_int = 0;
    let dirfd = dir.map_or(libc::AT_FDCWD, |dir| dir.as_raw_fd());

    match unsafe {
        libc::syscall(
            libc::SYS_name_to_handle_at,
            dirfd,
            path.as_ptr(),
            handle.as_mut_ptr(),
            &mut mount_id as *mut libc::c_int,
            flags,
        )
    } {
        0 => {
            log::debug!(
                "name_to_handle_at({:?}) -> mount {}, {}",
                path,
                mount_id,
                handle
            );
            Ok((handle, VolumeId(mount_id)))
        }
        _ => Err(EncodeError::from_os(
            io::Error::last_os_error(),
            capacity,
            handle.capacity(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_layout() {
        let handle = FileHandle::with_capacity(13).unwrap();
        assert_eq!(handle.capacity(), 13);
        assert_eq!(handle.kind(), 0);
        assert_eq!(handle.payload(), &[0u8; 13]);
        assert_eq!(handle.as_ptr() as usize % mem::align_of::<Header>(), 0);
    }

    #[test]
    fn from_parts_keeps_kind_and_payload() {
        let handle = FileHandle::from_parts(0x81, &[1, 2, 3, 0xfe]).unwrap();
        assert_eq!(handle.kind(), 0x81);
        assert_eq!(handle.capacity(), 4);
        assert_eq!(handle.payload(), &[1, 2, 3, 0xfe]);
        assert_eq!(handle.to_string(), "type=129 bytes=4 010203fe");
    }

    #[test]
    fn from_parts_rejects_oversized_payload() {
        let payload = vec![0u8; MAX_HANDLE_SZ as usize + 1];
        assert!(matches!(
            FileHandle::from_parts(1, &payload),
            Err(ResourceError::Oversized { len: 129, max: 128 })
        ));
    }

    #[test]
    fn missing_path_is_a_lookup_error() {
        match encode(Path::new("/nonexistent/fhprobe/missing"), MAX_HANDLE_SZ) {
            Err(EncodeError::Lookup(error)) => assert_eq!(error.kind(), io::ErrorKind::NotFound),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn interior_nul_is_rejected() {
        match encode(Path::new("bad\0path"), MAX_HANDLE_SZ) {
            Err(EncodeError::Lookup(error)) => {
                assert_eq!(error.kind(), io::ErrorKind::InvalidInput)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn procfs_cannot_export_handles() {
        match encode(Path::new("/proc/self/status"), MAX_HANDLE_SZ) {
            Err(EncodeError::Unsupported(_)) => (),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn negotiates_buffer_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        std::fs::write(&path, b"x").unwrap();

        let fixed = EncodeOptions {
            max_payload: 0,
            retry: false,
            ..EncodeOptions::default()
        };
        let required = match encode_at(None, &path, &fixed) {
            Err(EncodeError::TooSmall { required }) => required,
            Err(EncodeError::Unsupported(error)) => {
                eprintln!("skipping: {} cannot export handles: {}", path.display(), error);
                return;
            }
            other => panic!("unexpected {:?}", other),
        };
        assert!(required > 0 && required <= MAX_HANDLE_SZ);

        let (handle, _) = encode(&path, 0).unwrap();
        assert_eq!(handle.capacity(), required);
        assert_eq!(handle.payload().len(), required as usize);
    }

    #[test]
    fn oversized_bound_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        std::fs::write(&path, b"x").unwrap();

        match encode(&path, 1024) {
            Ok((handle, _)) => assert!(handle.capacity() <= MAX_HANDLE_SZ),
            Err(EncodeError::Unsupported(_)) => (),
            Err(error) => panic!("unexpected {:?}", error),
        }
    }
}
