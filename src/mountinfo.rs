use std::ffi::OsString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStringExt as _;
use std::path::PathBuf;

use crate::handle::VolumeId;

pub(crate) const MOUNTINFO: &str = "/proc/self/mountinfo";

/// Mount point of `volume` as seen from this process, if it is still mounted.
pub fn mount_point(volume: VolumeId) -> io::Result<Option<PathBuf>> {
    let table = fs::read(MOUNTINFO)?;
    Ok(find(&table, volume))
}

// 36 35 98:0 /mnt1 /mnt2 rw,noatime master:1 - ext3 /dev/root rw,errors=continue
fn find(table: &[u8], volume: VolumeId) -> Option<PathBuf> {
    table.split(|&byte| byte == b'\n').find_map(|line| {
        let mut fields = line.split(|&byte| byte == b' ');
        let id = std::str::from_utf8(fields.next()?).ok()?;
        if id.parse::<libc::c_int>().ok()? != volume.0 {
            return None;
        }

        // parent id, major:minor, root, then the mount point
        fields.nth(3).map(unescape)
    })
}

/// Undo the kernel's octal escaping of space, tab, newline and backslash.
fn unescape(field: &[u8]) -> PathBuf {
    let mut path = Vec::with_capacity(field.len());
    let mut i = 0;

    while i < field.len() {
        match field.get(i..i + 4) {
            Some([b'\\', digits @ ..]) if digits.iter().all(|d| (b'0'..=b'7').contains(d)) => {
                let value = digits
                    .iter()
                    .fold(0u32, |value, digit| value * 8 + u32::from(digit - b'0'));
                path.push(value as u8);
                i += 4;
            }
            _ => {
                path.push(field[i]);
                i += 1;
            }
        }
    }

    PathBuf::from(OsString::from_vec(path))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    const TABLE: &[u8] = b"\
22 1 8:1 / / rw,relatime shared:1 - ext4 /dev/sda1 rw
25 22 0:22 / /proc rw,nosuid,nodev,noexec,relatime shared:12 - proc proc rw
41 22 0:35 / /mnt/my\\040disk rw,relatime shared:20 - tmpfs tmpfs rw
42 22 0:36 /sub /srv/back\\134slash ro - ext4 /dev/sdb1 ro
";

    #[test]
    fn finds_mount_point_by_id() {
        assert_eq!(find(TABLE, VolumeId(22)).as_deref(), Some(Path::new("/")));
        assert_eq!(find(TABLE, VolumeId(25)).as_deref(), Some(Path::new("/proc")));
    }

    #[test]
    fn unescapes_mount_point() {
        assert_eq!(
            find(TABLE, VolumeId(41)).as_deref(),
            Some(Path::new("/mnt/my disk"))
        );
        assert_eq!(
            find(TABLE, VolumeId(42)).as_deref(),
            Some(Path::new("/srv/back\\slash"))
        );
    }

    #[test]
    fn unknown_id_is_absent() {
        assert_eq!(find(TABLE, VolumeId(1)), None);
        assert_eq!(find(b"", VolumeId(22)), None);
        assert_eq!(find(b"garbage line\n", VolumeId(22)), None);
    }

    #[test]
    fn live_table_lists_its_own_ids() {
        let table = fs::read(MOUNTINFO).unwrap();
        let listed = table
            .split(|&byte| byte == b'\n')
            .filter_map(|line| std::str::from_utf8(line.split(|&b| b == b' ').next()?).ok())
            .filter_map(|id| id.parse::<libc::c_int>().ok())
            .any(|id| mount_point(VolumeId(id)).unwrap().is_some());
        assert!(listed);
    }
}
