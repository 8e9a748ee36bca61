//! Named shared memory segments backed by files in the shm directory.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use framepipe_sync::Region;

use crate::error::NodeError;

/// Environment variable overriding the directory segments live in.
pub const SHM_DIR_ENV: &str = "FRAMEPIPE_SHM_DIR";

/// Prefix of every segment file name.
pub const SEGMENT_PREFIX: &str = "framepipe.";

/// Longest accepted channel name.
pub const MAX_NAME_LEN: usize = 200;

/// Directory segment files are created in.
pub fn shm_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(SHM_DIR_ENV) {
        return PathBuf::from(dir);
    }
    let dev_shm = Path::new("/dev/shm");
    if dev_shm.is_dir() {
        dev_shm.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}

/// Check that `name` can be used as a channel name.
pub fn validate_name(name: &str) -> Result<(), NodeError> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.len() > MAX_NAME_LEN {
        "name is longer than 200 bytes"
    } else if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
    {
        "only ASCII letters, digits, '_', '.' and '-' are allowed"
    } else {
        return Ok(());
    };
    Err(NodeError::InvalidName {
        name: name.to_string(),
        reason,
    })
}

/// Path of the segment file for channel `name`.
pub fn segment_path(name: &str) -> PathBuf {
    shm_dir().join(format!("{SEGMENT_PREFIX}{name}"))
}

/// A mapped segment.
///
/// The mapping is released on drop. The file is only removed by an explicit
/// [`ShmSegment::unlink`], which the owning sink does on destroy.
pub struct ShmSegment {
    path: PathBuf,
    base: *mut u8,
    len: usize,
    _file: File,
}

// SAFETY: the mapping is plain shared memory; all cross-thread access goes
// through atomics in the layout.
unsafe impl Send for ShmSegment {}
unsafe impl Sync for ShmSegment {}

impl ShmSegment {
    /// Create a new zero-filled segment of `len` bytes.
    ///
    /// Fails with [`io::ErrorKind::AlreadyExists`] if the file exists.
    pub fn create(path: &Path, len: usize) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        if let Err(e) = file.set_len(len as u64) {
            let _ = fs::remove_file(path);
            return Err(e);
        }

        match Self::map(&file, len) {
            Ok(base) => Ok(Self {
                path: path.to_path_buf(),
                base,
                len,
                _file: file,
            }),
            Err(e) => {
                let _ = fs::remove_file(path);
                Err(e)
            }
        }
    }

    /// Map an existing segment.
    ///
    /// A file shorter than `min_len` is reported as
    /// [`io::ErrorKind::UnexpectedEof`]; its creator has not sized it yet.
    pub fn open(path: &Path, min_len: usize) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len() as usize;
        if len < min_len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("segment is {len} bytes, expected at least {min_len}"),
            ));
        }
        let base = Self::map(&file, len)?;
        Ok(Self {
            path: path.to_path_buf(),
            base,
            len,
            _file: file,
        })
    }

    fn map(file: &File, len: usize) -> io::Result<*mut u8> {
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(addr as *mut u8)
    }

    /// View over the whole mapping.
    pub fn region(&self) -> Region {
        // SAFETY: mmap returns page-aligned memory valid for `len` bytes that
        // stays mapped until self is dropped.
        unsafe { Region::from_raw(self.base, self.len) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the segment's name. Existing mappings stay valid.
    pub fn unlink(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.len);
        }
    }
}

impl std::fmt::Debug for ShmSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmSegment")
            .field("path", &self.path)
            .field("len", &self.len)
            .finish()
    }
}

/// Whether process `pid` still exists.
pub fn process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // Signal 0 performs the permission and existence checks only.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn scratch_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{SEGMENT_PREFIX}test-{tag}-{}", std::process::id()))
    }

    #[test]
    fn names_are_validated() {
        assert!(validate_name("camera.raw-0_a").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("has space").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN)).is_ok());
        assert!(matches!(
            validate_name(&"x".repeat(MAX_NAME_LEN + 1)),
            Err(NodeError::InvalidName { .. })
        ));
    }

    #[test]
    fn segment_path_is_prefixed() {
        let path = segment_path("cam");
        assert_eq!(path.file_name().unwrap(), "framepipe.cam");
    }

    #[test]
    fn two_mappings_share_bytes() {
        let path = scratch_path("share");
        let _ = fs::remove_file(&path);

        let created = ShmSegment::create(&path, 4096).unwrap();
        let opened = ShmSegment::open(&path, 64).unwrap();
        assert_eq!(opened.len(), 4096);

        let (mine, theirs) = (created.region(), opened.region());
        let a = unsafe { mine.get::<AtomicU64>(128) };
        a.store(0xDEAD_BEEF, Ordering::Release);
        let b = unsafe { theirs.get::<AtomicU64>(128) };
        assert_eq!(b.load(Ordering::Acquire), 0xDEAD_BEEF);

        let err = ShmSegment::create(&path, 4096).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);

        created.unlink().unwrap();
        created.unlink().unwrap();
        assert!(!path.exists());
        // The mapping outlives the name.
        assert_eq!(b.load(Ordering::Acquire), 0xDEAD_BEEF);
    }

    #[test]
    fn short_segment_is_not_ready() {
        let path = scratch_path("short");
        let _ = fs::remove_file(&path);
        File::create(&path).unwrap();

        let err = ShmSegment::open(&path, 256).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn own_process_is_alive() {
        assert!(process_alive(std::process::id()));
        assert!(!process_alive(0));
    }
}
