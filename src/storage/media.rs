//! Byte-addressable media the slab is formatted on
//!
//! The slab never touches files directly. It reads and writes through the
//! [`Media`] trait so the same code runs over a real file or over an
//! in-memory image that tests can snapshot (a crash image) or break on
//! purpose (fault injection).

use crate::error::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Positional storage with explicit flushes
pub trait Media: Send + Sync {
    /// Fill `buf` from `offset`. Reading past the end is an error.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `data` at `offset`, extending the media if needed
    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Current size in bytes
    fn len(&self) -> Result<u64>;

    /// Grow or shrink to `len` bytes. New bytes read as zero.
    fn set_len(&self, len: u64) -> Result<()>;

    /// Make every completed write durable
    fn sync(&self) -> Result<()>;
}

/// File-backed media using positional I/O, so readers never contend on a cursor
#[derive(Debug)]
pub struct FileMedia {
    path: PathBuf,
    file: File,
}

impl FileMedia {
    /// Create (or truncate) the file at `path`
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| Error::Storage(format!("Failed to create {}: {}", path.display(), e)))?;
        Ok(Self { path, file })
    }

    /// Open an existing file at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::Storage(format!("Failed to open {}: {}", path.display(), e)))?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Media for FileMedia {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        read_exact_at(&self.file, buf, offset).map_err(|e| {
            Error::Storage(format!(
                "Read of {} bytes at {} from {} failed: {}",
                buf.len(),
                offset,
                self.path.display(),
                e
            ))
        })
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        write_all_at(&self.file, data, offset).map_err(|e| {
            Error::Storage(format!(
                "Write of {} bytes at {} to {} failed: {}",
                data.len(),
                offset,
                self.path.display(),
                e
            ))
        })
    }

    fn len(&self) -> Result<u64> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|e| Error::Storage(format!("Failed to stat {}: {}", self.path.display(), e)))
    }

    fn set_len(&self, len: u64) -> Result<()> {
        self.file
            .set_len(len)
            .map_err(|e| Error::Storage(format!("Failed to resize {}: {}", self.path.display(), e)))
    }

    fn sync(&self) -> Result<()> {
        self.file
            .sync_all()
            .map_err(|e| Error::Storage(format!("Flush of {} failed: {}", self.path.display(), e)))
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(unix)]
fn write_all_at(file: &File, data: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(data, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(windows)]
fn write_all_at(file: &File, mut data: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !data.is_empty() {
        match file.seek_write(data, offset) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                data = &data[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FaultState {
    Armed { writes_left: u64 },
    Tripped,
}

/// In-memory media for tests and throwaway stores
///
/// `fail_after_writes(n)` lets `n` more writes through, tears the next one
/// (only its first half lands) and fails every write, resize and sync after
/// that, like a device that died mid-operation.
#[derive(Debug, Default)]
pub struct MemoryMedia {
    bytes: RwLock<Vec<u8>>,
    fault: Mutex<Option<FaultState>>,
}

impl MemoryMedia {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: RwLock::new(bytes),
            fault: Mutex::new(None),
        }
    }

    /// Copy of the current contents with no fault armed, i.e. what a restart would see
    pub fn snapshot(&self) -> Self {
        Self::from_bytes(self.bytes.read().clone())
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }

    pub fn fail_after_writes(&self, writes: u64) {
        *self.fault.lock() = Some(FaultState::Armed {
            writes_left: writes,
        });
    }

    pub fn clear_faults(&self) {
        *self.fault.lock() = None;
    }

    pub fn is_tripped(&self) -> bool {
        matches!(*self.fault.lock(), Some(FaultState::Tripped))
    }

    fn check_alive(&self, what: &str) -> Result<()> {
        if self.is_tripped() {
            return Err(Error::Storage(format!("{} failed: injected media fault", what)));
        }
        Ok(())
    }
}

impl Media for MemoryMedia {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let bytes = self.bytes.read();
        let start = offset as usize;
        let end = start + buf.len();
        if end > bytes.len() {
            return Err(Error::Storage(format!(
                "Read of {} bytes at {} is past the end ({} bytes)",
                buf.len(),
                offset,
                bytes.len()
            )));
        }
        buf.copy_from_slice(&bytes[start..end]);
        Ok(())
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut fault = self.fault.lock();
        let landed = match *fault {
            Some(FaultState::Tripped) => {
                return Err(Error::Storage("Write failed: injected media fault".to_string()))
            }
            Some(FaultState::Armed { writes_left: 0 }) => {
                *fault = Some(FaultState::Tripped);
                data.len() / 2
            }
            Some(FaultState::Armed { writes_left }) => {
                *fault = Some(FaultState::Armed {
                    writes_left: writes_left - 1,
                });
                data.len()
            }
            None => data.len(),
        };
        drop(fault);

        let mut bytes = self.bytes.write();
        let start = offset as usize;
        let end = start + landed;
        if end > bytes.len() {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(&data[..landed]);

        if landed < data.len() {
            return Err(Error::Storage(format!(
                "Write of {} bytes at {} torn after {} bytes: injected media fault",
                data.len(),
                offset,
                landed
            )));
        }
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.bytes.read().len() as u64)
    }

    fn set_len(&self, len: u64) -> Result<()> {
        self.check_alive("Resize")?;
        self.bytes.write().resize(len as usize, 0);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.check_alive("Flush")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_media_read_write() -> Result<()> {
        let media = MemoryMedia::new();
        media.write_at(4, b"slab")?;
        assert_eq!(media.len()?, 8);

        let mut buf = [0u8; 8];
        media.read_at(0, &mut buf)?;
        assert_eq!(&buf, b"\0\0\0\0slab");

        assert!(media.read_at(6, &mut buf).is_err());
        Ok(())
    }

    #[test]
    fn test_memory_media_torn_write() -> Result<()> {
        let media = MemoryMedia::new();
        media.fail_after_writes(1);
        media.write_at(0, b"first")?;
        assert!(media.write_at(0, b"SECOND").is_err());
        assert!(media.is_tripped());

        // Half of the failing write landed, nothing after it does
        assert_eq!(media.to_vec(), b"SECst".to_vec());
        assert!(media.write_at(0, b"x").is_err());
        assert!(media.sync().is_err());

        let restarted = media.snapshot();
        restarted.write_at(0, b"x")?;
        restarted.sync()?;
        Ok(())
    }

    #[test]
    fn test_file_media_round_trip() -> Result<()> {
        let path = std::env::temp_dir().join(format!("photonslab_media_{}", std::process::id()));
        {
            let media = FileMedia::create(&path)?;
            media.set_len(128)?;
            media.write_at(100, b"persisted")?;
            media.sync()?;
        }
        {
            let media = FileMedia::open(&path)?;
            assert_eq!(media.len()?, 128);
            let mut buf = [0u8; 9];
            media.read_at(100, &mut buf)?;
            assert_eq!(&buf, b"persisted");
        }
        std::fs::remove_file(path).ok();
        Ok(())
    }
}
