//! The file capability (§6, §10 ambient stack: narrowed from a full `Env`).
//!
//! A table reader only ever needs positioned reads, and a table writer only
//! ever appends sequentially -- so this crate exposes just those two
//! capabilities rather than the teacher's full `Env` abstraction (which also
//! covers directories, locks, and sequential readers for the WAL this crate
//! doesn't implement).
//!
//! Grounded on the teacher's `env.rs`, with one correction: the teacher's
//! `impl RandomAccess for File` reached for
//! `std::os::windows::fs::FileExt::seek_read` unconditionally, which only
//! exists on Windows and would fail to compile anywhere else. This version
//! uses the platform-appropriate positioned-read trait instead.

use std::fs::File;
use std::io::Write;

use crate::error::Result;

/// A source that can be read from at an arbitrary offset without disturbing
/// any other reader of the same handle -- what a table reader needs from the
/// underlying file.
pub trait RandomAccessSource: Send + Sync {
    /// Reads up to `dst.len()` bytes starting at `off`, returning how many
    /// were actually read (fewer than requested only at end of file).
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<usize>;

    fn len(&self) -> Result<u64>;
}

#[cfg(unix)]
impl RandomAccessSource for File {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<usize> {
        use std::os::unix::fs::FileExt;
        Ok(FileExt::read_at(self, dst, off)?)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.metadata()?.len())
    }
}

#[cfg(windows)]
impl RandomAccessSource for File {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<usize> {
        use std::os::windows::fs::FileExt;
        Ok(self.seek_read(dst, off)?)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.metadata()?.len())
    }
}

/// An in-memory stand-in for a table file, used in tests so the builder and
/// reader can round-trip without touching a filesystem.
pub type MemoryFile = Vec<u8>;

impl RandomAccessSource for MemoryFile {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<usize> {
        let off = off as usize;
        if off >= self.len() {
            return Ok(0);
        }
        let n = dst.len().min(self.len() - off);
        dst[..n].copy_from_slice(&self[off..off + n]);
        Ok(n)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.len() as u64)
    }
}

/// A sink a table builder writes to: sequential appends plus an explicit
/// flush/sync boundary at the end. Implemented for anything that is
/// already `Write` (a `File`, a `Vec<u8>`).
pub trait TableWriter: Write {
    fn sync(&mut self) -> Result<()>;
}

impl TableWriter for File {
    fn sync(&mut self) -> Result<()> {
        Ok(self.sync_all()?)
    }
}

impl TableWriter for Vec<u8> {
    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}
