//! # Memory-Mapped NVM Image
//!
//! `MmapIo` serves an NVM image stored in a file by mapping the file into
//! the process address space. Reads and writes are plain slice copies; the
//! OS page cache does the rest.
//!
//! ## Access Modes
//!
//! ```text
//! open(Read)       -> read-only file, Mmap     -> granted Read
//! open(Write)      -> read+write file, MmapMut -> granted ReadWrite
//! open(ReadWrite)  -> read+write file, MmapMut -> granted ReadWrite
//! ```
//!
//! Opening read-only first lets tools inspect images on read-only media.
//! The store reopens with write access only when it actually needs to
//! write.
//!
//! ## Durability
//!
//! `close()` flushes a writable mapping before unmapping it. Dropping an
//! open `MmapIo` without `close()` leaves durability to the OS.
//!
//! ## File Size
//!
//! The image size is fixed at construction. NVM images never grow: `erase`
//! rewrites the existing range in place.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut};

use super::driver::{NvmAccess, NvmIo, ReadResult, WriteResult};
use crate::ensure_argument;
use crate::error::{NvmError, Result};

const MMAP_CHUNK_SIZE: usize = 16 * 1024;

#[derive(Debug)]
enum Mapping {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

impl Mapping {
    fn bytes(&self) -> &[u8] {
        match self {
            Mapping::ReadOnly(map) => &map[..],
            Mapping::ReadWrite(map) => &map[..],
        }
    }
}

#[derive(Debug)]
pub struct MmapIo {
    path: PathBuf,
    size: usize,
    mapping: Option<Mapping>,
}

impl MmapIo {
    /// Prepares an existing image file. The file is not mapped until `open`.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let size = std::fs::metadata(&path)?.len() as usize;

        ensure_argument!(size > 0, "cannot open empty NVM image '{}'", path.display());

        Ok(Self {
            path,
            size,
            mapping: None,
        })
    }

    /// Creates (or truncates) an image file of `size` erased bytes.
    pub fn create<P: AsRef<Path>>(path: P, size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        ensure_argument!(size > 0, "NVM image size must be at least 1 byte");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(size as u64)?;

        // SAFETY: MmapMut::map_mut is unsafe because the file could be modified
        // externally while mapped. This is safe because:
        // 1. We just created this file with exclusive access (truncate=true)
        // 2. The mapping is dropped before this function returns
        // 3. The file length was set to `size` before mapping
        let mut map = unsafe { MmapMut::map_mut(&file)? };
        map.fill(0xFF);
        map.flush()?;

        Ok(Self {
            path,
            size,
            mapping: None,
        })
    }

    fn map(&self, access: NvmAccess) -> Result<Mapping> {
        let writable = access.can_write();
        let file: File = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(&self.path)?;

        let len = file.metadata()?.len() as usize;
        ensure_argument!(
            len == self.size,
            "NVM image '{}' changed size from {} to {} bytes",
            self.path.display(),
            self.size,
            len
        );

        // SAFETY: mapping a file is unsafe because the file could be modified
        // externally while mapped. This is safe because:
        // 1. NVM images are owned by a single store for the duration of a session
        // 2. The mapping lifetime is tied to MmapIo and dropped in close()
        // 3. All access goes through read()/write() which clamp to `size`
        let mapping = unsafe {
            if writable {
                Mapping::ReadWrite(MmapMut::map_mut(&file)?)
            } else {
                Mapping::ReadOnly(Mmap::map(&file)?)
            }
        };
        Ok(mapping)
    }
}

impl NvmIo for MmapIo {
    fn open(&mut self, access: NvmAccess) -> Result<NvmAccess> {
        self.close()?;
        if access == NvmAccess::None {
            return Ok(NvmAccess::None);
        }
        self.mapping = Some(self.map(access)?);
        Ok(self.access_mode())
    }

    fn size(&self) -> usize {
        self.size
    }

    fn access_mode(&self) -> NvmAccess {
        match self.mapping {
            None => NvmAccess::None,
            Some(Mapping::ReadOnly(_)) => NvmAccess::Read,
            Some(Mapping::ReadWrite(_)) => NvmAccess::ReadWrite,
        }
    }

    fn determine_chunk_size(&mut self) -> Result<usize> {
        Ok(MMAP_CHUNK_SIZE)
    }

    fn read(&mut self, offset: usize, len: usize) -> Result<ReadResult> {
        let Some(mapping) = &self.mapping else {
            return Err(NvmError::Argument("NVM image is not open for reading".into()));
        };

        let bytes = mapping.bytes();
        let start = offset.min(bytes.len());
        let end = (offset + len.min(MMAP_CHUNK_SIZE)).min(bytes.len());
        Ok(ReadResult {
            data: bytes[start..end].to_vec(),
            end_of_data: end == bytes.len(),
        })
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<WriteResult> {
        let Some(Mapping::ReadWrite(map)) = &mut self.mapping else {
            return Err(NvmError::Argument("NVM image is not open for writing".into()));
        };

        let start = offset.min(map.len());
        let end = (offset + data.len().min(MMAP_CHUNK_SIZE)).min(map.len());
        map[start..end].copy_from_slice(&data[..end - start]);
        Ok(WriteResult {
            bytes_written: end - start,
            end_of_data: end == map.len(),
        })
    }

    fn close(&mut self) -> Result<()> {
        if let Some(Mapping::ReadWrite(map)) = &self.mapping {
            map.flush()?;
        }
        self.mapping = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::driver::{read_exact_at, write_all_at};
    use tempfile::tempdir;

    #[test]
    fn create_fills_with_erased_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nvm.bin");

        let mut io = MmapIo::create(&path, 1024).unwrap();
        assert_eq!(io.size(), 1024);
        assert_eq!(io.access_mode(), NvmAccess::None);

        io.open(NvmAccess::Read).unwrap();
        let bytes = read_exact_at(&mut io, 0, 1024).unwrap();
        assert!(bytes.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn create_fails_with_zero_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nvm.bin");

        let err = MmapIo::create(&path, 0).unwrap_err();
        assert!(err.is_argument());
    }

    #[test]
    fn open_path_fails_for_missing_file() {
        let dir = tempdir().unwrap();
        let err = MmapIo::open_path(dir.path().join("missing.bin")).unwrap_err();
        assert!(matches!(err, NvmError::Io(_)));
    }

    #[test]
    fn read_only_mapping_refuses_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nvm.bin");
        MmapIo::create(&path, 64).unwrap();

        let mut io = MmapIo::open_path(&path).unwrap();
        assert_eq!(io.open(NvmAccess::Read).unwrap(), NvmAccess::Read);
        assert!(io.write(0, &[0]).unwrap_err().is_argument());
    }

    #[test]
    fn write_access_is_granted_as_read_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nvm.bin");
        let mut io = MmapIo::create(&path, 64).unwrap();

        assert_eq!(io.open(NvmAccess::Write).unwrap(), NvmAccess::ReadWrite);
        io.close().unwrap();
        assert_eq!(io.access_mode(), NvmAccess::None);
    }

    #[test]
    fn close_persists_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nvm.bin");

        {
            let mut io = MmapIo::create(&path, 256).unwrap();
            io.open(NvmAccess::ReadWrite).unwrap();
            write_all_at(&mut io, 100, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
            io.close().unwrap();
        }

        let mut io = MmapIo::open_path(&path).unwrap();
        io.open(NvmAccess::Read).unwrap();
        assert_eq!(read_exact_at(&mut io, 100, 4).unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(std::fs::read(&path).unwrap()[99], 0xFF);
    }
}
