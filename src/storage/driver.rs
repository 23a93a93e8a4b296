//! # NVM I/O Abstraction
//!
//! This module provides the `NvmIo` trait, a copy-based contract over the
//! medium that holds an NVM image: a file, a memory buffer, or a serial link
//! to a live controller.
//!
//! ## Access Modes
//!
//! A medium is opened for `Read`, `Write` or `ReadWrite`. `open` returns the
//! mode actually granted, which may be wider than requested (a memory buffer
//! is always readable and writable). Switching between a read-only and a
//! write-only mode requires `close` followed by `open`; the store tracks the
//! current mode and skips the round trip when the needed capability is
//! already there.
//!
//! ## Partial Transfers
//!
//! `read` may return fewer bytes than asked for, and `write` may accept
//! fewer bytes than offered. Both report whether the end of the medium was
//! reached. [`read_exact_at`] and [`write_all_at`] loop in
//! `determine_chunk_size()` sized steps until the transfer is complete and
//! turn a premature end of data into a format error.
//!
//! ## Backends
//!
//! | Backend    | Medium              | Chunk size      |
//! |------------|---------------------|-----------------|
//! | `MemoryIo` | `Vec<u8>`           | configurable    |
//! | `MmapIo`   | memory-mapped file  | 16 KiB          |

use crate::error::{NvmError, Result};
use crate::{bail_format, ensure_argument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvmAccess {
    None,
    Read,
    Write,
    ReadWrite,
}

impl NvmAccess {
    pub fn can_read(self) -> bool {
        matches!(self, NvmAccess::Read | NvmAccess::ReadWrite)
    }

    pub fn can_write(self) -> bool {
        matches!(self, NvmAccess::Write | NvmAccess::ReadWrite)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResult {
    pub data: Vec<u8>,
    pub end_of_data: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResult {
    pub bytes_written: usize,
    pub end_of_data: bool,
}

/// Byte-level access to an NVM image.
pub trait NvmIo {
    /// Opens the medium and returns the access mode actually granted.
    fn open(&mut self, access: NvmAccess) -> Result<NvmAccess>;

    /// Total size of the NVM in bytes.
    fn size(&self) -> usize;

    /// Access mode granted by the last `open`, or `None` when closed.
    fn access_mode(&self) -> NvmAccess;

    /// Largest transfer a single `read` or `write` should attempt.
    fn determine_chunk_size(&mut self) -> Result<usize>;

    /// Reads up to `len` bytes at `offset`. May return fewer bytes.
    fn read(&mut self, offset: usize, len: usize) -> Result<ReadResult>;

    /// Writes `data` at `offset`. May accept fewer bytes.
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<WriteResult>;

    /// Flushes and releases the medium.
    fn close(&mut self) -> Result<()>;
}

/// Reads exactly `len` bytes at `offset`, looping over partial reads.
pub fn read_exact_at<IO: NvmIo + ?Sized>(io: &mut IO, offset: usize, len: usize) -> Result<Vec<u8>> {
    let chunk_size = io.determine_chunk_size()?.max(1);
    let mut out = Vec::with_capacity(len);

    while out.len() < len {
        let want = (len - out.len()).min(chunk_size);
        let ReadResult { data, end_of_data } = io.read(offset + out.len(), want)?;
        out.extend_from_slice(&data[..data.len().min(want)]);
        if out.len() < len && (end_of_data || data.is_empty()) {
            bail_format!(
                "unexpected end of NVM: read {} of {} bytes at offset {:#x}",
                out.len(),
                len,
                offset
            );
        }
    }

    Ok(out)
}

/// Writes all of `data` at `offset`, looping over partial writes.
pub fn write_all_at<IO: NvmIo + ?Sized>(io: &mut IO, offset: usize, data: &[u8]) -> Result<()> {
    ensure_argument!(
        offset + data.len() <= io.size(),
        "write of {} bytes at offset {:#x} exceeds the NVM size {}",
        data.len(),
        offset,
        io.size()
    );
    let chunk_size = io.determine_chunk_size()?.max(1);
    let mut written = 0;

    while written < data.len() {
        let end = (written + chunk_size).min(data.len());
        let result = io.write(offset + written, &data[written..end])?;
        written += result.bytes_written;
        if written < data.len() && (result.end_of_data || result.bytes_written == 0) {
            return Err(NvmError::Format(format!(
                "unexpected end of NVM: wrote {} of {} bytes at offset {:#x}",
                written,
                data.len(),
                offset
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryIo;

    #[test]
    fn access_capabilities() {
        assert!(NvmAccess::Read.can_read());
        assert!(!NvmAccess::Read.can_write());
        assert!(NvmAccess::Write.can_write());
        assert!(!NvmAccess::Write.can_read());
        assert!(NvmAccess::ReadWrite.can_read() && NvmAccess::ReadWrite.can_write());
        assert!(!NvmAccess::None.can_read() && !NvmAccess::None.can_write());
    }

    #[test]
    fn read_exact_loops_over_short_reads() {
        let data: Vec<u8> = (0..100).collect();
        let mut io = MemoryIo::new(data.clone()).with_chunk_size(7);
        io.open(NvmAccess::Read).unwrap();

        let out = read_exact_at(&mut io, 10, 50).unwrap();
        assert_eq!(out, data[10..60]);
    }

    #[test]
    fn read_past_end_is_format_error() {
        let mut io = MemoryIo::new(vec![0u8; 16]);
        io.open(NvmAccess::Read).unwrap();

        let err = read_exact_at(&mut io, 8, 16).unwrap_err();
        assert!(err.is_format());
        assert!(err.to_string().contains("unexpected end of NVM"));
    }

    #[test]
    fn write_all_loops_over_short_writes() {
        let mut io = MemoryIo::new(vec![0xFFu8; 64]).with_chunk_size(5);
        io.open(NvmAccess::ReadWrite).unwrap();

        write_all_at(&mut io, 4, &[1u8; 30]).unwrap();
        let out = read_exact_at(&mut io, 0, 64).unwrap();
        assert_eq!(&out[4..34], &[1u8; 30]);
        assert_eq!(out[34], 0xFF);
    }

    #[test]
    fn write_past_end_is_argument_error() {
        let mut io = MemoryIo::new(vec![0xFFu8; 16]);
        io.open(NvmAccess::Write).unwrap();

        assert!(write_all_at(&mut io, 12, &[0u8; 8]).unwrap_err().is_argument());
    }
}
