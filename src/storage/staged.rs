//! # Staged Writes
//!
//! `StagedIo` wraps a medium and records writes instead of performing them.
//! Reads see the recorded writes on top of the underlying bytes, so a whole
//! batch (including page rotations that read back relocated objects) can be
//! planned against the final image before anything reaches flash.
//!
//! ```text
//! plan:    Section (clone) ──writes──▶ StagedIo ──reads──▶ medium
//! commit:  StagedWrites ──write_all_at──▶ medium
//! ```
//!
//! A batch that fails while planning leaves the medium untouched.

use super::driver::{write_all_at, NvmAccess, NvmIo, ReadResult, WriteResult};
use crate::ensure_argument;
use crate::error::Result;

/// Writes recorded by a [`StagedIo`], in the order they were issued.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagedWrites {
    writes: Vec<(usize, Vec<u8>)>,
}

impl StagedWrites {
    /// Total number of bytes that `apply` will write.
    pub fn len_bytes(&self) -> usize {
        self.writes.iter().map(|(_, data)| data.len()).sum()
    }

    /// Performs the recorded writes on `io`.
    pub fn apply<IO: NvmIo + ?Sized>(&self, io: &mut IO) -> Result<()> {
        for (offset, data) in &self.writes {
            write_all_at(io, *offset, data)?;
        }
        Ok(())
    }

    fn overlay(&self, offset: usize, data: &mut [u8]) {
        let end = offset + data.len();
        for (start, bytes) in &self.writes {
            let lo = offset.max(*start);
            let hi = end.min(start + bytes.len());
            if lo < hi {
                data[lo - offset..hi - offset].copy_from_slice(&bytes[lo - start..hi - start]);
            }
        }
    }
}

pub struct StagedIo<'a, IO: NvmIo + ?Sized> {
    inner: &'a mut IO,
    staged: StagedWrites,
}

impl<'a, IO: NvmIo + ?Sized> StagedIo<'a, IO> {
    pub fn new(inner: &'a mut IO) -> Self {
        Self {
            inner,
            staged: StagedWrites::default(),
        }
    }

    pub fn into_writes(self) -> StagedWrites {
        self.staged
    }
}

impl<IO: NvmIo + ?Sized> NvmIo for StagedIo<'_, IO> {
    fn open(&mut self, _access: NvmAccess) -> Result<NvmAccess> {
        Ok(self.inner.access_mode())
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn access_mode(&self) -> NvmAccess {
        self.inner.access_mode()
    }

    fn determine_chunk_size(&mut self) -> Result<usize> {
        self.inner.determine_chunk_size()
    }

    fn read(&mut self, offset: usize, len: usize) -> Result<ReadResult> {
        let mut result = self.inner.read(offset, len)?;
        self.staged.overlay(offset, &mut result.data);
        Ok(result)
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<WriteResult> {
        ensure_argument!(
            self.inner.access_mode().can_write(),
            "NVM is not open for writing"
        );
        ensure_argument!(
            offset + data.len() <= self.inner.size(),
            "staged write of {} bytes at offset {:#x} exceeds the NVM size {}",
            data.len(),
            offset,
            self.inner.size()
        );
        self.staged.writes.push((offset, data.to_vec()));
        Ok(WriteResult {
            bytes_written: data.len(),
            end_of_data: offset + data.len() == self.inner.size(),
        })
    }

    /// Closing a staged view leaves the underlying medium open.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::driver::read_exact_at;
    use crate::storage::MemoryIo;

    fn open_memory(bytes: Vec<u8>) -> MemoryIo {
        let mut io = MemoryIo::new(bytes);
        io.open(NvmAccess::ReadWrite).unwrap();
        io
    }

    #[test]
    fn staged_writes_do_not_reach_the_medium() {
        let mut io = open_memory(vec![0xFF; 64]);
        let mut staged = StagedIo::new(&mut io);
        write_all_at(&mut staged, 8, &[1, 2, 3, 4]).unwrap();
        let writes = staged.into_writes();

        assert_eq!(io.as_bytes(), &[0xFF; 64][..]);
        assert_eq!(writes.len_bytes(), 4);
    }

    #[test]
    fn reads_see_later_writes_on_top() {
        let mut io = open_memory((0..32).collect());
        let mut staged = StagedIo::new(&mut io);
        write_all_at(&mut staged, 4, &[0xAA; 8]).unwrap();
        write_all_at(&mut staged, 10, &[0xBB; 4]).unwrap();

        let out = read_exact_at(&mut staged, 2, 14).unwrap();
        assert_eq!(
            out,
            vec![2, 3, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xBB, 0xBB, 0xBB, 0xBB, 14, 15]
        );
    }

    #[test]
    fn overlay_works_across_short_reads() {
        let mut io = open_memory(vec![0; 32]).with_chunk_size(3);
        let mut staged = StagedIo::new(&mut io);
        write_all_at(&mut staged, 5, &[7; 10]).unwrap();

        let out = read_exact_at(&mut staged, 0, 20).unwrap();
        assert_eq!(&out[5..15], &[7; 10]);
        assert_eq!(out[4], 0);
        assert_eq!(out[15], 0);
    }

    #[test]
    fn apply_replays_writes_in_order() {
        let mut io = open_memory(vec![0xFF; 16]);
        let writes = {
            let mut staged = StagedIo::new(&mut io);
            write_all_at(&mut staged, 0, &[1; 8]).unwrap();
            write_all_at(&mut staged, 4, &[2; 8]).unwrap();
            staged.into_writes()
        };

        writes.apply(&mut io).unwrap();
        assert_eq!(&io.as_bytes()[..12], &[1, 1, 1, 1, 2, 2, 2, 2, 2, 2, 2, 2]);
        assert_eq!(io.as_bytes()[12], 0xFF);
    }

    #[test]
    fn staging_requires_a_writable_medium() {
        let mut io = MemoryIo::new(vec![0xFF; 16]);
        let mut staged = StagedIo::new(&mut io);
        assert!(write_all_at(&mut staged, 0, &[1]).unwrap_err().is_argument());
    }
}
