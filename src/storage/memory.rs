//! # In-Memory NVM
//!
//! `MemoryIo` keeps a whole NVM image in a `Vec<u8>`. It backs unit tests
//! and tools that load an image, edit it and write it out in one piece.
//! Opening always grants `ReadWrite`. The chunk size can be lowered to
//! exercise partial transfers.

use super::driver::{NvmAccess, NvmIo, ReadResult, WriteResult};
use crate::ensure_argument;
use crate::error::Result;

const DEFAULT_CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone)]
pub struct MemoryIo {
    buffer: Vec<u8>,
    access: NvmAccess,
    chunk_size: usize,
}

impl MemoryIo {
    pub fn new(buffer: Vec<u8>) -> Self {
        Self {
            buffer,
            access: NvmAccess::None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// An erased (all `0xFF`) image of `size` bytes.
    pub fn erased(size: usize) -> Self {
        Self::new(vec![0xFF; size])
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }
}

impl NvmIo for MemoryIo {
    fn open(&mut self, _access: NvmAccess) -> Result<NvmAccess> {
        self.access = NvmAccess::ReadWrite;
        Ok(self.access)
    }

    fn size(&self) -> usize {
        self.buffer.len()
    }

    fn access_mode(&self) -> NvmAccess {
        self.access
    }

    fn determine_chunk_size(&mut self) -> Result<usize> {
        Ok(self.chunk_size)
    }

    fn read(&mut self, offset: usize, len: usize) -> Result<ReadResult> {
        ensure_argument!(self.access.can_read(), "NVM is not open for reading");

        let start = offset.min(self.buffer.len());
        let end = (offset + len.min(self.chunk_size)).min(self.buffer.len());
        Ok(ReadResult {
            data: self.buffer[start..end].to_vec(),
            end_of_data: end == self.buffer.len(),
        })
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<WriteResult> {
        ensure_argument!(self.access.can_write(), "NVM is not open for writing");

        let start = offset.min(self.buffer.len());
        let end = (offset + data.len().min(self.chunk_size)).min(self.buffer.len());
        self.buffer[start..end].copy_from_slice(&data[..end - start]);
        Ok(WriteResult {
            bytes_written: end - start,
            end_of_data: end == self.buffer.len(),
        })
    }

    fn close(&mut self) -> Result<()> {
        self.access = NvmAccess::None;
        Ok(())
    }
}
