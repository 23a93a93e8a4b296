//! # Storage Module
//!
//! This module implements the NVM3 flash object store underneath the
//! key/value API of [`crate::Nvm3`]: the on-flash page and object formats,
//! the ring buffer that turns a run of pages into an append-only log, and
//! the byte media an image can live on.
//!
//! ## Architecture Overview
//!
//! ```text
//! Nvm3 (key routing, access modes, erase)
//!   └── Section (ring buffer: index, current page, rotation)
//!         ├── page   (20-byte page header codec)
//!         ├── object (object header codec, fragmentation)
//!         └── driver (NvmIo: MemoryIo | MmapIo)
//! ```
//!
//! Every operation goes through [`NvmIo`]. Sections keep only object
//! headers in memory; payloads are read from the medium on demand.
//!
//! ## Image Layout
//!
//! An NVM image is a run of equally sized pages. Older controllers split
//! the image into an application range (the first 12 KiB) and a protocol
//! range; newer ones use one shared range. Each range is an independent
//! ring buffer.
//!
//! ```text
//! split:   [ app page | app page | ... | proto page | proto page | ... ]
//!           <------- 0x3000 -------->
//! shared:  [ page | page | page | ... ]
//! ```
//!
//! ## Failure Model
//!
//! Flash is written append-only. A page is erased as a whole when the ring
//! wraps onto it, after its live objects were copied forward. Structural
//! damage (bad magic, Berger code mismatch, truncated objects) is reported
//! as a format error and never skipped.
//!
//! ## Module Organization
//!
//! - `driver`: the `NvmIo` trait and chunked transfer helpers
//! - `memory`: in-memory medium (`MemoryIo`)
//! - `mmap`: memory-mapped file medium (`MmapIo`)
//! - `page`: page header layout (`PageHeader`, `RawPageHeader`)
//! - `object`: object headers, fragmentation and reassembly
//! - `section`: ring buffer management (`Section`)
//! - `staged`: write staging so a batch is planned before it touches flash

mod driver;
mod memory;
mod mmap;
pub mod object;
pub mod page;
mod section;
mod staged;

pub use driver::{read_exact_at, write_all_at, NvmAccess, NvmIo, ReadResult, WriteResult};
pub use memory::MemoryIo;
pub use mmap::MmapIo;
pub use object::{FragmentType, NvmObject, ObjectHeader, ObjectType};
pub use page::{PageHeader, PageWriteSize, RawPageHeader};
pub use section::{scan_page, NvmPage, Section, StagedBatch};
