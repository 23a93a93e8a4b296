//! # zwnvm - Z-Wave NVM3 Flash Images
//!
//! zwnvm reads and writes the non-volatile memory image of a Z-Wave
//! controller: a flat byte blob emulating Silicon Labs' NVM3 flash object
//! store. The store is a page-based, wear-leveling, Berger-code protected
//! key/value log, and every byte written here must be accepted by the
//! controller's own flash driver after a restore.
//!
//! ## Quick Start
//!
//! ```ignore
//! use zwnvm::{EraseOptions, MemoryIo, Nvm3};
//!
//! let mut nvm = Nvm3::new(MemoryIo::erased(0x3000 + 0x2000));
//! nvm.erase(&EraseOptions::default())?;
//!
//! nvm.set(0x50004, vec![1, 2, 3, 4])?;
//! assert_eq!(nvm.get(0x50004)?, Some(vec![1, 2, 3, 4]));
//!
//! nvm.delete(0x50004)?;
//! assert!(!nvm.has(0x50004)?);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │    Nvm3 (get/set/delete, layout)    │
//! ├─────────────────────────────────────┤
//! │  Section (ring buffer, key index)   │
//! ├──────────────────┬──────────────────┤
//! │   Page codec     │   Object codec   │
//! ├──────────────────┴──────────────────┤
//! │      Berger integrity codes         │
//! ├─────────────────────────────────────┤
//! │  NvmIo (MemoryIo | MmapIo)          │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`config`]: on-flash constants and erase/open options
//! - [`encoding`]: Berger codes
//! - [`storage`]: page and object codecs, ring buffer sections, media
//! - [`nvm3`]: the store and its section routing
//! - [`error`]: the error taxonomy
//! - `cli`: command implementations for the `zwnvm` binary

#[macro_use]
mod macros;

pub mod cli;
pub mod config;
pub mod encoding;
pub mod error;
pub mod nvm3;
pub mod storage;

pub use config::{EraseOptions, StoreOptions};
pub use error::{NvmError, Result};
pub use nvm3::{Nvm3, NvmMeta, NvmSection};
pub use storage::{MemoryIo, MmapIo, NvmAccess, NvmIo, PageWriteSize};
