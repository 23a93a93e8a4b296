//! # zwnvm CLI Module
//!
//! Command implementations behind the `zwnvm` binary. The binary parses its
//! arguments, opens the image file as an [`MmapIo`](crate::MmapIo), and
//! hands the command to [`commands::execute`].
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              CLI Entry Point                 │
//! │              (bin/zwnvm.rs)                  │
//! ├──────────────────────────────────────────────┤
//! │     Commands           │   Table Formatter   │
//! │  (info, dump, get,     │  ASCII tables for   │
//! │   set, delete, erase)  │  info and dump      │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! zwnvm backup.bin info
//! zwnvm backup.bin get 0x50004
//! zwnvm backup.bin set 0x50004 01020304
//! zwnvm backup.bin erase --page-size 2048
//! ```
//!
//! Set `RUST_LOG=zwnvm=debug` to see page scans and rotations.

pub mod commands;
pub mod table;

pub use commands::{execute, Command};
pub use table::TableFormatter;
