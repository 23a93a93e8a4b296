//! # Configuration Module
//!
//! This module centralizes all configuration for the NVM3 store:
//!
//! - [`constants`]: on-disk layout constants with compile-time checks
//! - [`options`]: caller-facing options for formatting and opening an image

pub mod constants;
pub mod options;

pub use constants::*;
pub use options::{EraseOptions, StoreOptions};
