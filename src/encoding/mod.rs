//! # Encoding Module
//!
//! Low-level bit codes shared by the page and object codecs:
//!
//! - **Berger codes**: zero-bit counting checksums over header words

pub mod berger;

pub use berger::{compute, compute_multi, validate, validate_embedded, validate_multi};
