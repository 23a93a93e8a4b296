//! # Error Types
//!
//! Every fallible operation of the store returns [`NvmError`]. The variants
//! separate corrupt media from unsupported variants, caller misuse, and
//! missing keys, so callers can choose a recovery strategy by matching on
//! the category instead of parsing messages.
//!
//! | Variant          | Meaning                                              |
//! |------------------|------------------------------------------------------|
//! | `Format`         | on-disk invariant violated (magic, code, truncation) |
//! | `NotSupported`   | recognized but unsupported variant (newer version)   |
//! | `Argument`       | caller misuse (bad key, bad size configuration)      |
//! | `ObjectNotFound` | a required key is absent                             |
//! | `Io`             | the underlying medium failed                         |
//!
//! Structural errors are never repaired silently: a store that returned
//! `Format` during `init` must not be written to.

use thiserror::Error;

pub type Result<T, E = NvmError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum NvmError {
    #[error("invalid NVM format: {0}")]
    Format(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("object {0:#07x} not found")]
    ObjectNotFound(u32),

    #[error("NVM I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NvmError {
    pub fn is_format(&self) -> bool {
        matches!(self, NvmError::Format(_))
    }

    pub fn is_not_supported(&self) -> bool {
        matches!(self, NvmError::NotSupported(_))
    }

    pub fn is_argument(&self) -> bool {
        matches!(self, NvmError::Argument(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, NvmError::ObjectNotFound(_))
    }
}

/// Returns early with [`NvmError::Format`] built from a format string.
#[macro_export]
macro_rules! bail_format {
    ($($arg:tt)*) => {
        return Err($crate::error::NvmError::Format(format!($($arg)*)))
    };
}

/// Returns early with [`NvmError::Format`] unless the condition holds.
#[macro_export]
macro_rules! ensure_format {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            $crate::bail_format!($($arg)*);
        }
    };
}

/// Returns early with [`NvmError::Argument`] unless the condition holds.
#[macro_export]
macro_rules! ensure_argument {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err($crate::error::NvmError::Argument(format!($($arg)*)));
        }
    };
}
