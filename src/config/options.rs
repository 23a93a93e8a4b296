//! # Store Options
//!
//! Options that shape how an image is formatted ([`EraseOptions`]) and how an
//! existing image is split into sections ([`StoreOptions`]).
//!
//! ```ignore
//! let options = EraseOptions::default()
//!     .page_size(2048)
//!     .device_family(0x7FF)
//!     .shared_file_system(true);
//! nvm.erase(&options)?;
//! ```

use super::constants::{
    DEFAULT_DEVICE_FAMILY, FLASH_MAX_PAGE_SIZE_700, FLASH_MAX_PAGE_SIZE_800, MAX_PAGE_SIZE,
    MIN_PAGE_SIZE, ZWAVE_APPLICATION_NVM_SIZE,
};
use crate::error::{NvmError, Result};
use crate::storage::PageWriteSize;
use crate::{ensure_argument, ensure_format};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EraseOptions {
    page_size: Option<usize>,
    device_family: u16,
    write_size: PageWriteSize,
    memory_mapped: bool,
    shared_file_system: bool,
}

impl Default for EraseOptions {
    fn default() -> Self {
        Self {
            page_size: None,
            device_family: DEFAULT_DEVICE_FAMILY,
            write_size: PageWriteSize::Write16,
            memory_mapped: true,
            shared_file_system: false,
        }
    }
}

impl EraseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requested page size. Capped at the series maximum; defaults to it.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn device_family(mut self, device_family: u16) -> Self {
        self.device_family = device_family;
        self
    }

    pub fn write_size(mut self, write_size: PageWriteSize) -> Self {
        self.write_size = write_size;
        self
    }

    pub fn memory_mapped(mut self, memory_mapped: bool) -> Self {
        self.memory_mapped = memory_mapped;
        self
    }

    /// Formats the image as one shared section (800 series) instead of
    /// separate application and protocol sections.
    pub fn shared_file_system(mut self, shared: bool) -> Self {
        self.shared_file_system = shared;
        self
    }

    pub fn get_device_family(&self) -> u16 {
        self.device_family
    }

    pub fn get_write_size(&self) -> PageWriteSize {
        self.write_size
    }

    pub fn is_memory_mapped(&self) -> bool {
        self.memory_mapped
    }

    pub fn is_shared_file_system(&self) -> bool {
        self.shared_file_system
    }

    fn max_page_size(&self) -> usize {
        if self.shared_file_system {
            FLASH_MAX_PAGE_SIZE_800
        } else {
            FLASH_MAX_PAGE_SIZE_700
        }
    }

    /// Page size that `erase` will use.
    pub fn effective_page_size(&self) -> usize {
        let max = self.max_page_size();
        self.page_size.unwrap_or(max).min(max)
    }

    /// Checks the requested geometry against an image of `nvm_size` bytes and
    /// returns the page size to format with.
    ///
    /// A page size that is not a power of two in range is caller misuse; an
    /// image (or split range) that is not a whole number of pages is a
    /// format error.
    pub fn validate(&self, nvm_size: usize, application_size: usize) -> Result<usize> {
        let page_size = self.effective_page_size();

        ensure_argument!(
            page_size.is_power_of_two() && (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size),
            "page size {} must be a power of two between {} and {}",
            page_size,
            MIN_PAGE_SIZE,
            MAX_PAGE_SIZE
        );
        ensure_argument!(
            self.device_family <= 0x7FF,
            "device family {:#x} does not fit into 11 bits",
            self.device_family
        );
        ensure_format!(nvm_size > 0, "cannot format an empty NVM");
        ensure_format!(
            nvm_size % page_size == 0,
            "NVM size {} must be a multiple of the page size {}",
            nvm_size,
            page_size
        );

        if !self.shared_file_system {
            ensure_format!(
                application_size % page_size == 0,
                "application NVM size {} must be a multiple of the page size {}",
                application_size,
                page_size
            );
            ensure_format!(
                nvm_size.saturating_sub(application_size) % page_size == 0,
                "protocol NVM size {} must be a multiple of the page size {}",
                nvm_size.saturating_sub(application_size),
                page_size
            );
        }

        Ok(page_size)
    }
}

/// Options applied when an existing image is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    application_size: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            application_size: ZWAVE_APPLICATION_NVM_SIZE,
        }
    }
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size of the application range in a split layout. Pages starting below
    /// this offset belong to the application section.
    pub fn application_size(mut self, size: usize) -> Result<Self> {
        if size % MIN_PAGE_SIZE != 0 {
            return Err(NvmError::Argument(format!(
                "application size {} must be a multiple of {}",
                size, MIN_PAGE_SIZE
            )));
        }
        self.application_size = size;
        Ok(self)
    }

    pub fn get_application_size(&self) -> usize {
        self.application_size
    }
}
