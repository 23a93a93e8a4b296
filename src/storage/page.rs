//! # Page Header Layout
//!
//! Every NVM3 page begins with a 20-byte header. The rest of the page holds
//! objects, written front to back; unwritten space reads as `0xFF`.
//!
//! ## Page Header Layout (20 bytes)
//!
//! ```text
//! Offset  Size  Field                Description
//! ------  ----  -------------------  ---------------------------------------
//! 0       2     version              Page format version (0x0001)
//! 2       2     magic                0xB29A
//! 4       4     erase_count          27-bit counter, Berger code in bits 27..31
//! 8       4     erase_count_inverse  27-bit ~counter, Berger code in bits 27..31
//! 12      4     status               OK / erase pending / bad
//! 16      2     device_info          family:11 | write_size:1 | mmap:1 | size_exp:3
//! 18      2     format_info          bit 0 set = not encrypted
//! ```
//!
//! ## Erase Counter
//!
//! The counter is stored twice, once as-is and once inverted. Each copy
//! carries its own Berger code, and the two copies must agree
//! (`count == !inverse` within 27 bits). Any mismatch marks the page as
//! corrupt.
//!
//! ## Page Size
//!
//! The page size is `512 << size_exp`. Some controllers write an impossible
//! size (`size_exp == 7`, i.e. 64 KiB, which does not fit the 16-bit page
//! geometry of these parts). The decoder then probes the exponents in
//! ascending order and accepts the first size after which either a valid
//! page header begins or the image ends.
//!
//! ## Zero-Copy Access
//!
//! `RawPageHeader` uses `zerocopy` so the header can be read straight out of
//! a page buffer and written back as bytes without manual shifting of the
//! byte-aligned fields.

use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{
    DEVICE_FAMILY_MASK, FORMAT_INFO_ENCRYPTED, FORMAT_INFO_PLAIN, MAX_PAGE_SIZE,
    MEMORY_MAPPED_SHIFT, MIN_PAGE_SIZE, PAGE_COUNTER_MASK, PAGE_COUNTER_SIZE, PAGE_HEADER_SIZE,
    PAGE_MAGIC, PAGE_SIZE_EXPONENTS, PAGE_SIZE_SHIFT, PAGE_STATUS_OK, PAGE_VERSION,
    WRITE_SIZE_SHIFT,
};
use crate::encoding::berger;
use crate::error::{NvmError, Result};
use crate::{bail_format, ensure_argument, ensure_format};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageWriteSize {
    Write32 = 0,
    Write16 = 1,
}

impl PageWriteSize {
    pub fn from_bit(bit: u16) -> Self {
        if bit & 1 == 0 {
            PageWriteSize::Write32
        } else {
            PageWriteSize::Write16
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct RawPageHeader {
    version: U16,
    magic: U16,
    erase_count: U32,
    erase_count_inverse: U32,
    status: U32,
    device_info: U16,
    format_info: U16,
}

const _: () = assert!(std::mem::size_of::<RawPageHeader>() == PAGE_HEADER_SIZE);

impl RawPageHeader {
    crate::zerocopy_accessors! {
        version: u16,
        magic: u16,
        erase_count: u32,
        erase_count_inverse: u32,
        status: u32,
        device_info: u16,
        format_info: u16,
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        ensure_format!(
            data.len() >= PAGE_HEADER_SIZE,
            "buffer too small for page header: {} < {}",
            data.len(),
            PAGE_HEADER_SIZE
        );

        Self::ref_from_bytes(&data[..PAGE_HEADER_SIZE])
            .map_err(|e| NvmError::Format(format!("failed to read page header: {:?}", e)))
    }

    fn zeroed() -> Self {
        Self {
            version: U16::new(0),
            magic: U16::new(0),
            erase_count: U32::new(0),
            erase_count_inverse: U32::new(0),
            status: U32::new(0),
            device_info: U16::new(0),
            format_info: U16::new(0),
        }
    }

    fn size_exponent(&self) -> u8 {
        ((self.device_info() >> PAGE_SIZE_SHIFT) & 0b111) as u8
    }

    /// Checks magic, version and both erase counter copies. Returns the
    /// erase count.
    fn validate_counters(&self) -> Result<u32> {
        ensure_format!(
            self.magic() == PAGE_MAGIC,
            "not a valid NVM3 page: magic {:#06x}",
            self.magic()
        );
        let version = self.version();
        if version > PAGE_VERSION {
            return Err(NvmError::NotSupported(format!(
                "NVM3 page version {} (supported: {})",
                version, PAGE_VERSION
            )));
        }
        ensure_format!(
            version == PAGE_VERSION,
            "invalid NVM3 page version {}",
            version
        );

        let raw = self.erase_count();
        let erase_count = raw & PAGE_COUNTER_MASK;
        berger::validate(erase_count, raw >> PAGE_COUNTER_SIZE, PAGE_COUNTER_SIZE)?;

        let raw_inverse = self.erase_count_inverse();
        let inverse = raw_inverse & PAGE_COUNTER_MASK;
        berger::validate(inverse, raw_inverse >> PAGE_COUNTER_SIZE, PAGE_COUNTER_SIZE)?;

        ensure_format!(
            erase_count == (!inverse & PAGE_COUNTER_MASK),
            "invalid erase count: {:#x} does not match inverse {:#x}",
            erase_count,
            inverse
        );
        Ok(erase_count)
    }
}

/// Page size encoded by a 3-bit exponent.
#[inline]
pub fn page_size_from_exponent(exponent: u8) -> usize {
    MIN_PAGE_SIZE << exponent
}

/// Exponent for a supported page size.
pub fn page_size_exponent(page_size: usize) -> Result<u8> {
    ensure_argument!(
        page_size.is_power_of_two() && (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size),
        "unsupported page size {}",
        page_size
    );
    Ok((page_size.trailing_zeros() - MIN_PAGE_SIZE.trailing_zeros()) as u8)
}

/// Whether `bytes` start with something that looks like a page header:
/// the magic and a supported version. Erase counters are not checked.
pub fn is_valid_header(bytes: &[u8]) -> bool {
    RawPageHeader::from_bytes(bytes)
        .is_ok_and(|raw| raw.magic() == PAGE_MAGIC && raw.version() == PAGE_VERSION)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageHeader {
    /// Absolute offset of the page in the NVM.
    pub offset: usize,
    pub version: u16,
    pub erase_count: u32,
    pub status: u32,
    pub encrypted: bool,
    pub page_size: usize,
    pub write_size: PageWriteSize,
    pub memory_mapped: bool,
    pub device_family: u16,
}

impl PageHeader {
    /// Header of a freshly erased page.
    pub fn new(
        offset: usize,
        page_size: usize,
        device_family: u16,
        write_size: PageWriteSize,
        memory_mapped: bool,
    ) -> Self {
        Self {
            offset,
            version: PAGE_VERSION,
            erase_count: 0,
            status: PAGE_STATUS_OK,
            encrypted: false,
            page_size,
            write_size,
            memory_mapped,
            device_family,
        }
    }

    /// Decodes the header of the page at `offset` of an in-memory image,
    /// probing for the page size when the header's size field is invalid.
    pub fn decode(image: &[u8], offset: usize) -> Result<Self> {
        let Some(header_bytes) = image.get(offset..offset + PAGE_HEADER_SIZE) else {
            bail_format!("truncated page header at offset {:#x}", offset);
        };
        Self::decode_with(header_bytes, offset, image.len(), |next| {
            Ok(image
                .get(next..next + PAGE_HEADER_SIZE)
                .is_some_and(is_valid_header))
        })
    }

    /// Decodes a page header read from `offset` of an NVM of `nvm_size`
    /// bytes. `is_page_at` reports whether a valid page header begins at a
    /// given offset; it is only consulted when the size field is invalid.
    pub fn decode_with<F>(
        header_bytes: &[u8],
        offset: usize,
        nvm_size: usize,
        mut is_page_at: F,
    ) -> Result<Self>
    where
        F: FnMut(usize) -> Result<bool>,
    {
        let raw = RawPageHeader::from_bytes(header_bytes)?;
        let erase_count = raw.validate_counters()?;

        let device_info = raw.device_info();
        let mut page_size = page_size_from_exponent(raw.size_exponent());
        if page_size > u16::MAX as usize {
            page_size = Self::probe_page_size(offset, nvm_size, &mut is_page_at)?;
            tracing::warn!(
                offset,
                page_size,
                "page header has an invalid size field, recovered by probing"
            );
        }

        ensure_format!(
            offset + page_size <= nvm_size,
            "page at offset {:#x} with size {} exceeds the NVM size {}",
            offset,
            page_size,
            nvm_size
        );

        Ok(Self {
            offset,
            version: raw.version(),
            erase_count,
            status: raw.status(),
            encrypted: raw.format_info() & 1 == 0,
            page_size,
            write_size: PageWriteSize::from_bit(device_info >> WRITE_SIZE_SHIFT),
            memory_mapped: (device_info >> MEMORY_MAPPED_SHIFT) & 1 == 1,
            device_family: device_info & DEVICE_FAMILY_MASK,
        })
    }

    fn probe_page_size<F>(offset: usize, nvm_size: usize, is_page_at: &mut F) -> Result<usize>
    where
        F: FnMut(usize) -> Result<bool>,
    {
        for exponent in 0..PAGE_SIZE_EXPONENTS {
            let candidate = page_size_from_exponent(exponent);
            let next = offset + candidate;
            if next == nvm_size || (next < nvm_size && is_page_at(next)?) {
                return Ok(candidate);
            }
        }
        bail_format!(
            "could not determine page size of the page at offset {:#x}",
            offset
        )
    }

    /// Encodes the header, recomputing both erase counter codes.
    pub fn encode(&self) -> Result<[u8; PAGE_HEADER_SIZE]> {
        let exponent = page_size_exponent(self.page_size)?;
        ensure_argument!(
            self.device_family <= DEVICE_FAMILY_MASK,
            "device family {:#x} does not fit into 11 bits",
            self.device_family
        );

        let count = self.erase_count & PAGE_COUNTER_MASK;
        let inverse = !self.erase_count & PAGE_COUNTER_MASK;

        let mut raw = RawPageHeader::zeroed();
        raw.set_version(self.version);
        raw.set_magic(PAGE_MAGIC);
        raw.set_erase_count(
            count | (berger::compute(count, PAGE_COUNTER_SIZE) << PAGE_COUNTER_SIZE),
        );
        raw.set_erase_count_inverse(
            inverse | (berger::compute(inverse, PAGE_COUNTER_SIZE) << PAGE_COUNTER_SIZE),
        );
        raw.set_status(self.status);
        raw.set_device_info(
            (self.device_family & DEVICE_FAMILY_MASK)
                | ((self.write_size as u16 & 1) << WRITE_SIZE_SHIFT)
                | ((self.memory_mapped as u16) << MEMORY_MAPPED_SHIFT)
                | ((exponent as u16) << PAGE_SIZE_SHIFT),
        );
        raw.set_format_info(if self.encrypted {
            FORMAT_INFO_ENCRYPTED
        } else {
            FORMAT_INFO_PLAIN
        });

        let mut out = [0u8; PAGE_HEADER_SIZE];
        out.copy_from_slice(raw.as_bytes());
        Ok(out)
    }

    /// A full page image: this header followed by erased flash.
    pub fn blank_page(&self) -> Result<Vec<u8>> {
        let mut page = vec![0xFFu8; self.page_size];
        page[..PAGE_HEADER_SIZE].copy_from_slice(&self.encode()?);
        Ok(page)
    }

    /// Bytes available for objects.
    pub fn capacity(&self) -> usize {
        self.page_size - PAGE_HEADER_SIZE
    }
}
