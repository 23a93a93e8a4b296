//! # NVM3 Layout Constants
//!
//! This module centralizes every on-disk constant of the NVM3 flash object
//! store. Constants that depend on each other are co-located so that a change
//! to one makes the dependent values visible in the same place.
//!
//! ## Dependency Graph
//!
//! ```text
//! WORD_SIZE (4 bytes)
//!       │
//!       ├─> PAGE_HEADER_SIZE (20 bytes, 5 words)
//!       │
//!       ├─> OBJ_HEADER_SIZE_SMALL (1 word)
//!       │
//!       └─> OBJ_HEADER_SIZE_LARGE (2 words)
//!
//! OBJ_TYPE bits (7) + OBJ_KEY_SIZE (20)
//!       │
//!       ├─> CODE_SMALL_SHIFT (27): 5 code bits remain in a small header
//!       │
//!       └─> OBJ_FRAGTYPE_SHIFT (27): 2 fragment bits in large header word 1
//!
//! OBJ_LARGE_LEN_BITS (26)
//!       │
//!       └─> CODE_LARGE_SHIFT (26): 6 code bits remain in large header word 2
//!
//! PAGE_COUNTER_SIZE (27)
//!       │
//!       └─> 5 code bits above each erase counter word
//! ```
//!
//! ## Critical Invariants
//!
//! 1. A Berger code over `n` bits is at most `n`, so it must fit into the
//!    `32 - n` spare bits (small header, erase counters) or the `64 - n` spare
//!    bits (large header).
//! 2. A small object's embedded length plus the `DataSmall` type value must
//!    fit into the 7-bit type field.
//! 3. The page size exponent field is 3 bits wide.

// ============================================================================
// WORD AND PAGE GEOMETRY
// ============================================================================

/// Flash write unit. All object offsets and sizes are aligned to it.
pub const WORD_SIZE: usize = 4;

/// Size of the page header at the start of every page.
pub const PAGE_HEADER_SIZE: usize = 20;

/// Smallest page size representable by the 3-bit size exponent.
pub const MIN_PAGE_SIZE: usize = 512;

/// Largest page size representable by the 3-bit size exponent.
pub const MAX_PAGE_SIZE: usize = 65536;

/// Number of distinct page size exponents.
pub const PAGE_SIZE_EXPONENTS: u8 = 8;

/// Page magic stored at offset 2 of every page header.
pub const PAGE_MAGIC: u16 = 0xB29A;

/// The only page format version this implementation reads and writes.
pub const PAGE_VERSION: u16 = 0x01;

/// Width of the erase counter (and of its inverse) in bits.
pub const PAGE_COUNTER_SIZE: u32 = 27;

pub const PAGE_COUNTER_MASK: u32 = (1 << PAGE_COUNTER_SIZE) - 1;

const _: () = assert!(PAGE_HEADER_SIZE % WORD_SIZE == 0);
const _: () = assert!(MIN_PAGE_SIZE << (PAGE_SIZE_EXPONENTS - 1) == MAX_PAGE_SIZE);
const _: () = assert!(
    (1u32 << (32 - PAGE_COUNTER_SIZE)) > PAGE_COUNTER_SIZE,
    "erase counter code must fit above the counter"
);

// ============================================================================
// PAGE STATUS
// ============================================================================

pub const PAGE_STATUS_OK: u32 = 0xFFFF_FFFF;

/// Value of the format info field for an unencrypted page. Bit 0 cleared
/// marks the page as encrypted.
pub const FORMAT_INFO_PLAIN: u16 = 0xFFFF;
pub const FORMAT_INFO_ENCRYPTED: u16 = 0xFFFE;

pub const DEVICE_FAMILY_MASK: u16 = 0x7FF;
pub const WRITE_SIZE_SHIFT: u16 = 11;
pub const MEMORY_MAPPED_SHIFT: u16 = 12;
pub const PAGE_SIZE_SHIFT: u16 = 13;

// ============================================================================
// OBJECT HEADER LAYOUT
// ============================================================================

pub const OBJ_HEADER_SIZE_SMALL: usize = 4;
pub const OBJ_HEADER_SIZE_LARGE: usize = 8;

pub const OBJ_TYPE_MASK: u32 = 0b111_1111;

pub const OBJ_KEY_SIZE: u32 = 20;
pub const OBJ_KEY_SHIFT: u32 = 7;
pub const OBJ_KEY_MASK: u32 = (1 << OBJ_KEY_SIZE) - 1;

pub const OBJ_FRAGTYPE_SHIFT: u32 = 27;
pub const OBJ_FRAGTYPE_MASK: u32 = 0b11;

pub const OBJ_LARGE_LEN_BITS: u32 = 26;
pub const OBJ_LARGE_LEN_MASK: u32 = (1 << OBJ_LARGE_LEN_BITS) - 1;

/// Bits covered by the Berger code of a small object header.
pub const CODE_SMALL_SHIFT: u32 = 27;

/// Bits of the second large header word covered by its Berger code. The
/// code spans the whole first word plus these bits.
pub const CODE_LARGE_SHIFT: u32 = 26;
pub const CODE_LARGE_BITS: u32 = 32 + CODE_LARGE_SHIFT;

/// Payloads up to this length are stored as small objects.
pub const OBJ_SMALL_MAX_SIZE: usize = 120;

/// Payload length implied by a `CounterSmall` object.
pub const OBJ_SMALL_COUNTER_SIZE: usize = 4;

/// Type value of a small data object. Embedded payload lengths are added on
/// top of it.
pub const OBJ_TYPE_DATA_SMALL: u32 = 7;

/// Marker word of unwritten flash.
pub const ERASED_WORD: u32 = 0xFFFF_FFFF;

const _: () = assert!(OBJ_KEY_SHIFT + OBJ_KEY_SIZE == CODE_SMALL_SHIFT);
const _: () = assert!(OBJ_KEY_SHIFT + OBJ_KEY_SIZE == OBJ_FRAGTYPE_SHIFT);
const _: () = assert!(
    OBJ_TYPE_DATA_SMALL as usize + OBJ_SMALL_MAX_SIZE <= OBJ_TYPE_MASK as usize,
    "embedded small object length must fit into the type field"
);
const _: () = assert!((1u32 << (32 - CODE_SMALL_SHIFT)) > CODE_SMALL_SHIFT);
const _: () = assert!((1u32 << (32 - CODE_LARGE_SHIFT)) > CODE_LARGE_BITS);

// ============================================================================
// Z-WAVE CONTROLLER LAYOUT
// ============================================================================

/// Size of the application range at the start of a split-layout image.
pub const ZWAVE_APPLICATION_NVM_SIZE: usize = 0x3000;

/// Largest page size written by 700 series controllers.
pub const FLASH_MAX_PAGE_SIZE_700: usize = 2048;

/// Largest page size written by 800 series controllers.
pub const FLASH_MAX_PAGE_SIZE_800: usize = 8192;

/// Key of the application version file written only by 800 series firmware.
/// Its presence marks a shared (single section) layout.
pub const APPLICATION_VERSION_FILE_800_ID: u32 = 0x41000;

/// First and last key of the protocol file range.
pub const PROTOCOL_KEY_FIRST: u32 = 0x50000;
pub const PROTOCOL_KEY_LAST: u32 = 0x5FFFF;

pub const DEFAULT_DEVICE_FAMILY: u16 = 2047;

const _: () = assert!(ZWAVE_APPLICATION_NVM_SIZE % FLASH_MAX_PAGE_SIZE_700 == 0);
const _: () = assert!(PROTOCOL_KEY_LAST <= OBJ_KEY_MASK);
