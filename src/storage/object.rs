//! # NVM3 Objects
//!
//! An object is one key/value record inside a page: a header of one or two
//! 32-bit words followed by the payload, padded to a word boundary.
//!
//! ## Small Object Header (4 bytes)
//!
//! ```text
//!  31    27 26                    7 6         0
//! +--------+-----------------------+-----------+
//! |  code  |        key (20)        | type (7)  |
//! +--------+-----------------------+-----------+
//! ```
//!
//! A small data object stores its payload length in the type field:
//! `type = DataSmall + len`, so lengths 1..=120 map to type values 8..=127.
//! A small counter always carries a 4-byte payload; a tombstone none.
//!
//! ## Large Object Header (8 bytes)
//!
//! ```text
//! word 0:  31  29 28 27 26                    7 6         0
//!         +------+-----+-----------------------+-----------+
//!         |  -   |frag |        key (20)        | type (7)  |
//!         +------+-----+-----------------------+-----------+
//! word 1:  31          26 25                               0
//!         +--------------+----------------------------------+
//!         |   code (6)   |        payload length (26)        |
//!         +--------------+----------------------------------+
//! ```
//!
//! The code of a small header covers its low 27 bits; the code of a large
//! header covers word 0 and the low 26 bits of word 1.
//!
//! ## Fragmentation
//!
//! A large value that does not fit into the remaining space of a page is
//! split into a chain `First -> Next* -> Last` of large objects that share
//! the key. Each fragment after the first starts at the beginning of a fresh
//! page. Small objects are never split.

use smallvec::SmallVec;

use crate::config::{
    CODE_LARGE_BITS, CODE_LARGE_SHIFT, CODE_SMALL_SHIFT, ERASED_WORD, OBJ_FRAGTYPE_MASK,
    OBJ_FRAGTYPE_SHIFT, OBJ_HEADER_SIZE_LARGE, OBJ_HEADER_SIZE_SMALL, OBJ_KEY_MASK, OBJ_KEY_SHIFT,
    OBJ_LARGE_LEN_MASK, OBJ_SMALL_COUNTER_SIZE, OBJ_SMALL_MAX_SIZE, OBJ_TYPE_DATA_SMALL,
    OBJ_TYPE_MASK, WORD_SIZE,
};
use crate::encoding::berger;
use crate::error::{NvmError, Result};
use crate::{bail_format, ensure_argument, ensure_format};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    DataLarge = 0,
    CounterLarge = 1,
    CounterSmall = 2,
    Deleted = 3,
    DataSmall = 7,
}

impl ObjectType {
    pub fn is_large(self) -> bool {
        matches!(self, ObjectType::DataLarge | ObjectType::CounterLarge)
    }

    pub fn header_size(self) -> usize {
        if self.is_large() {
            OBJ_HEADER_SIZE_LARGE
        } else {
            OBJ_HEADER_SIZE_SMALL
        }
    }

    /// Data type for a payload of `len` bytes.
    pub fn data_for_len(len: usize) -> Self {
        if len > OBJ_SMALL_MAX_SIZE {
            ObjectType::DataLarge
        } else {
            ObjectType::DataSmall
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentType {
    None = 0,
    First = 1,
    Next = 2,
    Last = 3,
}

impl FragmentType {
    fn from_bits(bits: u32) -> Self {
        match bits & OBJ_FRAGTYPE_MASK {
            0 => FragmentType::None,
            1 => FragmentType::First,
            2 => FragmentType::Next,
            _ => FragmentType::Last,
        }
    }

    /// Whether an object with this role may anchor its key's location.
    pub fn is_root(self) -> bool {
        matches!(self, FragmentType::None | FragmentType::First)
    }
}

/// Rounds `len` up to the next word boundary.
#[inline]
pub const fn aligned_size(len: usize) -> usize {
    (len + WORD_SIZE - 1) & !(WORD_SIZE - 1)
}

/// Whether a header word marks unwritten flash.
#[inline]
pub fn is_blank(word: u32) -> bool {
    word == ERASED_WORD
}

/// Decoded object header, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    /// Offset of the header, relative to the buffer it was decoded from.
    pub offset: usize,
    pub key: u32,
    pub object_type: ObjectType,
    pub fragment_type: FragmentType,
    pub header_size: usize,
    pub fragment_size: usize,
}

impl ObjectHeader {
    /// Bytes occupied on flash, header included.
    pub fn aligned_size(&self) -> usize {
        self.header_size + aligned_size(self.fragment_size)
    }

    pub fn payload_offset(&self) -> usize {
        self.offset + self.header_size
    }

    pub fn is_tombstone(&self) -> bool {
        self.object_type == ObjectType::Deleted
    }

    pub(crate) fn with_base(mut self, base: usize) -> Self {
        self.offset += base;
        self
    }
}

fn read_word(bytes: &[u8], offset: usize) -> Option<u32> {
    let slice = bytes.get(offset..offset.checked_add(WORD_SIZE)?)?;
    Some(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

/// Decodes the object header at `offset`.
///
/// Returns `Ok(None)` when the first word is unwritten flash. Fails with a
/// format error when a header word is cut off, when the Berger code does not
/// match, or when the declared payload runs past the end of `bytes`.
pub fn decode_header(bytes: &[u8], offset: usize) -> Result<Option<ObjectHeader>> {
    let Some(hdr1) = read_word(bytes, offset) else {
        bail_format!("truncated object header at offset {:#x}", offset);
    };
    if is_blank(hdr1) {
        return Ok(None);
    }

    let key = (hdr1 >> OBJ_KEY_SHIFT) & OBJ_KEY_MASK;
    let raw_type = hdr1 & OBJ_TYPE_MASK;

    let (object_type, fragment_type, header_size, fragment_size) = match raw_type {
        0 | 1 => {
            let Some(hdr2) = read_word(bytes, offset + WORD_SIZE) else {
                bail_format!("truncated large object header at offset {:#x}", offset);
            };
            berger::validate_multi(&[hdr1, hdr2], CODE_LARGE_BITS)?;
            let object_type = if raw_type == 0 {
                ObjectType::DataLarge
            } else {
                ObjectType::CounterLarge
            };
            (
                object_type,
                FragmentType::from_bits(hdr1 >> OBJ_FRAGTYPE_SHIFT),
                OBJ_HEADER_SIZE_LARGE,
                (hdr2 & OBJ_LARGE_LEN_MASK) as usize,
            )
        }
        _ => {
            berger::validate_embedded(hdr1, CODE_SMALL_SHIFT)?;
            let (object_type, len) = match raw_type {
                2 => (ObjectType::CounterSmall, OBJ_SMALL_COUNTER_SIZE),
                3 => (ObjectType::Deleted, 0),
                t if t >= OBJ_TYPE_DATA_SMALL => {
                    (ObjectType::DataSmall, (t - OBJ_TYPE_DATA_SMALL) as usize)
                }
                t => {
                    return Err(NvmError::NotSupported(format!(
                        "reserved object type {} at offset {:#x}",
                        t, offset
                    )))
                }
            };
            (object_type, FragmentType::None, OBJ_HEADER_SIZE_SMALL, len)
        }
    };

    ensure_format!(
        offset + header_size + fragment_size <= bytes.len(),
        "incomplete object {:#07x} at offset {:#x}: {} payload bytes exceed the buffer",
        key,
        offset,
        fragment_size
    );

    Ok(Some(ObjectHeader {
        offset,
        key,
        object_type,
        fragment_type,
        header_size,
        fragment_size,
    }))
}

/// One object (or one fragment of a value) with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NvmObject {
    pub key: u32,
    pub object_type: ObjectType,
    pub fragment_type: FragmentType,
    pub data: Vec<u8>,
}

pub type Fragments = SmallVec<[NvmObject; 2]>;

impl NvmObject {
    pub fn new(key: u32, object_type: ObjectType, data: Vec<u8>) -> Self {
        Self {
            key,
            object_type,
            fragment_type: FragmentType::None,
            data,
        }
    }

    /// An unfragmented data object, small or large depending on its length.
    pub fn data(key: u32, data: Vec<u8>) -> Self {
        Self::new(key, ObjectType::data_for_len(data.len()), data)
    }

    pub fn tombstone(key: u32) -> Self {
        Self::new(key, ObjectType::Deleted, Vec::new())
    }

    pub fn header_size(&self) -> usize {
        self.object_type.header_size()
    }

    /// Bytes this object occupies on flash.
    pub fn required_size(&self) -> usize {
        self.header_size() + aligned_size(self.data.len())
    }

    pub(crate) fn check(&self) -> Result<()> {
        ensure_argument!(
            self.key <= OBJ_KEY_MASK,
            "key {:#x} does not fit into {} bits",
            self.key,
            OBJ_KEY_MASK.count_ones()
        );
        match self.object_type {
            ObjectType::DataLarge | ObjectType::CounterLarge => {
                ensure_argument!(
                    self.data.len() <= OBJ_LARGE_LEN_MASK as usize,
                    "payload of {} bytes is too large",
                    self.data.len()
                );
            }
            ObjectType::DataSmall => {
                ensure_argument!(
                    self.data.len() <= OBJ_SMALL_MAX_SIZE,
                    "small object payload of {} bytes exceeds {}",
                    self.data.len(),
                    OBJ_SMALL_MAX_SIZE
                );
            }
            ObjectType::CounterSmall => {
                ensure_argument!(
                    self.data.len() == OBJ_SMALL_COUNTER_SIZE,
                    "small counter payload must be {} bytes, got {}",
                    OBJ_SMALL_COUNTER_SIZE,
                    self.data.len()
                );
            }
            ObjectType::Deleted => {
                ensure_argument!(self.data.is_empty(), "tombstone must not carry a payload");
            }
        }
        ensure_argument!(
            self.object_type.is_large() || self.fragment_type == FragmentType::None,
            "small objects cannot be fragments"
        );
        Ok(())
    }

    /// Encodes header and payload, padded with erased bytes to a word
    /// boundary.
    pub fn encode(&self) -> Result<Vec<u8>> {
        self.check()?;

        let mut out = Vec::with_capacity(self.required_size());
        let key_bits = (self.key & OBJ_KEY_MASK) << OBJ_KEY_SHIFT;

        if self.object_type.is_large() {
            let hdr1 = (self.object_type as u32 & OBJ_TYPE_MASK)
                | key_bits
                | ((self.fragment_type as u32 & OBJ_FRAGTYPE_MASK) << OBJ_FRAGTYPE_SHIFT);
            let mut hdr2 = self.data.len() as u32 & OBJ_LARGE_LEN_MASK;
            let code = berger::compute_multi(&[hdr1, hdr2], CODE_LARGE_BITS);
            hdr2 |= code << CODE_LARGE_SHIFT;

            out.extend_from_slice(&hdr1.to_le_bytes());
            out.extend_from_slice(&hdr2.to_le_bytes());
        } else {
            let mut type_and_len = self.object_type as u32;
            if self.object_type == ObjectType::DataSmall {
                type_and_len += self.data.len() as u32;
            }
            let mut hdr1 = (type_and_len & OBJ_TYPE_MASK) | key_bits;
            hdr1 |= berger::compute(hdr1, CODE_SMALL_SHIFT) << CODE_SMALL_SHIFT;

            out.extend_from_slice(&hdr1.to_le_bytes());
        }

        out.extend_from_slice(&self.data);
        out.resize(self.required_size(), 0xFF);
        Ok(out)
    }
}

/// Decodes a complete object at `offset`. Returns the object and the number
/// of bytes it occupies, or `None` for unwritten flash.
pub fn decode(bytes: &[u8], offset: usize) -> Result<Option<(NvmObject, usize)>> {
    let Some(header) = decode_header(bytes, offset)? else {
        return Ok(None);
    };
    let start = header.payload_offset();
    let data = bytes[start..start + header.fragment_size].to_vec();
    let consumed = header.aligned_size().min(bytes.len() - offset);
    let object = NvmObject {
        key: header.key,
        object_type: header.object_type,
        fragment_type: header.fragment_type,
        data,
    };
    Ok(Some((object, consumed)))
}

/// Splits `object` into fragments so that the first fits into
/// `first_capacity` bytes and every following fragment into
/// `later_capacity` bytes, headers included.
///
/// An object that already fits is returned unchanged. Only large objects can
/// be fragmented.
pub fn fragment(object: NvmObject, first_capacity: usize, later_capacity: usize) -> Result<Fragments> {
    if object.required_size() <= first_capacity {
        let mut out = Fragments::new();
        out.push(object);
        return Ok(out);
    }

    ensure_argument!(
        object.object_type.is_large(),
        "small object {:#07x} of {} bytes does not fit into {} bytes",
        object.key,
        object.required_size(),
        first_capacity
    );
    ensure_argument!(
        first_capacity > OBJ_HEADER_SIZE_LARGE && later_capacity > OBJ_HEADER_SIZE_LARGE,
        "fragment capacities {} / {} leave no room for payload",
        first_capacity,
        later_capacity
    );

    let NvmObject {
        key,
        object_type,
        data,
        ..
    } = object;

    let mut out = Fragments::new();
    let mut offset = 0;
    while offset < data.len() {
        let capacity = if offset == 0 {
            first_capacity
        } else {
            later_capacity
        };
        let room = capacity - OBJ_HEADER_SIZE_LARGE;
        let end = (offset + room).min(data.len());
        let fragment_type = if offset == 0 {
            FragmentType::First
        } else if end == data.len() {
            FragmentType::Last
        } else {
            FragmentType::Next
        };
        out.push(NvmObject {
            key,
            object_type,
            fragment_type,
            data: data[offset..end].to_vec(),
        });
        offset = end;
    }

    Ok(out)
}

/// Concatenates a fragment chain in forward order, checking its roles.
pub fn reassemble(fragments: &[NvmObject]) -> Result<Vec<u8>> {
    match fragments {
        [] => Err(NvmError::Argument("empty fragment chain".into())),
        [single] if single.fragment_type == FragmentType::None => Ok(single.data.clone()),
        [first, middle @ .., last] => {
            ensure_format!(
                first.fragment_type == FragmentType::First
                    && last.fragment_type == FragmentType::Last
                    && middle.iter().all(|f| f.fragment_type == FragmentType::Next),
                "broken fragment chain for object {:#07x}",
                first.key
            );
            ensure_format!(
                fragments
                    .iter()
                    .all(|f| f.key == first.key && f.object_type == first.object_type),
                "fragment chain for object {:#07x} mixes keys or types",
                first.key
            );
            let mut out = Vec::with_capacity(fragments.iter().map(|f| f.data.len()).sum());
            for fragment in fragments {
                out.extend_from_slice(&fragment.data);
            }
            Ok(out)
        }
        [single] => Err(NvmError::Format(format!(
            "dangling {:?} fragment for object {:#07x}",
            single.fragment_type, single.key
        ))),
    }
}
