//! # Ring Buffer Sections
//!
//! A section is an ordered run of pages used as one append-only ring
//! buffer. Objects are appended to the current page; when it is full the
//! section rotates to the next page (wrapping at the end), erasing it and
//! relocating every key that still lives there.
//!
//! ## Scanning
//!
//! `scan_page` reads one page header and walks its objects from the end of
//! the header until the first unwritten word. `Section::from_pages` then
//! builds the key index and picks the current page:
//!
//! ```text
//! index[key] = page of the newest None/First object for key,
//!              newer = later in scan order with erase_count >= recorded
//!
//! current    = last page with the highest erase count that holds objects
//!            | last page that holds any object
//!            | page 0
//! ```
//!
//! A tombstone anchors its key like any other root object and is dropped
//! from the index once the scan is complete, so a stale copy in an older
//! page cannot resurface.
//!
//! ## Reading
//!
//! `get` walks the ring backward from the current page and every page's
//! objects backward. The first object with the key decides:
//!
//! | object           | result                                         |
//! |------------------|------------------------------------------------|
//! | `Deleted`        | absent                                         |
//! | fragment `None`  | the value                                      |
//! | fragment `Last`  | start collecting, continue backward            |
//! | `Next` / `First` | prepend to the chain; `First` completes it     |
//!
//! A `Next` or `First` of a different object type than the chain being
//! collected discards the chain.
//!
//! ## Writing
//!
//! ```text
//! set(key, data):
//!   large: rotate if remaining <= 8, fragment(remaining, page_size - 20)
//!   small: rotate if it does not fit
//!   each fragment after the first starts on a fresh page
//!
//! rotate:
//!   target = (current + 1) % pages
//!   relocate = keys anchored on target, read via get, queued first
//!              (skipping the key being written)
//!   if target holds objects: erase_count += 1, rewrite blank page
//!   offset = 20
//! ```
//!
//! A batch is first run on a copy of the section over a [`StagedIo`], which
//! records writes instead of performing them. Only a batch that completes is
//! written to the medium, so running out of space loses nothing.

use std::collections::VecDeque;

use hashbrown::HashMap;
use smallvec::SmallVec;

use super::driver::{read_exact_at, write_all_at, NvmIo};
use super::object::{self, FragmentType, NvmObject, ObjectHeader, ObjectType};
use super::page::{is_valid_header, PageHeader};
use super::staged::{StagedIo, StagedWrites};
use crate::config::{OBJ_HEADER_SIZE_LARGE, OBJ_SMALL_COUNTER_SIZE, PAGE_HEADER_SIZE, WORD_SIZE};
use crate::error::{NvmError, Result};
use crate::{bail_format, ensure_argument};

/// One page with the headers of the objects it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NvmPage {
    pub header: PageHeader,
    /// Object headers in write order, with absolute offsets.
    pub objects: Vec<ObjectHeader>,
}

impl NvmPage {
    pub fn empty(header: PageHeader) -> Self {
        Self {
            header,
            objects: Vec::new(),
        }
    }

    /// Bytes in use, page header included.
    pub fn used_bytes(&self) -> usize {
        PAGE_HEADER_SIZE + self.objects.iter().map(ObjectHeader::aligned_size).sum::<usize>()
    }
}

/// Reads the page at `offset` of an NVM of `nvm_size` bytes and decodes its
/// object headers.
pub fn scan_page<IO: NvmIo + ?Sized>(io: &mut IO, offset: usize, nvm_size: usize) -> Result<NvmPage> {
    let header_bytes = read_exact_at(io, offset, PAGE_HEADER_SIZE)?;
    let header = PageHeader::decode_with(&header_bytes, offset, nvm_size, |next| {
        Ok(next + PAGE_HEADER_SIZE <= nvm_size
            && is_valid_header(&read_exact_at(io, next, PAGE_HEADER_SIZE)?))
    })?;

    let bytes = read_exact_at(io, offset, header.page_size)?;
    let mut objects = Vec::new();
    let mut cursor = PAGE_HEADER_SIZE;
    while cursor + WORD_SIZE <= bytes.len() {
        let Some(object) = object::decode_header(&bytes, cursor)? else {
            break;
        };
        cursor += object.aligned_size();
        objects.push(object.with_base(offset));
    }

    Ok(NvmPage { header, objects })
}

#[derive(Debug, Clone, Copy)]
struct Anchor {
    page: usize,
    deleted: bool,
}

/// A pending write, tagged with whether it was queued by the caller or by
/// a page rotation.
#[derive(Debug)]
struct Pending {
    object: NvmObject,
    relocated: bool,
}

#[derive(Debug, Default)]
struct WriteQueue {
    pending: VecDeque<Pending>,
    rotations_without_progress: usize,
}

/// A planned batch: the section state after the batch and the writes that
/// produce it.
#[derive(Debug)]
pub struct StagedBatch {
    section: Section,
    writes: StagedWrites,
}

#[derive(Debug, Clone)]
pub struct Section {
    name: &'static str,
    pages: Vec<NvmPage>,
    current_page: usize,
    offset: usize,
    index: HashMap<u32, usize>,
}

impl Section {
    /// Builds the key index and write position from scanned pages.
    pub fn from_pages(name: &'static str, pages: Vec<NvmPage>) -> Self {
        let mut anchors: HashMap<u32, Anchor> = HashMap::new();
        for (page_index, page) in pages.iter().enumerate() {
            for object in &page.objects {
                if !object.fragment_type.is_root() {
                    continue;
                }
                let newer = anchors.get(&object.key).map_or(true, |anchor| {
                    page.header.erase_count >= pages[anchor.page].header.erase_count
                });
                if newer {
                    anchors.insert(
                        object.key,
                        Anchor {
                            page: page_index,
                            deleted: object.is_tombstone(),
                        },
                    );
                }
            }
        }
        let index: HashMap<u32, usize> = anchors
            .into_iter()
            .filter(|(_, anchor)| !anchor.deleted)
            .map(|(key, anchor)| (key, anchor.page))
            .collect();

        let max_erase_count = pages.iter().map(|p| p.header.erase_count).max().unwrap_or(0);
        let current_page = pages
            .iter()
            .rposition(|p| p.header.erase_count == max_erase_count && !p.objects.is_empty())
            .or_else(|| pages.iter().rposition(|p| !p.objects.is_empty()))
            .unwrap_or(0);
        let offset = pages.get(current_page).map_or(PAGE_HEADER_SIZE, NvmPage::used_bytes);

        tracing::debug!(
            section = name,
            pages = pages.len(),
            keys = index.len(),
            current_page,
            offset,
            "scanned NVM section"
        );

        Self {
            name,
            pages,
            current_page,
            offset,
            index,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn pages(&self) -> &[NvmPage] {
        &self.pages
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    /// Next free byte within the current page, relative to its start.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn page_size(&self) -> Option<usize> {
        self.pages.first().map(|p| p.header.page_size)
    }

    pub fn has(&self, key: u32) -> bool {
        self.index.contains_key(&key)
    }

    /// Live keys in ascending order.
    pub fn keys(&self) -> Vec<u32> {
        let mut keys: Vec<u32> = self.index.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    fn remaining(&self) -> usize {
        self.pages[self.current_page].header.page_size - self.offset
    }

    /// Pages in backward ring order, starting at the current page.
    fn backward_from_current(&self) -> impl Iterator<Item = usize> {
        let count = self.pages.len();
        let current = self.current_page;
        (0..count).map(move |step| (current + count - step) % count)
    }

    pub fn get<IO: NvmIo + ?Sized>(&self, io: &mut IO, key: u32) -> Result<Option<Vec<u8>>> {
        Ok(self.find(io, key)?.map(|(_, data)| data))
    }

    /// Looks up the newest value of `key` together with its object type.
    fn find<IO: NvmIo + ?Sized>(&self, io: &mut IO, key: u32) -> Result<Option<(ObjectType, Vec<u8>)>> {
        // fragments of the chain being collected, newest first
        let mut chain: SmallVec<[NvmObject; 4]> = SmallVec::new();

        for page_index in self.backward_from_current() {
            for header in self.pages[page_index].objects.iter().rev() {
                if header.key != key {
                    continue;
                }
                if header.is_tombstone() {
                    return Ok(None);
                }

                match header.fragment_type {
                    FragmentType::None => {
                        let object = read_fragment(io, header)?;
                        return Ok(Some((object.object_type, object.data)));
                    }
                    FragmentType::Last => {
                        chain.clear();
                        chain.push(read_fragment(io, header)?);
                    }
                    FragmentType::Next | FragmentType::First => {
                        let Some(newest) = chain.first() else {
                            continue;
                        };
                        if newest.object_type != header.object_type {
                            chain.clear();
                            continue;
                        }
                        chain.push(read_fragment(io, header)?);
                        if header.fragment_type == FragmentType::First {
                            let object_type = header.object_type;
                            chain.reverse();
                            let data = object::reassemble(&chain)?;
                            return Ok(Some((object_type, data)));
                        }
                    }
                }
            }
        }

        Ok(None)
    }

    /// Writes a batch of objects, rotating pages as needed. Nothing is
    /// written unless the whole batch fits.
    pub fn set_many<IO: NvmIo + ?Sized>(&mut self, io: &mut IO, objects: Vec<NvmObject>) -> Result<()> {
        let batch = self.stage(io, objects)?;
        self.commit(io, batch)
    }

    /// Plans a batch against the current image without writing to `io`.
    /// The returned batch holds the section state after the batch and the
    /// writes that produce it.
    pub fn stage<IO: NvmIo + ?Sized>(&self, io: &mut IO, objects: Vec<NvmObject>) -> Result<StagedBatch> {
        let mut section = self.clone();
        let mut staged = StagedIo::new(io);
        section.write_batch(&mut staged, objects)?;
        Ok(StagedBatch {
            section,
            writes: staged.into_writes(),
        })
    }

    /// Writes a batch planned by [`stage`](Self::stage) and adopts its state.
    pub fn commit<IO: NvmIo + ?Sized>(&mut self, io: &mut IO, batch: StagedBatch) -> Result<()> {
        ensure_argument!(
            batch.section.name == self.name && batch.section.pages.len() == self.pages.len(),
            "batch staged for section {} cannot be committed to section {}",
            batch.section.name,
            self.name
        );
        batch.writes.apply(io)?;
        tracing::trace!(
            section = self.name,
            bytes = batch.writes.len_bytes(),
            "committed NVM batch"
        );
        *self = batch.section;
        Ok(())
    }

    fn write_batch<IO: NvmIo + ?Sized>(&mut self, io: &mut IO, objects: Vec<NvmObject>) -> Result<()> {
        ensure_argument!(!self.pages.is_empty(), "NVM section {} has no pages", self.name);
        for object in &objects {
            object.check()?;
        }

        let page_size = self.pages[self.current_page].header.page_size;
        let mut queue = WriteQueue {
            pending: objects
                .into_iter()
                .map(|object| Pending {
                    object,
                    relocated: false,
                })
                .collect(),
            rotations_without_progress: 0,
        };

        while let Some(Pending { object, relocated }) = queue.pending.pop_front() {
            let key = object.key;
            let fragments = if object.object_type.is_large() {
                if self.remaining() <= OBJ_HEADER_SIZE_LARGE {
                    self.rotate(io, &mut queue, key)?;
                }
                object::fragment(object, self.remaining(), page_size - PAGE_HEADER_SIZE)?
            } else {
                if object.required_size() > self.remaining() {
                    self.rotate(io, &mut queue, key)?;
                }
                let mut single = object::Fragments::new();
                single.push(object);
                single
            };

            for (i, fragment) in fragments.into_iter().enumerate() {
                if i > 0 {
                    self.rotate(io, &mut queue, key)?;
                }
                self.write_object(io, &fragment)?;
            }

            if !relocated {
                queue.rotations_without_progress = 0;
            }
        }

        Ok(())
    }

    pub fn set<IO: NvmIo + ?Sized>(&mut self, io: &mut IO, key: u32, data: Vec<u8>) -> Result<()> {
        self.set_many(io, vec![NvmObject::data(key, data)])
    }

    pub fn delete<IO: NvmIo + ?Sized>(&mut self, io: &mut IO, key: u32) -> Result<()> {
        self.set_many(io, vec![NvmObject::tombstone(key)])
    }

    fn write_object<IO: NvmIo + ?Sized>(&mut self, io: &mut IO, object: &NvmObject) -> Result<()> {
        let size = object.required_size();
        if size > self.remaining() {
            bail_format!(
                "object {:#07x} of {} bytes does not fit into page {} of section {}",
                object.key,
                size,
                self.current_page,
                self.name
            );
        }

        let page = &mut self.pages[self.current_page];
        let absolute = page.header.offset + self.offset;
        write_all_at(io, absolute, &object.encode()?)?;

        page.objects.push(ObjectHeader {
            offset: absolute,
            key: object.key,
            object_type: object.object_type,
            fragment_type: object.fragment_type,
            header_size: object.header_size(),
            fragment_size: object.data.len(),
        });
        self.offset += size;

        if object.object_type == ObjectType::Deleted {
            self.index.remove(&object.key);
        } else if object.fragment_type.is_root() {
            self.index.insert(object.key, self.current_page);
        }

        tracing::trace!(
            section = self.name,
            key = object.key,
            page = self.current_page,
            offset = absolute,
            size,
            "wrote NVM object"
        );
        Ok(())
    }

    /// Moves to the next page. Keys anchored there are queued for
    /// relocation, except `in_flight`, which is about to be overwritten.
    fn rotate<IO: NvmIo + ?Sized>(&mut self, io: &mut IO, queue: &mut WriteQueue, in_flight: u32) -> Result<()> {
        // a single page may still be compacted onto itself
        queue.rotations_without_progress += 1;
        ensure_argument!(
            queue.rotations_without_progress < self.pages.len().max(2),
            "not enough space in NVM section {} to store the data",
            self.name
        );

        let target = (self.current_page + 1) % self.pages.len();

        let mut live: Vec<u32> = self
            .index
            .iter()
            .filter(|(key, page)| **page == target && **key != in_flight)
            .map(|(key, _)| *key)
            .collect();
        live.sort_unstable();

        let mut relocated = Vec::with_capacity(live.len());
        for key in live {
            let Some((object_type, data)) = self.find(io, key)? else {
                return Err(NvmError::Format(format!(
                    "live object {:#07x} in page {} of section {} could not be read back",
                    key, target, self.name
                )));
            };
            relocated.push(NvmObject::new(key, relocation_type(object_type, data.len()), data));
            self.index.remove(&key);
        }

        let page = &mut self.pages[target];
        if !page.objects.is_empty() {
            page.header.erase_count += 1;
            page.objects.clear();
            write_all_at(io, page.header.offset, &page.header.blank_page()?)?;
        }

        tracing::debug!(
            section = self.name,
            page = target,
            erase_count = page.header.erase_count,
            relocated = relocated.len(),
            "rotated to next NVM page"
        );

        for object in relocated.into_iter().rev() {
            queue.pending.push_front(Pending {
                object,
                relocated: true,
            });
        }

        self.current_page = target;
        self.offset = PAGE_HEADER_SIZE;
        Ok(())
    }
}

fn read_fragment<IO: NvmIo + ?Sized>(io: &mut IO, header: &ObjectHeader) -> Result<NvmObject> {
    Ok(NvmObject {
        key: header.key,
        object_type: header.object_type,
        fragment_type: header.fragment_type,
        data: read_exact_at(io, header.payload_offset(), header.fragment_size)?,
    })
}

/// Object type for a value moved out of a page that is about to be erased.
fn relocation_type(original: ObjectType, len: usize) -> ObjectType {
    match original {
        ObjectType::CounterSmall if len == OBJ_SMALL_COUNTER_SIZE => ObjectType::CounterSmall,
        ObjectType::CounterSmall | ObjectType::CounterLarge => ObjectType::CounterLarge,
        _ => ObjectType::data_for_len(len),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::driver::NvmAccess;
    use crate::storage::page::PageWriteSize;
    use crate::storage::MemoryIo;

    const PAGE_SIZE: usize = 512;

    fn erased_section(pages: usize) -> (MemoryIo, Section) {
        let mut image = Vec::with_capacity(pages * PAGE_SIZE);
        let mut headers = Vec::with_capacity(pages);
        for i in 0..pages {
            let header = PageHeader::new(i * PAGE_SIZE, PAGE_SIZE, 2047, PageWriteSize::Write16, true);
            image.extend_from_slice(&header.blank_page().unwrap());
            headers.push(NvmPage::empty(header));
        }
        let mut io = MemoryIo::new(image);
        io.open(NvmAccess::ReadWrite).unwrap();
        (io, Section::from_pages("test", headers))
    }

    fn rescan(io: &mut MemoryIo, pages: usize) -> Section {
        let size = io.size();
        let scanned = (0..pages)
            .map(|i| scan_page(io, i * PAGE_SIZE, size).unwrap())
            .collect();
        Section::from_pages("test", scanned)
    }

    #[test]
    fn small_write_lands_after_page_header() {
        let (mut io, mut section) = erased_section(2);
        section.set(&mut io, 0x1001, vec![1, 2, 3, 4]).unwrap();

        let object = section.pages()[0].objects[0];
        assert_eq!(object.offset, PAGE_HEADER_SIZE);
        assert_eq!(object.aligned_size(), 8);
        assert_eq!(section.offset(), PAGE_HEADER_SIZE + 8);
        assert_eq!(section.get(&mut io, 0x1001).unwrap(), Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn empty_section_starts_at_page_zero() {
        let (_, section) = erased_section(3);
        assert_eq!(section.current_page(), 0);
        assert_eq!(section.offset(), PAGE_HEADER_SIZE);
        assert!(section.keys().is_empty());
    }

    #[test]
    fn newest_write_wins() {
        let (mut io, mut section) = erased_section(2);
        section.set(&mut io, 7, vec![1]).unwrap();
        section.set(&mut io, 7, vec![2, 2]).unwrap();
        assert_eq!(section.get(&mut io, 7).unwrap(), Some(vec![2, 2]));

        let section = rescan(&mut io, 2);
        assert_eq!(section.get(&mut io, 7).unwrap(), Some(vec![2, 2]));
    }

    #[test]
    fn tombstone_hides_older_value() {
        let (mut io, mut section) = erased_section(2);
        section.set(&mut io, 9, vec![1, 2, 3]).unwrap();
        section.delete(&mut io, 9).unwrap();

        assert!(!section.has(9));
        assert_eq!(section.get(&mut io, 9).unwrap(), None);

        let section = rescan(&mut io, 2);
        assert!(!section.has(9));
        assert_eq!(section.get(&mut io, 9).unwrap(), None);
    }

    #[test]
    fn large_value_spans_pages() {
        let (mut io, mut section) = erased_section(4);
        let data: Vec<u8> = (0..1200).map(|i| i as u8).collect();
        section.set(&mut io, 0x20, data.clone()).unwrap();

        assert_eq!(section.current_page(), 2);
        assert_eq!(section.get(&mut io, 0x20).unwrap(), Some(data.clone()));
        assert_eq!(section.keys(), vec![0x20]);

        let section = rescan(&mut io, 4);
        assert_eq!(section.current_page(), 2);
        assert_eq!(section.get(&mut io, 0x20).unwrap(), Some(data));
    }

    #[test]
    fn rotation_relocates_live_keys() {
        let (mut io, mut section) = erased_section(2);
        // 492 usable bytes per page, 100-byte objects take 104
        for key in 1..=4 {
            section.set(&mut io, key, vec![key as u8; 100]).unwrap();
        }
        assert_eq!(section.current_page(), 0);

        for key in 1..=3 {
            section.set(&mut io, key, vec![0x10 + key as u8; 100]).unwrap();
        }
        section.set(&mut io, 5, vec![5; 100]).unwrap();
        assert_eq!(section.current_page(), 1);

        // page 0 is reused: key 4 is the only live object left there
        section.set(&mut io, 6, vec![6; 100]).unwrap();
        assert_eq!(section.current_page(), 0);
        assert_eq!(section.pages()[0].header.erase_count, 1);
        let on_page_zero: Vec<u32> = section.pages()[0].objects.iter().map(|o| o.key).collect();
        assert_eq!(on_page_zero, vec![6, 4]);

        let expected = |key: u32| match key {
            1..=3 => vec![0x10 + key as u8; 100],
            _ => vec![key as u8; 100],
        };
        for key in 1..=6 {
            assert_eq!(section.get(&mut io, key).unwrap(), Some(expected(key)), "key {key}");
        }

        let section = rescan(&mut io, 2);
        assert_eq!(section.current_page(), 0);
        assert_eq!(section.keys(), vec![1, 2, 3, 4, 5, 6]);
        for key in 1..=6 {
            assert_eq!(section.get(&mut io, key).unwrap(), Some(expected(key)), "key {key}");
        }
    }

    #[test]
    fn overwritten_key_is_not_relocated_over_new_value() {
        let (mut io, mut section) = erased_section(2);
        for key in 1..=8 {
            section.set(&mut io, key, vec![key as u8; 100]).unwrap();
        }
        assert_eq!(section.current_page(), 1);

        section.set(&mut io, 4, vec![0x44; 100]).unwrap();
        assert_eq!(section.current_page(), 0);
        let on_page_zero: Vec<u32> = section.pages()[0].objects.iter().map(|o| o.key).collect();
        assert_eq!(on_page_zero, vec![4, 1, 2, 3]);
        assert_eq!(section.get(&mut io, 4).unwrap(), Some(vec![0x44; 100]));

        let section = rescan(&mut io, 2);
        assert_eq!(section.get(&mut io, 4).unwrap(), Some(vec![0x44; 100]));
    }

    #[test]
    fn relocation_keeps_counter_type() {
        assert_eq!(relocation_type(ObjectType::CounterSmall, 4), ObjectType::CounterSmall);
        assert_eq!(relocation_type(ObjectType::CounterLarge, 4), ObjectType::CounterLarge);
        assert_eq!(relocation_type(ObjectType::DataLarge, 10), ObjectType::DataSmall);
        assert_eq!(relocation_type(ObjectType::DataSmall, 200), ObjectType::DataLarge);
    }

    #[test]
    fn overfull_section_is_argument_error() {
        let (mut io, mut section) = erased_section(2);
        let err = section.set(&mut io, 1, vec![0; 2000]).unwrap_err();
        assert!(err.is_argument());
    }

    #[test]
    fn failed_batch_keeps_relocated_keys_and_writes_nothing() {
        let (mut io, mut section) = erased_section(2);
        for key in 1..=8 {
            section.set(&mut io, key, vec![key as u8; 100]).unwrap();
        }
        let before = io.as_bytes().to_vec();

        // rotating onto page 0 relocates keys 1-4 and leaves no room for key 9
        let err = section.set(&mut io, 9, vec![9; 100]).unwrap_err();
        assert!(err.is_argument());
        assert_eq!(io.as_bytes(), &before[..]);
        assert_eq!(section.current_page(), 1);
        assert!(!section.has(9));

        let section = rescan(&mut io, 2);
        assert_eq!(section.keys(), (1..=8).collect::<Vec<u32>>());
        for key in 1..=8 {
            assert_eq!(section.get(&mut io, key).unwrap(), Some(vec![key as u8; 100]), "key {key}");
        }
        assert_eq!(section.get(&mut io, 9).unwrap(), None);
    }

    #[test]
    fn staged_batch_commits_only_to_its_section() {
        let (mut io, section) = erased_section(2);
        let batch = section.stage(&mut io, vec![NvmObject::data(1, vec![1])]).unwrap();

        let mut other = Section::from_pages("other", Vec::new());
        assert!(other.commit(&mut io, batch).unwrap_err().is_argument());
        assert!(object::decode_header(io.as_bytes(), PAGE_HEADER_SIZE).unwrap().is_none());
    }

    fn page_with(offset: usize, erase_count: u32, keys: &[u32]) -> NvmPage {
        let mut header = PageHeader::new(offset, PAGE_SIZE, 2047, PageWriteSize::Write16, true);
        header.erase_count = erase_count;
        let mut page = NvmPage::empty(header);
        let mut cursor = offset + PAGE_HEADER_SIZE;
        for &key in keys {
            page.objects.push(ObjectHeader {
                offset: cursor,
                key,
                object_type: ObjectType::DataSmall,
                fragment_type: FragmentType::None,
                header_size: 4,
                fragment_size: 4,
            });
            cursor += 8;
        }
        page
    }

    #[test]
    fn current_page_is_last_written_page_when_newest_pages_are_empty() {
        let pages = vec![
            page_with(0, 3, &[]),
            page_with(PAGE_SIZE, 2, &[1]),
            page_with(2 * PAGE_SIZE, 2, &[2, 3]),
            page_with(3 * PAGE_SIZE, 3, &[]),
        ];
        let section = Section::from_pages("test", pages);
        assert_eq!(section.current_page(), 2);
        assert_eq!(section.offset(), PAGE_HEADER_SIZE + 16);
    }

    #[test]
    fn current_page_of_empty_pages_is_page_zero() {
        let pages = vec![
            page_with(0, 1, &[]),
            page_with(PAGE_SIZE, 4, &[]),
            page_with(2 * PAGE_SIZE, 2, &[]),
        ];
        let section = Section::from_pages("test", pages);
        assert_eq!(section.current_page(), 0);
        assert_eq!(section.offset(), PAGE_HEADER_SIZE);
    }

    #[test]
    fn current_page_tie_break_takes_last_in_scan_order() {
        let pages = vec![
            page_with(0, 5, &[1]),
            page_with(PAGE_SIZE, 5, &[2]),
            page_with(2 * PAGE_SIZE, 4, &[3]),
        ];
        let section = Section::from_pages("test", pages);
        assert_eq!(section.current_page(), 1);
    }

    fn fragment(key: u32, object_type: ObjectType, fragment_type: FragmentType, data: Vec<u8>) -> NvmObject {
        NvmObject {
            key,
            object_type,
            fragment_type,
            data,
        }
    }

    #[test]
    fn chain_of_other_type_is_discarded() {
        let (mut io, mut section) = erased_section(2);
        section.set(&mut io, 5, vec![7]).unwrap();
        section
            .write_object(&mut io, &fragment(5, ObjectType::DataLarge, FragmentType::First, vec![2; 8]))
            .unwrap();
        section
            .write_object(&mut io, &fragment(5, ObjectType::CounterLarge, FragmentType::Last, vec![1; 8]))
            .unwrap();

        // the counter chain meets a data First: it is dropped and the older
        // complete value is found
        assert_eq!(section.get(&mut io, 5).unwrap(), Some(vec![7]));

        let section = rescan(&mut io, 2);
        assert_eq!(section.get(&mut io, 5).unwrap(), Some(vec![7]));
    }

    #[test]
    fn dangling_last_fragment_reads_as_absent() {
        let (mut io, mut section) = erased_section(2);
        section
            .write_object(&mut io, &fragment(6, ObjectType::DataLarge, FragmentType::Last, vec![3; 8]))
            .unwrap();

        assert!(!section.has(6));
        assert_eq!(section.get(&mut io, 6).unwrap(), None);

        let section = rescan(&mut io, 2);
        assert!(!section.has(6));
        assert_eq!(section.get(&mut io, 6).unwrap(), None);
    }

    #[test]
    fn fragments_are_reassembled_in_write_order() {
        let (mut io, mut section) = erased_section(2);
        for (fragment_type, byte) in [
            (FragmentType::First, 1u8),
            (FragmentType::Next, 2),
            (FragmentType::Last, 3),
        ] {
            section
                .write_object(&mut io, &fragment(7, ObjectType::DataLarge, fragment_type, vec![byte; 4]))
                .unwrap();
        }

        let mut expected = vec![1; 4];
        expected.extend([2; 4]);
        expected.extend([3; 4]);
        assert_eq!(section.get(&mut io, 7).unwrap(), Some(expected));
    }

    #[test]
    fn current_page_prefers_highest_erase_count() {
        let (mut io, mut section) = erased_section(3);
        for round in 1..=13u8 {
            section.set(&mut io, 1, vec![round; 100]).unwrap();
        }
        // four copies per page: the 13th write wraps onto page 0
        assert_eq!(section.current_page(), 0);

        let section = rescan(&mut io, 3);
        assert_eq!(section.current_page(), 0);
        assert_eq!(section.pages()[0].header.erase_count, 1);
        assert_eq!(section.pages()[2].header.erase_count, 0);
        assert_eq!(section.get(&mut io, 1).unwrap(), Some(vec![13; 100]));
    }

    #[test]
    fn corrupt_object_header_fails_scan() {
        let (mut io, mut section) = erased_section(2);
        section.set(&mut io, 0x1001, vec![1, 2, 3, 4]).unwrap();

        let mut image = io.into_inner();
        image[PAGE_HEADER_SIZE] &= 0xFE;
        let mut io = MemoryIo::new(image);
        io.open(NvmAccess::Read).unwrap();

        let size = io.size();
        assert!(scan_page(&mut io, 0, size).unwrap_err().is_format());
    }
}
