//! # NVM3 Store
//!
//! `Nvm3` is the key/value view of a whole NVM3 image. It owns the medium,
//! scans the image into one or two ring buffer sections on first use, and
//! routes every key to its section.
//!
//! ## Layouts
//!
//! | Layout | Detected by                          | Sections                   |
//! |--------|--------------------------------------|----------------------------|
//! | split  | default                              | application + protocol     |
//! | shared | key `0x41000` present in any page    | one section for every key  |
//!
//! In a split layout, pages starting below the application size (12 KiB by
//! default) form the application section; the rest form the protocol
//! section. Protocol keys are `0x50000..=0x5FFFF`.
//!
//! ## Usage
//!
//! ```ignore
//! let io = MmapIo::open_path("backup.bin")?;
//! let mut nvm = Nvm3::new(io);
//!
//! if let Some(data) = nvm.get(0x50004)? {
//!     println!("{:02x?}", data);
//! }
//! nvm.set(0x50004, vec![1, 2, 3])?;
//! nvm.close()?;
//! ```
//!
//! ## Access Modes
//!
//! Reads open the medium read-only; the first write reopens it writable.
//! The store never closes and reopens a medium that already grants the
//! needed capability.

use crate::config::{
    EraseOptions, StoreOptions, APPLICATION_VERSION_FILE_800_ID, PROTOCOL_KEY_FIRST,
    PROTOCOL_KEY_LAST,
};
use crate::error::{NvmError, Result};
use crate::storage::{
    scan_page, write_all_at, NvmAccess, NvmIo, NvmObject, NvmPage, PageHeader, PageWriteSize,
    Section,
};
use crate::{ensure_argument, ensure_format};

/// Section a key is stored in when the image uses a split layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NvmSection {
    Application,
    Protocol,
}

impl NvmSection {
    pub fn for_key(key: u32) -> Self {
        match key {
            PROTOCOL_KEY_FIRST..=PROTOCOL_KEY_LAST => NvmSection::Protocol,
            _ => NvmSection::Application,
        }
    }
}

/// Geometry of an opened image, taken from its first page header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NvmMeta {
    pub shared_file_system: bool,
    pub page_size: usize,
    pub device_family: u16,
    pub write_size: PageWriteSize,
    pub memory_mapped: bool,
}

#[derive(Debug)]
enum Layout {
    Shared(Section),
    Split {
        application: Section,
        protocol: Section,
    },
}

impl Layout {
    fn build(pages: Vec<NvmPage>, shared: bool, application_size: usize) -> Self {
        if shared {
            return Layout::Shared(Section::from_pages("shared", pages));
        }
        let (application, protocol): (Vec<_>, Vec<_>) = pages
            .into_iter()
            .partition(|page| page.header.offset < application_size);
        Layout::Split {
            application: Section::from_pages("application", application),
            protocol: Section::from_pages("protocol", protocol),
        }
    }

    fn is_shared(&self) -> bool {
        matches!(self, Layout::Shared(_))
    }

    fn section(&self, target: NvmSection) -> &Section {
        match (self, target) {
            (Layout::Shared(section), _) => section,
            (Layout::Split { application, .. }, NvmSection::Application) => application,
            (Layout::Split { protocol, .. }, NvmSection::Protocol) => protocol,
        }
    }

    fn section_mut(&mut self, target: NvmSection) -> &mut Section {
        match (self, target) {
            (Layout::Shared(section), _) => section,
            (Layout::Split { application, .. }, NvmSection::Application) => application,
            (Layout::Split { protocol, .. }, NvmSection::Protocol) => protocol,
        }
    }

    fn sections(&self) -> Vec<&Section> {
        match self {
            Layout::Shared(section) => vec![section],
            Layout::Split {
                application,
                protocol,
            } => vec![application, protocol],
        }
    }
}

pub struct Nvm3<IO: NvmIo> {
    io: IO,
    options: StoreOptions,
    layout: Option<Layout>,
}

impl<IO: NvmIo> Nvm3<IO> {
    pub fn new(io: IO) -> Self {
        Self::with_options(io, StoreOptions::default())
    }

    pub fn with_options(io: IO, options: StoreOptions) -> Self {
        Self {
            io,
            options,
            layout: None,
        }
    }

    pub fn io(&self) -> &IO {
        &self.io
    }

    pub fn into_inner(self) -> IO {
        self.io
    }

    pub fn is_initialized(&self) -> bool {
        self.layout.is_some()
    }

    /// Flushes and closes the medium. The next operation reopens it.
    pub fn close(&mut self) -> Result<()> {
        if self.io.access_mode() != NvmAccess::None {
            self.io.close()?;
        }
        Ok(())
    }

    fn ensure_readable(&mut self) -> Result<()> {
        let mode = self.io.access_mode();
        if mode.can_read() {
            return Ok(());
        }
        let wanted = if mode.can_write() {
            self.io.close()?;
            NvmAccess::ReadWrite
        } else {
            NvmAccess::Read
        };
        let granted = self.io.open(wanted)?;
        ensure_argument!(granted.can_read(), "NVM medium cannot be opened for reading");
        Ok(())
    }

    fn ensure_writable(&mut self) -> Result<()> {
        let mode = self.io.access_mode();
        if mode.can_write() {
            return Ok(());
        }
        let wanted = if mode.can_read() {
            self.io.close()?;
            NvmAccess::ReadWrite
        } else {
            NvmAccess::Write
        };
        let granted = self.io.open(wanted)?;
        ensure_argument!(granted.can_write(), "NVM medium cannot be opened for writing");
        Ok(())
    }

    /// Scans every page of the image and builds the section indexes.
    pub fn init(&mut self) -> Result<()> {
        self.ensure_readable()?;

        let nvm_size = self.io.size();
        let mut pages = Vec::new();
        let mut offset = 0;
        while offset < nvm_size {
            let page = scan_page(&mut self.io, offset, nvm_size)?;
            offset += page.header.page_size;
            pages.push(page);
        }
        ensure_format!(!pages.is_empty(), "NVM image contains no pages");

        let shared = pages.iter().any(|page| {
            page.objects
                .iter()
                .any(|object| object.key == APPLICATION_VERSION_FILE_800_ID)
        });

        tracing::debug!(
            pages = pages.len(),
            page_size = pages[0].header.page_size,
            shared,
            "opened NVM3 image"
        );

        self.layout = Some(Layout::build(
            pages,
            shared,
            self.options.get_application_size(),
        ));
        Ok(())
    }

    fn layout(&mut self) -> Result<&Layout> {
        Ok(self.parts()?.1)
    }

    fn parts(&mut self) -> Result<(&mut IO, &mut Layout)> {
        if self.layout.is_none() {
            self.init()?;
        }
        match self.layout.as_mut() {
            Some(layout) => Ok((&mut self.io, layout)),
            None => Err(NvmError::Format("NVM image is not initialized".into())),
        }
    }

    pub fn get(&mut self, key: u32) -> Result<Option<Vec<u8>>> {
        self.ensure_readable()?;
        let (io, layout) = self.parts()?;
        layout.section(NvmSection::for_key(key)).get(io, key)
    }

    /// Like [`get`](Self::get), but a missing key is an error.
    pub fn require(&mut self, key: u32) -> Result<Vec<u8>> {
        self.get(key)?.ok_or(NvmError::ObjectNotFound(key))
    }

    pub fn has(&mut self, key: u32) -> Result<bool> {
        Ok(self.layout()?.section(NvmSection::for_key(key)).has(key))
    }

    pub fn set(&mut self, key: u32, data: Vec<u8>) -> Result<()> {
        self.set_many(vec![(key, data)])
    }

    /// Writes several values, grouped by section. All objects are validated
    /// before the first byte is written.
    pub fn set_many<I>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (u32, Vec<u8>)>,
    {
        let objects: Vec<NvmObject> = entries
            .into_iter()
            .map(|(key, data)| NvmObject::data(key, data))
            .collect();
        self.write_objects(objects)
    }

    /// Writes a tombstone for `key`. Deleting a missing key is a no-op.
    pub fn delete(&mut self, key: u32) -> Result<()> {
        if !self.has(key)? {
            return Ok(());
        }
        self.write_objects(vec![NvmObject::tombstone(key)])
    }

    fn write_objects(&mut self, objects: Vec<NvmObject>) -> Result<()> {
        for object in &objects {
            object.check()?;
        }

        self.ensure_writable()?;
        let (io, layout) = self.parts()?;

        if layout.is_shared() {
            return layout.section_mut(NvmSection::Application).set_many(io, objects);
        }

        let (protocol, application): (Vec<_>, Vec<_>) = objects
            .into_iter()
            .partition(|object| NvmSection::for_key(object.key) == NvmSection::Protocol);

        // both sections are planned before either is written
        let mut batches = Vec::with_capacity(2);
        for (section, objects) in [
            (NvmSection::Application, application),
            (NvmSection::Protocol, protocol),
        ] {
            if !objects.is_empty() {
                batches.push((section, layout.section(section).stage(io, objects)?));
            }
        }
        for (section, batch) in batches {
            layout.section_mut(section).commit(io, batch)?;
        }
        Ok(())
    }

    /// Every live key in ascending order.
    pub fn keys(&mut self) -> Result<Vec<u32>> {
        let mut keys: Vec<u32> = self
            .layout()?
            .sections()
            .into_iter()
            .flat_map(Section::keys)
            .collect();
        keys.sort_unstable();
        Ok(keys)
    }

    pub fn sections(&mut self) -> Result<Vec<&Section>> {
        Ok(self.layout()?.sections())
    }

    pub fn meta(&mut self) -> Result<NvmMeta> {
        let layout = self.layout()?;
        let shared_file_system = layout.is_shared();
        let Some(page) = layout.sections().into_iter().find_map(|s| s.pages().first()) else {
            return Err(NvmError::Format("NVM image contains no pages".into()));
        };
        let header = &page.header;
        Ok(NvmMeta {
            shared_file_system,
            page_size: header.page_size,
            device_family: header.device_family,
            write_size: header.write_size,
            memory_mapped: header.memory_mapped,
        })
    }

    /// Formats the whole image with empty pages and resets all sections.
    pub fn erase(&mut self, options: &EraseOptions) -> Result<()> {
        let nvm_size = self.io.size();
        let application_size = self.options.get_application_size();
        let page_size = options.validate(nvm_size, application_size)?;

        self.ensure_writable()?;

        let mut pages = Vec::with_capacity(nvm_size / page_size);
        for offset in (0..nvm_size).step_by(page_size) {
            let header = PageHeader::new(
                offset,
                page_size,
                options.get_device_family(),
                options.get_write_size(),
                options.is_memory_mapped(),
            );
            write_all_at(&mut self.io, offset, &header.blank_page()?)?;
            pages.push(NvmPage::empty(header));
        }

        tracing::debug!(
            pages = pages.len(),
            page_size,
            shared = options.is_shared_file_system(),
            "erased NVM3 image"
        );

        self.layout = Some(Layout::build(
            pages,
            options.is_shared_file_system(),
            application_size,
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PAGE_HEADER_SIZE, ZWAVE_APPLICATION_NVM_SIZE};
    use crate::storage::{object, MemoryIo, ObjectType, ReadResult, WriteResult};

    fn erased(size: usize, options: &EraseOptions) -> Nvm3<MemoryIo> {
        let mut nvm = Nvm3::new(MemoryIo::erased(size));
        nvm.erase(options).unwrap();
        nvm
    }

    fn reopen(nvm: Nvm3<MemoryIo>) -> Nvm3<MemoryIo> {
        Nvm3::new(MemoryIo::new(nvm.into_inner().into_inner()))
    }

    #[test]
    fn first_small_object_follows_page_header() {
        let mut nvm = erased(1024, &EraseOptions::default().page_size(512));
        nvm.set(0x1001, vec![1, 2, 3, 4]).unwrap();

        let bytes = nvm.io().as_bytes();
        let header = object::decode_header(bytes, PAGE_HEADER_SIZE).unwrap().unwrap();
        assert_eq!(header.key, 0x1001);
        assert_eq!(header.object_type, ObjectType::DataSmall);
        assert_eq!(header.aligned_size(), 8);
        assert_eq!(&bytes[24..28], &[1, 2, 3, 4]);

        assert_eq!(nvm.get(0x1001).unwrap(), Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn section_routing_by_key() {
        assert_eq!(NvmSection::for_key(0x50000), NvmSection::Protocol);
        assert_eq!(NvmSection::for_key(0x5FFFF), NvmSection::Protocol);
        assert_eq!(NvmSection::for_key(0x4FFFF), NvmSection::Application);
        assert_eq!(NvmSection::for_key(0x60000), NvmSection::Application);
    }

    #[test]
    fn split_layout_keeps_protocol_keys_above_application_range() {
        let size = ZWAVE_APPLICATION_NVM_SIZE + 2 * 512;
        let mut nvm = erased(size, &EraseOptions::default().page_size(512));
        nvm.set_many(vec![(0x50004, vec![0xAA; 8]), (0x00001, vec![0xBB; 8])])
            .unwrap();

        let bytes = nvm.io().as_bytes();
        let protocol = object::decode_header(bytes, ZWAVE_APPLICATION_NVM_SIZE + PAGE_HEADER_SIZE)
            .unwrap()
            .unwrap();
        assert_eq!(protocol.key, 0x50004);
        let application = object::decode_header(bytes, PAGE_HEADER_SIZE).unwrap().unwrap();
        assert_eq!(application.key, 0x00001);

        let mut nvm = reopen(nvm);
        assert_eq!(nvm.get(0x50004).unwrap(), Some(vec![0xAA; 8]));
        assert_eq!(nvm.keys().unwrap(), vec![0x00001, 0x50004]);
        assert!(!nvm.meta().unwrap().shared_file_system);
    }

    #[test]
    fn application_version_key_selects_shared_layout() {
        let options = EraseOptions::default().page_size(512).shared_file_system(true);
        let mut nvm = erased(4 * 512, &options);
        nvm.set(APPLICATION_VERSION_FILE_800_ID, vec![1, 2, 3, 4]).unwrap();
        nvm.set(0x50004, vec![5]).unwrap();

        let mut nvm = reopen(nvm);
        let meta = nvm.meta().unwrap();
        assert!(meta.shared_file_system);
        assert_eq!(meta.page_size, 512);
        assert_eq!(meta.device_family, 2047);
        assert_eq!(nvm.sections().unwrap().len(), 1);
        assert_eq!(nvm.get(0x50004).unwrap(), Some(vec![5]));
    }

    #[test]
    fn require_reports_missing_key() {
        let mut nvm = erased(1024, &EraseOptions::default().page_size(512));
        let err = nvm.require(0x50004).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn delete_writes_tombstone_only_for_present_keys() {
        let mut nvm = erased(1024, &EraseOptions::default().page_size(512));
        nvm.delete(0x10).unwrap();
        assert_eq!(nvm.sections().unwrap()[0].offset(), PAGE_HEADER_SIZE);

        nvm.set(0x10, vec![1, 2]).unwrap();
        nvm.delete(0x10).unwrap();
        assert!(!nvm.has(0x10).unwrap());
        assert_eq!(nvm.get(0x10).unwrap(), None);

        let mut nvm = reopen(nvm);
        assert!(!nvm.has(0x10).unwrap());
        assert_eq!(nvm.get(0x10).unwrap(), None);
    }

    #[test]
    fn invalid_key_in_batch_writes_nothing() {
        let mut nvm = erased(1024, &EraseOptions::default().page_size(512));
        let before = nvm.io().as_bytes().to_vec();

        let err = nvm
            .set_many(vec![(0x10, vec![1]), (0x10_0000, vec![2])])
            .unwrap_err();
        assert!(err.is_argument());
        assert_eq!(nvm.io().as_bytes(), &before[..]);
    }

    #[test]
    fn unformatted_image_is_format_error() {
        let mut nvm = Nvm3::new(MemoryIo::erased(1024));
        assert!(nvm.get(1).unwrap_err().is_format());
        assert!(!nvm.is_initialized());
    }

    #[test]
    fn erase_rejects_bad_geometry() {
        let mut nvm = Nvm3::new(MemoryIo::erased(1000));
        let err = nvm.erase(&EraseOptions::default().page_size(512)).unwrap_err();
        assert!(err.is_format());

        let err = nvm.erase(&EraseOptions::default().page_size(768)).unwrap_err();
        assert!(err.is_argument());
    }

    /// Medium with separate read and write modes that counts reopenings.
    struct CountingIo {
        inner: MemoryIo,
        mode: NvmAccess,
        opens: usize,
    }

    impl NvmIo for CountingIo {
        fn open(&mut self, access: NvmAccess) -> Result<NvmAccess> {
            self.inner.open(access)?;
            self.mode = access;
            self.opens += 1;
            Ok(access)
        }

        fn size(&self) -> usize {
            self.inner.size()
        }

        fn access_mode(&self) -> NvmAccess {
            self.mode
        }

        fn determine_chunk_size(&mut self) -> Result<usize> {
            self.inner.determine_chunk_size()
        }

        fn read(&mut self, offset: usize, len: usize) -> Result<ReadResult> {
            ensure_argument!(self.mode.can_read(), "not readable");
            self.inner.read(offset, len)
        }

        fn write(&mut self, offset: usize, data: &[u8]) -> Result<WriteResult> {
            ensure_argument!(self.mode.can_write(), "not writable");
            self.inner.write(offset, data)
        }

        fn close(&mut self) -> Result<()> {
            self.mode = NvmAccess::None;
            self.inner.close()
        }
    }

    #[test]
    fn batch_failing_in_one_section_writes_neither() {
        let options = StoreOptions::default().application_size(1024).unwrap();
        let mut nvm = Nvm3::with_options(MemoryIo::erased(2048), options);
        nvm.erase(&EraseOptions::default().page_size(512)).unwrap();
        // two protocol pages, four 104-byte objects each
        for key in 0x50001..=0x50008u32 {
            nvm.set(key, vec![key as u8; 100]).unwrap();
        }
        let before = nvm.io().as_bytes().to_vec();

        let err = nvm
            .set_many(vec![(0x10, vec![1; 8]), (0x50009, vec![9; 100])])
            .unwrap_err();
        assert!(err.is_argument());
        assert_eq!(nvm.io().as_bytes(), &before[..]);
        assert!(!nvm.has(0x10).unwrap());

        let mut nvm = Nvm3::with_options(MemoryIo::new(nvm.into_inner().into_inner()), options);
        assert_eq!(nvm.get(0x10).unwrap(), None);
        assert_eq!(nvm.get(0x50009).unwrap(), None);
        for key in 0x50001..=0x50008u32 {
            assert_eq!(nvm.get(key).unwrap(), Some(vec![key as u8; 100]), "key {key:#x}");
        }
    }

    #[test]
    fn access_mode_is_widened_only_when_needed() {
        let nvm = erased(1024, &EraseOptions::default().page_size(512));
        let io = CountingIo {
            inner: nvm.into_inner(),
            mode: NvmAccess::None,
            opens: 0,
        };
        let mut nvm = Nvm3::new(io);

        assert_eq!(nvm.get(1).unwrap(), None);
        assert_eq!(nvm.io().opens, 1);
        assert_eq!(nvm.io().access_mode(), NvmAccess::Read);

        nvm.set(1, vec![1]).unwrap();
        assert_eq!(nvm.io().opens, 2);
        assert_eq!(nvm.io().access_mode(), NvmAccess::ReadWrite);

        nvm.set(2, vec![2]).unwrap();
        assert_eq!(nvm.get(1).unwrap(), Some(vec![1]));
        assert_eq!(nvm.io().opens, 2);
    }
}
