//! Fuzz testing for page headers and image scanning.
//!
//! Decodes a page header from arbitrary bytes, then opens the same bytes as
//! a whole image and reads every key it reports. Malformed input must fail
//! with an error, never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;

use zwnvm::storage::PageHeader;
use zwnvm::{MemoryIo, Nvm3};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() || data.len() > 1 << 17 {
        return;
    }

    if let Ok(header) = PageHeader::decode(data, 0) {
        assert!(header.page_size <= data.len());
        let _ = header.encode();
    }

    let mut nvm = Nvm3::new(MemoryIo::new(data.to_vec()));
    let Ok(keys) = nvm.keys() else {
        return;
    };
    for key in keys {
        let _ = nvm.get(key);
    }
    let _ = nvm.meta();
});
