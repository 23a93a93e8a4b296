//! Fuzz testing for the object codec.
//!
//! Decodes object headers at arbitrary offsets of arbitrary bytes. Any
//! header that decodes must describe a payload inside the buffer, and any
//! object that decodes must encode back to a valid object.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use zwnvm::storage::object;

#[derive(Debug, Arbitrary)]
struct ObjectInput {
    offset: u16,
    data: Vec<u8>,
}

fuzz_target!(|input: ObjectInput| {
    let offset = input.offset as usize;

    if let Ok(Some(header)) = object::decode_header(&input.data, offset) {
        assert!(header.payload_offset() + header.fragment_size <= input.data.len());
    }

    if let Ok(Some((decoded, size))) = object::decode(&input.data, offset) {
        assert!(size >= decoded.header_size());
        if let Ok(encoded) = decoded.encode() {
            let again = object::decode(&encoded, 0);
            assert!(matches!(again, Ok(Some(_))));
        }
    }
});
