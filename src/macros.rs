//! # Internal Macros
//!
//! ## zerocopy_accessors!
//!
//! Generates getter and setter methods for zerocopy struct fields that use
//! little-endian wrapper types (U16, U32). The page header is the only
//! on-flash structure with byte-aligned fields, so these are the only widths
//! needed.
//!
//! ### Usage
//!
//! ```ignore
//! use zerocopy::little_endian::{U16, U32};
//!
//! #[repr(C)]
//! struct Header {
//!     magic: U16,
//!     status: U32,
//! }
//!
//! impl Header {
//!     zerocopy_accessors! {
//!         magic: u16,
//!         status: u32,
//!     }
//! }
//!
//! // Generates:
//! // pub fn magic(&self) -> u16 { self.magic.get() }
//! // pub fn set_magic(&mut self, val: u16) { self.magic = U16::new(val); }
//! // pub fn status(&self) -> u32 { self.status.get() }
//! // pub fn set_status(&mut self, val: u32) { self.status = U32::new(val); }
//! ```

/// Generates getter and setter methods for zerocopy little-endian fields.
#[macro_export]
macro_rules! zerocopy_accessors {
    (@impl $field:ident, u16) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u16 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u16) {
                self.$field = ::zerocopy::little_endian::U16::new(val);
            }
        }
    };
    (@impl $field:ident, u32) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u32 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u32) {
                self.$field = ::zerocopy::little_endian::U32::new(val);
            }
        }
    };
    ($($field:ident : $ty:tt),* $(,)?) => {
        $(
            $crate::zerocopy_accessors!(@impl $field, $ty);
        )*
    };
}
