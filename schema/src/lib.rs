//! This is a Rust library with the byte-level building blocks of the Skiff
//! serialization format: a construction buffer that grows from high addresses
//! downward ([`Builder`]) and a read-side view over a finished buffer
//! ([`BufferView`]).
//!
//! A finished buffer starts with a 32-bit offset to the root object. Objects
//! with a variable layout carry a 32-bit back-offset to a vtable of 16-bit
//! field offsets; fixed-layout structs are stored inline. All scalars are
//! little-endian.
//!
//! ```
//! use skiff_schema::{Builder, BufferView};
//!
//! let mut b = Builder::new();
//! let start = b.start_info();
//! b.add_element::<i32>(4, 42, 0);
//! let obj = b.end_info(start, 1);
//! b.finish(obj);
//!
//! let view = BufferView::new(b.data());
//! let root = view.root();
//! assert_eq!(view.field_i32(root, 4, 0), 42);
//! ```

pub mod builder;
pub mod reader;

pub use builder::*;
pub use reader::*;

/// A 32-bit offset, measured from the offset word toward the buffer end.
pub type UOffset = u32;
/// A signed 32-bit offset (object to vtable).
pub type SOffset = i32;
/// A 16-bit vtable entry.
pub type VOffset = u16;

pub const SIZEOF_UOFFSET: usize = std::mem::size_of::<UOffset>();
pub const SIZEOF_SOFFSET: usize = std::mem::size_of::<SOffset>();
pub const SIZEOF_VOFFSET: usize = std::mem::size_of::<VOffset>();

/// The widest scalar the format can store inline; emission passes iterate
/// element sizes downward from this.
pub const MAX_SCALAR_SIZE: usize = std::mem::size_of::<u64>();

/// Vtable slot offset for a field index. The first two slots hold the vtable
/// byte length and the object byte length.
pub fn field_index_to_offset(field_index: VOffset) -> VOffset {
    const FIXED_FIELDS: VOffset = 2;
    (field_index + FIXED_FIELDS) * SIZEOF_VOFFSET as VOffset
}

/// Zero bytes needed after `size` bytes to reach an `align` boundary.
/// `align` must be a power of two.
pub fn padding_bytes(size: usize, align: usize) -> usize {
    (!size).wrapping_add(1) & (align - 1)
}

#[test]
fn slot_arithmetic() {
    assert_eq!(field_index_to_offset(0), 4);
    assert_eq!(field_index_to_offset(1), 6);
    assert_eq!(field_index_to_offset(9), 22);
}

#[test]
fn padding_arithmetic() {
    assert_eq!(padding_bytes(0, 8), 0);
    assert_eq!(padding_bytes(1, 8), 7);
    assert_eq!(padding_bytes(8, 8), 0);
    assert_eq!(padding_bytes(9, 4), 3);
    assert_eq!(padding_bytes(17, 1), 0);
    assert_eq!(padding_bytes(3, 256), 253);
}
