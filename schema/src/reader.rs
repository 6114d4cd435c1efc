use std::borrow::Cow;

use crate::{SOffset, VOffset, SIZEOF_UOFFSET, SIZEOF_VOFFSET};

/// A read-side view over a finished Skiff buffer.
///
/// Positions are absolute byte indices into the buffer. The view performs
/// bounds-checked little-endian reads and resolves the offset indirections
/// of the format (root word, vtable slots, relative offsets). Reads out of
/// bounds return the scalar's zero value rather than panicking, so a view
/// can be pointed at untrusted bytes.
pub struct BufferView<'a> {
    data: &'a [u8],
}

macro_rules! read_le {
    ($name:ident, $ty:ty) => {
        /// Read a little-endian scalar at an absolute position.
        pub fn $name(&self, pos: usize) -> $ty {
            const N: usize = std::mem::size_of::<$ty>();
            match self.data.get(pos..pos + N) {
                Some(bytes) => <$ty>::from_le_bytes(bytes.try_into().unwrap()),
                None => <$ty>::default(),
            }
        }
    };
}

impl<'a> BufferView<'a> {
    pub fn new(data: &'a [u8]) -> BufferView<'a> {
        BufferView { data }
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    read_le!(read_u8, u8);
    read_le!(read_i8, i8);
    read_le!(read_u16, u16);
    read_le!(read_i16, i16);
    read_le!(read_u32, u32);
    read_le!(read_i32, i32);
    read_le!(read_u64, u64);
    read_le!(read_i64, i64);
    read_le!(read_f32, f32);
    read_le!(read_f64, f64);

    /// Absolute position of the root object.
    pub fn root(&self) -> usize {
        self.indirect(0)
    }

    /// Follow a 32-bit relative offset stored at `pos`.
    pub fn indirect(&self, pos: usize) -> usize {
        pos + self.read_u32(pos) as usize
    }

    /// Absolute position of an info object's vtable.
    pub fn vtable(&self, info_pos: usize) -> usize {
        (info_pos as SOffset - self.read_i32(info_pos)) as usize
    }

    /// Byte offset of a field within its info object, or 0 if the field was
    /// left at its default (or the vtable is too short to know it).
    pub fn field_offset(&self, info_pos: usize, slot: VOffset) -> VOffset {
        let vt = self.vtable(info_pos);
        let vt_len = self.read_u16(vt);
        if slot >= vt_len {
            return 0;
        }
        self.read_u16(vt + slot as usize)
    }

    /// Absolute position of a field's data, or `None` when defaulted.
    pub fn field_pos(&self, info_pos: usize, slot: VOffset) -> Option<usize> {
        match self.field_offset(info_pos, slot) {
            0 => None,
            off => Some(info_pos + off as usize),
        }
    }

    /// A 32-bit scalar field of an info object, with its default.
    pub fn field_i32(&self, info_pos: usize, slot: VOffset, default: i32) -> i32 {
        match self.field_pos(info_pos, slot) {
            Some(pos) => self.read_i32(pos),
            None => default,
        }
    }

    /// An 8-bit scalar field of an info object, with its default.
    pub fn field_u8(&self, info_pos: usize, slot: VOffset, default: u8) -> u8 {
        match self.field_pos(info_pos, slot) {
            Some(pos) => self.read_u8(pos),
            None => default,
        }
    }

    /// Follow an offset-valued field to the object it refers to.
    pub fn field_indirect(&self, info_pos: usize, slot: VOffset) -> Option<usize> {
        self.field_pos(info_pos, slot).map(|pos| self.indirect(pos))
    }

    /// Element count of a vector at an absolute position.
    pub fn vector_len(&self, pos: usize) -> usize {
        self.read_u32(pos) as usize
    }

    /// Absolute position of a vector's first element.
    pub fn vector_data(&self, pos: usize) -> usize {
        pos + SIZEOF_UOFFSET
    }

    /// A length-prefixed string at an absolute position.
    pub fn string_at(&self, pos: usize) -> Cow<'a, str> {
        let len = self.read_u32(pos) as usize;
        let start = pos + SIZEOF_UOFFSET;
        match self.data.get(start..start + len) {
            Some(bytes) => String::from_utf8_lossy(bytes),
            None => Cow::Borrowed(""),
        }
    }

    /// Byte length of the vtable shared by the info object at `info_pos`.
    pub fn vtable_len(&self, info_pos: usize) -> usize {
        self.read_u16(self.vtable(info_pos)) as usize
    }

    /// Number of field slots in an info object's vtable.
    pub fn vtable_fields(&self, info_pos: usize) -> usize {
        self.vtable_len(info_pos) / SIZEOF_VOFFSET - 2
    }
}

#[test]
fn reads_are_bounds_checked() {
    let view = BufferView::new(&[1, 2]);
    assert_eq!(view.read_u8(0), 1);
    assert_eq!(view.read_u16(0), 0x0201);
    assert_eq!(view.read_u32(0), 0);
    assert_eq!(view.read_u8(7), 0);
}

#[test]
fn follows_root_and_vtable() {
    // Hand-assembled: root offset, padding, vtable, object with one i32.
    let bytes = [
        12, 0, 0, 0, // root offset
        0, 0, // padding
        6, 0, 8, 0, 4, 0, // vtable: len 6, object size 8, slot at 4
        6, 0, 0, 0, // soffset to vtable
        42, 0, 0, 0, // field
    ];
    let view = BufferView::new(&bytes);
    let root = view.root();
    assert_eq!(root, 12);
    assert_eq!(view.vtable(root), 6);
    assert_eq!(view.vtable_fields(root), 1);
    assert_eq!(view.field_offset(root, 4), 4);
    assert_eq!(view.field_i32(root, 4, 0), 42);
    // Slot beyond the vtable reads as defaulted.
    assert_eq!(view.field_i32(root, 6, -1), -1);
}

#[test]
fn reads_strings_and_vectors() {
    let bytes = [3, 0, 0, 0, 97, 98, 99, 0];
    let view = BufferView::new(&bytes);
    assert_eq!(view.string_at(0), "abc");
    assert_eq!(view.vector_len(0), 3);
    assert_eq!(view.vector_data(0), 4);
    assert_eq!(BufferView::new(&[9, 0, 0, 0]).string_at(0), "");
}
