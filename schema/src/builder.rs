use crate::{
    field_index_to_offset, padding_bytes, SOffset, UOffset, VOffset, SIZEOF_SOFFSET,
    SIZEOF_UOFFSET, SIZEOF_VOFFSET,
};

/// A scalar that can be written little-endian into the buffer.
pub trait Scalar: Copy + PartialEq {
    const WIDTH: usize;
    fn write_le(self, dst: &mut [u8]);
}

macro_rules! impl_scalar {
    ($($ty:ty),* $(,)?) => {
        $(impl Scalar for $ty {
            const WIDTH: usize = std::mem::size_of::<$ty>();
            fn write_le(self, dst: &mut [u8]) {
                dst.copy_from_slice(&self.to_le_bytes());
            }
        })*
    };
}

impl_scalar!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

impl Scalar for bool {
    const WIDTH: usize = 1;
    fn write_le(self, dst: &mut [u8]) {
        dst[0] = self as u8;
    }
}

/// A field location recorded while an info object is open, patched into the
/// vtable by [`Builder::end_info`].
#[derive(Clone, Copy, Debug)]
struct FieldLoc {
    /// Offset of the field data, measured from the buffer end.
    off: UOffset,
    /// Vtable slot (byte offset within the vtable).
    slot: VOffset,
}

/// A Skiff construction buffer.
///
/// The buffer is built from the tail backward so that child offsets are known
/// before their parents are emitted: every write prepends, and offsets are
/// measured from the current end. Storage is an owned `Vec<u8>` whose live
/// region is `buf[head..]`; growing reallocates and moves the live bytes to
/// the new tail.
///
/// Methods panic on misuse (overlapping object frames, writing a vtable slot
/// twice); malformed *input* is the caller's problem and never reaches here.
pub struct Builder {
    buf: Vec<u8>,
    head: usize,
    minalign: usize,
    field_locs: Vec<FieldLoc>,
    vtables: Vec<UOffset>,
    nested: bool,
}

impl Default for Builder {
    fn default() -> Self {
        Builder::new()
    }
}

impl Builder {
    pub fn new() -> Builder {
        Builder {
            buf: Vec::new(),
            head: 0,
            minalign: 1,
            field_locs: Vec::new(),
            vtables: Vec::new(),
            nested: false,
        }
    }

    /// Number of bytes written so far; doubles as the offset (from the end)
    /// of the most recently written element.
    pub fn size(&self) -> UOffset {
        (self.buf.len() - self.head) as UOffset
    }

    /// The bytes written so far, front first.
    pub fn data(&self) -> &[u8] {
        &self.buf[self.head..]
    }

    /// The maximum alignment requested so far.
    pub fn minalign(&self) -> usize {
        self.minalign
    }

    /// Reset to an empty buffer, keeping the allocation.
    pub fn clear(&mut self) {
        self.head = self.buf.len();
        self.minalign = 1;
        self.field_locs.clear();
        self.vtables.clear();
        self.nested = false;
    }

    fn grow(&mut self, want: usize) {
        let used = self.buf.len() - self.head;
        let mut cap = self.buf.len().max(64);
        while cap - used < want {
            cap *= 2;
        }
        let mut new_buf = vec![0u8; cap];
        let new_head = cap - used;
        new_buf[new_head..].copy_from_slice(&self.buf[self.head..]);
        self.buf = new_buf;
        self.head = new_head;
    }

    /// Claim `n` bytes at the front, returning the absolute index of the
    /// first claimed byte. The bytes are not cleared.
    fn make_space(&mut self, n: usize) -> usize {
        if n > self.head {
            self.grow(n);
        }
        self.head -= n;
        self.head
    }

    /// Prepend `n` zero bytes.
    fn fill(&mut self, n: usize) {
        let at = self.make_space(n);
        self.buf[at..at + n].fill(0);
    }

    /// Pad with zeros so the next write lands on an `elem_size` boundary
    /// relative to the buffer end, raising the running max alignment.
    pub fn align(&mut self, elem_size: usize) {
        if elem_size > self.minalign {
            self.minalign = elem_size;
        }
        let pad = padding_bytes(self.size() as usize, elem_size);
        self.fill(pad);
    }

    /// Pad so that after `len` more bytes the buffer end offset is a multiple
    /// of `align`. Does not affect the running max alignment.
    pub fn pre_align(&mut self, len: usize, align: usize) {
        let pad = padding_bytes(self.size() as usize + len, align);
        self.fill(pad);
    }

    /// Prepend `n` zero bytes of explicit padding.
    pub fn pad(&mut self, n: usize) {
        self.fill(n);
    }

    /// Prepend raw bytes, no alignment.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        let at = self.make_space(bytes.len());
        self.buf[at..at + bytes.len()].copy_from_slice(bytes);
    }

    /// Unwind the last `n` bytes.
    pub fn pop_bytes(&mut self, n: usize) {
        assert!(n <= self.size() as usize);
        self.head += n;
    }

    fn push_small<T: Scalar>(&mut self, x: T) {
        let at = self.make_space(T::WIDTH);
        x.write_le(&mut self.buf[at..at + T::WIDTH]);
    }

    /// Align for and prepend one scalar, little-endian. Returns its offset.
    pub fn push_element<T: Scalar>(&mut self, x: T) -> UOffset {
        self.align(T::WIDTH);
        self.push_small(x);
        self.size()
    }

    fn track_field(&mut self, slot: VOffset, off: UOffset) {
        self.field_locs.push(FieldLoc { off, slot });
    }

    /// Push a scalar field of an open info object, unless it equals its
    /// default (defaulted fields are left out of the vtable).
    pub fn add_element<T: Scalar>(&mut self, slot: VOffset, value: T, default: T) {
        if value == default {
            return;
        }
        let off = self.push_element(value);
        self.track_field(slot, off);
    }

    /// Push a 32-bit relative offset to `target` as a field of an open info
    /// object.
    pub fn add_offset(&mut self, slot: VOffset, target: UOffset) {
        let rel = self.refer_to(target);
        self.add_element::<UOffset>(slot, rel, 0);
    }

    /// Record a field whose data (an inline struct ending at `end`) is
    /// already in the buffer.
    pub fn add_struct_offset(&mut self, slot: VOffset, end: UOffset) {
        self.track_field(slot, end);
    }

    /// Turn an offset-from-end into the relative offset to store at the next
    /// 32-bit-aligned write position.
    pub fn refer_to(&mut self, off: UOffset) -> UOffset {
        self.align(SIZEOF_UOFFSET);
        assert!(off <= self.size());
        self.size() - off + SIZEOF_UOFFSET as UOffset
    }

    /// Drop the field locations recorded so far (used after emitting frames
    /// that do not own a vtable).
    pub fn clear_offsets(&mut self) {
        self.field_locs.clear();
    }

    /// Open a variable-layout object frame. Returns its start offset, to be
    /// handed back to [`Builder::end_info`].
    pub fn start_info(&mut self) -> UOffset {
        assert!(!self.nested, "info objects may not overlap");
        self.nested = true;
        self.size()
    }

    /// Close a variable-layout object: emit its vtable (field byte offsets
    /// within the object, 0 for defaulted slots), deduplicate it against all
    /// vtables written earlier, and prefix the object with the signed offset
    /// to the surviving vtable. Returns the object's offset.
    pub fn end_info(&mut self, start: UOffset, fieldn: VOffset) -> UOffset {
        assert!(self.nested, "end_info without start_info");
        self.nested = false;

        let placeholder = self.push_element::<SOffset>(0);
        let vt_len = field_index_to_offset(fieldn) as usize;
        self.fill(fieldn as usize * SIZEOF_VOFFSET);
        let info_size = placeholder - start;
        assert!(info_size < 0x10000, "info object too large for its vtable");
        self.push_element::<VOffset>(info_size as VOffset);
        self.push_element::<VOffset>(vt_len as VOffset);

        // Patch recorded field locations into the freshly reserved slots.
        for i in 0..self.field_locs.len() {
            let FieldLoc { off, slot } = self.field_locs[i];
            let at = self.head + slot as usize;
            let entry = (placeholder - off) as VOffset;
            assert!(
                self.buf[at] == 0 && self.buf[at + 1] == 0,
                "vtable slot written twice"
            );
            entry.write_le(&mut self.buf[at..at + SIZEOF_VOFFSET]);
        }
        self.field_locs.clear();

        // Reuse a byte-identical vtable if one was emitted before.
        let mut vt_use = self.size();
        for &vt in &self.vtables {
            let cand = self.buf.len() - vt as usize;
            if self.buf.len() - cand < vt_len {
                continue;
            }
            if self.buf[cand..cand + vt_len] == self.buf[self.head..self.head + vt_len] {
                vt_use = vt;
                break;
            }
        }
        if vt_use == self.size() {
            self.vtables.push(vt_use);
        } else {
            self.pop_bytes((self.size() - placeholder) as usize);
        }

        let at = self.buf.len() - placeholder as usize;
        let to_vtable = vt_use as SOffset - placeholder as SOffset;
        to_vtable.write_le(&mut self.buf[at..at + SIZEOF_SOFFSET]);
        placeholder
    }

    /// Open a fixed-layout object frame aligned to `minalign`.
    pub fn start_struct(&mut self, minalign: usize) -> UOffset {
        self.align(minalign);
        self.size()
    }

    /// Close a fixed-layout object frame. Returns its end offset.
    pub fn end_struct(&mut self) -> UOffset {
        self.size()
    }

    /// Open a vector frame: pad so that after `total_bytes` of elements both
    /// the 32-bit count prefix and the element block are aligned.
    pub fn start_vector(&mut self, total_bytes: usize, align: usize) {
        assert!(!self.nested, "vectors may not overlap other frames");
        self.nested = true;
        self.pre_align(total_bytes, SIZEOF_UOFFSET);
        self.pre_align(total_bytes, align);
    }

    /// Close a vector frame by prefixing the element count. Returns the
    /// vector's offset.
    pub fn end_vector(&mut self, count: UOffset) -> UOffset {
        assert!(self.nested, "end_vector without start_vector");
        self.nested = false;
        self.push_element::<UOffset>(count)
    }

    /// Write a length-prefixed, NUL-terminated string (the terminator is not
    /// counted in the length). Returns its offset.
    pub fn create_string(&mut self, s: &str) -> UOffset {
        assert!(!self.nested, "strings may not be created inside a frame");
        self.pre_align(s.len() + 1, SIZEOF_UOFFSET);
        self.fill(1);
        self.push_bytes(s.as_bytes());
        self.push_element::<UOffset>(s.len() as UOffset)
    }

    /// Finish the buffer: align the total size to the running max alignment
    /// and prefix the relative offset to the root object.
    pub fn finish(&mut self, root: UOffset) {
        self.pre_align(SIZEOF_UOFFSET, self.minalign);
        let rel = self.refer_to(root);
        self.push_element::<UOffset>(rel);
    }
}

#[cfg(test)]
fn built(cb: fn(&mut Builder)) -> Vec<u8> {
    let mut b = Builder::new();
    cb(&mut b);
    b.data().to_vec()
}

#[test]
fn push_element_aligns() {
    assert_eq!(built(|b| {
        b.push_element::<u8>(1);
    }), [1]);
    assert_eq!(built(|b| {
        b.push_element::<u8>(1);
        b.push_element::<u32>(2);
    }), [2, 0, 0, 0, 0, 0, 0, 1]);
    assert_eq!(built(|b| {
        b.push_element::<u16>(0x0102);
        b.push_element::<i64>(-1);
    }), [255, 255, 255, 255, 255, 255, 255, 255, 0, 0, 0, 0, 0, 0, 2, 1]);
}

#[test]
fn push_and_pop_bytes() {
    let mut b = Builder::new();
    b.push_bytes(&[9, 9]);
    b.push_bytes(&[1, 2, 3]);
    assert_eq!(b.data(), [1, 2, 3, 9, 9]);
    b.pop_bytes(3);
    assert_eq!(b.data(), [9, 9]);
    assert_eq!(b.size(), 2);
}

#[test]
fn defaulted_elements_are_omitted() {
    let mut b = Builder::new();
    let start = b.start_info();
    b.add_element::<i8>(4, 7, 7);
    let obj = b.end_info(start, 1);
    // No field data, just a vtable with an empty slot and the object prefix.
    assert_eq!(obj, 4);
    assert_eq!(b.data(), [6, 0, 4, 0, 0, 0, 6, 0, 0, 0]);
}

#[test]
fn end_info_emits_patched_vtable() {
    let mut b = Builder::new();
    let start = b.start_info();
    b.add_element::<i32>(4, 42, 0);
    let obj = b.end_info(start, 1);
    assert_eq!(obj, 8);
    assert_eq!(
        b.data(),
        // vtable [len=6][object size=8][slot 4], soffset 6, the i32 42
        [6, 0, 8, 0, 4, 0, 6, 0, 0, 0, 42, 0, 0, 0]
    );
}

#[test]
fn identical_vtables_are_shared() {
    let mut b = Builder::new();
    let s1 = b.start_info();
    b.add_element::<i32>(4, 1, 0);
    let o1 = b.end_info(s1, 1);
    // Spacer so the second object starts at the same alignment phase and
    // produces a byte-identical vtable.
    b.push_element::<u16>(0xAAAA);
    let before = b.size();
    let s2 = b.start_info();
    b.add_element::<i32>(4, 2, 0);
    let o2 = b.end_info(s2, 1);
    // Second object adds only its field and soffset word, no second vtable.
    assert_eq!(b.size() - before, 8);
    assert_ne!(o1, o2);
    // Both objects point back at the same vtable bytes.
    let data = b.data();
    let at = |off: u32| data.len() - off as usize;
    let so = |off: u32| {
        i32::from_le_bytes(data[at(off)..at(off) + 4].try_into().unwrap())
    };
    assert_eq!(at(o1) as i32 - so(o1), at(o2) as i32 - so(o2));
}

#[test]
fn struct_frames_are_inline() {
    let mut b = Builder::new();
    b.start_struct(4);
    b.push_element::<i32>(2);
    b.push_element::<i32>(1);
    let end = b.end_struct();
    assert_eq!(end, 8);
    assert_eq!(b.data(), [1, 0, 0, 0, 2, 0, 0, 0]);
}

#[test]
fn vector_frame_prefixes_count() {
    let mut b = Builder::new();
    b.start_vector(2 * 2, 2);
    b.push_element::<u16>(20);
    b.push_element::<u16>(10);
    let off = b.end_vector(2);
    assert_eq!(off, b.size());
    assert_eq!(b.data(), [2, 0, 0, 0, 10, 0, 20, 0]);
}

#[test]
fn create_string_layout() {
    assert_eq!(built(|b| {
        b.create_string("abc");
    }), [3, 0, 0, 0, 97, 98, 99, 0]);
    // Length excludes the terminator; padding keeps the prefix aligned.
    assert_eq!(built(|b| {
        b.create_string("abcd");
    }), [4, 0, 0, 0, 97, 98, 99, 100, 0, 0, 0, 0]);
}

#[test]
fn finish_writes_aligned_root() {
    let mut b = Builder::new();
    let start = b.start_info();
    b.add_element::<i32>(4, 42, 0);
    let obj = b.end_info(start, 1);
    b.finish(obj);
    let data = b.data();
    assert_eq!(data.len() % b.minalign(), 0);
    let root = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
    // The root offset lands on the object's soffset word.
    assert_eq!(data.len() - root, obj as usize);
}

#[test]
fn clear_resets_state() {
    let mut b = Builder::new();
    b.push_element::<u64>(1);
    b.clear();
    assert_eq!(b.size(), 0);
    assert_eq!(b.minalign(), 1);
    b.push_element::<u8>(5);
    assert_eq!(b.data(), [5]);
}
