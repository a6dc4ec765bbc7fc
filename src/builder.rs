//! # BufferBuilder - Flat Buffer Construction
//!
//! This module provides `BufferBuilder` for assembling a flat buffer from
//! leaf values up to the root. The builder owns a growable byte region that
//! is written **back-to-front**: every allocation decrements a front cursor,
//! so data written earlier sits at higher addresses. Because stored offsets
//! are distances rather than absolute positions, previously written
//! references stay valid as the region grows. There is no patch-up pass.
//!
//! ## Usage
//!
//! ```ignore
//! let mut b = BufferBuilder::new();
//! let name = b.create_string("orc");
//!
//! let start = b.start_table();
//! b.add_scalar(0, 150i16, 100);   // hp, default 100
//! b.add_offset(1, name);
//! let monster = b.end_table(start);
//!
//! b.finish(monster, Some(b"MONS"));
//! let bytes = b.finished_data();
//! ```
//!
//! ## Construction Rules
//!
//! Children are always created before the parent that references them, so a
//! child's offset is known when the parent field is written. Strings and
//! vectors may not be created while a table is open, and `start_table` calls
//! may not nest. Violations of these rules, and any call after `finish`, are
//! programming errors and panic immediately: continuing would corrupt the
//! buffer's addressing invariants.
//!
//! ## Default Elision
//!
//! `add_scalar` skips the write entirely when the value equals the schema
//! default, leaving a zero vtable entry; the reader falls back to the default
//! on access. `force_defaults(true)` disables the elision for byte-stable
//! output when a field must be mutable later.
//!
//! ## Vtable Deduplication
//!
//! `end_table` serializes the vtable and looks it up in a content-addressed
//! cache; structurally identical tables share one vtable, with each object's
//! signed header pointing at the shared copy. The cache lives for one build
//! session and is discarded on `reset`.

use hashbrown::HashMap;
use smallvec::SmallVec;
use tracing::trace;
use zerocopy::{Immutable, IntoBytes};

use crate::layout::{
    padding_after, UOffset, VOffset, WireScalar, FILE_IDENTIFIER_LEN, MAX_FIELD_SLOT,
    SIZE_UOFFSET, SIZE_VOFFSET, VTABLE_HEADER_LEN,
};

/// Offsets are u32 distances, so a buffer must stay addressable by them.
const MAX_BUFFER_LEN: usize = i32::MAX as usize;

/// Reference to a finished child object, measured from the buffer end.
/// Only obtainable from `end_table` / `create_*`, which guarantees parents
/// reference fully written children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Offset(pub(crate) UOffset);

impl Offset {
    /// Distance from the end of the buffer to the referenced object.
    pub fn value(self) -> UOffset {
        self.0
    }
}

/// Marker for an in-progress table, returned by `start_table` and consumed
/// by `end_table`.
#[derive(Debug, Clone, Copy)]
#[must_use = "an opened table must be closed with end_table"]
pub struct TableStart(UOffset);

#[derive(Debug, Clone, Copy)]
struct FieldLoc {
    /// Rev position (distance from buffer end) of the written field.
    off: UOffset,
    slot: u16,
}

pub struct BufferBuilder {
    buf: Vec<u8>,
    /// Index of the first written byte; data lives in `buf[head..]`.
    head: usize,
    field_locs: SmallVec<[FieldLoc; 16]>,
    vtables: HashMap<Box<[u8]>, UOffset>,
    minalign: usize,
    nested: bool,
    finished: bool,
    force_defaults: bool,
}

impl Default for BufferBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferBuilder {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let buf = vec![0u8; capacity];
        let head = buf.len();
        Self {
            buf,
            head,
            field_locs: SmallVec::new(),
            vtables: HashMap::new(),
            minalign: 1,
            nested: false,
            finished: false,
            force_defaults: false,
        }
    }

    /// When enabled, `add_scalar` writes fields even when they equal their
    /// default. Builder-wide switch; affects only subsequent adds.
    pub fn force_defaults(&mut self, on: bool) {
        self.force_defaults = on;
    }

    /// Clears the builder for a new construction cycle, keeping its
    /// allocation. The vtable cache is discarded: offsets from the previous
    /// session are meaningless in the next buffer.
    pub fn reset(&mut self) {
        self.head = self.buf.len();
        self.field_locs.clear();
        self.vtables.clear();
        self.minalign = 1;
        self.nested = false;
        self.finished = false;
    }

    /// Bytes written so far (distance from buffer end to the front cursor).
    pub fn used(&self) -> usize {
        self.buf.len() - self.head
    }

    fn assert_buildable(&self, what: &str) {
        assert!(
            !self.finished,
            "{what} called on a finished builder; call reset() first"
        );
    }

    fn assert_not_nested(&self, what: &str) {
        assert!(
            !self.nested,
            "{what} called while a table is open; finish it with end_table first"
        );
    }

    fn grow(&mut self, needed: usize) {
        let used = self.used();
        let mut new_len = self.buf.len().max(32);
        while new_len - used < needed {
            new_len = new_len
                .checked_mul(2)
                .filter(|&n| n <= MAX_BUFFER_LEN)
                .expect("flat buffer exceeds the 2 GiB addressing limit");
        }
        let mut new_buf = vec![0u8; new_len];
        new_buf[new_len - used..].copy_from_slice(&self.buf[self.head..]);
        self.buf = new_buf;
        self.head = self.buf.len() - used;
    }

    /// Claims `n` bytes at the front and returns their start index.
    fn make_space(&mut self, n: usize) -> usize {
        if self.head < n {
            self.grow(n);
        }
        self.head -= n;
        self.head
    }

    /// Pads so that after `additional` more bytes the front cursor satisfies
    /// `align`, and folds `align` into the buffer-wide minimum alignment.
    fn align(&mut self, align: usize, additional: usize) {
        if align > self.minalign {
            self.minalign = align;
        }
        let pad = padding_after(self.used() + additional, align);
        if pad > 0 {
            let at = self.make_space(pad);
            self.buf[at..at + pad].fill(0);
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        let at = self.make_space(bytes.len());
        self.buf[at..at + bytes.len()].copy_from_slice(bytes);
    }

    fn push_scalar<T: WireScalar>(&mut self, value: T) {
        self.align(T::WIDTH, 0);
        let at = self.make_space(T::WIDTH);
        T::write_at(&mut self.buf, at, value);
    }

    /// Writes a forward reference to `child` at the front cursor. The stored
    /// value is the distance from the reference's own location to the child.
    fn push_uoffset(&mut self, child: Offset) {
        self.align(SIZE_UOFFSET, 0);
        let at = self.make_space(SIZE_UOFFSET);
        let here = (self.buf.len() - at) as UOffset;
        assert!(
            child.0 < here,
            "offset {} does not reference an already written child",
            child.0
        );
        u32::write_at(&mut self.buf, at, here - child.0);
    }

    /// Opens a table. Field adds stage (slot, position) pairs until
    /// `end_table` materializes the object and its vtable.
    pub fn start_table(&mut self) -> TableStart {
        self.assert_buildable("start_table");
        self.assert_not_nested("start_table");
        self.nested = true;
        self.field_locs.clear();
        TableStart(self.used() as UOffset)
    }

    fn track_field(&mut self, slot: u16) {
        assert!(self.nested, "field add called outside start_table/end_table");
        assert!(
            slot <= MAX_FIELD_SLOT,
            "field slot {slot} beyond the vtable limit {MAX_FIELD_SLOT}"
        );
        self.field_locs.push(FieldLoc {
            off: self.used() as UOffset,
            slot,
        });
    }

    /// Stages a scalar field. Skipped entirely when `value == default` and
    /// force-defaults is off. This is the primary space-saving device.
    pub fn add_scalar<T: WireScalar>(&mut self, slot: u16, value: T, default: T) {
        self.assert_buildable("add_scalar");
        if value == default && !self.force_defaults {
            return;
        }
        self.push_scalar(value);
        self.track_field(slot);
    }

    /// Stages a reference field to an already finished child.
    pub fn add_offset(&mut self, slot: u16, child: Offset) {
        self.assert_buildable("add_offset");
        self.push_uoffset(child);
        self.track_field(slot);
    }

    /// Stages a struct field inline. `align` is the struct's schema
    /// alignment (max member alignment, possibly widened by an override);
    /// the value's wire image comes from its zerocopy byte view.
    pub fn add_struct<T: IntoBytes + Immutable>(&mut self, slot: u16, value: &T, align: usize) {
        self.assert_buildable("add_struct");
        let bytes = value.as_bytes();
        self.align(align, bytes.len());
        self.push_bytes(bytes);
        self.track_field(slot);
    }

    /// Materializes the open table: writes the object header, builds the
    /// vtable, deduplicates it against previously emitted vtables, and
    /// returns the object's offset for use as a child reference.
    pub fn end_table(&mut self, start: TableStart) -> Offset {
        assert!(self.nested, "end_table called without start_table");
        self.nested = false;

        // Placeholder for the signed vtable offset; fixed up below once the
        // vtable position is known.
        self.push_scalar::<i32>(0);
        let object_rev = self.used() as UOffset;

        let table_size = object_rev - start.0;
        assert!(
            table_size <= VOffset::MAX as UOffset,
            "table object of {table_size} bytes exceeds the u16 size field"
        );

        let entry_count = self
            .field_locs
            .iter()
            .map(|loc| loc.slot as usize + 1)
            .max()
            .unwrap_or(0);
        let vtable_len = VTABLE_HEADER_LEN + entry_count * SIZE_VOFFSET;

        let mut vtable: SmallVec<[u8; 64]> = SmallVec::from_elem(0, vtable_len);
        vtable[0..2].copy_from_slice(&(vtable_len as VOffset).to_le_bytes());
        vtable[2..4].copy_from_slice(&(table_size as VOffset).to_le_bytes());
        for loc in &self.field_locs {
            let entry = VTABLE_HEADER_LEN + loc.slot as usize * SIZE_VOFFSET;
            let field_off = (object_rev - loc.off) as VOffset;
            assert!(
                vtable[entry] == 0 && vtable[entry + 1] == 0,
                "field slot {} added twice to one table",
                loc.slot
            );
            vtable[entry..entry + SIZE_VOFFSET].copy_from_slice(&field_off.to_le_bytes());
        }
        self.field_locs.clear();

        let vtable_rev = match self.vtables.get(vtable.as_slice()) {
            Some(&rev) => rev,
            None => {
                self.align(SIZE_VOFFSET, vtable.len());
                self.push_bytes(&vtable);
                let rev = self.used() as UOffset;
                self.vtables.insert(vtable.into_vec().into_boxed_slice(), rev);
                rev
            }
        };

        // vtable address = object address - soffset, so sharing an earlier
        // (higher-address) vtable stores a negative value.
        let soffset = vtable_rev as i64 - object_rev as i64;
        let at = self.buf.len() - object_rev as usize;
        i32::write_at(&mut self.buf, at, soffset as i32);

        Offset(object_rev)
    }

    /// Writes a length-prefixed, NUL-terminated string and returns its
    /// offset. The terminator is not counted in the length.
    pub fn create_string(&mut self, s: &str) -> Offset {
        self.assert_buildable("create_string");
        self.assert_not_nested("create_string");
        let bytes = s.as_bytes();
        self.align(SIZE_UOFFSET, bytes.len() + 1);
        let at = self.make_space(bytes.len() + 1);
        self.buf[at..at + bytes.len()].copy_from_slice(bytes);
        self.buf[at + bytes.len()] = 0;
        self.push_scalar::<u32>(bytes.len() as u32);
        Offset(self.used() as UOffset)
    }

    fn start_vector(&mut self, what: &str, elem_size: usize, elem_align: usize, count: usize) {
        self.assert_buildable(what);
        self.assert_not_nested(what);
        let body = elem_size
            .checked_mul(count)
            .filter(|&n| n <= MAX_BUFFER_LEN)
            .expect("vector body exceeds the buffer addressing limit");
        self.align(SIZE_UOFFSET, body);
        self.align(elem_align, body);
    }

    fn end_vector(&mut self, count: usize) -> Offset {
        self.push_scalar::<u32>(count as u32);
        Offset(self.used() as UOffset)
    }

    /// Writes a vector of scalars and returns its offset. The u32 element
    /// count precedes the element storage.
    pub fn create_vector<T: WireScalar>(&mut self, items: &[T]) -> Offset {
        self.start_vector("create_vector", T::WIDTH, T::WIDTH, items.len());
        for item in items.iter().rev() {
            let at = self.make_space(T::WIDTH);
            T::write_at(&mut self.buf, at, *item);
        }
        self.end_vector(items.len())
    }

    /// Writes a vector of references to already finished children
    /// (tables or strings).
    pub fn create_vector_of_offsets(&mut self, items: &[Offset]) -> Offset {
        self.start_vector(
            "create_vector_of_offsets",
            SIZE_UOFFSET,
            SIZE_UOFFSET,
            items.len(),
        );
        for item in items.iter().rev() {
            self.push_uoffset(*item);
        }
        self.end_vector(items.len())
    }

    /// Writes a vector of inline structs. `align` is the struct's schema
    /// alignment; elements are stored contiguously with no per-element
    /// padding (struct sizes are multiples of their alignment).
    pub fn create_vector_of_structs<T: IntoBytes + Immutable>(
        &mut self,
        items: &[T],
        align: usize,
    ) -> Offset {
        let elem_size = std::mem::size_of::<T>();
        self.start_vector("create_vector_of_structs", elem_size, align, items.len());
        self.push_bytes(items.as_bytes());
        self.end_vector(items.len())
    }

    /// Finalizes the buffer: pads to the strictest alignment seen, writes the
    /// optional 4-byte file identifier, then the root offset at byte 0. The
    /// builder is consumed; further adds panic until `reset`.
    pub fn finish(&mut self, root: Offset, file_identifier: Option<&[u8; FILE_IDENTIFIER_LEN]>) {
        self.assert_buildable("finish");
        self.assert_not_nested("finish");
        let prefix = SIZE_UOFFSET + file_identifier.map_or(0, |_| FILE_IDENTIFIER_LEN);
        // The identifier must sit directly behind the root offset, so the
        // front is aligned here once; the later pushes insert no padding.
        let minalign = self.minalign.max(SIZE_UOFFSET);
        self.align(minalign, prefix);
        if let Some(ident) = file_identifier {
            self.push_bytes(ident);
        }
        self.push_uoffset(root);
        self.finished = true;
        trace!(
            len = self.used(),
            vtables = self.vtables.len(),
            "finished flat buffer"
        );
    }

    /// The finished buffer. Panics if `finish` has not been called.
    pub fn finished_data(&self) -> &[u8] {
        assert!(self.finished, "finished_data called before finish");
        &self.buf[self.head..]
    }

    /// Transfers ownership of the finished buffer to the caller.
    pub fn into_bytes(mut self) -> Vec<u8> {
        assert!(self.finished, "into_bytes called before finish");
        self.buf.split_off(self.head)
    }
}
