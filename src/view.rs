//! # Trusting Accessors - Zero-Copy Reads
//!
//! This module provides typed, read-only views over a finished flat buffer.
//! All getters return values or references into the underlying bytes with
//! O(1) vtable-indirected lookup and no allocation.
//!
//! ## Trust Precondition
//!
//! This layer performs **no bounds checks**: it is the fast path for buffers
//! that are already known-good, either because this process built them or
//! because [`crate::Verifier`] accepted them. Reading a malformed buffer that
//! was never verified is undefined behavior; out-of-range offsets
//! panic at best. The paranoid path lives in [`crate::verify`] and shares
//! only the layout constants with this one.
//!
//! ## Usage
//!
//! ```ignore
//! let monster = root_table(bytes);
//! let hp: i16 = monster.get_scalar(0, 100);       // default fallback
//! let name = monster.get_str(1).unwrap_or("");    // absent -> None
//! ```
//!
//! ## Thread Safety
//!
//! Views borrow the buffer immutably; any number may read the same buffer
//! concurrently as long as no mutator is active on it.

use zerocopy::{FromBytes, Immutable, KnownLayout, Unaligned};

use crate::layout::{
    field_slot_to_vtable_offset, WireScalar, FILE_IDENTIFIER_LEN, SIZE_UOFFSET, SIZE_VOFFSET,
};

/// Resolves a stored forward reference: target = location + stored distance.
#[inline]
fn indirect(buf: &[u8], loc: usize) -> usize {
    loc + u32::read_at(buf, loc) as usize
}

#[inline]
fn read_str(buf: &[u8], loc: usize) -> &str {
    let len = u32::read_at(buf, loc) as usize;
    let bytes = &buf[loc + SIZE_UOFFSET..loc + SIZE_UOFFSET + len];
    // SAFETY: this layer only reads buffers produced by BufferBuilder
    // (create_string takes &str) or accepted by the verifier, which rejects
    // strings that are not valid UTF-8. The returned reference borrows the
    // buffer for 'a, so it cannot outlive the bytes.
    unsafe { std::str::from_utf8_unchecked(bytes) }
}

/// View of the buffer's single root table, located via the first 4 bytes.
pub fn root_table(buf: &[u8]) -> TableView<'_> {
    TableView::new(buf, indirect(buf, 0))
}

/// Checks the 4-byte format tag following the root offset.
pub fn buffer_has_identifier(buf: &[u8], ident: &[u8; FILE_IDENTIFIER_LEN]) -> bool {
    buf.len() >= SIZE_UOFFSET + FILE_IDENTIFIER_LEN
        && &buf[SIZE_UOFFSET..SIZE_UOFFSET + FILE_IDENTIFIER_LEN] == ident
}

/// Zero-copy view of one table object.
#[derive(Debug, Clone, Copy)]
pub struct TableView<'a> {
    buf: &'a [u8],
    loc: usize,
}

impl<'a> TableView<'a> {
    pub fn new(buf: &'a [u8], loc: usize) -> Self {
        Self { buf, loc }
    }

    pub fn buf(&self) -> &'a [u8] {
        self.buf
    }

    /// Byte position of this object within the buffer.
    pub fn loc(&self) -> usize {
        self.loc
    }

    /// Buffer position of a field, or `None` when the slot is absent
    /// (beyond the vtable, or elided at construction).
    pub fn field_loc(&self, slot: u16) -> Option<usize> {
        let soffset = i32::read_at(self.buf, self.loc);
        let vtable = (self.loc as isize - soffset as isize) as usize;
        let vtable_len = u16::read_at(self.buf, vtable) as usize;
        let entry = field_slot_to_vtable_offset(slot);
        if entry + SIZE_VOFFSET > vtable_len {
            return None;
        }
        match u16::read_at(self.buf, vtable + entry) as usize {
            0 => None,
            field_off => Some(self.loc + field_off),
        }
    }

    pub fn is_present(&self, slot: u16) -> bool {
        self.field_loc(slot).is_some()
    }

    /// Reads a scalar field, falling back to the schema default when the
    /// slot is absent.
    pub fn get_scalar<T: WireScalar>(&self, slot: u16, default: T) -> T {
        match self.field_loc(slot) {
            Some(loc) => T::read_at(self.buf, loc),
            None => default,
        }
    }

    pub fn get_str(&self, slot: u16) -> Option<&'a str> {
        let loc = self.field_loc(slot)?;
        Some(read_str(self.buf, indirect(self.buf, loc)))
    }

    pub fn get_table(&self, slot: u16) -> Option<TableView<'a>> {
        let loc = self.field_loc(slot)?;
        Some(TableView::new(self.buf, indirect(self.buf, loc)))
    }

    /// Typed reference to an inline struct field. `T` must be a
    /// `#[repr(C)]` zerocopy type with little-endian wrapper members, the
    /// same wire image the builder's `add_struct` wrote.
    pub fn get_struct<T>(&self, slot: u16) -> Option<&'a T>
    where
        T: FromBytes + KnownLayout + Immutable + Unaligned,
    {
        let loc = self.field_loc(slot)?;
        T::ref_from_bytes(&self.buf[loc..loc + std::mem::size_of::<T>()]).ok()
    }

    /// Untyped struct field view for schema-driven front ends.
    pub fn get_struct_view(&self, slot: u16) -> Option<StructView<'a>> {
        let loc = self.field_loc(slot)?;
        Some(StructView::new(self.buf, loc))
    }

    pub fn get_vector<T: WireScalar>(&self, slot: u16) -> Option<VectorView<'a, T>> {
        let loc = self.field_loc(slot)?;
        Some(VectorView::new(self.buf, indirect(self.buf, loc)))
    }

    pub fn get_table_vector(&self, slot: u16) -> Option<TableVectorView<'a>> {
        let loc = self.field_loc(slot)?;
        Some(TableVectorView::new(self.buf, indirect(self.buf, loc)))
    }

    pub fn get_str_vector(&self, slot: u16) -> Option<StrVectorView<'a>> {
        let loc = self.field_loc(slot)?;
        Some(StrVectorView::new(self.buf, indirect(self.buf, loc)))
    }

    pub fn get_struct_vector<T>(&self, slot: u16) -> Option<StructVectorView<'a, T>>
    where
        T: FromBytes + KnownLayout + Immutable + Unaligned,
    {
        let loc = self.field_loc(slot)?;
        Some(StructVectorView::new(self.buf, indirect(self.buf, loc)))
    }

    /// Union discriminant; 0 means no variant is set.
    pub fn get_union_type(&self, slot: u16) -> u8 {
        self.get_scalar(slot, 0u8)
    }

    /// The active union variant's table. The caller selects the concrete
    /// type from the paired discriminant.
    pub fn get_union(&self, slot: u16) -> Option<TableView<'a>> {
        self.get_table(slot)
    }
}

/// Zero-copy view of a fixed-layout struct. Member offsets are schema
/// constants; there is no indirection and no absence.
#[derive(Debug, Clone, Copy)]
pub struct StructView<'a> {
    buf: &'a [u8],
    loc: usize,
}

impl<'a> StructView<'a> {
    pub fn new(buf: &'a [u8], loc: usize) -> Self {
        Self { buf, loc }
    }

    pub fn loc(&self) -> usize {
        self.loc
    }

    pub fn scalar_at<T: WireScalar>(&self, offset: usize) -> T {
        T::read_at(self.buf, self.loc + offset)
    }

    /// Nested struct member, stored inline.
    pub fn struct_at(&self, offset: usize) -> StructView<'a> {
        StructView::new(self.buf, self.loc + offset)
    }
}

/// Zero-copy view of a scalar vector.
#[derive(Debug, Clone, Copy)]
pub struct VectorView<'a, T: WireScalar> {
    buf: &'a [u8],
    loc: usize,
    _elem: std::marker::PhantomData<T>,
}

impl<'a, T: WireScalar> VectorView<'a, T> {
    pub fn new(buf: &'a [u8], loc: usize) -> Self {
        Self {
            buf,
            loc,
            _elem: std::marker::PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        u32::read_at(self.buf, self.loc) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Random-access element read. No bounds check; the verifier proved the
    /// declared count fits the buffer.
    pub fn get(&self, index: usize) -> T {
        T::read_at(self.buf, self.loc + SIZE_UOFFSET + index * T::WIDTH)
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + 'a
    where
        T: 'a,
    {
        let view = *self;
        (0..self.len()).map(move |i| view.get(i))
    }
}

impl<'a> VectorView<'a, u8> {
    /// The raw element bytes of a byte vector.
    pub fn bytes(&self) -> &'a [u8] {
        &self.buf[self.loc + SIZE_UOFFSET..self.loc + SIZE_UOFFSET + self.len()]
    }
}

/// Zero-copy view of a vector of table references.
#[derive(Debug, Clone, Copy)]
pub struct TableVectorView<'a> {
    buf: &'a [u8],
    loc: usize,
}

impl<'a> TableVectorView<'a> {
    pub fn new(buf: &'a [u8], loc: usize) -> Self {
        Self { buf, loc }
    }

    pub fn len(&self) -> usize {
        u32::read_at(self.buf, self.loc) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> TableView<'a> {
        let entry = self.loc + SIZE_UOFFSET + index * SIZE_UOFFSET;
        TableView::new(self.buf, indirect(self.buf, entry))
    }
}

/// Zero-copy view of a vector of string references.
#[derive(Debug, Clone, Copy)]
pub struct StrVectorView<'a> {
    buf: &'a [u8],
    loc: usize,
}

impl<'a> StrVectorView<'a> {
    pub fn new(buf: &'a [u8], loc: usize) -> Self {
        Self { buf, loc }
    }

    pub fn len(&self) -> usize {
        u32::read_at(self.buf, self.loc) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> &'a str {
        let entry = self.loc + SIZE_UOFFSET + index * SIZE_UOFFSET;
        read_str(self.buf, indirect(self.buf, entry))
    }
}

/// Zero-copy view of a vector of inline structs.
#[derive(Debug, Clone, Copy)]
pub struct StructVectorView<'a, T> {
    buf: &'a [u8],
    loc: usize,
    _elem: std::marker::PhantomData<T>,
}

impl<'a, T> StructVectorView<'a, T>
where
    T: FromBytes + KnownLayout + Immutable + Unaligned,
{
    pub fn new(buf: &'a [u8], loc: usize) -> Self {
        Self {
            buf,
            loc,
            _elem: std::marker::PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        u32::read_at(self.buf, self.loc) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> &'a T {
        let size = std::mem::size_of::<T>();
        let start = self.loc + SIZE_UOFFSET + index * size;
        // Unaligned + exact length make the conversion infallible; a failure
        // here would mean the trust precondition was violated.
        T::ref_from_bytes(&self.buf[start..start + size])
            .unwrap_or_else(|_| unreachable!("struct vector element conversion"))
    }
}
