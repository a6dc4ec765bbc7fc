//! # In-Place Mutation
//!
//! Size-preserving edits over a finished buffer. Mutation never relocates
//! anything: only fixed-width slots can be rewritten, and a table scalar is
//! writable only when it was actually stored. A field elided at
//! construction time has no bytes to overwrite, and mutating it is rejected
//! rather than corrupting a neighbor. Struct members always have storage, so
//! they are always mutable.
//!
//! Reference fields (tables, vectors, strings, unions) cannot be repointed;
//! only the referenced object's own fixed-width fields may be mutated.
//!
//! ## Usage
//!
//! ```ignore
//! let mut table = root_table_mut(&mut bytes);
//! table.set_scalar(0, 120i16)?;          // present -> overwritten in place
//! match table.set_scalar(3, 7u8) {
//!     Err(_) => { /* elided at build time; rebuild to set it */ }
//!     Ok(()) => {}
//! }
//! ```
//!
//! Mutation requires exclusive access to the buffer (`&mut [u8]`); each write
//! is a single aligned store of the field's width.

use eyre::{bail, Result};

use crate::layout::WireScalar;
use crate::view::TableView;

/// Mutable view of the buffer's root table.
pub fn root_table_mut(buf: &mut [u8]) -> TableMut<'_> {
    let loc = u32::read_at(buf, 0) as usize;
    TableMut::new(buf, loc)
}

/// Mutable view of one table object.
#[derive(Debug)]
pub struct TableMut<'a> {
    buf: &'a mut [u8],
    loc: usize,
}

impl<'a> TableMut<'a> {
    pub fn new(buf: &'a mut [u8], loc: usize) -> Self {
        Self { buf, loc }
    }

    fn field_loc(&self, slot: u16) -> Option<usize> {
        TableView::new(self.buf, self.loc).field_loc(slot)
    }

    /// Overwrites a scalar field in place. Fails without touching the buffer
    /// when the slot is absent from the vtable; the caller may rebuild (or
    /// build with force-defaults) instead.
    pub fn set_scalar<T: WireScalar>(&mut self, slot: u16, value: T) -> Result<()> {
        let Some(loc) = self.field_loc(slot) else {
            bail!("field slot {slot} is absent from the vtable; mutation requires a rebuild");
        };
        T::write_at(self.buf, loc, value);
        Ok(())
    }

    /// Mutable view of an inline struct field.
    pub fn struct_at(&mut self, slot: u16) -> Result<StructMut<'_>> {
        let Some(loc) = self.field_loc(slot) else {
            bail!("struct field slot {slot} is absent from the vtable");
        };
        Ok(StructMut::new(self.buf, loc))
    }

    /// Mutable view of a referenced child table.
    pub fn table_at(&mut self, slot: u16) -> Result<TableMut<'_>> {
        let Some(loc) = self.field_loc(slot) else {
            bail!("table field slot {slot} is absent from the vtable");
        };
        let target = loc + u32::read_at(self.buf, loc) as usize;
        Ok(TableMut::new(self.buf, target))
    }
}

/// Mutable view of a fixed-layout struct. Members always have storage, so
/// every write succeeds.
#[derive(Debug)]
pub struct StructMut<'a> {
    buf: &'a mut [u8],
    loc: usize,
}

impl<'a> StructMut<'a> {
    pub fn new(buf: &'a mut [u8], loc: usize) -> Self {
        Self { buf, loc }
    }

    pub fn set_scalar_at<T: WireScalar>(&mut self, offset: usize, value: T) {
        T::write_at(self.buf, self.loc + offset, value);
    }

    pub fn scalar_at<T: WireScalar>(&self, offset: usize) -> T {
        T::read_at(self.buf, self.loc + offset)
    }

    /// Mutable view of a nested struct member.
    pub fn struct_at(&mut self, offset: usize) -> StructMut<'_> {
        let loc = self.loc + offset;
        StructMut::new(self.buf, loc)
    }
}
