//! # flatbin - Schema-Driven Zero-Copy Flat Buffers
//!
//! flatbin serializes a value tree once into a flat, self-contained byte
//! buffer and reads it directly from those bytes, with no deserialization
//! pass. Optional and versioned fields are reached through offset-based
//! indirection tables ("vtables"), so readers with newer or older schemas
//! keep working against the same bytes.
//!
//! - **Zero-copy reads**: accessors return values and references straight
//!   into the buffer
//! - **Build once, read anywhere**: offsets are stored as distances, so the
//!   buffer is position independent
//! - **Untrusted input**: a standalone verifier proves a foreign buffer safe
//!   before any accessor touches it
//!
//! ## Quick Start
//!
//! ```ignore
//! use flatbin::{root_table, verify_buffer, BufferBuilder};
//!
//! let mut b = BufferBuilder::new();
//! let name = b.create_string("orc");
//! let start = b.start_table();
//! b.add_scalar(0, 150i16, 100); // hp, schema default 100
//! b.add_offset(1, name);
//! let monster = b.end_table(start);
//! b.finish(monster, None);
//!
//! let bytes = b.finished_data();
//! let root = root_table(bytes);
//! assert_eq!(root.get_scalar(0, 100i16), 150);
//! assert_eq!(root.get_str(1), Some("orc"));
//! ```
//!
//! ## Buffer Layout
//!
//! The builder writes back-to-front, so children sit at higher addresses
//! than the parents referencing them and no offset ever needs patching:
//!
//! ```text
//! +-------------+------------------+---------+----------+-----+-----------+
//! | root offset | file identifier? | vtables | root obj | ... | leaf data |
//! | (u32)       | (4 ASCII bytes)  |         |          |     |           |
//! +-------------+------------------+---------+----------+-----+-----------+
//!  low addresses (written last)          high addresses (written first)
//! ```
//!
//! | Piece | Layout |
//! |-------|--------|
//! | **Vtable** | `[u16 vtable_size][u16 object_size][u16 field_offset]*`, entry 0 = absent |
//! | **Table** | `[i32 soffset_to_vtable][present fields]` |
//! | **Vector** | `[u32 count][elements]` |
//! | **String** | byte vector + NUL terminator not counted in the length |
//! | **Struct** | fixed inline layout, no vtable, nothing stored but the members |
//!
//! All multi-byte scalars are little-endian at natural alignment.
//!
//! ## Trust Model
//!
//! The accessor layer ([`view`], [`mutate`]) assumes a valid buffer and pays
//! no bounds-check cost; it is for buffers built in-process or already
//! verified. The [`verify`] pass assumes nothing and checks every address;
//! it is for buffers received from outside. The two are independent code
//! paths sharing only [`layout`].
//!
//! ## Module Overview
//!
//! - [`layout`]: offset types, alignment arithmetic, little-endian scalars
//! - [`schema`]: field-layout descriptors consumed from a schema compiler
//! - [`builder`]: back-to-front buffer construction with vtable dedup
//! - [`view`]: trusting zero-copy accessors
//! - [`mutate`]: in-place, size-preserving field mutation
//! - [`verify`]: recursive structural validation of untrusted buffers

pub mod builder;
pub mod layout;
pub mod mutate;
pub mod schema;
pub mod verify;
pub mod view;

#[cfg(test)]
mod tests;

pub use builder::{BufferBuilder, Offset, TableStart};
pub use layout::WireScalar;
pub use mutate::{root_table_mut, StructMut, TableMut};
pub use schema::{ElemKind, FieldDef, FieldKind, ScalarDefault, ScalarKind, Schema, TableDesc};
pub use verify::{verify_buffer, Verifier, VerifierOptions, VerifyError};
pub use view::{
    buffer_has_identifier, root_table, StrVectorView, StructVectorView, StructView,
    TableVectorView, TableView, VectorView,
};
