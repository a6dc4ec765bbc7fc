//! # Schema Descriptors
//!
//! This module defines the field-layout descriptor the engine consumes from
//! an external schema compiler: for every table, an ordered field list (slot
//! index, wire kind, scalar default), plus the declared root table and an
//! optional 4-byte file identifier.
//!
//! The engine itself is schema-agnostic at build time (the builder takes
//! slots and values directly), but the verifier needs the descriptor to know
//! which slots are references and what they reference.
//!
//! ## Table References
//!
//! Tables reference each other by index into the [`Schema`] registry rather
//! than by nesting, so recursive and mutually-recursive types are expressible
//! without reference cycles:
//!
//! ```ignore
//! // table Node { next: Node; payload: string; }
//! let schema = Schema::new(
//!     vec![TableDesc::new(
//!         "Node",
//!         vec![
//!             FieldDef::new("next", 0, FieldKind::Table { table: 0 }),
//!             FieldDef::new("payload", 1, FieldKind::Str),
//!         ],
//!     )],
//!     0,
//! )?;
//! ```
//!
//! ## Unions
//!
//! A union occupies two slots: a u8 discriminant (`FieldKind::UnionType`) and
//! an offset to the active variant (`FieldKind::Union`). The value field names
//! its discriminant slot so the verifier can pair them. Discriminant 0 means
//! "no variant"; discriminant `n` selects `variants[n - 1]`.

use eyre::{ensure, Result};

use crate::layout::MAX_FIELD_SLOT;

/// Fixed-width scalar kinds storable directly in a table or struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl ScalarKind {
    /// Wire width in bytes; also the natural alignment.
    pub fn width(self) -> usize {
        match self {
            ScalarKind::Bool | ScalarKind::I8 | ScalarKind::U8 => 1,
            ScalarKind::I16 | ScalarKind::U16 => 2,
            ScalarKind::I32 | ScalarKind::U32 | ScalarKind::F32 => 4,
            ScalarKind::I64 | ScalarKind::U64 | ScalarKind::F64 => 8,
        }
    }
}

/// Schema-declared default for a scalar field. Absent fields read as this
/// value; the builder elides writes that equal it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarDefault {
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// Element kind of a vector field.
#[derive(Debug, Clone, PartialEq)]
pub enum ElemKind {
    Scalar(ScalarKind),
    Struct { size: usize, align: usize },
    Str,
    Table { table: usize },
}

/// Wire kind of a table field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Scalar { kind: ScalarKind, default: ScalarDefault },
    /// Fixed-layout inline aggregate. `align` may widen the natural member
    /// alignment (explicit override); size and offsets are schema constants,
    /// never stored in the buffer.
    Struct { size: usize, align: usize },
    Str,
    Table { table: usize },
    Vector { elem: ElemKind },
    /// Offset half of a union. `type_slot` names the sibling discriminant
    /// field; `variants[n - 1]` is the table selected by discriminant `n`.
    Union { type_slot: u16, variants: Vec<usize> },
    /// Discriminant half of a union: a u8 defaulting to 0 ("no variant").
    UnionType,
}

/// One field of a table: name, slot index and wire kind.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub slot: u16,
    pub kind: FieldKind,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, slot: u16, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            slot,
            kind,
        }
    }
}

/// Ordered field list of one table type.
#[derive(Debug, Clone)]
pub struct TableDesc {
    pub name: String,
    fields: Vec<FieldDef>,
}

impl TableDesc {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field_by_slot(&self, slot: u16) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.slot == slot)
    }
}

/// Registry of table descriptors plus the declared root type.
#[derive(Debug, Clone)]
pub struct Schema {
    tables: Vec<TableDesc>,
    root: usize,
    file_identifier: Option<[u8; 4]>,
}

impl Schema {
    /// Builds a schema and validates its internal references: slots must be
    /// strictly increasing and in range, table references must resolve, and
    /// every union value field must name a `UnionType` sibling.
    pub fn new(tables: Vec<TableDesc>, root: usize) -> Result<Self> {
        ensure!(
            root < tables.len(),
            "root table index {} out of range ({} tables)",
            root,
            tables.len()
        );

        for table in &tables {
            let mut prev_slot: Option<u16> = None;
            for field in &table.fields {
                ensure!(
                    field.slot <= MAX_FIELD_SLOT,
                    "field {}.{} uses slot {} beyond the vtable limit {}",
                    table.name,
                    field.name,
                    field.slot,
                    MAX_FIELD_SLOT
                );
                if let Some(prev) = prev_slot {
                    ensure!(
                        field.slot > prev,
                        "field {}.{} repeats or reorders slot {}",
                        table.name,
                        field.name,
                        field.slot
                    );
                }
                prev_slot = Some(field.slot);

                match &field.kind {
                    FieldKind::Table { table: t } => {
                        ensure!(
                            *t < tables.len(),
                            "field {}.{} references unknown table {}",
                            table.name,
                            field.name,
                            t
                        );
                    }
                    FieldKind::Vector {
                        elem: ElemKind::Table { table: t },
                    } => {
                        ensure!(
                            *t < tables.len(),
                            "vector field {}.{} references unknown table {}",
                            table.name,
                            field.name,
                            t
                        );
                    }
                    FieldKind::Union { type_slot, variants } => {
                        let sibling = table.field_by_slot(*type_slot);
                        ensure!(
                            matches!(
                                sibling.map(|f| &f.kind),
                                Some(FieldKind::UnionType)
                            ),
                            "union field {}.{} names slot {} which is not a union discriminant",
                            table.name,
                            field.name,
                            type_slot
                        );
                        ensure!(
                            !variants.is_empty(),
                            "union field {}.{} declares no variants",
                            table.name,
                            field.name
                        );
                        for &v in variants {
                            ensure!(
                                v < tables.len(),
                                "union field {}.{} references unknown table {}",
                                table.name,
                                field.name,
                                v
                            );
                        }
                    }
                    FieldKind::Struct { size, align }
                    | FieldKind::Vector {
                        elem: ElemKind::Struct { size, align },
                    } => {
                        ensure!(
                            *size > 0 && align.is_power_of_two() && size % align == 0,
                            "struct field {}.{} has inconsistent size {} / align {}",
                            table.name,
                            field.name,
                            size,
                            align
                        );
                    }
                    _ => {}
                }
            }
        }

        Ok(Self {
            tables,
            root,
            file_identifier: None,
        })
    }

    /// Attaches a 4-byte ASCII format tag, checked by [`crate::Verifier`] and
    /// written by [`crate::BufferBuilder::finish`] callers.
    pub fn with_file_identifier(mut self, ident: [u8; 4]) -> Self {
        self.file_identifier = Some(ident);
        self
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn table(&self, index: usize) -> &TableDesc {
        &self.tables[index]
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn file_identifier(&self) -> Option<&[u8; 4]> {
        self.file_identifier.as_ref()
    }
}
