//! # Verifier - Untrusted Buffer Validation
//!
//! One bounded traversal that proves a candidate buffer can be read by the
//! accessor layer without any out-of-bounds access. The verifier assumes
//! nothing: every address and length computation is checked against the
//! buffer extent with overflow-checked arithmetic, strings must carry their
//! NUL terminator and be valid UTF-8, and union discriminants must name a
//! declared variant before the paired offset is followed.
//!
//! The traversal mirrors the accessor's but is an independent code path; the
//! two share only the layout constants in [`crate::layout`], keeping the fast
//! path free of checks.
//!
//! ## Resource Bounds
//!
//! A malicious buffer can alias one table from many references or nest
//! vtables into deep chains. [`VerifierOptions`] caps recursion depth and the
//! total number of tables visited; exceeding either ceiling is a verification
//! failure, not a crash. Auxiliary state is O(1) in the input size: two
//! counters plus the recursion stack, itself bounded by `max_depth`.
//!
//! ## Usage
//!
//! ```ignore
//! verify_buffer(&schema, bytes)?;
//! let root = root_table(bytes); // now safe to trust
//! ```
//!
//! A buffer that fails verification must be treated as wholly untrusted: no
//! partial-trust reads are permitted afterward.

use std::fmt;

use tracing::trace;

use crate::layout::{
    field_slot_to_vtable_offset, WireScalar, FILE_IDENTIFIER_LEN, SIZE_SOFFSET, SIZE_UOFFSET,
    SIZE_VOFFSET, VTABLE_HEADER_LEN,
};
use crate::schema::{ElemKind, FieldKind, Schema};

/// Structured reason a buffer was rejected. Positions are byte offsets into
/// the candidate buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyError {
    /// Buffer too short to hold even a root offset (or the declared
    /// identifier).
    BufferTooSmall { have: usize },
    /// A checked range `[at, at + len)` escapes the buffer.
    RangeOutOfBounds { at: usize, len: usize },
    /// An offset addition wrapped around the address space.
    OffsetOverflow { at: usize },
    /// A table's vtable pointer or vtable header is implausible.
    BadVtable { at: usize },
    /// A string's claimed end is not a NUL byte.
    MissingNullTerminator { at: usize },
    /// String bytes are not valid UTF-8.
    InvalidUtf8 { at: usize },
    /// A union discriminant names no declared variant.
    BadUnionDiscriminant { slot: u16, value: u8 },
    /// Exactly one half of a union pair is present.
    MissingUnionSibling { slot: u16 },
    /// Nesting exceeded `VerifierOptions::max_depth`.
    DepthLimitExceeded { limit: usize },
    /// More tables visited than `VerifierOptions::max_tables`.
    TableLimitExceeded { limit: usize },
    /// The buffer's format tag does not match the schema's.
    IdentifierMismatch,
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyError::BufferTooSmall { have } => {
                write!(f, "buffer of {have} bytes is too small for a root offset")
            }
            VerifyError::RangeOutOfBounds { at, len } => {
                write!(f, "range of {len} bytes at {at} escapes the buffer")
            }
            VerifyError::OffsetOverflow { at } => {
                write!(f, "offset stored at {at} overflows the address space")
            }
            VerifyError::BadVtable { at } => write!(f, "implausible vtable at {at}"),
            VerifyError::MissingNullTerminator { at } => {
                write!(f, "string terminator missing at {at}")
            }
            VerifyError::InvalidUtf8 { at } => write!(f, "invalid UTF-8 in string at {at}"),
            VerifyError::BadUnionDiscriminant { slot, value } => {
                write!(f, "union at slot {slot} has unrecognized discriminant {value}")
            }
            VerifyError::MissingUnionSibling { slot } => {
                write!(f, "union at slot {slot} is missing half of its field pair")
            }
            VerifyError::DepthLimitExceeded { limit } => {
                write!(f, "nesting exceeds the depth ceiling of {limit}")
            }
            VerifyError::TableLimitExceeded { limit } => {
                write!(f, "buffer references more than {limit} tables")
            }
            VerifyError::IdentifierMismatch => write!(f, "file identifier mismatch"),
        }
    }
}

impl std::error::Error for VerifyError {}

/// Ceilings protecting the verifier from pathological inputs.
#[derive(Debug, Clone, Copy)]
pub struct VerifierOptions {
    /// Maximum table/union nesting depth.
    pub max_depth: usize,
    /// Maximum number of tables visited across the whole traversal.
    pub max_tables: usize,
}

impl Default for VerifierOptions {
    fn default() -> Self {
        Self {
            max_depth: 64,
            max_tables: 1_000_000,
        }
    }
}

/// Verifies `buf` against `schema` with default ceilings.
pub fn verify_buffer(schema: &Schema, buf: &[u8]) -> Result<(), VerifyError> {
    Verifier::new(schema, buf).run()
}

/// Single-pass structural validator for one candidate buffer.
pub struct Verifier<'a> {
    schema: &'a Schema,
    buf: &'a [u8],
    opts: VerifierOptions,
    depth: usize,
    tables_seen: usize,
}

impl<'a> Verifier<'a> {
    pub fn new(schema: &'a Schema, buf: &'a [u8]) -> Self {
        Self::with_options(schema, buf, VerifierOptions::default())
    }

    pub fn with_options(schema: &'a Schema, buf: &'a [u8], opts: VerifierOptions) -> Self {
        Self {
            schema,
            buf,
            opts,
            depth: 0,
            tables_seen: 0,
        }
    }

    /// Runs the traversal. On success the accessor layer may trust the
    /// buffer; on failure the buffer must be discarded. Reruns start from
    /// fresh counters, so one verifier may be invoked repeatedly.
    pub fn run(&mut self) -> Result<(), VerifyError> {
        self.depth = 0;
        self.tables_seen = 0;
        let result = self.verify_root();
        if let Err(err) = &result {
            trace!(error = %err, "flat buffer rejected");
        }
        result
    }

    fn verify_root(&mut self) -> Result<(), VerifyError> {
        if self.buf.len() < SIZE_UOFFSET {
            return Err(VerifyError::BufferTooSmall {
                have: self.buf.len(),
            });
        }
        if let Some(ident) = self.schema.file_identifier() {
            let end = SIZE_UOFFSET + FILE_IDENTIFIER_LEN;
            if self.buf.len() < end || &self.buf[SIZE_UOFFSET..end] != ident {
                return Err(VerifyError::IdentifierMismatch);
            }
        }
        let root = self.read_uoffset(0)?;
        self.verify_table(root, self.schema.root())
    }

    fn check_range(&self, at: usize, len: usize) -> Result<(), VerifyError> {
        let end = at
            .checked_add(len)
            .ok_or(VerifyError::OffsetOverflow { at })?;
        if end > self.buf.len() {
            return Err(VerifyError::RangeOutOfBounds { at, len });
        }
        Ok(())
    }

    /// Reads a forward reference and resolves its target position.
    fn read_uoffset(&self, at: usize) -> Result<usize, VerifyError> {
        self.check_range(at, SIZE_UOFFSET)?;
        let distance = u32::read_at(self.buf, at) as usize;
        at.checked_add(distance)
            .ok_or(VerifyError::OffsetOverflow { at })
    }

    /// Buffer position of a present field, `None` when the slot is absent.
    /// The vtable range must already be verified.
    fn field_pos(
        &self,
        loc: usize,
        vtable: usize,
        vtable_len: usize,
        slot: u16,
    ) -> Result<Option<usize>, VerifyError> {
        let entry = field_slot_to_vtable_offset(slot);
        if entry + SIZE_VOFFSET > vtable_len {
            return Ok(None);
        }
        match u16::read_at(self.buf, vtable + entry) as usize {
            0 => Ok(None),
            field_off => loc
                .checked_add(field_off)
                .map(Some)
                .ok_or(VerifyError::OffsetOverflow { at: vtable + entry }),
        }
    }

    fn verify_table(&mut self, loc: usize, table_index: usize) -> Result<(), VerifyError> {
        self.tables_seen += 1;
        if self.tables_seen > self.opts.max_tables {
            return Err(VerifyError::TableLimitExceeded {
                limit: self.opts.max_tables,
            });
        }
        self.depth += 1;
        if self.depth > self.opts.max_depth {
            return Err(VerifyError::DepthLimitExceeded {
                limit: self.opts.max_depth,
            });
        }

        self.check_range(loc, SIZE_SOFFSET)?;
        let soffset = i32::read_at(self.buf, loc) as i64;
        let vtable = loc as i64 - soffset;
        if vtable < 0 || vtable as usize >= self.buf.len() {
            return Err(VerifyError::BadVtable { at: loc });
        }
        let vtable = vtable as usize;
        self.check_range(vtable, VTABLE_HEADER_LEN)?;
        let vtable_len = u16::read_at(self.buf, vtable) as usize;
        if vtable_len < VTABLE_HEADER_LEN || vtable_len % SIZE_VOFFSET != 0 {
            return Err(VerifyError::BadVtable { at: vtable });
        }
        self.check_range(vtable, vtable_len)?;
        // The object's declared extent; present fields must also fall inside
        // the buffer, each checked at its own width below.
        let table_size = u16::read_at(self.buf, vtable + SIZE_VOFFSET) as usize;
        self.check_range(loc, table_size)?;

        let desc = self.schema.table(table_index);
        for field in desc.fields() {
            let pos = self.field_pos(loc, vtable, vtable_len, field.slot)?;
            match &field.kind {
                FieldKind::Scalar { kind, .. } => {
                    if let Some(pos) = pos {
                        self.check_range(pos, kind.width())?;
                    }
                }
                FieldKind::UnionType => {
                    if let Some(pos) = pos {
                        self.check_range(pos, 1)?;
                    }
                }
                FieldKind::Struct { size, .. } => {
                    if let Some(pos) = pos {
                        self.check_range(pos, *size)?;
                    }
                }
                FieldKind::Str => {
                    if let Some(pos) = pos {
                        let target = self.read_uoffset(pos)?;
                        self.verify_string(target)?;
                    }
                }
                FieldKind::Table { table } => {
                    if let Some(pos) = pos {
                        let target = self.read_uoffset(pos)?;
                        self.verify_table(target, *table)?;
                    }
                }
                FieldKind::Vector { elem } => {
                    if let Some(pos) = pos {
                        let target = self.read_uoffset(pos)?;
                        self.verify_vector(target, elem)?;
                    }
                }
                FieldKind::Union {
                    type_slot,
                    variants,
                } => {
                    let type_pos = self.field_pos(loc, vtable, vtable_len, *type_slot)?;
                    let discriminant = match type_pos {
                        Some(p) => {
                            self.check_range(p, 1)?;
                            self.buf[p]
                        }
                        None => 0,
                    };
                    match (discriminant, pos) {
                        (0, None) => {}
                        (0, Some(_)) | (_, None) => {
                            return Err(VerifyError::MissingUnionSibling { slot: field.slot });
                        }
                        (d, Some(pos)) => {
                            let variant = variants.get(d as usize - 1).copied().ok_or(
                                VerifyError::BadUnionDiscriminant {
                                    slot: field.slot,
                                    value: d,
                                },
                            )?;
                            let target = self.read_uoffset(pos)?;
                            self.verify_table(target, variant)?;
                        }
                    }
                }
            }
        }

        self.depth -= 1;
        Ok(())
    }

    fn verify_string(&self, loc: usize) -> Result<(), VerifyError> {
        self.check_range(loc, SIZE_UOFFSET)?;
        let len = u32::read_at(self.buf, loc) as usize;
        let total = len
            .checked_add(SIZE_UOFFSET + 1)
            .ok_or(VerifyError::OffsetOverflow { at: loc })?;
        self.check_range(loc, total)?;
        let body = loc + SIZE_UOFFSET;
        if self.buf[body + len] != 0 {
            return Err(VerifyError::MissingNullTerminator { at: body + len });
        }
        std::str::from_utf8(&self.buf[body..body + len])
            .map_err(|_| VerifyError::InvalidUtf8 { at: body })?;
        Ok(())
    }

    fn verify_vector(&mut self, loc: usize, elem: &ElemKind) -> Result<(), VerifyError> {
        self.check_range(loc, SIZE_UOFFSET)?;
        let count = u32::read_at(self.buf, loc) as usize;
        let elem_size = match elem {
            ElemKind::Scalar(kind) => kind.width(),
            ElemKind::Struct { size, .. } => *size,
            ElemKind::Str | ElemKind::Table { .. } => SIZE_UOFFSET,
        };
        let body = count
            .checked_mul(elem_size)
            .and_then(|n| n.checked_add(SIZE_UOFFSET))
            .ok_or(VerifyError::OffsetOverflow { at: loc })?;
        self.check_range(loc, body)?;

        match elem {
            ElemKind::Scalar(_) | ElemKind::Struct { .. } => {}
            ElemKind::Str => {
                for i in 0..count {
                    let entry = loc + SIZE_UOFFSET + i * SIZE_UOFFSET;
                    let target = self.read_uoffset(entry)?;
                    self.verify_string(target)?;
                }
            }
            ElemKind::Table { table } => {
                for i in 0..count {
                    let entry = loc + SIZE_UOFFSET + i * SIZE_UOFFSET;
                    let target = self.read_uoffset(entry)?;
                    self.verify_table(target, *table)?;
                }
            }
        }
        Ok(())
    }
}
