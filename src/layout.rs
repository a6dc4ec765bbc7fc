//! # Wire Layout Primitives
//!
//! Offset types, alignment arithmetic and little-endian scalar access shared
//! by the builder, the accessors and the verifier. This module is the single
//! source of truth for the layout constants; the trusting and paranoid
//! traversal paths deliberately share nothing else.
//!
//! ## Offset Kinds
//!
//! | Type | Width | Used for |
//! |------|-------|----------|
//! | `UOffset` | u32 | forward references (root, table→child, vector→table) |
//! | `SOffset` | i32 | table object → vtable back-reference |
//! | `VOffset` | u16 | field offset within a table object (vtable entry) |
//!
//! A stored `UOffset` is a distance, not an address: the referenced object
//! lives at `location_of_the_offset + value`. A table's `SOffset` is
//! subtracted: its vtable lives at `object_location - value`.
//!
//! ## Alignment
//!
//! Every scalar is stored at natural alignment (alignment = its byte width).
//! Because the builder writes back-to-front, padding is computed against the
//! distance from the buffer *end*; the finished buffer is front-padded to the
//! maximum alignment ever requested, which makes the two views agree.

/// Forward reference distance, also the vector length prefix type.
pub type UOffset = u32;
/// Signed back-reference from a table object to its vtable.
pub type SOffset = i32;
/// Field offset within a table object, as stored in a vtable entry.
pub type VOffset = u16;

pub const SIZE_UOFFSET: usize = 4;
pub const SIZE_SOFFSET: usize = 4;
pub const SIZE_VOFFSET: usize = 2;

/// Byte length of the optional format tag following the root offset.
pub const FILE_IDENTIFIER_LEN: usize = 4;

/// A vtable carries its own byte size and the referencing object's byte size
/// before any field entries.
pub const VTABLE_HEADER_LEN: usize = 2 * SIZE_VOFFSET;

/// Highest usable field slot: the slot's vtable entry offset must still fit
/// in a `VOffset`.
pub const MAX_FIELD_SLOT: u16 = ((VOffset::MAX as usize - VTABLE_HEADER_LEN) / SIZE_VOFFSET) as u16;

/// Byte offset of a field slot's entry within its vtable.
#[inline]
pub fn field_slot_to_vtable_offset(slot: u16) -> usize {
    VTABLE_HEADER_LEN + SIZE_VOFFSET * slot as usize
}

/// Bytes of padding needed after `size` bytes to reach `align`.
/// `align` must be a power of two.
#[inline]
pub fn padding_after(size: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    size.wrapping_neg() & (align - 1)
}

mod sealed {
    pub trait Sealed {}
}

/// Fixed-width scalar with a little-endian wire image.
///
/// Reads copy into a stack array before conversion, so callers never depend
/// on the buffer's alignment. Implemented for bool, the fixed-width integers
/// and the two float widths; nothing else can implement it.
pub trait WireScalar: sealed::Sealed + Copy + PartialEq {
    /// Byte width on the wire; also the natural alignment.
    const WIDTH: usize;

    fn read_at(buf: &[u8], loc: usize) -> Self;
    fn write_at(buf: &mut [u8], loc: usize, value: Self);
}

macro_rules! wire_scalar {
    ($($ty:ty => $width:expr),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl WireScalar for $ty {
                const WIDTH: usize = $width;

                #[inline]
                fn read_at(buf: &[u8], loc: usize) -> Self {
                    let mut raw = [0u8; $width];
                    raw.copy_from_slice(&buf[loc..loc + $width]);
                    <$ty>::from_le_bytes(raw)
                }

                #[inline]
                fn write_at(buf: &mut [u8], loc: usize, value: Self) {
                    buf[loc..loc + $width].copy_from_slice(&value.to_le_bytes());
                }
            }
        )*
    };
}

wire_scalar! {
    u8 => 1, i8 => 1,
    u16 => 2, i16 => 2,
    u32 => 4, i32 => 4,
    u64 => 8, i64 => 8,
    f32 => 4, f64 => 8,
}

impl sealed::Sealed for bool {}

impl WireScalar for bool {
    const WIDTH: usize = 1;

    #[inline]
    fn read_at(buf: &[u8], loc: usize) -> Self {
        buf[loc] != 0
    }

    #[inline]
    fn write_at(buf: &mut [u8], loc: usize, value: Self) {
        buf[loc] = value as u8;
    }
}
