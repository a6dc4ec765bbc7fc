//! Tests for the flat buffer engine

use zerocopy::little_endian::F32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::builder::BufferBuilder;
use crate::layout::{field_slot_to_vtable_offset, padding_after, WireScalar};
use crate::mutate::root_table_mut;
use crate::schema::{
    ElemKind, FieldDef, FieldKind, ScalarDefault, ScalarKind, Schema, TableDesc,
};
use crate::verify::{verify_buffer, Verifier, VerifierOptions, VerifyError};
use crate::view::{buffer_has_identifier, root_table};

#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned, Clone, Copy, Debug, PartialEq)]
struct Vec3 {
    x: F32,
    y: F32,
    z: F32,
}

impl Vec3 {
    fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            x: F32::new(x),
            y: F32::new(y),
            z: F32::new(z),
        }
    }
}

fn scalar_field(name: &str, slot: u16, kind: ScalarKind, default: i64) -> FieldDef {
    FieldDef::new(
        name,
        slot,
        FieldKind::Scalar {
            kind,
            default: ScalarDefault::Int(default),
        },
    )
}

fn monster_schema() -> Schema {
    Schema::new(
        vec![TableDesc::new(
            "Monster",
            vec![
                scalar_field("hp", 0, ScalarKind::I16, 100),
                FieldDef::new("name", 1, FieldKind::Str),
                scalar_field("mana", 2, ScalarKind::I32, 0),
                FieldDef::new(
                    "pos",
                    3,
                    FieldKind::Struct {
                        size: std::mem::size_of::<Vec3>(),
                        align: 4,
                    },
                ),
                FieldDef::new(
                    "inventory",
                    4,
                    FieldKind::Vector {
                        elem: ElemKind::Scalar(ScalarKind::U8),
                    },
                ),
            ],
        )],
        0,
    )
    .unwrap()
}

mod layout_arithmetic {
    use super::*;

    #[test]
    fn padding_reaches_the_next_boundary() {
        assert_eq!(padding_after(0, 4), 0);
        assert_eq!(padding_after(1, 4), 3);
        assert_eq!(padding_after(2, 4), 2);
        assert_eq!(padding_after(4, 4), 0);
        assert_eq!(padding_after(5, 8), 3);
        assert_eq!(padding_after(17, 1), 0);
    }

    #[test]
    fn slots_map_past_the_vtable_header() {
        assert_eq!(field_slot_to_vtable_offset(0), 4);
        assert_eq!(field_slot_to_vtable_offset(1), 6);
        assert_eq!(field_slot_to_vtable_offset(7), 18);
    }

    #[test]
    fn wire_scalars_are_little_endian() {
        let mut buf = vec![0u8; 8];
        u32::write_at(&mut buf, 0, 0x1234_5678);
        assert_eq!(&buf[..4], &[0x78, 0x56, 0x34, 0x12]);
        assert_eq!(u32::read_at(&buf, 0), 0x1234_5678);

        i16::write_at(&mut buf, 4, -2);
        assert_eq!(&buf[4..6], &[0xFE, 0xFF]);
        assert_eq!(i16::read_at(&buf, 4), -2);

        let mut fbuf = vec![0u8; 8];
        f64::write_at(&mut fbuf, 0, 3.25);
        assert_eq!(f64::read_at(&fbuf, 0), 3.25);
    }

    #[test]
    fn bool_reads_any_nonzero_as_true() {
        let buf = [0u8, 1, 7];
        assert!(!bool::read_at(&buf, 0));
        assert!(bool::read_at(&buf, 1));
        assert!(bool::read_at(&buf, 2));
    }
}

mod builder_bytes {
    use super::*;

    #[test]
    fn one_field_table_has_the_canonical_layout() {
        let mut b = BufferBuilder::new();
        let start = b.start_table();
        b.add_scalar(0, 0x1234u16, 0);
        let table = b.end_table(start);
        b.finish(table, None);

        #[rustfmt::skip]
        let expected: &[u8] = &[
            0x0C, 0x00, 0x00, 0x00,             // root offset -> object at 12
            0x00, 0x00,                         // padding
            0x06, 0x00,                         // vtable size: header + 1 entry
            0x08, 0x00,                         // object size
            0x06, 0x00,                         // slot 0 at object + 6
            0x06, 0x00, 0x00, 0x00,             // soffset back to the vtable
            0x00, 0x00,                         // padding inside the object
            0x34, 0x12,                         // the field value
        ];
        assert_eq!(b.finished_data(), expected);
    }

    #[test]
    fn rebuilding_after_reset_is_byte_identical() {
        let mut b = BufferBuilder::new();
        let mut buffers = Vec::new();
        for _ in 0..2 {
            let name = b.create_string("orc");
            let start = b.start_table();
            b.add_scalar(0, 150i16, 100);
            b.add_offset(1, name);
            let table = b.end_table(start);
            b.finish(table, None);
            buffers.push(b.finished_data().to_vec());
            b.reset();
        }
        assert_eq!(buffers[0], buffers[1]);
    }

    #[test]
    fn empty_table_round_trips() {
        let mut b = BufferBuilder::new();
        let start = b.start_table();
        let table = b.end_table(start);
        b.finish(table, None);

        let root = root_table(b.finished_data());
        assert!(!root.is_present(0));
        assert_eq!(root.get_scalar(0, 42i32), 42);
    }

    #[test]
    fn into_bytes_transfers_the_finished_region() {
        let mut b = BufferBuilder::new();
        let start = b.start_table();
        b.add_scalar(0, 7u8, 0);
        let table = b.end_table(start);
        b.finish(table, None);
        let reference = b.finished_data().to_vec();
        assert_eq!(b.into_bytes(), reference);
    }
}

mod default_elision {
    use super::*;

    #[test]
    fn value_equal_to_default_leaves_the_slot_empty() {
        let mut b = BufferBuilder::new();
        let start = b.start_table();
        b.add_scalar(0, 100i16, 100);
        let table = b.end_table(start);
        b.finish(table, None);

        let root = root_table(b.finished_data());
        assert!(!root.is_present(0));
        assert_eq!(root.get_scalar(0, 100i16), 100);
    }

    #[test]
    fn force_defaults_stores_the_field_anyway() {
        let mut b = BufferBuilder::new();
        b.force_defaults(true);
        let start = b.start_table();
        b.add_scalar(0, 100i16, 100);
        let table = b.end_table(start);
        b.finish(table, None);

        let root = root_table(b.finished_data());
        assert!(root.is_present(0));
        assert_eq!(root.get_scalar(0, 0i16), 100);
    }

    #[test]
    fn string_set_to_hi_and_int_left_at_default() {
        let mut b = BufferBuilder::new();
        let s = b.create_string("hi");
        let start = b.start_table();
        b.add_scalar(0, 0i32, 0);
        b.add_offset(1, s);
        let table = b.end_table(start);
        b.finish(table, None);

        let root = root_table(b.finished_data());
        assert!(!root.is_present(0), "int slot must be elided");
        assert_eq!(root.get_scalar(0, 0i32), 0);
        assert_eq!(root.get_str(1), Some("hi"));
    }
}

mod vtable_sharing {
    use super::*;

    fn vtable_loc(buf: &[u8], table_loc: usize) -> usize {
        let soffset = i32::read_at(buf, table_loc);
        (table_loc as isize - soffset as isize) as usize
    }

    #[test]
    fn identical_shapes_share_one_vtable() {
        let mut b = BufferBuilder::new();
        let mut tables = Vec::new();
        for hp in [10i16, 20, 30] {
            let start = b.start_table();
            b.add_scalar(0, hp, 0);
            tables.push(b.end_table(start));
        }
        let start = b.start_table();
        b.add_offset(0, tables[0]);
        b.add_offset(1, tables[1]);
        b.add_offset(2, tables[2]);
        let parent = b.end_table(start);
        b.finish(parent, None);

        let buf = b.finished_data();
        let root = root_table(buf);
        let locs: Vec<usize> = (0..3)
            .map(|slot| root.get_table(slot).unwrap().loc())
            .collect();
        let vtables: Vec<usize> = locs.iter().map(|&l| vtable_loc(buf, l)).collect();
        assert_eq!(vtables[0], vtables[1]);
        assert_eq!(vtables[1], vtables[2]);
    }

    #[test]
    fn different_shapes_get_distinct_vtables() {
        let mut b = BufferBuilder::new();
        let start = b.start_table();
        b.add_scalar(0, 1i16, 0);
        let first = b.end_table(start);
        let start = b.start_table();
        b.add_scalar(1, 1i16, 0);
        let second = b.end_table(start);
        let start = b.start_table();
        b.add_offset(0, first);
        b.add_offset(1, second);
        let parent = b.end_table(start);
        b.finish(parent, None);

        let buf = b.finished_data();
        let root = root_table(buf);
        let a = vtable_loc(buf, root.get_table(0).unwrap().loc());
        let c = vtable_loc(buf, root.get_table(1).unwrap().loc());
        assert_ne!(a, c);
    }
}

mod accessors {
    use super::*;

    #[test]
    fn scalar_vector_supports_random_access_and_iteration() {
        let mut b = BufferBuilder::new();
        let v = b.create_vector(&[3u32, 1, 4, 1, 5]);
        let start = b.start_table();
        b.add_offset(0, v);
        let table = b.end_table(start);
        b.finish(table, None);

        let root = root_table(b.finished_data());
        let vec = root.get_vector::<u32>(0).unwrap();
        assert_eq!(vec.len(), 5);
        assert_eq!(vec.get(2), 4);
        assert_eq!(vec.iter().collect::<Vec<_>>(), vec![3, 1, 4, 1, 5]);
    }

    #[test]
    fn byte_vector_exposes_its_raw_slice() {
        let mut b = BufferBuilder::new();
        let v = b.create_vector(&[0xDEu8, 0xAD, 0xBE, 0xEF]);
        let start = b.start_table();
        b.add_offset(0, v);
        let table = b.end_table(start);
        b.finish(table, None);

        let root = root_table(b.finished_data());
        let bytes = root.get_vector::<u8>(0).unwrap();
        assert_eq!(bytes.bytes(), &[0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn struct_field_reads_back_through_zerocopy() {
        let mut b = BufferBuilder::new();
        let start = b.start_table();
        b.add_struct(3, &Vec3::new(1.0, 2.0, 3.0), 4);
        let table = b.end_table(start);
        b.finish(table, None);

        let root = root_table(b.finished_data());
        let pos: &Vec3 = root.get_struct(3).unwrap();
        assert_eq!(pos, &Vec3::new(1.0, 2.0, 3.0));

        let view = root.get_struct_view(3).unwrap();
        assert_eq!(view.scalar_at::<f32>(4), 2.0);
    }

    #[test]
    fn struct_vector_elements_are_contiguous() {
        let points = [Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 1.0)];
        let mut b = BufferBuilder::new();
        let v = b.create_vector_of_structs(&points, 4);
        let start = b.start_table();
        b.add_offset(0, v);
        let table = b.end_table(start);
        b.finish(table, None);

        let root = root_table(b.finished_data());
        let vec = root.get_struct_vector::<Vec3>(0).unwrap();
        assert_eq!(vec.len(), 2);
        assert_eq!(vec.get(0), &points[0]);
        assert_eq!(vec.get(1), &points[1]);
    }

    #[test]
    fn string_vector_round_trips() {
        let mut b = BufferBuilder::new();
        let words: Vec<_> = ["why", "hello", "there"]
            .iter()
            .map(|w| b.create_string(w))
            .collect();
        let v = b.create_vector_of_offsets(&words);
        let start = b.start_table();
        b.add_offset(0, v);
        let table = b.end_table(start);
        b.finish(table, None);

        let root = root_table(b.finished_data());
        let vec = root.get_str_vector(0).unwrap();
        assert_eq!(vec.len(), 3);
        assert_eq!(vec.get(0), "why");
        assert_eq!(vec.get(2), "there");
    }

    #[test]
    fn wide_scalars_land_on_natural_alignment() {
        let mut b = BufferBuilder::new();
        let start = b.start_table();
        b.add_scalar(0, 0x11u8, 0);
        b.add_scalar(1, -2i16, 0);
        b.add_scalar(2, 0xDEAD_BEEFu32, 0);
        b.add_scalar(3, 0x0123_4567_89AB_CDEFu64, 0);
        b.add_scalar(4, 2.5f64, 0.0);
        let table = b.end_table(start);
        b.finish(table, None);

        // An 8-byte field forces minalign 8 onto the whole buffer.
        let buf = b.finished_data();
        assert_eq!(buf.len() % 8, 0);

        let root = root_table(buf);
        assert_eq!(root.get_scalar(0, 0u8), 0x11);
        assert_eq!(root.get_scalar(1, 0i16), -2);
        assert_eq!(root.get_scalar(2, 0u32), 0xDEAD_BEEF);
        assert_eq!(root.get_scalar(3, 0u64), 0x0123_4567_89AB_CDEF);
        assert_eq!(root.get_scalar(4, 0.0f64), 2.5);

        assert_eq!(root.field_loc(1).unwrap() % 2, 0);
        assert_eq!(root.field_loc(2).unwrap() % 4, 0);
        assert_eq!(root.field_loc(3).unwrap() % 8, 0);
        assert_eq!(root.field_loc(4).unwrap() % 8, 0);
    }

    #[test]
    fn file_identifier_is_checked_by_prefix() {
        let mut b = BufferBuilder::new();
        let start = b.start_table();
        b.add_scalar(0, 1u8, 0);
        let table = b.end_table(start);
        b.finish(table, Some(b"MONS"));

        let buf = b.finished_data();
        assert!(buffer_has_identifier(buf, b"MONS"));
        assert!(!buffer_has_identifier(buf, b"XXXX"));

        let root = root_table(buf);
        assert_eq!(root.get_scalar(0, 0u8), 1);
    }
}

mod mutation {
    use super::*;

    fn build_monster() -> Vec<u8> {
        let mut b = BufferBuilder::new();
        let name = b.create_string("orc");
        let start = b.start_table();
        b.add_scalar(0, 150i16, 100);
        b.add_offset(1, name);
        b.add_struct(3, &Vec3::new(1.0, 2.0, 3.0), 4);
        let table = b.end_table(start);
        b.finish(table, None);
        b.into_bytes()
    }

    #[test]
    fn present_scalar_mutates_in_place_and_back() {
        let mut buf = build_monster();
        let before = buf.clone();

        let mut root = root_table_mut(&mut buf);
        root.set_scalar(0, 25i16).unwrap();
        assert_eq!(root_table(&buf).get_scalar(0, 100i16), 25);

        let mut root = root_table_mut(&mut buf);
        root.set_scalar(0, 150i16).unwrap();
        assert_eq!(buf, before, "mutating back must restore the exact bytes");
    }

    #[test]
    fn absent_field_mutation_is_rejected_and_harmless() {
        let mut buf = build_monster();
        let before = buf.clone();

        let mut root = root_table_mut(&mut buf);
        let err = root.set_scalar(2, 7i32).unwrap_err();
        assert!(err.to_string().contains("absent"));
        assert_eq!(buf, before, "a rejected mutation must not touch the buffer");
    }

    #[test]
    fn struct_members_are_always_mutable() {
        let mut buf = build_monster();
        let mut root = root_table_mut(&mut buf);
        let mut pos = root.struct_at(3).unwrap();
        assert_eq!(pos.scalar_at::<f32>(0), 1.0);
        pos.set_scalar_at(0, 9.5f32);
        drop(pos);

        let view = root_table(&buf).get_struct::<Vec3>(3).unwrap();
        assert_eq!(view.x.get(), 9.5);
        assert_eq!(view.y.get(), 2.0);
    }

    #[test]
    fn forced_default_field_stays_mutable() {
        let mut b = BufferBuilder::new();
        b.force_defaults(true);
        let start = b.start_table();
        b.add_scalar(0, 100i16, 100);
        let table = b.end_table(start);
        b.finish(table, None);
        let mut buf = b.into_bytes();

        let mut root = root_table_mut(&mut buf);
        root.set_scalar(0, -1i16).unwrap();
        assert_eq!(root_table(&buf).get_scalar(0, 100i16), -1);
    }
}

mod builder_misuse {
    use super::*;

    #[test]
    #[should_panic(expected = "without start_table")]
    fn end_without_start_is_fatal() {
        let mut b = BufferBuilder::new();
        let start = b.start_table();
        let _ = b.end_table(start);
        // Reusing the start marker after the table closed.
        let _ = b.end_table(start);
    }

    #[test]
    #[should_panic(expected = "while a table is open")]
    fn nested_start_table_is_fatal() {
        let mut b = BufferBuilder::new();
        let _outer = b.start_table();
        let _inner = b.start_table();
    }

    #[test]
    #[should_panic(expected = "while a table is open")]
    fn create_string_inside_a_table_is_fatal() {
        let mut b = BufferBuilder::new();
        let _start = b.start_table();
        let _ = b.create_string("late");
    }

    #[test]
    #[should_panic(expected = "finished builder")]
    fn adding_after_finish_is_fatal() {
        let mut b = BufferBuilder::new();
        let start = b.start_table();
        let table = b.end_table(start);
        b.finish(table, None);
        let _ = b.start_table();
    }

    #[test]
    #[should_panic(expected = "added twice")]
    fn duplicate_slot_is_fatal() {
        let mut b = BufferBuilder::new();
        let start = b.start_table();
        b.add_scalar(0, 1u8, 0);
        b.add_scalar(0, 2u8, 0);
        let _ = b.end_table(start);
    }
}

mod schema_validation {
    use super::*;

    #[test]
    fn root_index_must_resolve() {
        let result = Schema::new(vec![TableDesc::new("T", vec![])], 1);
        assert!(result.is_err());
    }

    #[test]
    fn slots_must_strictly_increase() {
        let result = Schema::new(
            vec![TableDesc::new(
                "T",
                vec![
                    scalar_field("a", 1, ScalarKind::U8, 0),
                    scalar_field("b", 1, ScalarKind::U8, 0),
                ],
            )],
            0,
        );
        assert!(result.is_err());
    }

    #[test]
    fn union_must_name_a_discriminant_sibling() {
        let result = Schema::new(
            vec![TableDesc::new(
                "T",
                vec![FieldDef::new(
                    "u",
                    0,
                    FieldKind::Union {
                        type_slot: 1,
                        variants: vec![0],
                    },
                )],
            )],
            0,
        );
        assert!(result.is_err());
    }

    #[test]
    fn recursive_table_references_are_accepted() {
        let schema = Schema::new(
            vec![TableDesc::new(
                "Node",
                vec![FieldDef::new("next", 0, FieldKind::Table { table: 0 })],
            )],
            0,
        );
        assert!(schema.is_ok());
    }
}

mod verification {
    use super::*;

    fn build_monster_buffer() -> Vec<u8> {
        let mut b = BufferBuilder::new();
        let name = b.create_string("orc");
        let inv = b.create_vector(&[1u8, 2, 3]);
        let start = b.start_table();
        b.add_scalar(0, 150i16, 100);
        b.add_offset(1, name);
        b.add_scalar(2, 9i32, 0);
        b.add_struct(3, &Vec3::new(1.0, 2.0, 3.0), 4);
        b.add_offset(4, inv);
        let table = b.end_table(start);
        b.finish(table, None);
        b.into_bytes()
    }

    #[test]
    fn built_buffers_pass_verification() {
        let schema = monster_schema();
        let buf = build_monster_buffer();
        verify_buffer(&schema, &buf).unwrap();
    }

    #[test]
    fn empty_input_is_too_small() {
        let schema = monster_schema();
        assert_eq!(
            verify_buffer(&schema, &[]),
            Err(VerifyError::BufferTooSmall { have: 0 })
        );
    }

    #[test]
    fn identifier_mismatch_is_reported() {
        let schema = monster_schema().with_file_identifier(*b"MONS");
        let mut b = BufferBuilder::new();
        let start = b.start_table();
        let table = b.end_table(start);
        b.finish(table, Some(b"XXXX"));
        assert_eq!(
            verify_buffer(&schema, b.finished_data()),
            Err(VerifyError::IdentifierMismatch)
        );
    }

    #[test]
    fn matching_identifier_verifies() {
        let schema = monster_schema().with_file_identifier(*b"MONS");
        let mut b = BufferBuilder::new();
        let start = b.start_table();
        b.add_scalar(0, 5i16, 100);
        let table = b.end_table(start);
        b.finish(table, Some(b"MONS"));
        verify_buffer(&schema, b.finished_data()).unwrap();
    }

    #[test]
    fn custom_ceilings_are_honored() {
        let schema = monster_schema();
        let buf = build_monster_buffer();
        let opts = VerifierOptions {
            max_depth: 0,
            max_tables: 1_000,
        };
        let result = Verifier::with_options(&schema, &buf, opts).run();
        assert_eq!(
            result,
            Err(VerifyError::DepthLimitExceeded { limit: 0 })
        );
    }

    #[test]
    fn rerunning_a_verifier_starts_from_fresh_counters() {
        let schema = Schema::new(
            vec![TableDesc::new(
                "Node",
                vec![FieldDef::new("next", 0, FieldKind::Table { table: 0 })],
            )],
            0,
        )
        .unwrap();

        let mut b = BufferBuilder::new();
        let mut prev = None;
        for _ in 0..3 {
            let start = b.start_table();
            if let Some(next) = prev {
                b.add_offset(0, next);
            }
            prev = Some(b.end_table(start));
        }
        b.finish(prev.unwrap(), None);

        // Ceilings sized so that counters carried over from the first pass
        // would trip on the second.
        let opts = VerifierOptions {
            max_depth: 4,
            max_tables: 5,
        };
        let mut verifier = Verifier::with_options(&schema, b.finished_data(), opts);
        verifier.run().unwrap();
        verifier.run().unwrap();
    }

    #[test]
    fn errors_render_their_position() {
        let err = VerifyError::RangeOutOfBounds { at: 12, len: 4 };
        assert_eq!(err.to_string(), "range of 4 bytes at 12 escapes the buffer");
    }
}
