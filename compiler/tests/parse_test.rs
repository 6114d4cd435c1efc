#![cfg(test)]

use skiff_compiler::{compile_schema, Parser};
use skiff_schema::BufferView;

fn compile(source: &str) -> Vec<u8> {
    match compile_schema(source) {
        Ok(bytes) => bytes,
        Err(e) => panic!("compile failed: {}", e),
    }
}

fn compile_err(source: &str) -> String {
    match compile_schema(source) {
        Ok(_) => panic!("compile unexpectedly succeeded"),
        Err(e) => e.to_string(),
    }
}

#[test]
fn minimal_info_buffer_layout() {
    // Two i32 fields; size-sorted reverse emission puts x then y after the
    // object prefix, so the payload is exactly the two little-endian words.
    let bytes = compile("info V { x:int; y:int; } Main V; {x:1,y:2}");
    assert_eq!(
        bytes,
        [
            12, 0, 0, 0, // root offset
            8, 0, 12, 0, 4, 0, 8, 0, // vtable: len, object size, x, y
            8, 0, 0, 0, // soffset to vtable
            1, 0, 0, 0, // x
            2, 0, 0, 0, // y
        ]
    );
    let view = BufferView::new(&bytes);
    let root = view.root();
    assert_eq!(view.field_i32(root, 4, 0), 1);
    assert_eq!(view.field_i32(root, 6, 0), 2);
}

#[test]
fn fixed_struct_is_emitted_inline() {
    // The nested struct body lands inline at its parent's slot: eight bytes,
    // little-endian 1 then 2.
    let bytes = compile(
        "struct P { x:int; y:int; }\n\
         info T { p:P; }\n\
         Main T;\n\
         {p:{x:1,y:2}}\n",
    );
    assert_eq!(
        bytes,
        [
            12, 0, 0, 0, // root offset
            0, 0, // alignment padding
            6, 0, 12, 0, 4, 0, // vtable
            6, 0, 0, 0, // soffset to vtable
            1, 0, 0, 0, // p.x
            2, 0, 0, 0, // p.y
        ]
    );
    let view = BufferView::new(&bytes);
    let root = view.root();
    let p = view.field_pos(root, 4).unwrap();
    assert_eq!(&bytes[p..p + 8], [1, 0, 0, 0, 2, 0, 0, 0]);
}

#[test]
fn forward_reference_resolves_through_the_buffer() {
    let bytes = compile(
        "info A { b:B; }\n\
         info B { n:int; }\n\
         Main A;\n\
         {b:{n:7}}\n",
    );
    let view = BufferView::new(&bytes);
    let a = view.root();
    let b = view.field_indirect(a, 4).unwrap();
    assert_eq!(view.field_i32(b, 4, 0), 7);
}

#[test]
fn enum_default_is_omitted_from_the_vtable() {
    let bytes = compile(
        "enum C:byte { X = 0, Y = 1 }\n\
         info T { c:C = Y; }\n\
         Main T;\n\
         {c:Y}\n",
    );
    let view = BufferView::new(&bytes);
    let root = view.root();
    assert_eq!(view.field_offset(root, 4), 0);
    assert_eq!(view.field_u8(root, 4, 1), 1);
    // A non-default value does occupy the slot.
    let bytes = compile(
        "enum C:byte { X = 0, Y = 1 }\n\
         info T { c:C = Y; }\n\
         Main T;\n\
         {c:X}\n",
    );
    let view = BufferView::new(&bytes);
    let root = view.root();
    assert_ne!(view.field_offset(root, 4), 0);
    assert_eq!(view.field_u8(root, 4, 1), 0);
}

#[test]
fn union_dispatch_emits_tag_and_member() {
    let bytes = compile(
        "union U { A, B }\n\
         info A { x:int; }\n\
         info B { y:int; }\n\
         info Root { u:U; }\n\
         Main Root;\n\
         {u_type: A, u: {x:5}}\n",
    );
    let view = BufferView::new(&bytes);
    let root = view.root();
    // Slot 4 is the u_type tag, slot 6 the member offset.
    assert_eq!(view.field_u8(root, 4, 0), 1);
    let member = view.field_indirect(root, 6).unwrap();
    assert_eq!(view.field_i32(member, 4, 0), 5);
}

#[test]
fn union_second_member_selects_the_other_struct() {
    let bytes = compile(
        "union U { A, B }\n\
         info A { x:int; }\n\
         info B { y:int; }\n\
         info Root { u:U; }\n\
         Main Root;\n\
         {u_type: B, u: {y:9}}\n",
    );
    let view = BufferView::new(&bytes);
    let root = view.root();
    assert_eq!(view.field_u8(root, 4, 0), 2);
    let member = view.field_indirect(root, 6).unwrap();
    assert_eq!(view.field_i32(member, 4, 0), 9);
}

#[test]
fn strings_are_length_prefixed_and_terminated() {
    let bytes = compile(
        "info T { s:string; }\n\
         Main T;\n\
         {s:\"hello\"}\n",
    );
    let view = BufferView::new(&bytes);
    let root = view.root();
    let s = view.field_indirect(root, 4).unwrap();
    assert_eq!(view.string_at(s), "hello");
    assert_eq!(view.vector_len(s), 5);
    // Trailing NUL sits past the counted bytes.
    assert_eq!(bytes[view.vector_data(s) + 5], 0);
}

#[test]
fn vectors_of_scalars_keep_element_order() {
    let bytes = compile(
        "info T { v:[short]; }\n\
         Main T;\n\
         {v:[3, -1, 256]}\n",
    );
    let view = BufferView::new(&bytes);
    let root = view.root();
    let v = view.field_indirect(root, 4).unwrap();
    assert_eq!(view.vector_len(v), 3);
    let data = view.vector_data(v);
    assert_eq!(view.read_i16(data), 3);
    assert_eq!(view.read_i16(data + 2), -1);
    assert_eq!(view.read_i16(data + 4), 256);
}

#[test]
fn vectors_of_structs_are_inline() {
    let bytes = compile(
        "struct P { x:int; y:int; }\n\
         info T { v:[P]; }\n\
         Main T;\n\
         {v:[{x:1,y:2},{x:3,y:4}]}\n",
    );
    let view = BufferView::new(&bytes);
    let root = view.root();
    let v = view.field_indirect(root, 4).unwrap();
    assert_eq!(view.vector_len(v), 2);
    let data = view.vector_data(v);
    assert_eq!(view.read_i32(data), 1);
    assert_eq!(view.read_i32(data + 4), 2);
    assert_eq!(view.read_i32(data + 8), 3);
    assert_eq!(view.read_i32(data + 12), 4);
}

#[test]
fn vectors_of_infos_share_identical_vtables() {
    let bytes = compile(
        "info Item { n:int; }\n\
         info Root { items:[Item]; }\n\
         Main Root;\n\
         {items:[{n:1},{n:2},{n:3}]}\n",
    );
    let view = BufferView::new(&bytes);
    let root = view.root();
    let v = view.field_indirect(root, 4).unwrap();
    assert_eq!(view.vector_len(v), 3);
    let data = view.vector_data(v);
    let items: Vec<usize> = (0..3).map(|i| view.indirect(data + 4 * i)).collect();
    for (i, &item) in items.iter().enumerate() {
        assert_eq!(view.field_i32(item, 4, 0), (i + 1) as i32);
    }
    // At least two of the three objects reuse one vtable.
    let vtables: Vec<usize> = items.iter().map(|&item| view.vtable(item)).collect();
    let distinct = {
        let mut v = vtables.clone();
        v.sort_unstable();
        v.dedup();
        v.len()
    };
    assert!(distinct < 3, "no vtable sharing: {:?}", vtables);
}

#[test]
fn size_sorted_emission_groups_same_sized_fields() {
    let bytes = compile(
        "info T { a:byte; b:long; c:byte; d:long; }\n\
         Main T;\n\
         {a:1, b:2, c:3, d:4}\n",
    );
    let view = BufferView::new(&bytes);
    let root = view.root();
    let a = view.field_pos(root, 4).unwrap();
    let b = view.field_pos(root, 6).unwrap();
    let c = view.field_pos(root, 8).unwrap();
    let d = view.field_pos(root, 10).unwrap();
    // The 8-byte pass is emitted first and so lands farthest from the object
    // start; each size group ends up contiguous with no padding between.
    assert!(a < c && c < b && b < d);
    assert_eq!(c - a, 1);
    assert_eq!(b - c, 1);
    assert_eq!(d - b, 8);
    assert_eq!(view.read_u8(a), 1);
    assert_eq!(view.read_i64(b), 2);
    assert_eq!(view.read_u8(c), 3);
    assert_eq!(view.read_i64(d), 4);
}

#[test]
fn original_order_attribute_keeps_declaration_order() {
    let bytes = compile(
        "info T (Original_order) { a:byte; b:long; }\n\
         Main T;\n\
         {a:1, b:2}\n",
    );
    let view = BufferView::new(&bytes);
    let root = view.root();
    let a = view.field_pos(root, 4).unwrap();
    let b = view.field_pos(root, 6).unwrap();
    // Unsorted emission walks the literal in reverse, so b is pushed first
    // and a ends up closest to the object start.
    assert!(a < b);
    assert_eq!(view.read_u8(a), 1);
    assert_eq!(view.read_i64(b), 2);
}

#[test]
fn scalar_types_round_trip_through_the_buffer() {
    let bytes = compile(
        "info T { b:bool; f:float; d:double; u:ulong; s:short; }\n\
         Main T;\n\
         {b:true, f:1.5, d:-2.25, u:4294967296, s:-32768}\n",
    );
    let view = BufferView::new(&bytes);
    let root = view.root();
    assert_eq!(view.field_u8(root, 4, 0), 1);
    let f = view.field_pos(root, 6).unwrap();
    assert_eq!(view.read_f32(f), 1.5);
    let d = view.field_pos(root, 8).unwrap();
    assert_eq!(view.read_f64(d), -2.25);
    let u = view.field_pos(root, 10).unwrap();
    assert_eq!(view.read_u64(u), 4294967296);
    let s = view.field_pos(root, 12).unwrap();
    assert_eq!(view.read_i16(s), -32768);
}

#[test]
fn reordered_info_fields_keep_their_slots() {
    // Emission walks the literal's stack, so the byte placement follows the
    // input; every field stays at its declared vtable slot either way.
    let a = compile("info T { x:int; y:int; } Main T; {x:1,y:2}");
    let b = compile("info T { x:int; y:int; } Main T; {y:2,x:1}");
    assert_eq!(a.len(), b.len());
    for bytes in [&a, &b] {
        let view = BufferView::new(bytes);
        let root = view.root();
        assert_eq!(view.field_i32(root, 4, 0), 1);
        assert_eq!(view.field_i32(root, 6, 0), 2);
    }
}

#[test]
fn parsing_twice_is_deterministic() {
    let source = "struct P { x:int; y:int; }\n\
                  info T { p:P; v:[int]; s:string; n:long; }\n\
                  Main T;\n\
                  {p:{x:1,y:2}, v:[5,6,7], s:\"abc\", n:9}\n";
    assert_eq!(compile(source), compile(source));
}

#[test]
fn finished_buffers_are_alignment_padded() {
    let bytes = compile("info T { n:long; } Main T; {n:1}");
    assert_eq!(bytes.len() % 8, 0);
    let view = BufferView::new(&bytes);
    let root = view.root();
    let n = view.field_pos(root, 4).unwrap();
    assert_eq!(n % 8, 0);
    assert_eq!(view.read_i64(n), 1);
}

#[test]
fn force_align_pads_the_struct_body() {
    let bytes = compile(
        "struct S (Force_align: 16) { a:byte; }\n\
         info T { s:S; }\n\
         Main T;\n\
         {s:{a:9}}\n",
    );
    let view = BufferView::new(&bytes);
    let root = view.root();
    let s = view.field_pos(root, 4).unwrap();
    assert_eq!(s % 16, 0);
    assert_eq!(view.read_u8(s), 9);
    // The body carries its trailing padding out to the forced alignment.
    assert_eq!(&bytes[s + 1..s + 16], [0; 15]);
}

#[test]
fn out_of_range_constants_are_rejected() {
    let err = compile_err("info T { c:byte; } Main T; {c:300}");
    assert!(err.contains("Constant does not fit in a 8-bit field"), "{}", err);
    let err = compile_err("info T { s:short; } Main T; {s:-70000}");
    assert!(err.contains("Constant does not fit in a 16-bit field"), "{}", err);
    // The window test admits anything in [-2^bits, 2^bits).
    compile("info T { c:ubyte; s:short; } Main T; {c:255, s:-40000}");
}

#[test]
fn control_characters_in_strings_are_rejected() {
    let err = compile_err("info T { s:string; } Main T; {s:\"a\u{1}b\"}");
    assert!(err.contains("Illegal character in string constant"), "{}", err);
}

#[test]
fn misplaced_doc_comment_is_rejected() {
    let err = compile_err("info T { x:int; } /// where does this go\ninfo U { y:int; }");
    assert!(
        err.contains("A documentation comment should be on a line on its own"),
        "{}",
        err
    );
}

#[test]
fn nested_vector_and_union_vector_types_are_rejected() {
    let err = compile_err("info X { v:[[int]]; }");
    assert!(err.contains("Nested vector types not supported"), "{}", err);
    let err = compile_err("union U { A } info A { x:int; } info X { v:[U]; }");
    assert!(err.contains("Vector of union types not supported"), "{}", err);
}

#[test]
fn one_data_object_per_file() {
    let err = compile_err("info T { x:int; } Main T; {x:1} {x:2}");
    assert!(err.contains("Cannot have more than one data object"), "{}", err);
}

#[test]
fn field_names_may_be_string_constants() {
    let bytes = compile("info T { x:int; } Main T; {\"x\": 44}");
    let view = BufferView::new(&bytes);
    assert_eq!(view.field_i32(view.root(), 4, 0), 44);
}

#[test]
fn set_main_type_then_parse_data_separately() {
    let mut parser = Parser::new();
    assert!(parser.parse("info T { x:int; }"));
    assert!(!parser.set_main_type("Missing"));
    assert!(parser.set_main_type("T"));
    assert!(parser.parse("{x:6}"));
    let view = BufferView::new(parser.buffer());
    assert_eq!(view.field_i32(view.root(), 4, 0), 6);
}

#[test]
fn failed_parse_reports_through_the_bool_contract() {
    let mut parser = Parser::new();
    assert!(!parser.parse("info T { x:int }"));
    let err = parser.error().unwrap_or_default().to_string();
    assert!(err.starts_with("Line 1: Expecting: ;"), "{}", err);
}
