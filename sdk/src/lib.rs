//! skiff
//!
//! This crate is the user-facing entry point for working with Skiff schemas
//! and buffers.
//!
//! - `compile_schema` / `Parser` (re-exported from the compiler)
//! - `Builder` / `BufferView` (re-exported from the schema crate)
//! - Helpers for dumping a parsed schema as JSON

use serde_json::json;

pub use skiff_compiler::{compile_schema, Parser, SkiffError};
pub use skiff_schema::{Builder, BufferView};

/// Dump a parser's symbol tables as pretty-printed JSON, definitions in
/// declaration order.
pub fn schema_to_json(parser: &Parser) -> String {
    let structs: serde_json::Map<String, serde_json::Value> = parser
        .structs
        .iter()
        .map(|(name, def)| {
            let def = serde_json::to_value(def).unwrap_or(serde_json::Value::Null);
            (name.to_string(), def)
        })
        .collect();
    let enums: serde_json::Map<String, serde_json::Value> = parser
        .enums
        .iter()
        .map(|(name, def)| {
            let def = serde_json::to_value(def).unwrap_or(serde_json::Value::Null);
            (name.to_string(), def)
        })
        .collect();
    let root = json!({
        "namespace": parser.name_space(),
        "structs": structs,
        "enums": enums,
    });
    serde_json::to_string_pretty(&root).unwrap_or_default()
}

pub mod error {
    pub use skiff_compiler::error::SkiffError;
}

pub mod schema {
    pub use skiff_schema::{Builder, BufferView, UOffset, VOffset};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dumps_definitions_in_declaration_order() {
        let mut parser = Parser::new();
        assert!(parser.parse(
            "namespace demo;\n\
             enum Mode:byte { A, B }\n\
             info Second { m:Mode; }\n\
             info First { s:Second; }\n"
        ));
        let dump = schema_to_json(&parser);
        assert!(dump.contains("\"namespace\""));
        let second = dump.find("Second").unwrap();
        let first = dump.find("First").unwrap();
        assert!(second < first);
        assert!(dump.contains("\"Mode\""));
    }

    #[test]
    fn reexported_pipeline_round_trip() {
        let bytes = compile_schema(
            "info Point { x:int; y:int; }\n\
             Main Point;\n\
             {x:3, y:4}\n",
        )
        .unwrap();
        let view = BufferView::new(&bytes);
        let root = view.root();
        assert_eq!(view.field_i32(root, 4, 0), 3);
        assert_eq!(view.field_i32(root, 6, 0), 4);
    }
}
