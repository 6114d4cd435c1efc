//! skiff-compiler
//!
//! This crate implements:
//!  1) A tokenizer + recursive-descent parser for Skiff IDL text,
//!  2) Symbol tables for struct/info, enum and union definitions,
//!  3) Inline data-literal encoding against the declared types, driving the
//!     reverse-emission buffer of `skiff-schema` (vtables, alignment, the
//!     side stack for nested fixed structs),
//!  4) End-of-parse verification (forward references, union members),
//!  5) Error types (`SkiffError`).

pub mod compiler;
pub mod error;
pub mod parser;
pub mod tokenizer;
pub mod types;
pub mod utils;
pub mod verifier;

pub use compiler::compile_schema;
pub use error::SkiffError;
pub use parser::Parser;
