use crate::error::SkiffError;
use crate::parser::Parser;

/// Compile a schema-and-data text into a finished binary buffer.
///
/// Each call runs a fresh [`Parser`]; the input must declare a `Main` type
/// and contain one data literal for the output to be non-empty.
pub fn compile_schema(text: &str) -> Result<Vec<u8>, SkiffError> {
    let mut parser = Parser::new();
    parser.try_parse(text)?;
    Ok(parser.buffer().to_vec())
}
