use crate::error::SkiffError;
use crate::types::{EnumDef, StructDef, SymbolTable};

/// Global checks that only hold once the whole input has been consumed:
/// every forward reference must have been defined, and union members may
/// only name non-fixed (info) types. `line` is where the failure is
/// reported, normally the end of the input.
pub fn verify_symbols(
    structs: &SymbolTable<StructDef>,
    enums: &SymbolTable<EnumDef>,
    line: usize,
) -> Result<(), SkiffError> {
    for (_, struct_def) in structs.iter() {
        if struct_def.predecl {
            return Err(SkiffError::parse(
                format!("Type referenced but not defined: {}", struct_def.name),
                line,
            ));
        }
    }
    for (_, enum_def) in enums.iter() {
        if !enum_def.is_union {
            continue;
        }
        for val in enum_def.vals.values() {
            if let Some(sid) = val.struct_ref {
                if structs.get(sid).fixed {
                    return Err(SkiffError::parse(
                        format!("Only info can be union elements: {}", val.name),
                        line,
                    ));
                }
            }
        }
    }
    Ok(())
}
