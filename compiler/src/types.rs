use indexmap::IndexMap;
use serde::Serialize;
use skiff_schema::padding_bytes;

/// The interned base-type tags of the IDL, each with a fixed inline byte
/// size. `Utype` is the companion tag scalar stored before a union field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BaseType {
    None,
    Bool,
    Char,
    Uchar,
    Short,
    Ushort,
    Int,
    Uint,
    Long,
    Ulong,
    Float,
    Double,
    String,
    Vector,
    Struct,
    Union,
    Utype,
}

impl BaseType {
    pub const ALL: [BaseType; 17] = [
        BaseType::None,
        BaseType::Bool,
        BaseType::Char,
        BaseType::Uchar,
        BaseType::Short,
        BaseType::Ushort,
        BaseType::Int,
        BaseType::Uint,
        BaseType::Long,
        BaseType::Ulong,
        BaseType::Float,
        BaseType::Double,
        BaseType::String,
        BaseType::Vector,
        BaseType::Struct,
        BaseType::Union,
        BaseType::Utype,
    ];

    /// The keyword naming this type in schema text, or `""` for tags that
    /// cannot be written directly.
    pub fn idl_name(self) -> &'static str {
        match self {
            BaseType::Bool => "bool",
            BaseType::Char => "byte",
            BaseType::Uchar => "ubyte",
            BaseType::Short => "short",
            BaseType::Ushort => "ushort",
            BaseType::Int => "int",
            BaseType::Uint => "uint",
            BaseType::Long => "long",
            BaseType::Ulong => "ulong",
            BaseType::Float => "float",
            BaseType::Double => "double",
            BaseType::String => "string",
            BaseType::None
            | BaseType::Vector
            | BaseType::Struct
            | BaseType::Union
            | BaseType::Utype => "",
        }
    }

    /// Name used in diagnostics; falls back to the tag's own name for types
    /// that have no keyword.
    pub fn name(self) -> &'static str {
        match self {
            BaseType::None => "none",
            BaseType::Vector => "vector",
            BaseType::Struct => "struct",
            BaseType::Union => "union",
            BaseType::Utype => "utype",
            other => other.idl_name(),
        }
    }

    /// Inline byte size; pointer-like types occupy one 32-bit offset.
    pub fn size(self) -> usize {
        match self {
            BaseType::None | BaseType::Bool | BaseType::Char | BaseType::Uchar => 1,
            BaseType::Utype => 1,
            BaseType::Short | BaseType::Ushort => 2,
            BaseType::Int | BaseType::Uint | BaseType::Float => 4,
            BaseType::Long | BaseType::Ulong | BaseType::Double => 8,
            BaseType::String | BaseType::Vector | BaseType::Struct | BaseType::Union => 4,
        }
    }

    /// Integer tags, including the union type tag.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            BaseType::Bool
                | BaseType::Char
                | BaseType::Uchar
                | BaseType::Short
                | BaseType::Ushort
                | BaseType::Int
                | BaseType::Uint
                | BaseType::Long
                | BaseType::Ulong
                | BaseType::Utype
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, BaseType::Float | BaseType::Double)
    }

    pub fn is_scalar(self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Types stored through an offset (or inline, for fixed structs).
    pub fn is_pointer(self) -> bool {
        matches!(
            self,
            BaseType::String | BaseType::Vector | BaseType::Struct | BaseType::Union
        )
    }
}

impl Default for BaseType {
    fn default() -> Self {
        BaseType::None
    }
}

/// Stable handle into the struct table's arena. Handles survive the
/// declaration-order reshuffling done for forward references.
pub type StructId = usize;

/// Stable handle into the enum table's arena.
pub type EnumId = usize;

/// One occurrence of a type in a declaration: the base tag, the element tag
/// for vectors, and the referenced definition for structs, unions and union
/// type tags.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Type {
    pub base_type: BaseType,
    pub element: BaseType,
    pub struct_ref: Option<StructId>,
    pub enum_ref: Option<EnumId>,
}

impl Type {
    pub fn new(base_type: BaseType) -> Type {
        Type {
            base_type,
            ..Type::default()
        }
    }

    /// The element type of a vector occurrence.
    pub fn vector_type(&self) -> Type {
        Type {
            base_type: self.element,
            element: BaseType::None,
            struct_ref: self.struct_ref,
            enum_ref: None,
        }
    }
}

/// A typed constant. `constant` is decimal text, used uniformly for scalar
/// literals, enum tags, and builder offsets; `offset` is the vtable slot of
/// the owning field, or its inline byte offset within a fixed struct.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Value {
    #[serde(rename = "type")]
    pub type_: Type,
    pub constant: String,
    pub offset: u32,
}

impl Default for Value {
    fn default() -> Self {
        Value {
            type_: Type::default(),
            constant: "0".to_string(),
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FieldDef {
    pub name: String,
    pub doc_comment: String,
    /// Declared type, default constant, and slot/inline offset.
    pub value: Value,
    /// Zero bytes emitted before this field in a fixed struct body.
    pub padding: usize,
    pub deprecated: bool,
    pub attributes: IndexMap<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StructDef {
    pub name: String,
    pub doc_comment: String,
    pub fields: IndexMap<String, FieldDef>,
    /// Fixed-layout struct (true) or vtable-carrying info object (false).
    pub fixed: bool,
    /// Still only referenced, not yet defined.
    pub predecl: bool,
    /// Emit non-fixed fields grouped by element size.
    pub sortbysize: bool,
    pub minalign: usize,
    pub bytesize: usize,
    pub attributes: IndexMap<String, Value>,
}

impl StructDef {
    pub fn new(name: impl Into<String>) -> StructDef {
        StructDef {
            name: name.into(),
            doc_comment: String::new(),
            fields: IndexMap::new(),
            fixed: false,
            predecl: false,
            sortbysize: false,
            minalign: 1,
            bytesize: 0,
            attributes: IndexMap::new(),
        }
    }

    /// Grow the trailing padding so `bytesize` reaches an `align` boundary,
    /// recording the pad on the last field.
    pub fn pad_last_field(&mut self, align: usize) {
        let padding = padding_bytes(self.bytesize, align);
        self.bytesize += padding;
        if !self.fields.is_empty() {
            let idx = self.fields.len() - 1;
            if let Some((_, field)) = self.fields.get_index_mut(idx) {
                field.padding = padding;
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EnumVal {
    pub name: String,
    pub doc_comment: String,
    pub value: i64,
    /// For union members, the struct carrying this variant's payload.
    pub struct_ref: Option<StructId>,
}

impl EnumVal {
    pub fn new(name: impl Into<String>, value: i64) -> EnumVal {
        EnumVal {
            name: name.into(),
            doc_comment: String::new(),
            value,
            struct_ref: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EnumDef {
    pub name: String,
    pub doc_comment: String,
    pub is_union: bool,
    pub underlying_type: Type,
    pub vals: IndexMap<String, EnumVal>,
    pub attributes: IndexMap<String, Value>,
}

impl EnumDef {
    pub fn new(name: impl Into<String>, is_union: bool) -> EnumDef {
        EnumDef {
            name: name.into(),
            doc_comment: String::new(),
            is_union,
            underlying_type: Type::default(),
            vals: IndexMap::new(),
            attributes: IndexMap::new(),
        }
    }

    /// The union member carrying a given type tag.
    pub fn reverse_lookup(&self, tag: i64) -> Option<&EnumVal> {
        self.vals.values().find(|v| v.value == tag)
    }
}

/// An insertion-ordered name → definition table.
///
/// Definitions live in a push-only arena so handles stay valid; a separate
/// ordered index carries declaration order and can move one entry to the
/// tail when a predeclared definition is finally defined.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable<D> {
    arena: Vec<D>,
    index: IndexMap<String, usize>,
}

impl<D> SymbolTable<D> {
    pub fn new() -> SymbolTable<D> {
        SymbolTable {
            arena: Vec::new(),
            index: IndexMap::new(),
        }
    }

    /// Register a definition. Returns `None` if the name is taken.
    pub fn add(&mut self, name: impl Into<String>, item: D) -> Option<usize> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return None;
        }
        let id = self.arena.len();
        self.arena.push(item);
        self.index.insert(name, id);
        Some(id)
    }

    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn get(&self, id: usize) -> &D {
        &self.arena[id]
    }

    pub fn get_mut(&mut self, id: usize) -> &mut D {
        &mut self.arena[id]
    }

    /// Move a name to the tail of the declaration order, preserving the
    /// relative order of everything else. Handles are unaffected.
    pub fn move_to_back(&mut self, name: &str) {
        if let Some(pos) = self.index.get_index_of(name) {
            self.index.move_index(pos, self.index.len() - 1);
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Definitions in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &D)> {
        self.index.iter().map(|(name, &id)| (name.as_str(), &self.arena[id]))
    }
}

/// Bytes a value of this type occupies inline in a parent object.
pub fn inline_size(ty: &Type, structs: &SymbolTable<StructDef>) -> usize {
    match struct_target(ty, structs) {
        Some(id) => structs.get(id).bytesize,
        None => ty.base_type.size(),
    }
}

/// Alignment a value of this type requires inline in a parent object.
pub fn inline_alignment(ty: &Type, structs: &SymbolTable<StructDef>) -> usize {
    match struct_target(ty, structs) {
        Some(id) => structs.get(id).minalign,
        None => ty.base_type.size(),
    }
}

/// The referenced struct, when this occurrence is an inline fixed struct.
pub fn struct_target(ty: &Type, structs: &SymbolTable<StructDef>) -> Option<StructId> {
    match (ty.base_type, ty.struct_ref) {
        (BaseType::Struct, Some(id)) if structs.get(id).fixed => Some(id),
        _ => None,
    }
}
