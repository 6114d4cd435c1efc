use skiff_schema::{field_index_to_offset, Builder, UOffset, VOffset, MAX_SCALAR_SIZE};

use crate::error::SkiffError;
use crate::tokenizer::{Token, Tokenizer};
use crate::types::{
    inline_alignment, inline_size, struct_target, BaseType, EnumDef, EnumVal, FieldDef, StructDef,
    StructId, SymbolTable, Type, Value,
};
use crate::utils::{int_in_bits, string_to_float, string_to_int};
use crate::verifier::verify_symbols;

/// A parsed field occurrence on the emission stack: the evaluated value and
/// the owning field, when there is one (vector elements have none).
type FieldRef = (StructId, usize);

/// Emit one ranged-checked integer scalar, either unconditionally into an
/// open struct frame or default-omitted into an open info frame.
macro_rules! int_arm {
    ($self:ident, $ty:ty, $slot:expr, $value:expr, $default:expr, $in_fixed:expr) => {{
        let bits = <$ty>::BITS as usize;
        let v = $self.checked_int($value, bits)? as $ty;
        let d = $self.checked_int($default, bits)? as $ty;
        if $in_fixed {
            $self.builder.push_element::<$ty>(v);
        } else {
            $self.builder.add_element::<$ty>($slot, v, d);
        }
    }};
}

macro_rules! push_int_arm {
    ($self:ident, $ty:ty, $value:expr) => {{
        let v = $self.checked_int($value, <$ty>::BITS as usize)? as $ty;
        $self.builder.push_element::<$ty>(v);
    }};
}

/// The schema-and-data parser.
///
/// One instance owns the symbol tables, the construction buffer, and the two
/// work stacks that couple declaration parsing to binary emission. A parse
/// that fails leaves the instance in a defined but unspecified state; use a
/// fresh instance per independent input.
pub struct Parser {
    tokenizer: Tokenizer,
    pub structs: SymbolTable<StructDef>,
    pub enums: SymbolTable<EnumDef>,
    name_space: Vec<String>,
    main_struct: Option<StructId>,
    builder: Builder,
    /// Side storage for serialized fixed-struct bodies awaiting inline
    /// placement in their parent.
    struct_stack: Vec<u8>,
    field_stack: Vec<(Value, Option<FieldRef>)>,
    error: Option<String>,
}

impl Default for Parser {
    fn default() -> Self {
        Parser::new()
    }
}

impl Parser {
    pub fn new() -> Parser {
        Parser {
            tokenizer: Tokenizer::new(),
            structs: SymbolTable::new(),
            enums: SymbolTable::new(),
            name_space: Vec::new(),
            main_struct: None,
            builder: Builder::new(),
            struct_stack: Vec::new(),
            field_stack: Vec::new(),
            error: None,
        }
    }

    /// Parse a schema-and-data text. On failure the message is available
    /// through [`Parser::error`].
    pub fn parse(&mut self, source: &str) -> bool {
        self.try_parse(source).is_ok()
    }

    /// `Result`-returning form of [`Parser::parse`].
    pub fn try_parse(&mut self, source: &str) -> Result<(), SkiffError> {
        self.error = None;
        let result = self.do_parse(source);
        if let Err(e) = &result {
            self.error = Some(e.to_string());
        }
        result
    }

    /// Choose the root type for a subsequent data literal by name.
    pub fn set_main_type(&mut self, name: &str) -> bool {
        self.main_struct = self.structs.lookup(name);
        self.main_struct.is_some()
    }

    pub fn main_type(&self) -> Option<StructId> {
        self.main_struct
    }

    /// The finished bytes of the most recent data literal.
    pub fn buffer(&self) -> &[u8] {
        self.builder.data()
    }

    /// The message of the most recent failed parse.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Namespace components collected from `namespace` declarations.
    pub fn name_space(&self) -> &[String] {
        &self.name_space
    }

    fn err(&self, msg: impl Into<String>) -> SkiffError {
        SkiffError::parse(msg, self.tokenizer.line)
    }

    fn advance(&mut self) -> Result<(), SkiffError> {
        self.tokenizer.advance()
    }

    fn expect(&mut self, t: Token) -> Result<(), SkiffError> {
        if t != self.tokenizer.token {
            return Err(self.err(format!(
                "Expecting: {} instead got: {}",
                t, self.tokenizer.token
            )));
        }
        self.advance()
    }

    fn is_next(&mut self, t: Token) -> Result<bool, SkiffError> {
        let matched = t == self.tokenizer.token;
        if matched {
            self.advance()?;
        }
        Ok(matched)
    }

    fn checked_int(&self, s: &str, bits: usize) -> Result<i64, SkiffError> {
        int_in_bits(s, bits).map_err(|msg| self.err(msg))
    }

    fn field_def(&self, (sid, idx): FieldRef) -> &FieldDef {
        match self.structs.get(sid).fields.get_index(idx) {
            Some((_, field)) => field,
            None => unreachable!("field handle out of range"),
        }
    }

    fn do_parse(&mut self, source: &str) -> Result<(), SkiffError> {
        self.tokenizer.reset(source);
        self.builder.clear();
        self.advance()?;
        while self.tokenizer.token != Token::Eof {
            match self.tokenizer.token {
                Token::NameSpace => {
                    self.advance()?;
                    loop {
                        self.name_space.push(self.tokenizer.attribute.clone());
                        self.expect(Token::Identifier)?;
                        if !self.is_next(Token::Punct(b'.'))? {
                            break;
                        }
                    }
                    self.expect(Token::Punct(b';'))?;
                }
                Token::Punct(b'{') => {
                    let root = match self.main_struct {
                        Some(root) => root,
                        None => return Err(self.err("No main type set to parse data with")),
                    };
                    if self.builder.size() != 0 {
                        return Err(self.err("Cannot have more than one data object in a file"));
                    }
                    let off = self.parse_info(root)?;
                    self.builder.finish(off);
                }
                Token::Enum => self.parse_enum(false)?,
                Token::Union => self.parse_enum(true)?,
                Token::MainType => {
                    self.advance()?;
                    let name = self.tokenizer.attribute.clone();
                    self.expect(Token::Identifier)?;
                    self.expect(Token::Punct(b';'))?;
                    if !self.set_main_type(&name) {
                        return Err(self.err(format!("Unknown main type: {}", name)));
                    }
                    let fixed = match self.main_struct {
                        Some(id) => self.structs.get(id).fixed,
                        None => false,
                    };
                    if fixed {
                        return Err(self.err("Main type must be an info"));
                    }
                }
                _ => self.parse_decl()?,
            }
        }
        verify_symbols(&self.structs, &self.enums, self.tokenizer.line)?;
        debug_assert!(self.field_stack.is_empty());
        debug_assert!(self.struct_stack.is_empty());
        Ok(())
    }

    /// Parse one type occurrence: a type keyword, a named enum/struct
    /// reference, or a vector `[element]`.
    fn parse_type(&mut self) -> Result<Type, SkiffError> {
        let mut ty = Type::default();
        match self.tokenizer.token {
            Token::TypeName(bt) => {
                ty.base_type = bt;
                self.advance()?;
            }
            Token::Identifier => {
                let name = self.tokenizer.attribute.clone();
                if let Some(eid) = self.enums.lookup(&name) {
                    ty = self.enums.get(eid).underlying_type.clone();
                    if self.enums.get(eid).is_union {
                        ty.base_type = BaseType::Union;
                    }
                } else {
                    ty.base_type = BaseType::Struct;
                    ty.struct_ref = Some(self.lookup_or_create_struct(&name));
                }
                self.advance()?;
            }
            Token::Punct(b'[') => {
                self.advance()?;
                let subtype = self.parse_type()?;
                if subtype.base_type == BaseType::Vector {
                    return Err(
                        self.err("Nested vector types not supported (wrap in info first).")
                    );
                }
                if subtype.base_type == BaseType::Union {
                    return Err(
                        self.err("Vector of union types not supported (wrap in info first).")
                    );
                }
                ty.base_type = BaseType::Vector;
                ty.element = subtype.base_type;
                ty.struct_ref = subtype.struct_ref;
                self.expect(Token::Punct(b']'))?;
            }
            _ => return Err(self.err("Illegal type syntax")),
        }
        Ok(ty)
    }

    /// Resolve a struct name, eagerly creating a predeclared entry so that
    /// definitions can reference each other before being written down.
    fn lookup_or_create_struct(&mut self, name: &str) -> StructId {
        match self.structs.lookup(name) {
            Some(id) => id,
            None => {
                let mut sd = StructDef::new(name);
                sd.predecl = true;
                match self.structs.add(name, sd) {
                    Some(id) => id,
                    None => unreachable!("lookup missed an existing struct"),
                }
            }
        }
    }

    fn add_field(&mut self, sid: StructId, name: String, ty: Type) -> Result<(), SkiffError> {
        let size = inline_size(&ty, &self.structs);
        let alignment = inline_alignment(&ty, &self.structs);
        let sd = self.structs.get_mut(sid);
        let mut field = FieldDef {
            name: name.clone(),
            ..FieldDef::default()
        };
        field.value.offset = field_index_to_offset(sd.fields.len() as VOffset) as u32;
        field.value.type_ = ty;
        if sd.fixed {
            sd.minalign = sd.minalign.max(alignment);
            sd.pad_last_field(alignment);
            field.value.offset = sd.bytesize as u32;
            sd.bytesize += size;
        }
        if sd.fields.contains_key(&name) {
            return Err(self.err(format!("Field already exists: {}", name)));
        }
        self.structs.get_mut(sid).fields.insert(name, field);
        Ok(())
    }

    fn parse_field(&mut self, sid: StructId) -> Result<(), SkiffError> {
        let name = self.tokenizer.attribute.clone();
        let dc = std::mem::take(&mut self.tokenizer.doc_comment);
        self.expect(Token::Identifier)?;
        self.expect(Token::Punct(b':'))?;
        let ty = self.parse_type()?;

        let fixed = self.structs.get(sid).fixed;
        if fixed && !ty.base_type.is_scalar() && struct_target(&ty, &self.structs).is_none() {
            return Err(self.err("Structs may contain only scalar or struct fields"));
        }
        if ty.base_type == BaseType::Union {
            // The type tag always directly precedes its union field.
            let underlying = match ty.enum_ref {
                Some(eid) => self.enums.get(eid).underlying_type.clone(),
                None => unreachable!("union type without enum reference"),
            };
            self.add_field(sid, format!("{}_type", name), underlying)?;
        }
        self.add_field(sid, name.clone(), ty)?;

        if self.is_next(Token::Punct(b'='))? {
            let mut val = match self.structs.get(sid).fields.get(&name) {
                Some(field) => field.value.clone(),
                None => unreachable!("field vanished after insertion"),
            };
            self.parse_single_value(&mut val)?;
            match self.structs.get_mut(sid).fields.get_mut(&name) {
                Some(field) => field.value = val,
                None => unreachable!("field vanished after insertion"),
            }
        }

        let attributes = self.parse_metadata()?;
        let deprecated = attributes.contains_key("deprecated");
        match self.structs.get_mut(sid).fields.get_mut(&name) {
            Some(field) => {
                field.doc_comment = dc;
                field.attributes = attributes;
                field.deprecated = deprecated;
            }
            None => unreachable!("field vanished after insertion"),
        }
        if deprecated && fixed {
            return Err(self.err("Cannot deprecate fields in a struct"));
        }
        self.expect(Token::Punct(b';'))?;
        Ok(())
    }

    fn parse_decl(&mut self) -> Result<(), SkiffError> {
        let dc = std::mem::take(&mut self.tokenizer.doc_comment);
        let fixed = self.is_next(Token::Struct)?;
        if !fixed {
            self.expect(Token::Info)?;
        }
        let name = self.tokenizer.attribute.clone();
        self.expect(Token::Identifier)?;
        let sid = self.lookup_or_create_struct(&name);
        if !self.structs.get(sid).predecl {
            return Err(self.err(format!("Datatype already exists: {}", name)));
        }
        {
            let sd = self.structs.get_mut(sid);
            sd.predecl = false;
            sd.doc_comment = dc;
            sd.fixed = fixed;
        }
        // A predeclared struct sits where the first reference put it; move it
        // to the tail so the table keeps declaration order.
        self.structs.move_to_back(&name);

        let attributes = self.parse_metadata()?;
        let sortbysize = !fixed && !attributes.contains_key("Original_order");
        {
            let sd = self.structs.get_mut(sid);
            sd.attributes = attributes;
            sd.sortbysize = sortbysize;
        }

        self.expect(Token::Punct(b'{'))?;
        while self.tokenizer.token != Token::Punct(b'}') {
            self.parse_field(sid)?;
        }
        self.expect(Token::Punct(b'}'))?;

        if fixed {
            let minalign = self.structs.get(sid).minalign;
            let force = self
                .structs
                .get(sid)
                .attributes
                .get("Force_align")
                .map(|fa| (fa.type_.base_type, string_to_int(&fa.constant)));
            if let Some((bt, align)) = force {
                if bt != BaseType::Int
                    || align < minalign as i64
                    || align > 256
                    || (align & (align - 1)) != 0
                {
                    return Err(self.err(
                        "Force_align must be a power of two integer ranging from the \
                         struct's natural alignment to 256",
                    ));
                }
                self.structs.get_mut(sid).minalign = align as usize;
            }
        }
        let minalign = self.structs.get(sid).minalign;
        self.structs.get_mut(sid).pad_last_field(minalign);
        Ok(())
    }

    fn parse_enum(&mut self, is_union: bool) -> Result<(), SkiffError> {
        let dc = std::mem::take(&mut self.tokenizer.doc_comment);
        self.advance()?; // the `enum` / `union` keyword
        let name = self.tokenizer.attribute.clone();
        self.expect(Token::Identifier)?;
        let mut enum_def = EnumDef::new(name.clone(), is_union);
        enum_def.doc_comment = dc;
        let eid = match self.enums.add(name.clone(), enum_def) {
            Some(id) => id,
            None => return Err(self.err(format!("Enum already exists: {}", name))),
        };
        if is_union {
            let mut underlying = Type::new(BaseType::Utype);
            underlying.enum_ref = Some(eid);
            self.enums.get_mut(eid).underlying_type = underlying;
        } else if self.is_next(Token::Punct(b':'))? {
            // short is the default for plain enums; any integer type works.
            let underlying = self.parse_type()?;
            if !underlying.base_type.is_integer() {
                return Err(self.err("Underlying enum type must be integral"));
            }
            self.enums.get_mut(eid).underlying_type = underlying;
        } else {
            self.enums.get_mut(eid).underlying_type = Type::new(BaseType::Short);
        }
        let attributes = self.parse_metadata()?;
        self.enums.get_mut(eid).attributes = attributes;
        self.expect(Token::Punct(b'{'))?;
        if is_union {
            self.enums
                .get_mut(eid)
                .vals
                .insert("NONE".to_string(), EnumVal::new("NONE", 0));
        }
        loop {
            let vname = self.tokenizer.attribute.clone();
            let vdc = std::mem::take(&mut self.tokenizer.doc_comment);
            self.expect(Token::Identifier)?;
            let prevsize = self.enums.get(eid).vals.len();
            let next_value = self
                .enums
                .get(eid)
                .vals
                .values()
                .last()
                .map(|v| v.value + 1)
                .unwrap_or(0);
            let mut ev = EnumVal::new(vname.clone(), next_value);
            ev.doc_comment = vdc;
            if is_union {
                // Each union member names a struct of the same name.
                ev.struct_ref = Some(self.lookup_or_create_struct(&vname));
            }
            if self.enums.get(eid).vals.contains_key(&vname) {
                return Err(self.err(format!("Enum value already exists: {}", vname)));
            }
            self.enums.get_mut(eid).vals.insert(vname.clone(), ev);
            if self.is_next(Token::Punct(b'='))? {
                let value = string_to_int(&self.tokenizer.attribute);
                self.expect(Token::IntegerConstant)?;
                let prev = if prevsize > 0 {
                    self.enums
                        .get(eid)
                        .vals
                        .get_index(prevsize - 1)
                        .map(|(_, v)| v.value)
                } else {
                    None
                };
                if let Some(prev) = prev {
                    if prev >= value {
                        return Err(self.err("Enum values must be specified in ascending order"));
                    }
                }
                if let Some((_, last)) = self.enums.get_mut(eid).vals.get_index_mut(prevsize) {
                    last.value = value;
                }
            }
            if !self.is_next(Token::Punct(b','))? {
                break;
            }
        }
        self.expect(Token::Punct(b'}'))?;
        Ok(())
    }

    /// Parenthesized attribute list after a declaration name or field.
    fn parse_metadata(
        &mut self,
    ) -> Result<indexmap::IndexMap<String, Value>, SkiffError> {
        let mut attributes = indexmap::IndexMap::new();
        if self.is_next(Token::Punct(b'('))? {
            loop {
                let name = self.tokenizer.attribute.clone();
                self.expect(Token::Identifier)?;
                let mut e = Value::default();
                if self.is_next(Token::Punct(b':'))? {
                    self.parse_single_value(&mut e)?;
                }
                attributes.insert(name, e);
                if self.is_next(Token::Punct(b')'))? {
                    break;
                }
                self.expect(Token::Punct(b','))?;
            }
        }
        Ok(attributes)
    }

    fn try_typed_value(
        &mut self,
        dtoken: Token,
        check: bool,
        e: &mut Value,
        req: BaseType,
    ) -> Result<bool, SkiffError> {
        let matched = dtoken == self.tokenizer.token;
        if matched {
            e.constant = self.tokenizer.attribute.clone();
            if !check {
                if e.type_.base_type == BaseType::None {
                    e.type_.base_type = req;
                } else {
                    return Err(self.err(format!(
                        "Type mismatch: expecting: {}, found: {}",
                        e.type_.base_type.name(),
                        req.name()
                    )));
                }
            }
            self.advance()?;
        }
        Ok(matched)
    }

    /// Parse one scalar constant: an integer, a float, a string, or an
    /// identifier naming some enum value.
    fn parse_single_value(&mut self, e: &mut Value) -> Result<(), SkiffError> {
        let matched = self.try_typed_value(
            Token::IntegerConstant,
            e.type_.base_type.is_scalar(),
            e,
            BaseType::Int,
        )? || self.try_typed_value(
            Token::FloatConstant,
            e.type_.base_type.is_float(),
            e,
            BaseType::Float,
        )? || self.try_typed_value(
            Token::StringConstant,
            e.type_.base_type == BaseType::String,
            e,
            BaseType::String,
        )?;
        if matched {
            return Ok(());
        }
        if self.tokenizer.token == Token::Identifier {
            let attr = self.tokenizer.attribute.clone();
            let mut found = None;
            for (_, enum_def) in self.enums.iter() {
                if let Some(ev) = enum_def.vals.get(&attr) {
                    found = Some(ev.value);
                    break;
                }
            }
            return match found {
                Some(value) => {
                    self.tokenizer.attribute = value.to_string();
                    self.try_typed_value(
                        Token::Identifier,
                        e.type_.base_type.is_integer(),
                        e,
                        BaseType::Int,
                    )?;
                    Ok(())
                }
                None => Err(self.err(format!("Not valid enum value: {}", attr))),
            };
        }
        Err(self.err(format!(
            "Cannot parse value starting with: {}",
            self.tokenizer.token
        )))
    }

    fn parse_any_value(
        &mut self,
        val: &mut Value,
        field: Option<FieldRef>,
    ) -> Result<(), SkiffError> {
        match val.type_.base_type {
            BaseType::Union => {
                let fref = match field {
                    Some(fref) => fref,
                    None => unreachable!("union value outside a field"),
                };
                let field_name = self.field_def(fref).name.clone();
                // The tag just parsed selects the union member.
                let tag_is_utype = match self.field_stack.last() {
                    Some((_, Some(prev))) => {
                        self.field_def(*prev).value.type_.base_type == BaseType::Utype
                    }
                    _ => false,
                };
                if !tag_is_utype {
                    return Err(self.err(format!(
                        "Missing type field before this union value: {}",
                        field_name
                    )));
                }
                let tag_constant = match self.field_stack.last() {
                    Some((value, _)) => value.constant.clone(),
                    None => unreachable!("tag presence checked above"),
                };
                let tag = self.checked_int(&tag_constant, 8)?;
                let eid = match val.type_.enum_ref {
                    Some(eid) => eid,
                    None => unreachable!("union type without enum reference"),
                };
                let target = self
                    .enums
                    .get(eid)
                    .reverse_lookup(tag)
                    .and_then(|ev| ev.struct_ref);
                let target = match target {
                    Some(target) => target,
                    None => return Err(self.err(format!("Illegal type id for: {}", field_name))),
                };
                let off = self.parse_info(target)?;
                val.constant = off.to_string();
            }
            BaseType::Struct => {
                let target = match val.type_.struct_ref {
                    Some(target) => target,
                    None => unreachable!("struct type without reference"),
                };
                let off = self.parse_info(target)?;
                val.constant = off.to_string();
            }
            BaseType::String => {
                let s = self.tokenizer.attribute.clone();
                self.expect(Token::StringConstant)?;
                let off = self.builder.create_string(&s);
                val.constant = off.to_string();
            }
            BaseType::Vector => {
                self.expect(Token::Punct(b'['))?;
                let element = val.type_.vector_type();
                let off = self.parse_vector(&element)?;
                val.constant = off.to_string();
            }
            _ => self.parse_single_value(val)?,
        }
        Ok(())
    }

    /// Splice a staged fixed-struct body inline and record its field slot.
    fn serialize_struct(&mut self, sid: StructId, val: &Value) -> Result<(), SkiffError> {
        let (bytesize, minalign) = {
            let sd = self.structs.get(sid);
            (sd.bytesize, sd.minalign)
        };
        let off = string_to_int(&val.constant) as usize;
        assert_eq!(
            self.struct_stack.len() - off,
            bytesize,
            "staged struct is not on top of the side stack"
        );
        self.builder.align(minalign);
        self.builder.push_bytes(&self.struct_stack[off..]);
        self.struct_stack.truncate(off);
        let end = self.builder.size();
        self.builder.add_struct_offset(val.offset as VOffset, end);
        Ok(())
    }

    /// Emit one parsed field into the open builder frame.
    fn emit_field(
        &mut self,
        value: &Value,
        fref: FieldRef,
        in_fixed: bool,
    ) -> Result<(), SkiffError> {
        let (padding, default, ftype) = {
            let field = self.field_def(fref);
            (
                field.padding,
                field.value.constant.clone(),
                field.value.type_.clone(),
            )
        };
        let slot = value.offset as VOffset;
        self.builder.pad(padding);
        match value.type_.base_type {
            BaseType::None | BaseType::Bool | BaseType::Uchar | BaseType::Utype => {
                int_arm!(self, u8, slot, &value.constant, &default, in_fixed)
            }
            BaseType::Char => int_arm!(self, i8, slot, &value.constant, &default, in_fixed),
            BaseType::Short => int_arm!(self, i16, slot, &value.constant, &default, in_fixed),
            BaseType::Ushort => int_arm!(self, u16, slot, &value.constant, &default, in_fixed),
            BaseType::Int => int_arm!(self, i32, slot, &value.constant, &default, in_fixed),
            BaseType::Uint => int_arm!(self, u32, slot, &value.constant, &default, in_fixed),
            BaseType::Long => int_arm!(self, i64, slot, &value.constant, &default, in_fixed),
            BaseType::Ulong => int_arm!(self, u64, slot, &value.constant, &default, in_fixed),
            BaseType::Float => {
                let v = string_to_float(&value.constant) as f32;
                let d = string_to_float(&default) as f32;
                if in_fixed {
                    self.builder.push_element::<f32>(v);
                } else {
                    self.builder.add_element::<f32>(slot, v, d);
                }
            }
            BaseType::Double => {
                let v = string_to_float(&value.constant);
                let d = string_to_float(&default);
                if in_fixed {
                    self.builder.push_element::<f64>(v);
                } else {
                    self.builder.add_element::<f64>(slot, v, d);
                }
            }
            BaseType::String | BaseType::Vector | BaseType::Struct | BaseType::Union => {
                if let Some(target) = struct_target(&ftype, &self.structs) {
                    self.serialize_struct(target, value)?;
                } else {
                    let off = string_to_int(&value.constant) as UOffset;
                    self.builder.add_offset(slot, off);
                }
            }
        }
        Ok(())
    }

    /// Parse `{ field: value, ... }` against a struct or info definition and
    /// emit it. For a fixed struct the bytes land on the side stack and the
    /// returned pseudo-offset indexes into it; for an info object the return
    /// value is its buffer offset.
    fn parse_info(&mut self, sid: StructId) -> Result<UOffset, SkiffError> {
        self.expect(Token::Punct(b'{'))?;
        let mut fieldn = 0usize;
        loop {
            let name = self.tokenizer.attribute.clone();
            if !self.is_next(Token::StringConstant)? {
                self.expect(Token::Identifier)?;
            }
            let (fidx, mut val) = {
                let sd = self.structs.get(sid);
                let fidx = match sd.fields.get_index_of(&name) {
                    Some(fidx) => fidx,
                    None => return Err(self.err(format!("Unknown field: {}", name))),
                };
                if sd.fixed && fidx != fieldn {
                    return Err(
                        self.err(format!("Struct field appearing out of order: {}", name))
                    );
                }
                let value = match sd.fields.get_index(fidx) {
                    Some((_, field)) => field.value.clone(),
                    None => unreachable!("index from get_index_of"),
                };
                (fidx, value)
            };
            let literal_base = self.field_stack.len() - fieldn;
            if self.field_stack[literal_base..]
                .iter()
                .any(|(_, fref)| *fref == Some((sid, fidx)))
            {
                return Err(self.err(format!("Field set more than once: {}", name)));
            }
            self.expect(Token::Punct(b':'))?;
            self.parse_any_value(&mut val, Some((sid, fidx)))?;
            self.field_stack.push((val, Some((sid, fidx))));
            fieldn += 1;
            if self.is_next(Token::Punct(b'}'))? {
                break;
            }
            self.expect(Token::Punct(b','))?;
        }

        let (fixed, total_fields, sortbysize, minalign, bytesize) = {
            let sd = self.structs.get(sid);
            (
                sd.fixed,
                sd.fields.len(),
                sd.sortbysize,
                sd.minalign,
                sd.bytesize,
            )
        };
        if fixed && fieldn != total_fields {
            let name = self.structs.get(sid).name.clone();
            return Err(self.err(format!("Incomplete struct initialization: {}", name)));
        }
        let start = if fixed {
            self.builder.start_struct(minalign)
        } else {
            self.builder.start_info()
        };

        // Emit in reverse since the buffer is built backwards; size-sorted
        // emission walks halving size passes so same-sized fields pack
        // together.
        let mut size = if sortbysize { MAX_SCALAR_SIZE } else { 1 };
        while size > 0 {
            for i in (self.field_stack.len() - fieldn..self.field_stack.len()).rev() {
                let (value, fref) = self.field_stack[i].clone();
                if !sortbysize || size == value.type_.base_type.size() {
                    if let Some(fref) = fref {
                        self.emit_field(&value, fref, fixed)?;
                    }
                }
            }
            size /= 2;
        }
        let keep = self.field_stack.len() - fieldn;
        self.field_stack.truncate(keep);

        if fixed {
            self.builder.clear_offsets();
            self.builder.end_struct();
            // Stage the body in the side buffer; the parent splices it back
            // in when it reaches this field's slot.
            let off = self.struct_stack.len();
            self.struct_stack
                .extend_from_slice(&self.builder.data()[..bytesize]);
            self.builder.pop_bytes(bytesize);
            Ok(off as UOffset)
        } else {
            Ok(self.builder.end_info(start, total_fields as VOffset))
        }
    }

    /// Parse `value, ... ]` after the opening bracket, then emit the elements
    /// in reverse and frame them as a vector.
    fn parse_vector(&mut self, element: &Type) -> Result<UOffset, SkiffError> {
        let mut count = 0usize;
        if self.tokenizer.token != Token::Punct(b']') {
            loop {
                let mut val = Value {
                    type_: element.clone(),
                    ..Value::default()
                };
                self.parse_any_value(&mut val, None)?;
                self.field_stack.push((val, None));
                count += 1;
                if self.tokenizer.token == Token::Punct(b']') {
                    break;
                }
                self.expect(Token::Punct(b','))?;
            }
        }
        self.advance()?; // the ']'

        let elem_size = inline_size(element, &self.structs);
        let elem_align = inline_alignment(element, &self.structs);
        self.builder.start_vector(count * elem_size, elem_align);
        for _ in 0..count {
            let (val, _) = match self.field_stack.pop() {
                Some(entry) => entry,
                None => unreachable!("vector elements were just pushed"),
            };
            self.push_vector_element(&val)?;
        }
        self.builder.clear_offsets();
        Ok(self.builder.end_vector(count as UOffset))
    }

    fn push_vector_element(&mut self, val: &Value) -> Result<(), SkiffError> {
        match val.type_.base_type {
            BaseType::None | BaseType::Bool | BaseType::Uchar | BaseType::Utype => {
                push_int_arm!(self, u8, &val.constant)
            }
            BaseType::Char => push_int_arm!(self, i8, &val.constant),
            BaseType::Short => push_int_arm!(self, i16, &val.constant),
            BaseType::Ushort => push_int_arm!(self, u16, &val.constant),
            BaseType::Int => push_int_arm!(self, i32, &val.constant),
            BaseType::Uint => push_int_arm!(self, u32, &val.constant),
            BaseType::Long => push_int_arm!(self, i64, &val.constant),
            BaseType::Ulong => push_int_arm!(self, u64, &val.constant),
            BaseType::Float => {
                let v = string_to_float(&val.constant) as f32;
                self.builder.push_element::<f32>(v);
            }
            BaseType::Double => {
                let v = string_to_float(&val.constant);
                self.builder.push_element::<f64>(v);
            }
            BaseType::String | BaseType::Vector | BaseType::Struct | BaseType::Union => {
                if let Some(target) = struct_target(&val.type_, &self.structs) {
                    self.serialize_struct(target, val)?;
                } else {
                    let off = string_to_int(&val.constant) as UOffset;
                    let rel = self.builder.refer_to(off);
                    self.builder.push_element::<UOffset>(rel);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Parser {
        let mut parser = Parser::new();
        let ok = parser.parse(source);
        assert!(ok, "parse failed: {:?}", parser.error());
        parser
    }

    fn parse_err(source: &str) -> String {
        let mut parser = Parser::new();
        assert!(!parser.parse(source), "parse unexpectedly succeeded");
        parser.error().map(str::to_string).unwrap_or_default()
    }

    #[test]
    fn declarations_populate_the_tables() {
        let parser = parse_ok(
            "namespace demo.gfx;\n\
             enum Mode:byte { A, B }\n\
             struct Pos { x:int; y:int; }\n\
             info Node { pos:Pos; mode:Mode = B; }\n",
        );
        assert_eq!(parser.name_space(), ["demo", "gfx"]);
        let order: Vec<&str> = parser.structs.iter().map(|(name, _)| name).collect();
        assert_eq!(order, ["Pos", "Node"]);
        let (_, node) = parser.structs.iter().nth(1).unwrap();
        assert!(!node.fixed);
        assert!(node.sortbysize);
        assert_eq!(node.fields["mode"].value.constant, "1");
        // Vtable slots are assigned in declaration order.
        assert_eq!(node.fields["pos"].value.offset, 4);
        assert_eq!(node.fields["mode"].value.offset, 6);
    }

    #[test]
    fn fixed_struct_layout_offsets_and_padding() {
        let parser = parse_ok("struct S { a:byte; b:int; c:short; }");
        let sid = parser.structs.lookup("S").unwrap();
        let s = parser.structs.get(sid);
        assert!(s.fixed);
        assert_eq!(s.minalign, 4);
        assert_eq!(s.fields["a"].value.offset, 0);
        assert_eq!(s.fields["b"].value.offset, 4);
        assert_eq!(s.fields["c"].value.offset, 8);
        // a is padded up to b's alignment, c up to the struct's.
        assert_eq!(s.fields["a"].padding, 3);
        assert_eq!(s.fields["c"].padding, 2);
        assert_eq!(s.bytesize, 12);
        assert_eq!(s.bytesize % s.minalign, 0);
    }

    #[test]
    fn forward_references_resolve() {
        let parser = parse_ok("info A { b:B; } info B { n:int; }");
        for (_, sd) in parser.structs.iter() {
            assert!(!sd.predecl, "{} left predeclared", sd.name);
        }
        // Declaration order follows the definitions, not the first reference.
        let order: Vec<&str> = parser.structs.iter().map(|(name, _)| name).collect();
        assert_eq!(order, ["A", "B"]);
    }

    #[test]
    fn dangling_forward_reference_fails() {
        let err = parse_err("info A { b:B; }");
        assert!(err.contains("Type referenced but not defined: B"), "{}", err);
    }

    #[test]
    fn union_gets_tag_field_and_none_member() {
        let parser = parse_ok(
            "union U { A, B }\n\
             info A { x:int; }\n\
             info B { y:int; }\n\
             info Root { u:U; }\n",
        );
        let eid = parser.enums.lookup("U").unwrap();
        let u = parser.enums.get(eid);
        assert!(u.is_union);
        let vals: Vec<(&str, i64)> = u.vals.iter().map(|(n, v)| (n.as_str(), v.value)).collect();
        assert_eq!(vals, [("NONE", 0), ("A", 1), ("B", 2)]);
        let root_id = parser.structs.lookup("Root").unwrap();
        let root = parser.structs.get(root_id);
        let fields: Vec<&str> = root.fields.keys().map(String::as_str).collect();
        assert_eq!(fields, ["u_type", "u"]);
        assert_eq!(
            root.fields["u_type"].value.type_.base_type,
            BaseType::Utype
        );
        assert_eq!(root.fields["u"].value.type_.base_type, BaseType::Union);
    }

    #[test]
    fn enum_values_must_ascend() {
        let err = parse_err("enum E { A = 3, B = 2 }");
        assert!(err.contains("ascending order"), "{}", err);
        let parser = parse_ok("enum E { A = 3, B }");
        let e = parser.enums.get(parser.enums.lookup("E").unwrap());
        assert_eq!(e.vals["B"].value, 4);
    }

    #[test]
    fn duplicate_definitions_fail() {
        assert!(parse_err("info A {} info A {}").contains("Datatype already exists"));
        assert!(parse_err("enum E { X } enum E { Y }").contains("Enum already exists"));
        assert!(
            parse_err("info A { x:int; x:int; }").contains("Field already exists")
        );
        assert!(parse_err("enum E { X, X }").contains("Enum value already exists"));
    }

    #[test]
    fn fixed_structs_reject_pointer_fields_and_deprecation() {
        assert!(parse_err("struct S { s:string; }")
            .contains("Structs may contain only scalar or struct fields"));
        assert!(
            parse_err("struct S { x:int (deprecated); }")
                .contains("Cannot deprecate fields in a struct")
        );
        let parser = parse_ok("info T { x:int (deprecated); }");
        let t = parser.structs.get(parser.structs.lookup("T").unwrap());
        assert!(t.fields["x"].deprecated);
    }

    #[test]
    fn force_align_applies_before_trailing_padding() {
        let parser = parse_ok("struct S (Force_align: 16) { a:byte; }");
        let s = parser.structs.get(parser.structs.lookup("S").unwrap());
        assert_eq!(s.minalign, 16);
        assert_eq!(s.bytesize, 16);
        assert!(parse_err("struct S (Force_align: 3) { a:byte; }")
            .contains("Force_align must be a power of two"));
        assert!(parse_err("struct S (Force_align: 512) { a:byte; }")
            .contains("Force_align must be a power of two"));
    }

    #[test]
    fn original_order_disables_size_sorting() {
        let parser = parse_ok("info T (Original_order) { a:byte; b:long; }");
        let t = parser.structs.get(parser.structs.lookup("T").unwrap());
        assert!(!t.sortbysize);
    }

    #[test]
    fn main_type_must_be_declared_and_non_fixed() {
        assert!(parse_err("Main X;").contains("Unknown main type: X"));
        assert!(
            parse_err("struct V { x:int; } Main V;").contains("Main type must be an info")
        );
        let err = parse_err("info T { x:int; } {x:1}");
        assert!(err.contains("No main type set"), "{}", err);
    }

    #[test]
    fn nested_vectors_and_union_vectors_are_rejected() {
        assert!(parse_err("info X { v:[[int]]; }").contains("Nested vector types not supported"));
        assert!(parse_err("union U { A } info A { x:int; } info X { v:[U]; }")
            .contains("Vector of union types not supported"));
    }

    #[test]
    fn data_literal_range_check() {
        let err = parse_err("info T { c:byte; } Main T; {c:300}");
        assert!(err.contains("Constant does not fit in a 8-bit field"), "{}", err);
    }

    #[test]
    fn data_literal_duplicate_field_fails() {
        let err = parse_err("info T { x:int; } Main T; {x:1,x:2}");
        assert!(err.contains("Field set more than once: x"), "{}", err);
    }

    #[test]
    fn struct_literal_must_be_complete_and_in_order() {
        let schema = "struct P { x:int; y:int; } info T { p:P; } Main T;";
        let err = parse_err(&format!("{} {{p:{{y:2,x:1}}}}", schema));
        assert!(err.contains("appearing out of order"), "{}", err);
        let err = parse_err(&format!("{} {{p:{{x:1}}}}", schema));
        assert!(err.contains("Incomplete struct initialization"), "{}", err);
    }

    #[test]
    fn union_literal_requires_preceding_tag() {
        let schema = "union U { A } info A { x:int; } info Root { u:U; } Main Root;";
        let err = parse_err(&format!("{} {{u: {{x:5}}}}", schema));
        assert!(
            err.contains("Missing type field before this union value: u"),
            "{}",
            err
        );
    }

    #[test]
    fn stacks_drain_after_a_data_parse() {
        let mut parser = Parser::new();
        let ok = parser.parse(
            "struct P { x:int; y:int; }\n\
             info T { p:P; v:[P]; s:string; }\n\
             Main T;\n\
             {p:{x:1,y:2}, v:[{x:3,y:4},{x:5,y:6}], s:\"hi\"}\n",
        );
        assert!(ok, "{:?}", parser.error());
        assert!(parser.field_stack.is_empty());
        assert!(parser.struct_stack.is_empty());
        assert!(!parser.buffer().is_empty());
    }

    #[test]
    fn error_messages_carry_the_line() {
        let err = parse_err("info T {\n  x:int;\n  x:int;\n}");
        assert!(err.starts_with("Line 3:"), "{}", err);
    }
}
