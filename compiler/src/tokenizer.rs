use std::collections::HashMap;
use std::fmt;

use lazy_static::lazy_static;

use crate::error::SkiffError;
use crate::types::BaseType;

/// One token of lookahead. Single-character punctuation carries its byte;
/// constants and identifiers leave their lexeme in [`Tokenizer::attribute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Punct(u8),
    Eof,
    StringConstant,
    IntegerConstant,
    FloatConstant,
    Identifier,
    Info,
    Struct,
    Enum,
    Union,
    NameSpace,
    MainType,
    TypeName(BaseType),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Punct(c) => write!(f, "{}", *c as char),
            Token::Eof => write!(f, "end of file"),
            Token::StringConstant => write!(f, "string constant"),
            Token::IntegerConstant => write!(f, "integer constant"),
            Token::FloatConstant => write!(f, "float constant"),
            Token::Identifier => write!(f, "identifier"),
            Token::Info => write!(f, "info"),
            Token::Struct => write!(f, "struct"),
            Token::Enum => write!(f, "enum"),
            Token::Union => write!(f, "union"),
            Token::NameSpace => write!(f, "namespace"),
            Token::MainType => write!(f, "Main"),
            Token::TypeName(bt) => write!(f, "{}", bt.idl_name()),
        }
    }
}

lazy_static! {
    /// The writable entries of the base-type registry, keyed by IDL name.
    static ref TYPE_KEYWORDS: HashMap<&'static str, BaseType> = BaseType::ALL
        .iter()
        .filter(|bt| !bt.idl_name().is_empty())
        .map(|&bt| (bt.idl_name(), bt))
        .collect();

    static ref DECL_KEYWORDS: HashMap<&'static str, Token> = [
        ("info", Token::Info),
        ("struct", Token::Struct),
        ("enum", Token::Enum),
        ("union", Token::Union),
        ("namespace", Token::NameSpace),
        ("Main", Token::MainType),
    ]
    .into_iter()
    .collect();
}

/// A character-cursor tokenizer with a single token of lookahead.
///
/// `advance` updates `token`, `attribute` (the current lexeme), `line`, and
/// `doc_comment` (the `///` text collected since the previous token; a
/// documentation comment must start on its own line).
pub struct Tokenizer {
    src: Vec<u8>,
    cursor: usize,
    pub line: usize,
    pub token: Token,
    pub attribute: String,
    pub doc_comment: String,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Tokenizer::new()
    }
}

impl Tokenizer {
    pub fn new() -> Tokenizer {
        Tokenizer {
            src: Vec::new(),
            cursor: 0,
            line: 1,
            token: Token::Eof,
            attribute: String::new(),
            doc_comment: String::new(),
        }
    }

    /// Point the cursor at a fresh source text.
    pub fn reset(&mut self, source: &str) {
        self.src = source.as_bytes().to_vec();
        self.cursor = 0;
        self.line = 1;
        self.token = Token::Eof;
        self.attribute.clear();
        self.doc_comment.clear();
    }

    fn err(&self, msg: impl Into<String>) -> SkiffError {
        SkiffError::parse(msg, self.line)
    }

    /// Byte at an absolute position, with a NUL sentinel past the end.
    fn at(&self, pos: usize) -> u8 {
        self.src.get(pos).copied().unwrap_or(0)
    }

    pub fn advance(&mut self) -> Result<(), SkiffError> {
        self.doc_comment.clear();
        let mut seen_newline = false;
        loop {
            let c = self.at(self.cursor);
            self.cursor += 1;
            match c {
                0 => {
                    self.cursor -= 1;
                    self.token = Token::Eof;
                    return Ok(());
                }
                b' ' | b'\r' | b'\t' => {}
                b'\n' => {
                    self.line += 1;
                    seen_newline = true;
                }
                b'{' | b'}' | b'(' | b')' | b'[' | b']' | b',' | b':' | b';' | b'=' => {
                    self.token = Token::Punct(c);
                    return Ok(());
                }
                b'.' => {
                    if !self.at(self.cursor).is_ascii_digit() {
                        self.token = Token::Punct(b'.');
                        return Ok(());
                    }
                    return Err(self.err("Floating point constant can't start with \".\""));
                }
                b'"' => {
                    self.string_constant()?;
                    return Ok(());
                }
                b'/' if self.at(self.cursor) == b'/' => {
                    self.cursor += 1;
                    let start = self.cursor;
                    while self.at(self.cursor) != 0 && self.at(self.cursor) != b'\n' {
                        self.cursor += 1;
                    }
                    if self.at(start) == b'/' {
                        if !seen_newline {
                            return Err(self.err(
                                "A documentation comment should be on a line on its own",
                            ));
                        }
                        self.doc_comment
                            .push_str(&String::from_utf8_lossy(&self.src[start + 1..self.cursor]));
                    }
                }
                c if c.is_ascii_alphabetic() => {
                    self.identifier(self.cursor - 1);
                    return Ok(());
                }
                c if c.is_ascii_digit() || c == b'-' => {
                    self.number(self.cursor - 1);
                    return Ok(());
                }
                c => {
                    let ch = if (b' '..=b'~').contains(&c) {
                        (c as char).to_string()
                    } else {
                        format!("code: {}", c)
                    };
                    return Err(self.err(format!("Illegal character: {}", ch)));
                }
            }
        }
    }

    fn string_constant(&mut self) -> Result<(), SkiffError> {
        let mut text = Vec::new();
        loop {
            let c = self.at(self.cursor);
            if c == b'"' {
                break;
            }
            // Control characters are rejected; the NUL sentinel at the end
            // of input lands here too, so an unterminated string fails.
            if c < b' ' {
                return Err(self.err("Illegal character in string constant"));
            }
            if c == b'\\' {
                self.cursor += 1;
                match self.at(self.cursor) {
                    b'n' => text.push(b'\n'),
                    b't' => text.push(b'\t'),
                    b'r' => text.push(b'\r'),
                    b'"' => text.push(b'"'),
                    b'\\' => text.push(b'\\'),
                    _ => return Err(self.err("Unknown escape code in string constant")),
                }
                self.cursor += 1;
            } else {
                text.push(c);
                self.cursor += 1;
            }
        }
        self.cursor += 1;
        self.attribute = String::from_utf8_lossy(&text).into_owned();
        self.token = Token::StringConstant;
        Ok(())
    }

    fn identifier(&mut self, start: usize) {
        while self.at(self.cursor).is_ascii_alphanumeric() || self.at(self.cursor) == b'_' {
            self.cursor += 1;
        }
        self.attribute = String::from_utf8_lossy(&self.src[start..self.cursor]).into_owned();
        if let Some(&bt) = TYPE_KEYWORDS.get(self.attribute.as_str()) {
            self.token = Token::TypeName(bt);
            return;
        }
        // Boolean constants become integers, which simplifies everything
        // downstream.
        if self.attribute == "true" || self.attribute == "false" {
            self.attribute = if self.attribute == "true" { "1" } else { "0" }.to_string();
            self.token = Token::IntegerConstant;
            return;
        }
        if let Some(&tok) = DECL_KEYWORDS.get(self.attribute.as_str()) {
            self.token = tok;
            return;
        }
        self.token = Token::Identifier;
    }

    fn number(&mut self, start: usize) {
        while self.at(self.cursor).is_ascii_digit() {
            self.cursor += 1;
        }
        if self.at(self.cursor) == b'.' {
            self.cursor += 1;
            while self.at(self.cursor).is_ascii_digit() {
                self.cursor += 1;
            }
            self.token = Token::FloatConstant;
        } else {
            self.token = Token::IntegerConstant;
        }
        self.attribute = String::from_utf8_lossy(&self.src[start..self.cursor]).into_owned();
    }
}
