use thiserror::Error;

#[derive(Debug, Error)]
pub enum SkiffError {
    /// Any failure while tokenizing, parsing, verifying, or encoding a
    /// schema-and-data text. Rendered the way callers surface it: the
    /// 1-based line the cursor was on, then the message.
    #[error("Line {line}: {msg}")]
    Parse { msg: String, line: usize },
}

impl SkiffError {
    pub fn parse(msg: impl Into<String>, line: usize) -> SkiffError {
        SkiffError::Parse {
            msg: msg.into(),
            line,
        }
    }
}
