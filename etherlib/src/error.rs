use core::fmt;

use crate::diagnostic::SourcePos;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Lexical,
    Syntax,
    Semantic,
    Codegen,
    Io,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Lexical => "lexical error",
            ErrorKind::Syntax => "syntax error",
            ErrorKind::Semantic => "error",
            ErrorKind::Codegen => "code generation error",
            ErrorKind::Io => "I/O error",
            ErrorKind::Internal => "internal compiler error",
        };
        f.write_str(s)
    }
}

/// The error that aborts compilation of a unit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{pos}: {kind}: {message}")]
pub struct CompileError {
    pub kind: ErrorKind,
    pub pos: SourcePos,
    pub message: String,
}

impl CompileError {
    pub fn new(kind: ErrorKind, pos: SourcePos, message: impl Into<String>) -> Self {
        Self {
            kind,
            pos,
            message: message.into(),
        }
    }

    pub fn lexical(pos: SourcePos, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Lexical, pos, message)
    }

    pub fn syntax(pos: SourcePos, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, pos, message)
    }

    pub fn semantic(pos: SourcePos, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Semantic, pos, message)
    }

    pub fn codegen(pos: SourcePos, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Codegen, pos, message)
    }

    pub fn io(path: impl Into<String>, err: &std::io::Error) -> Self {
        let path = path.into();
        let message = format!("cannot read `{path}`: {err}");
        Self::new(ErrorKind::Io, SourcePos::new(path, 0), message)
    }
}

pub type CompileResult<T> = Result<T, CompileError>;
