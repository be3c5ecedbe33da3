//! Structured error types for every stage of the pipeline.
//!
//! Each kind carries provenance (`module`, `line`, optional `column`) plus a
//! message. Compile-time errors abort the pipeline immediately; `RuntimeError`
//! unwinds the call chain back to the outermost `Execute` call.

use std::fmt;

/// Source position a compile-time error was raised at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub module: String,
    pub line: u32,
    pub column: Option<u32>,
}

impl Position {
    pub fn new(module: impl Into<String>, line: u32) -> Self {
        Position { module: module.into(), line, column: None }
    }

    pub fn with_column(module: impl Into<String>, line: u32, column: u32) -> Self {
        Position { module: module.into(), line, column: Some(column) }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.column {
            Some(col) => write!(f, "{}:{}:{}", self.module, self.line, col),
            None => write!(f, "{}:{}", self.module, self.line),
        }
    }
}

macro_rules! position_error {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            pub pos: Position,
            pub message: String,
        }

        impl $name {
            pub fn new(pos: Position, message: impl Into<String>) -> Self {
                $name { pos, message: message.into() }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}: {}", self.pos, self.message)
            }
        }

        impl std::error::Error for $name {}
    };
}

position_error!(LexError);
position_error!(ParseError);
position_error!(SemanticError);
position_error!(CodeGenerateError);
position_error!(RuntimeError);

/// Error channel a CFunction raises through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CFuncErrorKind {
    NoError,
    ArgCount,
    ArgType,
}

/// Payload a CFunction leaves on the error channel; converted into a
/// [`RuntimeError`] at the call site, carrying the caller's source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallCFuncError {
    pub kind: CFuncErrorKind,
    pub expect_arg_count: Option<u32>,
    pub arg_index: Option<u32>,
    pub expect_type: Option<String>,
    pub message: String,
}

impl fmt::Display for CallCFuncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CallCFuncError {}

/// Any error this crate can raise, compile-time or runtime.
#[derive(Debug, Clone)]
pub enum LunaError {
    Lex(LexError),
    Parse(ParseError),
    Semantic(SemanticError),
    CodeGenerate(CodeGenerateError),
    Runtime(RuntimeError),
}

impl fmt::Display for LunaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LunaError::Lex(e) => write!(f, "{}", e),
            LunaError::Parse(e) => write!(f, "{}", e),
            LunaError::Semantic(e) => write!(f, "{}", e),
            LunaError::CodeGenerate(e) => write!(f, "{}", e),
            LunaError::Runtime(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for LunaError {}

impl From<LexError> for LunaError {
    fn from(e: LexError) -> Self {
        LunaError::Lex(e)
    }
}
impl From<ParseError> for LunaError {
    fn from(e: ParseError) -> Self {
        LunaError::Parse(e)
    }
}
impl From<SemanticError> for LunaError {
    fn from(e: SemanticError) -> Self {
        LunaError::Semantic(e)
    }
}
impl From<CodeGenerateError> for LunaError {
    fn from(e: CodeGenerateError) -> Self {
        LunaError::CodeGenerate(e)
    }
}
impl From<RuntimeError> for LunaError {
    fn from(e: RuntimeError) -> Self {
        LunaError::Runtime(e)
    }
}

pub type LunaResult<T> = Result<T, LunaError>;
