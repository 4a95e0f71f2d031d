pub mod ast;
pub mod bytecode;
pub mod compile;
pub mod config;
pub mod diagnostic;
pub mod error;
pub mod flow;
pub mod lexer;
pub mod optimizer;
pub mod parser;
pub mod resolver;
pub mod token;
pub mod types;
pub mod unit;

pub use compile::{CompileFailure, Compiled, compile, compile_source, parse_source};
pub use config::CompilerOptions;
pub use diagnostic::{Category, Diagnostic, DiagnosticBag, DiagnosticLevel, SourcePos};
pub use error::{CompileError, CompileResult, ErrorKind};
