//! One compilation: parse, optimize, write.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crate::bytecode::{ObjectFile, write_unit};
use crate::config::CompilerOptions;
use crate::diagnostic::{DiagnosticBag, SourcePos};
use crate::error::{CompileError, ErrorKind};
use crate::optimizer;
use crate::parser::Parser;
use crate::resolver::{MemoryLoader, SourceLoader};
use crate::unit::Unit;

/// Name under which [`compile_source`] registers its input.
pub const SOURCE_NAME: &str = "main.e";

#[derive(Debug)]
pub struct Compiled {
    pub object: ObjectFile,
    pub unit: Unit,
    /// Warnings raised along the way.
    pub diagnostics: DiagnosticBag,
}

/// The error that stopped compilation, with the warnings raised before it.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct CompileFailure {
    pub error: CompileError,
    pub diagnostics: DiagnosticBag,
}

impl CompileFailure {
    fn new(error: CompileError, diagnostics: DiagnosticBag) -> Self {
        Self { error, diagnostics }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn internal(component: &str, pos: SourcePos, near: &str, payload: &(dyn Any + Send)) -> CompileError {
    let message = format!(
        "in {component} near {near}: {}; please report this",
        panic_message(payload)
    );
    CompileError::new(ErrorKind::Internal, pos, message)
}

/// Parses `input` (a name resolved through `loader`) into a checked unit.
pub fn parse(
    input: &str,
    options: &CompilerOptions,
    loader: &dyn SourceLoader,
) -> Result<(Unit, DiagnosticBag), CompileFailure> {
    let mut parser = Parser::new(options, loader);
    let result = panic::catch_unwind(AssertUnwindSafe(|| parser.parse_unit(input)));
    match result {
        Ok(Ok(())) => Ok(parser.into_parts()),
        Ok(Err(error)) => {
            let (_, diagnostics) = parser.into_parts();
            Err(CompileFailure::new(error, diagnostics))
        }
        Err(payload) => {
            let (pos, near) = parser.location();
            let error = internal("parser", pos, &near, payload.as_ref());
            let (_, diagnostics) = parser.into_parts();
            Err(CompileFailure::new(error, diagnostics))
        }
    }
}

/// Runs the whole pipeline on `input`.
pub fn compile(
    input: &str,
    options: &CompilerOptions,
    loader: &dyn SourceLoader,
) -> Result<Compiled, CompileFailure> {
    let (mut unit, diagnostics) = parse(input, options, loader)?;
    log::debug!(
        "parsed {input}: {} function(s), {} warning(s)",
        unit.implemented.len(),
        diagnostics.warning_count()
    );
    let unit_pos = SourcePos::new(input, 0);

    if options.optimize() {
        let result = panic::catch_unwind(AssertUnwindSafe(|| optimizer::optimize(&mut unit)));
        if let Err(payload) = result {
            let error = internal("optimizer", unit_pos, "end of unit", payload.as_ref());
            return Err(CompileFailure::new(error, diagnostics));
        }
    }

    let written = panic::catch_unwind(AssertUnwindSafe(|| write_unit(&unit, options.debug_lines)));
    let object = match written {
        Ok(Ok(object)) => object,
        Ok(Err(error)) => return Err(CompileFailure::new(error, diagnostics)),
        Err(payload) => {
            let error = internal("bytecode writer", unit_pos, "end of unit", payload.as_ref());
            return Err(CompileFailure::new(error, diagnostics));
        }
    };
    Ok(Compiled {
        object,
        unit,
        diagnostics,
    })
}

/// Compiles a single in-memory source with no includes besides the prelude.
pub fn compile_source(source: &str, options: &CompilerOptions) -> Result<Compiled, CompileFailure> {
    let loader = MemoryLoader::new().with_file(SOURCE_NAME, source);
    compile(SOURCE_NAME, options, &loader)
}

/// Parses a single in-memory source.
pub fn parse_source(
    source: &str,
    options: &CompilerOptions,
) -> Result<(Unit, DiagnosticBag), CompileFailure> {
    let loader = MemoryLoader::new().with_file(SOURCE_NAME, source);
    parse(SOURCE_NAME, options, &loader)
}
