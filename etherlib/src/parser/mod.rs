use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::CompilerOptions;
use crate::diagnostic::{Category, DiagnosticBag, SourcePos, format_expected_found};
use crate::error::{CompileError, CompileResult};
use crate::lexer::Lexer;
use crate::resolver::{HEADER_EXT, SourceLoader};
use crate::token::{Token, TokenKind, TokenValue, symbol};
use crate::unit::Unit;

mod casts;
mod closure;
mod decl;
mod expr;
mod ops;
mod scope;
mod stmt;
mod sugar;
mod types;

use scope::{Frame, FuncCtx};

pub(crate) type PResult<T> = CompileResult<T>;

/// Builtin method signatures, parsed as a shared header before any source.
pub const PRELUDE: &str = include_str!("../prelude.eh");
pub const PRELUDE_NAME: &str = "<prelude>";

/// Recursive-descent parser that type-checks and desugars while it reads.
pub struct Parser<'a> {
    unit: Unit,
    options: &'a CompilerOptions,
    loader: &'a dyn SourceLoader,
    diagnostics: DiagnosticBag,
    lexer: Lexer,
    file: Option<PathBuf>,
    header: bool,
    parsed: HashSet<PathBuf>,
    parsing: Vec<PathBuf>,
    frames: Vec<Frame>,
    funcs: Vec<FuncCtx>,
    closure_count: usize,
    temp_count: usize,
}

impl<'a> Parser<'a> {
    pub fn new(options: &'a CompilerOptions, loader: &'a dyn SourceLoader) -> Self {
        Self {
            unit: Unit::new(),
            options,
            loader,
            diagnostics: DiagnosticBag::new(),
            lexer: Lexer::new("", "", options.compat),
            file: None,
            header: false,
            parsed: HashSet::new(),
            parsing: Vec::new(),
            frames: Vec::new(),
            funcs: Vec::new(),
            closure_count: 0,
            temp_count: 0,
        }
    }

    /// Parses the prelude, then `input` and everything it includes.
    pub fn parse_unit(&mut self, input: &str) -> PResult<()> {
        self.parse_prelude()?;
        let path = self.loader.resolve(input, None).ok_or_else(|| {
            CompileError::io(input, &std::io::Error::from(std::io::ErrorKind::NotFound))
        })?;
        self.parse_file(path.clone())?;
        self.finish_unit(&path)
    }

    pub fn into_parts(self) -> (Unit, DiagnosticBag) {
        (self.unit, self.diagnostics)
    }

    pub fn diagnostics(&self) -> &DiagnosticBag {
        &self.diagnostics
    }

    /// Where the parser currently is, for internal error reports.
    pub fn location(&self) -> (SourcePos, String) {
        let last = self
            .lexer
            .last()
            .map_or_else(|| "start of file".to_string(), Token::describe);
        (self.pos(self.lexer.line()), last)
    }

    fn parse_prelude(&mut self) -> PResult<()> {
        let saved = std::mem::replace(
            &mut self.lexer,
            Lexer::new(PRELUDE, PRELUDE_NAME, self.options.compat),
        );
        let saved_header = std::mem::replace(&mut self.header, true);
        let result = self.parse_toplevel();
        self.lexer = saved;
        self.header = saved_header;
        result
    }

    fn parse_file(&mut self, path: PathBuf) -> PResult<()> {
        log::debug!("parsing {}", path.display());
        let source = self
            .loader
            .read(&path)
            .map_err(|e| CompileError::io(path.display().to_string(), &e))?;
        let is_header = path.extension().is_some_and(|e| e == HEADER_EXT);
        let lexer = Lexer::new(&source, path.display().to_string(), self.options.compat);

        let saved_lexer = std::mem::replace(&mut self.lexer, lexer);
        let saved_file = std::mem::replace(&mut self.file, Some(path.clone()));
        let saved_header = std::mem::replace(&mut self.header, is_header);
        self.parsing.push(path.clone());

        let result = self.parse_toplevel();

        self.parsing.pop();
        self.lexer = saved_lexer;
        self.file = saved_file;
        self.header = saved_header;
        result?;
        self.parsed.insert(path);
        Ok(())
    }

    fn include(&mut self, name: &str, line: usize) -> PResult<()> {
        let Some(path) = self.loader.resolve(name, self.file.as_deref()) else {
            return Err(self.error(line, format!("File not found: {name}")));
        };
        if self.parsed.contains(&path) {
            log::trace!("`{name}` already included");
            return Ok(());
        }
        if let Some(start) = self.parsing.iter().position(|p| *p == path) {
            let chain: Vec<String> = self.parsing[start..]
                .iter()
                .chain(std::iter::once(&path))
                .map(|p| display_name(p))
                .collect();
            return Err(self.error(
                line,
                format!("Cyclic inclusion: {}", chain.join(" -> ")),
            ));
        }
        self.parse_file(path)
    }

    fn parse_toplevel(&mut self) -> PResult<()> {
        loop {
            let tok = self.next()?;
            match tok.kind {
                TokenKind::Eof => return Ok(()),
                TokenKind::Semi => {}
                TokenKind::KwUse => {
                    let name = self.expect(TokenKind::StringLit, "Expected file name after `use`")?;
                    self.include(name.text(), name.line)?;
                }
                TokenKind::KwType => self.parse_type_decl(tok.line)?,
                TokenKind::KwVar => self.parse_global_var(false, tok.line)?,
                TokenKind::KwConst => self.parse_global_var(true, tok.line)?,
                TokenKind::KwDef => self.parse_def(tok.line)?,
                _ => {
                    return Err(self.syntax_error(
                        tok.line,
                        format_expected_found(
                            "Expected top-level declaration (`use`, `type`, `var`, `const` or `def`)",
                            &tok.describe(),
                        ),
                    ));
                }
            }
        }
    }

    fn is_included_file(&self) -> bool {
        self.parsing.len() > 1
    }

    // ---- tokens ----

    fn next(&mut self) -> PResult<Token> {
        self.lexer.next_token()
    }

    fn push_back(&mut self) {
        self.lexer.push_back();
    }

    fn peek_kind(&mut self) -> PResult<TokenKind> {
        let tok = self.next()?;
        self.push_back();
        Ok(tok.kind)
    }

    fn at(&mut self, kind: TokenKind) -> PResult<bool> {
        Ok(self.peek_kind()? == kind)
    }

    fn eat(&mut self, kind: TokenKind) -> PResult<bool> {
        let tok = self.next()?;
        if tok.kind == kind {
            Ok(true)
        } else {
            self.push_back();
            Ok(false)
        }
    }

    fn expect(&mut self, kind: TokenKind, message: &str) -> PResult<Token> {
        let tok = self.next()?;
        if tok.kind == kind {
            return Ok(tok);
        }
        Err(self.syntax_error(tok.line, format_expected_found(message, &tok.describe())))
    }

    fn expect_sym(&mut self, kind: TokenKind) -> PResult<Token> {
        let message = format!("Expected `{}`", symbol(kind));
        self.expect(kind, &message)
    }

    fn expect_word(&mut self, message: &str) -> PResult<String> {
        let tok = self.expect(TokenKind::Word, message)?;
        match tok.value {
            TokenValue::Text(s) => Ok(s),
            _ => Ok(String::new()),
        }
    }

    fn line(&self) -> usize {
        self.lexer.line()
    }

    // ---- diagnostics ----

    fn pos(&self, line: usize) -> SourcePos {
        SourcePos::new(self.lexer.file().to_string(), line)
    }

    fn syntax_error(&self, line: usize, message: impl Into<String>) -> CompileError {
        CompileError::syntax(self.pos(line), message)
    }

    fn error(&self, line: usize, message: impl Into<String>) -> CompileError {
        CompileError::semantic(self.pos(line), message)
    }

    /// Reports a warning, or aborts when the category is `error` or
    /// warnings are fatal.
    fn warn(&mut self, category: Category, line: usize, message: impl Into<String>) -> PResult<()> {
        let message = message.into();
        if category == Category::Error {
            return Err(self.error(line, message));
        }
        if !self.options.warnings.is_enabled(category) {
            return Ok(());
        }
        if self.options.warnings.fatal {
            return Err(self.error(line, message));
        }
        let pos = self.pos(line);
        self.diagnostics.warning(category, message, pos);
        Ok(())
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}
