use std::collections::HashMap;

use crate::ast::Expr;
use crate::diagnostic::Category;
use crate::types::Type;
use crate::unit::{FuncId, Var, VarId, VarKind};

use super::{PResult, Parser};

#[derive(Debug)]
pub(super) struct Frame {
    /// Number of enclosing function contexts when the frame was opened.
    pub depth: usize,
    pub vars: HashMap<String, VarId>,
    pub locals: Vec<VarId>,
}

/// State of the function whose body is being parsed.
#[derive(Debug)]
pub(super) struct FuncCtx {
    pub id: FuncId,
    pub ret: Type,
    pub closure: bool,
    pub constructor: bool,
    /// (outer variable, parameter standing for it) for closures.
    pub captures: Vec<(VarId, VarId)>,
}

impl FuncCtx {
    pub fn new(id: FuncId, ret: Type) -> Self {
        Self {
            id,
            ret,
            closure: false,
            constructor: false,
            captures: Vec::new(),
        }
    }
}

impl Parser<'_> {
    pub(super) fn push_function(&mut self, ctx: FuncCtx, params: &[VarId]) {
        self.funcs.push(ctx);
        let mut frame = Frame {
            depth: self.funcs.len(),
            vars: HashMap::new(),
            locals: Vec::new(),
        };
        for &p in params {
            frame.vars.insert(self.unit.var(p).name.clone(), p);
        }
        self.frames.push(frame);
    }

    pub(super) fn pop_function(&mut self) -> Option<FuncCtx> {
        self.frames.pop();
        self.funcs.pop()
    }

    pub(super) fn push_block(&mut self) {
        self.frames.push(Frame {
            depth: self.funcs.len(),
            vars: HashMap::new(),
            locals: Vec::new(),
        });
    }

    /// Closes the innermost block and returns the locals it declared.
    pub(super) fn pop_block(&mut self) -> Vec<VarId> {
        match self.frames.pop() {
            Some(frame) => frame.locals,
            None => Vec::new(),
        }
    }

    /// Declares a named local in the innermost block.
    pub(super) fn declare_local(&mut self, name: &str, ty: Type, line: usize) -> PResult<VarId> {
        let depth = self.funcs.len();
        let mut shadows = false;
        for (i, frame) in self.frames.iter().enumerate().rev() {
            if frame.depth != depth {
                break;
            }
            if frame.vars.contains_key(name) {
                if i + 1 == self.frames.len() {
                    return Err(self.error(line, format!("Variable `{name}` is already defined")));
                }
                shadows = true;
            }
        }
        if shadows || self.unit.global(name).is_some() {
            self.warn(
                Category::Hidden,
                line,
                format!("Variable `{name}` hides another variable"),
            )?;
        }
        let id = self.unit.add_var(Var::new(name, ty, VarKind::Local, line));
        if let Some(frame) = self.frames.last_mut() {
            frame.vars.insert(name.to_string(), id);
            frame.locals.push(id);
        }
        Ok(id)
    }

    /// Synthetic temporary; the caller lists it in the block it builds.
    pub(super) fn temp(&mut self, ty: Type, line: usize) -> VarId {
        self.temp_count += 1;
        let mut var = Var::new(format!("#t{}", self.temp_count), ty, VarKind::Local, line);
        var.synthetic = true;
        self.unit.add_var(var)
    }

    /// Evaluates `e` once: simple operands are reused, anything else is
    /// stored into a temporary. Returns the setup statement and the reader.
    pub(super) fn spill(&mut self, e: Expr, temps: &mut Vec<VarId>, setup: &mut Vec<Expr>) -> Expr {
        if matches!(
            e.kind,
            crate::ast::ExprKind::Var(_) | crate::ast::ExprKind::Const(_)
        ) {
            return e;
        }
        let line = e.line;
        let ty = e.ty.clone();
        let t = self.temp(ty.clone(), line);
        temps.push(t);
        setup.push(Expr::set_var(t, e, line));
        Expr::var(t, ty, line)
    }

    /// Resolves a local or captured variable by name.
    pub(super) fn lookup_local(&mut self, name: &str, line: usize) -> PResult<Option<VarId>> {
        let depth = self.funcs.len();
        let found = self
            .frames
            .iter()
            .rev()
            .find_map(|f| f.vars.get(name).map(|id| (*id, f.depth)));
        let Some((id, found_depth)) = found else {
            return Ok(None);
        };
        if found_depth == depth {
            return Ok(Some(id));
        }
        let var = self.unit.var(id);
        if var.constant && var.value.is_some() {
            return Ok(Some(id));
        }
        let ty = var.ty.clone();
        let Some(ctx) = self.funcs.last() else {
            return Ok(Some(id));
        };
        if !ctx.closure || found_depth + 1 != depth {
            return Err(self.error(
                line,
                format!(
                    "Variable `{name}` cannot be captured: a closure may only capture variables of the function directly enclosing it"
                ),
            ));
        }
        if let Some(&(_, param)) = ctx.captures.iter().find(|(outer, _)| *outer == id) {
            return Ok(Some(param));
        }
        let param = self
            .unit
            .add_var(Var::new(name, ty, VarKind::Param, line));
        if let Some(ctx) = self.funcs.last_mut() {
            ctx.captures.push((id, param));
        }
        Ok(Some(param))
    }

    pub(super) fn is_captured(&self, id: VarId) -> bool {
        self.funcs
            .last()
            .is_some_and(|ctx| ctx.captures.iter().any(|(_, p)| *p == id))
    }

    pub(super) fn current_func(&self) -> Option<&FuncCtx> {
        self.funcs.last()
    }
}
