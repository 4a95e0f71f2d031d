use std::path::Path;
use std::rc::Rc;

use crate::ast::{Expr, ExprKind, Value};
use crate::diagnostic::{Category, SourcePos};
use crate::error::CompileError;
use crate::flow::{self, Flow};
use crate::token::TokenKind;
use crate::types::{Field, FunctionType, NamedType, Type};
use crate::unit::{Func, FuncId, Var, VarId, VarKind};

use super::expr::field_default;
use super::scope::FuncCtx;
use super::{PResult, Parser};

impl Parser<'_> {
    /// `type Name [< Parent] [{ field: T [= const], ... }]`
    pub(super) fn parse_type_decl(&mut self, line: usize) -> PResult<()> {
        let name = self.expect_word("Expected type name")?;
        if self.unit.get_type(&name).is_some() {
            return Err(self.error(line, format!("Type `{name}` is already defined")));
        }
        let parent = if self.eat(TokenKind::Lt)? {
            let p = self.parse_type()?;
            if !p.is_reference() || matches!(p, Type::Null | Type::ArrayOf(_) | Type::Func(_)) {
                return Err(self.error(line, format!("Type {p} cannot be extended")));
            }
            p
        } else {
            Type::Any
        };
        let inherited = parent
            .as_named()
            .filter(|n| n.is_struct())
            .map(|n| n.fields());
        let named = Rc::new(NamedType::new(name.clone(), Some(parent)));
        self.unit.define_type(name.clone(), Type::Named(named.clone()));
        log::trace!("type {name}");

        if !self.eat(TokenKind::LBrace)? {
            if let Some(fields) = inherited {
                named.set_fields(fields);
            }
            return Ok(());
        }
        let mut fields = inherited.unwrap_or_default();
        loop {
            let tok = self.next()?;
            match tok.kind {
                TokenKind::RBrace => break,
                TokenKind::Comma | TokenKind::Semi => continue,
                TokenKind::Word => {
                    let fname = tok.text().to_string();
                    if fields.iter().any(|f| f.name == fname) {
                        return Err(self.error(
                            tok.line,
                            format!("Field `{fname}` is already defined in {name}"),
                        ));
                    }
                    self.expect(TokenKind::Colon, "Expected `:` and field type")?;
                    let ty = self.parse_type()?;
                    let default = if self.eat(TokenKind::Assign)? {
                        let e = self.parse_expr()?;
                        let e = self.coerce(e, &ty)?;
                        let e = crate::optimizer::simplify_expr(&self.unit, e);
                        match e.const_value() {
                            Some(v) => Some(v.clone()),
                            None => {
                                return Err(self.error(
                                    tok.line,
                                    format!("Default value of field `{fname}` must be a constant"),
                                ));
                            }
                        }
                    } else {
                        None
                    };
                    fields.push(Field {
                        name: fname,
                        ty,
                        default,
                    });
                }
                _ => {
                    return Err(self.syntax_error(
                        tok.line,
                        crate::diagnostic::format_expected_found("Expected field name", &tok.describe()),
                    ));
                }
            }
        }
        named.set_fields(fields);
        Ok(())
    }

    /// Top-level `var`/`const`. Constants must fold; variable initializers
    /// run at the start of `main`.
    pub(super) fn parse_global_var(&mut self, is_const: bool, line: usize) -> PResult<()> {
        let name = self.expect_word("Expected variable name")?;
        if self.unit.global(&name).is_some() {
            return Err(self.error(line, format!("`{name}` is already defined")));
        }
        let annotated = self.parse_type_annotation()?;
        let init = if self.eat(TokenKind::Assign)? {
            let e = self.parse_expr()?;
            Some(self.valued(e)?)
        } else {
            None
        };
        let ty = match (annotated, &init) {
            (Some(t), _) => t,
            (None, Some(e)) if e.ty != Type::Null => e.ty.clone(),
            _ => return Err(self.error(line, format!("Cannot infer the type of `{name}`"))),
        };

        if is_const {
            let Some(init) = init else {
                return Err(self.error(line, format!("Constant `{name}` needs an initializer")));
            };
            let init = self.coerce(init, &ty)?;
            let folded = crate::optimizer::simplify_expr(&self.unit, init);
            let Some(value) = folded.const_value().cloned() else {
                return Err(self.error(
                    line,
                    format!("Initializer of constant `{name}` is not a compile-time constant"),
                ));
            };
            let mut var = Var::new(name.clone(), ty, VarKind::Global, line);
            var.constant = true;
            var.value = Some(value);
            let id = self.unit.add_var(var);
            self.unit.add_global(name, id);
            return Ok(());
        }

        if self.is_included_file() {
            self.warn(
                Category::Included,
                line,
                format!("Global variable `{name}` is declared in an included file"),
            )?;
        }
        let id = self.unit.add_var(Var::new(name.clone(), ty.clone(), VarKind::Global, line));
        self.unit.add_global(name, id);
        if let Some(init) = init {
            let init = self.coerce(init, &ty)?;
            self.unit.global_inits.push(Expr::set_var(id, init, line));
        }
        Ok(())
    }

    /// Parameter list after `(`, through the closing `)`.
    pub(super) fn parse_params(&mut self) -> PResult<Vec<(String, Type, usize)>> {
        let mut params: Vec<(String, Type, usize)> = Vec::new();
        if self.eat(TokenKind::RParen)? {
            return Ok(params);
        }
        loop {
            let name = self.expect_word("Expected parameter name")?;
            let line = self.line();
            self.expect(TokenKind::Colon, "Expected `:` and parameter type")?;
            let ty = self.parse_type()?;
            if params.iter().any(|(n, _, _)| *n == name) {
                return Err(self.error(line, format!("Duplicate parameter `{name}`")));
            }
            params.push((name, ty, line));
            if !self.eat(TokenKind::Comma)? {
                break;
            }
        }
        self.expect_sym(TokenKind::RParen)?;
        Ok(params)
    }

    /// `def name(...)`, `def Type.name(...)` or `def Type.new(...)`.
    pub(super) fn parse_def(&mut self, line: usize) -> PResult<()> {
        let first = self.expect_word("Expected function name")?;
        let (owner, name) = if self.eat(TokenKind::Dot)? {
            let Some(owner) = self.unit.get_type(&first) else {
                return Err(self.error(line, format!("Undefined type `{first}`")));
            };
            let name = self.expect_word("Expected method name")?;
            (Some(owner), name)
        } else {
            (None, first)
        };
        self.expect_sym(TokenKind::LParen)?;
        let params = self.parse_params()?;
        let annotated = self.parse_type_annotation()?;

        if let (Some(owner), "new") = (&owner, name.as_str()) {
            if annotated.is_some() {
                return Err(self.error(line, "Constructor cannot declare a return type"));
            }
            return self.parse_constructor(owner.clone(), params, line);
        }

        let ret = annotated.unwrap_or(Type::None);
        let signature = match &owner {
            Some(t) => format!("{t}.{name}"),
            None => name.clone(),
        };
        let mut types = Vec::with_capacity(params.len() + 1);
        types.extend(owner.clone());
        types.extend(params.iter().map(|(_, t, _)| t.clone()));
        let fty = Rc::new(FunctionType {
            ret: ret.clone(),
            params: types,
        });
        let f = self.declare_func(&signature, fty.clone(), line)?;
        if let Some(t) = &owner {
            self.check_operator_method(t, &name, params.len(), &ret, line)?;
        } else if name == "main" {
            self.check_main(&fty, line)?;
        }

        if !matches!(self.peek_kind()?, TokenKind::Assign | TokenKind::LBrace) {
            return Ok(());
        }
        if self.unit.func(f).is_implemented() {
            return Err(self.error(line, format!("Function `{signature}` is already defined")));
        }
        let mut ids = Vec::with_capacity(params.len() + 1);
        if let Some(t) = &owner {
            ids.push(self.new_param("this", t.clone(), line));
        }
        for (pname, pty, pline) in &params {
            ids.push(self.new_param(pname, pty.clone(), *pline));
        }
        self.unit.func_mut(f).params = ids.clone();

        self.push_function(FuncCtx::new(f, ret.clone()), &ids);
        let body = self.parse_func_body(&ret, line);
        self.pop_function();
        let body = body?;
        flow::check_body(&body, self.lexer.file())?;
        self.set_body(f, body);
        Ok(())
    }

    fn parse_func_body(&mut self, ret: &Type, line: usize) -> PResult<Expr> {
        let tok = self.next()?;
        if tok.kind == TokenKind::LBrace {
            let block = self.parse_block_body(line)?;
            return self.finish_body(block, ret);
        }
        let e = self.parse_expr()?;
        if *ret == Type::None {
            return Ok(Expr::block(Vec::new(), vec![e.into_stmt()], Type::None, line));
        }
        let e = self.valued(e)?;
        let e = self.coerce(e, ret)?;
        let e_line = e.line;
        Ok(Expr::new(ExprKind::Return(Some(Box::new(e))), Type::None, e_line))
    }

    /// Registers a function under `signature`, or returns the earlier
    /// declaration when the types agree.
    fn declare_func(&mut self, signature: &str, ty: Rc<FunctionType>, line: usize) -> PResult<FuncId> {
        if let Some(id) = self.unit.global(signature) {
            let Some(Value::Func(f)) = self.unit.var(id).value else {
                return Err(self.error(line, format!("`{signature}` is already defined as a variable")));
            };
            let old = self.unit.func(f).ty.clone();
            if *old != *ty {
                return Err(self.error(
                    line,
                    format!(
                        "Function `{signature}` redefined with a different type: was {}, now {}",
                        Type::Func(old),
                        Type::Func(ty)
                    ),
                ));
            }
            if self.header {
                self.unit.func_mut(f).shared = true;
            }
            return Ok(f);
        }
        let f = self.unit.add_func(Func {
            signature: signature.to_string(),
            ty: ty.clone(),
            params: Vec::new(),
            body: None,
            constructor: false,
            shared: self.header,
            pos: self.pos(line),
        });
        let mut var = Var::new(signature, Type::Func(ty), VarKind::Global, line);
        var.constant = true;
        var.value = Some(Value::Func(f));
        let id = self.unit.add_var(var);
        self.unit.add_global(signature, id);
        Ok(f)
    }

    fn set_body(&mut self, f: FuncId, body: Expr) {
        log::trace!("defined {}", self.unit.func(f).signature);
        self.unit.func_mut(f).body = Some(body);
        self.unit.implemented.push(f);
    }

    fn check_main(&mut self, ty: &FunctionType, line: usize) -> PResult<()> {
        let params_ok = match ty.params.as_slice() {
            [] => true,
            [Type::ArrayOf(elem)] => **elem == Type::String,
            _ => false,
        };
        let ret_ok = matches!(ty.ret, Type::None | Type::Int);
        if !params_ok || !ret_ok {
            self.warn(
                Category::Main,
                line,
                format!(
                    "Unusual signature of `main`: {}, expected `()` or `([String])` returning nothing or Int",
                    Type::Func(Rc::new(ty.clone()))
                ),
            )?;
        }
        Ok(())
    }

    /// `def T.new(params) { ... }` defines the initializer `T.<init>` and a
    /// synthesized `T.new` that allocates and initializes a `T`.
    fn parse_constructor(&mut self, owner: Type, params: Vec<(String, Type, usize)>, line: usize) -> PResult<()> {
        let Some(named) = owner.as_named().filter(|n| n.is_struct()).cloned() else {
            return Err(self.error(line, format!("Constructor of non-structure type {owner}")));
        };
        let param_types: Vec<Type> = params.iter().map(|(_, t, _)| t.clone()).collect();
        let new_sig = format!("{owner}.new");
        let new_ty = Rc::new(FunctionType {
            ret: owner.clone(),
            params: param_types.clone(),
        });
        let new_f = self.declare_func(&new_sig, new_ty, line)?;
        if !matches!(self.peek_kind()?, TokenKind::Assign | TokenKind::LBrace) {
            return Ok(());
        }
        if self.unit.func(new_f).is_implemented() {
            return Err(self.error(line, format!("Constructor `{new_sig}` is already defined")));
        }

        let mut init_types = vec![owner.clone()];
        init_types.extend(param_types);
        let init_ty = Rc::new(FunctionType {
            ret: Type::None,
            params: init_types,
        });
        let init_f = self.declare_func(&format!("{owner}.<init>"), init_ty, line)?;
        self.unit.func_mut(init_f).constructor = true;

        let this = self.new_param("this", owner.clone(), line);
        let mut ids = vec![this];
        for (pname, pty, pline) in &params {
            ids.push(self.new_param(pname, pty.clone(), *pline));
        }
        self.unit.func_mut(init_f).params = ids.clone();
        let mut ctx = FuncCtx::new(init_f, Type::None);
        ctx.constructor = true;
        self.push_function(ctx, &ids);
        let body = self.parse_constructor_body(&owner, this, line);
        self.pop_function();
        let body = body?;
        flow::check_body(&body, self.lexer.file())?;
        self.set_body(init_f, body);

        // T.new(params) = { #obj = <defaults>; T.<init>(#obj, params); return #obj }
        let new_params: Vec<VarId> = params
            .iter()
            .map(|(pname, pty, pline)| self.new_param(pname, pty.clone(), *pline))
            .collect();
        let obj = self.temp(owner.clone(), line);
        let defaults = named.fields().iter().map(|f| field_default(f, line)).collect();
        let alloc = Expr::new(ExprKind::NewStruct(defaults), owner.clone(), line);
        let mut args = vec![Expr::var(obj, owner.clone(), line)];
        args.extend(
            new_params
                .iter()
                .map(|p| Expr::var(*p, self.unit.var(*p).ty.clone(), line)),
        );
        let init_call = self.call_func(init_f, args, line)?;
        let stmts = vec![
            Expr::set_var(obj, alloc, line),
            init_call.into_stmt(),
            Expr::new(
                ExprKind::Return(Some(Box::new(Expr::var(obj, owner, line)))),
                Type::None,
                line,
            ),
        ];
        self.unit.func_mut(new_f).params = new_params;
        self.set_body(new_f, Expr::block(vec![obj], stmts, Type::None, line));
        Ok(())
    }

    fn parse_constructor_body(&mut self, owner: &Type, this: VarId, line: usize) -> PResult<Expr> {
        self.expect(TokenKind::LBrace, "Expected `{` to start constructor body")?;
        self.push_block();
        let mut stmts = Vec::new();
        let tok = self.next()?;
        let explicit_super = tok.kind == TokenKind::KwSuper
            || (self.options.compat && tok.kind == TokenKind::Word && tok.text() == "super");
        let lead = if explicit_super {
            self.expect_sym(TokenKind::LParen)?;
            let args = self.parse_args()?;
            self.super_call(owner, this, args, tok.line)
        } else {
            self.push_back();
            self.auto_super(owner, this, line)
        };
        let rest = lead.and_then(|lead| {
            stmts.extend(lead);
            self.parse_statements_into(&mut stmts)
        });
        let locals = self.pop_block();
        rest?;
        Ok(Expr::block(locals, stmts, Type::None, line))
    }

    fn parent_init(&self, owner: &Type) -> Option<FuncId> {
        let parent = owner.super_type()?;
        self.unit.find_method(&parent, "<init>")
    }

    fn super_call(&mut self, owner: &Type, this: VarId, args: Vec<Expr>, line: usize) -> PResult<Option<Expr>> {
        match self.parent_init(owner) {
            Some(init) => {
                let this = Expr::var(this, owner.clone(), line);
                Ok(Some(self.call_method(init, this, args, line)?.into_stmt()))
            }
            None if args.is_empty() => Ok(None),
            None => Err(self.error(
                line,
                format!("Parent of {owner} has no constructor taking arguments"),
            )),
        }
    }

    /// Implicit `super()` when the parent initializer takes no arguments.
    fn auto_super(&mut self, owner: &Type, this: VarId, line: usize) -> PResult<Option<Expr>> {
        let Some(init) = self.parent_init(owner) else {
            return Ok(None);
        };
        if self.unit.func(init).ty.params.len() > 1 {
            return Err(self.error(
                line,
                format!(
                    "Constructor of {owner} must call `super` with arguments for `{}`",
                    self.unit.func(init).signature
                ),
            ));
        }
        self.super_call(owner, this, Vec::new(), line)
    }

    /// Turns a falling-through trailing expression into a return, or
    /// reports the missing return.
    pub(super) fn finish_body(&mut self, body: Expr, ret: &Type) -> PResult<Expr> {
        if *ret == Type::None || flow::outcome(&body) != Flow::Next {
            return Ok(body);
        }
        if yields_value(&body) {
            return self.insert_return(body, ret);
        }
        let line = self.line();
        if !self.options.compat {
            return Err(self.error(line, "Missing return statement"));
        }
        self.warn(Category::Deprecated, line, "Missing return statement")?;
        let zero = Expr::constant(ret.zero_value(), ret.clone(), line);
        let ret_stmt = Expr::new(ExprKind::Return(Some(Box::new(zero))), Type::None, line);
        Ok(match body.kind {
            ExprKind::Block { locals, mut stmts } => {
                stmts.push(ret_stmt);
                Expr::block(locals, stmts, Type::None, body.line)
            }
            kind => {
                let body = Expr { kind, ..body };
                Expr::block(Vec::new(), vec![body, ret_stmt], Type::None, line)
            }
        })
    }

    fn insert_return(&mut self, e: Expr, ret: &Type) -> PResult<Expr> {
        if flow::outcome(&e) != Flow::Next {
            return Ok(e);
        }
        let Expr { kind, ty, line } = e;
        let kind = match kind {
            ExprKind::Discard(value) => {
                let value = self.coerce(*value, ret)?;
                ExprKind::Return(Some(Box::new(value)))
            }
            ExprKind::Block { locals, mut stmts } => {
                if let Some(last) = stmts.pop() {
                    stmts.push(self.insert_return(last, ret)?);
                }
                ExprKind::Block { locals, stmts }
            }
            ExprKind::If {
                cond,
                then,
                otherwise,
            } => ExprKind::If {
                cond,
                then: Box::new(self.insert_return(*then, ret)?),
                otherwise: Box::new(self.insert_return(*otherwise, ret)?),
            },
            ExprKind::Switch {
                key,
                cases,
                default,
            } => {
                let mut new_cases = Vec::with_capacity(cases.len());
                for mut case in cases {
                    case.body = self.insert_return(case.body, ret)?;
                    new_cases.push(case);
                }
                let default = match default {
                    Some(d) => Some(Box::new(self.insert_return(*d, ret)?)),
                    None => None,
                };
                ExprKind::Switch {
                    key,
                    cases: new_cases,
                    default,
                }
            }
            kind => kind,
        };
        Ok(Expr::new(kind, ty, line))
    }

    /// Appends global initializers to the start of `main`.
    pub(super) fn finish_unit(&mut self, input: &Path) -> PResult<()> {
        let inits = std::mem::take(&mut self.unit.global_inits);
        if let Some(first) = inits.first() {
            let main = self
                .unit
                .main_func()
                .filter(|f| self.unit.func(*f).is_implemented());
            let Some(main) = main else {
                return Err(CompileError::semantic(
                    SourcePos::new(input.display().to_string(), first.line),
                    "Global variable initializers require a `main` function",
                ));
            };
            let func = self.unit.func_mut(main);
            if let Some(body) = func.body.take() {
                let line = body.line;
                let mut stmts = inits;
                stmts.push(body);
                func.body = Some(Expr::block(Vec::new(), stmts, Type::None, line));
            }
        }
        log::debug!(
            "parsed {} function bodies, {} functions declared",
            self.unit.implemented.len(),
            self.unit.funcs.len()
        );
        Ok(())
    }
}

/// True when every path falling through ends in an expression statement
/// whose value can become the return value.
fn yields_value(e: &Expr) -> bool {
    let branch = |b: &Expr| flow::outcome(b) != Flow::Next || yields_value(b);
    match &e.kind {
        ExprKind::Discard(_) => true,
        ExprKind::Block { stmts, .. } => stmts.last().is_some_and(branch),
        ExprKind::If {
            then, otherwise, ..
        } => branch(then) && branch(otherwise),
        ExprKind::Switch {
            cases,
            default: Some(default),
            ..
        } => cases.iter().all(|c| branch(&c.body)) && branch(default),
        _ => false,
    }
}
