use crate::ast::{Expr, ExprKind, Value};
use crate::diagnostic::format_expected_found;
use crate::token::{TokenKind, TokenValue};
use crate::types::Type;
use crate::unit::{FuncId, VarId};

use super::ops::{binary_prec, field_load};
use super::{PResult, Parser};

/// Something that may appear on the left of `=`: read through `lower`,
/// written through `assign`.
#[derive(Debug, Clone)]
pub(super) enum Place {
    Value(Expr),
    Var(VarId, usize),
    Index { base: Expr, index: Expr, line: usize },
    Member { base: Expr, name: String, line: usize },
    TypeName(Type, usize),
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl Parser<'_> {
    pub(super) fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_binary(1)
    }

    fn parse_binary(&mut self, min_prec: u8) -> PResult<Expr> {
        let left = self.parse_unary()?;
        self.parse_binary_rest(left, min_prec)
    }

    /// Precedence climbing over an already parsed left operand.
    pub(super) fn parse_binary_rest(&mut self, mut left: Expr, min_prec: u8) -> PResult<Expr> {
        loop {
            let tok = self.next()?;
            let Some(prec) = binary_prec(tok.kind).filter(|p| *p >= min_prec) else {
                self.push_back();
                return Ok(left);
            };
            let right = self.parse_binary(prec + 1)?;
            left = self.binary(tok.kind, left, right, tok.line)?;
        }
    }

    pub(super) fn parse_unary(&mut self) -> PResult<Expr> {
        let place = self.parse_unary_place()?;
        self.lower(place)
    }

    pub(super) fn parse_unary_place(&mut self) -> PResult<Place> {
        let tok = self.next()?;
        match tok.kind {
            TokenKind::Minus | TokenKind::Plus | TokenKind::Bang | TokenKind::Tilde => {
                if tok.kind == TokenKind::Minus {
                    if let Some(min) = self.negated_minimum()? {
                        return Ok(Place::Value(min));
                    }
                }
                let operand = self.parse_unary()?;
                Ok(Place::Value(self.unary(tok.kind, operand, tok.line)?))
            }
            TokenKind::KwCast => {
                self.expect_sym(TokenKind::LParen)?;
                let ty = self.parse_type()?;
                self.expect_sym(TokenKind::RParen)?;
                let operand = self.parse_unary()?;
                let operand = self.valued(operand)?;
                Ok(Place::Value(self.cast_to(operand, &ty, true)?))
            }
            _ => {
                self.push_back();
                let primary = self.parse_primary()?;
                self.parse_postfix(primary)
            }
        }
    }

    /// `-2147483648` and `-9223372036854775808L`: the only places a literal
    /// of that magnitude is allowed.
    fn negated_minimum(&mut self) -> PResult<Option<Expr>> {
        let tok = self.next()?;
        let e = match (tok.kind, &tok.value) {
            (TokenKind::IntLit, TokenValue::Magnitude(_)) => Expr::int(i32::MIN, tok.line),
            (TokenKind::LongLit, TokenValue::Magnitude(_)) => {
                Expr::constant(Value::Long(i64::MIN), Type::Long, tok.line)
            }
            _ => {
                self.push_back();
                return Ok(None);
            }
        };
        Ok(Some(e))
    }

    pub(super) fn parse_args(&mut self) -> PResult<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(TokenKind::RParen)? {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if !self.eat(TokenKind::Comma)? {
                break;
            }
        }
        self.expect_sym(TokenKind::RParen)?;
        Ok(args)
    }

    fn parse_postfix(&mut self, mut place: Place) -> PResult<Place> {
        loop {
            let tok = self.next()?;
            match tok.kind {
                TokenKind::Dot => {
                    let name_tok = self.next()?;
                    place = match name_tok.kind {
                        TokenKind::KwCast => {
                            self.expect_sym(TokenKind::LParen)?;
                            let ty = self.parse_type()?;
                            self.expect_sym(TokenKind::RParen)?;
                            let value = self.lower(place)?;
                            let value = self.valued(value)?;
                            Place::Value(self.cast_to(value, &ty, true)?)
                        }
                        TokenKind::Word => {
                            let name = name_tok.text().to_string();
                            match place {
                                Place::TypeName(ty, _) => {
                                    Place::Value(self.static_member(&ty, &name, name_tok.line)?)
                                }
                                other => Place::Member {
                                    base: self.lower(other)?,
                                    name,
                                    line: name_tok.line,
                                },
                            }
                        }
                        _ => {
                            return Err(self.syntax_error(
                                name_tok.line,
                                format_expected_found("Expected member name", &name_tok.describe()),
                            ));
                        }
                    };
                }
                TokenKind::LBracket => {
                    let base = self.lower(place)?;
                    let base = self.valued(base)?;
                    let from = if self.at(TokenKind::Colon)? {
                        None
                    } else {
                        Some(self.parse_expr()?)
                    };
                    if self.eat(TokenKind::Colon)? {
                        let to = if self.at(TokenKind::RBracket)? {
                            None
                        } else {
                            Some(self.parse_expr()?)
                        };
                        self.expect_sym(TokenKind::RBracket)?;
                        let from = from.unwrap_or_else(|| Expr::int(0, tok.line));
                        place = Place::Value(self.slice(base, from, to, tok.line)?);
                    } else {
                        self.expect_sym(TokenKind::RBracket)?;
                        let Some(index) = from else {
                            return Err(self.syntax_error(tok.line, "Expected index expression"));
                        };
                        place = Place::Index {
                            base,
                            index,
                            line: tok.line,
                        };
                    }
                }
                TokenKind::LParen => {
                    let args = self.parse_args()?;
                    place = match place {
                        Place::Member { base, name, line } => {
                            Place::Value(self.method_call(base, &name, args, line)?)
                        }
                        other => {
                            let callee = self.lower(other)?;
                            Place::Value(self.call_value(callee, args, tok.line)?)
                        }
                    };
                }
                _ => {
                    self.push_back();
                    return Ok(place);
                }
            }
        }
    }

    fn parse_primary(&mut self) -> PResult<Place> {
        let tok = self.next()?;
        let line = tok.line;
        let e = match (tok.kind, tok.value) {
            (TokenKind::IntLit | TokenKind::LongLit, TokenValue::Magnitude(_)) => {
                return Err(self.error(line, "Integer number too large"));
            }
            (TokenKind::IntLit, TokenValue::Int(v)) => Expr::int(v, line),
            (TokenKind::LongLit, TokenValue::Long(v)) => Expr::constant(Value::Long(v), Type::Long, line),
            (TokenKind::FloatLit, TokenValue::Float(v)) => {
                Expr::constant(Value::Float(v), Type::Float, line)
            }
            (TokenKind::DoubleLit, TokenValue::Double(v)) => {
                Expr::constant(Value::Double(v), Type::Double, line)
            }
            (TokenKind::CharLit, TokenValue::Char(c)) => {
                Expr::constant(Value::Int(i32::from(c)), Type::Char, line)
            }
            (TokenKind::StringLit, TokenValue::Text(s)) => {
                Expr::constant(Value::Str(s.into()), Type::String, line)
            }
            (TokenKind::KwTrue, _) => Expr::bool(true, line),
            (TokenKind::KwFalse, _) => Expr::bool(false, line),
            (TokenKind::KwNull, _) => Expr::null(line),
            (TokenKind::Word, TokenValue::Text(name)) => return self.resolve_name(&name, line),
            (TokenKind::KwThis, _) => match self.lookup_local("this", line)? {
                Some(id) => return Ok(Place::Var(id, line)),
                None => return Err(self.error(line, "`this` used outside of a method")),
            },
            (TokenKind::LParen, _) => {
                let e = self.parse_expr()?;
                self.expect_sym(TokenKind::RParen)?;
                e
            }
            (TokenKind::LBrace, _) => self.parse_value_block(line)?,
            (TokenKind::KwIf, _) => self.parse_if_expr(line)?,
            (TokenKind::KwSwitch, _) => self.parse_switch(line, true)?,
            (TokenKind::KwNew, _) => self.parse_new(line)?,
            (TokenKind::LBracket, _) => self.parse_array_literal(line)?,
            (TokenKind::KwDef, _) => self.parse_closure(line)?,
            (kind, value) => {
                let found = crate::token::Token::new(kind, value, line).describe();
                return Err(self.syntax_error(line, format_expected_found("Expected expression", &found)));
            }
        };
        Ok(Place::Value(e))
    }

    fn resolve_name(&mut self, name: &str, line: usize) -> PResult<Place> {
        if let Some(id) = self.lookup_local(name, line)? {
            return Ok(Place::Var(id, line));
        }
        if let Some(id) = self.unit.global(name) {
            return Ok(Place::Var(id, line));
        }
        if let Some(ty) = self.unit.get_type(name) {
            return Ok(Place::TypeName(ty, line));
        }
        // Inside a method, bare field and method names refer to `this`.
        if self.frames.iter().any(|f| f.vars.contains_key("this")) {
            if let Some(this) = self.lookup_local("this", line)? {
                let ty = self.unit.var(this).ty.clone();
                let is_field = ty.as_named().is_some_and(|n| n.field(name).is_some());
                if is_field || self.unit.find_method(&ty, name).is_some() {
                    return Ok(Place::Member {
                        base: Expr::var(this, ty, line),
                        name: name.to_string(),
                        line,
                    });
                }
            }
        }
        Err(self.error(line, format!("Undefined name `{name}`")))
    }

    /// `T.name`: a function declared on the type itself.
    fn static_member(&mut self, ty: &Type, name: &str, line: usize) -> PResult<Expr> {
        let f = crate::unit::method_owner_key(ty)
            .and_then(|key| self.unit.func_by_signature(&format!("{key}.{name}")));
        match f {
            Some(f) => Ok(self.func_ref(f, line)),
            None => Err(self.error(line, format!("Type {ty} has no function `{name}`"))),
        }
    }

    /// Reads a place.
    pub(super) fn lower(&mut self, place: Place) -> PResult<Expr> {
        match place {
            Place::Value(e) => Ok(e),
            Place::Var(id, line) => Ok(self.read_var(id, line)),
            Place::Index { base, index, line } => self.get_index(base, index, line),
            Place::Member { base, name, line } => self.get_member(base, &name, line),
            Place::TypeName(ty, line) => Err(self.error(line, format!("Type {ty} used as a value"))),
        }
    }

    pub(super) fn read_var(&self, id: VarId, line: usize) -> Expr {
        let var = self.unit.var(id);
        match &var.value {
            Some(Value::Func(f)) => self.func_ref(*f, line),
            Some(v) if var.constant => Expr::constant(v.clone(), var.ty.clone(), line),
            _ => Expr::var(id, var.ty.clone(), line),
        }
    }

    fn accessor(&self, ty: &Type, prefix: &str, name: &str) -> Option<FuncId> {
        self.unit
            .find_method(ty, &format!("{prefix}{}", capitalize(name)))
            .or_else(|| {
                self.options
                    .compat
                    .then(|| self.unit.find_method(ty, &format!("{prefix}_{name}")))
                    .flatten()
            })
    }

    fn get_member(&mut self, base: Expr, name: &str, line: usize) -> PResult<Expr> {
        let base = self.valued(base)?;
        if matches!(base.ty, Type::ArrayOf(_) | Type::Array) && name == "len" {
            return Ok(Expr::new(ExprKind::ArrayLen(Box::new(base)), Type::Int, line));
        }
        if let Some((idx, field)) = base.ty.as_named().and_then(|n| n.field(name)) {
            return Ok(field_load(base, idx as i32, field.ty, line));
        }
        if let Some(getter) = self.accessor(&base.ty, "get", name) {
            if self.options.compat && self.unit.func(getter).method_name().starts_with("get_") {
                self.warn(
                    crate::diagnostic::Category::Deprecated,
                    line,
                    format!("Accessor `get_{name}` is deprecated, use `get{}`", capitalize(name)),
                )?;
            }
            return self.call_method(getter, base, Vec::new(), line);
        }
        if let Some(method) = self.unit.find_method(&base.ty, name) {
            return self.method_value(method, base, line);
        }
        Err(self.error(line, format!("Type {} has no member `{name}`", base.ty)))
    }

    /// `obj.method` without a call: binds `this` by partial application.
    fn method_value(&mut self, method: FuncId, base: Expr, line: usize) -> PResult<Expr> {
        let fty = self.unit.func(method).ty.clone();
        let rest = Type::func(fty.ret.clone(), fty.params.iter().skip(1).cloned().collect());
        let callee = self.func_ref(method, line);
        self.curry(callee, base, rest, "curry", line)
    }

    /// `f.curry(arg)` or `f.rcurry(arg)` typed as the remaining function type.
    pub(super) fn curry(
        &mut self,
        f: Expr,
        arg: Expr,
        rest: Type,
        binder: &str,
        line: usize,
    ) -> PResult<Expr> {
        let Some(curry) = self.unit.find_method(&Type::Function, binder) else {
            return Err(self.error(
                line,
                format!("Partial application requires `Function.{binder}`"),
            ));
        };
        let arg = self.coerce(arg, &Type::Any)?;
        let call = self.call_method(curry, f, vec![arg], line)?;
        self.cast_to(call, &rest, true)
    }

    pub(super) fn method_call(&mut self, base: Expr, name: &str, args: Vec<Expr>, line: usize) -> PResult<Expr> {
        let base = self.valued(base)?;
        if let Some((idx, field)) = base.ty.as_named().and_then(|n| n.field(name)) {
            if matches!(field.ty, Type::Func(_)) {
                let callee = field_load(base, idx as i32, field.ty, line);
                return self.call_value(callee, args, line);
            }
        }
        match self.unit.find_method(&base.ty, name) {
            Some(f) => self.call_method(f, base, args, line),
            None => Err(self.error(line, format!("Type {} has no method `{name}`", base.ty))),
        }
    }

    fn get_index(&mut self, base: Expr, index: Expr, line: usize) -> PResult<Expr> {
        if let Some(elem) = base.ty.element() {
            let index = self.coerce(index, &Type::Int)?;
            return Ok(Expr::new(
                ExprKind::ArrayLoad {
                    array: Box::new(base),
                    index: Box::new(index),
                },
                elem,
                line,
            ));
        }
        match self.unit.find_method(&base.ty, "get") {
            Some(get) => self.call_method(get, base, vec![index], line),
            None => Err(self.error(line, format!("Type {} cannot be indexed", base.ty))),
        }
    }

    /// `base[from:to]` through `range`, with `len` standing in for a
    /// missing upper bound.
    fn slice(&mut self, base: Expr, from: Expr, to: Option<Expr>, line: usize) -> PResult<Expr> {
        let Some(range) = self.unit.find_method(&base.ty, "range") else {
            return Err(self.error(line, format!("Type {} cannot be sliced", base.ty)));
        };
        let Some(to) = to else {
            let Some(len) = self.unit.find_method(&base.ty, "len") else {
                return Err(self.error(line, format!("Type {} has no method `len`", base.ty)));
            };
            let mut temps = Vec::new();
            let mut setup = Vec::new();
            let base = self.spill(base, &mut temps, &mut setup);
            let to = self.call_method(len, base.clone(), Vec::new(), line)?;
            let call = self.call_method(range, base, vec![from, to], line)?;
            if temps.is_empty() {
                return Ok(call);
            }
            let ty = call.ty.clone();
            setup.push(call);
            return Ok(Expr::block(temps, setup, ty, line));
        };
        self.call_method(range, base, vec![from, to], line)
    }

    /// Writes `value` into a place. The result is a statement.
    pub(super) fn assign(&mut self, place: Place, value: Expr, line: usize) -> PResult<Expr> {
        let value = self.valued(value)?;
        match place {
            Place::Var(id, vline) => {
                let var = self.unit.var(id);
                if var.constant {
                    return Err(self.error(vline, format!("Cannot assign to constant `{}`", var.name)));
                }
                if self.is_captured(id) {
                    return Err(self.error(
                        vline,
                        format!("Cannot assign to captured variable `{}`", var.name),
                    ));
                }
                let ty = var.ty.clone();
                let value = self.coerce(value, &ty)?;
                Ok(Expr::set_var(id, value, line))
            }
            Place::Index { base, index, line: iline } => {
                if let Some(elem) = base.ty.element() {
                    let index = self.coerce(index, &Type::Int)?;
                    let value = self.coerce(value, &elem)?;
                    return Ok(Expr::new(
                        ExprKind::ArrayStore {
                            array: Box::new(base),
                            index: Box::new(index),
                            value: Box::new(value),
                        },
                        Type::None,
                        line,
                    ));
                }
                match self.unit.find_method(&base.ty, "set") {
                    Some(set) => Ok(self.call_method(set, base, vec![index, value], iline)?.into_stmt()),
                    None => Err(self.error(iline, format!("Type {} cannot be indexed", base.ty))),
                }
            }
            Place::Member { base, name, line: mline } => {
                if let Some((idx, field)) = base.ty.as_named().and_then(|n| n.field(&name)) {
                    let value = self.coerce(value, &field.ty)?;
                    return Ok(Expr::new(
                        ExprKind::ArrayStore {
                            array: Box::new(base),
                            index: Box::new(Expr::int(idx as i32, mline)),
                            value: Box::new(value),
                        },
                        Type::None,
                        line,
                    ));
                }
                match self.accessor(&base.ty, "set", &name) {
                    Some(setter) => Ok(self.call_method(setter, base, vec![value], mline)?.into_stmt()),
                    None => Err(self.error(
                        mline,
                        format!("Cannot assign to member `{name}` of type {}", base.ty),
                    )),
                }
            }
            Place::Value(e) => Err(self.error(e.line, "Invalid assignment target")),
            Place::TypeName(ty, tline) => Err(self.error(tline, format!("Cannot assign to type {ty}"))),
        }
    }

    /// `place op= value`: the place's operands are evaluated once.
    pub(super) fn compound_assign(&mut self, place: Place, op: TokenKind, value: Expr, line: usize) -> PResult<Expr> {
        let mut temps = Vec::new();
        let mut setup = Vec::new();
        let place = match place {
            Place::Index { base, index, line } => Place::Index {
                base: self.spill(base, &mut temps, &mut setup),
                index: self.spill(index, &mut temps, &mut setup),
                line,
            },
            Place::Member { base, name, line } => Place::Member {
                base: self.spill(base, &mut temps, &mut setup),
                name,
                line,
            },
            other => other,
        };
        let current = self.lower(place.clone())?;
        let combined = self.binary(op, current, value, line)?;
        let store = self.assign(place, combined, line)?;
        if temps.is_empty() {
            return Ok(store);
        }
        setup.push(store);
        Ok(Expr::block(temps, setup, Type::None, line))
    }

    /// `{ stmts; e }` used as a value: the trailing expression is the result.
    fn parse_value_block(&mut self, line: usize) -> PResult<Expr> {
        let block = self.parse_block_body(line)?;
        let ExprKind::Block { locals, mut stmts } = block.kind else {
            return Ok(block);
        };
        let ty = match stmts.pop() {
            Some(Expr {
                kind: ExprKind::Discard(value),
                ..
            }) => {
                let ty = value.ty.clone();
                stmts.push(*value);
                ty
            }
            Some(last) => {
                let last_line = last.line;
                stmts.push(last);
                return Err(self.error(last_line, "Block expression must end with a value"));
            }
            None => return Err(self.error(line, "Block expression must end with a value")),
        };
        Ok(Expr::block(locals, stmts, ty, line))
    }

    fn parse_if_expr(&mut self, line: usize) -> PResult<Expr> {
        self.expect_sym(TokenKind::LParen)?;
        let cond = self.parse_expr()?;
        let cond = self.condition(cond)?;
        self.expect_sym(TokenKind::RParen)?;
        let then = self.parse_expr()?;
        let then = self.valued(then)?;
        if !self.eat(TokenKind::KwElse)? {
            return Err(self.error(line, "If expression without else branch"));
        }
        let otherwise = self.parse_expr()?;
        let otherwise = self.valued(otherwise)?;
        let ty = self.unify(&then.ty, &otherwise.ty);
        let then = self.coerce(then, &ty)?;
        let otherwise = self.coerce(otherwise, &ty)?;
        Ok(Expr::new(
            ExprKind::If {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
            ty,
            line,
        ))
    }

    /// Result type of branches yielding `a` and `b`.
    pub(super) fn unify(&self, a: &Type, b: &Type) -> Type {
        if a == b {
            return a.clone();
        }
        if let Some(t) = Type::promote(a, b) {
            return t;
        }
        if *a == Type::Null {
            return b.clone();
        }
        if *b == Type::Null {
            return a.clone();
        }
        a.common_supertype(b)
    }

    fn parse_new(&mut self, line: usize) -> PResult<Expr> {
        if self.eat(TokenKind::LBracket)? {
            let elem = self.parse_type()?;
            self.expect_sym(TokenKind::RBracket)?;
            let ty = Type::array_of(elem.clone());
            if self.eat(TokenKind::LBrace)? {
                let mut items = Vec::new();
                if !self.eat(TokenKind::RBrace)? {
                    loop {
                        let item = self.parse_expr()?;
                        items.push(self.coerce(item, &elem)?);
                        if !self.eat(TokenKind::Comma)? {
                            break;
                        }
                    }
                    self.expect_sym(TokenKind::RBrace)?;
                }
                return Ok(Expr::new(ExprKind::NewArrayInit(items), ty, line));
            }
            self.expect_sym(TokenKind::LParen)?;
            let len = self.parse_expr()?;
            let len = self.coerce(len, &Type::Int)?;
            self.expect_sym(TokenKind::RParen)?;
            return Ok(Expr::new(ExprKind::NewArray(Box::new(len)), ty, line));
        }

        let ty = self.parse_type()?;
        if self.eat(TokenKind::LBrace)? {
            return self.parse_struct_init(ty, line);
        }
        self.expect_sym(TokenKind::LParen)?;
        let args = self.parse_args()?;
        if let Some(ctor) = self.constructor_of(&ty) {
            return self.call_func(ctor, args, line);
        }
        let Some(fields) = ty.as_named().filter(|n| n.is_struct()).map(|n| n.fields()) else {
            return Err(self.error(line, format!("Type {ty} has no constructor")));
        };
        if args.len() > fields.len() {
            return Err(self.error(
                line,
                format!(
                    "Too many values for {ty}: expected at most {}, found {}",
                    fields.len(),
                    args.len()
                ),
            ));
        }
        let mut values = Vec::with_capacity(fields.len());
        let mut args = args.into_iter();
        for field in &fields {
            match args.next() {
                Some(arg) => values.push(self.coerce(arg, &field.ty)?),
                None => values.push(field_default(field, line)),
            }
        }
        Ok(Expr::new(ExprKind::NewStruct(values), ty, line))
    }

    pub(super) fn constructor_of(&self, ty: &Type) -> Option<FuncId> {
        let key = crate::unit::method_owner_key(ty)?;
        self.unit.func_by_signature(&format!("{key}.new"))
    }

    /// `new T { f = e, ... }`; missing fields take their defaults.
    fn parse_struct_init(&mut self, ty: Type, line: usize) -> PResult<Expr> {
        let Some(named) = ty.as_named().filter(|n| n.is_struct()).cloned() else {
            return Err(self.error(line, format!("Type {ty} is not a structure")));
        };
        let fields = named.fields();
        let mut values: Vec<Option<Expr>> = vec![None; fields.len()];
        if !self.eat(TokenKind::RBrace)? {
            loop {
                let name_line = self.line();
                let name = self.expect_word("Expected field name")?;
                self.expect_sym(TokenKind::Assign)?;
                let value = self.parse_expr()?;
                let Some((idx, field)) = named.field(&name) else {
                    return Err(self.error(name_line, format!("Type {ty} has no field `{name}`")));
                };
                if values[idx].is_some() {
                    return Err(self.error(name_line, format!("Field `{name}` is initialized twice")));
                }
                values[idx] = Some(self.coerce(value, &field.ty)?);
                if !self.eat(TokenKind::Comma)? {
                    break;
                }
            }
            self.expect_sym(TokenKind::RBrace)?;
        }
        let values = values
            .into_iter()
            .zip(&fields)
            .map(|(v, f)| v.unwrap_or_else(|| field_default(f, line)))
            .collect();
        Ok(Expr::new(ExprKind::NewStruct(values), ty, line))
    }

    fn parse_array_literal(&mut self, line: usize) -> PResult<Expr> {
        let mut items = Vec::new();
        if !self.eat(TokenKind::RBracket)? {
            loop {
                let item = self.parse_expr()?;
                items.push(self.valued(item)?);
                if !self.eat(TokenKind::Comma)? {
                    break;
                }
            }
            self.expect_sym(TokenKind::RBracket)?;
        }
        let Some(first) = items.first() else {
            return Err(self.error(line, "Cannot infer the type of an empty array literal"));
        };
        let mut elem = first.ty.clone();
        for item in &items[1..] {
            elem = self.unify(&elem, &item.ty);
        }
        if elem == Type::Null {
            elem = Type::Any;
        }
        let mut cast = Vec::with_capacity(items.len());
        for item in items {
            cast.push(self.coerce(item, &elem)?);
        }
        Ok(Expr::new(ExprKind::NewArrayInit(cast), Type::array_of(elem), line))
    }
}

/// Declared default of a field, or the zero value of its type.
pub(super) fn field_default(field: &crate::types::Field, line: usize) -> Expr {
    let value = field.default.clone().unwrap_or_else(|| field.ty.zero_value());
    Expr::constant(value, field.ty.clone(), line)
}
