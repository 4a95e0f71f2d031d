use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

use crate::ast::{BinaryOp, CmpOp, Expr, ExprKind, SwitchCase, Value};
use crate::token::TokenKind;
use crate::types::Type;

use super::ops::field_load;
use super::{PResult, Parser};

/// Largest number of keys a single `a..b` case label may expand to.
pub const MAX_CASE_RANGE: i64 = 65536;

/// Hash of a string as computed by `String.hash()` at run time:
/// `h = 31 * h + c` over UTF-16 code units, wrapping.
pub fn string_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(i32::from(c)))
}

enum Label {
    Int(i32),
    Range(i32, i32),
    Str(Rc<str>),
}

impl Parser<'_> {
    /// `for (init; cond; step) body` or `for (var x in coll) body`.
    pub(super) fn parse_for(&mut self, line: usize) -> PResult<Expr> {
        self.expect_sym(TokenKind::LParen)?;
        self.push_block();
        let result = self.parse_for_inner(line);
        let locals = self.pop_block();
        let (mut stmts, mut temps) = result?;
        let mut all = locals;
        all.append(&mut temps);
        if stmts.len() == 1 && all.is_empty() {
            if let Some(only) = stmts.pop() {
                return Ok(only);
            }
        }
        Ok(Expr::block(all, stmts, Type::None, line))
    }

    fn parse_for_inner(&mut self, line: usize) -> PResult<(Vec<Expr>, Vec<crate::unit::VarId>)> {
        let init = match self.peek_kind()? {
            TokenKind::Semi | TokenKind::Comma => Expr::noop(line),
            TokenKind::KwVar | TokenKind::KwConst => {
                let is_const = self.next()?.kind == TokenKind::KwConst;
                let var_line = self.line();
                let name = self.expect_word("Expected variable name")?;
                if self.eat(TokenKind::KwIn)? {
                    return self.parse_for_in(&name, var_line, line);
                }
                self.parse_local_rest(is_const, &name, var_line)?
            }
            _ => self.parse_simple_statement()?,
        };
        self.expect_separator()?;
        let cond = if matches!(self.peek_kind()?, TokenKind::Semi | TokenKind::Comma) {
            Expr::bool(true, line)
        } else {
            let c = self.parse_expr()?;
            self.condition(c)?
        };
        self.expect_separator()?;
        let step = if self.at(TokenKind::RParen)? {
            Expr::noop(line)
        } else {
            self.parse_simple_statement()?
        };
        self.expect_sym(TokenKind::RParen)?;
        let body = self.parse_statement()?.into_stmt();
        let l = Self::make_loop(Expr::noop(line), cond, body, step, line);
        Ok((vec![init, l], Vec::new()))
    }

    fn expect_separator(&mut self) -> PResult<()> {
        if self.eat(TokenKind::Comma)? {
            return Ok(());
        }
        self.expect(TokenKind::Semi, "Expected `;` in for statement")?;
        Ok(())
    }

    fn parse_for_in(
        &mut self,
        name: &str,
        var_line: usize,
        line: usize,
    ) -> PResult<(Vec<Expr>, Vec<crate::unit::VarId>)> {
        let coll = self.parse_expr()?;
        let coll = self.valued(coll)?;
        self.expect_sym(TokenKind::RParen)?;
        let mut temps = Vec::new();
        let mut setup = Vec::new();

        let bound = if coll.ty == self.unit.int_range() {
            Some(Type::Int)
        } else if coll.ty == self.unit.long_range() {
            Some(Type::Long)
        } else {
            None
        };
        if let Some(bound) = bound {
            let (from, to) = match coll.kind {
                ExprKind::NewStruct(fields) if fields.len() == 2 => {
                    let mut it = fields.into_iter();
                    match (it.next(), it.next()) {
                        (Some(from), Some(to)) => (from, to),
                        _ => return Err(self.error(line, "Malformed range")),
                    }
                }
                kind => {
                    let r = self.spill(Expr { kind, ..coll }, &mut temps, &mut setup);
                    (
                        field_load(r.clone(), 0, bound.clone(), line),
                        field_load(r, 1, bound.clone(), line),
                    )
                }
            };
            let x = self.declare_local(name, bound.clone(), var_line)?;
            setup.push(Expr::set_var(x, from, line));
            let to = if to.const_value().is_some() {
                to
            } else {
                let t = self.temp(bound.clone(), line);
                temps.push(t);
                setup.push(Expr::set_var(t, to, line));
                Expr::var(t, bound.clone(), line)
            };
            let xv = Expr::var(x, bound.clone(), line);
            let cond = Expr::new(
                ExprKind::Compare {
                    op: CmpOp::Le,
                    left: Box::new(xv.clone()),
                    right: Box::new(to),
                },
                Type::Bool,
                line,
            );
            let one = if bound == Type::Long {
                Expr::constant(Value::Long(1), Type::Long, line)
            } else {
                Expr::int(1, line)
            };
            let next = Expr::new(
                ExprKind::Binary {
                    op: BinaryOp::Add,
                    left: Box::new(xv),
                    right: Box::new(one),
                },
                bound,
                line,
            );
            let step = Expr::set_var(x, next, line);
            let body = self.parse_statement()?.into_stmt();
            setup.push(Self::make_loop(Expr::noop(line), cond, body, step, line));
            return Ok((setup, temps));
        }

        let Some(elem) = coll.ty.element() else {
            return Err(self.error(line, format!("Cannot iterate over a value of type {}", coll.ty)));
        };
        let arr = self.spill(coll, &mut temps, &mut setup);
        let len = Expr::new(ExprKind::ArrayLen(Box::new(arr.clone())), Type::Int, line);
        let len_var = self.temp(Type::Int, line);
        temps.push(len_var);
        setup.push(Expr::set_var(len_var, len, line));
        let idx = self.temp(Type::Int, line);
        temps.push(idx);
        setup.push(Expr::set_var(idx, Expr::int(0, line), line));
        let idx_v = Expr::var(idx, Type::Int, line);

        let x = self.declare_local(name, elem.clone(), var_line)?;
        let load = Expr::new(
            ExprKind::ArrayLoad {
                array: Box::new(arr),
                index: Box::new(idx_v.clone()),
            },
            elem,
            line,
        );
        let cond = Expr::new(
            ExprKind::Compare {
                op: CmpOp::Lt,
                left: Box::new(idx_v.clone()),
                right: Box::new(Expr::var(len_var, Type::Int, line)),
            },
            Type::Bool,
            line,
        );
        let step = Expr::set_var(
            idx,
            Expr::new(
                ExprKind::Binary {
                    op: BinaryOp::Add,
                    left: Box::new(idx_v),
                    right: Box::new(Expr::int(1, line)),
                },
                Type::Int,
                line,
            ),
            line,
        );
        let inner = self.parse_statement()?.into_stmt();
        let body = Expr::block(
            Vec::new(),
            vec![Expr::set_var(x, load, line), inner],
            Type::None,
            line,
        );
        setup.push(Self::make_loop(Expr::noop(line), cond, body, step, line));
        Ok((setup, temps))
    }

    /// `switch (key) { labels: body ... else: body }`. As an expression
    /// every branch yields a value and `else` is required.
    pub(super) fn parse_switch(&mut self, line: usize, is_value: bool) -> PResult<Expr> {
        self.expect_sym(TokenKind::LParen)?;
        let key = self.parse_expr()?;
        let key = self.valued(key)?;
        self.expect_sym(TokenKind::RParen)?;
        self.expect_sym(TokenKind::LBrace)?;

        let string_keys = key.ty == Type::String;
        if !string_keys && !(key.ty.is_int_like() && key.ty != Type::Bool) {
            return Err(self.error(
                line,
                format!("Switch key must be an integer or a String, found {}", key.ty),
            ));
        }

        let mut arms: Vec<(Vec<Label>, Expr, usize)> = Vec::new();
        let mut default: Option<Expr> = None;
        loop {
            let tok = self.next()?;
            match tok.kind {
                TokenKind::RBrace => break,
                TokenKind::Semi => continue,
                TokenKind::KwElse => {
                    self.expect_sym(TokenKind::Colon)?;
                    if default.is_some() {
                        return Err(self.error(tok.line, "Duplicate else branch in switch"));
                    }
                    default = Some(self.parse_arm_body(is_value)?);
                }
                _ => {
                    self.push_back();
                    let mut labels = Vec::new();
                    loop {
                        labels.push(self.parse_case_label(string_keys)?);
                        if !self.eat(TokenKind::Comma)? {
                            break;
                        }
                    }
                    self.expect_sym(TokenKind::Colon)?;
                    let body = self.parse_arm_body(is_value)?;
                    arms.push((labels, body, tok.line));
                }
            }
        }
        if is_value && default.is_none() {
            return Err(self.error(line, "Switch expression without else branch"));
        }

        let ty = if is_value {
            let mut ty: Option<Type> = None;
            for body in arms.iter().map(|(_, b, _)| b).chain(default.iter()) {
                ty = Some(match ty {
                    None => body.ty.clone(),
                    Some(t) => self.unify(&t, &body.ty),
                });
            }
            ty.unwrap_or(Type::None)
        } else {
            Type::None
        };
        let mut cast_arms = Vec::with_capacity(arms.len());
        for (labels, body, arm_line) in arms {
            cast_arms.push((labels, self.coerce(body, &ty)?, arm_line));
        }
        let default = match default {
            Some(d) => Some(self.coerce(d, &ty)?),
            None => None,
        };

        if string_keys {
            self.string_switch(key, cast_arms, default, ty, line)
        } else {
            let key = self.coerce(key, &Type::Int)?;
            self.int_switch(key, cast_arms, default, ty, line)
        }
    }

    fn parse_arm_body(&mut self, is_value: bool) -> PResult<Expr> {
        if is_value {
            let e = self.parse_expr()?;
            return self.valued(e);
        }
        Ok(self.parse_statement()?.into_stmt())
    }

    fn parse_case_label(&mut self, string_keys: bool) -> PResult<Label> {
        let line = self.line();
        let e = self.parse_expr()?;
        let e = crate::optimizer::simplify_expr(&self.unit, e);
        match (&e.kind, string_keys) {
            (ExprKind::Const(Value::Str(s)), true) => Ok(Label::Str(s.clone())),
            (ExprKind::Const(Value::Int(v)), false) if e.ty.is_int_like() => Ok(Label::Int(*v)),
            (ExprKind::NewStruct(bounds), false) if e.ty == self.unit.int_range() => {
                match (bounds[0].const_value(), bounds[1].const_value()) {
                    (Some(Value::Int(from)), Some(Value::Int(to))) => {
                        if from > to {
                            return Err(self.error(line, format!("Invalid range in case label: {from}..{to}")));
                        }
                        if i64::from(*to) - i64::from(*from) >= MAX_CASE_RANGE {
                            return Err(self.error(line, format!("Case range {from}..{to} is too large")));
                        }
                        Ok(Label::Range(*from, *to))
                    }
                    _ => Err(self.error(line, "Case label must be a constant")),
                }
            }
            _ if string_keys => Err(self.error(line, "Case label must be a constant String")),
            _ => Err(self.error(line, "Case label must be a constant integer or range")),
        }
    }

    fn int_switch(
        &mut self,
        key: Expr,
        arms: Vec<(Vec<Label>, Expr, usize)>,
        default: Option<Expr>,
        ty: Type,
        line: usize,
    ) -> PResult<Expr> {
        let mut seen = HashSet::new();
        let mut cases = Vec::with_capacity(arms.len());
        for (labels, body, arm_line) in arms {
            let mut keys = Vec::new();
            for label in labels {
                let (from, to) = match label {
                    Label::Int(v) => (v, v),
                    Label::Range(a, b) => (a, b),
                    Label::Str(_) => return Err(self.error(arm_line, "Case label must be an integer")),
                };
                for k in from..=to {
                    if !seen.insert(k) {
                        return Err(self.error(arm_line, format!("Duplicate case label: {k}")));
                    }
                    keys.push(k);
                }
            }
            cases.push(SwitchCase { keys, body });
        }
        Ok(Expr::new(
            ExprKind::Switch {
                key: Box::new(key),
                cases,
                default: default.map(Box::new),
            },
            ty,
            line,
        ))
    }

    /// Dispatches on `key.hash()` first, settles collisions with an
    /// equality chain, then switches on the chosen branch number.
    fn string_switch(
        &mut self,
        key: Expr,
        arms: Vec<(Vec<Label>, Expr, usize)>,
        default: Option<Expr>,
        ty: Type,
        line: usize,
    ) -> PResult<Expr> {
        let Some(hash) = self.unit.find_method(&Type::String, "hash") else {
            return Err(self.error(line, "String switch requires `String.hash`"));
        };
        let key_var = self.temp(Type::String, line);
        let branch = self.temp(Type::Int, line);
        let key_v = Expr::var(key_var, Type::String, line);
        let mut stmts = vec![
            Expr::set_var(key_var, key, line),
            Expr::set_var(branch, Expr::int(-1, line), line),
        ];

        let mut seen: HashSet<Rc<str>> = HashSet::new();
        let mut buckets: BTreeMap<i32, Vec<(Rc<str>, i32)>> = BTreeMap::new();
        let mut second = Vec::with_capacity(arms.len());
        for (n, (labels, body, arm_line)) in arms.into_iter().enumerate() {
            let n = n as i32;
            for label in labels {
                let Label::Str(s) = label else {
                    return Err(self.error(arm_line, "Case label must be a String"));
                };
                if !seen.insert(s.clone()) {
                    return Err(self.error(arm_line, format!("Duplicate case label: {s:?}")));
                }
                buckets.entry(string_hash(&s)).or_default().push((s, n));
            }
            second.push(SwitchCase {
                keys: vec![n],
                body,
            });
        }

        let mut first = Vec::with_capacity(buckets.len());
        for (h, entries) in buckets {
            let mut chain = Expr::noop(line);
            for (s, n) in entries.into_iter().rev() {
                let lit = Expr::constant(Value::Str(s), Type::String, line);
                let test = self.binary(TokenKind::EqEq, key_v.clone(), lit, line)?;
                chain = Expr::new(
                    ExprKind::If {
                        cond: Box::new(test),
                        then: Box::new(Expr::set_var(branch, Expr::int(n, line), line)),
                        otherwise: Box::new(chain),
                    },
                    Type::None,
                    line,
                );
            }
            first.push(SwitchCase {
                keys: vec![h],
                body: chain,
            });
        }
        let hashed = self.call_method(hash, key_v, Vec::new(), line)?;
        let hashed = self.coerce(hashed, &Type::Int)?;
        stmts.push(Expr::new(
            ExprKind::Switch {
                key: Box::new(hashed),
                cases: first,
                default: None,
            },
            Type::None,
            line,
        ));
        stmts.push(Expr::new(
            ExprKind::Switch {
                key: Box::new(Expr::var(branch, Type::Int, line)),
                cases: second,
                default: default.map(Box::new),
            },
            ty.clone(),
            line,
        ));
        Ok(Expr::block(vec![key_var, branch], stmts, ty, line))
    }
}
