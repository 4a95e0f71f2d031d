use crate::ast::{BinaryOp, CmpOp, Expr, ExprKind, LogicOp, UnaryOp, Value};
use crate::diagnostic::Category;
use crate::token::{TokenKind, symbol};
use crate::types::Type;
use crate::unit::FuncId;

use super::{PResult, Parser};

/// Method names that overload operators, with their parameter count
/// (excluding `this`) and required result type.
const OPERATOR_METHODS: [(&str, usize, Option<Type>); 16] = [
    ("add", 1, None),
    ("sub", 1, None),
    ("mul", 1, None),
    ("div", 1, None),
    ("mod", 1, None),
    ("and", 1, None),
    ("or", 1, None),
    ("xor", 1, None),
    ("shl", 1, None),
    ("shr", 1, None),
    ("ushr", 1, None),
    ("cmp", 1, Some(Type::Int)),
    ("eq", 1, Some(Type::Bool)),
    ("minus", 0, None),
    ("not", 0, None),
    ("contains", 1, Some(Type::Bool)),
];

pub(super) fn binary_prec(kind: TokenKind) -> Option<u8> {
    let prec = match kind {
        TokenKind::OrOr => 1,
        TokenKind::AndAnd => 2,
        TokenKind::Pipe => 3,
        TokenKind::Caret => 4,
        TokenKind::Amp => 5,
        TokenKind::EqEq | TokenKind::Neq => 6,
        TokenKind::Lt | TokenKind::Lte | TokenKind::Gt | TokenKind::Gte | TokenKind::KwIn => 7,
        TokenKind::Range => 8,
        TokenKind::Shl | TokenKind::Shr | TokenKind::Ushr => 9,
        TokenKind::Plus | TokenKind::Minus => 10,
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => 11,
        _ => return None,
    };
    Some(prec)
}

fn arith_op(kind: TokenKind) -> Option<(BinaryOp, &'static str)> {
    let op = match kind {
        TokenKind::Plus => (BinaryOp::Add, "add"),
        TokenKind::Minus => (BinaryOp::Sub, "sub"),
        TokenKind::Star => (BinaryOp::Mul, "mul"),
        TokenKind::Slash => (BinaryOp::Div, "div"),
        TokenKind::Percent => (BinaryOp::Mod, "mod"),
        TokenKind::Amp => (BinaryOp::And, "and"),
        TokenKind::Pipe => (BinaryOp::Or, "or"),
        TokenKind::Caret => (BinaryOp::Xor, "xor"),
        TokenKind::Shl => (BinaryOp::Shl, "shl"),
        TokenKind::Shr => (BinaryOp::Shr, "shr"),
        TokenKind::Ushr => (BinaryOp::Ushr, "ushr"),
        _ => return None,
    };
    Some(op)
}

fn cmp_op(kind: TokenKind) -> Option<CmpOp> {
    let op = match kind {
        TokenKind::EqEq => CmpOp::Eq,
        TokenKind::Neq => CmpOp::Ne,
        TokenKind::Lt => CmpOp::Lt,
        TokenKind::Lte => CmpOp::Le,
        TokenKind::Gt => CmpOp::Gt,
        TokenKind::Gte => CmpOp::Ge,
        _ => return None,
    };
    Some(op)
}

impl Parser<'_> {
    pub(super) fn func_ref(&self, f: FuncId, line: usize) -> Expr {
        let ty = Type::Func(self.unit.func(f).ty.clone());
        Expr::constant(Value::Func(f), ty, line)
    }

    pub(super) fn call_value(&mut self, callee: Expr, args: Vec<Expr>, line: usize) -> PResult<Expr> {
        let Type::Func(fty) = callee.ty.clone() else {
            return Err(self.error(line, format!("Cannot call a value of type {}", callee.ty)));
        };
        if fty.params.len() != args.len() {
            return Err(self.error(
                line,
                format!(
                    "Wrong number of arguments: expected {}, found {}",
                    fty.params.len(),
                    args.len()
                ),
            ));
        }
        let mut cast_args = Vec::with_capacity(args.len());
        for (arg, param) in args.into_iter().zip(fty.params.iter()) {
            let arg = self.valued(arg)?;
            cast_args.push(self.coerce(arg, param)?);
        }
        Ok(Expr::new(
            ExprKind::Call {
                callee: Box::new(callee),
                args: cast_args,
            },
            fty.ret.clone(),
            line,
        ))
    }

    pub(super) fn call_func(&mut self, f: FuncId, args: Vec<Expr>, line: usize) -> PResult<Expr> {
        let callee = self.func_ref(f, line);
        self.call_value(callee, args, line)
    }

    pub(super) fn call_method(
        &mut self,
        f: FuncId,
        this: Expr,
        mut args: Vec<Expr>,
        line: usize,
    ) -> PResult<Expr> {
        let expected = self.unit.func(f).ty.params.len().saturating_sub(1);
        if expected != args.len() {
            return Err(self.error(
                line,
                format!(
                    "Wrong number of arguments for `{}`: expected {expected}, found {}",
                    self.unit.func(f).signature,
                    args.len()
                ),
            ));
        }
        args.insert(0, this);
        self.call_func(f, args, line)
    }

    /// Calls operator method `name` on `base`, if its type defines one.
    fn overload(&mut self, name: &str, base: Expr, args: Vec<Expr>, line: usize) -> PResult<Option<Expr>> {
        match self.unit.find_method(&base.ty, name) {
            Some(f) => Ok(Some(self.call_method(f, base, args, line)?)),
            None => Ok(None),
        }
    }

    fn overloaded_binary(
        &mut self,
        kind: TokenKind,
        name: &str,
        left: Expr,
        right: Expr,
        line: usize,
    ) -> PResult<Expr> {
        let (lt, rt) = (left.ty.clone(), right.ty.clone());
        match self.overload(name, left, vec![right], line)? {
            Some(e) => Ok(e),
            None => Err(self.error(
                line,
                format!(
                    "Operator `{}` cannot be applied to {lt} and {rt}",
                    symbol(kind)
                ),
            )),
        }
    }

    pub(super) fn binary(&mut self, kind: TokenKind, left: Expr, right: Expr, line: usize) -> PResult<Expr> {
        let left = self.valued(left)?;
        let right = self.valued(right)?;
        match kind {
            TokenKind::AndAnd | TokenKind::OrOr => {
                let op = if kind == TokenKind::AndAnd {
                    LogicOp::And
                } else {
                    LogicOp::Or
                };
                if left.ty != Type::Bool || right.ty != Type::Bool {
                    return Err(self.error(
                        line,
                        format!(
                            "Operator `{}` cannot be applied to {} and {}",
                            symbol(kind),
                            left.ty,
                            right.ty
                        ),
                    ));
                }
                Ok(Expr::new(
                    ExprKind::Logic {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    Type::Bool,
                    line,
                ))
            }
            TokenKind::Plus if left.ty == Type::String || right.ty == Type::String => {
                self.concat(left, right, line)
            }
            TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Star
            | TokenKind::Slash
            | TokenKind::Percent => self.arith(kind, left, right, line),
            TokenKind::Amp | TokenKind::Pipe | TokenKind::Caret => self.bitwise(kind, left, right, line),
            TokenKind::Shl | TokenKind::Shr | TokenKind::Ushr => self.shift(kind, left, right, line),
            TokenKind::EqEq | TokenKind::Neq => self.equality(kind == TokenKind::Neq, left, right, line),
            TokenKind::Lt | TokenKind::Lte | TokenKind::Gt | TokenKind::Gte => {
                self.relational(kind, left, right, line)
            }
            TokenKind::KwIn => self.contains(left, right, line),
            TokenKind::Range => self.range(left, right, line),
            _ => Err(self.syntax_error(line, format!("Unexpected operator {}", symbol(kind)))),
        }
    }

    fn arith(&mut self, kind: TokenKind, left: Expr, right: Expr, line: usize) -> PResult<Expr> {
        let Some((op, name)) = arith_op(kind) else {
            return Err(self.syntax_error(line, "Unexpected operator"));
        };
        if let Some(t) = Type::promote(&left.ty, &right.ty) {
            return self.numeric_binary(op, t, left, right, line);
        }
        self.overloaded_binary(kind, name, left, right, line)
    }

    fn numeric_binary(&mut self, op: BinaryOp, t: Type, left: Expr, right: Expr, line: usize) -> PResult<Expr> {
        let left = self.coerce(left, &t)?;
        let right = self.coerce(right, &t)?;
        Ok(Expr::new(
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            t,
            line,
        ))
    }

    fn bitwise(&mut self, kind: TokenKind, left: Expr, right: Expr, line: usize) -> PResult<Expr> {
        let Some((op, name)) = arith_op(kind) else {
            return Err(self.syntax_error(line, "Unexpected operator"));
        };
        if left.ty == Type::Bool && right.ty == Type::Bool {
            return Ok(Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                Type::Bool,
                line,
            ));
        }
        if left.ty.is_integral() && right.ty.is_integral() {
            if let Some(t) = Type::promote(&left.ty, &right.ty) {
                return self.numeric_binary(op, t, left, right, line);
            }
        }
        self.overloaded_binary(kind, name, left, right, line)
    }

    fn shift(&mut self, kind: TokenKind, left: Expr, right: Expr, line: usize) -> PResult<Expr> {
        let Some((op, name)) = arith_op(kind) else {
            return Err(self.syntax_error(line, "Unexpected operator"));
        };
        if left.ty.is_integral() {
            if !right.ty.is_integral() {
                return Err(self.error(
                    line,
                    format!("Shift count must be an integer, found {}", right.ty),
                ));
            }
            let t = if left.ty == Type::Long {
                Type::Long
            } else {
                Type::Int
            };
            let left = self.coerce(left, &t)?;
            let right = self.cast_to(right, &Type::Int, true)?;
            return Ok(Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                t,
                line,
            ));
        }
        self.overloaded_binary(kind, name, left, right, line)
    }

    fn compare(op: CmpOp, left: Expr, right: Expr, line: usize) -> Expr {
        Expr::new(
            ExprKind::Compare {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            Type::Bool,
            line,
        )
    }

    fn equality(&mut self, negate: bool, left: Expr, right: Expr, line: usize) -> PResult<Expr> {
        let op = if negate { CmpOp::Ne } else { CmpOp::Eq };
        if let Some(t) = Type::promote(&left.ty, &right.ty) {
            let left = self.coerce(left, &t)?;
            let right = self.coerce(right, &t)?;
            return Ok(Self::compare(op, left, right, line));
        }
        if left.ty == Type::Bool && right.ty == Type::Bool {
            return Ok(Self::compare(op, left, right, line));
        }
        if !left.ty.is_reference() || !right.ty.is_reference() {
            // A primitive only compares with Any, by value identity.
            if left.ty == Type::Any || right.ty == Type::Any {
                let left = self.coerce(left, &Type::Any)?;
                let right = self.coerce(right, &Type::Any)?;
                return Ok(Self::compare(op, left, right, line));
            }
            return Err(self.error(
                line,
                format!("Incomparable types {} and {}", left.ty, right.ty),
            ));
        }
        if left.ty == Type::Null || right.ty == Type::Null {
            return Ok(Self::compare(op, left, right, line));
        }
        if let Some(eq) = self.unit.find_method(&left.ty, "eq") {
            return self.null_safe_eq(eq, negate, left, right, line);
        }
        if left.ty.is_subtype_of(&right.ty) || right.ty.is_subtype_of(&left.ty) {
            return Ok(Self::compare(op, left, right, line));
        }
        Err(self.error(
            line,
            format!("Incomparable types {} and {}", left.ty, right.ty),
        ))
    }

    /// `l == r` through an `eq` method, never calling it on null or with null:
    /// `{ #l = l; #r = r; if (#l == null) #r == null else if (#r == null) false else #l.eq(#r) }`.
    fn null_safe_eq(&mut self, eq: FuncId, negate: bool, left: Expr, right: Expr, line: usize) -> PResult<Expr> {
        let mut temps = Vec::new();
        let mut setup = Vec::new();
        let literal_left = matches!(left.const_value(), Some(v) if *v != Value::Null);
        let literal_right = matches!(right.const_value(), Some(v) if *v != Value::Null);
        let l = self.spill(left, &mut temps, &mut setup);
        let r = self.spill(right, &mut temps, &mut setup);
        let call = self.call_method(eq, l.clone(), vec![r.clone()], line)?;
        let call = self.coerce(call, &Type::Bool)?;
        let mut test = if literal_right {
            call
        } else {
            Expr::new(
                ExprKind::If {
                    cond: Box::new(Self::compare(CmpOp::Eq, r.clone(), Expr::null(line), line)),
                    then: Box::new(Expr::constant(Value::Bool(false), Type::Bool, line)),
                    otherwise: Box::new(call),
                },
                Type::Bool,
                line,
            )
        };
        if !literal_left {
            let l_null = Self::compare(CmpOp::Eq, l, Expr::null(line), line);
            let r_null = Self::compare(CmpOp::Eq, r, Expr::null(line), line);
            test = Expr::new(
                ExprKind::If {
                    cond: Box::new(l_null),
                    then: Box::new(r_null),
                    otherwise: Box::new(test),
                },
                Type::Bool,
                line,
            );
        }
        if negate {
            test = Expr::new(
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(test),
                },
                Type::Bool,
                line,
            );
        }
        if temps.is_empty() {
            return Ok(test);
        }
        setup.push(test);
        Ok(Expr::block(temps, setup, Type::Bool, line))
    }

    fn relational(&mut self, kind: TokenKind, left: Expr, right: Expr, line: usize) -> PResult<Expr> {
        let Some(op) = cmp_op(kind) else {
            return Err(self.syntax_error(line, "Unexpected operator"));
        };
        if let Some(t) = Type::promote(&left.ty, &right.ty) {
            let left = self.coerce(left, &t)?;
            let right = self.coerce(right, &t)?;
            return Ok(Self::compare(op, left, right, line));
        }
        let (lt, rt) = (left.ty.clone(), right.ty.clone());
        match self.overload("cmp", left, vec![right], line)? {
            Some(call) => {
                let call = self.coerce(call, &Type::Int)?;
                Ok(Self::compare(op, call, Expr::int(0, line), line))
            }
            None => Err(self.error(
                line,
                format!("Operator `{}` cannot be applied to {lt} and {rt}", symbol(kind)),
            )),
        }
    }

    /// `x in coll`: inline bounds check for ranges, `contains` otherwise.
    fn contains(&mut self, item: Expr, coll: Expr, line: usize) -> PResult<Expr> {
        let bound = if coll.ty == self.unit.int_range() {
            Some(Type::Int)
        } else if coll.ty == self.unit.long_range() {
            Some(Type::Long)
        } else {
            None
        };
        let Some(bound) = bound else {
            let (it, ct) = (item.ty.clone(), coll.ty.clone());
            return match self.overload("contains", coll, vec![item], line)? {
                Some(call) => self.coerce(call, &Type::Bool),
                None => Err(self.error(
                    line,
                    format!("Operator `in` cannot be applied to {it} and {ct}"),
                )),
            };
        };
        if !item.ty.is_integral() {
            return Err(self.error(
                line,
                format!("Operator `in` cannot be applied to {} and {}", item.ty, coll.ty),
            ));
        }
        let t = Type::promote(&item.ty, &bound).unwrap_or(bound.clone());
        let mut temps = Vec::new();
        let mut setup = Vec::new();
        let x = self.coerce(item, &t)?;
        let x = self.spill(x, &mut temps, &mut setup);
        let (from, to) = match coll.kind {
            ExprKind::NewStruct(mut fields) if fields.len() == 2 => {
                let to = fields.pop().unwrap_or_else(|| Expr::int(0, line));
                let from = fields.pop().unwrap_or_else(|| Expr::int(0, line));
                (from, to)
            }
            kind => {
                let coll = Expr { kind, ..coll };
                let r = self.spill(coll, &mut temps, &mut setup);
                (
                    field_load(r.clone(), 0, bound.clone(), line),
                    field_load(r, 1, bound.clone(), line),
                )
            }
        };
        let from = self.coerce(from, &t)?;
        let to = self.coerce(to, &t)?;
        let low = Self::compare(CmpOp::Le, from, x.clone(), line);
        let high = Self::compare(CmpOp::Le, x, to, line);
        let test = Expr::new(
            ExprKind::Logic {
                op: LogicOp::And,
                left: Box::new(low),
                right: Box::new(high),
            },
            Type::Bool,
            line,
        );
        if temps.is_empty() {
            return Ok(test);
        }
        setup.push(test);
        Ok(Expr::block(temps, setup, Type::Bool, line))
    }

    /// `a..b` builds an IntRange, or a LongRange when either bound is Long.
    fn range(&mut self, from: Expr, to: Expr, line: usize) -> PResult<Expr> {
        if !from.ty.is_integral() || !to.ty.is_integral() {
            return Err(self.error(
                line,
                format!("Range bounds must be integers, found {} and {}", from.ty, to.ty),
            ));
        }
        let (bound, ty) = if from.ty == Type::Long || to.ty == Type::Long {
            (Type::Long, self.unit.long_range())
        } else {
            (Type::Int, self.unit.int_range())
        };
        let from = self.coerce(from, &bound)?;
        let to = self.coerce(to, &bound)?;
        Ok(Expr::new(ExprKind::NewStruct(vec![from, to]), ty, line))
    }

    pub(super) fn unary(&mut self, kind: TokenKind, operand: Expr, line: usize) -> PResult<Expr> {
        let operand = self.valued(operand)?;
        let ty = operand.ty.clone();
        let op = match kind {
            TokenKind::Minus if ty.is_numeric() => UnaryOp::Neg,
            TokenKind::Plus if ty.is_numeric() => {
                let t = Type::promote(&ty, &ty).unwrap_or(ty);
                return self.coerce(operand, &t);
            }
            TokenKind::Bang if ty == Type::Bool => {
                return Ok(Expr::new(
                    ExprKind::Unary {
                        op: UnaryOp::Not,
                        operand: Box::new(operand),
                    },
                    Type::Bool,
                    line,
                ));
            }
            TokenKind::Tilde if ty.is_integral() => UnaryOp::BitNot,
            TokenKind::Minus => {
                return self.overloaded_unary(kind, "minus", operand, line);
            }
            TokenKind::Bang | TokenKind::Tilde => {
                return self.overloaded_unary(kind, "not", operand, line);
            }
            _ => {
                return Err(self.error(
                    line,
                    format!("Operator `{}` cannot be applied to {ty}", symbol(kind)),
                ));
            }
        };
        let t = Type::promote(&ty, &ty).unwrap_or(ty);
        let operand = self.coerce(operand, &t)?;
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            t,
            line,
        ))
    }

    fn overloaded_unary(&mut self, kind: TokenKind, name: &str, operand: Expr, line: usize) -> PResult<Expr> {
        let ty = operand.ty.clone();
        match self.overload(name, operand, Vec::new(), line)? {
            Some(e) => Ok(e),
            None => Err(self.error(
                line,
                format!("Operator `{}` cannot be applied to {ty}", symbol(kind)),
            )),
        }
    }

    /// Appends to an n-ary concatenation, inserting `tostr()` for types
    /// that override it.
    fn concat(&mut self, left: Expr, right: Expr, line: usize) -> PResult<Expr> {
        let mut parts = match left {
            Expr {
                kind: ExprKind::Concat(parts),
                ..
            } => parts,
            other => vec![self.concat_part(other)?],
        };
        parts.push(self.concat_part(right)?);
        Ok(Expr::new(ExprKind::Concat(parts), Type::String, line))
    }

    fn concat_part(&mut self, e: Expr) -> PResult<Expr> {
        if e.ty == Type::String || e.ty == Type::Char || !e.ty.is_reference() || e.ty == Type::Null {
            return Ok(e);
        }
        let line = e.line;
        match self.unit.find_method(&e.ty, "tostr") {
            Some(f) if self.unit.func(f).owner() != Some("Any") => {
                let call = self.call_method(f, e, Vec::new(), line)?;
                self.coerce(call, &Type::String)
            }
            _ => Ok(e),
        }
    }

    /// Warns when an operator method's signature cannot serve its operator.
    pub(super) fn check_operator_method(&mut self, owner: &Type, name: &str, params: usize, ret: &Type, line: usize) -> PResult<()> {
        let Some((_, arity, want)) = OPERATOR_METHODS.iter().find(|(n, _, _)| *n == name) else {
            return Ok(());
        };
        let ret_ok = want.as_ref().is_none_or(|w| w == ret) && *ret != Type::None;
        if *arity != params || !ret_ok {
            self.warn(
                Category::Operators,
                line,
                format!("Method {owner}.{name} does not have the signature of operator method `{name}`"),
            )?;
        }
        Ok(())
    }
}

/// Reads field `idx` of a structure (fields are array slots).
pub(super) fn field_load(base: Expr, idx: i32, ty: Type, line: usize) -> Expr {
    Expr::new(
        ExprKind::ArrayLoad {
            array: Box::new(base),
            index: Box::new(Expr::int(idx, line)),
        },
        ty,
        line,
    )
}
