//! Bottom-up tree rewriting repeated until nothing changes, followed by
//! removal of unreachable functions.

pub mod fold;
mod usage;

use std::mem;

use crate::ast::{BinaryOp, Expr, ExprKind, LogicOp, UnaryOp, Value};
use crate::flow::{self, Flow};
use crate::types::Type;
use crate::unit::{Unit, VarId, VarKind};

pub use usage::{count_reads, reachable};

/// Safety net for the fixpoint loop.
const MAX_PASSES: usize = 64;

/// Optimizes every function body of `unit` in place.
pub fn optimize(unit: &mut Unit) {
    for f in unit.implemented.clone() {
        let Some(mut body) = unit.func_mut(f).body.take() else {
            continue;
        };
        let mut passes = 0;
        loop {
            let mut simplifier = Simplifier::new(unit);
            simplifier.expr(&mut body);
            let changed = simplifier.changed | remove_unused_locals(unit, &mut body);
            passes += 1;
            if !changed || passes >= MAX_PASSES {
                break;
            }
        }
        log::trace!("optimized {} in {passes} pass(es)", unit.func(f).signature);
        unit.func_mut(f).body = Some(body);
    }

    let live = reachable(unit);
    let dead: Vec<_> = unit
        .implemented
        .iter()
        .copied()
        .filter(|f| !live.contains(f))
        .collect();
    for f in &dead {
        log::trace!("removing unused function {}", unit.func(*f).signature);
        unit.func_mut(*f).body = None;
    }
    unit.implemented.retain(|f| live.contains(f));
    log::debug!(
        "optimizer kept {} function(s), removed {}",
        unit.implemented.len(),
        dead.len()
    );
}

/// Rewrites a single expression to its simplest form. Used by the parser
/// to evaluate constant initializers and case labels.
pub fn simplify_expr(unit: &Unit, mut e: Expr) -> Expr {
    for _ in 0..MAX_PASSES {
        let mut simplifier = Simplifier::new(unit);
        simplifier.expr(&mut e);
        if !simplifier.changed {
            break;
        }
    }
    e
}

/// Stores into locals that are never read become discards of the stored
/// value; the locals themselves disappear.
fn remove_unused_locals(unit: &Unit, body: &mut Expr) -> bool {
    let reads = count_reads(body);
    let unused = |id: VarId| unit.var(id).kind == VarKind::Local && !reads.contains_key(&id);
    let mut changed = false;
    strip_unused(body, &unused, &mut changed);
    changed
}

fn strip_unused(e: &mut Expr, unused: &dyn Fn(VarId) -> bool, changed: &mut bool) {
    e.for_each_child_mut(&mut |child| strip_unused(child, unused, changed));
    match &mut e.kind {
        ExprKind::SetVar { var, value } if unused(*var) => {
            let value = mem::replace(value.as_mut(), Expr::noop(e.line));
            *e = Expr::discard(value);
            *changed = true;
        }
        ExprKind::Block { locals, .. } => {
            let before = locals.len();
            locals.retain(|id| !unused(*id));
            *changed |= locals.len() != before;
        }
        ExprKind::Try { catch_var, .. } => {
            if catch_var.is_some_and(|id| unused(id)) {
                *catch_var = None;
                *changed = true;
            }
        }
        _ => {}
    }
}

struct Simplifier<'u> {
    unit: &'u Unit,
    changed: bool,
}

fn is_const_num(e: &Expr, n: i64) -> bool {
    match e.const_value() {
        Some(Value::Int(v)) => i64::from(*v) == n,
        Some(Value::Long(v)) => *v == n,
        _ => false,
    }
}

fn is_const_bool(e: &Expr, b: bool) -> bool {
    matches!(e.const_value(), Some(Value::Bool(v)) if *v == b)
}

/// The operand opposite the one matching `is_const`, or both back.
fn other_operand(left: Expr, right: Expr, is_const: impl Fn(&Expr) -> bool) -> Result<Expr, (Expr, Expr)> {
    if is_const(&right) {
        Ok(left)
    } else if is_const(&left) {
        Ok(right)
    } else {
        Err((left, right))
    }
}

fn not(e: Expr) -> Expr {
    let line = e.line;
    Expr::new(
        ExprKind::Unary {
            op: UnaryOp::Not,
            operand: Box::new(e),
        },
        Type::Bool,
        line,
    )
}

impl<'u> Simplifier<'u> {
    fn new(unit: &'u Unit) -> Self {
        Self {
            unit,
            changed: false,
        }
    }

    fn expr(&mut self, e: &mut Expr) {
        e.for_each_child_mut(&mut |child| self.expr(child));
        let line = e.line;
        let taken = mem::replace(e, Expr::noop(line));
        *e = self.node(taken);
    }

    fn rewrote(&mut self, e: Expr) -> Expr {
        self.changed = true;
        e
    }

    fn constant(&mut self, v: Value, ty: Type, line: usize) -> Expr {
        self.rewrote(Expr::constant(v, ty, line))
    }

    fn node(&mut self, e: Expr) -> Expr {
        let Expr { kind, ty, line } = e;
        match kind {
            ExprKind::Unary { op, operand } => self.unary(op, *operand, ty, line),
            ExprKind::Binary { op, left, right } => self.binary(op, *left, *right, ty, line),
            ExprKind::Compare { op, left, right } => {
                if let (Some(l), Some(r)) = (left.const_value(), right.const_value()) {
                    if let Some(b) = fold::compare(op, l, r) {
                        return self.constant(Value::Bool(b), Type::Bool, line);
                    }
                }
                Expr::new(ExprKind::Compare { op, left, right }, ty, line)
            }
            ExprKind::Logic { op, left, right } => self.logic(op, *left, *right, ty, line),
            ExprKind::Cast(inner) => {
                if inner.ty == ty {
                    return self.rewrote(*inner);
                }
                if let Some(v) = inner.const_value().and_then(|v| fold::cast(v, &inner.ty, &ty)) {
                    return self.constant(v, ty, line);
                }
                Expr::new(ExprKind::Cast(inner), ty, line)
            }
            ExprKind::ArrayLen(array) => {
                let Expr {
                    kind,
                    ty: array_ty,
                    line: array_line,
                } = *array;
                let len = match &kind {
                    ExprKind::NewArray(n) => match n.const_value() {
                        Some(Value::Int(n)) if *n >= 0 => Some(*n),
                        _ => None,
                    },
                    ExprKind::NewArrayInit(items) => i32::try_from(items.len()).ok(),
                    _ => None,
                };
                match (len, kind) {
                    (Some(n), ExprKind::NewArrayInit(items)) => {
                        let mut stmts: Vec<Expr> = items.into_iter().map(Expr::discard).collect();
                        stmts.push(Expr::int(n, line));
                        self.rewrote(Expr::block(Vec::new(), stmts, Type::Int, line))
                    }
                    (Some(n), _) => self.constant(Value::Int(n), Type::Int, line),
                    (None, kind) => {
                        let array = Expr::new(kind, array_ty, array_line);
                        Expr::new(ExprKind::ArrayLen(Box::new(array)), ty, line)
                    }
                }
            }
            ExprKind::Concat(parts) => self.concat(parts, ty, line),
            ExprKind::Call { callee, args } => self.call(*callee, args, ty, line),
            ExprKind::If {
                cond,
                then,
                otherwise,
            } => self.if_(*cond, *then, *otherwise, ty, line),
            ExprKind::Loop {
                pre,
                cond,
                body,
                step,
            } => {
                if pre.is_noop() && is_const_bool(&cond, false) {
                    return self.rewrote(Expr::noop(line));
                }
                Expr::new(
                    ExprKind::Loop {
                        pre,
                        cond,
                        body,
                        step,
                    },
                    ty,
                    line,
                )
            }
            ExprKind::Switch {
                key,
                cases,
                default,
            } => {
                if let Some(Value::Int(k)) = key.const_value() {
                    let k = *k;
                    let chosen = cases
                        .into_iter()
                        .find(|c| c.keys.contains(&k))
                        .map(|c| c.body)
                        .or(default.map(|d| *d))
                        .unwrap_or_else(|| Expr::noop(line));
                    return self.rewrote(chosen);
                }
                if cases.is_empty() {
                    let rest = default.map_or_else(|| Expr::noop(line), |d| *d);
                    let block = Expr::block(Vec::new(), vec![Expr::discard(*key), rest], ty, line);
                    return self.rewrote(block);
                }
                Expr::new(
                    ExprKind::Switch {
                        key,
                        cases,
                        default,
                    },
                    ty,
                    line,
                )
            }
            ExprKind::Try {
                body,
                catch_var,
                handler,
            } => {
                if body.is_noop() {
                    return self.rewrote(Expr::noop(line));
                }
                Expr::new(
                    ExprKind::Try {
                        body,
                        catch_var,
                        handler,
                    },
                    ty,
                    line,
                )
            }
            ExprKind::Block { locals, stmts } => self.block(locals, stmts, ty, line),
            ExprKind::Discard(inner) => self.discard(*inner, line),
            ExprKind::SetVar { var, value } => {
                if matches!(value.kind, ExprKind::Var(v) if v == var) {
                    return self.rewrote(Expr::noop(line));
                }
                Expr::new(ExprKind::SetVar { var, value }, ty, line)
            }
            kind => Expr::new(kind, ty, line),
        }
    }

    fn unary(&mut self, op: UnaryOp, operand: Expr, ty: Type, line: usize) -> Expr {
        if let Some(v) = operand.const_value().and_then(|v| fold::unary(op, v)) {
            return self.constant(v, ty, line);
        }
        match (op, operand.kind) {
            (UnaryOp::Not, ExprKind::Unary {
                op: UnaryOp::Not,
                operand: inner,
            })
            | (UnaryOp::BitNot, ExprKind::Unary {
                op: UnaryOp::BitNot,
                operand: inner,
            }) => self.rewrote(*inner),
            (op, kind) => {
                let operand = Expr::new(kind, operand.ty, operand.line);
                Expr::new(
                    ExprKind::Unary {
                        op,
                        operand: Box::new(operand),
                    },
                    ty,
                    line,
                )
            }
        }
    }

    fn binary(&mut self, op: BinaryOp, mut left: Expr, mut right: Expr, ty: Type, line: usize) -> Expr {
        if let (Some(l), Some(r)) = (left.const_value(), right.const_value()) {
            if let Some(v) = fold::binary(op, l, r) {
                return self.constant(v, ty, line);
            }
        }
        if ty.is_integral() {
            let right_identity = match op {
                BinaryOp::Add
                | BinaryOp::Sub
                | BinaryOp::Or
                | BinaryOp::Xor
                | BinaryOp::Shl
                | BinaryOp::Shr
                | BinaryOp::Ushr => is_const_num(&right, 0),
                BinaryOp::Mul | BinaryOp::Div => is_const_num(&right, 1),
                BinaryOp::And => is_const_num(&right, -1),
                BinaryOp::Mod => false,
            };
            if right_identity {
                return self.rewrote(left);
            }
            let left_identity = match op {
                BinaryOp::Add | BinaryOp::Or | BinaryOp::Xor => is_const_num(&left, 0),
                BinaryOp::Mul => is_const_num(&left, 1),
                BinaryOp::And => is_const_num(&left, -1),
                _ => false,
            };
            if left_identity {
                return self.rewrote(right);
            }
            let absorbing = match op {
                BinaryOp::Mul | BinaryOp::And => Some(0),
                BinaryOp::Or | BinaryOp::Xor => Some(-1),
                _ => None,
            };
            if let Some(n) = absorbing {
                match other_operand(left, right, |e| is_const_num(e, n)) {
                    Ok(other) if op == BinaryOp::Xor => {
                        let flipped = Expr::new(
                            ExprKind::Unary {
                                op: UnaryOp::BitNot,
                                operand: Box::new(other),
                            },
                            ty,
                            line,
                        );
                        return self.rewrote(flipped);
                    }
                    Ok(other) => {
                        let value = if ty == Type::Long {
                            Value::Long(n)
                        } else {
                            Value::Int(n as i32)
                        };
                        return self.absorbed(other, value, ty, line);
                    }
                    Err(operands) => (left, right) = operands,
                }
            }
        } else if ty == Type::Bool {
            let identity = match op {
                BinaryOp::And => Some(true),
                BinaryOp::Or | BinaryOp::Xor => Some(false),
                _ => None,
            };
            if let Some(id) = identity {
                if is_const_bool(&right, id) {
                    return self.rewrote(left);
                }
                if is_const_bool(&left, id) {
                    return self.rewrote(right);
                }
                match other_operand(left, right, |e| is_const_bool(e, !id)) {
                    Ok(other) if op == BinaryOp::Xor => return self.rewrote(not(other)),
                    Ok(other) => return self.absorbed(other, Value::Bool(!id), ty, line),
                    Err(operands) => (left, right) = operands,
                }
            }
        }
        Expr::new(
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            ty,
            line,
        )
    }

    /// `{ discard(other); value }`: keeps the side effects of the operand
    /// an absorbing constant made irrelevant.
    fn absorbed(&mut self, other: Expr, value: Value, ty: Type, line: usize) -> Expr {
        let value = Expr::constant(value, ty.clone(), line);
        self.rewrote(Expr::block(Vec::new(), vec![Expr::discard(other), value], ty, line))
    }

    fn logic(&mut self, op: LogicOp, left: Expr, right: Expr, ty: Type, line: usize) -> Expr {
        if let Some(Value::Bool(l)) = left.const_value() {
            return match (op, *l) {
                (LogicOp::And, true) | (LogicOp::Or, false) => self.rewrote(right),
                (LogicOp::And, false) => self.constant(Value::Bool(false), Type::Bool, line),
                (LogicOp::Or, true) => self.constant(Value::Bool(true), Type::Bool, line),
            };
        }
        let neutral = op == LogicOp::And;
        if is_const_bool(&right, neutral) {
            return self.rewrote(left);
        }
        Expr::new(
            ExprKind::Logic {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            ty,
            line,
        )
    }

    /// Flattens nested concatenations and joins adjacent constants.
    fn concat(&mut self, parts: Vec<Expr>, ty: Type, line: usize) -> Expr {
        let mut out: Vec<Expr> = Vec::with_capacity(parts.len());
        let mut changed = false;
        for part in parts {
            let pieces = match part.kind {
                ExprKind::Concat(inner) if part.ty == Type::String => {
                    changed = true;
                    inner
                }
                kind => vec![Expr::new(kind, part.ty, part.line)],
            };
            for piece in pieces {
                let text = piece
                    .const_value()
                    .and_then(|v| fold::display(v, &piece.ty));
                let prev = out
                    .last()
                    .and_then(|p| p.const_value().and_then(|v| fold::display(v, &p.ty)));
                match (prev, text) {
                    (Some(a), Some(b)) => {
                        let merged = Value::Str(format!("{a}{b}").into());
                        if let Some(last) = out.last_mut() {
                            *last = Expr::constant(merged, Type::String, last.line);
                        }
                        changed = true;
                    }
                    _ => out.push(piece),
                }
            }
        }
        if out.len() == 1 && out[0].ty == Type::String {
            if let Some(only) = out.pop() {
                return self.rewrote(only);
            }
        }
        if changed {
            self.changed = true;
        }
        Expr::new(ExprKind::Concat(out), ty, line)
    }

    /// `c.tostr()` on a constant `c` through the root implementation.
    fn call(&mut self, callee: Expr, args: Vec<Expr>, ty: Type, line: usize) -> Expr {
        if let (Some(Value::Func(f)), [arg]) = (callee.const_value(), args.as_slice()) {
            if self.unit.func(*f).signature == "Any.tostr" {
                let target = match &arg.kind {
                    ExprKind::Cast(inner) => inner.as_ref(),
                    _ => arg,
                };
                if let Some(text) = target
                    .const_value()
                    .and_then(|v| fold::display(v, &target.ty))
                {
                    return self.constant(Value::Str(text.into()), Type::String, line);
                }
            }
        }
        Expr::new(
            ExprKind::Call {
                callee: Box::new(callee),
                args,
            },
            ty,
            line,
        )
    }

    fn if_(&mut self, cond: Expr, then: Expr, otherwise: Expr, ty: Type, line: usize) -> Expr {
        if let Some(Value::Bool(b)) = cond.const_value() {
            return self.rewrote(if *b { then } else { otherwise });
        }
        if ty == Type::None && then.is_noop() {
            if otherwise.is_noop() {
                return self.rewrote(Expr::discard(cond));
            }
            let flipped = Expr::new(
                ExprKind::If {
                    cond: Box::new(not(cond)),
                    then: Box::new(otherwise),
                    otherwise: Box::new(Expr::noop(line)),
                },
                ty,
                line,
            );
            return self.rewrote(flipped);
        }
        Expr::new(
            ExprKind::If {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
            ty,
            line,
        )
    }

    /// Splices nested statement blocks, drops no-ops and code after a
    /// statement that cannot fall through.
    fn block(&mut self, mut locals: Vec<VarId>, stmts: Vec<Expr>, ty: Type, line: usize) -> Expr {
        let count = stmts.len();
        let mut out = Vec::with_capacity(count);
        for (i, stmt) in stmts.into_iter().enumerate() {
            let is_last = i + 1 == count;
            if is_last && ty != Type::None {
                out.push(stmt);
                break;
            }
            match stmt.kind {
                ExprKind::NoOp => self.changed = true,
                ExprKind::Block {
                    locals: inner_locals,
                    stmts: inner,
                } if stmt.ty == Type::None => {
                    locals.extend(inner_locals);
                    out.extend(inner);
                    self.changed = true;
                }
                kind => {
                    let stmt = Expr::new(kind, stmt.ty, stmt.line);
                    let stops = flow::outcome(&stmt) != Flow::Next;
                    out.push(stmt);
                    if stops {
                        if !is_last {
                            self.changed = true;
                        }
                        break;
                    }
                }
            }
        }
        if locals.is_empty() {
            if out.is_empty() && ty == Type::None {
                return self.rewrote(Expr::noop(line));
            }
            if out.len() == 1 && out[0].ty == ty {
                if let Some(only) = out.pop() {
                    return self.rewrote(only);
                }
            }
        }
        Expr::block(locals, out, ty, line)
    }

    /// Keeps only the side effects of a value whose result is unused.
    fn discard(&mut self, inner: Expr, line: usize) -> Expr {
        if inner.ty == Type::None {
            return self.rewrote(inner);
        }
        let Expr {
            kind,
            ty: inner_ty,
            line: inner_line,
        } = inner;
        let stmts = |parts: Vec<Expr>| {
            Expr::block(
                Vec::new(),
                parts.into_iter().map(Expr::discard).collect(),
                Type::None,
                line,
            )
        };
        let out = match kind {
            ExprKind::Const(_) | ExprKind::Var(_) | ExprKind::NoOp => Expr::noop(line),
            ExprKind::Unary { operand, .. } => Expr::discard(*operand),
            ExprKind::Binary { op, left, right }
                if !(matches!(op, BinaryOp::Div | BinaryOp::Mod) && inner_ty.is_integral()) =>
            {
                stmts(vec![*left, *right])
            }
            ExprKind::Compare { left, right, .. } => stmts(vec![*left, *right]),
            ExprKind::Logic { op, left, right } => {
                let cond = if op == LogicOp::And { *left } else { not(*left) };
                Expr::new(
                    ExprKind::If {
                        cond: Box::new(cond),
                        then: Box::new(Expr::discard(*right)),
                        otherwise: Box::new(Expr::noop(line)),
                    },
                    Type::None,
                    line,
                )
            }
            ExprKind::Cast(x) if (x.ty.is_numeric() && inner_ty.is_numeric()) || x.ty.is_subtype_of(&inner_ty) => {
                Expr::discard(*x)
            }
            ExprKind::NewArrayInit(items) | ExprKind::NewStruct(items) | ExprKind::Concat(items) => {
                stmts(items)
            }
            ExprKind::If {
                cond,
                then,
                otherwise,
            } => Expr::new(
                ExprKind::If {
                    cond,
                    then: Box::new(Expr::discard(*then)),
                    otherwise: Box::new(Expr::discard(*otherwise)),
                },
                Type::None,
                line,
            ),
            ExprKind::Block { locals, mut stmts } => {
                if let Some(last) = stmts.pop() {
                    stmts.push(Expr::discard(last));
                }
                Expr::block(locals, stmts, Type::None, line)
            }
            ExprKind::Switch {
                key,
                mut cases,
                default,
            } => {
                for case in &mut cases {
                    let body = mem::replace(&mut case.body, Expr::noop(line));
                    case.body = Expr::discard(body);
                }
                Expr::new(
                    ExprKind::Switch {
                        key,
                        cases,
                        default: default.map(|d| Box::new(Expr::discard(*d))),
                    },
                    Type::None,
                    line,
                )
            }
            kind => {
                return Expr::discard(Expr::new(kind, inner_ty, inner_line));
            }
        };
        self.rewrote(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> Unit {
        Unit::new()
    }

    fn bin(op: BinaryOp, l: Expr, r: Expr) -> Expr {
        let ty = l.ty.clone();
        Expr::new(
            ExprKind::Binary {
                op,
                left: Box::new(l),
                right: Box::new(r),
            },
            ty,
            1,
        )
    }

    #[test]
    fn folds_nested_arithmetic() {
        let e = bin(
            BinaryOp::Mul,
            bin(BinaryOp::Add, Expr::int(2, 1), Expr::int(3, 1)),
            Expr::int(4, 1),
        );
        assert_eq!(simplify_expr(&unit(), e).const_value(), Some(&Value::Int(20)));
    }

    #[test]
    fn keeps_division_by_literal_zero() {
        let e = bin(BinaryOp::Div, Expr::int(1, 1), Expr::int(0, 1));
        let out = simplify_expr(&unit(), Expr::discard(e));
        assert!(matches!(out.kind, ExprKind::Discard(_)));
    }

    #[test]
    fn adjacent_literals_are_joined() {
        let e = Expr::new(
            ExprKind::Concat(vec![
                Expr::constant(Value::Str("a".into()), Type::String, 1),
                Expr::int(1, 1),
                Expr::constant(Value::Bool(true), Type::Bool, 1),
            ]),
            Type::String,
            1,
        );
        let out = simplify_expr(&unit(), e);
        assert_eq!(out.const_value(), Some(&Value::Str("a1true".into())));
    }
}
