use std::rc::Rc;

use crate::types::Type;
use crate::unit::{FuncId, VarId};

/// Compile-time constant. Byte/Short/Char constants are `Int` values whose
/// node carries the narrower type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(Rc<str>),
    Func(FuncId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    /// Logical negation of a Bool.
    Not,
    /// Bitwise complement of an integral value.
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Ushr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub keys: Vec<i32>,
    pub body: Expr,
}

/// Typed expression tree. Statements are expressions of type `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    NoOp,
    Const(Value),
    Var(VarId),
    SetVar {
        var: VarId,
        value: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// Operands already have the result type (shift counts are Int).
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Both operands share one numeric type, or both are references.
    Compare {
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logic {
        op: LogicOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Cast(Box<Expr>),
    /// Also used for structure fields, which are stored as object arrays.
    ArrayLoad {
        array: Box<Expr>,
        index: Box<Expr>,
    },
    ArrayStore {
        array: Box<Expr>,
        index: Box<Expr>,
        value: Box<Expr>,
    },
    ArrayLen(Box<Expr>),
    NewArray(Box<Expr>),
    NewArrayInit(Vec<Expr>),
    NewStruct(Vec<Expr>),
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Concat(Vec<Expr>),
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// `start: pre; if !cond break; body; step; goto start`
    Loop {
        pre: Box<Expr>,
        cond: Box<Expr>,
        body: Box<Expr>,
        step: Box<Expr>,
    },
    Switch {
        key: Box<Expr>,
        cases: Vec<SwitchCase>,
        default: Option<Box<Expr>>,
    },
    Try {
        body: Box<Expr>,
        catch_var: Option<VarId>,
        handler: Box<Expr>,
    },
    Block {
        locals: Vec<VarId>,
        stmts: Vec<Expr>,
    },
    Discard(Box<Expr>),
    Return(Option<Box<Expr>>),
    Throw {
        code: Box<Expr>,
        message: Box<Expr>,
    },
    Break,
    Continue,
}

impl Expr {
    pub fn new(kind: ExprKind, ty: Type, line: usize) -> Self {
        Self { kind, ty, line }
    }

    pub fn noop(line: usize) -> Self {
        Self::new(ExprKind::NoOp, Type::None, line)
    }

    pub fn constant(value: Value, ty: Type, line: usize) -> Self {
        Self::new(ExprKind::Const(value), ty, line)
    }

    pub fn int(v: i32, line: usize) -> Self {
        Self::constant(Value::Int(v), Type::Int, line)
    }

    pub fn bool(v: bool, line: usize) -> Self {
        Self::constant(Value::Bool(v), Type::Bool, line)
    }

    pub fn null(line: usize) -> Self {
        Self::constant(Value::Null, Type::Null, line)
    }

    pub fn var(id: VarId, ty: Type, line: usize) -> Self {
        Self::new(ExprKind::Var(id), ty, line)
    }

    pub fn set_var(id: VarId, value: Expr, line: usize) -> Self {
        Self::new(
            ExprKind::SetVar {
                var: id,
                value: Box::new(value),
            },
            Type::None,
            line,
        )
    }

    pub fn discard(e: Expr) -> Self {
        let line = e.line;
        Self::new(ExprKind::Discard(Box::new(e)), Type::None, line)
    }

    pub fn block(locals: Vec<VarId>, stmts: Vec<Expr>, ty: Type, line: usize) -> Self {
        Self::new(ExprKind::Block { locals, stmts }, ty, line)
    }

    pub fn is_noop(&self) -> bool {
        matches!(self.kind, ExprKind::NoOp)
    }

    pub fn const_value(&self) -> Option<&Value> {
        match &self.kind {
            ExprKind::Const(v) => Some(v),
            _ => None,
        }
    }

    /// Wraps a value-producing expression used in statement position.
    pub fn into_stmt(self) -> Expr {
        if self.ty == Type::None {
            self
        } else {
            Expr::discard(self)
        }
    }

    /// Calls `f` on the direct sub-expressions, in evaluation order.
    pub fn for_each_child(&self, f: &mut dyn FnMut(&Expr)) {
        match &self.kind {
            ExprKind::NoOp
            | ExprKind::Const(_)
            | ExprKind::Var(_)
            | ExprKind::Break
            | ExprKind::Continue => {}
            ExprKind::SetVar { value, .. } => f(value),
            ExprKind::Unary { operand, .. } => f(operand),
            ExprKind::Binary { left, right, .. }
            | ExprKind::Compare { left, right, .. }
            | ExprKind::Logic { left, right, .. } => {
                f(left);
                f(right);
            }
            ExprKind::Cast(inner)
            | ExprKind::ArrayLen(inner)
            | ExprKind::NewArray(inner)
            | ExprKind::Discard(inner) => f(inner),
            ExprKind::ArrayLoad { array, index } => {
                f(array);
                f(index);
            }
            ExprKind::ArrayStore {
                array,
                index,
                value,
            } => {
                f(array);
                f(index);
                f(value);
            }
            ExprKind::NewArrayInit(items) | ExprKind::NewStruct(items) | ExprKind::Concat(items) => {
                items.iter().for_each(|i| f(i));
            }
            ExprKind::Call { callee, args } => {
                f(callee);
                args.iter().for_each(|a| f(a));
            }
            ExprKind::If {
                cond,
                then,
                otherwise,
            } => {
                f(cond);
                f(then);
                f(otherwise);
            }
            ExprKind::Loop {
                pre,
                cond,
                body,
                step,
            } => {
                f(pre);
                f(cond);
                f(body);
                f(step);
            }
            ExprKind::Switch {
                key,
                cases,
                default,
            } => {
                f(key);
                cases.iter().for_each(|c| f(&c.body));
                if let Some(d) = default {
                    f(d);
                }
            }
            ExprKind::Try { body, handler, .. } => {
                f(body);
                f(handler);
            }
            ExprKind::Block { stmts, .. } => stmts.iter().for_each(|s| f(s)),
            ExprKind::Return(value) => {
                if let Some(v) = value {
                    f(v);
                }
            }
            ExprKind::Throw { code, message } => {
                f(code);
                f(message);
            }
        }
    }

    /// Mutable counterpart of [`Expr::for_each_child`].
    pub fn for_each_child_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        match &mut self.kind {
            ExprKind::NoOp
            | ExprKind::Const(_)
            | ExprKind::Var(_)
            | ExprKind::Break
            | ExprKind::Continue => {}
            ExprKind::SetVar { value, .. } => f(value),
            ExprKind::Unary { operand, .. } => f(operand),
            ExprKind::Binary { left, right, .. }
            | ExprKind::Compare { left, right, .. }
            | ExprKind::Logic { left, right, .. } => {
                f(left);
                f(right);
            }
            ExprKind::Cast(inner)
            | ExprKind::ArrayLen(inner)
            | ExprKind::NewArray(inner)
            | ExprKind::Discard(inner) => f(inner),
            ExprKind::ArrayLoad { array, index } => {
                f(array);
                f(index);
            }
            ExprKind::ArrayStore {
                array,
                index,
                value,
            } => {
                f(array);
                f(index);
                f(value);
            }
            ExprKind::NewArrayInit(items) | ExprKind::NewStruct(items) | ExprKind::Concat(items) => {
                items.iter_mut().for_each(|i| f(i));
            }
            ExprKind::Call { callee, args } => {
                f(callee);
                args.iter_mut().for_each(|a| f(a));
            }
            ExprKind::If {
                cond,
                then,
                otherwise,
            } => {
                f(cond);
                f(then);
                f(otherwise);
            }
            ExprKind::Loop {
                pre,
                cond,
                body,
                step,
            } => {
                f(pre);
                f(cond);
                f(body);
                f(step);
            }
            ExprKind::Switch {
                key,
                cases,
                default,
            } => {
                f(key);
                cases.iter_mut().for_each(|c| f(&mut c.body));
                if let Some(d) = default {
                    f(d);
                }
            }
            ExprKind::Try { body, handler, .. } => {
                f(body);
                f(handler);
            }
            ExprKind::Block { stmts, .. } => stmts.iter_mut().for_each(|s| f(s)),
            ExprKind::Return(value) => {
                if let Some(v) = value {
                    f(v);
                }
            }
            ExprKind::Throw { code, message } => {
                f(code);
                f(message);
            }
        }
    }
}
