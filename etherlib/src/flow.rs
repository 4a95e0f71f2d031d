//! Control-flow outcomes of statements.

use crate::ast::{Expr, ExprKind};
use crate::diagnostic::SourcePos;
use crate::error::{CompileError, CompileResult};

/// How control leaves a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Falls through to the next statement.
    Next,
    Return,
    Break,
    Throw,
}

/// Outcome of `e` without validating it.
pub fn outcome(e: &Expr) -> Flow {
    match &e.kind {
        ExprKind::Return(_) => Flow::Return,
        ExprKind::Throw { .. } => Flow::Throw,
        ExprKind::Break | ExprKind::Continue => Flow::Break,
        ExprKind::Block { stmts, .. } => stmts
            .iter()
            .map(outcome)
            .find(|f| *f != Flow::Next)
            .unwrap_or(Flow::Next),
        ExprKind::If {
            then, otherwise, ..
        } => join(outcome(then), outcome(otherwise)),
        ExprKind::Switch {
            cases,
            default: Some(default),
            ..
        } => cases
            .iter()
            .map(|c| outcome(&c.body))
            .fold(outcome(default), join),
        ExprKind::Try { body, handler, .. } => {
            let body = outcome(body);
            let handler = outcome(handler);
            if body == Flow::Throw {
                handler
            } else {
                join(body, handler)
            }
        }
        ExprKind::Loop { pre, .. } => match outcome(pre) {
            f @ (Flow::Return | Flow::Throw) => f,
            _ => Flow::Next,
        },
        ExprKind::Discard(inner) => outcome(inner),
        _ => Flow::Next,
    }
}

/// Both paths leave the same way, or at least one falls through.
fn join(a: Flow, b: Flow) -> Flow {
    if a == b {
        return a;
    }
    if a == Flow::Next || b == Flow::Next {
        return Flow::Next;
    }
    // Different non-local exits: neither falls through.
    Flow::Return
}

/// Validates a function body: `break`/`continue` only inside loops, and
/// nothing after a statement that cannot fall through.
pub fn check_body(body: &Expr, file: &str) -> CompileResult<Flow> {
    let mut checker = Checker { file, loops: 0 };
    checker.check(body)
}

struct Checker<'a> {
    file: &'a str,
    loops: usize,
}

impl Checker<'_> {
    fn error(&self, line: usize, message: &str) -> CompileError {
        CompileError::semantic(SourcePos::new(self.file.to_string(), line), message)
    }

    fn check(&mut self, e: &Expr) -> CompileResult<Flow> {
        match &e.kind {
            ExprKind::Break | ExprKind::Continue => {
                if self.loops == 0 {
                    let what = if matches!(e.kind, ExprKind::Break) {
                        "`break` outside of a loop"
                    } else {
                        "`continue` outside of a loop"
                    };
                    return Err(self.error(e.line, what));
                }
                Ok(Flow::Break)
            }
            ExprKind::Block { stmts, .. } => {
                let mut flow = Flow::Next;
                for stmt in stmts {
                    if flow != Flow::Next {
                        if stmt.is_noop() {
                            continue;
                        }
                        return Err(self.error(stmt.line, "Unreachable statement"));
                    }
                    flow = self.check(stmt)?;
                }
                Ok(flow)
            }
            ExprKind::If {
                cond,
                then,
                otherwise,
            } => {
                self.check(cond)?;
                let a = self.check(then)?;
                let b = self.check(otherwise)?;
                Ok(join(a, b))
            }
            ExprKind::Loop {
                pre,
                cond,
                body,
                step,
            } => {
                self.loops += 1;
                let result = self.check_loop(pre, cond, body, step);
                self.loops -= 1;
                result
            }
            ExprKind::Switch {
                key,
                cases,
                default,
            } => {
                self.check(key)?;
                let mut flow = None;
                for case in cases {
                    let f = self.check(&case.body)?;
                    flow = Some(flow.map_or(f, |acc| join(acc, f)));
                }
                match default {
                    Some(d) => {
                        let f = self.check(d)?;
                        Ok(flow.map_or(f, |acc| join(acc, f)))
                    }
                    None => Ok(Flow::Next),
                }
            }
            ExprKind::Try { body, handler, .. } => {
                let body_flow = self.check(body)?;
                let handler_flow = self.check(handler)?;
                if body_flow == Flow::Throw {
                    Ok(handler_flow)
                } else {
                    Ok(join(body_flow, handler_flow))
                }
            }
            ExprKind::Return(value) => {
                if let Some(v) = value {
                    self.check(v)?;
                }
                Ok(Flow::Return)
            }
            ExprKind::Throw { code, message } => {
                self.check(code)?;
                self.check(message)?;
                Ok(Flow::Throw)
            }
            ExprKind::Discard(inner) => self.check(inner),
            ExprKind::SetVar { value, .. } => {
                self.check(value)?;
                Ok(Flow::Next)
            }
            _ => {
                self.check_children(e)?;
                Ok(Flow::Next)
            }
        }
    }

    fn check_loop(&mut self, pre: &Expr, cond: &Expr, body: &Expr, step: &Expr) -> CompileResult<Flow> {
        let pre_flow = self.check(pre)?;
        self.check(cond)?;
        if pre_flow == Flow::Return || pre_flow == Flow::Throw {
            return Ok(pre_flow);
        }
        self.check(body)?;
        self.check(step)?;
        Ok(Flow::Next)
    }

    /// Value blocks and closures nested in expressions still need checking.
    fn check_children(&mut self, e: &Expr) -> CompileResult<()> {
        let mut result = Ok(());
        e.for_each_child(&mut |child| {
            if result.is_ok() {
                result = self.check(child).map(|_| ());
            }
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;

    fn ret(line: usize) -> Expr {
        Expr::new(ExprKind::Return(None), Type::None, line)
    }

    #[test]
    fn statement_after_return_is_unreachable() {
        let body = Expr::block(
            Vec::new(),
            vec![ret(1), Expr::discard(Expr::int(1, 2))],
            Type::None,
            1,
        );
        let err = check_body(&body, "t.e").unwrap_err();
        assert_eq!(err.pos.line, 2);
        assert!(err.message.contains("Unreachable"));
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        let body = Expr::block(
            Vec::new(),
            vec![Expr::new(ExprKind::Break, Type::None, 3)],
            Type::None,
            1,
        );
        assert!(check_body(&body, "t.e").is_err());
    }

    #[test]
    fn if_without_else_falls_through() {
        let e = Expr::new(
            ExprKind::If {
                cond: Box::new(Expr::bool(true, 1)),
                then: Box::new(ret(1)),
                otherwise: Box::new(Expr::noop(1)),
            },
            Type::None,
            1,
        );
        assert_eq!(outcome(&e), Flow::Next);
    }
}
