use crate::ast::{Expr, ExprKind};
use crate::diagnostic::Category;
use crate::token::TokenKind;
use crate::types::Type;
use crate::unit::VarKind;

use super::{PResult, Parser};

impl Parser<'_> {
    /// Statements up to the closing `}`; the `{` is already consumed.
    pub(super) fn parse_block_body(&mut self, line: usize) -> PResult<Expr> {
        self.push_block();
        let stmts = self.parse_statements();
        let locals = self.pop_block();
        Ok(Expr::block(locals, stmts?, Type::None, line))
    }

    fn parse_statements(&mut self) -> PResult<Vec<Expr>> {
        let mut stmts = Vec::new();
        loop {
            match self.peek_kind()? {
                TokenKind::RBrace => {
                    self.next()?;
                    return Ok(stmts);
                }
                TokenKind::Semi => {
                    self.next()?;
                }
                TokenKind::Eof => {
                    let line = self.line();
                    return Err(self.syntax_error(line, "Expected `}` before end of file"));
                }
                _ => stmts.push(self.parse_statement()?),
            }
        }
    }

    /// Statements after a leading `super(...)` have already been parsed.
    pub(super) fn parse_statements_into(&mut self, stmts: &mut Vec<Expr>) -> PResult<()> {
        stmts.extend(self.parse_statements()?);
        Ok(())
    }

    /// Body of `if`, `while` and friends; a lone `;` is an empty statement.
    fn parse_body(&mut self) -> PResult<Expr> {
        let tok = self.next()?;
        if tok.kind == TokenKind::Semi {
            self.warn(Category::Empty, tok.line, "Empty statement")?;
            return Ok(Expr::noop(tok.line));
        }
        self.push_back();
        self.parse_statement()
    }

    pub(super) fn parse_statement(&mut self) -> PResult<Expr> {
        let tok = self.next()?;
        let line = tok.line;
        match tok.kind {
            TokenKind::Semi => Ok(Expr::noop(line)),
            TokenKind::LBrace => self.parse_block_body(line),
            TokenKind::KwVar => self.parse_local(false, line),
            TokenKind::KwConst => self.parse_local(true, line),
            TokenKind::KwIf => self.parse_if(line),
            TokenKind::KwWhile => self.parse_while(line),
            TokenKind::KwDo => self.parse_do_while(line),
            TokenKind::KwFor => self.parse_for(line),
            TokenKind::KwSwitch => self.parse_switch(line, false),
            TokenKind::KwTry => self.parse_try(line),
            TokenKind::KwReturn => self.parse_return(line),
            TokenKind::KwBreak => Ok(Expr::new(ExprKind::Break, Type::None, line)),
            TokenKind::KwContinue => Ok(Expr::new(ExprKind::Continue, Type::None, line)),
            TokenKind::KwThrow => self.parse_throw(line),
            TokenKind::KwSuper => Err(self.error(
                line,
                "`super` call must be the first statement of a constructor",
            )),
            TokenKind::Word if self.options.compat && tok.text() == "throw" => {
                if self.at(TokenKind::LParen)? {
                    self.parse_throw(line)
                } else {
                    self.push_back();
                    self.parse_simple_statement()
                }
            }
            _ => {
                self.push_back();
                self.parse_simple_statement()
            }
        }
    }

    /// Assignment, compound assignment or expression statement.
    pub(super) fn parse_simple_statement(&mut self) -> PResult<Expr> {
        let place = self.parse_unary_place()?;
        let tok = self.next()?;
        if tok.kind == TokenKind::Assign {
            let value = self.parse_expr()?;
            return self.assign(place, value, tok.line);
        }
        if let Some(op) = tok.kind.compound_base() {
            let value = self.parse_expr()?;
            return self.compound_assign(place, op, value, tok.line);
        }
        self.push_back();
        let left = self.lower(place)?;
        let e = self.parse_binary_rest(left, 1)?;
        Ok(e.into_stmt())
    }

    fn parse_local(&mut self, is_const: bool, line: usize) -> PResult<Expr> {
        let name = self.expect_word("Expected variable name")?;
        self.parse_local_rest(is_const, &name, line)
    }

    /// Declaration after `var name`; yields the initializing store.
    pub(super) fn parse_local_rest(&mut self, is_const: bool, name: &str, line: usize) -> PResult<Expr> {
        let annotated = self.parse_type_annotation()?;
        let init = if self.eat(TokenKind::Assign)? {
            let e = self.parse_expr()?;
            Some(self.valued(e)?)
        } else {
            None
        };
        let ty = match (&annotated, &init) {
            (Some(t), _) => t.clone(),
            (None, Some(e)) if e.ty == Type::Null => {
                return Err(self.error(line, format!("Cannot infer the type of `{name}` from null")));
            }
            (None, Some(e)) => e.ty.clone(),
            (None, None) => {
                return Err(self.error(line, format!("Variable `{name}` needs a type or an initializer")));
            }
        };
        let init = match init {
            Some(e) => Some(self.coerce(e, &ty)?),
            None if is_const => {
                return Err(self.error(line, format!("Constant `{name}` needs an initializer")));
            }
            None => None,
        };
        let id = self.declare_local(name, ty.clone(), line)?;
        if is_const {
            let init = init.unwrap_or_else(|| Expr::noop(line));
            let folded = crate::optimizer::simplify_expr(&self.unit, init);
            let var = self.unit.var_mut(id);
            var.constant = true;
            if let Some(value) = folded.const_value() {
                var.value = Some(value.clone());
                return Ok(Expr::noop(line));
            }
            return Ok(Expr::set_var(id, folded, line));
        }
        let value = init.unwrap_or_else(|| Expr::constant(ty.zero_value(), ty.clone(), line));
        Ok(Expr::set_var(id, value, line))
    }

    fn parse_paren_condition(&mut self) -> PResult<Expr> {
        self.expect_sym(TokenKind::LParen)?;
        let cond = self.parse_expr()?;
        let cond = self.condition(cond)?;
        self.expect_sym(TokenKind::RParen)?;
        Ok(cond)
    }

    fn parse_if(&mut self, line: usize) -> PResult<Expr> {
        let cond = self.parse_paren_condition()?;
        let then = self.parse_body()?;
        let otherwise = if self.eat(TokenKind::KwElse)? {
            self.parse_body()?
        } else {
            Expr::noop(line)
        };
        Ok(Expr::new(
            ExprKind::If {
                cond: Box::new(cond),
                then: Box::new(then.into_stmt()),
                otherwise: Box::new(otherwise.into_stmt()),
            },
            Type::None,
            line,
        ))
    }

    pub(super) fn make_loop(pre: Expr, cond: Expr, body: Expr, step: Expr, line: usize) -> Expr {
        Expr::new(
            ExprKind::Loop {
                pre: Box::new(pre),
                cond: Box::new(cond),
                body: Box::new(body),
                step: Box::new(step),
            },
            Type::None,
            line,
        )
    }

    fn parse_while(&mut self, line: usize) -> PResult<Expr> {
        let cond = self.parse_paren_condition()?;
        let body = self.parse_body()?;
        Ok(Self::make_loop(Expr::noop(line), cond, body, Expr::noop(line), line))
    }

    fn parse_do_while(&mut self, line: usize) -> PResult<Expr> {
        let body = self.parse_body()?;
        self.expect(TokenKind::KwWhile, "Expected `while` after `do` body")?;
        let cond = self.parse_paren_condition()?;
        Ok(Self::make_loop(body, cond, Expr::noop(line), Expr::noop(line), line))
    }

    fn parse_try(&mut self, line: usize) -> PResult<Expr> {
        let body = self.parse_body()?;
        self.expect(TokenKind::KwCatch, "Expected `catch` after `try` body")?;
        self.push_block();
        let catch_var = if self.eat(TokenKind::LParen)? {
            self.expect(TokenKind::KwVar, "Expected `var` in catch clause")?;
            let var_line = self.line();
            let name = self.expect_word("Expected variable name")?;
            self.expect_sym(TokenKind::RParen)?;
            Some(self.declare_local(&name, Type::Error, var_line)?)
        } else {
            None
        };
        let handler = self.parse_body()?;
        self.pop_block();
        Ok(Expr::new(
            ExprKind::Try {
                body: Box::new(body.into_stmt()),
                catch_var,
                handler: Box::new(handler.into_stmt()),
            },
            Type::None,
            line,
        ))
    }

    fn parse_return(&mut self, line: usize) -> PResult<Expr> {
        let ret = match self.current_func() {
            Some(ctx) => ctx.ret.clone(),
            None => return Err(self.error(line, "`return` outside of a function")),
        };
        if ret == Type::None {
            return Ok(Expr::new(ExprKind::Return(None), Type::None, line));
        }
        if matches!(
            self.peek_kind()?,
            TokenKind::Semi | TokenKind::RBrace | TokenKind::Eof
        ) {
            return Err(self.error(line, format!("Missing return value of type {ret}")));
        }
        let value = self.parse_expr()?;
        let value = self.valued(value)?;
        let value = self.coerce(value, &ret)?;
        Ok(Expr::new(ExprKind::Return(Some(Box::new(value))), Type::None, line))
    }

    /// `throw(code[, message])`.
    fn parse_throw(&mut self, line: usize) -> PResult<Expr> {
        self.expect_sym(TokenKind::LParen)?;
        let code = self.parse_expr()?;
        let code = self.coerce(code, &Type::Int)?;
        let message = if self.eat(TokenKind::Comma)? {
            let m = self.parse_expr()?;
            self.coerce(m, &Type::String)?
        } else {
            Expr::constant(crate::ast::Value::Null, Type::String, line)
        };
        self.expect_sym(TokenKind::RParen)?;
        Ok(Expr::new(
            ExprKind::Throw {
                code: Box::new(code),
                message: Box::new(message),
            },
            Type::None,
            line,
        ))
    }

    /// Declares a parameter of the function being defined.
    pub(super) fn new_param(&mut self, name: &str, ty: Type, line: usize) -> crate::unit::VarId {
        self.unit
            .add_var(crate::unit::Var::new(name, ty, VarKind::Param, line))
    }
}
