use std::rc::Rc;

use crate::ast::{Expr, ExprKind};
use crate::diagnostic::format_expected_found;
use crate::token::TokenKind;
use crate::types::{FunctionType, Type};
use crate::unit::{Func, VarId};

use super::scope::FuncCtx;
use super::{PResult, Parser};

impl Parser<'_> {
    /// `def (params)[: R] = e` or `def (params)[: R] { ... }` inside a
    /// function body. Captured variables become trailing parameters, bound
    /// last to first with `Function.rcurry` where the closure is created.
    pub(super) fn parse_closure(&mut self, line: usize) -> PResult<Expr> {
        let Some(outer) = self.current_func().map(|ctx| ctx.id) else {
            return Err(self.error(line, "Closures are only allowed inside functions"));
        };
        self.expect_sym(TokenKind::LParen)?;
        let params = self.parse_params()?;
        let annotated = self.parse_type_annotation()?;

        self.closure_count += 1;
        let signature = format!("{}${}", self.unit.func(outer).signature, self.closure_count);
        let ids: Vec<VarId> = params
            .iter()
            .map(|(name, ty, pline)| self.new_param(name, ty.clone(), *pline))
            .collect();
        let declared: Vec<Type> = params.iter().map(|(_, ty, _)| ty.clone()).collect();
        let f = self.unit.add_func(Func {
            signature: signature.clone(),
            ty: Rc::new(FunctionType {
                ret: annotated.clone().unwrap_or(Type::None),
                params: declared.clone(),
            }),
            params: Vec::new(),
            body: None,
            constructor: false,
            shared: false,
            pos: self.pos(line),
        });

        let default_ret = if self.at(TokenKind::LBrace)? {
            Type::None
        } else {
            Type::Any
        };
        let mut ctx = FuncCtx::new(f, annotated.clone().unwrap_or(default_ret));
        ctx.closure = true;
        self.push_function(ctx, &ids);
        let body = self.parse_closure_body(annotated, line);
        let ctx = self.pop_function();
        let (body, ret) = body?;
        crate::flow::check_body(&body, self.lexer.file())?;

        let captures = ctx.map(|c| c.captures).unwrap_or_default();
        let own = ids.len();
        let mut all_params = ids;
        all_params.extend(captures.iter().map(|(_, p)| *p));
        let all_types: Vec<Type> = all_params
            .iter()
            .map(|p| self.unit.var(*p).ty.clone())
            .collect();
        log::trace!("closure {signature} captures {} variable(s)", captures.len());
        {
            let func = self.unit.func_mut(f);
            func.ty = Rc::new(FunctionType {
                ret: ret.clone(),
                params: all_types.clone(),
            });
            func.params = all_params;
            func.body = Some(body);
        }
        self.unit.implemented.push(f);

        let mut value = self.func_ref(f, line);
        for (k, (outer_var, _)) in captures.iter().enumerate().rev() {
            let rest = Type::func(ret.clone(), all_types[..own + k].to_vec());
            let captured = self.read_var(*outer_var, line);
            value = self.curry(value, captured, rest, "rcurry", line)?;
        }
        Ok(value)
    }

    fn parse_closure_body(&mut self, annotated: Option<Type>, line: usize) -> PResult<(Expr, Type)> {
        let tok = self.next()?;
        match tok.kind {
            TokenKind::Assign => {
                let e = self.parse_expr()?;
                let ret = annotated.unwrap_or_else(|| e.ty.clone());
                if ret == Type::None {
                    let stmt = e.into_stmt();
                    return Ok((Expr::block(Vec::new(), vec![stmt], Type::None, line), ret));
                }
                let e = self.valued(e)?;
                let e = self.coerce(e, &ret)?;
                let e_line = e.line;
                let ret_stmt = Expr::new(ExprKind::Return(Some(Box::new(e))), Type::None, e_line);
                Ok((ret_stmt, ret))
            }
            TokenKind::LBrace => {
                let ret = annotated.unwrap_or(Type::None);
                let block = self.parse_block_body(tok.line)?;
                Ok((self.finish_body(block, &ret)?, ret))
            }
            _ => Err(self.syntax_error(
                tok.line,
                format_expected_found("Expected `=` or `{` after closure signature", &tok.describe()),
            )),
        }
    }
}
