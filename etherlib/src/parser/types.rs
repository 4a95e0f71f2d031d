use crate::diagnostic::format_expected_found;
use crate::token::TokenKind;
use crate::types::Type;

use super::{PResult, Parser};

impl Parser<'_> {
    /// `Name`, `[T]`, or `(P1, P2): R`.
    pub(super) fn parse_type(&mut self) -> PResult<Type> {
        let tok = self.next()?;
        match tok.kind {
            TokenKind::Word => self
                .unit
                .get_type(tok.text())
                .ok_or_else(|| self.error(tok.line, format!("Undefined type `{}`", tok.text()))),
            TokenKind::LBracket => {
                let elem = self.parse_type()?;
                self.expect_sym(TokenKind::RBracket)?;
                Ok(Type::array_of(elem))
            }
            TokenKind::LParen => {
                let mut params = Vec::new();
                if !self.eat(TokenKind::RParen)? {
                    loop {
                        params.push(self.parse_type()?);
                        if !self.eat(TokenKind::Comma)? {
                            break;
                        }
                    }
                    self.expect_sym(TokenKind::RParen)?;
                }
                let ret = if self.eat(TokenKind::Colon)? {
                    self.parse_type()?
                } else {
                    Type::None
                };
                Ok(Type::func(ret, params))
            }
            _ => Err(self.syntax_error(
                tok.line,
                format_expected_found("Expected type", &tok.describe()),
            )),
        }
    }

    /// Optional `: Type` annotation.
    pub(super) fn parse_type_annotation(&mut self) -> PResult<Option<Type>> {
        if self.eat(TokenKind::Colon)? {
            Ok(Some(self.parse_type()?))
        } else {
            Ok(None)
        }
    }
}
