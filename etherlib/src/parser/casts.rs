use crate::ast::{Expr, ExprKind, Value};
use crate::diagnostic::Category;
use crate::types::Type;

use super::{PResult, Parser};

impl Parser<'_> {
    /// Implicit conversion at assignments, arguments, returns and operands.
    pub(super) fn coerce(&mut self, e: Expr, to: &Type) -> PResult<Expr> {
        self.cast_to(e, to, false)
    }

    /// Converts `e` to `to`. Safe conversions are silent; unsafe ones warn
    /// unless `explicit`; impossible ones are errors.
    pub(super) fn cast_to(&mut self, e: Expr, to: &Type, explicit: bool) -> PResult<Expr> {
        let from = e.ty.clone();
        let line = e.line;
        if from == *to {
            return Ok(e);
        }
        if from == Type::None {
            return Err(self.error(line, "Expression has no value"));
        }
        if *to == Type::None {
            return Err(self.error(line, format!("Cannot cast {from} to no value")));
        }

        if from.is_numeric() && to.is_numeric() {
            if let Some(Value::Int(v)) = e.const_value() {
                if from.is_int_like() && fits_narrow(*v, to) {
                    return Ok(Expr::constant(Value::Int(*v), to.clone(), line));
                }
            }
            if !explicit && !from.widens_to(to) {
                self.warn(
                    Category::TypeCast,
                    line,
                    format!("Unsafe type cast from {from} to {to}"),
                )?;
            }
            return Ok(wrap_cast(e, to));
        }

        if from == Type::Null {
            if to.is_reference() {
                return Ok(Expr { ty: to.clone(), ..e });
            }
            return Err(self.error(line, format!("Cannot cast null to {to}")));
        }
        if from.is_subtype_of(to) {
            return Ok(wrap_cast(e, to));
        }
        if to.is_subtype_of(&from) {
            if !explicit {
                self.warn(
                    Category::TypeCast,
                    line,
                    format!("Unsafe type cast from {from} to {to}"),
                )?;
            }
            return Ok(wrap_cast(e, to));
        }
        Err(self.error(line, format!("Cannot cast {from} to {to}")))
    }

    /// Conditions must be Bool.
    pub(super) fn condition(&mut self, e: Expr) -> PResult<Expr> {
        if e.ty != Type::Bool {
            return Err(self.error(
                e.line,
                format!("Condition must be Bool, found {}", e.ty),
            ));
        }
        Ok(e)
    }

    /// Rejects expressions without a value where one is required.
    pub(super) fn valued(&self, e: Expr) -> PResult<Expr> {
        if e.ty == Type::None {
            return Err(self.error(e.line, "Expression has no value"));
        }
        Ok(e)
    }
}

fn wrap_cast(e: Expr, to: &Type) -> Expr {
    let line = e.line;
    Expr::new(ExprKind::Cast(Box::new(e)), to.clone(), line)
}

/// Integer constants narrow silently into Byte/Short/Char when they fit.
fn fits_narrow(v: i32, to: &Type) -> bool {
    match to {
        Type::Byte => i8::try_from(v).is_ok(),
        Type::Short => i16::try_from(v).is_ok(),
        Type::Char => u16::try_from(v).is_ok(),
        _ => false,
    }
}
