use core::fmt;
use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::Value;

/// Every type has a single super-type; `Any` is the top.
#[derive(Debug, Clone)]
pub enum Type {
    Any,
    Bool,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
    Error,
    /// Base of all function types.
    Function,
    /// Base of all array types.
    Array,
    /// Result of statements and procedures.
    None,
    /// Type of the `null` literal.
    Null,
    ArrayOf(Rc<Type>),
    Func(Rc<FunctionType>),
    Named(Rc<NamedType>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionType {
    pub ret: Type,
    pub params: Vec<Type>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: Type,
    pub default: Option<Value>,
}

/// A user-declared (or builtin range) type. Compared by identity.
#[derive(Debug)]
pub struct NamedType {
    pub name: String,
    parent: RefCell<Option<Type>>,
    fields: RefCell<Option<Vec<Field>>>,
}

impl NamedType {
    pub fn new(name: impl Into<String>, parent: Option<Type>) -> Self {
        Self {
            name: name.into(),
            parent: RefCell::new(parent),
            fields: RefCell::new(None),
        }
    }

    pub fn parent(&self) -> Option<Type> {
        self.parent.borrow().clone()
    }

    pub fn set_parent(&self, parent: Type) {
        *self.parent.borrow_mut() = Some(parent);
    }

    /// Structures carry a field list; opaque types do not.
    pub fn is_struct(&self) -> bool {
        self.fields.borrow().is_some()
    }

    pub fn fields(&self) -> Vec<Field> {
        self.fields.borrow().clone().unwrap_or_default()
    }

    pub fn set_fields(&self, fields: Vec<Field>) {
        *self.fields.borrow_mut() = Some(fields);
    }

    pub fn field(&self, name: &str) -> Option<(usize, Field)> {
        let fields = self.fields.borrow();
        let fields = fields.as_ref()?;
        fields
            .iter()
            .position(|f| f.name == name)
            .map(|i| (i, fields[i].clone()))
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Type::ArrayOf(a), Type::ArrayOf(b)) => a == b,
            (Type::Func(a), Type::Func(b)) => a == b,
            (Type::Named(a), Type::Named(b)) => Rc::ptr_eq(a, b),
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

impl Type {
    pub fn array_of(elem: Type) -> Type {
        Type::ArrayOf(Rc::new(elem))
    }

    pub fn func(ret: Type, params: Vec<Type>) -> Type {
        Type::Func(Rc::new(FunctionType { ret, params }))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Type::Byte | Type::Char | Type::Short | Type::Int | Type::Long | Type::Float | Type::Double
        )
    }

    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            Type::Byte | Type::Char | Type::Short | Type::Int | Type::Long
        )
    }

    /// Values that live in an Int slot on the stack.
    pub fn is_int_like(&self) -> bool {
        matches!(
            self,
            Type::Bool | Type::Byte | Type::Char | Type::Short | Type::Int
        )
    }

    pub fn is_reference(&self) -> bool {
        !self.is_numeric() && !matches!(self, Type::Bool | Type::None)
    }

    /// Position on the widening ladder Byte/Short/Char < Int < Long < Float < Double.
    pub fn numeric_rank(&self) -> Option<u8> {
        match self {
            Type::Byte | Type::Short | Type::Char => Some(0),
            Type::Int => Some(1),
            Type::Long => Some(2),
            Type::Float => Some(3),
            Type::Double => Some(4),
            _ => None,
        }
    }

    /// Implicit numeric widening along the ladder.
    pub fn widens_to(&self, to: &Type) -> bool {
        match (self.numeric_rank(), to.numeric_rank()) {
            (Some(a), Some(b)) => a < b || self == to,
            _ => false,
        }
    }

    /// Result type of a binary arithmetic operator on numeric operands.
    pub fn promote(a: &Type, b: &Type) -> Option<Type> {
        let rank = a.numeric_rank()?.max(b.numeric_rank()?);
        Some(match rank {
            0 | 1 => Type::Int,
            2 => Type::Long,
            3 => Type::Float,
            _ => Type::Double,
        })
    }

    pub fn super_type(&self) -> Option<Type> {
        match self {
            Type::Any | Type::None => None,
            Type::ArrayOf(elem) => Some(match elem.as_ref() {
                Type::Any => Type::Array,
                e => match e.super_type() {
                    Some(s) if !e.is_numeric() && *e != Type::Bool => Type::array_of(s),
                    _ => Type::Array,
                },
            }),
            Type::Func(_) => Some(Type::Function),
            Type::Named(n) => n.parent(),
            _ => Some(Type::Any),
        }
    }

    pub fn is_subtype_of(&self, other: &Type) -> bool {
        if *self == Type::None || *other == Type::None {
            return self == other;
        }
        if *other == Type::Any || self == other {
            return true;
        }
        if *self == Type::Null {
            return other.is_reference() && *other != Type::Null;
        }
        if let (Type::Func(a), Type::Func(b)) = (self, other) {
            return a.params.len() == b.params.len()
                && a.ret.is_subtype_of(&b.ret)
                && a
                    .params
                    .iter()
                    .zip(&b.params)
                    .all(|(pa, pb)| pb.is_subtype_of(pa));
        }
        let mut cur = self.super_type();
        while let Some(t) = cur {
            if t == *other {
                return true;
            }
            cur = t.super_type();
        }
        false
    }

    pub fn is_supertype_of(&self, other: &Type) -> bool {
        other.is_subtype_of(self)
    }

    /// Walks up from `self` until a type subsuming `other` is found.
    pub fn common_supertype(&self, other: &Type) -> Type {
        if other.is_subtype_of(self) {
            return self.clone();
        }
        if self.is_subtype_of(other) {
            return other.clone();
        }
        let mut cur = self.super_type();
        while let Some(t) = cur {
            if other.is_subtype_of(&t) {
                return t;
            }
            cur = t.super_type();
        }
        Type::Any
    }

    pub fn element(&self) -> Option<Type> {
        match self {
            Type::ArrayOf(e) => Some(e.as_ref().clone()),
            _ => None,
        }
    }

    pub fn as_func(&self) -> Option<&Rc<FunctionType>> {
        match self {
            Type::Func(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_named(&self) -> Option<&Rc<NamedType>> {
        match self {
            Type::Named(n) => Some(n),
            _ => None,
        }
    }

    /// Value a freshly allocated slot of this type starts with.
    pub fn zero_value(&self) -> Value {
        match self {
            Type::Bool => Value::Bool(false),
            Type::Byte | Type::Char | Type::Short | Type::Int => Value::Int(0),
            Type::Long => Value::Long(0),
            Type::Float => Value::Float(0.0),
            Type::Double => Value::Double(0.0),
            _ => Value::Null,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Any => f.write_str("Any"),
            Type::Bool => f.write_str("Bool"),
            Type::Byte => f.write_str("Byte"),
            Type::Char => f.write_str("Char"),
            Type::Short => f.write_str("Short"),
            Type::Int => f.write_str("Int"),
            Type::Long => f.write_str("Long"),
            Type::Float => f.write_str("Float"),
            Type::Double => f.write_str("Double"),
            Type::String => f.write_str("String"),
            Type::Error => f.write_str("Error"),
            Type::Function => f.write_str("Function"),
            Type::Array => f.write_str("Array"),
            Type::None => f.write_str("<none>"),
            Type::Null => f.write_str("<null>"),
            Type::ArrayOf(e) => write!(f, "[{e}]"),
            Type::Func(func) => {
                f.write_str("(")?;
                for (i, p) in func.params.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{p}")?;
                }
                f.write_str(")")?;
                if func.ret != Type::None {
                    write!(f, ":{}", func.ret)?;
                }
                Ok(())
            }
            Type::Named(n) => f.write_str(&n.name),
        }
    }
}
