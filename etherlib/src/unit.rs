use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{Expr, Value};
use crate::diagnostic::SourcePos;
use crate::types::{Field, FunctionType, NamedType, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Global,
    Param,
    Local,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Var {
    pub name: String,
    pub ty: Type,
    pub kind: VarKind,
    pub constant: bool,
    /// Compile-time value of a constant.
    pub value: Option<Value>,
    /// Temporaries introduced by desugaring.
    pub synthetic: bool,
    pub line: usize,
}

impl Var {
    pub fn new(name: impl Into<String>, ty: Type, kind: VarKind, line: usize) -> Self {
        Self {
            name: name.into(),
            ty,
            kind,
            constant: false,
            value: None,
            synthetic: false,
            line,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Func {
    /// Unique key, `name` or `Type.name`.
    pub signature: String,
    pub ty: Rc<FunctionType>,
    pub params: Vec<VarId>,
    pub body: Option<Expr>,
    pub constructor: bool,
    /// Declared in a header, so exported from the object.
    pub shared: bool,
    pub pos: SourcePos,
}

impl Func {
    pub fn is_implemented(&self) -> bool {
        self.body.is_some()
    }

    /// `Point` for `Point.len`.
    pub fn owner(&self) -> Option<&str> {
        self.signature.split_once('.').map(|(owner, _)| owner)
    }

    pub fn method_name(&self) -> &str {
        self.signature
            .split_once('.')
            .map_or(self.signature.as_str(), |(_, name)| name)
    }
}

/// Everything the compiler knows about one compilation unit.
#[derive(Debug, Clone)]
pub struct Unit {
    pub vars: Vec<Var>,
    pub funcs: Vec<Func>,
    types: HashMap<String, Type>,
    globals: HashMap<String, VarId>,
    /// Functions in the order their bodies were parsed.
    pub implemented: Vec<FuncId>,
    /// Stores for non-constant global initializers, run at the start of `main`.
    pub global_inits: Vec<Expr>,
    int_range: Type,
    long_range: Type,
}

impl Default for Unit {
    fn default() -> Self {
        Self::new()
    }
}

impl Unit {
    pub fn new() -> Self {
        let int_range = range_type("IntRange", Type::Int);
        let long_range = range_type("LongRange", Type::Long);
        let mut unit = Self {
            vars: Vec::new(),
            funcs: Vec::new(),
            types: HashMap::new(),
            globals: HashMap::new(),
            implemented: Vec::new(),
            global_inits: Vec::new(),
            int_range: int_range.clone(),
            long_range: long_range.clone(),
        };
        for ty in [
            Type::Any,
            Type::Bool,
            Type::Byte,
            Type::Char,
            Type::Short,
            Type::Int,
            Type::Long,
            Type::Float,
            Type::Double,
            Type::String,
            Type::Error,
            Type::Function,
            Type::Array,
            int_range,
            long_range,
        ] {
            unit.types.insert(ty.to_string(), ty);
        }
        unit
    }

    pub fn int_range(&self) -> Type {
        self.int_range.clone()
    }

    pub fn long_range(&self) -> Type {
        self.long_range.clone()
    }

    pub fn get_type(&self, name: &str) -> Option<Type> {
        self.types.get(name).cloned()
    }

    pub fn define_type(&mut self, name: impl Into<String>, ty: Type) {
        self.types.insert(name.into(), ty);
    }

    pub fn add_var(&mut self, var: Var) -> VarId {
        self.vars.push(var);
        VarId((self.vars.len() - 1) as u32)
    }

    pub fn var(&self, id: VarId) -> &Var {
        &self.vars[id.0 as usize]
    }

    pub fn var_mut(&mut self, id: VarId) -> &mut Var {
        &mut self.vars[id.0 as usize]
    }

    pub fn add_func(&mut self, func: Func) -> FuncId {
        self.funcs.push(func);
        FuncId((self.funcs.len() - 1) as u32)
    }

    pub fn func(&self, id: FuncId) -> &Func {
        &self.funcs[id.0 as usize]
    }

    pub fn func_mut(&mut self, id: FuncId) -> &mut Func {
        &mut self.funcs[id.0 as usize]
    }

    pub fn func_ids(&self) -> impl Iterator<Item = FuncId> + use<> {
        (0..self.funcs.len() as u32).map(FuncId)
    }

    pub fn global(&self, name: &str) -> Option<VarId> {
        self.globals.get(name).copied()
    }

    pub fn add_global(&mut self, name: impl Into<String>, id: VarId) {
        self.globals.insert(name.into(), id);
    }

    pub fn func_by_signature(&self, signature: &str) -> Option<FuncId> {
        let id = self.global(signature)?;
        match self.var(id).value {
            Some(Value::Func(f)) => Some(f),
            _ => None,
        }
    }

    /// Finds `T.name` on `ty` or the nearest super-type defining it.
    pub fn find_method(&self, ty: &Type, name: &str) -> Option<FuncId> {
        let mut cur = Some(ty.clone());
        while let Some(t) = cur {
            if let Some(key) = method_owner_key(&t) {
                if let Some(f) = self.func_by_signature(&format!("{key}.{name}")) {
                    return Some(f);
                }
            }
            cur = t.super_type();
        }
        None
    }

    pub fn main_func(&self) -> Option<FuncId> {
        self.func_by_signature("main")
    }
}

/// Name under which methods of `ty` are declared; composite types have none.
pub fn method_owner_key(ty: &Type) -> Option<String> {
    match ty {
        Type::ArrayOf(_) | Type::Func(_) | Type::None | Type::Null => None,
        t => Some(t.to_string()),
    }
}

fn range_type(name: &str, bound: Type) -> Type {
    let named = NamedType::new(name, Some(Type::Any));
    named.set_fields(vec![
        Field {
            name: "from".to_string(),
            ty: bound.clone(),
            default: None,
        },
        Field {
            name: "to".to_string(),
            ty: bound,
            default: None,
        },
    ]);
    Type::Named(Rc::new(named))
}
