#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use etherlib::bytecode::{ObjectFile, Opcode, Operand, PoolEntry, decode, verify};
use etherlib::compile::{CompileFailure, Compiled, compile_source, parse_source};
use etherlib::config::CompilerOptions;
use etherlib::diagnostic::{Category, DiagnosticBag};
use etherlib::unit::Unit;

pub fn options(opt_level: u8) -> CompilerOptions {
    CompilerOptions {
        opt_level,
        ..CompilerOptions::default()
    }
}

pub fn compile_ok(src: &str) -> Compiled {
    compile_with(src, &CompilerOptions::default())
}

pub fn compile_with(src: &str, options: &CompilerOptions) -> Compiled {
    match compile_source(src, options) {
        Ok(compiled) => {
            verify(&compiled.object).expect("emitted code verifies");
            compiled
        }
        Err(failure) => panic!("compile failed: {failure}\n{:?}", failure.diagnostics),
    }
}

pub fn compile_err(src: &str) -> CompileFailure {
    match compile_source(src, &CompilerOptions::default()) {
        Ok(_) => panic!("expected a compile error for:\n{src}"),
        Err(failure) => failure,
    }
}

pub fn parse_ok(src: &str) -> (Unit, DiagnosticBag) {
    parse_source(src, &CompilerOptions::default())
        .unwrap_or_else(|failure| panic!("parse failed: {failure}"))
}

pub fn assert_error_contains(failure: &CompileFailure, needle: &str) {
    assert!(
        failure.error.message.contains(needle),
        "expected error containing `{needle}`, got `{}`",
        failure.error
    );
}

pub fn assert_warned(diags: &DiagnosticBag, category: Category, needle: &str) {
    assert!(
        diags
            .as_slice()
            .iter()
            .any(|d| d.category == category && d.message.contains(needle)),
        "missing {category:?} warning containing `{needle}` in {:?}",
        diags.as_slice()
    );
}

/// Compiles `src` and runs its `main` on the reference interpreter.
pub fn run_ok(src: &str) -> Value {
    run_with(src, &CompilerOptions::default())
}

pub fn run_with(src: &str, options: &CompilerOptions) -> Value {
    let compiled = compile_with(src, options);
    Machine::new(&compiled.object)
        .run_main()
        .unwrap_or_else(|thrown| panic!("uncaught error: {thrown}"))
}

pub fn run_int(src: &str) -> i32 {
    match run_ok(src) {
        Value::Int(n) => n,
        other => panic!("expected an Int result, got {other:?}"),
    }
}

// ---- reference interpreter -------------------------------------------------

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    /// Also carries `Bool`, `Byte`, `Char` and `Short`.
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(Rc<str>),
    Array(Rc<RefCell<Vec<Value>>>),
    Func(Callable),
    Error { code: i32, msg: Rc<str> },
}

#[derive(Debug, Clone)]
pub enum Callable {
    Code(usize),
    Builtin(String),
    Bound {
        f: Box<Callable>,
        arg: Box<Value>,
        last: bool,
    },
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Long(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Double(x) => write!(f, "{x}"),
            Value::Str(s) => f.write_str(s),
            Value::Array(items) => write!(f, "[{} items]", items.borrow().len()),
            Value::Func(_) => f.write_str("<function>"),
            Value::Error { code, msg } => write!(f, "error {code}: {msg}"),
        }
    }
}

impl Value {
    fn int(&self) -> i32 {
        match self {
            Value::Int(n) => *n,
            other => panic!("expected int, got {other:?}"),
        }
    }

    fn long(&self) -> i64 {
        match self {
            Value::Long(n) => *n,
            Value::Int(n) => i64::from(*n),
            other => panic!("expected long, got {other:?}"),
        }
    }

    fn float(&self) -> f32 {
        match self {
            Value::Float(x) => *x,
            other => panic!("expected float, got {other:?}"),
        }
    }

    fn double(&self) -> f64 {
        match self {
            Value::Double(x) => *x,
            other => panic!("expected double, got {other:?}"),
        }
    }

    fn str(&self) -> Rc<str> {
        match self {
            Value::Str(s) => s.clone(),
            other => panic!("expected string, got {other:?}"),
        }
    }

    fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// The runtime's string hash: `h = 31 * h + c` over UTF-16 units.
pub fn string_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(i32::from(c)))
}

fn ordering<T: PartialOrd>(a: T, b: T) -> i32 {
    match a.partial_cmp(&b) {
        Some(std::cmp::Ordering::Less) => -1,
        Some(std::cmp::Ordering::Equal) => 0,
        Some(std::cmp::Ordering::Greater) => 1,
        None => 2,
    }
}

const STEP_LIMIT: usize = 1_000_000;

/// Executes an object's code the way the runtime does, with the builtin
/// methods of the prelude implemented natively.
pub struct Machine<'a> {
    obj: &'a ObjectFile,
    globals: HashMap<String, Value>,
    steps: usize,
}

impl<'a> Machine<'a> {
    pub fn new(obj: &'a ObjectFile) -> Self {
        Self {
            obj,
            globals: HashMap::new(),
            steps: 0,
        }
    }

    pub fn run_main(&mut self) -> Result<Value, Value> {
        let index = self
            .obj
            .functions()
            .find(|(_, f)| f.name == "main")
            .map(|(i, _)| i)
            .expect("object has a main function");
        self.call(&Callable::Code(index), Vec::new())
    }

    fn pool_value(&self, index: u16) -> Value {
        match &self.obj.pool[usize::from(index)] {
            PoolEntry::Null => Value::Null,
            PoolEntry::Int(n) => Value::Int(*n),
            PoolEntry::Long(n) => Value::Long(*n),
            PoolEntry::Float(x) => Value::Float(*x),
            PoolEntry::Double(x) => Value::Double(*x),
            PoolEntry::Str(s) => Value::Str(Rc::from(s.as_str())),
            PoolEntry::Unresolved(name) | PoolEntry::External(name) => {
                Value::Func(Callable::Builtin(name.clone()))
            }
            PoolEntry::Func(_) => Value::Func(Callable::Code(usize::from(index))),
        }
    }

    fn pool_name(&self, index: u16) -> String {
        match &self.obj.pool[usize::from(index)] {
            PoolEntry::Str(s) => s.clone(),
            other => panic!("expected a name, got {other:?}"),
        }
    }

    fn call(&mut self, callee: &Callable, mut args: Vec<Value>) -> Result<Value, Value> {
        match callee {
            Callable::Code(index) => self.execute(*index, args),
            Callable::Builtin(name) => builtin(name, args),
            Callable::Bound { f, arg, last } => {
                if *last {
                    args.push((**arg).clone());
                } else {
                    args.insert(0, (**arg).clone());
                }
                self.call(f, args)
            }
        }
    }

    fn execute(&mut self, index: usize, args: Vec<Value>) -> Result<Value, Value> {
        let obj = self.obj;
        let PoolEntry::Func(f) = &obj.pool[index] else {
            panic!("pool entry {index} is not a function");
        };
        let mut locals = vec![Value::Null; usize::from(f.max_locals).max(args.len())];
        for (slot, arg) in args.into_iter().enumerate() {
            locals[slot] = arg;
        }
        let mut stack: Vec<Value> = Vec::new();
        let mut ip = 0;
        loop {
            self.steps += 1;
            assert!(self.steps < STEP_LIMIT, "step limit exceeded in {}", f.name);
            let instr = decode(&f.code, ip).expect("valid instruction");
            let at = ip;
            ip = instr.next();
            let outcome = self.step(&instr.op, &instr.operand, &instr.targets(), &mut stack, &mut locals);
            match outcome {
                Ok(Step::Next) => {}
                Ok(Step::Jump(target)) => ip = target,
                Ok(Step::Return(v)) => return Ok(v),
                Err(error) => {
                    let region = f.errors.iter().flatten().find(|r| {
                        usize::from(r.start) <= at && at < usize::from(r.end)
                    });
                    let Some(region) = region else {
                        return Err(error);
                    };
                    stack.truncate(usize::from(region.depth));
                    stack.push(error);
                    ip = usize::from(region.handler);
                }
            }
        }
    }

    fn step(
        &mut self,
        op: &Opcode,
        operand: &Operand,
        targets: &[i64],
        stack: &mut Vec<Value>,
        locals: &mut [Value],
    ) -> Result<Step, Value> {
        use Opcode::*;
        macro_rules! pop {
            () => {
                stack.pop().expect("operand stack underflow")
            };
        }
        macro_rules! binop {
            ($get:ident, $make:path, |$a:ident, $b:ident| $body:expr) => {{
                let $b = pop!().$get();
                let $a = pop!().$get();
                stack.push($make($body));
            }};
        }
        let target = |i: usize| targets[i] as usize;
        match op {
            Nop => {}
            AconstNull => stack.push(Value::Null),
            IconstM1 => stack.push(Value::Int(-1)),
            Iconst0 => stack.push(Value::Int(0)),
            Iconst1 => stack.push(Value::Int(1)),
            Iconst2 => stack.push(Value::Int(2)),
            Iconst3 => stack.push(Value::Int(3)),
            Iconst4 => stack.push(Value::Int(4)),
            Iconst5 => stack.push(Value::Int(5)),
            Lconst0 => stack.push(Value::Long(0)),
            Lconst1 => stack.push(Value::Long(1)),
            Fconst0 => stack.push(Value::Float(0.0)),
            Fconst1 => stack.push(Value::Float(1.0)),
            Dconst0 => stack.push(Value::Double(0.0)),
            Dconst1 => stack.push(Value::Double(1.0)),
            Bipush | Sipush | Ldc | Load | Store | GetGlobal | SetGlobal | Box | Unbox | Checkcast => {
                match (op, operand) {
                    (Bipush, Operand::I8(v)) => stack.push(Value::Int(i32::from(*v))),
                    (Sipush, Operand::I16(v)) => stack.push(Value::Int(i32::from(*v))),
                    (Ldc, Operand::Pool(i)) => stack.push(self.pool_value(*i)),
                    (Load, Operand::Local(s)) => stack.push(locals[usize::from(*s)].clone()),
                    (Store, Operand::Local(s)) => locals[usize::from(*s)] = pop!(),
                    (GetGlobal, Operand::Pool(i)) => {
                        let name = self.pool_name(*i);
                        stack.push(self.globals.get(&name).cloned().unwrap_or(Value::Null));
                    }
                    (SetGlobal, Operand::Pool(i)) => {
                        let name = self.pool_name(*i);
                        let v = pop!();
                        self.globals.insert(name, v);
                    }
                    // Values are dynamically tagged here.
                    _ => {}
                }
            }
            Iadd => binop!(int, Value::Int, |a, b| a.wrapping_add(b)),
            Ladd => binop!(long, Value::Long, |a, b| a.wrapping_add(b)),
            Fadd => binop!(float, Value::Float, |a, b| a + b),
            Dadd => binop!(double, Value::Double, |a, b| a + b),
            Isub => binop!(int, Value::Int, |a, b| a.wrapping_sub(b)),
            Lsub => binop!(long, Value::Long, |a, b| a.wrapping_sub(b)),
            Fsub => binop!(float, Value::Float, |a, b| a - b),
            Dsub => binop!(double, Value::Double, |a, b| a - b),
            Imul => binop!(int, Value::Int, |a, b| a.wrapping_mul(b)),
            Lmul => binop!(long, Value::Long, |a, b| a.wrapping_mul(b)),
            Fmul => binop!(float, Value::Float, |a, b| a * b),
            Dmul => binop!(double, Value::Double, |a, b| a * b),
            Idiv | Irem | Ldiv | Lrem => {
                let b = pop!().long();
                let a = pop!().long();
                if b == 0 {
                    return Err(Value::Error {
                        code: 1,
                        msg: Rc::from("Division by zero"),
                    });
                }
                let r = if matches!(op, Idiv | Ldiv) {
                    a.wrapping_div(b)
                } else {
                    a.wrapping_rem(b)
                };
                stack.push(if matches!(op, Idiv | Irem) {
                    Value::Int(r as i32)
                } else {
                    Value::Long(r)
                });
            }
            Fdiv => binop!(float, Value::Float, |a, b| a / b),
            Ddiv => binop!(double, Value::Double, |a, b| a / b),
            Frem => binop!(float, Value::Float, |a, b| a % b),
            Drem => binop!(double, Value::Double, |a, b| a % b),
            Ineg => {
                let a = pop!().int();
                stack.push(Value::Int(a.wrapping_neg()));
            }
            Lneg => {
                let a = pop!().long();
                stack.push(Value::Long(a.wrapping_neg()));
            }
            Fneg => {
                let a = pop!().float();
                stack.push(Value::Float(-a));
            }
            Dneg => {
                let a = pop!().double();
                stack.push(Value::Double(-a));
            }
            Iand => binop!(int, Value::Int, |a, b| a & b),
            Land => binop!(long, Value::Long, |a, b| a & b),
            Ior => binop!(int, Value::Int, |a, b| a | b),
            Lor => binop!(long, Value::Long, |a, b| a | b),
            Ixor => binop!(int, Value::Int, |a, b| a ^ b),
            Lxor => binop!(long, Value::Long, |a, b| a ^ b),
            Ishl => binop!(int, Value::Int, |a, b| a.wrapping_shl(b as u32)),
            Lshl => binop!(long, Value::Long, |a, b| a.wrapping_shl(b as u32)),
            Ishr => binop!(int, Value::Int, |a, b| a.wrapping_shr(b as u32)),
            Lshr => binop!(long, Value::Long, |a, b| a.wrapping_shr(b as u32)),
            Iushr => binop!(int, Value::Int, |a, b| ((a as u32).wrapping_shr(b as u32)) as i32),
            Lushr => binop!(long, Value::Long, |a, b| ((a as u64).wrapping_shr(b as u32)) as i64),
            Icmp => binop!(int, Value::Int, |a, b| ordering(a, b)),
            Lcmp => binop!(long, Value::Int, |a, b| ordering(a, b)),
            Fcmp => binop!(float, Value::Int, |a, b| ordering(a, b)),
            Dcmp => binop!(double, Value::Int, |a, b| ordering(a, b)),
            Acmp => {
                let b = pop!();
                let a = pop!();
                stack.push(Value::Int(if a.same(&b) { 0 } else { 1 }));
            }
            CmpEq | CmpNe | CmpLt | CmpLe | CmpGt | CmpGe => {
                let r = match pop!() {
                    Value::Long(n) => n as i32,
                    v => v.int(),
                };
                let holds = match op {
                    CmpEq => r == 0,
                    CmpNe => r != 0,
                    CmpLt => r == -1,
                    CmpLe => r == -1 || r == 0,
                    CmpGt => r == 1,
                    _ => r == 0 || r == 1,
                };
                stack.push(Value::Int(i32::from(holds)));
            }
            I2l => {
                let a = pop!().int();
                stack.push(Value::Long(i64::from(a)));
            }
            I2f => {
                let a = pop!().int();
                stack.push(Value::Float(a as f32));
            }
            I2d => {
                let a = pop!().int();
                stack.push(Value::Double(f64::from(a)));
            }
            L2i => {
                let a = pop!().long();
                stack.push(Value::Int(a as i32));
            }
            L2f => {
                let a = pop!().long();
                stack.push(Value::Float(a as f32));
            }
            L2d => {
                let a = pop!().long();
                stack.push(Value::Double(a as f64));
            }
            F2i => {
                let a = pop!().float();
                stack.push(Value::Int(a as i32));
            }
            F2l => {
                let a = pop!().float();
                stack.push(Value::Long(a as i64));
            }
            F2d => {
                let a = pop!().float();
                stack.push(Value::Double(f64::from(a)));
            }
            D2i => {
                let a = pop!().double();
                stack.push(Value::Int(a as i32));
            }
            D2l => {
                let a = pop!().double();
                stack.push(Value::Long(a as i64));
            }
            D2f => {
                let a = pop!().double();
                stack.push(Value::Float(a as f32));
            }
            I2b => {
                let a = pop!().int();
                stack.push(Value::Int(i32::from(a as i8)));
            }
            I2c => {
                let a = pop!().int();
                stack.push(Value::Int(i32::from(a as u16)));
            }
            I2s => {
                let a = pop!().int();
                stack.push(Value::Int(i32::from(a as i16)));
            }
            Ifeq | Ifne => {
                let zero = pop!().int() == 0;
                if zero == matches!(op, Ifeq) {
                    return Ok(Step::Jump(target(0)));
                }
            }
            Goto => return Ok(Step::Jump(target(0))),
            Tableswitch | Lookupswitch => {
                let key = pop!().int();
                let slot = match operand {
                    Operand::Table { low, offsets, .. } => {
                        let i = i64::from(key) - i64::from(*low);
                        usize::try_from(i).ok().filter(|i| *i < offsets.len()).map(|i| i + 1)
                    }
                    Operand::Lookup { pairs, .. } => {
                        pairs.iter().position(|(k, _)| *k == key).map(|i| i + 1)
                    }
                    _ => None,
                };
                return Ok(Step::Jump(target(slot.unwrap_or(0))));
            }
            Newia | Newla | Newfa | Newda | Newaa => {
                let n = usize::try_from(pop!().int()).expect("non-negative array length");
                let fill = match op {
                    Newia => Value::Int(0),
                    Newla => Value::Long(0),
                    Newfa => Value::Float(0.0),
                    Newda => Value::Double(0.0),
                    _ => Value::Null,
                };
                stack.push(Value::Array(Rc::new(RefCell::new(vec![fill; n]))));
            }
            Iaload | Laload | Faload | Daload | Aaload => {
                let i = pop!().int();
                let Value::Array(items) = pop!() else {
                    return Err(null_error());
                };
                let v = usize::try_from(i).ok().and_then(|i| items.borrow().get(i).cloned());
                stack.push(v.ok_or_else(index_error)?);
            }
            Iastore | Lastore | Fastore | Dastore | Aastore => {
                let v = pop!();
                let i = pop!().int();
                let Value::Array(items) = pop!() else {
                    return Err(null_error());
                };
                let mut items = items.borrow_mut();
                let slot = usize::try_from(i).ok().and_then(|i| items.get_mut(i));
                *slot.ok_or_else(index_error)? = v;
            }
            Alen => {
                let Value::Array(items) = pop!() else {
                    return Err(null_error());
                };
                let n = items.borrow().len();
                stack.push(Value::Int(n as i32));
            }
            Pop => {
                pop!();
            }
            Dup => {
                let top = stack.last().cloned().expect("operand stack underflow");
                stack.push(top);
            }
            Call | Calv => {
                let Operand::U8(argc) = operand else {
                    unreachable!("call without argument count");
                };
                let args = stack.split_off(stack.len() - usize::from(*argc));
                let Value::Func(callee) = pop!() else {
                    return Err(null_error());
                };
                let result = self.call(&callee, args)?;
                if matches!(op, Call) {
                    stack.push(result);
                }
            }
            Return => return Ok(Step::Return(pop!())),
            RetNull => return Ok(Step::Return(Value::Null)),
            Throw => {
                let msg = pop!();
                let code = pop!().int();
                let msg = match msg {
                    Value::Null => Rc::from(""),
                    other => other.str(),
                };
                return Err(Value::Error { code, msg });
            }
            Concat => {
                let Operand::U8(n) = operand else {
                    unreachable!("concat without count");
                };
                let parts = stack.split_off(stack.len() - usize::from(*n));
                let joined: String = parts.iter().map(ToString::to_string).collect();
                stack.push(Value::Str(Rc::from(joined)));
            }
        }
        Ok(Step::Next)
    }
}

enum Step {
    Next,
    Jump(usize),
    Return(Value),
}

fn null_error() -> Value {
    Value::Error {
        code: 2,
        msg: Rc::from("Null reference"),
    }
}

fn index_error() -> Value {
    Value::Error {
        code: 3,
        msg: Rc::from("Index out of bounds"),
    }
}

fn builtin(name: &str, args: Vec<Value>) -> Result<Value, Value> {
    let arg = |i: usize| args[i].clone();
    Ok(match name {
        "Any.tostr" => Value::Str(Rc::from(arg(0).to_string())),
        "Any.hash" => Value::Int(string_hash(&arg(0).to_string())),
        "String.len" => Value::Int(arg(0).str().encode_utf16().count() as i32),
        "String.get" => {
            let units: Vec<u16> = arg(0).str().encode_utf16().collect();
            let at = usize::try_from(arg(1).int()).map_err(|_| index_error())?;
            Value::Int(i32::from(*units.get(at).ok_or_else(index_error)?))
        }
        "String.range" => {
            let s: Vec<char> = arg(0).str().chars().collect();
            let from = usize::try_from(arg(1).int()).map_err(|_| index_error())?;
            let to = usize::try_from(arg(2).int()).map_err(|_| index_error())?;
            let part: String = s.get(from..to).ok_or_else(index_error)?.iter().collect();
            Value::Str(Rc::from(part))
        }
        "String.hash" => Value::Int(string_hash(&arg(0).str())),
        "String.eq" => Value::Int(i32::from(matches!(arg(1), Value::Str(s) if s == arg(0).str()))),
        "String.cmp" => Value::Int(ordering(arg(0).str(), arg(1).str())),
        "Function.curry" | "Function.rcurry" => {
            let Value::Func(f) = arg(0) else {
                return Err(null_error());
            };
            Value::Func(Callable::Bound {
                f: Box::new(f),
                arg: Box::new(arg(1)),
                last: name == "Function.rcurry",
            })
        }
        "Error.code" => match arg(0) {
            Value::Error { code, .. } => Value::Int(code),
            _ => return Err(null_error()),
        },
        "Error.msg" => match arg(0) {
            Value::Error { msg, .. } => Value::Str(msg),
            _ => return Err(null_error()),
        },
        other => panic!("unknown builtin `{other}`"),
    })
}
