//! Lowers optimized function bodies to stack code.

use std::collections::HashMap;

use super::{
    ErrorRegion, FunctionCode, MAX_ARGS, MAX_CODE, MAX_LOCALS, MAX_STACK, ObjectFile, Opcode, Pool,
    Prim,
};
use crate::ast::{BinaryOp, CmpOp, Expr, ExprKind, LogicOp, SwitchCase, UnaryOp, Value};
use crate::diagnostic::SourcePos;
use crate::error::{CompileError, CompileResult};
use crate::flow::{self, Flow};
use crate::types::Type;
use crate::unit::{Func, FuncId, Unit, VarId, VarKind};

/// Emits every implemented function of `unit` into one object.
pub fn write_unit(unit: &Unit, debug_lines: bool) -> CompileResult<ObjectFile> {
    let mut pool = Pool::new();
    let mut entries = Vec::with_capacity(unit.implemented.len());
    for &f in &unit.implemented {
        let func = unit.func(f);
        let index = pool
            .reserve_function(&func.signature)
            .ok_or_else(|| CompileError::codegen(func.pos.clone(), "Too many constants"))?;
        entries.push((f, index));
    }
    let indices: HashMap<FuncId, u16> = entries.iter().copied().collect();
    for (f, index) in entries {
        let func = unit.func(f);
        let code = FunctionWriter::new(unit, &mut pool, &indices, func, debug_lines).write()?;
        log::trace!(
            "emitted {}: {} bytes, stack {}, locals {}",
            func.signature,
            code.code.len(),
            code.max_stack,
            code.max_locals
        );
        pool.set_function(index, code);
    }
    log::debug!("object pool has {} entries", pool.len());
    Ok(ObjectFile {
        pool: pool.into_entries(),
        ..ObjectFile::default()
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Label(usize);

#[derive(Debug, Default)]
struct LabelState {
    pos: Option<usize>,
    /// Stack depth expected on arrival.
    depth: Option<usize>,
}

#[derive(Debug)]
struct Fixup {
    /// Offset of the i16 operand.
    at: usize,
    /// Address the offset is relative to.
    base: usize,
    label: Label,
}

#[derive(Debug, Clone, Copy)]
struct LoopLabels {
    exit: Label,
    next: Label,
    depth: usize,
}

/// Operand kinds the typed opcodes distinguish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    I,
    L,
    F,
    D,
    A,
}

fn kind_of(ty: &Type) -> Kind {
    match ty {
        Type::Long => Kind::L,
        Type::Float => Kind::F,
        Type::Double => Kind::D,
        t if t.is_int_like() => Kind::I,
        _ => Kind::A,
    }
}

fn arith(op: BinaryOp, kind: Kind) -> Option<Opcode> {
    use Opcode::*;
    Some(match (op, kind) {
        (BinaryOp::Add, Kind::I) => Iadd,
        (BinaryOp::Add, Kind::L) => Ladd,
        (BinaryOp::Add, Kind::F) => Fadd,
        (BinaryOp::Add, Kind::D) => Dadd,
        (BinaryOp::Sub, Kind::I) => Isub,
        (BinaryOp::Sub, Kind::L) => Lsub,
        (BinaryOp::Sub, Kind::F) => Fsub,
        (BinaryOp::Sub, Kind::D) => Dsub,
        (BinaryOp::Mul, Kind::I) => Imul,
        (BinaryOp::Mul, Kind::L) => Lmul,
        (BinaryOp::Mul, Kind::F) => Fmul,
        (BinaryOp::Mul, Kind::D) => Dmul,
        (BinaryOp::Div, Kind::I) => Idiv,
        (BinaryOp::Div, Kind::L) => Ldiv,
        (BinaryOp::Div, Kind::F) => Fdiv,
        (BinaryOp::Div, Kind::D) => Ddiv,
        (BinaryOp::Mod, Kind::I) => Irem,
        (BinaryOp::Mod, Kind::L) => Lrem,
        (BinaryOp::Mod, Kind::F) => Frem,
        (BinaryOp::Mod, Kind::D) => Drem,
        (BinaryOp::And, Kind::I) => Iand,
        (BinaryOp::And, Kind::L) => Land,
        (BinaryOp::Or, Kind::I) => Ior,
        (BinaryOp::Or, Kind::L) => Lor,
        (BinaryOp::Xor, Kind::I) => Ixor,
        (BinaryOp::Xor, Kind::L) => Lxor,
        (BinaryOp::Shl, Kind::I) => Ishl,
        (BinaryOp::Shl, Kind::L) => Lshl,
        (BinaryOp::Shr, Kind::I) => Ishr,
        (BinaryOp::Shr, Kind::L) => Lshr,
        (BinaryOp::Ushr, Kind::I) => Iushr,
        (BinaryOp::Ushr, Kind::L) => Lushr,
        _ => return None,
    })
}

fn array_ops(kind: Kind) -> (Opcode, Opcode, Opcode) {
    match kind {
        Kind::I => (Opcode::Newia, Opcode::Iaload, Opcode::Iastore),
        Kind::L => (Opcode::Newla, Opcode::Laload, Opcode::Lastore),
        Kind::F => (Opcode::Newfa, Opcode::Faload, Opcode::Fastore),
        Kind::D => (Opcode::Newda, Opcode::Daload, Opcode::Dastore),
        Kind::A => (Opcode::Newaa, Opcode::Aaload, Opcode::Aastore),
    }
}

fn cmp_op(op: CmpOp) -> Opcode {
    match op {
        CmpOp::Eq => Opcode::CmpEq,
        CmpOp::Ne => Opcode::CmpNe,
        CmpOp::Lt => Opcode::CmpLt,
        CmpOp::Le => Opcode::CmpLe,
        CmpOp::Gt => Opcode::CmpGt,
        CmpOp::Ge => Opcode::CmpGe,
    }
}

struct FunctionWriter<'a> {
    unit: &'a Unit,
    pool: &'a mut Pool,
    funcs: &'a HashMap<FuncId, u16>,
    func: &'a Func,
    debug_lines: bool,
    code: Vec<u8>,
    relocs: Vec<u16>,
    lines: Vec<(u16, u16)>,
    errors: Vec<ErrorRegion>,
    labels: Vec<LabelState>,
    fixups: Vec<Fixup>,
    depth: usize,
    max_depth: usize,
    slots: HashMap<VarId, u8>,
    next_slot: usize,
    /// Slots below this stay allocated when a block closes.
    pinned: usize,
    max_slots: usize,
    loops: Vec<LoopLabels>,
}

impl<'a> FunctionWriter<'a> {
    fn new(
        unit: &'a Unit,
        pool: &'a mut Pool,
        funcs: &'a HashMap<FuncId, u16>,
        func: &'a Func,
        debug_lines: bool,
    ) -> Self {
        Self {
            unit,
            pool,
            funcs,
            func,
            debug_lines,
            code: Vec::new(),
            relocs: Vec::new(),
            lines: Vec::new(),
            errors: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
            depth: 0,
            max_depth: 0,
            slots: HashMap::new(),
            next_slot: 0,
            pinned: 0,
            max_slots: 0,
            loops: Vec::new(),
        }
    }

    fn error(&self, line: usize, message: impl Into<String>) -> CompileError {
        CompileError::codegen(SourcePos::new(self.func.pos.file.clone(), line), message)
    }

    fn write(mut self) -> CompileResult<FunctionCode> {
        let func = self.func;
        let line = func.pos.line;
        for &p in &func.params {
            self.alloc(p, line)?;
        }
        self.pinned = self.next_slot;
        let Some(body) = &func.body else {
            return Err(self.error(line, "Function has no body"));
        };
        self.expr(body)?;
        if flow::outcome(body) == Flow::Next {
            let ret = func.ty.ret.clone();
            if ret == Type::None {
                self.op(Opcode::RetNull, line)?;
            } else {
                self.constant(&ret.zero_value(), &ret, line)?;
                self.op(Opcode::Return, line)?;
            }
        }
        self.finish()
    }

    fn finish(mut self) -> CompileResult<FunctionCode> {
        let line = self.func.pos.line;
        if self.code.len() > MAX_CODE {
            return Err(self.error(line, "Function too large"));
        }
        for fixup in std::mem::take(&mut self.fixups) {
            let Some(target) = self.labels[fixup.label.0].pos else {
                return Err(self.error(line, "Jump to an unplaced label"));
            };
            let offset = i16::try_from(target as i64 - fixup.base as i64)
                .map_err(|_| self.error(line, "Jump too far"))?;
            self.code[fixup.at..fixup.at + 2].copy_from_slice(&offset.to_be_bytes());
        }
        let max_stack = u8::try_from(self.max_depth)
            .map_err(|_| self.error(line, "Expression too complex"))?;
        let max_locals = u8::try_from(self.max_slots)
            .map_err(|_| self.error(line, "Too many local variables"))?;
        Ok(FunctionCode {
            name: self.func.signature.clone(),
            shared: self.func.shared,
            max_stack,
            max_locals,
            code: self.code,
            relocs: self.relocs,
            lines: self.debug_lines.then_some(self.lines),
            errors: (!self.errors.is_empty()).then_some(self.errors),
        })
    }

    // ---- low level emission -------------------------------------------------

    fn ip(&self) -> usize {
        self.code.len()
    }

    fn ip16(&self) -> u16 {
        u16::try_from(self.ip()).unwrap_or(u16::MAX)
    }

    fn byte(&mut self, b: u8) {
        self.code.push(b);
    }

    fn u16(&mut self, v: u16) {
        self.code.extend_from_slice(&v.to_be_bytes());
    }

    fn i32(&mut self, v: i32) {
        self.code.extend_from_slice(&v.to_be_bytes());
    }

    fn adjust(&mut self, pops: usize, pushes: usize, line: usize) -> CompileResult<()> {
        self.depth = self
            .depth
            .checked_sub(pops)
            .ok_or_else(|| self.error(line, "Operand stack underflow"))?;
        self.depth += pushes;
        self.max_depth = self.max_depth.max(self.depth);
        if self.max_depth > MAX_STACK {
            return Err(self.error(line, "Expression too complex"));
        }
        Ok(())
    }

    fn op(&mut self, op: Opcode, line: usize) -> CompileResult<()> {
        let (pops, pushes) = op.stack_effect();
        self.adjust(pops, pushes, line)?;
        self.byte(op as u8);
        Ok(())
    }

    fn op_u8(&mut self, op: Opcode, operand: u8, line: usize) -> CompileResult<()> {
        self.op(op, line)?;
        self.byte(operand);
        Ok(())
    }

    /// An instruction with a relocated pool operand.
    fn op_pool(&mut self, op: Opcode, index: u16, line: usize) -> CompileResult<()> {
        self.op(op, line)?;
        self.relocs.push(self.ip16());
        self.u16(index);
        Ok(())
    }

    fn mark_line(&mut self, line: usize) {
        if !self.debug_lines || line == 0 {
            return;
        }
        let line = u16::try_from(line).unwrap_or(u16::MAX);
        let ip = self.ip16();
        match self.lines.last_mut() {
            Some((last, _)) if *last == line => {}
            Some((last, at)) if *at == ip => *last = line,
            _ => self.lines.push((line, ip)),
        }
    }

    // ---- labels -------------------------------------------------------------

    fn label(&mut self) -> Label {
        self.labels.push(LabelState::default());
        Label(self.labels.len() - 1)
    }

    /// Records the current depth as the one expected at `label`.
    fn expect_at(&mut self, label: Label) {
        let state = &mut self.labels[label.0];
        if state.depth.is_none() {
            state.depth = Some(self.depth);
        }
    }

    fn place(&mut self, label: Label) {
        let ip = self.ip();
        let depth = self.depth;
        let state = &mut self.labels[label.0];
        state.pos = Some(ip);
        match state.depth {
            Some(d) => self.depth = d,
            None => state.depth = Some(depth),
        }
    }

    fn jump(&mut self, op: Opcode, label: Label, line: usize) -> CompileResult<()> {
        self.op(op, line)?;
        self.expect_at(label);
        let at = self.ip();
        self.fixups.push(Fixup {
            at,
            base: at + 2,
            label,
        });
        self.u16(0);
        Ok(())
    }

    /// Placeholder offset for a switch entry whose instruction ends at `base`.
    fn switch_offset(&mut self, label: Label, base: usize) {
        self.expect_at(label);
        let at = self.ip();
        self.fixups.push(Fixup { at, base, label });
        self.u16(0);
    }

    // ---- locals -------------------------------------------------------------

    fn alloc(&mut self, var: VarId, line: usize) -> CompileResult<u8> {
        let slot = u8::try_from(self.next_slot)
            .ok()
            .filter(|s| usize::from(*s) < MAX_LOCALS)
            .ok_or_else(|| self.error(line, "Too many local variables"))?;
        self.slots.insert(var, slot);
        self.next_slot += 1;
        self.max_slots = self.max_slots.max(self.next_slot);
        Ok(slot)
    }

    fn slot(&mut self, var: VarId, line: usize) -> CompileResult<u8> {
        if let Some(s) = self.slots.get(&var) {
            return Ok(*s);
        }
        let slot = self.alloc(var, line)?;
        self.pinned = self.next_slot;
        Ok(slot)
    }

    // ---- constants and references ------------------------------------------

    fn pool_full(&self, line: usize) -> CompileError {
        self.error(line, "Too many constants")
    }

    fn ldc(&mut self, index: Option<u16>, line: usize) -> CompileResult<()> {
        let index = index.ok_or_else(|| self.pool_full(line))?;
        self.op_pool(Opcode::Ldc, index, line)
    }

    fn int_const(&mut self, n: i32, line: usize) -> CompileResult<()> {
        let small = match n {
            -1 => Some(Opcode::IconstM1),
            0 => Some(Opcode::Iconst0),
            1 => Some(Opcode::Iconst1),
            2 => Some(Opcode::Iconst2),
            3 => Some(Opcode::Iconst3),
            4 => Some(Opcode::Iconst4),
            5 => Some(Opcode::Iconst5),
            _ => None,
        };
        if let Some(op) = small {
            return self.op(op, line);
        }
        if let Ok(b) = i8::try_from(n) {
            return self.op_u8(Opcode::Bipush, b as u8, line);
        }
        if let Ok(s) = i16::try_from(n) {
            self.op(Opcode::Sipush, line)?;
            self.u16(s as u16);
            return Ok(());
        }
        let index = self.pool.int(n);
        self.ldc(index, line)
    }

    fn func_index(&mut self, f: FuncId, line: usize) -> CompileResult<u16> {
        if let Some(i) = self.funcs.get(&f) {
            return Ok(*i);
        }
        let name = self.unit.func(f).signature.clone();
        self.pool.unresolved(&name).ok_or_else(|| self.pool_full(line))
    }

    fn constant(&mut self, v: &Value, ty: &Type, line: usize) -> CompileResult<()> {
        match v {
            Value::Null => return self.op(Opcode::AconstNull, line),
            Value::Str(s) => {
                let index = self.pool.string(s);
                return self.ldc(index, line);
            }
            Value::Func(f) => {
                let index = self.func_index(*f, line)?;
                return self.op_pool(Opcode::Ldc, index, line);
            }
            Value::Bool(b) => self.op(if *b { Opcode::Iconst1 } else { Opcode::Iconst0 }, line)?,
            Value::Int(n) => self.int_const(*n, line)?,
            Value::Long(0) => self.op(Opcode::Lconst0, line)?,
            Value::Long(1) => self.op(Opcode::Lconst1, line)?,
            Value::Long(n) => {
                let index = self.pool.long(*n);
                self.ldc(index, line)?;
            }
            Value::Float(x) if x.to_bits() == 0 => self.op(Opcode::Fconst0, line)?,
            Value::Float(x) if *x == 1.0 => self.op(Opcode::Fconst1, line)?,
            Value::Float(x) => {
                let index = self.pool.float(*x);
                self.ldc(index, line)?;
            }
            Value::Double(x) if x.to_bits() == 0 => self.op(Opcode::Dconst0, line)?,
            Value::Double(x) if *x == 1.0 => self.op(Opcode::Dconst1, line)?,
            Value::Double(x) => {
                let index = self.pool.double(*x);
                self.ldc(index, line)?;
            }
        }
        // A primitive constant in a reference-typed position.
        if ty.is_reference() {
            let prim = match v {
                Value::Bool(_) => Prim::Bool,
                Value::Long(_) => Prim::Long,
                Value::Float(_) => Prim::Float,
                Value::Double(_) => Prim::Double,
                _ => Prim::Int,
            };
            self.op_u8(Opcode::Box, prim as u8, line)?;
        }
        Ok(())
    }

    fn convert(&mut self, from: &Type, to: &Type, line: usize) -> CompileResult<()> {
        if from == to {
            return Ok(());
        }
        if from.is_numeric() && to.is_numeric() {
            return self.numeric_convert(from, to, line);
        }
        let from_prim = Prim::of(from);
        let to_prim = Prim::of(to);
        match (from_prim, to_prim) {
            (Some(p), None) => self.op_u8(Opcode::Box, p as u8, line),
            (None, Some(p)) => self.op_u8(Opcode::Unbox, p as u8, line),
            (None, None) if from.is_subtype_of(to) => Ok(()),
            (None, None) => {
                let index = self.pool.string(&to.to_string());
                let index = index.ok_or_else(|| self.pool_full(line))?;
                self.op_pool(Opcode::Checkcast, index, line)
            }
            (Some(_), Some(_)) => Err(self.error(line, format!("Cannot convert {from} to {to}"))),
        }
    }

    fn numeric_convert(&mut self, from: &Type, to: &Type, line: usize) -> CompileResult<()> {
        use Opcode::*;
        let from_kind = kind_of(from);
        let narrow = match to {
            Type::Byte => Some(I2b),
            Type::Char => Some(I2c),
            Type::Short => Some(I2s),
            _ => None,
        };
        let widen = match (from_kind, kind_of(to)) {
            (Kind::I, Kind::L) => Some(I2l),
            (Kind::I, Kind::F) => Some(I2f),
            (Kind::I, Kind::D) => Some(I2d),
            (Kind::L, Kind::I) => Some(L2i),
            (Kind::L, Kind::F) => Some(L2f),
            (Kind::L, Kind::D) => Some(L2d),
            (Kind::F, Kind::I) => Some(F2i),
            (Kind::F, Kind::L) => Some(F2l),
            (Kind::F, Kind::D) => Some(F2d),
            (Kind::D, Kind::I) => Some(D2i),
            (Kind::D, Kind::L) => Some(D2l),
            (Kind::D, Kind::F) => Some(D2f),
            _ => None,
        };
        if let Some(op) = widen {
            self.op(op, line)?;
        }
        if let Some(op) = narrow {
            self.op(op, line)?;
        }
        Ok(())
    }

    // ---- expressions --------------------------------------------------------

    /// Leaves the value of `e` on the stack unless its type is `None`.
    fn expr(&mut self, e: &Expr) -> CompileResult<()> {
        let line = e.line;
        let unit = self.unit;
        self.mark_line(line);
        match &e.kind {
            ExprKind::NoOp => Ok(()),
            ExprKind::Const(v) => self.constant(v, &e.ty, line),
            ExprKind::Var(id) => {
                let var = unit.var(*id);
                if var.kind == VarKind::Global {
                    let index = self.pool.string(&var.name);
                    let index = index.ok_or_else(|| self.pool_full(line))?;
                    self.op_pool(Opcode::GetGlobal, index, line)
                } else {
                    let slot = self.slot(*id, line)?;
                    self.op_u8(Opcode::Load, slot, line)
                }
            }
            ExprKind::SetVar { var, value } => {
                self.expr(value)?;
                let v = unit.var(*var);
                if v.kind == VarKind::Global {
                    let index = self.pool.string(&v.name);
                    let index = index.ok_or_else(|| self.pool_full(line))?;
                    self.op_pool(Opcode::SetGlobal, index, line)
                } else {
                    let slot = self.slot(*var, line)?;
                    self.op_u8(Opcode::Store, slot, line)
                }
            }
            ExprKind::Unary { op, operand } => {
                self.expr(operand)?;
                match (op, kind_of(&e.ty)) {
                    (UnaryOp::Neg, Kind::I) => self.op(Opcode::Ineg, line),
                    (UnaryOp::Neg, Kind::L) => self.op(Opcode::Lneg, line),
                    (UnaryOp::Neg, Kind::F) => self.op(Opcode::Fneg, line),
                    (UnaryOp::Neg, Kind::D) => self.op(Opcode::Dneg, line),
                    (UnaryOp::Not, _) => {
                        self.op(Opcode::Iconst1, line)?;
                        self.op(Opcode::Ixor, line)
                    }
                    (UnaryOp::BitNot, Kind::L) => {
                        let index = self.pool.long(-1);
                        self.ldc(index, line)?;
                        self.op(Opcode::Lxor, line)
                    }
                    (UnaryOp::BitNot, Kind::I) => {
                        self.op(Opcode::IconstM1, line)?;
                        self.op(Opcode::Ixor, line)
                    }
                    _ => Err(self.error(line, format!("Unsupported operand type {}", e.ty))),
                }
            }
            ExprKind::Binary { op, left, right } => {
                self.expr(left)?;
                self.expr(right)?;
                let opcode = arith(*op, kind_of(&e.ty))
                    .ok_or_else(|| self.error(line, format!("Unsupported operand type {}", e.ty)))?;
                self.op(opcode, line)
            }
            ExprKind::Compare { op, left, right } => {
                self.expr(left)?;
                self.expr(right)?;
                let cmp = match kind_of(&left.ty) {
                    Kind::I => Opcode::Icmp,
                    Kind::L => Opcode::Lcmp,
                    Kind::F => Opcode::Fcmp,
                    Kind::D => Opcode::Dcmp,
                    Kind::A => Opcode::Acmp,
                };
                self.op(cmp, line)?;
                self.op(cmp_op(*op), line)
            }
            ExprKind::Logic { .. } => {
                let falsy = self.label();
                let end = self.label();
                self.branch(e, falsy, false)?;
                self.op(Opcode::Iconst1, line)?;
                self.jump(Opcode::Goto, end, line)?;
                self.place(falsy);
                self.op(Opcode::Iconst0, line)?;
                self.place(end);
                Ok(())
            }
            ExprKind::Cast(inner) => {
                self.expr(inner)?;
                self.convert(&inner.ty, &e.ty, line)
            }
            ExprKind::ArrayLoad { array, index } => {
                self.expr(array)?;
                self.expr(index)?;
                match array.ty.element() {
                    Some(elem) => self.op(array_ops(kind_of(&elem)).1, line),
                    None => {
                        self.op(Opcode::Aaload, line)?;
                        self.unbox_field(&e.ty, line)
                    }
                }
            }
            ExprKind::ArrayStore {
                array,
                index,
                value,
            } => {
                self.expr(array)?;
                self.expr(index)?;
                self.expr(value)?;
                match array.ty.element() {
                    Some(elem) => self.op(array_ops(kind_of(&elem)).2, line),
                    None => {
                        self.box_field(&value.ty, line)?;
                        self.op(Opcode::Aastore, line)
                    }
                }
            }
            ExprKind::ArrayLen(array) => {
                self.expr(array)?;
                self.op(Opcode::Alen, line)
            }
            ExprKind::NewArray(len) => {
                self.expr(len)?;
                let elem = e.ty.element().unwrap_or(Type::Any);
                self.op(array_ops(kind_of(&elem)).0, line)
            }
            ExprKind::NewArrayInit(items) => {
                let elem = e.ty.element().unwrap_or(Type::Any);
                self.new_filled(items, kind_of(&elem), false, line)
            }
            ExprKind::NewStruct(items) => self.new_filled(items, Kind::A, true, line),
            ExprKind::Call { callee, args } => {
                if args.len() > MAX_ARGS {
                    return Err(self.error(line, "Too many arguments"));
                }
                self.expr(callee)?;
                for arg in args {
                    self.expr(arg)?;
                }
                let argc = args.len();
                let (op, pushes) = if e.ty == Type::None {
                    (Opcode::Calv, 0)
                } else {
                    (Opcode::Call, 1)
                };
                self.adjust(1 + argc, pushes, line)?;
                self.byte(op as u8);
                self.byte(argc as u8);
                Ok(())
            }
            ExprKind::Concat(parts) => self.concat(parts, line),
            ExprKind::If {
                cond,
                then,
                otherwise,
            } => {
                let other = self.label();
                let end = self.label();
                self.branch(cond, other, false)?;
                self.expr(then)?;
                if e.ty == Type::None && otherwise.is_noop() {
                    self.place(other);
                    return Ok(());
                }
                if e.ty != Type::None || flow::outcome(then) == Flow::Next {
                    self.jump(Opcode::Goto, end, line)?;
                }
                self.place(other);
                self.expr(otherwise)?;
                self.place(end);
                Ok(())
            }
            ExprKind::Loop {
                pre,
                cond,
                body,
                step,
            } => self.emit_loop(pre, cond, body, step, line),
            ExprKind::Switch {
                key,
                cases,
                default,
            } => self.switch(key, cases, default.as_deref(), e.ty != Type::None, line),
            ExprKind::Try {
                body,
                catch_var,
                handler,
            } => self.try_catch(body, *catch_var, handler, line),
            ExprKind::Block { locals, stmts } => {
                let saved = self.next_slot;
                for &l in locals {
                    self.alloc(l, line)?;
                }
                for stmt in stmts {
                    self.expr(stmt)?;
                }
                for l in locals {
                    self.slots.remove(l);
                }
                self.next_slot = saved.max(self.pinned);
                Ok(())
            }
            ExprKind::Discard(inner) => {
                self.expr(inner)?;
                if inner.ty != Type::None {
                    self.op(Opcode::Pop, line)?;
                }
                Ok(())
            }
            ExprKind::Return(value) => match value {
                Some(v) => {
                    self.expr(v)?;
                    self.op(Opcode::Return, line)
                }
                None => self.op(Opcode::RetNull, line),
            },
            ExprKind::Throw { code, message } => {
                self.expr(code)?;
                self.expr(message)?;
                self.op(Opcode::Throw, line)
            }
            ExprKind::Break | ExprKind::Continue => {
                let Some(target) = self.loops.last().copied() else {
                    return Err(self.error(line, "`break` outside of a loop"));
                };
                for _ in target.depth..self.depth {
                    self.op(Opcode::Pop, line)?;
                }
                let label = if matches!(e.kind, ExprKind::Break) {
                    target.exit
                } else {
                    target.next
                };
                self.jump(Opcode::Goto, label, line)
            }
        }
    }

    fn box_field(&mut self, ty: &Type, line: usize) -> CompileResult<()> {
        match Prim::of(ty) {
            Some(p) => self.op_u8(Opcode::Box, p as u8, line),
            None => Ok(()),
        }
    }

    fn unbox_field(&mut self, ty: &Type, line: usize) -> CompileResult<()> {
        match Prim::of(ty) {
            Some(p) => self.op_u8(Opcode::Unbox, p as u8, line),
            None => Ok(()),
        }
    }

    fn new_filled(&mut self, items: &[Expr], kind: Kind, boxed: bool, line: usize) -> CompileResult<()> {
        let len = i32::try_from(items.len()).map_err(|_| self.error(line, "Array literal too large"))?;
        let (new, _, store) = array_ops(kind);
        self.int_const(len, line)?;
        self.op(new, line)?;
        for (i, item) in (0..).zip(items) {
            self.op(Opcode::Dup, line)?;
            self.int_const(i, line)?;
            self.expr(item)?;
            if boxed {
                self.box_field(&item.ty, line)?;
            }
            self.op(store, line)?;
        }
        Ok(())
    }

    fn concat(&mut self, parts: &[Expr], line: usize) -> CompileResult<()> {
        let mut chunks = parts.chunks(MAX_ARGS);
        let Some(first) = chunks.next() else {
            let index = self.pool.string("");
            return self.ldc(index, line);
        };
        for part in first {
            self.expr(part)?;
        }
        self.concat_op(first.len(), line)?;
        // Later chunks are joined onto the running result.
        for chunk in parts[first.len()..].chunks(MAX_ARGS - 1) {
            for part in chunk {
                self.expr(part)?;
            }
            self.concat_op(chunk.len() + 1, line)?;
        }
        Ok(())
    }

    fn concat_op(&mut self, n: usize, line: usize) -> CompileResult<()> {
        self.adjust(n, 1, line)?;
        self.byte(Opcode::Concat as u8);
        self.byte(n as u8);
        Ok(())
    }

    /// Jumps to `target` when `cond` evaluates to `when`, otherwise falls
    /// through.
    fn branch(&mut self, cond: &Expr, target: Label, when: bool) -> CompileResult<()> {
        let line = cond.line;
        match &cond.kind {
            ExprKind::Const(Value::Bool(b)) => {
                if *b == when {
                    self.jump(Opcode::Goto, target, line)?;
                }
                Ok(())
            }
            ExprKind::Unary {
                op: UnaryOp::Not,
                operand,
            } => self.branch(operand, target, !when),
            ExprKind::Logic { op, left, right } => {
                // `a && b` jumps on true only if both hold; `a || b` jumps on
                // false only if both fail.
                let both = (*op == LogicOp::And) == when;
                if both {
                    let skip = self.label();
                    self.branch(left, skip, !when)?;
                    self.branch(right, target, when)?;
                    self.place(skip);
                } else {
                    self.branch(left, target, when)?;
                    self.branch(right, target, when)?;
                }
                Ok(())
            }
            _ => {
                self.expr(cond)?;
                let op = if when { Opcode::Ifne } else { Opcode::Ifeq };
                self.jump(op, target, line)
            }
        }
    }

    /// `start: pre; if !cond goto exit; body; next: step; goto start; exit:`
    /// A `continue` inside `pre` re-tests the condition instead.
    fn emit_loop(&mut self, pre: &Expr, cond: &Expr, body: &Expr, step: &Expr, line: usize) -> CompileResult<()> {
        let start = self.label();
        let test = self.label();
        let next = self.label();
        let exit = self.label();
        self.place(start);
        let depth = self.depth;
        self.loops.push(LoopLabels {
            exit,
            next: test,
            depth,
        });
        self.expr(pre)?;
        self.place(test);
        if !matches!(cond.kind, ExprKind::Const(Value::Bool(true))) {
            self.branch(cond, exit, false)?;
        }
        if let Some(top) = self.loops.last_mut() {
            top.next = next;
        }
        self.expr(body)?;
        self.place(next);
        self.expr(step)?;
        self.jump(Opcode::Goto, start, line)?;
        self.loops.pop();
        // Reached only through `break` or the condition.
        self.labels[exit.0].depth.get_or_insert(depth);
        self.place(exit);
        Ok(())
    }

    fn switch(
        &mut self,
        key: &Expr,
        cases: &[SwitchCase],
        default: Option<&Expr>,
        is_value: bool,
        line: usize,
    ) -> CompileResult<()> {
        self.expr(key)?;
        let mut entries: Vec<(i32, Label)> = Vec::new();
        let mut labels = Vec::with_capacity(cases.len());
        for case in cases {
            let label = self.label();
            labels.push(label);
            entries.extend(case.keys.iter().map(|k| (*k, label)));
        }
        entries.sort_by_key(|(k, _)| *k);
        let fallback = self.label();
        let end = self.label();

        let count = entries.len();
        match (entries.first(), entries.last()) {
            (Some(&(low, _)), Some(&(high, _))) => {
                self.adjust(1, 0, line)?;
                let span = i64::from(high) - i64::from(low) + 1;
                if span <= 2 * count as i64 + 8 {
                    let span = span as usize;
                    let base = self.ip() + 1 + 10 + 2 * span;
                    self.byte(Opcode::Tableswitch as u8);
                    self.switch_offset(fallback, base);
                    self.i32(low);
                    self.i32(high);
                    let mut next = entries.iter().peekable();
                    for k in i64::from(low)..=i64::from(high) {
                        let label = match next.peek() {
                            Some(&&(key, label)) if i64::from(key) == k => {
                                next.next();
                                label
                            }
                            _ => fallback,
                        };
                        self.switch_offset(label, base);
                    }
                } else {
                    let pairs = u16::try_from(count).map_err(|_| self.error(line, "Too many switch cases"))?;
                    let base = self.ip() + 1 + 4 + 6 * count;
                    self.byte(Opcode::Lookupswitch as u8);
                    self.switch_offset(fallback, base);
                    self.u16(pairs);
                    for (k, label) in &entries {
                        self.i32(*k);
                        self.switch_offset(*label, base);
                    }
                }
            }
            _ => {
                // Nothing to dispatch on.
                self.op(Opcode::Pop, line)?;
                self.jump_free(fallback);
            }
        }

        for (case, label) in cases.iter().zip(labels) {
            self.place(label);
            self.expr(&case.body)?;
            if is_value || flow::outcome(&case.body) == Flow::Next {
                self.jump(Opcode::Goto, end, line)?;
            }
        }
        self.place(fallback);
        if let Some(d) = default {
            self.expr(d)?;
        }
        self.place(end);
        Ok(())
    }

    /// Declares the current depth at `label` without emitting a jump.
    fn jump_free(&mut self, label: Label) {
        self.expect_at(label);
    }

    fn try_catch(&mut self, body: &Expr, catch_var: Option<VarId>, handler: &Expr, line: usize) -> CompileResult<()> {
        let start = self.ip16();
        let depth = self.depth;
        self.expr(body)?;
        let end_ip = self.ip16();
        let end = self.label();
        if flow::outcome(body) == Flow::Next {
            self.jump(Opcode::Goto, end, line)?;
        }
        self.errors.push(ErrorRegion {
            start,
            end: end_ip,
            handler: self.ip16(),
            depth: u16::try_from(depth).unwrap_or(u16::MAX),
        });
        // The error object arrives on top of the truncated stack.
        self.depth = depth;
        self.adjust(0, 1, line)?;
        match catch_var {
            Some(v) => {
                let slot = self.slot(v, line)?;
                self.op_u8(Opcode::Store, slot, line)?;
            }
            None => self.op(Opcode::Pop, line)?,
        }
        self.expr(handler)?;
        self.place(end);
        Ok(())
    }
}
