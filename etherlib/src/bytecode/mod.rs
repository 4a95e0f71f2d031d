//! The object file model: a unit-wide constant pool whose function entries
//! carry their code.

use thiserror::Error;

use crate::types::Type;

mod codec;
mod disasm;
mod pool;
mod verify;
mod writer;

pub use codec::DecodeError;
pub use pool::Pool;
pub use verify::{VerifyError, verify, verify_function};
pub use writer::write_unit;

pub const MAGIC: u16 = 0xC0DE;
pub const VERSION: u16 = 0x0202;

pub const OBJ_SONAME: u8 = 1;
pub const OBJ_DEPENDENCIES: u8 = 2;
pub const OBJ_RELINKED: u8 = 4;

pub const FN_SHARED: u8 = 1;
pub const FN_LINES: u8 = 2;
pub const FN_ERRORS: u8 = 4;

pub const MAX_STACK: usize = 255;
pub const MAX_LOCALS: usize = 255;
pub const MAX_CODE: usize = 65535;
pub const MAX_POOL: usize = 65535;
pub const MAX_ARGS: usize = 255;

#[derive(Debug, Clone, PartialEq)]
pub enum PoolEntry {
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    /// Function referenced but not defined in this unit.
    Unresolved(String),
    /// Function resolved by the linker into another object.
    External(String),
    Func(FunctionCode),
}

impl PoolEntry {
    pub fn tag(&self) -> u8 {
        match self {
            PoolEntry::Null => b'0',
            PoolEntry::Int(_) => b'i',
            PoolEntry::Long(_) => b'l',
            PoolEntry::Float(_) => b'f',
            PoolEntry::Double(_) => b'd',
            PoolEntry::Str(_) => b'S',
            PoolEntry::Unresolved(_) => b'U',
            PoolEntry::External(_) => b'E',
            PoolEntry::Func(_) => b'P',
        }
    }
}

/// Entry into the error table: a throw in `start..end` with the operand
/// stack truncated to `depth` continues at `handler`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorRegion {
    pub start: u16,
    pub end: u16,
    pub handler: u16,
    pub depth: u16,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionCode {
    pub name: String,
    pub shared: bool,
    pub max_stack: u8,
    pub max_locals: u8,
    pub code: Vec<u8>,
    /// Offsets of the u16 pool operands in `code`.
    pub relocs: Vec<u16>,
    /// `(line, ip)` pairs, present with debug lines.
    pub lines: Option<Vec<(u16, u16)>>,
    pub errors: Option<Vec<ErrorRegion>>,
}

impl FunctionCode {
    pub fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.shared {
            flags |= FN_SHARED;
        }
        if self.lines.is_some() {
            flags |= FN_LINES;
        }
        if self.errors.is_some() {
            flags |= FN_ERRORS;
        }
        flags
    }

    /// Source line of the instruction at `ip`.
    pub fn line_at(&self, ip: usize) -> Option<u16> {
        let lines = self.lines.as_ref()?;
        lines
            .iter()
            .take_while(|(_, at)| usize::from(*at) <= ip)
            .last()
            .map(|(line, _)| *line)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectFile {
    pub soname: Option<String>,
    pub dependencies: Option<Vec<String>>,
    pub relinked: bool,
    pub pool: Vec<PoolEntry>,
}

impl ObjectFile {
    pub fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.soname.is_some() {
            flags |= OBJ_SONAME;
        }
        if self.dependencies.is_some() {
            flags |= OBJ_DEPENDENCIES;
        }
        if self.relinked {
            flags |= OBJ_RELINKED;
        }
        flags
    }

    pub fn functions(&self) -> impl Iterator<Item = (usize, &FunctionCode)> {
        self.pool.iter().enumerate().filter_map(|(i, e)| match e {
            PoolEntry::Func(f) => Some((i, f)),
            _ => None,
        })
    }

    pub fn function(&self, name: &str) -> Option<&FunctionCode> {
        self.functions().map(|(_, f)| f).find(|f| f.name == name)
    }
}

/// Primitive kinds named by `BOX`/`UNBOX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Prim {
    Bool = 0,
    Byte = 1,
    Char = 2,
    Short = 3,
    Int = 4,
    Long = 5,
    Float = 6,
    Double = 7,
}

impl Prim {
    pub fn of(ty: &Type) -> Option<Prim> {
        Some(match ty {
            Type::Bool => Prim::Bool,
            Type::Byte => Prim::Byte,
            Type::Char => Prim::Char,
            Type::Short => Prim::Short,
            Type::Int => Prim::Int,
            Type::Long => Prim::Long,
            Type::Float => Prim::Float,
            Type::Double => Prim::Double,
            _ => return None,
        })
    }

    pub fn from_u8(b: u8) -> Option<Prim> {
        [
            Prim::Bool,
            Prim::Byte,
            Prim::Char,
            Prim::Short,
            Prim::Int,
            Prim::Long,
            Prim::Float,
            Prim::Double,
        ]
        .get(usize::from(b))
        .copied()
    }
}

/// Shape of the bytes following an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    U8,
    I8,
    I16,
    Local,
    Pool,
    Jump,
    Table,
    Lookup,
}

macro_rules! opcodes {
    ($($name:ident = $byte:literal, $mnemonic:literal, $kind:ident, $pops:literal, $pushes:literal;)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Opcode {
            $($name = $byte,)*
        }

        impl Opcode {
            pub fn from_u8(b: u8) -> Option<Opcode> {
                match b {
                    $($byte => Some(Opcode::$name),)*
                    _ => None,
                }
            }

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$name => $mnemonic,)*
                }
            }

            pub fn operand_kind(self) -> OperandKind {
                match self {
                    $(Opcode::$name => OperandKind::$kind,)*
                }
            }

            /// Values popped and pushed, ignoring the argument-count
            /// operand of calls and concatenation.
            pub fn stack_effect(self) -> (usize, usize) {
                match self {
                    $(Opcode::$name => ($pops, $pushes),)*
                }
            }
        }
    };
}

opcodes! {
    Nop = 0x00, "NOP", None, 0, 0;
    AconstNull = 0x01, "ACONST_NULL", None, 0, 1;
    IconstM1 = 0x02, "ICONST_M1", None, 0, 1;
    Iconst0 = 0x03, "ICONST_0", None, 0, 1;
    Iconst1 = 0x04, "ICONST_1", None, 0, 1;
    Iconst2 = 0x05, "ICONST_2", None, 0, 1;
    Iconst3 = 0x06, "ICONST_3", None, 0, 1;
    Iconst4 = 0x07, "ICONST_4", None, 0, 1;
    Iconst5 = 0x08, "ICONST_5", None, 0, 1;
    Lconst0 = 0x09, "LCONST_0", None, 0, 1;
    Lconst1 = 0x0A, "LCONST_1", None, 0, 1;
    Fconst0 = 0x0B, "FCONST_0", None, 0, 1;
    Fconst1 = 0x0C, "FCONST_1", None, 0, 1;
    Dconst0 = 0x0D, "DCONST_0", None, 0, 1;
    Dconst1 = 0x0E, "DCONST_1", None, 0, 1;
    Bipush = 0x10, "BIPUSH", I8, 0, 1;
    Sipush = 0x11, "SIPUSH", I16, 0, 1;
    Ldc = 0x12, "LDC", Pool, 0, 1;
    Load = 0x15, "LOAD", Local, 0, 1;
    Store = 0x16, "STORE", Local, 1, 0;
    GetGlobal = 0x17, "GETGLOBAL", Pool, 0, 1;
    SetGlobal = 0x18, "SETGLOBAL", Pool, 1, 0;
    Iadd = 0x20, "IADD", None, 2, 1;
    Ladd = 0x21, "LADD", None, 2, 1;
    Fadd = 0x22, "FADD", None, 2, 1;
    Dadd = 0x23, "DADD", None, 2, 1;
    Isub = 0x24, "ISUB", None, 2, 1;
    Lsub = 0x25, "LSUB", None, 2, 1;
    Fsub = 0x26, "FSUB", None, 2, 1;
    Dsub = 0x27, "DSUB", None, 2, 1;
    Imul = 0x28, "IMUL", None, 2, 1;
    Lmul = 0x29, "LMUL", None, 2, 1;
    Fmul = 0x2A, "FMUL", None, 2, 1;
    Dmul = 0x2B, "DMUL", None, 2, 1;
    Idiv = 0x2C, "IDIV", None, 2, 1;
    Ldiv = 0x2D, "LDIV", None, 2, 1;
    Fdiv = 0x2E, "FDIV", None, 2, 1;
    Ddiv = 0x2F, "DDIV", None, 2, 1;
    Irem = 0x30, "IREM", None, 2, 1;
    Lrem = 0x31, "LREM", None, 2, 1;
    Frem = 0x32, "FREM", None, 2, 1;
    Drem = 0x33, "DREM", None, 2, 1;
    Ineg = 0x34, "INEG", None, 1, 1;
    Lneg = 0x35, "LNEG", None, 1, 1;
    Fneg = 0x36, "FNEG", None, 1, 1;
    Dneg = 0x37, "DNEG", None, 1, 1;
    Iand = 0x38, "IAND", None, 2, 1;
    Land = 0x39, "LAND", None, 2, 1;
    Ior = 0x3A, "IOR", None, 2, 1;
    Lor = 0x3B, "LOR", None, 2, 1;
    Ixor = 0x3C, "IXOR", None, 2, 1;
    Lxor = 0x3D, "LXOR", None, 2, 1;
    Ishl = 0x3E, "ISHL", None, 2, 1;
    Lshl = 0x3F, "LSHL", None, 2, 1;
    Ishr = 0x40, "ISHR", None, 2, 1;
    Lshr = 0x41, "LSHR", None, 2, 1;
    Iushr = 0x42, "IUSHR", None, 2, 1;
    Lushr = 0x43, "LUSHR", None, 2, 1;
    Icmp = 0x48, "ICMP", None, 2, 1;
    Lcmp = 0x49, "LCMP", None, 2, 1;
    Fcmp = 0x4A, "FCMP", None, 2, 1;
    Dcmp = 0x4B, "DCMP", None, 2, 1;
    Acmp = 0x4C, "ACMP", None, 2, 1;
    CmpEq = 0x50, "CMP_EQ", None, 1, 1;
    CmpNe = 0x51, "CMP_NE", None, 1, 1;
    CmpLt = 0x52, "CMP_LT", None, 1, 1;
    CmpLe = 0x53, "CMP_LE", None, 1, 1;
    CmpGt = 0x54, "CMP_GT", None, 1, 1;
    CmpGe = 0x55, "CMP_GE", None, 1, 1;
    I2l = 0x58, "I2L", None, 1, 1;
    I2f = 0x59, "I2F", None, 1, 1;
    I2d = 0x5A, "I2D", None, 1, 1;
    L2i = 0x5B, "L2I", None, 1, 1;
    L2f = 0x5C, "L2F", None, 1, 1;
    L2d = 0x5D, "L2D", None, 1, 1;
    F2i = 0x5E, "F2I", None, 1, 1;
    F2l = 0x5F, "F2L", None, 1, 1;
    F2d = 0x60, "F2D", None, 1, 1;
    D2i = 0x61, "D2I", None, 1, 1;
    D2l = 0x62, "D2L", None, 1, 1;
    D2f = 0x63, "D2F", None, 1, 1;
    I2b = 0x64, "I2B", None, 1, 1;
    I2c = 0x65, "I2C", None, 1, 1;
    I2s = 0x66, "I2S", None, 1, 1;
    Box = 0x68, "BOX", U8, 1, 1;
    Unbox = 0x69, "UNBOX", U8, 1, 1;
    Checkcast = 0x6A, "CHECKCAST", Pool, 1, 1;
    Ifeq = 0x70, "IFEQ", Jump, 1, 0;
    Ifne = 0x71, "IFNE", Jump, 1, 0;
    Goto = 0x72, "GOTO", Jump, 0, 0;
    Tableswitch = 0x74, "TABLESWITCH", Table, 1, 0;
    Lookupswitch = 0x75, "LOOKUPSWITCH", Lookup, 1, 0;
    Newia = 0x78, "NEWIA", None, 1, 1;
    Newla = 0x79, "NEWLA", None, 1, 1;
    Newfa = 0x7A, "NEWFA", None, 1, 1;
    Newda = 0x7B, "NEWDA", None, 1, 1;
    Newaa = 0x7C, "NEWAA", None, 1, 1;
    Iaload = 0x80, "IALOAD", None, 2, 1;
    Laload = 0x81, "LALOAD", None, 2, 1;
    Faload = 0x82, "FALOAD", None, 2, 1;
    Daload = 0x83, "DALOAD", None, 2, 1;
    Aaload = 0x84, "AALOAD", None, 2, 1;
    Iastore = 0x88, "IASTORE", None, 3, 0;
    Lastore = 0x89, "LASTORE", None, 3, 0;
    Fastore = 0x8A, "FASTORE", None, 3, 0;
    Dastore = 0x8B, "DASTORE", None, 3, 0;
    Aastore = 0x8C, "AASTORE", None, 3, 0;
    Alen = 0x8F, "ALEN", None, 1, 1;
    Pop = 0x90, "POP", None, 1, 0;
    Dup = 0x91, "DUP", None, 1, 2;
    Call = 0x98, "CALL", U8, 1, 1;
    Calv = 0x99, "CALV", U8, 1, 0;
    Return = 0x9A, "RETURN", None, 1, 0;
    RetNull = 0x9B, "RET_NULL", None, 0, 0;
    Throw = 0x9C, "THROW", None, 2, 0;
    Concat = 0x9D, "CONCAT", U8, 0, 1;
}

impl Opcode {
    /// Control never reaches the next instruction.
    pub fn ends_block(self) -> bool {
        matches!(
            self,
            Opcode::Goto
                | Opcode::Return
                | Opcode::RetNull
                | Opcode::Throw
                | Opcode::Tableswitch
                | Opcode::Lookupswitch
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    None,
    U8(u8),
    I8(i8),
    I16(i16),
    Local(u8),
    Pool(u16),
    Jump(i16),
    Table {
        default: i16,
        low: i32,
        offsets: Vec<i16>,
    },
    Lookup {
        default: i16,
        pairs: Vec<(i32, i16)>,
    },
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instr {
    pub ip: usize,
    pub op: Opcode,
    pub operand: Operand,
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstrError {
    #[error("truncated instruction at {0}")]
    Truncated(usize),
    #[error("unknown opcode 0x{op:02X} at {ip}")]
    UnknownOpcode { ip: usize, op: u8 },
}

impl Instr {
    pub fn next(&self) -> usize {
        self.ip + self.len
    }

    /// Absolute jump targets, default first for switches.
    pub fn targets(&self) -> Vec<i64> {
        let base = self.next() as i64;
        match &self.operand {
            Operand::Jump(off) => vec![base + i64::from(*off)],
            Operand::Table {
                default, offsets, ..
            } => std::iter::once(default)
                .chain(offsets)
                .map(|off| base + i64::from(*off))
                .collect(),
            Operand::Lookup { default, pairs } => std::iter::once(*default)
                .chain(pairs.iter().map(|(_, off)| *off))
                .map(|off| base + i64::from(off))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Values popped and pushed by this instruction.
    pub fn stack_effect(&self) -> (usize, usize) {
        let (pops, pushes) = self.op.stack_effect();
        match (self.op, &self.operand) {
            (Opcode::Call | Opcode::Calv, Operand::U8(argc)) => (pops + usize::from(*argc), pushes),
            (Opcode::Concat, Operand::U8(n)) => (usize::from(*n), pushes),
            _ => (pops, pushes),
        }
    }
}

fn read_u16(code: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_be_bytes([*code.get(at)?, *code.get(at + 1)?]))
}

fn read_i32(code: &[u8], at: usize) -> Option<i32> {
    let b = code.get(at..at + 4)?;
    Some(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// Decodes the instruction starting at `ip`.
pub fn decode(code: &[u8], ip: usize) -> Result<Instr, InstrError> {
    let byte = *code.get(ip).ok_or(InstrError::Truncated(ip))?;
    let op = Opcode::from_u8(byte).ok_or(InstrError::UnknownOpcode { ip, op: byte })?;
    let at = ip + 1;
    let truncated = InstrError::Truncated(ip);
    let (operand, size) = match op.operand_kind() {
        OperandKind::None => (Operand::None, 0),
        OperandKind::U8 => (Operand::U8(*code.get(at).ok_or(truncated)?), 1),
        OperandKind::I8 => (Operand::I8(*code.get(at).ok_or(truncated)? as i8), 1),
        OperandKind::Local => (Operand::Local(*code.get(at).ok_or(truncated)?), 1),
        OperandKind::I16 => (Operand::I16(read_u16(code, at).ok_or(truncated)? as i16), 2),
        OperandKind::Pool => (Operand::Pool(read_u16(code, at).ok_or(truncated)?), 2),
        OperandKind::Jump => (Operand::Jump(read_u16(code, at).ok_or(truncated)? as i16), 2),
        OperandKind::Table => {
            let default = read_u16(code, at).ok_or(truncated.clone())? as i16;
            let low = read_i32(code, at + 2).ok_or(truncated.clone())?;
            let high = read_i32(code, at + 6).ok_or(truncated.clone())?;
            let count = usize::try_from(i64::from(high) - i64::from(low) + 1)
                .map_err(|_| truncated.clone())?;
            let mut offsets = Vec::with_capacity(count.min(code.len()));
            for i in 0..count {
                offsets.push(read_u16(code, at + 10 + 2 * i).ok_or(truncated.clone())? as i16);
            }
            (
                Operand::Table {
                    default,
                    low,
                    offsets,
                },
                10 + 2 * count,
            )
        }
        OperandKind::Lookup => {
            let default = read_u16(code, at).ok_or(truncated.clone())? as i16;
            let count = usize::from(read_u16(code, at + 2).ok_or(truncated.clone())?);
            let mut pairs = Vec::with_capacity(count);
            for i in 0..count {
                let base = at + 4 + 6 * i;
                let key = read_i32(code, base).ok_or(truncated.clone())?;
                let off = read_u16(code, base + 4).ok_or(truncated.clone())? as i16;
                pairs.push((key, off));
            }
            (Operand::Lookup { default, pairs }, 4 + 6 * count)
        }
    };
    Ok(Instr {
        ip,
        op,
        operand,
        len: 1 + size,
    })
}

/// Decodes all of `code` front to back.
pub fn decode_all(code: &[u8]) -> Result<Vec<Instr>, InstrError> {
    let mut out = Vec::new();
    let mut ip = 0;
    while ip < code.len() {
        let instr = decode(code, ip)?;
        ip = instr.next();
        out.push(instr);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_opcode_round_trips_through_its_byte() {
        for b in 0..=u8::MAX {
            if let Some(op) = Opcode::from_u8(b) {
                assert_eq!(op as u8, b, "{}", op.mnemonic());
            }
        }
    }

    #[test]
    fn decodes_tableswitch_targets_relative_to_the_end() {
        // TABLESWITCH default=+2 low=1 high=2 offsets=[0, 1]
        let code = [
            0x74, 0x00, 0x02, 0, 0, 0, 1, 0, 0, 0, 2, 0x00, 0x00, 0x00, 0x01,
        ];
        let instr = decode(&code, 0).unwrap();
        assert_eq!(instr.len, code.len());
        assert_eq!(instr.targets(), vec![17, 15, 16]);
    }

    #[test]
    fn truncated_operand_is_reported() {
        assert_eq!(decode(&[0x12, 0x00], 0), Err(InstrError::Truncated(0)));
    }
}
