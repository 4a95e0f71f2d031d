use std::fmt::Write as _;

use super::{FunctionCode, Instr, ObjectFile, Operand, PoolEntry, decode};

impl ObjectFile {
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "object flags={:#04x}", self.flags());
        if let Some(soname) = &self.soname {
            let _ = writeln!(out, "soname {soname:?}");
        }
        for dep in self.dependencies.iter().flatten() {
            let _ = writeln!(out, "needs {dep:?}");
        }
        for (i, entry) in self.pool.iter().enumerate() {
            match entry {
                PoolEntry::Func(f) => {
                    let _ = writeln!(
                        out,
                        "#{i} fn {} (stack={}, locals={}{})",
                        f.name,
                        f.max_stack,
                        f.max_locals,
                        if f.shared { ", shared" } else { "" }
                    );
                    self.disassemble_code(f, &mut out);
                }
                other => {
                    let _ = writeln!(out, "#{i} {}", fmt_entry(other));
                }
            }
        }
        out
    }

    fn disassemble_code(&self, f: &FunctionCode, out: &mut String) {
        let mut ip = 0;
        let mut last_line = None;
        while ip < f.code.len() {
            let instr = match decode(&f.code, ip) {
                Ok(instr) => instr,
                Err(e) => {
                    let _ = writeln!(out, "  {ip:04} <{e}>");
                    return;
                }
            };
            let line = f.line_at(ip);
            if line.is_some() && line != last_line {
                let _ = writeln!(out, "  ; line {}", line.unwrap_or_default());
                last_line = line;
            }
            let _ = writeln!(out, "  {ip:04} {}", self.fmt_instr(&instr));
            ip = instr.next();
        }
        for e in f.errors.iter().flatten() {
            let _ = writeln!(
                out,
                "  catch {:04}..{:04} -> {:04} (depth {})",
                e.start, e.end, e.handler, e.depth
            );
        }
    }

    fn fmt_instr(&self, instr: &Instr) -> String {
        let name = instr.op.mnemonic();
        let targets = instr.targets();
        match &instr.operand {
            Operand::None => name.to_string(),
            Operand::U8(v) => format!("{name} {v}"),
            Operand::I8(v) => format!("{name} {v}"),
            Operand::I16(v) => format!("{name} {v}"),
            Operand::Local(slot) => format!("{name} {slot}"),
            Operand::Pool(index) => match self.pool.get(usize::from(*index)) {
                Some(entry) => format!("{name} #{index} ; {}", fmt_entry(entry)),
                None => format!("{name} #{index} ; <out of range>"),
            },
            Operand::Jump(_) => format!("{name} {:04}", targets[0]),
            Operand::Table { low, .. } => {
                let cases: Vec<String> = targets[1..]
                    .iter()
                    .zip(i64::from(*low)..)
                    .map(|(t, k)| format!("{k}: {t:04}"))
                    .collect();
                format!("{name} [{}] default: {:04}", cases.join(", "), targets[0])
            }
            Operand::Lookup { pairs, .. } => {
                let cases: Vec<String> = pairs
                    .iter()
                    .zip(&targets[1..])
                    .map(|((k, _), t)| format!("{k}: {t:04}"))
                    .collect();
                format!("{name} [{}] default: {:04}", cases.join(", "), targets[0])
            }
        }
    }
}

fn fmt_entry(entry: &PoolEntry) -> String {
    match entry {
        PoolEntry::Null => "null".to_string(),
        PoolEntry::Int(v) => format!("int {v}"),
        PoolEntry::Long(v) => format!("long {v}"),
        PoolEntry::Float(v) => format!("float {v:?}"),
        PoolEntry::Double(v) => format!("double {v:?}"),
        PoolEntry::Str(s) => format!("string {s:?}"),
        PoolEntry::Unresolved(name) => format!("extern {name}"),
        PoolEntry::External(name) => format!("linked {name}"),
        PoolEntry::Func(f) => format!("fn {}", f.name),
    }
}
