use thiserror::Error;

use super::{
    ErrorRegion, FN_ERRORS, FN_LINES, FN_SHARED, FunctionCode, MAGIC, OBJ_DEPENDENCIES,
    OBJ_RELINKED, OBJ_SONAME, ObjectFile, PoolEntry, VERSION,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("not an object file (magic 0x{0:04X})")]
    BadMagic(u16),
    #[error("unsupported object version 0x{0:04X}")]
    BadVersion(u16),
    #[error("unexpected end of object at offset {0}")]
    Truncated(usize),
    #[error("unknown pool tag `{tag}` at offset {offset}")]
    BadTag { tag: char, offset: usize },
    #[error("invalid UTF-8 string at offset {0}")]
    BadUtf8(usize),
    #[error("{0} trailing bytes after the pool")]
    TrailingBytes(usize),
}

impl ObjectFile {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_u16(&mut out, MAGIC);
        write_u16(&mut out, VERSION);
        out.push(self.flags());
        if let Some(soname) = &self.soname {
            write_str(&mut out, soname);
        }
        if let Some(deps) = &self.dependencies {
            write_u16(&mut out, deps.len() as u16);
            for dep in deps {
                write_str(&mut out, dep);
            }
        }
        write_u16(&mut out, self.pool.len() as u16);
        for entry in &self.pool {
            encode_entry(entry, &mut out);
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut rd = Reader { bytes, idx: 0 };
        let magic = rd.read_u16()?;
        if magic != MAGIC {
            return Err(DecodeError::BadMagic(magic));
        }
        let version = rd.read_u16()?;
        if version != VERSION {
            return Err(DecodeError::BadVersion(version));
        }
        let flags = rd.read_u8()?;
        let soname = if flags & OBJ_SONAME != 0 {
            Some(rd.read_str()?)
        } else {
            None
        };
        let dependencies = if flags & OBJ_DEPENDENCIES != 0 {
            let n = rd.read_u16()?;
            let mut deps = Vec::with_capacity(usize::from(n));
            for _ in 0..n {
                deps.push(rd.read_str()?);
            }
            Some(deps)
        } else {
            None
        };
        let count = rd.read_u16()?;
        let mut pool = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            pool.push(decode_entry(&mut rd)?);
        }
        if rd.idx != bytes.len() {
            return Err(DecodeError::TrailingBytes(bytes.len() - rd.idx));
        }
        Ok(Self {
            soname,
            dependencies,
            relinked: flags & OBJ_RELINKED != 0,
            pool,
        })
    }
}

fn write_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    write_u16(out, s.len() as u16);
    out.extend_from_slice(s.as_bytes());
}

fn write_u16_list(out: &mut Vec<u8>, items: &[u16]) {
    write_u16(out, items.len() as u16);
    for v in items {
        write_u16(out, *v);
    }
}

fn encode_entry(entry: &PoolEntry, out: &mut Vec<u8>) {
    out.push(entry.tag());
    match entry {
        PoolEntry::Null => {}
        PoolEntry::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
        PoolEntry::Long(v) => out.extend_from_slice(&v.to_be_bytes()),
        PoolEntry::Float(v) => out.extend_from_slice(&v.to_bits().to_be_bytes()),
        PoolEntry::Double(v) => out.extend_from_slice(&v.to_bits().to_be_bytes()),
        PoolEntry::Str(s) | PoolEntry::Unresolved(s) | PoolEntry::External(s) => write_str(out, s),
        PoolEntry::Func(f) => encode_function(f, out),
    }
}

fn encode_function(f: &FunctionCode, out: &mut Vec<u8>) {
    write_str(out, &f.name);
    out.push(f.flags());
    out.push(f.max_stack);
    out.push(f.max_locals);
    write_u16(out, f.code.len() as u16);
    out.extend_from_slice(&f.code);
    write_u16_list(out, &f.relocs);
    if let Some(lines) = &f.lines {
        let flat: Vec<u16> = lines.iter().flat_map(|(line, ip)| [*line, *ip]).collect();
        write_u16(out, lines.len() as u16);
        for v in flat {
            write_u16(out, v);
        }
    }
    if let Some(errors) = &f.errors {
        write_u16(out, errors.len() as u16);
        for e in errors {
            for v in [e.start, e.end, e.handler, e.depth] {
                write_u16(out, v);
            }
        }
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    idx: usize,
}

impl<'a> Reader<'a> {
    fn read_exact(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.idx + n;
        if end > self.bytes.len() {
            return Err(DecodeError::Truncated(self.idx));
        }
        let s = &self.bytes[self.idx..end];
        self.idx = end;
        Ok(s)
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_exact(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.read_exact(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.read_exact(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let b = self.read_exact(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn read_str(&mut self) -> Result<String, DecodeError> {
        let at = self.idx;
        let n = usize::from(self.read_u16()?);
        let b = self.read_exact(n)?;
        String::from_utf8(b.to_vec()).map_err(|_| DecodeError::BadUtf8(at))
    }

    fn read_u16_list(&mut self) -> Result<Vec<u16>, DecodeError> {
        let n = self.read_u16()?;
        (0..n).map(|_| self.read_u16()).collect()
    }
}

fn decode_entry(rd: &mut Reader<'_>) -> Result<PoolEntry, DecodeError> {
    let offset = rd.idx;
    Ok(match rd.read_u8()? {
        b'0' => PoolEntry::Null,
        b'i' => PoolEntry::Int(rd.read_u32()? as i32),
        b'l' => PoolEntry::Long(rd.read_u64()? as i64),
        b'f' => PoolEntry::Float(f32::from_bits(rd.read_u32()?)),
        b'd' => PoolEntry::Double(f64::from_bits(rd.read_u64()?)),
        b'S' => PoolEntry::Str(rd.read_str()?),
        b'U' => PoolEntry::Unresolved(rd.read_str()?),
        b'E' => PoolEntry::External(rd.read_str()?),
        b'P' => PoolEntry::Func(decode_function(rd)?),
        tag => {
            return Err(DecodeError::BadTag {
                tag: char::from(tag),
                offset,
            });
        }
    })
}

fn decode_function(rd: &mut Reader<'_>) -> Result<FunctionCode, DecodeError> {
    let name = rd.read_str()?;
    let flags = rd.read_u8()?;
    let max_stack = rd.read_u8()?;
    let max_locals = rd.read_u8()?;
    let len = usize::from(rd.read_u16()?);
    let code = rd.read_exact(len)?.to_vec();
    let relocs = rd.read_u16_list()?;
    let lines = if flags & FN_LINES != 0 {
        let n = rd.read_u16()?;
        let mut lines = Vec::with_capacity(usize::from(n));
        for _ in 0..n {
            lines.push((rd.read_u16()?, rd.read_u16()?));
        }
        Some(lines)
    } else {
        None
    };
    let errors = if flags & FN_ERRORS != 0 {
        let n = rd.read_u16()?;
        let mut errors = Vec::with_capacity(usize::from(n));
        for _ in 0..n {
            errors.push(ErrorRegion {
                start: rd.read_u16()?,
                end: rd.read_u16()?,
                handler: rd.read_u16()?,
                depth: rd.read_u16()?,
            });
        }
        Some(errors)
    } else {
        None
    };
    Ok(FunctionCode {
        name,
        shared: flags & FN_SHARED != 0,
        max_stack,
        max_locals,
        code,
        relocs,
        lines,
        errors,
    })
}
