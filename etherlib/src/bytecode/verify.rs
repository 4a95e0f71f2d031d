//! Independent check of emitted code: every jump lands on an instruction,
//! the operand stack never underflows or exceeds the declared maximum, and
//! all paths into an instruction agree on the stack depth.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

use super::{FunctionCode, InstrError, ObjectFile, Operand, decode_all};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("{func}: {source}")]
    Decode {
        func: String,
        #[source]
        source: InstrError,
    },
    #[error("{func}: jump at {ip} to {target} is not an instruction boundary")]
    BadJump { func: String, ip: usize, target: i64 },
    #[error("{func}: stack underflow at {ip}")]
    Underflow { func: String, ip: usize },
    #[error("{func}: stack depth {depth} at {ip} exceeds declared {max}")]
    Overflow {
        func: String,
        ip: usize,
        depth: usize,
        max: usize,
    },
    #[error("{func}: inconsistent stack depth at {ip} ({expected} vs {found})")]
    DepthMismatch {
        func: String,
        ip: usize,
        expected: usize,
        found: usize,
    },
    #[error("{func}: local {slot} at {ip} exceeds declared {max}")]
    BadLocal {
        func: String,
        ip: usize,
        slot: u8,
        max: u8,
    },
    #[error("{func}: pool index {index} at {ip} out of range")]
    BadPoolIndex { func: String, ip: usize, index: u16 },
    #[error("{func}: relocation {offset} does not name a pool operand")]
    BadReloc { func: String, offset: u16 },
    #[error("{func}: control falls off the end of the code")]
    FallsOffEnd { func: String },
    #[error("{func}: error region {index} is out of range")]
    BadErrorRegion { func: String, index: usize },
}

/// Verifies every function in `obj`.
pub fn verify(obj: &ObjectFile) -> Result<(), VerifyError> {
    for (_, f) in obj.functions() {
        verify_function(f, obj.pool.len())?;
    }
    Ok(())
}

pub fn verify_function(f: &FunctionCode, pool_len: usize) -> Result<(), VerifyError> {
    let func = || f.name.clone();
    let instrs = decode_all(&f.code).map_err(|source| VerifyError::Decode {
        func: func(),
        source,
    })?;
    let at: HashMap<usize, usize> = instrs.iter().enumerate().map(|(i, ins)| (ins.ip, i)).collect();

    // Operands and relocations.
    let mut pool_operands = BTreeSet::new();
    for ins in &instrs {
        match ins.operand {
            Operand::Local(slot) if slot >= f.max_locals => {
                return Err(VerifyError::BadLocal {
                    func: func(),
                    ip: ins.ip,
                    slot,
                    max: f.max_locals,
                });
            }
            Operand::Pool(index) => {
                if usize::from(index) >= pool_len {
                    return Err(VerifyError::BadPoolIndex {
                        func: func(),
                        ip: ins.ip,
                        index,
                    });
                }
                pool_operands.insert(ins.ip + 1);
            }
            _ => {}
        }
        for target in ins.targets() {
            let ok = usize::try_from(target).is_ok_and(|t| at.contains_key(&t));
            if !ok {
                return Err(VerifyError::BadJump {
                    func: func(),
                    ip: ins.ip,
                    target,
                });
            }
        }
    }
    if let Some(offset) = f
        .relocs
        .iter()
        .find(|r| !pool_operands.contains(&usize::from(**r)))
    {
        return Err(VerifyError::BadReloc {
            func: func(),
            offset: *offset,
        });
    }

    // Stack depths, by a worklist over reachable instructions.
    let mut flow = DepthFlow {
        func: &f.name,
        at: &at,
        depth_at: vec![None; instrs.len()],
        work: Vec::new(),
    };
    if !instrs.is_empty() {
        flow.enter(0, 0, 0)?;
    }
    for (index, region) in f.errors.iter().flatten().enumerate() {
        let valid = region.start <= region.end && usize::from(region.end) <= f.code.len();
        if !valid {
            return Err(VerifyError::BadErrorRegion {
                func: func(),
                index,
            });
        }
        let handler = usize::from(region.handler);
        flow.enter(handler, usize::from(region.depth) + 1, handler)?;
    }

    let max = usize::from(f.max_stack);
    while let Some(i) = flow.work.pop() {
        let ins = &instrs[i];
        let depth = flow.depth_at[i].unwrap_or(0);
        let (pops, pushes) = ins.stack_effect();
        let after = depth.checked_sub(pops).ok_or_else(|| VerifyError::Underflow {
            func: func(),
            ip: ins.ip,
        })? + pushes;
        if after > max {
            return Err(VerifyError::Overflow {
                func: func(),
                ip: ins.ip,
                depth: after,
                max,
            });
        }
        for target in ins.targets() {
            flow.enter(target as usize, after, ins.ip)?;
        }
        if !ins.op.ends_block() {
            if ins.next() >= f.code.len() {
                return Err(VerifyError::FallsOffEnd { func: func() });
            }
            flow.enter(ins.next(), after, ins.ip)?;
        }
    }
    Ok(())
}

struct DepthFlow<'a> {
    func: &'a str,
    at: &'a HashMap<usize, usize>,
    depth_at: Vec<Option<usize>>,
    work: Vec<usize>,
}

impl DepthFlow<'_> {
    /// Records arrival at `ip` with `depth`, queueing it the first time.
    fn enter(&mut self, ip: usize, depth: usize, from: usize) -> Result<(), VerifyError> {
        let Some(&i) = self.at.get(&ip) else {
            return Err(VerifyError::BadJump {
                func: self.func.to_string(),
                ip: from,
                target: ip as i64,
            });
        };
        match self.depth_at[i] {
            Some(d) if d != depth => Err(VerifyError::DepthMismatch {
                func: self.func.to_string(),
                ip,
                expected: d,
                found: depth,
            }),
            Some(_) => Ok(()),
            None => {
                self.depth_at[i] = Some(depth);
                self.work.push(i);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn func(code: Vec<u8>, max_stack: u8) -> FunctionCode {
        FunctionCode {
            name: "f".to_string(),
            max_stack,
            code,
            ..FunctionCode::default()
        }
    }

    #[test]
    fn accepts_a_balanced_branch() {
        // ICONST_1; IFEQ +2; ICONST_2; POP; RET_NULL
        let code = vec![0x04, 0x70, 0x00, 0x02, 0x05, 0x90, 0x9B];
        assert_eq!(verify_function(&func(code, 1), 0), Ok(()));
    }

    #[test]
    fn rejects_paths_that_disagree_on_depth() {
        // ICONST_1; IFEQ +1; ICONST_2; RET_NULL
        let code = vec![0x04, 0x70, 0x00, 0x01, 0x05, 0x9B];
        assert_eq!(
            verify_function(&func(code, 1), 0),
            Err(VerifyError::DepthMismatch {
                func: "f".to_string(),
                ip: 5,
                expected: 0,
                found: 1,
            })
        );
    }

    #[test]
    fn rejects_jump_into_an_operand() {
        // GOTO -2 lands inside its own operand.
        let code = vec![0x72, 0xFF, 0xFE, 0x9B];
        assert!(matches!(
            verify_function(&func(code, 0), 0),
            Err(VerifyError::BadJump { .. })
        ));
    }

    #[test]
    fn rejects_understated_max_stack() {
        let code = vec![0x04, 0x05, 0x90, 0x90, 0x9B];
        assert!(matches!(
            verify_function(&func(code, 1), 0),
            Err(VerifyError::Overflow { depth: 2, .. })
        ));
    }

    #[test]
    fn rejects_falling_off_the_end() {
        assert_eq!(
            verify_function(&func(vec![0x00], 0), 0),
            Err(VerifyError::FallsOffEnd {
                func: "f".to_string()
            })
        );
    }
}
