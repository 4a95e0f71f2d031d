//! Use counts, recomputed from scratch on every pass.

use std::collections::{HashMap, HashSet};

use crate::ast::{Expr, ExprKind, Value};
use crate::unit::{FuncId, Unit, VarId};

/// Number of reads of each variable in `body`.
pub fn count_reads(body: &Expr) -> HashMap<VarId, usize> {
    let mut reads = HashMap::new();
    collect_reads(body, &mut reads);
    reads
}

fn collect_reads(e: &Expr, reads: &mut HashMap<VarId, usize>) {
    if let ExprKind::Var(id) = e.kind {
        *reads.entry(id).or_insert(0) += 1;
    }
    e.for_each_child(&mut |child| collect_reads(child, reads));
}

/// Functions referenced from `body`, called or taken as values.
pub fn referenced_funcs(body: &Expr, out: &mut Vec<FuncId>) {
    if let ExprKind::Const(Value::Func(f)) = &body.kind {
        out.push(*f);
    }
    body.for_each_child(&mut |child| referenced_funcs(child, out));
}

/// Implemented functions reachable from `main` and the shared functions.
/// A unit with neither keeps everything.
pub fn reachable(unit: &Unit) -> HashSet<FuncId> {
    let mut roots: Vec<FuncId> = unit
        .implemented
        .iter()
        .copied()
        .filter(|f| unit.func(*f).shared)
        .collect();
    roots.extend(unit.main_func().filter(|f| unit.func(*f).is_implemented()));
    if roots.is_empty() {
        return unit.implemented.iter().copied().collect();
    }
    let mut live = HashSet::new();
    while let Some(f) = roots.pop() {
        if !live.insert(f) {
            continue;
        }
        if let Some(body) = &unit.func(f).body {
            referenced_funcs(body, &mut roots);
        }
    }
    live
}
