mod common;

use arbtest::arbitrary::{self, Unstructured};
use arbtest::arbtest;
use common::{Machine, Value, compile_with, options, parse_ok, run_int, run_with};
use etherlib::ast::{Expr, ExprKind, UnaryOp};
use etherlib::compile::Compiled;
use etherlib::optimizer::optimize;

const OPS: [&str; 11] = ["+", "-", "*", "/", "%", "&", "|", "^", "<<", ">>", ">>>"];

fn int_expr(u: &mut Unstructured<'_>, depth: u32) -> arbitrary::Result<String> {
    if depth == 0 || u.ratio(1, 3)? {
        return Ok(match u.int_in_range(0..=3)? {
            0 => "a".to_string(),
            1 => "b".to_string(),
            _ => u.int_in_range(-40i32..=40)?.to_string(),
        });
    }
    let op = u.choose(&OPS)?;
    let left = int_expr(u, depth - 1)?;
    let right = int_expr(u, depth - 1)?;
    Ok(format!("({left} {op} {right})"))
}

fn outcome(src: &str, opt_level: u8) -> Result<i32, i32> {
    let compiled = compile_with(src, &options(opt_level));
    match Machine::new(&compiled.object).run_main() {
        Ok(Value::Int(n)) => Ok(n),
        Ok(other) => panic!("unexpected result {other:?}"),
        Err(Value::Error { code, .. }) => Err(code),
        Err(other) => panic!("unexpected throw {other:?}"),
    }
}

#[test]
fn folding_preserves_integer_semantics() {
    arbtest(|u| {
        let a = u.int_in_range(-2_000_000_000i32..=2_000_000_000)?;
        let b = u.int_in_range(-70i32..=70)?;
        let value = int_expr(u, 4)?;
        let lhs = int_expr(u, 2)?;
        let rhs = int_expr(u, 2)?;
        let src = format!(
            "def main(): Int {{\n  var a = {a}\n  var b = {b}\n  return {value} * 3 + (if ({lhs} < {rhs}) 1 else 0)\n}}"
        );
        assert_eq!(outcome(&src, 0), outcome(&src, 2), "{src}");
        Ok(())
    })
    .budget_ms(2_000);
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Ty {
    Int,
    Long,
    Float,
    Double,
    Bool,
}

impl Ty {
    const ALL: [Ty; 5] = [Ty::Int, Ty::Long, Ty::Float, Ty::Double, Ty::Bool];

    fn name(self) -> &'static str {
        match self {
            Ty::Int => "Int",
            Ty::Long => "Long",
            Ty::Float => "Float",
            Ty::Double => "Double",
            Ty::Bool => "Bool",
        }
    }

    fn literal(self, u: &mut Unstructured<'_>) -> arbitrary::Result<String> {
        const REALS: [&str; 8] = ["0.0", "1.0", "0.5", "2.25", "3.0", "1e30", "0.1", "7.75"];
        Ok(match self {
            Ty::Int => u.int_in_range(-40i32..=40)?.to_string(),
            Ty::Long => format!("{}L", u.int_in_range(-(1i64 << 40)..=(1i64 << 40))?),
            Ty::Float => format!("{}f", u.choose(&REALS)?),
            Ty::Double => u.choose(&REALS)?.to_string(),
            Ty::Bool => u.choose(&["true", "false"])?.to_string(),
        })
    }
}

/// An expression of type `ty` over the locals `a_T`/`b_T` of every type.
fn typed_expr(u: &mut Unstructured<'_>, ty: Ty, depth: u32) -> arbitrary::Result<String> {
    if depth == 0 || u.ratio(1, 3)? {
        return Ok(match u.int_in_range(0..=3)? {
            0 => format!("a_{}", ty.name()),
            1 => format!("b_{}", ty.name()),
            _ => ty.literal(u)?,
        });
    }
    let sub = depth - 1;
    Ok(match ty {
        Ty::Int | Ty::Long => {
            if u.ratio(1, 4)? {
                let op = u.choose(&["<<", ">>", ">>>"])?;
                let count = typed_expr(u, Ty::Int, sub)?;
                format!("({} {op} {count})", typed_expr(u, ty, sub)?)
            } else {
                let op = u.choose(&["+", "-", "*", "/", "%", "&", "|", "^"])?;
                format!("({} {op} {})", typed_expr(u, ty, sub)?, typed_expr(u, ty, sub)?)
            }
        }
        Ty::Float | Ty::Double => {
            let op = u.choose(&["+", "-", "*", "/", "%"])?;
            format!("({} {op} {})", typed_expr(u, ty, sub)?, typed_expr(u, ty, sub)?)
        }
        Ty::Bool => match u.int_in_range(0..=2)? {
            0 => {
                let op = u.choose(&["&", "|", "^", "&&", "||", "==", "!="])?;
                format!("({} {op} {})", typed_expr(u, ty, sub)?, typed_expr(u, ty, sub)?)
            }
            1 => format!("!{}", typed_expr(u, ty, sub)?),
            _ => {
                let operand = *u.choose(&Ty::ALL[..4])?;
                let op = u.choose(&["<", "<=", ">", ">=", "==", "!="])?;
                format!(
                    "({} {op} {})",
                    typed_expr(u, operand, sub)?,
                    typed_expr(u, operand, sub)?
                )
            }
        },
    })
}

/// A result compared by bits, so NaN equals NaN and `-0.0` differs from `0.0`.
#[derive(Debug, PartialEq)]
enum Observed {
    Int(i32),
    Long(i64),
    Float(u32),
    Double(u64),
    Nan,
    Thrown(i32),
}

fn observe(src: &str, opt_level: u8) -> Observed {
    let compiled = compile_with(src, &options(opt_level));
    match Machine::new(&compiled.object).run_main() {
        Ok(Value::Int(n)) => Observed::Int(n),
        Ok(Value::Long(n)) => Observed::Long(n),
        Ok(Value::Float(x)) if x.is_nan() => Observed::Nan,
        Ok(Value::Float(x)) => Observed::Float(x.to_bits()),
        Ok(Value::Double(x)) if x.is_nan() => Observed::Nan,
        Ok(Value::Double(x)) => Observed::Double(x.to_bits()),
        Ok(other) => panic!("unexpected result {other:?}"),
        Err(Value::Error { code, .. }) => Observed::Thrown(code),
        Err(other) => panic!("unexpected throw {other:?}"),
    }
}

#[test]
fn folding_agrees_with_run_time_for_every_type() {
    arbtest(|u| {
        let ty = *u.choose(&Ty::ALL)?;
        let mut src = format!("def main(): {} {{\n", ty.name());
        for t in Ty::ALL {
            for var in ["a", "b"] {
                let init = t.literal(u)?;
                src.push_str(&format!("  var {var}_{}: {} = {init}\n", t.name(), t.name()));
            }
        }
        src.push_str(&format!("  return {}\n}}", typed_expr(u, ty, 4)?));
        assert_eq!(observe(&src, 0), observe(&src, 2), "{src}");
        Ok(())
    })
    .budget_ms(2_000);
}

#[test]
fn special_float_values_fold_like_run_time() {
    for (ty, expr) in [
        ("Double", "0.0 / 0.0"),
        ("Double", "1.0 / 0.0"),
        ("Double", "-1.0 / 0.0"),
        ("Double", "0.0 * -1.0"),
        ("Double", "5.5 % 0.0"),
        ("Float", "0.0f / 0.0f"),
        ("Float", "-7.5f % 2.0f"),
        ("Float", "1e30f * 1e30f"),
        ("Long", "1L << 65"),
        ("Long", "-1L >>> 60"),
        ("Int", "1 << 33"),
        ("Int", "-8 >> 35"),
        ("Int", "-1 >>> 28"),
    ] {
        let src = format!("def main(): {ty} = {expr}");
        assert_eq!(observe(&src, 0), observe(&src, 2), "{src}");
    }
}

#[test]
fn constant_expressions_fold_to_literals() {
    arbtest(|u| {
        let value = int_expr(u, 4)?.replace(['a', 'b'], "7");
        let src = format!("def main(): Int = {value}");
        let plain = outcome(&src, 0);
        let folded = compile_with(&src, &options(2));
        if plain.is_ok() {
            let main = folded.unit.main_func().expect("main survives");
            let body = folded.unit.func(main).body.as_ref().expect("body");
            assert!(
                matches!(&body.kind, etherlib::ast::ExprKind::Return(Some(v)) if v.const_value().is_some()),
                "{src} left {body:?}"
            );
        }
        Ok(())
    })
    .budget_ms(1_000);
}

#[test]
fn optimizing_twice_changes_nothing() {
    arbtest(|u| {
        let value = int_expr(u, 4)?;
        let cond = int_expr(u, 2)?;
        let src = format!(
            "def f(a: Int, b: Int): Int {{\n  var t = {value}\n  if ({cond} != 0) return t\n  return -t\n}}\ndef main(): Int = f(3, 4)"
        );
        let (mut unit, _) = parse_ok(&src);
        optimize(&mut unit);
        let once = unit.funcs.clone();
        optimize(&mut unit);
        assert_eq!(once, unit.funcs, "{src}");
        Ok(())
    })
    .budget_ms(1_000);
}

#[test]
fn division_by_zero_survives_optimization() {
    let src = r#"
def main(): Int {
  var zero = 0
  try {
    var unused = 10 / zero
    var other = 5 % 0
    return 0
  } catch (var e) {
    return 100 + e.code()
  }
}
"#;
    for level in [0, 1, 2] {
        match run_with(src, &options(level)) {
            Value::Int(n) => assert_eq!(n, 101, "-O{level}"),
            other => panic!("unexpected result {other:?}"),
        }
    }
}

#[test]
fn unreachable_functions_are_dropped() {
    let src = r#"
def helper(): Int = 2
def orphan(): Int = 3
def main(): Int = helper() * 21
"#;
    let compiled = compile_with(src, &options(1));
    let names: Vec<&str> = compiled
        .object
        .functions()
        .map(|(_, f)| f.name.as_str())
        .collect();
    assert!(names.contains(&"main"));
    assert!(!names.contains(&"orphan"), "{names:?}");
    assert_eq!(run_int(src), 42);

    let kept = compile_with(src, &options(0));
    assert!(kept.object.functions().any(|(_, f)| f.name == "orphan"));
}

#[test]
fn constant_branches_are_pruned() {
    let src = r#"
const DEBUG = false
def main(): Int {
  if (DEBUG) return 1
  while (false) { return 2 }
  return 3
}
"#;
    let compiled = compile_with(src, &options(1));
    let main = compiled.unit.main_func().expect("main");
    let body = compiled.unit.func(main).body.as_ref().expect("body");
    let mut branches = 0;
    fn walk(e: &etherlib::ast::Expr, n: &mut usize) {
        if matches!(e.kind, etherlib::ast::ExprKind::If { .. } | etherlib::ast::ExprKind::Loop { .. }) {
            *n += 1;
        }
        e.for_each_child(&mut |c| walk(c, n));
    }
    walk(body, &mut branches);
    assert_eq!(branches, 0, "{body:?}");
    assert_eq!(run_int(src), 3);
}

fn returned<'a>(compiled: &'a Compiled, signature: &str) -> &'a Expr {
    let f = compiled.unit.func_by_signature(signature).expect(signature);
    match &compiled.unit.func(f).body.as_ref().expect("body").kind {
        ExprKind::Return(Some(v)) => v,
        other => panic!("{signature} does not return a value: {other:?}"),
    }
}

fn is_const(e: &Expr, expected: etherlib::ast::Value) -> bool {
    e.const_value() == Some(&expected)
}

#[test]
fn absorbing_operands_collapse() {
    use etherlib::ast::Value as V;
    let src = r#"
var hits = 0
def tick(): Int { hits += 1; return 5 }
def mul(x: Int): Int = x * 0
def and0(x: Int): Int = 0 & x
def or1(x: Long): Long = x | -1L
def mul0(x: Long): Long = 0L * x
def xor1(x: Int): Int = x ^ -1
def band(x: Bool): Bool = x & false
def bor(x: Bool): Bool = true | x
def bxor(x: Bool): Bool = x ^ true
def effect(): Int = tick() * 0
def main(): Int {
  var r = mul(3) + and0(7) + xor1(5) + effect()
  if (or1(9L) == -1L && mul0(4L) == 0L) r += 100
  if (!band(true) && bor(false) && !bxor(true)) r += 1000
  return r + hits * 10
}
"#;
    let compiled = compile_with(src, &options(2));
    assert!(is_const(returned(&compiled, "mul"), V::Int(0)));
    assert!(is_const(returned(&compiled, "and0"), V::Int(0)));
    assert!(is_const(returned(&compiled, "or1"), V::Long(-1)));
    assert!(is_const(returned(&compiled, "mul0"), V::Long(0)));
    assert!(is_const(returned(&compiled, "band"), V::Bool(false)));
    assert!(is_const(returned(&compiled, "bor"), V::Bool(true)));
    assert!(matches!(
        returned(&compiled, "xor1").kind,
        ExprKind::Unary { op: UnaryOp::BitNot, .. }
    ));
    assert!(matches!(
        returned(&compiled, "bxor").kind,
        ExprKind::Unary { op: UnaryOp::Not, .. }
    ));

    let effect = returned(&compiled, "effect");
    let kept_call = matches!(&effect.kind, ExprKind::Block { stmts, .. }
        if matches!(stmts.first().map(|s| &s.kind), Some(ExprKind::Discard(_)))
            && stmts.last().is_some_and(|last| is_const(last, V::Int(0))));
    assert!(kept_call, "{effect:?}");

    // ~5 = -6, both conditions hold, and tick() ran once.
    for level in [0, 2] {
        match run_with(src, &options(level)) {
            Value::Int(n) => assert_eq!(n, -6 + 100 + 1000 + 10, "-O{level}"),
            other => panic!("unexpected result {other:?}"),
        }
    }
}

#[test]
fn length_of_a_literal_array_keeps_item_effects() {
    let src = r#"
var hits = 0
def tick(): Int { hits += 1; return 5 }
def count(): Int = (new [Int]{tick(), 2, tick()}).len
def main(): Int = count() * 10 + hits
"#;
    let compiled = compile_with(src, &options(2));
    let count = returned(&compiled, "count");
    let mut built = false;
    fn walk(e: &Expr, built: &mut bool) {
        if matches!(e.kind, ExprKind::NewArrayInit(_) | ExprKind::ArrayLen(_)) {
            *built = true;
        }
        e.for_each_child(&mut |c| walk(c, built));
    }
    walk(count, &mut built);
    assert!(!built, "{count:?}");
    for level in [0, 2] {
        match run_with(src, &options(level)) {
            Value::Int(n) => assert_eq!(n, 32, "-O{level}"),
            other => panic!("unexpected result {other:?}"),
        }
    }
}
