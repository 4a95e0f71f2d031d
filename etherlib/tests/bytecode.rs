mod common;

use common::{Value, compile_ok, compile_with, options, run_with};
use etherlib::bytecode::{
    DecodeError, FunctionCode, ObjectFile, Opcode, PoolEntry, VerifyError, verify, verify_function,
};
use etherlib::compile::compile;
use etherlib::config::CompilerOptions;
use etherlib::resolver::MemoryLoader;

const SAMPLE: &str = r#"
var calls = 0
def classify(k: Int): Int {
  calls += 1
  switch (k) {
    0, 1, 2: return 1
    3..6: return 2
    else: return 0
  }
}
def sparse(k: Int): Int {
  switch (k) {
    1: return 1
    1000: return 2
    -50000: return 3
  }
  return 0
}
def main(): Int {
  var s = "hello"
  try {
    return classify(s.len()) + sparse(1000) + calls
  } catch {
    return -1
  }
}
"#;

#[test]
fn object_header_and_round_trip() {
    let compiled = compile_ok(SAMPLE);
    let bytes = compiled.object.to_bytes();
    assert_eq!(&bytes[..4], &[0xC0, 0xDE, 0x02, 0x02]);
    let decoded = ObjectFile::from_bytes(&bytes).expect("decodes");
    assert_eq!(decoded, compiled.object);
    verify(&decoded).expect("decoded object verifies");
}

#[test]
fn decoding_rejects_malformed_objects() {
    let bytes = compile_ok("def main(): Int = 1").object.to_bytes();

    let mut bad_magic = bytes.clone();
    bad_magic[0] = 0xCA;
    assert!(matches!(ObjectFile::from_bytes(&bad_magic), Err(DecodeError::BadMagic(_))));

    let mut bad_version = bytes.clone();
    bad_version[3] = 0x01;
    assert!(matches!(ObjectFile::from_bytes(&bad_version), Err(DecodeError::BadVersion(0x0201))));

    let truncated = &bytes[..bytes.len() - 1];
    assert!(matches!(ObjectFile::from_bytes(truncated), Err(DecodeError::Truncated(_))));

    let mut trailing = bytes;
    trailing.push(0);
    assert_eq!(ObjectFile::from_bytes(&trailing), Err(DecodeError::TrailingBytes(1)));
}

#[test]
fn disassembly_names_switches_globals_and_externals() {
    let text = compile_ok(SAMPLE).object.disassemble();
    assert!(text.contains("fn main"), "{text}");
    assert!(text.contains("TABLESWITCH"), "{text}");
    assert!(text.contains("LOOKUPSWITCH"), "{text}");
    assert!(text.contains("GETGLOBAL"), "{text}");
    assert!(text.contains("string \"calls\""), "{text}");
    assert!(text.contains("extern String.len"), "{text}");
    assert!(text.contains("catch "), "{text}");
}

#[test]
fn try_blocks_emit_error_regions() {
    let compiled = compile_ok(SAMPLE);
    let main = compiled.object.function("main").expect("main");
    let regions = main.errors.as_ref().expect("main has an error table");
    assert_eq!(regions.len(), 1);
    let r = regions[0];
    assert!(r.start < r.end && r.end <= r.handler, "{r:?}");
    assert_eq!(r.depth, 0);

    let classify = compiled.object.function("classify").expect("classify");
    assert!(classify.errors.is_none());
}

#[test]
fn debug_lines_are_optional() {
    let plain = compile_ok(SAMPLE);
    assert!(plain.object.functions().all(|(_, f)| f.lines.is_none()));

    let mut opts = CompilerOptions::default();
    opts.debug_lines = true;
    let debug = compile_with(SAMPLE, &opts);
    let classify = debug.object.function("classify").expect("classify");
    let lines = classify.lines.as_ref().expect("line table");
    assert!(!lines.is_empty());
    assert_eq!(classify.line_at(0), Some(4));
    assert!(lines.windows(2).all(|w| w[0].1 <= w[1].1), "{lines:?}");
}

#[test]
fn header_declarations_are_shared() {
    let loader = MemoryLoader::new()
        .with_file("main.e", "use \"api\"\ndef twice(x: Int): Int = x * 2\ndef helper(): Int = 1\ndef main(): Int = twice(helper())")
        .with_file("api.eh", "def twice(x: Int): Int");
    let compiled = compile("main.e", &options(0), &loader).expect("compiles");
    let twice = compiled.object.function("twice").expect("twice");
    let helper = compiled.object.function("helper").expect("helper");
    assert!(twice.shared);
    assert!(!helper.shared);
}

#[test]
fn calls_to_undefined_functions_are_unresolved_entries() {
    let loader = MemoryLoader::new()
        .with_file("main.e", "use \"io\"\ndef main() { puts(\"hi\") }")
        .with_file("io.eh", "def puts(s: String)");
    let compiled = compile("main.e", &CompilerOptions::default(), &loader).expect("compiles");
    assert!(
        compiled
            .object
            .pool
            .iter()
            .any(|e| matches!(e, PoolEntry::Unresolved(name) if name == "puts"))
    );
}

#[test]
fn declared_maxima_cover_the_code() {
    let compiled = compile_ok(SAMPLE);
    for (_, f) in compiled.object.functions() {
        assert!(f.max_stack >= 1, "{}", f.name);
        verify_function(f, compiled.object.pool.len()).expect("verifies");
    }
    let main = compiled.object.function("main").expect("main");
    assert!(main.max_locals >= 1);
}

#[test]
fn verifier_rejects_broken_code() {
    let underflow = FunctionCode {
        name: "broken".to_string(),
        max_stack: 2,
        code: vec![Opcode::Iconst1 as u8, Opcode::Iadd as u8, Opcode::RetNull as u8],
        ..FunctionCode::default()
    };
    assert!(matches!(
        verify_function(&underflow, 0),
        Err(VerifyError::Underflow { ip: 1, .. })
    ));

    let falls_off = FunctionCode {
        name: "open".to_string(),
        max_stack: 1,
        code: vec![Opcode::Iconst1 as u8],
        ..FunctionCode::default()
    };
    assert!(matches!(
        verify_function(&falls_off, 0),
        Err(VerifyError::FallsOffEnd { .. })
    ));
}

#[test]
fn switch_without_cases_still_pops_its_key() {
    let src = r#"
def main(): Int {
  var i = 0
  var x = 0
  while (i < 3) {
    switch (i) {
      else: x = x + 1
    }
    i = i + 1
  }
  return x
}
"#;
    let compiled = compile_with(src, &options(0));
    let main = compiled.object.function("main").expect("main");
    assert!(main.code.contains(&(Opcode::Pop as u8)));
    verify(&compiled.object).expect("loop keeps a balanced stack");
    match run_with(src, &options(0)) {
        Value::Int(n) => assert_eq!(n, 3),
        other => panic!("unexpected result {other:?}"),
    }
}
