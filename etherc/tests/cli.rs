use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

const OK_PROGRAM: &str = r#"
def main(): Int {
  var sum = 0
  for (var i in 1..3) sum += i
  return sum
}
"#;

const NARROWING: &str = "def narrow(d: Double): Int {\n  var i: Int = d\n  return i\n}\n";

fn etherc_bin() -> &'static str {
    env!("CARGO_BIN_EXE_etherc")
}

fn make_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}_{nanos}"));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn etherc(args: &[&std::ffi::OsStr]) -> Output {
    Command::new(etherc_bin())
        .args(args)
        .env_remove("ETHER_PATH")
        .env_remove("RUST_LOG")
        .output()
        .expect("run etherc")
}

fn code(output: &Output) -> i32 {
    output.status.code().expect("exit code")
}

#[test]
fn compiles_next_to_the_input() {
    let tmp = make_temp_dir("etherc_ok");
    let file = tmp.join("sum.e");
    fs::write(&file, OK_PROGRAM).expect("write fixture");

    let output = etherc(&[file.as_os_str()]);
    assert_eq!(code(&output), 0, "{}", String::from_utf8_lossy(&output.stderr));
    let object = fs::read(tmp.join("sum.e.o")).expect("object written");
    assert_eq!(&object[..4], &[0xC0, 0xDE, 0x02, 0x02]);
    assert!(!tmp.join("sum.o").exists());
}

#[test]
fn output_path_can_be_chosen() {
    let tmp = make_temp_dir("etherc_out");
    let file = tmp.join("sum.e");
    let out = tmp.join("build.obj");
    fs::write(&file, OK_PROGRAM).expect("write fixture");

    let output = etherc(&["-o".as_ref(), out.as_os_str(), file.as_os_str()]);
    assert_eq!(code(&output), 0);
    assert!(out.is_file());
    assert!(!tmp.join("sum.e.o").exists());
}

#[test]
fn missing_input_argument_exits_with_one() {
    let output = etherc(&[]);
    assert_eq!(code(&output), 1);
    assert!(String::from_utf8_lossy(&output.stderr).contains("no input file"));
}

#[test]
fn unknown_warning_is_a_usage_error() {
    let tmp = make_temp_dir("etherc_usage");
    let file = tmp.join("sum.e");
    fs::write(&file, OK_PROGRAM).expect("write fixture");

    let output = etherc(&["-Wno-such".as_ref(), file.as_os_str()]);
    assert_eq!(code(&output), 2);
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown warning category"));
}

#[test]
fn unreadable_source_is_an_io_error() {
    let tmp = make_temp_dir("etherc_io");
    let output = etherc(&[tmp.join("absent.e").as_os_str()]);
    assert_eq!(code(&output), 3);
}

#[test]
fn compile_errors_exit_with_ten() {
    let tmp = make_temp_dir("etherc_bad");
    let file = tmp.join("bad.e");
    fs::write(&file, "def main(): Int {\n  return 1\n  var x = 2\n}\n").expect("write fixture");

    let output = etherc(&[file.as_os_str()]);
    assert_eq!(code(&output), 10);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("bad.e:3"), "{stderr}");
    assert!(stderr.contains("Unreachable statement"), "{stderr}");
    assert!(!tmp.join("bad.e.o").exists());
}

#[test]
fn warnings_are_reported_unless_quiet() {
    let tmp = make_temp_dir("etherc_warn");
    let file = tmp.join("narrow.e");
    fs::write(&file, NARROWING).expect("write fixture");

    let loud = etherc(&[file.as_os_str()]);
    assert_eq!(code(&loud), 0);
    assert!(String::from_utf8_lossy(&loud.stderr).contains("warning[typecast]"));

    let quiet = etherc(&["-q".as_ref(), file.as_os_str()]);
    assert_eq!(code(&quiet), 0);
    assert!(!String::from_utf8_lossy(&quiet.stderr).contains("warning"));

    let silenced = etherc(&["-Wno-typecast".as_ref(), file.as_os_str()]);
    assert!(!String::from_utf8_lossy(&silenced.stderr).contains("typecast"));

    let fatal = etherc(&["-Werror".as_ref(), file.as_os_str()]);
    assert_eq!(code(&fatal), 10);
}

#[test]
fn include_directories_are_searched() {
    let tmp = make_temp_dir("etherc_inc");
    let inc = tmp.join("include");
    fs::create_dir_all(&inc).expect("create include dir");
    fs::write(inc.join("io.eh"), "def puts(s: String)\n").expect("write header");
    let file = tmp.join("hello.e");
    fs::write(&file, "use \"io\"\ndef main() { puts(\"hi\") }\n").expect("write fixture");

    let without = etherc(&[file.as_os_str()]);
    assert_eq!(code(&without), 10);
    assert!(String::from_utf8_lossy(&without.stderr).contains("File not found: io"));

    let with = etherc(&["-I".as_ref(), inc.as_os_str(), file.as_os_str()]);
    assert_eq!(code(&with), 0, "{}", String::from_utf8_lossy(&with.stderr));
}

#[test]
fn disasm_prints_the_object() {
    let tmp = make_temp_dir("etherc_disasm");
    let file = tmp.join("sum.e");
    fs::write(&file, OK_PROGRAM).expect("write fixture");

    let output = etherc(&["--disasm".as_ref(), "-g".as_ref(), file.as_os_str()]);
    assert_eq!(code(&output), 0);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("fn main"), "{stdout}");
    assert!(stdout.contains("; line 4"), "{stdout}");
    assert!(stdout.contains("RETURN"), "{stdout}");
}
