use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use etherlib::compile::compile;
use etherlib::config::CompilerOptions;
use etherlib::resolver::{FsLoader, MemoryLoader, SourceLoader, candidates};

fn make_temp_dir(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("ether_resolver_{label}_{nanos}"));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

#[test]
fn names_without_extension_also_try_the_header() {
    assert_eq!(
        candidates("io"),
        vec![PathBuf::from("io"), PathBuf::from("io.eh")]
    );
    assert_eq!(candidates("io.e"), vec![PathBuf::from("io.e")]);
}

#[test]
fn including_directory_is_searched_before_include_paths() {
    let loader = MemoryLoader::new()
        .with_file("src/util.eh", "")
        .with_file("sys/util.eh", "")
        .with_include_path("sys");
    let from = Path::new("src/main.e");
    assert_eq!(loader.resolve("util", Some(from)), Some(PathBuf::from("src/util.eh")));
    assert_eq!(
        loader.resolve("util", Some(Path::new("other/main.e"))),
        Some(PathBuf::from("sys/util.eh"))
    );
    assert_eq!(loader.resolve("nothing", Some(from)), None);
}

#[test]
fn filesystem_loader_follows_include_paths() {
    let root = make_temp_dir("fs");
    let inc = root.join("include");
    fs::create_dir_all(&inc).expect("create include dir");
    fs::write(inc.join("math.eh"), "def square(x: Int): Int\n").expect("write header");
    let main = root.join("main.e");
    fs::write(
        &main,
        "use \"math\"\ndef square(x: Int): Int = x * x\ndef main(): Int = square(7)\n",
    )
    .expect("write source");

    let loader = FsLoader::new(vec![inc.clone()]);
    let resolved = loader.resolve("math", Some(&main)).expect("header found");
    assert!(resolved.ends_with("math.eh"), "{}", resolved.display());
    assert!(loader.read(&resolved).expect("readable").contains("square"));

    let name = main.to_string_lossy();
    let compiled = compile(&name, &CompilerOptions::default(), &loader).expect("compiles");
    assert!(compiled.object.function("square").is_some_and(|f| f.shared));
}

#[test]
fn same_file_through_two_names_is_included_once() {
    let root = make_temp_dir("once");
    fs::write(root.join("defs.eh"), "type Pair { a: Int, b: Int }\n").expect("write header");
    let main = root.join("main.e");
    fs::write(
        &main,
        "use \"defs\"\nuse \"./defs.eh\"\ndef main(): Int = new Pair(1, 2).b\n",
    )
    .expect("write source");

    let loader = FsLoader::new(Vec::new());
    let name = main.to_string_lossy();
    assert!(compile(&name, &CompilerOptions::default(), &loader).is_ok());
}
