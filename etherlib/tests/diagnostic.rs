use etherlib::config::{CompilerOptions, ConfigError, WarningSet};
use etherlib::diagnostic::{Category, Diagnostic, DiagnosticBag, DiagnosticLevel, SourcePos};
use etherlib::error::{CompileError, ErrorKind};

#[test]
fn positions_render_file_and_line() {
    assert_eq!(SourcePos::new("lib/io.eh", 12).to_string(), "lib/io.eh:12");
    assert_eq!(SourcePos::new("", 3).to_string(), "line 3");
}

#[test]
fn diagnostics_render_level_and_category() {
    let e = Diagnostic::error("bad token", SourcePos::new("a.e", 7));
    assert_eq!(e.to_string(), "a.e:7: error: bad token");
    let w = Diagnostic::warning(Category::TypeCast, "narrowing", SourcePos::new("a.e", 2));
    assert_eq!(w.to_string(), "a.e:2: warning[typecast]: narrowing");
}

#[test]
fn bag_counts_by_level() {
    let mut bag = DiagnosticBag::new();
    assert!(bag.is_empty());
    bag.warning(Category::Hidden, "shadow", SourcePos::new("a.e", 1));
    bag.warning(Category::Empty, "empty", SourcePos::new("a.e", 2));
    bag.error("boom", SourcePos::new("a.e", 3));
    assert_eq!(bag.len(), 3);
    assert_eq!(bag.error_count(), 1);
    assert_eq!(bag.warning_count(), 2);
    assert!(bag.has_category(Category::Hidden));
    assert!(!bag.has_category(Category::Main));
    assert_eq!(bag.as_slice()[2].level, DiagnosticLevel::Error);
}

#[test]
fn compile_errors_render_kind_and_position() {
    let err = CompileError::syntax(SourcePos::new("m.e", 4), "Expected `)`");
    assert_eq!(err.kind, ErrorKind::Syntax);
    assert_eq!(err.to_string(), "m.e:4: syntax error: Expected `)`");
}

#[test]
fn warning_categories_toggle() {
    let mut w = WarningSet::default();
    for c in Category::STYLE {
        assert!(w.is_enabled(c), "{c}");
    }
    w.apply("no-typecast").expect("known");
    assert!(!w.is_enabled(Category::TypeCast));
    w.apply("typecast").expect("known");
    assert!(w.is_enabled(Category::TypeCast));

    w.apply("no-all").expect("known");
    assert!(Category::STYLE.iter().all(|c| !w.is_enabled(*c)));
    assert!(w.is_enabled(Category::Error), "errors cannot be silenced");
    w.apply("all").expect("known");
    assert!(w.is_enabled(Category::Main));

    assert!(!w.fatal);
    w.apply("error").expect("known");
    assert!(w.fatal);
    w.apply("no-error").expect("known");
    assert!(!w.fatal);
}

#[test]
fn unknown_options_are_rejected() {
    let mut w = WarningSet::default();
    assert_eq!(
        w.apply("no-such"),
        Err(ConfigError::UnknownWarning("no-such".to_string()))
    );
    let mut opts = CompilerOptions::default();
    assert_eq!(
        opts.set_flag("turbo"),
        Err(ConfigError::UnknownFlag("turbo".to_string()))
    );
    opts.set_flag("compat").expect("known");
    assert!(opts.compat);
    opts.set_flag("no-compat").expect("known");
    assert!(!opts.compat);
}

#[test]
fn optimizer_runs_above_level_zero() {
    let mut opts = CompilerOptions::default();
    assert!(opts.optimize());
    opts.opt_level = 0;
    assert!(!opts.optimize());
}
