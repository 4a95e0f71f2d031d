use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser as _;
use etherlib::bytecode::ObjectFile;
use etherlib::compile::compile;
use etherlib::config::CompilerOptions;
use etherlib::diagnostic::DiagnosticBag;
use etherlib::error::ErrorKind;
use etherlib::resolver::FsLoader;

const EXIT_OK: u8 = 0;
const EXIT_NO_INPUT: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_IO: u8 = 3;
const EXIT_COMPILE: u8 = 10;
const EXIT_INTERNAL: u8 = 13;

/// Compiles an Ether source file into a bytecode object.
#[derive(Debug, clap::Parser)]
#[command(name = "etherc", version)]
struct Cli {
    /// Source file to compile.
    input: Option<PathBuf>,

    /// Output object (default: the input with an `.o` extension).
    #[arg(short = 'o', value_name = "FILE")]
    output: Option<PathBuf>,

    /// Optimization level; 0 disables the optimizer.
    #[arg(short = 'O', value_name = "LEVEL", default_value_t = etherlib::config::DEFAULT_OPT_LEVEL)]
    opt_level: u8,

    /// Emit a line-number table.
    #[arg(short = 'g')]
    debug_lines: bool,

    /// Add a directory to the include search path.
    #[arg(short = 'I', value_name = "DIR")]
    include: Vec<PathBuf>,

    /// Add a directory searched for library headers.
    #[arg(short = 'L', value_name = "DIR")]
    lib: Vec<PathBuf>,

    /// Enable or disable a warning category (`typecast`, `no-typecast`, `error`, `all`).
    #[arg(short = 'W', value_name = "CATEGORY", allow_hyphen_values = true)]
    warnings: Vec<String>,

    /// Language option (`compat`, `no-compat`).
    #[arg(short = 'f', value_name = "OPTION", allow_hyphen_values = true)]
    flags: Vec<String>,

    /// Print the emitted object in readable form.
    #[arg(long)]
    disasm: bool,

    /// More log output; repeat for more.
    #[arg(short = 'v', action = clap::ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Only report errors.
    #[arg(short = 'q')]
    quiet: bool,
}

impl Cli {
    fn options(&self) -> Result<CompilerOptions, etherlib::config::ConfigError> {
        let mut options = CompilerOptions {
            opt_level: self.opt_level,
            debug_lines: self.debug_lines,
            include_paths: self.include.clone(),
            lib_paths: self.lib.clone(),
            ..CompilerOptions::default()
        }
        .with_env_include_paths();
        for w in &self.warnings {
            options.warnings.apply(w)?;
        }
        for f in &self.flags {
            options.set_flag(f)?;
        }
        Ok(options)
    }

    fn log_level(&self) -> log::LevelFilter {
        if self.quiet {
            return log::LevelFilter::Error;
        }
        match self.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.log_level())
        .parse_default_env()
        .init();

    match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("etherc: {err:#}");
            ExitCode::from(EXIT_IO)
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<ExitCode> {
    let Some(input) = &cli.input else {
        eprintln!("etherc: no input file");
        return Ok(ExitCode::from(EXIT_NO_INPUT));
    };
    let options = match cli.options() {
        Ok(options) => options,
        Err(err) => {
            eprintln!("etherc: {err}");
            return Ok(ExitCode::from(EXIT_USAGE));
        }
    };

    let search: Vec<PathBuf> = options
        .include_paths
        .iter()
        .chain(&options.lib_paths)
        .cloned()
        .collect();
    let loader = FsLoader::new(search);
    let name = input.to_string_lossy();
    log::info!("compiling {name}");

    let compiled = match compile(&name, &options, &loader) {
        Ok(compiled) => compiled,
        Err(failure) => {
            report(&failure.diagnostics, cli.quiet);
            eprintln!("{}", failure.error);
            let code = match failure.error.kind {
                ErrorKind::Io => EXIT_IO,
                ErrorKind::Internal => EXIT_INTERNAL,
                _ => EXIT_COMPILE,
            };
            return Ok(ExitCode::from(code));
        }
    };
    report(&compiled.diagnostics, cli.quiet);

    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output(input));
    write_object(&compiled.object, &output)?;
    log::info!(
        "wrote {} ({} pool entries)",
        output.display(),
        compiled.object.pool.len()
    );

    if cli.disasm {
        print!("{}", compiled.object.disassemble());
    }
    Ok(ExitCode::from(EXIT_OK))
}

/// `<input>.o`, keeping the source extension.
fn default_output(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(".o");
    PathBuf::from(name)
}

fn report(diagnostics: &DiagnosticBag, quiet: bool) {
    if quiet {
        return;
    }
    for d in diagnostics.as_slice() {
        eprintln!("{d}");
    }
}

fn write_object(object: &ObjectFile, path: &Path) -> anyhow::Result<()> {
    fs::write(path, object.to_bytes())
        .with_context(|| format!("cannot write `{}`", path.display()))
}
