use std::collections::BTreeSet;
use std::env;
use std::path::PathBuf;

use crate::diagnostic::Category;

pub const DEFAULT_OPT_LEVEL: u8 = 1;
/// Extra include directories, in the platform's path-list syntax.
pub const INCLUDE_PATH_VAR: &str = "ETHER_PATH";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown warning category `{0}`")]
    UnknownWarning(String),
    #[error("unknown option `{0}`")]
    UnknownFlag(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WarningSet {
    disabled: BTreeSet<Category>,
    /// `-Werror`: every enabled warning aborts the unit.
    pub fatal: bool,
}

impl WarningSet {
    pub fn is_enabled(&self, category: Category) -> bool {
        category == Category::Error || !self.disabled.contains(&category)
    }

    pub fn enable(&mut self, category: Category) {
        self.disabled.remove(&category);
    }

    pub fn disable(&mut self, category: Category) {
        if category != Category::Error {
            self.disabled.insert(category);
        }
    }

    /// Applies one `-W` argument: `typecast`, `no-typecast`, `all`,
    /// `no-all`, `error`, `no-error`.
    pub fn apply(&mut self, option: &str) -> Result<(), ConfigError> {
        let (on, name) = match option.strip_prefix("no-") {
            Some(rest) => (false, rest),
            None => (true, option),
        };
        match name {
            "error" => self.fatal = on,
            "all" => {
                for c in Category::STYLE {
                    if on {
                        self.enable(c);
                    } else {
                        self.disable(c);
                    }
                }
            }
            _ => {
                let category = Category::from_name(name)
                    .ok_or_else(|| ConfigError::UnknownWarning(option.to_string()))?;
                if on {
                    self.enable(category);
                } else {
                    self.disable(category);
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerOptions {
    /// 0 disables the optimizer.
    pub opt_level: u8,
    pub debug_lines: bool,
    pub include_paths: Vec<PathBuf>,
    pub lib_paths: Vec<PathBuf>,
    pub warnings: WarningSet,
    /// Older language generation: soft `super`/`throw`, `get_x` accessors,
    /// missing returns downgraded to warnings.
    pub compat: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            opt_level: DEFAULT_OPT_LEVEL,
            debug_lines: false,
            include_paths: Vec::new(),
            lib_paths: Vec::new(),
            warnings: WarningSet::default(),
            compat: false,
        }
    }
}

impl CompilerOptions {
    /// Applies one `-f` argument.
    pub fn set_flag(&mut self, option: &str) -> Result<(), ConfigError> {
        match option {
            "compat" => self.compat = true,
            "no-compat" => self.compat = false,
            _ => return Err(ConfigError::UnknownFlag(option.to_string())),
        }
        Ok(())
    }

    pub fn with_env_include_paths(mut self) -> Self {
        if let Some(list) = env::var_os(INCLUDE_PATH_VAR) {
            self.include_paths.extend(env::split_paths(&list));
        }
        self
    }

    pub fn optimize(&self) -> bool {
        self.opt_level > 0
    }
}
