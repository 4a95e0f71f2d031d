use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Error,
    Warning,
}

/// Warning categories selectable with `-W<name>` / `-Wno-<name>`.
///
/// `Error` is not a style warning: semantic errors are raised through the
/// same entry point with this category and always abort the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Error,
    Deprecated,
    TypeCast,
    Empty,
    Hidden,
    Operators,
    Included,
    Main,
}

impl Category {
    pub const STYLE: [Category; 7] = [
        Category::Deprecated,
        Category::TypeCast,
        Category::Empty,
        Category::Hidden,
        Category::Operators,
        Category::Included,
        Category::Main,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Category::Error => "error",
            Category::Deprecated => "deprecated",
            Category::TypeCast => "typecast",
            Category::Empty => "empty",
            Category::Hidden => "hidden",
            Category::Operators => "operators",
            Category::Included => "included",
            Category::Main => "main",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::STYLE.into_iter().find(|c| c.name() == name)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourcePos {
    pub file: String,
    pub line: usize,
}

impl SourcePos {
    pub fn new(file: impl Into<String>, line: usize) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.file.is_empty() {
            write!(f, "line {}", self.line)
        } else {
            write!(f, "{}:{}", self.file, self.line)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub category: Category,
    pub message: String,
    pub pos: SourcePos,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, pos: SourcePos) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            category: Category::Error,
            message: message.into(),
            pos,
        }
    }

    pub fn warning(category: Category, message: impl Into<String>, pos: SourcePos) -> Self {
        Self {
            level: DiagnosticLevel::Warning,
            category,
            message: message.into(),
            pos,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            DiagnosticLevel::Error => write!(f, "{}: error: {}", self.pos, self.message),
            DiagnosticLevel::Warning => write!(
                f,
                "{}: warning[{}]: {}",
                self.pos, self.category, self.message
            ),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiagnosticBag {
    items: Vec<Diagnostic>,
}

impl DiagnosticBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.items.push(diagnostic);
    }

    pub fn error(&mut self, message: impl Into<String>, pos: SourcePos) {
        self.push(Diagnostic::error(message, pos));
    }

    pub fn warning(&mut self, category: Category, message: impl Into<String>, pos: SourcePos) {
        self.push(Diagnostic::warning(category, message, pos));
    }

    pub fn error_count(&self) -> usize {
        self.items
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.items.len() - self.error_count()
    }

    pub fn has_category(&self, category: Category) -> bool {
        self.items.iter().any(|d| d.category == category)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn as_slice(&self) -> &[Diagnostic] {
        &self.items
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }
}

pub fn format_expected_found(expected_message: &str, found_label: &str) -> String {
    format!("{expected_message}; found {found_label}")
}
