#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Eof,
    Word,
    IntLit,
    LongLit,
    FloatLit,
    DoubleLit,
    CharLit,
    StringLit,
    KwBreak,
    KwCast,
    KwCatch,
    KwConst,
    KwContinue,
    KwDef,
    KwDo,
    KwElse,
    KwFalse,
    KwFor,
    KwIf,
    KwIn,
    KwNew,
    KwNull,
    KwReturn,
    KwSuper,
    KwSwitch,
    KwThis,
    KwThrow,
    KwTrue,
    KwTry,
    KwType,
    KwUse,
    KwVar,
    KwWhile,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Range,
    Colon,
    Semi,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Tilde,
    Amp,
    Pipe,
    Caret,
    Lt,
    Gt,
    Lte,
    Gte,
    EqEq,
    Neq,
    Shl,
    Shr,
    Ushr,
    AndAnd,
    OrOr,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    AmpEq,
    PipeEq,
    CaretEq,
    ShlEq,
    ShrEq,
    UshrEq,
}

impl TokenKind {
    pub fn keyword(word: &str, compat: bool) -> Option<TokenKind> {
        let kind = match word {
            "break" => TokenKind::KwBreak,
            "cast" => TokenKind::KwCast,
            "catch" => TokenKind::KwCatch,
            "const" => TokenKind::KwConst,
            "continue" => TokenKind::KwContinue,
            "def" => TokenKind::KwDef,
            "do" => TokenKind::KwDo,
            "else" => TokenKind::KwElse,
            "false" => TokenKind::KwFalse,
            "for" => TokenKind::KwFor,
            "if" => TokenKind::KwIf,
            "in" => TokenKind::KwIn,
            "new" => TokenKind::KwNew,
            "null" => TokenKind::KwNull,
            "return" => TokenKind::KwReturn,
            "super" if !compat => TokenKind::KwSuper,
            "switch" => TokenKind::KwSwitch,
            "this" => TokenKind::KwThis,
            "throw" if !compat => TokenKind::KwThrow,
            "true" => TokenKind::KwTrue,
            "try" => TokenKind::KwTry,
            "type" => TokenKind::KwType,
            "use" => TokenKind::KwUse,
            "var" => TokenKind::KwVar,
            "while" => TokenKind::KwWhile,
            _ => return None,
        };
        Some(kind)
    }

    /// The assignment operator's underlying binary operator token.
    pub fn compound_base(self) -> Option<TokenKind> {
        let base = match self {
            TokenKind::PlusEq => TokenKind::Plus,
            TokenKind::MinusEq => TokenKind::Minus,
            TokenKind::StarEq => TokenKind::Star,
            TokenKind::SlashEq => TokenKind::Slash,
            TokenKind::PercentEq => TokenKind::Percent,
            TokenKind::AmpEq => TokenKind::Amp,
            TokenKind::PipeEq => TokenKind::Pipe,
            TokenKind::CaretEq => TokenKind::Caret,
            TokenKind::ShlEq => TokenKind::Shl,
            TokenKind::ShrEq => TokenKind::Shr,
            TokenKind::UshrEq => TokenKind::Ushr,
            _ => return None,
        };
        Some(base)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenValue {
    None,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Char(u16),
    Text(String),
    /// Decimal `2147483648` or `9223372036854775808L`: representable only
    /// once negated.
    Magnitude(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: TokenValue,
    pub line: usize,
}

impl Token {
    pub fn new(kind: TokenKind, value: TokenValue, line: usize) -> Self {
        Self { kind, value, line }
    }

    pub fn text(&self) -> &str {
        match &self.value {
            TokenValue::Text(s) => s,
            _ => "",
        }
    }

    /// Human-readable form for "expected X; found Y" messages.
    pub fn describe(&self) -> String {
        match (&self.kind, &self.value) {
            (TokenKind::Eof, _) => "end of file".to_string(),
            (TokenKind::StringLit, TokenValue::Text(s)) => format!("string {s:?}"),
            (_, TokenValue::Text(s)) => format!("`{s}`"),
            (_, TokenValue::Int(v)) => format!("`{v}`"),
            (_, TokenValue::Long(v)) => format!("`{v}L`"),
            (TokenKind::LongLit, TokenValue::Magnitude(v)) => format!("`{v}L`"),
            (_, TokenValue::Magnitude(v)) => format!("`{v}`"),
            (_, TokenValue::Float(v)) => format!("`{v}f`"),
            (_, TokenValue::Double(v)) => format!("`{v}`"),
            (_, TokenValue::Char(c)) => format!("character {c}"),
            (kind, TokenValue::None) => format!("`{}`", symbol(*kind)),
        }
    }
}

pub fn symbol(kind: TokenKind) -> &'static str {
    match kind {
        TokenKind::LParen => "(",
        TokenKind::RParen => ")",
        TokenKind::LBracket => "[",
        TokenKind::RBracket => "]",
        TokenKind::LBrace => "{",
        TokenKind::RBrace => "}",
        TokenKind::Comma => ",",
        TokenKind::Dot => ".",
        TokenKind::Range => "..",
        TokenKind::Colon => ":",
        TokenKind::Semi => ";",
        TokenKind::Assign => "=",
        TokenKind::Plus => "+",
        TokenKind::Minus => "-",
        TokenKind::Star => "*",
        TokenKind::Slash => "/",
        TokenKind::Percent => "%",
        TokenKind::Bang => "!",
        TokenKind::Tilde => "~",
        TokenKind::Amp => "&",
        TokenKind::Pipe => "|",
        TokenKind::Caret => "^",
        TokenKind::Lt => "<",
        TokenKind::Gt => ">",
        TokenKind::Lte => "<=",
        TokenKind::Gte => ">=",
        TokenKind::EqEq => "==",
        TokenKind::Neq => "!=",
        TokenKind::Shl => "<<",
        TokenKind::Shr => ">>",
        TokenKind::Ushr => ">>>",
        TokenKind::AndAnd => "&&",
        TokenKind::OrOr => "||",
        TokenKind::PlusEq => "+=",
        TokenKind::MinusEq => "-=",
        TokenKind::StarEq => "*=",
        TokenKind::SlashEq => "/=",
        TokenKind::PercentEq => "%=",
        TokenKind::AmpEq => "&=",
        TokenKind::PipeEq => "|=",
        TokenKind::CaretEq => "^=",
        TokenKind::ShlEq => "<<=",
        TokenKind::ShrEq => ">>=",
        TokenKind::UshrEq => ">>>=",
        _ => "?",
    }
}
