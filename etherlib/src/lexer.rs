use crate::diagnostic::SourcePos;
use crate::error::{CompileError, CompileResult};
use crate::token::{Token, TokenKind, TokenValue};

/// Tokenizes a whole source, for tests and tools that want a token list.
pub fn lex(source: &str, compat: bool) -> CompileResult<Vec<Token>> {
    let mut lexer = Lexer::new(source, "", compat);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let eof = token.kind == TokenKind::Eof;
        tokens.push(token);
        if eof {
            return Ok(tokens);
        }
    }
}

/// Pull tokenizer with one token of pushback.
#[derive(Debug, Clone)]
pub struct Lexer {
    chars: Vec<char>,
    idx: usize,
    line: usize,
    file: String,
    compat: bool,
    last: Option<Token>,
    pushed_back: bool,
}

impl Lexer {
    pub fn new(source: &str, file: impl Into<String>, compat: bool) -> Self {
        Self {
            chars: source.chars().collect(),
            idx: 0,
            line: 1,
            file: file.into(),
            compat,
            last: None,
            pushed_back: false,
        }
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn last(&self) -> Option<&Token> {
        self.last.as_ref()
    }

    /// Line of the most recently returned token.
    pub fn line(&self) -> usize {
        self.last.as_ref().map_or(self.line, |t| t.line)
    }

    pub fn next_token(&mut self) -> CompileResult<Token> {
        if self.pushed_back {
            self.pushed_back = false;
            if let Some(token) = &self.last {
                return Ok(token.clone());
            }
        }
        let token = self.scan()?;
        self.last = Some(token.clone());
        Ok(token)
    }

    /// Makes the next `next_token` call return the last token again.
    pub fn push_back(&mut self) {
        if self.last.is_some() {
            self.pushed_back = true;
        }
    }

    fn scan(&mut self) -> CompileResult<Token> {
        self.skip_ws_and_comments()?;
        let line = self.line;
        let Some(c) = self.peek() else {
            return Ok(Token::new(TokenKind::Eof, TokenValue::None, line));
        };

        if c.is_alphabetic() || c == '_' {
            return Ok(self.lex_word(line));
        }
        if c.is_ascii_digit() {
            return self.lex_number(line);
        }

        self.bump();
        let kind = match c {
            '"' => return self.lex_string(line),
            '\'' => return self.lex_char(line),
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            ';' => TokenKind::Semi,
            '~' => TokenKind::Tilde,
            '.' => {
                if self.eat('.') {
                    TokenKind::Range
                } else {
                    TokenKind::Dot
                }
            }
            '+' => self.with_eq(TokenKind::Plus, TokenKind::PlusEq),
            '-' => self.with_eq(TokenKind::Minus, TokenKind::MinusEq),
            '*' => self.with_eq(TokenKind::Star, TokenKind::StarEq),
            '/' => self.with_eq(TokenKind::Slash, TokenKind::SlashEq),
            '%' => self.with_eq(TokenKind::Percent, TokenKind::PercentEq),
            '^' => self.with_eq(TokenKind::Caret, TokenKind::CaretEq),
            '=' => self.with_eq(TokenKind::Assign, TokenKind::EqEq),
            '!' => self.with_eq(TokenKind::Bang, TokenKind::Neq),
            '&' => {
                if self.eat('&') {
                    TokenKind::AndAnd
                } else {
                    self.with_eq(TokenKind::Amp, TokenKind::AmpEq)
                }
            }
            '|' => {
                if self.eat('|') {
                    TokenKind::OrOr
                } else {
                    self.with_eq(TokenKind::Pipe, TokenKind::PipeEq)
                }
            }
            '<' => {
                if self.eat('<') {
                    self.with_eq(TokenKind::Shl, TokenKind::ShlEq)
                } else {
                    self.with_eq(TokenKind::Lt, TokenKind::Lte)
                }
            }
            '>' => {
                if self.eat('>') {
                    if self.eat('>') {
                        self.with_eq(TokenKind::Ushr, TokenKind::UshrEq)
                    } else {
                        self.with_eq(TokenKind::Shr, TokenKind::ShrEq)
                    }
                } else {
                    self.with_eq(TokenKind::Gt, TokenKind::Gte)
                }
            }
            _ => return Err(self.error(line, format!("Unexpected character '{c}'"))),
        };
        Ok(Token::new(kind, TokenValue::None, line))
    }

    fn with_eq(&mut self, plain: TokenKind, with_eq: TokenKind) -> TokenKind {
        if self.eat('=') { with_eq } else { plain }
    }

    fn skip_ws_and_comments(&mut self) -> CompileResult<()> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek_next() == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek_next() == Some('*') => {
                    let line = self.line;
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some(_) => {}
                            None => return Err(self.error(line, "Unterminated comment")),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn lex_word(&mut self, line: usize) -> Token {
        let start = self.idx;
        while matches!(self.peek(), Some(ch) if ch.is_alphanumeric() || ch == '_') {
            self.bump();
        }
        let word: String = self.chars[start..self.idx].iter().collect();
        let kind = TokenKind::keyword(&word, self.compat).unwrap_or(TokenKind::Word);
        Token::new(kind, TokenValue::Text(word), line)
    }

    fn lex_number(&mut self, line: usize) -> CompileResult<Token> {
        if self.peek() == Some('0') && matches!(self.peek_next(), Some('x' | 'X')) {
            self.bump();
            self.bump();
            let start = self.idx;
            while matches!(self.peek(), Some(ch) if ch.is_ascii_hexdigit()) {
                self.bump();
            }
            let digits: String = self.chars[start..self.idx].iter().collect();
            if digits.is_empty() {
                return Err(self.error(line, "Malformed hexadecimal number"));
            }
            let long = self.eat('l') || self.eat('L');
            self.check_number_end(line)?;
            let value = u64::from_str_radix(&digits, 16)
                .map_err(|_| self.error(line, "Integer number too large"))?;
            return if long {
                Ok(Token::new(TokenKind::LongLit, TokenValue::Long(value as i64), line))
            } else if value <= u64::from(u32::MAX) {
                Ok(Token::new(TokenKind::IntLit, TokenValue::Int(value as u32 as i32), line))
            } else {
                Err(self.error(line, "Integer number too large"))
            };
        }

        let start = self.idx;
        while matches!(self.peek(), Some(ch) if ch.is_ascii_digit()) {
            self.bump();
        }
        let mut is_real = false;
        if self.peek() == Some('.') && matches!(self.peek_next(), Some(ch) if ch.is_ascii_digit()) {
            is_real = true;
            self.bump();
            while matches!(self.peek(), Some(ch) if ch.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            is_real = true;
            self.bump();
            if matches!(self.peek(), Some('+' | '-')) {
                self.bump();
            }
            if !matches!(self.peek(), Some(ch) if ch.is_ascii_digit()) {
                return Err(self.error(line, "Malformed number exponent"));
            }
            while matches!(self.peek(), Some(ch) if ch.is_ascii_digit()) {
                self.bump();
            }
        }
        let text: String = self.chars[start..self.idx].iter().collect();
        let suffix = match self.peek() {
            Some(c @ ('f' | 'F' | 'd' | 'D' | 'l' | 'L')) => {
                self.bump();
                Some(c.to_ascii_lowercase())
            }
            _ => None,
        };
        self.check_number_end(line)?;

        match suffix {
            Some('f') => {
                let v: f32 = text
                    .parse()
                    .map_err(|_| self.error(line, "Malformed number"))?;
                Ok(Token::new(TokenKind::FloatLit, TokenValue::Float(v), line))
            }
            Some('d') => self.double_token(&text, line),
            None if is_real => self.double_token(&text, line),
            Some('l') if is_real => Err(self.error(line, "Malformed number")),
            Some('l') => {
                let v = parse_magnitude(&text, 1u64 << 63)
                    .ok_or_else(|| self.error(line, "Integer number too large"))?;
                let value = integer_value(v, 1u64 << 63, TokenValue::Long(v as i64));
                Ok(Token::new(TokenKind::LongLit, value, line))
            }
            _ => {
                let v = parse_magnitude(&text, 1u64 << 31)
                    .ok_or_else(|| self.error(line, "Integer number too large"))?;
                let value = integer_value(v, 1u64 << 31, TokenValue::Int(v as i32));
                Ok(Token::new(TokenKind::IntLit, value, line))
            }
        }
    }

    fn double_token(&self, text: &str, line: usize) -> CompileResult<Token> {
        let v: f64 = text
            .parse()
            .map_err(|_| self.error(line, "Malformed number"))?;
        Ok(Token::new(TokenKind::DoubleLit, TokenValue::Double(v), line))
    }

    fn check_number_end(&self, line: usize) -> CompileResult<()> {
        match self.peek() {
            Some(ch) if ch.is_alphanumeric() || ch == '_' => {
                Err(self.error(line, format!("Malformed number: unexpected '{ch}'")))
            }
            _ => Ok(()),
        }
    }

    fn lex_string(&mut self, line: usize) -> CompileResult<Token> {
        let mut units: Vec<u16> = Vec::new();
        loop {
            match self.bump() {
                None => return Err(self.error(line, "Unterminated string literal")),
                Some('"') => break,
                Some('\\') => units.push(self.lex_escape()?),
                Some(c) => {
                    let mut buf = [0u16; 2];
                    units.extend_from_slice(c.encode_utf16(&mut buf));
                }
            }
        }
        let text = String::from_utf16(&units)
            .map_err(|_| self.error(line, "Invalid UTF-16 sequence in string literal"))?;
        Ok(Token::new(TokenKind::StringLit, TokenValue::Text(text), line))
    }

    fn lex_char(&mut self, line: usize) -> CompileResult<Token> {
        let unit = match self.bump() {
            None | Some('\n') => return Err(self.error(line, "Unterminated character literal")),
            Some('\'') => return Err(self.error(line, "Empty character literal")),
            Some('\\') => self.lex_escape()?,
            Some(c) => {
                let mut buf = [0u16; 2];
                let encoded = c.encode_utf16(&mut buf);
                if encoded.len() != 1 {
                    return Err(self.error(line, "Character literal out of range"));
                }
                encoded[0]
            }
        };
        if !self.eat('\'') {
            return Err(self.error(line, "Unterminated character literal"));
        }
        Ok(Token::new(TokenKind::CharLit, TokenValue::Char(unit), line))
    }

    fn lex_escape(&mut self) -> CompileResult<u16> {
        let line = self.line;
        let c = self
            .bump()
            .ok_or_else(|| self.error(line, "Unterminated escape sequence"))?;
        let unit = match c {
            '\\' => '\\' as u16,
            '\'' => '\'' as u16,
            '"' => '"' as u16,
            'n' => '\n' as u16,
            't' => '\t' as u16,
            'r' => '\r' as u16,
            'b' => 0x08,
            'f' => 0x0c,
            'u' => {
                let mut v: u16 = 0;
                for _ in 0..4 {
                    let d = self
                        .peek()
                        .and_then(|ch| ch.to_digit(16))
                        .ok_or_else(|| self.error(line, "Malformed \\u escape"))?;
                    self.bump();
                    v = v * 16 + d as u16;
                }
                v
            }
            '0' => {
                let mut v: u16 = 0;
                for _ in 0..2 {
                    match self.peek().and_then(|ch| ch.to_digit(8)) {
                        Some(d) => {
                            self.bump();
                            v = v * 8 + d as u16;
                        }
                        None => break,
                    }
                }
                v
            }
            other => return Err(self.error(line, format!("Invalid escape sequence \\{other}"))),
        };
        Ok(unit)
    }

    fn error(&self, line: usize, message: impl Into<String>) -> CompileError {
        CompileError::lexical(SourcePos::new(self.file.clone(), line), message)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.idx).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.idx + 1).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.idx).copied()?;
        self.idx += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }
}

/// Parses decimal digits allowing at most `limit`; the literal may be the
/// operand of a unary minus, so the magnitude of the minimum value is accepted.
fn integer_value(v: u64, limit: u64, value: TokenValue) -> TokenValue {
    if v == limit {
        TokenValue::Magnitude(v)
    } else {
        value
    }
}

fn parse_magnitude(text: &str, limit: u64) -> Option<u64> {
    let v: u64 = text.parse().ok()?;
    (v <= limit).then_some(v)
}
