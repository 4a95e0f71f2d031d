use etherlib::error::ErrorKind;
use etherlib::lexer::{Lexer, lex};
use etherlib::token::{TokenKind, TokenValue};

fn kinds(src: &str) -> Vec<TokenKind> {
    let tokens = lex(src, false).expect("source should tokenize");
    tokens.into_iter().map(|t| t.kind).collect()
}

fn values(src: &str) -> Vec<TokenValue> {
    let tokens = lex(src, false).expect("source should tokenize");
    tokens
        .into_iter()
        .filter(|t| t.kind != TokenKind::Eof)
        .map(|t| t.value)
        .collect()
}

#[test]
fn lexes_keywords_and_words() {
    let got = kinds("def type use var const while do for in switch try catch throw super thing");
    let want = vec![
        TokenKind::KwDef,
        TokenKind::KwType,
        TokenKind::KwUse,
        TokenKind::KwVar,
        TokenKind::KwConst,
        TokenKind::KwWhile,
        TokenKind::KwDo,
        TokenKind::KwFor,
        TokenKind::KwIn,
        TokenKind::KwSwitch,
        TokenKind::KwTry,
        TokenKind::KwCatch,
        TokenKind::KwThrow,
        TokenKind::KwSuper,
        TokenKind::Word,
        TokenKind::Eof,
    ];
    assert_eq!(got, want);
}

#[test]
fn compat_mode_softens_super_and_throw() {
    let tokens = lex("super throw", true).expect("tokenize");
    assert_eq!(tokens[0].kind, TokenKind::Word);
    assert_eq!(tokens[1].kind, TokenKind::Word);
    assert_eq!(tokens[1].text(), "throw");
}

#[test]
fn lexes_longest_operators() {
    let got = kinds(">>>= >>> >> >= .. . <<= && || !=");
    let want = vec![
        TokenKind::UshrEq,
        TokenKind::Ushr,
        TokenKind::Shr,
        TokenKind::Gte,
        TokenKind::Range,
        TokenKind::Dot,
        TokenKind::ShlEq,
        TokenKind::AndAnd,
        TokenKind::OrOr,
        TokenKind::Neq,
        TokenKind::Eof,
    ];
    assert_eq!(got, want);
}

#[test]
fn integer_followed_by_range_is_not_a_fraction() {
    assert_eq!(
        kinds("1..3"),
        vec![TokenKind::IntLit, TokenKind::Range, TokenKind::IntLit, TokenKind::Eof]
    );
}

#[test]
fn lexes_number_forms() {
    assert_eq!(
        values("0x1F 10L 2.5f 1e3 3d"),
        vec![
            TokenValue::Int(31),
            TokenValue::Long(10),
            TokenValue::Float(2.5),
            TokenValue::Double(1000.0),
            TokenValue::Double(3.0),
        ]
    );
}

#[test]
fn minimum_magnitudes_are_kept_unsigned() {
    assert_eq!(
        values("2147483648 2147483647 9223372036854775808L 0x80000000"),
        vec![
            TokenValue::Magnitude(1 << 31),
            TokenValue::Int(i32::MAX),
            TokenValue::Magnitude(1 << 63),
            TokenValue::Int(i32::MIN),
        ]
    );
}

#[test]
fn decodes_escapes_in_strings_and_chars() {
    assert_eq!(
        values(r#""a\tb\u0041\012\0" '\n'"#),
        vec![
            TokenValue::Text("a\tbA\n\0".to_string()),
            TokenValue::Char(10),
        ]
    );
}

#[test]
fn skips_comments_and_counts_lines() {
    let tokens = lex("a // one\n/* two\nthree */ b", false).expect("tokenize");
    assert_eq!(tokens[0].line, 1);
    assert_eq!(tokens[1].text(), "b");
    assert_eq!(tokens[1].line, 3);
}

#[test]
fn block_comments_do_not_nest() {
    let got = kinds("/* a /* b */ c */");
    assert_eq!(got, vec![TokenKind::Word, TokenKind::Star, TokenKind::Slash, TokenKind::Eof]);
}

#[test]
fn push_back_returns_the_same_token() {
    let mut lexer = Lexer::new("x y", "t.e", false);
    let first = lexer.next_token().expect("token");
    lexer.push_back();
    assert_eq!(lexer.next_token().expect("token"), first);
    assert_eq!(lexer.next_token().expect("token").text(), "y");
}

#[test]
fn malformed_literals_are_lexical_errors() {
    for (src, needle) in [
        ("\"open", "Unterminated string literal"),
        ("'ab'", "Unterminated character literal"),
        ("/* open", "Unterminated comment"),
        ("0x", "Malformed hexadecimal number"),
        ("1e+", "Malformed number exponent"),
        ("99999999999", "Integer number too large"),
        ("\"\\q\"", "Invalid escape sequence"),
    ] {
        let err = lex(src, false).expect_err(src);
        assert_eq!(err.kind, ErrorKind::Lexical, "{src}");
        assert!(err.message.contains(needle), "{src}: {}", err.message);
    }
}

#[test]
fn lexical_errors_carry_the_line() {
    let err = lex("a\nb\n\"open", false).expect_err("unterminated");
    assert_eq!(err.pos.line, 3);
}
