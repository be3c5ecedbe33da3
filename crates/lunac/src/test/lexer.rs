use super::byte_source;
use crate::gc::Gc;
use crate::lexer::{Lexer, TokenKind};

fn tokenize(s: &'static str) -> Vec<TokenKind> {
    let mut gc = Gc::new();
    let mut src = byte_source(s);
    let mut lexer = Lexer::new("chunk", &mut src);
    let mut kinds = Vec::new();
    loop {
        let tok = lexer.next_token(&mut gc).expect("well-formed input");
        let done = tok.kind == TokenKind::Eof;
        kinds.push(tok.kind);
        if done {
            break;
        }
    }
    kinds
}

#[test]
fn empty_input_yields_exactly_eof() {
    assert_eq!(tokenize(""), vec![TokenKind::Eof]);
}

#[test]
fn punctuation_emits_documented_kinds_in_order() {
    let kinds = tokenize("+ - * / % ^ # == ~= <= >= < > = ( ) { } [ ] ; : , . .. ...");
    assert_eq!(
        kinds,
        vec![
            TokenKind::Plus,
            TokenKind::Minus,
            TokenKind::Star,
            TokenKind::Slash,
            TokenKind::Percent,
            TokenKind::Caret,
            TokenKind::Hash,
            TokenKind::EqEq,
            TokenKind::NotEq,
            TokenKind::LessEq,
            TokenKind::GreaterEq,
            TokenKind::Less,
            TokenKind::Greater,
            TokenKind::Assign,
            TokenKind::LParen,
            TokenKind::RParen,
            TokenKind::LBrace,
            TokenKind::RBrace,
            TokenKind::LBracket,
            TokenKind::RBracket,
            TokenKind::Semicolon,
            TokenKind::Colon,
            TokenKind::Comma,
            TokenKind::Dot,
            TokenKind::DotDot,
            TokenKind::Ellipsis,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn hex_prefix_with_no_digit_is_a_lex_error() {
    let mut gc = Gc::new();
    let mut src = byte_source("0x");
    let mut lexer = Lexer::new("chunk", &mut src);
    assert!(lexer.next_token(&mut gc).is_err());
}

#[test]
fn unterminated_long_bracket_is_a_lex_error() {
    let mut gc = Gc::new();
    let mut src = byte_source("[==[unterminated");
    let mut lexer = Lexer::new("chunk", &mut src);
    assert!(lexer.next_token(&mut gc).is_err());
}

#[test]
fn shebang_line_is_skipped() {
    let kinds = tokenize("#!/usr/bin/env lunac\nreturn 1");
    assert_eq!(kinds, vec![TokenKind::Return, TokenKind::Number, TokenKind::Eof]);
}
