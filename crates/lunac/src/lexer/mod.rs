//! Byte-stream lexer: produces a `TokenDetail` stream from a pull callback.
//!
//! Grounded on the teacher's token-kind naming (`Tk`-style enum) and on
//! `original_source/Source/compiler/Lex.go` for exact escape/number/long-
//! bracket handling, since `spec.md` §4.1 states the contracts but not every
//! byte-level edge case.

mod number;
mod string_lit;
pub mod token;

pub use token::{TokenDetail, TokenKind};

use crate::error::LexError;
use crate::gc::Gc;

/// Anything that can hand the lexer one byte at a time; `None` signals
/// end-of-stream. A plain closure implements this automatically.
pub trait ByteSource {
    fn next_byte(&mut self) -> Option<u8>;
}

impl<F: FnMut() -> Option<u8>> ByteSource for F {
    fn next_byte(&mut self) -> Option<u8> {
        self()
    }
}

pub struct Lexer<'a> {
    source: &'a mut dyn ByteSource,
    module: String,
    current: Option<u8>,
    line: u32,
    column: u32,
}

type LexResult<T> = Result<T, LexError>;

impl<'a> Lexer<'a> {
    pub fn new(module: impl Into<String>, source: &'a mut dyn ByteSource) -> Self {
        let mut lexer = Lexer { source, module: module.into(), current: None, line: 1, column: 0 };
        lexer.current = lexer.source.next_byte();
        lexer.skip_shebang();
        lexer
    }

    fn err(&self, message: impl Into<String>) -> LexError {
        LexError::new(crate::error::Position::new(self.module.clone(), self.line), message)
    }

    fn peek(&self) -> Option<u8> {
        self.current
    }

    fn advance(&mut self) -> Option<u8> {
        let c = self.current;
        match c {
            Some(b'\n') | Some(b'\r') => {
                let first = c;
                self.current = self.source.next_byte();
                // \r\n and \n\r both advance exactly one line.
                if let (Some(b'\n'), Some(b'\r')) | (Some(b'\r'), Some(b'\n')) = (first, self.current) {
                    self.current = self.source.next_byte();
                }
                self.line += 1;
                self.column = 0;
            }
            Some(_) => {
                self.current = self.source.next_byte();
                self.column += 1;
            }
            None => {}
        }
        c
    }

    fn skip_shebang(&mut self) {
        if self.current == Some(b'#') {
            while let Some(c) = self.current {
                if c == b'\n' || c == b'\r' {
                    break;
                }
                self.advance();
            }
        }
    }

    fn is_whitespace(c: u8) -> bool {
        matches!(c, b' ' | b'\t' | 0x0B | 0x0C)
    }

    fn skip_whitespace_and_comments(&mut self) -> LexResult<()> {
        loop {
            match self.peek() {
                Some(c) if Self::is_whitespace(c) => {
                    self.advance();
                }
                Some(b'\n') | Some(b'\r') => {
                    self.advance();
                }
                Some(b'-') => {
                    if !self.try_skip_comment()? {
                        return Ok(());
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Returns `Ok(true)` if a `--` comment was consumed.
    fn try_skip_comment(&mut self) -> LexResult<bool> {
        self.advance(); // first '-'
        if self.peek() != Some(b'-') {
            return Err(self.err("unexpected character '-'"));
        }
        self.advance(); // second '-'

        if self.peek() == Some(b'[') {
            if let Some(level) = self.try_long_bracket_level() {
                self.read_long_bracket_body(level)?;
                return Ok(true);
            }
        }
        // line comment
        while let Some(c) = self.peek() {
            if c == b'\n' || c == b'\r' {
                break;
            }
            self.advance();
        }
        Ok(true)
    }

    /// If positioned at `[`, checks whether it opens a long bracket
    /// (`[=*[`) without consuming input unless it matches; returns the `=`
    /// count on success and leaves the cursor just past the second `[`.
    fn try_long_bracket_level(&mut self) -> Option<u32> {
        debug_assert_eq!(self.peek(), Some(b'['));
        // We cannot un-read bytes from an arbitrary pull source, so buffer
        // the run of '=' signs we consume in case this turns out not to be
        // a long bracket (callers that need the fallback path, i.e. `[`
        // alone as a token, call this only when a long-bracket-or-index
        // ambiguity cannot occur).
        self.advance(); // '['
        let mut level = 0u32;
        while self.peek() == Some(b'=') {
            self.advance();
            level += 1;
        }
        if self.peek() == Some(b'[') {
            self.advance();
            Some(level)
        } else {
            None
        }
    }

    fn read_long_bracket_body(&mut self, level: u32) -> LexResult<String> {
        let mut buf = Vec::new();
        // a leading newline immediately after the opening bracket is discarded
        if matches!(self.peek(), Some(b'\n') | Some(b'\r')) {
            self.advance();
        }
        loop {
            match self.peek() {
                None => return Err(self.err("expect complete multi-line comment before <eof>")),
                Some(b']') => {
                    self.advance();
                    let mut seen = 0u32;
                    while self.peek() == Some(b'=') {
                        self.advance();
                        seen += 1;
                    }
                    if seen == level && self.peek() == Some(b']') {
                        self.advance();
                        return Ok(String::from_utf8_lossy(&buf).into_owned());
                    }
                    buf.push(b']');
                    buf.extend(std::iter::repeat(b'=').take(seen as usize));
                }
                Some(c) => {
                    buf.push(c);
                    self.advance();
                }
            }
        }
    }

    fn make(&self, kind: TokenKind, line: u32, column: u32) -> TokenDetail {
        TokenDetail { kind, number: None, interned_string: None, text: String::new(), module: self.module.clone(), line, column }
    }

    pub fn next_token(&mut self, gc: &mut Gc) -> LexResult<TokenDetail> {
        self.skip_whitespace_and_comments()?;
        let line = self.line;
        let column = self.column;

        let Some(c) = self.peek() else {
            return Ok(self.make(TokenKind::Eof, line, column));
        };

        if c == b'_' || c.is_ascii_alphabetic() {
            return self.lex_name(gc, line, column);
        }
        if c.is_ascii_digit() {
            return number::lex_number(self, line, column);
        }
        if c == b'"' || c == b'\'' {
            return string_lit::lex_short_string(self, gc, line, column);
        }
        if c == b'[' {
            if let Some(level) = self.try_long_bracket_level() {
                let text = self.read_long_bracket_body(level)?;
                let id = gc.new_string(&text);
                let mut tok = self.make(TokenKind::String, line, column);
                tok.interned_string = Some(id);
                tok.text = text;
                return Ok(tok);
            }
            self.advance();
            return Ok(self.make(TokenKind::LBracket, line, column));
        }

        self.lex_punctuation(line, column)
    }

    fn lex_name(&mut self, gc: &mut Gc, line: u32, column: u32) -> LexResult<TokenDetail> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c == b'_' || c.is_ascii_alphanumeric() {
                text.push(c as char);
                self.advance();
            } else {
                break;
            }
        }
        if let Some(kw) = TokenKind::keyword(&text) {
            let mut tok = self.make(kw, line, column);
            tok.text = text;
            return Ok(tok);
        }
        let id = gc.new_string(&text);
        let mut tok = self.make(TokenKind::Name, line, column);
        tok.interned_string = Some(id);
        tok.text = text;
        Ok(tok)
    }

    fn lex_punctuation(&mut self, line: u32, column: u32) -> LexResult<TokenDetail> {
        let c = self.advance().expect("checked by caller");
        let kind = match c {
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'%' => TokenKind::Percent,
            b'^' => TokenKind::Caret,
            b'#' => TokenKind::Hash,
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b']' => TokenKind::RBracket,
            b';' => TokenKind::Semicolon,
            b':' => TokenKind::Colon,
            b',' => TokenKind::Comma,
            b'=' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    TokenKind::EqEq
                } else {
                    TokenKind::Assign
                }
            }
            b'~' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    TokenKind::NotEq
                } else {
                    return Err(self.err("unexpected character '~'"));
                }
            }
            b'<' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    TokenKind::LessEq
                } else {
                    TokenKind::Less
                }
            }
            b'>' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    TokenKind::GreaterEq
                } else {
                    TokenKind::Greater
                }
            }
            b'.' => {
                if self.peek() == Some(b'.') {
                    self.advance();
                    if self.peek() == Some(b'.') {
                        self.advance();
                        TokenKind::Ellipsis
                    } else {
                        TokenKind::DotDot
                    }
                } else {
                    TokenKind::Dot
                }
            }
            other => {
                return Err(self.err(format!("unexpected character '{}'", other as char)));
            }
        };
        Ok(self.make(kind, line, column))
    }
}
