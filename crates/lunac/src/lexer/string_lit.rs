//! Short string literal scanning: quote matching and escape decoding.

use super::token::{TokenDetail, TokenKind};
use super::{LexResult, Lexer};
use crate::gc::Gc;

pub(super) fn lex_short_string(
    lexer: &mut Lexer,
    gc: &mut Gc,
    line: u32,
    column: u32,
) -> LexResult<TokenDetail> {
    let quote = lexer.advance().expect("caller checked for a quote");
    let mut bytes = Vec::new();

    loop {
        match lexer.peek() {
            None => return Err(lexer.err("unterminated string")),
            Some(b'\n') | Some(b'\r') => return Err(lexer.err("unterminated string")),
            Some(c) if c == quote => {
                lexer.advance();
                break;
            }
            Some(b'\\') => {
                lexer.advance();
                decode_escape(lexer, &mut bytes)?;
            }
            Some(c) => {
                bytes.push(c);
                lexer.advance();
            }
        }
    }

    let text = String::from_utf8_lossy(&bytes).into_owned();
    let id = gc.new_string(&text);
    Ok(TokenDetail {
        kind: TokenKind::String,
        number: None,
        interned_string: Some(id),
        text,
        module: lexer.module.clone(),
        line,
        column,
    })
}

fn decode_escape(lexer: &mut Lexer, out: &mut Vec<u8>) -> LexResult<()> {
    let Some(c) = lexer.peek() else {
        return Err(lexer.err("unterminated string"));
    };
    match c {
        b'a' => {
            out.push(0x07);
            lexer.advance();
        }
        b'b' => {
            out.push(0x08);
            lexer.advance();
        }
        b'f' => {
            out.push(0x0C);
            lexer.advance();
        }
        b'n' => {
            out.push(b'\n');
            lexer.advance();
        }
        b'r' => {
            out.push(b'\r');
            lexer.advance();
        }
        b't' => {
            out.push(b'\t');
            lexer.advance();
        }
        b'v' => {
            out.push(0x0B);
            lexer.advance();
        }
        b'\\' => {
            out.push(b'\\');
            lexer.advance();
        }
        b'"' => {
            out.push(b'"');
            lexer.advance();
        }
        b'\'' => {
            out.push(b'\'');
            lexer.advance();
        }
        b'x' => {
            lexer.advance();
            let mut value = 0u32;
            let mut count = 0;
            while count < 2 {
                match lexer.peek() {
                    Some(d) if d.is_ascii_hexdigit() => {
                        value = value * 16 + (d as char).to_digit(16).unwrap();
                        lexer.advance();
                        count += 1;
                    }
                    _ => break,
                }
            }
            if count == 0 {
                return Err(lexer.err("malformed hex escape: expected 1-2 hex digits after '\\x'"));
            }
            out.push(value as u8);
        }
        d if d.is_ascii_digit() => {
            let mut value = 0u32;
            let mut count = 0;
            while count < 3 {
                match lexer.peek() {
                    Some(d) if d.is_ascii_digit() => {
                        value = value * 10 + (d - b'0') as u32;
                        lexer.advance();
                        count += 1;
                    }
                    _ => break,
                }
            }
            if value > 255 {
                return Err(lexer.err("decimal escape too large"));
            }
            out.push(value as u8);
        }
        other => {
            return Err(lexer.err(format!("invalid escape sequence '\\{}'", other as char)));
        }
    }
    Ok(())
}
