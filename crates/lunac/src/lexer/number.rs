//! Numeric literal scanning: decimal and hex, each with an optional fraction
//! and exponent.

use super::token::{TokenDetail, TokenKind};
use super::{LexResult, Lexer};

pub(super) fn lex_number(lexer: &mut Lexer, line: u32, column: u32) -> LexResult<TokenDetail> {
    let mut text = String::new();

    if lexer.peek() == Some(b'0') {
        text.push('0');
        lexer.advance();
        if matches!(lexer.peek(), Some(b'x') | Some(b'X')) {
            text.push(lexer.advance().unwrap() as char);
            return lex_hex_body(lexer, line, column, text);
        }
    }

    while let Some(c) = lexer.peek() {
        if c.is_ascii_digit() {
            text.push(c as char);
            lexer.advance();
        } else {
            break;
        }
    }
    if lexer.peek() == Some(b'.') {
        text.push('.');
        lexer.advance();
        while let Some(c) = lexer.peek() {
            if c.is_ascii_digit() {
                text.push(c as char);
                lexer.advance();
            } else {
                break;
            }
        }
    }
    if matches!(lexer.peek(), Some(b'e') | Some(b'E')) {
        text.push(lexer.advance().unwrap() as char);
        scan_signed_exponent(lexer, &mut text)?;
    }
    let value: f64 =
        text.parse().map_err(|_| lexer.err(format!("malformed number near '{}'", text)))?;
    Ok(finish(lexer, line, column, value, text))
}

fn lex_hex_body(lexer: &mut Lexer, line: u32, column: u32, mut text: String) -> LexResult<TokenDetail> {
    let mut saw_digit = false;
    while let Some(c) = lexer.peek() {
        if c.is_ascii_hexdigit() {
            text.push(c as char);
            lexer.advance();
            saw_digit = true;
        } else {
            break;
        }
    }
    if lexer.peek() == Some(b'.') {
        text.push('.');
        lexer.advance();
        while let Some(c) = lexer.peek() {
            if c.is_ascii_hexdigit() {
                text.push(c as char);
                lexer.advance();
                saw_digit = true;
            } else {
                break;
            }
        }
    }
    if !saw_digit {
        return Err(lexer.err("malformed number: no hex digits after '0x'"));
    }
    if matches!(lexer.peek(), Some(b'p') | Some(b'P')) {
        text.push(lexer.advance().unwrap() as char);
        scan_signed_exponent(lexer, &mut text)?;
    }
    let value =
        parse_hex_float(&text).ok_or_else(|| lexer.err(format!("malformed number near '{}'", text)))?;
    Ok(finish(lexer, line, column, value, text))
}

fn scan_signed_exponent(lexer: &mut Lexer, text: &mut String) -> LexResult<()> {
    if matches!(lexer.peek(), Some(b'+') | Some(b'-')) {
        text.push(lexer.advance().unwrap() as char);
    }
    let mut saw_digit = false;
    while let Some(c) = lexer.peek() {
        if c.is_ascii_digit() {
            text.push(c as char);
            lexer.advance();
            saw_digit = true;
        } else {
            break;
        }
    }
    if !saw_digit {
        return Err(lexer.err(format!("malformed number near '{}': missing exponent digits", text)));
    }
    Ok(())
}

fn parse_hex_float(text: &str) -> Option<f64> {
    let body = &text[2..]; // strip "0x"/"0X"
    let (mantissa, exponent) = match body.split_once(['p', 'P']) {
        Some((m, e)) => (m, e.parse::<i32>().ok()?),
        None => (body, 0),
    };
    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, f),
        None => (mantissa, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    let mut value = 0f64;
    for c in int_part.chars() {
        value = value * 16.0 + c.to_digit(16)? as f64;
    }
    let mut scale = 1.0 / 16.0;
    for c in frac_part.chars() {
        value += c.to_digit(16)? as f64 * scale;
        scale /= 16.0;
    }
    Some(value * 2f64.powi(exponent))
}

fn finish(lexer: &Lexer, line: u32, column: u32, value: f64, text: String) -> TokenDetail {
    TokenDetail {
        kind: TokenKind::Number,
        number: Some(value),
        interned_string: None,
        text,
        module: lexer.module.clone(),
        line,
        column,
    }
}
