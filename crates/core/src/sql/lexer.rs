//! Tokenizer for the SQL dialect. Tokens carry byte offsets so parse errors
//! point at their position and projection names can be sliced out of the
//! source text.

use crate::sql::parser::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A bare or backtick-quoted identifier. Keywords are matched
    /// case-insensitively by the parser.
    Ident(String),
    String(String),
    Integer(i64),
    Double(f64),
    /// `?`
    Positional,
    /// `$name`
    Named(String),

    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Semicolon,
    Dot,
    Colon,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub start: usize,
    pub end: usize,
}

pub fn tokenize(input: &str) -> Result<Vec<SpannedToken>, ParseError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut at = 0;

    while at < bytes.len() {
        let start = at;
        let b = bytes[at];
        match b {
            b' ' | b'\t' | b'\r' | b'\n' => {
                at += 1;
                continue;
            }
            b'-' if bytes.get(at + 1) == Some(&b'-') => {
                // Line comment.
                while at < bytes.len() && bytes[at] != b'\n' {
                    at += 1;
                }
                continue;
            }
            b'(' | b')' | b'[' | b']' | b'{' | b'}' | b',' | b';' | b'.' | b':' | b'+' | b'-'
            | b'*' | b'/' | b'%' | b'?' => {
                let token = match b {
                    b'(' => Token::LParen,
                    b')' => Token::RParen,
                    b'[' => Token::LBracket,
                    b']' => Token::RBracket,
                    b'{' => Token::LBrace,
                    b'}' => Token::RBrace,
                    b',' => Token::Comma,
                    b';' => Token::Semicolon,
                    b'.' => Token::Dot,
                    b':' => Token::Colon,
                    b'+' => Token::Plus,
                    b'-' => Token::Minus,
                    b'*' => Token::Star,
                    b'/' => Token::Slash,
                    b'%' => Token::Percent,
                    _ => Token::Positional,
                };
                at += 1;
                tokens.push(SpannedToken { token, start, end: at });
            }
            b'=' => {
                at += 1;
                tokens.push(SpannedToken { token: Token::Eq, start, end: at });
            }
            b'!' => {
                if bytes.get(at + 1) == Some(&b'=') {
                    at += 2;
                    tokens.push(SpannedToken { token: Token::Neq, start, end: at });
                } else {
                    return Err(ParseError::new("unexpected character `!`", start));
                }
            }
            b'<' => match bytes.get(at + 1) {
                Some(&b'=') => {
                    at += 2;
                    tokens.push(SpannedToken { token: Token::Lte, start, end: at });
                }
                Some(&b'>') => {
                    at += 2;
                    tokens.push(SpannedToken { token: Token::Neq, start, end: at });
                }
                _ => {
                    at += 1;
                    tokens.push(SpannedToken { token: Token::Lt, start, end: at });
                }
            },
            b'>' => {
                if bytes.get(at + 1) == Some(&b'=') {
                    at += 2;
                    tokens.push(SpannedToken { token: Token::Gte, start, end: at });
                } else {
                    at += 1;
                    tokens.push(SpannedToken { token: Token::Gt, start, end: at });
                }
            }
            b'\'' | b'"' => {
                let (s, next) = lex_string(input, at)?;
                tokens.push(SpannedToken {
                    token: Token::String(s),
                    start,
                    end: next,
                });
                at = next;
            }
            b'`' => {
                at += 1;
                let name_start = at;
                while at < bytes.len() && bytes[at] != b'`' {
                    at += 1;
                }
                if at >= bytes.len() {
                    return Err(ParseError::new("unterminated backtick identifier", start));
                }
                let name = input[name_start..at].to_owned();
                at += 1;
                tokens.push(SpannedToken {
                    token: Token::Ident(name),
                    start,
                    end: at,
                });
            }
            b'$' => {
                at += 1;
                let name_start = at;
                while at < bytes.len() && is_ident_byte(bytes[at]) {
                    at += 1;
                }
                if at == name_start {
                    return Err(ParseError::new("expected a name after `$`", start));
                }
                tokens.push(SpannedToken {
                    token: Token::Named(input[name_start..at].to_owned()),
                    start,
                    end: at,
                });
            }
            b'0'..=b'9' => {
                let (token, next) = lex_number(input, at)?;
                tokens.push(SpannedToken { token, start, end: next });
                at = next;
            }
            b if is_ident_start(b) => {
                while at < bytes.len() && is_ident_byte(bytes[at]) {
                    at += 1;
                }
                tokens.push(SpannedToken {
                    token: Token::Ident(input[start..at].to_owned()),
                    start,
                    end: at,
                });
            }
            other => {
                return Err(ParseError::new(
                    format!("unexpected character `{}`", other as char),
                    start,
                ));
            }
        }
    }

    tokens.push(SpannedToken {
        token: Token::Eof,
        start: bytes.len(),
        end: bytes.len(),
    });
    Ok(tokens)
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Quoted strings accept doubled-quote and backslash escapes.
fn lex_string(input: &str, start: usize) -> Result<(String, usize), ParseError> {
    let bytes = input.as_bytes();
    let quote = bytes[start];
    let mut out = String::new();
    let mut at = start + 1;
    while at < bytes.len() {
        match bytes[at] {
            b if b == quote => {
                if bytes.get(at + 1) == Some(&quote) {
                    out.push(quote as char);
                    at += 2;
                } else {
                    return Ok((out, at + 1));
                }
            }
            b'\\' => {
                let escaped = bytes
                    .get(at + 1)
                    .ok_or_else(|| ParseError::new("unterminated string", start))?;
                let c = match escaped {
                    b'n' => '\n',
                    b't' => '\t',
                    b'r' => '\r',
                    b'\\' => '\\',
                    b'\'' => '\'',
                    b'"' => '"',
                    b'0' => '\0',
                    other => {
                        return Err(ParseError::new(
                            format!("unknown escape `\\{}`", *other as char),
                            at,
                        ));
                    }
                };
                out.push(c);
                at += 2;
            }
            _ => {
                // Consume one full UTF-8 character.
                let ch = input[at..].chars().next().unwrap();
                out.push(ch);
                at += ch.len_utf8();
            }
        }
    }
    Err(ParseError::new("unterminated string", start))
}

fn lex_number(input: &str, start: usize) -> Result<(Token, usize), ParseError> {
    let bytes = input.as_bytes();
    let mut at = start;
    while at < bytes.len() && bytes[at].is_ascii_digit() {
        at += 1;
    }
    let mut is_double = false;
    if at < bytes.len() && bytes[at] == b'.' && bytes.get(at + 1).is_some_and(|b| b.is_ascii_digit())
    {
        is_double = true;
        at += 1;
        while at < bytes.len() && bytes[at].is_ascii_digit() {
            at += 1;
        }
    }
    if at < bytes.len() && (bytes[at] == b'e' || bytes[at] == b'E') {
        let mut exp = at + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        if exp < bytes.len() && bytes[exp].is_ascii_digit() {
            is_double = true;
            at = exp;
            while at < bytes.len() && bytes[at].is_ascii_digit() {
                at += 1;
            }
        }
    }
    let text = &input[start..at];
    let token = if is_double {
        Token::Double(
            text.parse()
                .map_err(|_| ParseError::new(format!("invalid number `{text}`"), start))?,
        )
    } else {
        Token::Integer(
            text.parse()
                .map_err(|_| ParseError::new(format!("number `{text}` out of range"), start))?,
        )
    };
    Ok((token, at))
}
