use std::time::Duration;

use super::PromQLError;
use crate::duration::parse_duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Number(f64),
    Duration(Duration),
    Str(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Colon,
    At,
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    EqlC,
    Neq,
    Gtr,
    Lss,
    Gte,
    Lte,
    EqlRegex,
    NeqRegex,
    Eof,
}

impl Token {
    pub fn describe(&self) -> String {
        match self {
            Self::Ident(s) => format!("identifier {s:?}"),
            Self::Number(n) => format!("number {n}"),
            Self::Duration(_) => "duration".to_string(),
            Self::Str(s) => format!("string {s:?}"),
            Self::LParen => "\"(\"".to_string(),
            Self::RParen => "\")\"".to_string(),
            Self::LBrace => "\"{\"".to_string(),
            Self::RBrace => "\"}\"".to_string(),
            Self::LBracket => "\"[\"".to_string(),
            Self::RBracket => "\"]\"".to_string(),
            Self::Comma => "\",\"".to_string(),
            Self::Colon => "\":\"".to_string(),
            Self::At => "\"@\"".to_string(),
            Self::Assign => "\"=\"".to_string(),
            Self::Eof => "end of input".to_string(),
            op => format!("operator {op:?}"),
        }
    }
}

/// Token together with its byte offset in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub pos: usize,
}

pub fn tokenize(input: &str) -> Result<Vec<Spanned>, PromQLError> {
    let bytes = input.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if c == b'#' {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }

        let two = if i + 1 < bytes.len() {
            Some((c, bytes[i + 1]))
        } else {
            None
        };
        let token = match two {
            Some((b'=', b'=')) => Some((Token::EqlC, 2)),
            Some((b'!', b'=')) => Some((Token::Neq, 2)),
            Some((b'>', b'=')) => Some((Token::Gte, 2)),
            Some((b'<', b'=')) => Some((Token::Lte, 2)),
            Some((b'=', b'~')) => Some((Token::EqlRegex, 2)),
            Some((b'!', b'~')) => Some((Token::NeqRegex, 2)),
            _ => None,
        };
        if let Some((token, len)) = token {
            out.push(Spanned { token, pos: start });
            i += len;
            continue;
        }

        let single = match c {
            b'(' => Some(Token::LParen),
            b')' => Some(Token::RParen),
            b'{' => Some(Token::LBrace),
            b'}' => Some(Token::RBrace),
            b'[' => Some(Token::LBracket),
            b']' => Some(Token::RBracket),
            b',' => Some(Token::Comma),
            b':' => Some(Token::Colon),
            b'@' => Some(Token::At),
            b'=' => Some(Token::Assign),
            b'+' => Some(Token::Add),
            b'-' => Some(Token::Sub),
            b'*' => Some(Token::Mul),
            b'/' => Some(Token::Div),
            b'%' => Some(Token::Mod),
            b'^' => Some(Token::Pow),
            b'>' => Some(Token::Gtr),
            b'<' => Some(Token::Lss),
            _ => None,
        };
        if let Some(token) = single {
            out.push(Spanned { token, pos: start });
            i += 1;
            continue;
        }

        if c == b'"' || c == b'\'' || c == b'`' {
            let (s, end) = lex_string(input, i)?;
            out.push(Spanned {
                token: Token::Str(s),
                pos: start,
            });
            i = end;
            continue;
        }

        if c.is_ascii_digit() || (c == b'.' && i + 1 < bytes.len() && bytes[i + 1].is_ascii_digit())
        {
            let (token, end) = lex_number(input, i)?;
            out.push(Spanned { token, pos: start });
            i = end;
            continue;
        }

        if c.is_ascii_alphabetic() || c == b'_' {
            while i < bytes.len()
                && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b':')
            {
                i += 1;
            }
            // Recording rule names like `job:up:sum` keep their colons.
            out.push(Spanned {
                token: Token::Ident(input[start..i].to_string()),
                pos: start,
            });
            continue;
        }

        let ch = input[i..].chars().next().unwrap_or('?');
        return Err(PromQLError::new(start, format!("unexpected character {ch:?}")));
    }

    out.push(Spanned {
        token: Token::Eof,
        pos: input.len(),
    });
    Ok(out)
}

fn lex_string(input: &str, start: usize) -> Result<(String, usize), PromQLError> {
    let mut chars = input[start..].char_indices();
    let quote = match chars.next() {
        Some((_, q)) => q,
        None => return Err(PromQLError::new(start, "unterminated quoted string")),
    };
    let mut out = String::new();
    let mut escaped = false;

    for (offset, c) in chars {
        if quote == '`' {
            if c == '`' {
                return Ok((out, start + offset + 1));
            }
            out.push(c);
            continue;
        }
        if escaped {
            match c {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                '\\' => out.push('\\'),
                '"' => out.push('"'),
                '\'' => out.push('\''),
                other => {
                    out.push('\\');
                    out.push(other);
                }
            }
            escaped = false;
            continue;
        }
        if c == '\\' {
            escaped = true;
        } else if c == quote {
            return Ok((out, start + offset + c.len_utf8()));
        } else if c == '\n' {
            break;
        } else {
            out.push(c);
        }
    }
    Err(PromQLError::new(start, "unterminated quoted string"))
}

fn lex_number(input: &str, start: usize) -> Result<(Token, usize), PromQLError> {
    let bytes = input.as_bytes();
    let mut i = start;

    if input[start..].starts_with("0x") || input[start..].starts_with("0X") {
        i += 2;
        while i < bytes.len() && bytes[i].is_ascii_hexdigit() {
            i += 1;
        }
        let v = i64::from_str_radix(&input[start + 2..i], 16)
            .map_err(|_| PromQLError::new(start, "bad hexadecimal number"))?;
        return Ok((Token::Number(v as f64), i));
    }

    while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
        i += 1;
    }

    // Duration: digits followed by unit letters, possibly repeated (1h30m).
    if i < bytes.len() && is_unit_start(bytes[i]) && !input[start..i].contains('.') {
        let mut j = i;
        while j < bytes.len() && (bytes[j].is_ascii_digit() || is_unit_start(bytes[j])) {
            j += 1;
        }
        if let Ok(d) = parse_duration(&input[start..j]) {
            return Ok((Token::Duration(d), j));
        }
    }

    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            i = j;
        }
    }

    let text = &input[start..i];
    let v: f64 = text
        .parse()
        .map_err(|_| PromQLError::new(start, format!("bad number {text:?}")))?;
    Ok((Token::Number(v), i))
}

fn is_unit_start(b: u8) -> bool {
    matches!(b, b'y' | b'w' | b'd' | b'h' | b'm' | b's')
}
