//! CEL source → token stream (§4.1).

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    String(String),
    Integer(i64),
    Float(f64),
    DateTime(DateTime<Utc>),
    True,
    False,
    Null,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    Minus,
    In,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

/// Identifiers accept `@`, `#`, `$`, `!`... wait, `!` is also the NOT
/// operator; per §4.1 identifiers accept these as non-leading
/// characters alongside digits (keys like `@timestamp` occur in alert
/// payloads, so the leading character is restricted to `@`/`#`/`$`/
/// letters/underscore and trailing characters may additionally include
/// digits).
fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '@' || c == '#' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    is_ident_start(c) || c.is_ascii_digit()
}

pub struct Lexer<'a> {
    src: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer {
            src,
            chars: src.char_indices().peekable(),
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Spanned>, (usize, String)> {
        let mut out = Vec::new();
        loop {
            self.skip_whitespace();
            let offset = match self.chars.peek() {
                Some(&(i, _)) => i,
                None => self.src.len(),
            };
            let token = match self.next_token()? {
                Some(t) => t,
                None => Token::Eof,
            };
            let is_eof = token == Token::Eof;
            out.push(Spanned { token, offset });
            if is_eof {
                break;
            }
        }
        Ok(out)
    }

    fn skip_whitespace(&mut self) {
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_whitespace() {
                self.chars.next();
            } else {
                break;
            }
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>, (usize, String)> {
        let (offset, c) = match self.chars.next() {
            Some(x) => x,
            None => return Ok(None),
        };

        match c {
            '.' => Ok(Some(Token::Dot)),
            ',' => Ok(Some(Token::Comma)),
            '(' => Ok(Some(Token::LParen)),
            ')' => Ok(Some(Token::RParen)),
            '[' => Ok(Some(Token::LBracket)),
            ']' => Ok(Some(Token::RBracket)),
            '-' => Ok(Some(Token::Minus)),
            '!' => {
                if self.peek_char() == Some('=') {
                    self.chars.next();
                    Ok(Some(Token::Ne))
                } else {
                    Ok(Some(Token::Not))
                }
            }
            '=' => {
                if self.peek_char() == Some('=') {
                    self.chars.next();
                    Ok(Some(Token::Eq))
                } else {
                    Err((offset, "expected '=='".to_string()))
                }
            }
            '<' => {
                if self.peek_char() == Some('=') {
                    self.chars.next();
                    Ok(Some(Token::Le))
                } else {
                    Ok(Some(Token::Lt))
                }
            }
            '>' => {
                if self.peek_char() == Some('=') {
                    self.chars.next();
                    Ok(Some(Token::Ge))
                } else {
                    Ok(Some(Token::Gt))
                }
            }
            '&' => {
                if self.peek_char() == Some('&') {
                    self.chars.next();
                    Ok(Some(Token::And))
                } else {
                    Err((offset, "expected '&&'".to_string()))
                }
            }
            '|' => {
                if self.peek_char() == Some('|') {
                    self.chars.next();
                    Ok(Some(Token::Or))
                } else {
                    Err((offset, "expected '||'".to_string()))
                }
            }
            '\'' | '"' => self.lex_string(c, offset),
            c if c.is_ascii_digit() => self.lex_number(offset),
            c if is_ident_start(c) => Ok(Some(self.lex_ident(offset))),
            other => Err((offset, format!("unexpected character '{other}'"))),
        }
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn lex_string(&mut self, quote: char, start: usize) -> Result<Option<Token>, (usize, String)> {
        let mut s = String::new();
        loop {
            match self.chars.next() {
                Some((_, c)) if c == quote => break,
                Some((_, '\\')) => match self.chars.next() {
                    Some((_, 'n')) => s.push('\n'),
                    Some((_, 't')) => s.push('\t'),
                    Some((_, 'r')) => s.push('\r'),
                    Some((_, '\\')) => s.push('\\'),
                    Some((_, '\'')) => s.push('\''),
                    Some((_, '"')) => s.push('"'),
                    Some((i, other)) => return Err((i, format!("invalid escape '\\{other}'"))),
                    None => return Err((start, "unterminated string literal".to_string())),
                },
                Some((_, c)) => s.push(c),
                None => return Err((start, "unterminated string literal".to_string())),
            }
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
            return Ok(Some(Token::DateTime(dt.with_timezone(&Utc))));
        }
        Ok(Some(Token::String(s)))
    }

    fn lex_number(&mut self, start: usize) -> Result<Option<Token>, (usize, String)> {
        let mut end = start + 1;
        let mut is_float = false;
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_ascii_digit() {
                self.chars.next();
                end = i + 1;
            } else if c == '.' && !is_float {
                // Don't consume '.' if it isn't followed by a digit
                // (e.g. `5.contains(...)` is not valid CEL here, but we
                // guard defensively anyway).
                is_float = true;
                self.chars.next();
                end = i + 1;
            } else {
                break;
            }
        }
        let text = &self.src[start..end];
        if is_float {
            text.parse::<f64>()
                .map(|f| Some(Token::Float(f)))
                .map_err(|_| (start, format!("invalid float literal '{text}'")))
        } else {
            text.parse::<i64>()
                .map(|i| Some(Token::Integer(i)))
                .map_err(|_| (start, format!("invalid integer literal '{text}'")))
        }
    }

    fn lex_ident(&mut self, start: usize) -> Token {
        let mut end = start + 1;
        while let Some(&(i, c)) = self.chars.peek() {
            if is_ident_continue(c) {
                self.chars.next();
                end = i + c.len_utf8();
            } else {
                break;
            }
        }
        let text = &self.src[start..end];
        match text {
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            "in" => Token::In,
            _ => Token::Ident(text.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Token> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn lexes_at_sign_identifiers() {
        assert_eq!(toks("@timestamp"), vec![Token::Ident("@timestamp".into()), Token::Eof]);
    }

    #[test]
    fn lexes_comparison_and_logical_operators() {
        assert_eq!(
            toks("a == 1 && b != 2"),
            vec![
                Token::Ident("a".into()),
                Token::Eq,
                Token::Integer(1),
                Token::And,
                Token::Ident("b".into()),
                Token::Ne,
                Token::Integer(2),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn lexes_escaped_string_literal() {
        assert_eq!(toks(r#"'it\'s ok'"#), vec![Token::String("it's ok".into()), Token::Eof]);
    }

    #[test]
    fn lexes_float_literal() {
        assert_eq!(toks("1.5"), vec![Token::Float(1.5), Token::Eof]);
    }
}
