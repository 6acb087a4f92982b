//! Lexer for the query language.

use crate::token::{Token, TokenKind};
use fedql_core::Span;

/// A lexer for query source text.
///
/// Whitespace and commas are equivalent separators; `//` starts a line
/// comment. Identifiers may contain letters, digits, `_` and `-`, which is
/// how the hyphenated keywords (`max-age`, `ignore-errors`) lex as single
/// tokens.
pub struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: u32,
}

impl<'a> Lexer<'a> {
    /// Creates a new lexer.
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
        }
    }

    /// Peeks at the current byte without consuming.
    #[inline]
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos as usize).copied()
    }

    /// Peeks at the byte at offset from current position.
    #[inline]
    fn peek_at(&self, offset: u32) -> Option<u8> {
        self.bytes.get((self.pos + offset) as usize).copied()
    }

    /// Advances by one byte.
    #[inline]
    fn advance(&mut self) {
        self.pos += 1;
    }

    /// Advances by n bytes.
    #[inline]
    fn advance_by(&mut self, n: u32) {
        self.pos += n;
    }

    /// Gets the slice from start to current position.
    #[inline]
    fn slice_from(&self, start: u32) -> &'a str {
        &self.source[start as usize..self.pos as usize]
    }

    /// Gets the text at the given span.
    pub fn span_text(&self, span: Span) -> &'a str {
        &self.source[span.start as usize..span.end as usize]
    }

    /// Scans the next token.
    pub fn next_token(&mut self) -> Token {
        self.skip_trivia();

        let start = self.pos;

        let Some(c) = self.peek() else {
            return Token::new(TokenKind::Eof, Span::new(start, start));
        };

        let kind = match c {
            b'{' => {
                self.advance();
                TokenKind::LBrace
            }
            b'}' => {
                self.advance();
                TokenKind::RBrace
            }
            b'[' => {
                self.advance();
                TokenKind::LBracket
            }
            b']' => {
                self.advance();
                TokenKind::RBracket
            }
            b'(' => {
                self.advance();
                TokenKind::LParen
            }
            b')' => {
                self.advance();
                TokenKind::RParen
            }
            b':' => {
                self.advance();
                TokenKind::Colon
            }
            b'.' => {
                self.advance();
                TokenKind::Dot
            }
            b'=' => {
                self.advance();
                TokenKind::Eq
            }
            b'$' => {
                self.advance();
                TokenKind::Dollar
            }

            b'"' => self.scan_string(),

            b'-' if self.peek_at(1) == Some(b'>') => {
                self.advance_by(2);
                TokenKind::Arrow
            }
            b'-' | b'+' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => {
                self.scan_number()
            }
            b'0'..=b'9' => self.scan_number(),

            b'a'..=b'z' | b'A'..=b'Z' | b'_' | b'-' => self.scan_identifier(),

            _ => {
                self.advance();
                TokenKind::Error
            }
        };

        Token::new(kind, Span::new(start, self.pos))
    }

    /// Skips whitespace, commas, and comments.
    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r' | b'\n' | b',') => {
                    self.advance();
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    /// Scans an identifier or keyword.
    fn scan_identifier(&mut self) -> TokenKind {
        let start = self.pos;

        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                self.advance();
            } else if c == b'-' && self.peek_at(1) != Some(b'>') {
                // A trailing `-` that opens an arrow belongs to the arrow.
                self.advance();
            } else {
                break;
            }
        }

        let text = self.slice_from(start);
        TokenKind::from_keyword(text).unwrap_or(TokenKind::Ident)
    }

    /// Scans a number literal.
    fn scan_number(&mut self) -> TokenKind {
        if let Some(b'-' | b'+') = self.peek() {
            self.advance();
        }

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.advance();
            } else {
                break;
            }
        }

        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            self.advance(); // .
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    self.advance();
                } else {
                    break;
                }
            }
            TokenKind::FloatLiteral
        } else {
            TokenKind::IntLiteral
        }
    }

    /// Scans a string literal. Strings are double-quoted, single-line, and
    /// taken verbatim (no escape processing).
    fn scan_string(&mut self) -> TokenKind {
        self.advance(); // Opening quote

        loop {
            match self.peek() {
                None | Some(b'\n') => {
                    return TokenKind::Error;
                }
                Some(b'"') => {
                    self.advance();
                    return TokenKind::StringLiteral;
                }
                _ => {
                    self.advance();
                }
            }
        }
    }
}

/// Tokenizes the entire source.
pub fn tokenize(source: &str) -> Vec<Token> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();

    loop {
        let token = lexer.next_token();
        let is_eof = token.is_eof();
        tokens.push(token);
        if is_eof {
            break;
        }
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_punctuation() {
        assert_eq!(
            kinds("{ } [ ] ( ) : . = $ ->"),
            vec![
                TokenKind::LBrace,
                TokenKind::RBrace,
                TokenKind::LBracket,
                TokenKind::RBracket,
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::Colon,
                TokenKind::Dot,
                TokenKind::Eq,
                TokenKind::Dollar,
                TokenKind::Arrow,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_keywords() {
        assert_eq!(
            kinds("from into update to delete use as in with only headers hidden"),
            vec![
                TokenKind::From,
                TokenKind::Into,
                TokenKind::Update,
                TokenKind::To,
                TokenKind::Delete,
                TokenKind::Use,
                TokenKind::As,
                TokenKind::In,
                TokenKind::With,
                TokenKind::Only,
                TokenKind::Headers,
                TokenKind::Hidden,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_hyphenated_keywords() {
        assert_eq!(
            kinds("timeout max-age s-max-age ignore-errors"),
            vec![
                TokenKind::Timeout,
                TokenKind::MaxAge,
                TokenKind::SMaxAge,
                TokenKind::IgnoreErrors,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("42 -17 +3 3.14 -0.5"),
            vec![
                TokenKind::IntLiteral,
                TokenKind::IntLiteral,
                TokenKind::IntLiteral,
                TokenKind::FloatLiteral,
                TokenKind::FloatLiteral,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_commas_are_trivia() {
        assert_eq!(
            kinds("a, b,c"),
            vec![
                TokenKind::Ident,
                TokenKind::Ident,
                TokenKind::Ident,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments() {
        assert_eq!(
            kinds("from // the main resource\nhero"),
            vec![TokenKind::From, TokenKind::Ident, TokenKind::Eof]
        );
    }

    #[test]
    fn test_strings() {
        let tokens = tokenize(r#""hello world" "a.b""#);
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[1].kind, TokenKind::StringLiteral);
    }

    #[test]
    fn test_unterminated_string_is_error() {
        let tokens = tokenize("\"oops\nx");
        assert_eq!(tokens[0].kind, TokenKind::Error);
    }

    #[test]
    fn test_arrow_after_ident() {
        assert_eq!(
            kinds("names -> flatten ids->base64"),
            vec![
                TokenKind::Ident,
                TokenKind::Arrow,
                TokenKind::Flatten,
                TokenKind::Ident,
                TokenKind::Arrow,
                TokenKind::Base64,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_idents_with_digits_and_dashes() {
        assert_eq!(
            kinds("hero-sidekick item_2"),
            vec![TokenKind::Ident, TokenKind::Ident, TokenKind::Eof]
        );
    }
}
