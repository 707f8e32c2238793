//! # Lexer
//!
//! Tokenizes expression text into a stream of tokens with byte spans.

use std::ops::Range;

use memchr::memchr2;
use monodoc_common::{ParseError, error::ParseErrorKind};

/// Words that are never plain identifiers. Matched case-insensitively.
const KEYWORDS: &[&str] = &[
    "and", "or", "not", "in", "like", "between", "is", "regexp", "overlaps", "true", "false",
    "null", "asc", "desc", "as", "escape", "div",
];

/// Token kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TokenKind {
    // Literals and identifiers
    Identifier,
    QuotedIdentifier, // `name`
    Keyword,
    StringLiteral,
    Integer,
    Float,

    // Delimiters
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    Comma,
    Dot,
    DotStar,    // .*
    DoubleStar, // **
    Colon,
    Dollar,

    // Operators
    Equals,   // = or ==
    NotEqual, // != or <>
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    AndAnd,
    OrOr,
    Bang,
    Tilde,
    Amp,
    Pipe,
    Caret,
    ShiftLeft,
    ShiftRight,

    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: u32, // Byte offset
    pub end: u32,   // Byte offset, exclusive
}

impl Span {
    #[inline]
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start: start as u32,
            end: end as u32,
        }
    }

    #[inline]
    pub fn as_range(&self) -> Range<usize> {
        self.start as usize..self.end as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    /// Raw source text covered by this token.
    pub fn text<'s>(&self, source: &'s str) -> &'s str {
        &source[self.span.as_range()]
    }
}

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
}

pub struct Lexer<'a> {
    source: &'a [u8],
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source: source.as_bytes(),
            tokens: Vec::with_capacity(source.len() / 2 + 1),
            pos: 0,
        }
    }

    pub fn lex(mut self) -> Result<Vec<Token>, ParseError> {
        while self.pos < self.source.len() {
            let byte = self.source[self.pos];
            match byte {
                b' ' | b'\t' | b'\r' | b'\n' => self.pos += 1,
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.scan_identifier_or_keyword(),
                b'0'..=b'9' => self.scan_number(),
                b'.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit())
                    && !self.follows_path_component() =>
                {
                    self.scan_number()
                }
                b'"' | b'\'' => self.scan_string(byte)?,
                b'`' => self.scan_quoted_identifier()?,
                _ => self.scan_operator_or_delimiter()?,
            }
        }

        self.tokens.push(Token {
            kind: TokenKind::Eof,
            span: Span::new(self.source.len(), self.source.len()),
        });

        Ok(self.tokens)
    }

    #[inline]
    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.source.get(self.pos + offset).copied()
    }

    /// A `.` directly after one of these starts a path step, not a number.
    fn follows_path_component(&self) -> bool {
        matches!(
            self.tokens.last().map(|t| t.kind),
            Some(
                TokenKind::Identifier
                    | TokenKind::QuotedIdentifier
                    | TokenKind::RightBracket
                    | TokenKind::Dollar
            )
        ) && self
            .tokens
            .last()
            .is_some_and(|t| t.span.end as usize == self.pos)
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        self.tokens.push(Token {
            kind,
            span: Span::new(start, self.pos),
        });
    }

    fn scan_identifier_or_keyword(&mut self) {
        let start = self.pos;
        let len = self.source[self.pos..]
            .iter()
            .take_while(|&&c| c.is_ascii_alphanumeric() || c == b'_')
            .count();
        self.pos += len;

        let text = std::str::from_utf8(&self.source[start..self.pos]).unwrap_or_default();
        let kind = if is_keyword(text) {
            TokenKind::Keyword
        } else {
            TokenKind::Identifier
        };
        self.push(kind, start);
    }

    fn scan_digits(&mut self) -> usize {
        let len = self.source[self.pos..]
            .iter()
            .take_while(|c| c.is_ascii_digit())
            .count();
        self.pos += len;
        len
    }

    fn scan_number(&mut self) {
        let start = self.pos;
        let mut kind = TokenKind::Integer;

        self.scan_digits();

        if self.peek_at(0) == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
            self.scan_digits();
            kind = TokenKind::Float;
        }

        if matches!(self.peek_at(0), Some(b'e' | b'E')) {
            let sign = usize::from(matches!(self.peek_at(1), Some(b'+' | b'-')));
            if self.peek_at(1 + sign).is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1 + sign;
                self.scan_digits();
                kind = TokenKind::Float;
            }
        }

        self.push(kind, start);
    }

    fn scan_string(&mut self, quote: u8) -> Result<(), ParseError> {
        let start = self.pos;
        self.pos += 1; // Skip opening quote

        loop {
            let Some(len) = memchr2(quote, b'\\', &self.source[self.pos..]) else {
                return Err(ParseError::new(
                    ParseErrorKind::UnterminatedString,
                    format!("Unterminated string starting at {start}"),
                    Some(start),
                ));
            };
            let at = self.pos + len;
            if self.source[at] == b'\\' {
                // Skip the escaped character
                self.pos = at + 2;
                if self.pos > self.source.len() {
                    self.pos = self.source.len();
                }
                continue;
            }
            // Doubled quote is an escaped quote
            if self.source.get(at + 1) == Some(&quote) {
                self.pos = at + 2;
                continue;
            }
            self.pos = at + 1;
            break;
        }

        self.push(TokenKind::StringLiteral, start);
        Ok(())
    }

    fn scan_quoted_identifier(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        self.pos += 1;

        loop {
            let Some(len) = memchr::memchr(b'`', &self.source[self.pos..]) else {
                return Err(ParseError::new(
                    ParseErrorKind::UnterminatedString,
                    format!("Unterminated quoted identifier starting at {start}"),
                    Some(start),
                ));
            };
            let at = self.pos + len;
            if self.source.get(at + 1) == Some(&b'`') {
                self.pos = at + 2;
                continue;
            }
            self.pos = at + 1;
            break;
        }

        self.push(TokenKind::QuotedIdentifier, start);
        Ok(())
    }

    fn scan_operator_or_delimiter(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        let byte = self.source[self.pos];
        let next = self.peek_at(1);

        let (kind, len) = match (byte, next) {
            (b'(', _) => (TokenKind::LeftParen, 1),
            (b')', _) => (TokenKind::RightParen, 1),
            (b'[', _) => (TokenKind::LeftBracket, 1),
            (b']', _) => (TokenKind::RightBracket, 1),
            (b'{', _) => (TokenKind::LeftBrace, 1),
            (b'}', _) => (TokenKind::RightBrace, 1),
            (b',', _) => (TokenKind::Comma, 1),
            (b'.', Some(b'*')) => (TokenKind::DotStar, 2),
            (b'.', _) => (TokenKind::Dot, 1),
            (b':', _) => (TokenKind::Colon, 1),
            (b'$', _) => (TokenKind::Dollar, 1),
            (b'=', Some(b'=')) => (TokenKind::Equals, 2),
            (b'=', _) => (TokenKind::Equals, 1),
            (b'!', Some(b'=')) => (TokenKind::NotEqual, 2),
            (b'!', _) => (TokenKind::Bang, 1),
            (b'<', Some(b'>')) => (TokenKind::NotEqual, 2),
            (b'<', Some(b'=')) => (TokenKind::LessEqual, 2),
            (b'<', Some(b'<')) => (TokenKind::ShiftLeft, 2),
            (b'<', _) => (TokenKind::LessThan, 1),
            (b'>', Some(b'=')) => (TokenKind::GreaterEqual, 2),
            (b'>', Some(b'>')) => (TokenKind::ShiftRight, 2),
            (b'>', _) => (TokenKind::GreaterThan, 1),
            (b'+', _) => (TokenKind::Plus, 1),
            (b'-', _) => (TokenKind::Minus, 1),
            (b'*', Some(b'*')) => (TokenKind::DoubleStar, 2),
            (b'*', _) => (TokenKind::Star, 1),
            (b'/', _) => (TokenKind::Slash, 1),
            (b'%', _) => (TokenKind::Percent, 1),
            (b'&', Some(b'&')) => (TokenKind::AndAnd, 2),
            (b'&', _) => (TokenKind::Amp, 1),
            (b'|', Some(b'|')) => (TokenKind::OrOr, 2),
            (b'|', _) => (TokenKind::Pipe, 1),
            (b'^', _) => (TokenKind::Caret, 1),
            (b'~', _) => (TokenKind::Tilde, 1),
            _ => {
                let ch = std::str::from_utf8(&self.source[start..])
                    .ok()
                    .and_then(|s| s.chars().next())
                    .unwrap_or(byte as char);
                return Err(ParseError::new(
                    ParseErrorKind::InvalidToken,
                    format!("Unexpected character '{ch}' at position {start}"),
                    Some(start),
                ));
            }
        };

        self.pos += len;
        self.push(kind, start);
        Ok(())
    }
}

/// Tokenize expression text.
pub fn lex(source: &str) -> Result<Vec<Token>, ParseError> {
    Lexer::new(source).lex()
}

/// Decode the body of a quoted string token, including its quotes.
pub fn unescape_string(raw: &str) -> String {
    let quote = raw.chars().next().unwrap_or('"');
    let body = &raw[1..raw.len().saturating_sub(1).max(1)];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('0') => out.push('\0'),
                Some('b') => out.push('\u{8}'),
                Some('Z') => out.push('\u{1a}'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else if c == quote && chars.peek() == Some(&quote) {
            chars.next();
            out.push(quote);
        } else {
            out.push(c);
        }
    }

    out
}

/// Decode a backtick-quoted identifier token.
pub fn unquote_identifier(raw: &str) -> String {
    let body = &raw[1..raw.len().saturating_sub(1).max(1)];
    body.replace("``", "`")
}
