//! # Parser
//!
//! Precedence-climbing parser for filter, sort, grouping, projection and
//! document path text. Binding powers, lowest first:
//!
//! | level | operators |
//! |---|---|
//! | 1 | `or`, `\|\|` |
//! | 3 | `and`, `&&` |
//! | 5 | prefix `not` |
//! | 7 | `= == != <> < <= > >=` |
//! | 9 | `[not] in`, `[not] overlaps`, `like`, `between`, `is`, `regexp` |
//! | 11 | `& \| ^ << >>` |
//! | 13 | `+ -` |
//! | 15 | `* / div %` |
//! | 17 | prefix `- ! ~` |
//!
//! Error positions are token indexes.

use indexmap::IndexMap;
use monodoc_common::{
    ParseError,
    ast::{BinaryOp, DocumentPath, Expr, FunctionName, ListForm, PathSegment, UnaryOp},
    error::ParseErrorKind,
    protocol::{Projection, SortDirection, SortSpec},
    value::Value,
};

use super::lexer::{Token, TokenKind, lex, unescape_string, unquote_identifier};

pub type ParseResult<T> = Result<T, ParseError>;

const BP_NOT: u8 = 5;
const BP_PREDICATE: u8 = 9;
const BP_PREDICATE_OPERAND: u8 = 11;
const BP_UNARY: u8 = 17;

/// Recursive descent parser over one expression string.
pub struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    placeholders: IndexMap<String, u32>,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> ParseResult<Self> {
        Ok(Self {
            source,
            tokens: lex(source)?,
            pos: 0,
            placeholders: IndexMap::new(),
        })
    }

    /// Placeholder names mapped to their positions, in order of first appearance.
    pub fn placeholders(&self) -> &IndexMap<String, u32> {
        &self.placeholders
    }

    // Token management

    #[inline]
    fn current(&self) -> Token {
        // The lexer always terminates the stream with Eof
        self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    #[inline]
    fn peek(&self) -> TokenKind {
        self.current().kind
    }

    #[inline]
    fn peek_nth(&self, n: usize) -> TokenKind {
        self.tokens
            .get(self.pos + n)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }

    #[inline]
    fn advance(&mut self) -> Token {
        let token = self.current();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn text(&self, token: Token) -> &'a str {
        token.text(self.source)
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek() == kind
    }

    fn check_keyword(&self, keyword: &str) -> bool {
        self.keyword_at(0, keyword)
    }

    fn keyword_at(&self, n: usize, keyword: &str) -> bool {
        self.tokens.get(self.pos + n).is_some_and(|t| {
            t.kind == TokenKind::Keyword && self.text(*t).eq_ignore_ascii_case(keyword)
        })
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        if self.check_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected(&self) -> ParseError {
        let token = self.current();
        if token.kind == TokenKind::Eof {
            ParseError::no_tokens(self.pos)
        } else {
            ParseError::unexpected(self.text(token), self.pos)
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> ParseResult<Token> {
        if self.check(kind) {
            return Ok(self.advance());
        }
        let token = self.current();
        if token.kind == TokenKind::Eof {
            return Err(ParseError::no_tokens(self.pos));
        }
        Err(ParseError::new(
            ParseErrorKind::Expected,
            format!(
                "Expected '{what}' but found '{}' at token pos {}",
                self.text(token),
                self.pos
            ),
            Some(self.pos),
        ))
    }

    fn expect_keyword(&mut self, keyword: &str) -> ParseResult<()> {
        if self.consume_keyword(keyword) {
            Ok(())
        } else if self.check(TokenKind::Eof) {
            Err(ParseError::no_tokens(self.pos))
        } else {
            Err(ParseError::new(
                ParseErrorKind::Expected,
                format!(
                    "Expected '{}' but found '{}' at token pos {}",
                    keyword.to_ascii_uppercase(),
                    self.text(self.current()),
                    self.pos
                ),
                Some(self.pos),
            ))
        }
    }

    /// Every token must be consumed.
    fn expect_end(&self) -> ParseResult<()> {
        if self.check(TokenKind::Eof) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn comma_separated<T>(
        &mut self,
        mut element: impl FnMut(&mut Self) -> ParseResult<T>,
    ) -> ParseResult<Vec<T>> {
        let mut items = vec![element(self)?];
        while self.check(TokenKind::Comma) {
            self.advance();
            items.push(element(self)?);
        }
        Ok(items)
    }

    // Entry points

    /// Parse a full filter or having expression.
    pub fn parse_expr(&mut self) -> ParseResult<Expr> {
        let expr = self.parse_expr_bp(0)?;
        self.expect_end()?;
        Ok(expr)
    }

    /// Parse `expr [asc|desc], ...`.
    pub fn parse_sort(&mut self) -> ParseResult<Vec<SortSpec>> {
        let specs = self.comma_separated(|p| {
            let expr = p.parse_expr_bp(0)?;
            let direction = if p.consume_keyword("desc") {
                SortDirection::Desc
            } else {
                p.consume_keyword("asc");
                SortDirection::Asc
            };
            Ok(SortSpec { expr, direction })
        })?;
        self.expect_end()?;
        Ok(specs)
    }

    /// Parse `expr [as alias], ...`. A field without an alias is named after
    /// its first path member.
    pub fn parse_projection(&mut self) -> ParseResult<Vec<Projection>> {
        let projection = self.comma_separated(|p| {
            let source = p.parse_expr_bp(0)?;
            let alias = if p.consume_keyword("as") {
                Some(p.parse_alias()?)
            } else if let Expr::Field { path } = &source {
                path.first_member().map(str::to_string)
            } else {
                None
            };
            Ok(Projection { source, alias })
        })?;
        self.expect_end()?;
        Ok(projection)
    }

    /// Parse a comma-separated expression list, as used for grouping.
    pub fn parse_expr_list(&mut self) -> ParseResult<Vec<Expr>> {
        let exprs = self.comma_separated(|p| p.parse_expr_bp(0))?;
        self.expect_end()?;
        Ok(exprs)
    }

    /// Parse a standalone document path such as `$.a.b[0]` or `a.b`.
    pub fn parse_document_path(&mut self) -> ParseResult<DocumentPath> {
        let start = self.pos;
        let path = match self.peek() {
            TokenKind::Dollar => {
                self.advance();
                self.parse_path_segments(Vec::new())?
            }
            TokenKind::Identifier | TokenKind::QuotedIdentifier => {
                let name = self.parse_member_name()?;
                self.parse_path_segments(vec![PathSegment::Member(name)])?
            }
            _ => return Err(self.unexpected()),
        };
        if path.is_root() {
            return Err(ParseError::new(
                ParseErrorKind::InvalidPath,
                format!("Invalid document path at token pos {start}"),
                Some(start),
            ));
        }
        self.expect_end()?;
        Ok(path)
    }

    fn parse_alias(&mut self) -> ParseResult<String> {
        let token = self.current();
        let alias = match token.kind {
            TokenKind::Identifier => self.text(token).to_string(),
            TokenKind::QuotedIdentifier => unquote_identifier(self.text(token)),
            TokenKind::StringLiteral => unescape_string(self.text(token)),
            _ => return Err(self.unexpected()),
        };
        self.advance();
        Ok(alias)
    }

    // Expressions

    fn parse_expr_bp(&mut self, min_bp: u8) -> ParseResult<Expr> {
        let left_start = self.pos;
        let mut left = self.parse_prefix()?;

        loop {
            if self.at_predicate() {
                if BP_PREDICATE < min_bp {
                    break;
                }
                left = self.parse_predicate(left, left_start)?;
                continue;
            }

            let (op, left_bp, right_bp) = match self.peek() {
                TokenKind::OrOr => (BinaryOp::Or, 1, 2),
                TokenKind::Keyword if self.check_keyword("or") => (BinaryOp::Or, 1, 2),
                TokenKind::AndAnd => (BinaryOp::And, 3, 4),
                TokenKind::Keyword if self.check_keyword("and") => (BinaryOp::And, 3, 4),
                TokenKind::Equals => (BinaryOp::Eq, 7, 8),
                TokenKind::NotEqual => (BinaryOp::NotEq, 7, 8),
                TokenKind::LessThan => (BinaryOp::Lt, 7, 8),
                TokenKind::LessEqual => (BinaryOp::LtEq, 7, 8),
                TokenKind::GreaterThan => (BinaryOp::Gt, 7, 8),
                TokenKind::GreaterEqual => (BinaryOp::GtEq, 7, 8),
                TokenKind::Amp => (BinaryOp::BitAnd, 11, 12),
                TokenKind::Pipe => (BinaryOp::BitOr, 11, 12),
                TokenKind::Caret => (BinaryOp::BitXor, 11, 12),
                TokenKind::ShiftLeft => (BinaryOp::Shl, 11, 12),
                TokenKind::ShiftRight => (BinaryOp::Shr, 11, 12),
                TokenKind::Plus => (BinaryOp::Add, 13, 14),
                TokenKind::Minus => (BinaryOp::Sub, 13, 14),
                TokenKind::Star => (BinaryOp::Mul, 15, 16),
                TokenKind::Slash => (BinaryOp::Div, 15, 16),
                TokenKind::Keyword if self.check_keyword("div") => (BinaryOp::Div, 15, 16),
                TokenKind::Percent => (BinaryOp::Mod, 15, 16),
                _ => break,
            };

            if left_bp < min_bp {
                break;
            }

            self.advance();
            let right = self.parse_expr_bp(right_bp)?;
            left = Expr::binary(op, left, right);
        }

        Ok(left)
    }

    fn at_predicate(&self) -> bool {
        const PREDICATES: [&str; 5] = ["in", "overlaps", "like", "between", "regexp"];
        if self.check_keyword("is") {
            return true;
        }
        let offset = usize::from(self.check_keyword("not"));
        PREDICATES.iter().any(|k| self.keyword_at(offset, k))
    }

    /// Parse the postfix part of `left [NOT] IN|OVERLAPS|LIKE|BETWEEN|REGEXP ...`
    /// or `left IS [NOT] ...`.
    fn parse_predicate(&mut self, left: Expr, left_start: usize) -> ParseResult<Expr> {
        let negated = self.consume_keyword("not");
        let target = Box::new(left);

        if self.consume_keyword("in") {
            return self.parse_in(target, negated);
        }

        if self.consume_keyword("overlaps") {
            Self::require_literal_array(&target, left_start)?;
            let right_start = self.pos;
            let right = self.parse_expr_bp(BP_PREDICATE_OPERAND)?;
            Self::require_literal_array(&right, right_start)?;
            return Ok(Expr::Overlaps {
                left: target,
                right: Box::new(right),
                negated,
            });
        }

        if self.consume_keyword("like") {
            let pattern = Box::new(self.parse_expr_bp(BP_PREDICATE_OPERAND)?);
            let escape = if self.consume_keyword("escape") {
                Some(Box::new(self.parse_expr_bp(BP_PREDICATE_OPERAND)?))
            } else {
                None
            };
            return Ok(Expr::Like {
                target,
                pattern,
                escape,
                negated,
            });
        }

        if self.consume_keyword("between") {
            let low = Box::new(self.parse_expr_bp(BP_PREDICATE_OPERAND)?);
            self.expect_keyword("and")?;
            let high = Box::new(self.parse_expr_bp(BP_PREDICATE_OPERAND)?);
            return Ok(Expr::Between {
                target,
                low,
                high,
                negated,
            });
        }

        if self.consume_keyword("regexp") {
            let pattern = Box::new(self.parse_expr_bp(BP_PREDICATE_OPERAND)?);
            return Ok(Expr::Regexp {
                target,
                pattern,
                negated,
            });
        }

        if !negated && self.consume_keyword("is") {
            let negated = self.consume_keyword("not");
            let value = Box::new(self.parse_expr_bp(BP_PREDICATE_OPERAND)?);
            return Ok(Expr::Is {
                target,
                value,
                negated,
            });
        }

        Err(self.unexpected())
    }

    fn parse_in(&mut self, target: Box<Expr>, negated: bool) -> ParseResult<Expr> {
        let (list, form) = match self.peek() {
            TokenKind::LeftParen => {
                self.advance();
                let items = if self.check(TokenKind::RightParen) {
                    Vec::new()
                } else {
                    self.comma_separated(|p| p.parse_expr_bp(0))?
                };
                self.expect(TokenKind::RightParen, ")")?;
                (items, ListForm::Paren)
            }
            TokenKind::LeftBracket => {
                let start = self.pos;
                let array = self.parse_primary()?;
                Self::require_literal_array(&array, start)?;
                let items = match array {
                    Expr::Array { items } => items,
                    other => vec![other],
                };
                (items, ListForm::Bracket)
            }
            _ => {
                let operand = self.parse_expr_bp(BP_PREDICATE_OPERAND)?;
                (vec![operand], ListForm::Container)
            }
        };

        Ok(Expr::In {
            target,
            list,
            negated,
            form,
        })
    }

    /// Bracketed lists may only hold literal values.
    fn require_literal_array(expr: &Expr, position: usize) -> ParseResult<()> {
        if let Expr::Array { items } = expr
            && let Some(bad) = items.iter().find(|item| !item.is_literal())
        {
            return Err(ParseError::new(
                ParseErrorKind::NonLiteralListElement,
                format!(
                    "Bracketed list starting at token pos {position} may only contain literals, found '{bad}'"
                ),
                Some(position),
            ));
        }
        Ok(())
    }

    fn parse_prefix(&mut self) -> ParseResult<Expr> {
        match self.peek() {
            TokenKind::Keyword if self.check_keyword("not") => {
                self.advance();
                let operand = self.parse_expr_bp(BP_NOT)?;
                Ok(Expr::unary(UnaryOp::Not, operand))
            }
            TokenKind::Minus | TokenKind::Plus => {
                let sign = self.advance();
                if matches!(self.peek(), TokenKind::Integer | TokenKind::Float) {
                    let number = self.advance();
                    let text = format!("{}{}", self.text(sign), self.text(number));
                    return Ok(Expr::literal(parse_number(&text, number.kind)));
                }
                let operand = self.parse_expr_bp(BP_UNARY)?;
                if sign.kind == TokenKind::Plus {
                    Ok(operand)
                } else {
                    Ok(Expr::unary(UnaryOp::Neg, operand))
                }
            }
            TokenKind::Bang => {
                self.advance();
                Ok(Expr::unary(UnaryOp::Not, self.parse_expr_bp(BP_UNARY)?))
            }
            TokenKind::Tilde => {
                self.advance();
                Ok(Expr::unary(UnaryOp::BitNot, self.parse_expr_bp(BP_UNARY)?))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let token = self.current();

        match token.kind {
            TokenKind::Integer | TokenKind::Float => {
                self.advance();
                Ok(Expr::literal(parse_number(self.text(token), token.kind)))
            }
            TokenKind::StringLiteral => {
                self.advance();
                Ok(Expr::literal(unescape_string(self.text(token))))
            }
            TokenKind::Keyword if self.check_keyword("true") => {
                self.advance();
                Ok(Expr::literal(true))
            }
            TokenKind::Keyword if self.check_keyword("false") => {
                self.advance();
                Ok(Expr::literal(false))
            }
            TokenKind::Keyword if self.check_keyword("null") => {
                self.advance();
                Ok(Expr::literal(Value::Null))
            }
            TokenKind::Colon => {
                self.advance();
                self.parse_placeholder()
            }
            TokenKind::LeftParen => {
                self.advance();
                let expr = self.parse_expr_bp(0)?;
                self.expect(TokenKind::RightParen, ")")?;
                Ok(expr)
            }
            TokenKind::LeftBracket => {
                self.advance();
                let items = if self.check(TokenKind::RightBracket) {
                    Vec::new()
                } else {
                    self.comma_separated(|p| p.parse_expr_bp(0))?
                };
                self.expect(TokenKind::RightBracket, "]")?;
                Ok(Expr::Array { items })
            }
            TokenKind::LeftBrace => {
                self.advance();
                self.parse_object()
            }
            TokenKind::Dollar => {
                self.advance();
                let path = self.parse_path_segments(Vec::new())?;
                Ok(Expr::field(path))
            }
            TokenKind::Identifier | TokenKind::QuotedIdentifier => self.parse_identifier_expr(),
            _ => Err(self.unexpected()),
        }
    }

    fn parse_placeholder(&mut self) -> ParseResult<Expr> {
        let token = self.current();
        let name = match token.kind {
            TokenKind::Identifier | TokenKind::Integer | TokenKind::Keyword => {
                self.text(token).to_ascii_lowercase()
            }
            TokenKind::QuotedIdentifier => unquote_identifier(self.text(token)).to_lowercase(),
            TokenKind::Eof => return Err(ParseError::no_tokens(self.pos)),
            _ => {
                return Err(ParseError::new(
                    ParseErrorKind::Expected,
                    format!("Invalid placeholder name at token pos {}", self.pos),
                    Some(self.pos),
                ));
            }
        };
        self.advance();

        let next = self.placeholders.len() as u32;
        let position = *self.placeholders.entry(name.clone()).or_insert(next);
        Ok(Expr::Placeholder { name, position })
    }

    fn parse_object(&mut self) -> ParseResult<Expr> {
        let mut fields = Vec::new();
        if !self.check(TokenKind::RightBrace) {
            fields = self.comma_separated(|p| {
                let key_token = p.current();
                let key = match key_token.kind {
                    TokenKind::StringLiteral => unescape_string(p.text(key_token)),
                    TokenKind::Identifier => p.text(key_token).to_string(),
                    TokenKind::QuotedIdentifier => unquote_identifier(p.text(key_token)),
                    _ => return Err(p.unexpected()),
                };
                p.advance();
                p.expect(TokenKind::Colon, ":")?;
                let value = p.parse_expr_bp(0)?;
                Ok((key, value))
            })?;
        }
        self.expect(TokenKind::RightBrace, "}")?;
        Ok(Expr::Object { fields })
    }

    /// An identifier starts either a function call or a field path.
    fn parse_identifier_expr(&mut self) -> ParseResult<Expr> {
        let is_call = self.peek_nth(1) == TokenKind::LeftParen
            || (self.peek_nth(1) == TokenKind::Dot
                && self.peek_nth(2) == TokenKind::Identifier
                && self.peek_nth(3) == TokenKind::LeftParen);

        if is_call {
            return self.parse_function_call();
        }

        let name = self.parse_member_name()?;
        let path = self.parse_path_segments(vec![PathSegment::Member(name)])?;
        Ok(Expr::field(path))
    }

    fn parse_function_call(&mut self) -> ParseResult<Expr> {
        let first = self.parse_member_name()?;
        let name = if self.check(TokenKind::Dot) {
            self.advance();
            let name = self.parse_member_name()?;
            FunctionName {
                schema: Some(first),
                name,
            }
        } else {
            FunctionName {
                schema: None,
                name: first,
            }
        };

        self.expect(TokenKind::LeftParen, "(")?;
        let args = if self.check(TokenKind::RightParen) {
            Vec::new()
        } else if self.check(TokenKind::Star) && self.peek_nth(1) == TokenKind::RightParen {
            self.advance();
            vec![Expr::Star]
        } else {
            self.comma_separated(|p| p.parse_expr_bp(0))?
        };
        self.expect(TokenKind::RightParen, ")")?;

        Ok(Expr::Call { name, args })
    }

    fn parse_member_name(&mut self) -> ParseResult<String> {
        let token = self.current();
        match token.kind {
            TokenKind::Identifier => {
                self.advance();
                Ok(self.text(token).to_string())
            }
            TokenKind::QuotedIdentifier => {
                self.advance();
                Ok(unquote_identifier(self.text(token)))
            }
            _ => Err(self.unexpected()),
        }
    }

    /// Continue a path with `.member`, `.*`, `[n]`, `[*]` and `**` steps.
    fn parse_path_segments(&mut self, mut segments: Vec<PathSegment>) -> ParseResult<DocumentPath> {
        loop {
            match self.peek() {
                TokenKind::Dot => {
                    self.advance();
                    let token = self.current();
                    let member = match token.kind {
                        TokenKind::Identifier | TokenKind::Keyword => self.text(token).to_string(),
                        TokenKind::QuotedIdentifier => unquote_identifier(self.text(token)),
                        TokenKind::StringLiteral => unescape_string(self.text(token)),
                        TokenKind::Eof => return Err(ParseError::no_tokens(self.pos)),
                        _ => {
                            return Err(ParseError::new(
                                ParseErrorKind::InvalidPath,
                                format!(
                                    "Expected identifier or string in JSON path at token pos {}",
                                    self.pos
                                ),
                                Some(self.pos),
                            ));
                        }
                    };
                    self.advance();
                    segments.push(PathSegment::Member(member));
                }
                TokenKind::DotStar => {
                    self.advance();
                    segments.push(PathSegment::MemberWildcard);
                }
                TokenKind::DoubleStar => {
                    self.advance();
                    segments.push(PathSegment::DoubleWildcard);
                }
                TokenKind::LeftBracket => {
                    self.advance();
                    segments.push(self.parse_array_location()?);
                }
                _ => break,
            }
        }

        if segments.last() == Some(&PathSegment::DoubleWildcard) {
            return Err(ParseError::new(
                ParseErrorKind::InvalidPath,
                "JSON path may not end in '**'",
                Some(self.pos),
            ));
        }

        Ok(DocumentPath::new(segments))
    }

    fn parse_array_location(&mut self) -> ParseResult<PathSegment> {
        let token = self.current();
        let segment = match token.kind {
            TokenKind::Star => PathSegment::IndexWildcard,
            TokenKind::Integer => {
                let index = self.text(token).parse::<u32>().map_err(|_| {
                    ParseError::new(
                        ParseErrorKind::InvalidPath,
                        format!("Array index out of range at token pos {}", self.pos),
                        Some(self.pos),
                    )
                })?;
                PathSegment::Index(index)
            }
            TokenKind::Minus => {
                return Err(ParseError::new(
                    ParseErrorKind::InvalidPath,
                    format!("Array index cannot be negative at token pos {}", self.pos),
                    Some(self.pos),
                ));
            }
            TokenKind::Eof => return Err(ParseError::no_tokens(self.pos)),
            _ => {
                return Err(ParseError::new(
                    ParseErrorKind::InvalidPath,
                    format!(
                        "Expected '*' or integer in JSON path array index at token pos {}",
                        self.pos
                    ),
                    Some(self.pos),
                ));
            }
        };
        self.advance();
        self.expect(TokenKind::RightBracket, "]")?;
        Ok(segment)
    }
}

/// Integers beyond `u64` fall back to floating point.
fn parse_number(text: &str, kind: TokenKind) -> Value {
    if kind == TokenKind::Integer {
        if let Ok(i) = text.parse::<i64>() {
            return Value::Int(i);
        }
        if let Ok(u) = text.parse::<u64>() {
            return Value::UInt(u);
        }
    }
    text.parse::<f64>().map(Value::Float).unwrap_or(Value::Null)
}

// Convenience entry points

/// Compile a filter or having expression.
pub fn parse_expr(source: &str) -> ParseResult<Expr> {
    Parser::new(source)?.parse_expr()
}

/// Compile a sort clause list such as `pages desc, title`.
pub fn parse_sort(source: &str) -> ParseResult<Vec<SortSpec>> {
    Parser::new(source)?.parse_sort()
}

/// Compile a projection such as `_id as ID, count(*) as n`.
pub fn parse_projection(source: &str) -> ParseResult<Vec<Projection>> {
    Parser::new(source)?.parse_projection()
}

/// Compile a grouping expression list.
pub fn parse_expr_list(source: &str) -> ParseResult<Vec<Expr>> {
    Parser::new(source)?.parse_expr_list()
}

/// Compile a document path used as a modification target.
pub fn parse_document_path(source: &str) -> ParseResult<DocumentPath> {
    Parser::new(source)?.parse_document_path()
}
