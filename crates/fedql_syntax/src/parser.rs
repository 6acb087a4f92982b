//! Recursive descent parser for the query language.

use crate::ast::*;
use crate::lexer::Lexer;
use crate::token::{Token, TokenKind};
use fedql_core::{
    diagnostics::codes, ChainLink, Diagnostic, DiagnosticBag, LineIndex, ObjectMap, Span, Value,
};

/// Parser for query text.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    diagnostics: DiagnosticBag,
}

/// Result of parsing: the document plus collected diagnostics.
pub struct ParseResult {
    pub document: QueryDocument,
    pub diagnostics: DiagnosticBag,
}

/// A parse failure with its source position and the tokens that would have
/// been accepted.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub line: u32,
    pub column: u32,
    pub message: String,
    pub expected: Vec<String>,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)?;
        if !self.expected.is_empty() {
            write!(f, " (expected {})", self.expected.join(" | "))?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// Parses a source string, collecting diagnostics instead of failing fast.
pub fn parse(source: &str) -> ParseResult {
    let mut parser = Parser::new(source);
    let document = parser.parse_document();
    ParseResult {
        document,
        diagnostics: parser.diagnostics,
    }
}

/// Parses a source string into a document, failing on the first error.
pub fn parse_query(source: &str) -> Result<QueryDocument, ParseError> {
    let result = parse(source);
    match result.diagnostics.first_error() {
        None => Ok(result.document),
        Some(diag) => {
            let index = LineIndex::new(source);
            let pos = index.line_col(diag.primary_span().unwrap_or_default().start);
            Err(ParseError {
                line: pos.line,
                column: pos.column,
                message: diag
                    .labels
                    .first()
                    .map(|l| l.message.clone())
                    .unwrap_or_else(|| diag.title.clone()),
                expected: diag.expected.clone(),
            })
        }
    }
}

impl<'a> Parser<'a> {
    /// Creates a new parser.
    pub fn new(source: &'a str) -> Self {
        let mut lexer = Lexer::new(source);
        let current = lexer.next_token();
        Self {
            lexer,
            current,
            diagnostics: DiagnosticBag::new(),
        }
    }

    /// Returns the current token kind.
    #[inline]
    fn at(&self) -> TokenKind {
        self.current.kind
    }

    /// Returns true if at the given kind.
    #[inline]
    fn at_kind(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    /// Advances to the next token.
    fn advance(&mut self) {
        self.current = self.lexer.next_token();
    }

    /// Expects a specific token kind.
    fn expect(&mut self, kind: TokenKind) -> bool {
        if self.at_kind(kind) {
            self.advance();
            true
        } else {
            self.error_expected(&[kind]);
            false
        }
    }

    /// Gets the text of the current token.
    fn current_text(&self) -> &'a str {
        self.lexer.span_text(self.current.span)
    }

    /// Reports an error at the current token.
    fn error(&mut self, message: &str) {
        self.diagnostics.error(
            codes::INVALID_SYNTAX,
            "invalid syntax",
            self.current.span,
            message.to_string(),
        );
    }

    /// Reports an unexpected-token error with the accepted set.
    fn error_expected(&mut self, expected: &[TokenKind]) {
        let code = if self.at_kind(TokenKind::Eof) {
            codes::UNEXPECTED_EOF
        } else {
            codes::UNEXPECTED_TOKEN
        };
        let diag = Diagnostic::error(code, "unexpected token")
            .with_span(
                self.current.span,
                format!("unexpected {}", self.at()),
            )
            .with_expected(expected.iter().map(|k| k.as_str().to_string()).collect());
        self.diagnostics.add(diag);
    }

    /// True if the current token can begin a name (identifier position).
    ///
    /// Encoder and filter keywords are contextual: `flatten`, `base64`,
    /// `json` and `matches` are valid resource, parameter and field names.
    fn at_name(&self) -> bool {
        matches!(
            self.at(),
            TokenKind::Ident
                | TokenKind::Flatten
                | TokenKind::Base64
                | TokenKind::Json
                | TokenKind::Matches
        )
    }

    /// Consumes a name token and returns its text.
    fn parse_name(&mut self) -> Option<String> {
        if self.at_name() {
            let text = self.current_text().to_string();
            self.advance();
            Some(text)
        } else {
            self.error_expected(&[TokenKind::Ident]);
            None
        }
    }

    /// Consumes a dotted name path: `ident (. ident)*`.
    fn parse_dotted_name(&mut self) -> Vec<String> {
        let mut path = Vec::new();
        if let Some(head) = self.parse_name() {
            path.push(head);
        }
        while self.at_kind(TokenKind::Dot) {
            self.advance();
            if let Some(segment) = self.parse_name() {
                path.push(segment);
            } else {
                break;
            }
        }
        path
    }

    /// Returns the unquoted content of the current string token.
    fn string_content(&self) -> String {
        let raw = self.current_text();
        raw[1..raw.len() - 1].to_string()
    }

    /// Parses a full document.
    pub fn parse_document(&mut self) -> QueryDocument {
        let start = self.current.span.start;
        let mut uses = Vec::new();
        let mut blocks = Vec::new();

        while self.at_kind(TokenKind::Use) {
            if let Some(clause) = self.parse_use_clause() {
                uses.push(clause);
            }
        }

        while !self.at_kind(TokenKind::Eof) {
            if self.at().is_method() {
                blocks.push(self.parse_block());
            } else {
                self.error_expected(&[
                    TokenKind::From,
                    TokenKind::To,
                    TokenKind::Into,
                    TokenKind::Update,
                    TokenKind::Delete,
                ]);
                // Recovery: skip to the next plausible block start.
                self.advance();
            }
        }

        let end = self.current.span.end;
        QueryDocument {
            uses,
            blocks,
            span: Span::new(start, end),
        }
    }

    /// Parses `use (max-age | s-max-age | timeout) (Int | String)`.
    fn parse_use_clause(&mut self) -> Option<UseClause> {
        let start = self.current.span.start;
        self.advance(); // use

        let key = match self.at() {
            TokenKind::MaxAge => UseKey::MaxAge,
            TokenKind::SMaxAge => UseKey::SMaxAge,
            TokenKind::Timeout => UseKey::Timeout,
            _ => {
                self.error_expected(&[
                    TokenKind::MaxAge,
                    TokenKind::SMaxAge,
                    TokenKind::Timeout,
                ]);
                return None;
            }
        };
        self.advance();

        let value = match self.at() {
            TokenKind::IntLiteral => {
                let value = self.parse_int()?;
                UseValue::Int(value)
            }
            TokenKind::StringLiteral => {
                let content = self.string_content();
                self.advance();
                UseValue::String(content)
            }
            _ => {
                self.error_expected(&[TokenKind::IntLiteral, TokenKind::StringLiteral]);
                return None;
            }
        };

        let end = self.current.span.start;
        Some(UseClause {
            key,
            value,
            span: Span::new(start, end),
        })
    }

    /// Parses one statement block.
    fn parse_block(&mut self) -> Block {
        let start = self.current.span.start;
        let method = match self.at() {
            TokenKind::From => MethodKind::From,
            TokenKind::To => MethodKind::To,
            TokenKind::Into => MethodKind::Into,
            TokenKind::Update => MethodKind::Update,
            TokenKind::Delete => MethodKind::Delete,
            _ => unreachable!("parse_block called off a method token"),
        };
        self.advance();

        let resource = self.parse_name().unwrap_or_default();

        let alias = if self.at_kind(TokenKind::As) {
            self.advance();
            self.parse_name()
        } else {
            None
        };

        let in_path = if self.at_kind(TokenKind::In) {
            self.advance();
            self.parse_dotted_name()
        } else {
            Vec::new()
        };

        let mut qualifiers = Vec::new();
        while self.at().is_qualifier() {
            if let Some(qualifier) = self.parse_qualifier() {
                qualifiers.push(qualifier);
            }
        }

        let end = self.current.span.start;
        Block {
            method,
            resource,
            alias,
            in_path,
            qualifiers,
            span: Span::new(start, end),
        }
    }

    /// Parses one qualifier.
    fn parse_qualifier(&mut self) -> Option<Qualifier> {
        match self.at() {
            TokenKind::With => Some(Qualifier::With(self.parse_with())),
            TokenKind::Only => Some(Qualifier::Only(self.parse_only())),
            TokenKind::Headers => Some(Qualifier::Headers(self.parse_headers())),
            TokenKind::Hidden => {
                self.advance();
                Some(Qualifier::Hidden)
            }
            TokenKind::IgnoreErrors => {
                self.advance();
                Some(Qualifier::IgnoreErrors)
            }
            TokenKind::Timeout => {
                self.advance();
                self.parse_var_or_int().map(Qualifier::Timeout)
            }
            TokenKind::MaxAge => {
                self.advance();
                self.parse_var_or_int().map(Qualifier::MaxAge)
            }
            TokenKind::SMaxAge => {
                self.advance();
                self.parse_var_or_int().map(Qualifier::SMaxAge)
            }
            _ => unreachable!("parse_qualifier called off a qualifier token"),
        }
    }

    /// Parses `with ($target encoder?)? (key = value encoder?)*`.
    fn parse_with(&mut self) -> WithQualifier {
        self.advance(); // with

        let body = if self.at_kind(TokenKind::Dollar) {
            self.advance();
            self.parse_name().map(|target| BodyTarget {
                target,
                encoder: self.parse_encoder_suffix(),
            })
        } else {
            None
        };

        let mut items = Vec::new();
        while self.at_name() {
            let key = self.parse_dotted_name();
            if !self.expect(TokenKind::Eq) {
                break;
            }
            let value = self.parse_value();
            let encoder = self.parse_encoder_suffix();
            items.push(WithItem {
                key,
                value,
                encoder,
            });
        }

        WithQualifier { body, items }
    }

    /// Parses `-> (flatten | base64 | json)` if present.
    fn parse_encoder_suffix(&mut self) -> Option<Encoder> {
        if !self.at_kind(TokenKind::Arrow) {
            return None;
        }
        self.advance();
        let encoder = match self.at() {
            TokenKind::Flatten => Encoder::Flatten,
            TokenKind::Base64 => Encoder::Base64,
            TokenKind::Json => Encoder::Json,
            _ => {
                self.error_expected(&[
                    TokenKind::Flatten,
                    TokenKind::Base64,
                    TokenKind::Json,
                ]);
                return None;
            }
        };
        self.advance();
        Some(encoder)
    }

    /// Parses `only` filters.
    fn parse_only(&mut self) -> Vec<FilterItem> {
        self.advance(); // only

        let mut filters = Vec::new();
        while self.at_name() {
            let path = self.parse_dotted_name();
            let matches = self.parse_matches_suffix();
            filters.push(FilterItem { path, matches });
        }

        if filters.is_empty() {
            self.error("expected at least one field filter after only");
        }
        filters
    }

    /// Parses `-> matches("...")` if present.
    fn parse_matches_suffix(&mut self) -> Option<String> {
        if !self.at_kind(TokenKind::Arrow) {
            return None;
        }
        self.advance();
        if !self.expect(TokenKind::Matches) {
            return None;
        }
        if !self.expect(TokenKind::LParen) {
            return None;
        }
        let pattern = if self.at_kind(TokenKind::StringLiteral) {
            let content = self.string_content();
            self.advance();
            Some(content)
        } else {
            self.error_expected(&[TokenKind::StringLiteral]);
            None
        };
        self.expect(TokenKind::RParen);
        pattern
    }

    /// Parses `headers` items.
    fn parse_headers(&mut self) -> Vec<HeaderItem> {
        self.advance(); // headers

        let mut items = Vec::new();
        while self.at_name() {
            let Some(name) = self.parse_name() else { break };
            if !self.expect(TokenKind::Eq) {
                break;
            }
            let value = match self.at() {
                TokenKind::StringLiteral => {
                    let content = self.string_content();
                    self.advance();
                    HeaderValue::Literal(content)
                }
                TokenKind::Dollar => {
                    self.advance();
                    match self.parse_name() {
                        Some(var) => HeaderValue::Variable(var),
                        None => break,
                    }
                }
                _ => {
                    self.error_expected(&[TokenKind::StringLiteral, TokenKind::Dollar]);
                    break;
                }
            };
            items.push(HeaderItem { name, value });
        }

        if items.is_empty() {
            self.error("expected at least one header after headers");
        }
        items
    }

    /// Parses `$ident | Int`.
    fn parse_var_or_int(&mut self) -> Option<VarOrInt> {
        match self.at() {
            TokenKind::Dollar => {
                self.advance();
                self.parse_name().map(VarOrInt::Variable)
            }
            TokenKind::IntLiteral => self.parse_int().map(VarOrInt::Int),
            _ => {
                self.error_expected(&[TokenKind::Dollar, TokenKind::IntLiteral]);
                None
            }
        }
    }

    /// Parses the current integer literal.
    fn parse_int(&mut self) -> Option<i64> {
        let text = self.current_text();
        let parsed = text.parse::<i64>();
        match parsed {
            Ok(value) => {
                self.advance();
                Some(value)
            }
            Err(_) => {
                self.diagnostics.error(
                    codes::INVALID_LITERAL,
                    "invalid literal",
                    self.current.span,
                    format!("integer literal out of range: {text}"),
                );
                self.advance();
                None
            }
        }
    }

    /// Parses a value: list, object, variable, string, number, or chain.
    fn parse_value(&mut self) -> Value {
        match self.at() {
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.at_kind(TokenKind::RBracket) && !self.at_kind(TokenKind::Eof) {
                    items.push(self.parse_value());
                }
                self.expect(TokenKind::RBracket);
                Value::List(items)
            }
            TokenKind::LBrace => {
                self.advance();
                let mut entries = ObjectMap::new();
                while !self.at_kind(TokenKind::RBrace) && !self.at_kind(TokenKind::Eof) {
                    let key = if self.at_kind(TokenKind::StringLiteral) {
                        let content = self.string_content();
                        self.advance();
                        content
                    } else {
                        match self.parse_name() {
                            Some(name) => name,
                            None => break,
                        }
                    };
                    if !self.expect(TokenKind::Colon) {
                        break;
                    }
                    entries.insert(key, self.parse_value());
                }
                self.expect(TokenKind::RBrace);
                Value::Object(entries)
            }
            TokenKind::Dollar => {
                self.advance();
                let Some(name) = self.parse_name() else {
                    return Value::Null;
                };
                if self.at_kind(TokenKind::Dot) {
                    self.parse_chain_tail(ChainLink::Var(name))
                } else {
                    Value::Variable(name)
                }
            }
            TokenKind::StringLiteral => {
                let content = self.string_content();
                self.advance();
                Value::String(content)
            }
            TokenKind::IntLiteral => match self.parse_int() {
                Some(value) => Value::Int(value),
                None => Value::Null,
            },
            TokenKind::FloatLiteral => {
                let text = self.current_text();
                let parsed = text.parse::<f64>().unwrap_or(f64::NAN);
                self.advance();
                Value::Float(parsed)
            }
            _ if self.at_name() => {
                // Bare identifiers are cross-statement references.
                let name = self.current_text().to_string();
                self.advance();
                self.parse_chain_tail(ChainLink::Key(name))
            }
            _ => {
                self.error("expected a value");
                self.advance();
                Value::Null
            }
        }
    }

    /// Parses the `(. (ident | $ident))*` tail of a chain.
    fn parse_chain_tail(&mut self, head: ChainLink) -> Value {
        let mut links = vec![head];
        while self.at_kind(TokenKind::Dot) {
            self.advance();
            if self.at_kind(TokenKind::Dollar) {
                self.advance();
                match self.parse_name() {
                    Some(name) => links.push(ChainLink::Var(name)),
                    None => break,
                }
            } else {
                match self.parse_name() {
                    Some(name) => links.push(ChainLink::Key(name)),
                    None => break,
                }
            }
        }
        Value::Chain(links)
    }
}
