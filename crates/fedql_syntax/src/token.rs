//! Token kinds and structures for the query language.

use fedql_core::Span;

/// The kind of a token in a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenKind {
    // Special tokens
    Eof,
    Error,

    // Literals
    Ident,
    IntLiteral,
    FloatLiteral,
    StringLiteral,

    // Keywords - Methods
    From,
    To,
    Into,
    Update,
    Delete,

    // Keywords - Structure
    Use,
    As,
    In,

    // Keywords - Qualifiers
    With,
    Only,
    Headers,
    Hidden,
    Timeout,
    MaxAge,
    SMaxAge,
    IgnoreErrors,

    // Keywords - Encoders and filters
    Flatten,
    Base64,
    Json,
    Matches,

    // Punctuation
    Arrow,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Colon,
    Dot,
    Eq,
    Dollar,
}

impl TokenKind {
    #[must_use]
    pub const fn is_method(self) -> bool {
        matches!(
            self,
            Self::From | Self::To | Self::Into | Self::Update | Self::Delete
        )
    }

    #[must_use]
    pub const fn is_qualifier(self) -> bool {
        matches!(
            self,
            Self::With
                | Self::Only
                | Self::Headers
                | Self::Hidden
                | Self::Timeout
                | Self::MaxAge
                | Self::SMaxAge
                | Self::IgnoreErrors
        )
    }

    #[must_use]
    pub const fn is_keyword(self) -> bool {
        matches!(
            self,
            Self::From
                | Self::To
                | Self::Into
                | Self::Update
                | Self::Delete
                | Self::Use
                | Self::As
                | Self::In
                | Self::With
                | Self::Only
                | Self::Headers
                | Self::Hidden
                | Self::Timeout
                | Self::MaxAge
                | Self::SMaxAge
                | Self::IgnoreErrors
                | Self::Flatten
                | Self::Base64
                | Self::Json
                | Self::Matches
        )
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eof => "<eof>",
            Self::Error => "<error>",
            Self::Ident => "<ident>",
            Self::IntLiteral => "<int>",
            Self::FloatLiteral => "<float>",
            Self::StringLiteral => "<string>",
            Self::From => "from",
            Self::To => "to",
            Self::Into => "into",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Use => "use",
            Self::As => "as",
            Self::In => "in",
            Self::With => "with",
            Self::Only => "only",
            Self::Headers => "headers",
            Self::Hidden => "hidden",
            Self::Timeout => "timeout",
            Self::MaxAge => "max-age",
            Self::SMaxAge => "s-max-age",
            Self::IgnoreErrors => "ignore-errors",
            Self::Flatten => "flatten",
            Self::Base64 => "base64",
            Self::Json => "json",
            Self::Matches => "matches",
            Self::Arrow => "->",
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::LBracket => "[",
            Self::RBracket => "]",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::Colon => ":",
            Self::Dot => ".",
            Self::Eq => "=",
            Self::Dollar => "$",
        }
    }

    #[must_use]
    pub fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "from" => Some(Self::From),
            "to" => Some(Self::To),
            "into" => Some(Self::Into),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            "use" => Some(Self::Use),
            "as" => Some(Self::As),
            "in" => Some(Self::In),
            "with" => Some(Self::With),
            "only" => Some(Self::Only),
            "headers" => Some(Self::Headers),
            "hidden" => Some(Self::Hidden),
            "timeout" => Some(Self::Timeout),
            "max-age" => Some(Self::MaxAge),
            "s-max-age" => Some(Self::SMaxAge),
            "ignore-errors" => Some(Self::IgnoreErrors),
            "flatten" => Some(Self::Flatten),
            "base64" => Some(Self::Base64),
            "json" => Some(Self::Json),
            "matches" => Some(Self::Matches),
            _ => None,
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A token with its kind and source span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    #[must_use]
    #[inline]
    pub const fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    #[must_use]
    #[inline]
    pub const fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }
}
