//! Abstract syntax tree for the query language.

use fedql_core::{Span, Value};

/// A complete parsed query document.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDocument {
    pub uses: Vec<UseClause>,
    pub blocks: Vec<Block>,
    pub span: Span,
}

/// A query-level `use` modifier.
#[derive(Debug, Clone, PartialEq)]
pub struct UseClause {
    pub key: UseKey,
    pub value: UseValue,
    pub span: Span,
}

/// The key of a `use` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UseKey {
    MaxAge,
    SMaxAge,
    Timeout,
}

impl UseKey {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MaxAge => "max-age",
            Self::SMaxAge => "s-max-age",
            Self::Timeout => "timeout",
        }
    }
}

/// The value of a `use` clause.
#[derive(Debug, Clone, PartialEq)]
pub enum UseValue {
    Int(i64),
    String(String),
}

/// One statement block: method, resource, and qualifiers.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub method: MethodKind,
    pub resource: String,
    pub alias: Option<String>,
    pub in_path: Vec<String>,
    pub qualifiers: Vec<Qualifier>,
    pub span: Span,
}

/// The statement method keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    From,
    To,
    Into,
    Update,
    Delete,
}

impl MethodKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::From => "from",
            Self::To => "to",
            Self::Into => "into",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// A statement qualifier.
#[derive(Debug, Clone, PartialEq)]
pub enum Qualifier {
    With(WithQualifier),
    Only(Vec<FilterItem>),
    Headers(Vec<HeaderItem>),
    Hidden,
    IgnoreErrors,
    Timeout(VarOrInt),
    MaxAge(VarOrInt),
    SMaxAge(VarOrInt),
}

/// The `with` qualifier: optional `$body` target plus key/value parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WithQualifier {
    pub body: Option<BodyTarget>,
    pub items: Vec<WithItem>,
}

/// A `$target` body parameter inside `with`.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyTarget {
    pub target: String,
    pub encoder: Option<Encoder>,
}

/// One `key = value` entry inside `with`. Keys may be dotted.
#[derive(Debug, Clone, PartialEq)]
pub struct WithItem {
    pub key: Vec<String>,
    pub value: Value,
    pub encoder: Option<Encoder>,
}

/// A per-parameter encoder suffix: `-> flatten | base64 | json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoder {
    Flatten,
    Base64,
    Json,
}

impl Encoder {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Flatten => "flatten",
            Self::Base64 => "base64",
            Self::Json => "json",
        }
    }
}

/// One field-selection filter in `only`.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterItem {
    pub path: Vec<String>,
    /// Regex source from `-> matches("...")`, if present.
    pub matches: Option<String>,
}

/// One `name = value` entry in `headers`.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderItem {
    pub name: String,
    pub value: HeaderValue,
}

/// A header value: literal string or input variable.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Literal(String),
    Variable(String),
}

/// An integer that may instead be an input variable.
#[derive(Debug, Clone, PartialEq)]
pub enum VarOrInt {
    Int(i64),
    Variable(String),
}
