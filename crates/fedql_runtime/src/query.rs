//! Domain model for parsed queries and their execution results.
//!
//! Lowering from the syntax tree happens here: [`Query::from_document`]
//! flattens qualifier lists into typed statement fields and rejects
//! duplicate resource identifiers.

use crate::error::QueryError;
use crate::transport::HttpResponse;
use fedql_core::Value;
use fedql_syntax::ast;
use indexmap::IndexMap;
use serde::Serialize;

pub use fedql_syntax::ast::Encoder;

/// The statement method keyword and its HTTP mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    From,
    To,
    Into,
    Update,
    Delete,
}

impl Method {
    /// The HTTP verb this method maps to.
    #[must_use]
    pub const fn http_verb(self) -> &'static str {
        match self {
            Self::From => "GET",
            Self::To => "PUT",
            Self::Into => "POST",
            Self::Update => "PATCH",
            Self::Delete => "DELETE",
        }
    }

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

impl From<ast::MethodKind> for Method {
    fn from(kind: ast::MethodKind) -> Self {
        match kind {
            ast::MethodKind::From => Self::From,
            ast::MethodKind::To => Self::To,
            ast::MethodKind::Into => Self::Into,
            ast::MethodKind::Update => Self::Update,
            ast::MethodKind::Delete => Self::Delete,
        }
    }
}

/// The canonical identifier of a statement: alias if set, else resource name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ResourceId(pub String);

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One `key = value` parameter, with its optional encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct WithParam {
    pub value: Value,
    pub encoder: Option<Encoder>,
}

/// The `with` clause: optional body target plus ordered parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WithClause {
    /// The `$target` body parameter, if present.
    pub body: Option<BodyParam>,
    /// Parameters in declaration order, keyed by their dotted name.
    pub items: IndexMap<String, WithParam>,
}

/// The `$target` body parameter of a `with` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyParam {
    pub target: String,
    /// Starts as `Value::Variable(target)`; filled by variable resolution.
    pub value: Value,
    pub encoder: Option<Encoder>,
}

/// Cache qualifiers for a statement. Values may be unresolved variables
/// until initialization.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CacheControl {
    pub max_age: Option<Value>,
    pub s_max_age: Option<Value>,
}

impl CacheControl {
    /// The resolved `max-age` seconds, if set to an integer.
    #[must_use]
    pub fn max_age_secs(&self) -> Option<i64> {
        as_int(self.max_age.as_ref())
    }

    /// The resolved `s-max-age` seconds, if set to an integer.
    #[must_use]
    pub fn s_max_age_secs(&self) -> Option<i64> {
        as_int(self.s_max_age.as_ref())
    }
}

fn as_int(value: Option<&Value>) -> Option<i64> {
    match value {
        Some(Value::Int(i)) => Some(*i),
        _ => None,
    }
}

/// One field-selection filter from `only`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub path: Vec<String>,
    /// Regex source from `-> matches("...")`, if present.
    pub matches: Option<String>,
}

/// A single statement of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub method: Method,
    pub resource: String,
    pub alias: Option<String>,
    pub in_path: Vec<String>,
    pub with: WithClause,
    /// Header values are literals or input variables until resolution.
    pub headers: IndexMap<String, Value>,
    pub only: Vec<FieldFilter>,
    pub hidden: bool,
    pub ignore_errors: bool,
    /// Milliseconds; an unresolved variable until initialization.
    pub timeout: Option<Value>,
    pub cache_control: CacheControl,
}

impl Statement {
    /// Creates a minimal statement for the given resource.
    #[must_use]
    pub fn new(method: Method, resource: impl Into<String>) -> Self {
        Self {
            method,
            resource: resource.into(),
            alias: None,
            in_path: Vec::new(),
            with: WithClause::default(),
            headers: IndexMap::new(),
            only: Vec::new(),
            hidden: false,
            ignore_errors: false,
            timeout: None,
            cache_control: CacheControl::default(),
        }
    }

    /// The canonical identifier: alias if set, else resource name.
    #[must_use]
    pub fn resource_id(&self) -> ResourceId {
        ResourceId(
            self.alias
                .clone()
                .unwrap_or_else(|| self.resource.clone()),
        )
    }

    /// The resolved statement timeout in milliseconds, if set to an integer.
    #[must_use]
    pub fn timeout_ms(&self) -> Option<u64> {
        match self.timeout {
            Some(Value::Int(ms)) if ms > 0 => Some(ms as u64),
            _ => None,
        }
    }
}

/// Query-level modifiers from the `use` clause. Keys are the qualifier
/// names (`timeout`, `max-age`, `s-max-age`; `cache-control` is accepted as
/// an alias for `max-age` when modifiers arrive from storage).
pub type Modifiers = IndexMap<String, Value>;

/// A parsed query: ordered statements plus query-level modifiers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub statements: Vec<Statement>,
    pub modifiers: Modifiers,
}

impl Query {
    /// Lowers a parsed document into the domain model.
    ///
    /// Rejects duplicate resource identifiers: two statements may share a
    /// resource only when aliases keep their identifiers distinct.
    pub fn from_document(document: &ast::QueryDocument) -> Result<Self, QueryError> {
        let mut modifiers = Modifiers::new();
        for use_clause in &document.uses {
            let value = match &use_clause.value {
                ast::UseValue::Int(i) => Value::Int(*i),
                ast::UseValue::String(s) => Value::String(s.clone()),
            };
            modifiers.insert(use_clause.key.as_str().to_string(), value);
        }

        let mut statements = Vec::with_capacity(document.blocks.len());
        for block in &document.blocks {
            statements.push(lower_block(block));
        }

        let mut seen = IndexMap::new();
        for statement in &statements {
            let id = statement.resource_id();
            if seen.insert(id.clone(), ()).is_some() {
                return Err(QueryError::Validation(format!(
                    "duplicate resource identifier: {id}"
                )));
            }
        }

        Ok(Self {
            statements,
            modifiers,
        })
    }

    /// Parses and lowers query text in one step.
    pub fn parse(source: &str) -> Result<Self, QueryError> {
        let document = fedql_syntax::parse_query(source)?;
        Self::from_document(&document)
    }

    /// The query-level timeout from `use timeout`, in milliseconds.
    #[must_use]
    pub fn timeout_ms(&self) -> Option<u64> {
        match self.modifiers.get("timeout") {
            Some(Value::Int(ms)) if *ms > 0 => Some(*ms as u64),
            _ => None,
        }
    }
}

fn lower_block(block: &ast::Block) -> Statement {
    let mut statement = Statement::new(block.method.into(), block.resource.clone());
    statement.alias = block.alias.clone();
    statement.in_path = block.in_path.clone();

    for qualifier in &block.qualifiers {
        match qualifier {
            ast::Qualifier::With(with) => {
                if let Some(body) = &with.body {
                    statement.with.body = Some(BodyParam {
                        target: body.target.clone(),
                        value: Value::Variable(body.target.clone()),
                        encoder: body.encoder,
                    });
                }
                for item in &with.items {
                    statement.with.items.insert(
                        item.key.join("."),
                        WithParam {
                            value: item.value.clone(),
                            encoder: item.encoder,
                        },
                    );
                }
            }
            ast::Qualifier::Only(filters) => {
                statement
                    .only
                    .extend(filters.iter().map(|f| FieldFilter {
                        path: f.path.clone(),
                        matches: f.matches.clone(),
                    }));
            }
            ast::Qualifier::Headers(items) => {
                for item in items {
                    let value = match &item.value {
                        ast::HeaderValue::Literal(s) => Value::String(s.clone()),
                        ast::HeaderValue::Variable(v) => Value::Variable(v.clone()),
                    };
                    statement.headers.insert(item.name.clone(), value);
                }
            }
            ast::Qualifier::Hidden => statement.hidden = true,
            ast::Qualifier::IgnoreErrors => statement.ignore_errors = true,
            ast::Qualifier::Timeout(v) => statement.timeout = Some(var_or_int(v)),
            ast::Qualifier::MaxAge(v) => statement.cache_control.max_age = Some(var_or_int(v)),
            ast::Qualifier::SMaxAge(v) => {
                statement.cache_control.s_max_age = Some(var_or_int(v));
            }
        }
    }

    statement
}

fn var_or_int(value: &ast::VarOrInt) -> Value {
    match value {
        ast::VarOrInt::Int(i) => Value::Int(*i),
        ast::VarOrInt::Variable(v) => Value::Variable(v.clone()),
    }
}

/// Per-request input: parameters and headers from the caller.
#[derive(Debug, Clone, Default)]
pub struct QueryInput {
    pub params: IndexMap<String, Value>,
    pub headers: IndexMap<String, String>,
}

/// Everything a query execution needs besides the query itself.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    pub input: QueryInput,
    /// Resource name to URL template.
    pub mappings: IndexMap<String, String>,
    pub tenant: String,
}

/// A statement, or the multiplex tree it expanded into.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    One(Box<Statement>),
    Many(Vec<Resource>),
}

impl Resource {
    /// Visits every statement in the tree.
    pub fn for_each_statement<'a>(&'a self, f: &mut impl FnMut(&'a Statement)) {
        match self {
            Self::One(statement) => f(statement),
            Self::Many(items) => {
                for item in items {
                    item.for_each_statement(f);
                }
            }
        }
    }

    /// Rewrites every statement in the tree in place.
    pub fn map_statements(&mut self, f: &mut impl FnMut(&mut Statement)) {
        match self {
            Self::One(statement) => f(statement),
            Self::Many(items) => {
                for item in items {
                    item.map_statements(f);
                }
            }
        }
    }

    /// Returns the single statement, if not multiplexed.
    #[must_use]
    pub fn as_one(&self) -> Option<&Statement> {
        match self {
            Self::One(statement) => Some(statement),
            Self::Many(_) => None,
        }
    }
}

impl From<Statement> for Resource {
    fn from(statement: Statement) -> Self {
        Self::One(Box::new(statement))
    }
}

/// Statements keyed by resource identifier, in declaration order.
pub type Resources = IndexMap<ResourceId, Resource>;

/// Builds the initial resource map from a query's statements.
#[must_use]
pub fn resources_from_query(query: &Query) -> Resources {
    query
        .statements
        .iter()
        .map(|s| (s.resource_id(), Resource::from(s.clone())))
        .collect()
}

/// The terminal outcome of one statement call.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementResult {
    /// A transport response, successful or not.
    Response(HttpResponse),
    /// A pseudo-response synthesized from a failure on an `ignore-errors`
    /// statement or a statement deadline.
    Error(ErrorEnvelope),
    /// Placeholder for a resource that never completed.
    Pending,
}

impl StatementResult {
    /// The HTTP status this result contributes to the query status.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Response(response) => response.status_code,
            Self::Error(envelope) => envelope.status_code,
            Self::Pending => 408,
        }
    }
}

/// The error pseudo-response envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEnvelope {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub error: String,
}

/// A statement result, or the list a multiplexed statement produced.
/// The shape mirrors [`Resource`], so multiplexed responses zip back
/// positionally.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceResult {
    One(StatementResult),
    Many(Vec<ResourceResult>),
}

impl ResourceResult {
    /// Visits every statement result in the tree.
    pub fn for_each_result<'a>(&'a self, f: &mut impl FnMut(&'a StatementResult)) {
        match self {
            Self::One(result) => f(result),
            Self::Many(items) => {
                for item in items {
                    item.for_each_result(f);
                }
            }
        }
    }

    /// The maximum status code in the tree.
    #[must_use]
    pub fn max_status(&self) -> u16 {
        let mut max = 0;
        self.for_each_result(&mut |result| max = max.max(result.status_code()));
        max
    }
}

/// Results keyed by resource identifier, in declaration order.
pub type ResourceResults = IndexMap<ResourceId, ResourceResult>;

#[cfg(test)]
mod tests {
    use super::*;
    use fedql_syntax::parse_query;

    fn lower(source: &str) -> Query {
        Query::from_document(&parse_query(source).unwrap()).unwrap()
    }

    #[test]
    fn test_lower_minimal() {
        let query = lower("from hero");
        assert_eq!(query.statements.len(), 1);
        assert_eq!(query.statements[0].method, Method::From);
        assert_eq!(query.statements[0].resource_id(), ResourceId::from("hero"));
    }

    #[test]
    fn test_lower_use_clause() {
        let query = lower("use max-age 600\nuse timeout 50\nfrom hero");
        assert_eq!(query.modifiers.get("max-age"), Some(&Value::Int(600)));
        assert_eq!(query.timeout_ms(), Some(50));
    }

    #[test]
    fn test_lower_qualifiers() {
        let query = lower(
            "from hero as h with id = 1 timeout 100 max-age 400 hidden ignore-errors",
        );
        let statement = &query.statements[0];
        assert_eq!(statement.resource_id(), ResourceId::from("h"));
        assert!(statement.hidden);
        assert!(statement.ignore_errors);
        assert_eq!(statement.timeout_ms(), Some(100));
        assert_eq!(statement.cache_control.max_age_secs(), Some(400));
        assert_eq!(statement.with.items.get("id").unwrap().value, Value::Int(1));
    }

    #[test]
    fn test_duplicate_identifier_rejected() {
        let document = parse_query("from hero\nfrom hero").unwrap();
        let err = Query::from_document(&document).unwrap_err();
        assert!(matches!(err, QueryError::Validation(_)));
    }

    #[test]
    fn test_duplicate_resource_allowed_when_aliased() {
        let query = lower("from hero\nfrom hero as other");
        assert_eq!(query.statements.len(), 2);
    }

    #[test]
    fn test_method_http_verbs() {
        assert_eq!(Method::From.http_verb(), "GET");
        assert_eq!(Method::To.http_verb(), "PUT");
        assert_eq!(Method::Into.http_verb(), "POST");
        assert_eq!(Method::Update.http_verb(), "PATCH");
        assert_eq!(Method::Delete.http_verb(), "DELETE");
    }

    #[test]
    fn test_body_param_starts_as_variable() {
        let query = lower("to hero with $payload -> json");
        let body = query.statements[0].with.body.as_ref().unwrap();
        assert_eq!(body.value, Value::Variable("payload".into()));
        assert_eq!(body.encoder, Some(Encoder::Json));
    }
}
