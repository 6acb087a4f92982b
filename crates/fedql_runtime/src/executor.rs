//! Statement execution: request assembly and response folding.
//!
//! The executor turns an initialized statement into an [`HttpRequest`],
//! performs it through the transport, and folds the outcome into a
//! [`StatementResult`]. Statement deadlines and `ignore-errors` failures
//! become error pseudo-responses here; only errors that must abort the
//! query propagate.

use crate::error::{QueryError, TransportError};
use crate::query::{
    ErrorEnvelope, Method, QueryContext, Resource, ResourceResult, Statement, StatementResult,
};
use crate::transport::{HttpRequest, Transport};
use fedql_core::Value;
use indexmap::IndexMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default per-statement deadline when neither the statement nor the `use`
/// clause sets one.
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Executes statements through a transport.
pub struct StatementExecutor {
    transport: Arc<dyn Transport>,
}

impl StatementExecutor {
    /// Creates an executor over the given transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Executes a statement tree. Multiplexed branches run concurrently,
    /// one task per request, and results preserve input order.
    pub fn execute(
        self: Arc<Self>,
        resource: Resource,
        ctx: Arc<QueryContext>,
    ) -> Pin<Box<dyn Future<Output = Result<ResourceResult, QueryError>> + Send>> {
        Box::pin(async move {
            match resource {
                Resource::One(statement) => Ok(ResourceResult::One(
                    self.do_statement(&statement, &ctx).await?,
                )),
                Resource::Many(items) => {
                    let mut handles = Vec::with_capacity(items.len());
                    for item in items {
                        let executor = Arc::clone(&self);
                        let ctx = Arc::clone(&ctx);
                        handles.push(tokio::spawn(executor.execute(item, ctx)));
                    }

                    let mut results = Vec::with_capacity(handles.len());
                    for handle in handles {
                        let result = handle
                            .await
                            .map_err(|e| QueryError::Internal(e.to_string()))??;
                        results.push(result);
                    }
                    Ok(ResourceResult::Many(results))
                }
            }
        })
    }

    /// Executes one scalar statement.
    pub async fn do_statement(
        &self,
        statement: &Statement,
        ctx: &QueryContext,
    ) -> Result<StatementResult, QueryError> {
        let request = make_request(statement, ctx)?;
        debug!(
            resource = %statement.resource,
            url = %request.url(),
            method = request.method.http_verb(),
            "dispatching statement"
        );

        match self.transport.do_request(request).await {
            Ok(response) => Ok(StatementResult::Response(response)),
            Err(TransportError::RequestTimeout(timeout)) => {
                // A statement deadline never fails the query on its own.
                Ok(StatementResult::Error(ErrorEnvelope {
                    status_code: 408,
                    error: format!("request timed out after {}ms", timeout.as_millis()),
                }))
            }
            Err(err) if statement.ignore_errors => {
                warn!(resource = %statement.resource, error = %err, "statement failed, ignored");
                Ok(StatementResult::Error(ErrorEnvelope {
                    status_code: 500,
                    error: err.to_string(),
                }))
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Assembles the transport request for a statement.
///
/// The resource mapping is used as a URL template: every `:name` token in
/// its path is substituted from `with` (consuming the parameter), and the
/// remaining parameters become query-string entries, with list values
/// repeating the key.
pub fn make_request(
    statement: &Statement,
    ctx: &QueryContext,
) -> Result<HttpRequest, QueryError> {
    let template = ctx.mappings.get(&statement.resource).ok_or_else(|| {
        QueryError::NotFound(format!(
            "no mapping for resource {} (tenant {})",
            statement.resource, ctx.tenant
        ))
    })?;

    let (schema, rest) = template
        .split_once("://")
        .ok_or_else(|| TransportError::InvalidUrl(template.clone()))?;
    let (host, path) = match rest.split_once('/') {
        Some((host, path)) => (host.to_string(), format!("/{path}")),
        None => (rest.to_string(), "/".to_string()),
    };
    if host.is_empty() {
        return Err(TransportError::InvalidUrl(template.clone()).into());
    }

    let mut consumed: Vec<String> = Vec::new();
    let path = path
        .split('/')
        .map(|segment| match segment.strip_prefix(':') {
            Some(name) => match statement.with.items.get(name) {
                Some(param) if is_scalar(&param.value) => {
                    consumed.push(name.to_string());
                    param.value.encode_text()
                }
                // No matching parameter: the token stays verbatim.
                _ => segment.to_string(),
            },
            None => segment.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/");

    let mut query: IndexMap<String, Vec<String>> = IndexMap::new();
    for (key, param) in &statement.with.items {
        if consumed.iter().any(|c| c == key) {
            continue;
        }
        match &param.value {
            Value::Null | Value::Variable(_) | Value::Chain(_) => {}
            Value::List(items) => {
                let values = items
                    .iter()
                    .filter(|item| !item.is_null())
                    .map(Value::encode_text)
                    .collect::<Vec<_>>();
                if !values.is_empty() {
                    query.insert(key.clone(), values);
                }
            }
            value => {
                query.insert(key.clone(), vec![value.encode_text()]);
            }
        }
    }

    let body = match statement.method {
        Method::To | Method::Into | Method::Update => statement
            .with
            .body
            .as_ref()
            .map(|b| b.value.clone())
            .filter(|v| !v.is_null()),
        Method::From | Method::Delete => None,
    };

    let mut headers: IndexMap<String, String> = IndexMap::new();
    for (name, value) in &ctx.input.headers {
        let lowered = name.to_ascii_lowercase();
        if lowered == "host" || lowered == "content-length" {
            continue;
        }
        headers.insert(name.clone(), value.clone());
    }
    for (name, value) in &statement.headers {
        match value {
            Value::Null | Value::Variable(_) | Value::Chain(_) => {}
            value => {
                headers.insert(name.clone(), value.encode_text());
            }
        }
    }
    if body.is_some() {
        headers.insert("Content-Type".to_string(), "application/json".to_string());
    }

    let timeout = statement
        .timeout_ms()
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_STATEMENT_TIMEOUT);

    Ok(HttpRequest {
        schema: schema.to_string(),
        host,
        path,
        method: statement.method,
        query,
        body,
        headers,
        timeout,
    })
}

fn is_scalar(value: &Value) -> bool {
    matches!(
        value,
        Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::String(_)
    )
}
