//! Hyper front end: saved-query execution and validation endpoints.
//!
//! Routes:
//! - `POST /run-query/:namespace/:queryId/:revision?tenant=<t>` — run a
//!   saved query; inputs come from the query string (repeated keys become
//!   lists) and request headers.
//! - `POST /validate-query` — parse-check raw query text.
//! - `GET /health` — liveness probe.

use crate::config::ServerConfig;
use crate::store::{MappingsStore, QueryStore};
use bytes::Bytes;
use fedql_core::Value;
use fedql_runtime::{
    cache_control_header, calculate_status_code, project, HttpTransport, Query, QueryContext,
    QueryError, QueryInput, Runner, Transport,
};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::HeaderMap;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use indexmap::IndexMap;
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// A fatal server-level failure.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid bind address: {0}")]
    InvalidAddress(String),
    #[error("failed to bind: {0}")]
    Bind(std::io::Error),
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),
    #[error("transport setup failed: {0}")]
    Transport(#[from] fedql_runtime::TransportError),
}

#[derive(Debug, Serialize)]
struct MessageBody {
    message: String,
}

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

fn full<T: Into<Bytes>>(chunk: T) -> BoxBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

fn json_response<T: Serialize>(status: StatusCode, data: &T) -> Response<BoxBody> {
    let body = serde_json::to_string(data).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(full(body))
        .expect("static response parts")
}

fn message_response(status: StatusCode, message: &str) -> Response<BoxBody> {
    json_response(
        status,
        &MessageBody {
            message: message.to_string(),
        },
    )
}

/// The query server: configuration, runner, and persistence seams.
pub struct QueryServer {
    config: ServerConfig,
    runner: Runner,
    query_store: Arc<dyn QueryStore>,
    mappings_store: Arc<dyn MappingsStore>,
}

impl QueryServer {
    /// Creates a server backed by the production HTTP transport.
    pub fn new(
        config: ServerConfig,
        query_store: Arc<dyn QueryStore>,
        mappings_store: Arc<dyn MappingsStore>,
    ) -> Result<Self, ServerError> {
        let transport = Arc::new(HttpTransport::new(&config.transport)?);
        Ok(Self::with_transport(
            config,
            transport,
            query_store,
            mappings_store,
        ))
    }

    /// Creates a server over an arbitrary transport.
    pub fn with_transport(
        config: ServerConfig,
        transport: Arc<dyn Transport>,
        query_store: Arc<dyn QueryStore>,
        mappings_store: Arc<dyn MappingsStore>,
    ) -> Self {
        let runner = Runner::new(transport, config.global_query_timeout);
        Self {
            config,
            runner,
            query_store,
            mappings_store,
        }
    }

    /// Accepts connections until the listener fails.
    pub async fn serve(self: Arc<Self>) -> Result<(), ServerError> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|_| {
                ServerError::InvalidAddress(format!(
                    "{}:{}",
                    self.config.host, self.config.port
                ))
            })?;

        let listener = TcpListener::bind(addr).await.map_err(ServerError::Bind)?;
        info!("listening on http://{addr}");

        loop {
            let (stream, _) = listener.accept().await.map_err(ServerError::Accept)?;
            let io = TokioIo::new(stream);
            let server = Arc::clone(&self);

            tokio::spawn(async move {
                let service = service_fn(|req: Request<Incoming>| {
                    let server = Arc::clone(&server);
                    async move {
                        let (parts, body) = req.into_parts();
                        let body_bytes = body
                            .collect()
                            .await
                            .map(|collected| collected.to_bytes())
                            .unwrap_or_default();
                        let response = server
                            .route(parts.method, parts.uri, parts.headers, body_bytes)
                            .await;
                        Ok::<_, Infallible>(response)
                    }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    if !err.to_string().contains("connection closed") {
                        error!("connection error: {err:?}");
                    }
                }
            });
        }
    }

    /// Routes one request. Split from the socket loop so handlers are
    /// testable without a listener.
    pub async fn route(
        &self,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
    ) -> Response<BoxBody> {
        let path = uri.path().to_string();
        match (method, path.as_str()) {
            (Method::GET, "/health") => Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "application/json")
                .body(full(r#"{"status":"healthy"}"#))
                .expect("static response parts"),

            (Method::POST, "/validate-query") => self.validate_query(&body),

            (Method::POST, _) if path.starts_with("/run-query/") => {
                self.run_saved_query(&uri, &headers).await
            }

            _ => message_response(StatusCode::NOT_FOUND, "not found"),
        }
    }

    fn validate_query(&self, body: &Bytes) -> Response<BoxBody> {
        let text = String::from_utf8_lossy(body);
        match fedql_syntax::parse_query(&text) {
            Ok(_) => message_response(StatusCode::OK, "valid query"),
            Err(err) => {
                debug!(error = %err, "query failed validation");
                message_response(StatusCode::UNPROCESSABLE_ENTITY, "invalid query")
            }
        }
    }

    async fn run_saved_query(&self, uri: &Uri, headers: &HeaderMap) -> Response<BoxBody> {
        let options = match self.parse_options(uri) {
            Ok(options) => options,
            Err(message) => {
                return message_response(StatusCode::UNPROCESSABLE_ENTITY, &message);
            }
        };

        let input = make_input(uri, headers);

        let text = match self
            .query_store
            .fetch_query(&options.namespace, &options.id, options.revision)
            .await
        {
            Ok(text) => text,
            Err(err) => return self.error_response(&err),
        };

        // Saved queries were validated on write; a parse failure here is an
        // internal inconsistency.
        let query = match Query::parse(&text) {
            Ok(query) => query,
            Err(err) => {
                error!(error = %err, "stored query failed to parse");
                return message_response(StatusCode::INTERNAL_SERVER_ERROR, "invalid stored query");
            }
        };

        let mappings = match self.mappings_store.fetch_mappings(&options.tenant).await {
            Ok(mappings) => mappings,
            Err(err) => return self.error_response(&err),
        };

        let ctx = QueryContext {
            input,
            mappings,
            tenant: options.tenant.clone(),
        };

        match self.runner.execute_query(query.clone(), ctx).await {
            Ok(results) => {
                let status = StatusCode::from_u16(calculate_status_code(&query, &results))
                    .unwrap_or(StatusCode::OK);
                let document = project(&query, &results);

                let mut builder = Response::builder()
                    .status(status)
                    .header("Content-Type", "application/json");
                if let Some(cache) = cache_control_header(&query) {
                    builder = builder.header("Cache-Control", cache);
                }
                builder
                    .body(full(document.to_json().to_string()))
                    .expect("static response parts")
            }
            // The deadline surfaces whatever completed, as a 200.
            Err(QueryError::Timeout { partial }) => {
                let document = project(&query, &partial);
                json_response(StatusCode::OK, &document)
            }
            Err(err) => self.error_response(&err),
        }
    }

    fn parse_options(&self, uri: &Uri) -> Result<QueryOptions, String> {
        let mut segments = uri
            .path()
            .trim_start_matches("/run-query/")
            .split('/')
            .filter(|s| !s.is_empty());

        let namespace = segments.next().ok_or("missing namespace")?.to_string();
        let id = segments.next().ok_or("missing query id")?.to_string();
        let revision_str = segments.next().ok_or("missing revision")?;
        let revision: u64 = revision_str
            .parse()
            .map_err(|_| "invalid revision: must be an integer".to_string())?;
        if revision == 0 {
            return Err("invalid revision: must be positive".to_string());
        }

        let tenant = match &self.config.tenant_override {
            Some(tenant) => tenant.clone(),
            None => query_args(uri)
                .into_iter()
                .find(|(key, _)| key == "tenant")
                .map(|(_, value)| value)
                .filter(|tenant| !tenant.is_empty())
                .ok_or("invalid tenant: no value provided")?,
        };

        Ok(QueryOptions {
            namespace,
            id,
            revision,
            tenant,
        })
    }

    fn error_response(&self, err: &QueryError) -> Response<BoxBody> {
        let status = match err {
            QueryError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            QueryError::NotFound(_) => StatusCode::NOT_FOUND,
            QueryError::Parse(_) => StatusCode::INTERNAL_SERVER_ERROR,
            QueryError::Timeout { .. } => StatusCode::OK,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        debug!(error = %err, status = status.as_u16(), "query failed");
        message_response(status, &err.to_string())
    }
}

/// Identifies one saved query revision for one tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
struct QueryOptions {
    namespace: String,
    id: String,
    revision: u64,
    tenant: String,
}

fn query_args(uri: &Uri) -> Vec<(String, String)> {
    let Some(query) = uri.query() else {
        return Vec::new();
    };
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect()
}

/// Builds the statement input: query-string parameters (repeated keys
/// become lists) plus request headers.
fn make_input(uri: &Uri, headers: &HeaderMap) -> QueryInput {
    let mut params: IndexMap<String, Value> = IndexMap::new();
    for (key, value) in query_args(uri) {
        if key == "tenant" {
            continue;
        }
        let value = Value::String(value);
        match params.entry(key) {
            indexmap::map::Entry::Vacant(entry) => {
                entry.insert(value);
            }
            indexmap::map::Entry::Occupied(mut entry) => match entry.get_mut() {
                Value::List(items) => items.push(value),
                existing => {
                    let first = std::mem::take(existing);
                    *existing = Value::List(vec![first, value]);
                }
            },
        }
    }

    let headers = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect();

    QueryInput { params, headers }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryMappingsStore, InMemoryQueryStore};
    use async_trait::async_trait;
    use fedql_runtime::{HttpRequest, HttpResponse, TransportError};
    use std::time::Duration;

    struct EchoTransport;

    #[async_trait]
    impl Transport for EchoTransport {
        async fn do_request(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            Ok(HttpResponse {
                status_code: 200,
                body: Value::from_json(&serde_json::json!({"path": request.path})),
                headers: IndexMap::new(),
                duration: Duration::from_millis(1),
            })
        }
    }

    fn server(config: ServerConfig) -> QueryServer {
        let mut queries = InMemoryQueryStore::new();
        queries.insert("demo", "hero-detail", 1, "from hero");

        let mut mappings = InMemoryMappingsStore::new();
        mappings.insert("acme", "hero", "http://hero.api/hero");

        QueryServer::with_transport(
            config,
            Arc::new(EchoTransport),
            Arc::new(queries),
            Arc::new(mappings),
        )
    }

    async fn body_json(response: Response<BoxBody>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_validate_query_ok() {
        let server = server(ServerConfig::default());
        let response = server
            .route(
                Method::POST,
                Uri::from_static("/validate-query"),
                HeaderMap::new(),
                Bytes::from_static(b"from hero"),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"message": "valid query"})
        );
    }

    #[tokio::test]
    async fn test_validate_query_invalid() {
        let server = server(ServerConfig::default());
        let response = server
            .route(
                Method::POST,
                Uri::from_static("/validate-query"),
                HeaderMap::new(),
                Bytes::from_static(b"from = broken"),
            )
            .await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"message": "invalid query"})
        );
    }

    #[tokio::test]
    async fn test_run_saved_query() {
        let server = server(ServerConfig::default());
        let response = server
            .route(
                Method::POST,
                Uri::from_static("/run-query/demo/hero-detail/1?tenant=acme"),
                HeaderMap::new(),
                Bytes::new(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"hero": {"path": "/hero"}})
        );
    }

    #[tokio::test]
    async fn test_invalid_revision_is_unprocessable() {
        let server = server(ServerConfig::default());
        let response = server
            .route(
                Method::POST,
                Uri::from_static("/run-query/demo/hero-detail/first?tenant=acme"),
                HeaderMap::new(),
                Bytes::new(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_missing_tenant_is_unprocessable() {
        let server = server(ServerConfig::default());
        let response = server
            .route(
                Method::POST,
                Uri::from_static("/run-query/demo/hero-detail/1"),
                HeaderMap::new(),
                Bytes::new(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_tenant_env_override_wins() {
        let server = server(ServerConfig::default().with_tenant("acme"));
        let response = server
            .route(
                Method::POST,
                Uri::from_static("/run-query/demo/hero-detail/1?tenant=ignored"),
                HeaderMap::new(),
                Bytes::new(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_query_is_not_found() {
        let server = server(ServerConfig::default());
        let response = server
            .route(
                Method::POST,
                Uri::from_static("/run-query/demo/missing/1?tenant=acme"),
                HeaderMap::new(),
                Bytes::new(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_repeated_params_become_lists() {
        let uri = Uri::from_static("/run-query/a/b/1?id=1&id=2&name=x&tenant=acme");
        let input = make_input(&uri, &HeaderMap::new());

        assert_eq!(
            input.params["id"],
            Value::List(vec![Value::from("1"), Value::from("2")])
        );
        assert_eq!(input.params["name"], Value::from("x"));
        assert!(!input.params.contains_key("tenant"));
    }
}
