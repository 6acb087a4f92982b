//! HTTP transport contract and the production client.
//!
//! The engine talks to remote resources exclusively through [`Transport`],
//! so tests substitute scripted implementations. The production client is
//! built on `reqwest` with a pooled connection limit per host; statement
//! deadlines surface as the distinguished
//! [`TransportError::RequestTimeout`] so the executor wraps a
//! pseudo-response instead of failing the query.

use crate::error::TransportError;
use crate::query::Method;
use async_trait::async_trait;
use fedql_core::Value;
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// An outgoing statement request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub schema: String,
    pub host: String,
    pub path: String,
    pub method: Method,
    /// Query parameters; list values repeat the key.
    pub query: IndexMap<String, Vec<String>>,
    pub body: Option<Value>,
    pub headers: IndexMap<String, String>,
    pub timeout: Duration,
}

impl HttpRequest {
    /// The full request URL without the query string.
    #[must_use]
    pub fn url(&self) -> String {
        format!("{}://{}{}", self.schema, self.host, self.path)
    }
}

/// A statement response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status_code: u16,
    pub body: Value,
    pub headers: IndexMap<String, String>,
    pub duration: Duration,
}

/// The transport seam: performs one statement call.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn do_request(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Side-effect-only hooks around each transport call.
pub trait LifecyclePlugin: Send + Sync {
    /// Runs before the request is sent.
    fn before_request(&self, _request: &HttpRequest) {}

    /// Runs after the call completes, observing the response or error.
    fn after_request(
        &self,
        _request: &HttpRequest,
        _response: Option<&HttpResponse>,
        _error: Option<&TransportError>,
    ) {
    }
}

/// Configuration for the production client.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum idle pooled connections per host.
    pub max_conns_per_host: usize,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_conns_per_host: 128,
            connect_timeout: Duration::from_secs(2),
        }
    }
}

/// The production HTTP transport.
pub struct HttpTransport {
    client: reqwest::Client,
    plugins: Vec<Arc<dyn LifecyclePlugin>>,
}

impl HttpTransport {
    /// Creates a transport with the given configuration.
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent("fedql")
            .pool_max_idle_per_host(config.max_conns_per_host)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;

        Ok(Self {
            client,
            plugins: Vec::new(),
        })
    }

    /// Registers a lifecycle plugin.
    #[must_use]
    pub fn with_plugin(mut self, plugin: Arc<dyn LifecyclePlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = reqwest::Method::from_bytes(request.method.http_verb().as_bytes())
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let mut builder = self.client.request(method, request.url());

        let pairs: Vec<(&str, &str)> = request
            .query
            .iter()
            .flat_map(|(key, values)| values.iter().map(move |v| (key.as_str(), v.as_str())))
            .collect();
        if !pairs.is_empty() {
            builder = builder.query(&pairs);
        }

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(body) = &request.body {
            builder = builder.json(&body.to_json());
        }

        let start = Instant::now();
        let sent = builder.send();

        let response = match tokio::time::timeout(request.timeout, sent).await {
            Err(_) => {
                info!(
                    url = %request.url(),
                    method = request.method.http_verb(),
                    timeout_ms = request.timeout.as_millis() as u64,
                    "request timed out"
                );
                return Err(TransportError::RequestTimeout(request.timeout));
            }
            Ok(Err(e)) => return Err(TransportError::Request(e.to_string())),
            Ok(Ok(response)) => response,
        };

        let status_code = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();

        let bytes = match tokio::time::timeout(request.timeout, response.bytes()).await {
            Err(_) => return Err(TransportError::RequestTimeout(request.timeout)),
            Ok(Err(e)) => return Err(TransportError::Request(e.to_string())),
            Ok(Ok(bytes)) => bytes,
        };

        let body = parse_body(&bytes);
        let duration = start.elapsed();

        debug!(
            url = %request.url(),
            status = status_code,
            duration_ms = duration.as_millis() as u64,
            "request completed"
        );

        Ok(HttpResponse {
            status_code,
            body,
            headers,
            duration,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn do_request(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        for plugin in &self.plugins {
            plugin.before_request(&request);
        }

        let result = self.send(&request).await;

        for plugin in &self.plugins {
            plugin.after_request(&request, result.as_ref().ok(), result.as_ref().err());
        }

        result
    }
}

/// Parses a response body: JSON when it is, raw text otherwise.
fn parse_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(json) => Value::from_json(&json),
        Err(_) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_assembly() {
        let request = HttpRequest {
            schema: "http".into(),
            host: "hero.api".into(),
            path: "/hero/1".into(),
            method: Method::From,
            query: IndexMap::new(),
            body: None,
            headers: IndexMap::new(),
            timeout: Duration::from_millis(100),
        };
        assert_eq!(request.url(), "http://hero.api/hero/1");
    }

    #[test]
    fn test_parse_body_json_and_text() {
        assert_eq!(
            parse_body(br#"{"name":"A"}"#),
            Value::from_json(&serde_json::json!({"name": "A"}))
        );
        assert_eq!(parse_body(b"plain"), Value::String("plain".into()));
        assert_eq!(parse_body(b""), Value::Null);
    }
}
