//! Query runtime for fedql.
//!
//! This crate turns parsed queries into concurrent HTTP calls:
//! - `query`: domain model and AST lowering
//! - `resolver`: variable substitution and chain handling
//! - `modifiers`: `use` clause application and parameter encoders
//! - `multiplex`: list-parameter expansion
//! - `state`: per-resource lifecycle
//! - `runner`: scheduler, dispatcher, and coordinator
//! - `executor`: statement-to-request assembly
//! - `transport`: the HTTP seam and production client
//! - `projection`: output shaping and response composition
//! - `error`: the execution error taxonomy

pub mod error;
pub mod executor;
pub mod modifiers;
pub mod multiplex;
pub mod projection;
pub mod query;
pub mod resolver;
pub mod runner;
pub mod state;
pub mod transport;

pub use error::{QueryError, TransportError};
pub use executor::{StatementExecutor, DEFAULT_STATEMENT_TIMEOUT};
pub use projection::{cache_control_header, calculate_status_code, project};
pub use query::{
    CacheControl, ErrorEnvelope, Method, Modifiers, Query, QueryContext, QueryInput, Resource,
    ResourceId, ResourceResult, ResourceResults, Resources, Statement, StatementResult,
};
pub use runner::{initialize_resources, Runner};
pub use state::{ResourceStatus, State};
pub use transport::{
    HttpRequest, HttpResponse, HttpTransport, LifecyclePlugin, Transport, TransportConfig,
};
