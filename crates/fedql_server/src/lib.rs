//! HTTP front end for fedql.
//!
//! - `config`: server configuration and env loading
//! - `http`: hyper service with the run-query and validate-query routes
//! - `store`: persistence seams for saved queries and tenant mappings

pub mod config;
pub mod http;
pub mod store;

pub use config::ServerConfig;
pub use http::{QueryServer, ServerError};
pub use store::{InMemoryMappingsStore, InMemoryQueryStore, MappingsStore, QueryStore};
