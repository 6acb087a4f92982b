//! Standalone query server.
//!
//! Tenant mappings and saved queries are loaded from JSON files named by
//! `FEDQL_MAPPINGS` and `FEDQL_QUERIES`; `TENANT` and `FEDQL_PORT` are
//! honored as documented on `ServerConfig::from_env`.

use fedql_server::{InMemoryMappingsStore, InMemoryQueryStore, QueryServer, ServerConfig};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct SavedQuery {
    namespace: String,
    id: String,
    revision: u64,
    text: String,
}

fn load_mappings(store: &mut InMemoryMappingsStore) -> Result<usize, Box<dyn std::error::Error>> {
    let Ok(path) = std::env::var("FEDQL_MAPPINGS") else {
        return Ok(0);
    };
    let raw = std::fs::read_to_string(&path)?;
    let tenants: HashMap<String, HashMap<String, String>> = serde_json::from_str(&raw)?;

    let mut count = 0;
    for (tenant, resources) in tenants {
        for (resource, url) in resources {
            store.insert(&tenant, resource, url);
            count += 1;
        }
    }
    Ok(count)
}

fn load_queries(store: &mut InMemoryQueryStore) -> Result<usize, Box<dyn std::error::Error>> {
    let Ok(path) = std::env::var("FEDQL_QUERIES") else {
        return Ok(0);
    };
    let raw = std::fs::read_to_string(&path)?;
    let queries: Vec<SavedQuery> = serde_json::from_str(&raw)?;

    let count = queries.len();
    for query in queries {
        store.insert(query.namespace, query.id, query.revision, query.text);
    }
    Ok(count)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut mappings = InMemoryMappingsStore::new();
    let mapping_count = load_mappings(&mut mappings)?;

    let mut queries = InMemoryQueryStore::new();
    let query_count = load_queries(&mut queries)?;

    info!(mapping_count, query_count, "stores loaded");

    let config = ServerConfig::from_env();
    let server = QueryServer::new(config, Arc::new(queries), Arc::new(mappings))?;
    Arc::new(server).serve().await?;
    Ok(())
}
