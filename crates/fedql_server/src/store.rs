//! Persistence seams: saved query text and tenant mappings.
//!
//! Persistence itself is an external collaborator; the server only depends
//! on these traits. The in-memory implementations back tests and the CLI.

use async_trait::async_trait;
use fedql_runtime::QueryError;
use indexmap::IndexMap;
use std::collections::HashMap;

/// Looks up saved query text by namespace, id, and revision.
#[async_trait]
pub trait QueryStore: Send + Sync {
    async fn fetch_query(
        &self,
        namespace: &str,
        id: &str,
        revision: u64,
    ) -> Result<String, QueryError>;
}

/// Looks up a tenant's resource-to-URL mappings.
#[async_trait]
pub trait MappingsStore: Send + Sync {
    async fn fetch_mappings(&self, tenant: &str) -> Result<IndexMap<String, String>, QueryError>;
}

/// In-memory query storage.
#[derive(Debug, Default)]
pub struct InMemoryQueryStore {
    queries: HashMap<(String, String, u64), String>,
}

impl InMemoryQueryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a query revision.
    pub fn insert(
        &mut self,
        namespace: impl Into<String>,
        id: impl Into<String>,
        revision: u64,
        text: impl Into<String>,
    ) {
        self.queries
            .insert((namespace.into(), id.into(), revision), text.into());
    }
}

#[async_trait]
impl QueryStore for InMemoryQueryStore {
    async fn fetch_query(
        &self,
        namespace: &str,
        id: &str,
        revision: u64,
    ) -> Result<String, QueryError> {
        self.queries
            .get(&(namespace.to_string(), id.to_string(), revision))
            .cloned()
            .ok_or_else(|| {
                QueryError::NotFound(format!("query {namespace}/{id} revision {revision}"))
            })
    }
}

/// In-memory tenant mappings.
#[derive(Debug, Default)]
pub struct InMemoryMappingsStore {
    tenants: HashMap<String, IndexMap<String, String>>,
}

impl InMemoryMappingsStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores one resource mapping for a tenant.
    pub fn insert(
        &mut self,
        tenant: impl Into<String>,
        resource: impl Into<String>,
        url: impl Into<String>,
    ) {
        self.tenants
            .entry(tenant.into())
            .or_default()
            .insert(resource.into(), url.into());
    }
}

#[async_trait]
impl MappingsStore for InMemoryMappingsStore {
    async fn fetch_mappings(&self, tenant: &str) -> Result<IndexMap<String, String>, QueryError> {
        self.tenants
            .get(tenant)
            .cloned()
            .ok_or_else(|| QueryError::NotFound(format!("mappings for tenant {tenant}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_query_store_round_trip() {
        let mut store = InMemoryQueryStore::new();
        store.insert("demo", "hero-detail", 1, "from hero");

        let text = store.fetch_query("demo", "hero-detail", 1).await.unwrap();
        assert_eq!(text, "from hero");

        let err = store.fetch_query("demo", "hero-detail", 2).await.unwrap_err();
        assert!(matches!(err, QueryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_mappings_store_round_trip() {
        let mut store = InMemoryMappingsStore::new();
        store.insert("acme", "hero", "http://hero.api/hero/:id");

        let mappings = store.fetch_mappings("acme").await.unwrap();
        assert_eq!(mappings["hero"], "http://hero.api/hero/:id");

        let err = store.fetch_mappings("other").await.unwrap_err();
        assert!(matches!(err, QueryError::NotFound(_)));
    }
}
