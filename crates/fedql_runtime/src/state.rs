//! Per-resource lifecycle tracking during query execution.
//!
//! Every resource moves `pending -> requested -> done`. The state is
//! mutated only by the scheduler; the coordinator reads a snapshot after
//! cancellation to surface partial results.

use crate::query::{
    Resource, ResourceId, ResourceResult, ResourceResults, Resources, StatementResult,
};
use crate::resolver::resource_dependencies;
use std::collections::HashSet;

/// The lifecycle phase of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceStatus {
    /// Waiting on chain dependencies.
    Pending,
    /// Handed to the dispatcher.
    Requested,
    /// Response stored; terminal.
    Done,
}

/// Execution state for one query.
#[derive(Debug)]
pub struct State {
    resources: Resources,
    ids: HashSet<String>,
    status: indexmap::IndexMap<ResourceId, ResourceStatus>,
    results: ResourceResults,
}

impl State {
    /// Creates the state for a set of initialized resources.
    #[must_use]
    pub fn new(resources: Resources) -> Self {
        let ids = resources.keys().map(|id| id.0.clone()).collect();
        let status = resources
            .keys()
            .map(|id| (id.clone(), ResourceStatus::Pending))
            .collect();
        Self {
            resources,
            ids,
            status,
            results: ResourceResults::new(),
        }
    }

    /// Returns the pending resources whose chain dependencies are all done,
    /// in declaration order.
    ///
    /// A resource that left `pending` is never handed back.
    #[must_use]
    pub fn available(&self) -> Resources {
        self.resources
            .iter()
            .filter(|(id, resource)| {
                self.status[*id] == ResourceStatus::Pending
                    && resource_dependencies(resource, &self.ids)
                        .iter()
                        .all(|dep| self.status.get(dep) == Some(&ResourceStatus::Done))
            })
            .map(|(id, resource)| (id.clone(), resource.clone()))
            .collect()
    }

    /// Transitions a resource from pending to requested.
    pub fn set_as_requested(&mut self, id: &ResourceId) {
        if let Some(status) = self.status.get_mut(id) {
            debug_assert_eq!(*status, ResourceStatus::Pending, "{id} requested twice");
            *status = ResourceStatus::Requested;
        }
    }

    /// Stores a result and transitions the resource to done.
    ///
    /// Calling this for a resource that was never requested is a programmer
    /// error.
    pub fn update_done(&mut self, id: ResourceId, result: ResourceResult) {
        let status = self.status.get_mut(&id);
        debug_assert_eq!(
            status.as_deref().copied(),
            Some(ResourceStatus::Requested),
            "{id} completed without being requested"
        );
        if let Some(status) = status {
            *status = ResourceStatus::Done;
        }
        self.results.insert(id, result);
    }

    /// True once every resource is terminal.
    #[must_use]
    pub fn has_finished(&self) -> bool {
        self.status
            .values()
            .all(|status| *status == ResourceStatus::Done)
    }

    /// The completed results, keyed by resource identifier.
    #[must_use]
    pub fn done(&self) -> ResourceResults {
        self.results.clone()
    }

    /// A snapshot over every resource in declaration order; resources that
    /// never completed hold a pending placeholder.
    #[must_use]
    pub fn snapshot(&self) -> ResourceResults {
        self.resources
            .keys()
            .map(|id| {
                let result = self
                    .results
                    .get(id)
                    .cloned()
                    .unwrap_or(ResourceResult::One(StatementResult::Pending));
                (id.clone(), result)
            })
            .collect()
    }

    /// The statement tree for a resource, if known.
    #[must_use]
    pub fn resource(&self, id: &ResourceId) -> Option<&Resource> {
        self.resources.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{resources_from_query, Query, StatementResult};
    use crate::resolver::resolve_variables;
    use crate::transport::HttpResponse;
    use fedql_syntax::parse_query;
    use indexmap::IndexMap;
    use std::time::Duration;

    fn state_for(source: &str) -> State {
        let query = Query::from_document(&parse_query(source).unwrap()).unwrap();
        let resources = resolve_variables(
            resources_from_query(&query),
            &crate::query::QueryInput::default(),
        );
        State::new(resources)
    }

    fn ok_result() -> ResourceResult {
        ResourceResult::One(StatementResult::Response(HttpResponse {
            status_code: 200,
            body: fedql_core::Value::Null,
            headers: IndexMap::new(),
            duration: Duration::from_millis(1),
        }))
    }

    #[test]
    fn test_independent_resources_all_available() {
        let state = state_for("from hero\nfrom villain");
        assert_eq!(state.available().len(), 2);
    }

    #[test]
    fn test_dependent_resource_waits() {
        let mut state = state_for("from hero\nfrom sidekick with id = hero.sidekickId");
        let available = state.available();
        assert_eq!(available.len(), 1);
        assert!(available.contains_key(&ResourceId::from("hero")));

        state.set_as_requested(&ResourceId::from("hero"));
        // Requested but not done: dependent still waits, hero not re-issued.
        assert!(state.available().is_empty());

        state.update_done(ResourceId::from("hero"), ok_result());
        let available = state.available();
        assert_eq!(available.len(), 1);
        assert!(available.contains_key(&ResourceId::from("sidekick")));
    }

    #[test]
    fn test_has_finished() {
        let mut state = state_for("from hero");
        assert!(!state.has_finished());

        state.set_as_requested(&ResourceId::from("hero"));
        assert!(!state.has_finished());

        state.update_done(ResourceId::from("hero"), ok_result());
        assert!(state.has_finished());
    }

    #[test]
    fn test_snapshot_fills_placeholders() {
        let mut state = state_for("from hero\nfrom villain");
        state.set_as_requested(&ResourceId::from("hero"));
        state.update_done(ResourceId::from("hero"), ok_result());

        let snapshot = state.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(
            snapshot[&ResourceId::from("villain")],
            ResourceResult::One(StatementResult::Pending)
        );
    }

    #[test]
    fn test_available_preserves_declaration_order() {
        let state = state_for("from a\nfrom b\nfrom c");
        let ids: Vec<String> = state.available().keys().map(|id| id.0.clone()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
