//! Variable substitution and cross-statement reference handling.
//!
//! Resolution happens in two moments. At initialization,
//! [`resolve_variables`] substitutes `$var` occurrences from request input
//! and [`validate_chained_values`] checks that every chain targets a known
//! resource and that the dependency graph is acyclic. While the query runs,
//! the scheduler calls [`resolve_chained_values`] on each batch of newly
//! available statements, replacing chains with values extracted from
//! completed responses.

use crate::error::QueryError;
use crate::query::{
    QueryInput, Resource, ResourceId, ResourceResult, ResourceResults, Resources, Statement,
    StatementResult,
};
use fedql_core::{ChainLink, Value};
use std::collections::{HashMap, HashSet};

/// Substitutes `$var` references from request input.
///
/// A variable with no input value becomes a single-link chain when its name
/// matches a resource identifier, and `Null` otherwise; a missing optional
/// input is not an error. Variable links inside chain paths are substituted
/// the same way.
#[must_use]
pub fn resolve_variables(mut resources: Resources, input: &QueryInput) -> Resources {
    let ids: HashSet<String> = resources.keys().map(|id| id.0.clone()).collect();

    for resource in resources.values_mut() {
        resource.map_statements(&mut |statement| {
            resolve_statement(statement, input, &ids);
        });
    }
    resources
}

fn resolve_statement(statement: &mut Statement, input: &QueryInput, ids: &HashSet<String>) {
    for param in statement.with.items.values_mut() {
        let value = std::mem::take(&mut param.value);
        param.value = resolve_value(value, input, ids);
    }
    if let Some(body) = &mut statement.with.body {
        let value = std::mem::take(&mut body.value);
        body.value = resolve_value(value, input, ids);
    }
    for value in statement.headers.values_mut() {
        let taken = std::mem::take(value);
        *value = resolve_scalar(taken, input);
    }
    if let Some(timeout) = statement.timeout.take() {
        statement.timeout = Some(resolve_scalar(timeout, input));
    }
    if let Some(max_age) = statement.cache_control.max_age.take() {
        statement.cache_control.max_age = Some(resolve_scalar(max_age, input));
    }
    if let Some(s_max_age) = statement.cache_control.s_max_age.take() {
        statement.cache_control.s_max_age = Some(resolve_scalar(s_max_age, input));
    }
}

fn resolve_value(value: Value, input: &QueryInput, ids: &HashSet<String>) -> Value {
    match value {
        Value::Variable(name) => match input.params.get(&name) {
            Some(param) => param.clone(),
            None if ids.contains(&name) => Value::Chain(vec![ChainLink::Key(name)]),
            None => Value::Null,
        },
        Value::Chain(links) => Value::Chain(
            links
                .into_iter()
                .map(|link| match link {
                    ChainLink::Var(name) => match input.params.get(&name) {
                        Some(param) => ChainLink::Key(param.encode_text()),
                        None => ChainLink::Var(name),
                    },
                    key => key,
                })
                .collect(),
        ),
        Value::List(items) => Value::List(
            items
                .into_iter()
                .map(|item| resolve_value(item, input, ids))
                .collect(),
        ),
        Value::Object(entries) => Value::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k, resolve_value(v, input, ids)))
                .collect(),
        ),
        other => other,
    }
}

/// Resolves a variable in a position where chains are not meaningful
/// (headers, timeout, cache qualifiers).
fn resolve_scalar(value: Value, input: &QueryInput) -> Value {
    match value {
        Value::Variable(name) => input.params.get(&name).cloned().unwrap_or(Value::Null),
        other => other,
    }
}

/// Collects the resource identifiers a statement's chains depend on.
#[must_use]
pub fn statement_dependencies(statement: &Statement, ids: &HashSet<String>) -> HashSet<ResourceId> {
    let mut deps = HashSet::new();
    let mut visit = |value: &Value| {
        for links in collect_chains(value) {
            if let Some(ChainLink::Key(head)) = links.first() {
                if ids.contains(head) {
                    deps.insert(ResourceId(head.clone()));
                }
            }
        }
    };
    for param in statement.with.items.values() {
        visit(&param.value);
    }
    if let Some(body) = &statement.with.body {
        visit(&body.value);
    }
    for value in statement.headers.values() {
        visit(value);
    }
    deps
}

/// Collects the identifiers a resource tree depends on.
#[must_use]
pub fn resource_dependencies(resource: &Resource, ids: &HashSet<String>) -> HashSet<ResourceId> {
    let mut deps = HashSet::new();
    resource.for_each_statement(&mut |statement| {
        deps.extend(statement_dependencies(statement, ids));
    });
    deps
}

/// Checks that every chain targets a resource and that chains form a DAG.
pub fn validate_chained_values(resources: &Resources) -> Result<(), QueryError> {
    let ids: HashSet<String> = resources.keys().map(|id| id.0.clone()).collect();

    for (id, resource) in resources {
        let mut problem = None;
        resource.for_each_statement(&mut |statement| {
            if problem.is_some() {
                return;
            }
            for param in statement.with.items.values() {
                for links in collect_chains(&param.value) {
                    match links.first() {
                        Some(ChainLink::Key(head)) if ids.contains(head) => {}
                        Some(ChainLink::Key(head)) => {
                            problem = Some(format!(
                                "statement {id} references unknown resource {head}"
                            ));
                        }
                        Some(ChainLink::Var(name)) => {
                            problem = Some(format!(
                                "statement {id} chains through unresolved variable ${name}"
                            ));
                        }
                        None => {}
                    }
                }
            }
        });
        if let Some(message) = problem {
            return Err(QueryError::Validation(message));
        }
    }

    detect_cycles(resources, &ids)
}

fn detect_cycles(resources: &Resources, ids: &HashSet<String>) -> Result<(), QueryError> {
    let graph: HashMap<ResourceId, HashSet<ResourceId>> = resources
        .iter()
        .map(|(id, resource)| (id.clone(), resource_dependencies(resource, ids)))
        .collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        id: &ResourceId,
        graph: &HashMap<ResourceId, HashSet<ResourceId>>,
        marks: &mut HashMap<ResourceId, Mark>,
        trail: &mut Vec<ResourceId>,
    ) -> Result<(), QueryError> {
        match marks.get(id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let mut cycle: Vec<String> = trail
                    .iter()
                    .skip_while(|t| *t != id)
                    .map(|t| t.0.clone())
                    .collect();
                cycle.push(id.0.clone());
                return Err(QueryError::Validation(format!(
                    "circular chained dependency: {}",
                    cycle.join(" -> ")
                )));
            }
            None => {}
        }

        marks.insert(id.clone(), Mark::Visiting);
        trail.push(id.clone());
        if let Some(deps) = graph.get(id) {
            for dep in deps {
                visit(dep, graph, marks, trail)?;
            }
        }
        trail.pop();
        marks.insert(id.clone(), Mark::Done);
        Ok(())
    }

    let mut marks = HashMap::new();
    let mut trail = Vec::new();
    for id in graph.keys() {
        visit(id, &graph, &mut marks, &mut trail)?;
    }
    Ok(())
}

/// Replaces chain values with data extracted from completed responses.
///
/// A chain over a multiplexed dependency yields the list of per-element
/// extractions, in input order; missing paths yield `Null`.
#[must_use]
pub fn resolve_chained_values(mut resources: Resources, done: &ResourceResults) -> Resources {
    for resource in resources.values_mut() {
        resource.map_statements(&mut |statement| {
            for param in statement.with.items.values_mut() {
                let value = std::mem::take(&mut param.value);
                param.value = resolve_chain_value(value, done);
            }
            if let Some(body) = &mut statement.with.body {
                let value = std::mem::take(&mut body.value);
                body.value = resolve_chain_value(value, done);
            }
            for value in statement.headers.values_mut() {
                let taken = std::mem::take(value);
                *value = resolve_chain_value(taken, done);
            }
        });
    }
    resources
}

fn resolve_chain_value(value: Value, done: &ResourceResults) -> Value {
    match value {
        Value::Chain(links) => {
            let Some(ChainLink::Key(head)) = links.first() else {
                return Value::Null;
            };
            match done.get(&ResourceId(head.clone())) {
                Some(result) => extract(result, &links[1..]),
                None => Value::Chain(links),
            }
        }
        Value::List(items) => Value::List(
            items
                .into_iter()
                .map(|item| resolve_chain_value(item, done))
                .collect(),
        ),
        Value::Object(entries) => Value::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k, resolve_chain_value(v, done)))
                .collect(),
        ),
        other => other,
    }
}

fn extract(result: &ResourceResult, path: &[ChainLink]) -> Value {
    match result {
        ResourceResult::Many(items) => {
            Value::List(items.iter().map(|item| extract(item, path)).collect())
        }
        ResourceResult::One(StatementResult::Response(response)) => {
            lookup(&response.body, path)
        }
        ResourceResult::One(_) => Value::Null,
    }
}

fn lookup(value: &Value, path: &[ChainLink]) -> Value {
    let Some(link) = path.first() else {
        return value.clone();
    };
    let ChainLink::Key(key) = link else {
        return Value::Null;
    };
    match value {
        Value::Object(entries) => match entries.get(key) {
            Some(inner) => lookup(inner, &path[1..]),
            None => Value::Null,
        },
        // Chaining into a list body maps the lookup over its elements.
        Value::List(items) => Value::List(items.iter().map(|item| lookup(item, path)).collect()),
        _ => Value::Null,
    }
}

fn collect_chains(value: &Value) -> Vec<&[ChainLink]> {
    let mut out = Vec::new();
    collect_chains_into(value, &mut out);
    out
}

fn collect_chains_into<'a>(value: &'a Value, out: &mut Vec<&'a [ChainLink]>) {
    match value {
        Value::Chain(links) => out.push(links),
        Value::List(items) => {
            for item in items {
                collect_chains_into(item, out);
            }
        }
        Value::Object(entries) => {
            for entry in entries.values() {
                collect_chains_into(entry, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{resources_from_query, Query};
    use crate::transport::HttpResponse;
    use fedql_syntax::parse_query;
    use indexmap::IndexMap;
    use std::time::Duration;

    fn resources(source: &str) -> Resources {
        let query = Query::from_document(&parse_query(source).unwrap()).unwrap();
        resources_from_query(&query)
    }

    fn input(params: &[(&str, Value)]) -> QueryInput {
        QueryInput {
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            headers: IndexMap::new(),
        }
    }

    fn response_result(body: serde_json::Value) -> ResourceResult {
        ResourceResult::One(StatementResult::Response(HttpResponse {
            status_code: 200,
            body: Value::from_json(&body),
            headers: IndexMap::new(),
            duration: Duration::from_millis(1),
        }))
    }

    fn param_value(resources: &Resources, id: &str, key: &str) -> Value {
        let resource = resources.get(&ResourceId::from(id)).unwrap();
        resource.as_one().unwrap().with.items[key].value.clone()
    }

    #[test]
    fn test_resolve_variable_from_input() {
        let resolved = resolve_variables(
            resources("from hero with id = $id"),
            &input(&[("id", Value::Int(7))]),
        );
        assert_eq!(param_value(&resolved, "hero", "id"), Value::Int(7));
    }

    #[test]
    fn test_missing_variable_becomes_null() {
        let resolved = resolve_variables(resources("from hero with id = $id"), &input(&[]));
        assert_eq!(param_value(&resolved, "hero", "id"), Value::Null);
    }

    #[test]
    fn test_missing_variable_matching_resource_becomes_chain() {
        let resolved = resolve_variables(
            resources("from hero\nfrom sidekick with id = $hero"),
            &input(&[]),
        );
        assert_eq!(
            param_value(&resolved, "sidekick", "id"),
            Value::Chain(vec![ChainLink::Key("hero".into())])
        );
    }

    #[test]
    fn test_variable_chain_segment_substituted() {
        let resolved = resolve_variables(
            resources("from hero\nfrom sidekick with id = hero.$field"),
            &input(&[("field", Value::from("sidekickId"))]),
        );
        assert_eq!(
            param_value(&resolved, "sidekick", "id"),
            Value::Chain(vec![
                ChainLink::Key("hero".into()),
                ChainLink::Key("sidekickId".into()),
            ])
        );
    }

    #[test]
    fn test_validate_accepts_known_target() {
        let resolved = resolve_variables(
            resources("from hero\nfrom sidekick with id = hero.sidekickId"),
            &input(&[]),
        );
        assert!(validate_chained_values(&resolved).is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_target() {
        let resolved = resolve_variables(
            resources("from sidekick with id = villain.id"),
            &input(&[]),
        );
        let err = validate_chained_values(&resolved).unwrap_err();
        assert!(matches!(err, QueryError::Validation(_)));
        assert!(err.to_string().contains("villain"));
    }

    #[test]
    fn test_validate_rejects_cycle() {
        let resolved = resolve_variables(
            resources("from a with x = b.x\nfrom b with y = a.y"),
            &input(&[]),
        );
        let err = validate_chained_values(&resolved).unwrap_err();
        assert!(err.to_string().contains("circular"));
    }

    #[test]
    fn test_resolve_chain_from_done_response() {
        let resources = resolve_variables(
            resources("from hero\nfrom sidekick with id = hero.sidekickId"),
            &input(&[]),
        );
        let mut done = ResourceResults::new();
        done.insert(
            ResourceId::from("hero"),
            response_result(serde_json::json!({"sidekickId": 7})),
        );

        let mut sidekick = Resources::new();
        let id = ResourceId::from("sidekick");
        sidekick.insert(id.clone(), resources.get(&id).unwrap().clone());

        let resolved = resolve_chained_values(sidekick, &done);
        assert_eq!(param_value(&resolved, "sidekick", "id"), Value::Int(7));
    }

    #[test]
    fn test_resolve_chain_from_multiplexed_dependency() {
        let resources = resolve_variables(
            resources("from hero\nfrom sidekick with id = hero.sidekickId"),
            &input(&[]),
        );
        let mut done = ResourceResults::new();
        done.insert(
            ResourceId::from("hero"),
            ResourceResult::Many(vec![
                response_result(serde_json::json!({"sidekickId": 1})),
                response_result(serde_json::json!({"sidekickId": 2})),
            ]),
        );

        let mut sidekick = Resources::new();
        let id = ResourceId::from("sidekick");
        sidekick.insert(id.clone(), resources.get(&id).unwrap().clone());

        let resolved = resolve_chained_values(sidekick, &done);
        assert_eq!(
            param_value(&resolved, "sidekick", "id"),
            Value::List(vec![Value::Int(1), Value::Int(2)])
        );
    }

    #[test]
    fn test_missing_path_yields_null() {
        let mut done = ResourceResults::new();
        done.insert(
            ResourceId::from("hero"),
            response_result(serde_json::json!({"name": "A"})),
        );
        let resolved = resolve_chained_values(
            resolve_variables(
                resources("from hero\nfrom sidekick with id = hero.sidekickId"),
                &input(&[]),
            ),
            &done,
        );
        assert_eq!(param_value(&resolved, "sidekick", "id"), Value::Null);
    }

    #[test]
    fn test_dependencies() {
        let resolved = resolve_variables(
            resources("from hero\nfrom sidekick with id = hero.sidekickId"),
            &input(&[]),
        );
        let ids = resolved.keys().map(|id| id.0.clone()).collect();
        let deps = resource_dependencies(
            resolved.get(&ResourceId::from("sidekick")).unwrap(),
            &ids,
        );
        assert_eq!(deps.len(), 1);
        assert!(deps.contains(&ResourceId::from("hero")));
    }
}
