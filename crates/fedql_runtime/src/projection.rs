//! Final-output shaping: field selection, hidden elision, and the
//! aggregate status/cache headers derived from statement results.

use crate::query::{
    FieldFilter, Modifiers, Query, ResourceResult, ResourceResults, Statement, StatementResult,
};
use fedql_core::{ObjectMap, Value};
use regex::Regex;
use tracing::warn;

/// Projects execution results into the response document.
///
/// Hidden statements are elided; `only` filters prune response bodies;
/// `in` paths nest a statement's result under the given dotted path. Error
/// envelopes render uniformly as `{statusCode, error}` objects.
#[must_use]
pub fn project(query: &Query, results: &ResourceResults) -> Value {
    let mut out = Value::Object(ObjectMap::new());

    for statement in &query.statements {
        if statement.hidden {
            continue;
        }
        let id = statement.resource_id();
        let rendered = match results.get(&id) {
            Some(result) => render_result(result, statement),
            None => Value::Null,
        };
        let path: Vec<String> = if statement.in_path.is_empty() {
            vec![id.0.clone()]
        } else {
            statement.in_path.clone()
        };
        insert_at_path(&mut out, &path, rendered);
    }

    out
}

fn render_result(result: &ResourceResult, statement: &Statement) -> Value {
    match result {
        ResourceResult::Many(items) => Value::List(
            items
                .iter()
                .map(|item| render_result(item, statement))
                .collect(),
        ),
        ResourceResult::One(StatementResult::Response(response)) => {
            apply_filters(&response.body, &statement.only)
        }
        ResourceResult::One(StatementResult::Error(envelope)) => {
            let mut entries = ObjectMap::new();
            entries.insert(
                "statusCode".to_string(),
                Value::Int(i64::from(envelope.status_code)),
            );
            entries.insert("error".to_string(), Value::String(envelope.error.clone()));
            Value::Object(entries)
        }
        ResourceResult::One(StatementResult::Pending) => Value::Null,
    }
}

fn apply_filters(body: &Value, filters: &[FieldFilter]) -> Value {
    if filters.is_empty() {
        return body.clone();
    }

    let mut out = Value::Null;
    for filter in filters {
        let regex = filter.matches.as_deref().and_then(|pattern| {
            match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    warn!(pattern, error = %e, "invalid matches() pattern, filter ungated");
                    None
                }
            }
        });

        let Some(selected) = select_path(body, &filter.path) else {
            continue;
        };
        let selected = match &regex {
            Some(regex) => match apply_match(selected, regex) {
                Some(value) => value,
                None => continue,
            },
            None => selected,
        };
        insert_at_path(&mut out, &filter.path, selected);
    }

    match out {
        Value::Null => Value::Object(ObjectMap::new()),
        other => other,
    }
}

fn select_path(source: &Value, path: &[String]) -> Option<Value> {
    let Some(key) = path.first() else {
        return Some(source.clone());
    };
    match source {
        Value::Object(entries) => select_path(entries.get(key)?, &path[1..]),
        // Selection maps over list bodies, preserving shape.
        Value::List(items) => Some(Value::List(
            items
                .iter()
                .map(|item| select_path(item, path).unwrap_or(Value::Null))
                .collect(),
        )),
        _ => None,
    }
}

fn apply_match(value: Value, regex: &Regex) -> Option<Value> {
    match value {
        Value::List(items) => Some(Value::List(
            items
                .into_iter()
                .filter(|item| regex.is_match(&item.encode_text()))
                .collect(),
        )),
        Value::Object(_) => Some(value),
        scalar => regex.is_match(&scalar.encode_text()).then_some(scalar),
    }
}

/// Inserts a value at a dotted path, materializing objects along the way.
fn insert_at_path(target: &mut Value, path: &[String], data: Value) {
    let Some(key) = path.first() else {
        *target = data;
        return;
    };

    if !matches!(target, Value::Object(_)) {
        *target = Value::Object(ObjectMap::new());
    }
    let Value::Object(entries) = target else {
        unreachable!("target coerced to object above");
    };

    if path.len() == 1 {
        entries.insert(key.clone(), data);
        return;
    }

    let slot = entries
        .entry(key.clone())
        .or_insert_with(|| Value::Object(ObjectMap::new()));
    insert_at_path(slot, &path[1..], data);
}

/// The overall HTTP status for a query response: the maximum across
/// non-hidden statement results, with `ignore-errors` statements counting
/// as 200 so their failures do not fail the response.
#[must_use]
pub fn calculate_status_code(query: &Query, results: &ResourceResults) -> u16 {
    let mut max = 200;
    for statement in &query.statements {
        if statement.hidden {
            continue;
        }
        let Some(result) = results.get(&statement.resource_id()) else {
            continue;
        };
        let status = if statement.ignore_errors {
            200
        } else {
            result.max_status()
        };
        max = max.max(status);
    }
    max
}

/// The upstream `Cache-Control` header: the minimum `max-age` and
/// `s-maxage` across non-hidden statements, with query-level modifiers
/// filling statements that set neither.
#[must_use]
pub fn cache_control_header(query: &Query) -> Option<String> {
    let use_max_age = int_modifier(&query.modifiers, "max-age")
        .or_else(|| int_modifier(&query.modifiers, "cache-control"));
    let use_s_max_age = int_modifier(&query.modifiers, "s-max-age");

    let mut max_age: Option<i64> = None;
    let mut s_max_age: Option<i64> = None;
    for statement in &query.statements {
        if statement.hidden {
            continue;
        }
        if let Some(age) = statement.cache_control.max_age_secs().or(use_max_age) {
            max_age = Some(max_age.map_or(age, |current| current.min(age)));
        }
        if let Some(age) = statement.cache_control.s_max_age_secs().or(use_s_max_age) {
            s_max_age = Some(s_max_age.map_or(age, |current| current.min(age)));
        }
    }

    let mut parts = Vec::new();
    if let Some(age) = max_age {
        parts.push(format!("max-age={age}"));
    }
    if let Some(age) = s_max_age {
        parts.push(format!("s-maxage={age}"));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

fn int_modifier(modifiers: &Modifiers, key: &str) -> Option<i64> {
    match modifiers.get(key) {
        Some(Value::Int(i)) => Some(*i),
        _ => None,
    }
}
