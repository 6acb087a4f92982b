//! Query-level modifier application and per-parameter encoders.

use crate::query::{Encoder, Modifiers, Resources, Statement, WithParam};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use fedql_core::Value;

/// Applies the `use` clause to every statement.
///
/// Modifier values fill unset statement fields only; per-statement
/// qualifiers always win, which also makes application idempotent.
/// `cache-control` is accepted as an alias for `max-age`.
#[must_use]
pub fn apply_modifiers(mut resources: Resources, modifiers: &Modifiers) -> Resources {
    if modifiers.is_empty() {
        return resources;
    }

    let timeout = int_modifier(modifiers, "timeout");
    let max_age = int_modifier(modifiers, "max-age").or_else(|| int_modifier(modifiers, "cache-control"));
    let s_max_age = int_modifier(modifiers, "s-max-age");

    for resource in resources.values_mut() {
        resource.map_statements(&mut |statement| {
            if statement.timeout.is_none() {
                statement.timeout = timeout.map(Value::Int);
            }
            if statement.cache_control.max_age.is_none() {
                statement.cache_control.max_age = max_age.map(Value::Int);
            }
            if statement.cache_control.s_max_age.is_none() {
                statement.cache_control.s_max_age = s_max_age.map(Value::Int);
            }
        });
    }
    resources
}

fn int_modifier(modifiers: &Modifiers, key: &str) -> Option<i64> {
    match modifiers.get(key) {
        Some(Value::Int(i)) => Some(*i),
        _ => None,
    }
}

/// Applies per-parameter encoders across all statements.
///
/// `flatten` deep-flattens list values (and keeps its annotation, which
/// also suppresses multiplexing of the parameter). `base64` and `json`
/// rewrite the value and clear their annotation, so reapplying after chain
/// resolution never double-encodes. Values still carrying a chain are left
/// for the scheduler pass that runs once their dependency is done.
#[must_use]
pub fn apply_encoders(mut resources: Resources) -> Resources {
    for resource in resources.values_mut() {
        resource.map_statements(&mut encode_statement);
    }
    resources
}

fn encode_statement(statement: &mut Statement) {
    for param in statement.with.items.values_mut() {
        encode_param(param);
    }
    if let Some(body) = &mut statement.with.body {
        let mut param = WithParam {
            value: std::mem::take(&mut body.value),
            encoder: body.encoder,
        };
        encode_param(&mut param);
        body.value = param.value;
        body.encoder = param.encoder;
    }
}

fn encode_param(param: &mut WithParam) {
    let Some(encoder) = param.encoder else { return };

    if param.value.has_chain() {
        // Dependency data is not in yet; the scheduler reapplies encoders.
        return;
    }

    match encoder {
        Encoder::Flatten => {
            let value = std::mem::take(&mut param.value);
            param.value = flatten_value(value);
        }
        Encoder::Base64 => {
            if !param.value.is_null() {
                let value = std::mem::take(&mut param.value);
                param.value = map_elements(value, &|v| {
                    Value::String(STANDARD.encode(v.encode_text()))
                });
            }
            param.encoder = None;
        }
        Encoder::Json => {
            if !param.value.is_null() {
                let value = std::mem::take(&mut param.value);
                param.value = map_elements(value, &|v| Value::String(v.to_json().to_string()));
            }
            param.encoder = None;
        }
    }
}

/// Applies an encoding per element of a list, or to the whole value
/// otherwise. Per-element application is what lets encoders compose with
/// multiplexing.
fn map_elements(value: Value, f: &impl Fn(Value) -> Value) -> Value {
    match value {
        Value::List(items) => Value::List(items.into_iter().map(f).collect()),
        other => f(other),
    }
}

fn flatten_value(value: Value) -> Value {
    match value {
        Value::List(items) => {
            let mut flat = Vec::new();
            for item in items {
                flatten_into(item, &mut flat);
            }
            Value::List(flat)
        }
        other => other,
    }
}

fn flatten_into(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::List(items) => {
            for item in items {
                flatten_into(item, out);
            }
        }
        other => out.push(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Method, Resource, ResourceId, Statement};
    use fedql_core::ChainLink;

    fn hero_resources(statement: Statement) -> Resources {
        let mut resources = Resources::new();
        resources.insert(ResourceId::from("hero"), Resource::from(statement));
        resources
    }

    fn hero_statement(resources: &Resources) -> &Statement {
        resources[&ResourceId::from("hero")].as_one().unwrap()
    }

    fn with_param(mut statement: Statement, key: &str, value: Value, encoder: Option<Encoder>) -> Statement {
        statement
            .with
            .items
            .insert(key.to_string(), WithParam { value, encoder });
        statement
    }

    #[test]
    fn test_no_modifiers_is_noop() {
        let resources = hero_resources(Statement::new(Method::From, "hero"));
        let expected = resources.clone();
        assert_eq!(apply_modifiers(resources, &Modifiers::new()), expected);
    }

    #[test]
    fn test_max_age_applied() {
        let mut modifiers = Modifiers::new();
        modifiers.insert("max-age".into(), Value::Int(600));

        let resources = apply_modifiers(
            hero_resources(Statement::new(Method::From, "hero")),
            &modifiers,
        );
        assert_eq!(hero_statement(&resources).cache_control.max_age_secs(), Some(600));
    }

    #[test]
    fn test_max_age_does_not_overwrite() {
        let mut modifiers = Modifiers::new();
        modifiers.insert("max-age".into(), Value::Int(600));

        let mut statement = Statement::new(Method::From, "hero");
        statement.cache_control.max_age = Some(Value::Int(400));

        let resources = apply_modifiers(hero_resources(statement), &modifiers);
        assert_eq!(hero_statement(&resources).cache_control.max_age_secs(), Some(400));
    }

    #[test]
    fn test_s_max_age_applied_and_kept() {
        let mut modifiers = Modifiers::new();
        modifiers.insert("s-max-age".into(), Value::Int(600));

        let resources = apply_modifiers(
            hero_resources(Statement::new(Method::From, "hero")),
            &modifiers,
        );
        assert_eq!(
            hero_statement(&resources).cache_control.s_max_age_secs(),
            Some(600)
        );

        let mut statement = Statement::new(Method::From, "hero");
        statement.cache_control.s_max_age = Some(Value::Int(400));
        let resources = apply_modifiers(hero_resources(statement), &modifiers);
        assert_eq!(
            hero_statement(&resources).cache_control.s_max_age_secs(),
            Some(400)
        );
    }

    #[test]
    fn test_cache_control_aliases_max_age() {
        let mut modifiers = Modifiers::new();
        modifiers.insert("cache-control".into(), Value::Int(600));

        let resources = apply_modifiers(
            hero_resources(Statement::new(Method::From, "hero")),
            &modifiers,
        );
        assert_eq!(hero_statement(&resources).cache_control.max_age_secs(), Some(600));
    }

    #[test]
    fn test_timeout_applied_only_when_unset() {
        let mut modifiers = Modifiers::new();
        modifiers.insert("timeout".into(), Value::Int(50));

        let resources = apply_modifiers(
            hero_resources(Statement::new(Method::From, "hero")),
            &modifiers,
        );
        assert_eq!(hero_statement(&resources).timeout_ms(), Some(50));

        let mut statement = Statement::new(Method::From, "hero");
        statement.timeout = Some(Value::Int(200));
        let resources = apply_modifiers(hero_resources(statement), &modifiers);
        assert_eq!(hero_statement(&resources).timeout_ms(), Some(200));
    }

    #[test]
    fn test_apply_modifiers_is_idempotent() {
        let mut modifiers = Modifiers::new();
        modifiers.insert("max-age".into(), Value::Int(600));
        modifiers.insert("timeout".into(), Value::Int(50));

        let once = apply_modifiers(
            hero_resources(Statement::new(Method::From, "hero")),
            &modifiers,
        );
        let twice = apply_modifiers(once.clone(), &modifiers);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_flatten_encoder() {
        let statement = with_param(
            Statement::new(Method::From, "hero"),
            "ids",
            Value::List(vec![
                Value::List(vec![Value::Int(1), Value::Int(2)]),
                Value::Int(3),
            ]),
            Some(Encoder::Flatten),
        );

        let resources = apply_encoders(hero_resources(statement));
        let param = &hero_statement(&resources).with.items["ids"];
        assert_eq!(
            param.value,
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
        // The annotation stays so the multiplexer skips this parameter.
        assert_eq!(param.encoder, Some(Encoder::Flatten));
    }

    #[test]
    fn test_base64_encoder_applies_per_element() {
        let statement = with_param(
            Statement::new(Method::From, "hero"),
            "name",
            Value::List(vec![Value::from("ab"), Value::from("cd")]),
            Some(Encoder::Base64),
        );

        let resources = apply_encoders(hero_resources(statement));
        let param = &hero_statement(&resources).with.items["name"];
        assert_eq!(
            param.value,
            Value::List(vec![Value::from("YWI="), Value::from("Y2Q=")])
        );
        assert_eq!(param.encoder, None);
    }

    #[test]
    fn test_json_encoder() {
        let statement = with_param(
            Statement::new(Method::From, "hero"),
            "filter",
            Value::from_json(&serde_json::json!({"a": 1})),
            Some(Encoder::Json),
        );

        let resources = apply_encoders(hero_resources(statement));
        let param = &hero_statement(&resources).with.items["filter"];
        assert_eq!(param.value, Value::from(r#"{"a":1}"#));
        assert_eq!(param.encoder, None);
    }

    #[test]
    fn test_encoder_deferred_for_chains() {
        let statement = with_param(
            Statement::new(Method::From, "hero"),
            "ref",
            Value::Chain(vec![ChainLink::Key("villain".into())]),
            Some(Encoder::Base64),
        );

        let resources = apply_encoders(hero_resources(statement));
        let param = &hero_statement(&resources).with.items["ref"];
        assert!(matches!(param.value, Value::Chain(_)));
        assert_eq!(param.encoder, Some(Encoder::Base64));
    }

    #[test]
    fn test_apply_encoders_is_idempotent() {
        let statement = with_param(
            Statement::new(Method::From, "hero"),
            "name",
            Value::from("ab"),
            Some(Encoder::Base64),
        );

        let once = apply_encoders(hero_resources(statement));
        let twice = apply_encoders(once.clone());
        assert_eq!(once, twice);
    }
}
