//! List-parameter expansion into parallel statements.

use crate::query::{Encoder, Resource, Resources, Statement};
use fedql_core::Value;

/// Expands every statement whose `with` clause carries a list-valued
/// parameter into one statement per element.
///
/// The first non-flattened list parameter (in declaration order) drives the
/// expansion; expansion recurses, so a list of lists produces a matrix. The
/// response slot mirrors the produced shape, so results zip back
/// positionally.
#[must_use]
pub fn multiplex_statements(resources: Resources) -> Resources {
    resources
        .into_iter()
        .map(|(id, resource)| (id, multiplex_resource(resource)))
        .collect()
}

fn multiplex_resource(resource: Resource) -> Resource {
    match resource {
        Resource::One(statement) => multiplex_statement(*statement),
        Resource::Many(items) => {
            Resource::Many(items.into_iter().map(multiplex_resource).collect())
        }
    }
}

fn multiplex_statement(statement: Statement) -> Resource {
    let target = statement.with.items.iter().find_map(|(key, param)| {
        let is_list = matches!(param.value, Value::List(_));
        let flattened = param.encoder == Some(Encoder::Flatten);
        (is_list && !flattened).then(|| key.clone())
    });

    let Some(key) = target else {
        return Resource::One(Box::new(statement));
    };

    let Value::List(elements) = statement.with.items[&key].value.clone() else {
        return Resource::One(Box::new(statement));
    };

    Resource::Many(
        elements
            .into_iter()
            .map(|element| {
                let mut branch = statement.clone();
                branch.with.items[&key].value = element;
                multiplex_statement(branch)
            })
            .collect(),
    )
}

/// Collapses singleton multiplex wrappers back to scalar statements, so the
/// dispatcher sees a plain statement when expansion did not actually fan
/// out.
#[must_use]
pub fn unwrap_no_multiplex(resources: Resources) -> Resources {
    resources
        .into_iter()
        .map(|(id, resource)| (id, unwrap_resource(resource)))
        .collect()
}

fn unwrap_resource(resource: Resource) -> Resource {
    match resource {
        Resource::Many(mut items) if items.len() == 1 => {
            unwrap_resource(items.pop().expect("len checked"))
        }
        Resource::Many(items) => {
            Resource::Many(items.into_iter().map(unwrap_resource).collect())
        }
        one => one,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Method, ResourceId, WithParam};

    fn statement_with(key: &str, value: Value, encoder: Option<Encoder>) -> Statement {
        let mut statement = Statement::new(Method::From, "hero");
        statement
            .with
            .items
            .insert(key.to_string(), WithParam { value, encoder });
        statement
    }

    fn as_resources(statement: Statement) -> Resources {
        let mut resources = Resources::new();
        resources.insert(ResourceId::from("hero"), Resource::from(statement));
        resources
    }

    fn param(resource: &Resource, key: &str) -> Value {
        resource.as_one().unwrap().with.items[key].value.clone()
    }

    #[test]
    fn test_scalar_statement_is_untouched() {
        let resources = as_resources(statement_with("id", Value::Int(1), None));
        let expected = resources.clone();
        assert_eq!(multiplex_statements(resources), expected);
    }

    #[test]
    fn test_list_parameter_expands() {
        let resources = multiplex_statements(as_resources(statement_with(
            "id",
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
            None,
        )));

        let Resource::Many(items) = &resources[&ResourceId::from("hero")] else {
            panic!("expected multiplexed resource");
        };
        assert_eq!(items.len(), 3);
        assert_eq!(param(&items[0], "id"), Value::Int(1));
        assert_eq!(param(&items[2], "id"), Value::Int(3));
    }

    #[test]
    fn test_nested_lists_expand_to_matrix() {
        let resources = multiplex_statements(as_resources(statement_with(
            "id",
            Value::List(vec![
                Value::List(vec![Value::Int(1), Value::Int(2)]),
                Value::List(vec![Value::Int(3)]),
            ]),
            None,
        )));

        let Resource::Many(rows) = &resources[&ResourceId::from("hero")] else {
            panic!("expected multiplexed resource");
        };
        assert_eq!(rows.len(), 2);
        let Resource::Many(first_row) = &rows[0] else {
            panic!("expected nested multiplex");
        };
        assert_eq!(first_row.len(), 2);
        assert_eq!(param(&first_row[1], "id"), Value::Int(2));
    }

    #[test]
    fn test_flattened_list_does_not_expand() {
        let resources = multiplex_statements(as_resources(statement_with(
            "id",
            Value::List(vec![Value::Int(1), Value::Int(2)]),
            Some(Encoder::Flatten),
        )));
        assert!(resources[&ResourceId::from("hero")].as_one().is_some());
    }

    #[test]
    fn test_multiplex_then_unwrap_is_identity_for_singletons() {
        let original = as_resources(statement_with(
            "id",
            Value::List(vec![Value::Int(7)]),
            None,
        ));

        let unwrapped = unwrap_no_multiplex(multiplex_statements(original));

        let expected = as_resources(statement_with("id", Value::Int(7), None));
        assert_eq!(unwrapped, expected);
    }
}
