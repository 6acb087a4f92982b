//! The recursive value type flowing through queries.
//!
//! Parameter values, header values, and response bodies are all represented
//! as [`Value`]. Two variants never survive resource initialization:
//! [`Value::Variable`] is substituted from request input, and
//! [`Value::Chain`] is substituted from another resource's response once
//! that resource is done. Both serialize as `null` if they reach a wire
//! boundary.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Ordered map used for object values; declaration order is significant.
pub type ObjectMap = IndexMap<String, Value>;

/// One link of a cross-statement reference path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChainLink {
    /// A literal path segment: `hero.sidekickId`.
    Key(String),
    /// A variable path segment, substituted from input: `hero.$field`.
    Var(String),
}

impl ChainLink {
    /// Returns the literal key, if this link is one.
    #[must_use]
    pub fn as_key(&self) -> Option<&str> {
        match self {
            Self::Key(k) => Some(k),
            Self::Var(_) => None,
        }
    }
}

/// A query value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Object(ObjectMap),
    /// An input reference: `$ident`.
    Variable(String),
    /// A cross-statement reference: `ident(.ident|$ident)+`.
    Chain(Vec<ChainLink>),
}

impl Value {
    /// Returns true for `Null`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the list elements, if this is a list.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the string content, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the head identifier of a chain value.
    #[must_use]
    pub fn chain_head(&self) -> Option<&ChainLink> {
        match self {
            Self::Chain(links) => links.first(),
            _ => None,
        }
    }

    /// Returns true if the value contains a chain anywhere inside it.
    #[must_use]
    pub fn has_chain(&self) -> bool {
        match self {
            Self::Chain(_) => true,
            Self::List(items) => items.iter().any(Value::has_chain),
            Self::Object(entries) => entries.values().any(Value::has_chain),
            _ => false,
        }
    }

    /// Renders the value in its canonical textual form.
    ///
    /// Scalars render bare (no quotes); lists and objects render as JSON.
    /// This is the form used for URL path/query parameters and as the input
    /// to the `base64` encoder.
    #[must_use]
    pub fn encode_text(&self) -> String {
        match self {
            Self::Null | Self::Variable(_) | Self::Chain(_) => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::String(s) => s.clone(),
            Self::List(_) | Self::Object(_) => self.to_json().to_string(),
        }
    }

    /// Converts to a `serde_json::Value`. Unresolved variables and chains
    /// become `null`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null | Self::Variable(_) | Self::Chain(_) => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Value::from(*f),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Self::Object(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Converts from a `serde_json::Value`.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(items) => {
                Self::List(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(entries) => Self::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Looks up a dotted path inside the value. Missing segments yield `None`.
    #[must_use]
    pub fn get_path(&self, path: &[String]) -> Option<&Value> {
        let mut current = self;
        for segment in path {
            match current {
                Self::Object(entries) => current = entries.get(segment)?,
                _ => return None,
            }
        }
        Some(current)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Ok(Self::from_json(&json))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}
