//! Request-scoped storage shared by all handlers of one request.

use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Result of matching a route description against a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMatch {
    /// An exact path description matched
    Exact,
    /// A pattern matched; `groups[0]` is the whole match
    Pattern {
        groups: Vec<Option<String>>,
        named: HashMap<String, String>,
    },
}

impl RouteMatch {
    /// Get a positional capture group
    pub fn group(&self, index: usize) -> Option<&str> {
        match self {
            RouteMatch::Exact => None,
            RouteMatch::Pattern { groups, .. } => groups.get(index)?.as_deref(),
        }
    }

    /// Get a named capture group
    pub fn name(&self, name: &str) -> Option<&str> {
        match self {
            RouteMatch::Exact => None,
            RouteMatch::Pattern { named, .. } => named.get(name).map(String::as_str),
        }
    }
}

/// A value kept in the store
#[derive(Debug, Clone, PartialEq)]
pub enum StoreValue {
    Route(RouteMatch),
    Text(String),
    Flag(bool),
    Number(i64),
    Json(JsonValue),
}

impl From<RouteMatch> for StoreValue {
    fn from(value: RouteMatch) -> Self {
        StoreValue::Route(value)
    }
}

impl From<String> for StoreValue {
    fn from(value: String) -> Self {
        StoreValue::Text(value)
    }
}

impl From<&str> for StoreValue {
    fn from(value: &str) -> Self {
        StoreValue::Text(value.to_string())
    }
}

impl From<bool> for StoreValue {
    fn from(value: bool) -> Self {
        StoreValue::Flag(value)
    }
}

impl From<i64> for StoreValue {
    fn from(value: i64) -> Self {
        StoreValue::Number(value)
    }
}

impl From<JsonValue> for StoreValue {
    fn from(value: JsonValue) -> Self {
        StoreValue::Json(value)
    }
}

/// String-keyed bag of request data
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Store {
    entries: HashMap<String, StoreValue>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the previous one
    pub fn insert(&mut self, key: &str, value: impl Into<StoreValue>) -> Option<StoreValue> {
        self.entries.insert(key.to_string(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&StoreValue> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut StoreValue> {
        self.entries.get_mut(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<StoreValue> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get a route match stored under `key`
    pub fn route(&self, key: &str) -> Option<&RouteMatch> {
        match self.entries.get(key)? {
            StoreValue::Route(route) => Some(route),
            _ => None,
        }
    }

    /// Get text stored under `key`
    pub fn text(&self, key: &str) -> Option<&str> {
        match self.entries.get(key)? {
            StoreValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Store
where
    K: Into<String>,
    V: Into<StoreValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typed_accessors() {
        let mut store = Store::new();
        store.insert("user", "alice");
        store.insert("admin", true);
        store.insert("route", RouteMatch::Exact);

        assert_eq!(store.text("user"), Some("alice"));
        assert_eq!(store.text("admin"), None);
        assert_eq!(store.get("admin"), Some(&StoreValue::Flag(true)));
        assert_eq!(store.route("route"), Some(&RouteMatch::Exact));
        assert_eq!(store.len(), 3);

        assert!(store.remove("route").is_some());
        assert!(!store.contains_key("route"));
    }

    #[test]
    fn test_from_iter() {
        let store: Store = vec![("limit", StoreValue::Number(10)), ("meta", json!({"a": 1}).into())]
            .into_iter()
            .collect();
        assert_eq!(store.get("limit"), Some(&StoreValue::Number(10)));
        assert_eq!(store.get("meta"), Some(&StoreValue::Json(json!({"a": 1}))));
    }

    #[test]
    fn test_route_groups() {
        let route = RouteMatch::Pattern {
            groups: vec![Some("/users/7".to_string()), Some("7".to_string()), None],
            named: HashMap::from([("id".to_string(), "7".to_string())]),
        };
        assert_eq!(route.group(1), Some("7"));
        assert_eq!(route.group(2), None);
        assert_eq!(route.group(9), None);
        assert_eq!(route.name("id"), Some("7"));
        assert_eq!(RouteMatch::Exact.group(0), None);
    }
}
