use serde_json::Value;

/// Field values of one stored row, keyed by field name.
pub type Values = serde_json::Map<String, Value>;

/// A single search condition. Field paths may be dotted (`record.model`)
/// to reach into nested objects.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// The field equals the value. `Null` also matches a missing field.
    Eq(String, Value),
    /// The field equals one of the values.
    In(String, Vec<Value>),
}

impl Condition {
    pub fn matches(&self, values: &Values) -> bool {
        match self {
            Condition::Eq(path, expected) => match lookup(values, path) {
                Some(actual) => actual == expected,
                None => expected.is_null(),
            },
            Condition::In(path, options) => {
                let actual = lookup(values, path).unwrap_or(&Value::Null);
                options.iter().any(|o| o == actual)
            }
        }
    }
}

/// Equality search over one table, ordered by ascending id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub conditions: Vec<Condition>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Query::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Eq(field.to_string(), value.into()));
        self
    }

    pub fn is_in<V: Into<Value>>(mut self, field: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.conditions.push(Condition::In(
            field.to_string(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, values: &Values) -> bool {
        self.conditions.iter().all(|c| c.matches(values))
    }
}

/// Resolve a dotted field path inside a row.
pub fn lookup<'a>(values: &'a Values, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = values.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Values {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn dotted_paths_reach_nested_objects() {
        let r = row(json!({"record": {"model": "res.partner", "id": 42}}));
        assert!(Query::new().eq("record.model", "res.partner").matches(&r));
        assert!(Query::new().is_in("record.id", [41, 42]).matches(&r));
        assert!(!Query::new().eq("record.id", 7).matches(&r));
    }

    #[test]
    fn null_matches_missing_fields() {
        let r = row(json!({"key": "a"}));
        assert!(Query::new().eq("value", Value::Null).matches(&r));
        assert!(!Query::new().eq("key", Value::Null).matches(&r));
    }
}
