use crate::error::ScriptError;
use crate::interp::Interpreter;
use crate::value::{Args, DictKey, Value};
use indexmap::IndexMap;

/// An ordered set of named values: what a caller injects into a script and
/// what a script hands back through `export`.
#[derive(Clone, Default)]
pub struct Namespace {
    entries: IndexMap<String, Value>,
}

impl Namespace {
    pub fn new() -> Self {
        Namespace::default()
    }

    /// Bind `name`, replacing any previous binding.
    pub fn register(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.entries.insert(name.into(), value.into());
        self
    }

    pub fn register_fn<F>(&mut self, name: &str, func: F) -> &mut Self
    where
        F: Fn(&mut Interpreter, Args) -> Result<Value, ScriptError> + 'static,
    {
        self.entries.insert(name.to_owned(), Value::native(name, func));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    /// The binding for `name` if it is callable.
    pub fn callable(&self, name: &str) -> Option<&Value> {
        self.entries.get(name).filter(|v| v.is_callable())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.entries.shift_remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge every binding of `other` into `self`; `other` wins on conflict.
    pub fn extend(&mut self, other: &Namespace) {
        for (k, v) in &other.entries {
            self.entries.insert(k.clone(), v.clone());
        }
    }

    /// `export(...)` semantics: a callable registers under its own name, a
    /// dict merges its string keys, keyword arguments merge by keyword.
    /// Anything else is a usage error.
    pub fn add_items(&mut self, args: Args) -> Result<(), ScriptError> {
        for item in args.positional {
            match &item {
                Value::Function(f) => {
                    if f.def.name == "<lambda>" {
                        return Err(ScriptError::type_error(
                            "export() cannot name an anonymous function; use export(name=...)",
                        ));
                    }
                    self.entries.insert(f.def.name.clone(), item.clone());
                }
                Value::Native(n) => {
                    self.entries.insert(n.name.clone(), item.clone());
                }
                Value::Dict(d) => {
                    for (k, v) in d.borrow().iter() {
                        let DictKey::Str(name) = k else {
                            return Err(ScriptError::type_error(format!(
                                "export() dict keys must be str, not {}",
                                k.to_value().type_name()
                            )));
                        };
                        self.entries.insert(name.to_string(), v.clone());
                    }
                }
                other => {
                    return Err(ScriptError::type_error(format!(
                        "export() accepts functions, dicts or keyword arguments, not {}",
                        other.type_name()
                    )))
                }
            }
        }
        for (name, value) in args.keywords {
            self.entries.insert(name, value);
        }
        Ok(())
    }

    /// Snapshot as a script dict.
    pub fn to_dict(&self) -> Value {
        Value::dict(
            self.entries
                .iter()
                .map(|(k, v)| (DictKey::from(k.as_str()), v.clone()))
                .collect(),
        )
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_items_merges_dicts_and_keywords() {
        let mut ns = Namespace::new();
        let dict = Value::dict(IndexMap::from([(DictKey::from("a"), Value::Int(1))]));
        let args = Args::new(vec![dict]).with_keyword("b", Value::Int(2));
        ns.add_items(args).unwrap();
        assert_eq!(ns.names().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn add_items_rejects_plain_values() {
        let mut ns = Namespace::new();
        let err = ns.add_items(Args::new(vec![Value::Int(3)])).unwrap_err();
        assert!(err.message().contains("not int"));
    }

    #[test]
    fn natives_register_under_their_name() {
        let mut ns = Namespace::new();
        let f = Value::native("ping", |_, _| Ok(Value::str("pong")));
        ns.add_items(Args::new(vec![f])).unwrap();
        assert!(ns.callable("ping").is_some());
    }
}
