//! The `dict` value: an insertion-order-preserving but sorted-iteration map.
use crate::value::Value;
use std::{cell::RefCell, collections::BTreeMap, fmt, rc::Rc};

/// Dicts are stored by reference, like the teacher's `Table`. Interior
/// mutability is required because a dict's entries can be rebound after
/// construction — most notably when a property-style closure stored as an
/// entry has its `bound_dict` back-reference wired up (see `callable.rs`).
#[derive(Clone, Default)]
pub struct Dict {
    inner: Rc<RefCell<BTreeMap<Rc<str>, Value>>>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    fn id(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.borrow().get(key).cloned()
    }

    /// Set a key's value, returning the previous value if any.
    pub fn set(&self, key: impl Into<Rc<str>>, value: Value) -> Option<Value> {
        self.inner.borrow_mut().insert(key.into(), value)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.borrow_mut().remove(key)
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }

    /// Keys in sorted order — collection operators and for-each loops over
    /// dicts both depend on this being deterministic.
    pub fn sorted_keys(&self) -> Vec<Rc<str>> {
        self.inner.borrow().keys().cloned().collect()
    }

    pub fn entries(&self) -> Vec<(Rc<str>, Value)> {
        self.inner.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl FromIterator<(String, Value)> for Dict {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let dict = Dict::new();
        for (k, v) in iter {
            dict.set(k, v);
        }
        dict
    }
}

impl PartialEq for Dict {
    fn eq(&self, rhs: &Dict) -> bool {
        // Reference identity, same as the teacher's `Table`; structural
        // equality for dicts is implemented separately in `value::deep_equals`.
        Rc::ptr_eq(&self.inner, &rhs.inner)
    }
}

impl fmt::Debug for Dict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.borrow().fmt(f)
    }
}

impl fmt::Display for Dict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<dict@{:x}>", self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let dict = Dict::new();
        assert_eq!(dict.get("foo"), None);
        assert_eq!(dict.set("foo", Value::from("hello")), None);
        assert_eq!(dict.get("foo"), Some(Value::from("hello")));
    }

    #[test]
    fn sorted_keys_are_deterministic() {
        let dict = Dict::new();
        dict.set("b", Value::Number(2.0));
        dict.set("a", Value::Number(1.0));
        dict.set("c", Value::Number(3.0));
        let keys: Vec<String> = dict.sorted_keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }
}
