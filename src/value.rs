//! The Rill value model: a tagged union of primitive and reference-shared
//! types (spec §2).
use crate::callable::Callable;
use crate::dict::Dict;
use std::{fmt, rc::Rc};

/// A Rill value. Scalars (`Null`, `Bool`, `Number`) are stored inline;
/// everything else is reference-shared behind `Rc` so copying a value is
/// always cheap, the same tradeoff the teacher's `Value` makes for its
/// `Table`/`Closure` variants. There is no garbage collector: a container's
/// lifetime is just the lifetime of its last `Rc`.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    List(Rc<Vec<Value>>),
    Dict(Dict),
    Tuple(Rc<Tuple>),
    Vector(Rc<VectorData>),
    Callable(Callable),
}

/// Tuples are strictly all-positional or all-named; the two shapes never mix
/// within a single tuple (spec §2).
#[derive(Clone, Debug)]
pub enum Tuple {
    Positional(Vec<Value>),
    Named(Vec<(String, Value)>),
}

impl Tuple {
    pub fn len(&self) -> usize {
        match self {
            Tuple::Positional(items) => items.len(),
            Tuple::Named(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn deep_equals(&self, other: &Tuple) -> bool {
        match (self, other) {
            (Tuple::Positional(a), Tuple::Positional(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.deep_equals(y))
            }
            (Tuple::Named(a), Tuple::Named(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        b.iter().find(|(k2, _)| k2 == k).is_some_and(|(_, v2)| v.deep_equals(v2))
                    })
            }
            _ => false,
        }
    }
}

/// An opaque embedding record: raw floating-point components plus the name of
/// the model that produced them. Rill never interprets the contents, only
/// carries them (spec §2, "vector").
#[derive(Clone, Debug, PartialEq)]
pub struct VectorData {
    pub data: Vec<f32>,
    pub model: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TypeName {
    Null,
    Bool,
    Number,
    String,
    List,
    Dict,
    Tuple,
    Vector,
    Callable,
}

impl TypeName {
    pub fn as_str(self) -> &'static str {
        match self {
            TypeName::Null => "null",
            TypeName::Bool => "bool",
            TypeName::Number => "number",
            TypeName::String => "string",
            TypeName::List => "list",
            TypeName::Dict => "dict",
            TypeName::Tuple => "tuple",
            TypeName::Vector => "vector",
            TypeName::Callable => "callable",
        }
    }
}

impl Value {
    pub fn infer_type(&self) -> TypeName {
        match self {
            Value::Null => TypeName::Null,
            Value::Bool(_) => TypeName::Bool,
            Value::Number(_) => TypeName::Number,
            Value::String(_) => TypeName::String,
            Value::List(_) => TypeName::List,
            Value::Dict(_) => TypeName::Dict,
            Value::Tuple(_) => TypeName::Tuple,
            Value::Vector(_) => TypeName::Vector,
            Value::Callable(_) => TypeName::Callable,
        }
    }

    /// The name used everywhere a type is compared against a declared
    /// parameter type, a locked variable type, or a `&type` assertion.
    pub fn type_name(&self) -> &'static str {
        self.infer_type().as_str()
    }

    pub fn check_type(&self, expected: &str) -> bool {
        self.type_name() == expected
    }

    /// Null, `false`, `0`, the empty string, the empty list, and the empty
    /// dict are falsey; everything else (including empty tuples, vectors,
    /// and callables) is truthy (spec §2).
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Dict(d) => !d.is_empty(),
            Value::Tuple(_) | Value::Vector(_) | Value::Callable(_) => true,
        }
    }

    /// Structural equality used by the `deepEquals` builtin and by dict-key
    /// / list-membership comparisons. Distinct from `PartialEq`, which this
    /// delegates to, only to give the recursive implementation a descriptive
    /// name to call itself by.
    pub fn deep_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.deep_equals(y))
            }
            (Value::Dict(a), Value::Dict(b)) => {
                let ak = a.sorted_keys();
                let bk = b.sorted_keys();
                ak.len() == bk.len()
                    && ak.iter().zip(bk.iter()).all(|(k1, k2)| k1 == k2)
                    && ak.iter().all(|k| match (a.get(k), b.get(k)) {
                        (Some(x), Some(y)) => x.deep_equals(&y),
                        _ => false,
                    })
            }
            (Value::Tuple(a), Value::Tuple(b)) => a.deep_equals(b),
            (Value::Vector(a), Value::Vector(b)) => a.model == b.model && a.data == b.data,
            (Value::Callable(a), Value::Callable(b)) => a.deep_equals(b),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        self.deep_equals(other)
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(Rc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(Rc::from(value.as_str()))
    }
}

impl From<Rc<str>> for Value {
    fn from(value: Rc<str>) -> Self {
        Value::String(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(Rc::new(items))
    }
}

impl From<Dict> for Value {
    fn from(dict: Dict) -> Self {
        Value::Dict(dict)
    }
}

impl From<Tuple> for Value {
    fn from(tuple: Tuple) -> Self {
        Value::Tuple(Rc::new(tuple))
    }
}

impl From<Callable> for Value {
    fn from(callable: Callable) -> Self {
        Value::Callable(callable)
    }
}

impl<T: Into<Value>> FromIterator<T> for Value {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Value::List(Rc::new(iter.into_iter().map(Into::into).collect()))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format_value(self, f, true)
    }
}

fn format_value(value: &Value, f: &mut fmt::Formatter<'_>, top_level: bool) -> fmt::Result {
    match value {
        Value::Null => write!(f, "null"),
        Value::Bool(b) => write!(f, "{b}"),
        Value::Number(n) => write!(f, "{}", format_number(*n)),
        Value::String(s) if top_level => write!(f, "{s}"),
        Value::String(s) => write!(f, "{s:?}"),
        Value::List(items) => {
            write!(f, "[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                format_value(item, f, false)?;
            }
            write!(f, "]")
        }
        Value::Dict(dict) => {
            write!(f, "{{")?;
            for (i, key) in dict.sorted_keys().iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}: ")?;
                if let Some(v) = dict.get(key) {
                    format_value(&v, f, false)?;
                }
            }
            write!(f, "}}")
        }
        Value::Tuple(tuple) => match tuple.as_ref() {
            Tuple::Positional(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    format_value(item, f, false)?;
                }
                write!(f, ")")
            }
            Tuple::Named(items) => {
                write!(f, "(")?;
                for (i, (name, item)) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: ")?;
                    format_value(item, f, false)?;
                }
                write!(f, ")")
            }
        },
        Value::Vector(vector) => write!(f, "<vector:{} dims={}>", vector.model, vector.data.len()),
        Value::Callable(callable) => match callable.name() {
            Some(name) => write!(f, "<callable:{name}>"),
            None => write!(f, "<callable>"),
        },
    }
}

/// Numbers format without a trailing `.0` for integral values, matching how
/// the teacher's `Value::Display` prints numbers via `{}` on an `f64` (Rust's
/// own `f64` formatting already drops the fraction for integral values, so
/// this only exists to make that guarantee explicit and testable).
fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_matches_spec() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(Value::Number(0.1).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(Value::from("x").is_truthy());
        assert!(!Value::from(Vec::<Value>::new()).is_truthy());
    }

    #[test]
    fn deep_equals_lists_recursively() {
        let a = Value::from(vec![Value::Number(1.0), Value::from("x")]);
        let b = Value::from(vec![Value::Number(1.0), Value::from("x")]);
        assert!(a.deep_equals(&b));
    }

    #[test]
    fn deep_equals_dicts_by_structure_not_identity() {
        let a = Dict::new();
        a.set("k", Value::Number(1.0));
        let b = Dict::new();
        b.set("k", Value::Number(1.0));
        assert!(Value::Dict(a).deep_equals(&Value::Dict(b)));
    }

    #[test]
    fn deep_equals_rejects_mismatched_types() {
        assert!(!Value::Number(1.0).deep_equals(&Value::from("1")));
    }

    #[test]
    fn display_formats_integral_numbers_without_fraction() {
        assert_eq!(Value::Number(3.0).to_string(), "3");
        assert_eq!(Value::Number(3.5).to_string(), "3.5");
    }

    #[test]
    fn display_quotes_strings_nested_in_lists() {
        let list = Value::from(vec![Value::from("a")]);
        assert_eq!(list.to_string(), "[\"a\"]");
    }
}
