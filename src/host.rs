//! Helpers for registering host-provided native functions (spec §4.8).
//!
//! Grounded on the teacher's `foreign.rs`, simplified: the teacher's
//! `ForeignFn` needed its elaborate `AsyncFn2` workaround trait because its
//! closures took a `&mut Fiber` alongside the argument vector. Host
//! functions here are pure with respect to the evaluator — they see only
//! their bound, type-checked argument vector — so a plain boxed closure
//! suffices and that workaround isn't needed.
use crate::callable::{Callable, HostCallable, HostFn, HostKind, HostParam};
use std::{cell::RefCell, rc::Rc};

/// Build a host callable that scripts invoke by qualified name.
pub fn host_fn(kind: HostKind, name: impl Into<String>, params: Vec<HostParam>, func: HostFn) -> Callable {
    Callable::Host(Rc::new(HostCallable {
        kind,
        name: name.into(),
        params,
        func,
        is_property: false,
        bound_dict: RefCell::new(None),
    }))
}

/// Build a property-style host callable: stored as a zero-arg dict entry
/// that auto-invokes with the dict as implicit receiver the first time it's
/// read (spec §4.3).
pub fn host_property(kind: HostKind, name: impl Into<String>, func: HostFn) -> Callable {
    Callable::Host(Rc::new(HostCallable {
        kind,
        name: name.into(),
        params: Vec::new(),
        func,
        is_property: true,
        bound_dict: RefCell::new(None),
    }))
}

/// Declare a host parameter, validating its default value's type against its
/// declared type at registration time (spec §4.8: defaults are validated
/// once, not on every call).
pub fn host_param(
    name: impl Into<String>,
    type_name: Option<String>,
    description: Option<String>,
    default: Option<crate::value::Value>,
) -> Result<HostParam, crate::errors::RillError> {
    let name = name.into();

    if let (Some(expected), Some(value)) = (&type_name, &default) {
        if !value.check_type(expected) {
            return Err(crate::errors::RillError::new(
                crate::errors::ErrorKind::TypeError,
                format!(
                    "default value for parameter '{name}' has type '{}', expected '{expected}'",
                    value.type_name()
                ),
                None,
            ));
        }
    }

    Ok(HostParam { name, type_name, description, default })
}

/// Build a boxed host function future from an async closure over
/// `Vec<Value>`, taking care of the `Rc`/`Pin<Box<..>>` boilerplate the way
/// the teacher's `foreign_fn!` macro does for `ForeignFn`.
#[macro_export]
macro_rules! host_fn {
    ($(clone $clone:ident),* |$args:ident| $block:expr) => {{
        #[allow(unused_mut)]
        let closure = move |mut $args: Vec<$crate::value::Value>| -> $crate::callable::HostFuture {
            $(
                let $clone = $clone.clone();
            )*
            Box::pin(async move { $block })
        };
        ::std::rc::Rc::new(closure) as $crate::callable::HostFn
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn host_param_rejects_mistyped_default() {
        let result = host_param("n", Some("number".to_string()), None, Some(Value::from("nope")));
        assert!(result.is_err());
    }

    #[test]
    fn host_param_accepts_matching_default() {
        let result = host_param("n", Some("number".to_string()), None, Some(Value::Number(1.0)));
        assert!(result.is_ok());
    }
}
