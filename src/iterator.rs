//! The rill iterator protocol: a dict shaped `{value, done, next}`, recognized
//! as a lazy sequence anywhere a loop or collection operator expects one
//! (spec §4.6, §4.9).
//!
//! There's no dedicated iterator type — any dict with a boolean `done` and a
//! callable `next` qualifies, the same duck-typed convention the teacher's
//! standard library uses for its `seq` protocol.
use crate::context::Context;
use crate::dict::Dict;
use crate::errors::{ErrorContext, ErrorKind, RillError};
use crate::eval::call_callable;
use crate::value::Value;
use std::rc::Rc;

pub(crate) fn is_iterator(value: &Value) -> bool {
    let Value::Dict(dict) = value else { return false };
    matches!(dict.get("done"), Some(Value::Bool(_))) && matches!(dict.get("next"), Some(Value::Callable(_)))
}

/// Drain an iterator-protocol dict into a plain list, calling `next` until
/// `done` is true. Bounded by `limit` (the context's `iteration_limit`) to
/// keep a runaway generator from hanging the evaluator.
pub(crate) async fn collect(context: &Rc<Context>, mut state: Dict, limit: usize) -> Result<Vec<Value>, RillError> {
    let mut items = Vec::new();
    let mut iterations = 0;

    loop {
        context.check_cancelled()?;

        if matches!(state.get("done"), Some(Value::Bool(true))) {
            break;
        }

        if let Some(value) = state.get("value") {
            items.push(value);
        }

        iterations += 1;
        if iterations > limit {
            return Err(RillError::new(
                ErrorKind::LimitExceeded,
                format!("iteration limit of {limit} exceeded while draining an iterator"),
                None,
            )
            .with_context(ErrorContext::IterationLimit { limit, iterations }));
        }

        let Some(Value::Callable(next)) = state.get("next") else {
            return Err(RillError::new(ErrorKind::TypeError, "iterator is missing a callable 'next'", None));
        };

        match call_callable(context, &next, Vec::new(), Vec::new()).await? {
            Value::Dict(next_state) => state = next_state,
            other => {
                return Err(RillError::new(
                    ErrorKind::TypeError,
                    format!("iterator's 'next' must return a dict, got '{}'", other.type_name()),
                    None,
                ))
            }
        }
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::{Callable, HostCallable, HostFuture, HostKind};
    use std::cell::{Cell, RefCell};

    fn counting_iterator(max: i64) -> Dict {
        fn state(n: i64, max: i64) -> Dict {
            let dict = Dict::new();
            dict.set("value", Value::Number(n as f64));
            dict.set("done", Value::Bool(n >= max));
            let next_n = Rc::new(Cell::new(n + 1));
            let func: crate::callable::HostFn = {
                let next_n = next_n.clone();
                Rc::new(move |_args: Vec<Value>| -> HostFuture {
                    let n = next_n.get();
                    Box::pin(async move { Ok(Value::Dict(state(n, max))) })
                })
            };
            dict.set(
                "next",
                Value::Callable(Callable::Host(Rc::new(HostCallable {
                    kind: HostKind::Runtime,
                    name: "next".to_string(),
                    params: Vec::new(),
                    func,
                    is_property: false,
                    bound_dict: RefCell::new(None),
                }))),
            );
            dict
        }
        state(0, max)
    }

    #[test]
    fn recognizes_iterator_shaped_dicts() {
        let dict = counting_iterator(3);
        assert!(is_iterator(&Value::Dict(dict)));
        assert!(!is_iterator(&Value::Dict(Dict::new())));
    }

    #[tokio::test]
    async fn collects_until_done() {
        let context = Context::builder().build();
        let items = collect(&context, counting_iterator(3), 100).await.unwrap();
        assert_eq!(items, vec![Value::Number(0.0), Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]);
    }

    #[tokio::test]
    async fn stops_at_iteration_limit() {
        let context = Context::builder().build();
        let err = collect(&context, counting_iterator(1_000_000), 5).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::LimitExceeded);
    }
}
