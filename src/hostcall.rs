//! Host-call argument binding and dispatch (spec §4.8, §5).
use crate::callable::{Callable, HostFuture, HostParam};
use crate::context::Context;
use crate::errors::{ErrorContext, ErrorKind, RillError};
use crate::value::Value;
use std::{rc::Rc, time::Duration};

/// Merge positional and named call-site arguments against a host function's
/// declared parameter list: check arity, substitute declared defaults for
/// omitted arguments in declaration order, then type-check every resulting
/// value.
fn bind_args(
    function_name: &str,
    params: &[HostParam],
    positional: Vec<Value>,
    named: Vec<(String, Value)>,
) -> Result<Vec<Value>, RillError> {
    if positional.len() > params.len() {
        return Err(RillError::new(
            ErrorKind::TypeError,
            format!(
                "'{function_name}' takes {} argument(s), got {}",
                params.len(),
                positional.len()
            ),
            None,
        ));
    }

    let mut bound: Vec<Option<Value>> = positional.into_iter().map(Some).collect();
    bound.resize(params.len(), None);

    for (name, value) in named {
        let idx = params.iter().position(|p| p.name == name).ok_or_else(|| {
            RillError::new(
                ErrorKind::TypeError,
                format!("'{function_name}' has no parameter named '{name}'"),
                None,
            )
        })?;
        bound[idx] = Some(value);
    }

    let mut result = Vec::with_capacity(params.len());
    for (param, value) in params.iter().zip(bound) {
        let value = value.or_else(|| param.default.clone()).ok_or_else(|| {
            RillError::new(
                ErrorKind::TypeError,
                format!("'{function_name}' missing required argument '{}'", param.name),
                None,
            )
        })?;

        if let Some(expected) = &param.type_name {
            if !value.check_type(expected) {
                return Err(RillError::new(
                    ErrorKind::TypeError,
                    format!(
                        "'{function_name}' argument '{}' expected type '{expected}', got '{}'",
                        param.name,
                        value.type_name()
                    ),
                    None,
                )
                .with_context(ErrorContext::HostFunctionArg {
                    function_name: function_name.to_string(),
                    param_name: param.name.clone(),
                    expected_type: expected.clone(),
                    actual_type: value.type_name().to_string(),
                }));
            }
        }

        result.push(value);
    }

    Ok(result)
}

/// Validate/bind arguments, then race the call against the context's
/// configured per-call timeout (spec §5: "a host call races its own
/// cooperative suspension against the configured timeout").
pub(crate) async fn dispatch(
    context: &Rc<Context>,
    callable: &Callable,
    positional: Vec<Value>,
    named: Vec<(String, Value)>,
) -> Result<Value, RillError> {
    let Callable::Host(host) = callable else {
        panic!("hostcall::dispatch called with a non-host callable");
    };

    context.check_cancelled()?;

    let function_name = host.name.clone();
    let args = bind_args(&function_name, &host.params, positional, named)?;

    if let Some(cb) = &context.callbacks.on_host_call {
        cb(&function_name);
    }
    log::debug!("dispatching host call '{function_name}'");

    let future = (host.func)(args);
    let result = match context.timeout() {
        Some(duration) => run_with_timeout(&function_name, duration, future).await,
        None => future.await,
    };

    if let Ok(value) = &result {
        if let Some(cb) = &context.callbacks.on_function_return {
            cb(&function_name, value);
        }
    }

    context.check_cancelled()?;

    result
}

async fn run_with_timeout(
    function_name: &str,
    duration: Duration,
    future: HostFuture,
) -> Result<Value, RillError> {
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => {
            log::warn!("'{function_name}' exceeded its {}ms timeout", duration.as_millis());
            Err(RillError::new(
                ErrorKind::Timeout,
                format!("'{function_name}' exceeded its {}ms timeout", duration.as_millis()),
                None,
            )
            .with_context(ErrorContext::Timeout {
                function_name: function_name.to_string(),
                timeout_ms: duration.as_millis() as u64,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::HostKind;
    use crate::host::{host_fn, host_param};

    #[tokio::test]
    async fn binds_named_and_positional_args() {
        let params = vec![
            host_param("a", Some("number".to_string()), None, None).unwrap(),
            host_param("b", Some("number".to_string()), None, None).unwrap(),
        ];
        let callable = host_fn(
            HostKind::Runtime,
            "add",
            params,
            Rc::new(|args: Vec<Value>| -> HostFuture {
                Box::pin(async move {
                    let (Value::Number(a), Value::Number(b)) = (&args[0], &args[1]) else {
                        unreachable!()
                    };
                    Ok(Value::Number(a + b))
                })
            }),
        );
        let context = Context::builder().build();
        let result = dispatch(
            &context,
            &callable,
            vec![Value::Number(1.0)],
            vec![("b".to_string(), Value::Number(2.0))],
        )
        .await;
        assert_eq!(result.unwrap(), Value::Number(3.0));
    }

    #[tokio::test]
    async fn rejects_mismatched_argument_type() {
        let params = vec![host_param("a", Some("number".to_string()), None, None).unwrap()];
        let callable = host_fn(
            HostKind::Runtime,
            "add",
            params,
            Rc::new(|_args: Vec<Value>| -> HostFuture { Box::pin(async move { Ok(Value::Null) }) }),
        );
        let context = Context::builder().build();
        let result = dispatch(&context, &callable, vec![Value::from("oops")], vec![]).await;
        assert!(matches!(result, Err(e) if e.kind == ErrorKind::TypeError));
    }

    #[tokio::test]
    async fn timeout_trips_when_call_outlives_budget() {
        let params = Vec::new();
        let callable = host_fn(
            HostKind::Runtime,
            "slow",
            params,
            Rc::new(|_args: Vec<Value>| -> HostFuture {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(Value::Null)
                })
            }),
        );
        let context = Context::builder().timeout(Duration::from_millis(1)).build();
        let result = dispatch(&context, &callable, vec![], vec![]).await;
        assert!(matches!(result, Err(e) if e.kind == ErrorKind::Timeout));
    }
}
