//! The core evaluator: statement/expression execution, callable invocation,
//! collection operators, and access-chain resolution (spec §4.3-§4.7).
//!
//! Grounded on the teacher's `eval.rs`: a tree-walking evaluator driven by
//! `async_recursion` for the mutually-recursive expression grammar, with
//! `scopeguard` guaranteeing call-stack frames pop on every exit path,
//! including an error unwind.
use crate::ast;
use crate::callable::{Callable, ScriptCallable};
use crate::context::{Context, StackFrame};
use crate::controlflow::{Flow, IntoValue, Signal};
use crate::dict::Dict;
use crate::errors::{ErrorContext, ErrorKind, RillError};
use crate::scope::Scope;
use crate::value::{Tuple, Value};
use async_recursion::async_recursion;
use futures::future::join_all;
use std::{cell::RefCell, rc::Rc};

/// The pipe value (`

`) and, where one is in scope, the collection-operator
/// accumulator (`$@`), threaded as an explicit owned parameter through every
/// evaluation function rather than kept as shared mutable state on `Context`.
///
/// A shared `RefCell<Value>` on `Context` would race: `map`/`filter` launch
/// their bodies concurrently within a batch (spec §4.6), and those bodies
/// interleave across `.await` points in this single-threaded evaluator.
/// Threading an owned `PipeCtx` instead means every concurrent future gets
/// its own snapshot, and passing the same unmutated `PipeCtx` to sibling
/// sub-evaluations (call arguments, string interpolation parts, conditional
/// branches) satisfies the "save and restore" invariants (I3, §4.4, §4.5) for
/// free — there is nothing to restore because nothing was ever mutated out
/// from under them.
#[derive(Clone, Debug)]
struct PipeCtx {
    value: Value,
    accumulator: Option<Value>,
}

impl PipeCtx {
    fn new(value: Value) -> Self {
        PipeCtx { value, accumulator: None }
    }
}

/// Evaluate a top-level program: a sequence of statements sharing the root
/// scope. A `return` at the top level ends the program early with its
/// value; a `break` at the top level is a usage error, since there is no
/// enclosing loop to catch it.
///
/// Drives the statement stream itself rather than delegating to `exec_block`,
/// since two checks apply only at top level (spec §4.9/§4.10): the
/// cancellation signal, and the auto-exception scan of each statement's
/// string-valued result. Nested blocks see neither.
pub async fn eval_program(context: &Rc<Context>, block: &ast::Block) -> Result<Value, RillError> {
    let scope = context.root_scope();
    let mut last = Value::Null;
    let mut pipe = PipeCtx::new(Value::Null);

    for statement in &block.statements {
        match exec_statement(context, scope, statement, &pipe).await? {
            Flow::Continue(value) => {
                check_auto_exception(context, &value)?;
                pipe.value = value.clone();
                last = value;
            }
            Flow::Break(Signal::Return(value)) => return Ok(value),
            Flow::Break(Signal::Break(_)) => {
                return Err(RillError::new(ErrorKind::TypeError, "'break' used outside of a loop", None))
            }
        }
    }

    Ok(last)
}

/// Scan a top-level statement's value against the configured auto-exception
/// patterns (spec §4.9): non-string values are never tested.
fn check_auto_exception(context: &Context, value: &Value) -> Result<(), RillError> {
    let Value::String(text) = value else { return Ok(()) };

    for pattern in context.auto_exceptions() {
        if let Some(found) = pattern.find(text) {
            return Err(RillError::new(
                ErrorKind::AutoException,
                format!("top-level value matched auto-exception pattern '{}'", pattern.as_str()),
                None,
            )
            .with_context(ErrorContext::AutoException {
                pattern: pattern.as_str().to_string(),
                matched: found.as_str().to_string(),
            }));
        }
    }

    Ok(())
}

/// Invoke any callable with plain positional/named arguments. The entry
/// point the iterator protocol and host extensions use to call back into
/// script- or host-defined functions. A `break` surfacing from the body of
/// an ordinary call has nowhere to go, so it is reported as a usage error
/// here; collection-operator bodies call `invoke_callable_flow` directly
/// instead, so their caller can catch it (spec §4.6).
pub async fn call_callable(
    context: &Rc<Context>,
    callable: &Callable,
    positional: Vec<Value>,
    named: Vec<(String, Value)>,
) -> Result<Value, RillError> {
    invoke_callable(context, callable, positional, named).await
}

async fn invoke_callable(
    context: &Rc<Context>,
    callable: &Callable,
    positional: Vec<Value>,
    named: Vec<(String, Value)>,
) -> Result<Value, RillError> {
    match invoke_callable_flow(context, callable, positional, named, None).await? {
        Flow::Continue(value) | Flow::Break(Signal::Return(value)) => Ok(value),
        Flow::Break(Signal::Break(_)) => {
            Err(RillError::new(ErrorKind::TypeError, "'break' used outside of a loop", None))
        }
    }
}

/// Like `invoke_callable`, but preserves a `break` raised inside the body as
/// a `Flow::Break(Signal::Break(_))` instead of converting it to an error
/// (spec §4.3: "a `BreakSignal` must not be caught here — it propagates past
/// closure bodies"). `initial_pipe`, when given, seeds the invocation's `

/`$@` rather than the ordinary fresh-`Null` default — how collection-operator
/// bodies bind the current element and accumulator (spec §4.6).
async fn invoke_callable_flow(
    context: &Rc<Context>,
    callable: &Callable,
    positional: Vec<Value>,
    named: Vec<(String, Value)>,
    initial_pipe: Option<PipeCtx>,
) -> Result<Flow<Value>, RillError> {
    match callable {
        Callable::Host(_) => crate::hostcall::dispatch(context, callable, positional, named).await.map(Flow::Continue),
        Callable::Script(script) => invoke_script_flow(context, script, positional, named, initial_pipe).await,
    }
}

async fn invoke_script_flow(
    context: &Rc<Context>,
    script: &Rc<ScriptCallable>,
    positional: Vec<Value>,
    named: Vec<(String, Value)>,
    initial_pipe: Option<PipeCtx>,
) -> Result<Flow<Value>, RillError> {
    let scope = Scope::child(&script.defining_scope);

    // A freshly invoked script does not inherit the caller's ambient pipe
    // value; it starts fresh, unless bound as a property-style callable
    // (pipeValue = the receiver it was bound to) or given an explicit
    // override by a collection operator (spec §4.3, §4.6).
    let initial_pipe = match initial_pipe {
        Some(pipe) => pipe,
        None => match script.bound_dict.borrow().clone() {
            Some(receiver) if script.is_property => PipeCtx::new(Value::Dict(receiver)),
            _ => PipeCtx::new(Value::Null),
        },
    };

    if script.is_property {
        if let Some(receiver) = script.bound_dict.borrow().clone() {
            scope.set_typed("self", Value::Dict(receiver))?;
        }
    } else {
        bind_script_params(context, &scope, &script.params, positional, named, &initial_pipe).await?;
    }

    context.push_frame(StackFrame {
        function_name: script.name.clone().unwrap_or_else(|| "<closure>".to_string()),
        location: None,
    });
    let _guard = scopeguard::guard((), |_| context.pop_frame());

    let flow = exec_block(context, &scope, &script.body, &initial_pipe).await.map_err(|mut err| {
        if err.call_stack.is_empty() {
            err.call_stack = context.snapshot_call_stack();
        }
        err
    })?;

    let value = match &flow {
        Flow::Continue(value) => value.clone(),
        Flow::Break(Signal::Return(value)) => value.clone(),
        Flow::Break(Signal::Break(value)) => value.clone(),
    };

    if let Some(cb) = &context.callbacks.on_function_return {
        cb(script.name.as_deref().unwrap_or("<closure>"), &value);
    }

    // `ReturnSignal` is caught here and becomes the call's value; `BreakSignal`
    // is deliberately left as `Flow::Break` so it keeps propagating.
    Ok(match flow {
        Flow::Continue(_) => Flow::Continue(value),
        Flow::Break(Signal::Return(_)) => Flow::Break(Signal::Return(value)),
        Flow::Break(Signal::Break(_)) => Flow::Break(Signal::Break(value)),
    })
}

/// Bind positional/named call-site arguments against a script closure's
/// declared parameters, evaluating default expressions (in the new call
/// scope, so later defaults can see earlier parameters) for any omitted
/// ones, then locking each parameter's type the same way any other first
/// assignment does.
async fn bind_script_params(
    context: &Rc<Context>,
    scope: &Rc<Scope>,
    params: &[ast::Param],
    positional: Vec<Value>,
    named: Vec<(String, Value)>,
    pipe: &PipeCtx,
) -> Result<(), RillError> {
    let mut positional = positional.into_iter();

    for param in params {
        let value = if let Some(value) = positional.next() {
            value
        } else if let Some((_, value)) = named.iter().find(|(name, _)| name == &param.name) {
            value.clone()
        } else if let Some(default) = &param.default {
            eval_expr(context, scope, default, pipe).await?
        } else {
            return Err(RillError::new(
                ErrorKind::TypeError,
                format!("missing required argument '{}'", param.name),
                None,
            ));
        };

        if let Some(expected) = &param.type_name {
            if !value.check_type(expected) {
                return Err(RillError::new(
                    ErrorKind::TypeError,
                    format!(
                        "argument '{}' expected type '{expected}', got '{}'",
                        param.name,
                        value.type_name()
                    ),
                    None,
                ));
            }
        }

        scope.set_typed(&param.name, value)?;
    }

    Ok(())
}

#[async_recursion(?Send)]
pub(crate) async fn exec_block(
    context: &Rc<Context>,
    scope: &Rc<Scope>,
    block: &ast::Block,
    pipe: &PipeCtx,
) -> Result<Flow<Value>, RillError> {
    let mut running = pipe.clone();
    let mut last = Value::Null;

    for statement in &block.statements {
        match exec_statement(context, scope, statement, &running).await? {
            Flow::Continue(value) => {
                running.value = value.clone();
                last = value;
            }
            flow @ Flow::Break(_) => return Ok(flow),
        }
    }

    Ok(Flow::Continue(last))
}

async fn exec_statement(
    context: &Rc<Context>,
    scope: &Rc<Scope>,
    statement: &ast::Statement,
    pipe: &PipeCtx,
) -> Result<Flow<Value>, RillError> {
    context.check_cancelled()?;

    if statement.annotations.is_empty() {
        let flow = exec_pipe_chain(context, scope, &statement.chain, pipe).await?;
        context.check_cancelled()?;
        return Ok(flow);
    }

    let merged = eval_annotations(context, scope, &statement.annotations, pipe).await?;
    context.push_annotations(merged);
    let _guard = scopeguard::guard((), |_| context.pop_annotations());

    let flow = exec_pipe_chain(context, scope, &statement.chain, pipe).await?;
    context.check_cancelled()?;
    Ok(flow)
}

/// Evaluate a statement's `^(...)` annotation entries into a dict merged with
/// whatever annotation dict is currently on top of the stack — inner entries
/// override outer ones with the same key (spec §4.10).
async fn eval_annotations(
    context: &Rc<Context>,
    scope: &Rc<Scope>,
    annotations: &[ast::AnnotationEntry],
    pipe: &PipeCtx,
) -> Result<Dict, RillError> {
    let merged = Dict::new();
    if let Some(outer) = context.current_annotations() {
        for (key, value) in outer.entries() {
            merged.set(key, value);
        }
    }

    for annotation in annotations {
        match annotation {
            ast::AnnotationEntry::Named(name, expr) => {
                merged.set(name.clone(), eval_expr(context, scope, expr, pipe).await?);
            }
            ast::AnnotationEntry::Spread(expr) => match eval_expr(context, scope, expr, pipe).await? {
                Value::Dict(spread) => {
                    for (key, value) in spread.entries() {
                        merged.set(key, value);
                    }
                }
                other => {
                    return Err(RillError::new(
                        ErrorKind::TypeError,
                        format!("cannot spread a value of type '{}' into an annotation", other.type_name()),
                        None,
                    ))
                }
            },
        }
    }

    Ok(merged)
}

#[async_recursion(?Send)]
async fn exec_pipe_chain(
    context: &Rc<Context>,
    scope: &Rc<Scope>,
    chain: &ast::PipeChain,
    pipe: &PipeCtx,
) -> Result<Flow<Value>, RillError> {
    let head_value = eval_expr(context, scope, &chain.head, pipe).await?;
    let mut running = PipeCtx { value: head_value, accumulator: pipe.accumulator.clone() };

    for target in &chain.targets {
        running = match exec_pipe_target(context, scope, target, &running).await? {
            Flow::Continue(value) => PipeCtx { value, accumulator: running.accumulator },
            flow @ Flow::Break(_) => return Ok(flow),
        };
    }

    Ok(match &chain.terminator {
        Some(ast::Terminator::Break) => Flow::Break(Signal::Break(running.value)),
        Some(ast::Terminator::Return) => Flow::Break(Signal::Return(running.value)),
        Some(ast::Terminator::Capture { name, .. }) => {
            scope.set_typed(name, running.value.clone())?;
            Flow::Continue(running.value)
        }
        None => Flow::Continue(running.value),
    })
}

#[async_recursion(?Send)]
async fn exec_pipe_target(
    context: &Rc<Context>,
    scope: &Rc<Scope>,
    target: &ast::PipeTarget,
    pipe: &PipeCtx,
) -> Result<Flow<Value>, RillError> {
    use ast::PipeTarget::*;

    match target {
        Capture { name, .. } => {
            scope.set_typed(name, pipe.value.clone())?;
            Ok(Flow::Continue(pipe.value.clone()))
        }
        HostCall(call) | ClosureCall(call) => {
            Ok(Flow::Continue(call_named(context, scope, call, Some(pipe.value.clone()), pipe).await?))
        }
        PipeInvoke(args) => {
            let (mut positional, named) = eval_call_args(context, scope, args, pipe).await?;
            let Value::Callable(callable) = &pipe.value else {
                return Err(RillError::new(ErrorKind::TypeError, "piped value is not callable", None));
            };
            let callable = callable.clone();
            positional.insert(0, pipe.value.clone());
            Ok(Flow::Continue(invoke_callable(context, &callable, positional, named).await?))
        }
        MethodCall(method) => Ok(Flow::Continue(call_method(context, scope, method, pipe.value.clone(), pipe).await?)),
        Conditional(cond) => eval_conditional(context, scope, cond, pipe).await,
        Loop(lp) => eval_loop(context, scope, lp, pipe).await,
        DoWhile(dw) => eval_do_while(context, scope, dw, pipe).await,
        Block(block) => {
            let child = Scope::child(scope);
            exec_block(context, &child, block, pipe).await
        }
        StringLit(s) => Ok(Flow::Continue(Value::from(eval_interp_string(context, scope, s, pipe).await?))),
        Grouped(chain) => exec_pipe_chain(context, scope, chain, pipe).await,
        ClosureChain(node) => Ok(Flow::Continue(Value::Callable(make_closure(scope, node, false)))),
        Destructure(pattern) => {
            bind_pattern(context, scope, pattern, &pipe.value).await?;
            Ok(Flow::Continue(pipe.value.clone()))
        }
        Slice(spec) => Ok(Flow::Continue(eval_slice(context, scope, spec, &pipe.value, pipe).await?)),
        Spread => Ok(Flow::Continue(pipe.value.clone())),
        TypeAssertion(type_name) => {
            if !pipe.value.check_type(type_name) {
                return Err(RillError::new(
                    ErrorKind::TypeError,
                    format!("expected type '{type_name}', got '{}'", pipe.value.type_name()),
                    None,
                ));
            }
            Ok(Flow::Continue(pipe.value.clone()))
        }
        TypeCheck(type_name) => Ok(Flow::Continue(Value::Bool(pipe.value.check_type(type_name)))),
        Each(op) => eval_each(context, scope, op, pipe.value.clone(), pipe).await,
        Map(op) => eval_map(context, scope, op, pipe.value.clone(), pipe).await,
        Fold(op) => eval_fold(context, scope, op, pipe.value.clone(), pipe).await,
        Filter(op) => eval_filter(context, scope, op, pipe.value.clone(), pipe).await,
    }
}

/// The condition must evaluate to a bool; anything else is a `TYPE_ERROR`
/// (spec §4.5). Branches run in a fresh child scope with the same,
/// unmutated `pipe` the conditional itself received — "the outer pipeValue
/// restored" falls out automatically rather than needing explicit bookkeeping.
async fn eval_conditional(
    context: &Rc<Context>,
    scope: &Rc<Scope>,
    node: &ast::Conditional,
    pipe: &PipeCtx,
) -> Result<Flow<Value>, RillError> {
    let condition_value = match &node.condition {
        Some(expr) => eval_expr(context, scope, expr, pipe).await?,
        None => pipe.value.clone(),
    };

    let Value::Bool(condition) = condition_value else {
        return Err(RillError::new(
            ErrorKind::TypeError,
            format!("condition must evaluate to a bool, got '{}'", condition_value.type_name()),
            None,
        ));
    };

    let child = Scope::child(scope);
    if condition {
        exec_block(context, &child, &node.then_branch, pipe).await
    } else if let Some(else_branch) = &node.else_branch {
        exec_block(context, &child, else_branch, pipe).await
    } else {
        Ok(Flow::Continue(pipe.value.clone()))
    }
}

async fn eval_loop(
    context: &Rc<Context>,
    scope: &Rc<Scope>,
    node: &ast::Loop,
    pipe: &PipeCtx,
) -> Result<Flow<Value>, RillError> {
    let source = match &node.input {
        Some(expr) => eval_expr(context, scope, expr, pipe).await?,
        None => pipe.value.clone(),
    };

    let items = materialize_sequence(context, &source, context.effective_limit()).await?;

    for item in items {
        context.check_cancelled()?;

        let child = Scope::child(scope);
        let body_pipe = PipeCtx { value: item, accumulator: pipe.accumulator.clone() };

        match exec_block(context, &child, &node.body, &body_pipe).await? {
            Flow::Continue(_) => {}
            Flow::Break(Signal::Break(value)) => return Ok(Flow::Continue(value)),
            flow @ Flow::Break(Signal::Return(_)) => return Ok(flow),
        }
    }

    Ok(Flow::Continue(Value::Null))
}

async fn eval_do_while(
    context: &Rc<Context>,
    scope: &Rc<Scope>,
    node: &ast::DoWhile,
    pipe: &PipeCtx,
) -> Result<Flow<Value>, RillError> {
    loop {
        context.check_cancelled()?;

        let child = Scope::child(scope);

        match exec_block(context, &child, &node.body, pipe).await? {
            Flow::Continue(_) => {}
            Flow::Break(Signal::Break(value)) => return Ok(Flow::Continue(value)),
            flow @ Flow::Break(Signal::Return(_)) => return Ok(flow),
        }

        if !eval_expr(context, scope, &node.condition, pipe).await?.is_truthy() {
            break;
        }
    }

    Ok(Flow::Continue(Value::Null))
}

/// Turn a value into the `Vec<Value>` a loop or collection operator iterates
/// over: lists pass through, dicts iterate as `(key, value)` tuples in
/// sorted-key order, and rill iterator-protocol dicts are drained through
/// `iterator::collect` (spec §4.6/§4.9).
async fn materialize_sequence(
    context: &Rc<Context>,
    value: &Value,
    limit: usize,
) -> Result<Vec<Value>, RillError> {
    match value {
        Value::List(items) => Ok(items.as_ref().clone()),
        Value::Dict(dict) if crate::iterator::is_iterator(value) => {
            crate::iterator::collect(context, dict.clone(), limit).await
        }
        Value::Dict(dict) => Ok(dict
            .sorted_keys()
            .into_iter()
            .filter_map(|key| {
                dict.get(&key)
                    .map(|v| Value::from(Tuple::Positional(vec![Value::from(key.to_string()), v])))
            })
            .collect()),
        other => Err(RillError::new(
            ErrorKind::TypeError,
            format!("cannot iterate over a value of type '{}'", other.type_name()),
            None,
        )),
    }
}

#[async_recursion(?Send)]
async fn eval_expr(context: &Rc<Context>, scope: &Rc<Scope>, expr: &ast::Expr, pipe: &PipeCtx) -> Result<Value, RillError> {
    match expr {
        ast::Expr::Number(n) => Ok(Value::Number(*n)),
        ast::Expr::Bool(b) => Ok(Value::Bool(*b)),
        ast::Expr::StringLit(s) => Ok(Value::from(eval_interp_string(context, scope, s, pipe).await?)),
        ast::Expr::Arithmetic(op, lhs, rhs) => {
            let lhs = eval_expr(context, scope, lhs, pipe).await?;
            let rhs = eval_expr(context, scope, rhs, pipe).await?;
            eval_arithmetic(*op, lhs, rhs)
        }
        ast::Expr::Negate(inner) => match eval_expr(context, scope, inner, pipe).await? {
            Value::Number(n) => Ok(Value::Number(-n)),
            other => Err(RillError::new(
                ErrorKind::TypeError,
                format!("cannot negate a value of type '{}'", other.type_name()),
                None,
            )),
        },
        ast::Expr::Compare(op, lhs, rhs) => {
            let lhs = eval_expr(context, scope, lhs, pipe).await?;
            let rhs = eval_expr(context, scope, rhs, pipe).await?;
            eval_compare(*op, &lhs, &rhs)
        }
        ast::Expr::Logical(op, lhs, rhs) => eval_logical(context, scope, *op, lhs, rhs, pipe).await,
        ast::Expr::Not(inner) => Ok(Value::Bool(!eval_expr(context, scope, inner, pipe).await?.is_truthy())),
        ast::Expr::Primary(primary) => eval_primary(context, scope, primary, pipe).await,
    }
}

fn eval_arithmetic(op: ast::BinOp, lhs: Value, rhs: Value) -> Result<Value, RillError> {
    use ast::BinOp::*;

    match (&op, &lhs, &rhs) {
        (Add, Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
        (Add, Value::String(a), Value::String(b)) => Ok(Value::from(format!("{a}{b}"))),
        (Add, Value::List(a), Value::List(b)) => {
            let mut items = a.as_ref().clone();
            items.extend(b.as_ref().clone());
            Ok(Value::from(items))
        }
        (Sub, Value::Number(a), Value::Number(b)) => Ok(Value::Number(a - b)),
        (Mul, Value::Number(a), Value::Number(b)) => Ok(Value::Number(a * b)),
        (Div, Value::Number(a), Value::Number(b)) => Ok(Value::Number(a / b)),
        (Mod, Value::Number(a), Value::Number(b)) => Ok(Value::Number(a % b)),
        _ => Err(RillError::new(
            ErrorKind::TypeError,
            format!("cannot apply {op:?} to '{}' and '{}'", lhs.type_name(), rhs.type_name()),
            None,
        )),
    }
}

fn eval_compare(op: ast::CmpOp, lhs: &Value, rhs: &Value) -> Result<Value, RillError> {
    use ast::CmpOp::*;

    match op {
        Eq => Ok(Value::Bool(lhs.deep_equals(rhs))),
        Ne => Ok(Value::Bool(!lhs.deep_equals(rhs))),
        Lt | Gt | Le | Ge => match (lhs, rhs) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Bool(order(op, a, b))),
            (Value::String(a), Value::String(b)) => Ok(Value::Bool(order(op, a, b))),
            _ => Err(RillError::new(
                ErrorKind::TypeError,
                format!("cannot order-compare '{}' and '{}'", lhs.type_name(), rhs.type_name()),
                None,
            )),
        },
    }
}

fn order<T: PartialOrd>(op: ast::CmpOp, a: T, b: T) -> bool {
    use ast::CmpOp::*;
    match op {
        Lt => a < b,
        Gt => a > b,
        Le => a <= b,
        Ge => a >= b,
        Eq | Ne => unreachable!("handled by deep_equals"),
    }
}

async fn eval_logical(
    context: &Rc<Context>,
    scope: &Rc<Scope>,
    op: ast::LogicalOp,
    lhs: &ast::Expr,
    rhs: &ast::Expr,
    pipe: &PipeCtx,
) -> Result<Value, RillError> {
    let lhs_value = eval_expr(context, scope, lhs, pipe).await?;

    match op {
        ast::LogicalOp::And if !lhs_value.is_truthy() => Ok(lhs_value),
        ast::LogicalOp::Or if lhs_value.is_truthy() => Ok(lhs_value),
        _ => eval_expr(context, scope, rhs, pipe).await,
    }
}

#[async_recursion(?Send)]
async fn eval_primary(
    context: &Rc<Context>,
    scope: &Rc<Scope>,
    primary: &ast::Primary,
    pipe: &PipeCtx,
) -> Result<Value, RillError> {
    use ast::Primary::*;

    match primary {
        StringLit(s) => Ok(Value::from(eval_interp_string(context, scope, s, pipe).await?)),
        Number(n) => Ok(Value::Number(*n)),
        Bool(b) => Ok(Value::Bool(*b)),
        Tuple(lit) => eval_tuple_literal(context, scope, lit, pipe).await,
        Dict(lit) => eval_dict_literal(context, scope, lit, pipe).await,
        Closure(node) => Ok(Value::Callable(make_closure(scope, node, false))),
        Variable(variable) => eval_variable(context, scope, variable, pipe).await,
        HostCall(call) | ClosureCall(call) => call_named(context, scope, call, None, pipe).await,
        MethodCallHead(_) => Err(RillError::new(
            ErrorKind::TypeError,
            "a method call needs a receiver from a pipe",
            None,
        )),
        Conditional(cond) => Ok(eval_conditional(context, scope, cond, pipe).await?.into_value()),
        Loop(lp) => Ok(eval_loop(context, scope, lp, pipe).await?.into_value()),
        Block(block) => {
            let child = Scope::child(scope);
            Ok(exec_block(context, &child, block, pipe).await?.into_value())
        }
        Grouped(chain) => Ok(exec_pipe_chain(context, scope, chain, pipe).await?.into_value()),
        Spread(inner) => eval_expr(context, scope, inner, pipe).await,
        TypeAssertion { expr, type_name } => {
            let value = eval_expr(context, scope, expr, pipe).await?;
            if !value.check_type(type_name) {
                return Err(RillError::new(
                    ErrorKind::TypeError,
                    format!("expected type '{type_name}', got '{}'", value.type_name()),
                    None,
                ));
            }
            Ok(value)
        }
        TypeCheck { expr, type_name } => {
            let value = eval_expr(context, scope, expr, pipe).await?;
            Ok(Value::Bool(value.check_type(type_name)))
        }
    }
}

/// Resolve a variable reference. `

` and `$@` are not ordinary scope
/// bindings — there is no dedicated AST node for them, so they arrive here
/// as `Variable { name: "$" | "$@", .. }` and are resolved against the
/// threaded `pipe` before falling through to a normal scope lookup (spec
/// §4.6, GLOSSARY).
async fn eval_variable(
    context: &Rc<Context>,
    scope: &Rc<Scope>,
    variable: &ast::Variable,
    pipe: &PipeCtx,
) -> Result<Value, RillError> {
    let existence_check = variable.existence_check.is_some();

    let mut current = match variable.name.as_str() {
        "$" => Some(pipe.value.clone()),
        "$@" => match pipe.accumulator.clone() {
            Some(value) => Some(value),
            None if existence_check => None,
            None => {
                return Err(RillError::new(ErrorKind::UndefinedVariable, "no accumulator '$@' in scope", None))
            }
        },
        name => match scope.get(name) {
            Some(value) => Some(value),
            None if existence_check => None,
            None => {
                return Err(RillError::new(
                    ErrorKind::UndefinedVariable,
                    format!("undefined variable '{name}'"),
                    None,
                ))
            }
        },
    };

    for step in &variable.chain {
        current = match current {
            Some(value) => access_step(context, scope, &value, step, pipe).await?,
            None => None,
        };

        if current.is_none() && !existence_check {
            return Err(RillError::new(
                ErrorKind::UndefinedVariable,
                format!("'{}' has no member '{}'", variable.name, describe_step(step)),
                None,
            )
            .with_context(ErrorContext::DictKey { key: describe_step(step), available_keys: Vec::new() }));
        }
    }

    if existence_check {
        return Ok(Value::Bool(current.is_some()));
    }

    match current {
        Some(Value::Callable(callable)) if callable.is_property() => {
            invoke_callable(context, &callable, Vec::new(), Vec::new()).await
        }
        Some(value) => Ok(value),
        None => match &variable.default {
            Some(default) => eval_expr(context, scope, default, pipe).await,
            None => Err(RillError::new(
                ErrorKind::UndefinedVariable,
                format!("undefined variable '{}'", variable.name),
                None,
            )),
        },
    }
}

fn describe_step(step: &ast::AccessStep) -> String {
    match step {
        ast::AccessStep::Field(ast::FieldAccess::Name(n) | ast::FieldAccess::Named(n)) => n.clone(),
        ast::AccessStep::Field(_) => "<computed>".to_string(),
        ast::AccessStep::Index(_) => "<index>".to_string(),
    }
}

#[async_recursion(?Send)]
async fn access_step(
    context: &Rc<Context>,
    scope: &Rc<Scope>,
    value: &Value,
    step: &ast::AccessStep,
    pipe: &PipeCtx,
) -> Result<Option<Value>, RillError> {
    match step {
        ast::AccessStep::Field(field) => access_field(context, scope, value, field, pipe).await,
        ast::AccessStep::Index(expr) => {
            let index = eval_expr(context, scope, expr, pipe).await?;
            access_index(value, &index)
        }
    }
}

async fn access_field(
    context: &Rc<Context>,
    scope: &Rc<Scope>,
    value: &Value,
    field: &ast::FieldAccess,
    pipe: &PipeCtx,
) -> Result<Option<Value>, RillError> {
    let Value::Dict(dict) = value else {
        return Err(RillError::new(
            ErrorKind::TypeError,
            format!("cannot access a field on a value of type '{}'", value.type_name()),
            None,
        ));
    };

    let key_value = |value: Value| -> Result<Option<Value>, RillError> {
        match value {
            Value::String(key) => Ok(dict.get(&key)),
            other => Err(RillError::new(
                ErrorKind::TypeError,
                format!("dict keys must be strings, got '{}'", other.type_name()),
                None,
            )),
        }
    };

    let found = match field {
        ast::FieldAccess::Name(name) | ast::FieldAccess::Named(name) => dict.get(name),
        ast::FieldAccess::Alternatives(names) => names.iter().find_map(|n| dict.get(n)),
        ast::FieldAccess::Computed(expr) => key_value(eval_expr(context, scope, expr, pipe).await?)?,
        ast::FieldAccess::Block(block) => {
            let child = Scope::child(scope);
            key_value(exec_block(context, &child, block, pipe).await?.into_value())?
        }
    };

    if let Some(Value::Callable(callable)) = &found {
        if callable.is_property() {
            callable.bind_to(dict);
        }
    }

    Ok(found)
}

fn access_index(value: &Value, index: &Value) -> Result<Option<Value>, RillError> {
    fn at(len: usize, n: f64) -> Option<usize> {
        let len = len as i64;
        let idx = n as i64;
        let idx = if idx < 0 { idx + len } else { idx };
        (idx >= 0 && idx < len).then_some(idx as usize)
    }

    match (value, index) {
        (Value::List(items), Value::Number(n)) => Ok(at(items.len(), *n).map(|i| items[i].clone())),
        (Value::Tuple(tuple), Value::Number(n)) => match tuple.as_ref() {
            Tuple::Positional(items) => Ok(at(items.len(), *n).map(|i| items[i].clone())),
            Tuple::Named(_) => {
                Err(RillError::new(ErrorKind::TypeError, "cannot index a named tuple by position", None))
            }
        },
        (Value::Dict(dict), Value::String(key)) => Ok(dict.get(key)),
        (other, _) => Err(RillError::new(
            ErrorKind::TypeError,
            format!("cannot index a value of type '{}'", other.type_name()),
            None,
        )),
    }
}

async fn eval_slice(
    context: &Rc<Context>,
    scope: &Rc<Scope>,
    spec: &ast::SliceSpec,
    value: &Value,
    pipe: &PipeCtx,
) -> Result<Value, RillError> {
    let Value::List(items) = value else {
        return Err(RillError::new(
            ErrorKind::TypeError,
            format!("cannot slice a value of type '{}'", value.type_name()),
            None,
        ));
    };

    let len = items.len() as i64;

    let step = match &spec.step {
        Some(expr) => match eval_expr(context, scope, expr, pipe).await? {
            Value::Number(n) => n as i64,
            other => return Err(RillError::new(ErrorKind::TypeError, format!("slice step must be a number, got '{}'", other.type_name()), None)),
        },
        None => 1,
    };
    if step == 0 {
        return Err(RillError::new(ErrorKind::TypeError, "slice step cannot be zero", None));
    }

    let start = match &spec.start {
        Some(expr) => as_index(eval_expr(context, scope, expr, pipe).await?, len)?,
        None => if step > 0 { 0 } else { len - 1 },
    };
    let stop = match &spec.stop {
        Some(expr) => as_index(eval_expr(context, scope, expr, pipe).await?, len)?,
        None => if step > 0 { len } else { -1 },
    };

    let mut result = Vec::new();
    let mut i = start;
    if step > 0 {
        while i < stop && i < len {
            if i >= 0 {
                result.push(items[i as usize].clone());
            }
            i += step;
        }
    } else {
        while i > stop && i >= 0 {
            if i < len {
                result.push(items[i as usize].clone());
            }
            i += step;
        }
    }

    Ok(Value::from(result))
}

fn as_index(value: Value, len: i64) -> Result<i64, RillError> {
    match value {
        Value::Number(n) => {
            let idx = n as i64;
            Ok(if idx < 0 { idx + len } else { idx })
        }
        other => Err(RillError::new(
            ErrorKind::TypeError,
            format!("slice bound must be a number, got '{}'", other.type_name()),
            None,
        )),
    }
}

async fn call_named(
    context: &Rc<Context>,
    scope: &Rc<Scope>,
    call: &ast::Call,
    piped: Option<Value>,
    pipe: &PipeCtx,
) -> Result<Value, RillError> {
    let (mut positional, named) = eval_call_args(context, scope, &call.args, pipe).await?;
    if let Some(value) = piped {
        positional.insert(0, value);
    }

    if let Some(Value::Callable(callable)) = scope.get(&call.name) {
        return invoke_callable(context, &callable, positional, named).await;
    }

    if let Some(callable) = context.lookup_function(&call.name) {
        return invoke_callable(context, &callable, positional, named).await;
    }

    Err(RillError::new(
        ErrorKind::UndefinedFunction,
        format!("undefined function '{}'", call.name),
        None,
    ))
}

async fn call_method(
    context: &Rc<Context>,
    scope: &Rc<Scope>,
    method: &ast::MethodCall,
    receiver: Value,
    pipe: &PipeCtx,
) -> Result<Value, RillError> {
    let (positional, named) = eval_call_args(context, scope, &method.args, pipe).await?;

    if let Value::Dict(dict) = &receiver {
        if let Some(Value::Callable(callable)) = dict.get(&method.name) {
            callable.bind_to(dict);
            return invoke_callable(context, &callable, positional, named).await;
        }
    }

    if let Some(callable) = context.lookup_method(&method.name) {
        let mut positional = positional;
        positional.insert(0, receiver);
        return invoke_callable(context, &callable, positional, named).await;
    }

    Err(RillError::new(
        ErrorKind::UndefinedMethod,
        format!("undefined method '{}' for type '{}'", method.name, receiver.type_name()),
        None,
    ))
}

/// Evaluate a call's argument expressions against the same unmutated `pipe`
/// for every argument — the save/restore invariant (I3: "argument
/// expressions may read `

` but must not visibly mutate it for the outer
/// chain") holds automatically, since no argument ever sees another
/// argument's evaluation reflected back into `pipe`.
async fn eval_call_args(
    context: &Rc<Context>,
    scope: &Rc<Scope>,
    args: &[ast::CallArg],
    pipe: &PipeCtx,
) -> Result<(Vec<Value>, Vec<(String, Value)>), RillError> {
    let mut positional = Vec::new();
    let mut named = Vec::new();

    for arg in args {
        match arg {
            ast::CallArg::Expr(expr) => positional.push(eval_expr(context, scope, expr, pipe).await?),
            ast::CallArg::Spread(expr) => match eval_expr(context, scope, expr, pipe).await? {
                Value::List(items) => positional.extend(items.as_ref().clone()),
                Value::Tuple(tuple) => match tuple.as_ref() {
                    Tuple::Positional(items) => positional.extend(items.clone()),
                    Tuple::Named(entries) => named.extend(entries.clone()),
                },
                Value::Null => {}
                other => {
                    return Err(RillError::new(
                        ErrorKind::TypeError,
                        format!("cannot spread a value of type '{}' into call arguments", other.type_name()),
                        None,
                    ))
                }
            },
        }
    }

    Ok((positional, named))
}

async fn eval_tuple_literal(
    context: &Rc<Context>,
    scope: &Rc<Scope>,
    lit: &ast::TupleLit,
    pipe: &PipeCtx,
) -> Result<Value, RillError> {
    let all_named = lit.entries.iter().all(|e| matches!(e, ast::TupleEntry::Named(..)));
    let all_positional = lit.entries.iter().all(|e| matches!(e, ast::TupleEntry::Positional(_)));

    if !lit.entries.is_empty() && !all_named && !all_positional {
        return Err(RillError::new(
            ErrorKind::TypeError,
            "a tuple's entries must be either all positional or all named, not mixed",
            None,
        ));
    }

    if all_named {
        let mut entries = Vec::with_capacity(lit.entries.len());
        for entry in &lit.entries {
            let ast::TupleEntry::Named(name, expr) = entry else { unreachable!() };
            entries.push((name.clone(), eval_expr(context, scope, expr, pipe).await?));
        }
        Ok(Value::from(Tuple::Named(entries)))
    } else {
        let mut entries = Vec::with_capacity(lit.entries.len());
        for entry in &lit.entries {
            let ast::TupleEntry::Positional(expr) = entry else { unreachable!() };
            entries.push(eval_expr(context, scope, expr, pipe).await?);
        }
        Ok(Value::from(Tuple::Positional(entries)))
    }
}

async fn eval_dict_literal(
    context: &Rc<Context>,
    scope: &Rc<Scope>,
    lit: &ast::DictLit,
    pipe: &PipeCtx,
) -> Result<Value, RillError> {
    let dict = Dict::new();

    for (key_expr, value_expr) in &lit.entries {
        let key = eval_expr(context, scope, key_expr, pipe).await?;
        let Value::String(key) = key else {
            return Err(RillError::new(
                ErrorKind::TypeError,
                format!("dict keys must be strings, got '{}'", key.type_name()),
                None,
            ));
        };
        dict.set(key, eval_expr(context, scope, value_expr, pipe).await?);
    }

    Ok(Value::Dict(dict))
}

/// Interpolate `

"..."` parts against the same unmutated `pipe` for every
/// part — satisfying the "save before the first interpolation, restore
/// before each subsequent one" requirement (spec §4.4) without any explicit
/// bookkeeping, the same way `eval_call_args` does for call arguments.
async fn eval_interp_string(
    context: &Rc<Context>,
    scope: &Rc<Scope>,
    string: &ast::InterpString,
    pipe: &PipeCtx,
) -> Result<String, RillError> {
    let mut out = String::new();

    for part in &string.parts {
        match part {
            ast::StringPart::Literal(text) => out.push_str(text),
            ast::StringPart::Interp(expr) => out.push_str(&eval_expr(context, scope, expr, pipe).await?.to_string()),
        }
    }

    Ok(out)
}

fn make_closure(scope: &Rc<Scope>, node: &ast::ClosureNode, is_property: bool) -> Callable {
    Callable::Script(Rc::new(ScriptCallable {
        name: None,
        params: node.params.clone(),
        body: Rc::new(node.body.clone()),
        defining_scope: Rc::clone(scope),
        is_property,
        bound_dict: RefCell::new(None),
    }))
}

async fn bind_pattern(
    context: &Rc<Context>,
    scope: &Rc<Scope>,
    pattern: &ast::Pattern,
    value: &Value,
) -> Result<(), RillError> {
    match pattern {
        ast::Pattern::Positional(elems) => {
            let Value::List(items) = value else {
                return Err(RillError::new(
                    ErrorKind::TypeError,
                    format!("cannot positionally destructure a value of type '{}'", value.type_name()),
                    None,
                ));
            };

            if items.len() != elems.len() {
                return Err(RillError::new(
                    ErrorKind::TypeError,
                    format!("expected {} element(s) to destructure, got {}", elems.len(), items.len()),
                    None,
                )
                .with_context(ErrorContext::Destructure { expected: elems.len(), actual: items.len() }));
            }

            for (elem, item) in elems.iter().zip(items.iter()) {
                bind_pattern_elem(context, scope, elem, item).await?;
            }
            Ok(())
        }
        ast::Pattern::Keyed(pairs) => {
            let Value::Dict(dict) = value else {
                return Err(RillError::new(
                    ErrorKind::TypeError,
                    format!("cannot key-destructure a value of type '{}'", value.type_name()),
                    None,
                ));
            };

            for (key, binding) in pairs {
                let found = dict.get(key).ok_or_else(|| {
                    RillError::new(ErrorKind::TypeError, format!("missing key '{key}' while destructuring"), None)
                        .with_context(ErrorContext::DictKey {
                            key: key.clone(),
                            available_keys: dict.sorted_keys().iter().map(|k| k.to_string()).collect(),
                        })
                })?;
                scope.set_typed(binding, found)?;
            }
            Ok(())
        }
    }
}

#[async_recursion(?Send)]
async fn bind_pattern_elem(
    context: &Rc<Context>,
    scope: &Rc<Scope>,
    elem: &ast::PatternElem,
    value: &Value,
) -> Result<(), RillError> {
    match elem {
        ast::PatternElem::Skip => Ok(()),
        ast::PatternElem::Bind(name) => scope.set_typed(name, value.clone()),
        ast::PatternElem::Nested(pattern) => bind_pattern(context, scope, pattern, value).await,
    }
}

/// Evaluate a collection-operator body against a fixed argument list: `[it]`
/// for `each`/`map`/`filter`, `[it, acc]` for `fold` or an `each` carrying an
/// accumulator. Every body kind sees `

` bound to the current element and,
/// when present, `$@` bound to the accumulator (spec §4.6) — a closure body
/// additionally gets them through its own invocation's `initial_pipe`
/// override, a block body directly through `exec_block`'s threaded `pipe`.
///
/// Returns the body's `Flow` rather than a collapsed `Value` so that a
/// `break` raised inside it (script or block) can be observed by the caller
/// (`eval_each`/`eval_fold`) instead of surfacing as a bogus type error
/// (spec §4.3, I6).
async fn apply_collection_body(
    context: &Rc<Context>,
    scope: &Rc<Scope>,
    body: &ast::CollectionBody,
    args: Vec<Value>,
) -> Result<Flow<Value>, RillError> {
    let body_pipe = PipeCtx { value: args.first().cloned().unwrap_or(Value::Null), accumulator: args.get(1).cloned() };

    match body {
        ast::CollectionBody::InlineClosure(node) => {
            let callable = make_closure(scope, node, false);
            invoke_callable_flow(context, &callable, args, Vec::new(), Some(body_pipe)).await
        }
        ast::CollectionBody::Block(block) => {
            let child = Scope::child(scope);
            exec_block(context, &child, block, &body_pipe).await
        }
        ast::CollectionBody::Grouped(expr) | ast::CollectionBody::Postfix(expr) | ast::CollectionBody::Spread(expr) => {
            match eval_expr(context, scope, expr, &body_pipe).await? {
                Value::Callable(callable) => invoke_callable_flow(context, &callable, args, Vec::new(), Some(body_pipe)).await,
                other => Ok(Flow::Continue(other)),
            }
        }
        ast::CollectionBody::Variable(variable) => match eval_variable(context, scope, variable, &body_pipe).await? {
            Value::Callable(callable) => invoke_callable_flow(context, &callable, args, Vec::new(), Some(body_pipe)).await,
            other => Ok(Flow::Continue(other)),
        },
    }
}

/// `each` runs sequentially over the input and returns a list of all body
/// results (spec §4.6), including the empty-input law `[] -> each b == []`.
/// When the operator carries an `initial` expression, each step's result
/// becomes the next step's `$@` (a "scan"); a `break` mid-body stops the
/// loop and returns the partial list accumulated so far, with the break's
/// carried value as its last element.
async fn eval_each(
    context: &Rc<Context>,
    scope: &Rc<Scope>,
    op: &ast::CollectionOp,
    input: Value,
    outer_pipe: &PipeCtx,
) -> Result<Flow<Value>, RillError> {
    let items = materialize_sequence(context, &input, context.effective_limit()).await?;

    let mut acc = match &op.initial {
        Some(expr) => Some(eval_expr(context, scope, expr, outer_pipe).await?),
        None => None,
    };

    let mut results = Vec::with_capacity(items.len());

    for item in items {
        context.check_cancelled()?;

        let args = match &acc {
            Some(acc_value) => vec![item, acc_value.clone()],
            None => vec![item],
        };

        match apply_collection_body(context, scope, &op.body, args).await? {
            Flow::Continue(value) => {
                if acc.is_some() {
                    acc = Some(value.clone());
                }
                results.push(value);
            }
            Flow::Break(Signal::Break(value)) => {
                results.push(value);
                return Ok(Flow::Continue(Value::from(results)));
            }
            flow @ Flow::Break(Signal::Return(_)) => return Ok(flow),
        }
    }

    Ok(Flow::Continue(Value::from(results)))
}

/// `fold` runs sequentially, threading an accumulator seeded by the
/// operator's `initial` expression and returning only its final value; an
/// empty input leaves the accumulator unchanged (spec §4.6). A `break` short-
/// circuits the remaining iterations, and its carried value becomes the
/// final accumulator.
async fn eval_fold(
    context: &Rc<Context>,
    scope: &Rc<Scope>,
    op: &ast::CollectionOp,
    input: Value,
    outer_pipe: &PipeCtx,
) -> Result<Flow<Value>, RillError> {
    let items = materialize_sequence(context, &input, context.effective_limit()).await?;
    let mut acc = match &op.initial {
        Some(expr) => eval_expr(context, scope, expr, outer_pipe).await?,
        None => Value::Null,
    };

    for item in items {
        context.check_cancelled()?;

        match apply_collection_body(context, scope, &op.body, vec![item, acc.clone()]).await? {
            Flow::Continue(value) => acc = value,
            Flow::Break(Signal::Break(value)) => return Ok(Flow::Continue(value)),
            flow @ Flow::Break(Signal::Return(_)) => return Ok(flow),
        }
    }

    Ok(Flow::Continue(acc))
}

/// `map` runs its body concurrently within each batch (bounded by the
/// current `limit` annotation, spec §9 "iteration limits and parallelism"
/// double as a concurrency ceiling) but always reassembles results in input
/// order, regardless of completion order. `break` has no defined meaning
/// across concurrently launched bodies, so it is rejected as a usage error
/// rather than silently picking an arbitrary completion order to honor it.
async fn eval_map(
    context: &Rc<Context>,
    scope: &Rc<Scope>,
    op: &ast::CollectionOp,
    input: Value,
    _outer_pipe: &PipeCtx,
) -> Result<Flow<Value>, RillError> {
    let limit = context.effective_limit();
    let items = materialize_sequence(context, &input, limit).await?;

    let mut mapped = Vec::with_capacity(items.len());
    for batch in items.chunks(limit.max(1)) {
        let futures = batch.iter().cloned().map(|item| apply_collection_body(context, scope, &op.body, vec![item]));
        for result in join_all(futures).await {
            match result? {
                Flow::Continue(value) => mapped.push(value),
                Flow::Break(Signal::Break(_)) => {
                    return Err(RillError::new(ErrorKind::TypeError, "'break' is not supported inside a map body", None))
                }
                flow @ Flow::Break(Signal::Return(_)) => return Ok(flow),
            }
        }
    }

    Ok(Flow::Continue(Value::from(mapped)))
}

/// `filter` shares `map`'s batched concurrency but keeps each kept item
/// paired with its original position so order is preserved even though
/// predicates within a batch run out of order. As with `map`, `break` inside
/// a concurrently launched predicate is rejected rather than given an
/// arbitrary meaning.
async fn eval_filter(
    context: &Rc<Context>,
    scope: &Rc<Scope>,
    op: &ast::CollectionOp,
    input: Value,
    _outer_pipe: &PipeCtx,
) -> Result<Flow<Value>, RillError> {
    let limit = context.effective_limit();
    let items = materialize_sequence(context, &input, limit).await?;

    let mut filtered = Vec::new();
    for batch in items.chunks(limit.max(1)) {
        let futures = batch.iter().cloned().map(|item| {
            let kept_item = item.clone();
            async move {
                let verdict = apply_collection_body(context, scope, &op.body, vec![item]).await?;
                Ok::<_, RillError>((kept_item, verdict))
            }
        });

        for result in join_all(futures).await {
            let (item, verdict) = result?;
            match verdict {
                Flow::Continue(value) => {
                    if value.is_truthy() {
                        filtered.push(item);
                    }
                }
                Flow::Break(Signal::Break(_)) => {
                    return Err(RillError::new(ErrorKind::TypeError, "'break' is not supported inside a filter body", None))
                }
                flow @ Flow::Break(Signal::Return(_)) => return Ok(flow),
            }
        }
    }

    Ok(Flow::Continue(Value::from(filtered)))
}
