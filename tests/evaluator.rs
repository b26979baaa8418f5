//! End-to-end evaluator tests built on hand-constructed ASTs — there is no
//! parser in this crate, so every program here is assembled directly from
//! `rill::ast` nodes rather than written as source text.
use rill::ast::{
    AnnotationEntry, Block, Call, CallArg, CollectionBody, CollectionOp, Expr, InterpString, Location, Loop, Param,
    Pattern, PatternElem, PipeChain, PipeTarget, Position, Primary, Statement, StringPart, Terminator, Variable,
};
use rill::ast::{BinOp, ClosureNode, CmpOp, Conditional};
use rill::{Callable, Context, ErrorKind, HostFn, HostFuture, HostKind, Value};
use std::rc::Rc;
use std::time::Duration;

fn loc() -> Location {
    Location::default()
}

fn at(line: usize) -> Location {
    Location { start: Position { line, column: 1, offset: 0 }, end: Position { line, column: 1, offset: 0 } }
}

fn num(n: f64) -> Expr {
    Expr::Number(n)
}

fn str_lit(s: &str) -> Expr {
    Expr::StringLit(InterpString { parts: vec![StringPart::Literal(s.to_string())], location: loc() })
}

fn var(name: &str) -> Expr {
    Expr::Primary(Primary::Variable(Variable {
        name: name.to_string(),
        chain: Vec::new(),
        default: None,
        existence_check: None,
        location: loc(),
    }))
}

fn host_call(name: &str, args: Vec<CallArg>) -> Expr {
    Expr::Primary(Primary::HostCall(Call { name: name.to_string(), args, location: loc() }))
}

fn chain(head: Expr, targets: Vec<PipeTarget>, terminator: Option<Terminator>) -> PipeChain {
    PipeChain { head: Box::new(head), targets, terminator, location: loc() }
}

fn stmt(chain: PipeChain) -> Statement {
    Statement { annotations: Vec::new(), chain, location: loc() }
}

fn block(statements: Vec<Statement>) -> Block {
    Block { statements, location: loc() }
}

fn capture(name: &str) -> Terminator {
    Terminator::Capture { name: name.to_string(), type_name: None }
}

/// A collection-operator body of a single expression statement: `{ <expr> }`.
fn op_body(expr: Expr) -> CollectionBody {
    CollectionBody::Block(block(vec![stmt(chain(expr, Vec::new(), None))]))
}

fn host(name: &str, func: HostFn) -> Callable {
    rill::host_fn(HostKind::Runtime, name, Vec::new(), func)
}

fn const_list(values: &[f64]) -> HostFn {
    let values: Vec<Value> = values.iter().map(|n| Value::Number(*n)).collect();
    Rc::new(move |_args: Vec<Value>| -> HostFuture {
        let values = values.clone();
        Box::pin(async move { Ok(Value::from(values)) })
    })
}

#[tokio::test]
async fn filter_map_fold_pipeline_runs_in_order() {
    let context = Context::builder().register_function("nums", host("nums", const_list(&[1.0, 2.0, 3.0, 4.0, 5.0]))).build();

    let filter_op = CollectionOp {
        body: op_body(Expr::Compare(CmpOp::Gt, Box::new(var("$")), Box::new(num(2.0)))),
        initial: None,
        location: loc(),
    };
    let map_op = CollectionOp {
        body: op_body(Expr::Arithmetic(BinOp::Mul, Box::new(var("$")), Box::new(num(10.0)))),
        initial: None,
        location: loc(),
    };
    let fold_op = CollectionOp {
        body: op_body(Expr::Arithmetic(BinOp::Add, Box::new(var("$@")), Box::new(var("$")))),
        initial: Some(Box::new(num(0.0))),
        location: loc(),
    };

    let program = block(vec![stmt(chain(
        host_call("nums", Vec::new()),
        vec![PipeTarget::Filter(filter_op), PipeTarget::Map(map_op), PipeTarget::Fold(fold_op)],
        None,
    ))]);

    let result = rill::eval_program(&context, &program).await.unwrap();
    assert_eq!(result, Value::Number(120.0));
}

#[tokio::test]
async fn filter_on_empty_input_short_circuits_to_empty() {
    let context = Context::builder().register_function("nums", host("nums", const_list(&[]))).build();

    let filter_op = CollectionOp {
        body: op_body(Expr::Compare(CmpOp::Gt, Box::new(var("$")), Box::new(num(0.0)))),
        initial: None,
        location: loc(),
    };

    let program =
        block(vec![stmt(chain(host_call("nums", Vec::new()), vec![PipeTarget::Filter(filter_op)], None))]);

    let result = rill::eval_program(&context, &program).await.unwrap();
    assert_eq!(result, Value::from(Vec::<Value>::new()));
}

#[tokio::test]
async fn reassigning_a_locked_variable_with_a_different_type_is_a_type_error() {
    let context = Context::builder().build();

    let program = block(vec![
        stmt(chain(num(1.0), Vec::new(), Some(capture("x")))),
        stmt(chain(str_lit("oops"), Vec::new(), Some(capture("x")))),
    ]);

    let err = rill::eval_program(&context, &program).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
}

#[tokio::test]
async fn captured_values_are_visible_to_later_statements() {
    let context = Context::builder().build();

    let program = block(vec![
        stmt(chain(num(4.0), Vec::new(), Some(capture("x")))),
        stmt(chain(Expr::Arithmetic(BinOp::Add, Box::new(var("x")), Box::new(num(1.0))), Vec::new(), None)),
    ]);

    let result = rill::eval_program(&context, &program).await.unwrap();
    assert_eq!(result, Value::Number(5.0));
}

#[tokio::test]
async fn host_call_with_mistyped_argument_is_rejected() {
    let add = rill::host_fn(
        HostKind::Runtime,
        "add",
        vec![
            rill::host_param("a", Some("number".to_string()), None, None).unwrap(),
            rill::host_param("b", Some("number".to_string()), None, None).unwrap(),
        ],
        Rc::new(|args: Vec<Value>| -> HostFuture {
            Box::pin(async move {
                let (Value::Number(a), Value::Number(b)) = (&args[0], &args[1]) else { unreachable!() };
                Ok(Value::Number(a + b))
            })
        }),
    );
    let context = Context::builder().register_function("add", add).build();

    let program = block(vec![stmt(chain(
        host_call("add", vec![CallArg::Expr(num(1.0)), CallArg::Expr(str_lit("nope"))]),
        Vec::new(),
        None,
    ))]);

    let err = rill::eval_program(&context, &program).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
}

#[tokio::test]
async fn host_call_exceeding_its_timeout_is_reported() {
    let slow = rill::host_fn(
        HostKind::Runtime,
        "slow",
        Vec::new(),
        Rc::new(|_args: Vec<Value>| -> HostFuture {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(Value::Null)
            })
        }),
    );
    let context = Context::builder().register_function("slow", slow).timeout(Duration::from_millis(1)).build();

    let program = block(vec![stmt(chain(host_call("slow", Vec::new()), Vec::new(), None))]);

    let err = rill::eval_program(&context, &program).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
}

/// An unbounded iterator-protocol dict: `{value, done: false, next}` that
/// never sets `done`, used to exercise the iteration-limit guard.
fn unbounded_counter() -> HostFn {
    fn state(n: i64) -> Value {
        let dict = rill::Dict::new();
        dict.set("value", Value::Number(n as f64));
        dict.set("done", Value::Bool(false));
        let next: HostFn = Rc::new(move |_args: Vec<Value>| -> HostFuture {
            Box::pin(async move { Ok(state(n + 1)) })
        });
        dict.set(
            "next",
            Value::Callable(rill::host_fn(HostKind::Runtime, "next", Vec::new(), next)),
        );
        Value::Dict(dict)
    }
    Rc::new(|_args: Vec<Value>| -> HostFuture { Box::pin(async move { Ok(state(0)) }) })
}

#[tokio::test]
async fn iterating_an_unbounded_generator_trips_the_iteration_limit() {
    let context = Context::builder()
        .register_function("counter", host("counter", unbounded_counter()))
        .iteration_limit(5)
        .build();

    let program = block(vec![stmt(chain(
        Expr::Bool(true),
        vec![PipeTarget::Loop(Loop {
            input: Some(Box::new(host_call("counter", Vec::new()))),
            body: Box::new(block(Vec::new())),
            location: loc(),
        })],
        None,
    ))]);

    let err = rill::eval_program(&context, &program).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::LimitExceeded);
}

#[tokio::test]
async fn a_limit_annotation_overrides_the_default_iteration_limit_for_its_statement() {
    let context = Context::builder().register_function("counter", host("counter", unbounded_counter())).build();

    let mut annotated = stmt(chain(
        Expr::Bool(true),
        vec![PipeTarget::Loop(Loop {
            input: Some(Box::new(host_call("counter", Vec::new()))),
            body: Box::new(block(Vec::new())),
            location: loc(),
        })],
        None,
    ));
    annotated.annotations = vec![AnnotationEntry::Named("limit".to_string(), num(10.0))];

    let program = block(vec![annotated]);

    let err = rill::eval_program(&context, &program).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::LimitExceeded);
}

#[tokio::test]
async fn extension_functions_are_only_reachable_through_their_namespace() {
    let greet = rill::host_fn(
        HostKind::Runtime,
        "greet",
        Vec::new(),
        Rc::new(|_args: Vec<Value>| -> HostFuture { Box::pin(async move { Ok(Value::from("hi")) }) }),
    );
    let context = Context::builder().mount_extension("ns", vec![("greet".to_string(), greet)]).unwrap().build();

    let unqualified = block(vec![stmt(chain(host_call("greet", Vec::new()), Vec::new(), None))]);
    let err = rill::eval_program(&context, &unqualified).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::UndefinedFunction);

    let qualified = block(vec![stmt(chain(host_call("ns::greet", Vec::new()), Vec::new(), None))]);
    let result = rill::eval_program(&context, &qualified).await.unwrap();
    assert_eq!(result, Value::from("hi"));
}

#[tokio::test]
async fn destructured_bindings_are_visible_to_later_statements() {
    let context = Context::builder().register_function("nums", host("nums", const_list(&[1.0, 2.0, 3.0]))).build();

    let pattern = Pattern::Positional(vec![
        PatternElem::Bind("a".to_string()),
        PatternElem::Bind("b".to_string()),
        PatternElem::Bind("c".to_string()),
    ]);

    let program = block(vec![
        stmt(chain(host_call("nums", Vec::new()), vec![PipeTarget::Destructure(pattern)], None)),
        stmt(chain(
            Expr::Arithmetic(
                BinOp::Add,
                Box::new(Expr::Arithmetic(BinOp::Add, Box::new(var("a")), Box::new(var("b")))),
                Box::new(var("c")),
            ),
            Vec::new(),
            None,
        )),
    ]);

    let result = rill::eval_program(&context, &program).await.unwrap();
    assert_eq!(result, Value::Number(6.0));
}

#[tokio::test]
async fn destructuring_a_wrong_sized_list_reports_expected_and_actual_counts() {
    let context = Context::builder().register_function("nums", host("nums", const_list(&[1.0, 2.0]))).build();

    let pattern = Pattern::Positional(vec![
        PatternElem::Bind("a".to_string()),
        PatternElem::Bind("b".to_string()),
        PatternElem::Bind("c".to_string()),
    ]);

    let program =
        block(vec![stmt(chain(host_call("nums", Vec::new()), vec![PipeTarget::Destructure(pattern)], None))]);

    let err = rill::eval_program(&context, &program).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
}

#[tokio::test]
async fn top_level_string_matching_an_auto_exception_pattern_is_raised() {
    let context = Context::builder().auto_exception("^boom").unwrap().build();

    let program = block(vec![stmt(chain(str_lit("boom today"), Vec::new(), None))]);

    let err = rill::eval_program(&context, &program).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::AutoException);
}

#[tokio::test]
async fn auto_exception_only_applies_to_the_top_level_statement_value() {
    let context = Context::builder().auto_exception("^boom").unwrap().build();

    // The matching string only ever appears as a captured intermediate value
    // inside a nested block, never as a top-level statement's own result.
    let program = block(vec![stmt(chain(
        Expr::Primary(Primary::Block(block(vec![
            stmt(chain(str_lit("boom"), Vec::new(), Some(capture("x")))),
            stmt(chain(num(1.0), Vec::new(), None)),
        ]))),
        Vec::new(),
        None,
    ))]);

    let result = rill::eval_program(&context, &program).await.unwrap();
    assert_eq!(result, Value::Number(1.0));
}

#[tokio::test]
async fn a_cancelled_context_aborts_before_the_next_statement_runs() {
    let context = Context::builder().build();
    context.cancel();

    let program = block(vec![stmt(chain(num(1.0), Vec::new(), None))]);

    let err = rill::eval_program(&context, &program).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Abort);
}

#[tokio::test]
async fn each_returns_a_list_of_all_body_results() {
    let context = Context::builder().register_function("nums", host("nums", const_list(&[1.0, 2.0, 3.0]))).build();

    let each_op = CollectionOp {
        body: op_body(Expr::Arithmetic(BinOp::Mul, Box::new(var("$")), Box::new(num(2.0)))),
        initial: None,
        location: loc(),
    };

    let program = block(vec![stmt(chain(host_call("nums", Vec::new()), vec![PipeTarget::Each(each_op)], None))]);

    let result = rill::eval_program(&context, &program).await.unwrap();
    assert_eq!(result, Value::from(vec![Value::Number(2.0), Value::Number(4.0), Value::Number(6.0)]));
}

#[tokio::test]
async fn each_on_empty_input_returns_an_empty_list() {
    let context = Context::builder().register_function("nums", host("nums", const_list(&[]))).build();

    let each_op = CollectionOp { body: op_body(var("$")), initial: None, location: loc() };

    let program = block(vec![stmt(chain(host_call("nums", Vec::new()), vec![PipeTarget::Each(each_op)], None))]);

    let result = rill::eval_program(&context, &program).await.unwrap();
    assert_eq!(result, Value::from(Vec::<Value>::new()));
}

/// A `break` raised inside an inline closure body must propagate past the
/// closure invocation rather than surfacing as a usage error, and `each`
/// turns it into the partial list of results gathered so far.
#[tokio::test]
async fn break_inside_an_each_closure_body_yields_the_partial_list() {
    let context =
        Context::builder().register_function("nums", host("nums", const_list(&[1.0, 2.0, 3.0, 4.0, 5.0]))).build();

    let closure = ClosureNode {
        params: vec![Param { name: "x".to_string(), type_name: None, default: None }],
        body: Block {
            statements: vec![stmt(chain(
                Expr::Primary(Primary::Conditional(Conditional {
                    condition: Some(Box::new(Expr::Compare(CmpOp::Gt, Box::new(var("x")), Box::new(num(2.0))))),
                    then_branch: Box::new(block(vec![stmt(chain(var("x"), Vec::new(), Some(Terminator::Break)))])),
                    else_branch: Some(Box::new(block(vec![stmt(chain(var("x"), Vec::new(), None))]))),
                    location: loc(),
                })),
                Vec::new(),
                None,
            ))],
            location: loc(),
        },
        location: loc(),
    };

    let each_op = CollectionOp { body: CollectionBody::InlineClosure(closure), initial: None, location: loc() };

    let program = block(vec![stmt(chain(host_call("nums", Vec::new()), vec![PipeTarget::Each(each_op)], None))]);

    let result = rill::eval_program(&context, &program).await.unwrap();
    assert_eq!(result, Value::from(vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]));
}

/// Script closures compare equal when their params and body match
/// structurally, even if they were parsed at different source locations.
#[tokio::test]
async fn closures_with_identical_bodies_at_different_locations_compare_equal() {
    let params = vec![Param { name: "x".to_string(), type_name: None, default: None }];

    let closure_a = ClosureNode {
        params: params.clone(),
        body: Block { statements: vec![stmt(chain(var("x"), Vec::new(), None))], location: at(1) },
        location: at(1),
    };
    let closure_b = ClosureNode {
        params,
        body: Block { statements: vec![stmt(chain(var("x"), Vec::new(), None))], location: at(99) },
        location: at(42),
    };

    let context = Context::builder().build();
    let program = block(vec![stmt(chain(
        Expr::Compare(
            CmpOp::Eq,
            Box::new(Expr::Primary(Primary::Closure(closure_a))),
            Box::new(Expr::Primary(Primary::Closure(closure_b))),
        ),
        Vec::new(),
        None,
    ))]);

    let result = rill::eval_program(&context, &program).await.unwrap();
    assert_eq!(result, Value::Bool(true));
}
