//! The execution context: the host-configurable environment a script runs in
//! (spec §3, §4.8, SPEC_FULL.md §C).
//!
//! Grounded on the teacher's `RuntimeBuilder`/`Fiber` pair: a builder that
//! accumulates registered functions and knobs, producing an immutable handle
//! the evaluator threads through every call.
use crate::ast::Location;
use crate::callable::Callable;
use crate::dict::Dict;
use crate::errors::{CallStackFrame, ErrorKind, RillError};
use crate::scope::Scope;
use crate::value::Value;
use regex::Regex;
use std::{cell::RefCell, collections::HashMap, rc::Rc, time::Duration};

pub const DEFAULT_MAX_CALL_STACK_DEPTH: usize = 100;
pub const DEFAULT_ITERATION_LIMIT: usize = 10_000;

#[derive(Clone, Debug)]
pub(crate) struct StackFrame {
    pub function_name: String,
    pub location: Option<Location>,
}

/// Optional observability hooks the host can wire up. Plain callback
/// closures, not a tracing subscriber — the ambient stack only ever reaches
/// for `log` (see SPEC_FULL.md §A); this is a separate, narrower surface
/// named directly in spec §6.
#[derive(Default, Clone)]
pub struct Callbacks {
    pub on_host_call: Option<Rc<dyn Fn(&str)>>,
    pub on_function_return: Option<Rc<dyn Fn(&str, &crate::value::Value)>>,
    pub on_capture: Option<Rc<dyn Fn(&str, &crate::value::Value)>>,
}

pub struct Context {
    root_scope: Rc<Scope>,
    host_functions: RefCell<HashMap<String, Callable>>,
    host_methods: RefCell<HashMap<String, Callable>>,
    timeout: Option<Duration>,
    max_call_stack_depth: usize,
    iteration_limit: usize,
    auto_exceptions: Vec<Regex>,
    pub(crate) callbacks: Callbacks,
    call_stack: RefCell<Vec<StackFrame>>,
    cancelled: RefCell<bool>,
    /// The annotation stack (spec §4.10): each statement with `^(...)`
    /// annotations pushes a dict merged with whatever is currently on top
    /// (inner keys override outer), and pops it on exit. `limit` is the only
    /// key the evaluator itself reads (§4.9, §9 "iteration limits and
    /// parallelism"); other keys are opaque passthrough for host inspection.
    annotation_stack: RefCell<Vec<Dict>>,
}

impl Context {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    pub fn root_scope(&self) -> &Rc<Scope> {
        &self.root_scope
    }

    pub fn lookup_function(&self, name: &str) -> Option<Callable> {
        self.host_functions.borrow().get(name).cloned()
    }

    pub fn lookup_method(&self, name: &str) -> Option<Callable> {
        self.host_methods.borrow().get(name).cloned()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn iteration_limit(&self) -> usize {
        self.iteration_limit
    }

    /// The iteration/concurrency-batch bound currently in effect: the
    /// innermost active statement annotation's `limit` entry if one is set,
    /// else the context's default `iteration_limit`.
    pub(crate) fn effective_limit(&self) -> usize {
        self.annotation_stack
            .borrow()
            .last()
            .and_then(|dict| dict.get("limit"))
            .and_then(|value| match value {
                Value::Number(n) => Some(n as usize),
                _ => None,
            })
            .unwrap_or(self.iteration_limit)
    }

    pub(crate) fn current_annotations(&self) -> Option<Dict> {
        self.annotation_stack.borrow().last().cloned()
    }

    pub(crate) fn push_annotations(&self, dict: Dict) {
        self.annotation_stack.borrow_mut().push(dict);
    }

    pub(crate) fn pop_annotations(&self) {
        self.annotation_stack.borrow_mut().pop();
    }

    pub fn max_call_stack_depth(&self) -> usize {
        self.max_call_stack_depth
    }

    pub fn auto_exceptions(&self) -> &[Regex] {
        &self.auto_exceptions
    }

    /// Push a call-stack frame. Ring-buffer semantics past `maxCallStackDepth`
    /// (spec §5): the oldest frame is dropped rather than raising an error —
    /// this bookkeeping is diagnostic only and never bounds recursion depth.
    pub(crate) fn push_frame(&self, frame: StackFrame) {
        let mut stack = self.call_stack.borrow_mut();
        if stack.len() >= self.max_call_stack_depth {
            stack.remove(0);
            log::warn!("call stack depth exceeded {}, dropping oldest frame", self.max_call_stack_depth);
        }
        log::debug!("call stack push: {} (depth {})", frame.function_name, stack.len() + 1);
        stack.push(frame);
    }

    /// Check the cooperative cancellation signal, raising `ABORT` if it has
    /// been tripped (spec §4.9: checked before/after every host call,
    /// statement, loop iteration, and iterator expansion step).
    pub(crate) fn check_cancelled(&self) -> Result<(), RillError> {
        if self.is_cancelled() {
            return Err(RillError::new(ErrorKind::Abort, "context was cancelled", None));
        }
        Ok(())
    }

    pub(crate) fn pop_frame(&self) {
        if let Some(frame) = self.call_stack.borrow_mut().pop() {
            log::debug!("call stack pop: {}", frame.function_name);
        }
    }

    pub(crate) fn snapshot_call_stack(&self) -> Vec<CallStackFrame> {
        self.call_stack
            .borrow()
            .iter()
            .rev()
            .map(|f| CallStackFrame {
                location: f.location,
                function_name: f.function_name.clone(),
            })
            .collect()
    }

    pub fn cancel(&self) {
        log::warn!("context cancelled");
        *self.cancelled.borrow_mut() = true;
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }
}

#[derive(Default)]
pub struct ContextBuilder {
    host_functions: HashMap<String, Callable>,
    host_methods: HashMap<String, Callable>,
    timeout: Option<Duration>,
    max_call_stack_depth: Option<usize>,
    iteration_limit: Option<usize>,
    auto_exceptions: Vec<Regex>,
    callbacks: Callbacks,
}

impl ContextBuilder {
    pub fn register_function(mut self, name: impl Into<String>, callable: Callable) -> Self {
        self.host_functions.insert(name.into(), callable);
        self
    }

    pub fn register_method(mut self, name: impl Into<String>, callable: Callable) -> Self {
        self.host_methods.insert(name.into(), callable);
        self
    }

    /// Mount an extension's functions under a `ns::` prefix (spec §4.8).
    /// Rejects namespaces that don't match `/^[A-Za-z0-9][A-Za-z0-9-]*$/`,
    /// since the prefix becomes part of every call site's function name.
    pub fn mount_extension(
        mut self,
        namespace: &str,
        functions: Vec<(String, Callable)>,
    ) -> Result<Self, RillError> {
        let valid = !namespace.is_empty()
            && namespace.chars().next().unwrap().is_ascii_alphanumeric()
            && namespace.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');

        if !valid {
            return Err(RillError::new(
                ErrorKind::TypeError,
                format!("invalid extension namespace '{namespace}'"),
                None,
            ));
        }

        for (name, callable) in functions {
            self.host_functions.insert(format!("{namespace}::{name}"), callable);
        }
        Ok(self)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_call_stack_depth(mut self, depth: usize) -> Self {
        self.max_call_stack_depth = Some(depth);
        self
    }

    pub fn iteration_limit(mut self, limit: usize) -> Self {
        self.iteration_limit = Some(limit);
        self
    }

    pub fn auto_exception(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.auto_exceptions.push(Regex::new(pattern)?);
        Ok(self)
    }

    pub fn callbacks(mut self, callbacks: Callbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn build(self) -> Rc<Context> {
        Rc::new(Context {
            root_scope: Scope::root(),
            host_functions: RefCell::new(self.host_functions),
            host_methods: RefCell::new(self.host_methods),
            timeout: self.timeout,
            max_call_stack_depth: self.max_call_stack_depth.unwrap_or(DEFAULT_MAX_CALL_STACK_DEPTH),
            iteration_limit: self.iteration_limit.unwrap_or(DEFAULT_ITERATION_LIMIT),
            auto_exceptions: self.auto_exceptions,
            callbacks: self.callbacks,
            call_stack: RefCell::new(Vec::new()),
            cancelled: RefCell::new(false),
            annotation_stack: RefCell::new(Vec::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let context = Context::builder().build();
        assert_eq!(context.max_call_stack_depth(), DEFAULT_MAX_CALL_STACK_DEPTH);
        assert_eq!(context.iteration_limit(), DEFAULT_ITERATION_LIMIT);
        assert!(context.timeout().is_none());
    }

    #[test]
    fn mount_extension_rejects_bad_namespace() {
        let result = Context::builder().mount_extension("bad ns", vec![]);
        assert!(result.is_err());
    }

    #[test]
    fn mount_extension_accepts_a_leading_digit_and_hyphens() {
        assert!(Context::builder().mount_extension("c1", vec![]).is_ok());
        assert!(Context::builder().mount_extension("my-ext", vec![]).is_ok());
    }

    #[test]
    fn mount_extension_rejects_underscore() {
        let result = Context::builder().mount_extension("my_ext", vec![]);
        assert!(result.is_err());
    }

    #[test]
    fn call_stack_depth_drops_oldest_frame_instead_of_erroring() {
        let context = Context::builder().max_call_stack_depth(1).build();
        context.push_frame(StackFrame { function_name: "a".into(), location: None });
        context.push_frame(StackFrame { function_name: "b".into(), location: None });
        let snapshot = context.snapshot_call_stack();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].function_name, "b");
    }

    #[test]
    fn check_cancelled_trips_after_cancel() {
        let context = Context::builder().build();
        assert!(context.check_cancelled().is_ok());
        context.cancel();
        assert_eq!(context.check_cancelled().unwrap_err().kind, ErrorKind::Abort);
    }
}
