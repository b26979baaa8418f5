//! Callables: script closures and host-provided native functions.
use crate::ast;
use crate::dict::Dict;
use crate::errors::RillError;
use crate::scope::Scope;
use std::{cell::RefCell, fmt, future::Future, pin::Pin, rc::Rc};

/// A parameter declared by a host function. Its `default`, if present, is a
/// literal `Value` validated once at registration time (spec §4.8), unlike a
/// script parameter's default, which is an expression re-evaluated per call.
#[derive(Clone, Debug)]
pub struct HostParam {
    pub name: String,
    pub type_name: Option<String>,
    pub description: Option<String>,
    pub default: Option<crate::value::Value>,
}

pub type HostFuture = Pin<Box<dyn Future<Output = Result<crate::value::Value, RillError>>>>;
pub type HostFn = Rc<dyn Fn(Vec<crate::value::Value>) -> HostFuture>;

/// Distinguishes runtime-provided builtins from application-mounted
/// extensions for introspection only; both dispatch identically.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HostKind {
    Runtime,
    Application,
}

/// A native function exposed to scripts. Stored behind an `Rc` so that
/// binding a property-style callable to its receiver (`bound_dict`) is
/// visible to every `Value::Callable` clone that shares it.
pub struct HostCallable {
    pub kind: HostKind,
    pub name: String,
    pub params: Vec<HostParam>,
    pub func: HostFn,
    pub is_property: bool,
    pub bound_dict: RefCell<Option<Dict>>,
}

impl fmt::Debug for HostCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCallable")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("params", &self.params)
            .field("is_property", &self.is_property)
            .finish()
    }
}

/// A script-defined closure. `defining_scope` is captured at creation time so
/// the closure resolves free variables against the scope it was written in
/// rather than the scope it's eventually called from (late binding, spec
/// §4.3).
pub struct ScriptCallable {
    pub name: Option<String>,
    pub params: Vec<ast::Param>,
    pub body: Rc<ast::Block>,
    pub defining_scope: Rc<Scope>,
    pub is_property: bool,
    pub bound_dict: RefCell<Option<Dict>>,
}

impl fmt::Debug for ScriptCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptCallable")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("is_property", &self.is_property)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub enum Callable {
    Script(Rc<ScriptCallable>),
    Host(Rc<HostCallable>),
}

impl Callable {
    pub fn name(&self) -> Option<&str> {
        match self {
            Callable::Script(s) => s.name.as_deref(),
            Callable::Host(h) => Some(&h.name),
        }
    }

    pub fn is_property(&self) -> bool {
        match self {
            Callable::Script(s) => s.is_property,
            Callable::Host(h) => h.is_property,
        }
    }

    pub fn bound_dict(&self) -> Option<Dict> {
        match self {
            Callable::Script(s) => s.bound_dict.borrow().clone(),
            Callable::Host(h) => h.bound_dict.borrow().clone(),
        }
    }

    /// Wire up the implicit receiver for a property-style callable the first
    /// time it's read off a dict entry. Idempotent — once bound, later reads
    /// of the same entry see the same receiver (spec §4.3: "bound once, on
    /// first access").
    pub fn bind_to(&self, dict: &Dict) {
        let slot = match self {
            Callable::Script(s) => &s.bound_dict,
            Callable::Host(h) => &h.bound_dict,
        };
        if slot.borrow().is_none() {
            *slot.borrow_mut() = Some(dict.clone());
        }
    }

    /// Script callables compare equal when their parameter lists and body
    /// ASTs are structurally identical ignoring source locations (spec
    /// §4.1); host callables, having no body to compare, fall back to
    /// reference identity.
    pub fn deep_equals(&self, other: &Callable) -> bool {
        match (self, other) {
            (Callable::Script(a), Callable::Script(b)) => {
                Rc::ptr_eq(a, b)
                    || (a.params.len() == b.params.len()
                        && a.params.iter().zip(&b.params).all(|(x, y)| {
                            x.name == y.name
                                && x.type_name == y.type_name
                                && match (&x.default, &y.default) {
                                    (Some(e1), Some(e2)) => ast::exprs_eq(e1, e2),
                                    (None, None) => true,
                                    _ => false,
                                }
                        })
                        && ast::blocks_structurally_eq(&a.body, &b.body))
            }
            (Callable::Host(a), Callable::Host(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}
