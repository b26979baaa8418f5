//! Lexical scopes with per-binding type locking (spec §4.2).
use crate::errors::{ErrorContext, ErrorKind, RillError};
use crate::value::Value;
use std::{cell::RefCell, collections::HashMap, rc::Rc};

/// A single lexical scope. Scopes are reference-shared: a closure captures
/// its defining scope by holding an `Rc<Scope>`, the way the teacher's
/// `Closure` captures its `Scope`.
pub struct Scope {
    parent: Option<Rc<Scope>>,
    variables: RefCell<HashMap<String, Value>>,
    variable_types: RefCell<HashMap<String, &'static str>>,
}

impl Scope {
    pub fn root() -> Rc<Scope> {
        Rc::new(Scope {
            parent: None,
            variables: RefCell::new(HashMap::new()),
            variable_types: RefCell::new(HashMap::new()),
        })
    }

    pub fn child(parent: &Rc<Scope>) -> Rc<Scope> {
        Rc::new(Scope {
            parent: Some(Rc::clone(parent)),
            variables: RefCell::new(HashMap::new()),
            variable_types: RefCell::new(HashMap::new()),
        })
    }

    pub fn parent(&self) -> Option<&Rc<Scope>> {
        self.parent.as_ref()
    }

    fn has_own(&self, name: &str) -> bool {
        self.variables.borrow().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.variables.borrow().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.get(name))
    }

    pub fn has(&self, name: &str) -> bool {
        self.has_own(name) || self.parent.as_ref().map_or(false, |p| p.has(name))
    }

    fn shadows_outer(&self, name: &str) -> bool {
        self.parent.as_ref().map_or(false, |p| p.has(name))
    }

    /// Declare or reassign `name` in this scope, enforcing type locking:
    ///
    /// 1. If `name` is already locked in this scope, the new value's type
    ///    must match the locked type.
    /// 2. If `name` is not yet declared here but an enclosing scope already
    ///    binds it, this is shadowing and rejected — a child scope may never
    ///    reuse an outer name for a distinct binding.
    /// 3. Otherwise the value is stored and its type locked for the lifetime
    ///    of this scope.
    pub fn set_typed(&self, name: &str, value: Value) -> Result<(), RillError> {
        let new_type = value.type_name();

        if let Some(locked) = self.variable_types.borrow().get(name).copied() {
            if locked != new_type {
                return Err(RillError::new(
                    ErrorKind::TypeError,
                    format!(
                        "variable '{name}' is locked to type '{locked}', cannot assign value of type '{new_type}'"
                    ),
                    None,
                )
                .with_context(ErrorContext::Assignment {
                    variable_name: name.to_string(),
                    expected_type: locked.to_string(),
                    actual_type: new_type.to_string(),
                }));
            }
        } else if self.shadows_outer(name) {
            return Err(RillError::new(
                ErrorKind::TypeError,
                format!("'{name}' shadows a variable bound in an enclosing scope"),
                None,
            )
            .with_context(ErrorContext::Assignment {
                variable_name: name.to_string(),
                expected_type: String::new(),
                actual_type: new_type.to_string(),
            }));
        }

        self.variable_types.borrow_mut().insert(name.to_string(), new_type);
        self.variables.borrow_mut().insert(name.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_assignment_locks_type() {
        let scope = Scope::root();
        scope.set_typed("x", Value::Number(1.0)).unwrap();
        assert!(scope.set_typed("x", Value::from("oops")).is_err());
        assert_eq!(scope.get("x"), Some(Value::Number(1.0)));
    }

    #[test]
    fn same_type_reassignment_ok() {
        let scope = Scope::root();
        scope.set_typed("x", Value::Number(1.0)).unwrap();
        scope.set_typed("x", Value::Number(2.0)).unwrap();
        assert_eq!(scope.get("x"), Some(Value::Number(2.0)));
    }

    #[test]
    fn child_scope_cannot_shadow_outer_binding() {
        let root = Scope::root();
        root.set_typed("x", Value::Number(1.0)).unwrap();
        let child = Scope::child(&root);
        assert!(child.set_typed("x", Value::from("shadow")).is_err());
    }

    #[test]
    fn child_scope_inherits_outer_value() {
        let root = Scope::root();
        root.set_typed("x", Value::Number(1.0)).unwrap();
        let child = Scope::child(&root);
        assert_eq!(child.get("x"), Some(Value::Number(1.0)));
    }

    #[test]
    fn unrelated_names_in_child_do_not_shadow() {
        let root = Scope::root();
        root.set_typed("x", Value::Number(1.0)).unwrap();
        let child = Scope::child(&root);
        assert!(child.set_typed("y", Value::from("fine")).is_ok());
    }
}
