//! Rill: an embedded, pipe-centric scripting language evaluator.
//!
//! This crate is the runtime only — tree-walking evaluation over an AST
//! produced elsewhere, with cooperative async host-call dispatch, typed
//! variable locking, and signal-based control flow. The lexer, parser, CLI,
//! and any host extensions live outside this crate.

mod ast;
mod callable;
mod context;
mod controlflow;
mod dict;
mod errors;
mod eval;
mod host;
mod hostcall;
mod iterator;
mod scope;
mod value;

pub mod prelude {
    pub use crate::ast;
    pub use crate::callable::{Callable, HostFn, HostFuture, HostKind, HostParam};
    pub use crate::context::{Callbacks, Context, ContextBuilder};
    pub use crate::dict::Dict;
    pub use crate::errors::{CallStackFrame, ErrorContext, ErrorKind, RillError};
    pub use crate::eval::{call_callable, eval_program};
    pub use crate::host::{host_fn, host_param, host_property};
    pub use crate::value::{Tuple, TypeName, Value, VectorData};
}

pub use prelude::*;
