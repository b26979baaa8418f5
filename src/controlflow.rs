//! Break/return signals, layered independently of the error channel.
//!
//! Not exposed outside the crate: manipulating control flow is a privileged
//! operation reserved for the evaluator.
use crate::value::Value;

/// Non-error control flow: breaking out of a loop, or returning early from a
/// closure body. Kept as its own channel rather than folded into `RillError`
/// (spec I6) — a signal is caught only by the construct that owns it (a loop
/// catches `Break`, a closure invocation catches `Return`), while an error
/// unwinds through every enclosing construct until it reaches the statement
/// driver.
#[derive(Clone, Debug)]
pub(crate) enum Signal {
    Break(Value),
    Return(Value),
}

pub(crate) type Flow<T> = std::ops::ControlFlow<Signal, T>;

/// Collapse a `Flow<Value>` to a plain value once whichever construct should
/// observe an embedded signal has already done so — a closure invocation
/// catching its own `Return`, or a loop that ran to completion without a
/// `Break`.
pub(crate) trait IntoValue {
    fn into_value(self) -> Value;
}

impl IntoValue for Flow<Value> {
    fn into_value(self) -> Value {
        match self {
            Flow::Continue(value) => value,
            Flow::Break(Signal::Break(value)) => value,
            Flow::Break(Signal::Return(value)) => value,
        }
    }
}

macro_rules! signal_return {
    ($value:expr) => {
        return ::std::ops::ControlFlow::Break($crate::controlflow::Signal::Return($value))
    };
}

macro_rules! signal_break {
    ($value:expr) => {
        return ::std::ops::ControlFlow::Break($crate::controlflow::Signal::Break($value))
    };
}

pub(crate) use signal_break;
pub(crate) use signal_return;
