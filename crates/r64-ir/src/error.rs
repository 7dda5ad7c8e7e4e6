//! IR construction errors.

use thiserror::Error;

use crate::value::ValueRef;

/// Errors raised when a value is used where it cannot be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValueError {
    /// A result references a different function.
    #[error("value {0:?} belongs to a different function")]
    InvalidValue(ValueRef),
}

/// Errors raised by the function-level producer API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FunctionError {
    /// `set_function_exit` was called more than once.
    #[error("function already has an exit")]
    MultipleExits,
    /// The function was finalized without an exit.
    #[error("function has no exit")]
    NoExit,
    /// Only the first eight arguments are passed in registers.
    #[error("argument index {0} has no argument register")]
    TooManyParameters(usize),
    /// A foreign value was passed in.
    #[error(transparent)]
    Value(#[from] ValueError),
}
