//! Error handling for the emission layer
//!
//! Every fallible emission operation returns `EmitResult`. All failures are
//! local and synchronous: a failed emission leaves the module under
//! construction in a partially-built state, and the only recovery is to
//! discard the module and restart lowering.

use thiserror::Error;

/// Emission error taxonomy
///
/// Each variant corresponds to one rejection point in the emitter. There are
/// no retries anywhere: emission is deterministic, so every error is final.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmitError {
    /// Unsupported type, or void where a concrete type is required
    #[error("type error: {message}")]
    TypeError { message: String },

    /// Operand types incompatible after implicit promotion
    #[error("type mismatch: {message}")]
    TypeMismatch { message: String },

    /// Cast between types with no defined conversion
    #[error("invalid cast: {message}")]
    InvalidCast { message: String },

    /// Call arity or argument type does not match the callee signature
    #[error("argument mismatch calling `{function}`: {message}")]
    ArgumentMismatch { function: String, message: String },

    /// Function redeclared with an incompatible signature
    #[error("incompatible redeclaration of `{function}`: {message}")]
    Redeclaration { function: String, message: String },

    /// Call to a function that was never declared in the module
    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    /// A terminator was emitted into an already-terminated block
    #[error("block `{block}` already has a terminator")]
    DoubleTermination { block: String },

    /// Post-hoc structural verification failed
    #[error("verification of `{function}` failed: {message}")]
    Verification { function: String, message: String },

    /// Corrupted emitter state; indicates a bug in the emission layer itself
    #[error("internal emitter error: {0}")]
    Internal(String),
}

impl EmitError {
    pub fn type_error(message: impl Into<String>) -> Self {
        EmitError::TypeError {
            message: message.into(),
        }
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        EmitError::TypeMismatch {
            message: message.into(),
        }
    }

    pub fn invalid_cast(message: impl Into<String>) -> Self {
        EmitError::InvalidCast {
            message: message.into(),
        }
    }

    pub fn argument_mismatch(function: impl Into<String>, message: impl Into<String>) -> Self {
        EmitError::ArgumentMismatch {
            function: function.into(),
            message: message.into(),
        }
    }

    pub fn redeclaration(function: impl Into<String>, message: impl Into<String>) -> Self {
        EmitError::Redeclaration {
            function: function.into(),
            message: message.into(),
        }
    }

    pub fn verification(function: impl Into<String>, message: impl Into<String>) -> Self {
        EmitError::Verification {
            function: function.into(),
            message: message.into(),
        }
    }
}

/// Result alias used throughout the emission layer
pub type EmitResult<T> = Result<T, EmitError>;
