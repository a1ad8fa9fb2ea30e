//! Embedded Model Compiler - Common Types and Utilities
//!
//! This crate contains the shared leaf types used across the compiler:
//! the closed value-type and operator model, the emission error taxonomy,
//! and the symbol table used to intern named globals.

pub mod error;
pub mod symbols;
pub mod types;

pub use error::{EmitError, EmitResult};
pub use symbols::SymbolTable;
pub use types::*;
