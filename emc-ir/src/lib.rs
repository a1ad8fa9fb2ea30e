//! Embedded Model Compiler - IR Emission
//!
//! This crate builds the typed intermediate representation that the
//! native backend consumes. `IREmitter` owns a module and provides
//! instruction-level emission with implicit arithmetic promotion;
//! `IRFunctionEmitter` layers the per-function conveniences on top
//! (variables, addressing, runtime calls, structured control flow).
//! Emitted functions are checked by the verifier before handoff, and the
//! reference interpreter executes modules directly for testing.

pub mod emitter;
pub mod flow;
pub mod function;
pub mod interp;
pub mod ir;
pub mod verify;

pub use emitter::IREmitter;
pub use flow::{IRForLoopEmitter, IRIfEmitter};
pub use function::IRFunctionEmitter;
pub use interp::{InterpError, Interpreter, RtVal};
pub use ir::{
    BasicBlock, BinOp, CmpPred, ConstValue, Function, GlobalInit, GlobalVariable, Instruction,
    IrType, Linkage, Module, Parameter, Value,
};
pub use verify::{verify_function, verify_module};

pub use emc_common::{
    BlockId, ComparisonType, EmitError, EmitResult, OperatorType, TempId, ValueType,
};
