//! Per-function emission façade
//!
//! `IRFunctionEmitter` binds an `IREmitter` to one function and layers an
//! ergonomic pointer/array API on top: variable helpers, two addressing
//! conventions, by-name calls, the standard runtime calls, and the
//! factories for the structured loop and conditional emitters.

use crate::emitter::IREmitter;
use crate::flow::{IRForLoopEmitter, IRIfEmitter};
use crate::ir::{Function, IrType, Value};
use crate::verify;
use emc_common::{
    BlockId, ComparisonType, EmitError, EmitResult, OperatorType, ValueType,
};
use log::debug;

/// Fixed symbol names of the runtime primitives the generated code links
/// against; a textual-name contract with the downstream backend.
const MALLOC: &str = "malloc";
const FREE: &str = "free";
const PRINT: &str = "print";
const PRINTF: &str = "printf";

/// Emits the body of one function through a shared `IREmitter`
pub struct IRFunctionEmitter<'e> {
    emitter: &'e mut IREmitter,
    name: String,
}

impl<'e> IRFunctionEmitter<'e> {
    /// Bind an emitter to a function that was already defined on it
    ///
    /// The cursor is left where it is; `define_function` has already parked
    /// it in the entry block for a freshly defined function.
    pub fn new(emitter: &'e mut IREmitter, name: &str) -> EmitResult<Self> {
        if emitter.module().get_function(name).is_none() {
            return Err(EmitError::UnknownFunction(name.to_string()));
        }
        Ok(Self {
            emitter,
            name: name.to_string(),
        })
    }

    /// The name of the bound function
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Direct access to the underlying emitter
    pub fn emitter(&mut self) -> &mut IREmitter {
        self.emitter
    }

    fn function(&self) -> EmitResult<&Function> {
        self.emitter
            .module()
            .get_function(&self.name)
            .ok_or_else(|| EmitError::UnknownFunction(self.name.clone()))
    }

    // ------------------------------------------------------------------
    // Thin forwarders
    // ------------------------------------------------------------------

    pub fn literal_i32(&self, value: i32) -> Value {
        self.emitter.literal_i32(value)
    }

    pub fn literal_i64(&self, value: i64) -> Value {
        self.emitter.literal_i64(value)
    }

    pub fn literal_f64(&self, value: f64) -> Value {
        self.emitter.literal_f64(value)
    }

    pub fn literal_string(&mut self, content: &str) -> Value {
        self.emitter.literal_string(content)
    }

    pub fn cast(&mut self, value: Value, dest: &ValueType) -> EmitResult<Value> {
        self.emitter.cast(value, dest)
    }

    pub fn cast_float_to_int(&mut self, value: Value) -> EmitResult<Value> {
        self.emitter.cast_float_to_int(value)
    }

    pub fn op(&mut self, op: OperatorType, lhs: Value, rhs: Value) -> EmitResult<Value> {
        self.emitter.binary_op(op, lhs, rhs)
    }

    pub fn cmp(&mut self, pred: ComparisonType, lhs: Value, rhs: Value) -> EmitResult<Value> {
        self.emitter.cmp(pred, lhs, rhs)
    }

    pub fn load(&mut self, ptr: Value) -> EmitResult<Value> {
        self.emitter.load(ptr)
    }

    pub fn store(&mut self, ptr: Value, value: Value) -> EmitResult<()> {
        self.emitter.store(ptr, value)
    }

    pub fn ret_void(&mut self) -> EmitResult<()> {
        self.emitter.return_void()
    }

    pub fn ret(&mut self, value: Value) -> EmitResult<()> {
        self.emitter.return_value(value)
    }

    // ------------------------------------------------------------------
    // Blocks
    // ------------------------------------------------------------------

    /// Append a new block to this function
    pub fn block(&mut self, label: &str) -> EmitResult<BlockId> {
        self.emitter.block(&self.name, label)
    }

    /// Insert a new block after an existing one
    pub fn block_after(&mut self, prev: BlockId, label: &str) -> EmitResult<BlockId> {
        self.emitter.block_after(&self.name, prev, label)
    }

    /// The block the cursor points at
    pub fn current_block(&self) -> Option<BlockId> {
        self.emitter.current_block()
    }

    /// Move the cursor into a block of this function; returns the previous
    /// block so callers can restore it
    pub fn set_current_block(&mut self, block: BlockId) -> EmitResult<Option<BlockId>> {
        let previous = self.emitter.current_block();
        self.emitter.set_current_block(&self.name, block)?;
        Ok(previous)
    }

    pub fn branch(&mut self, dest: BlockId) -> EmitResult<()> {
        self.emitter.branch(dest)
    }

    pub fn branch_cond(
        &mut self,
        cond: Value,
        then_block: BlockId,
        else_block: BlockId,
    ) -> EmitResult<()> {
        self.emitter.branch_cond(cond, then_block, else_block)
    }

    /// Compare and branch in one step
    pub fn branch_cmp(
        &mut self,
        pred: ComparisonType,
        lhs: Value,
        rhs: Value,
        then_block: BlockId,
        else_block: BlockId,
    ) -> EmitResult<()> {
        let cond = self.cmp(pred, lhs, rhs)?;
        self.branch_cond(cond, then_block, else_block)
    }

    // ------------------------------------------------------------------
    // Arguments and variables
    // ------------------------------------------------------------------

    /// The values of all parameters, in declaration order
    pub fn args(&self) -> EmitResult<Vec<Value>> {
        self.emitter.arguments(&self.name)
    }

    /// The value of the parameter at `index`
    pub fn arg(&self, index: usize) -> EmitResult<Value> {
        let args = self.args()?;
        args.get(index).cloned().ok_or_else(|| {
            EmitError::argument_mismatch(
                self.name.as_str(),
                format!("no parameter at index {}", index),
            )
        })
    }

    /// Allocate one local slot; returns a pointer value
    pub fn var(&mut self, vt: &ValueType) -> EmitResult<Value> {
        self.emitter.variable(vt)
    }

    /// Allocate one local slot under a debug name; a repeated name is
    /// disambiguated, never rejected
    pub fn named_var(&mut self, vt: &ValueType, name: &str) -> EmitResult<Value> {
        self.emitter.named_variable(vt, name)
    }

    /// Allocate a local array of `count` elements
    pub fn var_array(&mut self, vt: &ValueType, count: u64) -> EmitResult<Value> {
        self.emitter.stack_alloc(vt, count)
    }

    /// Load, apply an operator with `value`, store back; returns the new value
    pub fn op_and_update(
        &mut self,
        ptr: Value,
        op: OperatorType,
        value: Value,
    ) -> EmitResult<Value> {
        let current = self.load(ptr.clone())?;
        let updated = self.op(op, current, value)?;
        self.store(ptr, updated.clone())?;
        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Array-style addressing ("A"): offsets into stack allocations with a
    // statically known size are bounds-checked at emission time
    // ------------------------------------------------------------------

    pub fn ptr_offset_a(&mut self, ptr: Value, offset: i32) -> EmitResult<Value> {
        if let Some(size) = self.emitter.alloc_size_of(&ptr) {
            if offset < 0 || offset as u64 >= size {
                return Err(EmitError::type_error(format!(
                    "index {} out of bounds for allocation of {} elements",
                    offset, size
                )));
            }
        }
        let offset = self.literal_i32(offset);
        self.emitter.ptr_offset(ptr, offset)
    }

    pub fn value_at_a(&mut self, ptr: Value, offset: i32) -> EmitResult<Value> {
        let addr = self.ptr_offset_a(ptr, offset)?;
        self.load(addr)
    }

    pub fn set_value_at_a(&mut self, ptr: Value, offset: i32, value: Value) -> EmitResult<()> {
        let addr = self.ptr_offset_a(ptr, offset)?;
        self.store(addr, value)
    }

    // ------------------------------------------------------------------
    // Heap-style addressing ("H"): raw pointer offsets, never checked;
    // staying inside the allocation is the caller's responsibility
    // ------------------------------------------------------------------

    pub fn ptr_offset_h(&mut self, ptr: Value, offset: Value) -> EmitResult<Value> {
        self.emitter.ptr_offset(ptr, offset)
    }

    pub fn value_at_h(&mut self, ptr: Value, offset: Value) -> EmitResult<Value> {
        let addr = self.ptr_offset_h(ptr, offset)?;
        self.load(addr)
    }

    pub fn set_value_at_h(&mut self, ptr: Value, offset: Value, value: Value) -> EmitResult<()> {
        let addr = self.ptr_offset_h(ptr, offset)?;
        self.store(addr, value)
    }

    // ------------------------------------------------------------------
    // Global addressing
    // ------------------------------------------------------------------

    pub fn global_ptr_offset(&mut self, name: &str, offset: Value) -> EmitResult<Value> {
        self.emitter.global_ptr_offset(name, offset)
    }

    pub fn global_value_at(&mut self, name: &str, offset: Value) -> EmitResult<Value> {
        let addr = self.global_ptr_offset(name, offset)?;
        self.load(addr)
    }

    pub fn set_global_value_at(
        &mut self,
        name: &str,
        offset: Value,
        value: Value,
    ) -> EmitResult<()> {
        let addr = self.global_ptr_offset(name, offset)?;
        self.store(addr, value)
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    /// Call a function by name; it must already be declared or defined in
    /// the module
    pub fn call(&mut self, name: &str, args: &[Value]) -> EmitResult<Option<Value>> {
        self.emitter.call(name, args)
    }

    // ------------------------------------------------------------------
    // Structured control flow
    // ------------------------------------------------------------------

    /// Build a counted loop without manual block wiring
    pub fn for_loop(&self) -> IRForLoopEmitter {
        IRForLoopEmitter::new()
    }

    /// Build an if/else region without manual block wiring
    pub fn if_(&self) -> IRIfEmitter {
        IRIfEmitter::new()
    }

    // ------------------------------------------------------------------
    // Standard runtime calls
    // ------------------------------------------------------------------

    /// Allocate `count` elements of `vt` on the runtime heap
    ///
    /// Emits a call to `malloc` and casts the result pointer. Pairing with
    /// `free` is not tracked here; an unmatched allocation leaks at runtime.
    pub fn malloc(&mut self, vt: &ValueType, count: i64) -> EmitResult<Value> {
        let elem_size = vt.size_in_bytes().ok_or_else(|| {
            EmitError::type_error(format!("cannot allocate {}", vt))
        })? as i64;
        self.emitter.declare_raw(
            MALLOC,
            IrType::I8.ptr_to(),
            &[("size".to_string(), IrType::I64)],
            false,
        )?;
        let bytes = self.literal_i64(count * elem_size);
        let raw = self
            .call(MALLOC, &[bytes])?
            .ok_or_else(|| EmitError::Internal("malloc returned void".to_string()))?;
        self.cast(raw, &vt.clone().ptr_to())
    }

    /// Release a heap allocation
    pub fn free(&mut self, ptr: Value) -> EmitResult<()> {
        self.emitter.declare_raw(
            FREE,
            IrType::Void,
            &[("ptr".to_string(), IrType::I8.ptr_to())],
            false,
        )?;
        let raw = self.cast(ptr, &ValueType::Byte.ptr_to())?;
        self.call(FREE, &[raw])?;
        Ok(())
    }

    /// Print a literal string
    pub fn print(&mut self, text: &str) -> EmitResult<()> {
        self.emitter.declare_raw(
            PRINT,
            IrType::Void,
            &[("text".to_string(), IrType::I8.ptr_to())],
            false,
        )?;
        let text = self.literal_string(text);
        self.call(PRINT, &[text])?;
        Ok(())
    }

    /// Formatted print; the first argument is the format string
    pub fn printf(&mut self, args: &[Value]) -> EmitResult<()> {
        self.emitter.declare_raw(
            PRINTF,
            IrType::I32,
            &[("format".to_string(), IrType::I8.ptr_to())],
            true,
        )?;
        self.call(PRINTF, args)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Verification
    // ------------------------------------------------------------------

    /// Run structural validation on the bound function
    ///
    /// Must succeed before the function is handed to the downstream
    /// compiler; the first violation found is reported.
    pub fn verify(&self) -> EmitResult<()> {
        debug!("verifying @{}", self.name);
        verify::verify_function(self.function()?)
    }

    /// Count the instructions emitted so far, used by tests and diagnostics
    pub fn instruction_count(&self) -> usize {
        self.function()
            .map(|f| {
                f.blocks
                    .iter()
                    .map(|b| b.instructions.len())
                    .sum::<usize>()
            })
            .unwrap_or(0)
    }

    /// Whether the block at the cursor already ends in a terminator
    pub(crate) fn current_block_terminated(&self) -> bool {
        self.emitter.current_block_terminated()
    }

    pub(crate) fn retarget_false_edge(
        &mut self,
        block: BlockId,
        new_target: BlockId,
    ) -> EmitResult<()> {
        let name = self.name.clone();
        self.emitter.retarget_false_edge(&name, block, new_target)
    }
}
