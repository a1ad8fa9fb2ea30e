//! Typed instruction builder over the IR
//!
//! `IREmitter` is the sole translator from high-level, typed requests to
//! native IR instructions. It owns the module under construction and the
//! instruction-insertion cursor; every emission call appends to the block
//! the cursor points at, in exactly the call order issued. The cursor is
//! scoped to this emitter instance, so independent modules can be lowered
//! on independent emitters without sharing state.
//!
//! There is no rollback. A call that fails validation emits nothing, but a
//! partially emitted function that fails verification must be discarded by
//! the caller.

use crate::ir::{
    self, BinOp, CmpPred, ConstValue, Function, GlobalInit, GlobalVariable, Instruction, IrType,
    Linkage, Module, Value,
};
use emc_common::{
    BlockId, ComparisonType, EmitError, EmitResult, NamedValueTypeList, OperatorType, SymbolTable,
    TempId, ValueType,
};
use log::{debug, trace};
use std::collections::HashMap;

/// Insertion cursor: one function, one block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cursor {
    function: usize,
    block: BlockId,
}

/// The low-level instruction builder
pub struct IREmitter {
    module: Module,
    cursor: Option<Cursor>,
    /// Interned string-literal globals: global name -> content
    string_literals: SymbolTable<String>,
    next_string_id: u32,
    /// Cached zero constants, reused across calls
    zero_cache: HashMap<ValueType, Value>,
}

impl IREmitter {
    /// Create an emitter owning a fresh module
    pub fn new(module_name: impl Into<String>) -> Self {
        let module = Module::new(module_name);
        debug!("created module `{}`", module.name);
        Self {
            module,
            cursor: None,
            string_literals: SymbolTable::new(),
            next_string_id: 0,
            zero_cache: HashMap::new(),
        }
    }

    /// The module under construction
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Consume the emitter and hand the finished module to the caller
    pub fn into_module(self) -> Module {
        self.module
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    /// Map a value type to its native type
    pub fn ty(&self, vt: &ValueType) -> IrType {
        IrType::from_value_type(vt)
    }

    /// Build a native array type; the element type must be concrete
    pub fn array_type(&self, vt: &ValueType, size: u64) -> EmitResult<IrType> {
        if *vt == ValueType::Void {
            return Err(EmitError::type_error("array of void"));
        }
        Ok(IrType::Array {
            size,
            element_type: Box::new(self.ty(vt)),
        })
    }

    /// Resolve the type of a value in the context of the current function
    pub fn value_type(&self, value: &Value) -> EmitResult<IrType> {
        let function = self.current_function()?;
        self.module.value_type(function, value)
    }

    // ------------------------------------------------------------------
    // Literals and globals
    // ------------------------------------------------------------------

    pub fn literal_byte(&self, value: u8) -> Value {
        Value::Const(ConstValue::Byte(value))
    }

    pub fn literal_i16(&self, value: i16) -> Value {
        Value::Const(ConstValue::Int16(value))
    }

    pub fn literal_i32(&self, value: i32) -> Value {
        Value::Const(ConstValue::Int32(value))
    }

    pub fn literal_i64(&self, value: i64) -> Value {
        Value::Const(ConstValue::Int64(value))
    }

    pub fn literal_f64(&self, value: f64) -> Value {
        Value::Const(ConstValue::Double(value))
    }

    /// The zero constant of a scalar type
    pub fn zero(&mut self, vt: &ValueType) -> EmitResult<Value> {
        if let Some(cached) = self.zero_cache.get(vt) {
            return Ok(cached.clone());
        }
        let zero = match vt {
            ValueType::Byte => self.literal_byte(0),
            ValueType::Int16 => self.literal_i16(0),
            ValueType::Int32 => self.literal_i32(0),
            ValueType::Int64 => self.literal_i64(0),
            ValueType::Double => self.literal_f64(0.0),
            other => {
                return Err(EmitError::type_error(format!(
                    "no zero constant for {}",
                    other
                )))
            }
        };
        self.zero_cache.insert(vt.clone(), zero.clone());
        Ok(zero)
    }

    /// Intern a string literal, deduplicated by content
    ///
    /// Repeated calls with identical content return the same global
    /// regardless of call site.
    pub fn literal_string(&mut self, content: &str) -> Value {
        if let Some((name, _)) = self
            .string_literals
            .iter()
            .find(|(_, existing)| existing.as_str() == content)
        {
            return Value::Global(name.clone());
        }
        // generated names must also dodge unrelated globals
        let mut name = format!("str.{}", self.next_string_id);
        self.next_string_id += 1;
        while self.module.get_global(&name).is_some() {
            name = format!("str.{}", self.next_string_id);
            self.next_string_id += 1;
        }
        self.intern_string(name, content)
    }

    /// Intern a named string literal, deduplicated by name and content
    ///
    /// The same name with the same content reuses one global; the same name
    /// with different content gets a disambiguating suffix.
    pub fn named_literal_string(&mut self, name: &str, content: &str) -> Value {
        let mut candidate = name.to_string();
        let mut n = 1;
        loop {
            match self.string_literals.get(&candidate) {
                Some(existing) if existing == content => {
                    return Value::Global(candidate);
                }
                // a non-string global under this name is a collision too
                None if self.module.get_global(&candidate).is_none() => {
                    return self.intern_string(candidate, content);
                }
                _ => {
                    candidate = format!("{}.{}", name, n);
                    n += 1;
                }
            }
        }
    }

    fn intern_string(&mut self, name: String, content: &str) -> Value {
        trace!("interning string global @{}", name);
        self.module.add_global(GlobalVariable {
            name: name.clone(),
            var_type: IrType::Array {
                // NUL terminator included
                size: content.len() as u64 + 1,
                element_type: Box::new(IrType::I8),
            },
            is_constant: true,
            init: GlobalInit::Str(content.to_string()),
            linkage: Linkage::Internal,
        });
        self.string_literals.insert(name.clone(), content.to_string());
        Value::Global(name)
    }

    /// Emit a constant global array of doubles
    pub fn global_double_array(&mut self, name: &str, values: &[f64]) -> Value {
        let mut candidate = name.to_string();
        let mut n = 1;
        while self.module.get_global(&candidate).is_some() {
            candidate = format!("{}.{}", name, n);
            n += 1;
        }
        self.module.add_global(GlobalVariable {
            name: candidate.clone(),
            var_type: IrType::Array {
                size: values.len() as u64,
                element_type: Box::new(IrType::F64),
            },
            is_constant: true,
            init: GlobalInit::DoubleArray(values.to_vec()),
            linkage: Linkage::Internal,
        });
        Value::Global(candidate)
    }

    // ------------------------------------------------------------------
    // Casts
    // ------------------------------------------------------------------

    /// Convert a value to the destination type
    ///
    /// Integer/float conversions in any direction are accepted here; the
    /// implicit-promotion rules only restrict what happens without a cast.
    /// Pointer casts require compatible element types (identical, or byte
    /// pointers on either side). A cast to the source type is the identity
    /// and emits nothing.
    pub fn cast(&mut self, value: Value, dest: &ValueType) -> EmitResult<Value> {
        match dest {
            ValueType::Void => return Err(EmitError::invalid_cast("cast to void")),
            ValueType::Char8 => return Err(EmitError::invalid_cast("cast to string")),
            _ => {}
        }
        let from = self.value_type(&value)?;
        let to = self.ty(dest);
        if from == to {
            return Ok(value);
        }
        let ok = match (&from, &to) {
            (IrType::Ptr(src), IrType::Ptr(dst)) => {
                src == dst || **src == IrType::I8 || **dst == IrType::I8
            }
            (f, t) => (f.is_integer() || f.is_float()) && (t.is_integer() || t.is_float()),
        };
        if !ok {
            return Err(EmitError::invalid_cast(format!(
                "cannot cast {} to {}",
                from, to
            )));
        }
        let result = self.new_temp(to.clone())?;
        self.emit(Instruction::Cast {
            result,
            value,
            from,
            to,
        })?;
        Ok(Value::Temp(result))
    }

    /// Truncating float-to-int conversion
    pub fn cast_float_to_int(&mut self, value: Value) -> EmitResult<Value> {
        let from = self.value_type(&value)?;
        if !from.is_float() {
            return Err(EmitError::invalid_cast(format!(
                "float-to-int cast of {}",
                from
            )));
        }
        self.cast(value, &ValueType::Int32)
    }

    // ------------------------------------------------------------------
    // Arithmetic and comparison
    // ------------------------------------------------------------------

    /// Emit a binary operation, implicitly promoting the operands
    ///
    /// Integer operands widen to the wider operand; any double operand
    /// promotes the operation to double. The promoted (operator, type) pair
    /// selects the native opcode.
    pub fn binary_op(&mut self, op: OperatorType, lhs: Value, rhs: Value) -> EmitResult<Value> {
        let lt = self.value_type(&lhs)?;
        let rt = self.value_type(&rhs)?;
        let promoted = ir::promote(&lt, &rt)?;
        if op == OperatorType::Modulo && promoted.is_float() {
            return Err(EmitError::type_error("modulo is not defined on double"));
        }
        let opcode = select_binop(op, promoted.is_float());
        let lhs = self.widen(lhs, &lt, &promoted)?;
        let rhs = self.widen(rhs, &rt, &promoted)?;
        let result = self.new_temp(promoted.clone())?;
        self.emit(Instruction::Binary {
            result,
            op: opcode,
            lhs,
            rhs,
            result_type: promoted,
        })?;
        Ok(Value::Temp(result))
    }

    /// Emit a comparison producing a 1-bit value
    pub fn cmp(&mut self, pred: ComparisonType, lhs: Value, rhs: Value) -> EmitResult<Value> {
        let lt = self.value_type(&lhs)?;
        let rt = self.value_type(&rhs)?;
        let promoted = ir::promote(&lt, &rt)?;
        let lhs = self.widen(lhs, &lt, &promoted)?;
        let rhs = self.widen(rhs, &rt, &promoted)?;
        let result = self.new_temp(IrType::I1)?;
        self.emit(Instruction::Cmp {
            result,
            pred: select_cmp(pred),
            float: promoted.is_float(),
            lhs,
            rhs,
        })?;
        Ok(Value::Temp(result))
    }

    /// Emit a widening cast if the value is not already of the target type
    fn widen(&mut self, value: Value, from: &IrType, to: &IrType) -> EmitResult<Value> {
        if from == to {
            return Ok(value);
        }
        let result = self.new_temp(to.clone())?;
        self.emit(Instruction::Cast {
            result,
            value,
            from: from.clone(),
            to: to.clone(),
        })?;
        Ok(Value::Temp(result))
    }

    // ------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------

    /// Declare a function without a body
    ///
    /// Redeclaration with the same signature is idempotent; an incompatible
    /// signature is rejected.
    pub fn declare_function(
        &mut self,
        name: &str,
        return_type: &ValueType,
        args: &NamedValueTypeList,
    ) -> EmitResult<()> {
        let ret = self.ty(return_type);
        let params: Vec<(String, IrType)> = args
            .iter()
            .map(|(n, vt)| (n.clone(), self.ty(vt)))
            .collect();
        self.declare_raw(name, ret, &params, false)
    }

    /// Declare an external function from native types, optionally variadic
    pub fn declare_raw(
        &mut self,
        name: &str,
        return_type: IrType,
        params: &[(String, IrType)],
        is_vararg: bool,
    ) -> EmitResult<()> {
        if let Some(existing) = self.module.get_function(name) {
            let same_sig = existing.return_type == return_type
                && existing.is_vararg == is_vararg
                && existing.params.len() == params.len()
                && existing
                    .params
                    .iter()
                    .zip(params)
                    .all(|(p, (_, ty))| p.ty == *ty);
            if same_sig {
                return Ok(());
            }
            return Err(EmitError::redeclaration(
                name,
                format!("existing signature is {}", signature_of(existing)),
            ));
        }
        debug!("declaring function @{}", name);
        let mut function = Function::new(name, return_type, Linkage::External);
        function.is_external = true;
        function.is_vararg = is_vararg;
        for (pname, ty) in params {
            function.add_parameter(pname.clone(), ty.clone());
        }
        self.module.add_function(function);
        Ok(())
    }

    /// Define a function and position the cursor in its fresh entry block
    ///
    /// A prior declaration with the same signature is completed in place;
    /// an incompatible signature, or a second definition, is rejected.
    pub fn define_function(
        &mut self,
        name: &str,
        return_type: &ValueType,
        linkage: Linkage,
        args: &NamedValueTypeList,
    ) -> EmitResult<()> {
        let ret = self.ty(return_type);
        let params: Vec<(String, IrType)> = args
            .iter()
            .map(|(n, vt)| (n.clone(), self.ty(vt)))
            .collect();

        if let Some(existing) = self.module.get_function(name) {
            if !existing.is_external {
                return Err(EmitError::redeclaration(name, "already defined"));
            }
            let same_sig = existing.return_type == ret
                && existing.params.len() == params.len()
                && existing
                    .params
                    .iter()
                    .zip(&params)
                    .all(|(p, (_, ty))| p.ty == *ty);
            if !same_sig {
                return Err(EmitError::redeclaration(
                    name,
                    format!("existing signature is {}", signature_of(existing)),
                ));
            }
        } else {
            let mut function = Function::new(name, ret, linkage);
            for (pname, ty) in &params {
                function.add_parameter(pname.clone(), ty.clone());
            }
            self.module.add_function(function);
        }

        let index = self.function_index(name)?;
        let function = &mut self.module.functions[index];
        function.is_external = false;
        function.linkage = linkage;
        let entry = function.add_block("entry");
        self.cursor = Some(Cursor {
            function: index,
            block: entry,
        });
        debug!("defining function @{}", name);
        Ok(())
    }

    /// The parameter values of a function, in declaration order
    pub fn arguments(&self, name: &str) -> EmitResult<Vec<Value>> {
        let function = self
            .module
            .get_function(name)
            .ok_or_else(|| EmitError::UnknownFunction(name.to_string()))?;
        Ok(function.params.iter().map(|p| Value::Temp(p.temp)).collect())
    }

    // ------------------------------------------------------------------
    // Blocks and the cursor
    // ------------------------------------------------------------------

    /// Append a new block to a function
    pub fn block(&mut self, function: &str, label: &str) -> EmitResult<BlockId> {
        let index = self.function_index(function)?;
        let id = self.module.functions[index].add_block(label);
        trace!("block bb{} `{}` in @{}", id, label, function);
        Ok(id)
    }

    /// Insert a new block immediately after an existing one
    pub fn block_after(
        &mut self,
        function: &str,
        prev: BlockId,
        label: &str,
    ) -> EmitResult<BlockId> {
        let index = self.function_index(function)?;
        self.module.functions[index]
            .add_block_after(prev, label)
            .ok_or_else(|| EmitError::Internal(format!("block bb{} not found", prev)))
    }

    /// The block the cursor points at
    pub fn current_block(&self) -> Option<BlockId> {
        self.cursor.map(|c| c.block)
    }

    /// The function the cursor points at
    pub fn current_function_name(&self) -> Option<&str> {
        self.cursor
            .map(|c| self.module.functions[c.function].name.as_str())
    }

    /// Move the insertion cursor; subsequent emission appends to this block
    pub fn set_current_block(&mut self, function: &str, block: BlockId) -> EmitResult<()> {
        let index = self.function_index(function)?;
        if self.module.functions[index].get_block(block).is_none() {
            return Err(EmitError::Internal(format!(
                "block bb{} not found in @{}",
                block, function
            )));
        }
        self.cursor = Some(Cursor {
            function: index,
            block,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Calls and joins
    // ------------------------------------------------------------------

    /// Emit a call; argument count and types must match the callee signature
    ///
    /// Returns the result value for non-void callees. Nothing is emitted if
    /// validation fails.
    pub fn call(&mut self, callee: &str, args: &[Value]) -> EmitResult<Option<Value>> {
        let function = self
            .module
            .get_function(callee)
            .ok_or_else(|| EmitError::UnknownFunction(callee.to_string()))?;
        let fixed = function.params.len();
        let arity_ok = if function.is_vararg {
            args.len() >= fixed
        } else {
            args.len() == fixed
        };
        if !arity_ok {
            return Err(EmitError::argument_mismatch(
                callee,
                format!("expected {} arguments, got {}", fixed, args.len()),
            ));
        }
        let param_types: Vec<IrType> = function.params.iter().map(|p| p.ty.clone()).collect();
        let result_type = function.return_type.clone();
        for (i, (arg, expected)) in args.iter().zip(&param_types).enumerate() {
            let actual = self.value_type(arg)?;
            if actual != *expected {
                return Err(EmitError::argument_mismatch(
                    callee,
                    format!("argument {} has type {}, expected {}", i, actual, expected),
                ));
            }
        }
        trace!("call @{} with {} args", callee, args.len());
        let result = if result_type == IrType::Void {
            None
        } else {
            Some(self.new_temp(result_type.clone())?)
        };
        self.emit(Instruction::Call {
            result,
            callee: callee.to_string(),
            args: args.to_vec(),
            result_type,
        })?;
        Ok(result.map(Value::Temp))
    }

    /// Emit a PHI node joining two predecessor values
    ///
    /// Both incoming blocks must be predecessors of the current block; the
    /// structured control-flow emitters satisfy this, and the verifier
    /// enforces it for everyone else.
    pub fn phi(
        &mut self,
        vt: &ValueType,
        lhs: Value,
        lhs_block: BlockId,
        rhs: Value,
        rhs_block: BlockId,
    ) -> EmitResult<Value> {
        let ty = self.ty(vt);
        for value in [&lhs, &rhs] {
            let actual = self.value_type(value)?;
            if actual != ty {
                return Err(EmitError::type_mismatch(format!(
                    "phi incoming value has type {}, expected {}",
                    actual, ty
                )));
            }
        }
        let result = self.new_temp(ty.clone())?;
        self.emit(Instruction::Phi {
            result,
            incoming: vec![(lhs, lhs_block), (rhs, rhs_block)],
            result_type: ty,
        })?;
        Ok(Value::Temp(result))
    }

    // ------------------------------------------------------------------
    // Memory
    // ------------------------------------------------------------------

    /// Address arithmetic on a pointer, scaled by the element size
    pub fn ptr_offset(&mut self, ptr: Value, offset: Value) -> EmitResult<Value> {
        let ptr_ty = self.value_type(&ptr)?;
        let elem = match &ptr_ty {
            IrType::Ptr(elem) => (**elem).clone(),
            other => {
                return Err(EmitError::type_error(format!(
                    "pointer required for offset, got {}",
                    other
                )))
            }
        };
        let off_ty = self.value_type(&offset)?;
        if !off_ty.is_integer() {
            return Err(EmitError::type_mismatch(format!(
                "pointer offset must be an integer, got {}",
                off_ty
            )));
        }
        let result = self.new_temp(ptr_ty)?;
        self.emit(Instruction::GetElementPtr {
            result,
            ptr,
            offset,
            elem_type: elem,
        })?;
        Ok(Value::Temp(result))
    }

    /// Address arithmetic into a named global array
    pub fn global_ptr_offset(&mut self, name: &str, offset: Value) -> EmitResult<Value> {
        if self.module.get_global(name).is_none() {
            return Err(EmitError::type_error(format!("unknown global @{}", name)));
        }
        self.ptr_offset(Value::Global(name.to_string()), offset)
    }

    /// Load the value a pointer refers to
    pub fn load(&mut self, ptr: Value) -> EmitResult<Value> {
        let ptr_ty = self.value_type(&ptr)?;
        let elem = match &ptr_ty {
            IrType::Ptr(elem) => (**elem).clone(),
            other => {
                return Err(EmitError::type_error(format!(
                    "pointer required for load, got {}",
                    other
                )))
            }
        };
        let result = self.new_temp(elem.clone())?;
        self.emit(Instruction::Load {
            result,
            ptr,
            result_type: elem,
        })?;
        Ok(Value::Temp(result))
    }

    /// Store a value through a pointer
    ///
    /// The stored value's type must match the pointee type exactly; there is
    /// no implicit cast on store.
    pub fn store(&mut self, ptr: Value, value: Value) -> EmitResult<()> {
        let ptr_ty = self.value_type(&ptr)?;
        let elem = match &ptr_ty {
            IrType::Ptr(elem) => (**elem).clone(),
            other => {
                return Err(EmitError::type_error(format!(
                    "pointer required for store, got {}",
                    other
                )))
            }
        };
        let actual = self.value_type(&value)?;
        if actual != elem {
            return Err(EmitError::type_mismatch(format!(
                "store of {} through {} pointer",
                actual, elem
            )));
        }
        self.emit(Instruction::Store { value, ptr })
    }

    /// Allocate one addressable local slot in the entry region
    pub fn variable(&mut self, vt: &ValueType) -> EmitResult<Value> {
        self.alloca(vt, 1)
    }

    /// Allocate a local slot carrying a debug name
    ///
    /// A name already in use within the function is disambiguated with a
    /// numeric suffix rather than rejected.
    pub fn named_variable(&mut self, vt: &ValueType, name: &str) -> EmitResult<Value> {
        let slot = self.alloca(vt, 1)?;
        if let Value::Temp(id) = slot {
            let cursor = self.cursor()?;
            let stored = self.module.functions[cursor.function].name_temp(id, name);
            trace!("named local slot %{} = {}", id, stored);
        }
        Ok(slot)
    }

    /// Allocate `count` elements of addressable local storage
    pub fn stack_alloc(&mut self, vt: &ValueType, count: u64) -> EmitResult<Value> {
        self.alloca(vt, count)
    }

    /// Entry-region allocation; returns a pointer value
    ///
    /// The alloca lands at the top of the entry block regardless of where
    /// the cursor currently is, keeping all allocations in the entry region.
    fn alloca(&mut self, vt: &ValueType, count: u64) -> EmitResult<Value> {
        if *vt == ValueType::Void {
            return Err(EmitError::type_error("cannot allocate void"));
        }
        let alloc_type = self.ty(vt);
        let cursor = self.cursor()?;
        let function = &mut self.module.functions[cursor.function];
        let result = function.new_temp(alloc_type.clone().ptr_to());
        let entry = function
            .entry_block_mut()
            .ok_or_else(|| EmitError::Internal("function has no entry block".to_string()))?;
        let at = entry
            .instructions
            .iter()
            .position(|i| !matches!(i, Instruction::Alloca { .. }))
            .unwrap_or(entry.instructions.len());
        entry.instructions.insert(
            at,
            Instruction::Alloca {
                result,
                alloc_type,
                count,
            },
        );
        Ok(Value::Temp(result))
    }

    /// The statically known element count of a stack allocation, if `ptr`
    /// is the direct result of one
    pub fn alloc_size_of(&self, ptr: &Value) -> Option<u64> {
        let Value::Temp(id) = ptr else { return None };
        let cursor = self.cursor.as_ref()?;
        let function = &self.module.functions[cursor.function];
        function.blocks.iter().flat_map(|b| &b.instructions).find_map(
            |instr| match instr {
                Instruction::Alloca { result, count, .. } if result == id => Some(*count),
                _ => None,
            },
        )
    }

    // ------------------------------------------------------------------
    // Terminators
    // ------------------------------------------------------------------

    /// Return from a void function, terminating the current block
    pub fn return_void(&mut self) -> EmitResult<()> {
        self.emit_terminator(Instruction::Return(None))
    }

    /// Return a value, terminating the current block
    pub fn return_value(&mut self, value: Value) -> EmitResult<()> {
        self.emit_terminator(Instruction::Return(Some(value)))
    }

    /// Unconditional branch, terminating the current block
    pub fn branch(&mut self, dest: BlockId) -> EmitResult<()> {
        self.check_block_exists(dest)?;
        self.emit_terminator(Instruction::Branch(dest))
    }

    /// Conditional branch on a 1-bit value, terminating the current block
    pub fn branch_cond(
        &mut self,
        cond: Value,
        then_block: BlockId,
        else_block: BlockId,
    ) -> EmitResult<()> {
        let cond_ty = self.value_type(&cond)?;
        if cond_ty != IrType::I1 {
            return Err(EmitError::type_mismatch(format!(
                "branch condition must be i1, got {}",
                cond_ty
            )));
        }
        self.check_block_exists(then_block)?;
        self.check_block_exists(else_block)?;
        self.emit_terminator(Instruction::BranchCond {
            cond,
            then_block,
            else_block,
        })
    }

    /// Retarget the false edge of the conditional branch ending `block`
    ///
    /// Used by the if-emitter when an else branch materializes after the
    /// conditional branch was already emitted with merge as its false edge.
    pub(crate) fn retarget_false_edge(
        &mut self,
        function: &str,
        block: BlockId,
        new_target: BlockId,
    ) -> EmitResult<()> {
        let index = self.function_index(function)?;
        let block = self.module.functions[index]
            .get_block_mut(block)
            .ok_or_else(|| EmitError::Internal(format!("block bb{} not found", block)))?;
        match block.instructions.last_mut() {
            Some(Instruction::BranchCond { else_block, .. }) => {
                *else_block = new_target;
                Ok(())
            }
            _ => Err(EmitError::Internal(format!(
                "block `{}` does not end in a conditional branch",
                block.label
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Emission core
    // ------------------------------------------------------------------

    fn cursor(&self) -> EmitResult<Cursor> {
        self.cursor
            .ok_or_else(|| EmitError::Internal("no insertion point set".to_string()))
    }

    fn function_index(&self, name: &str) -> EmitResult<usize> {
        self.module
            .functions
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| EmitError::UnknownFunction(name.to_string()))
    }

    fn current_function(&self) -> EmitResult<&Function> {
        let cursor = self.cursor()?;
        Ok(&self.module.functions[cursor.function])
    }

    fn check_block_exists(&self, block: BlockId) -> EmitResult<()> {
        if self.current_function()?.get_block(block).is_none() {
            return Err(EmitError::Internal(format!(
                "branch target bb{} not found",
                block
            )));
        }
        Ok(())
    }

    /// Create a fresh temporary in the current function
    fn new_temp(&mut self, ty: IrType) -> EmitResult<TempId> {
        let cursor = self.cursor()?;
        Ok(self.module.functions[cursor.function].new_temp(ty))
    }

    /// Append an instruction to the current block
    fn emit(&mut self, instr: Instruction) -> EmitResult<()> {
        let cursor = self.cursor()?;
        let block = self.module.functions[cursor.function]
            .get_block_mut(cursor.block)
            .ok_or_else(|| EmitError::Internal("cursor points at a missing block".to_string()))?;
        block.add_instruction(instr);
        Ok(())
    }

    /// Append a terminator, rejecting a second one in the same block
    fn emit_terminator(&mut self, instr: Instruction) -> EmitResult<()> {
        let cursor = self.cursor()?;
        let block = self.module.functions[cursor.function]
            .get_block(cursor.block)
            .ok_or_else(|| EmitError::Internal("cursor points at a missing block".to_string()))?;
        if block.has_terminator() {
            return Err(EmitError::DoubleTermination {
                block: block.label.clone(),
            });
        }
        self.emit(instr)
    }

    /// Whether the block at the cursor already ends in a terminator
    pub fn current_block_terminated(&self) -> bool {
        self.cursor
            .and_then(|c| self.module.functions[c.function].get_block(c.block))
            .is_some_and(|b| b.has_terminator())
    }
}

/// Native opcode for an (operator, float?) pair
fn select_binop(op: OperatorType, float: bool) -> BinOp {
    match (op, float) {
        (OperatorType::Add, false) => BinOp::Add,
        (OperatorType::Subtract, false) => BinOp::Sub,
        (OperatorType::Multiply, false) => BinOp::Mul,
        (OperatorType::Divide, false) => BinOp::SDiv,
        (OperatorType::Modulo, false) => BinOp::SRem,
        (OperatorType::Add, true) => BinOp::FAdd,
        (OperatorType::Subtract, true) => BinOp::FSub,
        (OperatorType::Multiply, true) => BinOp::FMul,
        (OperatorType::Divide, true) => BinOp::FDiv,
        // rejected before selection
        (OperatorType::Modulo, true) => unreachable!("modulo on double"),
    }
}

fn select_cmp(pred: ComparisonType) -> CmpPred {
    match pred {
        ComparisonType::Eq => CmpPred::Eq,
        ComparisonType::Neq => CmpPred::Ne,
        ComparisonType::Lt => CmpPred::Lt,
        ComparisonType::Lte => CmpPred::Le,
        ComparisonType::Gt => CmpPred::Gt,
        ComparisonType::Gte => CmpPred::Ge,
    }
}

fn signature_of(function: &Function) -> String {
    let params: Vec<String> = function.params.iter().map(|p| p.ty.to_string()).collect();
    format!("{} ({})", function.return_type, params.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn test_emitter() -> IREmitter {
        let mut emitter = IREmitter::new("test");
        emitter
            .define_function(
                "f",
                &ValueType::Int32,
                Linkage::External,
                &vec![("x".to_string(), ValueType::Int32)],
            )
            .unwrap();
        emitter
    }

    #[test]
    fn test_literals_carry_their_type() {
        let emitter = IREmitter::new("test");
        assert_eq!(
            emitter.literal_i32(7),
            Value::Const(ConstValue::Int32(7))
        );
        assert_eq!(
            emitter.literal_f64(0.5),
            Value::Const(ConstValue::Double(0.5))
        );
    }

    #[test]
    fn test_string_literal_dedup_by_content() {
        let mut emitter = IREmitter::new("test");
        let a = emitter.literal_string("hello");
        let b = emitter.literal_string("hello");
        let c = emitter.literal_string("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(emitter.module().globals.len(), 2);
    }

    #[test]
    fn test_named_string_literal_dedup() {
        let mut emitter = IREmitter::new("test");
        let a = emitter.named_literal_string("fmt", "%d\n");
        let b = emitter.named_literal_string("fmt", "%d\n");
        assert_eq!(a, b);
        assert_eq!(emitter.module().globals.len(), 1);

        // Same name, different content: a new uniquified global
        let c = emitter.named_literal_string("fmt", "%f\n");
        assert_ne!(a, c);
        assert_eq!(c, Value::Global("fmt.1".to_string()));
        assert_eq!(emitter.module().globals.len(), 2);
    }

    #[test]
    fn test_named_string_dodges_unrelated_global() {
        let mut emitter = IREmitter::new("test");
        emitter.global_double_array("fmt", &[1.0]);
        let s = emitter.named_literal_string("fmt", "%d\n");
        assert_eq!(s, Value::Global("fmt.1".to_string()));
        assert_eq!(emitter.module().globals.len(), 2);
        // the array kept its name; no two globals share one
        assert!(emitter.module().get_global("fmt").is_some());
        assert!(emitter.module().get_global("fmt.1").is_some());
    }

    #[test]
    fn test_generated_string_names_skip_taken_globals() {
        let mut emitter = IREmitter::new("test");
        emitter.global_double_array("str.0", &[1.0]);
        let s = emitter.literal_string("hello");
        assert_eq!(s, Value::Global("str.1".to_string()));
        assert_eq!(emitter.module().globals.len(), 2);
    }

    #[test]
    fn test_binary_op_promotes_int_to_double() {
        let mut emitter = test_emitter();
        let result = emitter
            .binary_op(
                OperatorType::Add,
                emitter.literal_i32(1),
                emitter.literal_f64(2.0),
            )
            .unwrap();
        assert_eq!(emitter.value_type(&result).unwrap(), IrType::F64);
    }

    #[test]
    fn test_binary_op_widens_integers() {
        let mut emitter = test_emitter();
        let result = emitter
            .binary_op(
                OperatorType::Multiply,
                emitter.literal_i16(3),
                emitter.literal_i64(4),
            )
            .unwrap();
        assert_eq!(emitter.value_type(&result).unwrap(), IrType::I64);
    }

    #[test]
    fn test_modulo_on_double_rejected() {
        let mut emitter = test_emitter();
        let err = emitter
            .binary_op(
                OperatorType::Modulo,
                emitter.literal_f64(1.0),
                emitter.literal_f64(2.0),
            )
            .unwrap_err();
        assert!(matches!(err, EmitError::TypeError { .. }));
    }

    #[test]
    fn test_cmp_produces_i1() {
        let mut emitter = test_emitter();
        let result = emitter
            .cmp(
                ComparisonType::Lt,
                emitter.literal_i32(1),
                emitter.literal_i32(2),
            )
            .unwrap();
        assert_eq!(emitter.value_type(&result).unwrap(), IrType::I1);
    }

    #[test]
    fn test_cast_identity_emits_nothing(){
        let mut emitter = test_emitter();
        let before = instruction_count(&emitter);
        let v = emitter
            .cast(emitter.literal_i32(5), &ValueType::Int32)
            .unwrap();
        assert_eq!(v, emitter.literal_i32(5));
        assert_eq!(instruction_count(&emitter), before);
    }

    #[test]
    fn test_cast_to_string_rejected() {
        let mut emitter = test_emitter();
        let err = emitter
            .cast(emitter.literal_i32(5), &ValueType::Char8)
            .unwrap_err();
        assert!(matches!(err, EmitError::InvalidCast { .. }));
    }

    #[test]
    fn test_incompatible_pointer_cast_rejected() {
        let mut emitter = test_emitter();
        let p = emitter.variable(&ValueType::Double).unwrap();
        let err = emitter
            .cast(p, &ValueType::Int64.ptr_to())
            .unwrap_err();
        assert!(matches!(err, EmitError::InvalidCast { .. }));
    }

    #[test]
    fn test_byte_pointer_cast_allowed() {
        let mut emitter = test_emitter();
        let p = emitter.variable(&ValueType::Double).unwrap();
        let raw = emitter.cast(p, &ValueType::Byte.ptr_to()).unwrap();
        assert_eq!(
            emitter.value_type(&raw).unwrap(),
            IrType::I8.ptr_to()
        );
    }

    #[test]
    fn test_double_termination_rejected() {
        let mut emitter = test_emitter();
        emitter.return_value(emitter.literal_i32(0)).unwrap();
        let err = emitter.return_value(emitter.literal_i32(1)).unwrap_err();
        assert!(matches!(err, EmitError::DoubleTermination { .. }));
    }

    #[test]
    fn test_redeclaration_compatible_is_idempotent() {
        let mut emitter = IREmitter::new("test");
        let args = vec![("n".to_string(), ValueType::Int64)];
        emitter
            .declare_function("malloc", &ValueType::Byte.ptr_to(), &args)
            .unwrap();
        emitter
            .declare_function("malloc", &ValueType::Byte.ptr_to(), &args)
            .unwrap();
        assert_eq!(emitter.module().functions.len(), 1);
    }

    #[test]
    fn test_redeclaration_incompatible_rejected() {
        let mut emitter = IREmitter::new("test");
        emitter
            .declare_function("g", &ValueType::Void, &vec![])
            .unwrap();
        let err = emitter
            .declare_function("g", &ValueType::Int32, &vec![])
            .unwrap_err();
        assert!(matches!(err, EmitError::Redeclaration { .. }));
    }

    #[test]
    fn test_call_arity_checked_and_emits_nothing() {
        let mut emitter = test_emitter();
        emitter
            .declare_function(
                "h",
                &ValueType::Int32,
                &vec![
                    ("a".to_string(), ValueType::Int32),
                    ("b".to_string(), ValueType::Int32),
                ],
            )
            .unwrap();
        let before = instruction_count(&emitter);
        let err = emitter.call("h", &[emitter.literal_i32(1)]).unwrap_err();
        assert!(matches!(err, EmitError::ArgumentMismatch { .. }));
        assert_eq!(instruction_count(&emitter), before);
    }

    #[test]
    fn test_call_type_checked() {
        let mut emitter = test_emitter();
        emitter
            .declare_function(
                "h",
                &ValueType::Void,
                &vec![("a".to_string(), ValueType::Double)],
            )
            .unwrap();
        let err = emitter.call("h", &[emitter.literal_i32(1)]).unwrap_err();
        assert!(matches!(err, EmitError::ArgumentMismatch { .. }));
    }

    #[test]
    fn test_call_unknown_function() {
        let mut emitter = test_emitter();
        let err = emitter.call("missing", &[]).unwrap_err();
        assert_eq!(err, EmitError::UnknownFunction("missing".to_string()));
    }

    #[test]
    fn test_store_requires_exact_type() {
        let mut emitter = test_emitter();
        let slot = emitter.variable(&ValueType::Int32).unwrap();
        emitter.store(slot.clone(), emitter.literal_i32(7)).unwrap();
        let err = emitter
            .store(slot, emitter.literal_i64(7))
            .unwrap_err();
        assert!(matches!(err, EmitError::TypeMismatch { .. }));
    }

    #[test]
    fn test_allocas_land_in_entry_region() {
        let mut emitter = test_emitter();
        let body = emitter.block("f", "body").unwrap();
        emitter.branch(body).unwrap();
        emitter.set_current_block("f", body).unwrap();
        emitter.variable(&ValueType::Double).unwrap();

        let module = emitter.module();
        let entry = module.get_function("f").unwrap().entry_block().unwrap();
        assert!(matches!(
            entry.instructions.first(),
            Some(Instruction::Alloca { .. })
        ));
    }

    #[test]
    fn test_alloc_size_lookup() {
        let mut emitter = test_emitter();
        let arr = emitter.stack_alloc(&ValueType::Double, 16).unwrap();
        assert_eq!(emitter.alloc_size_of(&arr), Some(16));
        assert_eq!(emitter.alloc_size_of(&emitter.literal_i32(1)), None);
    }

    #[test]
    fn test_named_variable_disambiguates_repeats() {
        let mut emitter = test_emitter();
        let a = emitter.named_variable(&ValueType::Int32, "acc").unwrap();
        let b = emitter.named_variable(&ValueType::Int32, "acc").unwrap();
        let c = emitter.variable(&ValueType::Int32).unwrap();
        assert_ne!(a, b);

        let f = emitter.module().get_function("f").unwrap();
        let Value::Temp(a_id) = a else { unreachable!() };
        let Value::Temp(b_id) = b else { unreachable!() };
        let Value::Temp(c_id) = c else { unreachable!() };
        assert_eq!(f.temp_name(a_id), Some("acc"));
        assert_eq!(f.temp_name(b_id), Some("acc.1"));
        // unnamed locals stay anonymous
        assert_eq!(f.temp_name(c_id), None);
    }

    #[test]
    fn test_zero_is_cached() {
        let mut emitter = IREmitter::new("test");
        let a = emitter.zero(&ValueType::Double).unwrap();
        let b = emitter.zero(&ValueType::Double).unwrap();
        assert_eq!(a, b);
        assert!(emitter.zero(&ValueType::Void).is_err());
    }

    fn instruction_count(emitter: &IREmitter) -> usize {
        emitter
            .module()
            .functions
            .iter()
            .flat_map(|f| &f.blocks)
            .map(|b| b.instructions.len())
            .sum()
    }
}
