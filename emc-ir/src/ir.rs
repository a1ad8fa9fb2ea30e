//! Intermediate representation for lowered model graphs
//!
//! This module defines the IR that the emission layer produces: a module
//! owning functions and globals, functions owning basic blocks in an arena
//! referenced by `BlockId` handles, and instructions operating on typed
//! values. The structure is designed to be handed to a downstream native
//! backend once it passes verification.

use emc_common::{BlockId, TempId, ValueType};
use emc_common::{EmitError, EmitResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Native IR type produced by instruction selection
///
/// This is the backend-facing type system; `ValueType` is the closed
/// high-level model it is lowered from. `I1` exists only as the result of
/// comparisons.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IrType {
    Void,
    /// Boolean, produced by comparisons
    I1,
    I8,
    I16,
    I32,
    I64,
    F64,
    /// Pointer to element type
    Ptr(Box<IrType>),
    /// Array type [size x element_type]
    Array { size: u64, element_type: Box<IrType> },
    /// Function type
    Function {
        return_type: Box<IrType>,
        param_types: Vec<IrType>,
    },
}

impl IrType {
    /// Map a high-level value type to its native type
    pub fn from_value_type(vt: &ValueType) -> IrType {
        match vt {
            ValueType::Void => IrType::Void,
            ValueType::Byte => IrType::I8,
            ValueType::Int16 => IrType::I16,
            ValueType::Int32 => IrType::I32,
            ValueType::Int64 => IrType::I64,
            ValueType::Double => IrType::F64,
            ValueType::Char8 => IrType::I8,
            ValueType::Ptr(elem) => IrType::Ptr(Box::new(IrType::from_value_type(elem))),
        }
    }

    /// Get the size of this type in bytes
    pub fn size_in_bytes(&self) -> Option<u64> {
        match self {
            IrType::Void => None,
            IrType::I1 => Some(1),
            IrType::I8 => Some(1),
            IrType::I16 => Some(2),
            IrType::I32 => Some(4),
            IrType::I64 => Some(8),
            IrType::F64 => Some(8),
            // 32-bit pointers on the embedded targets we lower for
            IrType::Ptr(_) => Some(4),
            IrType::Array { size, element_type } => {
                element_type.size_in_bytes().map(|elem| elem * size)
            }
            IrType::Function { .. } => None,
        }
    }

    /// Check if this is an integer type
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            IrType::I1 | IrType::I8 | IrType::I16 | IrType::I32 | IrType::I64
        )
    }

    /// Check if this is a floating point type
    pub fn is_float(&self) -> bool {
        matches!(self, IrType::F64)
    }

    /// Check if this is a pointer type
    pub fn is_pointer(&self) -> bool {
        matches!(self, IrType::Ptr(_))
    }

    /// Get the element type for pointers and arrays
    pub fn element_type(&self) -> Option<&IrType> {
        match self {
            IrType::Ptr(elem) => Some(elem),
            IrType::Array { element_type, .. } => Some(element_type),
            _ => None,
        }
    }

    /// Build a pointer to this type
    pub fn ptr_to(self) -> IrType {
        IrType::Ptr(Box::new(self))
    }

    /// Widening rank among the integer types; `I1` is narrower than all
    pub(crate) fn int_rank(&self) -> Option<u8> {
        match self {
            IrType::I1 => Some(0),
            IrType::I8 => Some(1),
            IrType::I16 => Some(2),
            IrType::I32 => Some(3),
            IrType::I64 => Some(4),
            _ => None,
        }
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::Void => write!(f, "void"),
            IrType::I1 => write!(f, "i1"),
            IrType::I8 => write!(f, "i8"),
            IrType::I16 => write!(f, "i16"),
            IrType::I32 => write!(f, "i32"),
            IrType::I64 => write!(f, "i64"),
            IrType::F64 => write!(f, "f64"),
            IrType::Ptr(target) => write!(f, "{}*", target),
            IrType::Array { size, element_type } => write!(f, "[{} x {}]", size, element_type),
            IrType::Function {
                return_type,
                param_types,
            } => {
                write!(f, "{} (", return_type)?;
                for (i, param) in param_types.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", param)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Compute the implicitly promoted native type of a binary operation
///
/// Integer operands widen to the wider rank; any float operand promotes the
/// operation to `F64`. Pointers and void never promote implicitly.
pub fn promote(lhs: &IrType, rhs: &IrType) -> EmitResult<IrType> {
    if lhs.is_float() || rhs.is_float() {
        if lhs.is_float() && rhs.is_float() {
            return Ok(IrType::F64);
        }
        let other = if lhs.is_float() { rhs } else { lhs };
        if other.is_integer() {
            return Ok(IrType::F64);
        }
        return Err(EmitError::type_mismatch(format!(
            "no implicit promotion between {} and {}",
            lhs, rhs
        )));
    }
    match (lhs.int_rank(), rhs.int_rank()) {
        (Some(lr), Some(rr)) => Ok(if lr >= rr { lhs.clone() } else { rhs.clone() }),
        _ => Err(EmitError::type_mismatch(format!(
            "no implicit promotion between {} and {}",
            lhs, rhs
        ))),
    }
}

/// A typed constant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstValue {
    Byte(u8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Double(f64),
}

impl ConstValue {
    pub fn ty(&self) -> IrType {
        match self {
            ConstValue::Byte(_) => IrType::I8,
            ConstValue::Int16(_) => IrType::I16,
            ConstValue::Int32(_) => IrType::I32,
            ConstValue::Int64(_) => IrType::I64,
            ConstValue::Double(_) => IrType::F64,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConstValue::Byte(v) => Some(*v as i64),
            ConstValue::Int16(v) => Some(*v as i64),
            ConstValue::Int32(v) => Some(*v as i64),
            ConstValue::Int64(v) => Some(*v),
            ConstValue::Double(_) => None,
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Byte(v) => write!(f, "{}", v),
            ConstValue::Int16(v) => write!(f, "{}", v),
            ConstValue::Int32(v) => write!(f, "{}", v),
            ConstValue::Int64(v) => write!(f, "{}", v),
            ConstValue::Double(v) => write!(f, "{}", v),
        }
    }
}

/// IR value, the operand of every instruction
///
/// Values are opaque handles: temporaries name single-assignment results,
/// constants carry their own type, globals and functions are referenced by
/// symbol name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Temporary (virtual register)
    Temp(TempId),
    /// Typed constant
    Const(ConstValue),
    /// Global symbol reference
    Global(String),
    /// Function reference
    Function(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Temp(id) => write!(f, "%{}", id),
            Value::Const(c) => write!(f, "{}", c),
            Value::Global(name) => write!(f, "@{}", name),
            Value::Function(name) => write!(f, "@{}", name),
        }
    }
}

/// Native binary opcodes, the image of (operator, type) instruction selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    SDiv,
    SRem,
    FAdd,
    FSub,
    FMul,
    FDiv,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op_str = match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::SDiv => "sdiv",
            BinOp::SRem => "srem",
            BinOp::FAdd => "fadd",
            BinOp::FSub => "fsub",
            BinOp::FMul => "fmul",
            BinOp::FDiv => "fdiv",
        };
        write!(f, "{}", op_str)
    }
}

/// Native comparison predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpPred {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for CmpPred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op_str = match self {
            CmpPred::Eq => "eq",
            CmpPred::Ne => "ne",
            CmpPred::Lt => "lt",
            CmpPred::Le => "le",
            CmpPred::Gt => "gt",
            CmpPred::Ge => "ge",
        };
        write!(f, "{}", op_str)
    }
}

/// IR instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    /// Binary operation: result = op lhs, rhs
    Binary {
        result: TempId,
        op: BinOp,
        lhs: Value,
        rhs: Value,
        result_type: IrType,
    },

    /// Comparison: result = (i1) lhs pred rhs
    Cmp {
        result: TempId,
        pred: CmpPred,
        float: bool,
        lhs: Value,
        rhs: Value,
    },

    /// Type conversion: result = cast value from -> to
    Cast {
        result: TempId,
        value: Value,
        from: IrType,
        to: IrType,
    },

    /// Load from memory: result = load ptr
    Load {
        result: TempId,
        ptr: Value,
        result_type: IrType,
    },

    /// Store to memory: store value, ptr
    Store { value: Value, ptr: Value },

    /// Address arithmetic: result = &ptr[offset], scaled by element size
    GetElementPtr {
        result: TempId,
        ptr: Value,
        offset: Value,
        elem_type: IrType,
    },

    /// Allocate `count` elements of addressable stack storage
    Alloca {
        result: TempId,
        alloc_type: IrType,
        count: u64,
    },

    /// Function call: result = call callee(args...)
    Call {
        result: Option<TempId>,
        callee: String,
        args: Vec<Value>,
        result_type: IrType,
    },

    /// Control-flow join: result = phi [val, pred-block], ...
    Phi {
        result: TempId,
        incoming: Vec<(Value, BlockId)>,
        result_type: IrType,
    },

    /// Return: ret value or ret void
    Return(Option<Value>),

    /// Unconditional branch
    Branch(BlockId),

    /// Conditional branch on an i1 value
    BranchCond {
        cond: Value,
        then_block: BlockId,
        else_block: BlockId,
    },
}

impl Instruction {
    /// The temporary this instruction defines, if any
    pub fn result(&self) -> Option<TempId> {
        match self {
            Instruction::Binary { result, .. }
            | Instruction::Cmp { result, .. }
            | Instruction::Cast { result, .. }
            | Instruction::Load { result, .. }
            | Instruction::GetElementPtr { result, .. }
            | Instruction::Alloca { result, .. }
            | Instruction::Phi { result, .. } => Some(*result),
            Instruction::Call { result, .. } => *result,
            Instruction::Store { .. }
            | Instruction::Return(_)
            | Instruction::Branch(_)
            | Instruction::BranchCond { .. } => None,
        }
    }

    /// Check if this instruction transfers control out of its block
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instruction::Return(_) | Instruction::Branch(_) | Instruction::BranchCond { .. }
        )
    }

    /// The operand values this instruction reads
    pub fn operands(&self) -> Vec<&Value> {
        match self {
            Instruction::Binary { lhs, rhs, .. } | Instruction::Cmp { lhs, rhs, .. } => {
                vec![lhs, rhs]
            }
            Instruction::Cast { value, .. } => vec![value],
            Instruction::Load { ptr, .. } => vec![ptr],
            Instruction::Store { value, ptr } => vec![value, ptr],
            Instruction::GetElementPtr { ptr, offset, .. } => vec![ptr, offset],
            Instruction::Alloca { .. } => vec![],
            Instruction::Call { args, .. } => args.iter().collect(),
            Instruction::Phi { incoming, .. } => incoming.iter().map(|(v, _)| v).collect(),
            Instruction::Return(Some(value)) => vec![value],
            Instruction::Return(None) | Instruction::Branch(_) => vec![],
            Instruction::BranchCond { cond, .. } => vec![cond],
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Binary {
                result,
                op,
                lhs,
                rhs,
                result_type,
            } => write!(f, "%{} = {} {} {}, {}", result, op, result_type, lhs, rhs),
            Instruction::Cmp {
                result,
                pred,
                float,
                lhs,
                rhs,
            } => {
                let flavor = if *float { "fcmp" } else { "icmp" };
                write!(f, "%{} = {} {} {}, {}", result, flavor, pred, lhs, rhs)
            }
            Instruction::Cast {
                result,
                value,
                from,
                to,
            } => write!(f, "%{} = cast {} {} to {}", result, from, value, to),
            Instruction::Load {
                result,
                ptr,
                result_type,
            } => write!(f, "%{} = load {}, {}", result, result_type, ptr),
            Instruction::Store { value, ptr } => write!(f, "store {}, {}", value, ptr),
            Instruction::GetElementPtr {
                result,
                ptr,
                offset,
                elem_type,
            } => write!(
                f,
                "%{} = getelementptr {}, {}, {}",
                result, elem_type, ptr, offset
            ),
            Instruction::Alloca {
                result,
                alloc_type,
                count,
            } => {
                write!(f, "%{} = alloca {}", result, alloc_type)?;
                if *count != 1 {
                    write!(f, ", {}", count)?;
                }
                Ok(())
            }
            Instruction::Call {
                result,
                callee,
                args,
                ..
            } => {
                if let Some(result) = result {
                    write!(f, "%{} = ", result)?;
                }
                write!(f, "call @{}(", callee)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Instruction::Phi {
                result,
                incoming,
                result_type,
            } => {
                write!(f, "%{} = phi {} ", result, result_type)?;
                for (i, (value, label)) in incoming.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "[{}, bb{}]", value, label)?;
                }
                Ok(())
            }
            Instruction::Return(Some(value)) => write!(f, "ret {}", value),
            Instruction::Return(None) => write!(f, "ret void"),
            Instruction::Branch(label) => write!(f, "br bb{}", label),
            Instruction::BranchCond {
                cond,
                then_block,
                else_block,
            } => write!(f, "br {}, bb{}, bb{}", cond, then_block, else_block),
        }
    }
}

/// Basic block: a straight-line instruction sequence ending in one terminator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub id: BlockId,
    pub label: String,
    pub instructions: Vec<Instruction>,
}

impl BasicBlock {
    pub fn new(id: BlockId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            instructions: Vec::new(),
        }
    }

    pub fn add_instruction(&mut self, instr: Instruction) {
        self.instructions.push(instr);
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn has_terminator(&self) -> bool {
        self.instructions
            .last()
            .is_some_and(|instr| instr.is_terminator())
    }

    /// The block's terminator, if the last instruction is one
    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.last().filter(|i| i.is_terminator())
    }

    /// Block ids this block transfers control to
    pub fn successors(&self) -> Vec<BlockId> {
        match self.terminator() {
            Some(Instruction::Branch(target)) => vec![*target],
            Some(Instruction::BranchCond {
                then_block,
                else_block,
                ..
            }) => vec![*then_block, *else_block],
            _ => vec![],
        }
    }
}

/// Function parameter: a pre-assigned temporary with a name and type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub temp: TempId,
    pub name: String,
    pub ty: IrType,
}

/// Linkage of global symbols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Linkage {
    /// Visible to other modules
    External,
    /// Only visible within this module
    Internal,
}

/// Function: an ordered block arena plus a typed signature
///
/// Parameters occupy the first temporary ids. `temp_types` records the type
/// of every temporary ever created in the function, indexed by id;
/// `temp_names` carries optional debug names for named locals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub return_type: IrType,
    pub params: Vec<Parameter>,
    pub blocks: Vec<BasicBlock>,
    pub linkage: Linkage,
    /// Declaration without a body
    pub is_external: bool,
    pub is_vararg: bool,
    pub temp_types: Vec<IrType>,
    pub temp_names: HashMap<TempId, String>,
    next_block_id: BlockId,
}

impl Function {
    pub fn new(name: impl Into<String>, return_type: IrType, linkage: Linkage) -> Self {
        Self {
            name: name.into(),
            return_type,
            params: Vec::new(),
            blocks: Vec::new(),
            linkage,
            is_external: false,
            is_vararg: false,
            temp_types: Vec::new(),
            temp_names: HashMap::new(),
            next_block_id: 0,
        }
    }

    /// Append a parameter, assigning it the next temporary id
    pub fn add_parameter(&mut self, name: impl Into<String>, ty: IrType) -> TempId {
        let temp = self.new_temp(ty.clone());
        self.params.push(Parameter {
            temp,
            name: name.into(),
            ty,
        });
        temp
    }

    /// Create a fresh temporary of the given type
    pub fn new_temp(&mut self, ty: IrType) -> TempId {
        let id = self.temp_types.len() as TempId;
        self.temp_types.push(ty);
        id
    }

    /// The type of a temporary, if it exists
    pub fn temp_type(&self, id: TempId) -> Option<&IrType> {
        self.temp_types.get(id as usize)
    }

    /// Record a debug name for a temporary; a name already in use is
    /// uniquified with a suffix, never rejected. Returns the name stored.
    pub fn name_temp(&mut self, id: TempId, name: &str) -> String {
        let unique = self.fresh_temp_name(name);
        self.temp_names.insert(id, unique.clone());
        unique
    }

    /// The debug name of a temporary, if one was recorded
    pub fn temp_name(&self, id: TempId) -> Option<&str> {
        self.temp_names.get(&id).map(String::as_str)
    }

    /// Pick a debug name not used by any existing temporary
    fn fresh_temp_name(&self, name: &str) -> String {
        if !self.temp_names.values().any(|n| n == name) {
            return name.to_string();
        }
        let mut n = 1;
        loop {
            let candidate = format!("{}.{}", name, n);
            if !self.temp_names.values().any(|n| *n == candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Append a new block with a fresh id; the label is uniquified on collision
    pub fn add_block(&mut self, label: &str) -> BlockId {
        let id = self.next_block_id;
        self.next_block_id += 1;
        let label = self.fresh_label(label);
        self.blocks.push(BasicBlock::new(id, label));
        id
    }

    /// Insert a new block immediately after `prev` in layout order
    pub fn add_block_after(&mut self, prev: BlockId, label: &str) -> Option<BlockId> {
        let pos = self.blocks.iter().position(|b| b.id == prev)?;
        let id = self.next_block_id;
        self.next_block_id += 1;
        let label = self.fresh_label(label);
        self.blocks.insert(pos + 1, BasicBlock::new(id, label));
        Some(id)
    }

    /// Pick a label not used by any existing block
    fn fresh_label(&self, label: &str) -> String {
        if !self.blocks.iter().any(|b| b.label == label) {
            return label.to_string();
        }
        let mut n = 1;
        loop {
            let candidate = format!("{}.{}", label, n);
            if !self.blocks.iter().any(|b| b.label == candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    pub fn get_block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn get_block_mut(&mut self, id: BlockId) -> Option<&mut BasicBlock> {
        self.blocks.iter_mut().find(|b| b.id == id)
    }

    pub fn entry_block(&self) -> Option<&BasicBlock> {
        self.blocks.first()
    }

    pub fn entry_block_mut(&mut self) -> Option<&mut BasicBlock> {
        self.blocks.first_mut()
    }

    /// Predecessor block ids of every block, keyed by block id
    pub fn predecessors(&self) -> HashMap<BlockId, Vec<BlockId>> {
        let mut preds: HashMap<BlockId, Vec<BlockId>> = self
            .blocks
            .iter()
            .map(|b| (b.id, Vec::new()))
            .collect();
        for block in &self.blocks {
            for succ in block.successors() {
                if let Some(list) = preds.get_mut(&succ) {
                    if !list.contains(&block.id) {
                        list.push(block.id);
                    }
                }
            }
        }
        preds
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = if self.is_external { "declare" } else { "define" };
        write!(f, "{} {} @{}(", keyword, self.return_type, self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} %{}", param.ty, param.temp)?;
        }
        if self.is_vararg {
            if !self.params.is_empty() {
                write!(f, ", ")?;
            }
            write!(f, "...")?;
        }
        write!(f, ")")?;
        if self.is_external {
            return Ok(());
        }
        writeln!(f, " {{")?;
        for block in &self.blocks {
            writeln!(f, "{}:", block.label)?;
            for instr in &block.instructions {
                writeln!(f, "  {}", instr)?;
            }
        }
        write!(f, "}}")
    }
}

/// Initial contents of a global variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GlobalInit {
    /// Zero-filled
    Zero,
    /// NUL-terminated character data
    Str(String),
    /// Constant double array
    DoubleArray(Vec<f64>),
}

/// Global variable definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalVariable {
    pub name: String,
    pub var_type: IrType,
    pub is_constant: bool,
    pub init: GlobalInit,
    pub linkage: Linkage,
}

impl GlobalVariable {
    /// The type a reference to this global carries: a pointer to the
    /// element type for arrays, a pointer to the variable type otherwise
    pub fn reference_type(&self) -> IrType {
        match &self.var_type {
            IrType::Array { element_type, .. } => IrType::Ptr(element_type.clone()),
            other => IrType::Ptr(Box::new(other.clone())),
        }
    }
}

/// IR module: the top-level unit owning all functions and globals of one
/// compilation, consumed wholesale by the downstream backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub functions: Vec<Function>,
    pub globals: Vec<GlobalVariable>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
            globals: Vec::new(),
        }
    }

    pub fn add_function(&mut self, function: Function) {
        self.functions.push(function);
    }

    pub fn add_global(&mut self, global: GlobalVariable) {
        self.globals.push(global);
    }

    pub fn get_function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn get_function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    pub fn get_global(&self, name: &str) -> Option<&GlobalVariable> {
        self.globals.iter().find(|g| g.name == name)
    }

    /// The type a reference to a named symbol carries, if it resolves
    pub fn global_reference_type(&self, name: &str) -> Option<IrType> {
        self.get_global(name).map(|g| g.reference_type())
    }

    /// Resolve the type of a value in the context of one function
    ///
    /// A temporary without a recorded type indicates emitter corruption; an
    /// unresolved global or a bare function reference is bad caller input.
    pub fn value_type(&self, function: &Function, value: &Value) -> EmitResult<IrType> {
        match value {
            Value::Temp(id) => function.temp_type(*id).cloned().ok_or_else(|| {
                EmitError::Internal(format!("temp %{} has no recorded type", id))
            }),
            Value::Const(c) => Ok(c.ty()),
            Value::Global(name) => self.global_reference_type(name).ok_or_else(|| {
                EmitError::type_error(format!("unknown global @{}", name))
            }),
            Value::Function(name) => Err(EmitError::type_error(format!(
                "function reference @{} has no first-class type",
                name
            ))),
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; module {}", self.name)?;
        for global in &self.globals {
            write!(f, "@{} = ", global.name)?;
            match &global.init {
                GlobalInit::Zero => writeln!(f, "{} zeroinitializer", global.var_type)?,
                GlobalInit::Str(s) => writeln!(f, "{} c{:?}", global.var_type, s)?,
                GlobalInit::DoubleArray(values) => {
                    writeln!(f, "{} {:?}", global.var_type, values)?
                }
            }
        }
        for function in &self.functions {
            writeln!(f, "{}", function)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_type_mapping() {
        assert_eq!(IrType::from_value_type(&ValueType::Int32), IrType::I32);
        assert_eq!(IrType::from_value_type(&ValueType::Double), IrType::F64);
        assert_eq!(
            IrType::from_value_type(&ValueType::Double.ptr_to()),
            IrType::F64.ptr_to()
        );
        assert_eq!(IrType::from_value_type(&ValueType::Char8), IrType::I8);
    }

    #[test]
    fn test_type_sizes() {
        assert_eq!(IrType::I8.size_in_bytes(), Some(1));
        assert_eq!(IrType::F64.size_in_bytes(), Some(8));
        assert_eq!(IrType::I32.ptr_to().size_in_bytes(), Some(4));
        let array = IrType::Array {
            size: 10,
            element_type: Box::new(IrType::I16),
        };
        assert_eq!(array.size_in_bytes(), Some(20));
        assert_eq!(IrType::Void.size_in_bytes(), None);
    }

    #[test]
    fn test_native_promotion() {
        assert_eq!(promote(&IrType::I8, &IrType::I32).unwrap(), IrType::I32);
        assert_eq!(promote(&IrType::I64, &IrType::F64).unwrap(), IrType::F64);
        assert!(promote(&IrType::I32.ptr_to(), &IrType::I32).is_err());
        assert!(promote(&IrType::Void, &IrType::F64).is_err());
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Temp(5).to_string(), "%5");
        assert_eq!(Value::Const(ConstValue::Int32(42)).to_string(), "42");
        assert_eq!(Value::Global("fmt".to_string()).to_string(), "@fmt");
    }

    #[test]
    fn test_block_terminator() {
        let mut block = BasicBlock::new(0, "entry");
        assert!(block.is_empty());
        assert!(!block.has_terminator());

        block.add_instruction(Instruction::Store {
            value: Value::Const(ConstValue::Int32(1)),
            ptr: Value::Temp(0),
        });
        assert!(!block.has_terminator());

        block.add_instruction(Instruction::Return(Some(Value::Const(ConstValue::Int32(
            0,
        )))));
        assert!(block.has_terminator());
        assert!(block.terminator().is_some());
    }

    #[test]
    fn test_block_successors() {
        let mut block = BasicBlock::new(0, "entry");
        block.add_instruction(Instruction::BranchCond {
            cond: Value::Temp(0),
            then_block: 1,
            else_block: 2,
        });
        assert_eq!(block.successors(), vec![1, 2]);
    }

    #[test]
    fn test_function_labels_uniquified() {
        let mut function = Function::new("f", IrType::Void, Linkage::Internal);
        let b0 = function.add_block("body");
        let b1 = function.add_block("body");
        let b2 = function.add_block("body");
        assert_eq!(function.get_block(b0).unwrap().label, "body");
        assert_eq!(function.get_block(b1).unwrap().label, "body.1");
        assert_eq!(function.get_block(b2).unwrap().label, "body.2");
    }

    #[test]
    fn test_function_block_after() {
        let mut function = Function::new("f", IrType::Void, Linkage::Internal);
        let entry = function.add_block("entry");
        let exit = function.add_block("exit");
        let mid = function.add_block_after(entry, "mid").unwrap();

        let order: Vec<BlockId> = function.blocks.iter().map(|b| b.id).collect();
        assert_eq!(order, vec![entry, mid, exit]);
    }

    #[test]
    fn test_function_params_are_temps() {
        let mut function = Function::new("f", IrType::I32, Linkage::External);
        let a = function.add_parameter("a", IrType::I32);
        let b = function.add_parameter("b", IrType::F64);
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(function.temp_type(0), Some(&IrType::I32));
        assert_eq!(function.temp_type(1), Some(&IrType::F64));

        let t = function.new_temp(IrType::I1);
        assert_eq!(t, 2);
    }

    #[test]
    fn test_predecessors() {
        let mut function = Function::new("f", IrType::Void, Linkage::Internal);
        let entry = function.add_block("entry");
        let a = function.add_block("a");
        let b = function.add_block("b");
        let merge = function.add_block("merge");

        function
            .get_block_mut(entry)
            .unwrap()
            .add_instruction(Instruction::BranchCond {
                cond: Value::Const(ConstValue::Int32(1)),
                then_block: a,
                else_block: b,
            });
        function
            .get_block_mut(a)
            .unwrap()
            .add_instruction(Instruction::Branch(merge));
        function
            .get_block_mut(b)
            .unwrap()
            .add_instruction(Instruction::Branch(merge));

        let preds = function.predecessors();
        assert_eq!(preds[&entry], Vec::<BlockId>::new());
        assert_eq!(preds[&a], vec![entry]);
        let mut merge_preds = preds[&merge].clone();
        merge_preds.sort_unstable();
        assert_eq!(merge_preds, vec![a, b]);
    }

    #[test]
    fn test_module_lookup() {
        let mut module = Module::new("predictor");
        module.add_function(Function::new("main", IrType::I32, Linkage::External));
        module.add_global(GlobalVariable {
            name: "weights".to_string(),
            var_type: IrType::Array {
                size: 4,
                element_type: Box::new(IrType::F64),
            },
            is_constant: true,
            init: GlobalInit::DoubleArray(vec![0.5, 1.5, 2.5, 3.5]),
            linkage: Linkage::Internal,
        });

        assert!(module.get_function("main").is_some());
        assert!(module.get_function("missing").is_none());
        assert_eq!(
            module.global_reference_type("weights"),
            Some(IrType::F64.ptr_to())
        );
    }

    #[test]
    fn test_temp_names_uniquified() {
        let mut function = Function::new("f", IrType::Void, Linkage::Internal);
        let t0 = function.new_temp(IrType::I32);
        let t1 = function.new_temp(IrType::I32);
        assert_eq!(function.name_temp(t0, "acc"), "acc");
        assert_eq!(function.name_temp(t1, "acc"), "acc.1");
        assert_eq!(function.temp_name(t0), Some("acc"));
        assert_eq!(function.temp_name(t1), Some("acc.1"));
    }

    #[test]
    fn test_value_type_flags_bad_operands() {
        let module = Module::new("predictor");
        let function = Function::new("f", IrType::Void, Linkage::Internal);

        // unresolved globals and bare function references are caller
        // mistakes, not emitter corruption
        let err = module
            .value_type(&function, &Value::Global("missing".to_string()))
            .unwrap_err();
        assert!(matches!(err, EmitError::TypeError { .. }));
        let err = module
            .value_type(&function, &Value::Function("f".to_string()))
            .unwrap_err();
        assert!(matches!(err, EmitError::TypeError { .. }));
    }
}
