//! Reference interpreter for emitted modules
//!
//! Executes IR directly so emitted code can be checked for behavior, not
//! just structure. Memory is a flat array of cells, one cell per scalar
//! element, which matches the element-scaled pointer arithmetic of
//! `GetElementPtr`: offsetting a pointer by one moves one cell whatever
//! the element type. The runtime primitives `malloc`, `free`, `print` and
//! `printf` are built in; `printf` output is captured in a buffer instead
//! of going to stdout.
//!
//! This is a test oracle, not a performance target.

use crate::ir::{BinOp, CmpPred, Function, GlobalInit, Instruction, IrType, Module, Value};
use emc_common::{BlockId, TempId};
use log::{debug, trace};
use std::collections::HashMap;
use thiserror::Error;

const DEFAULT_STEP_LIMIT: usize = 1_000_000;
const CALL_DEPTH_LIMIT: usize = 128;

/// Runtime value of one cell or temporary
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RtVal {
    Int(i64),
    Double(f64),
    /// Cell index into interpreter memory
    Ptr(usize),
}

impl RtVal {
    fn as_int(&self) -> Result<i64, InterpError> {
        match self {
            RtVal::Int(v) => Ok(*v),
            other => Err(InterpError::TypeMismatch(format!(
                "expected integer, got {:?}",
                other
            ))),
        }
    }

    fn as_double(&self) -> Result<f64, InterpError> {
        match self {
            RtVal::Double(v) => Ok(*v),
            other => Err(InterpError::TypeMismatch(format!(
                "expected double, got {:?}",
                other
            ))),
        }
    }

    fn as_ptr(&self) -> Result<usize, InterpError> {
        match self {
            RtVal::Ptr(v) => Ok(*v),
            other => Err(InterpError::TypeMismatch(format!(
                "expected pointer, got {:?}",
                other
            ))),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum InterpError {
    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    #[error("unknown global `{0}`")]
    UnknownGlobal(String),

    #[error("call to external function `{0}` with no built-in")]
    ExternalFunction(String),

    #[error("function `{function}` expects {expected} arguments, got {actual}")]
    ArityMismatch {
        function: String,
        expected: usize,
        actual: usize,
    },

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("address {0} is out of bounds")]
    OutOfBounds(usize),

    #[error("pointer offset produced a negative address")]
    NegativeAddress,

    #[error("read of uninitialized memory at address {0}")]
    Uninitialized(usize),

    #[error("integer division by zero")]
    DivideByZero,

    #[error("block bb{0} does not exist")]
    MissingBlock(BlockId),

    #[error("phi in bb{0} has no incoming edge for the executed predecessor")]
    PhiMismatch(BlockId),

    #[error("step limit exceeded")]
    StepLimit,

    #[error("call depth limit exceeded")]
    CallDepth,

    #[error("malformed function `{0}`: {1}")]
    Malformed(String, String),
}

/// One activation: the values of the function's temporaries
struct Frame {
    temps: Vec<Option<RtVal>>,
}

impl Frame {
    fn get(&self, id: u32) -> Result<RtVal, InterpError> {
        self.temps
            .get(id as usize)
            .copied()
            .flatten()
            .ok_or_else(|| InterpError::TypeMismatch(format!("temp %{} has no value", id)))
    }

    fn set(&mut self, id: u32, value: RtVal) {
        self.temps[id as usize] = Some(value);
    }
}

/// Direct executor over a finished module
pub struct Interpreter<'m> {
    module: &'m Module,
    memory: Vec<Option<RtVal>>,
    globals: HashMap<String, usize>,
    output: String,
    steps_left: usize,
}

impl<'m> Interpreter<'m> {
    /// Build an interpreter and lay out the module's globals
    pub fn new(module: &'m Module) -> Self {
        Self::with_step_limit(module, DEFAULT_STEP_LIMIT)
    }

    /// Build an interpreter that aborts after `limit` executed instructions
    pub fn with_step_limit(module: &'m Module, limit: usize) -> Self {
        let mut interp = Self {
            module,
            memory: Vec::new(),
            globals: HashMap::new(),
            output: String::new(),
            steps_left: limit,
        };
        for global in &module.globals {
            let base = interp.memory.len();
            match &global.init {
                GlobalInit::Str(content) => {
                    for byte in content.bytes() {
                        interp.memory.push(Some(RtVal::Int(byte as i64)));
                    }
                    interp.memory.push(Some(RtVal::Int(0)));
                }
                GlobalInit::DoubleArray(values) => {
                    for v in values {
                        interp.memory.push(Some(RtVal::Double(*v)));
                    }
                }
                GlobalInit::Zero => {
                    let (count, elem) = match &global.var_type {
                        IrType::Array { size, element_type } => (*size, (**element_type).clone()),
                        other => (1, other.clone()),
                    };
                    let zero = if elem.is_float() {
                        RtVal::Double(0.0)
                    } else {
                        RtVal::Int(0)
                    };
                    for _ in 0..count {
                        interp.memory.push(Some(zero));
                    }
                }
            }
            interp.globals.insert(global.name.clone(), base);
        }
        debug!(
            "interpreter over `{}`: {} globals, {} cells",
            module.name,
            interp.globals.len(),
            interp.memory.len()
        );
        interp
    }

    /// Call a function by name and return its result
    pub fn run(&mut self, name: &str, args: &[RtVal]) -> Result<Option<RtVal>, InterpError> {
        self.call(name, args, 0)
    }

    /// Everything written through `print`/`printf` so far
    pub fn output(&self) -> &str {
        &self.output
    }

    fn call(
        &mut self,
        name: &str,
        args: &[RtVal],
        depth: usize,
    ) -> Result<Option<RtVal>, InterpError> {
        if depth >= CALL_DEPTH_LIMIT {
            return Err(InterpError::CallDepth);
        }
        // detach the function borrow from `self` so execution can mutate
        // memory and output while walking it
        let module: &'m Module = self.module;
        let function = module
            .get_function(name)
            .ok_or_else(|| InterpError::UnknownFunction(name.to_string()))?;
        if function.is_external {
            return self.builtin(name, args);
        }
        if args.len() != function.params.len() {
            return Err(InterpError::ArityMismatch {
                function: name.to_string(),
                expected: function.params.len(),
                actual: args.len(),
            });
        }
        trace!("enter @{} (depth {})", name, depth);
        self.exec(function, args, depth)
    }

    fn exec(
        &mut self,
        function: &Function,
        args: &[RtVal],
        depth: usize,
    ) -> Result<Option<RtVal>, InterpError> {
        let mut frame = Frame {
            temps: vec![None; function.temp_types.len()],
        };
        for (param, arg) in function.params.iter().zip(args) {
            frame.set(param.temp, *arg);
        }

        let mut current = function
            .entry_block()
            .ok_or_else(|| {
                InterpError::Malformed(function.name.clone(), "no entry block".to_string())
            })?
            .id;
        let mut previous: Option<BlockId> = None;

        'blocks: loop {
            let block = function
                .get_block(current)
                .ok_or(InterpError::MissingBlock(current))?;

            // The leading phis form one parallel assignment: every incoming
            // value is read against the frame as it stood on the edge, then
            // all results are written together.
            let mut staged: Vec<(TempId, RtVal)> = Vec::new();
            for instr in &block.instructions {
                let Instruction::Phi {
                    result, incoming, ..
                } = instr
                else {
                    break;
                };
                if self.steps_left == 0 {
                    return Err(InterpError::StepLimit);
                }
                self.steps_left -= 1;
                let pred = previous.ok_or(InterpError::PhiMismatch(current))?;
                let (value, _) = incoming
                    .iter()
                    .find(|(_, from)| *from == pred)
                    .ok_or(InterpError::PhiMismatch(current))?;
                staged.push((*result, self.eval(&frame, value)?));
            }
            let phi_count = staged.len();
            for (result, value) in staged {
                frame.set(result, value);
            }

            for instr in &block.instructions[phi_count..] {
                if self.steps_left == 0 {
                    return Err(InterpError::StepLimit);
                }
                self.steps_left -= 1;

                match instr {
                    Instruction::Binary {
                        result,
                        op,
                        lhs,
                        rhs,
                        result_type,
                    } => {
                        let l = self.eval(&frame, lhs)?;
                        let r = self.eval(&frame, rhs)?;
                        frame.set(*result, apply_binop(*op, l, r, result_type)?);
                    }
                    Instruction::Cmp {
                        result,
                        pred,
                        float,
                        lhs,
                        rhs,
                    } => {
                        let l = self.eval(&frame, lhs)?;
                        let r = self.eval(&frame, rhs)?;
                        let hold = if *float {
                            apply_fcmp(*pred, l.as_double()?, r.as_double()?)
                        } else {
                            apply_icmp(*pred, l.as_int()?, r.as_int()?)
                        };
                        frame.set(*result, RtVal::Int(hold as i64));
                    }
                    Instruction::Cast {
                        result, value, to, ..
                    } => {
                        let v = self.eval(&frame, value)?;
                        frame.set(*result, apply_cast(v, to)?);
                    }
                    Instruction::Load { result, ptr, .. } => {
                        let addr = self.eval(&frame, ptr)?.as_ptr()?;
                        frame.set(*result, self.read(addr)?);
                    }
                    Instruction::Store { value, ptr } => {
                        let v = self.eval(&frame, value)?;
                        let addr = self.eval(&frame, ptr)?.as_ptr()?;
                        self.write(addr, v)?;
                    }
                    Instruction::GetElementPtr {
                        result, ptr, offset, ..
                    } => {
                        let base = self.eval(&frame, ptr)?.as_ptr()?;
                        let off = self.eval(&frame, offset)?.as_int()?;
                        let addr = base as i64 + off;
                        if addr < 0 {
                            return Err(InterpError::NegativeAddress);
                        }
                        frame.set(*result, RtVal::Ptr(addr as usize));
                    }
                    Instruction::Alloca { result, count, .. } => {
                        let base = self.memory.len();
                        self.memory
                            .extend(std::iter::repeat(None).take(*count as usize));
                        frame.set(*result, RtVal::Ptr(base));
                    }
                    Instruction::Call {
                        result,
                        callee,
                        args,
                        ..
                    } => {
                        let mut values = Vec::with_capacity(args.len());
                        for arg in args {
                            values.push(self.eval(&frame, arg)?);
                        }
                        let returned = self.call(callee, &values, depth + 1)?;
                        if let Some(result) = result {
                            let value = returned.ok_or_else(|| {
                                InterpError::TypeMismatch(format!(
                                    "call to @{} produced no value",
                                    callee
                                ))
                            })?;
                            frame.set(*result, value);
                        }
                    }
                    Instruction::Phi { .. } => {
                        return Err(InterpError::Malformed(
                            function.name.clone(),
                            format!("phi in bb{} does not lead its block", current),
                        ));
                    }
                    Instruction::Return(value) => {
                        let result = match value {
                            Some(v) => Some(self.eval(&frame, v)?),
                            None => None,
                        };
                        trace!("leave @{}", function.name);
                        return Ok(result);
                    }
                    Instruction::Branch(dest) => {
                        previous = Some(current);
                        current = *dest;
                        continue 'blocks;
                    }
                    Instruction::BranchCond {
                        cond,
                        then_block,
                        else_block,
                    } => {
                        let taken = self.eval(&frame, cond)?.as_int()? != 0;
                        previous = Some(current);
                        current = if taken { *then_block } else { *else_block };
                        continue 'blocks;
                    }
                }
            }
            // block structure is checked by the verifier; a fall-off here
            // means the caller skipped it
            return Err(InterpError::Malformed(
                function.name.clone(),
                format!("bb{} falls off the end", current),
            ));
        }
    }

    fn eval(&self, frame: &Frame, value: &Value) -> Result<RtVal, InterpError> {
        match value {
            Value::Temp(id) => frame.get(*id),
            Value::Const(c) => Ok(match c.as_i64() {
                Some(v) => RtVal::Int(v),
                None => match c {
                    crate::ir::ConstValue::Double(d) => RtVal::Double(*d),
                    _ => unreachable!("non-double constant without integer value"),
                },
            }),
            Value::Global(name) => self
                .globals
                .get(name)
                .map(|base| RtVal::Ptr(*base))
                .ok_or_else(|| InterpError::UnknownGlobal(name.clone())),
            Value::Function(name) => Err(InterpError::TypeMismatch(format!(
                "function reference @{} is not a first-class value",
                name
            ))),
        }
    }

    fn read(&self, addr: usize) -> Result<RtVal, InterpError> {
        self.memory
            .get(addr)
            .ok_or(InterpError::OutOfBounds(addr))?
            .ok_or(InterpError::Uninitialized(addr))
    }

    fn write(&mut self, addr: usize, value: RtVal) -> Result<(), InterpError> {
        let cell = self
            .memory
            .get_mut(addr)
            .ok_or(InterpError::OutOfBounds(addr))?;
        *cell = Some(value);
        Ok(())
    }

    /// The runtime primitives the generated code links against
    fn builtin(&mut self, name: &str, args: &[RtVal]) -> Result<Option<RtVal>, InterpError> {
        match name {
            // One cell per requested byte over-provisions for multi-byte
            // elements, which is harmless under element-scaled addressing
            "malloc" => {
                let bytes = args
                    .first()
                    .ok_or_else(|| InterpError::ArityMismatch {
                        function: name.to_string(),
                        expected: 1,
                        actual: 0,
                    })?
                    .as_int()?;
                let base = self.memory.len();
                self.memory
                    .extend(std::iter::repeat(None).take(bytes.max(0) as usize));
                Ok(Some(RtVal::Ptr(base)))
            }
            "free" => Ok(None),
            "print" => {
                let addr = args
                    .first()
                    .ok_or_else(|| InterpError::ArityMismatch {
                        function: name.to_string(),
                        expected: 1,
                        actual: 0,
                    })?
                    .as_ptr()?;
                let text = self.read_c_string(addr)?;
                self.output.push_str(&text);
                Ok(None)
            }
            "printf" => {
                let addr = args
                    .first()
                    .ok_or_else(|| InterpError::ArityMismatch {
                        function: name.to_string(),
                        expected: 1,
                        actual: 0,
                    })?
                    .as_ptr()?;
                let format = self.read_c_string(addr)?;
                let rendered = self.render_format(&format, &args[1..])?;
                self.output.push_str(&rendered);
                Ok(Some(RtVal::Int(rendered.len() as i64)))
            }
            other => Err(InterpError::ExternalFunction(other.to_string())),
        }
    }

    fn read_c_string(&self, addr: usize) -> Result<String, InterpError> {
        let mut text = String::new();
        let mut at = addr;
        loop {
            let byte = self.read(at)?.as_int()?;
            if byte == 0 {
                return Ok(text);
            }
            text.push(byte as u8 as char);
            at += 1;
        }
    }

    /// Minimal printf rendering: %d, %f, %s and %% are understood
    fn render_format(&self, format: &str, args: &[RtVal]) -> Result<String, InterpError> {
        let mut out = String::new();
        let mut next_arg = args.iter();
        let mut chars = format.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            let spec = chars.next().ok_or_else(|| {
                InterpError::TypeMismatch("format string ends in `%`".to_string())
            })?;
            match spec {
                '%' => out.push('%'),
                'd' => {
                    let arg = next_arg.next().ok_or_else(|| {
                        InterpError::TypeMismatch("missing argument for %d".to_string())
                    })?;
                    out.push_str(&arg.as_int()?.to_string());
                }
                'f' => {
                    let arg = next_arg.next().ok_or_else(|| {
                        InterpError::TypeMismatch("missing argument for %f".to_string())
                    })?;
                    out.push_str(&format!("{:.6}", arg.as_double()?));
                }
                's' => {
                    let arg = next_arg.next().ok_or_else(|| {
                        InterpError::TypeMismatch("missing argument for %s".to_string())
                    })?;
                    out.push_str(&self.read_c_string(arg.as_ptr()?)?);
                }
                other => {
                    return Err(InterpError::TypeMismatch(format!(
                        "unsupported format specifier %{}",
                        other
                    )))
                }
            }
        }
        Ok(out)
    }
}

/// Wrap an integer to the width of its result type
fn wrap_int(v: i64, ty: &IrType) -> i64 {
    match ty {
        IrType::I1 => v & 1,
        IrType::I8 => v as i8 as i64,
        IrType::I16 => v as i16 as i64,
        IrType::I32 => v as i32 as i64,
        _ => v,
    }
}

fn apply_binop(op: BinOp, l: RtVal, r: RtVal, ty: &IrType) -> Result<RtVal, InterpError> {
    let value = match op {
        BinOp::Add => RtVal::Int(wrap_int(l.as_int()?.wrapping_add(r.as_int()?), ty)),
        BinOp::Sub => RtVal::Int(wrap_int(l.as_int()?.wrapping_sub(r.as_int()?), ty)),
        BinOp::Mul => RtVal::Int(wrap_int(l.as_int()?.wrapping_mul(r.as_int()?), ty)),
        BinOp::SDiv => {
            let divisor = r.as_int()?;
            if divisor == 0 {
                return Err(InterpError::DivideByZero);
            }
            RtVal::Int(wrap_int(l.as_int()?.wrapping_div(divisor), ty))
        }
        BinOp::SRem => {
            let divisor = r.as_int()?;
            if divisor == 0 {
                return Err(InterpError::DivideByZero);
            }
            RtVal::Int(wrap_int(l.as_int()?.wrapping_rem(divisor), ty))
        }
        BinOp::FAdd => RtVal::Double(l.as_double()? + r.as_double()?),
        BinOp::FSub => RtVal::Double(l.as_double()? - r.as_double()?),
        BinOp::FMul => RtVal::Double(l.as_double()? * r.as_double()?),
        BinOp::FDiv => RtVal::Double(l.as_double()? / r.as_double()?),
    };
    Ok(value)
}

fn apply_icmp(pred: CmpPred, l: i64, r: i64) -> bool {
    match pred {
        CmpPred::Eq => l == r,
        CmpPred::Ne => l != r,
        CmpPred::Lt => l < r,
        CmpPred::Le => l <= r,
        CmpPred::Gt => l > r,
        CmpPred::Ge => l >= r,
    }
}

fn apply_fcmp(pred: CmpPred, l: f64, r: f64) -> bool {
    match pred {
        CmpPred::Eq => l == r,
        CmpPred::Ne => l != r,
        CmpPred::Lt => l < r,
        CmpPred::Le => l <= r,
        CmpPred::Gt => l > r,
        CmpPred::Ge => l >= r,
    }
}

fn apply_cast(v: RtVal, to: &IrType) -> Result<RtVal, InterpError> {
    let value = match (v, to) {
        (RtVal::Int(i), t) if t.is_integer() => RtVal::Int(wrap_int(i, t)),
        (RtVal::Int(i), IrType::F64) => RtVal::Double(i as f64),
        // truncation toward zero
        (RtVal::Double(d), t) if t.is_integer() => RtVal::Int(wrap_int(d as i64, t)),
        (RtVal::Double(d), IrType::F64) => RtVal::Double(d),
        (RtVal::Ptr(p), IrType::Ptr(_)) => RtVal::Ptr(p),
        (v, t) => {
            return Err(InterpError::TypeMismatch(format!(
                "cannot cast {:?} to {}",
                v, t
            )))
        }
    };
    Ok(value)
}
