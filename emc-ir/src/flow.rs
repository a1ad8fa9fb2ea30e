//! Structured control-flow emitters
//!
//! These builders own the block wiring for `for`-loops and `if/else`
//! regions so callers never juggle raw blocks. Each is a small state
//! machine; the function emitter is threaded through every call rather
//! than captured, so the caller keeps full use of it between the builder's
//! steps. Blocks live in the function's arena and are referenced by id,
//! so a conditionally unused block (an `if` with no else branch) is simply
//! never allocated.
//!
//! Out-of-order use of a builder (entering the body before the header,
//! ending twice) is a bug in the calling lowering code, not bad input, and
//! is guarded with assertions.

use crate::function::IRFunctionEmitter;
use crate::ir::{IrType, Value};
use emc_common::{BlockId, ComparisonType, EmitError, EmitResult, OperatorType, ValueType};
use log::trace;

/// If/else region builder
///
/// `begin` splits control at the current block and reserves the then and
/// merge blocks; the else block materializes only if `else_()` is called,
/// by retargeting the false edge. `end` wires every falling-through branch
/// into the merge block and parks the cursor there. A branch path that
/// already returned receives no auto-inserted edge.
#[derive(Debug)]
pub struct IRIfEmitter {
    state: IfState,
    cond_block: BlockId,
    then_block: BlockId,
    merge_block: BlockId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IfState {
    Begin,
    ThenEntered,
    ElseEntered,
    Ended,
}

impl IRIfEmitter {
    pub(crate) fn new() -> Self {
        Self {
            state: IfState::Begin,
            cond_block: 0,
            then_block: 0,
            merge_block: 0,
        }
    }

    /// Branch on a 1-bit condition; the cursor moves into the then block
    pub fn begin(&mut self, fe: &mut IRFunctionEmitter<'_>, cond: Value) -> EmitResult<()> {
        assert_eq!(self.state, IfState::Begin, "if-emitter already begun");
        self.cond_block = fe
            .current_block()
            .ok_or_else(|| EmitError::Internal("no insertion point set".to_string()))?;
        self.then_block = fe.block("if.then")?;
        self.merge_block = fe.block("if.end")?;
        // Until an else branch materializes, false falls through to merge
        fe.branch_cond(cond, self.then_block, self.merge_block)?;
        fe.set_current_block(self.then_block)?;
        self.state = IfState::ThenEntered;
        trace!(
            "if region: cond bb{} then bb{} merge bb{}",
            self.cond_block,
            self.then_block,
            self.merge_block
        );
        Ok(())
    }

    /// Compare and begin in one step
    pub fn begin_cmp(
        &mut self,
        fe: &mut IRFunctionEmitter<'_>,
        pred: ComparisonType,
        lhs: Value,
        rhs: Value,
    ) -> EmitResult<()> {
        let cond = fe.cmp(pred, lhs, rhs)?;
        self.begin(fe, cond)
    }

    /// Close the then path and move the cursor into a fresh else block
    pub fn else_(&mut self, fe: &mut IRFunctionEmitter<'_>) -> EmitResult<()> {
        assert_eq!(
            self.state,
            IfState::ThenEntered,
            "else requires an open then branch"
        );
        if !fe.current_block_terminated() {
            fe.branch(self.merge_block)?;
        }
        let else_block = fe.block("if.else")?;
        fe.retarget_false_edge(self.cond_block, else_block)?;
        fe.set_current_block(else_block)?;
        self.state = IfState::ElseEntered;
        Ok(())
    }

    /// Wire the open branch into the merge block and park the cursor there
    pub fn end(&mut self, fe: &mut IRFunctionEmitter<'_>) -> EmitResult<()> {
        assert!(
            matches!(self.state, IfState::ThenEntered | IfState::ElseEntered),
            "if-emitter is not inside a branch"
        );
        if !fe.current_block_terminated() {
            fe.branch(self.merge_block)?;
        }
        fe.set_current_block(self.merge_block)?;
        self.state = IfState::Ended;
        Ok(())
    }

    /// The block evaluating the condition
    pub fn cond_block(&self) -> BlockId {
        self.cond_block
    }

    /// The merge block, for joining values with a phi after `end`
    pub fn merge_block(&self) -> BlockId {
        self.merge_block
    }
}

/// Counted loop builder
///
/// `begin_range` allocates the induction slot and the header, body, and
/// exit blocks, and emits the predicate; `enter_body` moves the cursor into
/// the body; `end` emits the increment and back-edge and parks the cursor
/// in the exit block. The bounds are taken as given: a zero step or a
/// wrapping range loops exactly as those values dictate, with no implicit
/// guard.
#[derive(Debug)]
pub struct IRForLoopEmitter {
    state: LoopState,
    induction: Option<Value>,
    step: Option<Value>,
    header: BlockId,
    body: BlockId,
    exit: BlockId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Begin,
    HeaderEntered,
    BodyEntered,
    Ended,
}

impl IRForLoopEmitter {
    pub(crate) fn new() -> Self {
        Self {
            state: LoopState::Begin,
            induction: None,
            step: None,
            header: 0,
            body: 0,
            exit: 0,
        }
    }

    /// Loop `count` times with induction values 0..count
    pub fn begin(&mut self, fe: &mut IRFunctionEmitter<'_>, count: i32) -> EmitResult<()> {
        let start = fe.literal_i32(0);
        let end = fe.literal_i32(count);
        let step = fe.literal_i32(1);
        self.begin_range(fe, start, end, step)
    }

    /// Loop from `start` while the induction value is below `end`,
    /// advancing by `step` each iteration
    pub fn begin_range(
        &mut self,
        fe: &mut IRFunctionEmitter<'_>,
        start: Value,
        end: Value,
        step: Value,
    ) -> EmitResult<()> {
        assert_eq!(self.state, LoopState::Begin, "loop already begun");

        let vt = induction_value_type(fe, &start, &end, &step)?;
        let induction = fe.var(&vt)?;
        let start = fe.cast(start, &vt)?;
        let step = fe.cast(step, &vt)?;
        fe.store(induction.clone(), start)?;
        self.induction = Some(induction.clone());
        self.step = Some(step);

        self.header = fe.block("for.cond")?;
        self.body = fe.block("for.body")?;
        self.exit = fe.block("for.end")?;
        fe.branch(self.header)?;

        // Header: test the predicate and pick body or exit
        fe.set_current_block(self.header)?;
        self.state = LoopState::HeaderEntered;
        let current = fe.load(induction)?;
        fe.branch_cmp(ComparisonType::Lt, current, end, self.body, self.exit)?;
        trace!(
            "for region: header bb{} body bb{} exit bb{}",
            self.header,
            self.body,
            self.exit
        );
        Ok(())
    }

    /// Move the cursor into the loop body
    pub fn enter_body(&mut self, fe: &mut IRFunctionEmitter<'_>) -> EmitResult<()> {
        assert_eq!(
            self.state,
            LoopState::HeaderEntered,
            "loop body requires an emitted header"
        );
        fe.set_current_block(self.body)?;
        self.state = LoopState::BodyEntered;
        Ok(())
    }

    /// The current induction value, loaded fresh inside the body
    pub fn iteration_var(&mut self, fe: &mut IRFunctionEmitter<'_>) -> EmitResult<Value> {
        assert_eq!(
            self.state,
            LoopState::BodyEntered,
            "iteration variable is only available inside the body"
        );
        let induction = self.induction.clone().expect("loop begun");
        fe.load(induction)
    }

    /// Emit the increment and back-edge, and park the cursor in the exit
    /// block
    pub fn end(&mut self, fe: &mut IRFunctionEmitter<'_>) -> EmitResult<()> {
        assert_eq!(self.state, LoopState::BodyEntered, "loop body not entered");
        if !fe.current_block_terminated() {
            let induction = self.induction.clone().expect("loop begun");
            let step = self.step.clone().expect("loop begun");
            let current = fe.load(induction.clone())?;
            let next = fe.op(OperatorType::Add, current, step)?;
            fe.store(induction, next)?;
            fe.branch(self.header)?;
        }
        fe.set_current_block(self.exit)?;
        self.state = LoopState::Ended;
        Ok(())
    }

    /// The exit block the cursor lands in after `end`
    pub fn exit_block(&self) -> BlockId {
        self.exit
    }
}

/// The common integer type of the loop bounds
fn induction_value_type(
    fe: &mut IRFunctionEmitter<'_>,
    start: &Value,
    end: &Value,
    step: &Value,
) -> EmitResult<ValueType> {
    let mut ty = IrType::I8;
    for value in [start, end, step] {
        let vt = fe.emitter().value_type(value)?;
        if !vt.is_integer() {
            return Err(EmitError::type_mismatch(format!(
                "loop bound must be an integer, got {}",
                vt
            )));
        }
        ty = crate::ir::promote(&ty, &vt)?;
    }
    Ok(match ty {
        IrType::I1 | IrType::I8 => ValueType::Byte,
        IrType::I16 => ValueType::Int16,
        IrType::I32 => ValueType::Int32,
        IrType::I64 => ValueType::Int64,
        other => {
            return Err(EmitError::Internal(format!(
                "non-integer induction type {}",
                other
            )))
        }
    })
}
