//! Structural validation of emitted functions
//!
//! The emitter's per-instruction checks are local; this pass checks the
//! whole-function properties that only hold once emission is complete:
//! block termination, branch-target resolution, phi/predecessor agreement,
//! return typing, and definition-before-use across the control-flow graph.
//! Verification runs before a module is handed to the downstream backend;
//! the first violation found is reported.

use crate::ir::{Function, Instruction, IrType, Module, Value};
use emc_common::{BlockId, EmitError, EmitResult, TempId};
use log::debug;
use std::collections::{HashMap, HashSet};

/// Verify every defined function in a module
pub fn verify_module(module: &Module) -> EmitResult<()> {
    for function in &module.functions {
        if !function.is_external {
            verify_function(function)?;
        }
    }
    Ok(())
}

/// Verify the structure of one function body
///
/// Checks, in order: an entry block exists; every block is non-empty and
/// ends in its only terminator; branch targets resolve; phis lead their
/// block and agree with its predecessors; returns match the signature;
/// every block is reachable; and every temporary use is dominated by its
/// definition.
pub fn verify_function(function: &Function) -> EmitResult<()> {
    debug!(
        "verify @{}: {} blocks, {} temps",
        function.name,
        function.blocks.len(),
        function.temp_types.len()
    );
    let fail = |message: String| Err(EmitError::verification(function.name.as_str(), message));

    if function.entry_block().is_none() {
        return fail("function has no entry block".to_string());
    }

    for block in &function.blocks {
        if block.is_empty() {
            return fail(format!("block {} (bb{}) is empty", block.label, block.id));
        }
        if !block.has_terminator() {
            return fail(format!(
                "block {} (bb{}) does not end in a terminator",
                block.label, block.id
            ));
        }
        for instr in &block.instructions[..block.instructions.len() - 1] {
            if instr.is_terminator() {
                return fail(format!(
                    "block {} (bb{}) has a terminator before its last instruction",
                    block.label, block.id
                ));
            }
        }
        for succ in block.successors() {
            if function.get_block(succ).is_none() {
                return fail(format!(
                    "block {} (bb{}) branches to nonexistent bb{}",
                    block.label, block.id, succ
                ));
            }
        }
    }

    let preds = function.predecessors();
    for block in &function.blocks {
        let mut past_phis = false;
        for instr in &block.instructions {
            match instr {
                Instruction::Phi { result, incoming, .. } => {
                    if past_phis {
                        return fail(format!(
                            "phi %{} in bb{} does not lead its block",
                            result, block.id
                        ));
                    }
                    let mut incoming_preds: Vec<BlockId> =
                        incoming.iter().map(|(_, b)| *b).collect();
                    incoming_preds.sort_unstable();
                    incoming_preds.dedup();
                    let mut actual = preds[&block.id].clone();
                    actual.sort_unstable();
                    if incoming_preds != actual || incoming_preds.len() != incoming.len() {
                        return fail(format!(
                            "phi %{} in bb{} does not cover its predecessors exactly",
                            result, block.id
                        ));
                    }
                }
                _ => past_phis = true,
            }
        }
    }

    for block in &function.blocks {
        if let Some(Instruction::Return(value)) = block.terminator() {
            match (value, &function.return_type) {
                (None, IrType::Void) => {}
                (None, other) => {
                    return fail(format!(
                        "bb{} returns void from a function returning {}",
                        block.id, other
                    ));
                }
                (Some(_), IrType::Void) => {
                    return fail(format!(
                        "bb{} returns a value from a void function",
                        block.id
                    ));
                }
                (Some(value), expected) => {
                    if let Some(actual) = resolved_type(function, value) {
                        if actual != *expected {
                            return fail(format!(
                                "bb{} returns {} from a function returning {}",
                                block.id, actual, expected
                            ));
                        }
                    }
                }
            }
        }
    }

    let reachable = reachable_blocks(function);
    for block in &function.blocks {
        if !reachable.contains(&block.id) {
            return fail(format!(
                "block {} (bb{}) is unreachable from the entry block",
                block.label, block.id
            ));
        }
    }

    check_def_before_use(function, &preds, &reachable)
        .map_err(|message| EmitError::verification(function.name.as_str(), message))
}

/// The type of a value when it can be resolved without module context
fn resolved_type(function: &Function, value: &Value) -> Option<IrType> {
    match value {
        Value::Temp(id) => function.temp_type(*id).cloned(),
        Value::Const(c) => Some(c.ty()),
        Value::Global(_) | Value::Function(_) => None,
    }
}

fn reachable_blocks(function: &Function) -> HashSet<BlockId> {
    let mut reachable = HashSet::new();
    let mut stack = Vec::new();
    if let Some(entry) = function.entry_block() {
        stack.push(entry.id);
    }
    while let Some(id) = stack.pop() {
        if !reachable.insert(id) {
            continue;
        }
        if let Some(block) = function.get_block(id) {
            stack.extend(block.successors());
        }
    }
    reachable
}

/// Verify single assignment and dominance of every temporary use
///
/// Dominators are computed by the classic iterative fixpoint over the
/// predecessor sets. A use in a block is valid when the definition is a
/// parameter, appears earlier in the same block, or lives in a strictly
/// dominating block; a phi's incoming value only needs to be live at the
/// end of the matching predecessor.
fn check_def_before_use(
    function: &Function,
    preds: &HashMap<BlockId, Vec<BlockId>>,
    reachable: &HashSet<BlockId>,
) -> Result<(), String> {
    let param_count = function.params.len() as TempId;

    // Definition site of every non-parameter temporary
    let mut defs: HashMap<TempId, (BlockId, usize)> = HashMap::new();
    for block in &function.blocks {
        for (index, instr) in block.instructions.iter().enumerate() {
            if let Some(result) = instr.result() {
                if result < param_count {
                    return Err(format!(
                        "temp %{} shadows a parameter in bb{}",
                        result, block.id
                    ));
                }
                if function.temp_type(result).is_none() {
                    return Err(format!(
                        "temp %{} in bb{} has no recorded type",
                        result, block.id
                    ));
                }
                if defs.insert(result, (block.id, index)).is_some() {
                    return Err(format!("temp %{} is defined more than once", result));
                }
            }
        }
    }

    let dom = dominators(function, preds, reachable);
    let dominates = |a: BlockId, b: BlockId| dom.get(&b).is_some_and(|set| set.contains(&a));

    for block in &function.blocks {
        for (index, instr) in block.instructions.iter().enumerate() {
            if let Instruction::Phi { incoming, .. } = instr {
                for (value, pred) in incoming {
                    let Value::Temp(id) = value else { continue };
                    if *id < param_count {
                        continue;
                    }
                    match defs.get(id) {
                        // Live at the end of the predecessor
                        Some((def_block, _)) if dominates(*def_block, *pred) => {}
                        Some(_) => {
                            return Err(format!(
                                "phi operand %{} in bb{} is not defined on the edge from bb{}",
                                id, block.id, pred
                            ));
                        }
                        None => {
                            return Err(format!("temp %{} is used but never defined", id));
                        }
                    }
                }
                continue;
            }
            for value in instr.operands() {
                let Value::Temp(id) = value else { continue };
                if *id < param_count {
                    continue;
                }
                match defs.get(id) {
                    Some((def_block, def_index)) => {
                        let ok = if *def_block == block.id {
                            *def_index < index
                        } else {
                            dominates(*def_block, block.id)
                        };
                        if !ok {
                            return Err(format!(
                                "temp %{} is used in bb{} before its definition dominates it",
                                id, block.id
                            ));
                        }
                    }
                    None => {
                        return Err(format!("temp %{} is used but never defined", id));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Dominator sets of every reachable block, keyed by block id; a block's
/// set contains itself
fn dominators(
    function: &Function,
    preds: &HashMap<BlockId, Vec<BlockId>>,
    reachable: &HashSet<BlockId>,
) -> HashMap<BlockId, HashSet<BlockId>> {
    let Some(entry) = function.entry_block() else {
        return HashMap::new();
    };
    let all: HashSet<BlockId> = reachable.clone();
    let mut dom: HashMap<BlockId, HashSet<BlockId>> = HashMap::new();
    for id in &all {
        if *id == entry.id {
            dom.insert(*id, HashSet::from([*id]));
        } else {
            dom.insert(*id, all.clone());
        }
    }

    let mut changed = true;
    while changed {
        changed = false;
        for block in &function.blocks {
            if block.id == entry.id || !all.contains(&block.id) {
                continue;
            }
            let mut next: Option<HashSet<BlockId>> = None;
            for pred in &preds[&block.id] {
                if !all.contains(pred) {
                    continue;
                }
                let pred_dom = &dom[pred];
                next = Some(match next {
                    None => pred_dom.clone(),
                    Some(acc) => acc.intersection(pred_dom).copied().collect(),
                });
            }
            let mut next = next.unwrap_or_default();
            next.insert(block.id);
            if next != dom[&block.id] {
                dom.insert(block.id, next);
                changed = true;
            }
        }
    }
    dom
}
