//! Dead-code elimination.
//!
//! Five sub-passes per invocation, in the order the fixed point expects:
//! dead-variable elimination driven by backward liveness, removal of
//! dummy instructions (`Nop`, `Assign r, r`), then constant folding of
//! immediate binaries, collapse of constant `Jnz`, and removal of blocks
//! left without predecessors.
//!
//! Instructions with side effects (`Call`, `CallVoid`, `ArrayNew`,
//! `ArrayStore`, terminators) are never removed; the definitions feeding
//! them are roots of the needed-set.

use crate::backend::dataflow::{self, Direction, Lattice};
use crate::backend::ir::{Block, Function, InstrId, InstrKind, Operand};
use im::OrdSet;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Backward liveness over IR registers
#[derive(Clone, PartialEq)]
struct LivenessState {
    live: OrdSet<usize>,
}

impl LivenessState {
    fn contains(&self, reg: usize) -> bool {
        self.live.contains(&reg)
    }
}

impl Lattice<Function> for LivenessState {
    fn empty(_func: &Function) -> Self {
        Self {
            live: OrdSet::new(),
        }
    }

    fn meet(&mut self, other: &Self) {
        for reg in other.live.iter() {
            self.live.insert(*reg);
        }
    }

    fn transfer(&mut self, func: &Function, inst: InstrId) {
        for i in 0..func.outs(inst) {
            let op = func.get_out(inst, i);
            if op.is_register() {
                self.live.remove(&op.reg_id());
            }
        }
        for i in 0..func.ins(inst) {
            let op = func.get_in(inst, i);
            if op.is_register() {
                self.live.insert(op.reg_id());
            }
        }
    }
}

/// Fold `Binary` over two immediates into `Assign dst, Immediate(result)`.
/// Trapping combinations are left for the runtime.
fn fold_constant_binaries(func: &mut Function, block: Block) -> bool {
    let mut changed = false;
    for inst in func.instrs(block) {
        let InstrKind::Binary(op) = func.kind(inst) else {
            continue;
        };
        let lhs = func.get_in(inst, 0);
        let rhs = func.get_in(inst, 1);
        if !(lhs.is_immediate() && rhs.is_immediate()) {
            continue;
        }
        let Some(result) = op.evaluate(lhs.imm(), rhs.imm()) else {
            continue;
        };
        let dst = func.get_out(inst, 0);
        let replacement = func.add_instr(
            InstrKind::Assign,
            vec![dst, Operand::Immediate(result)],
            vec![],
        );
        func.replace(replacement, inst);
        changed = true;
    }
    changed
}

/// Collapse `Jnz Immediate(c), t, f` into `Jmp` of the taken branch
fn rewrite_constant_jumps(func: &mut Function, block: Block) -> bool {
    let Some(term) = func.tail(block) else {
        return false;
    };
    if *func.kind(term) != InstrKind::Jnz {
        return false;
    }
    let cond = func.get_in(term, 0);
    if !cond.is_immediate() {
        return false;
    }
    let succs = func.successors(term);
    let taken = if cond.imm() != 0 { succs[0] } else { succs[1] };
    let replacement = func.add_instr(InstrKind::Jmp, vec![], vec![taken]);
    func.replace(replacement, term);
    true
}

/// Constant folding, branch collapse, then removal of unreachable blocks
fn remove_dead_blocks(func: &mut Function) -> bool {
    let mut changed = false;
    for block in func.blocks().collect::<Vec<_>>() {
        changed |= fold_constant_binaries(func, block);
    }
    for block in func.blocks().collect::<Vec<_>>() {
        changed |= rewrite_constant_jumps(func, block);
    }

    let entry = func.entry();
    let dead: Vec<Block> = func
        .blocks()
        .filter(|b| *b != entry && func.block_predecessors(*b).is_empty())
        .collect();
    for block in dead {
        func.remove_block(block);
        changed = true;
    }
    changed
}

fn is_dummy(func: &Function, inst: InstrId) -> bool {
    match func.kind(inst) {
        InstrKind::Nop => true,
        InstrKind::Assign => {
            let src = func.get_in(inst, 0);
            src.is_register() && src.reg_id() == func.get_out(inst, 0).reg_id()
        }
        _ => false,
    }
}

fn remove_dummy_instructions(func: &mut Function) -> bool {
    let mut changed = false;
    for block in func.blocks().collect::<Vec<_>>() {
        for inst in func.instrs(block) {
            if is_dummy(func, inst) {
                func.remove_instr(inst);
                changed = true;
            }
        }
    }
    changed
}

fn dead_variables_in_block(
    func: &mut Function,
    block: Block,
    state_out: &LivenessState,
) -> bool {
    let instrs = func.instrs(block);

    // last definition of each register walking forward, and for every
    // instruction the defs reaching its register uses
    let mut last_def: BTreeMap<usize, InstrId> = BTreeMap::new();
    let mut use_defs: HashMap<InstrId, Vec<InstrId>> = HashMap::new();
    for &inst in &instrs {
        for i in 0..func.ins(inst) {
            let op = func.get_in(inst, i);
            if op.is_register() {
                if let Some(&def) = last_def.get(&op.reg_id()) {
                    use_defs.entry(inst).or_default().push(def);
                }
            }
        }
        if func.outs(inst) == 1 {
            let out = func.get_out(inst, 0);
            if out.is_register() {
                last_def.insert(out.reg_id(), inst);
            }
        }
    }

    let mut needed: BTreeSet<InstrId> = BTreeSet::new();
    let mark = |seed: InstrId, needed: &mut BTreeSet<InstrId>| {
        let mut stack = vec![seed];
        while let Some(inst) = stack.pop() {
            if needed.insert(inst) {
                if let Some(defs) = use_defs.get(&inst) {
                    stack.extend(defs.iter().copied());
                }
            }
        }
    };

    // registers live out of the block root their last definitions
    if !func.is_exit(block) {
        for reg in state_out.live.iter() {
            if let Some(&def) = last_def.get(reg) {
                mark(def, &mut needed);
            }
        }
    }

    // the terminator's input is needed
    let term = *instrs.last().expect("empty basic block");
    if matches!(func.kind(term), InstrKind::Ret | InstrKind::Jnz) {
        if let Some(defs) = use_defs.get(&term) {
            for def in defs.clone() {
                mark(def, &mut needed);
            }
        }
    }

    // side-effecting instructions keep whatever feeds them
    for &inst in &instrs {
        if matches!(
            func.kind(inst),
            InstrKind::Call(_) | InstrKind::CallVoid(_) | InstrKind::ArrayStore
        ) {
            if let Some(defs) = use_defs.get(&inst) {
                for def in defs.clone() {
                    mark(def, &mut needed);
                }
            }
        }
    }

    let mut changed = false;
    for inst in instrs {
        if !needed.contains(&inst) && !func.has_side_effects(inst) {
            func.remove_instr(inst);
            changed = true;
        }
    }
    changed
}

/// Remove pure instructions whose results reach no live use
fn dead_variable_elimination(func: &mut Function) -> bool {
    let result = dataflow::analyze::<Function, LivenessState>(func, Direction::Backward);
    let empty = LivenessState::empty(func);

    let mut changed = false;
    for block in func.blocks().collect::<Vec<_>>() {
        let out = result.outputs.get(&block).unwrap_or(&empty);
        changed |= dead_variables_in_block(func, block, out);
    }
    changed
}

/// One round of all DCE sub-passes. Returns true on any change.
pub fn eliminate_dead_code(func: &mut Function) -> bool {
    let mut changed = false;
    changed |= dead_variable_elimination(func);
    changed |= remove_dummy_instructions(func);
    changed |= remove_dead_blocks(func);
    changed
}
