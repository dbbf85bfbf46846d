//! Common-subexpression elimination, local and global.
//!
//! Both passes only consider `Binary` instructions whose operands are
//! immutable (immediates or parameters), which makes an expression's value
//! independent of the program point computing it.
//!
//! Local CSE splits the first computation of a repeated expression into a
//! fresh temporary plus an `Assign` to the original destination, then turns
//! every later recomputation into an `Assign` from the temporary.
//!
//! Global CSE runs an available-expressions dataflow (meet = intersection,
//! with an "uninitialised is top" flag so the first merge works), and for
//! each site whose expression is already available on block entry rewrites
//! the defining sites in transitive predecessors to a common fresh register.

use crate::backend::dataflow::{self, Direction, Lattice};
use crate::backend::ir::{BinaryOp, Block, Function, InstrId, InstrKind, Operand};
use im::OrdSet;
use std::collections::{BTreeMap, BTreeSet};

/// Value key of a pure binary expression
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct ExprKey {
    op: BinaryOp,
    lhs: Operand,
    rhs: Operand,
}

fn expr_key(func: &Function, inst: InstrId) -> Option<ExprKey> {
    let InstrKind::Binary(op) = func.kind(inst) else {
        return None;
    };
    let lhs = func.get_in(inst, 0);
    let rhs = func.get_in(inst, 1);
    let immutable = |op: Operand| op.is_immediate() || op.is_parameter();
    if immutable(lhs) && immutable(rhs) {
        Some(ExprKey { op: *op, lhs, rhs })
    } else {
        None
    }
}

/// Split the defining site of `key` so its value lands in a fresh register,
/// keeping the original destination via an `Assign`
fn split_def(func: &mut Function, def: InstrId, new_reg: Operand) {
    let old_dst = func.get_out(def, 0);
    func.replace_out(def, 0, new_reg);
    let keep = func.add_instr(InstrKind::Assign, vec![old_dst, new_reg], vec![]);
    func.insert_after(keep, def);
}

fn local_cse_block(func: &mut Function, block: Block) -> bool {
    let mut first_def: BTreeMap<ExprKey, InstrId> = BTreeMap::new();
    let mut reuses: BTreeMap<ExprKey, Vec<InstrId>> = BTreeMap::new();

    for inst in func.instrs(block) {
        if let Some(key) = expr_key(func, inst) {
            match first_def.get(&key) {
                Some(_) => reuses.entry(key).or_default().push(inst),
                None => {
                    first_def.insert(key, inst);
                }
            }
        }
    }

    let mut changed = false;
    for (key, users) in reuses {
        if users.is_empty() {
            continue;
        }
        let def = first_def[&key];
        let tmp = Operand::Register(func.new_reg());
        split_def(func, def, tmp);

        for user in users {
            let dst = func.get_out(user, 0);
            let replacement = func.add_instr(InstrKind::Assign, vec![dst, tmp], vec![]);
            func.replace(replacement, user);
        }
        changed = true;
    }
    changed
}

/// Per-block elimination of repeated pure expressions
pub fn local_cse(func: &mut Function) -> bool {
    let mut changed = false;
    for block in func.blocks().collect::<Vec<_>>() {
        changed |= local_cse_block(func, block);
    }
    changed
}

/// Available pure expressions on entry to a block
#[derive(Clone, PartialEq)]
struct AvailState {
    exprs: OrdSet<ExprKey>,
    init: bool,
}

impl AvailState {
    fn contains(&self, key: ExprKey) -> bool {
        self.init && self.exprs.contains(&key)
    }
}

impl Lattice<Function> for AvailState {
    fn empty(_func: &Function) -> Self {
        Self {
            exprs: OrdSet::new(),
            init: false,
        }
    }

    fn meet(&mut self, other: &Self) {
        if !other.init {
            return;
        }
        if !self.init {
            self.exprs = other.exprs.clone();
            self.init = true;
            return;
        }
        let mut kept = OrdSet::new();
        for key in self.exprs.iter() {
            if other.exprs.contains(key) {
                kept.insert(*key);
            }
        }
        self.exprs = kept;
    }

    fn transfer(&mut self, func: &Function, inst: InstrId) {
        if let Some(key) = expr_key(func, inst) {
            self.exprs.insert(key);
        }
        // any processed block is initialised; the flag only distinguishes
        // not-yet-visited predecessors during the first merges
        self.init = true;
    }
}

/// Rewrite every def of `key` in the transitive predecessors of `start` to
/// target `new_reg`, keeping the original destinations via `Assign`s
fn rewrite_defs(
    func: &mut Function,
    start: Block,
    current: Block,
    key: ExprKey,
    new_reg: Operand,
    visited: &mut BTreeSet<Block>,
) {
    if !visited.insert(current) {
        return;
    }

    if current != start {
        for inst in func.instrs(current) {
            if expr_key(func, inst) == Some(key) {
                split_def(func, inst, new_reg);
            }
        }
    }

    for pred in func.block_predecessors(current) {
        rewrite_defs(func, start, pred, key, new_reg, visited);
    }
}

/// Cross-block elimination via available expressions
pub fn global_cse(func: &mut Function) -> bool {
    let result = dataflow::analyze::<Function, AvailState>(func, Direction::Forward);
    let mut changed = false;

    for block in func.blocks().collect::<Vec<_>>() {
        let Some(state) = result.inputs.get(&block) else {
            continue;
        };
        for inst in func.instrs(block) {
            let Some(key) = expr_key(func, inst) else {
                continue;
            };
            if !state.contains(key) {
                continue;
            }
            let new_reg = Operand::Register(func.new_reg());
            let mut visited = BTreeSet::new();
            rewrite_defs(func, block, block, key, new_reg, &mut visited);

            let dst = func.get_out(inst, 0);
            let replacement = func.add_instr(InstrKind::Assign, vec![dst, new_reg], vec![]);
            func.replace(replacement, inst);
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ir::builder::FuncBuilder;
    use crate::backend::ir::interp::Interpreter;

    /// Two `(a+b)` over parameters collapse to one `Add`
    /// plus an `Assign`
    #[test]
    fn test_local_repeated_add() {
        let mut b = FuncBuilder::new("f", 2);
        b.new_block();
        let x = b.new_reg();
        let y = b.new_reg();
        let r = b.new_reg();
        b.add(x, b.param(0), b.param(1));
        b.add(y, b.param(0), b.param(1));
        b.mul(r, x, y);
        b.ret(r);
        let mut f = b.build();

        assert!(local_cse(&mut f));
        f.verify().unwrap();

        let instrs = f.instrs(f.entry());
        let adds = instrs
            .iter()
            .filter(|i| matches!(f.kind(**i), InstrKind::Binary(BinaryOp::Add)))
            .count();
        let assigns = instrs
            .iter()
            .filter(|i| matches!(f.kind(**i), InstrKind::Assign))
            .count();
        assert_eq!(adds, 1);
        assert_eq!(assigns, 2);

        let mut interp = Interpreter::new();
        interp.add_function(&f);
        assert_eq!(interp.run("f", &[3, 4]).unwrap(), 49);
    }

    #[test]
    fn test_local_ignores_mutable_operands() {
        // operands are registers, not immutable: no rewrite
        let mut b = FuncBuilder::new("f", 0);
        b.new_block();
        let a = b.new_reg();
        let x = b.new_reg();
        let y = b.new_reg();
        b.call("random", a, &[]);
        b.add(x, a, b.imm(1));
        b.add(y, a, b.imm(1));
        b.ret(y);
        let mut f = b.build();

        assert!(!local_cse(&mut f));
        let _ = x;
    }

    #[test]
    fn test_global_reuses_predecessor_computation() {
        // entry computes p0+p1, the successor recomputes it
        let mut b = FuncBuilder::new("f", 2);
        let entry = b.new_block();
        let next = b.create_block();
        let x = b.new_reg();
        let y = b.new_reg();
        b.set_insertion_point(entry);
        b.add(x, b.param(0), b.param(1));
        b.jmp(next);
        b.set_insertion_point(next);
        b.add(y, b.param(0), b.param(1));
        b.ret(y);
        let mut f = b.build();

        assert!(global_cse(&mut f));
        f.verify().unwrap();

        // the recomputation is now an Assign from the shared register
        let next_instrs = f.instrs(next);
        assert!(matches!(f.kind(next_instrs[0]), InstrKind::Assign));
        let adds: usize = f
            .blocks()
            .map(|bb| {
                f.instrs(bb)
                    .iter()
                    .filter(|i| matches!(f.kind(**i), InstrKind::Binary(BinaryOp::Add)))
                    .count()
            })
            .sum();
        assert_eq!(adds, 1);

        let mut interp = Interpreter::new();
        interp.add_function(&f);
        assert_eq!(interp.run("f", &[20, 22]).unwrap(), 42);
    }

    #[test]
    fn test_global_requires_all_paths() {
        // expression only available on one of two joining paths: no rewrite
        let mut b = FuncBuilder::new("f", 2);
        let entry = b.new_block();
        let then_b = b.create_block();
        let else_b = b.create_block();
        let join = b.create_block();
        let x = b.new_reg();
        let y = b.new_reg();
        b.set_insertion_point(entry);
        b.jnz(b.param(0), then_b, else_b);
        b.set_insertion_point(then_b);
        b.add(x, b.param(0), b.param(1));
        b.jmp(join);
        b.set_insertion_point(else_b);
        b.assign(x, b.imm(0));
        b.jmp(join);
        b.set_insertion_point(join);
        b.add(y, b.param(0), b.param(1));
        b.ret(y);
        let mut f = b.build();

        assert!(!global_cse(&mut f));
    }
}
