//! Copy propagation.
//!
//! Forward dataflow over a partial `reg -> reg` map: `Assign dst, src`
//! records `dst -> src`, any other write to a register drops its entry, and
//! the meet keeps only mappings identical across all predecessors. Uses are
//! rewritten against the IN state, updated through the block.

use crate::backend::dataflow::{self, Direction, Lattice};
use crate::backend::ir::{Function, InstrId, InstrKind, Operand};
use im::OrdMap;

#[derive(Clone, PartialEq)]
struct CopyState {
    copies: OrdMap<usize, usize>,
}

impl Lattice<Function> for CopyState {
    fn empty(_func: &Function) -> Self {
        Self {
            copies: OrdMap::new(),
        }
    }

    fn meet(&mut self, other: &Self) {
        let mut merged = OrdMap::new();
        for (dst, src) in self.copies.iter() {
            if other.copies.get(dst) == Some(src) {
                merged.insert(*dst, *src);
            }
        }
        self.copies = merged;
    }

    fn transfer(&mut self, func: &Function, inst: InstrId) {
        if *func.kind(inst) == InstrKind::Assign {
            let src = func.get_in(inst, 0);
            if src.is_register() {
                self.copies
                    .insert(func.get_out(inst, 0).reg_id(), src.reg_id());
                return;
            }
        }
        // any other write invalidates the overwritten register
        for i in 0..func.outs(inst) {
            let op = func.get_out(inst, i);
            if op.is_register() {
                self.copies.remove(&op.reg_id());
            }
        }
    }
}

/// Rewrite register uses through recorded copies. Returns true on change.
pub fn propagate_copies(func: &mut Function) -> bool {
    let result = dataflow::analyze::<Function, CopyState>(func, Direction::Forward);
    let mut changed = false;

    for block in func.blocks().collect::<Vec<_>>() {
        let mut state = result
            .inputs
            .get(&block)
            .cloned()
            .unwrap_or_else(|| CopyState::empty(func));
        for inst in func.instrs(block) {
            for i in 0..func.ins(inst) {
                let op = func.get_in(inst, i);
                if !op.is_register() {
                    continue;
                }
                if let Some(&src) = state.copies.get(&op.reg_id()) {
                    if src != op.reg_id() {
                        func.replace_in(inst, i, Operand::Register(src));
                        changed = true;
                    }
                }
            }
            // track copies made earlier in this block
            state.transfer(func, inst);
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ir::builder::FuncBuilder;

    fn copy_chain() -> Function {
        // %0 = call random; %1 = %0; %2 = %1; ret %2
        let mut b = FuncBuilder::new("f", 0);
        b.new_block();
        let r0 = b.new_reg();
        let r1 = b.new_reg();
        let r2 = b.new_reg();
        b.call("random", r0, &[]);
        b.assign(r1, r0);
        b.assign(r2, r1);
        b.ret(r2);
        b.build()
    }

    #[test]
    fn test_chain_collapses_to_source() {
        let mut f = copy_chain();
        assert!(propagate_copies(&mut f));

        // the in-block state sees rewritten copies, so one round forwards
        // both the second copy and the return all the way to %0
        let instrs = f.instrs(f.entry());
        assert_eq!(f.get_in(instrs[2], 0), Operand::Register(0));
        assert_eq!(f.get_in(instrs[3], 0), Operand::Register(0));

        assert!(!propagate_copies(&mut f));
    }

    #[test]
    fn test_idempotent() {
        let mut once = copy_chain();
        while propagate_copies(&mut once) {}
        let printed = format!("{}", once);

        assert!(!propagate_copies(&mut once));
        assert_eq!(format!("{}", once), printed);
    }

    #[test]
    fn test_redefinition_kills_copy() {
        // %1 = %0; %1 = call random; ret %1 -- the call kills the mapping
        let mut b = FuncBuilder::new("f", 0);
        b.new_block();
        let r0 = b.new_reg();
        let r1 = b.new_reg();
        b.assign(r1, r0);
        b.call("random", r1, &[]);
        b.ret(r1);
        let mut f = b.build();

        assert!(!propagate_copies(&mut f));
        let instrs = f.instrs(f.entry());
        assert_eq!(f.get_in(instrs[2], 0), Operand::Register(1));
    }

    #[test]
    fn test_meet_keeps_only_agreeing_copies() {
        // both paths copy %s into %x -> use after join is rewritten;
        // a second register copied differently per path is not
        let mut b = FuncBuilder::new("f", 1);
        let entry = b.new_block();
        let then_b = b.create_block();
        let else_b = b.create_block();
        let join = b.create_block();
        let s = b.new_reg();
        let t = b.new_reg();
        let x = b.new_reg();
        let y = b.new_reg();
        b.set_insertion_point(entry);
        b.call("random", s, &[]);
        b.call("random", t, &[]);
        b.jnz(b.param(0), then_b, else_b);
        b.set_insertion_point(then_b);
        b.assign(x, s);
        b.assign(y, s);
        b.jmp(join);
        b.set_insertion_point(else_b);
        b.assign(x, s);
        b.assign(y, t);
        b.jmp(join);
        b.set_insertion_point(join);
        let r = b.new_reg();
        b.add(r, x, y);
        b.ret(r);
        let mut f = b.build();

        assert!(propagate_copies(&mut f));
        let add = f.instrs(join)[0];
        assert_eq!(f.get_in(add, 0), s);
        assert_eq!(f.get_in(add, 1), y);
    }
}
