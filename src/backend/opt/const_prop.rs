//! Constant propagation.
//!
//! Forward dataflow with a per-register lattice `Undet < Constant(v) <
//! NonConstant`. The rewrite substitutes `Immediate(v)` at register uses in
//! every block whose OUT state proves the register constant.

use crate::backend::dataflow::{self, Direction, Lattice};
use crate::backend::ir::{Function, InstrId, InstrKind, Operand};
use im::OrdMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConstValue {
    Undet,
    Constant(i64),
    NonConstant,
}

#[derive(Clone, PartialEq)]
struct ConstState {
    regs: OrdMap<usize, ConstValue>,
}

impl ConstState {
    fn get(&self, reg: usize) -> ConstValue {
        self.regs.get(&reg).copied().unwrap_or(ConstValue::Undet)
    }

    fn from_operand(&self, op: Operand) -> ConstValue {
        match op {
            Operand::Immediate(v) => ConstValue::Constant(v),
            Operand::Register(reg) => self.get(reg),
            Operand::Parameter(_) => ConstValue::NonConstant,
        }
    }
}

impl Lattice<Function> for ConstState {
    fn empty(_func: &Function) -> Self {
        Self { regs: OrdMap::new() }
    }

    fn meet(&mut self, other: &Self) {
        for (reg, theirs) in other.regs.iter() {
            let merged = match (self.get(*reg), *theirs) {
                (ConstValue::Undet, v) | (v, ConstValue::Undet) => v,
                (ConstValue::Constant(a), ConstValue::Constant(b)) if a == b => {
                    ConstValue::Constant(a)
                }
                _ => ConstValue::NonConstant,
            };
            self.regs.insert(*reg, merged);
        }
    }

    fn transfer(&mut self, func: &Function, inst: InstrId) {
        match func.kind(inst) {
            InstrKind::Assign => {
                let value = self.from_operand(func.get_in(inst, 0));
                self.regs.insert(func.get_out(inst, 0).reg_id(), value);
            }
            InstrKind::Binary(op) => {
                let lhs = self.from_operand(func.get_in(inst, 0));
                let rhs = self.from_operand(func.get_in(inst, 1));
                let value = match (lhs, rhs) {
                    (ConstValue::NonConstant, _) | (_, ConstValue::NonConstant) => {
                        ConstValue::NonConstant
                    }
                    (ConstValue::Constant(a), ConstValue::Constant(b)) => match op.evaluate(a, b) {
                        Some(result) => ConstValue::Constant(result),
                        // would trap at runtime; don't pretend to know it
                        None => ConstValue::NonConstant,
                    },
                    _ => ConstValue::Undet,
                };
                self.regs.insert(func.get_out(inst, 0).reg_id(), value);
            }

            // results that cannot be known at compile time
            InstrKind::Call(_)
            | InstrKind::ArrayNew
            | InstrKind::ArrayLoad
            | InstrKind::LoadLabel(_) => {
                self.regs
                    .insert(func.get_out(inst, 0).reg_id(), ConstValue::NonConstant);
            }

            InstrKind::Nop
            | InstrKind::Jmp
            | InstrKind::Jnz
            | InstrKind::Ret
            | InstrKind::RetVoid
            | InstrKind::CallVoid(_)
            | InstrKind::ArrayStore => {}
        }
    }
}

/// Substitute constant registers at their uses. Returns true on any rewrite.
pub fn propagate_constants(func: &mut Function) -> bool {
    let result = dataflow::analyze::<Function, ConstState>(func, Direction::Forward);
    let mut changed = false;

    for block in func.blocks().collect::<Vec<_>>() {
        let Some(state) = result.outputs.get(&block) else {
            continue;
        };
        for inst in func.instrs(block) {
            for i in 0..func.ins(inst) {
                let op = func.get_in(inst, i);
                if !op.is_register() {
                    continue;
                }
                if let ConstValue::Constant(value) = state.get(op.reg_id()) {
                    func.replace_in(inst, i, Operand::Immediate(value));
                    changed = true;
                }
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ir::builder::FuncBuilder;

    #[test]
    fn test_assign_chain_becomes_immediate() {
        // %0 = #5; %1 = %0; ret %1  =>  ret #5
        let mut b = FuncBuilder::new("f", 0);
        b.new_block();
        let r0 = b.new_reg();
        let r1 = b.new_reg();
        b.assign(r0, b.imm(5));
        b.assign(r1, r0);
        b.ret(r1);
        let mut f = b.build();

        assert!(propagate_constants(&mut f));
        let instrs = f.instrs(f.entry());
        assert_eq!(f.get_in(instrs[2], 0), Operand::Immediate(5));
        // the assign sources were rewritten too
        assert_eq!(f.get_in(instrs[1], 0), Operand::Immediate(5));
    }

    #[test]
    fn test_conflicting_paths_are_not_constant() {
        // x = 1 on one path, x = 2 on the other; the join must not fold x
        let mut b = FuncBuilder::new("f", 1);
        let entry = b.new_block();
        let then_b = b.create_block();
        let else_b = b.create_block();
        let join = b.create_block();
        let x = b.new_reg();
        b.set_insertion_point(entry);
        b.jnz(b.param(0), then_b, else_b);
        b.set_insertion_point(then_b);
        b.assign(x, b.imm(1));
        b.jmp(join);
        b.set_insertion_point(else_b);
        b.assign(x, b.imm(2));
        b.jmp(join);
        b.set_insertion_point(join);
        b.ret(x);
        let mut f = b.build();

        assert!(!propagate_constants(&mut f));
        let ret = f.instrs(join)[0];
        assert_eq!(f.get_in(ret, 0), x);
    }

    #[test]
    fn test_call_result_is_not_constant() {
        let mut b = FuncBuilder::new("f", 0);
        b.new_block();
        let r = b.new_reg();
        b.call("random", r, &[]);
        b.ret(r);
        let mut f = b.build();

        assert!(!propagate_constants(&mut f));
    }

    #[test]
    fn test_agreement_across_paths_is_constant() {
        // x = 7 on both paths; the use after the join folds
        let mut b = FuncBuilder::new("f", 1);
        let entry = b.new_block();
        let then_b = b.create_block();
        let else_b = b.create_block();
        let join = b.create_block();
        let x = b.new_reg();
        b.set_insertion_point(entry);
        b.jnz(b.param(0), then_b, else_b);
        b.set_insertion_point(then_b);
        b.assign(x, b.imm(7));
        b.jmp(join);
        b.set_insertion_point(else_b);
        b.assign(x, b.imm(7));
        b.jmp(join);
        b.set_insertion_point(join);
        b.ret(x);
        let mut f = b.build();

        assert!(propagate_constants(&mut f));
        let ret = f.instrs(join)[0];
        assert_eq!(f.get_in(ret, 0), Operand::Immediate(7));
    }
}
