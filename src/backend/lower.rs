//! Lowering from TAC-IR to machine IR.
//!
//! One machine block per IR block (named `_{func}_bb{idx}`), one pass over
//! the instructions. IR registers are memoised to fresh machine virtual
//! registers, parameters become `[RBP + (idx+2)*8]` (one word for the saved
//! frame pointer, one for the return address) and immediates pass through.
//! Calls follow the runtime's stack convention: arguments pushed right to
//! left, caller restores `RSP`, result in `RAX`.

use crate::backend::ir::{self, BinaryOp, InstrId, InstrKind, Operand};
use crate::backend::mir::{
    Cond, MBlock, MachineFunction, MachineInstKind, MachineOperand, MReg, WORD_SIZE,
};
use std::collections::HashMap;

/// Lower one IR function to machine IR over virtual registers
pub fn lower_function(func: &ir::Function) -> MachineFunction {
    let mut lowering = Lowering::new(func);
    lowering.generate();
    lowering.mf
}

struct Lowering<'a> {
    func: &'a ir::Function,
    mf: MachineFunction,
    current: Option<MBlock>,
    block_map: HashMap<ir::Block, MBlock>,
    virt_map: HashMap<usize, usize>,
    num_regs: usize,
}

impl<'a> Lowering<'a> {
    fn new(func: &'a ir::Function) -> Self {
        Self {
            func,
            mf: MachineFunction::new(func.name(), func.num_params()),
            current: None,
            block_map: HashMap::new(),
            virt_map: HashMap::new(),
            num_regs: 0,
        }
    }

    fn generate(&mut self) {
        for block in self.func.blocks() {
            let name = format!("_{}_bb{}", self.func.name(), self.func.block_index(block));
            let mblock = self.mf.create_block(&name);
            self.block_map.insert(block, mblock);
        }
        for block in self.func.blocks().collect::<Vec<_>>() {
            self.current = Some(self.block_map[&block]);
            for inst in self.func.instrs(block) {
                self.generate_instruction(inst);
            }
        }
    }

    fn new_vreg(&mut self) -> MachineOperand {
        let id = self.num_regs;
        self.num_regs += 1;
        MachineOperand::Virt(id)
    }

    fn convert_operand(&mut self, op: Operand) -> MachineOperand {
        match op {
            Operand::Register(id) => {
                if let Some(&vreg) = self.virt_map.get(&id) {
                    return MachineOperand::Virt(vreg);
                }
                let mop = self.new_vreg();
                if let MachineOperand::Virt(vreg) = mop {
                    self.virt_map.insert(id, vreg);
                }
                mop
            }
            Operand::Immediate(value) => MachineOperand::Imm(value),
            Operand::Parameter(idx) => {
                MachineOperand::mem(MReg::Rbp, (idx as i64 + 2) * WORD_SIZE)
            }
        }
    }

    fn emit(&mut self, kind: MachineInstKind, operands: Vec<MachineOperand>, succs: Vec<MBlock>) {
        let block = self.current.expect("no current basic block");
        let id = self.mf.add_instr(kind, operands, succs);
        self.mf.append(block, id);
    }

    fn mov(&mut self, src: MachineOperand, dst: MachineOperand) {
        self.emit(MachineInstKind::Mov, vec![src, dst], vec![]);
    }

    fn cmov(&mut self, src: MachineOperand, dst: MachineOperand, cond: Cond) {
        self.emit(MachineInstKind::CMov(cond), vec![src, dst], vec![]);
    }

    fn two_op(&mut self, kind: MachineInstKind, src: MachineOperand, dst: MachineOperand) {
        self.emit(kind, vec![src, dst], vec![]);
    }

    fn push(&mut self, op: MachineOperand) {
        self.emit(MachineInstKind::Push, vec![op], vec![]);
    }

    fn call(&mut self, callee: &str) {
        self.emit(MachineInstKind::Call(callee.to_string()), vec![], vec![]);
    }

    /// Pop the pushed arguments after a call
    fn adjust_stack(&mut self, nargs: usize) {
        if nargs > 0 {
            self.two_op(
                MachineInstKind::Add,
                MachineOperand::Imm(nargs as i64 * WORD_SIZE),
                MachineOperand::Reg(MReg::Rsp),
            );
        }
    }

    /// Push arguments right to left, call, restore the stack
    fn lower_call(&mut self, inst: InstrId, callee: &str) {
        let nargs = self.func.ins(inst);
        for i in (0..nargs).rev() {
            let arg = self.convert_operand(self.func.get_in(inst, i));
            self.push(arg);
        }
        self.call(callee);
        self.adjust_stack(nargs);
    }

    fn generate_instruction(&mut self, inst: InstrId) {
        let rax = MachineOperand::Reg(MReg::Rax);
        match self.func.kind(inst).clone() {
            InstrKind::Nop => {}

            InstrKind::Assign => {
                let src = self.convert_operand(self.func.get_in(inst, 0));
                let dst = self.convert_operand(self.func.get_out(inst, 0));
                self.mov(src, dst);
            }

            InstrKind::Binary(op) => self.lower_binary(inst, op),

            InstrKind::Jmp => {
                let target = self.block_map[&self.func.successors(inst)[0]];
                self.emit(MachineInstKind::Jmp, vec![], vec![target]);
            }

            InstrKind::Jnz => {
                let cond = self.func.get_in(inst, 0);
                assert!(
                    !cond.is_immediate(),
                    "constant jump condition should already be optimized"
                );
                let succs = self.func.successors(inst);
                let true_target = self.block_map[&succs[0]];
                let false_target = self.block_map[&succs[1]];
                let cond = self.convert_operand(cond);
                self.two_op(MachineInstKind::Test, cond, cond);
                self.emit(
                    MachineInstKind::Jcc(Cond::Ne),
                    vec![],
                    vec![true_target, false_target],
                );
            }

            InstrKind::Ret => {
                let value = self.convert_operand(self.func.get_in(inst, 0));
                self.mov(value, rax);
                self.emit(MachineInstKind::Ret, vec![], vec![]);
            }

            InstrKind::RetVoid => {
                self.emit(MachineInstKind::Ret, vec![], vec![]);
            }

            InstrKind::Call(callee) => {
                self.lower_call(inst, &callee);
                let dst = self.convert_operand(self.func.get_out(inst, 0));
                self.mov(rax, dst);
            }

            InstrKind::CallVoid(callee) => {
                self.lower_call(inst, &callee);
            }

            InstrKind::ArrayNew => {
                self.lower_call(inst, "array_new");
                let dst = self.convert_operand(self.func.get_out(inst, 0));
                self.mov(rax, dst);
            }

            InstrKind::ArrayLoad => {
                self.lower_call(inst, "array_load");
                let dst = self.convert_operand(self.func.get_out(inst, 0));
                self.mov(rax, dst);
            }

            InstrKind::ArrayStore => {
                self.lower_call(inst, "array_store");
            }

            InstrKind::LoadLabel(label) => {
                let dst = self.convert_operand(self.func.get_out(inst, 0));
                self.emit(MachineInstKind::Lea(label), vec![dst], vec![]);
            }
        }
    }

    fn lower_binary(&mut self, inst: InstrId, op: BinaryOp) {
        let rax = MachineOperand::Reg(MReg::Rax);
        let rdx = MachineOperand::Reg(MReg::Rdx);
        let dst = self.func.get_out(inst, 0);
        let src1 = self.func.get_in(inst, 0);
        let src2 = self.func.get_in(inst, 1);

        match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => {
                let kind = match op {
                    BinaryOp::Add => MachineInstKind::Add,
                    BinaryOp::Sub => MachineInstKind::Sub,
                    BinaryOp::And => MachineInstKind::And,
                    BinaryOp::Or => MachineInstKind::Or,
                    _ => MachineInstKind::Xor,
                };
                let a = self.convert_operand(src1);
                let d = self.convert_operand(dst);
                self.mov(a, d);
                let b = self.convert_operand(src2);
                let d = self.convert_operand(dst);
                self.two_op(kind, b, d);
            }

            BinaryOp::Mul => {
                let a = self.convert_operand(src1);
                let d = self.convert_operand(dst);
                self.mov(a, d);
                if src2.is_immediate() {
                    // imul cannot take an immediate source operand
                    let b = self.convert_operand(src2);
                    self.mov(b, rax);
                    let d = self.convert_operand(dst);
                    self.two_op(MachineInstKind::IMul, rax, d);
                } else {
                    let b = self.convert_operand(src2);
                    let d = self.convert_operand(dst);
                    self.two_op(MachineInstKind::IMul, b, d);
                }
            }

            BinaryOp::Div | BinaryOp::Mod => {
                // an immediate divisor gets its register before the
                // dividend claims RAX
                let divisor = if src2.is_immediate() {
                    let tmp = self.new_vreg();
                    let b = self.convert_operand(src2);
                    self.mov(b, tmp);
                    tmp
                } else {
                    self.convert_operand(src2)
                };
                let a = self.convert_operand(src1);
                self.mov(a, rax);
                self.emit(MachineInstKind::Cqo, vec![], vec![]);
                self.emit(MachineInstKind::IDiv, vec![divisor], vec![]);
                let result = if op == BinaryOp::Div { rax } else { rdx };
                let d = self.convert_operand(dst);
                self.mov(result, d);
            }

            BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge
            | BinaryOp::Eq
            | BinaryOp::Ne => self.lower_comparison(op, dst, src1, src2),

            BinaryOp::Shl | BinaryOp::Shr => {
                unreachable!("shift operations are folded or rejected before lowering")
            }
        }
    }

    /// `xor dst, dst; cmp a, b; cmov{cc} dst, 1`. An immediate left-hand
    /// side swaps the operands and mirrors the condition.
    fn lower_comparison(&mut self, op: BinaryOp, dst: Operand, src1: Operand, src2: Operand) {
        let (op, src1, src2) = if src1.is_immediate() {
            assert!(
                !src2.is_immediate(),
                "constant comparisons should already be optimized"
            );
            let mirrored = match op {
                BinaryOp::Lt => BinaryOp::Gt,
                BinaryOp::Le => BinaryOp::Ge,
                BinaryOp::Gt => BinaryOp::Lt,
                BinaryOp::Ge => BinaryOp::Le,
                other => other,
            };
            (mirrored, src2, src1)
        } else {
            (op, src1, src2)
        };

        let cond = match op {
            BinaryOp::Lt => Cond::L,
            BinaryOp::Le => Cond::Le,
            BinaryOp::Gt => Cond::G,
            BinaryOp::Ge => Cond::Ge,
            BinaryOp::Eq => Cond::E,
            BinaryOp::Ne => Cond::Ne,
            _ => unreachable!(),
        };

        let d = self.convert_operand(dst);
        self.two_op(MachineInstKind::Xor, d, d);
        let a = self.convert_operand(src1);
        let b = self.convert_operand(src2);
        self.two_op(MachineInstKind::Cmp, b, a);
        let d = self.convert_operand(dst);
        self.cmov(MachineOperand::Imm(1), d, cond);
    }
}
