//! Builder for constructing IR functions.
//!
//! Wraps a `Function` with an insertion point and one emit helper per
//! instruction tag. Used by the IR generator and by tests constructing
//! fixtures directly.

use crate::backend::ir::{BinaryOp, Block, Function, InstrId, InstrKind, Operand};

pub struct FuncBuilder {
    func: Function,
    current: Option<Block>,
}

impl FuncBuilder {
    pub fn new(name: &str, num_params: usize) -> Self {
        Self {
            func: Function::new(name, num_params),
            current: None,
        }
    }

    pub fn create_block(&mut self) -> Block {
        self.func.create_block()
    }

    pub fn set_insertion_point(&mut self, block: Block) {
        self.current = Some(block);
    }

    pub fn current(&self) -> Block {
        self.current.expect("no current basic block")
    }

    /// Create a block and make it the insertion point
    pub fn new_block(&mut self) -> Block {
        let block = self.create_block();
        self.set_insertion_point(block);
        block
    }

    pub fn imm(&self, value: i64) -> Operand {
        Operand::Immediate(value)
    }

    pub fn param(&self, idx: usize) -> Operand {
        assert!(idx < self.func.num_params(), "invalid parameter id");
        Operand::Parameter(idx)
    }

    pub fn new_reg(&mut self) -> Operand {
        Operand::Register(self.func.new_reg())
    }

    pub fn func(&self) -> &Function {
        &self.func
    }

    pub fn build(self) -> Function {
        self.func
    }

    fn emit(&mut self, kind: InstrKind, operands: Vec<Operand>, successors: Vec<Block>) -> InstrId {
        let block = self.current.expect("no current basic block");
        let id = self.func.add_instr(kind, operands, successors);
        self.func.append(block, id);
        id
    }

    pub fn nop(&mut self) -> InstrId {
        self.emit(InstrKind::Nop, vec![], vec![])
    }

    pub fn assign(&mut self, dst: Operand, src: Operand) -> InstrId {
        self.emit(InstrKind::Assign, vec![dst, src], vec![])
    }

    pub fn binary(&mut self, op: BinaryOp, dst: Operand, lhs: Operand, rhs: Operand) -> InstrId {
        self.emit(InstrKind::Binary(op), vec![dst, lhs, rhs], vec![])
    }

    pub fn add(&mut self, dst: Operand, lhs: Operand, rhs: Operand) -> InstrId {
        self.binary(BinaryOp::Add, dst, lhs, rhs)
    }

    pub fn sub(&mut self, dst: Operand, lhs: Operand, rhs: Operand) -> InstrId {
        self.binary(BinaryOp::Sub, dst, lhs, rhs)
    }

    pub fn mul(&mut self, dst: Operand, lhs: Operand, rhs: Operand) -> InstrId {
        self.binary(BinaryOp::Mul, dst, lhs, rhs)
    }

    pub fn div(&mut self, dst: Operand, lhs: Operand, rhs: Operand) -> InstrId {
        self.binary(BinaryOp::Div, dst, lhs, rhs)
    }

    pub fn lt(&mut self, dst: Operand, lhs: Operand, rhs: Operand) -> InstrId {
        self.binary(BinaryOp::Lt, dst, lhs, rhs)
    }

    pub fn eq(&mut self, dst: Operand, lhs: Operand, rhs: Operand) -> InstrId {
        self.binary(BinaryOp::Eq, dst, lhs, rhs)
    }

    pub fn jmp(&mut self, target: Block) -> InstrId {
        self.emit(InstrKind::Jmp, vec![], vec![target])
    }

    pub fn jnz(&mut self, cond: Operand, true_target: Block, false_target: Block) -> InstrId {
        self.emit(InstrKind::Jnz, vec![cond], vec![true_target, false_target])
    }

    pub fn ret(&mut self, value: Operand) -> InstrId {
        self.emit(InstrKind::Ret, vec![value], vec![])
    }

    pub fn ret_void(&mut self) -> InstrId {
        self.emit(InstrKind::RetVoid, vec![], vec![])
    }

    pub fn call(&mut self, callee: &str, dst: Operand, args: &[Operand]) -> InstrId {
        let mut operands = vec![dst];
        operands.extend_from_slice(args);
        self.emit(InstrKind::Call(callee.to_string()), operands, vec![])
    }

    pub fn call_void(&mut self, callee: &str, args: &[Operand]) -> InstrId {
        self.emit(InstrKind::CallVoid(callee.to_string()), args.to_vec(), vec![])
    }

    pub fn array_new(&mut self, dst: Operand, size: Operand) -> InstrId {
        self.emit(InstrKind::ArrayNew, vec![dst, size], vec![])
    }

    pub fn array_load(&mut self, dst: Operand, array: Operand, index: Operand) -> InstrId {
        self.emit(InstrKind::ArrayLoad, vec![dst, array, index], vec![])
    }

    pub fn array_store(&mut self, array: Operand, index: Operand, value: Operand) -> InstrId {
        self.emit(InstrKind::ArrayStore, vec![array, index, value], vec![])
    }

    pub fn load_label(&mut self, dst: Operand, label: &str) -> InstrId {
        self.emit(InstrKind::LoadLabel(label.to_string()), vec![dst], vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_simple_function() {
        let mut b = FuncBuilder::new("f", 1);
        b.new_block();
        let r = b.new_reg();
        b.add(r, b.param(0), b.imm(1));
        b.ret(r);

        let f = b.build();
        f.verify().unwrap();
        assert_eq!(f.num_blocks(), 1);
        assert_eq!(f.num_regs(), 1);
        assert_eq!(f.block_len(f.entry()), 2);
    }

    #[test]
    #[should_panic(expected = "invalid parameter id")]
    fn test_param_out_of_range() {
        let b = FuncBuilder::new("f", 1);
        b.param(1);
    }
}
