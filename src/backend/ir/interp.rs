//! TAC-IR interpreter.
//!
//! Executes IR functions directly, with native functions registered as
//! closures. Used by the optimizer test suite to check that passes preserve
//! semantics, and handy for debugging fixtures. Arrays are handles into an
//! append-only table, matching the runtime's opaque-pointer behaviour.

use crate::backend::ir::{Function, InstrKind, Operand};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("unknown function {0}")]
    UnknownFunction(String),
    #[error("read of register %{0} before definition")]
    UnknownRegister(usize),
    #[error("no such array {0}")]
    NoSuchArray(i64),
    #[error("array index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: i64, len: usize },
    #[error("arithmetic trap")]
    ArithmeticTrap,
}

type NativeFn<'a> = Box<dyn FnMut(&[i64]) -> i64 + 'a>;

#[derive(Default)]
pub struct Interpreter<'a> {
    funcs: HashMap<String, &'a Function>,
    natives: HashMap<String, NativeFn<'a>>,
    arrays: Vec<Vec<i64>>,
}

impl<'a> Interpreter<'a> {
    pub fn new() -> Self {
        Self {
            funcs: HashMap::new(),
            natives: HashMap::new(),
            arrays: Vec::new(),
        }
    }

    pub fn add_function(&mut self, func: &'a Function) {
        self.funcs.insert(func.name().to_string(), func);
    }

    pub fn add_native(&mut self, name: &str, f: impl FnMut(&[i64]) -> i64 + 'a) {
        self.natives.insert(name.to_string(), Box::new(f));
    }

    pub fn run(&mut self, name: &str, args: &[i64]) -> Result<i64, EvalError> {
        if let Some(func) = self.funcs.get(name).copied() {
            return self.execute(func, args);
        }
        if let Some(native) = self.natives.get_mut(name) {
            return Ok(native(args));
        }
        Err(EvalError::UnknownFunction(name.to_string()))
    }

    fn execute(&mut self, func: &'a Function, args: &[i64]) -> Result<i64, EvalError> {
        // Each activation gets its own register frame so recursive calls do
        // not clobber the caller's registers.
        let mut regs: HashMap<usize, i64> = HashMap::new();

        let load = |regs: &HashMap<usize, i64>, op: Operand| -> Result<i64, EvalError> {
            match op {
                Operand::Immediate(v) => Ok(v),
                Operand::Register(id) => {
                    regs.get(&id).copied().ok_or(EvalError::UnknownRegister(id))
                }
                Operand::Parameter(idx) => Ok(args[idx]),
            }
        };

        let mut current = func.entry();
        'blocks: loop {
            for inst in func.instrs(current) {
                match func.kind(inst).clone() {
                    InstrKind::Nop => {}
                    InstrKind::Assign => {
                        let value = load(&regs, func.get_in(inst, 0))?;
                        regs.insert(func.get_out(inst, 0).reg_id(), value);
                    }
                    InstrKind::Binary(op) => {
                        let lhs = load(&regs, func.get_in(inst, 0))?;
                        let rhs = load(&regs, func.get_in(inst, 1))?;
                        let result = op.evaluate(lhs, rhs).ok_or(EvalError::ArithmeticTrap)?;
                        regs.insert(func.get_out(inst, 0).reg_id(), result);
                    }

                    InstrKind::Ret => {
                        return load(&regs, func.get_in(inst, 0));
                    }
                    InstrKind::RetVoid => {
                        return Ok(0);
                    }
                    InstrKind::Jmp => {
                        current = func.successors(inst)[0];
                        continue 'blocks;
                    }
                    InstrKind::Jnz => {
                        let cond = load(&regs, func.get_in(inst, 0))?;
                        let succs = func.successors(inst);
                        current = if cond != 0 { succs[0] } else { succs[1] };
                        continue 'blocks;
                    }

                    InstrKind::Call(callee) => {
                        let mut call_args = Vec::with_capacity(func.ins(inst));
                        for i in 0..func.ins(inst) {
                            call_args.push(load(&regs, func.get_in(inst, i))?);
                        }
                        let result = self.run(&callee, &call_args)?;
                        regs.insert(func.get_out(inst, 0).reg_id(), result);
                    }
                    InstrKind::CallVoid(callee) => {
                        let mut call_args = Vec::with_capacity(func.ins(inst));
                        for i in 0..func.ins(inst) {
                            call_args.push(load(&regs, func.get_in(inst, i))?);
                        }
                        self.run(&callee, &call_args)?;
                    }

                    InstrKind::ArrayNew => {
                        let len = load(&regs, func.get_in(inst, 0))?;
                        let handle = self.arrays.len() as i64;
                        self.arrays.push(vec![0; len.max(0) as usize]);
                        regs.insert(func.get_out(inst, 0).reg_id(), handle);
                    }
                    InstrKind::ArrayLoad => {
                        let array = load(&regs, func.get_in(inst, 0))?;
                        let index = load(&regs, func.get_in(inst, 1))?;
                        let data = self
                            .arrays
                            .get(array as usize)
                            .ok_or(EvalError::NoSuchArray(array))?;
                        if index < 0 || index as usize >= data.len() {
                            return Err(EvalError::IndexOutOfBounds {
                                index,
                                len: data.len(),
                            });
                        }
                        let value = data[index as usize];
                        regs.insert(func.get_out(inst, 0).reg_id(), value);
                    }
                    InstrKind::ArrayStore => {
                        let array = load(&regs, func.get_in(inst, 0))?;
                        let index = load(&regs, func.get_in(inst, 1))?;
                        let value = load(&regs, func.get_in(inst, 2))?;
                        let data = self
                            .arrays
                            .get_mut(array as usize)
                            .ok_or(EvalError::NoSuchArray(array))?;
                        if index < 0 || index as usize >= data.len() {
                            return Err(EvalError::IndexOutOfBounds {
                                index,
                                len: data.len(),
                            });
                        }
                        data[index as usize] = value;
                    }

                    InstrKind::LoadLabel(_) => {
                        // Data labels have no interpretable address; the
                        // register holds a dummy handle.
                        regs.insert(func.get_out(inst, 0).reg_id(), 0);
                    }
                }
            }
            unreachable!("fell off the end of a basic block");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ir::builder::FuncBuilder;
    use crate::backend::ir::BinaryOp;
    use std::cell::RefCell;

    #[test]
    fn test_straight_line() {
        let mut b = FuncBuilder::new("f", 0);
        b.new_block();
        let r = b.new_reg();
        b.add(r, b.imm(40), b.imm(2));
        b.ret(r);
        let f = b.build();

        let mut interp = Interpreter::new();
        interp.add_function(&f);
        assert_eq!(interp.run("f", &[]).unwrap(), 42);
    }

    #[test]
    fn test_parameters_and_branches() {
        // f(x) = x < 10 ? 1 : 2
        let mut b = FuncBuilder::new("f", 1);
        let entry = b.new_block();
        let then_b = b.create_block();
        let else_b = b.create_block();
        b.set_insertion_point(entry);
        let cond = b.new_reg();
        b.lt(cond, b.param(0), b.imm(10));
        b.jnz(cond, then_b, else_b);
        b.set_insertion_point(then_b);
        b.ret(b.imm(1));
        b.set_insertion_point(else_b);
        b.ret(b.imm(2));
        let f = b.build();

        let mut interp = Interpreter::new();
        interp.add_function(&f);
        assert_eq!(interp.run("f", &[5]).unwrap(), 1);
        assert_eq!(interp.run("f", &[15]).unwrap(), 2);
    }

    #[test]
    fn test_loop_sum() {
        // s = 0; i = 0; do { s += i; i += 1 } while (i < 10); return s
        let mut b = FuncBuilder::new("sum", 0);
        let entry = b.new_block();
        let exit = b.create_block();
        let body = b.create_block();
        let i = b.new_reg();
        let s = b.new_reg();
        b.set_insertion_point(entry);
        b.assign(i, b.imm(0));
        b.assign(s, b.imm(0));
        b.jmp(body);
        b.set_insertion_point(body);
        b.add(s, s, i);
        b.add(i, i, b.imm(1));
        let cond = b.new_reg();
        b.lt(cond, i, b.imm(10));
        b.jnz(cond, body, exit);
        b.set_insertion_point(exit);
        b.ret(s);
        let f = b.build();

        let mut interp = Interpreter::new();
        interp.add_function(&f);
        assert_eq!(interp.run("sum", &[]).unwrap(), 45);
    }

    #[test]
    fn test_recursion() {
        // fib(n) = n < 2 ? n : fib(n-1) + fib(n-2)
        let mut b = FuncBuilder::new("fib", 1);
        let entry = b.new_block();
        let base = b.create_block();
        let rec = b.create_block();
        b.set_insertion_point(entry);
        let cond = b.new_reg();
        b.lt(cond, b.param(0), b.imm(2));
        b.jnz(cond, base, rec);
        b.set_insertion_point(base);
        b.ret(b.param(0));
        b.set_insertion_point(rec);
        let n1 = b.new_reg();
        let n2 = b.new_reg();
        let f1 = b.new_reg();
        let f2 = b.new_reg();
        let result = b.new_reg();
        b.sub(n1, b.param(0), b.imm(1));
        b.sub(n2, b.param(0), b.imm(2));
        b.call("fib", f1, &[n1]);
        b.call("fib", f2, &[n2]);
        b.add(result, f1, f2);
        b.ret(result);
        let f = b.build();
        f.verify().unwrap();

        let mut interp = Interpreter::new();
        interp.add_function(&f);
        assert_eq!(interp.run("fib", &[10]).unwrap(), 55);
    }

    #[test]
    fn test_arrays_and_natives() {
        let printed = RefCell::new(Vec::new());

        let mut b = FuncBuilder::new("f", 0);
        b.new_block();
        let arr = b.new_reg();
        let v = b.new_reg();
        b.array_new(arr, b.imm(3));
        b.array_store(arr, b.imm(0), b.imm(10));
        b.array_store(arr, b.imm(1), b.imm(20));
        b.array_load(v, arr, b.imm(1));
        b.call_void("printi", &[v]);
        b.ret(v);
        let f = b.build();

        let mut interp = Interpreter::new();
        interp.add_function(&f);
        interp.add_native("printi", |args| {
            printed.borrow_mut().push(args[0]);
            0
        });
        assert_eq!(interp.run("f", &[]).unwrap(), 20);
        assert_eq!(*printed.borrow(), vec![20]);
    }

    #[test]
    fn test_division_by_zero_traps() {
        let mut b = FuncBuilder::new("f", 1);
        b.new_block();
        let r = b.new_reg();
        b.binary(BinaryOp::Div, r, b.imm(1), b.param(0));
        b.ret(r);
        let f = b.build();

        let mut interp = Interpreter::new();
        interp.add_function(&f);
        assert_eq!(interp.run("f", &[2]).unwrap(), 0);
        assert!(matches!(
            interp.run("f", &[0]),
            Err(EvalError::ArithmeticTrap)
        ));
    }
}
