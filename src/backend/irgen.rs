//! AST to TAC-IR translation.
//!
//! Each source function becomes an IR function: locals map to fresh virtual
//! registers (zero-initialised at the entry head, in declaration order),
//! parameters stay `Parameter` operands, string literals are interned
//! module-wide into `__str<N>` labels. Control flow builds on `Jnz`/`Jmp`
//! with join blocks created before the branch bodies; the loop construct
//! runs its body first and tests the condition at the loop tail.

use crate::backend::ir::builder::FuncBuilder;
use crate::backend::ir::{self, BinaryOp, Block, Operand};
use crate::common::ast::{self, BinOp, Expr, Stmt};
use crate::common::span::Spanned;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Module-wide string-literal interning table: literal text to `__str<N>`
/// label. Append-only; emitted as the `.data` section.
#[derive(Default)]
pub struct StringTable {
    literals: BTreeMap<String, String>,
}

impl StringTable {
    pub fn new() -> Self {
        Self {
            literals: BTreeMap::new(),
        }
    }

    /// Label for a literal, minting `__str<N>` on first sight
    pub fn intern(&mut self, literal: &str) -> String {
        if let Some(label) = self.literals.get(literal) {
            return label.clone();
        }
        let label = format!("__str{}", self.literals.len());
        self.literals.insert(literal.to_string(), label.clone());
        label
    }

    pub fn is_empty(&self) -> bool {
        self.literals.is_empty()
    }

    /// Append the `.data` entries: each literal as a zero-terminated run of
    /// decimal bytes
    pub fn emit(&self, out: &mut String) {
        for (literal, label) in &self.literals {
            let _ = writeln!(out, "{}:", label);
            out.push_str(".byte ");
            for byte in literal.bytes() {
                let _ = write!(out, "{}, ", byte);
            }
            out.push_str("0\n");
        }
    }
}

/// Translate a checked AST module into TAC-IR
pub fn generate_module(ast: &ast::Module) -> (ir::Module, StringTable) {
    let mut strings = StringTable::new();
    let mut module = ir::Module::new("<main>");
    for func in &ast.functions {
        module.add_function(generate_function(&mut strings, func));
    }
    (module, strings)
}

fn generate_function(strings: &mut StringTable, func: &ast::Function) -> ir::Function {
    let mut gen = FuncGen {
        builder: FuncBuilder::new(func.name, func.params.len()),
        ast_func: func,
        strings,
        variables: BTreeMap::new(),
    };
    gen.init_variables();
    gen.generate_block(&func.body);

    let mut built = gen.builder.build();

    // zero-initialise locals ahead of the first real instruction
    let entry = built.entry();
    if let Some(first) = built.head(entry) {
        for (name, _) in &func.vars {
            let var = gen.variables[*name];
            let init = built.add_instr(
                ir::InstrKind::Assign,
                vec![var, Operand::Immediate(0)],
                vec![],
            );
            built.insert_before(init, first);
        }
    }
    built
}

struct FuncGen<'a, 'src> {
    builder: FuncBuilder,
    ast_func: &'a ast::Function<'src>,
    strings: &'a mut StringTable,
    variables: BTreeMap<&'src str, Operand>,
}

impl<'a, 'src> FuncGen<'a, 'src> {
    fn init_variables(&mut self) {
        let ast_func = self.ast_func;
        for (name, _) in &ast_func.vars {
            let reg = self.builder.new_reg();
            self.variables.insert(*name, reg);
        }
    }

    fn variable(&self, name: &str) -> Operand {
        if let Some(op) = self.variables.get(name) {
            return *op;
        }
        let idx = self
            .ast_func
            .params
            .iter()
            .position(|(param, _)| *param == name)
            .expect("variable resolved by semantic checks");
        Operand::Parameter(idx)
    }

    /// Generate a statement list into a fresh block; returns that block.
    /// The insertion point ends wherever the last statement left it.
    fn generate_block(&mut self, stmts: &[Spanned<Stmt<'src>>]) -> Block {
        let block = self.builder.new_block();
        for stmt in stmts {
            self.generate_statement(&stmt.0);
        }
        block
    }

    fn generate_statement(&mut self, stmt: &Stmt<'src>) {
        match stmt {
            Stmt::Assign { lhs, rhs } => {
                let value = self.generate_expr(&rhs.0);
                match &lhs.0 {
                    Expr::Var(name) => {
                        let dst = self.variable(name);
                        self.builder.assign(dst, value);
                    }
                    Expr::Index { name, index } => {
                        let array = self.variable(name);
                        let index = self.generate_expr(&index.0);
                        self.builder.array_store(array, index, value);
                    }
                    _ => unreachable!("assignment target checked by sema"),
                }
            }

            Stmt::If { cond, then_body } => {
                let next = self.builder.create_block();
                let cond = self.generate_expr(&cond.0);
                let current = self.builder.current();

                let then_block = self.generate_block(then_body);
                if !ends_with_return(then_body) {
                    self.builder.jmp(next);
                }
                self.builder.set_insertion_point(current);
                self.builder.jnz(cond, then_block, next);
                self.builder.set_insertion_point(next);
            }

            Stmt::IfElse {
                cond,
                then_body,
                else_body,
            } => {
                let next = self.builder.create_block();
                let cond = self.generate_expr(&cond.0);
                let current = self.builder.current();

                let then_block = self.generate_block(then_body);
                if !ends_with_return(then_body) {
                    self.builder.jmp(next);
                }
                let else_block = self.generate_block(else_body);
                if !ends_with_return(else_body) {
                    self.builder.jmp(next);
                }
                self.builder.set_insertion_point(current);
                self.builder.jnz(cond, then_block, else_block);
                self.builder.set_insertion_point(next);
            }

            Stmt::While { cond, body } => {
                let current = self.builder.current();
                let next = self.builder.create_block();

                // body first; the condition sits at the loop tail
                let loop_block = self.generate_block(body);
                let cond = self.generate_expr(&cond.0);
                self.builder.jnz(cond, loop_block, next);

                self.builder.set_insertion_point(current);
                self.builder.jmp(loop_block);
                self.builder.set_insertion_point(next);
            }

            Stmt::Return(Some(value)) => {
                let value = self.generate_expr(&value.0);
                self.builder.ret(value);
            }
            Stmt::Return(None) => {
                self.builder.ret_void();
            }

            Stmt::Call(call) => {
                self.generate_call(&call.0, true);
            }
        }
    }

    fn generate_expr(&mut self, expr: &Expr<'src>) -> Operand {
        match expr {
            Expr::Int(value) => self.builder.imm(*value),

            Expr::Str(text) => {
                let label = self.strings.intern(text);
                let dst = self.builder.new_reg();
                self.builder.load_label(dst, &label);
                dst
            }

            Expr::Var(name) => self.variable(name),

            Expr::Index { name, index } => {
                let array = self.variable(name);
                let index = self.generate_expr(&index.0);
                let dst = self.builder.new_reg();
                self.builder.array_load(dst, array, index);
                dst
            }

            Expr::Call { .. } => self.generate_call(expr, false),

            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.generate_expr(&lhs.0);
                let rhs = self.generate_expr(&rhs.0);
                let dst = self.builder.new_reg();
                self.builder.binary(lower_binop(*op), dst, lhs, rhs);
                dst
            }
        }
    }

    fn generate_call(&mut self, expr: &Expr<'src>, void_context: bool) -> Operand {
        let Expr::Call { name, args } = expr else {
            unreachable!("call statement checked by sema");
        };
        let args: Vec<Operand> = args.iter().map(|arg| self.generate_expr(&arg.0)).collect();
        let dst = self.builder.new_reg();
        if void_context {
            self.builder.call_void(name, &args);
        } else {
            self.builder.call(name, dst, &args);
        }
        dst
    }
}

fn ends_with_return(stmts: &[Spanned<Stmt>]) -> bool {
    matches!(stmts.last(), Some((Stmt::Return(_), _)))
}

fn lower_binop(op: BinOp) -> BinaryOp {
    match op {
        BinOp::Add => BinaryOp::Add,
        BinOp::Sub => BinaryOp::Sub,
        BinOp::Mul => BinaryOp::Mul,
        BinOp::Div => BinaryOp::Div,
        BinOp::And => BinaryOp::And,
        BinOp::Or => BinaryOp::Or,
        BinOp::Xor => BinaryOp::Xor,
        BinOp::Lt => BinaryOp::Lt,
        BinOp::Le => BinaryOp::Le,
        BinOp::Gt => BinaryOp::Gt,
        BinOp::Ge => BinaryOp::Ge,
        BinOp::Eq => BinaryOp::Eq,
        BinOp::Ne => BinaryOp::Ne,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ir::interp::Interpreter;
    use crate::common::ast::Type;
    use crate::common::span::Span;

    fn sp<T>(value: T) -> Spanned<T> {
        (value, Span::from(0..0))
    }

    fn int(value: i64) -> Spanned<Expr<'static>> {
        sp(Expr::Int(value))
    }

    fn var(name: &'static str) -> Spanned<Expr<'static>> {
        sp(Expr::Var(name))
    }

    fn binary(
        op: BinOp,
        lhs: Spanned<Expr<'static>>,
        rhs: Spanned<Expr<'static>>,
    ) -> Spanned<Expr<'static>> {
        sp(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    #[test]
    fn test_straight_line_function() {
        // function main() -> int { return 1 + 2 * 3; }
        let module = ast::Module::new(vec![ast::Function {
            name: "main",
            return_type: Type::Int,
            params: vec![],
            vars: vec![],
            body: vec![sp(Stmt::Return(Some(binary(
                BinOp::Add,
                int(1),
                binary(BinOp::Mul, int(2), int(3)),
            ))))],
        }]);

        let (ir_module, strings) = generate_module(&module);
        assert!(strings.is_empty());
        let func = ir_module.function("main").unwrap();
        func.verify().unwrap();

        let mut interp = Interpreter::new();
        interp.add_function(func);
        assert_eq!(interp.run("main", &[]).unwrap(), 7);
    }

    #[test]
    fn test_locals_are_zero_initialised() {
        // function main() -> int { var x:int; return x; }
        let module = ast::Module::new(vec![ast::Function {
            name: "main",
            return_type: Type::Int,
            params: vec![],
            vars: vec![("x", Type::Int)],
            body: vec![sp(Stmt::Return(Some(var("x"))))],
        }]);

        let (ir_module, _) = generate_module(&module);
        let func = ir_module.function("main").unwrap();
        func.verify().unwrap();

        let mut interp = Interpreter::new();
        interp.add_function(func);
        assert_eq!(interp.run("main", &[]).unwrap(), 0);
    }

    #[test]
    fn test_while_loop_sums() {
        // var i, s; i = 0; s = 0; while (i < 10) { s = s + i; i = i + 1; }
        // return s;  (scenario S2)
        let body = vec![
            sp(Stmt::Assign {
                lhs: var("i"),
                rhs: int(0),
            }),
            sp(Stmt::Assign {
                lhs: var("s"),
                rhs: int(0),
            }),
            sp(Stmt::While {
                cond: binary(BinOp::Lt, var("i"), int(10)),
                body: vec![
                    sp(Stmt::Assign {
                        lhs: var("s"),
                        rhs: binary(BinOp::Add, var("s"), var("i")),
                    }),
                    sp(Stmt::Assign {
                        lhs: var("i"),
                        rhs: binary(BinOp::Add, var("i"), int(1)),
                    }),
                ],
            }),
            sp(Stmt::Return(Some(var("s")))),
        ];
        let module = ast::Module::new(vec![ast::Function {
            name: "main",
            return_type: Type::Int,
            params: vec![],
            vars: vec![("i", Type::Int), ("s", Type::Int)],
            body,
        }]);

        let (ir_module, _) = generate_module(&module);
        let func = ir_module.function("main").unwrap();
        func.verify().unwrap();

        let mut interp = Interpreter::new();
        interp.add_function(func);
        assert_eq!(interp.run("main", &[]).unwrap(), 45);
    }

    #[test]
    fn test_string_literals_are_interned_once() {
        let body = vec![
            sp(Stmt::Call(sp(Expr::Call {
                name: "prints",
                args: vec![sp(Expr::Str("hello".to_string()))],
            }))),
            sp(Stmt::Call(sp(Expr::Call {
                name: "prints",
                args: vec![sp(Expr::Str("hello".to_string()))],
            }))),
            sp(Stmt::Return(Some(int(0)))),
        ];
        let module = ast::Module::new(vec![ast::Function {
            name: "main",
            return_type: Type::Int,
            params: vec![],
            vars: vec![],
            body,
        }]);

        let (_, mut strings) = generate_module(&module);
        assert_eq!(strings.intern("hello"), "__str0");
        assert_eq!(strings.intern("world"), "__str1");
    }

    #[test]
    fn test_branches_join() {
        // function f(x:int) -> int {
        //   var r:int;
        //   if x < 10 { r = 1; } else { r = 2; }
        //   return r; }
        let body = vec![
            sp(Stmt::IfElse {
                cond: binary(BinOp::Lt, var("x"), int(10)),
                then_body: vec![sp(Stmt::Assign {
                    lhs: var("r"),
                    rhs: int(1),
                })],
                else_body: vec![sp(Stmt::Assign {
                    lhs: var("r"),
                    rhs: int(2),
                })],
            }),
            sp(Stmt::Return(Some(var("r")))),
        ];
        let module = ast::Module::new(vec![ast::Function {
            name: "f",
            return_type: Type::Int,
            params: vec![("x", Type::Int)],
            vars: vec![("r", Type::Int)],
            body,
        }]);

        let (ir_module, _) = generate_module(&module);
        let func = ir_module.function("f").unwrap();
        func.verify().unwrap();

        let mut interp = Interpreter::new();
        interp.add_function(func);
        assert_eq!(interp.run("f", &[5]).unwrap(), 1);
        assert_eq!(interp.run("f", &[50]).unwrap(), 2);
    }
}
