//! Optimization passes over TAC-IR.
//!
//! Passes operate on one function at a time and report whether they changed
//! anything; the driver applies them until a fixed point is reached.
//!
//! # Available Passes
//!
//! - **Constant propagation**: forward dataflow over per-register constant
//!   lattices, substituting known-constant uses with immediates
//! - **Copy propagation**: forward dataflow over copy maps, rewriting uses
//!   through `dst = src` assignments
//! - **Common-subexpression elimination**: local (per block) and global
//!   (available-expressions dataflow) reuse of pure binary expressions
//! - **Dead-code elimination**: constant folding, constant-branch collapse,
//!   unreachable-block removal, dummy-instruction removal and backward
//!   liveness driven dead-variable elimination

pub mod const_prop;
pub mod copy_prop;
pub mod cse;
pub mod dce;

use crate::backend::ir::{Function, Module};
use log::debug;

/// Configuration for optimization passes
#[derive(Clone, Debug)]
pub struct OptConfig {
    pub constant_propagation: bool,
    pub copy_propagation: bool,
    pub common_subexpression_elimination: bool,
    pub dead_code_elimination: bool,
    /// Cap on fixed-point iterations (`None` = run to convergence)
    pub max_iterations: Option<usize>,
}

impl OptConfig {
    /// All optimizations enabled, iterated to convergence
    pub fn all() -> Self {
        Self {
            constant_propagation: true,
            copy_propagation: true,
            common_subexpression_elimination: true,
            dead_code_elimination: true,
            max_iterations: None,
        }
    }

    pub fn none() -> Self {
        Self {
            constant_propagation: false,
            copy_propagation: false,
            common_subexpression_elimination: false,
            dead_code_elimination: false,
            max_iterations: None,
        }
    }

    pub fn any_enabled(&self) -> bool {
        self.constant_propagation
            || self.copy_propagation
            || self.common_subexpression_elimination
            || self.dead_code_elimination
    }
}

impl Default for OptConfig {
    fn default() -> Self {
        Self::all()
    }
}

/// Run the enabled passes on one function until none reports a change.
/// Returns the number of full iterations executed.
pub fn optimize_function(func: &mut Function, config: &OptConfig) -> usize {
    if !config.any_enabled() {
        return 0;
    }

    let mut iterations = 0;
    loop {
        let mut changed = false;
        if config.constant_propagation {
            changed |= const_prop::propagate_constants(func);
        }
        if config.copy_propagation {
            changed |= copy_prop::propagate_copies(func);
        }
        if config.common_subexpression_elimination {
            changed |= cse::local_cse(func);
            changed |= cse::global_cse(func);
        }
        if config.dead_code_elimination {
            changed |= dce::eliminate_dead_code(func);
        }

        iterations += 1;
        if !changed {
            break;
        }
        if let Some(max) = config.max_iterations {
            if iterations >= max {
                break;
            }
        }
    }
    debug!(
        "optimized {} to fixed point in {} iteration(s)",
        func.name(),
        iterations
    );
    iterations
}

/// Optimize every function of a module
pub fn optimize_module(module: &mut Module, config: &OptConfig) {
    for func in module.functions_mut() {
        optimize_function(func, config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ir::builder::FuncBuilder;
    use crate::backend::ir::interp::Interpreter;
    use crate::backend::ir::{InstrKind, Operand};

    #[test]
    fn test_opt_config() {
        assert!(OptConfig::all().any_enabled());
        assert!(!OptConfig::none().any_enabled());
    }

    /// `return 1 + 2 * 3` folds down to `ret #7`
    #[test]
    fn test_constant_expression_collapses() {
        let mut b = FuncBuilder::new("main", 0);
        b.new_block();
        let t0 = b.new_reg();
        let t1 = b.new_reg();
        b.mul(t0, b.imm(2), b.imm(3));
        b.add(t1, b.imm(1), t0);
        b.ret(t1);
        let mut f = b.build();

        optimize_function(&mut f, &OptConfig::all());
        f.verify().unwrap();

        let entry = f.entry();
        let instrs = f.instrs(entry);
        assert_eq!(instrs.len(), 1, "{}", f);
        assert_eq!(*f.kind(instrs[0]), InstrKind::Ret);
        assert_eq!(f.get_in(instrs[0], 0), Operand::Immediate(7));
    }

    /// Optimizing a counting loop preserves its observable result
    #[test]
    fn test_loop_preserves_semantics() {
        let build = || {
            let mut b = FuncBuilder::new("main", 0);
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
            let c = b.new_reg();
            b.lt(c, i, b.imm(10));
            b.jnz(c, body, exit);
            b.set_insertion_point(exit);
            b.ret(s);
            b.build()
        };

        let reference = build();
        let mut interp = Interpreter::new();
        interp.add_function(&reference);
        let expected = interp.run("main", &[]).unwrap();
        assert_eq!(expected, 45);

        let mut optimized = build();
        optimize_function(&mut optimized, &OptConfig::all());
        optimized.verify().unwrap();
        let mut interp = Interpreter::new();
        interp.add_function(&optimized);
        assert_eq!(interp.run("main", &[]).unwrap(), expected);
    }

    /// Every pass keeps the IR verifiable and the observable behaviour
    /// unchanged, checked through the interpreter on several inputs
    #[test]
    fn test_each_pass_preserves_semantics() {
        // f(x): mix of constants, copies, a repeated pure expression and a
        // branch, so every pass has something to chew on
        let build = || {
            let mut b = FuncBuilder::new("f", 1);
            let entry = b.new_block();
            let then_b = b.create_block();
            let else_b = b.create_block();
            b.set_insertion_point(entry);
            let k = b.new_reg();
            let copy = b.new_reg();
            let e1 = b.new_reg();
            let e2 = b.new_reg();
            let cond = b.new_reg();
            let dead = b.new_reg();
            b.assign(k, b.imm(20));
            b.assign(copy, k);
            b.add(e1, b.param(0), b.imm(2));
            b.add(e2, b.param(0), b.imm(2));
            b.assign(dead, b.imm(99));
            b.lt(cond, b.param(0), copy);
            b.jnz(cond, then_b, else_b);
            b.set_insertion_point(then_b);
            let t = b.new_reg();
            b.add(t, e1, e2);
            b.ret(t);
            b.set_insertion_point(else_b);
            b.mul(e1, copy, b.imm(3));
            b.ret(e1);
            b.build()
        };

        let args_vectors: &[&[i64]] = &[&[0], &[5], &[19], &[20], &[100]];
        let reference: Vec<i64> = args_vectors
            .iter()
            .map(|args| {
                let f = build();
                let mut interp = Interpreter::new();
                interp.add_function(&f);
                interp.run("f", args).unwrap()
            })
            .collect();

        type Pass = fn(&mut crate::backend::ir::Function) -> bool;
        let passes: [(&str, Pass); 5] = [
            ("const_prop", const_prop::propagate_constants),
            ("copy_prop", copy_prop::propagate_copies),
            ("local_cse", cse::local_cse),
            ("global_cse", cse::global_cse),
            ("dce", dce::eliminate_dead_code),
        ];

        for (name, pass) in passes {
            let mut f = build();
            f.verify().unwrap_or_else(|e| panic!("{}: before: {}", name, e));
            pass(&mut f);
            f.verify().unwrap_or_else(|e| panic!("{}: after: {}", name, e));

            for (args, expected) in args_vectors.iter().zip(&reference) {
                let mut interp = Interpreter::new();
                interp.add_function(&f);
                assert_eq!(
                    interp.run("f", args).unwrap(),
                    *expected,
                    "{} changed behaviour for {:?}\n{}",
                    name,
                    args,
                    f
                );
            }
        }

        // and the same through the whole fixed point
        let mut f = build();
        optimize_function(&mut f, &OptConfig::all());
        f.verify().unwrap();
        for (args, expected) in args_vectors.iter().zip(&reference) {
            let mut interp = Interpreter::new();
            interp.add_function(&f);
            assert_eq!(interp.run("f", args).unwrap(), *expected);
        }
    }

    /// The full pipeline reports no change on an already-optimal function
    #[test]
    fn test_fixed_point_is_stable() {
        let mut b = FuncBuilder::new("id", 1);
        b.new_block();
        b.ret(b.param(0));
        let mut f = b.build();

        let iterations = optimize_function(&mut f, &OptConfig::all());
        assert_eq!(iterations, 1);
    }
}
