//! Generic iterative dataflow solver.
//!
//! A single worklist algorithm parameterised by a lattice value and a
//! direction, shared by the IR optimizer (constant propagation, copy
//! propagation, available expressions, liveness) and the register
//! allocator's machine-level liveness. Graphs plug in through the
//! `ControlFlowGraph` trait; both `ir::Function` and `mir::MachineFunction`
//! implement it.
//!
//! Terminates because every lattice used here has finite height.

use crate::backend::ir;
use crate::backend::mir;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

/// Block-graph view consumed by the solver
pub trait ControlFlowGraph {
    type Block: Copy + Eq + Hash + Ord;
    type Instr: Copy;

    fn post_order(&self) -> Vec<Self::Block>;
    fn block_successors(&self, block: Self::Block) -> Vec<Self::Block>;
    fn block_predecessors(&self, block: Self::Block) -> Vec<Self::Block>;
    /// Instructions of a block in program order
    fn block_instrs(&self, block: Self::Block) -> Vec<Self::Instr>;
}

/// A dataflow lattice value. `meet` is the combination applied across
/// neighbouring blocks (join for forward analyses; the name is uniform).
pub trait Lattice<G: ControlFlowGraph>: Clone + PartialEq {
    fn empty(graph: &G) -> Self;
    fn meet(&mut self, other: &Self);
    fn transfer(&mut self, graph: &G, inst: G::Instr);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Per-block IN and OUT states at the fixed point
pub struct DataflowResult<B, L> {
    pub inputs: HashMap<B, L>,
    pub outputs: HashMap<B, L>,
}

struct WorkList<T> {
    queue: VecDeque<T>,
    entries: HashSet<T>,
}

impl<T: Copy + Eq + Hash> WorkList<T> {
    fn new(seed: impl IntoIterator<Item = T>) -> Self {
        let queue: VecDeque<T> = seed.into_iter().collect();
        let entries = queue.iter().copied().collect();
        Self { queue, entries }
    }

    fn add(&mut self, entry: T) {
        if self.entries.insert(entry) {
            self.queue.push_back(entry);
        }
    }

    fn pop(&mut self) -> Option<T> {
        let entry = self.queue.pop_front()?;
        self.entries.remove(&entry);
        Some(entry)
    }
}

/// Solve an analysis to its fixed point.
///
/// Forward: IN = meet of predecessors' OUT, transfer walks forward.
/// Backward: OUT = meet of successors' IN, transfer walks in reverse.
pub fn analyze<G, L>(graph: &G, direction: Direction) -> DataflowResult<G::Block, L>
where
    G: ControlFlowGraph,
    L: Lattice<G>,
{
    let mut seed = graph.post_order();
    if direction == Direction::Forward {
        seed.reverse();
    }
    let mut worklist = WorkList::new(seed);

    let mut inputs: HashMap<G::Block, L> = HashMap::new();
    let mut outputs: HashMap<G::Block, L> = HashMap::new();

    while let Some(block) = worklist.pop() {
        let mut state = L::empty(graph);
        let bottom = L::empty(graph);

        let incoming = match direction {
            Direction::Forward => graph.block_predecessors(block),
            Direction::Backward => graph.block_successors(block),
        };
        for neighbour in incoming {
            let neighbour_state = match direction {
                Direction::Forward => outputs.get(&neighbour),
                Direction::Backward => inputs.get(&neighbour),
            };
            state.meet(neighbour_state.unwrap_or(&bottom));
        }

        {
            // the state on the side the analysis enters the block from
            let entry_side = match direction {
                Direction::Forward => &mut inputs,
                Direction::Backward => &mut outputs,
            };
            if entry_side.get(&block) == Some(&state) {
                continue;
            }
            entry_side.insert(block, state.clone());
        }

        match direction {
            Direction::Forward => {
                for inst in graph.block_instrs(block) {
                    state.transfer(graph, inst);
                }
            }
            Direction::Backward => {
                for inst in graph.block_instrs(block).into_iter().rev() {
                    state.transfer(graph, inst);
                }
            }
        }

        let exit_side = match direction {
            Direction::Forward => &mut outputs,
            Direction::Backward => &mut inputs,
        };
        if exit_side.get(&block) == Some(&state) {
            continue;
        }
        exit_side.insert(block, state);

        let outgoing = match direction {
            Direction::Forward => graph.block_successors(block),
            Direction::Backward => graph.block_predecessors(block),
        };
        for neighbour in outgoing {
            worklist.add(neighbour);
        }
    }

    DataflowResult { inputs, outputs }
}

impl ControlFlowGraph for ir::Function {
    type Block = ir::Block;
    type Instr = ir::InstrId;

    fn post_order(&self) -> Vec<ir::Block> {
        ir::Function::post_order(self)
    }

    fn block_successors(&self, block: ir::Block) -> Vec<ir::Block> {
        ir::Function::block_successors(self, block)
    }

    fn block_predecessors(&self, block: ir::Block) -> Vec<ir::Block> {
        ir::Function::block_predecessors(self, block)
    }

    fn block_instrs(&self, block: ir::Block) -> Vec<ir::InstrId> {
        self.instrs(block)
    }
}

impl ControlFlowGraph for mir::MachineFunction {
    type Block = mir::MBlock;
    type Instr = mir::MInstrId;

    fn post_order(&self) -> Vec<mir::MBlock> {
        mir::MachineFunction::post_order(self)
    }

    fn block_successors(&self, block: mir::MBlock) -> Vec<mir::MBlock> {
        mir::MachineFunction::block_successors(self, block)
    }

    fn block_predecessors(&self, block: mir::MBlock) -> Vec<mir::MBlock> {
        mir::MachineFunction::block_predecessors(self, block)
    }

    fn block_instrs(&self, block: mir::MBlock) -> Vec<mir::MInstrId> {
        self.instrs(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ir::builder::FuncBuilder;
    use crate::backend::ir::{Function, InstrId};
    use im::OrdSet;

    /// Backward liveness over IR registers, as used by dead-code elimination
    #[derive(Clone, PartialEq)]
    struct Live {
        regs: OrdSet<usize>,
    }

    impl Lattice<Function> for Live {
        fn empty(_graph: &Function) -> Self {
            Live {
                regs: OrdSet::new(),
            }
        }

        fn meet(&mut self, other: &Self) {
            for reg in other.regs.iter() {
                self.regs.insert(*reg);
            }
        }

        fn transfer(&mut self, graph: &Function, inst: InstrId) {
            for i in 0..graph.outs(inst) {
                let op = graph.get_out(inst, i);
                if op.is_register() {
                    self.regs.remove(&op.reg_id());
                }
            }
            for i in 0..graph.ins(inst) {
                let op = graph.get_in(inst, i);
                if op.is_register() {
                    self.regs.insert(op.reg_id());
                }
            }
        }
    }

    #[test]
    fn test_liveness_across_loop() {
        // entry: %s = 0; %i = 0; jmp body
        // body:  %s = %s + %i; %i = %i + 1; %c = %i < 10; jnz %c body exit
        // exit:  ret %s
        let mut b = FuncBuilder::new("sum", 0);
        let entry = b.new_block();
        let body = b.create_block();
        let exit = b.create_block();
        let i = b.new_reg();
        let s = b.new_reg();
        let c = b.new_reg();
        b.set_insertion_point(entry);
        b.assign(s, b.imm(0));
        b.assign(i, b.imm(0));
        b.jmp(body);
        b.set_insertion_point(body);
        b.add(s, s, i);
        b.add(i, i, b.imm(1));
        b.lt(c, i, b.imm(10));
        b.jnz(c, body, exit);
        b.set_insertion_point(exit);
        b.ret(s);
        let f = b.build();

        let result = analyze::<_, Live>(&f, Direction::Backward);

        // both %i and %s are live around the back edge
        let body_in = &result.inputs[&body];
        assert!(body_in.regs.contains(&i.reg_id()));
        assert!(body_in.regs.contains(&s.reg_id()));
        // only %s survives into the exit block
        let exit_in = &result.inputs[&exit];
        assert!(exit_in.regs.contains(&s.reg_id()));
        assert!(!exit_in.regs.contains(&i.reg_id()));
        // nothing is live before the entry assignments
        let entry_in = &result.inputs[&entry];
        assert!(entry_in.regs.is_empty());
    }

    #[test]
    fn test_forward_reaches_fixed_point() {
        // A forward "defined registers" analysis over a diamond
        #[derive(Clone, PartialEq)]
        struct Defined {
            regs: OrdSet<usize>,
        }

        impl Lattice<Function> for Defined {
            fn empty(_graph: &Function) -> Self {
                Defined {
                    regs: OrdSet::new(),
                }
            }
            fn meet(&mut self, other: &Self) {
                for reg in other.regs.iter() {
                    self.regs.insert(*reg);
                }
            }
            fn transfer(&mut self, graph: &Function, inst: InstrId) {
                for i in 0..graph.outs(inst) {
                    let op = graph.get_out(inst, i);
                    if op.is_register() {
                        self.regs.insert(op.reg_id());
                    }
                }
            }
        }

        let mut b = FuncBuilder::new("d", 0);
        let entry = b.new_block();
        let then_b = b.create_block();
        let else_b = b.create_block();
        let join = b.create_block();
        let c = b.new_reg();
        let x = b.new_reg();
        b.set_insertion_point(entry);
        b.assign(c, b.imm(1));
        b.jnz(c, then_b, else_b);
        b.set_insertion_point(then_b);
        b.assign(x, b.imm(1));
        b.jmp(join);
        b.set_insertion_point(else_b);
        b.assign(x, b.imm(2));
        b.jmp(join);
        b.set_insertion_point(join);
        b.ret(x);
        let f = b.build();

        let result = analyze::<_, Defined>(&f, Direction::Forward);
        let join_in = &result.inputs[&join];
        assert!(join_in.regs.contains(&c.reg_id()));
        assert!(join_in.regs.contains(&x.reg_id()));

        let entry_in = &result.inputs[&entry];
        assert!(entry_in.regs.is_empty());

        for block in [entry, then_b, else_b, join] {
            assert!(result.outputs.contains_key(&block));
        }
    }
}
