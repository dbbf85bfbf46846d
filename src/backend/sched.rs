//! List scheduler over machine basic blocks.
//!
//! Per block: build a precedence graph from register and flags
//! dependencies, treat side-effectful instructions as barriers nothing may
//! cross, then run forward list scheduling with a ready queue prioritised
//! by estimated latency. The flags are a single logical resource written by
//! arithmetic, `Cmp` and `Test` and read by `CMov` (`Jcc` is already a
//! barrier); writers are ordered against the previous writer and its
//! readers, so a `Cmp`'s consumer always sees the right flags.
//!
//! The scheduled order is a topological order of the graph: whenever `B`
//! depends on `A`, `A` still precedes `B`.

use crate::backend::mir::{MBlock, MachineFunction, MachineInstKind, MInstrId, MReg};
use log::debug;
use std::collections::{BinaryHeap, BTreeMap, BTreeSet, HashMap};

/// Static latency estimate in cycles
fn latency(kind: &MachineInstKind) -> i32 {
    match kind {
        MachineInstKind::Mov | MachineInstKind::CMov(_) => 4,
        MachineInstKind::Or
        | MachineInstKind::And
        | MachineInstKind::Xor
        | MachineInstKind::Test => 2,
        MachineInstKind::Add | MachineInstKind::Sub | MachineInstKind::Cmp => 3,
        MachineInstKind::IMul => 5,
        MachineInstKind::Call(_)
        | MachineInstKind::Ret
        | MachineInstKind::Jmp
        | MachineInstKind::Jcc(_)
        | MachineInstKind::IDiv => 8,
        MachineInstKind::Push
        | MachineInstKind::Pop
        | MachineInstKind::Lea(_)
        | MachineInstKind::Cqo => 1,
    }
}

/// One register-or-flags resource
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Resource {
    Virt(usize),
    Phys(MReg),
    Flags,
}

/// Precedence graph over the instructions of one block. Node ids are the
/// original program-order positions; every edge points forward.
struct PrecedenceGraph {
    preds: Vec<BTreeSet<usize>>,
    succs: Vec<BTreeSet<usize>>,

    last_def: BTreeMap<Resource, usize>,
    readers: BTreeMap<Resource, Vec<usize>>,
}

impl PrecedenceGraph {
    fn new(len: usize) -> Self {
        Self {
            preds: vec![BTreeSet::new(); len],
            succs: vec![BTreeSet::new(); len],
            last_def: BTreeMap::new(),
            readers: BTreeMap::new(),
        }
    }

    fn add_edge(&mut self, from: usize, to: usize) {
        if from != to {
            self.succs[from].insert(to);
            self.preds[to].insert(from);
        }
    }

    fn read(&mut self, node: usize, res: Resource) {
        if let Some(&def) = self.last_def.get(&res) {
            self.add_edge(def, node);
        }
        self.readers.entry(res).or_default().push(node);
    }

    fn write(&mut self, node: usize, res: Resource) {
        if let Some(&def) = self.last_def.get(&res) {
            self.add_edge(def, node);
        }
        if let Some(readers) = self.readers.remove(&res) {
            for reader in readers {
                self.add_edge(reader, node);
            }
        }
        self.last_def.insert(res, node);
    }

    fn operand_resource(mf: &MachineFunction, inst: MInstrId, idx: usize) -> Option<Resource> {
        let op = mf.operand(inst, idx);
        if let Some(id) = op.virt_id() {
            return Some(Resource::Virt(id));
        }
        if op.is_machine_register() {
            if let crate::backend::mir::MachineOperand::Reg(reg) = op {
                return Some(Resource::Phys(reg));
            }
        }
        None
    }

    fn add_reads(&mut self, mf: &MachineFunction, inst: MInstrId, node: usize, idxs: &[usize]) {
        for &idx in idxs {
            if let Some(res) = Self::operand_resource(mf, inst, idx) {
                self.read(node, res);
            }
        }
    }

    fn add_writes(&mut self, mf: &MachineFunction, inst: MInstrId, node: usize, idxs: &[usize]) {
        for &idx in idxs {
            if let Some(res) = Self::operand_resource(mf, inst, idx) {
                self.write(node, res);
            }
        }
    }

    /// Record one instruction's dependencies and resource updates
    fn visit(&mut self, mf: &MachineFunction, inst: MInstrId, node: usize) {
        match mf.kind(inst) {
            MachineInstKind::Mov => {
                self.add_reads(mf, inst, node, &[0]);
                self.add_writes(mf, inst, node, &[1]);
            }
            MachineInstKind::CMov(_) => {
                // a cmov leaves its destination alone when the condition
                // fails, so the old value is an input
                self.add_reads(mf, inst, node, &[0, 1]);
                self.read(node, Resource::Flags);
                self.add_writes(mf, inst, node, &[1]);
            }
            MachineInstKind::Add
            | MachineInstKind::Sub
            | MachineInstKind::IMul
            | MachineInstKind::Or
            | MachineInstKind::And
            | MachineInstKind::Xor => {
                self.add_reads(mf, inst, node, &[0, 1]);
                self.add_writes(mf, inst, node, &[1]);
                self.write(node, Resource::Flags);
            }
            MachineInstKind::Cmp | MachineInstKind::Test => {
                self.add_reads(mf, inst, node, &[0, 1]);
                self.write(node, Resource::Flags);
            }
            MachineInstKind::IDiv => {
                self.add_reads(mf, inst, node, &[0]);
                self.read(node, Resource::Phys(MReg::Rax));
                self.read(node, Resource::Phys(MReg::Rdx));
                self.write(node, Resource::Phys(MReg::Rax));
                self.write(node, Resource::Phys(MReg::Rdx));
                self.write(node, Resource::Flags);
            }
            MachineInstKind::Cqo => {
                self.read(node, Resource::Phys(MReg::Rax));
                self.write(node, Resource::Phys(MReg::Rdx));
            }
            MachineInstKind::Push => {
                self.add_reads(mf, inst, node, &[0]);
            }
            MachineInstKind::Pop => {
                self.add_writes(mf, inst, node, &[0]);
            }
            MachineInstKind::Lea(_) => {
                self.add_writes(mf, inst, node, &[0]);
            }
            MachineInstKind::Call(_) => {
                // the callee may clobber anything
                self.last_def.clear();
                self.readers.clear();
                self.write(node, Resource::Phys(MReg::Rax));
            }
            MachineInstKind::Ret | MachineInstKind::Jmp | MachineInstKind::Jcc(_) => {}
        }
    }

    fn build(mf: &MachineFunction, instrs: &[MInstrId]) -> Self {
        let mut graph = Self::new(instrs.len());
        let mut barriers = Vec::new();

        for (node, &inst) in instrs.iter().enumerate() {
            if mf.kind(inst).is_barrier() {
                barriers.push(node);
            }
            graph.visit(mf, inst, node);
        }

        // nothing moves across a barrier in either direction
        for barrier in barriers {
            for node in 0..instrs.len() {
                if node < barrier {
                    graph.add_edge(node, barrier);
                } else if node > barrier {
                    graph.add_edge(barrier, node);
                }
            }
        }
        graph
    }
}

fn schedule_block(mf: &mut MachineFunction, block: MBlock) {
    let instrs = mf.instrs(block);
    if instrs.len() <= 1 {
        return;
    }

    let graph = PrecedenceGraph::build(mf, &instrs);
    let n = instrs.len();

    // ready queue keyed by descending latency, ties by insertion order
    let mut ready: BinaryHeap<(i32, std::cmp::Reverse<usize>, usize)> = BinaryHeap::new();
    let mut seq = 0usize;
    let mut remaining: Vec<usize> = graph.preds.iter().map(|p| p.len()).collect();
    for node in 0..n {
        if remaining[node] == 0 {
            ready.push((latency(mf.kind(instrs[node])), std::cmp::Reverse(seq), node));
            seq += 1;
        }
    }

    let mut active: Vec<usize> = Vec::new();
    let mut start: HashMap<usize, i32> = HashMap::new();
    let mut scheduled: Vec<usize> = Vec::with_capacity(n);
    let mut cycle = 1;

    while !ready.is_empty() || !active.is_empty() {
        if let Some((_, _, node)) = ready.pop() {
            start.insert(node, cycle);
            active.push(node);
        }

        cycle += 1;
        let mut still_active = Vec::with_capacity(active.len());
        for node in active {
            if start[&node] + latency(mf.kind(instrs[node])) <= cycle {
                // op completed; successors whose inputs are all scheduled
                // become ready
                scheduled.push(node);
                for &succ in &graph.succs[node] {
                    remaining[succ] -= 1;
                    if remaining[succ] == 0 {
                        ready.push((
                            latency(mf.kind(instrs[succ])),
                            std::cmp::Reverse(seq),
                            succ,
                        ));
                        seq += 1;
                    }
                }
            } else {
                still_active.push(node);
            }
        }
        active = still_active;
    }
    assert_eq!(scheduled.len(), n, "scheduler dropped instructions");

    if scheduled.iter().enumerate().any(|(i, &node)| i != node) {
        debug!(
            "reordered {} instructions in {}",
            n,
            mf.block_name(block)
        );
    }

    // rewrite the block in scheduled order
    for &node in &scheduled {
        mf.remove_instr(instrs[node]);
    }
    for &node in &scheduled {
        mf.append(block, instrs[node]);
    }
}

/// Schedule every block of a machine function
pub fn schedule_function(mf: &mut MachineFunction) {
    for block in mf.blocks().collect::<Vec<_>>() {
        schedule_block(mf, block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ir::builder::FuncBuilder;
    use crate::backend::lower::lower_function;
    use crate::backend::mir::MachineOperand;

    /// Check the reorder contract: for original positions a < b where b
    /// depends on a (or either is a barrier), a still precedes b.
    fn assert_dependencies_respected(original: &[MInstrId], mf: &MachineFunction, block: MBlock) {
        let graph = {
            // rebuild on the original order
            PrecedenceGraph::build(mf, original)
        };
        let scheduled = mf.instrs(block);
        let position: HashMap<MInstrId, usize> =
            scheduled.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        for (a, succs) in graph.succs.iter().enumerate() {
            for &b in succs {
                assert!(
                    position[&original[a]] < position[&original[b]],
                    "dependency {} -> {} violated",
                    a,
                    b
                );
            }
        }
    }

    fn lowered(build: impl FnOnce(&mut FuncBuilder)) -> MachineFunction {
        let mut b = FuncBuilder::new("f", 3);
        b.new_block();
        build(&mut b);
        lower_function(&b.build())
    }

    #[test]
    fn test_schedule_preserves_dependencies() {
        let mut mf = lowered(|b| {
            let x = b.new_reg();
            let y = b.new_reg();
            let z = b.new_reg();
            b.add(x, b.param(0), b.param(1));
            b.mul(y, x, b.param(2));
            b.add(z, y, x);
            b.ret(z);
        });
        let block = mf.entry();
        let original = mf.instrs(block);
        schedule_function(&mut mf);
        assert_dependencies_respected(&original, &mf, block);
        assert_eq!(mf.instrs(block).len(), original.len());
    }

    #[test]
    fn test_terminator_stays_last() {
        let mut mf = lowered(|b| {
            let x = b.new_reg();
            b.add(x, b.param(0), b.param(1));
            b.ret(x);
        });
        schedule_function(&mut mf);
        for block in mf.blocks().collect::<Vec<_>>() {
            let tail = mf.tail(block).unwrap();
            assert!(mf.kind(tail).is_terminator());
        }
    }

    #[test]
    fn test_pushes_keep_their_order() {
        // argument pushes are barriers; their right-to-left order is ABI
        let mut mf = lowered(|b| {
            let r = b.new_reg();
            b.call("g", r, &[b.param(0), b.param(1), b.param(2)]);
            b.ret(r);
        });
        let block = mf.entry();
        schedule_function(&mut mf);

        let pushes: Vec<MachineOperand> = mf
            .instrs(block)
            .into_iter()
            .filter(|i| *mf.kind(*i) == MachineInstKind::Push)
            .map(|i| mf.operand(i, 0))
            .collect();
        assert_eq!(
            pushes,
            vec![
                MachineOperand::mem(MReg::Rbp, 32),
                MachineOperand::mem(MReg::Rbp, 24),
                MachineOperand::mem(MReg::Rbp, 16),
            ]
        );
    }

    #[test]
    fn test_flags_reach_their_consumer() {
        // xor/cmp/cmov triples keep their flag discipline even with
        // surrounding arithmetic competing for slots
        let mut mf = lowered(|b| {
            let c = b.new_reg();
            let d = b.new_reg();
            let e = b.new_reg();
            b.lt(c, b.param(0), b.param(1));
            b.add(d, b.param(0), b.param(2));
            b.eq(e, c, d);
            b.ret(e);
        });
        let block = mf.entry();
        schedule_function(&mut mf);

        let instrs = mf.instrs(block);
        for (pos, &inst) in instrs.iter().enumerate() {
            if matches!(mf.kind(inst), MachineInstKind::Cmp | MachineInstKind::Test) {
                // the first flag-affecting instruction after a cmp/test is
                // the cmov/jcc consuming it
                let next_flags = instrs[pos + 1..].iter().find(|i| {
                    matches!(
                        mf.kind(**i),
                        MachineInstKind::CMov(_)
                            | MachineInstKind::Jcc(_)
                            | MachineInstKind::Add
                            | MachineInstKind::Sub
                            | MachineInstKind::IMul
                            | MachineInstKind::And
                            | MachineInstKind::Or
                            | MachineInstKind::Xor
                            | MachineInstKind::Cmp
                            | MachineInstKind::Test
                    )
                });
                assert!(matches!(
                    mf.kind(*next_flags.unwrap()),
                    MachineInstKind::CMov(_) | MachineInstKind::Jcc(_)
                ));
            }
        }
    }

    #[test]
    fn test_independent_long_ops_hoisted() {
        // the imul does not depend on the first add chain, and its higher
        // latency pulls it forward
        let mut mf = lowered(|b| {
            let x = b.new_reg();
            let y = b.new_reg();
            let z = b.new_reg();
            b.add(x, b.param(0), b.imm(1));
            b.mul(y, b.param(1), b.param(2));
            b.add(z, x, y);
            b.ret(z);
        });
        let block = mf.entry();
        let original = mf.instrs(block);
        schedule_function(&mut mf);
        assert_dependencies_respected(&original, &mf, block);
    }
}
