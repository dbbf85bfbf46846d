//! Linear-scan register allocation.
//!
//! The allocator numbers instructions in reverse-post-order, computes live
//! intervals for every virtual register (extended across block boundaries
//! by a backward liveness dataflow so loop-carried values stay covered),
//! then runs the classic linear scan over seven allocatable registers.
//! Spilled intervals keep their register up to the spill point, store into
//! a `[RBP - 8*(slot+1)]` slot there and address memory afterwards.
//!
//! After the scan three rewrites legalize the code: operand-form fixup
//! (no memory/memory pairs, no 64-bit embedded immediates, `CMov` helpers
//! through `RAX`/`RDX`), caller-save preservation around every call, and
//! the function prologue/epilogue.
//!
//! `RAX` and `RDX` stay out of the allocatable set: the fixups and the
//! division sequence use them as scratch.

use crate::backend::dataflow::{self, Direction, Lattice};
use crate::backend::mir::{
    MBlock, MInstrId, MReg, MachineFunction, MachineInstKind, MachineOperand, WORD_SIZE,
};
use im::OrdSet;
use log::debug;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// Allocation failure. Unreachable with unbounded spill slots; kept so the
/// interface can report failure if the strategy ever changes.
#[derive(Debug, Error)]
pub enum AllocError {
    #[error("virtual register vreg{0} left without a physical register")]
    Unassigned(usize),
}

/// Live range of one virtual register over the linear numbering
#[derive(Clone, Debug)]
pub struct Interval {
    pub vreg: usize,
    pub start: i32,
    pub end: i32,
    /// Position from which the value lives in its spill slot
    pub spill_at: Option<i32>,
    pub spill_slot: Option<u32>,
    pub reg: Option<MReg>,
}

impl Interval {
    pub fn is_spilled(&self) -> bool {
        self.spill_at.is_some()
    }

    /// Last position at which the assigned register holds the value
    pub fn real_end(&self) -> i32 {
        self.spill_at.unwrap_or(self.end)
    }
}

/// Result of allocating one function
pub struct AllocationResult {
    pub intervals: Vec<Interval>,
    pub spill_slots: usize,
}

/// Backward liveness over machine virtual registers. Two-operand
/// arithmetic and `CMov` read their destination, so it stays live across
/// the transfer; calling-convention traffic is explicit (`Push`, `RAX`)
/// and never touches virtual registers.
#[derive(Clone, PartialEq)]
struct MachineLiveness {
    live: OrdSet<usize>,
}

impl MachineLiveness {
    fn add(&mut self, op: MachineOperand) {
        if let Some(id) = op.virt_id() {
            self.live.insert(id);
        }
    }

    fn remove(&mut self, op: MachineOperand) {
        if let Some(id) = op.virt_id() {
            self.live.remove(&id);
        }
    }
}

impl Lattice<MachineFunction> for MachineLiveness {
    fn empty(_mf: &MachineFunction) -> Self {
        Self {
            live: OrdSet::new(),
        }
    }

    fn meet(&mut self, other: &Self) {
        for reg in other.live.iter() {
            self.live.insert(*reg);
        }
    }

    fn transfer(&mut self, mf: &MachineFunction, inst: MInstrId) {
        match mf.kind(inst) {
            MachineInstKind::Mov => {
                self.remove(mf.operand(inst, 1));
                self.add(mf.operand(inst, 0));
            }
            MachineInstKind::CMov(_)
            | MachineInstKind::Add
            | MachineInstKind::Sub
            | MachineInstKind::IMul
            | MachineInstKind::And
            | MachineInstKind::Or
            | MachineInstKind::Xor => {
                self.remove(mf.operand(inst, 1));
                self.add(mf.operand(inst, 0));
                self.add(mf.operand(inst, 1));
            }
            MachineInstKind::Cmp | MachineInstKind::Test => {
                self.add(mf.operand(inst, 0));
                self.add(mf.operand(inst, 1));
            }
            MachineInstKind::Push | MachineInstKind::IDiv => {
                self.add(mf.operand(inst, 0));
            }
            MachineInstKind::Pop | MachineInstKind::Lea(_) => {
                self.remove(mf.operand(inst, 0));
            }
            MachineInstKind::Jmp
            | MachineInstKind::Jcc(_)
            | MachineInstKind::Ret
            | MachineInstKind::Call(_)
            | MachineInstKind::Cqo => {}
        }
    }
}

struct LinearScan<'a> {
    mf: &'a mut MachineFunction,
    order_to_inst: Vec<MInstrId>,
    inst_to_order: HashMap<MInstrId, i32>,
    /// Spill slot per interval index, allocated once and reused
    slots: HashMap<usize, u32>,
}

/// Allocate registers for a function, rewriting it in place. Runs the
/// operand-form fixup, the caller-save call fixup and the
/// prologue/epilogue emission as part of allocation.
pub fn allocate_function(mf: &mut MachineFunction) -> Result<AllocationResult, AllocError> {
    let mut scan = LinearScan {
        mf,
        order_to_inst: Vec::new(),
        inst_to_order: HashMap::new(),
        slots: HashMap::new(),
    };
    scan.allocate()
}

impl<'a> LinearScan<'a> {
    /// Blocks in reverse-post-order; the numbering follows this order
    fn sorted_blocks(&self) -> Vec<MBlock> {
        let mut blocks = self.mf.post_order();
        blocks.reverse();
        blocks
    }

    fn number_instructions(&mut self, blocks: &[MBlock]) {
        let mut order = 0;
        for &block in blocks {
            for inst in self.mf.instrs(block) {
                self.order_to_inst.push(inst);
                self.inst_to_order.insert(inst, order);
                order += 1;
            }
        }
    }

    fn allocate_slot(&mut self, interval_idx: usize) -> u32 {
        let next = self.slots.len() as u32;
        *self.slots.entry(interval_idx).or_insert(next)
    }

    fn spill_slot_operand(slot: u32) -> MachineOperand {
        MachineOperand::mem(MReg::Rbp, -((slot as i64 + 1) * WORD_SIZE))
    }

    fn compute_intervals(
        &self,
        blocks: &[MBlock],
        liveness: &dataflow::DataflowResult<MBlock, MachineLiveness>,
    ) -> Vec<Interval> {
        // first and last occurrence of each virtual register, in discovery
        // order for a deterministic scan
        let mut intervals: Vec<Interval> = Vec::new();
        let mut index_of: HashMap<usize, usize> = HashMap::new();

        for (pos, &inst) in self.order_to_inst.iter().enumerate() {
            for i in 0..self.mf.num_operands(inst) {
                let Some(vreg) = self.mf.operand(inst, i).virt_id() else {
                    continue;
                };
                match index_of.get(&vreg) {
                    Some(&idx) => intervals[idx].end = pos as i32,
                    None => {
                        index_of.insert(vreg, intervals.len());
                        intervals.push(Interval {
                            vreg,
                            start: pos as i32,
                            end: pos as i32,
                            spill_at: None,
                            spill_slot: None,
                            reg: None,
                        });
                    }
                }
            }
        }

        // extend across block boundaries wherever liveness says the value
        // survives the block edge (covers loop back-edges)
        for &block in blocks {
            let instrs = self.mf.instrs(block);
            let (Some(&first), Some(&last)) = (instrs.first(), instrs.last()) else {
                continue;
            };
            let block_start = self.inst_to_order[&first];
            let block_end = self.inst_to_order[&last];

            if let Some(live_out) = liveness.outputs.get(&block) {
                for vreg in live_out.live.iter() {
                    if let Some(&idx) = index_of.get(vreg) {
                        if block_end > intervals[idx].end {
                            debug!(
                                "extending interval end for vreg{}: {} -> {}",
                                vreg, intervals[idx].end, block_end
                            );
                            intervals[idx].end = block_end;
                        }
                    }
                }
            }
            if let Some(live_in) = liveness.inputs.get(&block) {
                for vreg in live_in.live.iter() {
                    if let Some(&idx) = index_of.get(vreg) {
                        if block_start < intervals[idx].start {
                            debug!(
                                "extending interval start for vreg{}: {} -> {}",
                                vreg, intervals[idx].start, block_start
                            );
                            intervals[idx].start = block_start;
                        }
                    }
                }
            }
        }
        intervals
    }

    /// Linear scan over the intervals sorted by ascending start
    fn scan_intervals(&mut self, intervals: &mut [Interval]) {
        let mut by_start: Vec<usize> = (0..intervals.len()).collect();
        by_start.sort_by_key(|&i| intervals[i].start);

        // active intervals sorted by ascending end
        let mut active: Vec<usize> = Vec::new();
        let mut free: BTreeSet<MReg> = MReg::ALLOCATABLE.iter().copied().collect();

        for &current in &by_start {
            // expire intervals that ended before this one starts
            while let Some(&head) = active.first() {
                if intervals[head].end >= intervals[current].start {
                    break;
                }
                active.remove(0);
                free.insert(intervals[head].reg.expect("active interval has a register"));
            }

            if active.len() == MReg::ALLOCATABLE.len() {
                // steal from the furthest-ending active interval, or spill
                // the new interval itself
                let last = *active.last().expect("active set is full");
                let spilled = if intervals[last].end > intervals[current].end {
                    active.pop();
                    intervals[current].reg = intervals[last].reg;
                    Self::insert_active(&mut active, intervals, current);
                    last
                } else {
                    current
                };
                let slot = self.allocate_slot(spilled);
                intervals[spilled].spill_at = Some(intervals[current].start);
                intervals[spilled].spill_slot = Some(slot);
                debug!(
                    "spilling vreg{} [{}, {}] to slot {} at {}",
                    intervals[spilled].vreg,
                    intervals[spilled].start,
                    intervals[spilled].end,
                    slot,
                    intervals[current].start
                );
            } else {
                let reg = *free.iter().next().expect("free register available");
                free.remove(&reg);
                intervals[current].reg = Some(reg);
                Self::insert_active(&mut active, intervals, current);
                debug!(
                    "assigned {} to vreg{} [{}, {}]",
                    reg,
                    intervals[current].vreg,
                    intervals[current].start,
                    intervals[current].end
                );
            }
        }
    }

    fn insert_active(active: &mut Vec<usize>, intervals: &[Interval], idx: usize) {
        let pos = active
            .iter()
            .position(|&a| intervals[a].end > intervals[idx].end)
            .unwrap_or(active.len());
        active.insert(pos, idx);
    }

    fn replace_vreg(&mut self, inst: MInstrId, vreg: usize, new: MachineOperand) {
        for i in 0..self.mf.num_operands(inst) {
            if self.mf.operand(inst, i).virt_id() == Some(vreg) {
                self.mf.replace_operand(inst, i, new);
            }
        }
    }

    /// Rewrite virtual registers to their physical registers or spill
    /// slots
    fn rewrite(&mut self, intervals: &[Interval]) -> Result<(), AllocError> {
        for interval in intervals {
            match interval.spill_at {
                None => {
                    let reg = interval.reg.ok_or(AllocError::Unassigned(interval.vreg))?;
                    for pos in interval.start..=interval.end {
                        let inst = self.order_to_inst[pos as usize];
                        self.replace_vreg(inst, interval.vreg, MachineOperand::Reg(reg));
                    }
                }
                Some(spill_at) => {
                    let slot = Self::spill_slot_operand(
                        interval.spill_slot.expect("spilled interval has a slot"),
                    );
                    if let Some(reg) = interval.reg {
                        // the value lives in the register up to the spill
                        for pos in interval.start..spill_at {
                            let inst = self.order_to_inst[pos as usize];
                            self.replace_vreg(inst, interval.vreg, MachineOperand::Reg(reg));
                        }
                        let store = self.mf.add_instr(
                            MachineInstKind::Mov,
                            vec![MachineOperand::Reg(reg), slot],
                            vec![],
                        );
                        self.mf
                            .insert_before(store, self.order_to_inst[spill_at as usize]);
                    }
                    for pos in spill_at..=interval.end {
                        let inst = self.order_to_inst[pos as usize];
                        self.replace_vreg(inst, interval.vreg, slot);
                    }
                }
            }
        }
        Ok(())
    }

    /// Bracket each call with saves and restores of the registers holding
    /// intervals live across it
    fn fixup_calls(&mut self, intervals: &[Interval]) {
        for order in 0..self.order_to_inst.len() {
            let inst = self.order_to_inst[order];
            if !matches!(self.mf.kind(inst), MachineInstKind::Call(_)) {
                continue;
            }
            let order = order as i32;
            for idx in 0..intervals.len() {
                let interval = &intervals[idx];
                if order < interval.start || order > interval.real_end() {
                    continue;
                }
                let Some(reg) = interval.reg else {
                    continue;
                };
                let slot = Self::spill_slot_operand(self.allocate_slot(idx));
                let save = self.mf.add_instr(
                    MachineInstKind::Mov,
                    vec![MachineOperand::Reg(reg), slot],
                    vec![],
                );
                self.mf.insert_before(save, inst);
                let restore = self.mf.add_instr(
                    MachineInstKind::Mov,
                    vec![slot, MachineOperand::Reg(reg)],
                    vec![],
                );
                self.mf.insert_after(restore, inst);
            }
        }
    }

    fn emit_prologue(&mut self) {
        let entry = self.mf.entry();
        let first = self.mf.head(entry).expect("entry block is empty");

        let push = self.mf.add_instr(
            MachineInstKind::Push,
            vec![MachineOperand::Reg(MReg::Rbp)],
            vec![],
        );
        self.mf.insert_before(push, first);
        let set_frame = self.mf.add_instr(
            MachineInstKind::Mov,
            vec![MachineOperand::Reg(MReg::Rsp), MachineOperand::Reg(MReg::Rbp)],
            vec![],
        );
        self.mf.insert_before(set_frame, first);

        if !self.slots.is_empty() {
            let grow = self.mf.add_instr(
                MachineInstKind::Sub,
                vec![
                    MachineOperand::Imm(WORD_SIZE * self.slots.len() as i64),
                    MachineOperand::Reg(MReg::Rsp),
                ],
                vec![],
            );
            self.mf.insert_before(grow, first);
        }
    }

    fn emit_epilogue(&mut self) {
        for block in self.mf.blocks().collect::<Vec<_>>() {
            if !self.mf.is_exit(block) {
                continue;
            }
            let last = self.mf.tail(block).expect("exit block is empty");
            let restore_sp = self.mf.add_instr(
                MachineInstKind::Mov,
                vec![MachineOperand::Reg(MReg::Rbp), MachineOperand::Reg(MReg::Rsp)],
                vec![],
            );
            self.mf.insert_before(restore_sp, last);
            let pop = self.mf.add_instr(
                MachineInstKind::Pop,
                vec![MachineOperand::Reg(MReg::Rbp)],
                vec![],
            );
            self.mf.insert_before(pop, last);
        }
    }

    fn allocate(&mut self) -> Result<AllocationResult, AllocError> {
        let blocks = self.sorted_blocks();
        self.number_instructions(&blocks);

        let liveness =
            dataflow::analyze::<MachineFunction, MachineLiveness>(self.mf, Direction::Backward);
        let mut intervals = self.compute_intervals(&blocks, &liveness);
        debug!(
            "{}: {} intervals over {} instructions",
            self.mf.name(),
            intervals.len(),
            self.order_to_inst.len()
        );

        self.scan_intervals(&mut intervals);
        self.rewrite(&intervals)?;

        fixup_operand_forms(self.mf);
        self.fixup_calls(&intervals);

        self.emit_prologue();
        self.emit_epilogue();

        Ok(AllocationResult {
            intervals,
            spill_slots: self.slots.len(),
        })
    }
}

fn fits_in_i32(value: i64) -> bool {
    (i32::MIN as i64..=i32::MAX as i64).contains(&value)
}

/// Legalize operand forms x86 cannot encode: no
/// memory/memory pairs, no 64-bit embedded immediates, no `CMov` from an
/// immediate or into memory. `RAX` and `RDX` serve as scratch.
pub fn fixup_operand_forms(mf: &mut MachineFunction) {
    let rax = MachineOperand::Reg(MReg::Rax);
    let rdx = MachineOperand::Reg(MReg::Rdx);

    for block in mf.blocks().collect::<Vec<_>>() {
        for inst in mf.instrs(block) {
            match mf.kind(inst).clone() {
                MachineInstKind::Mov => {
                    let src = mf.operand(inst, 0);
                    let dst = mf.operand(inst, 1);
                    if (src.is_memory() && dst.is_memory())
                        || (src.is_immediate() && dst.is_memory())
                    {
                        let load = mf.add_instr(MachineInstKind::Mov, vec![src, rax], vec![]);
                        mf.insert_before(load, inst);
                        mf.replace_operand(inst, 0, rax);
                    }
                }

                MachineInstKind::Add
                | MachineInstKind::Sub
                | MachineInstKind::And
                | MachineInstKind::Or
                | MachineInstKind::Xor
                | MachineInstKind::Cmp
                | MachineInstKind::Test => {
                    let src = mf.operand(inst, 0);
                    let dst = mf.operand(inst, 1);
                    if (src.is_memory() && dst.is_memory())
                        || (src.is_immediate() && !fits_in_i32(src.imm_value()))
                    {
                        let load = mf.add_instr(MachineInstKind::Mov, vec![src, rax], vec![]);
                        mf.insert_before(load, inst);
                        mf.replace_operand(inst, 0, rax);
                    }
                }

                MachineInstKind::CMov(_) => {
                    let src = mf.operand(inst, 0);
                    let dst = mf.operand(inst, 1);
                    if src.is_immediate() {
                        let load = mf.add_instr(MachineInstKind::Mov, vec![src, rax], vec![]);
                        mf.insert_before(load, inst);
                        mf.replace_operand(inst, 0, rax);
                    }
                    if dst.is_memory() {
                        let load = mf.add_instr(MachineInstKind::Mov, vec![dst, rdx], vec![]);
                        mf.insert_before(load, inst);
                        let store = mf.add_instr(MachineInstKind::Mov, vec![rdx, dst], vec![]);
                        mf.insert_after(store, inst);
                        mf.replace_operand(inst, 1, rdx);
                    }
                }

                // imul and lea only write registers; a spilled imul
                // destination routes through rdx, its source may be rax
                MachineInstKind::IMul => {
                    let dst = mf.operand(inst, 1);
                    if dst.is_memory() {
                        let load = mf.add_instr(MachineInstKind::Mov, vec![dst, rdx], vec![]);
                        mf.insert_before(load, inst);
                        let store = mf.add_instr(MachineInstKind::Mov, vec![rdx, dst], vec![]);
                        mf.insert_after(store, inst);
                        mf.replace_operand(inst, 1, rdx);
                    }
                }
                MachineInstKind::Lea(_) => {
                    let dst = mf.operand(inst, 0);
                    if dst.is_memory() {
                        let store = mf.add_instr(MachineInstKind::Mov, vec![rax, dst], vec![]);
                        mf.insert_after(store, inst);
                        mf.replace_operand(inst, 0, rax);
                    }
                }

                // push takes at most a sign-extended 32-bit immediate
                MachineInstKind::Push => {
                    let src = mf.operand(inst, 0);
                    if src.is_immediate() && !fits_in_i32(src.imm_value()) {
                        let load = mf.add_instr(MachineInstKind::Mov, vec![src, rax], vec![]);
                        mf.insert_before(load, inst);
                        mf.replace_operand(inst, 0, rax);
                    }
                }

                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ir::builder::FuncBuilder;
    use crate::backend::lower::lower_function;

    fn build_and_allocate(
        build: impl FnOnce(&mut FuncBuilder),
        num_params: usize,
    ) -> (MachineFunction, AllocationResult) {
        let mut b = FuncBuilder::new("f", num_params);
        b.new_block();
        build(&mut b);
        let mut mf = lower_function(&b.build());
        let result = allocate_function(&mut mf).unwrap();
        (mf, result)
    }

    #[test]
    fn test_simple_function_no_spills() {
        let (mf, result) = build_and_allocate(
            |b| {
                let x = b.new_reg();
                b.add(x, b.param(0), b.param(1));
                b.ret(x);
            },
            2,
        );
        assert_eq!(result.spill_slots, 0);
        assert!(mf.verify_operand_forms());
        for interval in &result.intervals {
            assert!(!interval.is_spilled());
            assert!(MReg::ALLOCATABLE.contains(&interval.reg.unwrap()));
        }

        // prologue and epilogue bracket the body
        let instrs = mf.instrs(mf.entry());
        assert_eq!(*mf.kind(instrs[0]), MachineInstKind::Push);
        assert_eq!(*mf.kind(instrs[1]), MachineInstKind::Mov);
        let n = instrs.len();
        assert_eq!(*mf.kind(instrs[n - 1]), MachineInstKind::Ret);
        assert_eq!(*mf.kind(instrs[n - 2]), MachineInstKind::Pop);
        assert_eq!(*mf.kind(instrs[n - 3]), MachineInstKind::Mov);
    }

    /// Eight simultaneously-live temporaries exceed the
    /// seven allocatable registers and force a spill
    #[test]
    fn test_register_pressure_spills() {
        let (mf, result) = build_and_allocate(
            |b| {
                let temps: Vec<_> = (0..8)
                    .map(|i| {
                        let t = b.new_reg();
                        b.assign(t, b.imm(i + 1));
                        t
                    })
                    .collect();
                let mut acc = b.new_reg();
                b.add(acc, temps[0], temps[1]);
                for t in &temps[2..] {
                    let next = b.new_reg();
                    b.add(next, acc, *t);
                    acc = next;
                }
                b.ret(acc);
            },
            0,
        );

        assert!(result.spill_slots > 0);
        assert!(result.intervals.iter().any(|i| i.is_spilled()));
        assert!(mf.verify_operand_forms());

        // the frame grows by a non-zero multiple of eight
        let instrs = mf.instrs(mf.entry());
        assert_eq!(*mf.kind(instrs[2]), MachineInstKind::Sub);
        let MachineOperand::Imm(frame) = mf.operand(instrs[2], 0) else {
            panic!("prologue frame adjustment is not an immediate");
        };
        assert_eq!(frame, WORD_SIZE * result.spill_slots as i64);
        assert_eq!(mf.operand(instrs[2], 1), MachineOperand::Reg(MReg::Rsp));
    }

    /// Overlapping intervals never share a physical register
    #[test]
    fn test_no_overlapping_register_assignment() {
        let (_, result) = build_and_allocate(
            |b| {
                let temps: Vec<_> = (0..10)
                    .map(|i| {
                        let t = b.new_reg();
                        b.assign(t, b.imm(i));
                        t
                    })
                    .collect();
                let mut acc = b.new_reg();
                b.add(acc, temps[0], temps[1]);
                for t in &temps[2..] {
                    let next = b.new_reg();
                    b.add(next, acc, *t);
                    acc = next;
                }
                b.ret(acc);
            },
            0,
        );

        // the register is held over [start, real_end)
        let held = |i: &Interval| (i.start, i.real_end());
        for (a_idx, a) in result.intervals.iter().enumerate() {
            for b in &result.intervals[a_idx + 1..] {
                let (Some(ra), Some(rb)) = (a.reg, b.reg) else {
                    continue;
                };
                if ra != rb {
                    continue;
                }
                let (sa, ea) = held(a);
                let (sb, eb) = held(b);
                let disjoint = ea <= sb || eb <= sa;
                assert!(
                    disjoint,
                    "vreg{} and vreg{} share {} over overlapping ranges",
                    a.vreg, b.vreg, ra
                );
            }
        }
    }

    #[test]
    fn test_call_saves_live_registers() {
        let (mf, result) = build_and_allocate(
            |b| {
                let x = b.new_reg();
                let y = b.new_reg();
                let r = b.new_reg();
                b.assign(x, b.imm(5));
                b.call("g", y, &[]);
                b.add(r, x, y);
                b.ret(r);
            },
            0,
        );

        // x is live across the call and holds a register: expect a save
        // before the call and a restore after it
        let block = mf.entry();
        let instrs = mf.instrs(block);
        let call_pos = instrs
            .iter()
            .position(|i| matches!(mf.kind(*i), MachineInstKind::Call(_)))
            .unwrap();

        let before = instrs[call_pos - 1];
        assert_eq!(*mf.kind(before), MachineInstKind::Mov);
        assert!(mf.operand(before, 0).is_machine_register());
        assert!(mf.operand(before, 1).is_memory());

        let after = instrs[call_pos + 1];
        assert_eq!(*mf.kind(after), MachineInstKind::Mov);
        assert!(mf.operand(after, 0).is_memory());
        assert!(mf.operand(after, 1).is_machine_register());

        assert!(result.spill_slots > 0);
    }

    #[test]
    fn test_loop_interval_covers_back_edge() {
        let mut b = FuncBuilder::new("f", 0);
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
        let mut mf = lower_function(&b.build());

        // compute intervals without rewriting to inspect the extension
        let mut scan = LinearScan {
            mf: &mut mf,
            order_to_inst: Vec::new(),
            inst_to_order: HashMap::new(),
            slots: HashMap::new(),
        };
        let blocks = scan.sorted_blocks();
        scan.number_instructions(&blocks);
        let liveness =
            dataflow::analyze::<MachineFunction, MachineLiveness>(scan.mf, Direction::Backward);
        let intervals = scan.compute_intervals(&blocks, &liveness);

        // the loop body block's boundaries
        let body_block = blocks
            .iter()
            .copied()
            .find(|bb| scan.mf.block_name(*bb) == "_f_bb2")
            .unwrap();
        let body_instrs = scan.mf.instrs(body_block);
        let body_start = scan.inst_to_order[&body_instrs[0]];
        let body_end = scan.inst_to_order[body_instrs.last().unwrap()];

        // both loop-carried registers span the whole body
        for vreg_name in ["s", "i"] {
            let vreg = match vreg_name {
                "s" => 1, // second IR register lowered
                _ => 0,
            };
            let interval = intervals.iter().find(|iv| iv.vreg == vreg).unwrap();
            assert!(
                interval.start <= body_start && interval.end >= body_end,
                "interval of {} [{}, {}] does not cover the body [{}, {}]",
                vreg_name,
                interval.start,
                interval.end,
                body_start,
                body_end
            );
        }
    }

    #[test]
    fn test_fixup_memory_pairs() {
        let mut mf = MachineFunction::new("f", 0);
        let bb = mf.create_block("_f_bb0");
        let mem_a = MachineOperand::mem(MReg::Rbp, -8);
        let mem_b = MachineOperand::mem(MReg::Rbp, -16);
        let add = mf.add_instr(MachineInstKind::Add, vec![mem_a, mem_b], vec![]);
        mf.append(bb, add);
        let big = mf.add_instr(
            MachineInstKind::Cmp,
            vec![MachineOperand::Imm(1 << 40), MachineOperand::Reg(MReg::Rcx)],
            vec![],
        );
        mf.append(bb, big);
        let cmov = mf.add_instr(
            MachineInstKind::CMov(crate::backend::mir::Cond::E),
            vec![MachineOperand::Imm(1), mem_a],
            vec![],
        );
        mf.append(bb, cmov);
        let ret = mf.add_instr(MachineInstKind::Ret, vec![], vec![]);
        mf.append(bb, ret);

        fixup_operand_forms(&mut mf);
        assert!(mf.verify_operand_forms());

        // cmov got both helpers: rax source and rdx destination
        assert_eq!(mf.operand(cmov, 0), MachineOperand::Reg(MReg::Rax));
        assert_eq!(mf.operand(cmov, 1), MachineOperand::Reg(MReg::Rdx));
        let instrs = mf.instrs(bb);
        let cmov_pos = instrs.iter().position(|i| *i == cmov).unwrap();
        let store_back = instrs[cmov_pos + 1];
        assert_eq!(*mf.kind(store_back), MachineInstKind::Mov);
        assert_eq!(mf.operand(store_back, 1), mem_a);
    }
}
