//! x86-64 machine IR.
//!
//! Two-operand, destination-on-the-right instructions over virtual
//! registers, physical registers, immediates and `[base + index + disp]`
//! memory operands. Containers mirror the TAC-IR: a `MachineFunction` owns
//! named `MachineBasicBlock`s and an arena of instruction nodes linked into
//! per-block intrusive lists. The lowering creates the instructions, the
//! scheduler reorders them, the allocator rewrites their operands and the
//! fixup passes insert `Mov`s around them.
//!
//! `Jcc` successors are ordered `[true_target, false_target]` and emit as a
//! conditional jump to the true target followed by an unconditional jump to
//! the false target.

use std::collections::BTreeSet;
use std::fmt;
use std::fmt::Write;

/// Symbol prefix keeping emitted functions clear of the C runtime namespace
pub const FUNCTION_PREFIX: &str = "K_";

/// Stack word size in bytes
pub const WORD_SIZE: i64 = 8;

/// Physical registers. The discriminant order fixes the allocator's
/// lowest-first free-register pick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MReg {
    Rax,
    Rcx,
    R8,
    R9,
    R10,
    R11,
    Rdx,
    Rsi,
    Rdi,
    Rbx,
    Rbp,
    Rsp,
    R12,
    R13,
    R14,
    R15,
}

impl MReg {
    /// Registers the allocator may hand out. `RAX`/`RDX` stay reserved for
    /// scratch, division and return values; `RBP`/`RSP` hold the frame.
    pub const ALLOCATABLE: &'static [MReg] = &[
        MReg::Rcx,
        MReg::R8,
        MReg::R9,
        MReg::R10,
        MReg::R11,
        MReg::Rsi,
        MReg::Rdi,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MReg::Rax => "rax",
            MReg::Rcx => "rcx",
            MReg::R8 => "r8",
            MReg::R9 => "r9",
            MReg::R10 => "r10",
            MReg::R11 => "r11",
            MReg::Rdx => "rdx",
            MReg::Rsi => "rsi",
            MReg::Rdi => "rdi",
            MReg::Rbx => "rbx",
            MReg::Rbp => "rbp",
            MReg::Rsp => "rsp",
            MReg::R12 => "r12",
            MReg::R13 => "r13",
            MReg::R14 => "r14",
            MReg::R15 => "r15",
        }
    }
}

impl fmt::Display for MReg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Condition codes usable by `CMov` and `Jcc`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cond {
    E,
    Ne,
    L,
    Le,
    G,
    Ge,
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Cond::E => "e",
            Cond::Ne => "ne",
            Cond::L => "l",
            Cond::Le => "le",
            Cond::G => "g",
            Cond::Ge => "ge",
        };
        write!(f, "{}", s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MachineOperand {
    /// Virtual register, replaced by the allocator
    Virt(usize),
    Reg(MReg),
    Imm(i64),
    Mem {
        base: MReg,
        index: Option<MReg>,
        disp: i64,
    },
}

impl MachineOperand {
    pub fn mem(base: MReg, disp: i64) -> Self {
        MachineOperand::Mem {
            base,
            index: None,
            disp,
        }
    }

    pub fn is_register(&self) -> bool {
        matches!(self, MachineOperand::Virt(_) | MachineOperand::Reg(_))
    }

    pub fn is_machine_register(&self) -> bool {
        matches!(self, MachineOperand::Reg(_))
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self, MachineOperand::Virt(_))
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self, MachineOperand::Imm(_))
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, MachineOperand::Mem { .. })
    }

    /// Register-or-memory, the common x86 operand class
    pub fn is_rm(&self) -> bool {
        self.is_register() || self.is_memory()
    }

    pub fn virt_id(&self) -> Option<usize> {
        match self {
            MachineOperand::Virt(id) => Some(*id),
            _ => None,
        }
    }

    pub fn imm_value(&self) -> i64 {
        match self {
            MachineOperand::Imm(value) => *value,
            _ => panic!("operand is not an immediate"),
        }
    }
}

impl fmt::Display for MachineOperand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MachineOperand::Virt(id) => write!(f, "vreg{}", id),
            MachineOperand::Reg(reg) => write!(f, "{}", reg),
            MachineOperand::Imm(value) => write!(f, "0x{:x}", value),
            MachineOperand::Mem { base, index, disp } => {
                write!(f, "qword ptr [{}", base)?;
                if let Some(index) = index {
                    write!(f, " + {}", index)?;
                }
                if *disp > 0 {
                    write!(f, " + {}", disp)?;
                } else if *disp < 0 {
                    write!(f, " - {}", -disp)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Machine opcodes. Two-operand forms store `[src, dst]`; `IDiv`, `Push`,
/// `Pop` and `Lea` store their single explicit operand.
#[derive(Clone, Debug, PartialEq)]
pub enum MachineInstKind {
    Mov,
    CMov(Cond),
    Add,
    Sub,
    IMul,
    IDiv,
    Or,
    Xor,
    And,
    Test,
    Cmp,
    /// successors `[target]`
    Jmp,
    /// successors `[true_target, false_target]`
    Jcc(Cond),
    Ret,
    Push,
    Pop,
    Call(String),
    Lea(String),
    Cqo,
}

impl MachineInstKind {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            MachineInstKind::Jmp | MachineInstKind::Jcc(_) | MachineInstKind::Ret
        )
    }

    /// Barriers the scheduler must not reorder anything across. `Cqo`
    /// joins `IDiv` here so nothing lands between the sign extension and
    /// the divide while `RAX`/`RDX` carry the dividend.
    pub fn is_barrier(&self) -> bool {
        matches!(
            self,
            MachineInstKind::Call(_)
                | MachineInstKind::Ret
                | MachineInstKind::Jmp
                | MachineInstKind::Jcc(_)
                | MachineInstKind::Push
                | MachineInstKind::Lea(_)
                | MachineInstKind::IDiv
                | MachineInstKind::Cqo
        )
    }
}

/// Stable handle to a machine basic block
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MBlock(pub(crate) u32);

/// Stable handle to a machine instruction node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MInstrId(pub(crate) u32);

struct MInstrNode {
    kind: MachineInstKind,
    operands: Vec<MachineOperand>,
    successors: Vec<MBlock>,
    prev: Option<MInstrId>,
    next: Option<MInstrId>,
    parent: Option<MBlock>,
}

struct MBlockData {
    name: String,
    head: Option<MInstrId>,
    tail: Option<MInstrId>,
    len: usize,
}

pub struct MachineFunction {
    name: String,
    num_params: usize,
    order: Vec<MBlock>,
    blocks: Vec<MBlockData>,
    instrs: Vec<MInstrNode>,
}

impl MachineFunction {
    pub fn new(name: &str, num_params: usize) -> Self {
        Self {
            name: name.to_string(),
            num_params,
            order: Vec::new(),
            blocks: Vec::new(),
            instrs: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_params(&self) -> usize {
        self.num_params
    }

    pub fn entry(&self) -> MBlock {
        self.order[0]
    }

    pub fn blocks(&self) -> impl Iterator<Item = MBlock> + '_ {
        self.order.iter().copied()
    }

    pub fn block_name(&self, block: MBlock) -> &str {
        &self.blocks[block.0 as usize].name
    }

    pub fn create_block(&mut self, name: &str) -> MBlock {
        let block = MBlock(self.blocks.len() as u32);
        self.blocks.push(MBlockData {
            name: name.to_string(),
            head: None,
            tail: None,
            len: 0,
        });
        self.order.push(block);
        block
    }

    pub fn add_instr(
        &mut self,
        kind: MachineInstKind,
        operands: Vec<MachineOperand>,
        successors: Vec<MBlock>,
    ) -> MInstrId {
        let id = MInstrId(self.instrs.len() as u32);
        self.instrs.push(MInstrNode {
            kind,
            operands,
            successors,
            prev: None,
            next: None,
            parent: None,
        });
        id
    }

    fn node(&self, id: MInstrId) -> &MInstrNode {
        &self.instrs[id.0 as usize]
    }

    fn node_mut(&mut self, id: MInstrId) -> &mut MInstrNode {
        &mut self.instrs[id.0 as usize]
    }

    pub fn kind(&self, id: MInstrId) -> &MachineInstKind {
        &self.node(id).kind
    }

    pub fn parent(&self, id: MInstrId) -> Option<MBlock> {
        self.node(id).parent
    }

    pub fn num_operands(&self, id: MInstrId) -> usize {
        self.node(id).operands.len()
    }

    pub fn operand(&self, id: MInstrId, idx: usize) -> MachineOperand {
        self.node(id).operands[idx]
    }

    pub fn replace_operand(&mut self, id: MInstrId, idx: usize, new: MachineOperand) {
        self.node_mut(id).operands[idx] = new;
    }

    pub fn successors(&self, id: MInstrId) -> &[MBlock] {
        &self.node(id).successors
    }

    pub fn head(&self, block: MBlock) -> Option<MInstrId> {
        self.blocks[block.0 as usize].head
    }

    pub fn tail(&self, block: MBlock) -> Option<MInstrId> {
        self.blocks[block.0 as usize].tail
    }

    pub fn block_len(&self, block: MBlock) -> usize {
        self.blocks[block.0 as usize].len
    }

    /// Snapshot of a block's instructions in program order
    pub fn instrs(&self, block: MBlock) -> Vec<MInstrId> {
        let mut out = Vec::with_capacity(self.block_len(block));
        let mut cur = self.head(block);
        while let Some(id) = cur {
            out.push(id);
            cur = self.node(id).next;
        }
        out
    }

    pub fn append(&mut self, block: MBlock, inst: MInstrId) {
        assert!(
            self.node(inst).parent.is_none(),
            "instruction already belongs to a basic block"
        );
        let tail = self.blocks[block.0 as usize].tail;
        self.node_mut(inst).prev = tail;
        match tail {
            Some(t) => self.node_mut(t).next = Some(inst),
            None => self.blocks[block.0 as usize].head = Some(inst),
        }
        self.blocks[block.0 as usize].tail = Some(inst);
        self.node_mut(inst).parent = Some(block);
        self.blocks[block.0 as usize].len += 1;
    }

    pub fn insert_before(&mut self, inst: MInstrId, before: MInstrId) {
        let block = self
            .node(before)
            .parent
            .expect("anchor instruction does not belong to a basic block");
        assert!(
            self.node(inst).parent.is_none(),
            "instruction already belongs to a basic block"
        );
        let prev = self.node(before).prev;
        self.node_mut(inst).prev = prev;
        self.node_mut(inst).next = Some(before);
        self.node_mut(before).prev = Some(inst);
        match prev {
            Some(p) => self.node_mut(p).next = Some(inst),
            None => self.blocks[block.0 as usize].head = Some(inst),
        }
        self.node_mut(inst).parent = Some(block);
        self.blocks[block.0 as usize].len += 1;
    }

    pub fn insert_after(&mut self, inst: MInstrId, after: MInstrId) {
        let block = self
            .node(after)
            .parent
            .expect("anchor instruction does not belong to a basic block");
        assert!(
            self.node(inst).parent.is_none(),
            "instruction already belongs to a basic block"
        );
        let next = self.node(after).next;
        self.node_mut(inst).prev = Some(after);
        self.node_mut(inst).next = next;
        self.node_mut(after).next = Some(inst);
        match next {
            Some(n) => self.node_mut(n).prev = Some(inst),
            None => self.blocks[block.0 as usize].tail = Some(inst),
        }
        self.node_mut(inst).parent = Some(block);
        self.blocks[block.0 as usize].len += 1;
    }

    pub fn remove_instr(&mut self, inst: MInstrId) {
        let block = self
            .node(inst)
            .parent
            .expect("instruction does not belong to a basic block");
        let prev = self.node(inst).prev;
        let next = self.node(inst).next;
        if self.blocks[block.0 as usize].head == Some(inst) {
            self.blocks[block.0 as usize].head = next;
        }
        if self.blocks[block.0 as usize].tail == Some(inst) {
            self.blocks[block.0 as usize].tail = prev;
        }
        if let Some(p) = prev {
            self.node_mut(p).next = next;
        }
        if let Some(n) = next {
            self.node_mut(n).prev = prev;
        }
        let node = self.node_mut(inst);
        node.prev = None;
        node.next = None;
        node.parent = None;
        self.blocks[block.0 as usize].len -= 1;
    }

    pub fn block_successors(&self, block: MBlock) -> Vec<MBlock> {
        let tail = self.tail(block).expect("empty basic block");
        assert!(
            self.node(tail).kind.is_terminator(),
            "basic block does not end with a terminator"
        );
        self.node(tail).successors.clone()
    }

    pub fn block_predecessors(&self, block: MBlock) -> Vec<MBlock> {
        let mut preds = Vec::new();
        for b in self.blocks() {
            if self.block_successors(b).contains(&block) {
                preds.push(b);
            }
        }
        preds
    }

    /// Whether the block returns from the function
    pub fn is_exit(&self, block: MBlock) -> bool {
        match self.tail(block) {
            Some(tail) => *self.kind(tail) == MachineInstKind::Ret,
            None => false,
        }
    }

    pub fn post_order(&self) -> Vec<MBlock> {
        let mut visited = BTreeSet::new();
        let mut out = Vec::new();
        self.post_order_impl(self.entry(), &mut visited, &mut out);
        out
    }

    fn post_order_impl(&self, current: MBlock, visited: &mut BTreeSet<MBlock>, out: &mut Vec<MBlock>) {
        if !visited.insert(current) {
            return;
        }
        for succ in self.block_successors(current) {
            self.post_order_impl(succ, visited, out);
        }
        out.push(current);
    }

    /// Check encodable operand forms, as established by the post-allocation
    /// fixup: no virtual registers, no memory/memory pairs, immediates
    /// where x86 accepts them.
    pub fn verify_operand_forms(&self) -> bool {
        let rmi = |src: MachineOperand, dst: MachineOperand| {
            (src.is_register() && dst.is_rm())
                || (src.is_immediate() && dst.is_register())
                || (src.is_memory() && dst.is_register())
        };
        for block in self.blocks() {
            for id in self.instrs(block) {
                let node = self.node(id);
                let ok = match &node.kind {
                    MachineInstKind::Mov
                    | MachineInstKind::Add
                    | MachineInstKind::Sub
                    | MachineInstKind::Or
                    | MachineInstKind::Xor
                    | MachineInstKind::And
                    | MachineInstKind::Test
                    | MachineInstKind::Cmp => rmi(node.operands[0], node.operands[1]),
                    MachineInstKind::CMov(_) => {
                        node.operands[0].is_rm() && node.operands[1].is_register()
                    }
                    MachineInstKind::IMul => {
                        node.operands[0].is_rm() && node.operands[1].is_register()
                    }
                    MachineInstKind::IDiv => node.operands[0].is_rm(),
                    MachineInstKind::Push => {
                        node.operands[0].is_rm() || node.operands[0].is_immediate()
                    }
                    MachineInstKind::Pop => node.operands[0].is_machine_register(),
                    MachineInstKind::Lea(_) => node.operands[0].is_register(),
                    _ => true,
                };
                if !ok || node.operands.iter().any(|op| op.is_virtual()) {
                    return false;
                }
            }
        }
        true
    }

    fn emit_instr(&self, id: MInstrId, out: &mut String) {
        let node = self.node(id);
        let two = |out: &mut String, mnemonic: &str, node: &MInstrNode| {
            let _ = write!(out, "{} {}, {}", mnemonic, node.operands[1], node.operands[0]);
        };
        match &node.kind {
            MachineInstKind::Mov => two(out, "mov", node),
            MachineInstKind::CMov(cond) => {
                let _ = write!(
                    out,
                    "cmov{} {}, {}",
                    cond, node.operands[1], node.operands[0]
                );
            }
            MachineInstKind::Add => two(out, "add", node),
            MachineInstKind::Sub => two(out, "sub", node),
            MachineInstKind::IMul => two(out, "imul", node),
            MachineInstKind::IDiv => {
                let _ = write!(out, "idiv {}", node.operands[0]);
            }
            MachineInstKind::Or => two(out, "or", node),
            MachineInstKind::Xor => two(out, "xor", node),
            MachineInstKind::And => two(out, "and", node),
            MachineInstKind::Test => two(out, "test", node),
            MachineInstKind::Cmp => two(out, "cmp", node),
            MachineInstKind::Jmp => {
                let _ = write!(out, "jmp {}", self.block_name(node.successors[0]));
            }
            MachineInstKind::Jcc(cond) => {
                let _ = write!(
                    out,
                    "j{} {}\njmp {}",
                    cond,
                    self.block_name(node.successors[0]),
                    self.block_name(node.successors[1])
                );
            }
            MachineInstKind::Ret => out.push_str("ret"),
            MachineInstKind::Push => {
                let _ = write!(out, "push {}", node.operands[0]);
            }
            MachineInstKind::Pop => {
                let _ = write!(out, "pop {}", node.operands[0]);
            }
            MachineInstKind::Call(callee) => {
                let _ = write!(out, "call {}{}", FUNCTION_PREFIX, callee);
            }
            MachineInstKind::Lea(label) => {
                let _ = write!(out, "lea {}, {}", node.operands[0], label);
            }
            MachineInstKind::Cqo => out.push_str("cqo"),
        }
    }

    /// Append the function's text-section body to `out`
    pub fn emit(&self, out: &mut String) {
        let _ = writeln!(out, ".global {}{}", FUNCTION_PREFIX, self.name);
        let _ = writeln!(out, "{}{}:", FUNCTION_PREFIX, self.name);
        for block in self.blocks() {
            let _ = writeln!(out, "{}:", self.block_name(block));
            for id in self.instrs(block) {
                self.emit_instr(id, out);
                out.push('\n');
            }
        }
    }
}
