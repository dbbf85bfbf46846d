//! Three-address intermediate representation.
//!
//! A `Module` owns `Function`s; a function owns an ordered list of basic
//! blocks (entry first) and two arenas: one for block data and one for
//! instruction nodes. Blocks and instructions are referred to by stable
//! integer handles (`Block`, `InstrId`); an instruction node carries
//! `prev`/`next`/`parent` handles forming an intrusive doubly-linked list
//! per block. Detaching clears those links; inserting an already-parented
//! instruction is a programming error and panics.
//!
//! Only terminators (`Jmp`, `Jnz`, `Ret`, `RetVoid`) carry successor edges.
//! `Jnz` successors are ordered `[true_target, false_target]`.

pub mod builder;
pub mod interp;

use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Stable handle to a basic block within its function
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(pub(crate) u32);

/// Stable handle to an instruction node within its function
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub(crate) u32);

/// A TAC operand. Equality and ordering are structural.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operand {
    /// Virtual register with a dense per-function id
    Register(usize),
    Immediate(i64),
    /// 0-based function parameter
    Parameter(usize),
}

impl Operand {
    pub fn is_register(&self) -> bool {
        matches!(self, Operand::Register(_))
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self, Operand::Immediate(_))
    }

    pub fn is_parameter(&self) -> bool {
        matches!(self, Operand::Parameter(_))
    }

    pub fn reg_id(&self) -> usize {
        match self {
            Operand::Register(id) => *id,
            _ => panic!("operand is not a register"),
        }
    }

    pub fn imm(&self) -> i64 {
        match self {
            Operand::Immediate(v) => *v,
            _ => panic!("operand is not an immediate"),
        }
    }

    pub fn param(&self) -> usize {
        match self {
            Operand::Parameter(p) => *p,
            _ => panic!("operand is not a parameter"),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operand::Register(id) => write!(f, "%{}", id),
            Operand::Immediate(v) => write!(f, "#{:x}", v),
            Operand::Parameter(p) => write!(f, "${}", p),
        }
    }
}

/// Binary operations. Comparisons produce integer 0/1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl BinaryOp {
    /// Evaluate the operation on two constants. Returns `None` for
    /// combinations that would trap at runtime (division or remainder by
    /// zero, shift counts outside 0..=63); arithmetic wraps.
    pub fn evaluate(self, lhs: i64, rhs: i64) -> Option<i64> {
        let result = match self {
            BinaryOp::Add => lhs.wrapping_add(rhs),
            BinaryOp::Sub => lhs.wrapping_sub(rhs),
            BinaryOp::Mul => lhs.wrapping_mul(rhs),
            BinaryOp::Div => {
                if rhs == 0 {
                    return None;
                }
                lhs.wrapping_div(rhs)
            }
            BinaryOp::Mod => {
                if rhs == 0 {
                    return None;
                }
                lhs.wrapping_rem(rhs)
            }
            BinaryOp::And => lhs & rhs,
            BinaryOp::Or => lhs | rhs,
            BinaryOp::Xor => lhs ^ rhs,
            BinaryOp::Shl => {
                if !(0..64).contains(&rhs) {
                    return None;
                }
                lhs.wrapping_shl(rhs as u32)
            }
            BinaryOp::Shr => {
                if !(0..64).contains(&rhs) {
                    return None;
                }
                lhs.wrapping_shr(rhs as u32)
            }
            BinaryOp::Lt => (lhs < rhs) as i64,
            BinaryOp::Le => (lhs <= rhs) as i64,
            BinaryOp::Gt => (lhs > rhs) as i64,
            BinaryOp::Ge => (lhs >= rhs) as i64,
            BinaryOp::Eq => (lhs == rhs) as i64,
            BinaryOp::Ne => (lhs != rhs) as i64,
        };
        Some(result)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
        };
        write!(f, "{}", s)
    }
}

/// Instruction discriminator. Call-like tags carry their callee name,
/// `LoadLabel` the data label it materialises.
#[derive(Clone, Debug, PartialEq)]
pub enum InstrKind {
    Nop,
    /// `dst = src`; operands `[dst, src]`
    Assign,
    /// `dst = a op b`; operands `[dst, a, b]`
    Binary(BinaryOp),
    /// successors `[target]`
    Jmp,
    /// operands `[cond]`; successors `[true_target, false_target]`
    Jnz,
    /// `dst = call callee(args…)`; operands `[dst, args…]`
    Call(String),
    /// operands `[args…]`
    CallVoid(String),
    /// operands `[value]`
    Ret,
    RetVoid,
    /// `dst = array_new(size)`; operands `[dst, size]`
    ArrayNew,
    /// `dst = arr[idx]`; operands `[dst, arr, idx]`
    ArrayLoad,
    /// `arr[idx] = val`; operands `[arr, idx, val]`
    ArrayStore,
    /// `dst = &label`; operands `[dst]`
    LoadLabel(String),
}

impl InstrKind {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstrKind::Jmp | InstrKind::Jnz | InstrKind::Ret | InstrKind::RetVoid
        )
    }

    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            InstrKind::Jmp
                | InstrKind::Jnz
                | InstrKind::Ret
                | InstrKind::RetVoid
                | InstrKind::Call(_)
                | InstrKind::CallVoid(_)
                | InstrKind::ArrayNew
                | InstrKind::ArrayStore
        )
    }

    /// Expected successor-edge count
    fn num_successors(&self) -> usize {
        match self {
            InstrKind::Jmp => 1,
            InstrKind::Jnz => 2,
            _ => 0,
        }
    }

    /// Expected operand count; `None` for variadic call tags
    fn arity(&self) -> Option<usize> {
        match self {
            InstrKind::Nop | InstrKind::Jmp | InstrKind::RetVoid => Some(0),
            InstrKind::Jnz | InstrKind::Ret | InstrKind::LoadLabel(_) => Some(1),
            InstrKind::Assign | InstrKind::ArrayNew => Some(2),
            InstrKind::Binary(_) | InstrKind::ArrayLoad | InstrKind::ArrayStore => Some(3),
            InstrKind::Call(_) | InstrKind::CallVoid(_) => None,
        }
    }
}

struct InstrNode {
    kind: InstrKind,
    operands: Vec<Operand>,
    successors: Vec<Block>,
    prev: Option<InstrId>,
    next: Option<InstrId>,
    parent: Option<Block>,
}

struct BlockData {
    index: usize,
    head: Option<InstrId>,
    tail: Option<InstrId>,
    len: usize,
}

/// IR verification failure. These are compiler bugs, not user errors.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("function {func}: block bb{block} is empty")]
    EmptyBlock { func: String, block: usize },
    #[error("function {func}: block bb{block} does not end with a terminator")]
    MissingTerminator { func: String, block: usize },
    #[error("function {func}: non-terminator carries successor edges in bb{block}")]
    StraySuccessors { func: String, block: usize },
    #[error("function {func}: bad operand count for {kind:?} in bb{block}")]
    OperandArity {
        func: String,
        block: usize,
        kind: InstrKind,
    },
}

pub struct Function {
    name: String,
    num_params: usize,
    num_regs: usize,
    order: Vec<Block>,
    blocks: Vec<BlockData>,
    instrs: Vec<InstrNode>,
}

impl Function {
    pub fn new(name: &str, num_params: usize) -> Self {
        Self {
            name: name.to_string(),
            num_params,
            num_regs: 0,
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

    pub fn num_regs(&self) -> usize {
        self.num_regs
    }

    /// Mint a fresh virtual-register id
    pub fn new_reg(&mut self) -> usize {
        let id = self.num_regs;
        self.num_regs += 1;
        id
    }

    pub fn entry(&self) -> Block {
        self.order[0]
    }

    pub fn num_blocks(&self) -> usize {
        self.order.len()
    }

    pub fn blocks(&self) -> impl Iterator<Item = Block> + '_ {
        self.order.iter().copied()
    }

    /// Stable index assigned at creation; survives removals of siblings
    pub fn block_index(&self, block: Block) -> usize {
        self.blocks[block.0 as usize].index
    }

    pub fn create_block(&mut self) -> Block {
        let block = Block(self.blocks.len() as u32);
        self.blocks.push(BlockData {
            index: self.blocks.len(),
            head: None,
            tail: None,
            len: 0,
        });
        self.order.push(block);
        block
    }

    /// Detach a block from the function's block list. Its instructions stay
    /// in the arena but are no longer reachable.
    pub fn remove_block(&mut self, block: Block) {
        let pos = self
            .order
            .iter()
            .position(|b| *b == block)
            .expect("block does not belong to this function");
        self.order.remove(pos);
    }

    /// Allocate a detached instruction node
    pub fn add_instr(
        &mut self,
        kind: InstrKind,
        operands: Vec<Operand>,
        successors: Vec<Block>,
    ) -> InstrId {
        let id = InstrId(self.instrs.len() as u32);
        self.instrs.push(InstrNode {
            kind,
            operands,
            successors,
            prev: None,
            next: None,
            parent: None,
        });
        id
    }

    fn node(&self, id: InstrId) -> &InstrNode {
        &self.instrs[id.0 as usize]
    }

    fn node_mut(&mut self, id: InstrId) -> &mut InstrNode {
        &mut self.instrs[id.0 as usize]
    }

    pub fn kind(&self, id: InstrId) -> &InstrKind {
        &self.node(id).kind
    }

    pub fn parent(&self, id: InstrId) -> Option<Block> {
        self.node(id).parent
    }

    pub fn num_operands(&self, id: InstrId) -> usize {
        self.node(id).operands.len()
    }

    pub fn operand(&self, id: InstrId, idx: usize) -> Operand {
        self.node(id).operands[idx]
    }

    pub fn successors(&self, id: InstrId) -> &[Block] {
        &self.node(id).successors
    }

    pub fn is_terminator(&self, id: InstrId) -> bool {
        self.node(id).kind.is_terminator()
    }

    pub fn has_side_effects(&self, id: InstrId) -> bool {
        self.node(id).kind.has_side_effects()
    }

    /// Number of operands this instruction reads
    pub fn ins(&self, id: InstrId) -> usize {
        let node = self.node(id);
        match node.kind {
            InstrKind::Assign | InstrKind::ArrayNew | InstrKind::Ret | InstrKind::Jnz => 1,
            InstrKind::Binary(_) | InstrKind::ArrayLoad => 2,
            InstrKind::ArrayStore => 3,
            InstrKind::Call(_) => node.operands.len() - 1,
            InstrKind::CallVoid(_) => node.operands.len(),
            InstrKind::Nop | InstrKind::Jmp | InstrKind::RetVoid | InstrKind::LoadLabel(_) => 0,
        }
    }

    /// Number of operands this instruction writes
    pub fn outs(&self, id: InstrId) -> usize {
        match self.node(id).kind {
            InstrKind::Assign
            | InstrKind::Binary(_)
            | InstrKind::Call(_)
            | InstrKind::ArrayNew
            | InstrKind::ArrayLoad
            | InstrKind::LoadLabel(_) => 1,
            _ => 0,
        }
    }

    /// Operand index of the instruction's `idx`-th input
    fn in_slot(&self, id: InstrId, idx: usize) -> usize {
        assert!(idx < self.ins(id), "invalid input id");
        match self.node(id).kind {
            InstrKind::Assign | InstrKind::ArrayNew => 1,
            InstrKind::Binary(_) | InstrKind::ArrayLoad | InstrKind::Call(_) => idx + 1,
            InstrKind::ArrayStore | InstrKind::CallVoid(_) | InstrKind::Ret | InstrKind::Jnz => idx,
            _ => unreachable!(),
        }
    }

    pub fn get_in(&self, id: InstrId, idx: usize) -> Operand {
        self.node(id).operands[self.in_slot(id, idx)]
    }

    pub fn replace_in(&mut self, id: InstrId, idx: usize, new: Operand) {
        let slot = self.in_slot(id, idx);
        self.node_mut(id).operands[slot] = new;
    }

    pub fn get_out(&self, id: InstrId, idx: usize) -> Operand {
        assert!(idx < self.outs(id), "invalid output id");
        self.node(id).operands[0]
    }

    pub fn replace_out(&mut self, id: InstrId, idx: usize, new: Operand) {
        assert!(idx < self.outs(id), "invalid output id");
        self.node_mut(id).operands[0] = new;
    }

    pub fn head(&self, block: Block) -> Option<InstrId> {
        self.blocks[block.0 as usize].head
    }

    pub fn tail(&self, block: Block) -> Option<InstrId> {
        self.blocks[block.0 as usize].tail
    }

    pub fn block_len(&self, block: Block) -> usize {
        self.blocks[block.0 as usize].len
    }

    /// Snapshot of a block's instructions in program order. Safe to use
    /// while mutating the block afterwards; the handles stay valid.
    pub fn instrs(&self, block: Block) -> Vec<InstrId> {
        let mut out = Vec::with_capacity(self.block_len(block));
        let mut cur = self.head(block);
        while let Some(id) = cur {
            out.push(id);
            cur = self.node(id).next;
        }
        out
    }

    /// Snapshot in reverse program order
    pub fn instrs_rev(&self, block: Block) -> Vec<InstrId> {
        let mut out = Vec::with_capacity(self.block_len(block));
        let mut cur = self.tail(block);
        while let Some(id) = cur {
            out.push(id);
            cur = self.node(id).prev;
        }
        out
    }

    pub fn append(&mut self, block: Block, inst: InstrId) {
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

    pub fn insert_before(&mut self, inst: InstrId, before: InstrId) {
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

    pub fn insert_after(&mut self, inst: InstrId, after: InstrId) {
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

    /// Splice `inst` into the position of `target`, detaching `target`
    pub fn replace(&mut self, inst: InstrId, target: InstrId) {
        let block = self
            .node(target)
            .parent
            .expect("target instruction does not belong to a basic block");
        assert!(
            self.node(inst).parent.is_none(),
            "instruction already belongs to a basic block"
        );
        let prev = self.node(target).prev;
        let next = self.node(target).next;
        if self.blocks[block.0 as usize].head == Some(target) {
            self.blocks[block.0 as usize].head = Some(inst);
        }
        if self.blocks[block.0 as usize].tail == Some(target) {
            self.blocks[block.0 as usize].tail = Some(inst);
        }
        if let Some(p) = prev {
            self.node_mut(p).next = Some(inst);
        }
        if let Some(n) = next {
            self.node_mut(n).prev = Some(inst);
        }
        self.node_mut(inst).prev = prev;
        self.node_mut(inst).next = next;
        self.node_mut(inst).parent = Some(block);

        let target = self.node_mut(target);
        target.prev = None;
        target.next = None;
        target.parent = None;
    }

    /// Detach an instruction from its block
    pub fn remove_instr(&mut self, inst: InstrId) {
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

    /// Successor blocks, read off the block's terminator
    pub fn block_successors(&self, block: Block) -> Vec<Block> {
        let tail = self.tail(block).expect("empty basic block");
        assert!(
            self.is_terminator(tail),
            "basic block does not end with a terminator"
        );
        self.node(tail).successors.clone()
    }

    /// Predecessors, computed by scanning sibling blocks
    pub fn block_predecessors(&self, block: Block) -> Vec<Block> {
        let mut preds = Vec::new();
        for b in self.blocks() {
            if self.block_successors(b).contains(&block) {
                preds.push(b);
            }
        }
        preds
    }

    /// Whether the block ends the function
    pub fn is_exit(&self, block: Block) -> bool {
        let tail = self.tail(block).expect("basic block has no terminator");
        matches!(self.node(tail).kind, InstrKind::Ret | InstrKind::RetVoid)
    }

    /// Depth-first post-order over blocks reachable from entry
    pub fn post_order(&self) -> Vec<Block> {
        let mut visited = BTreeSet::new();
        let mut out = Vec::new();
        self.post_order_impl(self.entry(), &mut visited, &mut out);
        out
    }

    fn post_order_impl(&self, current: Block, visited: &mut BTreeSet<Block>, out: &mut Vec<Block>) {
        if !visited.insert(current) {
            return;
        }
        for succ in self.block_successors(current) {
            self.post_order_impl(succ, visited, out);
        }
        out.push(current);
    }

    /// Structural checks: every block non-empty and terminated, successor
    /// edges only on terminators, per-tag operand counts.
    pub fn verify(&self) -> Result<(), VerifyError> {
        for block in self.blocks() {
            let index = self.block_index(block);
            let instrs = self.instrs(block);
            let Some(&last) = instrs.last() else {
                return Err(VerifyError::EmptyBlock {
                    func: self.name.clone(),
                    block: index,
                });
            };
            if !self.is_terminator(last) {
                return Err(VerifyError::MissingTerminator {
                    func: self.name.clone(),
                    block: index,
                });
            }
            for id in instrs {
                let node = self.node(id);
                if !node.kind.is_terminator() && !node.successors.is_empty() {
                    return Err(VerifyError::StraySuccessors {
                        func: self.name.clone(),
                        block: index,
                    });
                }
                let arity_ok = match node.kind.arity() {
                    Some(n) => node.operands.len() == n,
                    None => match node.kind {
                        InstrKind::Call(_) => !node.operands.is_empty(),
                        _ => true,
                    },
                };
                if !arity_ok || node.successors.len() != node.kind.num_successors() {
                    return Err(VerifyError::OperandArity {
                        func: self.name.clone(),
                        block: index,
                        kind: node.kind.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn format_instr(&self, id: InstrId, f: &mut fmt::Formatter) -> fmt::Result {
        let node = self.node(id);
        match &node.kind {
            InstrKind::Nop => write!(f, "nop"),
            InstrKind::Assign => write!(f, "{} = {}", node.operands[0], node.operands[1]),
            InstrKind::Binary(op) => write!(
                f,
                "{} = {} {} {}",
                node.operands[0], node.operands[1], op, node.operands[2]
            ),
            InstrKind::Jmp => write!(f, "jmp bb{}", self.block_index(node.successors[0])),
            InstrKind::Jnz => write!(
                f,
                "jnz {}, bb{}, bb{}",
                node.operands[0],
                self.block_index(node.successors[0]),
                self.block_index(node.successors[1])
            ),
            InstrKind::Call(callee) => {
                write!(f, "{} = call {}", node.operands[0], callee)?;
                for arg in &node.operands[1..] {
                    write!(f, " {}", arg)?;
                }
                Ok(())
            }
            InstrKind::CallVoid(callee) => {
                write!(f, "call {}", callee)?;
                for arg in &node.operands {
                    write!(f, " {}", arg)?;
                }
                Ok(())
            }
            InstrKind::Ret => write!(f, "ret {}", node.operands[0]),
            InstrKind::RetVoid => write!(f, "ret void"),
            InstrKind::ArrayNew => {
                write!(f, "{} = array_new {}", node.operands[0], node.operands[1])
            }
            InstrKind::ArrayLoad => write!(
                f,
                "{} = {}[{}]",
                node.operands[0], node.operands[1], node.operands[2]
            ),
            InstrKind::ArrayStore => write!(
                f,
                "{}[{}] = {}",
                node.operands[0], node.operands[1], node.operands[2]
            ),
            InstrKind::LoadLabel(label) => {
                write!(f, "{} = load_label {}", node.operands[0], label)
            }
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "define {}", self.name)?;
        for block in self.blocks() {
            writeln!(f, "bb{}:", self.block_index(block))?;
            for id in self.instrs(block) {
                write!(f, "\t")?;
                self.format_instr(id, f)?;
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

/// A compilation unit: an ordered list of functions
pub struct Module {
    name: String,
    functions: Vec<Function>,
}

impl Module {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            functions: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_function(&mut self, func: Function) {
        self.functions.push(func);
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.iter()
    }

    pub fn functions_mut(&mut self) -> impl Iterator<Item = &mut Function> {
        self.functions.iter_mut()
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name() == name)
    }
}
