// src/mir/function.rs
//
// Arena-backed machine function. Instructions and blocks are stored in
// flat vectors and addressed by Copy handles; erased instructions leave
// a tombstone so stale ids are detectable. Every operand mutation goes
// through the methods here, which keep the def table and the per-register
// use lists consistent (collect-then-apply folding depends on that).

use smallvec::SmallVec;

use crate::target::opcodes::Opcode;

use super::instr::{Instr, InstrMods};
use super::operand::{Operand, PhysReg, RegClass, VirtualReg};

/// Handle to an instruction in the function arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstrId(u32);

impl InstrId {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Handle to a basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub(crate) u32);

impl BlockId {
    /// Placeholder for instructions not yet appended to a block.
    pub const UNPLACED: BlockId = BlockId(u32::MAX);

    pub fn index(self) -> u32 {
        self.0
    }
}

/// One use of a virtual register: the using instruction and the operand
/// slot inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UseRef {
    pub instr: InstrId,
    pub slot: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub name: String,
    instrs: Vec<InstrId>,
    pub succs: SmallVec<[BlockId; 2]>,
}

impl Block {
    pub fn instrs(&self) -> &[InstrId] {
        &self.instrs
    }
}

/// Function-level float mode bits gating the output-scale merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FloatMode {
    pub ieee: bool,
    pub no_signed_zeros: bool,
    pub fp32_denormals: bool,
    pub fp16_denormals: bool,
}

#[derive(Debug)]
pub struct MirFunction {
    pub name: String,
    pub float_mode: FloatMode,
    blocks: Vec<Block>,
    instrs: Vec<Option<Instr>>,
    reg_classes: Vec<RegClass>,
    defs: Vec<Option<InstrId>>,
    uses: Vec<SmallVec<[UseRef; 4]>>,
}

impl MirFunction {
    pub fn new(name: impl Into<String>) -> MirFunction {
        MirFunction {
            name: name.into(),
            float_mode: FloatMode::default(),
            blocks: Vec::new(),
            instrs: Vec::new(),
            reg_classes: Vec::new(),
            defs: Vec::new(),
            uses: Vec::new(),
        }
    }

    // ========================================================================
    // Blocks
    // ========================================================================

    pub fn add_block(&mut self, name: impl Into<String>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block { name: name.into(), ..Block::default() });
        id
    }

    pub fn add_succ(&mut self, block: BlockId, succ: BlockId) {
        self.blocks[block.0 as usize].succs.push(succ);
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &Block)> {
        self.blocks.iter().enumerate().map(|(i, b)| (BlockId(i as u32), b))
    }

    /// Depth-first order over the control-flow graph from the entry
    /// block, with unreachable blocks appended in index order. Every
    /// block appears exactly once.
    pub fn block_order_dfs(&self) -> Vec<BlockId> {
        let mut order = Vec::with_capacity(self.blocks.len());
        let mut seen = vec![false; self.blocks.len()];
        if !self.blocks.is_empty() {
            let mut stack = vec![BlockId(0)];
            while let Some(bb) = stack.pop() {
                if std::mem::replace(&mut seen[bb.0 as usize], true) {
                    continue;
                }
                order.push(bb);
                // Push in reverse so the first successor is visited first.
                for &s in self.blocks[bb.0 as usize].succs.iter().rev() {
                    if !seen[s.0 as usize] {
                        stack.push(s);
                    }
                }
            }
        }
        for (i, was_seen) in seen.iter().enumerate() {
            if !was_seen {
                order.push(BlockId(i as u32));
            }
        }
        order
    }

    /// Snapshot of a block's instruction list; safe to iterate while
    /// erasing or inserting (check `is_live` per id).
    pub fn instr_ids(&self, block: BlockId) -> Vec<InstrId> {
        self.blocks[block.0 as usize].instrs.clone()
    }

    // ========================================================================
    // Registers
    // ========================================================================

    pub fn new_vreg(&mut self, class: RegClass) -> VirtualReg {
        let r = VirtualReg::new(self.reg_classes.len() as u32);
        self.reg_classes.push(class);
        self.defs.push(None);
        self.uses.push(SmallVec::new());
        r
    }

    pub fn num_vregs(&self) -> usize {
        self.reg_classes.len()
    }

    pub fn reg_class(&self, reg: VirtualReg) -> RegClass {
        self.reg_classes[reg.index() as usize]
    }

    /// The unique defining instruction of a virtual register, if any.
    pub fn def(&self, reg: VirtualReg) -> Option<InstrId> {
        self.defs[reg.index() as usize]
    }

    pub fn uses(&self, reg: VirtualReg) -> &[UseRef] {
        &self.uses[reg.index() as usize]
    }

    /// Whether exactly one instruction uses `reg`. A register used twice
    /// by the same instruction (max x, x) still counts as one.
    pub fn has_one_use_instr(&self, reg: VirtualReg) -> bool {
        let mut first: Option<InstrId> = None;
        for u in self.uses(reg) {
            match first {
                None => first = Some(u.instr),
                Some(seen) if seen == u.instr => {}
                Some(_) => return false,
            }
        }
        first.is_some()
    }

    pub fn clear_kill_flags(&mut self, reg: VirtualReg) {
        let refs: SmallVec<[UseRef; 4]> = self.uses[reg.index() as usize].clone();
        for u in refs {
            if let Some(ins) = self.instrs[u.instr.0 as usize].as_mut()
                && let Operand::Reg(r) = &mut ins.operands[u.slot]
            {
                r.kill = false;
            }
        }
    }

    // ========================================================================
    // Instruction storage and mutation
    // ========================================================================

    pub fn push(&mut self, block: BlockId, instr: Instr) -> InstrId {
        let id = self.alloc(block, instr);
        self.blocks[block.0 as usize].instrs.push(id);
        id
    }

    /// Insert `instr` immediately after `after` in its block.
    pub fn insert_after(&mut self, after: InstrId, instr: Instr) -> InstrId {
        let block = self.instr(after).block;
        let id = self.alloc(block, instr);
        let list = &mut self.blocks[block.0 as usize].instrs;
        let pos = list.iter().position(|&i| i == after).expect("instruction not in its block");
        list.insert(pos + 1, id);
        id
    }

    fn alloc(&mut self, block: BlockId, mut instr: Instr) -> InstrId {
        instr.block = block;
        let id = InstrId(self.instrs.len() as u32);
        self.instrs.push(Some(instr));
        self.register_operands(id);
        id
    }

    #[inline]
    pub fn is_live(&self, id: InstrId) -> bool {
        self.instrs[id.0 as usize].is_some()
    }

    pub fn instr(&self, id: InstrId) -> &Instr {
        self.instrs[id.0 as usize].as_ref().expect("use of erased instruction")
    }

    pub fn mods_mut(&mut self, id: InstrId) -> &mut InstrMods {
        &mut self.instrs[id.0 as usize].as_mut().expect("use of erased instruction").mods
    }

    /// Replace one operand, keeping the use-def info consistent.
    pub fn set_operand(&mut self, id: InstrId, slot: usize, op: Operand) {
        self.unregister_slot(id, slot);
        self.instrs[id.0 as usize].as_mut().unwrap().operands[slot] = op;
        self.register_slot(id, slot);
    }

    /// Swap two operand slots (commutation), fixing use references and
    /// the per-source modifier state.
    pub fn swap_operands(&mut self, id: InstrId, a: usize, b: usize) {
        self.unregister_slot(id, a);
        self.unregister_slot(id, b);
        let ins = self.instrs[id.0 as usize].as_mut().unwrap();
        ins.operands.swap(a, b);
        let ndefs = ins.num_defs();
        if ins.desc().has_modifiers && a >= ndefs && b >= ndefs {
            ins.mods.src.swap(a - ndefs, b - ndefs);
        }
        self.register_slot(id, a);
        self.register_slot(id, b);
    }

    /// Change the opcode without touching the operand list. Only valid
    /// between shape-compatible descriptors (copy to move, two-address
    /// accumulate to its three-address twin).
    pub fn set_opcode(&mut self, id: InstrId, opcode: Opcode) {
        let ins = self.instrs[id.0 as usize].as_mut().expect("use of erased instruction");
        debug_assert_eq!(ins.desc().num_defs, opcode.desc().num_defs);
        ins.opcode = opcode;
    }

    /// Rebuild an instruction in place with a new opcode and operand
    /// list; modifier state resets to neutral.
    pub fn rebuild(&mut self, id: InstrId, opcode: Opcode, operands: impl IntoIterator<Item = Operand>) {
        self.unregister_operands(id);
        let ins = self.instrs[id.0 as usize].as_mut().unwrap();
        ins.opcode = opcode;
        ins.operands = operands.into_iter().collect();
        ins.mods = InstrMods::default();
        self.register_operands(id);
    }

    pub fn erase(&mut self, id: InstrId) {
        self.unregister_operands(id);
        let block = self.instr(id).block;
        self.blocks[block.0 as usize].instrs.retain(|&i| i != id);
        self.instrs[id.0 as usize] = None;
    }

    /// Redirect every use of `from` to `to` (no sub-register rewriting;
    /// callers only merge same-width results).
    pub fn replace_all_uses(&mut self, from: VirtualReg, to: VirtualReg) {
        let refs = std::mem::take(&mut self.uses[from.index() as usize]);
        for u in &refs {
            let ins = self.instrs[u.instr.0 as usize].as_mut().unwrap();
            match &mut ins.operands[u.slot] {
                Operand::Reg(r) => r.reg = to,
                _ => unreachable!("use list points at a non-register operand"),
            }
        }
        self.uses[to.index() as usize].extend(refs);
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Position of an instruction inside its block.
    pub fn position_of(&self, id: InstrId) -> (BlockId, usize) {
        let block = self.instr(id).block;
        let pos = self.blocks[block.0 as usize]
            .instrs
            .iter()
            .position(|&i| i == id)
            .expect("instruction not in its block");
        (block, pos)
    }

    /// Whether the instruction writes `phys`, explicitly or through an
    /// implicit descriptor def.
    pub fn modifies_phys(&self, id: InstrId, phys: PhysReg) -> bool {
        let ins = self.instr(id);
        if phys == PhysReg::Carry && ins.desc().writes_carry {
            return true;
        }
        let ndefs = ins.num_defs();
        ins.operands.iter().take(ndefs).any(|op| matches!(op, Operand::Phys(p) if *p == phys))
    }

    /// Whether the instruction reads `phys`, explicitly or through an
    /// implicit descriptor use (the execution mask on VALU opcodes).
    pub fn reads_phys(&self, id: InstrId, phys: PhysReg) -> bool {
        let ins = self.instr(id);
        if phys == PhysReg::Exec && ins.desc().reads_exec {
            return true;
        }
        let ndefs = ins.num_defs();
        ins.operands.iter().skip(ndefs).any(|op| matches!(op, Operand::Phys(p) if *p == phys))
    }

    /// Structural checks used by the CLI's `check` command.
    pub fn verify(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for (id, slot) in self.instrs.iter().enumerate() {
            let Some(ins) = slot else { continue };
            let desc = ins.desc();
            if desc.variadic {
                if ins.operands.len() < desc.num_defs as usize + 2
                    || (ins.operands.len() - desc.num_defs as usize) % 2 != 0
                {
                    problems.push(format!(
                        "%instr{id}: {} expects def plus element/half pairs",
                        desc.name
                    ));
                }
            } else if ins.operands.len() != desc.slots.len() {
                problems.push(format!(
                    "%instr{id}: {} expects {} operands, has {}",
                    desc.name,
                    desc.slots.len(),
                    ins.operands.len()
                ));
            }
            for (i, op) in ins.operands.iter().take(desc.num_defs as usize).enumerate() {
                if !matches!(op, Operand::Reg(_) | Operand::Phys(_)) {
                    problems.push(format!("%instr{id}: def slot {i} of {} is not a register", desc.name));
                }
            }
        }
        problems
    }

    // ========================================================================
    // Use-def upkeep
    // ========================================================================

    fn register_operands(&mut self, id: InstrId) {
        let n = self.instrs[id.0 as usize].as_ref().unwrap().operands.len();
        for slot in 0..n {
            self.register_slot(id, slot);
        }
    }

    fn unregister_operands(&mut self, id: InstrId) {
        let n = self.instrs[id.0 as usize].as_ref().unwrap().operands.len();
        for slot in 0..n {
            self.unregister_slot(id, slot);
        }
    }

    fn register_slot(&mut self, id: InstrId, slot: usize) {
        let ins = self.instrs[id.0 as usize].as_ref().unwrap();
        let ndefs = ins.num_defs();
        let Operand::Reg(r) = &ins.operands[slot] else { return };
        let reg = r.reg;
        if slot < ndefs {
            debug_assert!(
                self.defs[reg.index() as usize].is_none(),
                "virtual register defined twice"
            );
            self.defs[reg.index() as usize] = Some(id);
        } else {
            self.uses[reg.index() as usize].push(UseRef { instr: id, slot });
        }
    }

    fn unregister_slot(&mut self, id: InstrId, slot: usize) {
        let ins = self.instrs[id.0 as usize].as_ref().unwrap();
        let ndefs = ins.num_defs();
        let Operand::Reg(r) = &ins.operands[slot] else { return };
        let reg = r.reg;
        if slot < ndefs {
            self.defs[reg.index() as usize] = None;
        } else {
            self.uses[reg.index() as usize].retain(|u| !(u.instr == id && u.slot == slot));
        }
    }
}
