// src/fold/candidate.rs
//
// Ephemeral fold-candidate records. A candidate lives for exactly one
// collect/apply cycle; nothing here touches the instruction graph.

use smallvec::SmallVec;

use crate::mir::{GlobalRef, InstrId, Operand, RegOperand};
use crate::target::Opcode;

/// The value being propagated into a use slot.
#[derive(Debug, Clone)]
pub enum FoldValue {
    Imm(i64),
    FrameIndex(u32),
    Global(GlobalRef),
    Reg(RegOperand),
}

impl FoldValue {
    pub fn from_operand(op: &Operand) -> Option<FoldValue> {
        match op {
            Operand::Imm(v) => Some(FoldValue::Imm(*v)),
            Operand::FrameIndex(fi) => Some(FoldValue::FrameIndex(*fi)),
            Operand::Global(g) => Some(FoldValue::Global(g.clone())),
            Operand::Reg(r) => Some(FoldValue::Reg(*r)),
            Operand::Phys(_) => None,
        }
    }

    pub fn to_operand(&self) -> Operand {
        match self {
            FoldValue::Imm(v) => Operand::Imm(*v),
            FoldValue::FrameIndex(fi) => Operand::FrameIndex(*fi),
            FoldValue::Global(g) => Operand::Global(g.clone()),
            FoldValue::Reg(r) => Operand::Reg(*r),
        }
    }

    #[inline]
    pub fn is_imm_like(&self) -> bool {
        !matches!(self, FoldValue::Reg(_))
    }
}

/// One pending edit: write `value` into `slot` of `use_instr`.
#[derive(Debug, Clone)]
pub struct FoldCandidate {
    pub use_instr: InstrId,
    pub slot: usize,
    pub value: FoldValue,
    /// The instruction that owns the source operand; consulted for the
    /// execution-mask guard at apply time.
    pub source_def: InstrId,
    /// The use was commuted into this slot; undone if the apply fails.
    pub commuted: bool,
    /// Rebuild as this narrow twin at apply time (flag register
    /// permitting).
    pub shrink_to: Option<Opcode>,
}

pub type FoldList = SmallVec<[FoldCandidate; 4]>;

/// A foldable source: the operand value plus the instruction it lives
/// in (the defining move or copy).
#[derive(Debug, Clone)]
pub struct FoldSource {
    pub op: Operand,
    pub def: InstrId,
}

/// Whether `instr` is already the target of a pending fold. Folding a
/// second operand of the same instruction must not commute it.
pub fn in_fold_list(list: &FoldList, instr: InstrId) -> bool {
    list.iter().any(|c| c.use_instr == instr)
}
