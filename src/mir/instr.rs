// src/mir/instr.rs
//
// A machine instruction: opcode, ordered operand list (defs first), and
// the modifier state carried by the extended VALU encodings.

use smallvec::SmallVec;

use crate::target::opcodes::{Opcode, OpcodeDesc};

use super::function::BlockId;
use super::operand::Operand;

/// Output-scale modifier: multiplies the result by a small power-of-two
/// factor without a separate multiply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutMod {
    #[default]
    None,
    Div2,
    Mul2,
    Mul4,
}

impl OutMod {
    pub fn name(self) -> &'static str {
        match self {
            OutMod::None => "none",
            OutMod::Div2 => "div2",
            OutMod::Mul2 => "mul2",
            OutMod::Mul4 => "mul4",
        }
    }
}

/// Per-source negate/absolute modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SrcMods {
    pub neg: bool,
    pub abs: bool,
}

impl SrcMods {
    #[inline]
    pub fn is_neutral(self) -> bool {
        !self.neg && !self.abs
    }
}

/// Modifier state of one instruction. Only meaningful for opcodes whose
/// descriptor carries `has_modifiers`; neutral everywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstrMods {
    /// Saturate the result to the canonical range.
    pub clamp: bool,
    pub omod: OutMod,
    /// Indexed by source number (not slot index).
    pub src: [SrcMods; 3],
}

#[derive(Debug, Clone)]
pub struct Instr {
    pub opcode: Opcode,
    pub operands: SmallVec<[Operand; 4]>,
    pub block: BlockId,
    pub mods: InstrMods,
    /// No-signed-zeros fast-math flag.
    pub nsz: bool,
}

impl Instr {
    pub fn new(opcode: Opcode, operands: impl IntoIterator<Item = Operand>) -> Instr {
        Instr {
            opcode,
            operands: operands.into_iter().collect(),
            block: BlockId::UNPLACED,
            mods: InstrMods::default(),
            nsz: false,
        }
    }

    pub fn with_clamp(mut self) -> Instr {
        self.mods.clamp = true;
        self
    }

    pub fn with_omod(mut self, omod: OutMod) -> Instr {
        self.mods.omod = omod;
        self
    }

    pub fn with_nsz(mut self) -> Instr {
        self.nsz = true;
        self
    }

    #[inline]
    pub fn desc(&self) -> OpcodeDesc {
        self.opcode.desc()
    }

    /// Source-modifier state of source `n`.
    #[inline]
    pub fn src_mod(&self, n: usize) -> SrcMods {
        self.mods.src.get(n).copied().unwrap_or_default()
    }

    /// Number of leading def slots in the operand list.
    #[inline]
    pub fn num_defs(&self) -> usize {
        self.desc().num_defs as usize
    }

    pub fn dst(&self) -> &Operand {
        &self.operands[0]
    }
}
