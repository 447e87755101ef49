// src/fold/merge.rs
//
// Two single-use/single-def merges over the folded graph: pushing a
// clamp from a max(x, x) down into x's producer, and turning a multiply
// by 0.5/2/4 (or the x + x self-add) into the producer's output-scale
// modifier.

use crate::mir::{InstrId, MirFunction, Operand, OutMod, RegOperand};
use crate::target::{Opcode, OperandType, WaveTarget};

/// Clamp type compatibility: both instructions must clamp at the same
/// float width, and the producer must carry modifiers at all.
fn clamp_class(opcode: Opcode) -> Option<OperandType> {
    let desc = opcode.desc();
    if !desc.has_modifiers {
        return None;
    }
    match desc.slots.get(1).map(|s| s.ty) {
        Some(OperandType::F32) => Some(OperandType::F32),
        Some(OperandType::F16) => Some(OperandType::F16),
        _ => None,
    }
}

/// Recognize a canonical clamp: max of a register with itself, clamp
/// bit set, no output scale, neutral source modifiers on both copies.
fn clamp_source(f: &MirFunction, id: InstrId) -> Option<RegOperand> {
    let ins = f.instr(id);
    if !matches!(ins.opcode, Opcode::VMaxF32 | Opcode::VMaxF16) {
        return None;
    }
    if !ins.mods.clamp {
        return None;
    }
    let src0 = ins.operands[1].as_reg()?;
    let src1 = ins.operands[2].as_reg()?;
    if src0.reg != src1.reg || src0.sub != src1.sub || src0.sub.is_some() {
        return None;
    }
    if ins.mods.omod != OutMod::None {
        return None;
    }
    if !ins.src_mod(0).is_neutral() || !ins.src_mod(1).is_neutral() {
        return None;
    }
    Some(*src0)
}

pub(crate) fn try_fold_clamp(f: &mut MirFunction, _target: &WaveTarget, id: InstrId) -> bool {
    let Some(src) = clamp_source(f, id) else { return false };
    if !f.has_one_use_instr(src.reg) {
        return false;
    }
    let Some(def) = f.def(src.reg) else { return false };
    let def_class = clamp_class(f.instr(def).opcode);
    if def_class.is_none() || def_class != clamp_class(f.instr(id).opcode) {
        return false;
    }
    if f.instr(def).mods.clamp {
        return false;
    }

    tracing::debug!(from = id.index(), into = def.index(), "folding clamp into producer");

    // Clamp applies after the output scale, so an omod already on the
    // producer is fine.
    f.mods_mut(def).clamp = true;
    let merged_dst = f.instr(id).dst().as_reg().expect("max defines a register").reg;
    let def_dst = f.instr(def).dst().as_reg().expect("producer defines a register").reg;
    f.replace_all_uses(merged_dst, def_dst);
    f.erase(id);
    true
}

fn omod_for_mul(opcode: Opcode, imm: i64) -> OutMod {
    match opcode {
        Opcode::VMulF32 => match imm as u32 {
            0x3f00_0000 => OutMod::Div2,
            0x4000_0000 => OutMod::Mul2,
            0x4080_0000 => OutMod::Mul4,
            _ => OutMod::None,
        },
        Opcode::VMulF16 => match imm as u16 {
            0x3800 => OutMod::Div2,
            0x4000 => OutMod::Mul2,
            0x4400 => OutMod::Mul4,
            _ => OutMod::None,
        },
        _ => OutMod::None,
    }
}

fn denormals_enabled(f: &MirFunction, opcode: Opcode) -> bool {
    match opcode {
        Opcode::VMulF32 | Opcode::VAddF32 => f.float_mode.fp32_denormals,
        Opcode::VMulF16 | Opcode::VAddF16 => f.float_mode.fp16_denormals,
        _ => false,
    }
}

/// Recognize a multiply (or self-add) expressible as an output-scale
/// modifier. Returns the operand whose producer would absorb the scale.
fn omod_pattern(f: &MirFunction, id: InstrId) -> Option<(RegOperand, OutMod)> {
    let ins = f.instr(id);
    match ins.opcode {
        Opcode::VMulF32 | Opcode::VMulF16 => {
            // The output scale is ignored when denormals are in play.
            if denormals_enabled(f, ins.opcode) {
                return None;
            }
            let (reg_op, imm) = match (&ins.operands[1], &ins.operands[2]) {
                (Operand::Imm(v), other) => (other.as_reg()?, *v),
                (other, Operand::Imm(v)) => (other.as_reg()?, *v),
                _ => return None,
            };
            let omod = omod_for_mul(ins.opcode, imm);
            if omod == OutMod::None {
                return None;
            }
            if !ins.src_mod(0).is_neutral()
                || !ins.src_mod(1).is_neutral()
                || ins.mods.omod != OutMod::None
                || ins.mods.clamp
            {
                return None;
            }
            Some((*reg_op, omod))
        }
        Opcode::VAddF32 | Opcode::VAddF16 => {
            if denormals_enabled(f, ins.opcode) {
                return None;
            }
            // Selection canonicalizes x * 2 to x + x; undo that here.
            let src0 = ins.operands[1].as_reg()?;
            let src1 = ins.operands[2].as_reg()?;
            if src0.reg == src1.reg
                && src0.sub == src1.sub
                && ins.src_mod(0).is_neutral()
                && ins.src_mod(1).is_neutral()
                && !ins.mods.clamp
                && ins.mods.omod == OutMod::None
            {
                Some((*src0, OutMod::Mul2))
            } else {
                None
            }
        }
        _ => None,
    }
}

pub(crate) fn try_fold_omod(f: &mut MirFunction, _target: &WaveTarget, id: InstrId) -> bool {
    let Some((src, omod)) = omod_pattern(f, id) else { return false };
    if src.sub.is_some() || !f.has_one_use_instr(src.reg) {
        return false;
    }
    let Some(def) = f.def(src.reg) else { return false };
    if !f.instr(def).desc().has_modifiers {
        return false;
    }
    if f.instr(def).mods.omod != OutMod::None {
        return false;
    }
    // Clamp applies after the scale; a clamped producer would scale the
    // already-saturated value.
    if f.instr(def).mods.clamp {
        return false;
    }

    tracing::debug!(
        from = id.index(),
        into = def.index(),
        omod = omod.name(),
        "folding output scale into producer"
    );

    f.mods_mut(def).omod = omod;
    let merged_dst = f.instr(id).dst().as_reg().expect("multiply defines a register").reg;
    let def_dst = f.instr(def).dst().as_reg().expect("producer defines a register").reg;
    f.replace_all_uses(merged_dst, def_dst);
    f.erase(id);
    true
}
