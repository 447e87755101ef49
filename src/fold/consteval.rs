// src/fold/consteval.rs
//
// Constant evaluation and algebraic identities on a single instruction.
// Operands resolve through chains of trivial copies to materialized
// immediates; shift counts wrap to their low five bits the way the
// hardware does. No rule matching is not an error, just no progress.

use crate::mir::{InstrId, MirFunction, Operand, RegBank};
use crate::target::{Opcode, WaveTarget};

/// Resolve an operand to a known immediate when it is a plain virtual
/// register whose value chains through foldable copies to a
/// move-immediate; otherwise hand back the operand unchanged.
pub(crate) fn resolve_imm(f: &MirFunction, op: &Operand) -> Operand {
    let Operand::Reg(r) = op else { return op.clone() };
    if r.sub.is_some() {
        // A sub-register selection is a register source, full stop.
        return op.clone();
    }
    let mut reg = r.reg;
    for _ in 0..8 {
        let Some(def) = f.def(reg) else { break };
        let ins = f.instr(def);
        let desc = ins.desc();
        if desc.move_imm && let Operand::Imm(v) = ins.operands[1] {
            return Operand::Imm(v);
        }
        if !desc.foldable_copy {
            break;
        }
        match &ins.operands[1] {
            Operand::Reg(src) if src.sub.is_none() => reg = src.reg,
            _ => break,
        }
    }
    op.clone()
}

fn mov_for_dst(f: &MirFunction, id: InstrId) -> Opcode {
    let scalar = match f.instr(id).dst() {
        Operand::Reg(r) => f.reg_class(r.reg).bank == RegBank::Scalar,
        Operand::Phys(_) => true,
        _ => false,
    };
    if scalar { Opcode::SMovB32 } else { Opcode::VMovB32 }
}

type BinEval = fn(u32, u32) -> u32;

/// Registry of pure two-source evaluators. Shift counts wrap to their
/// low five bits; the hardware ignores the high bits rather than
/// saturating, and arithmetic shifts are signed.
fn binary_evaluator(opcode: Opcode) -> Option<BinEval> {
    let rule: BinEval = match opcode {
        Opcode::VAndB32 | Opcode::SAndB32 => |l, r| l & r,
        Opcode::VOrB32 | Opcode::SOrB32 => |l, r| l | r,
        Opcode::VXorB32 | Opcode::SXorB32 => |l, r| l ^ r,
        Opcode::VShlB32 | Opcode::SShlB32 => |l, r| l.wrapping_shl(r & 31),
        Opcode::VShlRevB32 => |l, r| r.wrapping_shl(l & 31),
        Opcode::VShrB32 | Opcode::SShrB32 => |l, r| l.wrapping_shr(r & 31),
        Opcode::VShrRevB32 => |l, r| r.wrapping_shr(l & 31),
        Opcode::VAshrI32 | Opcode::SAshrI32 => |l, r| (l as i32).wrapping_shr(r & 31) as u32,
        Opcode::VAshrRevI32 => |l, r| (r as i32).wrapping_shr(l & 31) as u32,
        _ => return None,
    };
    Some(rule)
}

fn eval_binary(opcode: Opcode, lhs: u32, rhs: u32) -> Option<i32> {
    binary_evaluator(opcode).map(|rule| rule(lhs, rhs) as i32)
}

/// Try to simplify `id` given that `imm` is being folded into it.
/// Handles the unary complement, full two-immediate evaluation, the
/// fused shift-or with a zero shift source, and the identity rules for
/// commutative bitwise ops.
pub(crate) fn try_const_fold(
    f: &mut MirFunction,
    _target: &WaveTarget,
    id: InstrId,
    imm: i64,
) -> bool {
    let opcode = f.instr(id).opcode;

    if matches!(opcode, Opcode::VNotB32 | Opcode::SNotB32) {
        let mov = mov_for_dst(f, id);
        let dst = f.instr(id).dst().clone();
        f.rebuild(id, mov, [dst, Operand::Imm(!imm)]);
        tracing::debug!(instr = id.index(), "constant folded complement");
        return true;
    }

    let desc = opcode.desc();
    let Some(s0_idx) = desc.src_slot(0) else { return false };
    let Some(s1_idx) = desc.src_slot(1) else { return false };

    let src0 = resolve_imm(f, &f.instr(id).operands[s0_idx].clone());
    let src1 = resolve_imm(f, &f.instr(id).operands[s1_idx].clone());
    if !src0.is_imm() && !src1.is_imm() {
        return false;
    }

    // Shifting by zero then or-ing is an identity on the third source.
    if opcode == Opcode::VShlOrB32 && src0.imm() == Some(0) {
        let s2_idx = desc.src_slot(2).expect("shift-or has three sources");
        let third = f.instr(id).operands[s2_idx].clone();
        let dst = f.instr(id).dst().clone();
        let new_opcode = if third.is_reg() { Opcode::Copy } else { Opcode::VMovB32 };
        f.rebuild(id, new_opcode, [dst, third]);
        tracing::debug!(instr = id.index(), "folded zero shift-or");
        return true;
    }

    if let (Some(l), Some(r)) = (src0.imm(), src1.imm()) {
        let Some(value) = eval_binary(opcode, l as u32, r as u32) else { return false };
        let mov = mov_for_dst(f, id);
        let dst = f.instr(id).dst().clone();
        f.rebuild(id, mov, [dst, Operand::Imm(value as i64)]);
        tracing::debug!(instr = id.index(), value, "constant folded");
        return true;
    }

    if !desc.commutable {
        return false;
    }

    // Exactly one immediate; normalize it to the second position.
    let (reg_idx, imm_val) = if let Some(v) = src0.imm() { (s1_idx, v) } else { (s0_idx, src1.imm().unwrap()) };
    let imm_val = imm_val as i32;
    let kept = f.instr(id).operands[reg_idx].clone();
    let dst = f.instr(id).dst().clone();

    match opcode {
        Opcode::VOrB32 | Opcode::SOrB32 => match imm_val {
            0 => f.rebuild(id, Opcode::Copy, [dst, kept]),
            -1 => {
                let mov = mov_for_dst(f, id);
                f.rebuild(id, mov, [dst, Operand::Imm(-1)]);
            }
            _ => return false,
        },
        Opcode::VAndB32 | Opcode::SAndB32 => match imm_val {
            0 => {
                let mov = mov_for_dst(f, id);
                f.rebuild(id, mov, [dst, Operand::Imm(0)]);
            }
            -1 => f.rebuild(id, Opcode::Copy, [dst, kept]),
            _ => return false,
        },
        Opcode::VXorB32 | Opcode::SXorB32 => match imm_val {
            0 => f.rebuild(id, Opcode::Copy, [dst, kept]),
            _ => return false,
        },
        _ => return false,
    }
    tracing::debug!(instr = id.index(), "folded identity");
    true
}

/// Lane select whose two value sources are identical reduces to a copy
/// (register source) or a move (immediate source).
pub(crate) fn try_fold_select_same(f: &mut MirFunction, _target: &WaveTarget, id: InstrId) -> bool {
    if !f.is_live(id) || f.instr(id).opcode != Opcode::VCndMaskB32 {
        return false;
    }
    let ins = f.instr(id);
    let src0 = ins.operands[1].clone();
    let src1 = &ins.operands[2];
    if !src0.identical_to(src1) || !ins.src_mod(0).is_neutral() || !ins.src_mod(1).is_neutral() {
        return false;
    }
    let dst = ins.dst().clone();
    let new_opcode = if src0.is_reg() { Opcode::Copy } else { Opcode::VMovB32 };
    f.rebuild(id, new_opcode, [dst, src0]);
    tracing::debug!(instr = id.index(), "folded identical-source select");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::{Instr, RegClass};
    use crate::target::WaveTarget;

    fn setup() -> (MirFunction, crate::mir::BlockId, WaveTarget) {
        let mut f = MirFunction::new("t");
        let bb = f.add_block("b0");
        (f, bb, WaveTarget::new())
    }

    #[test]
    fn shift_count_wraps_to_five_bits() {
        assert_eq!(eval_binary(Opcode::VShlB32, 1, 35), eval_binary(Opcode::VShlB32, 1, 3));
        assert_eq!(eval_binary(Opcode::VShlB32, 1, 35), Some(8));
        assert_eq!(eval_binary(Opcode::VAshrI32, 0x8000_0000, 31), Some(-1));
    }

    #[test]
    fn and_of_two_immediates_materializes() {
        let (mut f, bb, t) = setup();
        let a = f.new_vreg(RegClass::V32);
        let d = f.new_vreg(RegClass::V32);
        f.push(bb, Instr::new(Opcode::VMovB32, [Operand::reg(a), Operand::Imm(0x12345678)]));
        let and = f.push(
            bb,
            Instr::new(
                Opcode::VAndB32,
                [Operand::reg(d), Operand::Imm(0xffffffff_u32 as i64), Operand::reg(a)],
            ),
        );
        assert!(try_const_fold(&mut f, &t, and, 0xffffffff_u32 as i64));
        let ins = f.instr(and);
        assert_eq!(ins.opcode, Opcode::VMovB32);
        assert_eq!(ins.operands[1], Operand::Imm(0x12345678));
    }

    #[test]
    fn or_with_zero_becomes_copy() {
        let (mut f, bb, t) = setup();
        let x = f.new_vreg(RegClass::V32);
        let z = f.new_vreg(RegClass::V32);
        let d = f.new_vreg(RegClass::V32);
        f.push(bb, Instr::new(Opcode::VMovB32, [Operand::reg(z), Operand::Imm(0)]));
        let or = f.push(
            bb,
            Instr::new(Opcode::VOrB32, [Operand::reg(d), Operand::reg(x), Operand::reg(z)]),
        );
        assert!(try_const_fold(&mut f, &t, or, 0));
        let ins = f.instr(or);
        assert_eq!(ins.opcode, Opcode::Copy);
        assert_eq!(ins.operands[1].as_reg().map(|r| r.reg), Some(x));
        assert!(f.uses(z).is_empty());
    }

    #[test]
    fn or_with_all_ones_materializes_all_ones() {
        let (mut f, bb, t) = setup();
        let x = f.new_vreg(RegClass::V32);
        let k = f.new_vreg(RegClass::V32);
        let d = f.new_vreg(RegClass::V32);
        f.push(bb, Instr::new(Opcode::VMovB32, [Operand::reg(k), Operand::Imm(-1)]));
        let or = f.push(
            bb,
            Instr::new(Opcode::VOrB32, [Operand::reg(d), Operand::reg(x), Operand::reg(k)]),
        );
        assert!(try_const_fold(&mut f, &t, or, -1));
        let ins = f.instr(or);
        assert_eq!(ins.opcode, Opcode::VMovB32);
        assert_eq!(ins.operands[1], Operand::Imm(-1));
        assert!(f.uses(x).is_empty());
    }

    #[test]
    fn complement_of_known_immediate() {
        let (mut f, bb, t) = setup();
        let d = f.new_vreg(RegClass::S32);
        let a = f.new_vreg(RegClass::S32);
        f.push(bb, Instr::new(Opcode::SMovB32, [Operand::reg(a), Operand::Imm(0x0f)]));
        let not = f.push(bb, Instr::new(Opcode::SNotB32, [Operand::reg(d), Operand::reg(a)]));
        assert!(try_const_fold(&mut f, &t, not, 0x0f));
        let ins = f.instr(not);
        assert_eq!(ins.opcode, Opcode::SMovB32);
        assert_eq!(ins.operands[1], Operand::Imm(!0x0f));
    }

    #[test]
    fn zero_shift_or_reduces_to_third_source() {
        let (mut f, bb, t) = setup();
        let amt = f.new_vreg(RegClass::V32);
        let y = f.new_vreg(RegClass::V32);
        let d = f.new_vreg(RegClass::V32);
        f.push(bb, Instr::new(Opcode::VMovB32, [Operand::reg(amt), Operand::Imm(0)]));
        let or = f.push(
            bb,
            Instr::new(
                Opcode::VShlOrB32,
                [Operand::reg(d), Operand::reg(amt), Operand::Imm(4), Operand::reg(y)],
            ),
        );
        assert!(try_const_fold(&mut f, &t, or, 0));
        let ins = f.instr(or);
        assert_eq!(ins.opcode, Opcode::Copy);
        assert_eq!(ins.operands[1].as_reg().map(|r| r.reg), Some(y));
    }

    #[test]
    fn select_with_identical_sources_becomes_copy() {
        let (mut f, bb, t) = setup();
        let x = f.new_vreg(RegClass::V32);
        let c = f.new_vreg(RegClass::S64);
        let d = f.new_vreg(RegClass::V32);
        let sel = f.push(
            bb,
            Instr::new(
                Opcode::VCndMaskB32,
                [Operand::reg(d), Operand::reg(x), Operand::reg(x), Operand::reg(c)],
            ),
        );
        assert!(try_fold_select_same(&mut f, &t, sel));
        let ins = f.instr(sel);
        assert_eq!(ins.opcode, Opcode::Copy);
        assert_eq!(ins.operands.len(), 2);
        assert!(f.uses(c).is_empty());
    }
}
