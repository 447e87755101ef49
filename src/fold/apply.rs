// src/fold/apply.rs
//
// Applies one collected candidate. The graph may have changed since
// collection (earlier edits in the same batch), so everything is looked
// up fresh: target liveness for a shrink is re-queried, and the target
// slot must still be a register use.

use crate::mir::{Instr, MirFunction, Operand, PhysReg, RegHalf, RegOperand};
use crate::target::{Liveness, WaveTarget};

use super::candidate::{FoldCandidate, FoldValue};

pub(crate) fn update_operand(
    f: &mut MirFunction,
    target: &WaveTarget,
    fold: &FoldCandidate,
) -> bool {
    if !f.is_live(fold.use_instr) {
        return false;
    }
    {
        let ins = f.instr(fold.use_instr);
        match ins.operands.get(fold.slot) {
            Some(op) if op.is_reg() => {}
            _ => return false,
        }
    }

    if fold.value.is_imm_like() && fold.shrink_to.is_some() {
        return shrink_and_apply(f, target, fold);
    }
    debug_assert!(fold.shrink_to.is_none(), "register folds never shrink");

    match &fold.value {
        FoldValue::Imm(v) => f.set_operand(fold.use_instr, fold.slot, Operand::Imm(*v)),
        FoldValue::FrameIndex(fi) => {
            f.set_operand(fold.use_instr, fold.slot, Operand::FrameIndex(*fi))
        }
        FoldValue::Global(g) => {
            f.set_operand(fold.use_instr, fold.slot, Operand::Global(g.clone()))
        }
        FoldValue::Reg(new) => {
            let old = *f.instr(fold.use_instr).operands[fold.slot]
                .as_reg()
                .expect("checked above");
            debug_assert!(
                old.sub.is_none() || new.sub.is_none(),
                "cannot compose two sub-register selectors"
            );
            let merged = RegOperand {
                reg: new.reg,
                sub: new.sub.or(old.sub),
                kill: old.kill,
                undef: new.undef,
            };
            f.set_operand(fold.use_instr, fold.slot, Operand::Reg(merged));
        }
    }
    true
}

/// Rebuild an extended carry-arithmetic instruction as its narrow twin.
/// The carry flag the narrow form clobbers must be provably dead here;
/// collection-time state may be stale, so re-query. The wide form's
/// explicit carry result is preserved through a copy from the flag
/// register when something still consumes it.
fn shrink_and_apply(f: &mut MirFunction, target: &WaveTarget, fold: &FoldCandidate) -> bool {
    let narrow = fold.shrink_to.expect("caller checked");
    let (block, pos) = f.position_of(fold.use_instr);
    if target.carry_liveness_at(f, block, pos, 16) != Liveness::Dead {
        tracing::debug!(
            instr = fold.use_instr.index(),
            "not shrinking: carry flag not provably dead"
        );
        return false;
    }

    let (dst0, carry_out, src0, src1) = {
        let ins = f.instr(fold.use_instr);
        debug_assert_eq!(ins.num_defs(), 2);
        (
            ins.operands[0].clone(),
            ins.operands[1].clone(),
            ins.operands[2].clone(),
            ins.operands[3].clone(),
        )
    };
    let carry_reg = carry_out.as_reg().expect("carry def is a register").reg;
    let carry_used = !f.uses(carry_reg).is_empty();

    f.rebuild(fold.use_instr, narrow, [dst0, src0, src1]);
    if carry_used {
        let def = RegOperand::new(carry_reg);
        f.insert_after(
            fold.use_instr,
            Instr::new(
                crate::target::Opcode::Copy,
                [Operand::Reg(def), Operand::Phys(PhysReg::Carry)],
            ),
        );
    }
    if fold.commuted {
        // Restore the pre-commute operand order on the narrow form; for
        // the sub forms this flips the opcode back the other way.
        target.commute(f, fold.use_instr);
    }
    true
}

/// Split a 64-bit immediate into the half selected by a sub-register.
/// The low half stays zero-extended; hardware reads the 32 bits as-is.
pub(crate) fn imm_half(imm: i64, half: RegHalf) -> i64 {
    match half {
        RegHalf::Lo => (imm as u64 & 0xffff_ffff) as i64,
        RegHalf::Hi => ((imm as u64) >> 32) as i64,
    }
}
