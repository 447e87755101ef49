// src/fold/collector.rs
//
// Fold-candidate collection. Given a foldable copy, walk every use of
// its result and classify it: unsafe, aggregate (recurse into the
// aggregate's uses), inline-cheap (always fold), stack-addressing (fold
// the frame index plus the base register), or literal-cost (at most one
// per value). Register sources fold into every use. Candidates queue in
// a list; nothing destructive happens to a queued use until the apply
// loop, which re-validates each edit against the live graph.

use crate::mir::{
    InstrId, MirFunction, Operand, PhysReg, RegBank, RegHalf, RegOperand, UseRef,
};
use crate::target::{Opcode, OpcodeDesc, WaveTarget};

use super::apply;
use super::candidate::{FoldList, FoldSource, FoldValue, in_fold_list};
use super::consteval;
use super::resolver::try_add_candidate;

/// Outcome of the accumulator-slot fast path.
enum AccFold {
    NotHandled,
    /// Folded on the spot.
    Applied,
    /// Queued on the candidate list.
    Queued,
}

/// Fold the source of the foldable copy `def_id` into the uses of its
/// destination register. Returns whether the graph changed.
pub(crate) fn fold_def_into_uses(
    f: &mut MirFunction,
    target: &WaveTarget,
    def_id: InstrId,
) -> bool {
    let dst_reg = f.instr(def_id).operands[0].as_reg().expect("caller checked the def").reg;
    let src =
        FoldSource { op: f.instr(def_id).operands[1].clone(), def: def_id };
    let mut list = FoldList::new();
    let mut changed = false;

    if src.op.is_imm_like() {
        let mut literal_uses = 0usize;
        let mut literal_use: Option<UseRef> = None;

        let mut queue = f.uses(dst_reg).to_vec();
        let mut i = 0;
        while i < queue.len() {
            let u = queue[i];
            i += 1;
            if !still_uses(f, u, dst_reg) {
                continue;
            }

            // Folding the immediate may reveal a fully-constant
            // operation. Reducing it can re-home the remaining use, so
            // rescan the refreshed use list with the pending candidates
            // dropped.
            if let Operand::Imm(v) = src.op
                && consteval::try_const_fold(f, target, u.instr, v)
            {
                changed = true;
                queue = f.uses(dst_reg).to_vec();
                i = 0;
                list.clear();
                continue;
            }

            // Inline constants are free at every use; legality is judged
            // at the use slot, since a 32-bit materialization may feed a
            // 16-bit operand.
            if is_inline_if_folded(f, target, u.instr, u.slot, &src.op)
                || frame_index_may_fold(f, u.instr, u.slot, &src.op)
            {
                changed |= fold_operand_use(f, target, &src, u.instr, u.slot, &mut list);
            } else {
                // Every duplicated literal costs an extra encoding word.
                literal_uses += 1;
                if literal_uses == 1 {
                    literal_use = Some(u);
                }
            }
        }

        if literal_uses == 1 {
            let u = literal_use.expect("counted one literal use");
            if still_uses(f, u, dst_reg) {
                changed |= fold_operand_use(f, target, &src, u.instr, u.slot, &mut list);
            }
        }
    } else {
        // Register copies cost nothing to duplicate: fold into all uses.
        for u in f.uses(dst_reg).to_vec() {
            if still_uses(f, u, dst_reg) {
                changed |= fold_operand_use(f, target, &src, u.instr, u.slot, &mut list);
            }
        }
    }

    for cand in std::mem::take(&mut list) {
        if let FoldValue::Reg(_) = cand.value {
            // A value computed under one execution mask must not move to
            // a site where the mask may have changed.
            if f.is_live(cand.source_def)
                && f.reads_phys(cand.source_def, PhysReg::Exec)
                && target.exec_may_be_modified_between(f, cand.source_def, cand.use_instr)
            {
                tracing::trace!(
                    use_instr = cand.use_instr.index(),
                    "skipping fold across a possible execution-mask change"
                );
                continue;
            }
        }
        if apply::update_operand(f, target, &cand) {
            changed = true;
            if let FoldValue::Reg(r) = &cand.value {
                f.clear_kill_flags(r.reg);
            }
            tracing::debug!(
                def = def_id.index(),
                use_instr = cand.use_instr.index(),
                slot = cand.slot,
                "folded operand"
            );
            // The fold can leave a redundant identity behind.
            changed |= consteval::try_fold_select_same(f, target, cand.use_instr);
        } else if cand.commuted && f.is_live(cand.use_instr) {
            // Restore the original operand order of a failed edit.
            target.commute(f, cand.use_instr);
        }
    }

    if changed && f.is_live(def_id) && f.uses(dst_reg).is_empty() {
        f.erase(def_id);
    }
    changed
}

fn still_uses(f: &MirFunction, u: UseRef, reg: crate::mir::VirtualReg) -> bool {
    f.is_live(u.instr)
        && f.instr(u.instr)
            .operands
            .get(u.slot)
            .and_then(|op| op.as_reg())
            .is_some_and(|r| r.reg == reg)
}

/// Is `op` an inline constant at this use slot (or at the slot of the
/// three-address twin the fold would convert the instruction into)?
fn is_inline_if_folded(
    f: &MirFunction,
    target: &WaveTarget,
    use_id: InstrId,
    slot: usize,
    op: &Operand,
) -> bool {
    let Operand::Imm(v) = op else { return false };
    let desc = f.instr(use_id).desc();
    match desc.slots.get(slot) {
        Some(sd) => target.is_inline_constant(*v, sd.ty),
        None => false,
    }
}

/// A frame index folds only into the address slot of a scratch access.
fn frame_index_may_fold(f: &MirFunction, use_id: InstrId, slot: usize, op: &Operand) -> bool {
    matches!(op, Operand::FrameIndex(_))
        && f.instr(use_id).desc().scratch_access
        && slot == OpcodeDesc::SCRATCH_ADDR_SLOT
}

/// Sub-register half a register-sequence element defines.
fn seq_half(f: &MirFunction, seq: InstrId, elem_slot: usize) -> Option<RegHalf> {
    match f.instr(seq).operands.get(elem_slot + 1) {
        Some(Operand::Imm(0)) => Some(RegHalf::Lo),
        Some(Operand::Imm(1)) => Some(RegHalf::Hi),
        _ => None,
    }
}

/// Classify one use of the folded register and queue or apply the edit.
/// Returns whether the graph changed immediately (queued candidates do
/// not count until applied).
fn fold_operand_use(
    f: &mut MirFunction,
    target: &WaveTarget,
    src: &FoldSource,
    use_id: InstrId,
    use_slot: usize,
    list: &mut FoldList,
) -> bool {
    if !f.is_live(use_id) {
        return false;
    }
    let use_op = f.instr(use_id).operands[use_slot].clone();

    // An undef use only names the register; its value is irrelevant and
    // rewriting it is unsafe.
    if let Operand::Reg(r) = &use_op
        && r.undef
    {
        return false;
    }
    // Register-into-subregister folds are not supported.
    if let (Operand::Reg(u), Operand::Reg(_)) = (&use_op, &src.op)
        && u.sub.is_some()
    {
        return false;
    }

    let mut changed = false;

    if f.instr(use_id).opcode.is_reg_sequence() {
        // Constants cannot live in a register sequence; fold into the
        // aggregate's own uses instead, matching each use's slice
        // against the half this element defines.
        let seq_dst = f.instr(use_id).operands[0].as_reg().expect("sequence defines a register").reg;
        let Some(half) = seq_half(f, use_id, use_slot) else { return false };
        let seq_src = FoldSource { op: f.instr(use_id).operands[0].clone(), def: use_id };

        for u in f.uses(seq_dst).to_vec() {
            if !still_uses(f, u, seq_dst) {
                continue;
            }
            match try_fold_acc_imm(f, target, &seq_src, u.instr, u.slot, list) {
                AccFold::Applied => {
                    changed = true;
                    continue;
                }
                AccFold::Queued => continue,
                AccFold::NotHandled => {}
            }
            let use_half = f.instr(u.instr).operands[u.slot].as_reg().and_then(|r| r.sub);
            if use_half != Some(half) {
                continue;
            }
            changed |= fold_operand_use(f, target, src, u.instr, u.slot, list);
        }
        return changed;
    }

    match try_fold_acc_imm(f, target, src, use_id, use_slot, list) {
        AccFold::Applied => return true,
        AccFold::Queued => return changed,
        AccFold::NotHandled => {}
    }

    if frame_index_may_fold(f, use_id, use_slot, &src.op) {
        // Only a real stack access: the offset register must be one of
        // the function's stack registers.
        let specials = target.special_regs();
        let base = f.instr(use_id).operands[OpcodeDesc::SCRATCH_BASE_SLOT].clone();
        match base {
            Operand::Phys(p) if p == specials.stack_ptr || p == specials.scratch_base => {}
            _ => return false,
        }
        let Operand::FrameIndex(fi) = src.op else { unreachable!("checked by the predicate") };
        // A frame index resolves to a positive constant; folding the
        // addressing mode is always safe. Rewrite the base to the stack
        // pointer alongside it.
        f.set_operand(use_id, use_slot, Operand::FrameIndex(fi));
        f.set_operand(use_id, OpcodeDesc::SCRATCH_BASE_SLOT, Operand::Phys(specials.stack_ptr));
        tracing::debug!(use_instr = use_id.index(), fi, "folded frame index");
        return true;
    }

    let imm_like = src.op.is_imm_like();
    let use_opcode = f.instr(use_id).opcode;

    if imm_like && use_opcode == Opcode::Copy {
        // Folding a constant into a copy rewrites the copy into the move
        // opcode of the destination class. Copies to physical registers
        // stay: later passes rely on recognizing them.
        let Operand::Reg(dst) = f.instr(use_id).operands[0].clone() else {
            return changed;
        };
        let dst_class = f.reg_class(dst.reg);

        if let Operand::Reg(cp_src) = f.instr(use_id).operands[1].clone()
            && f.reg_class(cp_src.reg).is_scalar()
            && dst_class.is_vector()
        {
            // Scalar-to-vector copy: offer the scalar source to the
            // copy's users before touching the copy itself.
            let inner = FoldSource { op: Operand::Reg(cp_src), def: use_id };
            for u in f.uses(dst.reg).to_vec() {
                if still_uses(f, u, dst.reg) {
                    changed |= fold_operand_use(f, target, &inner, u.instr, u.slot, list);
                }
            }
        }

        if dst_class.bank == RegBank::Acc
            && dst_class.bits == 32
            && let Operand::Imm(v) = src.op
            && target.is_inline_constant(v, crate::target::OperandType::B32)
        {
            f.rebuild(use_id, Opcode::VAccWriteB32, [Operand::Reg(dst), Operand::Imm(v)]);
            return true;
        }

        let Some(mov) = target.mov_for_class(dst_class) else {
            return changed;
        };
        f.set_opcode(use_id, mov);
        changed = true;
        // Fall through and queue the constant into the move's source.
    } else {
        // Register folds into a plain register copy forward the source
        // in place instead of going through the candidate list.
        if use_opcode == Opcode::Copy && let Operand::Reg(new_src) = src.op {
            let forwardable = {
                let ins = f.instr(use_id);
                match (ins.operands[0].as_reg(), ins.operands[1].as_reg()) {
                    (Some(d), Some(s1)) => {
                        f.reg_class(d.reg).bank != RegBank::Scalar
                            && f.reg_class(s1.reg).bank != RegBank::Scalar
                            && s1.sub.is_none()
                    }
                    _ => false,
                }
            };
            if forwardable {
                let dst_reg = f.instr(use_id).operands[0].as_reg().expect("checked").reg;
                let old = *f.instr(use_id).operands[1].as_reg().expect("checked");
                let bits = f.reg_class(old.reg).bits;
                f.set_operand(
                    use_id,
                    1,
                    Operand::Reg(RegOperand {
                        reg: new_src.reg,
                        sub: new_src.sub,
                        kill: false,
                        undef: old.undef,
                    }),
                );
                f.clear_kill_flags(new_src.reg);
                if bits == 32 {
                    let dst_bank = f.reg_class(dst_reg).bank;
                    let src_bank = f.reg_class(new_src.reg).bank;
                    if dst_bank == RegBank::Acc && src_bank == RegBank::Vector {
                        f.set_opcode(use_id, Opcode::VAccWriteB32);
                    } else if dst_bank == RegBank::Vector && src_bank == RegBank::Acc {
                        f.set_opcode(use_id, Opcode::VAccReadB32);
                    }
                }
                return true;
            }
        }

        // Lane read of a materialized value or a scalar copy.
        if use_opcode == Opcode::VReadFirstLaneB32 && use_slot == 1 {
            match &src.op {
                Operand::Imm(_) | Operand::FrameIndex(_) => {
                    if target.exec_may_be_modified_between(f, src.def, use_id) {
                        return changed;
                    }
                    let dst = f.instr(use_id).operands[0].clone();
                    f.rebuild(use_id, Opcode::SMovB32, [dst, src.op.clone()]);
                    tracing::debug!(use_instr = use_id.index(), "folded lane read to move");
                    return true;
                }
                Operand::Reg(r) if f.reg_class(r.reg).is_scalar() => {
                    if target.exec_may_be_modified_between(f, src.def, use_id) {
                        return changed;
                    }
                    let dst = f.instr(use_id).operands[0].clone();
                    let fwd = RegOperand { kill: false, ..*r };
                    f.rebuild(use_id, Opcode::Copy, [dst, Operand::Reg(fwd)]);
                    tracing::debug!(use_instr = use_id.index(), "folded lane read to copy");
                    return true;
                }
                _ => {}
            }
        }

        // Variadic instructions and slots past the descriptor have no
        // operand class to validate a rewrite against.
        let desc = f.instr(use_id).desc();
        if desc.variadic || use_slot >= desc.slots.len() {
            return changed;
        }
    }

    if !imm_like {
        try_add_candidate(f, target, list, use_id, use_slot, &src.op, src.def);
        return changed;
    }

    // A 64-bit immediate used through a half splits; substitute only the
    // selected 32 bits.
    if let Operand::Reg(u) = &use_op
        && let Some(half) = u.sub
        && def_result_bits(f, src.def) == Some(64)
    {
        if f.reg_class(u.reg).bits != 64 {
            return changed;
        }
        let Operand::Imm(v) = src.op else { return changed };
        let half_imm = apply::imm_half(v, half);
        try_add_candidate(f, target, list, use_id, use_slot, &Operand::Imm(half_imm), src.def);
        return changed;
    }

    try_add_candidate(f, target, list, use_id, use_slot, &src.op, src.def);
    changed
}

fn def_result_bits(f: &MirFunction, def: InstrId) -> Option<u8> {
    let r = f.instr(def).operands.first()?.as_reg()?;
    Some(f.reg_class(r.reg).bits)
}

/// Accumulator-typed slots take inline constants directly; a register
/// source is chased through a register sequence of identically-valued
/// materialized immediates (a splat) and folded as that value.
fn try_fold_acc_imm(
    f: &mut MirFunction,
    target: &WaveTarget,
    src: &FoldSource,
    use_id: InstrId,
    use_slot: usize,
    list: &mut FoldList,
) -> AccFold {
    let desc = f.instr(use_id).desc();
    let Some(sd) = desc.slots.get(use_slot) else { return AccFold::NotHandled };
    if sd.class != crate::target::SlotClass::AccSrc {
        return AccFold::NotHandled;
    }

    if let Operand::Imm(v) = src.op
        && target.is_inline_constant(v, sd.ty)
        && target.is_operand_legal(f, use_id, use_slot, &src.op)
    {
        f.set_operand(use_id, use_slot, Operand::Imm(v));
        tracing::debug!(use_instr = use_id.index(), "folded inline accumulator constant");
        return AccFold::Applied;
    }

    let Operand::Reg(r) = &src.op else { return AccFold::NotHandled };
    if in_fold_list(list, use_id) {
        return AccFold::NotHandled;
    }
    let Some(def) = f.def(r.reg) else { return AccFold::NotHandled };
    if !f.instr(def).opcode.is_reg_sequence() {
        return AccFold::NotHandled;
    }

    let mut splat: Option<i64> = None;
    let elems: Vec<Operand> =
        f.instr(def).operands.iter().skip(1).step_by(2).cloned().collect();
    for elem in elems {
        let Operand::Reg(e) = elem else { return AccFold::NotHandled };
        if e.sub.is_some() {
            return AccFold::NotHandled;
        }
        let Some(imm) = chase_materialized_imm(f, e.reg) else { return AccFold::NotHandled };
        match splat {
            None => {
                if !target.is_inline_constant(imm, sd.ty) {
                    return AccFold::NotHandled;
                }
                splat = Some(imm);
            }
            // Only splat constants fold.
            Some(seen) if seen != imm => return AccFold::NotHandled,
            Some(_) => {}
        }
    }
    let Some(imm) = splat else { return AccFold::NotHandled };
    if !target.is_operand_legal(f, use_id, use_slot, &Operand::Imm(imm)) {
        return AccFold::NotHandled;
    }

    list.push(super::candidate::FoldCandidate {
        use_instr: use_id,
        slot: use_slot,
        value: FoldValue::Imm(imm),
        source_def: src.def,
        commuted: false,
        shrink_to: None,
    });
    AccFold::Queued
}

/// Follow foldable copies from `reg` to a move-immediate; the chain must
/// end at one for the value to be known.
fn chase_materialized_imm(f: &MirFunction, reg: crate::mir::VirtualReg) -> Option<i64> {
    let mut cur = reg;
    for _ in 0..8 {
        let def = f.def(cur)?;
        let ins = f.instr(def);
        let desc = ins.desc();
        if desc.move_imm {
            return ins.operands[1].imm();
        }
        if !desc.foldable_copy {
            return None;
        }
        match ins.operands[1].as_reg() {
            Some(next) if next.sub.is_none() => cur = next.reg,
            _ => return None,
        }
    }
    None
}
