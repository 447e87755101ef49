// src/fold/resolver.rs
//
// Legality and commutation resolution for one prospective edit. Decides
// whether {instruction, slot, value} can be recorded as a candidate:
// directly, after an opcode substitution (two-address accumulate to its
// three-address twin), after commuting the instruction, or commuted plus
// a deferred shrink to the narrow encoding.

use crate::mir::{InstrId, MirFunction, Operand, RegBank};
use crate::target::{Opcode, WaveTarget};

use super::candidate::{FoldCandidate, FoldList, FoldValue, in_fold_list};

pub(crate) fn try_add_candidate(
    f: &mut MirFunction,
    target: &WaveTarget,
    list: &mut FoldList,
    instr: InstrId,
    slot: usize,
    value: &Operand,
    source_def: InstrId,
) -> bool {
    if target.is_operand_legal(f, instr, slot, value) {
        push(list, instr, slot, value, source_def, false, None);
        return true;
    }

    let opcode = f.instr(instr).opcode;
    let desc = opcode.desc();

    // A two-address accumulate can't take a constant in its tied slot,
    // but the three-address twin unties it. Keep the new opcode if the
    // retry lands, revert otherwise.
    if let (Some(mad), Some(tied)) = (desc.mad_twin, desc.tied_src)
        && slot == tied as usize
    {
        f.set_opcode(instr, mad);
        if try_add_candidate(f, target, list, instr, slot, value, source_def) {
            return true;
        }
        f.set_opcode(instr, opcode);
    }

    // Already folding into another operand of this instruction: a swap
    // now could invalidate that edit.
    if in_fold_list(list, instr) {
        return false;
    }

    let Some((a, b)) = target.commutable_slots(opcode) else { return false };
    let commute_slot = if slot == a {
        b
    } else if slot == b {
        a
    } else {
        slot
    };

    // Both swap slots must hold registers; commuting an immediate into
    // the candidate slot would make the bookkeeping lie.
    {
        let ins = f.instr(instr);
        if !ins.operands[a].is_reg() || !ins.operands[b].is_reg() {
            return false;
        }
    }

    if !target.commute(f, instr) {
        return false;
    }

    if !target.is_operand_legal(f, instr, commute_slot, value) {
        // Carry add/sub exception: the immediate stays illegal in the
        // extended encoding, but the narrow twin can take it if the
        // remaining source is a vector register and the carry flag turns
        // out dead at apply time.
        if matches!(opcode, Opcode::VAddU32X | Opcode::VSubU32X | Opcode::VSubRevU32X)
            && value.is_imm_like()
        {
            let other = if commute_slot == a { b } else { a };
            let other_is_vgpr = f
                .instr(instr)
                .operands[other]
                .as_reg()
                .is_some_and(|r| f.reg_class(r.reg).bank == RegBank::Vector);
            if other_is_vgpr {
                debug_assert!(f.instr(instr).operands[1].is_reg(), "carry def missing");
                // The commute may have flipped sub to subrev; narrow the
                // opcode the instruction has now.
                let current = f.instr(instr).opcode;
                if let Some(narrow) = target.narrowed_opcode(current) {
                    push(list, instr, commute_slot, value, source_def, true, Some(narrow));
                    return true;
                }
            }
        }

        target.commute(f, instr);
        return false;
    }

    push(list, instr, commute_slot, value, source_def, true, None);
    true
}

fn push(
    list: &mut FoldList,
    use_instr: InstrId,
    slot: usize,
    value: &Operand,
    source_def: InstrId,
    commuted: bool,
    shrink_to: Option<Opcode>,
) {
    let value = FoldValue::from_operand(value).expect("physical register is not a fold value");
    list.push(FoldCandidate { use_instr, slot, value, source_def, commuted, shrink_to });
}
