// src/fold/mod.rs
//
// The operand-folding peephole pass. Per function: walk blocks in
// depth-first order; per block, visit instructions in program order
// (snapshotting the list, since a visited instruction may be replaced or
// erased by the very fold it triggers). Foldable copies get their value
// propagated into all uses; everything else is offered the select
// self-fold and the clamp/output-scale merges. A small per-block cache
// recognizes redundant rewrites of the index register.

mod apply;
mod candidate;
mod collector;
mod consteval;
mod merge;
mod resolver;

#[cfg(test)]
mod tests;

use crate::mir::{MirFunction, Operand, PhysReg};
use crate::target::WaveTarget;

/// Run the pass over one function. Returns whether anything changed.
pub fn run_on_function(f: &mut MirFunction, target: &WaveTarget) -> bool {
    let mut changed = false;
    let ieee = f.float_mode.ieee;
    let has_nsz = f.float_mode.no_signed_zeros;

    for bb in f.block_order_dfs() {
        // Last recognized write to the index register in this block.
        let mut known_index: Option<Operand> = None;

        for id in f.instr_ids(bb) {
            if !f.is_live(id) {
                continue;
            }

            changed |= consteval::try_fold_select_same(f, target, id);

            if !f.instr(id).desc().foldable_copy {
                // The output scale is unreliable in IEEE mode and, short
                // of a no-signed-zeros guarantee, scaling can flip the
                // sign of a zero.
                let mut merged = false;
                if !ieee && (has_nsz || f.instr(id).nsz) {
                    merged = merge::try_fold_omod(f, target, id);
                }
                if !merged {
                    merged = merge::try_fold_clamp(f, target, id);
                }
                changed |= merged;

                if known_index.is_some()
                    && f.is_live(id)
                    && f.modifies_phys(id, PhysReg::Index)
                {
                    // Unrecognized clobber; the cached value is stale.
                    known_index = None;
                }
                continue;
            }

            // Track simple redefinitions of the index register so the
            // redundant ones can be erased.
            if matches!(f.instr(id).operands[0], Operand::Phys(PhysReg::Index)) {
                let new_val = f.instr(id).operands[1].clone();
                if let Some(known) = &known_index
                    && known.identical_to(&new_val)
                {
                    tracing::debug!(instr = id.index(), "erasing redundant index-register write");
                    f.erase(id);
                    changed = true;
                    continue;
                }
                // Physical-register sources are not tracked.
                known_index =
                    if matches!(new_val, Operand::Phys(_)) { None } else { Some(new_val) };
                continue;
            }

            {
                let ins = f.instr(id);
                let op_to_fold = &ins.operands[1];
                if !op_to_fold.is_imm_like() && !op_to_fold.is_reg() {
                    continue;
                }
                // Folding a physical destination backwards would rewrite
                // earlier uses with a later value.
                if !matches!(ins.operands[0], Operand::Reg(_)) {
                    continue;
                }
            }

            changed |= collector::fold_def_into_uses(f, target, id);
        }
    }
    changed
}
