// src/fold/tests.rs

use super::run_on_function;
use crate::mir::{
    BlockId, Instr, MirFunction, Operand, OutMod, PhysReg, RegClass, RegHalf, RegOperand,
    VirtualReg,
};
use crate::target::{Opcode, WaveTarget};

fn setup() -> (MirFunction, BlockId, WaveTarget) {
    let mut f = MirFunction::new("t");
    let bb = f.add_block("b0");
    (f, bb, WaveTarget::new())
}

fn reg(r: VirtualReg) -> Operand {
    Operand::reg(r)
}

fn imm(v: i64) -> Operand {
    Operand::Imm(v)
}

const TWO_F32: i64 = 0x4000_0000;

// ============================================================================
// Immediate folding
// ============================================================================

#[test]
fn inline_immediate_folds_and_def_is_erased() {
    let (mut f, bb, t) = setup();
    let a = f.new_vreg(RegClass::S32);
    let other = f.new_vreg(RegClass::S32);
    let d = f.new_vreg(RegClass::S32);
    let mov = f.push(bb, Instr::new(Opcode::SMovB32, [reg(a), imm(7)]));
    let and = f.push(bb, Instr::new(Opcode::SAndB32, [reg(d), reg(a), reg(other)]));

    assert!(run_on_function(&mut f, &t));
    assert!(!f.is_live(mov));
    let ins = f.instr(and);
    assert_eq!(ins.operands[1], imm(7));
    assert_eq!(ins.operands[2].as_reg().map(|r| r.reg), Some(other));

    // Fixed point: a second run changes nothing.
    assert!(!run_on_function(&mut f, &t));
}

#[test]
fn register_source_folds_into_every_use() {
    let (mut f, bb, t) = setup();
    let src = f.new_vreg(RegClass::V32);
    let copied = f.new_vreg(RegClass::V32);
    let other = f.new_vreg(RegClass::V32);
    let d0 = f.new_vreg(RegClass::V32);
    let d1 = f.new_vreg(RegClass::V32);
    let cp = f.push(bb, Instr::new(Opcode::Copy, [reg(copied), reg(src)]));
    let and = f.push(bb, Instr::new(Opcode::VAndB32, [reg(d0), reg(copied), reg(other)]));
    let or = f.push(bb, Instr::new(Opcode::VOrB32, [reg(d1), reg(copied), reg(other)]));

    assert!(run_on_function(&mut f, &t));
    assert_eq!(f.instr(and).operands[1].as_reg().map(|r| r.reg), Some(src));
    assert_eq!(f.instr(or).operands[1].as_reg().map(|r| r.reg), Some(src));
    assert!(!f.is_live(cp));
}

#[test]
fn literal_folds_into_at_most_one_use() {
    let (mut f, bb, t) = setup();
    let a = f.new_vreg(RegClass::V32);
    let other = f.new_vreg(RegClass::V32);
    let d0 = f.new_vreg(RegClass::V32);
    let d1 = f.new_vreg(RegClass::V32);
    let mov = f.push(bb, Instr::new(Opcode::VMovB32, [reg(a), imm(1000)]));
    let and = f.push(bb, Instr::new(Opcode::VAndB32, [reg(d0), reg(a), reg(other)]));
    let or = f.push(bb, Instr::new(Opcode::VOrB32, [reg(d1), reg(a), reg(other)]));

    // Two literal-cost uses: folding would duplicate the encoding word.
    assert!(!run_on_function(&mut f, &t));
    assert!(f.is_live(mov));
    assert!(f.instr(and).operands[1].is_reg());
    assert!(f.instr(or).operands[1].is_reg());
}

#[test]
fn single_literal_use_folds() {
    let (mut f, bb, t) = setup();
    let a = f.new_vreg(RegClass::V32);
    let other = f.new_vreg(RegClass::V32);
    let d0 = f.new_vreg(RegClass::V32);
    let mov = f.push(bb, Instr::new(Opcode::VMovB32, [reg(a), imm(1000)]));
    let and = f.push(bb, Instr::new(Opcode::VAndB32, [reg(d0), reg(a), reg(other)]));

    assert!(run_on_function(&mut f, &t));
    assert_eq!(f.instr(and).operands[1], imm(1000));
    assert!(!f.is_live(mov));
}

#[test]
fn constant_copy_becomes_move_of_destination_class() {
    let (mut f, bb, t) = setup();
    let s = f.new_vreg(RegClass::S32);
    let v = f.new_vreg(RegClass::V32);
    let other = f.new_vreg(RegClass::V32);
    let d = f.new_vreg(RegClass::V32);
    f.push(bb, Instr::new(Opcode::SMovB32, [reg(s), imm(7)]));
    let cp = f.push(bb, Instr::new(Opcode::Copy, [reg(v), reg(s)]));
    let and = f.push(bb, Instr::new(Opcode::VAndB32, [reg(d), reg(v), reg(other)]));

    assert!(run_on_function(&mut f, &t));
    // The copy was rewritten into a vector move of the immediate, and
    // the scalar source was offered directly to the and.
    let ins = f.instr(cp);
    assert_eq!(ins.opcode, Opcode::VMovB32);
    assert_eq!(ins.operands[1], imm(7));
    assert_eq!(f.instr(and).operands[1].as_reg().map(|r| r.reg), Some(s));
}

#[test]
fn copy_to_physical_register_is_left_alone() {
    let (mut f, bb, t) = setup();
    let s = f.new_vreg(RegClass::S32);
    f.push(bb, Instr::new(Opcode::SMovB32, [reg(s), imm(3)]));
    let cp = f.push(bb, Instr::new(Opcode::Copy, [Operand::Phys(PhysReg::Exec), reg(s)]));

    assert!(!run_on_function(&mut f, &t));
    assert_eq!(f.instr(cp).opcode, Opcode::Copy);
    assert!(f.instr(cp).operands[1].is_reg());
}

// ============================================================================
// 64-bit immediate splitting
// ============================================================================

#[test]
fn wide_immediate_splits_at_sub_register_uses() {
    let (mut f, bb, t) = setup();
    let pair = f.new_vreg(RegClass::S64);
    let other = f.new_vreg(RegClass::S32);
    let d0 = f.new_vreg(RegClass::S32);
    let d1 = f.new_vreg(RegClass::S32);
    let mov = f.push(bb, Instr::new(Opcode::SMovB64, [reg(pair), imm(5)]));
    let lo_use = f.push(
        bb,
        Instr::new(
            Opcode::SAndB32,
            [reg(d0), Operand::Reg(RegOperand::with_sub(pair, RegHalf::Lo)), reg(other)],
        ),
    );
    let hi_use = f.push(
        bb,
        Instr::new(
            Opcode::SAndB32,
            [reg(d1), Operand::Reg(RegOperand::with_sub(pair, RegHalf::Hi)), reg(other)],
        ),
    );

    assert!(run_on_function(&mut f, &t));
    assert_eq!(f.instr(lo_use).operands[1], imm(5));
    assert_eq!(f.instr(hi_use).operands[1], imm(0));
    assert!(!f.is_live(mov));
}

// ============================================================================
// Frame-index folding
// ============================================================================

#[test]
fn frame_index_folds_into_scratch_address_and_rebases() {
    let (mut f, bb, t) = setup();
    let addr = f.new_vreg(RegClass::V32);
    let d = f.new_vreg(RegClass::V32);
    let mov = f.push(bb, Instr::new(Opcode::VMovB32, [reg(addr), Operand::FrameIndex(0)]));
    let load = f.push(
        bb,
        Instr::new(
            Opcode::ScratchLoadB32,
            [reg(d), reg(addr), Operand::Phys(PhysReg::Scratch), imm(8)],
        ),
    );

    assert!(run_on_function(&mut f, &t));
    let ins = f.instr(load);
    assert_eq!(ins.operands[1], Operand::FrameIndex(0));
    assert_eq!(ins.operands[2], Operand::Phys(PhysReg::StackPtr));
    assert!(!f.is_live(mov));
}

#[test]
fn frame_index_needs_a_stack_base() {
    let (mut f, bb, t) = setup();
    let addr = f.new_vreg(RegClass::V32);
    let base = f.new_vreg(RegClass::S32);
    let d = f.new_vreg(RegClass::V32);
    f.push(bb, Instr::new(Opcode::VMovB32, [reg(addr), Operand::FrameIndex(0)]));
    let load = f.push(
        bb,
        Instr::new(Opcode::ScratchLoadB32, [reg(d), reg(addr), reg(base), imm(8)]),
    );

    assert!(!run_on_function(&mut f, &t));
    assert!(f.instr(load).operands[1].is_reg());
}

// ============================================================================
// Commutation and shrinking
// ============================================================================

#[test]
fn mac_fold_into_tied_slot_becomes_mad() {
    let (mut f, bb, t) = setup();
    let k = f.new_vreg(RegClass::V32);
    let s0 = f.new_vreg(RegClass::V32);
    let s1 = f.new_vreg(RegClass::V32);
    let d = f.new_vreg(RegClass::V32);
    let mov = f.push(bb, Instr::new(Opcode::VMovB32, [reg(k), imm(TWO_F32)]));
    let mac = f.push(bb, Instr::new(Opcode::VMacF32, [reg(d), reg(s0), reg(s1), reg(k)]));

    assert!(run_on_function(&mut f, &t));
    let ins = f.instr(mac);
    assert_eq!(ins.opcode, Opcode::VMadF32);
    assert_eq!(ins.operands[3], imm(TWO_F32));
    assert!(!f.is_live(mov));
}

#[test]
fn literal_shrinks_carry_add_when_flag_is_dead() {
    let (mut f, bb, t) = setup();
    let k = f.new_vreg(RegClass::V32);
    let v = f.new_vreg(RegClass::V32);
    let d = f.new_vreg(RegClass::V32);
    let carry = f.new_vreg(RegClass::S32);
    let mov = f.push(bb, Instr::new(Opcode::VMovB32, [reg(k), imm(1000)]));
    let add = f.push(
        bb,
        Instr::new(Opcode::VAddU32X, [reg(d), reg(carry), reg(k), reg(v)]),
    );

    assert!(run_on_function(&mut f, &t));
    let ins = f.instr(add);
    // Commuted, shrunk, commuted back: the narrow form keeps the
    // original operand order; the literal itself stays in its register.
    assert_eq!(ins.opcode, Opcode::VAddU32);
    assert_eq!(ins.operands.len(), 3);
    assert_eq!(ins.operands[1].as_reg().map(|r| r.reg), Some(k));
    assert_eq!(ins.operands[2].as_reg().map(|r| r.reg), Some(v));
    assert!(f.is_live(mov));
}

#[test]
fn shrink_is_abandoned_when_carry_is_live() {
    let (mut f, bb, t) = setup();
    let exit = f.add_block("b1");
    let k = f.new_vreg(RegClass::V32);
    let v = f.new_vreg(RegClass::V32);
    let d = f.new_vreg(RegClass::V32);
    let carry = f.new_vreg(RegClass::S32);
    f.push(bb, Instr::new(Opcode::VMovB32, [reg(k), imm(1000)]));
    let sub = f.push(
        bb,
        Instr::new(Opcode::VSubU32X, [reg(d), reg(carry), reg(k), reg(v)]),
    );
    f.push(bb, Instr::new(Opcode::SCBranch, [Operand::Phys(PhysReg::Carry)]));
    f.add_succ(bb, exit);

    assert!(!run_on_function(&mut f, &t));
    // The failed edit restored the operand order and the opcode.
    let ins = f.instr(sub);
    assert_eq!(ins.opcode, Opcode::VSubU32X);
    assert_eq!(ins.operands[2].as_reg().map(|r| r.reg), Some(k));
    assert_eq!(ins.operands[3].as_reg().map(|r| r.reg), Some(v));
}

#[test]
fn carry_consumer_gets_a_copy_after_shrink() {
    let (mut f, bb, t) = setup();
    let k = f.new_vreg(RegClass::V32);
    let v = f.new_vreg(RegClass::V32);
    let d = f.new_vreg(RegClass::V32);
    let carry = f.new_vreg(RegClass::S32);
    let s0 = f.new_vreg(RegClass::V32);
    let s1 = f.new_vreg(RegClass::V32);
    let sel = f.new_vreg(RegClass::V32);
    f.push(bb, Instr::new(Opcode::VMovB32, [reg(k), imm(1000)]));
    let add = f.push(
        bb,
        Instr::new(Opcode::VAddU32X, [reg(d), reg(carry), reg(k), reg(v)]),
    );
    // Consumes the carry result through a virtual register, not the
    // flag itself, so the flag is still provably dead after the add.
    let select = f.push(
        bb,
        Instr::new(Opcode::VCndMaskB32, [reg(sel), reg(s0), reg(s1), reg(carry)]),
    );

    assert!(run_on_function(&mut f, &t));
    assert_eq!(f.instr(add).opcode, Opcode::VAddU32);
    // The copy sits between the add and the select.
    let ids = f.instr_ids(bb);
    let add_pos = ids.iter().position(|&i| i == add).unwrap();
    let copy_id = ids[add_pos + 1];
    let cp = f.instr(copy_id);
    assert_eq!(cp.opcode, Opcode::Copy);
    assert_eq!(cp.operands[0].as_reg().map(|r| r.reg), Some(carry));
    assert_eq!(cp.operands[1], Operand::Phys(PhysReg::Carry));
    assert_eq!(f.def(carry), Some(copy_id));
    assert!(f.instr(select).operands[3].is_reg());
}

// ============================================================================
// Constant evaluation through the pipeline
// ============================================================================

#[test]
fn fully_constant_shift_evaluates_with_masked_count() {
    let (mut f, bb, t) = setup();
    let amt = f.new_vreg(RegClass::S32);
    let one = f.new_vreg(RegClass::S32);
    let d = f.new_vreg(RegClass::S32);
    let mov_amt = f.push(bb, Instr::new(Opcode::SMovB32, [reg(amt), imm(35)]));
    f.push(bb, Instr::new(Opcode::SMovB32, [reg(one), imm(1)]));
    let shl = f.push(bb, Instr::new(Opcode::SShlB32, [reg(d), reg(one), reg(amt)]));

    assert!(run_on_function(&mut f, &t));
    let ins = f.instr(shl);
    assert_eq!(ins.opcode, Opcode::SMovB32);
    // Shift by 35 behaves as shift by 3.
    assert_eq!(ins.operands[1], imm(8));
    assert!(!f.is_live(mov_amt));
}

#[test]
fn or_with_materialized_zero_reduces_to_copy() {
    let (mut f, bb, t) = setup();
    let z = f.new_vreg(RegClass::V32);
    let x = f.new_vreg(RegClass::V32);
    let d = f.new_vreg(RegClass::V32);
    let mov = f.push(bb, Instr::new(Opcode::VMovB32, [reg(z), imm(0)]));
    let or = f.push(bb, Instr::new(Opcode::VOrB32, [reg(d), reg(x), reg(z)]));

    assert!(run_on_function(&mut f, &t));
    let ins = f.instr(or);
    assert_eq!(ins.opcode, Opcode::Copy);
    assert_eq!(ins.operands[1].as_reg().map(|r| r.reg), Some(x));
    assert!(!f.is_live(mov));
}

#[test]
fn folding_both_selects_sources_collapses_the_select() {
    let (mut f, bb, t) = setup();
    let a = f.new_vreg(RegClass::V32);
    let b = f.new_vreg(RegClass::V32);
    let cond = f.new_vreg(RegClass::S64);
    let d = f.new_vreg(RegClass::V32);
    let mov_a = f.push(bb, Instr::new(Opcode::VMovB32, [reg(a), imm(3)]));
    let mov_b = f.push(bb, Instr::new(Opcode::VMovB32, [reg(b), imm(3)]));
    let sel = f.push(
        bb,
        Instr::new(Opcode::VCndMaskB32, [reg(d), reg(a), reg(b), reg(cond)]),
    );

    assert!(run_on_function(&mut f, &t));
    let ins = f.instr(sel);
    assert_eq!(ins.opcode, Opcode::VMovB32);
    assert_eq!(ins.operands[1], imm(3));
    assert!(f.uses(cond).is_empty());
    assert!(!f.is_live(mov_a));
    assert!(!f.is_live(mov_b));
}

// ============================================================================
// Aggregates and accumulator slots
// ============================================================================

#[test]
fn splat_sequence_folds_into_accumulator_slot() {
    let (mut f, bb, t) = setup();
    let one_f32 = 0x3f80_0000;
    let e0 = f.new_vreg(RegClass::V32);
    let e1 = f.new_vreg(RegClass::V32);
    let pair = f.new_vreg(RegClass::A64);
    let s0 = f.new_vreg(RegClass::V32);
    let s1 = f.new_vreg(RegClass::V32);
    let acc = f.new_vreg(RegClass::A64);
    f.push(bb, Instr::new(Opcode::VMovB32, [reg(e0), imm(one_f32)]));
    f.push(bb, Instr::new(Opcode::VMovB32, [reg(e1), imm(one_f32)]));
    f.push(
        bb,
        Instr::new(Opcode::RegSequence, [reg(pair), reg(e0), imm(0), reg(e1), imm(1)]),
    );
    let mma = f.push(
        bb,
        Instr::new(Opcode::VMmaF32, [reg(acc), reg(s0), reg(s1), reg(pair)]),
    );

    assert!(run_on_function(&mut f, &t));
    assert_eq!(f.instr(mma).operands[3], imm(one_f32));
}

#[test]
fn mixed_sequence_does_not_fold() {
    let (mut f, bb, t) = setup();
    let e0 = f.new_vreg(RegClass::V32);
    let e1 = f.new_vreg(RegClass::V32);
    let pair = f.new_vreg(RegClass::A64);
    let s0 = f.new_vreg(RegClass::V32);
    let s1 = f.new_vreg(RegClass::V32);
    let acc = f.new_vreg(RegClass::A64);
    f.push(bb, Instr::new(Opcode::VMovB32, [reg(e0), imm(1)]));
    f.push(bb, Instr::new(Opcode::VMovB32, [reg(e1), imm(2)]));
    f.push(
        bb,
        Instr::new(Opcode::RegSequence, [reg(pair), reg(e0), imm(0), reg(e1), imm(1)]),
    );
    let mma = f.push(
        bb,
        Instr::new(Opcode::VMmaF32, [reg(acc), reg(s0), reg(s1), reg(pair)]),
    );

    run_on_function(&mut f, &t);
    assert_eq!(f.instr(mma).operands[3].as_reg().map(|r| r.reg), Some(pair));
}

// ============================================================================
// Lane reads and the execution-mask guard
// ============================================================================

#[test]
fn lane_read_of_materialized_constant_becomes_scalar_move() {
    let (mut f, bb, t) = setup();
    let v = f.new_vreg(RegClass::V32);
    let s = f.new_vreg(RegClass::S32);
    let mov = f.push(bb, Instr::new(Opcode::VMovB32, [reg(v), imm(7)]));
    let read = f.push(bb, Instr::new(Opcode::VReadFirstLaneB32, [reg(s), reg(v)]));

    assert!(run_on_function(&mut f, &t));
    let ins = f.instr(read);
    assert_eq!(ins.opcode, Opcode::SMovB32);
    assert_eq!(ins.operands[1], imm(7));
    assert!(!f.is_live(mov));
}

#[test]
fn register_fold_refuses_to_cross_an_exec_write() {
    let (mut f, bb, t) = setup();
    let w = f.new_vreg(RegClass::V32);
    let v = f.new_vreg(RegClass::V32);
    let s = f.new_vreg(RegClass::S32);
    let other = f.new_vreg(RegClass::V32);
    let d = f.new_vreg(RegClass::V32);
    // v_mov reads the execution mask, so its value is mask-dependent.
    f.push(bb, Instr::new(Opcode::VMovB32, [reg(v), reg(w)]));
    f.push(bb, Instr::new(Opcode::SMovB32, [Operand::Phys(PhysReg::Exec), reg(s)]));
    let or = f.push(bb, Instr::new(Opcode::VOrB32, [reg(d), reg(v), reg(other)]));

    assert!(!run_on_function(&mut f, &t));
    assert_eq!(f.instr(or).operands[1].as_reg().map(|r| r.reg), Some(v));
}

#[test]
fn register_fold_crosses_safe_code() {
    let (mut f, bb, t) = setup();
    let w = f.new_vreg(RegClass::V32);
    let v = f.new_vreg(RegClass::V32);
    let other = f.new_vreg(RegClass::V32);
    let d = f.new_vreg(RegClass::V32);
    f.push(bb, Instr::new(Opcode::VMovB32, [reg(v), reg(w)]));
    let or = f.push(bb, Instr::new(Opcode::VOrB32, [reg(d), reg(v), reg(other)]));

    assert!(run_on_function(&mut f, &t));
    assert_eq!(f.instr(or).operands[1].as_reg().map(|r| r.reg), Some(w));
}

// ============================================================================
// Clamp merging
// ============================================================================

#[test]
fn clamp_merges_into_single_use_producer() {
    let (mut f, bb, t) = setup();
    let a = f.new_vreg(RegClass::V32);
    let b = f.new_vreg(RegClass::V32);
    let x = f.new_vreg(RegClass::V32);
    let clamped = f.new_vreg(RegClass::V32);
    let consumer = f.new_vreg(RegClass::V32);
    let other = f.new_vreg(RegClass::V32);
    let add = f.push(bb, Instr::new(Opcode::VAddF32, [reg(x), reg(a), reg(b)]));
    let max = f.push(
        bb,
        Instr::new(Opcode::VMaxF32, [reg(clamped), reg(x), reg(x)]).with_clamp(),
    );
    let use_instr = f.push(
        bb,
        Instr::new(Opcode::VAndB32, [reg(consumer), reg(clamped), reg(other)]),
    );

    assert!(run_on_function(&mut f, &t));
    assert!(f.instr(add).mods.clamp);
    assert!(!f.is_live(max));
    assert_eq!(f.instr(use_instr).operands[1].as_reg().map(|r| r.reg), Some(x));

    // No clamp-of-clamp: a second run finds nothing to merge.
    assert!(!run_on_function(&mut f, &t));
}

#[test]
fn clamp_does_not_merge_across_float_widths() {
    let (mut f, bb, t) = setup();
    let a = f.new_vreg(RegClass::V32);
    let b = f.new_vreg(RegClass::V32);
    let x = f.new_vreg(RegClass::V32);
    let clamped = f.new_vreg(RegClass::V32);
    let add = f.push(bb, Instr::new(Opcode::VAddF16, [reg(x), reg(a), reg(b)]));
    let max = f.push(
        bb,
        Instr::new(Opcode::VMaxF32, [reg(clamped), reg(x), reg(x)]).with_clamp(),
    );

    assert!(!run_on_function(&mut f, &t));
    assert!(!f.instr(add).mods.clamp);
    assert!(f.is_live(max));
}

#[test]
fn clamp_needs_a_single_user() {
    let (mut f, bb, t) = setup();
    let a = f.new_vreg(RegClass::V32);
    let b = f.new_vreg(RegClass::V32);
    let x = f.new_vreg(RegClass::V32);
    let clamped = f.new_vreg(RegClass::V32);
    let d = f.new_vreg(RegClass::V32);
    let other = f.new_vreg(RegClass::V32);
    let add = f.push(bb, Instr::new(Opcode::VAddF32, [reg(x), reg(a), reg(b)]));
    f.push(
        bb,
        Instr::new(Opcode::VMaxF32, [reg(clamped), reg(x), reg(x)]).with_clamp(),
    );
    // A second consumer of x blocks the merge.
    f.push(bb, Instr::new(Opcode::VAndB32, [reg(d), reg(x), reg(other)]));

    assert!(!run_on_function(&mut f, &t));
    assert!(!f.instr(add).mods.clamp);
}

// ============================================================================
// Output-scale merging
// ============================================================================

fn omod_setup(nsz: bool) -> (MirFunction, BlockId, WaveTarget) {
    let (mut f, bb, t) = setup();
    f.float_mode.no_signed_zeros = nsz;
    (f, bb, t)
}

#[test]
fn multiply_by_two_becomes_output_scale() {
    let (mut f, bb, t) = omod_setup(true);
    let a = f.new_vreg(RegClass::V32);
    let b = f.new_vreg(RegClass::V32);
    let x = f.new_vreg(RegClass::V32);
    let scaled = f.new_vreg(RegClass::V32);
    let consumer = f.new_vreg(RegClass::V32);
    let other = f.new_vreg(RegClass::V32);
    let add = f.push(bb, Instr::new(Opcode::VAddF32, [reg(x), reg(a), reg(b)]));
    let mul = f.push(bb, Instr::new(Opcode::VMulF32, [reg(scaled), reg(x), imm(TWO_F32)]));
    let use_instr = f.push(
        bb,
        Instr::new(Opcode::VAndB32, [reg(consumer), reg(scaled), reg(other)]),
    );

    assert!(run_on_function(&mut f, &t));
    assert_eq!(f.instr(add).mods.omod, OutMod::Mul2);
    assert!(!f.is_live(mul));
    assert_eq!(f.instr(use_instr).operands[1].as_reg().map(|r| r.reg), Some(x));
}

#[test]
fn self_add_is_recognized_as_times_two() {
    let (mut f, bb, t) = omod_setup(true);
    let a = f.new_vreg(RegClass::V32);
    let b = f.new_vreg(RegClass::V32);
    let x = f.new_vreg(RegClass::V32);
    let doubled = f.new_vreg(RegClass::V32);
    let mul = f.push(bb, Instr::new(Opcode::VMulF32, [reg(x), reg(a), reg(b)]));
    let dbl = f.push(bb, Instr::new(Opcode::VAddF32, [reg(doubled), reg(x), reg(x)]));

    assert!(run_on_function(&mut f, &t));
    assert_eq!(f.instr(mul).mods.omod, OutMod::Mul2);
    assert!(!f.is_live(dbl));
}

#[test]
fn ieee_mode_disables_the_scale_merge() {
    let (mut f, bb, t) = omod_setup(true);
    f.float_mode.ieee = true;
    let a = f.new_vreg(RegClass::V32);
    let b = f.new_vreg(RegClass::V32);
    let x = f.new_vreg(RegClass::V32);
    let scaled = f.new_vreg(RegClass::V32);
    let add = f.push(bb, Instr::new(Opcode::VAddF32, [reg(x), reg(a), reg(b)]));
    f.push(bb, Instr::new(Opcode::VMulF32, [reg(scaled), reg(x), imm(TWO_F32)]));

    assert!(!run_on_function(&mut f, &t));
    assert_eq!(f.instr(add).mods.omod, OutMod::None);
}

#[test]
fn denormal_mode_disables_only_that_width() {
    let (mut f, bb, t) = omod_setup(true);
    f.float_mode.fp32_denormals = true;
    let a = f.new_vreg(RegClass::V32);
    let b = f.new_vreg(RegClass::V32);
    let x32 = f.new_vreg(RegClass::V32);
    let s32 = f.new_vreg(RegClass::V32);
    let x16 = f.new_vreg(RegClass::V32);
    let s16 = f.new_vreg(RegClass::V32);
    let add32 = f.push(bb, Instr::new(Opcode::VAddF32, [reg(x32), reg(a), reg(b)]));
    f.push(bb, Instr::new(Opcode::VMulF32, [reg(s32), reg(x32), imm(TWO_F32)]));
    let add16 = f.push(bb, Instr::new(Opcode::VAddF16, [reg(x16), reg(a), reg(b)]));
    f.push(bb, Instr::new(Opcode::VMulF16, [reg(s16), reg(x16), imm(0x4000)]));

    assert!(run_on_function(&mut f, &t));
    assert_eq!(f.instr(add32).mods.omod, OutMod::None);
    assert_eq!(f.instr(add16).mods.omod, OutMod::Mul2);
}

#[test]
fn instruction_level_nsz_enables_the_merge() {
    let (mut f, bb, t) = omod_setup(false);
    let a = f.new_vreg(RegClass::V32);
    let b = f.new_vreg(RegClass::V32);
    let x = f.new_vreg(RegClass::V32);
    let scaled = f.new_vreg(RegClass::V32);
    let add = f.push(bb, Instr::new(Opcode::VAddF32, [reg(x), reg(a), reg(b)]));
    f.push(
        bb,
        Instr::new(Opcode::VMulF32, [reg(scaled), reg(x), imm(TWO_F32)]).with_nsz(),
    );

    assert!(run_on_function(&mut f, &t));
    assert_eq!(f.instr(add).mods.omod, OutMod::Mul2);
}

#[test]
fn scale_does_not_merge_into_a_clamped_producer() {
    let (mut f, bb, t) = omod_setup(true);
    let a = f.new_vreg(RegClass::V32);
    let b = f.new_vreg(RegClass::V32);
    let x = f.new_vreg(RegClass::V32);
    let scaled = f.new_vreg(RegClass::V32);
    let add = f.push(
        bb,
        Instr::new(Opcode::VAddF32, [reg(x), reg(a), reg(b)]).with_clamp(),
    );
    let mul = f.push(bb, Instr::new(Opcode::VMulF32, [reg(scaled), reg(x), imm(TWO_F32)]));

    assert!(!run_on_function(&mut f, &t));
    assert_eq!(f.instr(add).mods.omod, OutMod::None);
    assert!(f.is_live(mul));
}

// ============================================================================
// Index-register redefinition cache
// ============================================================================

#[test]
fn redundant_index_write_is_erased() {
    let (mut f, bb, t) = setup();
    let s = f.new_vreg(RegClass::S32);
    let filler0 = f.new_vreg(RegClass::V32);
    let filler1 = f.new_vreg(RegClass::V32);
    let filler2 = f.new_vreg(RegClass::V32);
    f.push(bb, Instr::new(Opcode::SMovB32, [Operand::Phys(PhysReg::Index), reg(s)]));
    f.push(
        bb,
        Instr::new(Opcode::VOrB32, [reg(filler0), reg(filler1), reg(filler2)]),
    );
    let second = f.push(bb, Instr::new(Opcode::SMovB32, [Operand::Phys(PhysReg::Index), reg(s)]));

    assert!(run_on_function(&mut f, &t));
    assert!(!f.is_live(second));
    assert_eq!(f.block(bb).instrs().len(), 2);
}

#[test]
fn unrecognized_index_clobber_resets_the_cache() {
    let (mut f, bb, t) = setup();
    let s = f.new_vreg(RegClass::S32);
    let v = f.new_vreg(RegClass::V32);
    f.push(bb, Instr::new(Opcode::SMovB32, [Operand::Phys(PhysReg::Index), reg(s)]));
    // A lane read into the index register is not a tracked copy.
    f.push(
        bb,
        Instr::new(Opcode::VReadFirstLaneB32, [Operand::Phys(PhysReg::Index), reg(v)]),
    );
    let third = f.push(bb, Instr::new(Opcode::SMovB32, [Operand::Phys(PhysReg::Index), reg(s)]));

    run_on_function(&mut f, &t);
    assert!(f.is_live(third));
}

// ============================================================================
// Whole-pass behavior
// ============================================================================

#[test]
fn pass_reaches_a_fixed_point() {
    let (mut f, bb, t) = setup();
    f.float_mode.no_signed_zeros = true;
    let a = f.new_vreg(RegClass::S32);
    let b = f.new_vreg(RegClass::V32);
    let c = f.new_vreg(RegClass::V32);
    let d = f.new_vreg(RegClass::V32);
    let e = f.new_vreg(RegClass::V32);
    let other = f.new_vreg(RegClass::V32);
    f.push(bb, Instr::new(Opcode::SMovB32, [reg(a), imm(0)]));
    f.push(bb, Instr::new(Opcode::Copy, [reg(b), reg(a)]));
    f.push(bb, Instr::new(Opcode::VOrB32, [reg(c), reg(b), reg(other)]));
    f.push(bb, Instr::new(Opcode::VAddF32, [reg(d), reg(c), reg(c)]));
    f.push(bb, Instr::new(Opcode::VMaxF32, [reg(e), reg(d), reg(d)]).with_clamp());

    let mut rounds = 0;
    while run_on_function(&mut f, &t) {
        rounds += 1;
        assert!(rounds < 10, "pass does not converge");
    }
    assert!(!run_on_function(&mut f, &t));
}
