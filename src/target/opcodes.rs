// src/target/opcodes.rs
//
// Static opcode descriptors for the wave ISA. A descriptor fixes the
// explicit operand slots (defs first, then uses), the encoding-relevant
// flags, and the twin opcodes a rewrite can reach (commuted form, narrow
// form, three-address form of a two-address multiply-accumulate).

/// What a slot accepts, encoding-wise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotClass {
    DefScalar,
    DefVector,
    DefAcc,
    DefAny,
    /// Compact VALU source 0: any register, an inline constant, or the
    /// instruction's one literal word.
    VSrc,
    /// Vector register only (compact VALU trailing sources).
    VGpr,
    /// Extended-encoding VALU source: register or inline constant; the
    /// extended encodings carry no literal word.
    VSrcX,
    /// Scalar ALU source: scalar register, inline constant, or the one
    /// literal word.
    SSrc,
    /// Scalar register only.
    SGpr,
    /// Accumulator-typed source: accumulator or vector register, or an
    /// inline constant.
    AccSrc,
    /// Accumulator register only.
    AccReg,
    /// Move source: any register, immediate, frame index, or global.
    MovSrc,
    /// Copy or register-sequence element: any register.
    AnyReg,
    /// Scratch address: vector register, or a frame index once folded.
    Addr,
    /// Immediate offset word.
    OffImm,
}

impl SlotClass {
    #[inline]
    pub fn is_def(self) -> bool {
        matches!(
            self,
            SlotClass::DefScalar | SlotClass::DefVector | SlotClass::DefAcc | SlotClass::DefAny
        )
    }
}

/// Operand interpretation of a slot; inline-constant legality is judged
/// against the type of the *use* slot, never the defining instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    B32,
    F32,
    F16,
    B64,
}

impl OperandType {
    #[inline]
    pub fn bits(self) -> u8 {
        match self {
            OperandType::B64 => 64,
            _ => 32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotDesc {
    pub class: SlotClass,
    pub ty: OperandType,
}

const fn slot(class: SlotClass, ty: OperandType) -> SlotDesc {
    SlotDesc { class, ty }
}

#[derive(Debug, Clone, Copy)]
pub struct OpcodeDesc {
    pub name: &'static str,
    pub num_defs: u8,
    pub slots: &'static [SlotDesc],
    /// The two source slots named by `commutable_slots` may swap.
    pub commutable: bool,
    /// Opcode after commuting, when the swap changes it (sub <-> subrev).
    pub commuted_opcode: Option<Opcode>,
    /// Materializes an immediate (moves).
    pub move_imm: bool,
    /// Copy-like: one def, one source, no side effects on the value.
    pub foldable_copy: bool,
    /// Variadic operand list (register sequence).
    pub variadic: bool,
    /// Carries source modifiers plus the clamp and output-scale bits.
    pub has_modifiers: bool,
    /// Source slot tied to def 0 (two-address accumulate).
    pub tied_src: Option<u8>,
    /// Three-address twin of a two-address accumulate.
    pub mad_twin: Option<Opcode>,
    /// Narrow-encoding twin (explicit carry def becomes implicit).
    pub narrow_twin: Option<Opcode>,
    /// Reads the execution mask implicitly.
    pub reads_exec: bool,
    /// Defines the carry flag implicitly (narrow carry arithmetic).
    pub writes_carry: bool,
    /// Scratch memory access whose address slot can take a frame index.
    pub scratch_access: bool,
    pub is_terminator: bool,
}

const BASE: OpcodeDesc = OpcodeDesc {
    name: "",
    num_defs: 1,
    slots: &[],
    commutable: false,
    commuted_opcode: None,
    move_imm: false,
    foldable_copy: false,
    variadic: false,
    has_modifiers: false,
    tied_src: None,
    mad_twin: None,
    narrow_twin: None,
    reads_exec: false,
    writes_carry: false,
    scratch_access: false,
    is_terminator: false,
};

use OperandType::{B32, B64, F16, F32};
use SlotClass::*;

const SALU_BIN: &[SlotDesc] = &[slot(DefScalar, B32), slot(SSrc, B32), slot(SSrc, B32)];
const VALU_BIN: &[SlotDesc] = &[slot(DefVector, B32), slot(VSrc, B32), slot(VGpr, B32)];
const VALU_F32_BIN: &[SlotDesc] = &[slot(DefVector, F32), slot(VSrcX, F32), slot(VSrcX, F32)];
const VALU_F16_BIN: &[SlotDesc] = &[slot(DefVector, F16), slot(VSrcX, F16), slot(VSrcX, F16)];
const MAC_F32: &[SlotDesc] =
    &[slot(DefVector, F32), slot(VSrcX, F32), slot(VSrcX, F32), slot(VGpr, F32)];
const MAC_F16: &[SlotDesc] =
    &[slot(DefVector, F16), slot(VSrcX, F16), slot(VSrcX, F16), slot(VGpr, F16)];
const MAD_F32: &[SlotDesc] =
    &[slot(DefVector, F32), slot(VSrcX, F32), slot(VSrcX, F32), slot(VSrcX, F32)];
const MAD_F16: &[SlotDesc] =
    &[slot(DefVector, F16), slot(VSrcX, F16), slot(VSrcX, F16), slot(VSrcX, F16)];
const CARRY_X: &[SlotDesc] =
    &[slot(DefVector, B32), slot(DefScalar, B32), slot(VSrcX, B32), slot(VSrcX, B32)];
const COPY_SLOTS: &[SlotDesc] = &[slot(DefAny, B32), slot(AnyReg, B32)];
const SEQ_SLOTS: &[SlotDesc] = &[slot(DefAny, B64)];
const SMOV32_SLOTS: &[SlotDesc] = &[slot(DefScalar, B32), slot(MovSrc, B32)];
const SMOV64_SLOTS: &[SlotDesc] = &[slot(DefScalar, B64), slot(MovSrc, B64)];
const VMOV32_SLOTS: &[SlotDesc] = &[slot(DefVector, B32), slot(MovSrc, B32)];
const ACC_WRITE_SLOTS: &[SlotDesc] = &[slot(DefAcc, B32), slot(AccSrc, B32)];
const ACC_READ_SLOTS: &[SlotDesc] = &[slot(DefVector, B32), slot(AccReg, B32)];
const SALU_UN: &[SlotDesc] = &[slot(DefScalar, B32), slot(SSrc, B32)];
const VALU_UN: &[SlotDesc] = &[slot(DefVector, B32), slot(VSrc, B32)];
const SHL_OR_SLOTS: &[SlotDesc] =
    &[slot(DefVector, B32), slot(VSrcX, B32), slot(VSrcX, B32), slot(VSrcX, B32)];
const CNDMASK_SLOTS: &[SlotDesc] =
    &[slot(DefVector, B32), slot(VSrcX, B32), slot(VSrcX, B32), slot(SGpr, B64)];
const READLANE_SLOTS: &[SlotDesc] = &[slot(DefScalar, B32), slot(VGpr, B32)];
const MMA_SLOTS: &[SlotDesc] =
    &[slot(DefAcc, B64), slot(VGpr, F32), slot(VGpr, F32), slot(AccSrc, F32)];
const SCRATCH_LOAD_SLOTS: &[SlotDesc] =
    &[slot(DefVector, B32), slot(Addr, B32), slot(SGpr, B32), slot(OffImm, B32)];
const SCRATCH_STORE_SLOTS: &[SlotDesc] =
    &[slot(VGpr, B32), slot(Addr, B32), slot(SGpr, B32), slot(OffImm, B32)];
const CBRANCH_SLOTS: &[SlotDesc] = &[slot(SGpr, B64)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Copy,
    RegSequence,
    // Moves.
    SMovB32,
    SMovB64,
    VMovB32,
    VAccWriteB32,
    VAccReadB32,
    // Scalar bitwise and shifts.
    SAndB32,
    SOrB32,
    SXorB32,
    SNotB32,
    SShlB32,
    SShrB32,
    SAshrI32,
    // Vector bitwise and shifts, compact encoding.
    VAndB32,
    VOrB32,
    VXorB32,
    VNotB32,
    VShlB32,
    VShlRevB32,
    VShrB32,
    VShrRevB32,
    VAshrI32,
    VAshrRevI32,
    // Fused shift-or, extended encoding.
    VShlOrB32,
    // Float VALU with modifiers, extended encoding.
    VAddF32,
    VAddF16,
    VMulF32,
    VMulF16,
    VMaxF32,
    VMaxF16,
    // Multiply-accumulate, two-address plus three-address twins.
    VMacF32,
    VMacF16,
    VFmacF32,
    VFmacF16,
    VMadF32,
    VMadF16,
    VFmaF32,
    VFmaF16,
    // Carry arithmetic: extended (explicit carry def) and narrow twins.
    VAddU32X,
    VSubU32X,
    VSubRevU32X,
    VAddU32,
    VSubU32,
    VSubRevU32,
    // Lane select and lane read.
    VCndMaskB32,
    VReadFirstLaneB32,
    // Matrix accumulate (accumulator-typed source).
    VMmaF32,
    // Scratch memory.
    ScratchLoadB32,
    ScratchStoreB32,
    // Terminators.
    SBranch,
    SCBranch,
    SEndpgm,
}

impl Opcode {
    pub const ALL: &'static [Opcode] = &[
        Opcode::Copy,
        Opcode::RegSequence,
        Opcode::SMovB32,
        Opcode::SMovB64,
        Opcode::VMovB32,
        Opcode::VAccWriteB32,
        Opcode::VAccReadB32,
        Opcode::SAndB32,
        Opcode::SOrB32,
        Opcode::SXorB32,
        Opcode::SNotB32,
        Opcode::SShlB32,
        Opcode::SShrB32,
        Opcode::SAshrI32,
        Opcode::VAndB32,
        Opcode::VOrB32,
        Opcode::VXorB32,
        Opcode::VNotB32,
        Opcode::VShlB32,
        Opcode::VShlRevB32,
        Opcode::VShrB32,
        Opcode::VShrRevB32,
        Opcode::VAshrI32,
        Opcode::VAshrRevI32,
        Opcode::VShlOrB32,
        Opcode::VAddF32,
        Opcode::VAddF16,
        Opcode::VMulF32,
        Opcode::VMulF16,
        Opcode::VMaxF32,
        Opcode::VMaxF16,
        Opcode::VMacF32,
        Opcode::VMacF16,
        Opcode::VFmacF32,
        Opcode::VFmacF16,
        Opcode::VMadF32,
        Opcode::VMadF16,
        Opcode::VFmaF32,
        Opcode::VFmaF16,
        Opcode::VAddU32X,
        Opcode::VSubU32X,
        Opcode::VSubRevU32X,
        Opcode::VAddU32,
        Opcode::VSubU32,
        Opcode::VSubRevU32,
        Opcode::VCndMaskB32,
        Opcode::VReadFirstLaneB32,
        Opcode::VMmaF32,
        Opcode::ScratchLoadB32,
        Opcode::ScratchStoreB32,
        Opcode::SBranch,
        Opcode::SCBranch,
        Opcode::SEndpgm,
    ];

    pub fn from_name(name: &str) -> Option<Opcode> {
        Opcode::ALL.iter().copied().find(|op| op.desc().name == name)
    }

    pub fn name(self) -> &'static str {
        self.desc().name
    }

    #[inline]
    pub fn is_reg_sequence(self) -> bool {
        self == Opcode::RegSequence
    }

    pub fn desc(self) -> OpcodeDesc {
        match self {
            Opcode::Copy => OpcodeDesc {
                name: "copy",
                slots: COPY_SLOTS,
                foldable_copy: true,
                ..BASE
            },
            Opcode::RegSequence => OpcodeDesc {
                name: "reg_sequence",
                slots: SEQ_SLOTS,
                variadic: true,
                ..BASE
            },
            Opcode::SMovB32 => OpcodeDesc {
                name: "s_mov_b32",
                slots: SMOV32_SLOTS,
                move_imm: true,
                foldable_copy: true,
                ..BASE
            },
            Opcode::SMovB64 => OpcodeDesc {
                name: "s_mov_b64",
                slots: SMOV64_SLOTS,
                move_imm: true,
                foldable_copy: true,
                ..BASE
            },
            Opcode::VMovB32 => OpcodeDesc {
                name: "v_mov_b32",
                slots: VMOV32_SLOTS,
                move_imm: true,
                foldable_copy: true,
                reads_exec: true,
                ..BASE
            },
            Opcode::VAccWriteB32 => OpcodeDesc {
                name: "v_accwrite_b32",
                slots: ACC_WRITE_SLOTS,
                foldable_copy: true,
                reads_exec: true,
                ..BASE
            },
            Opcode::VAccReadB32 => OpcodeDesc {
                name: "v_accread_b32",
                slots: ACC_READ_SLOTS,
                foldable_copy: true,
                reads_exec: true,
                ..BASE
            },
            Opcode::SAndB32 => {
                OpcodeDesc { name: "s_and_b32", slots: SALU_BIN, commutable: true, ..BASE }
            }
            Opcode::SOrB32 => {
                OpcodeDesc { name: "s_or_b32", slots: SALU_BIN, commutable: true, ..BASE }
            }
            Opcode::SXorB32 => {
                OpcodeDesc { name: "s_xor_b32", slots: SALU_BIN, commutable: true, ..BASE }
            }
            Opcode::SNotB32 => OpcodeDesc {
                name: "s_not_b32",
                slots: SALU_UN,
                ..BASE
            },
            Opcode::SShlB32 => OpcodeDesc { name: "s_shl_b32", slots: SALU_BIN, ..BASE },
            Opcode::SShrB32 => OpcodeDesc { name: "s_shr_b32", slots: SALU_BIN, ..BASE },
            Opcode::SAshrI32 => OpcodeDesc { name: "s_ashr_i32", slots: SALU_BIN, ..BASE },
            Opcode::VAndB32 => OpcodeDesc {
                name: "v_and_b32",
                slots: VALU_BIN,
                commutable: true,
                reads_exec: true,
                ..BASE
            },
            Opcode::VOrB32 => OpcodeDesc {
                name: "v_or_b32",
                slots: VALU_BIN,
                commutable: true,
                reads_exec: true,
                ..BASE
            },
            Opcode::VXorB32 => OpcodeDesc {
                name: "v_xor_b32",
                slots: VALU_BIN,
                commutable: true,
                reads_exec: true,
                ..BASE
            },
            Opcode::VNotB32 => OpcodeDesc {
                name: "v_not_b32",
                slots: VALU_UN,
                reads_exec: true,
                ..BASE
            },
            Opcode::VShlB32 => {
                OpcodeDesc { name: "v_shl_b32", slots: VALU_BIN, reads_exec: true, ..BASE }
            }
            Opcode::VShlRevB32 => {
                OpcodeDesc { name: "v_shlrev_b32", slots: VALU_BIN, reads_exec: true, ..BASE }
            }
            Opcode::VShrB32 => {
                OpcodeDesc { name: "v_shr_b32", slots: VALU_BIN, reads_exec: true, ..BASE }
            }
            Opcode::VShrRevB32 => {
                OpcodeDesc { name: "v_shrrev_b32", slots: VALU_BIN, reads_exec: true, ..BASE }
            }
            Opcode::VAshrI32 => {
                OpcodeDesc { name: "v_ashr_i32", slots: VALU_BIN, reads_exec: true, ..BASE }
            }
            Opcode::VAshrRevI32 => {
                OpcodeDesc { name: "v_ashrrev_i32", slots: VALU_BIN, reads_exec: true, ..BASE }
            }
            Opcode::VShlOrB32 => OpcodeDesc {
                name: "v_shl_or_b32",
                slots: SHL_OR_SLOTS,
                reads_exec: true,
                ..BASE
            },
            Opcode::VAddF32 => OpcodeDesc {
                name: "v_add_f32",
                slots: VALU_F32_BIN,
                commutable: true,
                has_modifiers: true,
                reads_exec: true,
                ..BASE
            },
            Opcode::VAddF16 => OpcodeDesc {
                name: "v_add_f16",
                slots: VALU_F16_BIN,
                commutable: true,
                has_modifiers: true,
                reads_exec: true,
                ..BASE
            },
            Opcode::VMulF32 => OpcodeDesc {
                name: "v_mul_f32",
                slots: VALU_F32_BIN,
                commutable: true,
                has_modifiers: true,
                reads_exec: true,
                ..BASE
            },
            Opcode::VMulF16 => OpcodeDesc {
                name: "v_mul_f16",
                slots: VALU_F16_BIN,
                commutable: true,
                has_modifiers: true,
                reads_exec: true,
                ..BASE
            },
            Opcode::VMaxF32 => OpcodeDesc {
                name: "v_max_f32",
                slots: VALU_F32_BIN,
                commutable: true,
                has_modifiers: true,
                reads_exec: true,
                ..BASE
            },
            Opcode::VMaxF16 => OpcodeDesc {
                name: "v_max_f16",
                slots: VALU_F16_BIN,
                commutable: true,
                has_modifiers: true,
                reads_exec: true,
                ..BASE
            },
            Opcode::VMacF32 => OpcodeDesc {
                name: "v_mac_f32",
                slots: MAC_F32,
                commutable: true,
                has_modifiers: true,
                tied_src: Some(3),
                mad_twin: Some(Opcode::VMadF32),
                reads_exec: true,
                ..BASE
            },
            Opcode::VMacF16 => OpcodeDesc {
                name: "v_mac_f16",
                slots: MAC_F16,
                commutable: true,
                has_modifiers: true,
                tied_src: Some(3),
                mad_twin: Some(Opcode::VMadF16),
                reads_exec: true,
                ..BASE
            },
            Opcode::VFmacF32 => OpcodeDesc {
                name: "v_fmac_f32",
                slots: MAC_F32,
                commutable: true,
                has_modifiers: true,
                tied_src: Some(3),
                mad_twin: Some(Opcode::VFmaF32),
                reads_exec: true,
                ..BASE
            },
            Opcode::VFmacF16 => OpcodeDesc {
                name: "v_fmac_f16",
                slots: MAC_F16,
                commutable: true,
                has_modifiers: true,
                tied_src: Some(3),
                mad_twin: Some(Opcode::VFmaF16),
                reads_exec: true,
                ..BASE
            },
            Opcode::VMadF32 => OpcodeDesc {
                name: "v_mad_f32",
                slots: MAD_F32,
                commutable: true,
                has_modifiers: true,
                reads_exec: true,
                ..BASE
            },
            Opcode::VMadF16 => OpcodeDesc {
                name: "v_mad_f16",
                slots: MAD_F16,
                commutable: true,
                has_modifiers: true,
                reads_exec: true,
                ..BASE
            },
            Opcode::VFmaF32 => OpcodeDesc {
                name: "v_fma_f32",
                slots: MAD_F32,
                commutable: true,
                has_modifiers: true,
                reads_exec: true,
                ..BASE
            },
            Opcode::VFmaF16 => OpcodeDesc {
                name: "v_fma_f16",
                slots: MAD_F16,
                commutable: true,
                has_modifiers: true,
                reads_exec: true,
                ..BASE
            },
            Opcode::VAddU32X => OpcodeDesc {
                name: "v_add_u32_x",
                slots: CARRY_X,
                num_defs: 2,
                commutable: true,
                narrow_twin: Some(Opcode::VAddU32),
                reads_exec: true,
                ..BASE
            },
            Opcode::VSubU32X => OpcodeDesc {
                name: "v_sub_u32_x",
                slots: CARRY_X,
                num_defs: 2,
                commutable: true,
                commuted_opcode: Some(Opcode::VSubRevU32X),
                narrow_twin: Some(Opcode::VSubU32),
                reads_exec: true,
                ..BASE
            },
            Opcode::VSubRevU32X => OpcodeDesc {
                name: "v_subrev_u32_x",
                slots: CARRY_X,
                num_defs: 2,
                commutable: true,
                commuted_opcode: Some(Opcode::VSubU32X),
                narrow_twin: Some(Opcode::VSubRevU32),
                reads_exec: true,
                ..BASE
            },
            Opcode::VAddU32 => OpcodeDesc {
                name: "v_add_u32",
                slots: VALU_BIN,
                commutable: true,
                writes_carry: true,
                reads_exec: true,
                ..BASE
            },
            Opcode::VSubU32 => OpcodeDesc {
                name: "v_sub_u32",
                slots: VALU_BIN,
                commutable: true,
                commuted_opcode: Some(Opcode::VSubRevU32),
                writes_carry: true,
                reads_exec: true,
                ..BASE
            },
            Opcode::VSubRevU32 => OpcodeDesc {
                name: "v_subrev_u32",
                slots: VALU_BIN,
                commutable: true,
                commuted_opcode: Some(Opcode::VSubU32),
                writes_carry: true,
                reads_exec: true,
                ..BASE
            },
            Opcode::VCndMaskB32 => OpcodeDesc {
                name: "v_cndmask_b32",
                slots: CNDMASK_SLOTS,
                has_modifiers: true,
                reads_exec: true,
                ..BASE
            },
            Opcode::VReadFirstLaneB32 => OpcodeDesc {
                name: "v_readfirstlane_b32",
                slots: READLANE_SLOTS,
                reads_exec: true,
                ..BASE
            },
            Opcode::VMmaF32 => OpcodeDesc {
                name: "v_mma_f32",
                slots: MMA_SLOTS,
                reads_exec: true,
                ..BASE
            },
            Opcode::ScratchLoadB32 => OpcodeDesc {
                name: "scratch_load_b32",
                slots: SCRATCH_LOAD_SLOTS,
                reads_exec: true,
                scratch_access: true,
                ..BASE
            },
            Opcode::ScratchStoreB32 => OpcodeDesc {
                name: "scratch_store_b32",
                slots: SCRATCH_STORE_SLOTS,
                num_defs: 0,
                reads_exec: true,
                scratch_access: true,
                ..BASE
            },
            Opcode::SBranch => {
                OpcodeDesc { name: "s_branch", slots: &[], num_defs: 0, is_terminator: true, ..BASE }
            }
            Opcode::SCBranch => OpcodeDesc {
                name: "s_cbranch",
                slots: CBRANCH_SLOTS,
                num_defs: 0,
                is_terminator: true,
                ..BASE
            },
            Opcode::SEndpgm => {
                OpcodeDesc { name: "s_endpgm", slots: &[], num_defs: 0, is_terminator: true, ..BASE }
            }
        }
    }
}

impl OpcodeDesc {
    /// Slot index of source `n` (counting defs first), if it exists.
    #[inline]
    pub fn src_slot(&self, n: usize) -> Option<usize> {
        let idx = self.num_defs as usize + n;
        (idx < self.slots.len()).then_some(idx)
    }

    /// Address slot of a scratch access.
    pub const SCRATCH_ADDR_SLOT: usize = 1;
    /// Base-register slot of a scratch access.
    pub const SCRATCH_BASE_SLOT: usize = 2;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_lookup_round_trips() {
        for &op in Opcode::ALL {
            assert_eq!(Opcode::from_name(op.name()), Some(op));
        }
    }

    #[test]
    fn carry_forms_narrow_to_matching_twins() {
        assert_eq!(Opcode::VAddU32X.desc().narrow_twin, Some(Opcode::VAddU32));
        assert_eq!(Opcode::VSubU32X.desc().commuted_opcode, Some(Opcode::VSubRevU32X));
        assert_eq!(Opcode::VSubRevU32.desc().commuted_opcode, Some(Opcode::VSubU32));
    }

    #[test]
    fn mac_twins_are_untied() {
        let mac = Opcode::VMacF32.desc();
        assert_eq!(mac.tied_src, Some(3));
        let mad = mac.mad_twin.unwrap().desc();
        assert_eq!(mad.tied_src, None);
        assert_eq!(mad.slots[3].class, SlotClass::VSrcX);
    }
}
