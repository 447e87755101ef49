// src/mir/mod.rs
//
// Machine IR for the wave ISA: functions, blocks, instructions, operands,
// and the use-def bookkeeping the fold pass relies on.

pub mod display;
pub mod function;
pub mod instr;
pub mod operand;
pub mod parse;

pub use function::{Block, BlockId, FloatMode, InstrId, MirFunction, UseRef};
pub use instr::{Instr, InstrMods, OutMod, SrcMods};
pub use operand::{GlobalRef, Operand, PhysReg, RegBank, RegClass, RegHalf, RegOperand, VirtualReg};
pub use parse::{MirParseError, parse_module};
