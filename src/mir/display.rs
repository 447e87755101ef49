// src/mir/display.rs
//
// Deterministic textual rendering of a machine function; the parser in
// parse.rs reads this format back.

use std::fmt::{self, Write};

use super::function::{BlockId, MirFunction};
use super::instr::{Instr, OutMod};
use super::operand::Operand;

fn write_operand(out: &mut String, f: &MirFunction, op: &Operand, is_def: bool) {
    match op {
        Operand::Reg(r) => {
            let _ = write!(out, "%{}", r.reg.index());
            if is_def {
                let _ = write!(out, ":{}", f.reg_class(r.reg).name());
            }
            if let Some(half) = r.sub {
                let _ = write!(out, ".{}", half.name());
            }
            if r.kill {
                out.push_str(" kill");
            }
            if r.undef {
                out.push_str(" undef");
            }
        }
        Operand::Phys(p) => out.push_str(p.name()),
        Operand::Imm(v) => {
            let _ = write!(out, "{v}");
        }
        Operand::FrameIndex(fi) => {
            let _ = write!(out, "fi#{fi}");
        }
        Operand::Global(g) => {
            let _ = write!(out, "@{}", g.symbol);
            if g.offset > 0 {
                let _ = write!(out, "+{}", g.offset);
            } else if g.offset < 0 {
                let _ = write!(out, "{}", g.offset);
            }
        }
    }
}

fn write_instr(out: &mut String, f: &MirFunction, ins: &Instr, block: BlockId) {
    let desc = ins.desc();
    let ndefs = desc.num_defs as usize;
    out.push_str("  ");
    if ndefs > 0 {
        for (i, op) in ins.operands.iter().take(ndefs).enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            write_operand(out, f, op, true);
        }
        out.push_str(" = ");
    }
    out.push_str(desc.name);
    let mut first = true;
    for op in ins.operands.iter().skip(ndefs) {
        if first {
            out.push(' ');
            first = false;
        } else {
            out.push_str(", ");
        }
        write_operand(out, f, op, false);
    }
    if desc.is_terminator {
        for succ in &f.block(block).succs {
            if first {
                out.push(' ');
                first = false;
            } else {
                out.push_str(", ");
            }
            out.push_str(&f.block(*succ).name);
        }
    }
    if ins.mods.clamp {
        out.push_str(" clamp");
    }
    if ins.mods.omod != OutMod::None {
        let _ = write!(out, " omod:{}", ins.mods.omod.name());
    }
    if ins.nsz {
        out.push_str(" nsz");
    }
    out.push('\n');
}

impl fmt::Display for MirFunction {
    fn fmt(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = String::new();
        let _ = write!(buf, "func @{}", self.name);
        if self.float_mode.ieee {
            buf.push_str(" ieee");
        }
        if self.float_mode.no_signed_zeros {
            buf.push_str(" nsz");
        }
        if self.float_mode.fp32_denormals {
            buf.push_str(" fp32-denorms");
        }
        if self.float_mode.fp16_denormals {
            buf.push_str(" fp16-denorms");
        }
        buf.push_str(" {\n");
        for (bb, block) in self.blocks() {
            let _ = write!(buf, "block {}:\n", block.name);
            for &id in block.instrs() {
                write_instr(&mut buf, self, self.instr(id), bb);
            }
        }
        buf.push_str("}\n");
        out.write_str(&buf)
    }
}
