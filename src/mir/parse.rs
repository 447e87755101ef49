// src/mir/parse.rs
//
// Line-oriented parser for the textual machine-IR format emitted by
// display.rs. Errors carry spans for miette rendering.

use miette::{Diagnostic, SourceSpan};
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::target::Opcode;

use super::function::{BlockId, MirFunction};
use super::instr::{Instr, OutMod};
use super::operand::{GlobalRef, Operand, PhysReg, RegClass, RegHalf, RegOperand, VirtualReg};

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum MirParseError {
    #[error("expected a function header")]
    #[diagnostic(code(E0101), help("functions start with 'func @name {{'"))]
    ExpectedFunc {
        #[label("expected 'func @name {{' here")]
        span: SourceSpan,
    },

    #[error("unexpected end of file inside a function")]
    #[diagnostic(code(E0102))]
    UnexpectedEof {
        #[label("function opened here is never closed")]
        span: SourceSpan,
    },

    #[error("expected a block label")]
    #[diagnostic(code(E0103), help("blocks start with 'block NAME:'"))]
    ExpectedBlock {
        #[label("instructions must live inside a block")]
        span: SourceSpan,
    },

    #[error("unknown opcode '{name}'")]
    #[diagnostic(code(E0104))]
    UnknownOpcode {
        name: String,
        #[label("not a wave-ISA opcode")]
        span: SourceSpan,
    },

    #[error("invalid operand '{token}'")]
    #[diagnostic(code(E0105))]
    InvalidOperand {
        token: String,
        #[label("cannot parse this operand")]
        span: SourceSpan,
    },

    #[error("register %{reg} has no class annotation")]
    #[diagnostic(code(E0106), help("annotate one mention, e.g. %{reg}:v32"))]
    UnknownRegister {
        reg: u32,
        #[label("class never declared")]
        span: SourceSpan,
    },

    #[error("conflicting class annotations for %{reg}")]
    #[diagnostic(code(E0107))]
    ClassConflict {
        reg: u32,
        #[label("does not match an earlier annotation")]
        span: SourceSpan,
    },

    #[error("invalid register class '{name}'")]
    #[diagnostic(code(E0108), help("classes are s32, s64, v32, v64, a32, a64"))]
    BadClass {
        name: String,
        #[label("unknown class")]
        span: SourceSpan,
    },

    #[error("unknown block '{name}'")]
    #[diagnostic(code(E0109))]
    UnknownBlock {
        name: String,
        #[label("no block with this label")]
        span: SourceSpan,
    },

    #[error("unexpected token '{token}'")]
    #[diagnostic(code(E0110))]
    UnexpectedToken {
        token: String,
        #[label("unexpected")]
        span: SourceSpan,
    },
}

fn span_at(offset: usize, len: usize) -> SourceSpan {
    SourceSpan::new(offset.into(), len.max(1))
}

fn strip_comment(line: &str) -> &str {
    match line.find("//") {
        Some(pos) => &line[..pos],
        None => line,
    }
}

/// Split a line into comma-separated segments with byte offsets.
fn segments(line: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start = 0;
    for (i, ch) in line.char_indices() {
        if ch == ',' {
            out.push((start, &line[start..i]));
            start = i + 1;
        }
    }
    out.push((start, &line[start..]));
    out
}

/// Whitespace-separated words of a segment with byte offsets.
fn words(seg: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, ch) in seg.char_indices() {
        if ch.is_whitespace() {
            if let Some(s) = start.take() {
                out.push((s, &seg[s..i]));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        out.push((s, &seg[s..]));
    }
    out
}

fn parse_class(name: &str) -> Option<RegClass> {
    match name {
        "s32" => Some(RegClass::S32),
        "s64" => Some(RegClass::S64),
        "v32" => Some(RegClass::V32),
        "v64" => Some(RegClass::V64),
        "a32" => Some(RegClass::A32),
        "a64" => Some(RegClass::A64),
        _ => None,
    }
}

fn parse_phys(name: &str) -> Option<PhysReg> {
    match name {
        "$exec" => Some(PhysReg::Exec),
        "$carry" => Some(PhysReg::Carry),
        "$sp" => Some(PhysReg::StackPtr),
        "$scratch" => Some(PhysReg::Scratch),
        "$idx" => Some(PhysReg::Index),
        _ => None,
    }
}

fn parse_int(token: &str) -> Option<i64> {
    let (neg, rest) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    let value = if let Some(hex) = rest.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).ok()? as i64
    } else {
        rest.parse::<u64>().ok()? as i64
    };
    Some(if neg { value.wrapping_neg() } else { value })
}

struct FuncParser<'a> {
    func: MirFunction,
    regs: FxHashMap<u32, VirtualReg>,
    block_names: FxHashMap<&'a str, BlockId>,
}

impl<'a> FuncParser<'a> {
    /// First pass over the body: create blocks and every register that
    /// carries a class annotation anywhere.
    fn prescan(&mut self, body: &[(usize, &'a str)]) -> Result<(), MirParseError> {
        for &(off, line) in body {
            let text = strip_comment(line);
            let trimmed = text.trim();
            if let Some(rest) = trimmed.strip_prefix("block ") {
                let name = rest.trim_end_matches(':').trim();
                let id = self.func.add_block(name);
                self.block_names.insert(name, id);
                continue;
            }
            for (col, word) in words(text) {
                let word = word.trim_end_matches(',');
                let Some(rest) = word.strip_prefix('%') else { continue };
                let Some(colon) = rest.find(':') else { continue };
                let Ok(num) = rest[..colon].parse::<u32>() else { continue };
                let class_text = match rest[colon + 1..].find('.') {
                    Some(dot) => &rest[colon + 1..colon + 1 + dot],
                    None => &rest[colon + 1..],
                };
                let Some(class) = parse_class(class_text) else {
                    return Err(MirParseError::BadClass {
                        name: class_text.to_string(),
                        span: span_at(off + col, word.len()),
                    });
                };
                match self.regs.get(&num) {
                    Some(&vr) => {
                        if self.func.reg_class(vr) != class {
                            return Err(MirParseError::ClassConflict {
                                reg: num,
                                span: span_at(off + col, word.len()),
                            });
                        }
                    }
                    None => {
                        let vr = self.func.new_vreg(class);
                        self.regs.insert(num, vr);
                    }
                }
            }
        }
        Ok(())
    }

    fn parse_operand(&self, off: usize, token: &str) -> Result<Operand, MirParseError> {
        if let Some(rest) = token.strip_prefix('%') {
            let (num_text, tail) = match rest.find([':', '.']) {
                Some(pos) => (&rest[..pos], &rest[pos..]),
                None => (rest, ""),
            };
            let num: u32 = num_text.parse().map_err(|_| MirParseError::InvalidOperand {
                token: token.to_string(),
                span: span_at(off, token.len()),
            })?;
            let Some(&reg) = self.regs.get(&num) else {
                return Err(MirParseError::UnknownRegister {
                    reg: num,
                    span: span_at(off, token.len()),
                });
            };
            let sub = if tail.ends_with(".lo") {
                Some(RegHalf::Lo)
            } else if tail.ends_with(".hi") {
                Some(RegHalf::Hi)
            } else {
                None
            };
            return Ok(Operand::Reg(RegOperand { reg, sub, kill: false, undef: false }));
        }
        if token.starts_with('$') {
            return parse_phys(token).map(Operand::Phys).ok_or_else(|| {
                MirParseError::InvalidOperand {
                    token: token.to_string(),
                    span: span_at(off, token.len()),
                }
            });
        }
        if let Some(rest) = token.strip_prefix("fi#") {
            return rest.parse::<u32>().map(Operand::FrameIndex).map_err(|_| {
                MirParseError::InvalidOperand {
                    token: token.to_string(),
                    span: span_at(off, token.len()),
                }
            });
        }
        if let Some(rest) = token.strip_prefix('@') {
            let (symbol, offset) = match rest.rfind(['+', '-']) {
                Some(pos) if pos > 0 => {
                    let value = parse_int(rest[pos..].trim_start_matches('+')).ok_or_else(|| {
                        MirParseError::InvalidOperand {
                            token: token.to_string(),
                            span: span_at(off, token.len()),
                        }
                    })?;
                    (&rest[..pos], value)
                }
                _ => (rest, 0),
            };
            return Ok(Operand::Global(GlobalRef {
                symbol: symbol.to_string(),
                offset,
                flags: 0,
            }));
        }
        parse_int(token).map(Operand::Imm).ok_or_else(|| MirParseError::InvalidOperand {
            token: token.to_string(),
            span: span_at(off, token.len()),
        })
    }

    fn parse_body(&mut self, body: &[(usize, &'a str)]) -> Result<(), MirParseError> {
        let mut current: Option<BlockId> = None;
        for &(line_off, line) in body {
            let text = strip_comment(line);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(rest) = trimmed.strip_prefix("block ") {
                let name = rest.trim_end_matches(':').trim();
                current = Some(self.block_names[name]);
                continue;
            }
            let Some(block) = current else {
                return Err(MirParseError::ExpectedBlock {
                    span: span_at(line_off, trimmed.len()),
                });
            };
            self.parse_instr(block, line_off, text)?;
        }
        Ok(())
    }

    fn parse_instr(
        &mut self,
        block: BlockId,
        line_off: usize,
        text: &str,
    ) -> Result<(), MirParseError> {
        let (defs_text, rest_text, rest_shift) = match text.find('=') {
            Some(pos) => (&text[..pos], &text[pos + 1..], pos + 1),
            None => ("", text, 0),
        };

        let mut operands: Vec<Operand> = Vec::new();
        for (seg_off, seg) in segments(defs_text) {
            let toks = words(seg);
            if toks.is_empty() {
                continue;
            }
            let (col, tok) = toks[0];
            operands.push(self.parse_operand(line_off + seg_off + col, tok)?);
            for &(c, extra) in &toks[1..] {
                self.apply_reg_flag(&mut operands, extra).ok_or_else(|| {
                    MirParseError::UnexpectedToken {
                        token: extra.to_string(),
                        span: span_at(line_off + seg_off + c, extra.len()),
                    }
                })?;
            }
        }

        let rest_words = words(rest_text);
        let Some(&(op_col, op_name)) = rest_words.first() else {
            return Err(MirParseError::UnexpectedToken {
                token: text.trim().to_string(),
                span: span_at(line_off, text.trim().len()),
            });
        };
        let Some(opcode) = Opcode::from_name(op_name) else {
            return Err(MirParseError::UnknownOpcode {
                name: op_name.to_string(),
                span: span_at(line_off + rest_shift + op_col, op_name.len()),
            });
        };
        let desc = opcode.desc();

        let args_text = &rest_text[op_col + op_name.len()..];
        let args_shift = rest_shift + op_col + op_name.len();

        let mut mods_clamp = false;
        let mut mods_omod = OutMod::None;
        let mut nsz = false;
        let mut succs: Vec<BlockId> = Vec::new();

        for (seg_off, seg) in segments(args_text) {
            for (col, tok) in words(seg) {
                let off = line_off + args_shift + seg_off + col;
                match tok {
                    "clamp" => mods_clamp = true,
                    "nsz" => nsz = true,
                    _ if tok.starts_with("omod:") => {
                        mods_omod = match &tok[5..] {
                            "div2" => OutMod::Div2,
                            "mul2" => OutMod::Mul2,
                            "mul4" => OutMod::Mul4,
                            other => {
                                return Err(MirParseError::UnexpectedToken {
                                    token: other.to_string(),
                                    span: span_at(off, tok.len()),
                                });
                            }
                        }
                    }
                    "kill" | "undef" => {
                        self.apply_reg_flag(&mut operands, tok).ok_or_else(|| {
                            MirParseError::UnexpectedToken {
                                token: tok.to_string(),
                                span: span_at(off, tok.len()),
                            }
                        })?;
                    }
                    _ if desc.is_terminator && self.block_names.contains_key(tok) => {
                        succs.push(self.block_names[tok]);
                    }
                    _ if desc.is_terminator
                        && !tok.starts_with(['%', '$', '@'])
                        && parse_int(tok).is_none() =>
                    {
                        return Err(MirParseError::UnknownBlock {
                            name: tok.to_string(),
                            span: span_at(off, tok.len()),
                        });
                    }
                    _ => operands.push(self.parse_operand(off, tok)?),
                }
            }
        }

        let mut instr = Instr::new(opcode, operands);
        instr.mods.clamp = mods_clamp;
        instr.mods.omod = mods_omod;
        instr.nsz = nsz;
        self.func.push(block, instr);
        for succ in succs {
            self.func.add_succ(block, succ);
        }
        Ok(())
    }

    /// Attach a kill/undef word to the most recent register operand.
    fn apply_reg_flag(&self, operands: &mut [Operand], flag: &str) -> Option<()> {
        let Operand::Reg(r) = operands.last_mut()? else { return None };
        match flag {
            "kill" => r.kill = true,
            "undef" => r.undef = true,
            _ => return None,
        }
        Some(())
    }
}

/// Parse a whole module: zero or more functions.
pub fn parse_module(src: &str) -> Result<Vec<MirFunction>, MirParseError> {
    let mut lines: Vec<(usize, &str)> = Vec::new();
    let mut offset = 0;
    for line in src.split('\n') {
        lines.push((offset, line));
        offset += line.len() + 1;
    }

    let mut funcs = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let (off, raw) = lines[i];
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            i += 1;
            continue;
        }
        let Some(rest) = line.strip_prefix("func ") else {
            return Err(MirParseError::ExpectedFunc { span: span_at(off, raw.trim().len()) });
        };
        let header = words(rest);
        let mut name = "";
        let mut func = MirFunction::new("");
        let mut saw_brace = false;
        for (col, word) in &header {
            match *word {
                "{" => saw_brace = true,
                "ieee" => func.float_mode.ieee = true,
                "nsz" => func.float_mode.no_signed_zeros = true,
                "fp32-denorms" => func.float_mode.fp32_denormals = true,
                "fp16-denorms" => func.float_mode.fp16_denormals = true,
                w if w.starts_with('@') && name.is_empty() => name = &w[1..],
                w => {
                    return Err(MirParseError::UnexpectedToken {
                        token: w.to_string(),
                        span: span_at(off + 5 + col, w.len()),
                    });
                }
            }
        }
        if name.is_empty() || !saw_brace {
            return Err(MirParseError::ExpectedFunc { span: span_at(off, raw.trim().len()) });
        }
        func.name = name.to_string();

        // Find the closing brace.
        let mut end = None;
        for (j, &(_, body_raw)) in lines.iter().enumerate().skip(i + 1) {
            if strip_comment(body_raw).trim() == "}" {
                end = Some(j);
                break;
            }
        }
        let Some(end) = end else {
            return Err(MirParseError::UnexpectedEof { span: span_at(off, raw.trim().len()) });
        };

        let body = &lines[i + 1..end];
        let mut parser = FuncParser {
            func,
            regs: FxHashMap::default(),
            block_names: FxHashMap::default(),
        };
        parser.prescan(body)?;
        parser.parse_body(body)?;
        funcs.push(parser.func);
        i = end + 1;
    }
    Ok(funcs)
}
