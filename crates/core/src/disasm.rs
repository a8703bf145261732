//! Thumb disassembler producing capstone-style mnemonics and operand strings.
//!
//! Decoding is shared with the built-in engine, so anything the engine can
//! execute renders here. Unrecognised encodings render as `.inst`.

use crate::decoder::{
    decode_thumb_16, decode_thumb_32, is_thumb_32, AluOp, BarrierOp, ExtendOp, Instruction, MemOp,
    ReverseOp, ShiftOp,
};
use crate::{Disassembler, Insn};

const REG_NAMES: [&str; 16] = [
    "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12", "sp", "lr",
    "pc",
];

const COND_SUFFIX: [&str; 15] = [
    "eq", "ne", "hs", "lo", "mi", "pl", "vs", "vc", "hi", "ls", "ge", "lt", "gt", "le", "",
];

fn reg(n: u8) -> &'static str {
    REG_NAMES.get(n as usize).copied().unwrap_or("r?")
}

fn imm(value: u32) -> String {
    if value < 10 {
        format!("#{}", value)
    } else {
        format!("#{:#x}", value)
    }
}

fn reg_list(registers: u8, extra: Option<&str>) -> String {
    let mut names: Vec<&str> = (0..8u8)
        .filter(|n| registers & (1 << n) != 0)
        .map(reg)
        .collect();
    names.extend(extra);
    format!("{{{}}}", names.join(", "))
}

fn mem_mnemonic(op: MemOp) -> &'static str {
    match op {
        MemOp::Str => "str",
        MemOp::Strh => "strh",
        MemOp::Strb => "strb",
        MemOp::Ldrsb => "ldrsb",
        MemOp::Ldr => "ldr",
        MemOp::Ldrh => "ldrh",
        MemOp::Ldrb => "ldrb",
        MemOp::Ldrsh => "ldrsh",
    }
}

fn alu(op: AluOp, rdn: u8, rm: u8) -> (&'static str, String) {
    let (d, m) = (reg(rdn), reg(rm));
    match op {
        AluOp::And => ("ands", format!("{}, {}", d, m)),
        AluOp::Eor => ("eors", format!("{}, {}", d, m)),
        AluOp::Lsl => ("lsls", format!("{}, {}", d, m)),
        AluOp::Lsr => ("lsrs", format!("{}, {}", d, m)),
        AluOp::Asr => ("asrs", format!("{}, {}", d, m)),
        AluOp::Adc => ("adcs", format!("{}, {}", d, m)),
        AluOp::Sbc => ("sbcs", format!("{}, {}", d, m)),
        AluOp::Ror => ("rors", format!("{}, {}", d, m)),
        AluOp::Tst => ("tst", format!("{}, {}", d, m)),
        AluOp::Rsb => ("rsbs", format!("{}, {}, #0", d, m)),
        AluOp::Cmp => ("cmp", format!("{}, {}", d, m)),
        AluOp::Cmn => ("cmn", format!("{}, {}", d, m)),
        AluOp::Orr => ("orrs", format!("{}, {}", d, m)),
        AluOp::Mul => ("muls", format!("{}, {}, {}", d, m, d)),
        AluOp::Bic => ("bics", format!("{}, {}", d, m)),
        AluOp::Mvn => ("mvns", format!("{}, {}", d, m)),
    }
}

/// Renders one decoded instruction located at `address`.
pub fn render(instruction: Instruction, address: u32, raw: u32) -> (String, String) {
    let target = |offset: i32| format!("#{:#x}", address.wrapping_add(4).wrapping_add(offset as u32));

    let (mnemonic, op_str): (&str, String) = match instruction {
        Instruction::Nop => ("nop", String::new()),
        Instruction::ShiftImm { op, rd, rm, imm: 0 } if op == ShiftOp::Lsl => {
            ("movs", format!("{}, {}", reg(rd), reg(rm)))
        }
        Instruction::ShiftImm { op, rd, rm, imm: amount } => {
            let mnemonic = match op {
                ShiftOp::Lsl => "lsls",
                ShiftOp::Lsr => "lsrs",
                ShiftOp::Asr => "asrs",
                ShiftOp::Ror => "rors",
            };
            let amount = if amount == 0 { 32 } else { amount as u32 };
            (mnemonic, format!("{}, {}, {}", reg(rd), reg(rm), imm(amount)))
        }
        Instruction::AddReg { rd, rn, rm } => {
            ("adds", format!("{}, {}, {}", reg(rd), reg(rn), reg(rm)))
        }
        Instruction::SubReg { rd, rn, rm } => {
            ("subs", format!("{}, {}, {}", reg(rd), reg(rn), reg(rm)))
        }
        Instruction::AddImm3 { rd, rn, imm: v } => {
            ("adds", format!("{}, {}, {}", reg(rd), reg(rn), imm(v as u32)))
        }
        Instruction::SubImm3 { rd, rn, imm: v } => {
            ("subs", format!("{}, {}, {}", reg(rd), reg(rn), imm(v as u32)))
        }
        Instruction::MovImm { rd, imm: v } => ("movs", format!("{}, {}", reg(rd), imm(v as u32))),
        Instruction::CmpImm { rn, imm: v } => ("cmp", format!("{}, {}", reg(rn), imm(v as u32))),
        Instruction::AddImm8 { rdn, imm: v } => {
            ("adds", format!("{}, {}", reg(rdn), imm(v as u32)))
        }
        Instruction::SubImm8 { rdn, imm: v } => {
            ("subs", format!("{}, {}", reg(rdn), imm(v as u32)))
        }
        Instruction::Alu { op, rdn, rm } => {
            let (mnemonic, ops) = alu(op, rdn, rm);
            (mnemonic, ops)
        }
        Instruction::AddHigh { rdn, rm } => ("add", format!("{}, {}", reg(rdn), reg(rm))),
        Instruction::CmpHigh { rn, rm } => ("cmp", format!("{}, {}", reg(rn), reg(rm))),
        Instruction::MovHigh { rd, rm } => ("mov", format!("{}, {}", reg(rd), reg(rm))),
        Instruction::Bx { rm } => ("bx", reg(rm).to_string()),
        Instruction::Blx { rm } => ("blx", reg(rm).to_string()),
        Instruction::LdrLiteral { rt, imm: v } => ("ldr", format!("{}, [pc, {}]", reg(rt), imm(v))),
        Instruction::MemReg { op, rt, rn, rm } => (
            mem_mnemonic(op),
            format!("{}, [{}, {}]", reg(rt), reg(rn), reg(rm)),
        ),
        Instruction::MemImm { op, rt, rn, imm: 0 } => {
            (mem_mnemonic(op), format!("{}, [{}]", reg(rt), reg(rn)))
        }
        Instruction::MemImm { op, rt, rn, imm: v } => (
            mem_mnemonic(op),
            format!("{}, [{}, {}]", reg(rt), reg(rn), imm(v)),
        ),
        Instruction::StrSp { rt, imm: v } => ("str", format!("{}, [sp, {}]", reg(rt), imm(v))),
        Instruction::LdrSp { rt, imm: v } => ("ldr", format!("{}, [sp, {}]", reg(rt), imm(v))),
        Instruction::Adr { rd, imm: v } => ("adr", format!("{}, {}", reg(rd), imm(v))),
        Instruction::AddSpImm { rd, imm: v } => ("add", format!("{}, sp, {}", reg(rd), imm(v))),
        Instruction::AddSp { imm: v } => ("add", format!("sp, {}", imm(v))),
        Instruction::SubSp { imm: v } => ("sub", format!("sp, {}", imm(v))),
        Instruction::Extend { op, rd, rm } => {
            let mnemonic = match op {
                ExtendOp::Sxth => "sxth",
                ExtendOp::Sxtb => "sxtb",
                ExtendOp::Uxth => "uxth",
                ExtendOp::Uxtb => "uxtb",
            };
            (mnemonic, format!("{}, {}", reg(rd), reg(rm)))
        }
        Instruction::Reverse { op, rd, rm } => {
            let mnemonic = match op {
                ReverseOp::Rev => "rev",
                ReverseOp::Rev16 => "rev16",
                ReverseOp::Revsh => "revsh",
            };
            (mnemonic, format!("{}, {}", reg(rd), reg(rm)))
        }
        Instruction::Push { registers, lr } => {
            ("push", reg_list(registers, lr.then_some("lr")))
        }
        Instruction::Pop { registers, pc } => ("pop", reg_list(registers, pc.then_some("pc"))),
        Instruction::Stm { rn, registers } => {
            ("stm", format!("{}!, {}", reg(rn), reg_list(registers, None)))
        }
        Instruction::Ldm { rn, registers } => {
            let writeback = if registers & (1 << rn) == 0 { "!" } else { "" };
            (
                "ldm",
                format!("{}{}, {}", reg(rn), writeback, reg_list(registers, None)),
            )
        }
        Instruction::Cps { disable: true } => ("cpsid", "i".to_string()),
        Instruction::Cps { disable: false } => ("cpsie", "i".to_string()),
        Instruction::Bkpt { imm: v } => ("bkpt", imm(v as u32)),
        Instruction::CondBranch { cond, offset } => {
            let suffix = COND_SUFFIX.get(cond as usize).copied().unwrap_or("");
            return (format!("b{}", suffix), target(offset));
        }
        Instruction::Udf { imm: v } => ("udf", imm(v as u32)),
        Instruction::Svc { imm: v } => ("svc", imm(v as u32)),
        Instruction::Branch { offset } => ("b", target(offset)),
        Instruction::Bl { offset } => ("bl", target(offset)),
        Instruction::Barrier(op) => {
            let mnemonic = match op {
                BarrierOp::Dsb => "dsb",
                BarrierOp::Dmb => "dmb",
                BarrierOp::Isb => "isb",
            };
            (mnemonic, "sy".to_string())
        }
        Instruction::Unknown(_) => (".inst", format!("{:#x}", raw)),
    };

    (mnemonic.to_string(), op_str)
}

/// Disassembler backed by the engine's Thumb decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThumbDisassembler;

impl ThumbDisassembler {
    pub fn new() -> Self {
        Self
    }
}

impl Disassembler for ThumbDisassembler {
    fn disasm(&self, code: &[u8], address: u32, count: usize) -> Vec<Insn> {
        let mut out = Vec::new();
        let mut offset = 0usize;

        while out.len() < count && offset + 2 <= code.len() {
            let hw1 = u16::from_le_bytes([code[offset], code[offset + 1]]);
            let (instruction, raw, size) = if is_thumb_32(hw1) {
                if offset + 4 > code.len() {
                    break;
                }
                let hw2 = u16::from_le_bytes([code[offset + 2], code[offset + 3]]);
                (
                    decode_thumb_32(hw1, hw2),
                    ((hw1 as u32) << 16) | hw2 as u32,
                    4,
                )
            } else {
                (decode_thumb_16(hw1), hw1 as u32, 2)
            };

            let insn_address = address.wrapping_add(offset as u32);
            let (mnemonic, op_str) = render(instruction, insn_address, raw);
            out.push(Insn {
                address: insn_address,
                bytes: code[offset..offset + size].to_vec(),
                mnemonic,
                op_str,
            });
            offset += size;
        }

        out
    }
}
