#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftOp {
    Lsl,
    Lsr,
    Asr,
    Ror,
}

/// Data-processing opcodes of the `010000 oooo` format, in encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    And,
    Eor,
    Lsl,
    Lsr,
    Asr,
    Adc,
    Sbc,
    Ror,
    Tst,
    Rsb,
    Cmp,
    Cmn,
    Orr,
    Mul,
    Bic,
    Mvn,
}

const ALU_OPS: [AluOp; 16] = [
    AluOp::And,
    AluOp::Eor,
    AluOp::Lsl,
    AluOp::Lsr,
    AluOp::Asr,
    AluOp::Adc,
    AluOp::Sbc,
    AluOp::Ror,
    AluOp::Tst,
    AluOp::Rsb,
    AluOp::Cmp,
    AluOp::Cmn,
    AluOp::Orr,
    AluOp::Mul,
    AluOp::Bic,
    AluOp::Mvn,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemOp {
    Str,
    Strh,
    Strb,
    Ldrsb,
    Ldr,
    Ldrh,
    Ldrb,
    Ldrsh,
}

impl MemOp {
    pub fn size(self) -> usize {
        match self {
            MemOp::Str | MemOp::Ldr => 4,
            MemOp::Strh | MemOp::Ldrh | MemOp::Ldrsh => 2,
            MemOp::Strb | MemOp::Ldrb | MemOp::Ldrsb => 1,
        }
    }

    pub fn is_store(self) -> bool {
        matches!(self, MemOp::Str | MemOp::Strh | MemOp::Strb)
    }
}

const MEM_OPS: [MemOp; 8] = [
    MemOp::Str,
    MemOp::Strh,
    MemOp::Strb,
    MemOp::Ldrsb,
    MemOp::Ldr,
    MemOp::Ldrh,
    MemOp::Ldrb,
    MemOp::Ldrsh,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendOp {
    Sxth,
    Sxtb,
    Uxth,
    Uxtb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReverseOp {
    Rev,
    Rev16,
    Revsh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierOp {
    Dsb,
    Dmb,
    Isb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    ShiftImm { op: ShiftOp, rd: u8, rm: u8, imm: u8 },
    AddReg { rd: u8, rn: u8, rm: u8 },
    SubReg { rd: u8, rn: u8, rm: u8 },
    AddImm3 { rd: u8, rn: u8, imm: u8 },
    SubImm3 { rd: u8, rn: u8, imm: u8 },
    MovImm { rd: u8, imm: u8 }, // MOV Rd, #imm8
    CmpImm { rn: u8, imm: u8 },
    AddImm8 { rdn: u8, imm: u8 },
    SubImm8 { rdn: u8, imm: u8 },
    Alu { op: AluOp, rdn: u8, rm: u8 },
    AddHigh { rdn: u8, rm: u8 },
    CmpHigh { rn: u8, rm: u8 },
    MovHigh { rd: u8, rm: u8 },
    Bx { rm: u8 },
    Blx { rm: u8 },
    LdrLiteral { rt: u8, imm: u32 },
    MemReg { op: MemOp, rt: u8, rn: u8, rm: u8 },
    MemImm { op: MemOp, rt: u8, rn: u8, imm: u32 },
    StrSp { rt: u8, imm: u32 },
    LdrSp { rt: u8, imm: u32 },
    Adr { rd: u8, imm: u32 },
    AddSpImm { rd: u8, imm: u32 },
    AddSp { imm: u32 },
    SubSp { imm: u32 },
    Extend { op: ExtendOp, rd: u8, rm: u8 },
    Reverse { op: ReverseOp, rd: u8, rm: u8 },
    Push { registers: u8, lr: bool },
    Pop { registers: u8, pc: bool },
    Stm { rn: u8, registers: u8 },
    Ldm { rn: u8, registers: u8 },
    Cps { disable: bool },
    Bkpt { imm: u8 },
    CondBranch { cond: u8, offset: i32 },
    Udf { imm: u8 },
    Svc { imm: u8 },
    Branch { offset: i32 }, // B <label>
    Bl { offset: i32 },
    Barrier(BarrierOp),
    Unknown(u32),
}

/// True if `hw1` is the first halfword of a 32-bit Thumb-2 encoding.
pub fn is_thumb_32(hw1: u16) -> bool {
    (hw1 >> 11) >= 0b11101
}

fn sign_extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

/// Decodes a 16-bit Thumb instruction
pub fn decode_thumb_16(opcode: u16) -> Instruction {
    let low3 = |shift: u16| ((opcode >> shift) & 0x7) as u8;
    let imm8 = (opcode & 0xFF) as u8;
    let imm5 = ((opcode >> 6) & 0x1F) as u32;

    match opcode >> 11 {
        // LSL/LSR/ASR Rd, Rm, #imm5
        0b00000 | 0b00001 | 0b00010 => {
            let op = [ShiftOp::Lsl, ShiftOp::Lsr, ShiftOp::Asr][(opcode >> 11) as usize];
            Instruction::ShiftImm {
                op,
                rd: low3(0),
                rm: low3(3),
                imm: imm5 as u8,
            }
        }
        0b00011 => {
            let (rd, rn, field) = (low3(0), low3(3), low3(6));
            match (opcode >> 9) & 0x3 {
                0b00 => Instruction::AddReg { rd, rn, rm: field },
                0b01 => Instruction::SubReg { rd, rn, rm: field },
                0b10 => Instruction::AddImm3 { rd, rn, imm: field },
                _ => Instruction::SubImm3 { rd, rn, imm: field },
            }
        }
        // 0010 0ddd iiii iiii (T1 encoding)
        0b00100 => Instruction::MovImm {
            rd: low3(8),
            imm: imm8,
        },
        0b00101 => Instruction::CmpImm {
            rn: low3(8),
            imm: imm8,
        },
        0b00110 => Instruction::AddImm8 {
            rdn: low3(8),
            imm: imm8,
        },
        0b00111 => Instruction::SubImm8 {
            rdn: low3(8),
            imm: imm8,
        },
        0b01000 => {
            if opcode & 0x0400 == 0 {
                Instruction::Alu {
                    op: ALU_OPS[((opcode >> 6) & 0xF) as usize],
                    rdn: low3(0),
                    rm: low3(3),
                }
            } else {
                // Hi register operations / branch exchange
                let rm = ((opcode >> 3) & 0xF) as u8;
                let rdn = (((opcode >> 4) & 0x8) | (opcode & 0x7)) as u8;
                match (opcode >> 8) & 0x3 {
                    0b00 => Instruction::AddHigh { rdn, rm },
                    0b01 => Instruction::CmpHigh { rn: rdn, rm },
                    0b10 => Instruction::MovHigh { rd: rdn, rm },
                    _ if opcode & 0x0080 != 0 => Instruction::Blx { rm },
                    _ => Instruction::Bx { rm },
                }
            }
        }
        0b01001 => Instruction::LdrLiteral {
            rt: low3(8),
            imm: (imm8 as u32) << 2,
        },
        0b01010 | 0b01011 => Instruction::MemReg {
            op: MEM_OPS[((opcode >> 9) & 0x7) as usize],
            rt: low3(0),
            rn: low3(3),
            rm: low3(6),
        },
        0b01100..=0b10001 => {
            let (op, imm) = match opcode >> 11 {
                0b01100 => (MemOp::Str, imm5 << 2),
                0b01101 => (MemOp::Ldr, imm5 << 2),
                0b01110 => (MemOp::Strb, imm5),
                0b01111 => (MemOp::Ldrb, imm5),
                0b10000 => (MemOp::Strh, imm5 << 1),
                _ => (MemOp::Ldrh, imm5 << 1),
            };
            Instruction::MemImm {
                op,
                rt: low3(0),
                rn: low3(3),
                imm,
            }
        }
        0b10010 => Instruction::StrSp {
            rt: low3(8),
            imm: (imm8 as u32) << 2,
        },
        0b10011 => Instruction::LdrSp {
            rt: low3(8),
            imm: (imm8 as u32) << 2,
        },
        0b10100 => Instruction::Adr {
            rd: low3(8),
            imm: (imm8 as u32) << 2,
        },
        0b10101 => Instruction::AddSpImm {
            rd: low3(8),
            imm: (imm8 as u32) << 2,
        },
        0b10110 | 0b10111 => decode_misc(opcode),
        0b11000 => Instruction::Stm {
            rn: low3(8),
            registers: imm8,
        },
        0b11001 => Instruction::Ldm {
            rn: low3(8),
            registers: imm8,
        },
        0b11010 | 0b11011 => match (opcode >> 8) & 0xF {
            0xE => Instruction::Udf { imm: imm8 },
            0xF => Instruction::Svc { imm: imm8 },
            cond => Instruction::CondBranch {
                cond: cond as u8,
                offset: (imm8 as i8 as i32) << 1,
            },
        },
        // 1110 0iii iiii iiii (T2 encoding)
        0b11100 => Instruction::Branch {
            offset: sign_extend((opcode & 0x7FF) as u32, 11) << 1,
        },
        _ => Instruction::Unknown(opcode as u32),
    }
}

fn decode_misc(opcode: u16) -> Instruction {
    let rd = (opcode & 0x7) as u8;
    let rm = ((opcode >> 3) & 0x7) as u8;

    if opcode & 0xFF80 == 0xB000 {
        return Instruction::AddSp {
            imm: ((opcode & 0x7F) as u32) << 2,
        };
    }
    if opcode & 0xFF80 == 0xB080 {
        return Instruction::SubSp {
            imm: ((opcode & 0x7F) as u32) << 2,
        };
    }
    if opcode & 0xFF00 == 0xB200 {
        let op = [ExtendOp::Sxth, ExtendOp::Sxtb, ExtendOp::Uxth, ExtendOp::Uxtb]
            [((opcode >> 6) & 0x3) as usize];
        return Instruction::Extend { op, rd, rm };
    }
    if opcode & 0xFE00 == 0xB400 {
        return Instruction::Push {
            registers: (opcode & 0xFF) as u8,
            lr: opcode & 0x0100 != 0,
        };
    }
    if opcode & 0xFE00 == 0xBC00 {
        return Instruction::Pop {
            registers: (opcode & 0xFF) as u8,
            pc: opcode & 0x0100 != 0,
        };
    }
    // CPSIE i -> 0xB662, CPSID i -> 0xB672
    if opcode & 0xFFEF == 0xB662 {
        return Instruction::Cps {
            disable: opcode & 0x0010 != 0,
        };
    }
    if opcode & 0xFF00 == 0xBA00 {
        return match (opcode >> 6) & 0x3 {
            0 => Instruction::Reverse {
                op: ReverseOp::Rev,
                rd,
                rm,
            },
            1 => Instruction::Reverse {
                op: ReverseOp::Rev16,
                rd,
                rm,
            },
            3 => Instruction::Reverse {
                op: ReverseOp::Revsh,
                rd,
                rm,
            },
            _ => Instruction::Unknown(opcode as u32),
        };
    }
    if opcode & 0xFF00 == 0xBE00 {
        return Instruction::Bkpt {
            imm: (opcode & 0xFF) as u8,
        };
    }
    // NOP: 1011 1111 0000 0000 -> 0xBF00; YIELD/WFE/WFI/SEV are treated alike.
    if opcode & 0xFF0F == 0xBF00 {
        return Instruction::Nop;
    }

    Instruction::Unknown(opcode as u32)
}

/// Decodes a 32-bit Thumb-2 instruction from its two halfwords.
pub fn decode_thumb_32(hw1: u16, hw2: u16) -> Instruction {
    // BL: 11110 S imm10 | 11 J1 1 J2 imm11
    if hw1 & 0xF800 == 0xF000 && hw2 & 0xD000 == 0xD000 {
        let s = ((hw1 >> 10) & 1) as u32;
        let imm10 = (hw1 & 0x3FF) as u32;
        let j1 = ((hw2 >> 13) & 1) as u32;
        let j2 = ((hw2 >> 11) & 1) as u32;
        let imm11 = (hw2 & 0x7FF) as u32;
        let i1 = !(j1 ^ s) & 1;
        let i2 = !(j2 ^ s) & 1;
        let imm = (s << 24) | (i1 << 23) | (i2 << 22) | (imm10 << 12) | (imm11 << 1);
        return Instruction::Bl {
            offset: sign_extend(imm, 25),
        };
    }

    if hw1 == 0xF3BF {
        match hw2 & 0xFFF0 {
            0x8F40 => return Instruction::Barrier(BarrierOp::Dsb),
            0x8F50 => return Instruction::Barrier(BarrierOp::Dmb),
            0x8F60 => return Instruction::Barrier(BarrierOp::Isb),
            _ => {}
        }
    }

    Instruction::Unknown(((hw1 as u32) << 16) | hw2 as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_mov() {
        // 0x202A => MOV R0, #42
        // 0010 0000 0010 1010
        let instr = decode_thumb_16(0x202A);
        assert_eq!(instr, Instruction::MovImm { rd: 0, imm: 42 });
    }

    #[test]
    fn test_decoder_svc_and_udf() {
        assert_eq!(decode_thumb_16(0xDF01), Instruction::Svc { imm: 1 });
        assert_eq!(decode_thumb_16(0xDF63), Instruction::Svc { imm: 99 });
        assert_eq!(decode_thumb_16(0xDE00), Instruction::Udf { imm: 0 });
    }

    #[test]
    fn test_decoder_branches() {
        // B . -> offset -4
        assert_eq!(decode_thumb_16(0xE7FE), Instruction::Branch { offset: -4 });
        // BNE -2 instructions
        assert_eq!(
            decode_thumb_16(0xD1FC),
            Instruction::CondBranch {
                cond: 1,
                offset: -8
            }
        );
        assert_eq!(decode_thumb_16(0x4770), Instruction::Bx { rm: 14 });
        assert_eq!(decode_thumb_16(0x4788), Instruction::Blx { rm: 1 });
    }

    #[test]
    fn test_decoder_bl() {
        // BL +0x100: F000 F880
        assert_eq!(
            decode_thumb_32(0xF000, 0xF880),
            Instruction::Bl { offset: 0x100 }
        );
        // BL -4: F7FF FFFE
        assert_eq!(decode_thumb_32(0xF7FF, 0xFFFE), Instruction::Bl { offset: -4 });
        assert!(is_thumb_32(0xF000));
        assert!(!is_thumb_32(0xE7FE));
    }

    #[test]
    fn test_decoder_memory_forms() {
        // LDR R0, [R1, #4]
        assert_eq!(
            decode_thumb_16(0x6848),
            Instruction::MemImm {
                op: MemOp::Ldr,
                rt: 0,
                rn: 1,
                imm: 4
            }
        );
        // LDR R1, [PC, #8]
        assert_eq!(
            decode_thumb_16(0x4902),
            Instruction::LdrLiteral { rt: 1, imm: 8 }
        );
        // PUSH {R4, LR}
        assert_eq!(
            decode_thumb_16(0xB510),
            Instruction::Push {
                registers: 0x10,
                lr: true
            }
        );
        // LDRSB R0, [R1, R2]
        assert_eq!(
            decode_thumb_16(0x5688),
            Instruction::MemReg {
                op: MemOp::Ldrsb,
                rt: 0,
                rn: 1,
                rm: 2
            }
        );
    }

    #[test]
    fn test_decoder_hints_and_barriers() {
        assert_eq!(decode_thumb_16(0xBF00), Instruction::Nop);
        assert_eq!(decode_thumb_16(0xBF30), Instruction::Nop); // WFI
        assert_eq!(decode_thumb_16(0xB672), Instruction::Cps { disable: true });
        assert_eq!(
            decode_thumb_32(0xF3BF, 0x8F5F),
            Instruction::Barrier(BarrierOp::Dmb)
        );
    }
}
