use super::ThumbEngine;
use crate::decoder::{AluOp, ExtendOp, Instruction, MemOp, ReverseOp, ShiftOp};
use crate::{EngineError, EngineResult, Hooks, INTNO_BKPT, INTNO_SWI};

const LR: u8 = 14;
const PC: u8 = 15;

fn add_with_carry(x: u32, y: u32, carry_in: bool) -> (u32, bool, bool) {
    let unsigned = x as u64 + y as u64 + carry_in as u64;
    let signed = x as i32 as i64 + y as i32 as i64 + carry_in as i64;
    let result = unsigned as u32;
    let carry = result as u64 != unsigned;
    let overflow = result as i32 as i64 != signed;
    (result, carry, overflow)
}

/// Register-specified shift; `amount` is the bottom byte of the shift register.
fn shift_c(value: u32, op: ShiftOp, amount: u32, carry_in: bool) -> (u32, bool) {
    if amount == 0 {
        return (value, carry_in);
    }
    match op {
        ShiftOp::Lsl => match amount {
            1..=31 => (value << amount, (value >> (32 - amount)) & 1 != 0),
            32 => (0, value & 1 != 0),
            _ => (0, false),
        },
        ShiftOp::Lsr => match amount {
            1..=31 => (value >> amount, (value >> (amount - 1)) & 1 != 0),
            32 => (0, value >> 31 != 0),
            _ => (0, false),
        },
        ShiftOp::Asr => match amount {
            1..=31 => (
                ((value as i32) >> amount) as u32,
                (value >> (amount - 1)) & 1 != 0,
            ),
            _ => {
                let fill = if value & 0x8000_0000 != 0 { u32::MAX } else { 0 };
                (fill, value >> 31 != 0)
            }
        },
        ShiftOp::Ror => {
            let result = value.rotate_right(amount % 32);
            (result, result >> 31 != 0)
        }
    }
}

fn register_list(registers: u8) -> impl Iterator<Item = u8> {
    (0..8u8).filter(move |n| registers & (1 << n) != 0)
}

impl ThumbEngine {
    /// Operand value of a register; reads of PC see the pipeline value.
    fn operand(&self, n: u8) -> u32 {
        if n == PC {
            self.cpu.pc.wrapping_add(4)
        } else {
            self.cpu.read_reg(n)
        }
    }

    fn set_nzcv(&mut self, (result, carry, overflow): (u32, bool, bool)) {
        self.cpu.set_nz(result);
        self.cpu.set_c(carry);
        self.cpu.set_v(overflow);
    }

    fn exec_alu(&mut self, op: AluOp, rdn: u8, rm: u8) {
        let a = self.cpu.read_reg(rdn);
        let b = self.cpu.read_reg(rm);
        let carry = self.cpu.c();

        let result = match op {
            AluOp::And => a & b,
            AluOp::Eor => a ^ b,
            AluOp::Orr => a | b,
            AluOp::Bic => a & !b,
            AluOp::Mvn => !b,
            AluOp::Mul => a.wrapping_mul(b),
            AluOp::Tst => {
                self.cpu.set_nz(a & b);
                return;
            }
            AluOp::Lsl | AluOp::Lsr | AluOp::Asr | AluOp::Ror => {
                let shift = match op {
                    AluOp::Lsl => ShiftOp::Lsl,
                    AluOp::Lsr => ShiftOp::Lsr,
                    AluOp::Asr => ShiftOp::Asr,
                    _ => ShiftOp::Ror,
                };
                let (result, c) = shift_c(a, shift, b & 0xFF, carry);
                self.cpu.set_c(c);
                result
            }
            AluOp::Adc => {
                let sum = add_with_carry(a, b, carry);
                self.set_nzcv(sum);
                sum.0
            }
            AluOp::Sbc => {
                let diff = add_with_carry(a, !b, carry);
                self.set_nzcv(diff);
                diff.0
            }
            AluOp::Rsb => {
                // NEGS Rd, Rm
                let diff = add_with_carry(!b, 0, true);
                self.set_nzcv(diff);
                diff.0
            }
            AluOp::Cmp => {
                self.set_nzcv(add_with_carry(a, !b, true));
                return;
            }
            AluOp::Cmn => {
                self.set_nzcv(add_with_carry(a, b, false));
                return;
            }
        };

        self.cpu.set_nz(result);
        self.cpu.write_reg(rdn, result);
    }

    fn exec_load(&mut self, op: MemOp, rt: u8, address: u32, hooks: &mut dyn Hooks) -> EngineResult<()> {
        let raw = self.load(address, op.size(), hooks)?;
        let value = match op {
            MemOp::Ldrsb => raw as u8 as i8 as i32 as u32,
            MemOp::Ldrsh => raw as u16 as i16 as i32 as u32,
            _ => raw,
        };
        self.cpu.write_reg(rt, value);
        Ok(())
    }

    fn exec_mem(&mut self, op: MemOp, rt: u8, address: u32, hooks: &mut dyn Hooks) -> EngineResult<()> {
        if op.is_store() {
            let value = self.cpu.read_reg(rt);
            self.store(address, op.size(), value, hooks)
        } else {
            self.exec_load(op, rt, address, hooks)
        }
    }

    /// Executes one decoded instruction located at the current PC.
    ///
    /// PC is only advanced once the instruction completed, so a failing
    /// memory access leaves it on the faulting instruction.
    pub(crate) fn execute(
        &mut self,
        instruction: Instruction,
        size: u32,
        hooks: &mut dyn Hooks,
    ) -> EngineResult<()> {
        let pc = self.cpu.pc;
        let mut next_pc = pc.wrapping_add(size);

        match instruction {
            Instruction::Nop | Instruction::Barrier(_) => {}
            Instruction::ShiftImm { op, rd, rm, imm } => {
                let value = self.cpu.read_reg(rm);
                let amount = match (op, imm) {
                    (ShiftOp::Lsr | ShiftOp::Asr, 0) => 32,
                    _ => imm as u32,
                };
                let (result, carry) = shift_c(value, op, amount, self.cpu.c());
                self.cpu.write_reg(rd, result);
                self.cpu.set_nz(result);
                self.cpu.set_c(carry);
            }
            Instruction::AddReg { rd, rn, rm } => {
                let sum = add_with_carry(self.cpu.read_reg(rn), self.cpu.read_reg(rm), false);
                self.set_nzcv(sum);
                self.cpu.write_reg(rd, sum.0);
            }
            Instruction::SubReg { rd, rn, rm } => {
                let diff = add_with_carry(self.cpu.read_reg(rn), !self.cpu.read_reg(rm), true);
                self.set_nzcv(diff);
                self.cpu.write_reg(rd, diff.0);
            }
            Instruction::AddImm3 { rd, rn, imm } => {
                let sum = add_with_carry(self.cpu.read_reg(rn), imm as u32, false);
                self.set_nzcv(sum);
                self.cpu.write_reg(rd, sum.0);
            }
            Instruction::SubImm3 { rd, rn, imm } => {
                let diff = add_with_carry(self.cpu.read_reg(rn), !(imm as u32), true);
                self.set_nzcv(diff);
                self.cpu.write_reg(rd, diff.0);
            }
            Instruction::MovImm { rd, imm } => {
                self.cpu.write_reg(rd, imm as u32);
                self.cpu.set_nz(imm as u32);
            }
            Instruction::CmpImm { rn, imm } => {
                self.set_nzcv(add_with_carry(self.cpu.read_reg(rn), !(imm as u32), true));
            }
            Instruction::AddImm8 { rdn, imm } => {
                let sum = add_with_carry(self.cpu.read_reg(rdn), imm as u32, false);
                self.set_nzcv(sum);
                self.cpu.write_reg(rdn, sum.0);
            }
            Instruction::SubImm8 { rdn, imm } => {
                let diff = add_with_carry(self.cpu.read_reg(rdn), !(imm as u32), true);
                self.set_nzcv(diff);
                self.cpu.write_reg(rdn, diff.0);
            }
            Instruction::Alu { op, rdn, rm } => self.exec_alu(op, rdn, rm),
            Instruction::AddHigh { rdn, rm } => {
                let result = self.operand(rdn).wrapping_add(self.operand(rm));
                if rdn == PC {
                    next_pc = result & !1;
                } else {
                    self.cpu.write_reg(rdn, result);
                }
            }
            Instruction::CmpHigh { rn, rm } => {
                self.set_nzcv(add_with_carry(self.operand(rn), !self.operand(rm), true));
            }
            Instruction::MovHigh { rd, rm } => {
                let value = self.operand(rm);
                if rd == PC {
                    next_pc = value & !1;
                } else {
                    self.cpu.write_reg(rd, value);
                }
            }
            Instruction::Bx { rm } | Instruction::Blx { rm } => {
                let target = self.operand(rm);
                if target & 1 == 0 {
                    return Err(EngineError::InvalidMode {
                        address: pc,
                        target,
                    });
                }
                if matches!(instruction, Instruction::Blx { .. }) {
                    self.cpu.write_reg(LR, next_pc | 1);
                }
                next_pc = target & !1;
            }
            Instruction::LdrLiteral { rt, imm } => {
                let address = (pc.wrapping_add(4) & !3).wrapping_add(imm);
                self.exec_load(MemOp::Ldr, rt, address, hooks)?;
            }
            Instruction::MemReg { op, rt, rn, rm } => {
                let address = self.cpu.read_reg(rn).wrapping_add(self.cpu.read_reg(rm));
                self.exec_mem(op, rt, address, hooks)?;
            }
            Instruction::MemImm { op, rt, rn, imm } => {
                let address = self.cpu.read_reg(rn).wrapping_add(imm);
                self.exec_mem(op, rt, address, hooks)?;
            }
            Instruction::StrSp { rt, imm } => {
                let address = self.cpu.sp.wrapping_add(imm);
                self.exec_mem(MemOp::Str, rt, address, hooks)?;
            }
            Instruction::LdrSp { rt, imm } => {
                let address = self.cpu.sp.wrapping_add(imm);
                self.exec_mem(MemOp::Ldr, rt, address, hooks)?;
            }
            Instruction::Adr { rd, imm } => {
                self.cpu.write_reg(rd, (pc.wrapping_add(4) & !3).wrapping_add(imm));
            }
            Instruction::AddSpImm { rd, imm } => {
                self.cpu.write_reg(rd, self.cpu.sp.wrapping_add(imm));
            }
            Instruction::AddSp { imm } => self.cpu.sp = self.cpu.sp.wrapping_add(imm),
            Instruction::SubSp { imm } => self.cpu.sp = self.cpu.sp.wrapping_sub(imm),
            Instruction::Extend { op, rd, rm } => {
                let value = self.cpu.read_reg(rm);
                let result = match op {
                    ExtendOp::Sxth => value as u16 as i16 as i32 as u32,
                    ExtendOp::Sxtb => value as u8 as i8 as i32 as u32,
                    ExtendOp::Uxth => value & 0xFFFF,
                    ExtendOp::Uxtb => value & 0xFF,
                };
                self.cpu.write_reg(rd, result);
            }
            Instruction::Reverse { op, rd, rm } => {
                let value = self.cpu.read_reg(rm);
                let result = match op {
                    ReverseOp::Rev => value.swap_bytes(),
                    ReverseOp::Rev16 => ((value & 0x00FF_00FF) << 8) | ((value >> 8) & 0x00FF_00FF),
                    ReverseOp::Revsh => (value as u16).swap_bytes() as i16 as i32 as u32,
                };
                self.cpu.write_reg(rd, result);
            }
            Instruction::Push { registers, lr } => {
                let count = registers.count_ones() + lr as u32;
                let start = self.cpu.sp.wrapping_sub(4 * count);
                let mut address = start;
                for n in register_list(registers) {
                    self.store(address, 4, self.cpu.read_reg(n), hooks)?;
                    address = address.wrapping_add(4);
                }
                if lr {
                    self.store(address, 4, self.cpu.lr, hooks)?;
                }
                self.cpu.sp = start;
            }
            Instruction::Pop { registers, pc: load_pc } => {
                let mut address = self.cpu.sp;
                for n in register_list(registers) {
                    let value = self.load(address, 4, hooks)?;
                    self.cpu.write_reg(n, value);
                    address = address.wrapping_add(4);
                }
                if load_pc {
                    next_pc = self.load(address, 4, hooks)? & !1;
                    address = address.wrapping_add(4);
                }
                self.cpu.sp = address;
            }
            Instruction::Stm { rn, registers } => {
                let mut address = self.cpu.read_reg(rn);
                for n in register_list(registers) {
                    self.store(address, 4, self.cpu.read_reg(n), hooks)?;
                    address = address.wrapping_add(4);
                }
                self.cpu.write_reg(rn, address);
            }
            Instruction::Ldm { rn, registers } => {
                let mut address = self.cpu.read_reg(rn);
                for n in register_list(registers) {
                    let value = self.load(address, 4, hooks)?;
                    self.cpu.write_reg(n, value);
                    address = address.wrapping_add(4);
                }
                if registers & (1 << rn) == 0 {
                    self.cpu.write_reg(rn, address);
                }
            }
            Instruction::Cps { disable } => self.cpu.primask = disable,
            Instruction::Bkpt { .. } => {
                self.cpu.pc = next_pc;
                return self.raise_interrupt(INTNO_BKPT, hooks);
            }
            Instruction::Svc { .. } => {
                // The handler sees PC past the SVC; the selector is at PC - 2.
                self.cpu.pc = next_pc;
                return self.raise_interrupt(INTNO_SWI, hooks);
            }
            Instruction::CondBranch { cond, offset } => {
                if self.cpu.condition_passed(cond) {
                    next_pc = pc.wrapping_add(4).wrapping_add(offset as u32);
                }
            }
            Instruction::Branch { offset } => {
                next_pc = pc.wrapping_add(4).wrapping_add(offset as u32);
            }
            Instruction::Bl { offset } => {
                self.cpu.write_reg(LR, next_pc | 1);
                next_pc = pc.wrapping_add(4).wrapping_add(offset as u32);
            }
            Instruction::Udf { .. } => return Err(EngineError::Undefined(pc)),
            Instruction::Unknown(opcode) => {
                tracing::error!("Unknown instruction {:#x} at {:#x}", opcode, pc);
                return Err(EngineError::DecodeError(pc));
            }
        }

        self.cpu.pc = next_pc;
        Ok(())
    }
}
