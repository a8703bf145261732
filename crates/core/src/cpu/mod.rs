// ThumbHost - Firmware Syscall Harness
// Copyright (C) 2026 ThumbHost Team
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

mod execute;

use crate::bus::SystemBus;
use crate::decoder::{decode_thumb_16, decode_thumb_32, is_thumb_32, Instruction};
use crate::memory::Perm;
use crate::snapshot::EngineContext;
use crate::{
    Engine, EngineAccess, EngineError, EngineResult, Exit, HookKind, Hooks, MappedRange,
    MemAccess, Reg, StopReason,
};
use std::ops::Range;

const FLAG_N: u32 = 1 << 31;
const FLAG_Z: u32 = 1 << 30;
const FLAG_C: u32 = 1 << 29;
const FLAG_V: u32 = 1 << 28;
/// Thumb execution state bit of xPSR.
const XPSR_T: u32 = 1 << 24;

#[derive(Debug, Clone)]
pub struct CortexM {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r4: u32,
    pub r5: u32,
    pub r6: u32,
    pub r7: u32,
    pub r8: u32,
    pub r9: u32,
    pub r10: u32,
    pub r11: u32,
    pub r12: u32,
    pub sp: u32, // R13
    pub lr: u32, // R14
    pub pc: u32, // R15
    pub xpsr: u32,
    pub primask: bool,
}

impl Default for CortexM {
    fn default() -> Self {
        Self {
            r0: 0,
            r1: 0,
            r2: 0,
            r3: 0,
            r4: 0,
            r5: 0,
            r6: 0,
            r7: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            r12: 0,
            sp: 0,
            lr: 0,
            pc: 0,
            xpsr: XPSR_T,
            primask: false,
        }
    }
}

impl CortexM {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_reg(&self, n: u8) -> u32 {
        match n {
            0 => self.r0,
            1 => self.r1,
            2 => self.r2,
            3 => self.r3,
            4 => self.r4,
            5 => self.r5,
            6 => self.r6,
            7 => self.r7,
            8 => self.r8,
            9 => self.r9,
            10 => self.r10,
            11 => self.r11,
            12 => self.r12,
            13 => self.sp,
            14 => self.lr,
            _ => self.pc,
        }
    }

    pub fn write_reg(&mut self, n: u8, val: u32) {
        match n {
            0 => self.r0 = val,
            1 => self.r1 = val,
            2 => self.r2 = val,
            3 => self.r3 = val,
            4 => self.r4 = val,
            5 => self.r5 = val,
            6 => self.r6 = val,
            7 => self.r7 = val,
            8 => self.r8 = val,
            9 => self.r9 = val,
            10 => self.r10 = val,
            11 => self.r11 = val,
            12 => self.r12 = val,
            13 => self.sp = val,
            14 => self.lr = val,
            _ => self.pc = val & !1,
        }
    }

    pub fn registers(&self) -> [u32; 16] {
        let mut regs = [0u32; 16];
        for (n, slot) in regs.iter_mut().enumerate() {
            *slot = self.read_reg(n as u8);
        }
        regs
    }

    fn flag(&self, mask: u32) -> bool {
        self.xpsr & mask != 0
    }

    fn set_flag(&mut self, mask: u32, on: bool) {
        if on {
            self.xpsr |= mask;
        } else {
            self.xpsr &= !mask;
        }
    }

    pub fn n(&self) -> bool {
        self.flag(FLAG_N)
    }

    pub fn z(&self) -> bool {
        self.flag(FLAG_Z)
    }

    pub fn c(&self) -> bool {
        self.flag(FLAG_C)
    }

    pub fn v(&self) -> bool {
        self.flag(FLAG_V)
    }

    pub fn set_nz(&mut self, result: u32) {
        self.set_flag(FLAG_N, result & 0x8000_0000 != 0);
        self.set_flag(FLAG_Z, result == 0);
    }

    pub fn set_c(&mut self, carry: bool) {
        self.set_flag(FLAG_C, carry);
    }

    pub fn set_v(&mut self, overflow: bool) {
        self.set_flag(FLAG_V, overflow);
    }

    pub fn condition_passed(&self, cond: u8) -> bool {
        let (n, z, c, v) = (self.n(), self.z(), self.c(), self.v());
        match cond {
            0x0 => z,
            0x1 => !z,
            0x2 => c,
            0x3 => !c,
            0x4 => n,
            0x5 => !n,
            0x6 => v,
            0x7 => !v,
            0x8 => c && !z,
            0x9 => !c || z,
            0xA => n == v,
            0xB => n != v,
            0xC => !z && n == v,
            0xD => z || n != v,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct HookTable {
    reads: Vec<Range<u32>>,
    writes: Vec<Range<u32>>,
    unmapped: bool,
    interrupt: bool,
    code: bool,
}

impl HookTable {
    fn hits(ranges: &[Range<u32>], address: u32) -> bool {
        ranges.iter().any(|r| r.contains(&address))
    }
}

/// Built-in instruction-level engine for ARMv6-M Thumb code.
#[derive(Debug, Default)]
pub struct ThumbEngine {
    pub cpu: CortexM,
    pub bus: SystemBus,
    hooks: HookTable,
    stop_requested: bool,
}

impl ThumbEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn fetch_u16(&self, addr: u32) -> EngineResult<u16> {
        self.bus.check(MemAccess::Fetch, addr, 2)?;
        self.bus.read_u16(addr)
    }

    fn fetch(&self, pc: u32) -> EngineResult<(Instruction, u32)> {
        let hw1 = self.fetch_u16(pc)?;
        if is_thumb_32(hw1) {
            let hw2 = self.fetch_u16(pc.wrapping_add(2))?;
            Ok((decode_thumb_32(hw1, hw2), 4))
        } else {
            Ok((decode_thumb_16(hw1), 2))
        }
    }

    /// Resolves an unmapped data access through the unmapped hook, if any.
    fn ensure_mapped(
        &mut self,
        access: MemAccess,
        address: u32,
        size: usize,
        value: u32,
        hooks: &mut dyn Hooks,
    ) -> EngineResult<()> {
        if self.bus.is_mapped(address, size) {
            return Ok(());
        }
        if self.hooks.unmapped
            && hooks.unmapped(self, access, address, size, value)
            && self.bus.is_mapped(address, size)
        {
            return Ok(());
        }
        Err(EngineError::Unmapped {
            access,
            address,
            size,
        })
    }

    pub(crate) fn load(
        &mut self,
        address: u32,
        size: usize,
        hooks: &mut dyn Hooks,
    ) -> EngineResult<u32> {
        self.ensure_mapped(MemAccess::Read, address, size, 0, hooks)?;
        self.bus.check(MemAccess::Read, address, size)?;
        if HookTable::hits(&self.hooks.reads, address) {
            hooks.mem_read(self, address, size);
        }
        let mut buf = [0u8; 4];
        self.bus.read(address, &mut buf[..size])?;
        Ok(u32::from_le_bytes(buf))
    }

    pub(crate) fn store(
        &mut self,
        address: u32,
        size: usize,
        value: u32,
        hooks: &mut dyn Hooks,
    ) -> EngineResult<()> {
        self.ensure_mapped(MemAccess::Write, address, size, value, hooks)?;
        self.bus.check(MemAccess::Write, address, size)?;
        if HookTable::hits(&self.hooks.writes, address) {
            hooks.mem_write(self, address, size, value);
        }
        self.bus.write(address, &value.to_le_bytes()[..size])
    }

    pub(crate) fn raise_interrupt(&mut self, intno: u32, hooks: &mut dyn Hooks) -> EngineResult<()> {
        if !self.hooks.interrupt {
            return Err(EngineError::UnhandledInterrupt(intno));
        }
        hooks.interrupt(self, intno);
        Ok(())
    }
}

impl EngineAccess for ThumbEngine {
    fn mem_read(&self, address: u32, buf: &mut [u8]) -> EngineResult<()> {
        self.bus.read(address, buf)
    }

    fn mem_write(&mut self, address: u32, data: &[u8]) -> EngineResult<()> {
        self.bus.write(address, data)
    }

    fn reg_read(&self, reg: Reg) -> u32 {
        match reg.index() {
            Some(n) => self.cpu.read_reg(n),
            None => self.cpu.xpsr,
        }
    }

    fn reg_write(&mut self, reg: Reg, value: u32) {
        match reg.index() {
            Some(n) => self.cpu.write_reg(n, value),
            None => self.cpu.xpsr = value,
        }
    }

    fn emu_stop(&mut self) {
        self.stop_requested = true;
    }
}

impl Engine for ThumbEngine {
    type Context = EngineContext;

    fn mem_map(&mut self, base: u32, size: u32, perm: Perm) -> EngineResult<()> {
        self.bus.map(base, size, perm)
    }

    fn mem_regions(&self) -> Vec<MappedRange> {
        self.bus.ranges()
    }

    fn hook_add(&mut self, hook: HookKind) {
        match hook {
            HookKind::MemRead(range) => self.hooks.reads.push(range),
            HookKind::MemWrite(range) => self.hooks.writes.push(range),
            HookKind::MemUnmapped => self.hooks.unmapped = true,
            HookKind::Interrupt => self.hooks.interrupt = true,
            HookKind::Code => self.hooks.code = true,
        }
    }

    fn emu_start(
        &mut self,
        begin: u32,
        until: u32,
        count: u64,
        hooks: &mut dyn Hooks,
    ) -> EngineResult<Exit> {
        if begin & 1 == 0 {
            return Err(EngineError::InvalidMode {
                address: self.cpu.pc,
                target: begin,
            });
        }
        self.cpu.pc = begin & !1;
        self.stop_requested = false;
        let until = until & !1;
        let mut executed = 0u64;

        loop {
            if self.cpu.pc == until {
                return Ok(Exit {
                    reason: StopReason::ReachedUntil,
                    executed,
                });
            }
            if count != 0 && executed >= count {
                return Ok(Exit {
                    reason: StopReason::CountExhausted,
                    executed,
                });
            }

            let pc = self.cpu.pc;
            let (instruction, size) = self.fetch(pc)?;
            tracing::trace!("PC={:#x}, Instr={:?}", pc, instruction);

            if self.hooks.code {
                hooks.code(self, pc, size);
                if self.stop_requested {
                    return Ok(Exit {
                        reason: StopReason::Stopped,
                        executed,
                    });
                }
            }

            self.execute(instruction, size, hooks)?;
            executed += 1;

            if self.stop_requested {
                return Ok(Exit {
                    reason: StopReason::Stopped,
                    executed,
                });
            }
        }
    }

    fn context_save(&self) -> EngineContext {
        EngineContext::capture(&self.cpu, &self.bus)
    }

    fn context_restore(&mut self, context: &EngineContext) {
        context.apply(&mut self.cpu, &mut self.bus);
        self.stop_requested = false;
    }
}
