// ThumbHost - Firmware Syscall Harness
// Copyright (C) 2026 ThumbHost Team
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod bus;
pub mod cpu;
pub mod decoder;
pub mod diagnostics;
pub mod disasm;
pub mod firmware;
pub mod machine;
pub mod memory;
pub mod peripherals;
pub mod snapshot;
pub mod state;

use std::fmt;
use std::ops::Range;

pub use cpu::ThumbEngine;
pub use disasm::ThumbDisassembler;
pub use firmware::{Firmware, FirmwareError, FirmwareImage};
pub use machine::{Machine, Phase};
pub use memory::{AddressSpaceMap, LayoutError, MemoryRegion, Perm};
pub use state::SimulationState;


/// Interrupt number raised by `SVC`.
pub const INTNO_SWI: u32 = 2;
/// Interrupt number raised by `BKPT`.
pub const INTNO_BKPT: u32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemAccess {
    Read,
    Write,
    Fetch,
}

impl fmt::Display for MemAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemAccess::Read => "read",
            MemAccess::Write => "write",
            MemAccess::Fetch => "fetch",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Unmapped {access} of {size} bytes at {address:#x}")]
    Unmapped {
        access: MemAccess,
        address: u32,
        size: usize,
    },
    #[error("Read from non-readable memory at {0:#x}")]
    ReadProtected(u32),
    #[error("Write to read-only memory at {0:#x}")]
    WriteProtected(u32),
    #[error("Fetch from non-executable memory at {0:#x}")]
    FetchProtected(u32),
    #[error("Instruction decoding error at {0:#x}")]
    DecodeError(u32),
    #[error("Undefined instruction at {0:#x}")]
    Undefined(u32),
    #[error("Interworking branch to ARM state ({target:#x}) at {address:#x}")]
    InvalidMode { address: u32, target: u32 },
    #[error("Unhandled interrupt {0}")]
    UnhandledInterrupt(u32),
    #[error("Mapping {base:#x}+{size:#x} is not 4 KiB aligned")]
    MapAlignment { base: u32, size: u32 },
    #[error("Mapping {base:#x}+{size:#x} overlaps an existing region")]
    MapOverlap { base: u32, size: u32 },
}

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("firmware missing")]
    FirmwareMissing,
    #[error("firmware of {size:#x} bytes exceeds the code region ({capacity:#x} bytes)")]
    FirmwareTooLarge { size: usize, capacity: u32 },
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error(transparent)]
    Firmware(#[from] FirmwareError),
    #[error("invalid memory layout: {0}")]
    Layout(#[from] LayoutError),
    #[error("failed to map region '{name}': {source}")]
    Map {
        name: &'static str,
        #[source]
        source: EngineError,
    },
    #[error("failed to load firmware: {0}")]
    Load(#[source] EngineError),
}

/// A structured failure raised by `step` after the engine returns control.
#[derive(Debug, thiserror::Error)]
pub enum Fault {
    #[error("unmapped {access} of {size} bytes at {address:#x}")]
    UnmappedAccess {
        access: MemAccess,
        address: u32,
        size: usize,
    },
    #[error("unknown syscall {selector} at {pc:#x}")]
    UnknownSyscall { selector: u8, pc: u32 },
    #[error("syscall response of {len} bytes overflows the response buffer")]
    ResponseOverflow { len: usize },
    #[error("failed to encode syscall response: {0}")]
    ResponseEncoding(#[from] serde_json::Error),
    #[error("engine error: {0}")]
    Engine(EngineError),
}

impl From<EngineError> for Fault {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Unmapped {
                access,
                address,
                size,
            } => Fault::UnmappedAccess {
                access,
                address,
                size,
            },
            other => Fault::Engine(other),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("initialization failed: {0}")]
    Init(#[from] InitError),
    #[error("execution fault: {0}")]
    Fault(#[from] Fault),
    #[error("init() has not completed")]
    NotReady,
    #[error("machine has faulted")]
    Faulted,
}

pub type HarnessResult<T> = Result<T, HarnessError>;

/// Core registers visible to hooks and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reg {
    R0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    R8,
    R9,
    R10,
    R11,
    R12,
    Sp,
    Lr,
    Pc,
    Cpsr,
}

impl Reg {
    /// Register dump order.
    pub const ALL: [Reg; 17] = [
        Reg::R0,
        Reg::R1,
        Reg::R2,
        Reg::R3,
        Reg::R4,
        Reg::R5,
        Reg::R6,
        Reg::R7,
        Reg::R8,
        Reg::R9,
        Reg::R10,
        Reg::R11,
        Reg::R12,
        Reg::Sp,
        Reg::Lr,
        Reg::Pc,
        Reg::Cpsr,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Reg::R0 => "r0",
            Reg::R1 => "r1",
            Reg::R2 => "r2",
            Reg::R3 => "r3",
            Reg::R4 => "r4",
            Reg::R5 => "r5",
            Reg::R6 => "r6",
            Reg::R7 => "r7",
            Reg::R8 => "r8",
            Reg::R9 => "r9",
            Reg::R10 => "r10",
            Reg::R11 => "r11",
            Reg::R12 => "r12",
            Reg::Sp => "sp",
            Reg::Lr => "lr",
            Reg::Pc => "pc",
            Reg::Cpsr => "cpsr",
        }
    }

    /// Core register number (0..=15), `None` for status registers.
    pub fn index(self) -> Option<u8> {
        match self {
            Reg::Cpsr => None,
            other => Some(other as u8),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A hook called `emu_stop`.
    Stopped,
    /// Execution reached the `until` address.
    ReachedUntil,
    /// The instruction count was used up.
    CountExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exit {
    pub reason: StopReason,
    pub executed: u64,
}

/// One mapped window as reported by the engine. `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedRange {
    pub begin: u32,
    pub end: u32,
    pub perm: Perm,
}

impl MappedRange {
    pub fn size(&self) -> u32 {
        self.end - self.begin
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookKind {
    MemRead(Range<u32>),
    MemWrite(Range<u32>),
    MemUnmapped,
    Interrupt,
    Code,
}

/// Memory and register access handed to hooks while the engine is executing.
pub trait EngineAccess {
    fn mem_read(&self, address: u32, buf: &mut [u8]) -> EngineResult<()>;
    fn mem_write(&mut self, address: u32, data: &[u8]) -> EngineResult<()>;
    fn reg_read(&self, reg: Reg) -> u32;
    fn reg_write(&mut self, reg: Reg, value: u32);
    /// Ends the current `emu_start` after the instruction in flight.
    fn emu_stop(&mut self);
}

/// Callbacks invoked synchronously from inside `Engine::emu_start`.
///
/// Only the kinds registered with `Engine::hook_add` are dispatched.
pub trait Hooks {
    fn mem_read(&mut self, _uc: &mut dyn EngineAccess, _address: u32, _size: usize) {}

    fn mem_write(&mut self, _uc: &mut dyn EngineAccess, _address: u32, _size: usize, _value: u32) {}

    /// Returns true if the hook made the access valid and it should be retried.
    fn unmapped(
        &mut self,
        _uc: &mut dyn EngineAccess,
        _access: MemAccess,
        _address: u32,
        _size: usize,
        _value: u32,
    ) -> bool {
        false
    }

    fn interrupt(&mut self, _uc: &mut dyn EngineAccess, _intno: u32) {}

    fn code(&mut self, _uc: &mut dyn EngineAccess, _address: u32, _size: u32) {}
}

/// Trait representing the CPU emulation engine
pub trait Engine: EngineAccess {
    type Context;

    fn mem_map(&mut self, base: u32, size: u32, perm: Perm) -> EngineResult<()>;
    fn mem_regions(&self) -> Vec<MappedRange>;
    fn hook_add(&mut self, hook: HookKind);

    /// Executes from `begin` (bit 0 selects Thumb) until `until` is reached,
    /// a hook stops the engine, or `count` instructions ran (`0` = unlimited).
    fn emu_start(
        &mut self,
        begin: u32,
        until: u32,
        count: u64,
        hooks: &mut dyn Hooks,
    ) -> EngineResult<Exit>;

    fn context_save(&self) -> Self::Context;
    fn context_restore(&mut self, context: &Self::Context);
}

/// A decoded instruction as produced by a `Disassembler`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insn {
    pub address: u32,
    pub bytes: Vec<u8>,
    pub mnemonic: String,
    pub op_str: String,
}

pub trait Disassembler {
    fn disasm(&self, code: &[u8], address: u32, count: usize) -> Vec<Insn>;
}
