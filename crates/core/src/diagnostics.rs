//! Human-readable views of the machine: register dumps, disassembly
//! listings, the fault report and the memory map summary.
//!
//! Nothing here returns an error. Unreadable memory becomes a listing line.

use crate::firmware::Firmware;
use crate::{Disassembler, EngineAccess, Insn, MappedRange, Reg};
use std::fmt;

/// Bytes read per requested instruction.
const READ_WINDOW: usize = 4;
/// Instructions listed on each side of the faulting one.
const FAULT_CONTEXT: usize = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterDump {
    pub registers: Vec<(Reg, u32)>,
}

impl RegisterDump {
    pub fn capture(uc: &dyn EngineAccess) -> Self {
        Self {
            registers: Reg::ALL.iter().map(|&r| (r, uc.reg_read(r))).collect(),
        }
    }
}

impl fmt::Display for RegisterDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (reg, value) in &self.registers {
            writeln!(f, "{:<5}\t{:#010x}", reg.name(), value)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisasmLine {
    Insn {
        function: Option<String>,
        insn: Insn,
    },
    ReadFailure {
        address: u32,
    },
}

impl DisasmLine {
    /// Little-endian value of the instruction bytes.
    pub fn encoding(&self) -> Option<u32> {
        match self {
            DisasmLine::Insn { insn, .. } => Some(
                insn.bytes
                    .iter()
                    .rev()
                    .fold(0u32, |acc, b| (acc << 8) | *b as u32),
            ),
            DisasmLine::ReadFailure { .. } => None,
        }
    }

    /// A 16-bit encoding as four nibble groups, e.g. `0010 0000 0010 1010`.
    pub fn encoding_bits(&self) -> Option<String> {
        match self {
            DisasmLine::Insn { insn, .. } if insn.bytes.len() == 2 => {
                let bits = format!("{:016b}", self.encoding()?);
                Some(format!(
                    "{} {} {} {}",
                    &bits[0..4],
                    &bits[4..8],
                    &bits[8..12],
                    &bits[12..16]
                ))
            }
            _ => None,
        }
    }

    pub fn size(&self) -> Option<u32> {
        match self {
            DisasmLine::Insn { insn, .. } => Some(insn.bytes.len() as u32),
            DisasmLine::ReadFailure { .. } => None,
        }
    }
}

impl fmt::Display for DisasmLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisasmLine::Insn { function, insn } => {
                if let Some(function) = function {
                    write!(f, "{} ", function)?;
                }
                write!(
                    f,
                    "{:#x} {:#x} {} {}",
                    insn.address,
                    self.encoding().unwrap_or(0),
                    insn.mnemonic,
                    insn.op_str
                )
            }
            DisasmLine::ReadFailure { address } => {
                write!(f, "fail to read memory {:#x}", address)
            }
        }
    }
}

/// Disassembles up to `count` instructions at `address`.
pub fn disassemble(
    uc: &dyn EngineAccess,
    disasm: &dyn Disassembler,
    firmware: Option<&dyn Firmware>,
    address: u32,
    count: usize,
) -> Vec<DisasmLine> {
    let mut code = vec![0u8; READ_WINDOW * count];
    if uc.mem_read(address, &mut code).is_err() {
        return vec![DisasmLine::ReadFailure { address }];
    }

    disasm
        .disasm(&code, address, count)
        .into_iter()
        .map(|insn| DisasmLine::Insn {
            function: firmware
                .and_then(|fw| fw.function_at(insn.address))
                .map(str::to_owned),
            insn,
        })
        .collect()
}

/// Context listing around the current PC, printed when a run faults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultDump {
    pub pc: u32,
    pub before: Vec<DisasmLine>,
    pub current: Vec<DisasmLine>,
    pub after: Vec<DisasmLine>,
    pub registers: RegisterDump,
}

impl FaultDump {
    pub fn capture(
        uc: &dyn EngineAccess,
        disasm: &dyn Disassembler,
        firmware: Option<&dyn Firmware>,
    ) -> Self {
        let pc = uc.reg_read(Reg::Pc);
        let start = pc.wrapping_sub(2 * FAULT_CONTEXT as u32);
        let before = disassemble(uc, disasm, firmware, start, FAULT_CONTEXT);
        let current = disassemble(uc, disasm, firmware, pc, 1);
        let next = pc.wrapping_add(current.first().and_then(DisasmLine::size).unwrap_or(2));
        let after = disassemble(uc, disasm, firmware, next, FAULT_CONTEXT);

        Self {
            pc,
            before,
            current,
            after,
            registers: RegisterDump::capture(uc),
        }
    }
}

impl fmt::Display for FaultDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.before {
            writeln!(f, "{}", line)?;
        }
        for line in &self.current {
            writeln!(f, "> {}", line)?;
        }
        for line in &self.after {
            writeln!(f, "{}", line)?;
        }
        write!(f, "{}", self.registers)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryReport {
    pub regions: Vec<MappedRange>,
}

impl MemoryReport {
    pub fn new(regions: Vec<MappedRange>) -> Self {
        Self { regions }
    }

    pub fn total(&self) -> u64 {
        self.regions.iter().map(|r| r.size() as u64).sum()
    }
}

impl fmt::Display for MemoryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for region in &self.regions {
            writeln!(
                f,
                "memory: {:#x} {:#x} {}",
                region.begin,
                region.size(),
                region.perm
            )?;
        }
        write!(f, "memory total: {} kb", self.total() / 1024)
    }
}
