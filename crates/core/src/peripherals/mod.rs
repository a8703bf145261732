pub mod mmio;
pub mod syscall;

use crate::firmware::Firmware;
use crate::memory::AddressSpaceMap;
use crate::state::SimulationState;
use crate::{EngineAccess, Fault, Hooks, MemAccess, INTNO_SWI};

pub use syscall::Syscall;

/// Runtime helpers that are not reported as function transitions.
pub const HELPER_FUNCTIONS: &[&str] = &[
    "__aeabi_uidiv",
    "__aeabi_idiv",
    "__aeabi_uidivmod",
    "__aeabi_idivmod",
    "__aeabi_lmul",
    "__aeabi_llsl",
    "__aeabi_llsr",
    "__aeabi_memcpy",
    "__aeabi_memset",
    "memcpy",
    "memset",
    "memmove",
    "memcmp",
    "strlen",
];

/// Hook target connecting the engine's callbacks to the simulation state.
///
/// Handlers cannot return errors through the engine, so failures are parked
/// in a fault slot and collected by the controller once `emu_start` returns.
/// Only the first fault of a step is kept.
pub struct Bridge<'s> {
    state: &'s mut SimulationState,
    firmware: Option<&'s mut dyn Firmware>,
    map: AddressSpaceMap,
    verbose: u8,
    fault: Option<Fault>,
    pub(crate) last_func: Option<String>,
    transitions: usize,
}

impl<'s> Bridge<'s> {
    pub fn new(state: &'s mut SimulationState, firmware: Option<&'s mut dyn Firmware>) -> Self {
        Self {
            state,
            firmware,
            map: AddressSpaceMap::STANDARD,
            verbose: 0,
            fault: None,
            last_func: None,
            transitions: 0,
        }
    }

    pub fn verbose(&self) -> u8 {
        self.verbose
    }

    pub fn set_verbosity(&mut self, verbose: u8) {
        self.verbose = verbose;
    }

    pub fn map(&self) -> &AddressSpaceMap {
        &self.map
    }

    pub fn state(&self) -> &SimulationState {
        &*self.state
    }

    pub fn state_mut(&mut self) -> &mut SimulationState {
        &mut *self.state
    }

    pub fn firmware(&self) -> Option<&dyn Firmware> {
        self.firmware.as_deref()
    }

    pub fn firmware_mut(&mut self) -> Option<&mut (dyn Firmware + 's)> {
        self.firmware.as_deref_mut()
    }

    /// Parks `fault` unless an earlier fault of this step is already pending.
    pub fn record(&mut self, fault: Fault) {
        if self.fault.is_none() {
            self.fault = Some(fault);
        } else {
            tracing::debug!("dropping secondary fault: {}", fault);
        }
    }

    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    pub fn take_fault(&mut self) -> Option<Fault> {
        self.fault.take()
    }

    pub fn last_function(&self) -> Option<&str> {
        self.last_func.as_deref()
    }

    /// Number of function transitions reported by the code trace.
    pub fn transitions(&self) -> usize {
        self.transitions
    }

    fn trace(&mut self, address: u32) {
        let func = self.firmware.as_deref().and_then(|f| f.function_at(address));
        if func.is_some_and(|name| HELPER_FUNCTIONS.contains(&name)) {
            return;
        }
        if self.last_func.as_deref() != func {
            tracing::info!("#inst {:#x} {}", address, func.unwrap_or("None"));
            self.last_func = func.map(str::to_owned);
            self.transitions += 1;
        }
    }
}

impl Hooks for Bridge<'_> {
    fn mem_read(&mut self, uc: &mut dyn EngineAccess, address: u32, size: usize) {
        self.peripheral_read(uc, address, size);
    }

    fn mem_write(&mut self, uc: &mut dyn EngineAccess, address: u32, size: usize, value: u32) {
        self.peripheral_write(uc, address, size, value);
    }

    fn unmapped(
        &mut self,
        uc: &mut dyn EngineAccess,
        access: MemAccess,
        address: u32,
        size: usize,
        value: u32,
    ) -> bool {
        tracing::warn!("unmapped: {} {:#x} {} {:#x}", access, address, size, value);
        uc.emu_stop();
        self.record(Fault::UnmappedAccess {
            access,
            address,
            size,
        });
        false
    }

    fn interrupt(&mut self, uc: &mut dyn EngineAccess, intno: u32) {
        if intno == INTNO_SWI {
            self.software_interrupt(uc);
        } else if self.verbose >= 1 {
            tracing::info!("ignoring interrupt {}", intno);
        }
    }

    fn code(&mut self, _uc: &mut dyn EngineAccess, address: u32, _size: u32) {
        self.trace(address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::FirmwareImage;

    #[test]
    fn test_first_fault_wins() {
        let mut state = SimulationState::new();
        let mut bridge = Bridge::new(&mut state, None);
        bridge.record(Fault::UnknownSyscall {
            selector: 7,
            pc: 0x100,
        });
        bridge.record(Fault::ResponseOverflow { len: 1 });
        assert!(matches!(
            bridge.take_fault(),
            Some(Fault::UnknownSyscall { selector: 7, .. })
        ));
        assert!(bridge.take_fault().is_none());
    }

    #[test]
    fn test_trace_skips_helpers() {
        let mut image = FirmwareImage::from_bytes(vec![0; 8])
            .with_symbol(0x0800_0100, 0x20, "main")
            .with_symbol(0x0800_0200, 0x20, "__aeabi_uidiv")
            .with_symbol(0x0800_0300, 0x20, "worker");
        let mut state = SimulationState::new();
        let mut bridge = Bridge::new(&mut state, Some(&mut image));

        bridge.trace(0x0800_0100);
        bridge.trace(0x0800_0102);
        bridge.trace(0x0800_0200);
        bridge.trace(0x0800_0104);
        bridge.trace(0x0800_0300);
        assert_eq!(bridge.transitions(), 2);
        assert_eq!(bridge.last_function(), Some("worker"));
    }

    #[test]
    fn test_trace_without_firmware_reports_once() {
        let mut state = SimulationState::new();
        let mut bridge = Bridge::new(&mut state, None);
        bridge.last_func = Some("main".to_string());
        bridge.trace(0x10);
        bridge.trace(0x12);
        assert_eq!(bridge.transitions(), 1);
        assert_eq!(bridge.last_function(), None);
    }
}
