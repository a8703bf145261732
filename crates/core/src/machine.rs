// ThumbHost - Firmware Syscall Harness
// Copyright (C) 2026 ThumbHost Team
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::diagnostics::{self, DisasmLine, FaultDump, MemoryReport, RegisterDump};
use crate::disasm::ThumbDisassembler;
use crate::firmware::Firmware;
use crate::memory::AddressSpaceMap;
use crate::peripherals::Bridge;
use crate::state::SimulationState;
use crate::{
    cpu::ThumbEngine, Disassembler, Engine, Fault, HarnessError, HarnessResult, HookKind,
    InitError, Reg, StopReason,
};
use std::ops::{Deref, DerefMut};
use thumbhost_config::HarnessManifest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Initializing,
    Ready,
    Running,
    Faulted,
}

/// Temporarily replaces the standing cycle budget for one step.
///
/// The previous budget is put back when the guard drops, whichever way the
/// step exits.
pub struct ScopedBudget<'b, 's> {
    bridge: &'b mut Bridge<'s>,
    saved: Option<u64>,
}

impl<'b, 's> ScopedBudget<'b, 's> {
    pub fn new(bridge: &'b mut Bridge<'s>, budget: Option<u64>) -> Self {
        let saved = budget.map(|count| std::mem::replace(&mut bridge.state_mut().cycle, count));
        Self { bridge, saved }
    }

    pub fn is_override(&self) -> bool {
        self.saved.is_some()
    }
}

impl<'s> Deref for ScopedBudget<'_, 's> {
    type Target = Bridge<'s>;

    fn deref(&self) -> &Self::Target {
        &*self.bridge
    }
}

impl<'s> DerefMut for ScopedBudget<'_, 's> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.bridge
    }
}

impl Drop for ScopedBudget<'_, '_> {
    fn drop(&mut self) {
        if let Some(cycle) = self.saved {
            self.bridge.state_mut().cycle = cycle;
        }
    }
}

/// Owns the engine and drives firmware execution step by step.
pub struct Machine<'s, E: Engine, D: Disassembler> {
    engine: E,
    disasm: D,
    bridge: Bridge<'s>,
    map: AddressSpaceMap,
    phase: Phase,
    context: Option<E::Context>,
}

impl<'s> Machine<'s, ThumbEngine, ThumbDisassembler> {
    /// Machine backed by the built-in Thumb engine and disassembler.
    pub fn thumb(state: &'s mut SimulationState, firmware: Option<&'s mut dyn Firmware>) -> Self {
        Self::new(ThumbEngine::new(), ThumbDisassembler::new(), state, firmware)
    }
}

impl<'s, E: Engine, D: Disassembler> Machine<'s, E, D> {
    pub fn new(
        engine: E,
        disasm: D,
        state: &'s mut SimulationState,
        firmware: Option<&'s mut dyn Firmware>,
    ) -> Self {
        Self {
            engine,
            disasm,
            bridge: Bridge::new(state, firmware),
            map: AddressSpaceMap::STANDARD,
            phase: Phase::Uninitialized,
            context: None,
        }
    }

    pub fn with_verbosity(mut self, verbose: u8) -> Self {
        self.bridge.set_verbosity(verbose);
        self
    }

    /// Applies the controller settings of a manifest. Budget, console and
    /// input come in through `SimulationState::from_manifest`.
    pub fn with_manifest(self, manifest: &HarnessManifest) -> Self {
        self.with_verbosity(manifest.verbose)
    }

    pub fn verbosity(&self) -> u8 {
        self.bridge.verbose()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn map(&self) -> &AddressSpaceMap {
        &self.map
    }

    pub fn state(&self) -> &SimulationState {
        self.bridge.state()
    }

    pub fn state_mut(&mut self) -> &mut SimulationState {
        self.bridge.state_mut()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn firmware(&self) -> Option<&dyn Firmware> {
        self.bridge.firmware()
    }

    pub fn last_function(&self) -> Option<&str> {
        self.bridge.last_function()
    }

    pub fn trace_transitions(&self) -> usize {
        self.bridge.transitions()
    }

    /// Maps memory, installs hooks, loads the firmware image and resets.
    pub fn init(&mut self) -> HarnessResult<()> {
        if self.phase != Phase::Uninitialized {
            return Err(InitError::InvalidState("init() already ran".to_string()).into());
        }
        self.phase = Phase::Initializing;

        match self.initialize() {
            Ok(()) => {
                self.phase = Phase::Ready;
                Ok(())
            }
            Err(err) => {
                tracing::error!("init failed: {}", err);
                self.phase = Phase::Faulted;
                Err(err)
            }
        }
    }

    fn initialize(&mut self) -> HarnessResult<()> {
        if let Some(firmware) = self.bridge.firmware_mut() {
            firmware.refresh().map_err(InitError::from)?;
        }
        self.bridge.state().verify()?;
        self.map.verify().map_err(InitError::Layout)?;

        for region in self.map.regions() {
            self.engine
                .mem_map(region.base, region.size, region.perm)
                .map_err(|source| InitError::Map {
                    name: region.name,
                    source,
                })?;
        }

        let peripheral = self.map.peripheral();
        self.engine
            .hook_add(HookKind::MemRead(peripheral.base..peripheral.end()));
        self.engine
            .hook_add(HookKind::MemWrite(peripheral.base..peripheral.end()));
        self.engine.hook_add(HookKind::MemUnmapped);
        self.engine.hook_add(HookKind::Interrupt);
        if self.bridge.verbose() >= 2 {
            self.engine.hook_add(HookKind::Code);
        }

        let flash = *self.map.flash();
        let image = self
            .bridge
            .firmware()
            .and_then(|fw| fw.buffer())
            .ok_or(InitError::FirmwareMissing)?;
        if image.len() > flash.size as usize {
            return Err(InitError::FirmwareTooLarge {
                size: image.len(),
                capacity: flash.size,
            }
            .into());
        }
        self.engine
            .mem_write(flash.base, image)
            .map_err(InitError::Load)?;
        tracing::debug!("loaded {} byte image at {:#x}", image.len(), flash.base);

        self.context = Some(self.engine.context_save());
        self.restore()
    }

    fn restore(&mut self) -> HarnessResult<()> {
        if let Some(context) = &self.context {
            self.engine.context_restore(context);
        }
        self.bridge.take_fault();

        let base = self.map.flash().base;
        let mut vectors = [0u8; 8];
        self.engine
            .mem_read(base, &mut vectors)
            .map_err(InitError::Load)?;
        let sp = u32::from_le_bytes([vectors[0], vectors[1], vectors[2], vectors[3]]);
        let pc = u32::from_le_bytes([vectors[4], vectors[5], vectors[6], vectors[7]]);

        self.engine.reg_write(Reg::Sp, sp);
        self.engine.reg_write(Reg::Pc, pc);
        Ok(())
    }

    /// Restores the post-load snapshot and re-reads the reset vector.
    pub fn reset(&mut self) -> HarnessResult<()> {
        match self.phase {
            Phase::Initializing | Phase::Ready => self.restore(),
            Phase::Faulted => Err(HarnessError::Faulted),
            Phase::Uninitialized | Phase::Running => Err(HarnessError::NotReady),
        }
    }

    fn ensure_ready(&self) -> HarnessResult<()> {
        match self.phase {
            Phase::Ready => Ok(()),
            Phase::Faulted => Err(HarnessError::Faulted),
            _ => Err(HarnessError::NotReady),
        }
    }

    /// Runs until a syscall pauses execution, `count` (or the standing
    /// budget) instructions have run, or execution leaves flash.
    ///
    /// Returns `true` if a hook paused execution.
    pub fn step(&mut self, count: Option<u64>) -> HarnessResult<bool> {
        self.ensure_ready()?;
        self.phase = Phase::Running;

        let until = self.map.flash().end();
        let pc = self.engine.reg_read(Reg::Pc);

        let outcome = {
            let mut budget = ScopedBudget::new(&mut self.bridge, count);
            let cycles = budget.state().cycle;
            if cycles == 0 {
                Ok(None)
            } else {
                let result = self.engine.emu_start(pc | 1, until, cycles, &mut *budget);
                match (budget.take_fault(), result) {
                    (Some(fault), _) => Err(fault),
                    (None, Err(err)) => Err(Fault::from(err)),
                    (None, Ok(exit)) => {
                        if !budget.is_override() {
                            budget.state_mut().cycle = cycles.saturating_sub(exit.executed);
                        }
                        Ok(Some(exit))
                    }
                }
            }
        };

        match outcome {
            Ok(exit) => {
                self.phase = Phase::Ready;
                Ok(exit.is_some_and(|e| e.reason == StopReason::Stopped))
            }
            Err(fault) => {
                self.phase = Phase::Faulted;
                Err(fault.into())
            }
        }
    }

    /// Steps until the firmware stops pausing for syscalls.
    pub fn run(&mut self) -> HarnessResult<()> {
        self.ensure_ready()?;

        let pc = self.engine.reg_read(Reg::Pc);
        if let Some(firmware) = self.bridge.firmware() {
            let entry = firmware.function_at(pc).map(str::to_owned);
            if self.bridge.verbose() >= 2 {
                tracing::info!("{}", entry.as_deref().unwrap_or("None"));
            }
            self.bridge.last_func = entry;
        }

        loop {
            match self.step(None) {
                Ok(true) => continue,
                Ok(false) => return Ok(()),
                Err(err) => {
                    tracing::error!("ERROR: {}", err);
                    for line in self.fault_dump().to_string().lines() {
                        tracing::error!("{}", line);
                    }
                    return Err(err);
                }
            }
        }
    }

    pub fn register_dump(&self) -> RegisterDump {
        RegisterDump::capture(&self.engine)
    }

    pub fn disassemble(&self, address: u32, count: usize) -> Vec<DisasmLine> {
        diagnostics::disassemble(
            &self.engine,
            &self.disasm,
            self.bridge.firmware(),
            address,
            count,
        )
    }

    pub fn fault_dump(&self) -> FaultDump {
        FaultDump::capture(&self.engine, &self.disasm, self.bridge.firmware())
    }

    pub fn memory_report(&self) -> MemoryReport {
        MemoryReport::new(self.engine.mem_regions())
    }

    pub fn report_memory(&self) {
        for line in self.memory_report().to_string().lines() {
            tracing::info!("{}", line);
        }
    }
}
