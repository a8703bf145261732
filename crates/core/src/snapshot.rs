use crate::bus::SystemBus;
use crate::cpu::CortexM;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuSnapshot {
    pub registers: [u32; 16],
    pub xpsr: u32,
    pub primask: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionSnapshot {
    pub base: u32,
    pub data: Vec<u8>,
}

/// Saved engine context: core registers plus the contents of every mapped region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineContext {
    pub cpu: CpuSnapshot,
    pub memory: Vec<RegionSnapshot>,
}

impl EngineContext {
    pub fn capture(cpu: &CortexM, bus: &SystemBus) -> Self {
        Self {
            cpu: CpuSnapshot {
                registers: cpu.registers(),
                xpsr: cpu.xpsr,
                primask: cpu.primask,
            },
            memory: bus
                .regions
                .iter()
                .map(|r| RegionSnapshot {
                    base: r.mem.base_addr,
                    data: r.mem.data.clone(),
                })
                .collect(),
        }
    }

    /// Restores registers and region contents. Regions mapped after the
    /// capture keep their current bytes.
    pub fn apply(&self, cpu: &mut CortexM, bus: &mut SystemBus) {
        for (n, value) in self.cpu.registers.iter().enumerate() {
            cpu.write_reg(n as u8, *value);
        }
        cpu.xpsr = self.cpu.xpsr;
        cpu.primask = self.cpu.primask;

        for saved in &self.memory {
            if let Some(region) = bus
                .regions
                .iter_mut()
                .find(|r| r.mem.base_addr == saved.base && r.mem.data.len() == saved.data.len())
            {
                region.mem.data.copy_from_slice(&saved.data);
            }
        }
    }
}
