use crate::memory::AddressSpaceMap;
use crate::InitError;
use std::collections::VecDeque;
use std::time::SystemTime;
use thumbhost_config::HarnessManifest;

pub use thumbhost_config::DEFAULT_CYCLE_BUDGET;

/// Host-visible simulation state shared by the controller and the bridge.
#[derive(Debug, Clone)]
pub struct SimulationState {
    /// Remaining instruction budget for unbounded steps.
    pub cycle: u64,
    /// Value reported by the RAM size register.
    pub ram_size: u32,
    pub input: VecDeque<u8>,
    pub output: Vec<u8>,
    pub write_to_stdout: bool,
    pub epoch: SystemTime,
}

impl Default for SimulationState {
    fn default() -> Self {
        Self {
            cycle: DEFAULT_CYCLE_BUDGET,
            ram_size: AddressSpaceMap::STANDARD.ram().size,
            input: VecDeque::new(),
            output: Vec::new(),
            write_to_stdout: false,
            epoch: SystemTime::now(),
        }
    }
}

impl SimulationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, bytes: &[u8]) -> Self {
        self.push_input(bytes);
        self
    }

    pub fn push_input(&mut self, bytes: &[u8]) {
        self.input.extend(bytes.iter().copied());
    }

    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    pub fn verify(&self) -> Result<(), InitError> {
        let capacity = AddressSpaceMap::STANDARD.ram().size;
        if self.cycle == 0 {
            return Err(InitError::InvalidState(
                "cycle budget must be greater than zero".to_string(),
            ));
        }
        if self.ram_size == 0 || self.ram_size > capacity {
            return Err(InitError::InvalidState(format!(
                "ram_size {:#x} out of range (1..={:#x})",
                self.ram_size, capacity
            )));
        }
        if self.ram_size % 4 != 0 {
            return Err(InitError::InvalidState(format!(
                "ram_size {:#x} is not word aligned",
                self.ram_size
            )));
        }
        Ok(())
    }

    pub fn from_manifest(manifest: &HarnessManifest) -> anyhow::Result<Self> {
        Ok(Self {
            cycle: manifest.cycle_budget,
            ram_size: manifest.ram_size_bytes()?,
            write_to_stdout: manifest.write_to_stdout,
            ..Self::default()
        }
        .with_input(manifest.input.as_bytes()))
    }
}
