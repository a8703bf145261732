use crate::memory::{LinearMemory, Perm};
use crate::{EngineError, EngineResult, MappedRange, MemAccess};

const PAGE_SIZE: u32 = 0x1000;

#[derive(Debug, Clone)]
pub struct MappedRegion {
    pub mem: LinearMemory,
    pub perm: Perm,
}

/// Guest memory of the built-in engine: an ordered set of disjoint regions.
#[derive(Debug, Clone, Default)]
pub struct SystemBus {
    pub regions: Vec<MappedRegion>,
}

impl SystemBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(&mut self, base: u32, size: u32, perm: Perm) -> EngineResult<()> {
        if size == 0 || base % PAGE_SIZE != 0 || size % PAGE_SIZE != 0 {
            return Err(EngineError::MapAlignment { base, size });
        }
        let end = base as u64 + size as u64;
        if end > u32::MAX as u64 + 1 {
            return Err(EngineError::MapAlignment { base, size });
        }
        let overlaps = self
            .regions
            .iter()
            .any(|r| (base as u64) < r.mem.end() && (r.mem.base_addr as u64) < end);
        if overlaps {
            return Err(EngineError::MapOverlap { base, size });
        }

        tracing::debug!("map {:#x}..{:#x} {}", base, end, perm);
        self.regions.push(MappedRegion {
            mem: LinearMemory::new(size as usize, base),
            perm,
        });
        Ok(())
    }

    pub fn ranges(&self) -> Vec<MappedRange> {
        self.regions
            .iter()
            .map(|r| MappedRange {
                begin: r.mem.base_addr,
                end: r.mem.end() as u32,
                perm: r.perm,
            })
            .collect()
    }

    fn region(&self, addr: u32, len: usize) -> Option<&MappedRegion> {
        self.regions.iter().find(|r| r.mem.contains(addr, len))
    }

    fn region_mut(&mut self, addr: u32, len: usize) -> Option<&mut MappedRegion> {
        self.regions.iter_mut().find(|r| r.mem.contains(addr, len))
    }

    pub fn is_mapped(&self, addr: u32, len: usize) -> bool {
        self.region(addr, len).is_some()
    }

    /// Validates a guest access against the mapping and its permissions.
    pub fn check(&self, access: MemAccess, addr: u32, len: usize) -> EngineResult<()> {
        let region = self.region(addr, len).ok_or(EngineError::Unmapped {
            access,
            address: addr,
            size: len,
        })?;
        let (needed, err) = match access {
            MemAccess::Read => (Perm::READ, EngineError::ReadProtected(addr)),
            MemAccess::Write => (Perm::WRITE, EngineError::WriteProtected(addr)),
            MemAccess::Fetch => (Perm::EXEC, EngineError::FetchProtected(addr)),
        };
        if region.perm.contains(needed) {
            Ok(())
        } else {
            Err(err)
        }
    }

    /// Host-side read; permissions are not enforced.
    pub fn read(&self, addr: u32, buf: &mut [u8]) -> EngineResult<()> {
        let size = buf.len();
        if let Some(r) = self.region(addr, size) {
            if r.mem.read(addr, buf) {
                return Ok(());
            }
        }
        Err(EngineError::Unmapped {
            access: MemAccess::Read,
            address: addr,
            size,
        })
    }

    /// Host-side write; permissions are not enforced.
    pub fn write(&mut self, addr: u32, bytes: &[u8]) -> EngineResult<()> {
        let size = bytes.len();
        if let Some(r) = self.region_mut(addr, size) {
            if r.mem.write(addr, bytes) {
                return Ok(());
            }
        }
        Err(EngineError::Unmapped {
            access: MemAccess::Write,
            address: addr,
            size,
        })
    }

    pub fn read_u16(&self, addr: u32) -> EngineResult<u16> {
        let mut buf = [0u8; 2];
        self.read(addr, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_u32(&self, addr: u32) -> EngineResult<u32> {
        let mut buf = [0u8; 4];
        self.read(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn write_u16(&mut self, addr: u32, value: u16) -> EngineResult<()> {
        self.write(addr, &value.to_le_bytes())
    }

    pub fn write_u32(&mut self, addr: u32, value: u32) -> EngineResult<()> {
        self.write(addr, &value.to_le_bytes())
    }
}
