use bitflags::bitflags;
use std::fmt;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Perm: u8 {
        const READ = 0b001;
        const WRITE = 0b010;
        const EXEC = 0b100;
        const RW = Self::READ.bits() | Self::WRITE.bits();
        const RX = Self::READ.bits() | Self::EXEC.bits();
        const ALL = Self::READ.bits() | Self::WRITE.bits() | Self::EXEC.bits();
    }
}

impl fmt::Display for Perm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |p: Perm, c: char| if self.contains(p) { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            flag(Perm::READ, 'r'),
            flag(Perm::WRITE, 'w'),
            flag(Perm::EXEC, 'x')
        )
    }
}

const KB: u32 = 1024;

/// A broken invariant of the guest memory layout.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("region '{first}' overlaps '{second}'")]
    Overlap {
        first: &'static str,
        second: &'static str,
    },
    #[error("{name} ({address:#x}) outside the peripheral window")]
    RegisterOutsideWindow { name: &'static str, address: u32 },
}

/// One mapped window of the guest address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub name: &'static str,
    pub base: u32,
    pub size: u32,
    pub perm: Perm,
}

impl MemoryRegion {
    pub const fn new(name: &'static str, base: u32, size: u32, perm: Perm) -> Self {
        Self {
            name,
            base,
            size,
            perm,
        }
    }

    /// Exclusive upper bound.
    pub const fn end(&self) -> u32 {
        self.base + self.size
    }

    pub fn contains(&self, address: u32, len: u32) -> bool {
        let end = address as u64 + len as u64;
        address >= self.base && end <= self.end() as u64
    }

    pub fn overlaps(&self, other: &MemoryRegion) -> bool {
        self.base < other.end() && other.base < self.end()
    }
}

/// Memory-mapped registers inside the peripheral window.
pub struct PeripheralAddress;

impl PeripheralAddress {
    pub const CON_RAM_SIZE: u32 = 0x4000_0000;
    pub const CON_PENDING: u32 = 0x4000_0004;
    pub const CON_EXCEPTION: u32 = 0x4000_0008;
    pub const CON_INTR_CHAR: u32 = 0x4000_000C;
    pub const RTC_TICKS_MS: u32 = 0x4000_0100;
    pub const IO_TXR: u32 = 0x4000_1000;
    pub const IO_RXR: u32 = 0x4000_1004;

    pub const ALL: [(&'static str, u32); 7] = [
        ("CON_RAM_SIZE", Self::CON_RAM_SIZE),
        ("CON_PENDING", Self::CON_PENDING),
        ("CON_EXCEPTION", Self::CON_EXCEPTION),
        ("CON_INTR_CHAR", Self::CON_INTR_CHAR),
        ("RTC_TICKS_MS", Self::RTC_TICKS_MS),
        ("IO_TXR", Self::IO_TXR),
        ("IO_RXR", Self::IO_RXR),
    ];
}

const FLASH: MemoryRegion = MemoryRegion::new("flash", 0x0800_0000, 256 * KB, Perm::RX);
const SRAM: MemoryRegion = MemoryRegion::new("sram", 0x2000_0000, 64 * KB, Perm::RW);
const PERIPHERAL: MemoryRegion = MemoryRegion::new("peripheral", 0x4000_0000, 64 * KB, Perm::RW);
const RAM: MemoryRegion = MemoryRegion::new("ram", 0x6000_0000, 192 * KB, Perm::RW);
const SYSCALL_BUFFER: MemoryRegion =
    MemoryRegion::new("syscall_buffer", 0xE000_0000, 64 * KB, Perm::RW);

/// The fixed guest memory layout, in mapping order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressSpaceMap {
    regions: [MemoryRegion; 5],
}

impl AddressSpaceMap {
    pub const STANDARD: AddressSpaceMap = AddressSpaceMap {
        regions: [FLASH, SRAM, PERIPHERAL, RAM, SYSCALL_BUFFER],
    };

    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    /// Code region; the firmware image is loaded at its base.
    pub fn flash(&self) -> &MemoryRegion {
        &self.regions[0]
    }

    pub fn peripheral(&self) -> &MemoryRegion {
        &self.regions[2]
    }

    pub fn ram(&self) -> &MemoryRegion {
        &self.regions[3]
    }

    pub fn syscall_buffer(&self) -> &MemoryRegion {
        &self.regions[4]
    }

    pub fn region_containing(&self, address: u32, len: u32) -> Option<&MemoryRegion> {
        self.regions.iter().find(|r| r.contains(address, len))
    }

    /// Checks the layout invariants: regions are pairwise disjoint and every
    /// peripheral register lies inside the peripheral window.
    pub fn verify(&self) -> Result<(), LayoutError> {
        for (i, a) in self.regions.iter().enumerate() {
            for b in &self.regions[i + 1..] {
                if a.overlaps(b) {
                    return Err(LayoutError::Overlap {
                        first: a.name,
                        second: b.name,
                    });
                }
            }
        }
        for (name, address) in PeripheralAddress::ALL {
            if !self.peripheral().contains(address, 4) {
                return Err(LayoutError::RegisterOutsideWindow { name, address });
            }
        }
        Ok(())
    }
}

impl Default for AddressSpaceMap {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// A simple flat memory storage
#[derive(Debug, Clone)]
pub struct LinearMemory {
    pub data: Vec<u8>,
    pub base_addr: u32,
}

impl LinearMemory {
    pub fn new(size: usize, base_addr: u32) -> Self {
        Self {
            data: vec![0; size],
            base_addr,
        }
    }

    pub fn end(&self) -> u64 {
        self.base_addr as u64 + self.data.len() as u64
    }

    pub fn contains(&self, addr: u32, len: usize) -> bool {
        addr >= self.base_addr && addr as u64 + len as u64 <= self.end()
    }

    pub fn read(&self, addr: u32, buf: &mut [u8]) -> bool {
        if !self.contains(addr, buf.len()) {
            return false;
        }
        let offset = (addr - self.base_addr) as usize;
        buf.copy_from_slice(&self.data[offset..offset + buf.len()]);
        true
    }

    pub fn write(&mut self, addr: u32, bytes: &[u8]) -> bool {
        if !self.contains(addr, bytes.len()) {
            return false;
        }
        let offset = (addr - self.base_addr) as usize;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        true
    }
}
