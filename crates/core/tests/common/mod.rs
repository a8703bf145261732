#![allow(dead_code)]

use thumbhost_core::FirmwareImage;

pub const FLASH_BASE: u32 = 0x0800_0000;
/// First instruction, right after the two-word vector table.
pub const ENTRY: u32 = FLASH_BASE + 8;
pub const STACK_TOP: u32 = 0x2001_0000;

/// Thumb-1 encoders for the handful of instructions the tests need.
pub mod op {
    pub const B_SELF: u16 = 0xE7FE;
    pub const BX_LR: u16 = 0x4770;
    pub const NOP: u16 = 0xBF00;

    pub fn movs(rd: u8, imm: u8) -> u16 {
        0x2000 | (rd as u16) << 8 | imm as u16
    }

    pub fn svc(imm: u8) -> u16 {
        0xDF00 | imm as u16
    }

    /// LDR rt, [rn, #imm]
    pub fn ldr(rt: u8, rn: u8, imm: u8) -> u16 {
        0x6800 | ((imm as u16 / 4) << 6) | (rn as u16) << 3 | rt as u16
    }

    /// STR rt, [rn, #imm]
    pub fn str(rt: u8, rn: u8, imm: u8) -> u16 {
        0x6000 | ((imm as u16 / 4) << 6) | (rn as u16) << 3 | rt as u16
    }

    /// LSLS rd, rm, #imm
    pub fn lsls(rd: u8, rm: u8, imm: u8) -> u16 {
        (imm as u16) << 6 | (rm as u16) << 3 | rd as u16
    }

    /// BL from `from` to `to`, as (first, second) halfword.
    pub fn bl(from: u32, to: u32) -> [u16; 2] {
        let offset = to.wrapping_sub(from.wrapping_add(4));
        let s = (offset >> 24) & 1;
        let i1 = (offset >> 23) & 1;
        let i2 = (offset >> 22) & 1;
        let j1 = !(i1 ^ s) & 1;
        let j2 = !(i2 ^ s) & 1;
        let imm10 = (offset >> 12) & 0x3FF;
        let imm11 = (offset >> 1) & 0x7FF;
        [
            (0xF000 | s << 10 | imm10) as u16,
            (0xD000 | j1 << 13 | j2 << 11 | imm11) as u16,
        ]
    }
}

/// Assembles a flat image: vector table, code at `ENTRY`, then a literal pool.
#[derive(Debug, Default)]
pub struct ImageBuilder {
    code: Vec<u16>,
    literals: Vec<(usize, u8, u32)>,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Address of the next emitted instruction.
    pub fn here(&self) -> u32 {
        ENTRY + 2 * self.code.len() as u32
    }

    pub fn op(&mut self, hw: u16) -> &mut Self {
        self.code.push(hw);
        self
    }

    pub fn ops(&mut self, hws: &[u16]) -> &mut Self {
        self.code.extend_from_slice(hws);
        self
    }

    pub fn bl(&mut self, target: u32) -> &mut Self {
        let pair = op::bl(self.here(), target);
        self.ops(&pair)
    }

    /// LDR rt, =value
    pub fn ldr_const(&mut self, rt: u8, value: u32) -> &mut Self {
        self.literals.push((self.code.len(), rt, value));
        self.op(0x4800 | (rt as u16) << 8)
    }

    pub fn build(&self) -> Vec<u8> {
        let end = self.here();
        let pool = (end + 3) & !3;

        let mut code = self.code.clone();
        for (k, (index, rt, _)) in self.literals.iter().enumerate() {
            let pc = ENTRY + 2 * *index as u32;
            let literal = pool + 4 * k as u32;
            let imm = (literal - ((pc + 4) & !3)) / 4;
            assert!(imm <= 0xFF, "literal out of range");
            code[*index] = 0x4800 | (*rt as u16) << 8 | imm as u16;
        }

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&STACK_TOP.to_le_bytes());
        bytes.extend_from_slice(&(ENTRY | 1).to_le_bytes());
        for hw in code {
            bytes.extend_from_slice(&hw.to_le_bytes());
        }
        bytes.resize((pool - FLASH_BASE) as usize, 0);
        for (_, _, value) in &self.literals {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    pub fn firmware(&self) -> FirmwareImage {
        FirmwareImage::from_bytes(self.build())
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
