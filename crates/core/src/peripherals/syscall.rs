use super::Bridge;
use crate::{EngineAccess, Fault, MemAccess, Reg};
use serde_json::Value;

/// Service selected by the immediate of the `SVC` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    /// Echo test: answers with 16, 32, 48, 64 in R0..R3.
    Ping,
    /// Request text at R0 (R1 bytes), answered through the syscall buffer.
    ApiCall,
    Unknown(u8),
}

impl From<u8> for Syscall {
    fn from(selector: u8) -> Self {
        match selector {
            0 => Syscall::Ping,
            1 => Syscall::ApiCall,
            other => Syscall::Unknown(other),
        }
    }
}

const PING_REPLY: [(Reg, u32); 4] = [(Reg::R0, 16), (Reg::R1, 32), (Reg::R2, 48), (Reg::R3, 64)];

impl Bridge<'_> {
    /// Handles `SVC`. The engine has already advanced PC past the instruction.
    pub(crate) fn software_interrupt(&mut self, uc: &mut dyn EngineAccess) {
        if let Err(fault) = self.dispatch(uc) {
            self.record(fault);
        }
        uc.emu_stop();
    }

    fn dispatch(&mut self, uc: &mut dyn EngineAccess) -> Result<(), Fault> {
        let pc = uc.reg_read(Reg::Pc);
        let mut selector = [0u8; 1];
        uc.mem_read(pc.wrapping_sub(2), &mut selector)?;
        let args = [Reg::R0, Reg::R1, Reg::R2, Reg::R3].map(|r| uc.reg_read(r));

        match Syscall::from(selector[0]) {
            Syscall::Ping => {
                tracing::info!(
                    "ping: {} {} {} {}",
                    args[0],
                    args[1],
                    args[2],
                    args[3]
                );
                for (reg, value) in PING_REPLY {
                    uc.reg_write(reg, value);
                }
                Ok(())
            }
            Syscall::ApiCall => {
                let (address, len) = (args[0], args[1]);
                if self.map().region_containing(address, len).is_none() {
                    return Err(Fault::UnmappedAccess {
                        access: MemAccess::Read,
                        address,
                        size: len as usize,
                    });
                }
                let mut request = vec![0u8; len as usize];
                uc.mem_read(address, &mut request)?;
                if self.state().write_to_stdout {
                    tracing::info!("API_REQ {}", String::from_utf8_lossy(&request));
                }
                self.respond(uc, &[Value::from("hello")])
            }
            Syscall::Unknown(selector) => Err(Fault::UnknownSyscall {
                selector,
                pc: pc.wrapping_sub(2),
            }),
        }
    }

    /// Writes `args` as a JSON array plus a NUL terminator at the base of the
    /// syscall buffer, then sets R0 to the base and R1 to the payload length.
    pub fn respond(&mut self, uc: &mut dyn EngineAccess, args: &[Value]) -> Result<(), Fault> {
        let payload = serde_json::to_vec(args)?;
        let buffer = *self.map().syscall_buffer();
        if payload.len() + 1 > buffer.size as usize {
            return Err(Fault::ResponseOverflow { len: payload.len() });
        }
        if self.state().write_to_stdout {
            tracing::info!("API_RES {}", String::from_utf8_lossy(&payload));
        }

        uc.mem_write(buffer.base, &payload)?;
        uc.mem_write(buffer.base + payload.len() as u32, &[0])?;
        uc.reg_write(Reg::R0, buffer.base);
        uc.reg_write(Reg::R1, payload.len() as u32);
        Ok(())
    }
}
