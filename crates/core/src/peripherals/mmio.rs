//! Console, tick and serial registers of the peripheral window.
//!
//! Read hooks run before the engine performs the load, so a handler answers
//! a read by storing the value at the register address.

use super::Bridge;
use crate::memory::PeripheralAddress;
use crate::EngineAccess;
use std::io::{self, Write};

impl Bridge<'_> {
    fn answer(&mut self, uc: &mut dyn EngineAccess, address: u32, value: u32) {
        if let Err(err) = uc.mem_write(address, &value.to_le_bytes()) {
            self.record(err.into());
        }
    }

    pub(crate) fn peripheral_read(&mut self, uc: &mut dyn EngineAccess, address: u32, size: usize) {
        match address {
            PeripheralAddress::CON_RAM_SIZE => {
                let ram_size = self.state().ram_size;
                self.answer(uc, address, ram_size);
            }
            PeripheralAddress::IO_RXR => {
                let byte = self.state_mut().input.pop_front().unwrap_or(0);
                self.answer(uc, address, byte as u32);
            }
            PeripheralAddress::RTC_TICKS_MS => {}
            _ => {
                if self.verbose() >= 1 {
                    tracing::info!("read {:#x} {}", address, size);
                }
            }
        }
    }

    pub(crate) fn peripheral_write(
        &mut self,
        _uc: &mut dyn EngineAccess,
        address: u32,
        size: usize,
        value: u32,
    ) {
        let verbose = self.verbose() >= 1;
        match address {
            PeripheralAddress::CON_PENDING => {
                if verbose {
                    tracing::info!("CONTROLLER_PENDING {}", value);
                }
            }
            PeripheralAddress::CON_EXCEPTION => {
                if verbose {
                    tracing::info!("CONTROLLER_EXCEPTION {}", value);
                }
            }
            PeripheralAddress::CON_INTR_CHAR => {
                if verbose {
                    tracing::info!("CONTROLLER_INTR_CHAR {}", value);
                }
            }
            PeripheralAddress::IO_TXR => {
                let byte = value as u8;
                let state = self.state_mut();
                state.output.push(byte);
                if state.write_to_stdout {
                    print!("{}", byte as char);
                    if let Err(err) = io::stdout().flush() {
                        tracing::warn!("failed to flush console output: {}", err);
                    }
                }
            }
            _ => {
                if verbose {
                    tracing::info!("write {:#x} {} {:#x}", address, size, value);
                }
            }
        }
    }
}
