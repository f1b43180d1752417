//! Real I/O port access for x86_64, backing the [`PortIo`] trait.

use x86_64::instructions::port::Port;

use crate::PortIo;

/// The machine's actual I/O port space.
///
/// Stateless; every access constructs the port wrapper anew, since port
/// numbers here are computed at runtime from PCI BARs.
pub struct PortSpace;

impl PortIo for PortSpace {
    fn read_u8(&self, port: u16) -> u8 {
        unsafe { Port::<u8>::new(port).read() }
    }

    fn write_u8(&self, port: u16, value: u8) {
        unsafe { Port::<u8>::new(port).write(value) }
    }

    fn read_u32(&self, port: u16) -> u32 {
        unsafe { Port::<u32>::new(port).read() }
    }
}
