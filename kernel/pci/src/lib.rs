//! PCI device descriptions, as handed to drivers by the host kernel.
//!
//! The kernel enumerates the PCI buses once at boot and passes drivers a list
//! of [`PciDevice`] records; no enumeration happens here. Drivers match on
//! class/subclass, read the BARs they care about, and use the
//! [`PciConfigAccess`] seam for the few config-space writes they need
//! (currently just the interrupt line register).

#![no_std]

#[macro_use] extern crate log;

use core::fmt;

// Offsets into the PCI configuration space.
// More info here: <http://wiki.osdev.org/PCI#PCI_Device_Structure>
pub const PCI_VENDOR_ID:        u16 = 0x0;
pub const PCI_DEVICE_ID:        u16 = 0x2;
pub const PCI_PROG_IF:          u16 = 0x9;
pub const PCI_SUBCLASS:         u16 = 0xA;
pub const PCI_CLASS:            u16 = 0xB;
pub const PCI_BAR0:             u16 = 0x10;
pub const PCI_INTERRUPT_LINE:   u16 = 0x3C;
pub const PCI_INTERRUPT_PIN:    u16 = 0x3D;

/// Class code for mass storage controllers.
pub const PCI_CLASS_MASS_STORAGE: u8 = 0x01;
/// Subclass code for IDE controllers within the mass storage class.
pub const PCI_SUBCLASS_IDE: u8 = 0x01;

/// To use an I/O-space BAR as a port number, the lowest 2 bits must be masked out.
pub const PCI_BAR_PORT_MASK: u16 = 0xFFFC;

/// The bus, slot, and function number locating a PCI device in the bus tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PciLocation {
    pub bus: u16,
    pub slot: u16,
    pub func: u16,
}

impl fmt::Display for PciLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        write!(f, "b{}.s{}.f{}", self.bus, self.slot, self.func)
    }
}

/// Information common to every type of PCI device, captured at enumeration time.
///
/// For a partial table of `class`, `subclass`, and `prog_if` codes, see
/// <http://wiki.osdev.org/PCI#Class_Codes>.
#[derive(Debug, Clone)]
pub struct PciDevice {
    /// Where this device sits in the bus tree.
    pub location: PciLocation,
    /// The class code, used to determine device type.
    pub class: u8,
    /// The subclass code, used to determine device type.
    pub subclass: u8,
    /// The programming interface of this PCI device.
    pub prog_if: u8,
    /// The six Base Address Registers (BARs).
    pub bars: [u32; 6],
    pub vendor_id: u16,
    pub device_id: u16,
    pub int_pin: u8,
    pub int_line: u8,
}

impl PciDevice {
    /// True if this device's primary IDE channel runs in PCI-native mode
    /// (prog_if bit 0), meaning BAR0/BAR1 carry its port bases.
    /// If false, the channel uses the legacy port assignments.
    pub fn primary_channel_native(&self) -> bool {
        self.prog_if & 0x01 != 0
    }

    /// True if this device's secondary IDE channel runs in PCI-native mode
    /// (prog_if bit 2), meaning BAR2/BAR3 carry its port bases.
    pub fn secondary_channel_native(&self) -> bool {
        self.prog_if & 0x04 != 0
    }

    /// Interprets the given BAR as an I/O port base, masking the flag bits.
    pub fn bar_port_base(&self, bar_index: usize) -> u16 {
        let bar = self.bars[bar_index];
        if bar > u16::MAX as u32 {
            warn!("PCI device {}: BAR{} {:#X} does not look like an I/O port base",
                self.location, bar_index, bar,
            );
        }
        bar as u16 & PCI_BAR_PORT_MASK
    }
}

/// Config-space writes the host kernel performs on a driver's behalf.
pub trait PciConfigAccess: Send + Sync {
    /// Writes the interrupt line register of the device at `location`,
    /// telling a native-mode device which IRQ to raise.
    fn write_interrupt_line(&self, location: PciLocation, irq: u8);
}
