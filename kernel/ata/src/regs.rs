//! The ATA register file: offsets, status/control bits, and typed channel access.
//!
//! Each IDE channel exposes a command block of eight registers at
//! `base_port + offset` plus a control/altstatus register at its own port.
//! Reading the alternate status does not acknowledge interrupts, which makes
//! it the right register for polling; reading the command-block status
//! register does acknowledge them.

use driver_interface::PortIo;

/// Legacy (compatibility-mode) command block base of the primary channel.
pub const ATA_LEGACY_PRIMARY_COMMAND_BASE: u16 = 0x1F0;
/// Legacy (compatibility-mode) command block base of the secondary channel.
pub const ATA_LEGACY_SECONDARY_COMMAND_BASE: u16 = 0x170;
/// In legacy mode, the control/altstatus register sits at this offset above
/// the command block base. In PCI-native mode it comes from a BAR instead.
pub const ATA_LEGACY_CONTROL_ALTSTATUS_OFFSET: u16 = 0x206;

// Offsets of the command-block registers, relative to a channel's base port.
pub const ATA_REG_DATA: u16 = 0;
pub const ATA_REG_ERR: u16 = 1;
pub const ATA_REG_SECTOR_COUNT: u16 = 2;
pub const ATA_REG_LBA_LOW: u16 = 3;
pub const ATA_REG_LBA_MID: u16 = 4;
pub const ATA_REG_LBA_HIGH: u16 = 5;
pub const ATA_REG_DISK_SELECT: u16 = 6;
pub const ATA_REG_COMMAND_STATUS: u16 = 7;

/// How many altstatus polls `wait_not_busy` performs before giving up.
const BUSY_WAIT_LIMIT: u32 = 0x8000_0000;

bitflags! {
    /// The status bits this driver cares about. The status byte carries more,
    /// but these are the ones the protocol below depends on.
    pub struct AtaStatus: u8 {
        const ERROR          = 0x01;
        const DATA_REQUEST   = 0x08;
        const DEVICE_FAILURE = 0x20;
        const BUSY           = 0x80;
    }
}

bitflags! {
    /// Values written to a channel's device control register.
    pub struct AtaControl: u8 {
        /// nIEN: suppress interrupts from this channel while set.
        const NO_INTERRUPTS = 0x02;
        /// Software reset of both devices on the channel. Unused here.
        const SOFT_RESET    = 0x04;
    }
}

/// The commands this driver issues.
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum AtaCommand {
    /// READ SECTORS EXT: LBA48 PIO read.
    ReadSectorsExt = 0x24,
    /// IDENTIFY DEVICE: returns the 512-byte identification space.
    IdentifyDevice = 0xEC,
}

/// One of the two channels within an IDE controller.
///
/// Each channel can carry up to two devices (master and slave), selected
/// through the disk-select register; the ports are shared.
#[derive(Debug, Clone, Copy)]
pub struct Channel {
    pub base_port: u16,
    pub control_port: u16,
    /// Bus-master DMA block for this channel, from BAR4. No DMA transfer
    /// path exists yet; kept because device admission already requires
    /// DMA-capable disks.
    pub dma_port: u16,
}

impl Channel {
    /// Writes a command-block register.
    pub fn write_reg(&self, ports: &dyn PortIo, reg: u16, value: u8) {
        ports.write_u8(self.base_port + reg, value);
    }

    /// Reads a command-block register.
    ///
    /// Reading `ATA_REG_COMMAND_STATUS` acknowledges a pending interrupt;
    /// use [`read_altstatus`](Self::read_altstatus) when polling.
    pub fn read_reg(&self, ports: &dyn PortIo, reg: u16) -> u8 {
        ports.read_u8(self.base_port + reg)
    }

    /// Writes the device control register.
    pub fn write_control(&self, ports: &dyn PortIo, value: AtaControl) {
        ports.write_u8(self.control_port, value.bits());
    }

    /// Reads the alternate status register, without side effects on interrupts.
    pub fn read_altstatus(&self, ports: &dyn PortIo) -> AtaStatus {
        AtaStatus::from_bits_truncate(ports.read_u8(self.control_port))
    }

    /// Reads 32 bits from the data register.
    pub fn read_data32(&self, ports: &dyn PortIo) -> u32 {
        ports.read_u32(self.base_port + ATA_REG_DATA)
    }

    /// Waits roughly 400 ns by reading the alternate status four times,
    /// giving the device time to latch a command or a new disk selection.
    pub fn delay_400ns(&self, ports: &dyn PortIo) {
        for _ in 0..4 {
            ports.read_u8(self.control_port);
        }
    }

    /// Polls the alternate status until the BUSY bit clears.
    ///
    /// Gives up after a very large fixed number of polls. No reset is
    /// attempted on timeout; the error is reported to the caller.
    pub fn wait_not_busy(&self, ports: &dyn PortIo) -> Result<(), &'static str> {
        self.delay_400ns(ports);
        for _ in 0..BUSY_WAIT_LIMIT {
            if !self.read_altstatus(ports).intersects(AtaStatus::BUSY) {
                return Ok(());
            }
        }
        error!("channel at {:#X}: busy never cleared", self.base_port);
        Err("ATA channel stayed busy")
    }

    /// Drains `buffer.len()` bytes from the data register using 32-bit reads.
    /// The length must be a multiple of 4.
    pub fn pio_read(&self, ports: &dyn PortIo, buffer: &mut [u8]) {
        debug_assert!(buffer.len() % 4 == 0);
        for chunk in buffer.chunks_exact_mut(4) {
            let v = self.read_data32(ports);
            chunk[0] = v as u8;
            chunk[1] = (v >> 8) as u8;
            chunk[2] = (v >> 16) as u8;
            chunk[3] = (v >> 24) as u8;
        }
    }
}
