//! IDENTIFY DEVICE: probing a (channel, device) slot and decoding the result.
//!
//! A successful IDENTIFY returns a 512-byte identification space. The layout
//! was originally defined as a region of 16-bit words, which is why the ASCII
//! fields (serial, firmware, model) come back with each pair of bytes
//! swapped and need fixing up after extraction.

use driver_interface::PortIo;

use crate::regs::{
    AtaCommand, AtaStatus, Channel,
    ATA_REG_COMMAND_STATUS, ATA_REG_DISK_SELECT, ATA_REG_LBA_HIGH, ATA_REG_LBA_LOW,
    ATA_REG_LBA_MID, ATA_REG_SECTOR_COUNT,
};
use crate::SECTOR_SIZE;

/// When the 28-bit sector count reads as this sentinel, the disk has more
/// sectors than LBA28 can address and the 48-bit count is the real one.
const LBA28_COUNT_SATURATED: u32 = 0x0FFF_FFFF;

/// The identification space returned by IDENTIFY DEVICE, overlaid at the
/// byte offsets this driver extracts. Fields between the interesting ones
/// are padding.
#[repr(C, packed)]
pub struct AtaIdentifyData {
    pub general_config: u16,
    _unused1: [u16; 9],
    /// ASCII, byte-swapped on the wire. Offset 20.
    pub serial_number: [u8; 10],
    _unused2: [u16; 8],
    /// ASCII, byte-swapped on the wire. Offset 46.
    pub firmware_revision: [u8; 8],
    /// ASCII, byte-swapped on the wire. Offset 54.
    pub model_number: [u8; 40],
    _unused3: [u16; 2],
    /// Bit 9: LBA supported. Bit 8: DMA supported. Offset 98.
    pub capabilities: u16,
    _unused4: [u16; 7],
    /// Current capacity in sectors. Offset 114.
    pub sector_capacity: u32,
    _unused5: u16,
    /// LBA28 addressable sector count. Offset 120.
    pub lba28_sector_count: u32,
    _unused6: [u16; 38],
    /// LBA48 addressable sector count. Offset 200.
    pub lba48_sector_count: u64,
    _unused7: [u16; 152],
}

impl AtaIdentifyData {
    /// Overlays the raw identification space and fixes up the byte order of
    /// the ASCII fields in place.
    pub fn from_raw(raw: [u8; SECTOR_SIZE]) -> AtaIdentifyData {
        let mut data: AtaIdentifyData = unsafe { core::mem::transmute(raw) };
        flip_bytes(&mut data.serial_number);
        flip_bytes(&mut data.firmware_revision);
        flip_bytes(&mut data.model_number);
        data
    }

    pub fn lba_supported(&self) -> bool {
        self.capabilities & (1 << 9) != 0
    }

    pub fn dma_supported(&self) -> bool {
        self.capabilities & (1 << 8) != 0
    }

    /// How many sectors this disk can address. Prefers the 48-bit count when
    /// the 28-bit one is saturated.
    pub fn addressable_sector_count(&self) -> u64 {
        let lba28 = self.lba28_sector_count;
        if lba28 == LBA28_COUNT_SATURATED {
            self.lba48_sector_count
        } else {
            lba28 as u64
        }
    }
}

/// Swaps each pair of bytes in place. Applying it twice is the identity,
/// so fields already fixed up must not pass through here again.
pub fn flip_bytes(bytes: &mut [u8]) {
    for pair in bytes.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
}

/// Issues IDENTIFY DEVICE to the `slave` (0 or 1) device on `channel` and
/// returns its raw identification space, or `None` if nothing usable
/// answered there.
///
/// Must only be called with channel interrupts masked; the whole exchange
/// is polled.
pub fn identify_device(
    ports: &dyn PortIo,
    channel: &Channel,
    slave: u8,
) -> Option<[u8; SECTOR_SIZE]> {
    channel.write_reg(ports, ATA_REG_DISK_SELECT, 0xA0 | (slave << 4));
    channel.delay_400ns(ports);

    channel.write_reg(ports, ATA_REG_SECTOR_COUNT, 0);
    channel.write_reg(ports, ATA_REG_LBA_LOW, 0);
    channel.write_reg(ports, ATA_REG_LBA_MID, 0);
    channel.write_reg(ports, ATA_REG_LBA_HIGH, 0);

    channel.write_reg(ports, ATA_REG_COMMAND_STATUS, AtaCommand::IdentifyDevice as u8);
    channel.delay_400ns(ports);

    // A floating bus reads as all zeroes: no device there at all.
    if channel.read_reg(ports, ATA_REG_COMMAND_STATUS) == 0 {
        debug!("channel {:#X} device {}: absent (wouldn't accept command)", channel.base_port, slave);
        return None;
    }

    if channel.wait_not_busy(ports).is_err() {
        return None;
    }
    if channel.read_altstatus(ports).intersects(AtaStatus::ERROR) {
        debug!("channel {:#X} device {}: absent (wouldn't identify)", channel.base_port, slave);
        return None;
    }

    // ATAPI devices signal themselves through LBA_MID/LBA_HIGH at this
    // point; this driver doesn't check for them. TODO: skip ATAPI devices
    // explicitly instead of letting the capability gate reject them.

    let mut raw = [0u8; SECTOR_SIZE];
    channel.pio_read(ports, &mut raw);
    Some(raw)
}
