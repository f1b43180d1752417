//! Parsing of master boot record (MBR) partition tables.
//!
//! The MBR is the first 512-byte sector of a disk. If the two bytes at offset
//! 510 hold the little-endian signature `0xAA55`, the four 16-byte entries
//! starting at offset `0x1BE` describe up to four primary partitions.
//!
//! Extended partitions are not followed; only the four primary slots are
//! reported.

#![no_std]

/// The size in bytes of one disk sector, and of the boot record itself.
pub const SECTOR_SIZE: usize = 512;

/// The partition-table signature expected at offset 510, little-endian.
pub const MBR_SIGNATURE: u16 = 0xAA55;

/// The number of primary partition slots in a boot record.
pub const MAX_PRIMARY_PARTITIONS: usize = 4;

/// Byte offset of the first partition table entry.
const TABLE_OFFSET: usize = 0x1BE;
/// Size in bytes of one partition table entry.
const ENTRY_SIZE: usize = 16;

/// One primary partition slot, as recorded on disk.
///
/// The CHS address fields of the on-disk entry are skipped; this driver
/// addresses disks by LBA only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionEntry {
    /// Bit 7 set means the slot is marked bootable. Informational only.
    pub flags: u8,
    /// The partition type from the table (e.g. 0x83 for Linux).
    pub system_id: u8,
    /// First sector of the partition, as an absolute LBA on the disk.
    pub start_lba: u32,
    /// Total number of sectors in the partition.
    pub sector_count: u32,
}

/// Parses the partition table out of `sector0`.
///
/// Returns `None` if the sector does not carry the `0xAA55` signature.
/// Otherwise returns all four primary slots in table order; a slot is `None`
/// when any of its start LBA, sector count, or system id is zero, meaning
/// nothing is allocated there.
pub fn parse_partition_table(
    sector0: &[u8; SECTOR_SIZE],
) -> Option<[Option<PartitionEntry>; MAX_PRIMARY_PARTITIONS]> {
    let signature = u16::from_le_bytes([sector0[SECTOR_SIZE - 2], sector0[SECTOR_SIZE - 1]]);
    if signature != MBR_SIGNATURE {
        return None;
    }

    let mut entries = [None; MAX_PRIMARY_PARTITIONS];
    for (slot, entry) in entries.iter_mut().enumerate() {
        let e = &sector0[TABLE_OFFSET + slot * ENTRY_SIZE..][..ENTRY_SIZE];
        // Entry layout: flags, start CHS (3 bytes), system id, end CHS (3 bytes),
        // start LBA (u32 LE), sector count (u32 LE).
        let flags = e[0];
        let system_id = e[4];
        let start_lba = u32::from_le_bytes([e[8], e[9], e[10], e[11]]);
        let sector_count = u32::from_le_bytes([e[12], e[13], e[14], e[15]]);

        if start_lba == 0 || sector_count == 0 || system_id == 0 {
            continue;
        }

        *entry = Some(PartitionEntry { flags, system_id, start_lba, sector_count });
    }

    Some(entries)
}
