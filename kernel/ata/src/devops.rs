//! The block device facade: named device handles over disks and partitions.
//!
//! Every registered device resolves to either a whole disk or one partition
//! of a disk. Reads take a block number relative to the device, rebase it to
//! an absolute LBA for partitions, and move data through the controller's
//! bounce buffer in chunks of at most 64 KiB.

use alloc::sync::Arc;
use core::slice;

use driver_interface::{DevError, UserBuffer};

use crate::request::{ActiveDevice, RequestError};
use crate::{AtaDisk, IdeController, BOUNCE_BUFFER_SECTORS, SECTOR_SIZE};

/// What a registered device name refers to.
///
/// The device topology is fixed once probing finishes, so handles hold plain
/// indices into their controller's disk list.
#[derive(Clone)]
pub enum DeviceHandle {
    WholeDisk {
        controller: Arc<IdeController>,
        disk: usize,
    },
    Partition {
        controller: Arc<IdeController>,
        disk: usize,
        partition: usize,
    },
}

impl DeviceHandle {
    /// Nothing to do: the device tree is static after probing and requests
    /// serialize on the controller's request slot, not on the open device.
    pub fn open(&self) -> Result<(), DevError> {
        Ok(())
    }

    /// See [`open`](Self::open).
    pub fn close(&self) -> Result<(), DevError> {
        Ok(())
    }

    /// Reads whole sectors from this device into the caller's buffer.
    ///
    /// `*nbyte` gives the requested byte count (truncated to whole sectors)
    /// and is updated to the bytes actually transferred, on failure as well,
    /// so short reads are visible to the caller.
    pub fn read(&self, buffer: UserBuffer, nbyte: &mut usize, blkno: i64) -> Result<(), DevError> {
        let (controller, disk, start_lba, sector_limit) = self.resolve()?;

        let sector_count = *nbyte / SECTOR_SIZE;
        // A read that would end exactly at the limit is rejected too.
        if blkno < 0 || blkno as u64 + sector_count as u64 >= sector_limit {
            return Err(DevError::Io);
        }

        let mapped = controller
            .services
            .memory
            .map_user_buffer(&UserBuffer { addr: buffer.addr, len: *nbyte })
            .ok_or(DevError::Fault)?;
        let kbuf = unsafe { slice::from_raw_parts_mut(mapped.as_ptr(), sector_count * SECTOR_SIZE) };

        let device = ActiveDevice { channel: disk.channel, slave: disk.slave };
        let mut lba = start_lba + blkno as u64;
        let mut remaining = sector_count;
        let mut transferred = 0usize;

        while remaining > 0 {
            let chunk_sectors = remaining.min(BOUNCE_BUFFER_SECTORS);
            let chunk_bytes = chunk_sectors * SECTOR_SIZE;

            if let Err(e) = controller.read_sectors(device, lba, chunk_sectors) {
                error!("{}: read error at lba {}: {:?}", disk.devname, lba, e);
                *nbyte = transferred;
                return Err(match e {
                    RequestError::Interrupted => DevError::Interrupted,
                    RequestError::Device(_) => DevError::Io,
                });
            }

            let bounce = unsafe { controller.bounce.slice(chunk_bytes) };
            kbuf[transferred..transferred + chunk_bytes].copy_from_slice(bounce);

            transferred += chunk_bytes;
            lba += chunk_sectors as u64;
            remaining -= chunk_sectors;
        }

        *nbyte = transferred;
        Ok(())
    }

    /// Writing is not implemented. TODO: write path, together with a
    /// flush-to-disk device control.
    pub fn write(&self, _buffer: UserBuffer, _nbyte: &mut usize, _blkno: i64) -> Result<(), DevError> {
        Err(DevError::InvalidOperation)
    }

    /// No device-specific controls are supported.
    pub fn ioctl(&self, _cmd: u32, _arg: usize) -> Result<(), DevError> {
        Err(DevError::InvalidOperation)
    }

    /// Resolves this handle to its disk, the LBA to add to device-relative
    /// block numbers, and the device's size limit in sectors.
    fn resolve(&self) -> Result<(&IdeController, &AtaDisk, u64, u64), DevError> {
        match self {
            DeviceHandle::WholeDisk { controller, disk } => {
                let disk = controller.disks().get(*disk).ok_or(DevError::Io)?;
                Ok((controller.as_ref(), disk, 0, disk.addressable_sector_count))
            }
            DeviceHandle::Partition { controller, disk, partition } => {
                let disk = controller.disks().get(*disk).ok_or(DevError::Io)?;
                let part = disk.partitions.get(*partition).ok_or(DevError::Io)?;
                Ok((controller.as_ref(), disk, part.start_lba as u64, part.sector_count as u64))
            }
        }
    }
}
