//! The per-controller request engine.
//!
//! Each controller has a single request slot: one in-flight command at a
//! time, no queue. A caller takes the slot, programs the LBA48 task file,
//! parks itself on the controller's completion event, and is woken by the
//! deferred interrupt work once the transfer has been drained into the
//! controller's bounce buffer.
//!
//! The interrupt side is split in two. The interrupt handler only reads the
//! alternate status register and decides whether the interrupt was ours; the
//! deferred work reads the real status register (which acknowledges the
//! interrupt), records success or failure, and performs the PIO data
//! transfer. The in-flight marker is cleared *before* the waiter is woken so
//! a woken caller can immediately reuse the slot.

use core::sync::atomic::Ordering;

use driver_interface::{IsrResult, SleepOutcome};

use crate::regs::{
    AtaCommand, AtaStatus,
    ATA_REG_COMMAND_STATUS, ATA_REG_DISK_SELECT, ATA_REG_ERR, ATA_REG_LBA_HIGH,
    ATA_REG_LBA_LOW, ATA_REG_LBA_MID, ATA_REG_SECTOR_COUNT,
};
use crate::{IdeController, BOUNCE_BUFFER_SECTORS, SECTOR_SIZE};

/// The command kind recorded in the request slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoCommand {
    None,
    Read,
    Write,
}

/// The single-slot I/O request packet owned by each controller.
pub(crate) struct Irp {
    pub cmd: IoCommand,
    /// Absolute LBA of the first sector.
    pub blkno: u64,
    /// Number of sectors in the transfer.
    pub blksz: usize,
    /// Diagnostic word recorded at completion; 0 means success, otherwise
    /// `0x80000000 | (status << 16) | error_register`.
    pub error: u32,
}

impl Irp {
    pub const fn idle() -> Irp {
        Irp { cmd: IoCommand::None, blkno: 0, blksz: 0, error: 0 }
    }
}

/// Which device a command has been issued to; present exactly while a
/// command is outstanding on the controller.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ActiveDevice {
    pub channel: usize,
    pub slave: u8,
}

/// Failures reported by the request engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    /// The device reported an error; the payload is the diagnostic word
    /// `0x80000000 | (status << 16) | error_register`.
    Device(u32),
    /// The caller's sleep was interrupted by a signal before completion.
    Interrupted,
}

/// Exclusive use of a controller's request slot.
///
/// Dropping the token frees the slot and wakes any thread waiting to take
/// it, so the slot is released on every exit path, including cancellation.
pub(crate) struct SlotToken<'c> {
    controller: &'c IdeController,
}

impl<'c> SlotToken<'c> {
    pub fn acquire(controller: &'c IdeController) -> SlotToken<'c> {
        while controller.slot_busy.swap(true, Ordering::Acquire) {
            // The holder wakes the completion event when it releases the
            // slot; an interrupted wait here just retries.
            controller.services.scheduler.sleep(controller.iocomp);
        }
        SlotToken { controller }
    }
}

impl<'c> Drop for SlotToken<'c> {
    fn drop(&mut self) {
        self.controller.slot_busy.store(false, Ordering::Release);
        self.controller.services.scheduler.wakeup(self.controller.iocomp);
    }
}

impl IdeController {
    /// Programs a READ SECTORS EXT command for `sectors` sectors at `lba`.
    ///
    /// LBA48 register loading is order-critical: the sector count and the
    /// three LBA registers are each written twice through a two-deep FIFO,
    /// high byte first, low byte second. The command byte goes last.
    ///
    /// Completion arrives as an interrupt unless channel interrupts are
    /// masked, in which case the caller must poll.
    fn setup_read(&self, device: ActiveDevice, lba: u64, sectors: usize) {
        let ports = &*self.services.ports;
        let channel = &self.channels[device.channel];

        *self.active.lock() = Some(device);

        channel.write_reg(ports, ATA_REG_DISK_SELECT, 0x40 | (device.slave << 4));

        channel.write_reg(ports, ATA_REG_SECTOR_COUNT, ((sectors >> 8) & 0xFF) as u8);
        channel.write_reg(ports, ATA_REG_LBA_LOW, ((lba >> 24) & 0xFF) as u8);
        channel.write_reg(ports, ATA_REG_LBA_MID, ((lba >> 32) & 0xFF) as u8);
        channel.write_reg(ports, ATA_REG_LBA_HIGH, ((lba >> 40) & 0xFF) as u8);
        channel.write_reg(ports, ATA_REG_SECTOR_COUNT, (sectors & 0xFF) as u8);
        channel.write_reg(ports, ATA_REG_LBA_LOW, (lba & 0xFF) as u8);
        channel.write_reg(ports, ATA_REG_LBA_MID, ((lba >> 8) & 0xFF) as u8);
        channel.write_reg(ports, ATA_REG_LBA_HIGH, ((lba >> 16) & 0xFF) as u8);
        channel.write_reg(ports, ATA_REG_COMMAND_STATUS, AtaCommand::ReadSectorsExt as u8);
    }

    /// Reads `sectors` sectors starting at `lba` into the controller's
    /// bounce buffer, sleeping until the device completes.
    ///
    /// On [`RequestError::Interrupted`] the hardware request is still in
    /// flight; the slot is freed for the next caller, who may observe stale
    /// DRQ until the late completion is retired by the deferred work.
    pub(crate) fn read_sectors(
        &self,
        device: ActiveDevice,
        lba: u64,
        sectors: usize,
    ) -> Result<(), RequestError> {
        assert!(sectors > 0 && sectors <= BOUNCE_BUFFER_SECTORS);

        let _slot = SlotToken::acquire(self);
        {
            let mut irp = self.irp.lock();
            irp.cmd = IoCommand::Read;
            irp.blkno = lba;
            irp.blksz = sectors;
            irp.error = 0;
        }

        let scheduler = &*self.services.scheduler;
        scheduler.lock();
        self.setup_read(device, lba, sectors);
        let outcome = scheduler.sleep(self.iocomp);
        let result = match outcome {
            SleepOutcome::Interrupted => Err(RequestError::Interrupted),
            SleepOutcome::Completed => {
                let error = self.irp.lock().error;
                if error == 0 {
                    Ok(())
                } else {
                    Err(RequestError::Device(error))
                }
            }
        };
        scheduler.unlock();
        result
    }

    /// Reads `sectors` sectors at `lba` into `buffer` by polling.
    ///
    /// Only usable while channel interrupts are masked, i.e. during probe.
    pub(crate) fn read_polled(
        &self,
        device: ActiveDevice,
        lba: u64,
        sectors: usize,
        buffer: &mut [u8],
    ) -> Result<(), &'static str> {
        debug_assert_eq!(buffer.len(), sectors * SECTOR_SIZE);

        let ports = &*self.services.ports;
        let channel = &self.channels[device.channel];

        self.setup_read(device, lba, sectors);
        // The command is retired on every path below; nothing stays in flight.
        if channel.wait_not_busy(ports).is_err() {
            *self.active.lock() = None;
            return Err("ATA channel stayed busy during polled read");
        }

        let status = channel.read_reg(ports, ATA_REG_COMMAND_STATUS);
        if status & (AtaStatus::ERROR | AtaStatus::DEVICE_FAILURE).bits() != 0 {
            let err = channel.read_reg(ports, ATA_REG_ERR);
            error!(
                "{}: polled read failed (lba {}, count {}): status {:#04X}, err {:#04X}",
                self.devname, lba, sectors, status, err,
            );
            *self.active.lock() = None;
            return Err("disk error during polled read");
        }

        channel.pio_read(ports, buffer);
        *self.active.lock() = None;
        Ok(())
    }

    /// Interrupt-context half of completion handling.
    ///
    /// Looks at the alternate status (no interrupt acknowledgment) and asks
    /// for the deferred work only when the device actually has something for
    /// us; anything else is a spurious or foreign interrupt.
    pub(crate) fn isr_check(&self) -> IsrResult {
        let active = match *self.active.lock() {
            Some(active) => active,
            None => return IsrResult::Ignored,
        };
        let status = self.channels[active.channel].read_altstatus(&*self.services.ports);
        if status.intersects(AtaStatus::DATA_REQUEST | AtaStatus::DEVICE_FAILURE | AtaStatus::ERROR) {
            IsrResult::Dispatch
        } else {
            IsrResult::Ignored
        }
    }

    /// Thread-context half of completion handling.
    ///
    /// Reads the status register (acknowledging the interrupt), records the
    /// outcome in the request slot, drains the data on success, and wakes
    /// the sleeping caller. The in-flight marker is cleared first: the woken
    /// caller may reuse the slot immediately.
    pub(crate) fn ist_complete(&self) {
        let active = match self.active.lock().take() {
            Some(active) => active,
            None => {
                trace!("{}: deferred completion with nothing in flight", self.devname);
                return;
            }
        };

        let ports = &*self.services.ports;
        let channel = &self.channels[active.channel];
        let status = channel.read_reg(ports, ATA_REG_COMMAND_STATUS);

        let mut irp = self.irp.lock();
        if status & (AtaStatus::ERROR | AtaStatus::DEVICE_FAILURE).bits() != 0 {
            let err = channel.read_reg(ports, ATA_REG_ERR);
            irp.error = 0x8000_0000 | ((status as u32) << 16) | err as u32;
            drop(irp);
            self.services.scheduler.wakeup(self.iocomp);
            return;
        }

        irp.error = 0;
        match irp.cmd {
            IoCommand::Read => {
                let byte_count = irp.blksz * SECTOR_SIZE;
                drop(irp);
                // The single-slot protocol guarantees nobody else touches the
                // bounce buffer until the caller we are about to wake reads it.
                let buffer = unsafe { self.bounce.slice_mut(byte_count) };
                channel.pio_read(ports, buffer);
            }
            IoCommand::Write | IoCommand::None => {
                error!("{}: completion interrupt but no read in flight", self.devname);
                irp.error = 0x8000_0000;
                drop(irp);
            }
        }
        self.services.scheduler.wakeup(self.iocomp);
    }
}
