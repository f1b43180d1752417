//! Support for ATA disks behind PCI IDE controllers.
//!
//! For every IDE-class controller on the PCI bus, this driver identifies the
//! disks on the controller's two channels, reads each disk's MBR partition
//! table, and registers a named block device for every whole disk
//! (`hd<N>d<K>`) and every primary partition (`hd<N>d<K>p<PP>`). Reads are
//! serviced with LBA48 READ SECTORS EXT commands over programmed I/O,
//! completion-driven by the controller's interrupt.
//!
//! The driver talks to the rest of the system exclusively through the
//! `driver_interface` traits, so everything below the facade can be run
//! against a scripted controller in tests.
//!
//! Much of the register-level protocol was worked out from wiki.osdev.org
//! and the T13 ATA/ATA8-ACS drafts.

#![no_std]

#![allow(dead_code)] // to suppress warnings for fields kept for parity with the on-disk formats

#[macro_use] extern crate log;
#[macro_use] extern crate bitflags;
extern crate alloc;
extern crate spin;

pub mod regs;
mod identify;
mod request;
mod devops;


use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ptr::NonNull;
use core::slice;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use spin::{Mutex, Once};

use driver_interface::{
    DeviceFlags, DeviceId, DeviceRegistry, EventId, InterruptHandler, InterruptRegistrar,
    IrqHandle, IsrResult, MemoryServices, PortIo, Scheduler,
};
use pci::{PciConfigAccess, PciDevice, PciLocation};

pub use devops::DeviceHandle;
pub use identify::AtaIdentifyData;
pub use regs::{AtaControl, AtaStatus, Channel};

use request::{ActiveDevice, Irp};

/// The size in bytes of one disk sector.
pub const SECTOR_SIZE: usize = 512;

/// Individual transfers are staged through a bounce buffer of this many
/// bytes, so a single command moves at most this much data.
/// TODO: obsolete once requests are queued and DMA'd straight into the
/// caller's pages.
pub const BOUNCE_BUFFER_LENGTH: usize = 65536;

/// The largest sector count a single command may carry.
pub const BOUNCE_BUFFER_SECTORS: usize = BOUNCE_BUFFER_LENGTH / SECTOR_SIZE;

/// The IRQ line claimed for IDE controllers. Legacy-mode secondary
/// controllers would want IRQ 15; with a single line per driver they are
/// not supported, and the line is never shared.
pub const HDC_IRQ: u8 = 14;

/// How many device slots a controller has: two channels times master/slave.
const DEVICES_PER_CONTROLLER: u8 = 4;

/// Process-wide allocator for the `hd<N>` controller suffix. Never reset.
static NEXT_CONTROLLER_INDEX: AtomicUsize = AtomicUsize::new(0);

/// The host-kernel services this driver runs against.
///
/// Handed in once at init; every controller keeps its own clone.
#[derive(Clone)]
pub struct DriverServices {
    pub ports: Arc<dyn PortIo>,
    pub scheduler: Arc<dyn Scheduler>,
    pub interrupts: Arc<dyn InterruptRegistrar>,
    pub memory: Arc<dyn MemoryServices>,
    pub devices: Arc<dyn DeviceRegistry>,
    pub pci_config: Arc<dyn PciConfigAccess>,
}

/// One primary partition on a disk.
pub struct AtaPartition {
    /// Registered name, `hd<N>d<K>p<PP>`.
    pub devname: String,
    pub device: DeviceId,
    /// Partition type from the table.
    pub system_id: u8,
    /// First sector, absolute on the disk.
    pub start_lba: u32,
    /// Size in sectors.
    pub sector_count: u32,
}

/// A disk that answered IDENTIFY on some controller channel.
pub struct AtaDisk {
    /// Registered name, `hd<N>d<K>` with K = channel * 2 + slave.
    pub devname: String,
    pub device: DeviceId,
    channel: usize,
    slave: u8,
    /// The raw identification space, as returned by the device.
    pub identification_space: [u8; SECTOR_SIZE],
    /// ASCII fields extracted from the identification space, byte order
    /// already fixed up.
    pub serial_number: [u8; 10],
    pub firmware_revision: [u8; 8],
    pub model: [u8; 40],
    pub lba_supported: bool,
    pub dma_supported: bool,
    pub sector_capacity: u32,
    /// Total sectors this disk can address (LBA48-aware).
    pub addressable_sector_count: u64,
    pub partitions: Vec<AtaPartition>,
}

impl AtaDisk {
    /// The disk's slot on its controller: channel * 2 + slave.
    pub fn device_number(&self) -> u8 {
        (self.channel as u8) << 1 | self.slave
    }
}

/// The 64 KiB staging buffer between the data port and callers' buffers.
///
/// Allocated physically contiguous so a future DMA path can reuse it.
/// Access is exclusive by protocol: only the holder of the request slot
/// (or the deferred interrupt work finishing that holder's request)
/// touches it.
struct BounceBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

unsafe impl Send for BounceBuffer {}
unsafe impl Sync for BounceBuffer {}

impl BounceBuffer {
    fn new(memory: &dyn MemoryServices) -> Result<BounceBuffer, &'static str> {
        let ptr = memory.alloc_contiguous(BOUNCE_BUFFER_LENGTH)?;
        Ok(BounceBuffer { ptr, len: BOUNCE_BUFFER_LENGTH })
    }

    /// Safety: caller must hold the controller's request slot.
    unsafe fn slice(&self, len: usize) -> &[u8] {
        assert!(len <= self.len);
        slice::from_raw_parts(self.ptr.as_ptr(), len)
    }

    /// Safety: caller must hold the controller's request slot, or be the
    /// deferred interrupt work completing the slot holder's request.
    unsafe fn slice_mut(&self, len: usize) -> &mut [u8] {
        assert!(len <= self.len);
        slice::from_raw_parts_mut(self.ptr.as_ptr(), len)
    }
}

/// A single PCI IDE controller: two channels, up to four disks, and one
/// in-flight request.
pub struct IdeController {
    /// Name used for the `hd<N>` device name prefix and for diagnostics.
    devname: String,
    location: PciLocation,
    channels: [Channel; 2],
    services: DriverServices,
    /// Completion event callers park on while a command is in flight.
    iocomp: EventId,
    irq: Once<IrqHandle>,
    /// Whether some caller currently owns the request slot.
    slot_busy: AtomicBool,
    /// The single-slot request packet.
    irp: Mutex<Irp>,
    /// The device a command has been issued to; `Some` exactly while a
    /// command is outstanding.
    active: Mutex<Option<ActiveDevice>>,
    bounce: BounceBuffer,
    /// All disks that identified on this controller. Sealed when probing
    /// finishes; read-only afterwards.
    disks: Once<Vec<AtaDisk>>,
}

impl IdeController {
    /// Brings up the IDE controller described by `pci_dev`: resolves its
    /// channel ports, claims the IRQ, probes all four device slots, scans
    /// partition tables, and registers a block device for everything found.
    ///
    /// Returns the controller and the (device id, handle) pair of every
    /// device registered for it.
    pub fn new(
        services: &DriverServices,
        pci_dev: &PciDevice,
    ) -> Result<(Arc<IdeController>, Vec<(DeviceId, DeviceHandle)>), &'static str> {
        let index = NEXT_CONTROLLER_INDEX.fetch_add(1, Ordering::Relaxed);
        let devname = format!("hd{}", index);
        info!("device {} = {}", pci_dev.location, devname);

        let primary_native = pci_dev.primary_channel_native();
        let secondary_native = pci_dev.secondary_channel_native();

        let primary = if primary_native {
            Channel {
                base_port: pci_dev.bar_port_base(0),
                control_port: pci_dev.bar_port_base(1) + 2,
                dma_port: 0,
            }
        } else {
            Channel {
                base_port: regs::ATA_LEGACY_PRIMARY_COMMAND_BASE,
                control_port: regs::ATA_LEGACY_PRIMARY_COMMAND_BASE
                    + regs::ATA_LEGACY_CONTROL_ALTSTATUS_OFFSET,
                dma_port: 0,
            }
        };
        let secondary = if secondary_native {
            Channel {
                base_port: pci_dev.bar_port_base(2),
                control_port: pci_dev.bar_port_base(3) + 2,
                dma_port: 0,
            }
        } else {
            Channel {
                base_port: regs::ATA_LEGACY_SECONDARY_COMMAND_BASE,
                control_port: regs::ATA_LEGACY_SECONDARY_COMMAND_BASE
                    + regs::ATA_LEGACY_CONTROL_ALTSTATUS_OFFSET,
                dma_port: 0,
            }
        };

        // BAR4 is a 16-byte block of port space: low 8 bytes for the
        // primary channel's bus-master registers, high 8 for the secondary.
        let dma_base = pci_dev.bar_port_base(4);
        let channels = [
            Channel { dma_port: dma_base, ..primary },
            Channel { dma_port: dma_base + 8, ..secondary },
        ];

        let bounce = BounceBuffer::new(&*services.memory)?;
        let iocomp = services.scheduler.event_create(&devname);

        let controller = Arc::new(IdeController {
            devname,
            location: pci_dev.location,
            channels,
            services: services.clone(),
            iocomp,
            irq: Once::new(),
            slot_busy: AtomicBool::new(false),
            irp: Mutex::new(Irp::idle()),
            active: Mutex::new(None),
            bounce,
            disks: Once::new(),
        });

        let irq = services.interrupts.attach(HDC_IRQ, controller.clone())?;
        controller.irq.call_once(|| irq);

        if primary_native || secondary_native {
            // A native-mode controller must be told which IRQ to raise.
            services.pci_config.write_interrupt_line(pci_dev.location, HDC_IRQ);
        }

        info!(
            "{}: pri {:#06X}/{:#06X}/{:#06X}, sec {:#06X}/{:#06X}/{:#06X}",
            controller.devname,
            controller.channels[0].base_port,
            controller.channels[0].control_port,
            controller.channels[0].dma_port,
            controller.channels[1].base_port,
            controller.channels[1].control_port,
            controller.channels[1].dma_port,
        );

        // Probing is fully polled; keep the channels quiet meanwhile.
        let ports = &*controller.services.ports;
        for channel in &controller.channels {
            channel.write_control(ports, AtaControl::NO_INTERRUPTS);
        }

        let mut disks = Vec::new();
        let mut handles = Vec::new();
        for disknum in 0..DEVICES_PER_CONTROLLER {
            if let Some(disk) = Self::setup_disk(&controller, disknum, disks.len(), &mut handles) {
                disks.push(disk);
            }
        }
        controller.disks.call_once(|| disks);

        for channel in &controller.channels {
            channel.write_control(ports, AtaControl::empty());
        }

        Ok((controller, handles))
    }

    /// Probes device slot `disknum` (channel * 2 + slave). On success the
    /// disk and its partitions are registered as block devices, with their
    /// handles appended to `handles`; `disk_index` is the index the caller
    /// will store the returned disk at.
    fn setup_disk(
        controller: &Arc<IdeController>,
        disknum: u8,
        disk_index: usize,
        handles: &mut Vec<(DeviceId, DeviceHandle)>,
    ) -> Option<AtaDisk> {
        let channel = (disknum >> 1) as usize;
        let slave = disknum & 1;
        let ports = &*controller.services.ports;

        let raw = identify::identify_device(ports, &controller.channels[channel], slave)?;
        let data = AtaIdentifyData::from_raw(raw);

        if !data.lba_supported() {
            info!("{}: disk {} doesn't support LBA, skipping", controller.devname, disknum);
            return None;
        }
        if !data.dma_supported() {
            info!("{}: disk {} doesn't support DMA, skipping", controller.devname, disknum);
            return None;
        }

        let devname = format!("{}d{}", controller.devname, disknum);
        let device = match controller.services.devices.create_device(
            &devname,
            DeviceFlags::BLOCK | DeviceFlags::PROTECTED,
        ) {
            Ok(device) => device,
            Err(e) => {
                error!("{}: couldn't register {}: {}", controller.devname, devname, e);
                return None;
            }
        };

        let sector_capacity = data.sector_capacity;
        let mut disk = AtaDisk {
            devname,
            device,
            channel,
            slave,
            identification_space: raw,
            serial_number: data.serial_number,
            firmware_revision: data.firmware_revision,
            model: data.model_number,
            lba_supported: true,
            dma_supported: true,
            sector_capacity,
            addressable_sector_count: data.addressable_sector_count(),
            partitions: Vec::new(),
        };

        info!(
            "{}: model {:?}, serial {:?}, firmware {:?}, {} sectors",
            disk.devname,
            ascii_field(&disk.model),
            ascii_field(&disk.serial_number),
            ascii_field(&disk.firmware_revision),
            disk.addressable_sector_count,
        );

        handles.push((
            device,
            DeviceHandle::WholeDisk { controller: controller.clone(), disk: disk_index },
        ));

        Self::scan_partitions(controller, &mut disk, disk_index, handles);
        Some(disk)
    }

    /// Reads sector 0 of `disk` and registers a block device per allocated
    /// primary partition slot. Extended partition tables are not followed.
    fn scan_partitions(
        controller: &Arc<IdeController>,
        disk: &mut AtaDisk,
        disk_index: usize,
        handles: &mut Vec<(DeviceId, DeviceHandle)>,
    ) {
        let device = ActiveDevice { channel: disk.channel, slave: disk.slave };
        let mut sector0 = [0u8; SECTOR_SIZE];
        if let Err(e) = controller.read_polled(device, 0, 1, &mut sector0) {
            warn!("{}: couldn't read partition table: {}", disk.devname, e);
            return;
        }

        let table = match mbr::parse_partition_table(&sector0) {
            Some(table) => table,
            None => {
                debug!("{}: no MBR signature", disk.devname);
                return;
            }
        };

        for (slot, entry) in table.iter().enumerate() {
            let entry = match entry {
                Some(entry) => entry,
                None => continue,
            };
            // The table entry is not checked against the disk's
            // addressable_sector_count here.
            let devname = format!("{}p{:02}", disk.devname, slot);
            let part_device = match controller.services.devices.create_device(
                &devname,
                DeviceFlags::BLOCK | DeviceFlags::PROTECTED,
            ) {
                Ok(part_device) => part_device,
                Err(e) => {
                    error!("{}: couldn't register {}: {}", controller.devname, devname, e);
                    continue;
                }
            };

            info!(
                " - partition {}, type {:#04X}, start {:#010X}, size {:#010X}",
                devname, entry.system_id, entry.start_lba, entry.sector_count,
            );

            handles.push((
                part_device,
                DeviceHandle::Partition {
                    controller: controller.clone(),
                    disk: disk_index,
                    partition: disk.partitions.len(),
                },
            ));
            disk.partitions.push(AtaPartition {
                devname,
                device: part_device,
                system_id: entry.system_id,
                start_lba: entry.start_lba,
                sector_count: entry.sector_count,
            });
        }
    }

    /// The controller's `hd<N>` name.
    pub fn devname(&self) -> &str {
        &self.devname
    }

    /// Where this controller sits on the PCI bus.
    pub fn location(&self) -> PciLocation {
        self.location
    }

    /// All disks that identified on this controller. Empty until probing
    /// has finished.
    pub fn disks(&self) -> &[AtaDisk] {
        self.disks.get().map(|disks| disks.as_slice()).unwrap_or(&[])
    }
}

impl InterruptHandler for IdeController {
    fn handle_interrupt(&self) -> IsrResult {
        self.isr_check()
    }

    fn run_deferred(&self) {
        self.ist_complete()
    }
}

/// Renders a fixed-width ASCII identify field for logging.
fn ascii_field(bytes: &[u8]) -> &str {
    core::str::from_utf8(bytes).unwrap_or("<non-ascii>").trim_end()
}
