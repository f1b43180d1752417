//! Manages and handles initialization of all storage controllers in the
//! system, and dispatches the kernel's device operations to them.
//!
//! [`init`] walks the host kernel's pre-enumerated PCI device list and
//! brings up a controller for every IDE-class storage function it finds.
//! Each controller registers its disks and partitions with the kernel's
//! device registry during setup; the registry then calls back into the
//! `device_*` functions below with the `DeviceId` it handed out, and those
//! look up the matching block device handle.

#![no_std]

extern crate alloc;
#[macro_use] extern crate log;
#[macro_use] extern crate lazy_static;
extern crate spin;

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use ata::{DeviceHandle, DriverServices, IdeController};
use driver_interface::{DevError, DeviceId, UserBuffer};
use pci::{PciDevice, PCI_CLASS_MASS_STORAGE, PCI_SUBCLASS_IDE};

lazy_static! {
    /// All initialized storage controllers in the system.
    pub static ref STORAGE_CONTROLLERS: Mutex<Vec<Arc<IdeController>>> = Mutex::new(Vec::new());

    /// Every block device registered by a controller, by the id the device
    /// registry handed out for it.
    static ref DEVICE_HANDLES: Mutex<BTreeMap<DeviceId, DeviceHandle>> = Mutex::new(BTreeMap::new());
}

/// Initializes a controller for every supported storage device in
/// `pci_devices`. Returns how many controllers came up; a controller that
/// fails to initialize is logged and skipped.
pub fn init(services: &DriverServices, pci_devices: &[PciDevice]) -> usize {
    let mut count = 0;
    for pci_device in pci_devices {
        match init_device(services, pci_device) {
            Ok(true) => count += 1,
            Ok(false) => {}
            Err(e) => error!("storage device at {} failed to initialize: {}", pci_device.location, e),
        }
    }
    count
}

/// Attempts to handle the given `PciDevice` if it is a recognized storage
/// controller.
///
/// Returns `Ok(true)` if a controller was brought up, `Ok(false)` if the
/// device isn't a supported storage controller, and an error upon failure.
pub fn init_device(services: &DriverServices, pci_device: &PciDevice) -> Result<bool, &'static str> {
    // Only IDE controllers for ATA drives (aka PATA) are supported.
    if pci_device.class != PCI_CLASS_MASS_STORAGE || pci_device.subclass != PCI_SUBCLASS_IDE {
        return Ok(false);
    }

    info!("IDE controller PCI device found at {}", pci_device.location);
    let (controller, handles) = IdeController::new(services, pci_device)?;
    DEVICE_HANDLES.lock().extend(handles);
    STORAGE_CONTROLLERS.lock().push(controller);
    Ok(true)
}

fn handle_of(device: DeviceId) -> Result<DeviceHandle, DevError> {
    match DEVICE_HANDLES.lock().get(&device) {
        Some(handle) => Ok(handle.clone()),
        None => {
            error!("device operation on unknown device id {:?}", device);
            Err(DevError::Io)
        }
    }
}

/// Opens a registered block device. The topology is fixed after probe, so
/// this only validates the id.
pub fn device_open(device: DeviceId, _mode: u32) -> Result<(), DevError> {
    handle_of(device)?.open()
}

/// Closes a registered block device.
pub fn device_close(device: DeviceId) -> Result<(), DevError> {
    handle_of(device)?.close()
}

/// Reads whole sectors from a registered block device. See
/// [`DeviceHandle::read`] for the `nbyte` short-read convention.
pub fn device_read(
    device: DeviceId,
    buffer: UserBuffer,
    nbyte: &mut usize,
    blkno: i64,
) -> Result<(), DevError> {
    handle_of(device)?.read(buffer, nbyte, blkno)
}

/// Writing is not implemented for any device of this driver.
pub fn device_write(
    device: DeviceId,
    buffer: UserBuffer,
    nbyte: &mut usize,
    blkno: i64,
) -> Result<(), DevError> {
    handle_of(device)?.write(buffer, nbyte, blkno)
}

/// No device controls are supported.
pub fn device_ioctl(device: DeviceId, cmd: u32, arg: usize) -> Result<(), DevError> {
    handle_of(device)?.ioctl(cmd, arg)
}
