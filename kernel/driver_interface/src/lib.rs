//! Traits and types for the services a device driver consumes from its host kernel.
//!
//! A driver built on these interfaces never touches the scheduler, interrupt
//! controller, memory manager, or device registry directly; it is handed an
//! implementation of each trait at initialization time. This keeps the driver
//! portable across kernel revisions and lets tests substitute scripted
//! implementations for all of them, including the I/O port space itself.
//!
//! The interrupt model is two-stage, following the usual split between a
//! latency-sensitive *interrupt handler* that runs in interrupt context and a
//! *deferred task* that runs later in thread context. The handler inspects the
//! device and decides whether the deferred task needs to run at all; the
//! deferred task does the real work.

#![no_std]

extern crate alloc;
#[macro_use] extern crate bitflags;

#[cfg(target_arch = "x86_64")]
pub mod port;

use alloc::sync::Arc;
use core::ptr::NonNull;

/// Errors surfaced to callers of device operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevError {
    /// The device reported an error, the request was out of bounds,
    /// or a transfer failed partway through.
    Io,
    /// The caller's buffer could not be mapped into kernel address space.
    Fault,
    /// The sleeping caller was woken by a signal rather than by completion.
    Interrupted,
    /// The operation is not supported by this device.
    InvalidOperation,
}

impl From<DevError> for &'static str {
    fn from(e: DevError) -> &'static str {
        match e {
            DevError::Io               => "I/O error",
            DevError::Fault            => "bad buffer address",
            DevError::Interrupted      => "interrupted",
            DevError::InvalidOperation => "invalid operation",
        }
    }
}

/// Opaque handle to a kernel completion event, created via [`Scheduler::event_create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub u64);

/// Opaque handle to a registered interrupt line, returned by [`InterruptRegistrar::attach`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqHandle(pub u64);

/// Opaque handle to a device registered with the kernel's device registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub u64);

/// A caller-supplied buffer, still in the caller's address space.
///
/// The driver must obtain a kernel-accessible alias via
/// [`MemoryServices::map_user_buffer`] before touching it.
#[derive(Debug, Clone, Copy)]
pub struct UserBuffer {
    pub addr: usize,
    pub len: usize,
}

/// 8-bit and 32-bit access to I/O port space.
///
/// Real hardware access goes through [`port::PortSpace`] on x86_64;
/// tests implement this trait with a scripted device model.
pub trait PortIo: Send + Sync {
    fn read_u8(&self, port: u16) -> u8;
    fn write_u8(&self, port: u16, value: u8);
    fn read_u32(&self, port: u16) -> u32;
}

/// The outcome of a [`Scheduler::sleep`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    /// The event was signaled; the sleeper was woken by [`Scheduler::wakeup`].
    Completed,
    /// The sleep was cut short by a signal delivered to the caller.
    Interrupted,
}

/// Scheduling and event primitives.
///
/// `sleep` parks the calling thread on an event and atomically releases the
/// scheduler lock taken by `lock`, so a wakeup issued after the caller took
/// the lock is never lost.
pub trait Scheduler: Send + Sync {
    /// Creates a named completion event.
    fn event_create(&self, name: &str) -> EventId;
    /// Takes the scheduler lock.
    fn lock(&self);
    /// Releases the scheduler lock.
    fn unlock(&self);
    /// Parks the caller on `event`, releasing the scheduler lock atomically.
    /// The lock is held again when this returns.
    fn sleep(&self, event: EventId) -> SleepOutcome;
    /// Wakes every thread parked on `event`.
    fn wakeup(&self, event: EventId);
}

/// What an interrupt handler tells the kernel to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsrResult {
    /// Schedule the deferred task; this interrupt was for us.
    Dispatch,
    /// Not our interrupt (or a spurious one); do nothing further.
    Ignored,
}

/// A two-stage interrupt handler.
pub trait InterruptHandler: Send + Sync {
    /// Runs in interrupt context. Must be short: look at the device,
    /// decide whether [`run_deferred`](Self::run_deferred) needs to run.
    fn handle_interrupt(&self) -> IsrResult;
    /// Runs in thread context after `handle_interrupt` returned
    /// [`IsrResult::Dispatch`]. May block and may touch the heap.
    fn run_deferred(&self);
}

/// Registration of interrupt handlers with the kernel.
pub trait InterruptRegistrar: Send + Sync {
    /// Attaches `handler` to the given IRQ line.
    ///
    /// Fails if the line is already claimed; sharing is not supported.
    fn attach(&self, irq: u8, handler: Arc<dyn InterruptHandler>) -> Result<IrqHandle, &'static str>;
}

/// Kernel memory services needed by a DMA-era block driver.
pub trait MemoryServices: Send + Sync {
    /// Allocates a physically contiguous, kernel-mapped buffer of `len` bytes.
    fn alloc_contiguous(&self, len: usize) -> Result<NonNull<u8>, &'static str>;
    /// Returns a kernel-writable alias of the caller's buffer,
    /// or `None` if the buffer is not a valid mapping of `buffer.len` bytes.
    fn map_user_buffer(&self, buffer: &UserBuffer) -> Option<NonNull<u8>>;
}

bitflags! {
    /// Flags for devices registered with the kernel's device registry.
    pub struct DeviceFlags: u32 {
        /// Block device (transfers in fixed-size sectors).
        const BLOCK     = 0x01;
        /// Protected: only privileged tasks may open it.
        const PROTECTED = 0x02;
    }
}

/// The kernel's device name registry.
pub trait DeviceRegistry: Send + Sync {
    /// Registers a device under `name`, creating its "/dev" node.
    /// Names must be unique; registering a duplicate is an error.
    fn create_device(&self, name: &str, flags: DeviceFlags) -> Result<DeviceId, &'static str>;
}
