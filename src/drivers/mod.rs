//! Device drivers for hardware peripherals.
//!
//! The only peripheral driven directly by the kernel core is the COM1
//! serial port, used for boot diagnostics and the kernel log ring buffer.
//! Everything else (console, storage, network) is expected to live in
//! userspace drivers built on top of the VFS and IRQ dispatch.

pub mod serial;
