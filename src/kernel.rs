//! Shared kernel state.
//!
//! Everything the syscall and fault paths need beyond the current process:
//! the root file system, physical frames and the device switch. Built once
//! at boot from a `KernelConfig`.

use alloc::sync::Arc;

use crate::config::{KernelConfig, CONSOLE, ROOTDEV};
use crate::fs::{Console, DeviceTable, FileSystem};
use crate::mm::FrameAllocator;

pub struct Kernel {
    pub fs: Arc<FileSystem>,
    pub frames: FrameAllocator,
    pub devices: DeviceTable,
    /// The driver registered under `CONSOLE`.
    pub console: Arc<Console>,
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Self {
        let console = Arc::new(Console::new());
        let mut devices = DeviceTable::new();
        devices.register(CONSOLE, console.clone());

        log::debug!(
            "[BOOT] kernel: {} inodes, {} frames",
            config.ninodes,
            config.nframes
        );
        Self {
            fs: FileSystem::new(ROOTDEV, config.ninodes),
            frames: FrameAllocator::new(config.nframes),
            devices,
            console,
        }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new(KernelConfig::default())
    }
}
