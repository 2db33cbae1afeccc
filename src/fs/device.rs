//! Device switch table.
//!
//! Maps a device major number to the driver that serves reads and writes
//! on device inodes. Majors outside `0..NDEV` never reach a driver.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use super::file::FileError;
use crate::config::NDEV;

/// A character device driver.
pub trait Device: Send + Sync {
    fn read(&self, dst: &mut [u8]) -> Result<usize, FileError>;
    fn write(&self, src: &[u8]) -> Result<usize, FileError>;
}

/// Registered drivers, indexed by major number.
pub struct DeviceTable {
    slots: [Option<Arc<dyn Device>>; NDEV],
}

impl DeviceTable {
    pub fn new() -> Self {
        Self {
            slots: [const { None }; NDEV],
        }
    }

    /// Install `device` under `major`. Returns false if `major` is out of
    /// range.
    pub fn register(&mut self, major: usize, device: Arc<dyn Device>) -> bool {
        match self.slots.get_mut(major) {
            Some(slot) => {
                *slot = Some(device);
                true
            }
            None => false,
        }
    }

    /// Driver for `major`, if any.
    pub fn get(&self, major: usize) -> Option<&Arc<dyn Device>> {
        self.slots.get(major)?.as_ref()
    }

    /// Whether `major` is a valid index into the table.
    pub fn in_range(major: i16) -> bool {
        major >= 0 && (major as usize) < NDEV
    }
}

impl Default for DeviceTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Buffer-backed console: writes accumulate in an output log, reads drain
/// queued input.
#[derive(Default)]
pub struct Console {
    input: Mutex<VecDeque<u8>>,
    output: Mutex<Vec<u8>>,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes for later reads.
    pub fn push_input(&self, bytes: &[u8]) {
        self.input.lock().extend(bytes.iter().copied());
    }

    /// Everything written so far, draining the log.
    pub fn take_output(&self) -> Vec<u8> {
        core::mem::take(&mut *self.output.lock())
    }
}

impl Device for Console {
    fn read(&self, dst: &mut [u8]) -> Result<usize, FileError> {
        let mut input = self.input.lock();
        let n = dst.len().min(input.len());
        for (slot, byte) in dst.iter_mut().zip(input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&self, src: &[u8]) -> Result<usize, FileError> {
        self.output.lock().extend_from_slice(src);
        Ok(src.len())
    }
}
