//! Pipes.
//!
//! A bounded ring buffer shared by a read end and a write end. Each end is a
//! `PipeEnd`; dropping it closes that side.
//!
//! Nothing here sleeps: a read takes whatever is buffered (zero bytes on an
//! empty pipe) and a write stores whatever fits. Blocking belongs to the
//! scheduler above this layer.

use alloc::sync::Arc;
use spin::Mutex;

use super::file::FileError;
use crate::config::PIPESIZE;

struct PipeState {
    data: [u8; PIPESIZE],
    /// Total bytes read.
    nread: usize,
    /// Total bytes written.
    nwrite: usize,
    read_open: bool,
}

pub struct Pipe {
    state: Mutex<PipeState>,
}

/// One end of a pipe.
pub struct PipeEnd {
    pipe: Arc<Pipe>,
    writer: bool,
}

/// Create a pipe and return its `(read, write)` ends (`pipealloc`).
pub fn pipe_alloc() -> (PipeEnd, PipeEnd) {
    let pipe = Arc::new(Pipe {
        state: Mutex::new(PipeState {
            data: [0; PIPESIZE],
            nread: 0,
            nwrite: 0,
            read_open: true,
        }),
    });
    let reader = PipeEnd {
        pipe: Arc::clone(&pipe),
        writer: false,
    };
    let writer = PipeEnd { pipe, writer: true };
    (reader, writer)
}

impl PipeEnd {
    /// Copy buffered bytes into `dst`. Returns 0 when the pipe is empty.
    pub fn read(&self, dst: &mut [u8]) -> Result<usize, FileError> {
        if self.writer {
            return Err(FileError::NotReadable);
        }
        let mut st = self.pipe.state.lock();
        let mut n = 0;
        while n < dst.len() && st.nread != st.nwrite {
            dst[n] = st.data[st.nread % PIPESIZE];
            st.nread += 1;
            n += 1;
        }
        Ok(n)
    }

    /// Append as much of `src` as fits. Fails once the read end is closed.
    pub fn write(&self, src: &[u8]) -> Result<usize, FileError> {
        if !self.writer {
            return Err(FileError::NotWritable);
        }
        let mut st = self.pipe.state.lock();
        if !st.read_open {
            return Err(FileError::BrokenPipe);
        }
        let mut n = 0;
        while n < src.len() && st.nwrite - st.nread < PIPESIZE {
            let slot = st.nwrite % PIPESIZE;
            st.data[slot] = src[n];
            st.nwrite += 1;
            n += 1;
        }
        Ok(n)
    }
}

impl Drop for PipeEnd {
    fn drop(&mut self) {
        // Reads never wait for a writer, so only the read side is tracked.
        if !self.writer {
            self.pipe.state.lock().read_open = false;
        }
    }
}
