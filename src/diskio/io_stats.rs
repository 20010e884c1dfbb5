use std::cell::Cell;
use std::fmt;

/// Snapshot of the I/O a spill file has done.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IoStats {
    pub read_ops: u64,
    pub read_bytes: u64,
    pub write_ops: u64,
    pub write_bytes: u64,
}

impl fmt::Display for IoStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "read_ops={}, read={:.2} MiB, write_ops={}, write={:.2} MiB",
            self.read_ops,
            self.read_bytes as f64 / (1024.0 * 1024.0),
            self.write_ops,
            self.write_bytes as f64 / (1024.0 * 1024.0)
        )
    }
}

/// Running counters. Readers only hold a shared reference to the file, so
/// the counters use interior mutability.
#[derive(Debug, Default)]
pub struct IoStatsTracker {
    read_ops: Cell<u64>,
    read_bytes: Cell<u64>,
    write_ops: Cell<u64>,
    write_bytes: Cell<u64>,
}

impl IoStatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_read(&self, bytes: u64) {
        self.read_ops.set(self.read_ops.get() + 1);
        self.read_bytes.set(self.read_bytes.get() + bytes);
    }

    pub fn add_write(&self, bytes: u64) {
        self.write_ops.set(self.write_ops.get() + 1);
        self.write_bytes.set(self.write_bytes.get() + bytes);
    }

    pub fn reset(&self) {
        self.read_ops.set(0);
        self.read_bytes.set(0);
        self.write_ops.set(0);
        self.write_bytes.set(0);
    }

    pub fn get_detailed_stats(&self) -> IoStats {
        IoStats {
            read_ops: self.read_ops.get(),
            read_bytes: self.read_bytes.get(),
            write_ops: self.write_ops.get(),
            write_bytes: self.write_bytes.get(),
        }
    }
}
