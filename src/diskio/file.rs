use libc::{c_void, off_t, pread, pwrite};
use std::io;
use std::os::fd::IntoRawFd;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::rc::Rc;

use crate::diskio::io_stats::{IoStats, IoStatsTracker};

/// The single append-only file all runs of one engine are spilled to.
///
/// The file is unlinked at creation, so closing the descriptor on drop is
/// all the cleanup there is. Writes are buffered; reads are positioned and
/// only see bytes that have been flushed.
pub struct SpillFile {
    fd: RawFd,
    write_buf: Vec<u8>,
    write_buffer_size: usize,
    flushed: u64,
    io_tracker: Rc<IoStatsTracker>,
}

impl SpillFile {
    pub fn create_in(dir: Option<&Path>, write_buffer_size: usize) -> io::Result<Self> {
        let file = match dir {
            Some(dir) => tempfile::tempfile_in(dir)?,
            None => tempfile::tempfile()?,
        };
        let write_buffer_size = write_buffer_size.max(1);
        Ok(Self {
            fd: file.into_raw_fd(),
            write_buf: Vec::with_capacity(write_buffer_size),
            write_buffer_size,
            flushed: 0,
            io_tracker: Rc::new(IoStatsTracker::new()),
        })
    }

    /// Offset the next appended byte will land at.
    pub fn position(&self) -> u64 {
        self.flushed + self.write_buf.len() as u64
    }

    pub fn write_all(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            let room = self.write_buffer_size - self.write_buf.len();
            let take = room.min(buf.len());
            self.write_buf.extend_from_slice(&buf[..take]);
            buf = &buf[take..];
            if self.write_buf.len() == self.write_buffer_size {
                self.flush()?;
            }
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        pwrite_all_fd(self.fd, &self.write_buf, self.flushed)?;
        self.io_tracker.add_write(self.write_buf.len() as u64);
        self.flushed += self.write_buf.len() as u64;
        self.write_buf.clear();
        Ok(())
    }

    /// Read handle over everything flushed so far. Bytes appended after
    /// this call are not visible through it.
    pub fn reader(&mut self) -> io::Result<SpillReader> {
        self.flush()?;
        let fd = unsafe { libc::dup(self.fd) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(SpillReader {
            fd,
            len: self.flushed,
            io_tracker: Rc::clone(&self.io_tracker),
        })
    }

    /// Discards everything written so far; the next write lands at offset 0.
    pub fn rewind(&mut self) -> io::Result<()> {
        self.write_buf.clear();
        self.flushed = 0;
        let result = unsafe { libc::ftruncate(self.fd, 0) };
        if result < 0 {
            return Err(io::Error::last_os_error());
        }
        self.io_tracker.reset();
        Ok(())
    }

    pub fn io_stats(&self) -> IoStats {
        self.io_tracker.get_detailed_stats()
    }
}

impl Drop for SpillFile {
    fn drop(&mut self) {
        // Buffered bytes are scratch data; nothing to persist.
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// Positioned reads over a frozen prefix of the spill file. Holds its own
/// duplicate of the descriptor so runs can be merged while the same file
/// is being appended to.
pub struct SpillReader {
    fd: RawFd,
    len: u64,
    io_tracker: Rc<IoStatsTracker>,
}

impl SpillReader {
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Fills as much of `buf` as the visible bytes allow, starting at `offset`.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        if offset >= self.len {
            return Ok(0);
        }
        let len = buf.len().min((self.len - offset) as usize);
        let mut done = 0;
        while done < len {
            let n = pread_fd(self.fd, &mut buf[done..len], offset + done as u64)?;
            if n == 0 {
                break;
            }
            done += n;
        }
        self.io_tracker.add_read(done as u64);
        Ok(done)
    }
}

impl Drop for SpillReader {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// Positioned read that retries on `EINTR`.
pub fn pread_fd(fd: RawFd, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    loop {
        let result = unsafe {
            pread(
                fd,
                buf.as_mut_ptr() as *mut c_void,
                buf.len(),
                offset as off_t,
            )
        };
        if result >= 0 {
            return Ok(result as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Positioned write of the whole buffer.
pub fn pwrite_all_fd(fd: RawFd, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    while !buf.is_empty() {
        let result = unsafe {
            pwrite(
                fd,
                buf.as_ptr() as *const c_void,
                buf.len(),
                offset as off_t,
            )
        };
        if result < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if result == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "pwrite wrote no bytes",
            ));
        }
        buf = &buf[result as usize..];
        offset += result as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffered_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = SpillFile::create_in(Some(dir.path()), 16).unwrap();

        file.write_all(b"0123456789").unwrap();
        assert_eq!(file.position(), 10);
        file.write_all(b"abcdefghij").unwrap();
        assert_eq!(file.position(), 20);

        let reader = file.reader().unwrap();
        assert_eq!(reader.len(), 20);
        let mut all = vec![0u8; 32];
        let n = reader.read_at(&mut all, 0).unwrap();
        assert_eq!(&all[..n], b"0123456789abcdefghij");

        let mut buf = [0u8; 4];
        assert_eq!(reader.read_at(&mut buf, 8).unwrap(), 4);
        assert_eq!(&buf, b"89ab");
    }

    #[test]
    fn test_reader_sees_frozen_prefix() {
        let mut file = SpillFile::create_in(None, 4).unwrap();
        file.write_all(b"run1").unwrap();
        let reader = file.reader().unwrap();

        // Appending while a reader is open
        file.write_all(b"run2").unwrap();
        file.flush().unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(reader.read_at(&mut buf, 0).unwrap(), 4);
        assert_eq!(reader.read_at(&mut buf, 4).unwrap(), 0);
        assert_eq!(file.reader().unwrap().read_at(&mut buf, 0).unwrap(), 8);
        assert_eq!(&buf, b"run1run2");
    }

    #[test]
    fn test_rewind_resets_position() {
        let mut file = SpillFile::create_in(None, 8).unwrap();
        file.write_all(&[7u8; 100]).unwrap();
        file.flush().unwrap();
        assert_eq!(file.position(), 100);

        file.rewind().unwrap();
        assert_eq!(file.position(), 0);
        assert_eq!(file.io_stats(), IoStats::default());
        assert!(file.reader().unwrap().is_empty());

        file.write_all(b"xy").unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(file.reader().unwrap().read_at(&mut buf, 0).unwrap(), 2);
        assert_eq!(&buf[..2], b"xy");
    }

    #[test]
    fn test_io_stats_track_bytes() {
        let mut file = SpillFile::create_in(None, 4).unwrap();
        file.write_all(b"abcdefgh").unwrap();
        let reader = file.reader().unwrap();
        let mut buf = [0u8; 8];
        reader.read_at(&mut buf, 0).unwrap();

        let stats = file.io_stats();
        assert_eq!(stats.write_bytes, 8);
        assert_eq!(stats.write_ops, 2);
        assert_eq!(stats.read_bytes, 8);
        assert_eq!(stats.read_ops, 1);
    }
}
