//! Bounded, relocatable views over an archive's backing stream
//!
//! Opening a file in an archive yields a [`FileView`]: a window over
//! the entry's data region that reads and writes through the shared
//! segmented stream. The archive keeps a weak reference to every open
//! window and slides it around as inserts and removes shift the entry,
//! so a view stays on its file no matter how the container moves
//! underneath it. A view whose entry is removed is invalidated and
//! refuses further I/O.

use crate::segment::SegmentedStream;
use parking_lot::Mutex;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;

pub(crate) type SharedStream = Arc<Mutex<SegmentedStream>>;

/// Position and size of one open view, shared between the view and the
/// archive that relocates it.
#[derive(Debug)]
pub(crate) struct Window {
    pub offset: u64,
    pub len: u64,
    pub valid: bool,
}

pub struct FileView {
    content: SharedStream,
    window: Arc<Mutex<Window>>,
    pos: u64,
}

impl FileView {
    pub(crate) fn new(content: SharedStream, window: Arc<Mutex<Window>>) -> Self {
        FileView {
            content,
            window,
            pos: 0,
        }
    }

    /// Current length of the view's window.
    pub fn len(&self) -> u64 {
        self.window.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// False once the underlying entry has been removed.
    pub fn is_valid(&self) -> bool {
        self.window.lock().valid
    }

    fn snapshot(&self) -> std::io::Result<(u64, u64)> {
        let w = self.window.lock();
        if !w.valid {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "file was removed from the archive",
            ));
        }
        Ok((w.offset, w.len))
    }
}

impl Read for FileView {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        let (offset, len) = self.snapshot()?;
        let remain = len.saturating_sub(self.pos);
        let n = (out.len() as u64).min(remain) as usize;
        if n == 0 {
            return Ok(0);
        }
        let got = self
            .content
            .lock()
            .read_at(offset + self.pos, &mut out[..n])?;
        self.pos += got as u64;
        Ok(got)
    }
}

impl Write for FileView {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let (offset, len) = self.snapshot()?;
        // A view never grows its file; resizing goes through the
        // archive so the FAT stays in step.
        if self.pos + data.len() as u64 > len {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write past end of file window",
            ));
        }
        self.content.lock().write_at(offset + self.pos, data)?;
        self.pos += data.len() as u64;
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Seek for FileView {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let len = self.window.lock().len;
        let target = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(d) => len as i64 + d,
            SeekFrom::Current(d) => self.pos as i64 + d,
        };
        if target < 0 || target as u64 > len {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek outside file window",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}
