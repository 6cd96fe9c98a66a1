//! Anonymous pipes: a fixed-capacity byte ring shared by a read end and
//! a write end, each a [`VfsNode`] so they slot into the same
//! [`crate::fs::file::File`]/[`crate::fs::file::FileTable`] machinery as
//! regular files.
//!
//! `VfsNode::{read,write}` are non-blocking: an empty pipe with writers
//! still open, or a full pipe with readers still open, returns
//! `Err("would_block")` rather than looping here — the syscall layer is
//! the one with a frame pointer to hand the scheduler, so that's where
//! the retry-or-block decision belongs.

use alloc::{sync::Arc, vec::Vec};

use spin::Mutex;

use crate::fs::{DirEntry, Metadata, NodeType, Permissions, VfsNode};

pub const PIPE_BUF_SIZE: usize = 4096;
pub const MAX_PIPES: usize = 16;

struct Ring {
    buf: [u8; PIPE_BUF_SIZE],
    head: usize, // next byte to read
    tail: usize, // next byte to write
    len: usize,
    readers: u32,
    writers: u32,
}

impl Ring {
    fn new() -> Self {
        Self { buf: [0; PIPE_BUF_SIZE], head: 0, tail: 0, len: 0, readers: 1, writers: 1 }
    }

    fn read(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.len);
        for slot in out.iter_mut().take(n) {
            *slot = self.buf[self.head];
            self.head = (self.head + 1) % PIPE_BUF_SIZE;
        }
        self.len -= n;
        n
    }

    fn write(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(PIPE_BUF_SIZE - self.len);
        for &b in data.iter().take(n) {
            self.buf[self.tail] = b;
            self.tail = (self.tail + 1) % PIPE_BUF_SIZE;
        }
        self.len += n;
        n
    }
}

pub struct Pipe(Mutex<Ring>);

impl Pipe {
    fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(Ring::new())))
    }
}

/// One end of a pipe: shares the ring with its sibling, reads or writes
/// depending on `is_write`.
pub struct PipeEnd {
    pipe: Arc<Pipe>,
    is_write: bool,
}

impl VfsNode for PipeEnd {
    fn node_type(&self) -> NodeType {
        NodeType::Pipe
    }

    fn read(&self, _offset: usize, buffer: &mut [u8]) -> Result<usize, &'static str> {
        if self.is_write {
            return Err("not readable");
        }
        let mut ring = self.pipe.0.lock();
        if ring.len > 0 {
            return Ok(ring.read(buffer));
        }
        if ring.writers == 0 {
            return Ok(0); // EOF: no writer left and nothing buffered
        }
        Err("would_block")
    }

    fn write(&self, _offset: usize, data: &[u8]) -> Result<usize, &'static str> {
        if !self.is_write {
            return Err("not writable");
        }
        let mut ring = self.pipe.0.lock();
        if ring.readers == 0 {
            return Err("broken_pipe");
        }
        if ring.len == PIPE_BUF_SIZE {
            return Err("would_block");
        }
        Ok(ring.write(data))
    }

    fn metadata(&self) -> Result<Metadata, &'static str> {
        Ok(Metadata {
            node_type: NodeType::Pipe,
            size: 0,
            permissions: Permissions::default(),
            uid: 0,
            gid: 0,
            created: 0,
            modified: 0,
            accessed: 0,
        })
    }

    fn readdir(&self) -> Result<Vec<DirEntry>, &'static str> {
        Err("not a directory")
    }

    fn lookup(&self, _name: &str) -> Result<Arc<dyn VfsNode>, &'static str> {
        Err("not a directory")
    }

    fn create(&self, _name: &str, _permissions: Permissions) -> Result<Arc<dyn VfsNode>, &'static str> {
        Err("not a directory")
    }

    fn mkdir(&self, _name: &str, _permissions: Permissions) -> Result<Arc<dyn VfsNode>, &'static str> {
        Err("not a directory")
    }

    fn unlink(&self, _name: &str) -> Result<(), &'static str> {
        Err("not a directory")
    }

    fn truncate(&self, _size: usize) -> Result<(), &'static str> {
        Err("cannot truncate a pipe")
    }
}

impl Drop for PipeEnd {
    fn drop(&mut self) {
        let mut ring = self.pipe.0.lock();
        if self.is_write {
            ring.writers = ring.writers.saturating_sub(1);
        } else {
            ring.readers = ring.readers.saturating_sub(1);
        }
    }
}

/// Create a new pipe, returning `(read_end, write_end)` ready to be
/// wrapped in a [`crate::fs::file::File`] and installed in a task's
/// [`crate::fs::file::FileTable`].
pub fn create() -> (Arc<PipeEnd>, Arc<PipeEnd>) {
    let pipe = Pipe::new();
    let read_end = Arc::new(PipeEnd { pipe: pipe.clone(), is_write: false });
    let write_end = Arc::new(PipeEnd { pipe, is_write: true });
    (read_end, write_end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let (read_end, write_end) = create();
        assert_eq!(write_end.write(0, b"hello").unwrap(), 5);
        let mut buf = [0u8; 5];
        assert_eq!(read_end.read(0, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn empty_pipe_with_writer_open_would_block() {
        let (read_end, _write_end) = create();
        let mut buf = [0u8; 4];
        assert_eq!(read_end.read(0, &mut buf), Err("would_block"));
    }

    #[test]
    fn dropping_last_writer_delivers_eof() {
        let (read_end, write_end) = create();
        drop(write_end);
        let mut buf = [0u8; 4];
        assert_eq!(read_end.read(0, &mut buf), Ok(0));
    }

    #[test]
    fn dropping_last_reader_breaks_writer() {
        let (read_end, write_end) = create();
        drop(read_end);
        assert_eq!(write_end.write(0, b"x"), Err("broken_pipe"));
    }

    #[test]
    fn full_pipe_write_would_block() {
        let (_read_end, write_end) = create();
        let chunk = [0u8; PIPE_BUF_SIZE];
        assert_eq!(write_end.write(0, &chunk).unwrap(), PIPE_BUF_SIZE);
        assert_eq!(write_end.write(0, &[1]), Err("would_block"));
    }
}
