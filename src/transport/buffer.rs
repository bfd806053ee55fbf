//! Growable byte buffers with independent read/write cursors.
//!
//! A [`Buffer`] is the unit of data held in transit on a channel: an owned
//! byte region that is filled at the write cursor and drained at the read
//! cursor, optionally carrying one file descriptor to be passed out-of-band
//! with its bytes.

use crate::error::ProtocolError;
use std::os::fd::OwnedFd;

/// An owned byte region with independent read and write cursors.
///
/// Fixed buffers never grow. Dynamic buffers grow geometrically up to their
/// configured maximum and fail with [`ProtocolError::Range`] beyond it.
///
/// Invariant: `read_pos <= write_pos <= data.len() <= max`.
#[derive(Debug)]
pub struct Buffer {
    data: Vec<u8>,
    max: usize,
    fixed: bool,
    read_pos: usize,
    write_pos: usize,
    fd: Option<OwnedFd>,
}

impl Buffer {
    /// Allocate a fixed-capacity buffer of `len` bytes.
    #[must_use]
    pub fn fixed(len: usize) -> Self {
        Self {
            data: vec![0; len],
            max: len,
            fixed: true,
            read_pos: 0,
            write_pos: 0,
            fd: None,
        }
    }

    /// Allocate a dynamic buffer with `initial` capacity, growable up to `max`.
    pub fn dynamic(initial: usize, max: usize) -> Result<Self, ProtocolError> {
        if initial > max {
            return Err(ProtocolError::Range {
                needed: initial,
                max,
            });
        }
        Ok(Self {
            data: vec![0; initial],
            max,
            fixed: false,
            read_pos: 0,
            write_pos: 0,
            fd: None,
        })
    }

    /// Reserve `len` writable bytes, growing the buffer if needed and
    /// permitted, and return the writable slice. The write cursor does not
    /// move until [`commit`](Self::commit) is called.
    pub fn reserve(&mut self, len: usize) -> Result<&mut [u8], ProtocolError> {
        self.ensure(len)?;
        Ok(&mut self.data[self.write_pos..self.write_pos + len])
    }

    /// Advance the write cursor over `len` bytes previously filled through
    /// [`reserve`](Self::reserve).
    pub fn commit(&mut self, len: usize) -> Result<(), ProtocolError> {
        let available = self.data.len() - self.write_pos;
        if len > available {
            return Err(ProtocolError::SizeMismatch {
                requested: len,
                available,
            });
        }
        self.write_pos += len;
        Ok(())
    }

    /// Append `data` at the write cursor, growing if needed and permitted.
    pub fn add(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.reserve(data.len())?.copy_from_slice(data);
        self.write_pos += data.len();
        Ok(())
    }

    /// Replace the buffer contents with `data`, resetting both cursors.
    pub fn set(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.read_pos = 0;
        self.write_pos = 0;
        self.add(data)
    }

    /// Consume and return `len` bytes from the read cursor.
    pub fn get(&mut self, len: usize) -> Result<&[u8], ProtocolError> {
        let available = self.unread();
        if len > available {
            return Err(ProtocolError::SizeMismatch {
                requested: len,
                available,
            });
        }
        let start = self.read_pos;
        self.read_pos += len;
        Ok(&self.data[start..start + len])
    }

    /// Discard `len` bytes from the read cursor.
    pub fn skip(&mut self, len: usize) -> Result<(), ProtocolError> {
        let available = self.unread();
        if len > available {
            return Err(ProtocolError::SizeMismatch {
                requested: len,
                available,
            });
        }
        self.read_pos += len;
        Ok(())
    }

    /// The unread window: everything written but not yet consumed.
    #[must_use]
    pub fn unread_bytes(&self) -> &[u8] {
        &self.data[self.read_pos..self.write_pos]
    }

    /// Number of unread bytes.
    #[must_use]
    pub const fn unread(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// True once every written byte has been consumed.
    #[must_use]
    pub const fn is_drained(&self) -> bool {
        self.read_pos == self.write_pos
    }

    /// Current allocated capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Attach a descriptor to travel with this buffer's bytes.
    ///
    /// Attaching while one is already attached closes the previous descriptor;
    /// a buffer never leaks a descriptor.
    pub fn attach_fd(&mut self, fd: OwnedFd) {
        self.fd = Some(fd);
    }

    /// Detach the attached descriptor, transferring ownership to the caller.
    pub fn detach_fd(&mut self) -> Option<OwnedFd> {
        self.fd.take()
    }

    /// True when a descriptor is attached.
    #[must_use]
    pub const fn has_fd(&self) -> bool {
        self.fd.is_some()
    }

    /// Borrow the attached descriptor, if any.
    #[must_use]
    pub fn fd(&self) -> Option<std::os::fd::BorrowedFd<'_>> {
        use std::os::fd::AsFd;
        self.fd.as_ref().map(AsFd::as_fd)
    }

    fn ensure(&mut self, extra: usize) -> Result<(), ProtocolError> {
        let needed = self.write_pos + extra;
        if needed <= self.data.len() {
            return Ok(());
        }
        if self.fixed || needed > self.max {
            return Err(ProtocolError::Range {
                needed,
                max: self.max,
            });
        }
        // Geometric growth, capped at max.
        let target = needed.max(self.data.len().saturating_mul(2)).min(self.max);
        self.data.resize(target, 0);
        Ok(())
    }
}
