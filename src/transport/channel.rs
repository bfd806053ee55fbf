//! One endpoint of a byte-stream connection.
//!
//! A [`Channel`] owns an outbound queue of [`Buffer`]s and a bounded inbound
//! read buffer, and performs non-blocking scatter-gather sends and receives
//! over a Unix stream socket, including descriptor transfer via `SCM_RIGHTS`
//! ancillary data.

use crate::error::ProtocolError;
use crate::transport::buffer::Buffer;
use nix::errno::Errno;
use nix::sys::socket::{ControlMessage, ControlMessageOwned, MsgFlags, recvmsg, sendmsg};
use std::collections::VecDeque;
use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

/// Maximum number of queued buffers gathered into a single send call.
pub const SEND_BATCH: usize = 8;

/// Size of one receive call's read window.
const RECV_CHUNK: usize = 8 * 1024;

/// Cap on buffered inbound bytes; reads are refused (backpressure) beyond it.
const INBOUND_MAX: usize = 4 * crate::transport::frame::MAX_FRAME_SIZE;

/// One end of a client/server connection.
#[derive(Debug)]
pub struct Channel {
    stream: UnixStream,
    outbound: VecDeque<Buffer>,
    queued_bytes: usize,
    inbound: Vec<u8>,
    inbound_fd: Option<OwnedFd>,
}

impl Channel {
    /// Wrap a connected stream, switching it to non-blocking mode.
    pub fn new(stream: UnixStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self {
            stream,
            outbound: VecDeque::new(),
            queued_bytes: 0,
            inbound: Vec::new(),
            inbound_fd: None,
        })
    }

    /// Create a connected channel pair (test and loopback helper).
    pub fn pair() -> io::Result<(Self, Self)> {
        let (a, b) = UnixStream::pair()?;
        Ok((Self::new(a)?, Self::new(b)?))
    }

    /// The underlying socket, for poll registration.
    #[must_use]
    pub fn socket_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }

    /// Append a buffer to the outbound queue, transferring ownership.
    pub fn enqueue(&mut self, buf: Buffer) {
        self.queued_bytes += buf.unread();
        self.outbound.push_back(buf);
    }

    /// Bytes currently queued for sending.
    #[must_use]
    pub const fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    /// True when the channel has queued output to flush.
    #[must_use]
    pub fn wants_write(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Flush queued buffers with a single scatter-gather write.
    ///
    /// Gathers up to [`SEND_BATCH`] buffers. At most one descriptor is sent
    /// per system call: the batch is cut short before a second
    /// descriptor-carrying buffer, so a descriptor always travels with the
    /// bytes of its own frame and the next one waits for the next call.
    ///
    /// Returns the number of bytes written. [`ProtocolError::WouldBlock`] is
    /// backpressure; [`ProtocolError::PeerClosed`] means the peer went away.
    pub fn send(&mut self) -> Result<usize, ProtocolError> {
        if self.outbound.is_empty() {
            return Ok(0);
        }

        let mut batch = 0;
        let mut fd_index: Option<usize> = None;
        for buf in &self.outbound {
            if batch == SEND_BATCH {
                break;
            }
            if buf.has_fd() {
                if fd_index.is_some() {
                    break;
                }
                fd_index = Some(batch);
            }
            batch += 1;
        }

        let iovs: Vec<IoSlice<'_>> = self
            .outbound
            .iter()
            .take(batch)
            .map(|buf| IoSlice::new(buf.unread_bytes()))
            .collect();

        let raw_fds: Vec<RawFd> = fd_index
            .and_then(|i| self.outbound[i].fd())
            .map(|fd| vec![fd.as_raw_fd()])
            .unwrap_or_default();
        let cmsgs: Vec<ControlMessage<'_>> = if raw_fds.is_empty() {
            Vec::new()
        } else {
            vec![ControlMessage::ScmRights(&raw_fds)]
        };

        let sock = self.stream.as_raw_fd();
        let written = loop {
            match sendmsg::<()>(sock, &iovs, &cmsgs, MsgFlags::empty(), None) {
                Ok(n) => break n,
                Err(Errno::EINTR) => {}
                Err(Errno::EAGAIN) => return Err(ProtocolError::WouldBlock),
                Err(Errno::EPIPE | Errno::ECONNRESET) => return Err(ProtocolError::PeerClosed),
                Err(err) => {
                    return Err(ProtocolError::Io(io::Error::from_raw_os_error(err as i32)));
                }
            }
        };
        drop(iovs);

        // The descriptor went out with this call; drop our copy so it is not
        // sent twice.
        if let Some(i) = fd_index {
            drop(self.outbound[i].detach_fd());
        }
        self.advance_sent(written);
        Ok(written)
    }

    /// Receive newly available bytes into the inbound buffer.
    ///
    /// At most one descriptor is accepted per call. While a received
    /// descriptor is pending (unclaimed), further reads are refused with
    /// [`ProtocolError::DescriptorRefused`] so the descriptor table cannot be
    /// overrun; the caller retries after claiming it.
    ///
    /// Returns the number of bytes read; `Ok(0)` means the peer closed the
    /// connection cleanly.
    pub fn recv(&mut self) -> Result<usize, ProtocolError> {
        if self.inbound_fd.is_some() {
            return Err(ProtocolError::DescriptorRefused);
        }
        let room = INBOUND_MAX.saturating_sub(self.inbound.len());
        if room == 0 {
            return Err(ProtocolError::WouldBlock);
        }

        let mut chunk = [0u8; RECV_CHUNK];
        let want = room.min(RECV_CHUNK);
        let mut iov = [IoSliceMut::new(&mut chunk[..want])];
        let mut cmsg_space = nix::cmsg_space!([RawFd; 1]);

        let sock = self.stream.as_raw_fd();
        let (bytes, fds) = loop {
            match recvmsg::<()>(sock, &mut iov, Some(&mut cmsg_space), MsgFlags::empty()) {
                Ok(msg) => {
                    let mut fds: Vec<RawFd> = Vec::new();
                    for cmsg in msg.cmsgs() {
                        if let ControlMessageOwned::ScmRights(received) = cmsg {
                            fds.extend(received);
                        }
                    }
                    break (msg.bytes, fds);
                }
                Err(Errno::EINTR) => {}
                Err(Errno::EAGAIN) => return Err(ProtocolError::WouldBlock),
                Err(Errno::ECONNRESET) => return Err(ProtocolError::PeerClosed),
                Err(err) => {
                    return Err(ProtocolError::Io(io::Error::from_raw_os_error(err as i32)));
                }
            }
        };

        let mut fds = fds.into_iter();
        if let Some(first) = fds.next() {
            self.inbound_fd = Some(claim_fd(first));
        }
        // Anything past the first is closed immediately; one descriptor per
        // receive call is the protocol contract.
        for extra in fds {
            drop(claim_fd(extra));
        }

        if bytes == 0 {
            return Ok(0);
        }
        drop(iov);
        self.inbound.extend_from_slice(&chunk[..bytes]);
        Ok(bytes)
    }

    /// The buffered inbound bytes not yet parsed into frames.
    #[must_use]
    pub fn inbound(&self) -> &[u8] {
        &self.inbound
    }

    /// Discard `len` parsed bytes from the front of the inbound buffer.
    pub fn consume_inbound(&mut self, len: usize) {
        self.inbound.drain(..len.min(self.inbound.len()));
    }

    /// Claim the pending inbound descriptor, if one arrived.
    pub fn take_inbound_fd(&mut self) -> Option<OwnedFd> {
        self.inbound_fd.take()
    }

    /// True while a received descriptor is waiting to be claimed.
    #[must_use]
    pub const fn has_inbound_fd(&self) -> bool {
        self.inbound_fd.is_some()
    }

    /// Close an unclaimed inbound descriptor.
    pub fn discard_inbound_fd(&mut self) {
        drop(self.inbound_fd.take());
    }

    /// Drop all queued output and close any unclaimed descriptors.
    ///
    /// Dropping the queued buffers closes their attached descriptors.
    pub fn tear_down(&mut self) {
        self.outbound.clear();
        self.queued_bytes = 0;
        self.discard_inbound_fd();
    }

    fn advance_sent(&mut self, mut written: usize) {
        self.queued_bytes -= written.min(self.queued_bytes);
        while written > 0 {
            let Some(front) = self.outbound.front_mut() else {
                break;
            };
            let take = front.unread().min(written);
            // In-range by construction.
            let _ = front.skip(take);
            written -= take;
            if front.is_drained() {
                self.outbound.pop_front();
            }
        }
    }
}

impl AsFd for Channel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

/// Take ownership of a raw descriptor the kernel just installed via
/// `SCM_RIGHTS`.
#[allow(
    unsafe_code,
    reason = "recvmsg installed this descriptor in our table; no other wrapper owns it"
)]
fn claim_fd(raw: RawFd) -> OwnedFd {
    // SAFETY: `raw` was returned by recvmsg as ancillary SCM_RIGHTS data and
    // is owned by no other handle in this process.
    unsafe { OwnedFd::from_raw_fd(raw) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn buf_with(bytes: &[u8]) -> Buffer {
        let mut buf = Buffer::dynamic(0, 1024).unwrap_or_else(|_| Buffer::fixed(0));
        let _ = buf.add(bytes);
        buf
    }

    #[test]
    fn test_send_and_recv_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
        let (mut a, mut b) = Channel::pair()?;
        a.enqueue(buf_with(b"hello"));
        assert_eq!(a.queued_bytes(), 5);
        let written = a.send()?;
        assert_eq!(written, 5);
        assert_eq!(a.queued_bytes(), 0);
        assert!(!a.wants_write());

        let read = b.recv()?;
        assert_eq!(read, 5);
        assert_eq!(b.inbound(), b"hello");
        b.consume_inbound(5);
        assert!(b.inbound().is_empty());
        Ok(())
    }

    #[test]
    fn test_gather_write_covers_multiple_buffers() -> Result<(), Box<dyn std::error::Error>> {
        let (mut a, mut b) = Channel::pair()?;
        a.enqueue(buf_with(b"one"));
        a.enqueue(buf_with(b"two"));
        a.enqueue(buf_with(b"three"));
        let written = a.send()?;
        assert_eq!(written, 11);

        let mut got = Vec::new();
        while got.len() < 11 {
            let n = b.recv()?;
            assert!(n > 0);
            got.extend_from_slice(b.inbound());
            b.consume_inbound(b.inbound().len());
        }
        assert_eq!(got, b"onetwothree");
        Ok(())
    }

    #[test]
    fn test_at_most_one_descriptor_per_send() -> Result<(), Box<dyn std::error::Error>> {
        use std::os::fd::AsFd;
        let (mut a, mut b) = Channel::pair()?;

        let file_one = tempfile::tempfile()?;
        let file_two = tempfile::tempfile()?;
        let mut first = buf_with(b"first");
        first.attach_fd(file_one.as_fd().try_clone_to_owned()?);
        let mut second = buf_with(b"second");
        second.attach_fd(file_two.as_fd().try_clone_to_owned()?);
        a.enqueue(first);
        a.enqueue(second);

        // First call sends only the first buffer: the batch is cut before the
        // second descriptor carrier.
        let written = a.send()?;
        assert_eq!(written, 5);
        let n = b.recv()?;
        assert_eq!(n, 5);
        assert!(b.has_inbound_fd());
        assert!(b.take_inbound_fd().is_some());

        // Second call carries the second buffer and its descriptor.
        let written = a.send()?;
        assert_eq!(written, 6);
        let n = b.recv()?;
        assert_eq!(n, 6);
        assert!(b.take_inbound_fd().is_some());
        Ok(())
    }

    #[test]
    fn test_recv_refused_while_descriptor_pending() -> Result<(), Box<dyn std::error::Error>> {
        use std::os::fd::AsFd;
        let (mut a, mut b) = Channel::pair()?;
        let file = tempfile::tempfile()?;
        let mut buf = buf_with(b"with-fd");
        buf.attach_fd(file.as_fd().try_clone_to_owned()?);
        a.enqueue(buf);
        a.enqueue(buf_with(b"more"));
        let _ = a.send()?;
        let _ = a.send()?;

        let _ = b.recv()?;
        assert!(b.has_inbound_fd());
        // Backpressure until the descriptor is claimed.
        assert!(matches!(b.recv(), Err(ProtocolError::DescriptorRefused)));
        let _ = b.take_inbound_fd();
        // Reads proceed again (either data or would-block is acceptable here).
        match b.recv() {
            Ok(_) | Err(ProtocolError::WouldBlock) => {}
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    #[test]
    fn test_peer_close_reads_zero() -> Result<(), Box<dyn std::error::Error>> {
        let (a, mut b) = Channel::pair()?;
        drop(a);
        assert_eq!(b.recv()?, 0);
        Ok(())
    }

    #[test]
    fn test_partial_drain_advances_front_buffer() -> Result<(), Box<dyn std::error::Error>> {
        let (mut a, _b) = Channel::pair()?;
        a.enqueue(buf_with(b"abcdef"));
        a.advance_sent(4);
        assert_eq!(a.queued_bytes(), 2);
        a.advance_sent(2);
        assert_eq!(a.queued_bytes(), 0);
        assert!(!a.wants_write());
        Ok(())
    }
}
