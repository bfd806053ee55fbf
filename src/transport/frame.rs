//! Length-prefixed frame protocol.
//!
//! Every client/server exchange is a frame: a fixed 16-byte header followed
//! by a payload, with at most one file descriptor passed out-of-band on the
//! same system call as the frame's bytes. All header integers are
//! little-endian.

use crate::error::ProtocolError;
use crate::transport::buffer::Buffer;
use crate::transport::channel::Channel;
use std::os::fd::OwnedFd;
use tracing::warn;

/// Size of the fixed frame header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Maximum total frame size (header + payload). Frames above this are
/// rejected on both compose and parse.
pub const MAX_FRAME_SIZE: usize = 16 * 1024;

/// Header flag bit: a descriptor is attached to this frame.
pub const FLAG_FD: u16 = 0x1;

/// The fixed frame header.
///
/// Layout (little-endian): `type: u32`, `length: u16` (header + payload),
/// `flags: u16`, `peer_id: u32`, `origin_id: u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Message type id.
    pub msg_type: u32,
    /// Total frame length, header included.
    pub length: u16,
    /// Flag bits; bit 0 declares an attached descriptor.
    pub flags: u16,
    /// Target/peer id.
    pub peer_id: u32,
    /// Originating process id; never zero on the wire.
    pub origin_id: u32,
}

impl FrameHeader {
    /// Serialize into the fixed wire layout.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.msg_type.to_le_bytes());
        out[4..6].copy_from_slice(&self.length.to_le_bytes());
        out[6..8].copy_from_slice(&self.flags.to_le_bytes());
        out[8..12].copy_from_slice(&self.peer_id.to_le_bytes());
        out[12..16].copy_from_slice(&self.origin_id.to_le_bytes());
        out
    }

    /// Parse and validate a header from the front of `bytes`.
    ///
    /// A declared length below the header size or above the maximum is a
    /// transport-fatal protocol error: stream alignment cannot be recovered,
    /// so the channel must be dropped rather than resynced.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::SizeMismatch {
                requested: HEADER_SIZE,
                available: bytes.len(),
            });
        }
        let header = Self {
            msg_type: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            length: u16::from_le_bytes([bytes[4], bytes[5]]),
            flags: u16::from_le_bytes([bytes[6], bytes[7]]),
            peer_id: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            origin_id: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
        };
        let length = usize::from(header.length);
        if length < HEADER_SIZE {
            return Err(ProtocolError::FrameTooShort(header.length));
        }
        if length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                length,
                max: MAX_FRAME_SIZE,
            });
        }
        Ok(header)
    }

    /// True when this frame declares an attached descriptor.
    #[must_use]
    pub const fn has_fd(&self) -> bool {
        self.flags & FLAG_FD != 0
    }
}

/// One complete protocol message: header, payload and optional descriptor.
///
/// Never partially visible to application code; the codec only yields frames
/// whose declared length is fully buffered.
#[derive(Debug)]
pub struct Frame {
    /// Parsed header.
    pub header: FrameHeader,
    /// Payload bytes (`length - HEADER_SIZE` of them).
    pub payload: Vec<u8>,
    /// Descriptor received with this frame, if it declared one.
    pub fd: Option<OwnedFd>,
}

/// Compose a frame and enqueue it on `channel`.
///
/// An `origin_id` of zero is replaced with the sending process's own id. The
/// descriptor, if any, is attached to the frame's buffer so it travels on the
/// same system call as the frame bytes.
pub fn compose(
    channel: &mut Channel,
    msg_type: u32,
    peer_id: u32,
    origin_id: u32,
    fd: Option<OwnedFd>,
    payload: &[u8],
) -> Result<(), ProtocolError> {
    let length = HEADER_SIZE + payload.len();
    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            length,
            max: MAX_FRAME_SIZE,
        });
    }
    let header = FrameHeader {
        msg_type,
        // In range: length <= MAX_FRAME_SIZE < u16::MAX.
        length: length as u16,
        flags: if fd.is_some() { FLAG_FD } else { 0 },
        peer_id,
        origin_id: if origin_id == 0 {
            std::process::id()
        } else {
            origin_id
        },
    };
    let mut buf = Buffer::dynamic(length, MAX_FRAME_SIZE)?;
    buf.set(&header.encode())?;
    buf.add(payload)?;
    if let Some(fd) = fd {
        buf.attach_fd(fd);
    }
    channel.enqueue(buf);
    Ok(())
}

/// Extract one complete frame from the channel's inbound buffer, if fully
/// present.
///
/// Frames may arrive split across arbitrarily many receive calls; leftover
/// bytes after one frame stay buffered for the next call. Returns `Ok(None)`
/// until at least the header and the declared length are available.
pub fn read_frame(channel: &mut Channel) -> Result<Option<Frame>, ProtocolError> {
    let inbound = channel.inbound();
    if inbound.len() < HEADER_SIZE {
        return Ok(None);
    }
    let header = FrameHeader::decode(inbound)?;
    let length = usize::from(header.length);
    if inbound.len() < length {
        return Ok(None);
    }
    let payload = inbound[HEADER_SIZE..length].to_vec();
    channel.consume_inbound(length);
    let fd = if header.has_fd() {
        channel.take_inbound_fd()
    } else {
        None
    };
    Ok(Some(Frame {
        header,
        payload,
        fd,
    }))
}

/// Extract every complete frame currently buffered on `channel`.
///
/// The pending inbound descriptor (at most one per receive call) is
/// associated with the first extracted frame that declared one. A descriptor
/// left unclaimed by any complete or partially-buffered frame is unexpected
/// and is closed immediately so the descriptor table cannot be exhausted.
pub fn drain_frames(channel: &mut Channel) -> Result<Vec<Frame>, ProtocolError> {
    let mut frames = Vec::new();
    while let Some(frame) = read_frame(channel)? {
        frames.push(frame);
    }
    discard_unclaimed_fd(channel, !frames.is_empty())?;
    Ok(frames)
}

/// Close a pending inbound descriptor that no frame will claim.
///
/// Must run once the caller has extracted every complete frame currently
/// buffered, with `progressed` reporting whether any frame came out. A
/// pending descriptor blocks further receives, so leaving an unclaimable one
/// in place wedges the channel; one that may still belong to the partial
/// frame being reassembled is kept.
pub fn discard_unclaimed_fd(channel: &mut Channel, progressed: bool) -> Result<(), ProtocolError> {
    if !channel.has_inbound_fd() {
        return Ok(());
    }
    let pending_wants_fd = if channel.inbound().len() >= HEADER_SIZE {
        Some(FrameHeader::decode(channel.inbound())?.has_fd())
    } else {
        None
    };
    match pending_wants_fd {
        // Belongs to the partial frame still being reassembled.
        Some(true) => {}
        Some(false) => {
            warn!("closing descriptor not claimed by any frame");
            channel.discard_inbound_fd();
        }
        None if progressed => {
            warn!("closing descriptor not claimed by any frame");
            channel.discard_inbound_fd();
        }
        // Header itself incomplete; the descriptor may belong to it.
        None => {}
    }
    Ok(())
}
