//! Message-framing transport: buffers, channels and the frame codec.

pub mod buffer;
pub mod channel;
pub mod frame;

pub use buffer::Buffer;
pub use channel::Channel;
pub use frame::{
    Frame, FrameHeader, HEADER_SIZE, MAX_FRAME_SIZE, compose, discard_unclaimed_fd, drain_frames,
    read_frame,
};
