//! Per-client server state.
//!
//! A client is a channel plus everything learned during the identify
//! sequence, the dispatch and mouse state machines, and the deferred-redraw
//! set. Marking a client dead stops event processing immediately; its
//! queued output drains before the channel is torn down.

use crate::config::Config;
use crate::error::ProtocolError;
use crate::protocol::{self, IdentifyFlags, MsgType};
use crate::server::dispatch::DispatchState;
use crate::server::mouse::MouseState;
use crate::server::resize::DeferredRedraw;
use crate::transport::{Channel, compose};
use std::os::fd::{AsRawFd, OwnedFd};
use tracing::{debug, warn};

/// Identify-sequence fields, filled in as frames arrive.
#[derive(Debug, Default)]
pub struct Identity {
    /// `$TERM` reported by the client.
    pub term: Option<String>,
    /// Client working directory.
    pub cwd: Option<String>,
    /// Environment entries, one `NAME=value` per identify frame.
    pub environ: Vec<String>,
    /// Terminal capability bits.
    pub features: u32,
    /// The client's terminal descriptor, passed over the socket.
    pub tty: Option<OwnedFd>,
}

/// One attached (or attaching) client.
#[derive(Debug)]
pub struct Client {
    /// Stable client id, also used as the frame `peer_id`.
    pub id: u32,
    /// The client's channel.
    pub channel: Channel,
    /// Identify-sequence state.
    pub identity: Identity,
    /// Key-table dispatch state.
    pub dispatch: DispatchState,
    /// Mouse classification state.
    pub mouse: MouseState,
    /// Redraws deferred behind queued output.
    pub redraw: DeferredRedraw,
    /// Terminal size registered at identify time and on resize.
    pub size: (u16, u16),
    /// Identify sequence completed.
    pub attached: bool,
    /// Input from this client is never applied.
    pub read_only: bool,
    /// No further events are processed; output drains, then teardown.
    dead: bool,
}

impl Client {
    /// Wrap an accepted connection.
    pub fn new(id: u32, channel: Channel, dispatch: DispatchState, config: &Config) -> Self {
        Self {
            id,
            channel,
            identity: Identity::default(),
            dispatch,
            mouse: MouseState::new(),
            redraw: DeferredRedraw::default(),
            size: (0, 0),
            attached: false,
            read_only: config.read_only,
            dead: false,
        }
    }

    /// True once the client is marked dead.
    #[must_use]
    pub const fn is_dead(&self) -> bool {
        self.dead
    }

    /// Stop processing this client's events. Queued output still drains.
    pub fn mark_dead(&mut self, why: &str) {
        if !self.dead {
            debug!(client = self.id, why, "client marked dead");
            self.dead = true;
        }
    }

    /// Kill the client for `reason`, notifying it first. An `Exit` frame
    /// carrying the reason is queued and drains with the rest of the output
    /// before teardown. Used for transport-fatal errors; a detach sends
    /// `Detach` instead.
    pub fn shutdown(&mut self, reason: &str) {
        if self.dead {
            return;
        }
        if let Err(err) = self.queue(MsgType::Exit, &protocol::encode_reason(Some(reason))) {
            warn!(client = self.id, %err, "failed to queue exit notice");
        }
        self.mark_dead(reason);
    }

    /// True when nothing remains to flush and the channel can be torn down.
    #[must_use]
    pub fn drained(&self) -> bool {
        self.dead && !self.channel.wants_write()
    }

    /// Queue a frame for this client.
    pub fn queue(
        &mut self,
        msg_type: MsgType,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        compose(
            &mut self.channel,
            msg_type.as_u32(),
            self.id,
            0,
            None,
            payload,
        )
    }

    /// Queue a one-line status message.
    pub fn status(&mut self, line: &str) {
        if let Err(err) = self.queue(MsgType::StatusMessage, line.as_bytes()) {
            warn!(client = self.id, %err, "failed to queue status message");
            self.mark_dead("status queue failure");
        }
    }

    /// Apply one identify frame; returns true on `IdentifyDone`.
    pub fn identify(
        &mut self,
        msg_type: MsgType,
        payload: &[u8],
        fd: Option<OwnedFd>,
    ) -> Result<bool, ProtocolError> {
        match msg_type {
            MsgType::IdentifyTerm => self.identity.term = Some(text(payload)?),
            MsgType::IdentifyCwd => self.identity.cwd = Some(text(payload)?),
            MsgType::IdentifyEnviron => self.identity.environ.push(text(payload)?),
            MsgType::IdentifyFeatures => {
                let bytes: [u8; 4] = payload
                    .try_into()
                    .map_err(|_| ProtocolError::MalformedPayload("features are 4 bytes"))?;
                self.identity.features = u32::from_le_bytes(bytes);
            }
            MsgType::IdentifyFlags => {
                let flags = IdentifyFlags::decode(payload)?;
                self.size = (flags.cols, flags.rows);
                if flags.flags & protocol::CLIENT_FLAG_READ_ONLY != 0 {
                    self.read_only = true;
                }
            }
            MsgType::IdentifyStdin => {
                let fd = fd.ok_or(ProtocolError::MalformedPayload(
                    "identify stdin carried no descriptor",
                ))?;
                debug!(client = self.id, fd = fd.as_raw_fd(), "client tty registered");
                self.identity.tty = Some(fd);
            }
            MsgType::IdentifyDone => {
                self.attached = true;
                debug!(
                    client = self.id,
                    term = self.identity.term.as_deref().unwrap_or("?"),
                    cols = self.size.0,
                    rows = self.size.1,
                    "client attached"
                );
                self.queue(MsgType::Ready, &[])?;
                return Ok(true);
            }
            _ => {
                return Err(ProtocolError::MalformedPayload(
                    "non-identify message before IdentifyDone",
                ));
            }
        }
        Ok(false)
    }

    /// Re-read the client terminal's size from the passed descriptor.
    pub fn refresh_size(&mut self) -> Result<(), ProtocolError> {
        let Some(tty) = &self.identity.tty else {
            return Err(ProtocolError::MalformedPayload("resize before tty passed"));
        };
        self.size = tty_size(tty)?;
        debug!(
            client = self.id,
            cols = self.size.0,
            rows = self.size.1,
            "client terminal resized"
        );
        Ok(())
    }
}

fn text(payload: &[u8]) -> Result<String, ProtocolError> {
    std::str::from_utf8(payload)
        .map(ToString::to_string)
        .map_err(|_| ProtocolError::MalformedPayload("identify string is not UTF-8"))
}

#[allow(unsafe_code, reason = "generated TIOCGWINSZ ioctl wrapper")]
mod ioctl {
    nix::ioctl_read_bad!(read_winsize, nix::libc::TIOCGWINSZ, nix::libc::winsize);
}

fn tty_size(tty: &OwnedFd) -> Result<(u16, u16), ProtocolError> {
    let mut ws = nix::libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: the descriptor is owned and open, and the winsize out-param
    // lives for the duration of the call.
    #[allow(unsafe_code, reason = "TIOCGWINSZ on the client's passed tty")]
    unsafe {
        ioctl::read_winsize(tty.as_raw_fd(), &raw mut ws)
    }
    .map_err(|errno| ProtocolError::Io(std::io::Error::from(errno)))?;
    Ok((ws.ws_col, ws.ws_row))
}
