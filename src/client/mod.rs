//! The attaching client.
//!
//! Connects to the server socket, runs the identify handshake (ending with
//! the terminal descriptor and `IdentifyDone`), then forwards terminal
//! events as input frames and writes received output to the terminal until
//! the server sends `Exit` or `Detach`.

use crate::config::Config;
use crate::keys::{Code, Key};
use crate::protocol::{
    self, CLIENT_FLAG_READ_ONLY, IdentifyFlags, MouseInput, MouseInputKind, MsgType,
};
use crate::transport::{Channel, compose, read_frame};
use anyhow::{Context, Result, bail};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind, MouseEventKind,
};
use crossterm::{execute, terminal};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use std::io::Write;
use std::os::fd::AsFd;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Environment entries forwarded during identify.
const FORWARDED_ENV: &[&str] = &["LANG", "COLORTERM", "TERM_PROGRAM"];

/// Restores the terminal on drop, whatever path the loop exits by.
#[derive(Debug)]
struct RawGuard;

impl RawGuard {
    fn enter() -> Result<Self> {
        terminal::enable_raw_mode().context("enable raw mode")?;
        execute!(std::io::stdout(), EnableMouseCapture).context("enable mouse capture")?;
        Ok(Self)
    }
}

impl Drop for RawGuard {
    fn drop(&mut self) {
        let _ = execute!(std::io::stdout(), DisableMouseCapture);
        let _ = terminal::disable_raw_mode();
    }
}

/// Connect to the server and run the client loop until detached.
pub fn attach(config: &Config, socket: &Path, read_only: bool) -> Result<()> {
    let stream = UnixStream::connect(socket)
        .with_context(|| format!("connect {}", socket.display()))?;
    let mut channel = Channel::new(stream).context("channel setup")?;

    identify(&mut channel, config.read_only || read_only)?;
    flush(&mut channel)?;

    let guard = RawGuard::enter()?;
    let reason = run_loop(&mut channel);
    drop(guard);

    match reason? {
        Some(reason) => println!("[detached: {reason}]"),
        None => println!("[detached]"),
    }
    Ok(())
}

fn identify(channel: &mut Channel, read_only: bool) -> Result<()> {
    let term = std::env::var("TERM").unwrap_or_else(|_| "unknown".to_string());
    queue(channel, MsgType::IdentifyTerm, term.as_bytes())?;

    if let Ok(cwd) = std::env::current_dir() {
        queue(channel, MsgType::IdentifyCwd, cwd.to_string_lossy().as_bytes())?;
    }
    for name in FORWARDED_ENV {
        if let Ok(value) = std::env::var(name) {
            let entry = format!("{name}={value}");
            queue(channel, MsgType::IdentifyEnviron, entry.as_bytes())?;
        }
    }
    queue(channel, MsgType::IdentifyFeatures, &0u32.to_le_bytes())?;

    // Not attached to a tty (tests, pipes): register a nominal size.
    let (cols, rows) = terminal::size().unwrap_or((80, 24));
    let flags = IdentifyFlags {
        flags: if read_only { CLIENT_FLAG_READ_ONLY } else { 0 },
        cols,
        rows,
    };
    queue(channel, MsgType::IdentifyFlags, &flags.encode())?;

    let tty = std::io::stdin()
        .as_fd()
        .try_clone_to_owned()
        .context("duplicate stdin")?;
    compose(channel, MsgType::IdentifyStdin.as_u32(), 0, 0, Some(tty), &[])
        .context("queue identify stdin")?;

    queue(channel, MsgType::IdentifyDone, &[])?;
    Ok(())
}

fn queue(channel: &mut Channel, msg_type: MsgType, payload: &[u8]) -> Result<()> {
    compose(channel, msg_type.as_u32(), 0, 0, None, payload)
        .with_context(|| format!("queue {msg_type:?}"))
}

/// Block until everything queued has been written.
fn flush(channel: &mut Channel) -> Result<()> {
    while channel.wants_write() {
        match channel.send() {
            Ok(_) => {}
            Err(err) if err.is_backpressure() => {
                let mut fds = [PollFd::new(channel.as_fd(), PollFlags::POLLOUT)];
                match poll(&mut fds, PollTimeout::NONE) {
                    Ok(_) | Err(nix::errno::Errno::EINTR) => {}
                    Err(errno) => return Err(errno).context("poll for write"),
                }
            }
            Err(err) => return Err(err).context("send"),
        }
    }
    Ok(())
}

/// Returns the detach reason once the server ends the session.
fn run_loop(channel: &mut Channel) -> Result<Option<String>> {
    loop {
        if event::poll(Duration::from_millis(50)).context("event poll")? {
            forward_event(channel, event::read().context("event read")?)?;
        }
        if channel.wants_write() {
            match channel.send() {
                Ok(_) => {}
                Err(err) if err.is_backpressure() => {}
                Err(err) => return Err(err).context("send"),
            }
        }
        match channel.recv() {
            Ok(0) => bail!("server closed the connection"),
            Ok(_) => {
                if let Some(reason) = handle_frames(channel)? {
                    return Ok(reason);
                }
            }
            Err(err) if err.is_backpressure() => {}
            Err(err) => return Err(err).context("recv"),
        }
    }
}

fn forward_event(channel: &mut Channel, event: Event) -> Result<()> {
    match event {
        Event::Key(key_event) => {
            if key_event.kind != KeyEventKind::Press {
                return Ok(());
            }
            let key = Key {
                code: Code::Key(key_event.code),
                modifiers: key_event.modifiers,
            };
            match protocol::encode_key(&key) {
                Ok(payload) => queue(channel, MsgType::KeyInput, &payload)?,
                Err(err) => debug!(%err, "key has no wire encoding, skipped"),
            }
        }
        Event::Mouse(mouse_event) => {
            let kind = match mouse_event.kind {
                MouseEventKind::Down(button) => MouseInputKind::Down(button),
                MouseEventKind::Up(button) => MouseInputKind::Up(button),
                MouseEventKind::Drag(button) => MouseInputKind::Drag(button),
                MouseEventKind::Moved => MouseInputKind::Moved,
                MouseEventKind::ScrollUp => MouseInputKind::WheelUp,
                MouseEventKind::ScrollDown => MouseInputKind::WheelDown,
                MouseEventKind::ScrollLeft | MouseEventKind::ScrollRight => return Ok(()),
            };
            let input = MouseInput {
                kind,
                x: mouse_event.column,
                y: mouse_event.row,
                modifiers: mouse_event.modifiers,
            };
            queue(channel, MsgType::MouseInput, &protocol::encode_mouse(&input))?;
        }
        Event::Resize(_, _) => queue(channel, MsgType::Resize, &[])?,
        _ => {}
    }
    Ok(())
}

/// Drain and apply received frames. `Some` ends the session.
#[allow(clippy::option_option, reason = "outer None means keep running")]
fn handle_frames(channel: &mut Channel) -> Result<Option<Option<String>>> {
    loop {
        let frame = match read_frame(channel) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(None),
            Err(err) if err.is_backpressure() => return Ok(None),
            Err(err) => return Err(err).context("frame decode"),
        };
        let Ok(msg_type) = MsgType::try_from(frame.header.msg_type) else {
            debug!(msg_type = frame.header.msg_type, "unknown message type");
            continue;
        };
        match msg_type {
            MsgType::Ready => debug!("attached"),
            MsgType::Output => {
                let mut stdout = std::io::stdout();
                stdout.write_all(&frame.payload).context("write output")?;
                stdout.flush().context("flush output")?;
            }
            MsgType::StatusMessage => {
                let line = String::from_utf8_lossy(&frame.payload);
                // Raw mode needs the explicit carriage return.
                print!("{line}\r\n");
                std::io::stdout().flush().context("flush status")?;
            }
            MsgType::Exit | MsgType::Detach => {
                return Ok(Some(protocol::decode_reason(&frame.payload)));
            }
            other => warn!(?other, "unexpected message from server"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::drain_frames;

    #[test]
    fn test_identify_sequence_order_and_fd() -> Result<()> {
        let (mut client_side, mut server_side) = Channel::pair()?;
        identify(&mut client_side, true)?;
        flush(&mut client_side)?;

        server_side.recv()?;
        let frames = drain_frames(&mut server_side)?;
        let types: Vec<u32> = frames.iter().map(|f| f.header.msg_type).collect();

        assert_eq!(types.first(), Some(&MsgType::IdentifyTerm.as_u32()));
        assert_eq!(types.last(), Some(&MsgType::IdentifyDone.as_u32()));

        let flags_frame = frames
            .iter()
            .find(|f| f.header.msg_type == MsgType::IdentifyFlags.as_u32())
            .context("flags frame")?;
        let flags = IdentifyFlags::decode(&flags_frame.payload)?;
        assert_eq!(flags.flags & CLIENT_FLAG_READ_ONLY, CLIENT_FLAG_READ_ONLY);

        let stdin_frame = frames
            .iter()
            .find(|f| f.header.msg_type == MsgType::IdentifyStdin.as_u32())
            .context("stdin frame")?;
        assert!(stdin_frame.fd.is_some(), "terminal descriptor passed");
        Ok(())
    }

    #[test]
    fn test_exit_frame_ends_the_loop_with_reason() -> Result<()> {
        let (mut client_side, mut server_side) = Channel::pair()?;
        compose(
            &mut server_side,
            MsgType::Exit.as_u32(),
            1,
            0,
            None,
            b"server shutdown",
        )?;
        flush(&mut server_side)?;

        client_side.recv()?;
        let outcome = handle_frames(&mut client_side)?;
        assert_eq!(outcome, Some(Some("server shutdown".to_string())));
        Ok(())
    }
}
