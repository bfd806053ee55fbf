//! Server fixture: a bound server on a temp socket plus channel helpers.

use anyhow::{Context, Result};
use ptmux::Config;
use ptmux::protocol::{IdentifyFlags, MsgType};
use ptmux::server::Server;
use ptmux::transport::{Channel, Frame, compose, drain_frames};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

/// A server bound to a socket in a temp directory.
pub struct TestFixture {
    _dir: TempDir,
    pub server: Server,
    socket: PathBuf,
}

impl TestFixture {
    /// Bind a server with short coalescing intervals so timer-driven tests
    /// finish quickly.
    pub fn new() -> Result<Self> {
        let config = Config {
            repeat_time_ms: 50,
            click_time_ms: 30,
            resize_interval_ms: 10,
            redraw_retry_ms: 10,
            ..Config::default()
        };
        Self::with_config(config)
    }

    pub fn with_config(config: Config) -> Result<Self> {
        let dir = TempDir::new()?;
        let socket = dir.path().join("ptmux.sock");
        let server = Server::bind(config, &socket)?;
        Ok(Self {
            _dir: dir,
            server,
            socket,
        })
    }

    /// Open a raw connection without identifying.
    pub fn connect(&self) -> Result<Channel> {
        let stream = UnixStream::connect(&self.socket).context("connect")?;
        Channel::new(stream).context("channel")
    }

    /// Connect and run the identify handshake; returns the channel with the
    /// `Ready` frame already consumed.
    pub fn attach(&mut self) -> Result<Channel> {
        let mut channel = self.connect()?;
        queue(&mut channel, MsgType::IdentifyTerm, b"xterm-256color")?;
        let flags = IdentifyFlags {
            flags: 0,
            cols: 80,
            rows: 24,
        };
        queue(&mut channel, MsgType::IdentifyFlags, &flags.encode())?;
        queue(&mut channel, MsgType::IdentifyDone, &[])?;
        flush(&mut channel)?;

        // Accept, read the identify frames, flush the Ready frame.
        self.pump(3)?;

        let frames = recv_frames(&mut channel, 1)?;
        assert_eq!(frames[0].header.msg_type, MsgType::Ready.as_u32());
        Ok(channel)
    }

    /// Queue a command frame without driving the server, so several
    /// commands can land in one loop iteration.
    pub fn queue_command(&self, channel: &mut Channel, argv: &[&str]) -> Result<()> {
        let argv: Vec<String> = argv.iter().map(ToString::to_string).collect();
        queue(channel, MsgType::Command, &ptmux::protocol::encode_command(&argv))?;
        Ok(())
    }

    /// Queue a command frame and let the server process it.
    pub fn command(&mut self, channel: &mut Channel, argv: &[&str]) -> Result<()> {
        self.queue_command(channel, argv)?;
        flush(channel)?;
        self.pump(2)?;
        Ok(())
    }

    /// Run bounded poll iterations; each waits at most 20ms for readiness
    /// or a timer.
    pub fn pump(&mut self, iterations: usize) -> Result<()> {
        for _ in 0..iterations {
            self.server.poll_once(Some(Duration::from_millis(20)))?;
        }
        Ok(())
    }
}

fn queue(channel: &mut Channel, msg_type: MsgType, payload: &[u8]) -> Result<()> {
    compose(channel, msg_type.as_u32(), 0, 0, None, payload).context("compose")
}

/// Send until the outbound queue is empty.
pub fn flush(channel: &mut Channel) -> Result<()> {
    while channel.wants_write() {
        match channel.send() {
            Ok(_) => {}
            Err(err) if err.is_backpressure() => {
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(err) => return Err(err).context("send"),
        }
    }
    Ok(())
}

/// Receive until at least `min` frames arrived.
pub fn recv_frames(channel: &mut Channel, min: usize) -> Result<Vec<Frame>> {
    let mut frames = Vec::new();
    for _ in 0..200 {
        match channel.recv() {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) if err.is_backpressure() => {
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(err) => return Err(err).context("recv"),
        }
        frames.extend(drain_frames(channel)?);
        if frames.len() >= min {
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    Ok(frames)
}
