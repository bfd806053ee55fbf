//! The server: a single-threaded poll loop over the listener, every client
//! channel and the timer queue.
//!
//! All state mutation happens on the loop thread. Frames on one channel are
//! applied strictly in order; clients interleave only at whole-message
//! granularity. A transport-fatal error marks the client dead: no further
//! events are processed, queued output drains, then the channel is torn
//! down.

pub mod client;
pub mod dispatch;
pub mod layout;
pub mod mouse;
pub mod resize;
pub mod timer;

use crate::bindings::KeyTables;
use crate::command::{self, Command};
use crate::config::Config;
use crate::error::{ProtocolError, Severity};
use crate::keys::Key;
use crate::protocol::{self, MsgType};
use crate::server::client::Client;
use crate::server::dispatch::{DispatchState, Resolution};
use crate::server::layout::Layout;
use crate::server::resize::ResizeQueue;
use crate::server::timer::{TimerKind, TimerQueue};
use crate::transport::{Channel, discard_unclaimed_fd, read_frame};
use anyhow::{Context, Result};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use std::collections::HashMap;
use std::os::fd::AsFd;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// The server state machine.
#[derive(Debug)]
pub struct Server {
    listener: UnixListener,
    socket_path: PathBuf,
    config: Config,
    prefix: Key,
    tables: KeyTables,
    layout: Layout,
    resizes: ResizeQueue,
    timers: TimerQueue,
    clients: HashMap<u32, Client>,
    next_client: u32,
}

impl Server {
    /// Bind the listening socket and install the configured bindings.
    pub fn bind(config: Config, socket_path: &Path) -> Result<Self> {
        let prefix = config.prefix()?;
        let mut tables = KeyTables::new();
        config.keys.install(&mut tables)?;

        if socket_path.exists() {
            std::fs::remove_file(socket_path)
                .with_context(|| format!("stale socket {}", socket_path.display()))?;
        }
        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("bind {}", socket_path.display()))?;
        listener.set_nonblocking(true).context("listener nonblocking")?;
        info!(socket = %socket_path.display(), "listening");

        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
            config,
            prefix,
            tables,
            layout: Layout::single(80, 24),
            resizes: ResizeQueue::new(),
            timers: TimerQueue::new(),
            clients: HashMap::new(),
            next_client: 1,
        })
    }

    /// Run the event loop until the process is killed.
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.poll_once(None)?;
        }
    }

    /// One poll iteration: wait for readiness or the next timer, then
    /// service everything that is ready. `cap` bounds the wait.
    pub fn poll_once(&mut self, cap: Option<std::time::Duration>) -> Result<()> {
        let timer_ms = self.timers.poll_timeout_ms(Instant::now());
        let cap_ms = cap.map(|d| u16::try_from(d.as_millis()).unwrap_or(u16::MAX));
        let timeout = match (timer_ms, cap_ms) {
            (Some(a), Some(b)) => PollTimeout::from(a.min(b)),
            (Some(ms), None) | (None, Some(ms)) => PollTimeout::from(ms),
            (None, None) => PollTimeout::NONE,
        };

        let mut ids = Vec::with_capacity(self.clients.len());
        let mut fds = Vec::with_capacity(self.clients.len() + 1);
        fds.push(PollFd::new(self.listener.as_fd(), PollFlags::POLLIN));
        for (&id, client) in &self.clients {
            // Dead clients only drain.
            let mut events = PollFlags::empty();
            if !client.is_dead() {
                events |= PollFlags::POLLIN;
            }
            if client.channel.wants_write() {
                events |= PollFlags::POLLOUT;
            }
            ids.push(id);
            fds.push(PollFd::new(client.channel.as_fd(), events));
        }

        match poll(&mut fds, timeout) {
            Ok(_) => {}
            Err(nix::errno::Errno::EINTR) => return Ok(()),
            Err(errno) => return Err(errno).context("poll"),
        }

        let accept_ready = fds[0]
            .revents()
            .is_some_and(|r| r.intersects(PollFlags::POLLIN));
        let ready: Vec<(u32, bool, bool)> = ids
            .iter()
            .zip(&fds[1..])
            .filter_map(|(&id, fd)| {
                let revents = fd.revents()?;
                let readable =
                    revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR);
                let writable = revents.intersects(PollFlags::POLLOUT);
                (readable || writable).then_some((id, readable, writable))
            })
            .collect();
        drop(fds);

        if accept_ready {
            self.accept_clients();
        }
        for (id, readable, writable) in ready {
            if writable {
                self.flush_client(id);
            }
            if readable {
                self.read_client(id)?;
            }
        }
        self.fire_timers()?;
        self.reap_clients();
        Ok(())
    }

    /// Count of connected clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    fn accept_clients(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    let channel = match Channel::new(stream) {
                        Ok(channel) => channel,
                        Err(err) => {
                            warn!(%err, "failed to set up accepted connection");
                            continue;
                        }
                    };
                    let id = self.next_client;
                    self.next_client += 1;
                    let client =
                        Client::new(id, channel, DispatchState::new(&self.tables), &self.config);
                    info!(client = id, "connection accepted");
                    self.clients.insert(id, client);
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                Err(err) => {
                    warn!(%err, "accept failed");
                    break;
                }
            }
        }
    }

    fn flush_client(&mut self, id: u32) {
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        match client.channel.send() {
            Ok(_) => {}
            Err(err) if err.is_backpressure() => {}
            Err(err) => {
                warn!(client = id, %err, "send failed");
                client.mark_dead("send failure");
            }
        }
        // A drained queue releases deferred redraws.
        if !client.is_dead() && client.channel.queued_bytes() == 0 && client.redraw.is_pending() {
            self.apply_deferred_redraw(id);
        }
    }

    fn read_client(&mut self, id: u32) -> Result<()> {
        let Some(client) = self.clients.get_mut(&id) else {
            return Ok(());
        };
        match client.channel.recv() {
            Ok(0) => {
                client.mark_dead("peer closed");
                return Ok(());
            }
            Ok(_) => {}
            Err(err) if err.is_backpressure() => {}
            Err(err) => {
                warn!(client = id, %err, "recv failed");
                client.shutdown("recv failure");
                return Ok(());
            }
        }
        self.process_frames(id)
    }

    fn process_frames(&mut self, id: u32) -> Result<()> {
        let mut progressed = false;
        loop {
            let Some(client) = self.clients.get_mut(&id) else {
                return Ok(());
            };
            if client.is_dead() {
                return Ok(());
            }
            let frame = match read_frame(&mut client.channel) {
                Ok(Some(frame)) => {
                    progressed = true;
                    frame
                }
                Ok(None) => {
                    // A descriptor no frame will claim blocks every further
                    // receive on this channel.
                    if let Err(err) = discard_unclaimed_fd(&mut client.channel, progressed) {
                        warn!(client = id, %err, "transport-fatal frame error");
                        client.shutdown("framing error");
                    }
                    return Ok(());
                }
                Err(err) => {
                    match err.severity() {
                        Severity::TransportFatal => {
                            warn!(client = id, %err, "transport-fatal frame error");
                            client.shutdown("framing error");
                        }
                        Severity::Recoverable | Severity::Backpressure => {
                            debug!(client = id, %err, "frame error, skipping");
                        }
                    }
                    return Ok(());
                }
            };

            let msg_type = match MsgType::try_from(frame.header.msg_type) {
                Ok(msg_type) => msg_type,
                Err(err) => {
                    // Unknown types are logged and skipped.
                    debug!(client = id, %err, "ignoring unknown message type");
                    continue;
                }
            };

            if let Err(err) = self.apply_frame(id, msg_type, &frame.payload, frame.fd) {
                let Some(client) = self.clients.get_mut(&id) else {
                    return Ok(());
                };
                match err.severity() {
                    Severity::TransportFatal => {
                        warn!(client = id, %err, "fatal protocol error");
                        client.shutdown("protocol error");
                        return Ok(());
                    }
                    Severity::Recoverable | Severity::Backpressure => {
                        debug!(client = id, %err, "recoverable protocol error");
                        client.status(&format!("protocol error: {err}"));
                    }
                }
            }
        }
    }

    fn apply_frame(
        &mut self,
        id: u32,
        msg_type: MsgType,
        payload: &[u8],
        fd: Option<std::os::fd::OwnedFd>,
    ) -> Result<(), ProtocolError> {
        let Some(client) = self.clients.get_mut(&id) else {
            return Ok(());
        };
        if !client.attached {
            let done = client.identify(msg_type, payload, fd)?;
            if done {
                let (cols, rows) = client.size;
                if self.clients.values().filter(|c| c.attached).count() == 1 {
                    self.layout = Layout::split(cols, rows);
                }
            }
            return Ok(());
        }

        match msg_type {
            MsgType::Command => {
                let argv = protocol::decode_command(payload)?;
                self.run_command_line(id, &argv);
            }
            MsgType::KeyInput => {
                let key = protocol::decode_key(payload)?;
                self.dispatch_key(id, key);
            }
            MsgType::MouseInput => {
                let input = protocol::decode_mouse(payload)?;
                let classified = client.mouse.classify(&input, &self.layout);
                if classified.arm_click_timer {
                    self.timers
                        .schedule(TimerKind::Click { client: id }, self.config.click_time());
                }
                for key in classified.keys {
                    self.dispatch_key(id, key);
                }
            }
            MsgType::Resize => {
                client.refresh_size()?;
                let (cols, rows) = client.size;
                let pane = self.layout.focused();
                if let Some(original) = self.layout.pane(pane).map(layout::Pane::size) {
                    self.resizes
                        .push(pane, original, cols, rows.saturating_sub(1));
                    self.timers
                        .schedule(TimerKind::ResizeCheck, self.config.resize_interval());
                }
            }
            other => {
                debug!(client = id, ?other, "unexpected message direction");
                client.status("unexpected message");
            }
        }
        Ok(())
    }

    fn run_command_line(&mut self, id: u32, argv: &[String]) {
        match command::parse(argv) {
            Ok(cmd) => self.execute(id, &cmd),
            Err(err) => {
                if let Some(client) = self.clients.get_mut(&id) {
                    client.status(&format!("{err:#}"));
                }
            }
        }
    }

    fn dispatch_key(&mut self, id: u32, key: Key) {
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        let prefix = self.prefix;
        let read_only = client.read_only;
        let resolution = client
            .dispatch
            .resolve(&mut self.tables, &key, &prefix, None, read_only);
        match resolution {
            Resolution::Command { table, binding } => {
                // Table bookkeeping settles before the commands run, so a
                // bound switch-table is not clobbered afterwards.
                if let Some(client) = self.clients.get_mut(&id) {
                    client.dispatch.after_match(&self.tables, binding.repeat);
                }
                if binding.repeat {
                    self.timers
                        .schedule(TimerKind::Repeat { client: id }, self.config.repeat_time());
                }
                // `table` pins the matched table until the command list ran.
                for cmd in &binding.commands {
                    self.execute(id, cmd);
                }
                drop(table);
            }
            Resolution::Consumed | Resolution::Drop => {}
            Resolution::Forward => {
                if let Some(pane) = self.layout.focused_pane_mut() {
                    pane.send_key(&key);
                }
            }
        }
    }

    fn execute(&mut self, id: u32, cmd: &Command) {
        debug!(client = id, command = cmd.name(), "executing");
        match cmd {
            Command::DetachClient { reason } => self.detach(id, reason.as_deref()),
            Command::SendPrefix => {
                let prefix = self.prefix;
                if let Some(pane) = self.layout.focused_pane_mut() {
                    pane.send_key(&prefix);
                }
            }
            Command::SwitchTable { table } => {
                if let Some(client) = self.clients.get_mut(&id) {
                    client.dispatch.switch_table(&mut self.tables, table);
                }
            }
            Command::BindKey {
                table,
                key,
                repeat,
                commands,
            } => {
                self.tables.get_or_create(table).bind(
                    *key,
                    crate::bindings::KeyBinding {
                        commands: commands.clone(),
                        repeat: *repeat,
                        note: None,
                    },
                );
            }
            Command::UnbindKey { table, key } => {
                let removed = self
                    .tables
                    .get(table)
                    .is_some_and(|table| table.unbind(key));
                self.tables.gc();
                if !removed && let Some(client) = self.clients.get_mut(&id) {
                    client.status(&format!("no binding for {key} in {table}"));
                }
            }
            Command::SetReadOnly { enabled } => {
                if let Some(client) = self.clients.get_mut(&id) {
                    client.read_only = *enabled;
                }
            }
            Command::ResizePane {
                pane,
                width,
                height,
            } => {
                let pane = pane.unwrap_or_else(|| self.layout.focused());
                if let Some(original) = self.layout.pane(pane).map(layout::Pane::size) {
                    self.resizes.push(pane, original, *width, *height);
                    self.timers
                        .schedule(TimerKind::ResizeCheck, self.config.resize_interval());
                } else if let Some(client) = self.clients.get_mut(&id) {
                    client.status(&format!("no such pane: {pane}"));
                }
            }
            Command::RefreshClient => self.request_redraw(id, None),
            Command::SelectPane { pane } => {
                if !self.layout.focus(*pane)
                    && let Some(client) = self.clients.get_mut(&id)
                {
                    client.status(&format!("no such pane: {pane}"));
                }
            }
            Command::ListKeys { table } => self.list_keys(id, table.as_deref()),
        }
    }

    fn detach(&mut self, id: u32, reason: Option<&str>) {
        self.timers.cancel_client(id);
        if let Some(client) = self.clients.get_mut(&id) {
            let payload = protocol::encode_reason(reason);
            if let Err(err) = client.queue(MsgType::Detach, &payload) {
                warn!(client = id, %err, "failed to queue detach");
            }
            client.mark_dead("detached");
        }
    }

    fn list_keys(&mut self, id: u32, table: Option<&str>) {
        let names = match table {
            Some(name) => vec![name.to_string()],
            None => self.tables.names(),
        };
        let mut lines = Vec::new();
        for name in names {
            let Some(table) = self.tables.get(&name) else {
                lines.push(format!("no such table: {name}"));
                continue;
            };
            for (key, binding) in table.entries() {
                let repeat = if binding.repeat { "-r " } else { "" };
                let commands = binding
                    .commands
                    .iter()
                    .map(Command::name)
                    .collect::<Vec<_>>()
                    .join(" ; ");
                lines.push(format!("bind-key {repeat}-T {name} {key} {commands}"));
            }
        }
        if let Some(client) = self.clients.get_mut(&id) {
            for line in lines {
                client.status(&line);
            }
        }
    }

    /// Redraw a pane (or the whole client when `pane` is `None`), deferring
    /// while output is queued.
    fn request_redraw(&mut self, id: u32, pane: Option<u32>) {
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        if client.is_dead() || !client.attached {
            return;
        }
        if client.channel.queued_bytes() > 0 {
            match pane {
                Some(pane) => client.redraw.defer_pane(pane),
                None => client.redraw.defer_all(),
            }
            self.timers
                .schedule(TimerKind::RedrawRetry, self.config.redraw_retry());
            return;
        }
        send_redraw(client, pane);
    }

    fn apply_deferred_redraw(&mut self, id: u32) {
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        let (all, panes) = client.redraw.take();
        if all {
            send_redraw(client, None);
        } else {
            for pane in panes {
                send_redraw(client, Some(pane));
            }
        }
    }

    fn fire_timers(&mut self) -> Result<()> {
        for kind in self.timers.expired(Instant::now()) {
            match kind {
                TimerKind::Repeat { client } => {
                    if let Some(client) = self.clients.get_mut(&client) {
                        client.dispatch.repeat_timeout(&self.tables);
                    }
                }
                TimerKind::Click { client } => {
                    if let Some(client) = self.clients.get_mut(&client) {
                        client.mouse.click_timeout();
                    }
                }
                TimerKind::ResizeCheck => self.apply_resizes(),
                TimerKind::RedrawRetry => self.retry_redraws(),
            }
        }
        Ok(())
    }

    fn apply_resizes(&mut self) {
        let actions = self.resizes.check();
        for action in &actions {
            if self
                .layout
                .set_pane_size(action.pane, action.width, action.height)
            {
                debug!(
                    pane = action.pane,
                    width = action.width,
                    height = action.height,
                    "pane resized"
                );
                let ids: Vec<u32> = self.clients.keys().copied().collect();
                for id in ids {
                    self.request_redraw(id, Some(action.pane));
                }
            }
        }
        if self.resizes.is_pending() {
            self.timers
                .schedule(TimerKind::ResizeCheck, self.config.resize_interval());
        }
    }

    fn retry_redraws(&mut self) {
        let ids: Vec<u32> = self.clients.keys().copied().collect();
        let mut still_blocked = false;
        for id in ids {
            let Some(client) = self.clients.get_mut(&id) else {
                continue;
            };
            if !client.redraw.is_pending() {
                continue;
            }
            if client.channel.queued_bytes() == 0 {
                self.apply_deferred_redraw(id);
            } else {
                still_blocked = true;
            }
        }
        if still_blocked {
            self.timers
                .schedule(TimerKind::RedrawRetry, self.config.redraw_retry());
        }
    }

    fn reap_clients(&mut self) {
        let drained: Vec<u32> = self
            .clients
            .iter()
            .filter(|(_, c)| c.drained())
            .map(|(&id, _)| id)
            .collect();
        for id in drained {
            if let Some(mut client) = self.clients.remove(&id) {
                info!(client = id, "client torn down");
                self.timers.cancel_client(id);
                client.channel.tear_down();
            }
        }
        self.tables.gc();
    }
}

/// Queue the redraw frame: empty payload for a whole-client redraw, the pane
/// id for a single pane.
fn send_redraw(client: &mut Client, pane: Option<u32>) {
    let payload = pane.map(|p| p.to_le_bytes().to_vec()).unwrap_or_default();
    if let Err(err) = client.queue(MsgType::Output, &payload) {
        warn!(client = client.id, %err, "failed to queue redraw");
        client.mark_dead("redraw queue failure");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}
