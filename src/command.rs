//! Command parsing.
//!
//! Commands are what key bindings and `Command` frames carry: a small argv
//! vector parsed into a typed [`Command`]. Execution lives in the server,
//! next to the state it mutates.

use crate::keys::{Key, parse_key};
use anyhow::{Context, Result, bail};

/// A parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Detach the issuing client with an optional reason.
    DetachClient {
        /// Reason reported to the client.
        reason: Option<String>,
    },
    /// Forward the configured prefix key to the focused pane.
    SendPrefix,
    /// Switch the client's current key table.
    SwitchTable {
        /// Target table name.
        table: String,
    },
    /// Install a binding in a key table.
    BindKey {
        /// Table name (`root` unless `-T` was given).
        table: String,
        /// Key to bind.
        key: Key,
        /// Whether the binding is repeat-eligible (`-r`).
        repeat: bool,
        /// Bound command list.
        commands: Vec<Command>,
    },
    /// Remove a binding from a key table.
    UnbindKey {
        /// Table name.
        table: String,
        /// Key to unbind.
        key: Key,
    },
    /// Set or clear the issuing client's read-only flag.
    SetReadOnly {
        /// New flag value.
        enabled: bool,
    },
    /// Queue a size change for a pane.
    ResizePane {
        /// Target pane; the focused pane when absent.
        pane: Option<u32>,
        /// Requested width.
        width: u16,
        /// Requested height.
        height: u16,
    },
    /// Request a full redraw for the issuing client.
    RefreshClient,
    /// Change the focused pane.
    SelectPane {
        /// Target pane id.
        pane: u32,
    },
    /// Report the bindings of one table (or all tables) as a status message.
    ListKeys {
        /// Restrict to one table.
        table: Option<String>,
    },
}

impl Command {
    /// The command's wire/config name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::DetachClient { .. } => "detach-client",
            Self::SendPrefix => "send-prefix",
            Self::SwitchTable { .. } => "switch-table",
            Self::BindKey { .. } => "bind-key",
            Self::UnbindKey { .. } => "unbind-key",
            Self::SetReadOnly { .. } => "set-read-only",
            Self::ResizePane { .. } => "resize-pane",
            Self::RefreshClient => "refresh-client",
            Self::SelectPane { .. } => "select-pane",
            Self::ListKeys { .. } => "list-keys",
        }
    }
}

/// Parse one command from an argv vector.
pub fn parse(argv: &[String]) -> Result<Command> {
    let Some((name, args)) = argv.split_first() else {
        bail!("empty command");
    };
    match name.as_str() {
        "detach-client" => Ok(Command::DetachClient {
            reason: args.first().cloned(),
        }),
        "send-prefix" => Ok(Command::SendPrefix),
        "switch-table" => {
            let table = args.first().context("switch-table needs a table name")?;
            Ok(Command::SwitchTable {
                table: table.clone(),
            })
        }
        "bind-key" => parse_bind(args),
        "unbind-key" => {
            let (table, rest) = take_table(args);
            let key_spec = rest.first().context("unbind-key needs a key")?;
            Ok(Command::UnbindKey {
                table,
                key: parse_key(key_spec)?,
            })
        }
        "set-read-only" => {
            let value = args.first().map_or("on", String::as_str);
            let enabled = match value {
                "on" => true,
                "off" => false,
                other => bail!("set-read-only expects on/off, got {other:?}"),
            };
            Ok(Command::SetReadOnly { enabled })
        }
        "resize-pane" => parse_resize(args),
        "refresh-client" => Ok(Command::RefreshClient),
        "select-pane" => {
            let (pane, _) = take_target(args);
            let pane = pane.context("select-pane needs -t <pane>")?;
            Ok(Command::SelectPane { pane })
        }
        "list-keys" => {
            let table = match args.first().map(String::as_str) {
                Some("-T") => args.get(1).cloned(),
                Some(name) => Some(name.to_string()),
                None => None,
            };
            Ok(Command::ListKeys { table })
        }
        other => bail!("unknown command: {other}"),
    }
}

/// Parse a command line into a command list, splitting on `;` tokens.
pub fn parse_command_line(line: &str) -> Result<Vec<Command>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        bail!("command line is empty");
    }
    let tokens = shell_words::split(trimmed).context("failed to parse command line")?;
    if tokens.is_empty() {
        bail!("command line produced no argv items");
    }

    let mut commands = Vec::new();
    for argv in tokens.split(|token| token == ";") {
        if argv.is_empty() {
            continue;
        }
        commands.push(parse(argv)?);
    }
    if commands.is_empty() {
        bail!("command line produced no commands");
    }
    Ok(commands)
}

fn parse_bind(args: &[String]) -> Result<Command> {
    let mut repeat = false;
    let mut rest: &[String] = args;
    if rest.first().map(String::as_str) == Some("-r") {
        repeat = true;
        rest = &rest[1..];
    }
    let (table, rest) = take_table(rest);
    let Some((key_spec, command_args)) = rest.split_first() else {
        bail!("bind-key needs a key");
    };
    if command_args.is_empty() {
        bail!("bind-key needs a command");
    }
    let mut commands = Vec::new();
    for argv in command_args.split(|token| token == ";") {
        if argv.is_empty() {
            continue;
        }
        commands.push(parse(argv)?);
    }
    if commands.is_empty() {
        bail!("bind-key needs a command");
    }
    Ok(Command::BindKey {
        table,
        key: parse_key(key_spec)?,
        repeat,
        commands,
    })
}

fn parse_resize(args: &[String]) -> Result<Command> {
    let (pane, rest) = take_target(args);
    let (Some(width), Some(height)) = (rest.first(), rest.get(1)) else {
        bail!("resize-pane needs <width> <height>");
    };
    Ok(Command::ResizePane {
        pane,
        width: width.parse().context("bad width")?,
        height: height.parse().context("bad height")?,
    })
}

/// Consume a leading `-T <table>`, defaulting to the root table.
fn take_table(args: &[String]) -> (String, Vec<String>) {
    if args.first().map(String::as_str) == Some("-T")
        && let Some(table) = args.get(1)
    {
        return (table.clone(), args[2..].to_vec());
    }
    (crate::bindings::ROOT_TABLE.to_string(), args.to_vec())
}

/// Consume a leading `-t <id>`.
fn take_target(args: &[String]) -> (Option<u32>, Vec<String>) {
    if args.first().map(String::as_str) == Some("-t")
        && let Some(id) = args.get(1).and_then(|arg| arg.parse().ok())
    {
        return (Some(id), args[2..].to_vec());
    }
    (None, args.to_vec())
}
