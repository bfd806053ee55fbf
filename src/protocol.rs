//! Message types and payload layouts.
//!
//! Frame payloads are fixed little-endian layouts, small enough to stay well
//! under the frame size cap. Input events carry compact encodings of
//! crossterm key and mouse events; the identify sequence, command vector and
//! exit/detach messages carry strings and counted vectors.

use crate::error::ProtocolError;
use crate::keys::{Code, Key};
use crossterm::event::{KeyCode as TermCode, KeyModifiers, MouseButton};

/// Message type ids.
///
/// Client to server: the `Identify*` sequence (terminated by
/// [`MsgType::IdentifyDone`]), then input and control messages. Server to
/// client: readiness, output and termination messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MsgType {
    /// Terminal name (`$TERM`), UTF-8.
    IdentifyTerm = 100,
    /// Client working directory, UTF-8.
    IdentifyCwd = 101,
    /// One environment entry (`NAME=value`), UTF-8; sent repeatedly.
    IdentifyEnviron = 102,
    /// Terminal capability bits.
    IdentifyFeatures = 103,
    /// Client flag bits plus the initial terminal size.
    IdentifyFlags = 104,
    /// Carries the client's terminal descriptor; empty payload.
    IdentifyStdin = 105,
    /// Ends the identify sequence; the client counts as attached after this.
    IdentifyDone = 106,

    /// An argv vector to execute.
    Command = 200,
    /// The client's terminal was resized; empty payload (the server consults
    /// the registered terminal size, not the message body).
    Resize = 201,
    /// One keyboard event.
    KeyInput = 202,
    /// One raw mouse event.
    MouseInput = 203,

    /// Identify accepted; the client is attached.
    Ready = 300,
    /// Rendered output bytes for the client's terminal.
    Output = 301,
    /// A one-line status/error message.
    StatusMessage = 302,
    /// The server is closing this client; optional reason string.
    Exit = 303,
    /// The client was detached; optional reason string.
    Detach = 304,
}

impl MsgType {
    /// The wire id.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for MsgType {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, ProtocolError> {
        Ok(match value {
            100 => Self::IdentifyTerm,
            101 => Self::IdentifyCwd,
            102 => Self::IdentifyEnviron,
            103 => Self::IdentifyFeatures,
            104 => Self::IdentifyFlags,
            105 => Self::IdentifyStdin,
            106 => Self::IdentifyDone,
            200 => Self::Command,
            201 => Self::Resize,
            202 => Self::KeyInput,
            203 => Self::MouseInput,
            300 => Self::Ready,
            301 => Self::Output,
            302 => Self::StatusMessage,
            303 => Self::Exit,
            304 => Self::Detach,
            other => return Err(ProtocolError::UnknownType(other)),
        })
    }
}

// ---- Command vector ------------------------------------------------------

/// Encode an argv vector: `argc: u32` then argc NUL-terminated strings.
#[must_use]
pub fn encode_command(argv: &[String]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + argv.iter().map(|a| a.len() + 1).sum::<usize>());
    out.extend_from_slice(&u32::try_from(argv.len()).unwrap_or(u32::MAX).to_le_bytes());
    for arg in argv {
        out.extend_from_slice(arg.as_bytes());
        out.push(0);
    }
    out
}

/// Decode an argv vector.
///
/// A truncated count, a missing trailing NUL or a count mismatch is a
/// malformed payload, which is transport-fatal for the channel that sent it.
pub fn decode_command(payload: &[u8]) -> Result<Vec<String>, ProtocolError> {
    let Some(count_bytes) = payload.get(0..4) else {
        return Err(ProtocolError::MalformedPayload("truncated argument count"));
    };
    let argc = u32::from_le_bytes([
        count_bytes[0],
        count_bytes[1],
        count_bytes[2],
        count_bytes[3],
    ]) as usize;

    let mut argv = Vec::with_capacity(argc.min(64));
    let mut rest = &payload[4..];
    for _ in 0..argc {
        let Some(nul) = rest.iter().position(|&b| b == 0) else {
            return Err(ProtocolError::MalformedPayload(
                "argument missing trailing NUL",
            ));
        };
        let arg = std::str::from_utf8(&rest[..nul])
            .map_err(|_| ProtocolError::MalformedPayload("argument is not UTF-8"))?;
        argv.push(arg.to_string());
        rest = &rest[nul + 1..];
    }
    if !rest.is_empty() {
        return Err(ProtocolError::MalformedPayload(
            "trailing bytes after argument vector",
        ));
    }
    Ok(argv)
}

// ---- Keyboard events -----------------------------------------------------

const KEY_TAG_CHAR: u8 = 0;
const KEY_TAG_FUNCTION: u8 = 1;
const KEY_TAG_NAMED: u8 = 2;

fn named_code(code: TermCode) -> Option<u8> {
    Some(match code {
        TermCode::Enter => 0,
        TermCode::Tab => 1,
        TermCode::Esc => 2,
        TermCode::Backspace => 3,
        TermCode::Up => 4,
        TermCode::Down => 5,
        TermCode::Left => 6,
        TermCode::Right => 7,
        TermCode::Home => 8,
        TermCode::End => 9,
        TermCode::PageUp => 10,
        TermCode::PageDown => 11,
        TermCode::Delete => 12,
        TermCode::Insert => 13,
        _ => return None,
    })
}

fn code_from_named(value: u8) -> Option<TermCode> {
    Some(match value {
        0 => TermCode::Enter,
        1 => TermCode::Tab,
        2 => TermCode::Esc,
        3 => TermCode::Backspace,
        4 => TermCode::Up,
        5 => TermCode::Down,
        6 => TermCode::Left,
        7 => TermCode::Right,
        8 => TermCode::Home,
        9 => TermCode::End,
        10 => TermCode::PageUp,
        11 => TermCode::PageDown,
        12 => TermCode::Delete,
        13 => TermCode::Insert,
        _ => return None,
    })
}

/// Encode a keyboard key: `tag: u8`, `value: u32`, `modifiers: u8`.
pub fn encode_key(key: &Key) -> Result<Vec<u8>, ProtocolError> {
    let Code::Key(code) = key.code else {
        return Err(ProtocolError::MalformedPayload(
            "only keyboard keys travel as key input",
        ));
    };
    let (tag, value) = match code {
        TermCode::Char(ch) => (KEY_TAG_CHAR, ch as u32),
        TermCode::F(n) => (KEY_TAG_FUNCTION, u32::from(n)),
        named => (
            KEY_TAG_NAMED,
            u32::from(named_code(named).ok_or(ProtocolError::MalformedPayload(
                "key has no wire encoding",
            ))?),
        ),
    };
    let mut out = Vec::with_capacity(6);
    out.push(tag);
    out.extend_from_slice(&value.to_le_bytes());
    out.push(key.modifiers.bits());
    Ok(out)
}

/// Decode a keyboard key event.
pub fn decode_key(payload: &[u8]) -> Result<Key, ProtocolError> {
    if payload.len() != 6 {
        return Err(ProtocolError::MalformedPayload("key event is 6 bytes"));
    }
    let value = u32::from_le_bytes([payload[1], payload[2], payload[3], payload[4]]);
    let code = match payload[0] {
        KEY_TAG_CHAR => TermCode::Char(
            char::from_u32(value)
                .ok_or(ProtocolError::MalformedPayload("bad character scalar"))?,
        ),
        KEY_TAG_FUNCTION => {
            let n = u8::try_from(value)
                .map_err(|_| ProtocolError::MalformedPayload("bad function key"))?;
            TermCode::F(n)
        }
        KEY_TAG_NAMED => {
            let byte = u8::try_from(value)
                .map_err(|_| ProtocolError::MalformedPayload("bad named key"))?;
            code_from_named(byte).ok_or(ProtocolError::MalformedPayload("bad named key"))?
        }
        _ => return Err(ProtocolError::MalformedPayload("bad key tag")),
    };
    Ok(Key {
        code: Code::Key(code),
        modifiers: KeyModifiers::from_bits_truncate(payload[5]),
    })
}

// ---- Mouse events --------------------------------------------------------

/// What the terminal reported, before classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseInputKind {
    /// Button pressed.
    Down(MouseButton),
    /// Button released.
    Up(MouseButton),
    /// Motion with a button held.
    Drag(MouseButton),
    /// Motion with no button held.
    Moved,
    /// Wheel up.
    WheelUp,
    /// Wheel down.
    WheelDown,
}

/// A raw mouse event as sent by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseInput {
    /// Event kind.
    pub kind: MouseInputKind,
    /// Column.
    pub x: u16,
    /// Row.
    pub y: u16,
    /// Modifier bits held during the event.
    pub modifiers: KeyModifiers,
}

const MOUSE_NO_BUTTON: u8 = 0xff;

fn button_byte(button: MouseButton) -> u8 {
    match button {
        MouseButton::Left => 0,
        MouseButton::Middle => 1,
        MouseButton::Right => 2,
    }
}

fn button_from_byte(byte: u8) -> Result<MouseButton, ProtocolError> {
    Ok(match byte {
        0 => MouseButton::Left,
        1 => MouseButton::Middle,
        2 => MouseButton::Right,
        _ => return Err(ProtocolError::MalformedPayload("bad mouse button")),
    })
}

/// Encode a raw mouse event: `kind: u8`, `button: u8`, `x: u16`, `y: u16`,
/// `modifiers: u8`.
#[must_use]
pub fn encode_mouse(input: &MouseInput) -> Vec<u8> {
    let (kind, button) = match input.kind {
        MouseInputKind::Down(b) => (0u8, button_byte(b)),
        MouseInputKind::Up(b) => (1, button_byte(b)),
        MouseInputKind::Drag(b) => (2, button_byte(b)),
        MouseInputKind::Moved => (3, MOUSE_NO_BUTTON),
        MouseInputKind::WheelUp => (4, MOUSE_NO_BUTTON),
        MouseInputKind::WheelDown => (5, MOUSE_NO_BUTTON),
    };
    let mut out = Vec::with_capacity(7);
    out.push(kind);
    out.push(button);
    out.extend_from_slice(&input.x.to_le_bytes());
    out.extend_from_slice(&input.y.to_le_bytes());
    out.push(input.modifiers.bits());
    out
}

/// Decode a raw mouse event.
pub fn decode_mouse(payload: &[u8]) -> Result<MouseInput, ProtocolError> {
    if payload.len() != 7 {
        return Err(ProtocolError::MalformedPayload("mouse event is 7 bytes"));
    }
    let kind = match payload[0] {
        0 => MouseInputKind::Down(button_from_byte(payload[1])?),
        1 => MouseInputKind::Up(button_from_byte(payload[1])?),
        2 => MouseInputKind::Drag(button_from_byte(payload[1])?),
        3 => MouseInputKind::Moved,
        4 => MouseInputKind::WheelUp,
        5 => MouseInputKind::WheelDown,
        _ => return Err(ProtocolError::MalformedPayload("bad mouse kind")),
    };
    Ok(MouseInput {
        kind,
        x: u16::from_le_bytes([payload[2], payload[3]]),
        y: u16::from_le_bytes([payload[4], payload[5]]),
        modifiers: KeyModifiers::from_bits_truncate(payload[6]),
    })
}

// ---- Identify flags ------------------------------------------------------

/// Client flag bit: the client asks to be attached read-only.
pub const CLIENT_FLAG_READ_ONLY: u32 = 0x1;

/// Flags plus initial terminal size, sent in `IdentifyFlags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentifyFlags {
    /// Flag bits.
    pub flags: u32,
    /// Terminal columns at attach time.
    pub cols: u16,
    /// Terminal rows at attach time.
    pub rows: u16,
}

impl IdentifyFlags {
    /// Encode: `flags: u32`, `cols: u16`, `rows: u16`.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8);
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.cols.to_le_bytes());
        out.extend_from_slice(&self.rows.to_le_bytes());
        out
    }

    /// Decode from wire bytes.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() != 8 {
            return Err(ProtocolError::MalformedPayload("identify flags are 8 bytes"));
        }
        Ok(Self {
            flags: u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]),
            cols: u16::from_le_bytes([payload[4], payload[5]]),
            rows: u16::from_le_bytes([payload[6], payload[7]]),
        })
    }
}

// ---- Reason strings ------------------------------------------------------

/// Encode an optional human-readable reason (exit/detach payload).
#[must_use]
pub fn encode_reason(reason: Option<&str>) -> Vec<u8> {
    reason.map(|r| r.as_bytes().to_vec()).unwrap_or_default()
}

/// Decode an optional reason string; invalid UTF-8 is replaced, not fatal.
#[must_use]
pub fn decode_reason(payload: &[u8]) -> Option<String> {
    if payload.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(payload).into_owned())
    }
}
