//! Key and mouse-key vocabulary shared by the dispatch engine and bindings.
//!
//! A [`Key`] is what the dispatch engine resolves against a key table: a code
//! (keyboard key, classified mouse event, or the wildcard entry) plus
//! modifier bits. Keyboard codes reuse crossterm's `KeyCode` so the client
//! can feed terminal events straight through.

use anyhow::{Result, bail};
use crossterm::event::{KeyCode as TermCode, KeyModifiers, MouseButton};
use std::fmt;

/// Where the pointer was when a mouse event fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseRegion {
    /// Inside a pane's interior.
    Pane,
    /// On a pane border.
    Border,
    /// The left section of the status line.
    StatusLeft,
    /// The right section of the status line.
    StatusRight,
    /// The remaining (default) section of the status line.
    StatusDefault,
}

/// A classified mouse event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseKind {
    /// Pointer motion with no button held.
    Move,
    /// Button pressed.
    Down(MouseButton),
    /// Button released.
    Up(MouseButton),
    /// Second press of the same button within the click window.
    Double(MouseButton),
    /// Third press of the same button within the click window.
    Triple(MouseButton),
    /// First motion with a button held.
    DragStart(MouseButton),
    /// Continued motion with a button held.
    Drag(MouseButton),
    /// Button released (or lost) while a drag was active.
    DragEnd(MouseButton),
    /// Wheel scrolled up.
    WheelUp,
    /// Wheel scrolled down.
    WheelDown,
}

/// A classified mouse event qualified by where it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MouseKey {
    /// What happened.
    pub kind: MouseKind,
    /// Where it happened.
    pub region: MouseRegion,
}

/// A key code as stored in key tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    /// A keyboard key.
    Key(TermCode),
    /// A classified mouse event.
    Mouse(MouseKey),
    /// The wildcard table entry matching any key.
    Any,
}

/// A key code plus modifier bits; the unit the dispatch engine resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key {
    /// Key code.
    pub code: Code,
    /// Modifier bits.
    pub modifiers: KeyModifiers,
}

impl Key {
    /// A plain keyboard key without modifiers.
    #[must_use]
    pub const fn plain(code: TermCode) -> Self {
        Self {
            code: Code::Key(code),
            modifiers: KeyModifiers::NONE,
        }
    }

    /// A keyboard key with modifiers.
    #[must_use]
    pub const fn with_modifiers(code: TermCode, modifiers: KeyModifiers) -> Self {
        Self {
            code: Code::Key(code),
            modifiers,
        }
    }

    /// The wildcard entry.
    #[must_use]
    pub const fn any() -> Self {
        Self {
            code: Code::Any,
            modifiers: KeyModifiers::NONE,
        }
    }
}

/// Parse a key string in the usual prefix notation.
///
/// `C-` is control, `M-` is meta/alt, `S-` is shift; the base is a single
/// character, a named key (`Enter`, `Space`, `Tab`, `Escape`, `Up`, `Down`,
/// `Left`, `Right`, `Home`, `End`, `PageUp`, `PageDown`, `BSpace`, `Delete`),
/// a function key `F1`..`F12`, a mouse key as rendered by `Display`
/// (`MouseDown1Pane`, `WheelUpStatus`, `DoubleClick1Border`, ...), or `Any`
/// for the wildcard entry.
pub fn parse_key(spec: &str) -> Result<Key> {
    let mut rest = spec;
    let mut modifiers = KeyModifiers::NONE;
    loop {
        let Some((prefix, tail)) = rest.split_at_checked(2) else {
            break;
        };
        match prefix {
            "C-" if !tail.is_empty() => modifiers |= KeyModifiers::CONTROL,
            "M-" if !tail.is_empty() => modifiers |= KeyModifiers::ALT,
            "S-" if !tail.is_empty() => modifiers |= KeyModifiers::SHIFT,
            _ => break,
        }
        rest = tail;
    }

    if let Some(mouse) = parse_mouse_key(rest) {
        return Ok(Key {
            code: Code::Mouse(mouse),
            modifiers,
        });
    }

    let code = match rest {
        "" => bail!("empty key: {spec:?}"),
        "Any" => {
            return Ok(Key {
                code: Code::Any,
                modifiers,
            });
        }
        "Enter" => TermCode::Enter,
        "Space" => TermCode::Char(' '),
        "Tab" => TermCode::Tab,
        "Escape" => TermCode::Esc,
        "Up" => TermCode::Up,
        "Down" => TermCode::Down,
        "Left" => TermCode::Left,
        "Right" => TermCode::Right,
        "Home" => TermCode::Home,
        "End" => TermCode::End,
        "PageUp" => TermCode::PageUp,
        "PageDown" => TermCode::PageDown,
        "BSpace" => TermCode::Backspace,
        "Delete" => TermCode::Delete,
        name if name.len() > 1 && name.starts_with('F') => {
            let Ok(n) = name[1..].parse::<u8>() else {
                bail!("unknown key name: {spec:?}");
            };
            if n == 0 || n > 12 {
                bail!("function key out of range: {spec:?}");
            }
            TermCode::F(n)
        }
        single => {
            let mut chars = single.chars();
            let (Some(ch), None) = (chars.next(), chars.next()) else {
                bail!("unknown key name: {spec:?}");
            };
            TermCode::Char(ch)
        }
    };
    Ok(Key {
        code: Code::Key(code),
        modifiers,
    })
}

/// Parse a mouse key name in the form the `Display` impl renders:
/// kind, optional button digit, region suffix.
fn parse_mouse_key(spec: &str) -> Option<MouseKey> {
    let (body, region) = if let Some(body) = spec.strip_suffix("StatusLeft") {
        (body, MouseRegion::StatusLeft)
    } else if let Some(body) = spec.strip_suffix("StatusRight") {
        (body, MouseRegion::StatusRight)
    } else if let Some(body) = spec.strip_suffix("Status") {
        (body, MouseRegion::StatusDefault)
    } else if let Some(body) = spec.strip_suffix("Pane") {
        (body, MouseRegion::Pane)
    } else if let Some(body) = spec.strip_suffix("Border") {
        (body, MouseRegion::Border)
    } else {
        return None;
    };

    let kind = match body {
        "MouseMove" => MouseKind::Move,
        "WheelUp" => MouseKind::WheelUp,
        "WheelDown" => MouseKind::WheelDown,
        _ => {
            let (name, digit) = body.split_at_checked(body.len().checked_sub(1)?)?;
            let button = match digit {
                "1" => MouseButton::Left,
                "2" => MouseButton::Middle,
                "3" => MouseButton::Right,
                _ => return None,
            };
            match name {
                "MouseDown" => MouseKind::Down(button),
                "MouseUp" => MouseKind::Up(button),
                "DoubleClick" => MouseKind::Double(button),
                "TripleClick" => MouseKind::Triple(button),
                "MouseDragStart" => MouseKind::DragStart(button),
                "MouseDrag" => MouseKind::Drag(button),
                "MouseDragEnd" => MouseKind::DragEnd(button),
                _ => return None,
            }
        }
    };
    Some(MouseKey { kind, region })
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.modifiers.contains(KeyModifiers::CONTROL) {
            write!(f, "C-")?;
        }
        if self.modifiers.contains(KeyModifiers::ALT) {
            write!(f, "M-")?;
        }
        if self.modifiers.contains(KeyModifiers::SHIFT) {
            write!(f, "S-")?;
        }
        match self.code {
            Code::Any => write!(f, "Any"),
            Code::Key(code) => match code {
                TermCode::Char(' ') => write!(f, "Space"),
                TermCode::Char(ch) => write!(f, "{ch}"),
                TermCode::Enter => write!(f, "Enter"),
                TermCode::Tab => write!(f, "Tab"),
                TermCode::Esc => write!(f, "Escape"),
                TermCode::Up => write!(f, "Up"),
                TermCode::Down => write!(f, "Down"),
                TermCode::Left => write!(f, "Left"),
                TermCode::Right => write!(f, "Right"),
                TermCode::Home => write!(f, "Home"),
                TermCode::End => write!(f, "End"),
                TermCode::PageUp => write!(f, "PageUp"),
                TermCode::PageDown => write!(f, "PageDown"),
                TermCode::Backspace => write!(f, "BSpace"),
                TermCode::Delete => write!(f, "Delete"),
                TermCode::F(n) => write!(f, "F{n}"),
                other => write!(f, "{other:?}"),
            },
            Code::Mouse(mouse) => {
                let (name, button) = match mouse.kind {
                    MouseKind::Move => ("MouseMove", None),
                    MouseKind::Down(b) => ("MouseDown", Some(b)),
                    MouseKind::Up(b) => ("MouseUp", Some(b)),
                    MouseKind::Double(b) => ("DoubleClick", Some(b)),
                    MouseKind::Triple(b) => ("TripleClick", Some(b)),
                    MouseKind::DragStart(b) => ("MouseDragStart", Some(b)),
                    MouseKind::Drag(b) => ("MouseDrag", Some(b)),
                    MouseKind::DragEnd(b) => ("MouseDragEnd", Some(b)),
                    MouseKind::WheelUp => ("WheelUp", None),
                    MouseKind::WheelDown => ("WheelDown", None),
                };
                write!(f, "{name}")?;
                if let Some(button) = button {
                    let n = match button {
                        MouseButton::Left => 1,
                        MouseButton::Middle => 2,
                        MouseButton::Right => 3,
                    };
                    write!(f, "{n}")?;
                }
                let region = match mouse.region {
                    MouseRegion::Pane => "Pane",
                    MouseRegion::Border => "Border",
                    MouseRegion::StatusLeft => "StatusLeft",
                    MouseRegion::StatusRight => "StatusRight",
                    MouseRegion::StatusDefault => "Status",
                };
                write!(f, "{region}")
            }
        }
    }
}
