//! Mouse classification state machine.
//!
//! Turns raw terminal mouse reports into the classified mouse keys the
//! dispatch engine resolves: clicks counted into double/triple within the
//! click window, drags bracketed by drag-start/drag-end, everything
//! qualified by the region under the pointer.

use crate::keys::{Code, Key, MouseKey, MouseKind, MouseRegion};
use crate::protocol::{MouseInput, MouseInputKind};
use crate::server::layout::Layout;
use crossterm::event::MouseButton;
use tracing::debug;

/// Per-client mouse state.
#[derive(Debug, Default)]
pub struct MouseState {
    /// Consecutive clicks of `click_button` inside the click window.
    clicks: u8,
    click_button: Option<MouseButton>,
    /// True while the click timer runs; cleared by [`MouseState::click_timeout`].
    window_open: bool,
    drag_button: Option<MouseButton>,
}

/// What classification produced.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Classified {
    /// Keys to dispatch, in order. A drag-end may precede the key for the
    /// event that interrupted the drag.
    pub keys: Vec<Key>,
    /// The caller should (re-)arm the single-shot click timer.
    pub arm_click_timer: bool,
    /// The pane under the pointer, when inside one.
    pub pane: Option<u32>,
}

impl MouseState {
    /// Fresh state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify one raw event against the current layout.
    pub fn classify(&mut self, input: &MouseInput, layout: &Layout) -> Classified {
        let Some((region, pane)) = layout.region_at(input.x, input.y) else {
            debug!(x = input.x, y = input.y, "mouse event outside every region");
            return Classified::default();
        };

        let mut out = Classified {
            pane,
            ..Classified::default()
        };
        match input.kind {
            MouseInputKind::Down(button) => {
                // A press with another drag in flight ends that drag first.
                if let Some(old) = self.drag_button.take()
                    && old != button
                {
                    out.keys
                        .push(mouse_key(MouseKind::DragEnd(old), region, input));
                }
                let kind = self.count_click(button);
                out.arm_click_timer = true;
                out.keys.push(mouse_key(kind, region, input));
            }
            MouseInputKind::Up(button) => match self.drag_button.take() {
                Some(active) if active == button => {
                    out.keys
                        .push(mouse_key(MouseKind::DragEnd(button), region, input));
                }
                Some(active) => {
                    // A release of another button still ends the drag first.
                    out.keys
                        .push(mouse_key(MouseKind::DragEnd(active), region, input));
                    out.keys.push(mouse_key(MouseKind::Up(button), region, input));
                }
                None => {
                    out.keys.push(mouse_key(MouseKind::Up(button), region, input));
                }
            },
            MouseInputKind::Drag(button) => match self.drag_button {
                Some(active) if active == button => {
                    out.keys.push(mouse_key(MouseKind::Drag(button), region, input));
                }
                Some(active) => {
                    out.keys
                        .push(mouse_key(MouseKind::DragEnd(active), region, input));
                    self.drag_button = Some(button);
                    out.keys
                        .push(mouse_key(MouseKind::DragStart(button), region, input));
                }
                None => {
                    self.drag_button = Some(button);
                    out.keys
                        .push(mouse_key(MouseKind::DragStart(button), region, input));
                }
            },
            MouseInputKind::Moved => {
                out.keys.push(mouse_key(MouseKind::Move, region, input));
            }
            MouseInputKind::WheelUp => {
                out.keys.push(mouse_key(MouseKind::WheelUp, region, input));
            }
            MouseInputKind::WheelDown => {
                out.keys.push(mouse_key(MouseKind::WheelDown, region, input));
            }
        }
        out
    }

    /// The click window elapsed: the pending click resolves as-is and the
    /// next press starts over at a single click.
    pub fn click_timeout(&mut self) {
        self.window_open = false;
        self.clicks = 0;
        self.click_button = None;
    }

    fn count_click(&mut self, button: MouseButton) -> MouseKind {
        if self.window_open && self.click_button == Some(button) {
            self.clicks += 1;
        } else {
            self.clicks = 1;
            self.click_button = Some(button);
        }
        self.window_open = true;
        match self.clicks {
            1 => MouseKind::Down(button),
            2 => MouseKind::Double(button),
            3 => MouseKind::Triple(button),
            _ => {
                // Fourth press starts the cycle over.
                self.clicks = 1;
                MouseKind::Down(button)
            }
        }
    }
}

fn mouse_key(kind: MouseKind, region: MouseRegion, input: &MouseInput) -> Key {
    Key {
        code: Code::Mouse(MouseKey { kind, region }),
        modifiers: input.modifiers,
    }
}
