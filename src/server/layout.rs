//! Pane geometry and mouse-region resolution.
//!
//! The control plane models panes as rectangles on a character grid with a
//! one-row status line at the bottom. Mouse coordinates resolve to a region
//! (pane interior, border, status sections); anything else is discarded by
//! the caller.

use crate::keys::{Key, MouseRegion};
use tracing::debug;

/// Width of the status-left section, columns.
const STATUS_LEFT_WIDTH: u16 = 10;

/// Width of the status-right section, columns.
const STATUS_RIGHT_WIDTH: u16 = 20;

/// One pane: a rectangle plus the input it has been handed.
#[derive(Debug)]
pub struct Pane {
    /// Stable pane id.
    pub id: u32,
    /// Left column.
    pub x: u16,
    /// Top row.
    pub y: u16,
    /// Width in columns.
    pub width: u16,
    /// Height in rows.
    pub height: u16,
    forwarded: Vec<Key>,
}

impl Pane {
    fn new(id: u32, x: u16, y: u16, width: u16, height: u16) -> Self {
        Self {
            id,
            x,
            y,
            width,
            height,
            forwarded: Vec::new(),
        }
    }

    /// Current size.
    #[must_use]
    pub const fn size(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    fn contains(&self, x: u16, y: u16) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }

    /// True within the one-cell expansion of the rectangle.
    fn touches_border(&self, x: u16, y: u16) -> bool {
        let x0 = self.x.saturating_sub(1);
        let y0 = self.y.saturating_sub(1);
        x >= x0 && x <= self.x + self.width && y >= y0 && y <= self.y + self.height
    }

    /// Hand an unresolved key to the pane's input side.
    pub fn send_key(&mut self, key: &Key) {
        debug!(pane = self.id, key = %key, "forwarding key to pane");
        self.forwarded.push(*key);
    }

    /// Keys forwarded so far, oldest first.
    #[must_use]
    pub fn forwarded(&self) -> &[Key] {
        &self.forwarded
    }
}

/// The window layout: panes above a one-row status line.
#[derive(Debug)]
pub struct Layout {
    panes: Vec<Pane>,
    cols: u16,
    rows: u16,
    focused: u32,
}

impl Layout {
    /// A single pane filling the grid above the status line.
    #[must_use]
    pub fn single(cols: u16, rows: u16) -> Self {
        let pane_rows = rows.saturating_sub(1);
        Self {
            panes: vec![Pane::new(0, 0, 0, cols, pane_rows)],
            cols,
            rows,
            focused: 0,
        }
    }

    /// Two panes side by side with a one-column border between them.
    #[must_use]
    pub fn split(cols: u16, rows: u16) -> Self {
        let pane_rows = rows.saturating_sub(1);
        let left = cols / 2;
        let right = cols.saturating_sub(left + 1);
        Self {
            panes: vec![
                Pane::new(0, 0, 0, left, pane_rows),
                Pane::new(1, left + 1, 0, right, pane_rows),
            ],
            cols,
            rows,
            focused: 0,
        }
    }

    /// The focused pane's id.
    #[must_use]
    pub const fn focused(&self) -> u32 {
        self.focused
    }

    /// Change focus; reports whether the pane exists.
    pub fn focus(&mut self, pane: u32) -> bool {
        if self.pane(pane).is_some() {
            self.focused = pane;
            true
        } else {
            false
        }
    }

    /// Look up a pane by id.
    #[must_use]
    pub fn pane(&self, id: u32) -> Option<&Pane> {
        self.panes.iter().find(|p| p.id == id)
    }

    /// Look up a pane by id, mutably.
    pub fn pane_mut(&mut self, id: u32) -> Option<&mut Pane> {
        self.panes.iter_mut().find(|p| p.id == id)
    }

    /// The focused pane, mutably.
    pub fn focused_pane_mut(&mut self) -> Option<&mut Pane> {
        let id = self.focused;
        self.pane_mut(id)
    }

    /// Apply a size to a pane; reports whether the pane exists.
    pub fn set_pane_size(&mut self, id: u32, width: u16, height: u16) -> bool {
        if let Some(pane) = self.pane_mut(id) {
            pane.width = width;
            pane.height = height;
            true
        } else {
            false
        }
    }

    /// Ids of all panes, layout order.
    #[must_use]
    pub fn pane_ids(&self) -> Vec<u32> {
        self.panes.iter().map(|p| p.id).collect()
    }

    /// Resolve a grid coordinate to a region, plus the pane when inside one.
    ///
    /// Pane interiors win over borders; the bottom row is the status line,
    /// split into left/right/default sections. Coordinates outside every
    /// region resolve to `None` and the event is dropped by the caller.
    #[must_use]
    pub fn region_at(&self, x: u16, y: u16) -> Option<(MouseRegion, Option<u32>)> {
        if self.rows > 0 && y == self.rows - 1 {
            return Some((status_section(x, self.cols), None));
        }
        if x >= self.cols || y >= self.rows {
            return None;
        }
        if let Some(pane) = self.panes.iter().find(|p| p.contains(x, y)) {
            return Some((MouseRegion::Pane, Some(pane.id)));
        }
        if self.panes.iter().any(|p| p.touches_border(x, y)) {
            return Some((MouseRegion::Border, None));
        }
        None
    }
}

fn status_section(x: u16, cols: u16) -> MouseRegion {
    if x < STATUS_LEFT_WIDTH {
        MouseRegion::StatusLeft
    } else if x >= cols.saturating_sub(STATUS_RIGHT_WIDTH) {
        MouseRegion::StatusRight
    } else {
        MouseRegion::StatusDefault
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_single_layout_regions() {
        let layout = Layout::single(80, 24);
        assert_eq!(layout.region_at(10, 5), Some((MouseRegion::Pane, Some(0))));
        assert_eq!(layout.region_at(0, 23), Some((MouseRegion::StatusLeft, None)));
        assert_eq!(
            layout.region_at(40, 23),
            Some((MouseRegion::StatusDefault, None))
        );
        assert_eq!(
            layout.region_at(79, 23),
            Some((MouseRegion::StatusRight, None))
        );
        assert_eq!(layout.region_at(200, 5), None);
    }

    #[test]
    fn test_split_layout_border_between_panes() {
        let layout = Layout::split(81, 24);
        assert_eq!(layout.region_at(5, 5), Some((MouseRegion::Pane, Some(0))));
        assert_eq!(layout.region_at(50, 5), Some((MouseRegion::Pane, Some(1))));
        // The dividing column belongs to neither interior.
        assert_eq!(layout.region_at(40, 5), Some((MouseRegion::Border, None)));
    }

    #[test]
    fn test_focus_and_resize() {
        let mut layout = Layout::split(80, 24);
        assert!(layout.focus(1));
        assert_eq!(layout.focused(), 1);
        assert!(!layout.focus(9));
        assert_eq!(layout.focused(), 1);

        assert!(layout.set_pane_size(0, 30, 20));
        assert_eq!(layout.pane(0).map(Pane::size), Some((30, 20)));
        assert!(!layout.set_pane_size(9, 1, 1));
    }
}
