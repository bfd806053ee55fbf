//! Resize coalescing and deferred redraws.
//!
//! Size changes are queued per pane and applied on a periodic check so a
//! burst of requests collapses to the few transitions observers must see.
//! Redraws are deferred while a client's outbound queue is non-empty and
//! replayed in one pass once it drains.

use std::collections::HashMap;
use tracing::debug;

/// One applied size change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeAction {
    /// Pane to resize.
    pub pane: u32,
    /// New width.
    pub width: u16,
    /// New height.
    pub height: u16,
}

#[derive(Debug)]
struct PaneQueue {
    /// Size when the first request of the burst arrived.
    original: (u16, u16),
    requests: Vec<(u16, u16)>,
}

/// Per-pane queues of pending size changes.
#[derive(Debug, Default)]
pub struct ResizeQueue {
    queues: HashMap<u32, PaneQueue>,
}

impl ResizeQueue {
    /// An empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a size change. `original` is the pane's current size and is
    /// recorded once per burst, when the queue for the pane is created.
    pub fn push(&mut self, pane: u32, original: (u16, u16), width: u16, height: u16) {
        self.queues
            .entry(pane)
            .or_insert_with(|| PaneQueue {
                original,
                requests: Vec::new(),
            })
            .requests
            .push((width, height));
    }

    /// True when any pane has pending requests.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !self.queues.is_empty()
    }

    /// Periodic check: emit at most one action per pane.
    ///
    /// One queued entry applies directly. A net no-op burst (the last
    /// requested size equals the original) applies only the first transition
    /// now and keeps the final entry queued so the return trip is observed on
    /// the next check, never silently dropped. Anything else collapses to the
    /// last requested size.
    pub fn check(&mut self) -> Vec<ResizeAction> {
        let mut actions = Vec::new();
        self.queues.retain(|&pane, queue| {
            let Some(&last) = queue.requests.last() else {
                return false;
            };
            if queue.requests.len() == 1 {
                actions.push(action(pane, last));
                return false;
            }
            if last == queue.original {
                // Net no-op: show the first transition, reschedule the rest.
                let first = queue.requests[0];
                debug!(pane, ?first, ?last, "resize nets out, splitting");
                actions.push(action(pane, first));
                queue.original = first;
                queue.requests = vec![last];
                return true;
            }
            actions.push(action(pane, last));
            false
        });
        actions
    }
}

const fn action(pane: u32, (width, height): (u16, u16)) -> ResizeAction {
    ResizeAction {
        pane,
        width,
        height,
    }
}

/// Redraw requests recorded while a client's output queue was busy.
#[derive(Debug, Default)]
pub struct DeferredRedraw {
    panes: u64,
    all: bool,
}

impl DeferredRedraw {
    /// Record a whole-client redraw.
    pub fn defer_all(&mut self) {
        self.all = true;
    }

    /// Record a single pane's redraw.
    pub fn defer_pane(&mut self, pane: u32) {
        if pane < u64::BITS.into() {
            self.panes |= 1u64 << pane;
        } else {
            // Bitmap covers the realistic pane range; beyond it, redraw all.
            self.all = true;
        }
    }

    /// True when anything is deferred.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.all || self.panes != 0
    }

    /// Take the deferred set for replay: whole-client flag plus pane ids.
    pub fn take(&mut self) -> (bool, Vec<u32>) {
        let all = self.all;
        let mut panes = Vec::new();
        if !all {
            for bit in 0..u64::BITS {
                if self.panes & (1u64 << bit) != 0 {
                    panes.push(bit);
                }
            }
        }
        self.all = false;
        self.panes = 0;
        (all, panes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_single_request_applies_directly() {
        let mut queue = ResizeQueue::new();
        queue.push(0, (80, 24), 100, 30);
        assert_eq!(
            queue.check(),
            vec![ResizeAction {
                pane: 0,
                width: 100,
                height: 30
            }]
        );
        assert!(!queue.is_pending());
    }

    #[test]
    fn test_burst_collapses_to_last() {
        let mut queue = ResizeQueue::new();
        queue.push(0, (80, 24), 90, 24);
        queue.push(0, (80, 24), 100, 24);
        queue.push(0, (80, 24), 120, 40);
        assert_eq!(
            queue.check(),
            vec![ResizeAction {
                pane: 0,
                width: 120,
                height: 40
            }]
        );
        assert!(!queue.is_pending());
    }

    #[test]
    fn test_net_noop_emits_both_transitions() {
        // A -> B -> C -> A must surface as A -> B, then B(-ish) -> A, never
        // zero notifications.
        let mut queue = ResizeQueue::new();
        queue.push(0, (80, 24), 100, 30);
        queue.push(0, (80, 24), 120, 40);
        queue.push(0, (80, 24), 80, 24);

        let first = queue.check();
        assert_eq!(
            first,
            vec![ResizeAction {
                pane: 0,
                width: 100,
                height: 30
            }]
        );
        assert!(queue.is_pending(), "return trip stays queued");

        let second = queue.check();
        assert_eq!(
            second,
            vec![ResizeAction {
                pane: 0,
                width: 80,
                height: 24
            }]
        );
        assert!(!queue.is_pending());
    }

    #[test]
    fn test_panes_coalesce_independently() {
        let mut queue = ResizeQueue::new();
        queue.push(0, (80, 24), 100, 30);
        queue.push(1, (40, 24), 50, 24);
        queue.push(1, (40, 24), 60, 24);

        let mut actions = queue.check();
        actions.sort_by_key(|a| a.pane);
        assert_eq!(
            actions,
            vec![
                ResizeAction {
                    pane: 0,
                    width: 100,
                    height: 30
                },
                ResizeAction {
                    pane: 1,
                    width: 60,
                    height: 24
                },
            ]
        );
    }

    #[test]
    fn test_deferred_redraw_take() {
        let mut redraw = DeferredRedraw::default();
        assert!(!redraw.is_pending());

        redraw.defer_pane(3);
        redraw.defer_pane(7);
        assert!(redraw.is_pending());
        assert_eq!(redraw.take(), (false, vec![3, 7]));
        assert!(!redraw.is_pending());

        redraw.defer_pane(1);
        redraw.defer_all();
        assert_eq!(redraw.take(), (true, vec![]));
    }
}
