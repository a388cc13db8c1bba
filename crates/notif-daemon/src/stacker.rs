/// Vertical placement of popups in the bottom-right corner.
///
/// Slots are 1-based so slot 1 sits one popup height above the bottom margin.
/// Freed slots go back on a free list and the smallest one is handed out
/// next, so gaps left by out-of-order closes are filled by new popups.
use std::collections::BTreeSet;

use notif_proto::config::{PopupConfig, ScreenConfig};

pub type StackSlot = u32;

#[derive(Debug)]
pub struct PopupStacker {
    screen_width: u32,
    screen_height: u32,
    popup_width: u32,
    popup_height: u32,
    margin: u32,
    /// Released slots below `next_fresh`.
    free: BTreeSet<StackSlot>,
    next_fresh: StackSlot,
}

impl PopupStacker {
    pub fn new(screen: &ScreenConfig, popup: &PopupConfig) -> Self {
        Self {
            screen_width: screen.width,
            screen_height: screen.height,
            popup_width: popup.width,
            popup_height: popup.height,
            margin: popup.margin,
            free: BTreeSet::new(),
            next_fresh: 1,
        }
    }

    pub fn acquire_slot(&mut self) -> StackSlot {
        if let Some(slot) = self.free.pop_first() {
            return slot;
        }
        let slot = self.next_fresh;
        self.next_fresh += 1;
        slot
    }

    pub fn release_slot(&mut self, slot: StackSlot) {
        if slot == 0 || slot >= self.next_fresh {
            return;
        }
        self.free.insert(slot);
        // Shrink the high-water mark so the free list stays small.
        while self.next_fresh > 1 && self.free.remove(&(self.next_fresh - 1)) {
            self.next_fresh -= 1;
        }
    }

    pub fn position_for(&self, slot: StackSlot) -> (i32, i32) {
        let x = self.screen_width as i64 - self.popup_width as i64 - self.margin as i64;
        let y = self.screen_height as i64
            - slot as i64 * self.popup_height as i64
            - self.margin as i64;
        (x as i32, y as i32)
    }

    pub fn set_geometry(&mut self, width: u32, height: u32) {
        self.screen_width = width;
        self.screen_height = height;
    }

    pub fn in_use(&self) -> usize {
        (self.next_fresh - 1) as usize - self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stacker() -> PopupStacker {
        let screen = ScreenConfig {
            width: 1000,
            height: 800,
        };
        let popup = PopupConfig {
            width: 300,
            height: 100,
            margin: 10,
            ..PopupConfig::default()
        };
        PopupStacker::new(&screen, &popup)
    }

    #[test]
    fn test_slots_start_at_one_and_increase() {
        let mut s = stacker();
        assert_eq!(s.acquire_slot(), 1);
        assert_eq!(s.acquire_slot(), 2);
        assert_eq!(s.acquire_slot(), 3);
        assert_eq!(s.in_use(), 3);
    }

    #[test]
    fn test_smallest_free_slot_is_reused() {
        let mut s = stacker();
        let a = s.acquire_slot();
        let b = s.acquire_slot();
        let _c = s.acquire_slot();
        s.release_slot(b);
        s.release_slot(a);
        assert_eq!(s.acquire_slot(), 1);
        assert_eq!(s.acquire_slot(), 2);
        assert_eq!(s.acquire_slot(), 4);
    }

    #[test]
    fn test_release_top_slot_shrinks() {
        let mut s = stacker();
        let _a = s.acquire_slot();
        let b = s.acquire_slot();
        s.release_slot(b);
        assert_eq!(s.in_use(), 1);
        assert_eq!(s.acquire_slot(), 2);
        // Unknown slots are ignored.
        s.release_slot(42);
        s.release_slot(0);
        assert_eq!(s.in_use(), 2);
    }

    #[test]
    fn test_position_anchored_bottom_right() {
        let mut s = stacker();
        assert_eq!(s.position_for(1), (690, 690));
        assert_eq!(s.position_for(2), (690, 590));

        s.set_geometry(1200, 900);
        assert_eq!(s.position_for(1), (890, 790));
    }
}
