/// Per-notification popup state machine.
///
/// ```text
///   Created ──show──▶ Visible ◀──leave── HoverPaused
///      │                 │  └───enter──▶     │
///      │ reject          └──── close ────────┴──▶ Closing ──destroy──▶ Destroyed
///      └────────────────────────────────────────────────────────────────▲
/// ```
///
/// The popup never touches the registry or the slot allocator itself; the
/// owner drives it and collects what it asks for (`PopupEvent`) plus the
/// slot and reason handed back by `destroy`.
use std::time::{Duration, Instant};

use notif_proto::protocol::{ClickTarget, CloseReason, NotificationId, PopupContent, RenderOp};
use tracing::debug;

use crate::stacker::StackSlot;
use crate::surface::Surface;
use crate::timer::DismissTimer;

const HOVER_OPACITY: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupState {
    Created,
    Visible,
    HoverPaused,
    Closing,
    Destroyed,
}

/// Side effects a popup asks its owner to carry out.
#[derive(Debug, Clone, PartialEq)]
pub enum PopupEvent {
    ActionInvoked(String),
    MuteRequested(Duration),
}

/// What is left once a popup is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destroyed {
    pub slot: Option<StackSlot>,
    pub reason: CloseReason,
}

pub struct Popup {
    id: NotificationId,
    content: PopupContent,
    state: PopupState,
    timeout: Duration,
    timer: DismissTimer,
    expanded: bool,
    idle_opacity: f32,
    opacity: f32,
    position: (i32, i32),
    slot: Option<StackSlot>,
    close_reason: Option<CloseReason>,
    surface: Option<Box<dyn Surface>>,
}

impl Popup {
    pub fn new(
        id: NotificationId,
        content: PopupContent,
        timeout: Duration,
        idle_opacity: f32,
    ) -> Self {
        Self {
            id,
            content,
            state: PopupState::Created,
            timeout,
            timer: DismissTimer::Cancelled,
            expanded: false,
            idle_opacity,
            opacity: idle_opacity,
            position: (0, 0),
            slot: None,
            close_reason: None,
            surface: None,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> PopupState {
        self.state
    }

    pub fn slot(&self) -> Option<StackSlot> {
        self.slot
    }

    pub fn is_closing(&self) -> bool {
        self.state == PopupState::Closing
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    /// Created → Visible.  Arms the dismiss timer.
    pub fn show(
        &mut self,
        mut surface: Box<dyn Surface>,
        slot: StackSlot,
        position: (i32, i32),
        now: Instant,
    ) {
        if self.state != PopupState::Created {
            return;
        }
        surface.show(&self.content, position, self.idle_opacity);
        self.surface = Some(surface);
        self.position = position;
        self.opacity = self.idle_opacity;
        self.slot = Some(slot);
        self.timer = DismissTimer::start(now, self.timeout);
        self.state = PopupState::Visible;
        debug!(id = self.id, slot, timeout_ms = self.timeout.as_millis() as u64, "Popup visible");
    }

    /// Created → Destroyed without ever being shown.
    pub fn reject(&mut self) -> Option<Destroyed> {
        if self.state != PopupState::Created {
            return None;
        }
        self.close_reason = Some(CloseReason::Dismissed);
        self.state = PopupState::Closing;
        self.destroy()
    }

    pub fn pointer_enter(&mut self, now: Instant) {
        if self.state != PopupState::Visible {
            return;
        }
        self.timer.pause(now);
        self.state = PopupState::HoverPaused;
        self.set_opacity(HOVER_OPACITY);
    }

    pub fn pointer_leave(&mut self, now: Instant) {
        if self.state != PopupState::HoverPaused {
            return;
        }
        self.state = PopupState::Visible;
        // An expanded body keeps the timer frozen until it is collapsed.
        if !self.expanded {
            self.timer.resume(now);
        }
        self.set_opacity(self.idle_opacity);
    }

    pub fn toggle_expanded(&mut self, now: Instant) {
        if !self.is_open() {
            return;
        }
        self.expanded = !self.expanded;
        if let Some(surface) = self.surface.as_mut() {
            surface.set_expanded(self.expanded);
        }
        if self.expanded {
            // Reading the body stops the countdown.
            self.timer.pause(now);
        } else if self.state == PopupState::Visible && self.timer.is_paused() {
            self.timer.resume(now);
        }
    }

    /// Primary click.  Fires the default action when the target is
    /// actionable and one is bound; closes either way.
    pub fn click(&mut self, target: ClickTarget) -> Option<PopupEvent> {
        if !self.is_open() {
            return None;
        }
        let event = match (&self.content.default_action, target.is_actionable()) {
            (Some(action), true) => Some(PopupEvent::ActionInvoked(action.clone())),
            _ => None,
        };
        self.begin_close(CloseReason::Dismissed);
        event
    }

    pub fn mute_click(&mut self, duration: Duration) -> Option<PopupEvent> {
        if !self.is_open() {
            return None;
        }
        self.begin_close(CloseReason::Dismissed);
        Some(PopupEvent::MuteRequested(duration))
    }

    pub fn request_close(&mut self, reason: CloseReason) {
        self.begin_close(reason);
    }

    /// Fires the dismiss timer if it is due.  Returns true when this call
    /// moved the popup into Closing.
    pub fn poll(&mut self, now: Instant) -> bool {
        if self.state == PopupState::Visible && self.timer.is_due(now) {
            self.begin_close(CloseReason::Expired);
            return true;
        }
        false
    }

    pub fn move_to(&mut self, position: (i32, i32)) {
        self.position = position;
        if let Some(surface) = self.surface.as_mut() {
            surface.move_to(position);
        }
    }

    /// → Destroyed.  Returns the slot and reason exactly once.
    pub fn destroy(&mut self) -> Option<Destroyed> {
        if self.state == PopupState::Destroyed {
            return None;
        }
        if self.state != PopupState::Closing {
            self.begin_close(CloseReason::Dismissed);
        }
        if let Some(mut surface) = self.surface.take() {
            surface.close();
        }
        self.state = PopupState::Destroyed;
        let reason = self.close_reason.unwrap_or(CloseReason::Dismissed);
        debug!(id = self.id, ?reason, "Popup destroyed");
        Some(Destroyed {
            slot: self.slot.take(),
            reason,
        })
    }

    /// Ops that redraw this popup as it stands now.  Empty unless open.
    pub fn snapshot(&self, id: NotificationId) -> Vec<RenderOp> {
        if !self.is_open() {
            return Vec::new();
        }
        let mut ops = vec![RenderOp::Show {
            id,
            content: self.content.clone(),
            x: self.position.0,
            y: self.position.1,
            opacity: self.opacity,
        }];
        if self.expanded {
            ops.push(RenderOp::SetExpanded { id, expanded: true });
        }
        ops
    }

    fn is_open(&self) -> bool {
        matches!(self.state, PopupState::Visible | PopupState::HoverPaused)
    }

    fn begin_close(&mut self, reason: CloseReason) {
        if matches!(self.state, PopupState::Closing | PopupState::Destroyed) {
            return;
        }
        self.timer.cancel();
        self.close_reason.get_or_insert(reason);
        self.state = PopupState::Closing;
    }

    fn set_opacity(&mut self, opacity: f32) {
        self.opacity = opacity;
        if let Some(surface) = self.surface.as_mut() {
            surface.set_opacity(opacity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::testing::{OpLog, RecordingSurface};
    use notif_proto::protocol::{IconPayload, RenderOp};

    fn content(default_action: Option<&str>) -> PopupContent {
        PopupContent {
            app_name: "App".into(),
            summary: "Hi".into(),
            body: "Body".into(),
            icon: IconPayload::Placeholder,
            default_action: default_action.map(str::to_string),
            actions: vec![],
        }
    }

    fn shown(default_action: Option<&str>, timeout_secs: u64, now: Instant) -> (Popup, OpLog) {
        let log = OpLog::default();
        let mut popup = Popup::new(
            7,
            content(default_action),
            Duration::from_secs(timeout_secs),
            0.8,
        );
        let surface = RecordingSurface {
            id: 7,
            log: log.clone(),
        };
        popup.show(Box::new(surface), 1, (10, 20), now);
        (popup, log)
    }

    #[test]
    fn test_show_arms_timer_and_expires() {
        let t0 = Instant::now();
        let (mut popup, log) = shown(None, 5, t0);
        assert_eq!(popup.state(), PopupState::Visible);
        assert_eq!(popup.deadline(), Some(t0 + Duration::from_secs(5)));

        assert!(!popup.poll(t0 + Duration::from_secs(4)));
        assert!(popup.poll(t0 + Duration::from_secs(5)));
        assert_eq!(popup.deadline(), None);

        let gone = popup.destroy().unwrap();
        assert_eq!(gone.reason, CloseReason::Expired);
        assert_eq!(gone.slot, Some(1));
        assert_eq!(log.closed_ids(), vec![7]);
        assert!(popup.destroy().is_none());
    }

    #[test]
    fn test_hover_preserves_remaining_time() {
        let t0 = Instant::now();
        let (mut popup, log) = shown(None, 10, t0);

        popup.pointer_enter(t0 + Duration::from_secs(7));
        assert_eq!(popup.state(), PopupState::HoverPaused);
        assert_eq!(popup.deadline(), None);
        // Hovered popups never expire.
        assert!(!popup.poll(t0 + Duration::from_secs(100)));

        let left = t0 + Duration::from_secs(120);
        popup.pointer_leave(left);
        assert_eq!(popup.state(), PopupState::Visible);
        assert_eq!(popup.deadline(), Some(left + Duration::from_secs(3)));

        let opacities: Vec<f32> = log
            .ops()
            .into_iter()
            .filter_map(|op| match op {
                RenderOp::SetOpacity { opacity, .. } => Some(opacity),
                _ => None,
            })
            .collect();
        assert_eq!(opacities, vec![1.0, 0.8]);
    }

    #[test]
    fn test_expanded_body_defers_resume_until_collapsed() {
        let t0 = Instant::now();
        let (mut popup, _log) = shown(None, 10, t0);

        popup.pointer_enter(t0 + Duration::from_secs(2));
        popup.toggle_expanded(t0 + Duration::from_secs(3));
        popup.pointer_leave(t0 + Duration::from_secs(4));
        assert_eq!(popup.state(), PopupState::Visible);
        assert_eq!(popup.deadline(), None);

        let collapsed = t0 + Duration::from_secs(30);
        popup.toggle_expanded(collapsed);
        assert_eq!(popup.deadline(), Some(collapsed + Duration::from_secs(8)));
    }

    #[test]
    fn test_expanding_without_hover_stops_the_countdown() {
        let t0 = Instant::now();
        let (mut popup, _log) = shown(None, 10, t0);

        popup.toggle_expanded(t0 + Duration::from_secs(4));
        assert_eq!(popup.deadline(), None);
        assert!(!popup.poll(t0 + Duration::from_secs(600)));

        let collapsed = t0 + Duration::from_secs(600);
        popup.toggle_expanded(collapsed);
        assert_eq!(popup.deadline(), Some(collapsed + Duration::from_secs(6)));
    }

    #[test]
    fn test_click_actionable_with_default_action() {
        let t0 = Instant::now();
        let (mut popup, _log) = shown(Some("Open"), 10, t0);
        assert_eq!(
            popup.click(ClickTarget::Summary),
            Some(PopupEvent::ActionInvoked("Open".into()))
        );
        assert!(popup.is_closing());
        assert_eq!(popup.destroy().unwrap().reason, CloseReason::Dismissed);
    }

    #[test]
    fn test_click_without_action_just_dismisses() {
        let t0 = Instant::now();
        let (mut popup, _log) = shown(Some("Open"), 10, t0);
        assert_eq!(popup.click(ClickTarget::Body), None);
        assert_eq!(popup.destroy().unwrap().reason, CloseReason::Dismissed);

        let (mut popup, _log) = shown(None, 10, t0);
        assert_eq!(popup.click(ClickTarget::Icon), None);
        assert!(popup.is_closing());
    }

    #[test]
    fn test_mute_click_requests_mute_and_closes() {
        let t0 = Instant::now();
        let (mut popup, _log) = shown(None, 10, t0);
        popup.pointer_enter(t0);
        assert_eq!(
            popup.mute_click(Duration::from_secs(300)),
            Some(PopupEvent::MuteRequested(Duration::from_secs(300)))
        );
        assert_eq!(popup.destroy().unwrap().reason, CloseReason::Dismissed);
    }

    #[test]
    fn test_first_close_reason_wins() {
        let t0 = Instant::now();
        let (mut popup, _log) = shown(None, 10, t0);
        popup.request_close(CloseReason::ClosedByCall);
        popup.request_close(CloseReason::Expired);
        assert_eq!(popup.click(ClickTarget::Body), None);
        assert_eq!(popup.destroy().unwrap().reason, CloseReason::ClosedByCall);
    }

    #[test]
    fn test_reject_skips_visible() {
        let mut popup = Popup::new(9, content(None), Duration::from_secs(1), 0.8);
        let gone = popup.reject().unwrap();
        assert_eq!(gone.reason, CloseReason::Dismissed);
        assert_eq!(gone.slot, None);
        assert_eq!(popup.state(), PopupState::Destroyed);
    }

    #[test]
    fn test_snapshot_follows_moves_and_hover() {
        let t0 = Instant::now();
        let (mut popup, _log) = shown(None, 10, t0);
        popup.move_to((30, 40));
        popup.pointer_enter(t0);

        match popup.snapshot(7).as_slice() {
            [RenderOp::Show { id, x, y, opacity, .. }] => {
                assert_eq!((*id, *x, *y), (7, 30, 40));
                assert_eq!(*opacity, 1.0);
            }
            other => panic!("unexpected {:?}", other),
        }

        popup.request_close(CloseReason::ClosedByCall);
        assert!(popup.snapshot(7).is_empty());
    }
}
