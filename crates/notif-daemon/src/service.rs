/// NotificationService: protocol facade over the popup engine.
///
/// Owns every piece of process-wide notification state: the id counter, the
/// id → popup registry, the slot allocator and the mute window.  All methods
/// take the current instant so the core loop (and tests) decide what "now"
/// is.  Outbound signals are queued and drained by the caller after each
/// event.
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use notif_proto::config::{Config, PopupConfig};
use notif_proto::protocol::{
    ClickTarget, CloseReason, NotificationId, NotificationRequest, PopupContent, RenderOp,
    ServerInformation, HINT_URGENCY,
};
use tracing::{debug, info, warn};

use crate::icon;
use crate::markup;
use crate::mute::{MuteController, MuteError};
use crate::popup::{Popup, PopupEvent};
use crate::stacker::PopupStacker;
use crate::surface::{Indicator, SurfaceFactory};

pub const CAPABILITIES: [&str; 9] = [
    "action-icons",
    "actions",
    "body",
    "body-hyperlinks",
    "body-images",
    "body-markup",
    "icon-multi",
    "persistence",
    "sound",
];

const SERVER_NAME: &str = "notifd";
const SERVER_VENDOR: &str = "notifd";
const SPEC_VERSION: &str = "1.2";

/// Outbound protocol signals.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    ActionInvoked {
        id: NotificationId,
        action_key: String,
    },
    NotificationClosed {
        id: NotificationId,
        reason: CloseReason,
    },
}

pub struct NotificationService {
    popup_config: PopupConfig,
    mute_button_duration: Duration,
    next_id: NotificationId,
    popups: BTreeMap<NotificationId, Popup>,
    stacker: PopupStacker,
    mute: MuteController,
    surfaces: Box<dyn SurfaceFactory>,
    signals: Vec<Signal>,
}

impl NotificationService {
    pub fn new(
        config: &Config,
        surfaces: Box<dyn SurfaceFactory>,
        indicator: Box<dyn Indicator>,
    ) -> Self {
        Self {
            popup_config: config.popup.clone(),
            mute_button_duration: Duration::from_secs(config.mute.button_duration_secs),
            next_id: 0,
            popups: BTreeMap::new(),
            stacker: PopupStacker::new(&config.screen, &config.popup),
            mute: MuteController::new(indicator),
            surfaces,
            signals: Vec::new(),
        }
    }

    // ── protocol methods ──────────────────────────────────────────────────────

    pub fn notify(&mut self, request: NotificationRequest, now: Instant) -> NotificationId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        if request.replaces_id != 0 {
            debug!(
                id,
                replaces_id = request.replaces_id,
                "replaces_id is not honoured, showing a new notification"
            );
        }
        if let Some(urgency) = request.hint(HINT_URGENCY) {
            debug!(id, ?urgency, "urgency hint");
        }

        if self.mute.is_muted(now) {
            info!(id, app = %request.app_name, "Muted, not showing notification");
            return id;
        }

        let icon = icon::resolve(&request, self.popup_config.icon_size);
        let content = PopupContent {
            app_name: request.app_name.clone(),
            summary: markup::elide(&request.summary, self.popup_config.summary_max_width),
            body: markup::normalize_body(&request.body),
            icon: icon.to_payload(),
            default_action: request.default_action(),
            actions: request.action_pairs(),
        };
        let timeout = if request.expire_timeout > 0 {
            Duration::from_millis(request.expire_timeout as u64)
        } else {
            Duration::from_millis(self.popup_config.default_timeout_ms)
        };

        let mut popup = Popup::new(id, content, timeout, self.popup_config.idle_opacity);

        if self.popups.len() >= self.popup_config.max_visible {
            warn!(
                id,
                live = self.popups.len(),
                "Too many popups on screen, rejecting notification"
            );
            if let Some(gone) = popup.reject() {
                self.signals.push(Signal::NotificationClosed {
                    id,
                    reason: gone.reason,
                });
            }
            return id;
        }

        let slot = self.stacker.acquire_slot();
        let position = self.stacker.position_for(slot);
        let surface = self.surfaces.create(id);
        popup.show(surface, slot, position, now);
        self.popups.insert(id, popup);

        info!(
            id,
            app = %request.app_name,
            summary = %request.summary,
            live = self.live_count(),
            slots = self.stacker.in_use(),
            "Notification shown"
        );
        id
    }

    pub fn capabilities(&self) -> Vec<String> {
        debug!("Capabilities requested");
        CAPABILITIES.iter().map(|c| c.to_string()).collect()
    }

    pub fn close_notification(&mut self, id: NotificationId) {
        match self.popups.get_mut(&id) {
            Some(popup) => {
                popup.request_close(CloseReason::ClosedByCall);
                self.reap();
            }
            None => debug!(id, "Close requested for unknown notification"),
        }
    }

    pub fn server_information(&self) -> ServerInformation {
        ServerInformation {
            name: SERVER_NAME.to_string(),
            vendor: SERVER_VENDOR.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            spec_version: SPEC_VERSION.to_string(),
        }
    }

    // ── mute ──────────────────────────────────────────────────────────────────

    pub fn request_mute(&mut self, duration: Duration, now: Instant) -> Result<(), MuteError> {
        self.mute.request_mute(duration, now)
    }

    pub fn unmute(&mut self) {
        self.mute.unmute();
    }

    pub fn is_muted(&mut self, now: Instant) -> bool {
        self.mute.is_muted(now)
    }

    // ── renderer events ───────────────────────────────────────────────────────

    pub fn pointer_enter(&mut self, id: NotificationId, now: Instant) {
        if let Some(popup) = self.popups.get_mut(&id) {
            popup.pointer_enter(now);
        }
    }

    pub fn pointer_leave(&mut self, id: NotificationId, now: Instant) {
        if let Some(popup) = self.popups.get_mut(&id) {
            popup.pointer_leave(now);
        }
    }

    pub fn toggle_expanded(&mut self, id: NotificationId, now: Instant) {
        if let Some(popup) = self.popups.get_mut(&id) {
            popup.toggle_expanded(now);
        }
    }

    pub fn click(&mut self, id: NotificationId, target: ClickTarget, now: Instant) {
        let event = match self.popups.get_mut(&id) {
            Some(popup) => popup.click(target),
            None => return,
        };
        self.dispatch(id, event, now);
    }

    pub fn mute_click(&mut self, id: NotificationId, now: Instant) {
        let duration = self.mute_button_duration;
        let event = match self.popups.get_mut(&id) {
            Some(popup) => popup.mute_click(duration),
            None => return,
        };
        self.dispatch(id, event, now);
    }

    pub fn set_screen_geometry(&mut self, width: u32, height: u32) {
        self.stacker.set_geometry(width, height);
        for popup in self.popups.values_mut() {
            if let Some(slot) = popup.slot() {
                popup.move_to(self.stacker.position_for(slot));
            }
        }
        debug!(width, height, live = self.popups.len(), "Screen geometry changed");
    }

    // ── timers ────────────────────────────────────────────────────────────────

    /// Earliest pending timer across all popups and the mute window.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.popups
            .values()
            .filter_map(Popup::deadline)
            .chain(self.mute.deadline())
            .min()
    }

    /// Fires every timer that is due at `now`.
    pub fn tick(&mut self, now: Instant) {
        self.mute.tick(now);
        let mut expired = 0;
        for popup in self.popups.values_mut() {
            if popup.poll(now) {
                expired += 1;
            }
        }
        if expired > 0 {
            debug!(expired, "Dismiss timers fired");
            self.reap();
        }
    }

    // ── bookkeeping ───────────────────────────────────────────────────────────

    /// Everything a renderer needs to redraw from scratch: one `Show` per
    /// live popup (plus its expanded state) and the mute indicator.
    pub fn snapshot(&self, now: Instant) -> Vec<RenderOp> {
        let mut ops: Vec<RenderOp> = self
            .popups
            .iter()
            .flat_map(|(id, popup)| popup.snapshot(*id))
            .collect();
        ops.push(match self.mute.remaining(now) {
            Some(left) => RenderOp::MuteIndicator {
                visible: true,
                remaining_secs: left.as_secs(),
            },
            None => RenderOp::MuteIndicator {
                visible: false,
                remaining_secs: 0,
            },
        });
        ops
    }

    pub fn drain_signals(&mut self) -> Vec<Signal> {
        std::mem::take(&mut self.signals)
    }

    pub fn live_count(&self) -> usize {
        self.popups.len()
    }

    #[cfg(test)]
    pub fn is_live(&self, id: NotificationId) -> bool {
        self.popups.contains_key(&id)
    }

    fn dispatch(&mut self, id: NotificationId, event: Option<PopupEvent>, now: Instant) {
        match event {
            Some(PopupEvent::ActionInvoked(action_key)) => {
                info!(id, action = %action_key, "Action invoked");
                self.signals.push(Signal::ActionInvoked { id, action_key });
            }
            Some(PopupEvent::MuteRequested(duration)) => {
                // The popup is dismissed even when the window is refused.
                if let Err(e) = self.mute.request_mute(duration, now) {
                    warn!(id, "Mute button ignored: {}", e);
                }
            }
            None => {}
        }
        self.reap();
    }

    /// Destroys every popup that entered Closing, releasing its slot and
    /// emitting its close signal.
    fn reap(&mut self) {
        let closing: Vec<NotificationId> = self
            .popups
            .iter()
            .filter(|(_, p)| p.is_closing())
            .map(|(id, _)| *id)
            .collect();

        for id in closing {
            let Some(mut popup) = self.popups.remove(&id) else {
                continue;
            };
            if let Some(gone) = popup.destroy() {
                if let Some(slot) = gone.slot {
                    self.stacker.release_slot(slot);
                }
                info!(id, reason = ?gone.reason, "Notification closed");
                self.signals.push(Signal::NotificationClosed {
                    id,
                    reason: gone.reason,
                });
            }
        }
    }
}
