/// Rendering seam between the lifecycle engine and whatever draws popups.
///
/// The engine only ever talks to these traits.  The daemon's implementation
/// turns every call into a `RenderOp` broadcast so an out-of-process renderer
/// can draw it; tests record the same ops in memory.
use std::time::Duration;

use notif_proto::protocol::{NotificationId, PopupContent, RenderOp};
use tokio::sync::broadcast;

use crate::BroadcastMessage;

/// One on-screen popup window.
pub trait Surface: Send {
    fn show(&mut self, content: &PopupContent, position: (i32, i32), opacity: f32);
    fn move_to(&mut self, position: (i32, i32));
    fn set_opacity(&mut self, opacity: f32);
    fn set_expanded(&mut self, expanded: bool);
    fn close(&mut self);
}

/// Status indicator shown while notifications are muted.
pub trait Indicator: Send {
    fn show(&mut self, remaining: Duration);
    fn hide(&mut self);
}

pub trait SurfaceFactory: Send {
    fn create(&mut self, id: NotificationId) -> Box<dyn Surface>;
}

// ── broadcast-backed implementation ───────────────────────────────────────────

pub struct RemoteSurface {
    id: NotificationId,
    tx: broadcast::Sender<BroadcastMessage>,
}

impl RemoteSurface {
    fn emit(&self, op: RenderOp) {
        // No renderer connected is fine; the popup still runs its lifecycle.
        let _ = self.tx.send(BroadcastMessage::Render(op));
    }
}

impl Surface for RemoteSurface {
    fn show(&mut self, content: &PopupContent, position: (i32, i32), opacity: f32) {
        self.emit(RenderOp::Show {
            id: self.id,
            content: content.clone(),
            x: position.0,
            y: position.1,
            opacity,
        });
    }

    fn move_to(&mut self, position: (i32, i32)) {
        self.emit(RenderOp::Move {
            id: self.id,
            x: position.0,
            y: position.1,
        });
    }

    fn set_opacity(&mut self, opacity: f32) {
        self.emit(RenderOp::SetOpacity {
            id: self.id,
            opacity,
        });
    }

    fn set_expanded(&mut self, expanded: bool) {
        self.emit(RenderOp::SetExpanded {
            id: self.id,
            expanded,
        });
    }

    fn close(&mut self) {
        self.emit(RenderOp::Close { id: self.id });
    }
}

pub struct RemoteSurfaces {
    tx: broadcast::Sender<BroadcastMessage>,
}

impl RemoteSurfaces {
    pub fn new(tx: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { tx }
    }
}

impl SurfaceFactory for RemoteSurfaces {
    fn create(&mut self, id: NotificationId) -> Box<dyn Surface> {
        Box::new(RemoteSurface {
            id,
            tx: self.tx.clone(),
        })
    }
}

pub struct RemoteIndicator {
    tx: broadcast::Sender<BroadcastMessage>,
}

impl RemoteIndicator {
    pub fn new(tx: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { tx }
    }
}

impl Indicator for RemoteIndicator {
    fn show(&mut self, remaining: Duration) {
        let _ = self.tx.send(BroadcastMessage::Render(RenderOp::MuteIndicator {
            visible: true,
            remaining_secs: remaining.as_secs(),
        }));
    }

    fn hide(&mut self) {
        let _ = self.tx.send(BroadcastMessage::Render(RenderOp::MuteIndicator {
            visible: false,
            remaining_secs: 0,
        }));
    }
}

// ── in-memory recorder ────────────────────────────────────────────────────────

#[cfg(test)]
pub mod testing {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Shared log of every op any recorded surface or indicator produced.
    #[derive(Clone, Default)]
    pub struct OpLog(Arc<Mutex<Vec<RenderOp>>>);

    impl OpLog {
        pub fn push(&self, op: RenderOp) {
            self.0.lock().unwrap().push(op);
        }

        pub fn ops(&self) -> Vec<RenderOp> {
            self.0.lock().unwrap().clone()
        }

        pub fn clear(&self) {
            self.0.lock().unwrap().clear();
        }

        pub fn shown_ids(&self) -> Vec<NotificationId> {
            self.ops()
                .into_iter()
                .filter_map(|op| match op {
                    RenderOp::Show { id, .. } => Some(id),
                    _ => None,
                })
                .collect()
        }

        pub fn closed_ids(&self) -> Vec<NotificationId> {
            self.ops()
                .into_iter()
                .filter_map(|op| match op {
                    RenderOp::Close { id } => Some(id),
                    _ => None,
                })
                .collect()
        }
    }

    pub struct RecordingSurface {
        pub id: NotificationId,
        pub log: OpLog,
    }

    impl Surface for RecordingSurface {
        fn show(&mut self, content: &PopupContent, position: (i32, i32), opacity: f32) {
            self.log.push(RenderOp::Show {
                id: self.id,
                content: content.clone(),
                x: position.0,
                y: position.1,
                opacity,
            });
        }

        fn move_to(&mut self, position: (i32, i32)) {
            self.log.push(RenderOp::Move {
                id: self.id,
                x: position.0,
                y: position.1,
            });
        }

        fn set_opacity(&mut self, opacity: f32) {
            self.log.push(RenderOp::SetOpacity {
                id: self.id,
                opacity,
            });
        }

        fn set_expanded(&mut self, expanded: bool) {
            self.log.push(RenderOp::SetExpanded {
                id: self.id,
                expanded,
            });
        }

        fn close(&mut self) {
            self.log.push(RenderOp::Close { id: self.id });
        }
    }

    pub struct RecordingSurfaces(pub OpLog);

    impl SurfaceFactory for RecordingSurfaces {
        fn create(&mut self, id: NotificationId) -> Box<dyn Surface> {
            Box::new(RecordingSurface {
                id,
                log: self.0.clone(),
            })
        }
    }

    pub struct RecordingIndicator(pub OpLog);

    impl Indicator for RecordingIndicator {
        fn show(&mut self, remaining: Duration) {
            self.0.push(RenderOp::MuteIndicator {
                visible: true,
                remaining_secs: remaining.as_secs(),
            });
        }

        fn hide(&mut self) {
            self.0.push(RenderOp::MuteIndicator {
                visible: false,
                remaining_secs: 0,
            });
        }
    }
}
