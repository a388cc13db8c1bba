/// DaemonCore: single-owner event loop for all notification state.
///
/// Socket tasks never touch the engine.  They send `DaemonEvent`s here and
/// wait on a oneshot for the reply.  Timers are not tasks either: before
/// each iteration the loop asks the service for its earliest deadline and
/// sleeps until then alongside the event channel.
///
/// After every event or timer wake-up, queued signals are drained and
/// broadcast to all clients as `BroadcastMessage::Signal`.
use std::time::{Duration, Instant};

use notif_proto::config::Config;
use notif_proto::protocol::{Command, RenderOp, Reply};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::service::NotificationService;
use crate::surface::{RemoteIndicator, RemoteSurfaces};
use crate::BroadcastMessage;

// ── DaemonEvent ───────────────────────────────────────────────────────────────

/// All inputs into the DaemonCore loop.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A command from a connected client, with the channel to answer on.
    ClientCommand {
        command: Command,
        reply: oneshot::Sender<Reply>,
    },
    ClientCountChanged(usize),
    /// A client fell behind on broadcasts and needs the full picture again.
    Resync {
        reply: oneshot::Sender<Vec<RenderOp>>,
    },
    /// Shutdown requested.
    Shutdown,
}

// ── DaemonCore ────────────────────────────────────────────────────────────────

pub struct DaemonCore {
    service: NotificationService,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl DaemonCore {
    pub fn new(config: &Config, broadcast_tx: broadcast::Sender<BroadcastMessage>) -> Self {
        let service = NotificationService::new(
            config,
            Box::new(RemoteSurfaces::new(broadcast_tx.clone())),
            Box::new(RemoteIndicator::new(broadcast_tx.clone())),
        );
        Self {
            service,
            broadcast_tx,
        }
    }

    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        loop {
            let deadline = self.service.next_deadline();

            tokio::select! {
                event = event_rx.recv() => match event {
                    Some(DaemonEvent::Shutdown) | None => break,
                    Some(event) => self.handle_event(event),
                },
                _ = sleep_until(deadline) => {
                    self.service.tick(Instant::now());
                }
            }

            self.flush_signals();
        }

        info!("Event loop stopped");
        Ok(())
    }

    fn handle_event(&mut self, event: DaemonEvent) {
        match event {
            DaemonEvent::ClientCommand { command, reply } => {
                let answer = self.handle_command(command, Instant::now());
                if reply.send(answer).is_err() {
                    debug!("Client went away before its reply");
                }
            }
            DaemonEvent::ClientCountChanged(count) => {
                info!("{} client(s) connected", count);
            }
            DaemonEvent::Resync { reply } => {
                if reply.send(self.service.snapshot(Instant::now())).is_err() {
                    debug!("Client went away before its snapshot");
                }
            }
            DaemonEvent::Shutdown => {}
        }
    }

    pub fn handle_command(&mut self, command: Command, now: Instant) -> Reply {
        match command {
            Command::Notify(request) => Reply::Notify {
                id: self.service.notify(request, now),
            },
            Command::GetCapabilities => Reply::Capabilities {
                capabilities: self.service.capabilities(),
            },
            Command::CloseNotification { id } => {
                self.service.close_notification(id);
                Reply::Ok
            }
            Command::GetServerInformation => {
                Reply::ServerInformation(self.service.server_information())
            }
            Command::Mute { seconds } => {
                match self.service.request_mute(Duration::from_secs(seconds), now) {
                    Ok(()) => Reply::Ok,
                    Err(e) => {
                        warn!(seconds, "Refusing mute request: {}", e);
                        Reply::Error {
                            message: e.to_string(),
                        }
                    }
                }
            }
            Command::Unmute => {
                self.service.unmute();
                Reply::Ok
            }
            Command::PointerEnter { id } => {
                self.service.pointer_enter(id, now);
                Reply::Ok
            }
            Command::PointerLeave { id } => {
                self.service.pointer_leave(id, now);
                Reply::Ok
            }
            Command::Click { id, target } => {
                self.service.click(id, target, now);
                Reply::Ok
            }
            Command::MuteClick { id } => {
                self.service.mute_click(id, now);
                Reply::Ok
            }
            Command::ToggleExpanded { id } => {
                self.service.toggle_expanded(id, now);
                Reply::Ok
            }
            Command::ScreenGeometry { width, height } => {
                if width == 0 || height == 0 {
                    warn!(width, height, "Ignoring empty screen geometry");
                    return Reply::Error {
                        message: format!("invalid screen geometry {}x{}", width, height),
                    };
                }
                self.service.set_screen_geometry(width, height);
                Reply::Ok
            }
        }
    }

    fn flush_signals(&mut self) {
        for signal in self.service.drain_signals() {
            // Ignore errors - no receivers is OK
            let _ = self.broadcast_tx.send(BroadcastMessage::Signal(signal));
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => {
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await
        }
        None => std::future::pending().await,
    }
}
