use crate::core::DaemonEvent;
use crate::service::Signal;
use crate::BroadcastMessage;
use notif_proto::protocol::{
    Broadcast, Message, RenderOp, Reply, BUS_NAME, MAX_FRAME_LEN, OBJECT_PATH, PROTOCOL_VERSION,
};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tracing::{debug, error, info, warn};

pub struct ClientHandle {
    pub id: usize,
}

/// Binds the listener.  Failure here is fatal for the daemon: without it
/// nobody can reach the notification interface.
pub async fn bind(address: &str) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(address)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind TCP socket {}: {}", address, e))?;
    info!("TCP server listening at {}", listener.local_addr()?);
    Ok(listener)
}

pub fn start_server(
    listener: TcpListener,
    clients: Arc<RwLock<Vec<ClientHandle>>>,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut client_id = 0usize;

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    client_id += 1;
                    let id = client_id;

                    let client_count = {
                        let mut guard = clients.write().await;
                        guard.push(ClientHandle { id });
                        guard.len()
                    };

                    info!("Client {} connected from {}", id, peer);
                    let _ = event_tx
                        .send(DaemonEvent::ClientCountChanged(client_count))
                        .await;

                    let evt_tx = event_tx.clone();
                    let bcast_rx = broadcast_tx.subscribe();
                    let clients_ref = clients.clone();
                    let evt_tx2 = event_tx.clone();

                    tokio::spawn(async move {
                        handle_client(stream, id, evt_tx, bcast_rx).await;

                        let client_count = {
                            let mut guard = clients_ref.write().await;
                            guard.retain(|c| c.id != id);
                            guard.len()
                        };
                        info!("Client {} disconnected", id);
                        let _ = evt_tx2
                            .send(DaemonEvent::ClientCountChanged(client_count))
                            .await;
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    })
}

async fn handle_client(
    stream: TcpStream,
    client_id: usize,
    event_tx: mpsc::Sender<DaemonEvent>,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    if let Ok(encoded) = encode_hello() {
        if write_half.write_all(&encoded).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        if let Some(len) = Message::declared_len(&read_buf) {
                            if len > MAX_FRAME_LEN {
                                warn!(
                                    "Client {} announced a {} byte frame, dropping it",
                                    client_id, len
                                );
                                return;
                            }
                        }

                        while let Some(frame_len) = Message::complete_frame_len(&read_buf) {
                            let decoded = Message::decode(&read_buf[..frame_len]);
                            read_buf.drain(..frame_len);

                            let command = match decoded {
                                Ok((Message::Command(cmd), _)) => cmd,
                                Ok((other, _)) => {
                                    debug!("Client {} sent non-command frame: {:?}", client_id, other);
                                    continue;
                                }
                                Err(e) => {
                                    warn!("Client {} sent malformed frame: {}", client_id, e);
                                    let reply = Reply::Error { message: e.to_string() };
                                    if write_reply(&mut write_half, reply).await.is_err() {
                                        return;
                                    }
                                    continue;
                                }
                            };
                            debug!("Client {} sent command: {:?}", client_id, command);

                            let (reply_tx, reply_rx) = oneshot::channel();
                            let event = DaemonEvent::ClientCommand { command, reply: reply_tx };
                            if event_tx.send(event).await.is_err() {
                                warn!("DaemonEvent channel closed");
                                return;
                            }
                            let reply = match reply_rx.await {
                                Ok(reply) => reply,
                                Err(_) => {
                                    warn!("Event loop dropped reply for client {}", client_id);
                                    return;
                                }
                            };
                            if write_reply(&mut write_half, reply).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                match msg {
                    Ok(msg) => {
                        let broadcast = to_wire(msg);
                        if let Ok(encoded) = Message::Broadcast(broadcast).encode() {
                            if write_half.write_all(&encoded).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages, resyncing", client_id, n);
                        let Some(ops) = request_snapshot(&event_tx).await else {
                            return;
                        };
                        if let Ok(encoded) = Message::Broadcast(Broadcast::Snapshot { ops }).encode() {
                            if write_half.write_all(&encoded).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(_) => break,
                }
            }
        }
    }
}

async fn request_snapshot(event_tx: &mpsc::Sender<DaemonEvent>) -> Option<Vec<RenderOp>> {
    let (reply, reply_rx) = oneshot::channel();
    if event_tx.send(DaemonEvent::Resync { reply }).await.is_err() {
        warn!("DaemonEvent channel closed");
        return None;
    }
    reply_rx.await.ok()
}

async fn write_reply(
    write_half: &mut tokio::net::tcp::OwnedWriteHalf,
    reply: Reply,
) -> anyhow::Result<()> {
    let encoded = Message::Reply(reply).encode()?;
    write_half.write_all(&encoded).await?;
    Ok(())
}

fn to_wire(msg: BroadcastMessage) -> Broadcast {
    match msg {
        BroadcastMessage::Signal(Signal::ActionInvoked { id, action_key }) => {
            Broadcast::ActionInvoked { id, action_key }
        }
        BroadcastMessage::Signal(Signal::NotificationClosed { id, reason }) => {
            Broadcast::NotificationClosed { id, reason }
        }
        BroadcastMessage::Render(op) => Broadcast::Render { op },
        BroadcastMessage::Log(message) => Broadcast::Log { message },
    }
}

fn encode_hello() -> anyhow::Result<Vec<u8>> {
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        bus_name: BUS_NAME.to_string(),
        object_path: OBJECT_PATH.to_string(),
    })
    .encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DaemonCore;
    use notif_proto::config::Config;
    use notif_proto::protocol::{ClickTarget, CloseReason, Command, NotificationRequest};
    use std::time::Duration;

    async fn read_frame(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Message {
        let mut tmp = [0u8; 4096];
        loop {
            if let Some(len) = Message::complete_frame_len(buf) {
                let (msg, _) = Message::decode(&buf[..len]).unwrap();
                buf.drain(..len);
                return msg;
            }
            let n = stream.read(&mut tmp).await.unwrap();
            assert!(n > 0, "daemon closed the connection");
            buf.extend_from_slice(&tmp[..n]);
        }
    }

    async fn wait_for<F>(stream: &mut TcpStream, buf: &mut Vec<u8>, mut pred: F) -> Message
    where
        F: FnMut(&Message) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let msg = read_frame(stream, buf).await;
                if pred(&msg) {
                    return msg;
                }
            }
        })
        .await
        .expect("timed out waiting for frame")
    }

    async fn start_daemon() -> std::net::SocketAddr {
        start_daemon_with_capacity(256).await.0
    }

    async fn start_daemon_with_capacity(
        capacity: usize,
    ) -> (std::net::SocketAddr, broadcast::Sender<BroadcastMessage>) {
        let (broadcast_tx, _) = broadcast::channel(capacity);
        let (event_tx, event_rx) = mpsc::channel(64);
        let core = DaemonCore::new(&Config::default(), broadcast_tx.clone());
        tokio::spawn(core.run(event_rx));

        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let clients = Arc::new(RwLock::new(Vec::new()));
        start_server(listener, clients, event_tx, broadcast_tx.clone());
        (addr, broadcast_tx)
    }

    #[tokio::test]
    async fn test_bind_conflict_is_an_error() {
        let first = bind("127.0.0.1:0").await.unwrap();
        let taken = first.local_addr().unwrap().to_string();
        assert!(bind(&taken).await.is_err());
    }

    #[tokio::test]
    async fn test_notify_and_default_action_over_socket() {
        let addr = start_daemon().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut buf = Vec::new();

        match read_frame(&mut stream, &mut buf).await {
            Message::Broadcast(Broadcast::Hello { bus_name, .. }) => assert_eq!(bus_name, BUS_NAME),
            other => panic!("expected hello, got {:?}", other),
        }

        let notify = Message::Command(Command::Notify(NotificationRequest {
            app_name: "App".into(),
            summary: "Hi".into(),
            actions: vec!["default".into(), "Open".into()],
            ..Default::default()
        }));
        stream.write_all(&notify.encode().unwrap()).await.unwrap();
        let reply = wait_for(&mut stream, &mut buf, |m| matches!(m, Message::Reply(_))).await;
        assert_eq!(reply, Message::Reply(Reply::Notify { id: 0 }));

        let click = Message::Command(Command::Click {
            id: 0,
            target: ClickTarget::Summary,
        });
        stream.write_all(&click.encode().unwrap()).await.unwrap();

        let invoked = wait_for(&mut stream, &mut buf, |m| {
            matches!(m, Message::Broadcast(Broadcast::ActionInvoked { .. }))
        })
        .await;
        assert_eq!(
            invoked,
            Message::Broadcast(Broadcast::ActionInvoked {
                id: 0,
                action_key: "Open".into()
            })
        );
        let closed = wait_for(&mut stream, &mut buf, |m| {
            matches!(m, Message::Broadcast(Broadcast::NotificationClosed { .. }))
        })
        .await;
        assert_eq!(
            closed,
            Message::Broadcast(Broadcast::NotificationClosed {
                id: 0,
                reason: CloseReason::Dismissed
            })
        );
    }

    #[tokio::test]
    async fn test_malformed_frame_gets_error_reply() {
        let addr = start_daemon().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut buf = Vec::new();
        read_frame(&mut stream, &mut buf).await;

        let garbage = b"{not json";
        let mut framed = (garbage.len() as u32).to_be_bytes().to_vec();
        framed.extend_from_slice(garbage);
        stream.write_all(&framed).await.unwrap();

        let reply = wait_for(&mut stream, &mut buf, |m| matches!(m, Message::Reply(_))).await;
        assert!(matches!(reply, Message::Reply(Reply::Error { .. })));

        // The connection is still usable afterwards.
        let caps = Message::Command(Command::GetCapabilities);
        stream.write_all(&caps.encode().unwrap()).await.unwrap();
        let reply = wait_for(&mut stream, &mut buf, |m| matches!(m, Message::Reply(_))).await;
        match reply {
            Message::Reply(Reply::Capabilities { capabilities }) => assert_eq!(capabilities.len(), 9),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversized_frame_header_drops_client() {
        let addr = start_daemon().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut buf = Vec::new();
        read_frame(&mut stream, &mut buf).await;

        stream.write_all(&[0xFF, 0xFF, 0xFF, 0xFF, b'{']).await.unwrap();

        let mut tmp = [0u8; 64];
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut tmp))
            .await
            .expect("daemon should hang up")
            .unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_lagging_client_gets_snapshot() {
        let (addr, broadcast_tx) = start_daemon_with_capacity(4).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut buf = Vec::new();
        read_frame(&mut stream, &mut buf).await;

        let notify = Message::Command(Command::Notify(NotificationRequest {
            summary: "still here".into(),
            ..Default::default()
        }));
        stream.write_all(&notify.encode().unwrap()).await.unwrap();
        wait_for(&mut stream, &mut buf, |m| {
            matches!(m, Message::Broadcast(Broadcast::Render { op: RenderOp::Show { .. } }))
        })
        .await;

        // No await in between, so the client task cannot drain any of these.
        for i in 0..32 {
            let _ = broadcast_tx.send(BroadcastMessage::Log(format!("filler {}", i)));
        }

        let snapshot = wait_for(&mut stream, &mut buf, |m| {
            matches!(m, Message::Broadcast(Broadcast::Snapshot { .. }))
        })
        .await;
        match snapshot {
            Message::Broadcast(Broadcast::Snapshot { ops }) => {
                assert_eq!(ops.len(), 2);
                match &ops[0] {
                    RenderOp::Show { id, content, .. } => {
                        assert_eq!(*id, 0);
                        assert_eq!(content.summary, "still here");
                    }
                    other => panic!("expected show, got {:?}", other),
                }
                assert_eq!(
                    ops[1],
                    RenderOp::MuteIndicator {
                        visible: false,
                        remaining_secs: 0
                    }
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
