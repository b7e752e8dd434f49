use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::game::{handle_line, Dungeon, PlayerSession};
use crate::monster::{lock, MonsterEvent, MonsterRegistry};
use crate::protocol::{self, ClientMessage, ServerMessage};

/// Channel for frames on their way to one client's WebSocket sink.
type FrameTx = mpsc::UnboundedSender<Message>;

const WELCOME: &[&str] = &[
    "Welcome to the Quantum Dungeon.",
    "Type 'startgame' to enter, or 'help' for commands.",
];

/// How a client talks to us. Replies go back the same way the last
/// command came in.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Wire {
    Text,
    Binary,
}

/// The host side of the game: accepts WebSocket players and runs their
/// commands against the shared dungeon.
pub struct GameServer {
    listener: TcpListener,
    dungeon: Arc<Mutex<Dungeon>>,
    registry: Arc<MonsterRegistry>,
}

impl GameServer {
    pub async fn bind(
        addr: &str,
        dungeon: Arc<Mutex<Dungeon>>,
        registry: Arc<MonsterRegistry>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Game server listening on ws://{}", listener.local_addr()?);
        Ok(Self {
            listener,
            dungeon,
            registry,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, one task per player.
    pub async fn run(self) {
        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Accept error: {}", e);
                    continue;
                }
            };
            info!("New connection from: {}", addr);

            let dungeon = self.dungeon.clone();
            let events = self.registry.subscribe();
            tokio::spawn(async move {
                handle_connection(stream, addr, dungeon, events).await;
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    dungeon: Arc<Mutex<Dungeon>>,
    mut events: broadcast::Receiver<MonsterEvent>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed: {}", e);
            return;
        }
    };
    let (mut ws_write, mut ws_read) = ws_stream.split();

    // ── Write task ──────────────────────────────────────────────────
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if let Err(e) = ws_write.send(frame).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
        let _ = ws_write.close().await;
        debug!("Write task for {} shutting down", addr);
    });

    let mut session = PlayerSession::default();
    let mut wire = Wire::Text;
    // The greeting waits for the first frame, which tells us the wire.
    let mut welcomed = false;

    // ── Read loop ───────────────────────────────────────────────────
    loop {
        tokio::select! {
            incoming = ws_read.next() => {
                let msg = match incoming {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!("WebSocket read error from {}: {}", addr, e);
                        break;
                    }
                    None => break,
                };

                let line = match msg {
                    Message::Text(text) => {
                        wire = Wire::Text;
                        text.to_string()
                    }
                    Message::Binary(bytes) => {
                        wire = Wire::Binary;
                        match protocol::decode(&bytes) {
                            Ok(ClientMessage::Command { line }) => line,
                            Err(e) => {
                                warn!("Failed to decode ClientMessage from {}: {}", addr, e);
                                continue;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => continue,
                };

                if !welcomed {
                    welcomed = true;
                    send(
                        &frame_tx,
                        wire,
                        &ServerMessage::Welcome {
                            lines: WELCOME.iter().map(|l| l.to_string()).collect(),
                        },
                    );
                }

                let reply = {
                    let mut dungeon = lock(&*dungeon);
                    handle_line(&mut dungeon, &mut session, &line)
                };
                let Some(reply) = reply else { continue };

                send(&frame_tx, wire, &ServerMessage::reply(&reply));
                if reply.quit {
                    send(&frame_tx, wire, &ServerMessage::Goodbye);
                    break;
                }
            }

            event = events.recv() => match event {
                Ok(event) => {
                    // Players still in the lobby don't hear the dungeon.
                    if session.room.is_some() {
                        send(&frame_tx, wire, &ServerMessage::monster(event));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Connection {} missed {} monster events", addr, missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    drop(frame_tx);
    let _ = writer.await;
    info!("Connection from {} closed", addr);
}

/// Encode `msg` for the client's wire format and queue it. A client that
/// already went away is not an error.
fn send(tx: &FrameTx, wire: Wire, msg: &ServerMessage) {
    let frame = match wire {
        Wire::Text => match msg.to_text() {
            Some(text) => Message::Text(text.into()),
            None => return,
        },
        Wire::Binary => match protocol::encode(msg) {
            Ok(bytes) => Message::Binary(bytes.into()),
            Err(e) => {
                error!("Failed to serialize ServerMessage: {}", e);
                return;
            }
        },
    };
    if tx.send(frame).is_err() {
        debug!("Client disconnected, dropping message");
    }
}
