// src/ws.rs
use crate::bytes::{bytes_to_hex, hex_to_bytes};
use crate::types::{
    DeactivationReason, HostCommand, IncomingMessage, OutgoingMessage, ReaderCommand,
};
use crossbeam_channel::Sender;
use futures::{SinkExt, StreamExt};
use log::{info, warn};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use warp::Filter;

#[derive(Clone)]
pub struct Channels {
    pub host_tx: Sender<HostCommand>,
    pub reader_tx: Option<Sender<ReaderCommand>>,
}

pub async fn start_server(
    bind: SocketAddr,
    channels: Channels,
    mut event_rx: broadcast::Receiver<OutgoingMessage>,
) {
    // Shared Broadcast Channel for WS Clients
    let (ws_tx, _) = broadcast::channel::<OutgoingMessage>(32);
    let ws_tx = Arc::new(ws_tx);

    // 1. Task to forward service events -> all WS clients
    let ws_tx_clone = ws_tx.clone();
    tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(msg) => {
                    let _ = ws_tx_clone.send(msg);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Dropped {} events for slow clients", n)
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let ws_route = warp::path::end()
        .and(warp::ws())
        .map(move |ws: warp::ws::Ws| {
            let channels = channels.clone();
            let ws_tx = ws_tx.clone();
            ws.on_upgrade(move |socket| handle_connection(socket, channels, ws_tx))
        });

    let routes = ws_route.with(warp::cors().allow_any_origin());

    info!("WebSocket server running on ws://{}", bind);
    warp::serve(routes).run(bind).await;
}

async fn handle_connection(
    ws: warp::ws::WebSocket,
    channels: Channels,
    ws_tx: Arc<broadcast::Sender<OutgoingMessage>>,
) {
    let (mut client_ws_tx, mut client_ws_rx) = ws.split();
    let mut rx_broadcast = ws_tx.subscribe();

    // Replies for this client and broadcasts share one writer.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<OutgoingMessage>();

    let broadcast_out = out_tx.clone();
    tokio::spawn(async move {
        loop {
            match rx_broadcast.recv().await {
                Ok(msg) => {
                    if broadcast_out.send(msg).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Client missed {} events", n)
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Could not serialise {:?}: {}", msg, e);
                    continue;
                }
            };
            if client_ws_tx
                .send(warp::ws::Message::text(json))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    // Handle incoming messages from Client
    let mut connection = Connection::new(channels);
    while let Some(result) = client_ws_rx.next().await {
        let Ok(msg) = result else { break };
        let Ok(text) = msg.to_str() else { continue };
        match serde_json::from_str::<IncomingMessage>(text) {
            Ok(parsed) => {
                if let Some(reply) = connection.handle(parsed).await {
                    let _ = out_tx.send(reply);
                }
            }
            Err(e) => warn!("Ignoring malformed client message: {}", e),
        }
    }
}

/// One client's view of the bridge. Sessions it opened and did not
/// deactivate are ended with `LinkLoss` when it is dropped.
pub struct Connection {
    channels: Channels,
    sessions: HashSet<String>,
}

impl Connection {
    pub fn new(channels: Channels) -> Self {
        Self {
            channels,
            sessions: HashSet::new(),
        }
    }

    pub async fn handle(&mut self, msg: IncomingMessage) -> Option<OutgoingMessage> {
        match &msg {
            IncomingMessage::APDU { session, .. } => {
                self.sessions.insert(session.clone());
            }
            IncomingMessage::DEACTIVATE { session, .. } => {
                self.sessions.remove(session);
            }
            _ => {}
        }
        dispatch(msg, &self.channels).await
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for session in self.sessions.drain() {
            info!("Client gone, ending session {}", session);
            let _ = self.channels.host_tx.send(HostCommand::Deactivate {
                session,
                reason: DeactivationReason::LinkLoss,
            });
        }
    }
}

/// Routes one client message to the emulator or reader thread.
/// Returns the message to send back to that client only, if any.
pub async fn dispatch(msg: IncomingMessage, channels: &Channels) -> Option<OutgoingMessage> {
    match msg {
        IncomingMessage::APDU { session, apdu } => {
            let bytes = match hex_to_bytes(&apdu) {
                Ok(bytes) => bytes,
                Err(e) => {
                    return Some(OutgoingMessage::APDU_ERROR {
                        session,
                        error: e.to_string(),
                    });
                }
            };
            let (reply, reply_rx) = oneshot::channel();
            let cmd = HostCommand::Apdu {
                session: session.clone(),
                apdu: bytes,
                reply,
            };
            if channels.host_tx.send(cmd).is_err() {
                return Some(OutgoingMessage::APDU_ERROR {
                    session,
                    error: "emulator stopped".into(),
                });
            }
            Some(match reply_rx.await {
                Ok(response) => OutgoingMessage::RESPONSE_APDU {
                    session,
                    command: apdu.to_uppercase(),
                    response: bytes_to_hex(&response),
                },
                Err(_) => OutgoingMessage::APDU_ERROR {
                    session,
                    error: "emulator dropped the command".into(),
                },
            })
        }
        IncomingMessage::DEACTIVATE { session, reason } => {
            let _ = channels
                .host_tx
                .send(HostCommand::Deactivate { session, reason });
            None
        }
        IncomingMessage::SET_ACCOUNT { text } => {
            let _ = channels.host_tx.send(HostCommand::SetAccount { text });
            None
        }
        IncomingMessage::GET_READER_STATUS => match &channels.reader_tx {
            Some(tx) => {
                let _ = tx.send(ReaderCommand::CheckReaderStatus);
                None
            }
            None => Some(OutgoingMessage::READER_STATUS { success: false }),
        },
    }
}
