//! Line-delimited JSON transport in front of the session controller
//!
//! Each inbound line is one client message; each outbound line is one
//! [`RelayEvent`]. Writer notices are broadcast to every connection.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::events::{event_for, RelayEvent};
use crate::pipeline::SessionController;
use crate::Config;

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    StartCamera {
        #[serde(default)]
        width: Option<u32>,
        #[serde(default)]
        height: Option<u32>,
    },
    StopCamera,
    /// Encoded frame, usually a `data:image/jpeg;base64,...` string
    Frame(String),
    Ping,
}

pub struct RelayServer {
    bind_addr: SocketAddr,
    controller: Arc<SessionController>,
    default_size: (u32, u32),
    max_message_bytes: usize,
    broadcast_tx: broadcast::Sender<RelayEvent>,
}

impl RelayServer {
    pub fn new(config: &Config, controller: Arc<SessionController>) -> Result<Self> {
        let server = &config.server;
        let bind_addr: SocketAddr = format!("{}:{}", server.bind_address, server.port)
            .parse()
            .map_err(|e| eyre!("Invalid bind address {}: {}", server.bind_address, e))?;
        let (broadcast_tx, _) = broadcast::channel(config.pipeline.event_buffer.max(1));

        Ok(Self {
            bind_addr,
            controller,
            default_size: (config.camera.width, config.camera.height),
            max_message_bytes: server.max_message_bytes,
            broadcast_tx,
        })
    }

    /// Forward writer notices to all connected clients
    pub fn relay_notices(&self, notices: flume::Receiver<RelayEvent>) {
        let broadcast_tx = self.broadcast_tx.clone();
        tokio::spawn(async move {
            while let Ok(event) = notices.recv_async().await {
                // No subscribers is fine
                let _ = broadcast_tx.send(event);
            }
        });
    }

    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!("Relay server listening on {}", self.bind_addr);

        loop {
            let (socket, addr) = listener.accept().await?;
            info!("Client connected: {}", addr);

            let controller = Arc::clone(&self.controller);
            let broadcast_rx = self.broadcast_tx.subscribe();
            let default_size = self.default_size;
            let max_message_bytes = self.max_message_bytes;

            tokio::spawn(async move {
                let result = handle_socket(
                    socket,
                    controller,
                    default_size,
                    max_message_bytes,
                    broadcast_rx,
                )
                .await;
                if let Err(e) = result {
                    error!("Connection {} failed: {}", addr, e);
                }
                info!("Client disconnected: {}", addr);
            });
        }
    }
}

async fn handle_socket(
    socket: TcpStream,
    controller: Arc<SessionController>,
    default_size: (u32, u32),
    max_message_bytes: usize,
    mut broadcast_rx: broadcast::Receiver<RelayEvent>,
) -> Result<()> {
    let (reader, mut writer) = socket.into_split();
    let mut reader = BufReader::new(reader);
    let mut pending = Vec::new();

    send_event(&mut writer, &RelayEvent::status("Connected to server")).await?;

    let mut notices_open = true;
    loop {
        tokio::select! {
            line = next_line(&mut reader, &mut pending, max_message_bytes) => {
                let line = match line? {
                    ReadLine::Line(line) => line,
                    ReadLine::TooLong => {
                        warn!("Client message exceeds {} bytes, closing", max_message_bytes);
                        let event = RelayEvent::error(format!(
                            "Message exceeds {} bytes",
                            max_message_bytes
                        ));
                        send_event(&mut writer, &event).await?;
                        break;
                    }
                    ReadLine::Eof => break,
                };
                if line.trim().is_empty() {
                    continue;
                }

                let event = match serde_json::from_str::<ClientMessage>(&line) {
                    Ok(message) => handle_message(&controller, default_size, message).await,
                    Err(e) => {
                        warn!("Invalid client message: {}", e);
                        RelayEvent::error(format!("Invalid message: {}", e))
                    }
                };
                send_event(&mut writer, &event).await?;
            }
            notice = broadcast_rx.recv(), if notices_open => {
                match notice {
                    Ok(event) => send_event(&mut writer, &event).await?,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("Client lagged, skipped {} notices", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => notices_open = false,
                }
            }
        }
    }

    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum ReadLine {
    Line(String),
    /// More than the allowed bytes arrived without a newline
    TooLong,
    Eof,
}

/// Read one newline-terminated line of at most `max` bytes.
///
/// Partial input is kept in `pending`, so the future can be dropped and
/// polled again from `select!` without losing data.
async fn next_line<R>(reader: &mut R, pending: &mut Vec<u8>, max: usize) -> io::Result<ReadLine>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let limit = (max + 1).saturating_sub(pending.len()) as u64;
        let n = (&mut *reader).take(limit).read_until(b'\n', pending).await?;

        if pending.last() == Some(&b'\n') {
            pending.pop();
            if pending.last() == Some(&b'\r') {
                pending.pop();
            }
            return finish_line(pending).map(ReadLine::Line);
        }
        if pending.len() > max {
            pending.clear();
            return Ok(ReadLine::TooLong);
        }
        if n == 0 {
            if pending.is_empty() {
                return Ok(ReadLine::Eof);
            }
            return finish_line(pending).map(ReadLine::Line);
        }
    }
}

fn finish_line(pending: &mut Vec<u8>) -> io::Result<String> {
    String::from_utf8(std::mem::take(pending))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Run one client message against the controller on the blocking pool
pub async fn handle_message(
    controller: &Arc<SessionController>,
    default_size: (u32, u32),
    message: ClientMessage,
) -> RelayEvent {
    let controller = Arc::clone(controller);

    let joined = match message {
        ClientMessage::Ping => return RelayEvent::status("Server is reachable"),
        ClientMessage::StartCamera { width, height } => {
            let width = width.unwrap_or(default_size.0);
            let height = height.unwrap_or(default_size.1);
            tokio::task::spawn_blocking(move || event_for(&controller.start(width, height))).await
        }
        ClientMessage::StopCamera => {
            tokio::task::spawn_blocking(move || event_for(&controller.stop())).await
        }
        ClientMessage::Frame(data) => {
            tokio::task::spawn_blocking(move || event_for(&controller.submit_frame(data))).await
        }
    };

    joined.unwrap_or_else(|e| RelayEvent::error(format!("Internal error: {}", e)))
}

async fn send_event<W>(writer: &mut W, event: &RelayEvent) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_socket_style_messages() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"start_camera","data":{"width":640,"height":480}}"#)
                .unwrap();
        assert_eq!(
            msg,
            ClientMessage::StartCamera {
                width: Some(640),
                height: Some(480)
            }
        );

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"start_camera","data":{}}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::StartCamera {
                width: None,
                height: None
            }
        );

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"stop_camera"}"#).unwrap();
        assert_eq!(msg, ClientMessage::StopCamera);

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"frame","data":"data:image/jpeg;base64,AAAA"}"#)
                .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Frame("data:image/jpeg;base64,AAAA".into())
        );
    }

    #[tokio::test]
    async fn lines_are_split_and_capped() {
        let mut input: &[u8] = b"{\"type\":\"ping\"}\r\nabcd\nabcdefghij\ntail";
        let mut pending = Vec::new();

        assert_eq!(
            next_line(&mut input, &mut pending, 16).await.unwrap(),
            ReadLine::Line(r#"{"type":"ping"}"#.into())
        );
        assert_eq!(
            next_line(&mut input, &mut pending, 4).await.unwrap(),
            ReadLine::Line("abcd".into())
        );
        assert_eq!(
            next_line(&mut input, &mut pending, 4).await.unwrap(),
            ReadLine::TooLong
        );
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn unterminated_last_line_is_returned_before_eof() {
        let mut input: &[u8] = b"tail";
        let mut pending = Vec::new();

        assert_eq!(
            next_line(&mut input, &mut pending, 16).await.unwrap(),
            ReadLine::Line("tail".into())
        );
        assert_eq!(
            next_line(&mut input, &mut pending, 16).await.unwrap(),
            ReadLine::Eof
        );
    }

    #[test]
    fn notice_broadcast_uses_configured_capacity() {
        let controller = Arc::new(SessionController::new(
            Arc::new(crate::output::V4l2LoopbackBackend::new(None)),
            &crate::PipelineConfig::default(),
        ));
        let mut config = Config::default();
        config.pipeline.event_buffer = 2;
        let server = RelayServer::new(&config, controller).unwrap();

        let mut rx = server.broadcast_tx.subscribe();
        for i in 0..3 {
            server.broadcast_tx.send(RelayEvent::FrameReceived { sequence: i }).unwrap();
        }
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(1))
        ));
    }

    #[test]
    fn unknown_messages_are_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"reboot"}"#).is_err());
    }
}
