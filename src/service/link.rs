use std::io;
use std::net::SocketAddr;

use strum_macros::Display;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout, Instant};

use super::error::ServiceError;
use super::frame::{parse_frame, CommandFrame, Feedback};
use crate::config::{InvalidFramePolicy, ServiceConfig};

/// Longest accepted client line, newline excluded.
pub const MAX_LINE_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum DisconnectReason {
    Closed,
    Watchdog,
    ReadFailed,
    WriteFailed,
    LineTooLong,
    Shutdown,
}

/// Connection notifications. `connection` numbers each accepted client so
/// the daemon can tell its commands apart from a predecessor's.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent {
    ClientConnected {
        addr: SocketAddr,
        connection: u64,
    },
    ClientDisconnected {
        addr: SocketAddr,
        connection: u64,
        reason: DisconnectReason,
    },
}

/// A valid frame tagged with the connection it arrived on.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientCommand {
    pub connection: u64,
    pub frame: CommandFrame,
}

/// Client-facing listener. Serves one client at a time, forwards valid
/// command frames to the daemon and writes queued feedback back out.
pub struct ServiceLink {
    ssid: String,
    config: ServiceConfig,
    listener: TcpListener,
    connection: u64,
    commands: mpsc::Sender<ClientCommand>,
    feedback: mpsc::Receiver<Feedback>,
    events: mpsc::UnboundedSender<ServiceEvent>,
}

pub struct ServiceHandle {
    stop_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl ServiceHandle {
    pub async fn stop(self) {
        let _ = self.stop_tx.send(());
        if let Err(e) = self.join.await {
            log::error!("Service link task failed: {}", e);
        }
    }
}

enum Step {
    Stop,
    Watchdog,
    Send(Feedback),
    Read(io::Result<usize>),
}

impl ServiceLink {
    pub async fn bind(
        ssid: String,
        config: ServiceConfig,
        commands: mpsc::Sender<ClientCommand>,
        feedback: mpsc::Receiver<Feedback>,
        events: mpsc::UnboundedSender<ServiceEvent>,
    ) -> Result<Self, ServiceError> {
        let addr = config.addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServiceError::Bind { addr, source })?;
        Ok(Self {
            ssid,
            config,
            listener,
            connection: 0,
            commands,
            feedback,
            events,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn spawn(self) -> ServiceHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        let join = tokio::spawn(self.run(stop_rx));
        ServiceHandle { stop_tx, join }
    }

    async fn run(mut self, mut stop_rx: oneshot::Receiver<()>) {
        match self.local_addr() {
            Ok(addr) => log::info!("{} service listening on {}", self.ssid, addr),
            Err(e) => log::warn!("{} service listening, address unknown: {}", self.ssid, e),
        }

        loop {
            let accepted = tokio::select! {
                _ = &mut stop_rx => break,
                res = self.listener.accept() => res,
            };

            let (stream, addr) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    log::warn!("Service accept failed: {}", e);
                    tokio::select! {
                        _ = &mut stop_rx => break,
                        _ = sleep(self.config.timeout) => continue,
                    }
                }
            };

            self.discard_feedback();
            self.connection += 1;
            let connection = self.connection;
            log::info!("Connection #{} from user [{}]", connection, addr);
            let _ = self
                .events
                .send(ServiceEvent::ClientConnected { addr, connection });

            let reason = self.serve_client(stream, &mut stop_rx).await;
            log::info!("User [{}] disconnected: {}", addr, reason);
            self.discard_feedback();
            let _ = self.events.send(ServiceEvent::ClientDisconnected {
                addr,
                connection,
                reason,
            });

            if reason == DisconnectReason::Shutdown {
                break;
            }
        }
        log::info!("{} service link stopped", self.ssid);
    }

    async fn serve_client(
        &mut self,
        stream: TcpStream,
        stop_rx: &mut oneshot::Receiver<()>,
    ) -> DisconnectReason {
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("Failed to set TCP_NODELAY on client socket: {}", e);
        }
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = Vec::new();
        let mut watchdog = Instant::now() + self.config.watchdog_interval;

        let reason = loop {
            let step = tokio::select! {
                _ = &mut *stop_rx => Step::Stop,
                _ = sleep_until(watchdog) => Step::Watchdog,
                Some(feedback) = self.feedback.recv() => Step::Send(feedback),
                res = read_line_bounded(&mut reader, &mut line) => Step::Read(res),
            };

            match step {
                Step::Stop => break DisconnectReason::Shutdown,
                Step::Watchdog => {
                    log::warn!(
                        "No valid frame from user for {:?}, dropping connection",
                        self.config.watchdog_interval
                    );
                    break DisconnectReason::Watchdog;
                }
                Step::Send(feedback) => {
                    if !self.write_line(&mut writer, &feedback).await {
                        break DisconnectReason::WriteFailed;
                    }
                }
                Step::Read(Ok(0)) => break DisconnectReason::Closed,
                Step::Read(Ok(_)) => {
                    if line.last() != Some(&b'\n') {
                        if line.len() > MAX_LINE_LEN {
                            log::warn!("Client line exceeds {} bytes", MAX_LINE_LEN);
                            break DisconnectReason::LineTooLong;
                        }
                        // Partial line before EOF; the next read reports the close.
                        continue;
                    }

                    let text = String::from_utf8_lossy(&line).trim().to_string();
                    line.clear();
                    if text.is_empty() {
                        continue;
                    }
                    match self.handle_line(&text) {
                        Ok(()) => watchdog = Instant::now() + self.config.watchdog_interval,
                        Err(Some(reply)) => {
                            if !self.write_line(&mut writer, &reply).await {
                                break DisconnectReason::WriteFailed;
                            }
                        }
                        Err(None) => {}
                    }
                }
                Step::Read(Err(e)) => {
                    log::warn!("Client read failed: {}", e);
                    break DisconnectReason::ReadFailed;
                }
            }
        };

        if let Err(e) = writer.shutdown().await {
            log::debug!("Client socket shutdown failed: {}", e);
        }
        reason
    }

    /// Ok when the line was a valid frame; otherwise the optional rejection to send.
    fn handle_line(&self, text: &str) -> Result<(), Option<Feedback>> {
        match parse_frame(text, &self.ssid) {
            Ok(frame) => {
                log::debug!("Received frame: {}", frame);
                let command = ClientCommand {
                    connection: self.connection,
                    frame,
                };
                if let Err(e) = self.commands.try_send(command) {
                    log::warn!("Command queue full or closed, dropping frame: {}", e);
                }
                Ok(())
            }
            Err(e) => {
                log::warn!("Invalid frame '{}': {}", text, e);
                match self.config.invalid_frames {
                    InvalidFramePolicy::Drop => Err(None),
                    InvalidFramePolicy::Reply => Err(Some(Feedback::Invalid {
                        line: text.to_string(),
                    })),
                }
            }
        }
    }

    async fn write_line(&self, writer: &mut OwnedWriteHalf, feedback: &Feedback) -> bool {
        let line = feedback.to_line();
        match timeout(self.config.timeout, writer.write_all(line.as_bytes())).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                log::warn!("Failed to send feedback to user: {}", e);
                false
            }
            Err(_) => {
                log::warn!("Timed out sending feedback to user");
                false
            }
        }
    }

    fn discard_feedback(&mut self) {
        let mut dropped = 0;
        while self.feedback.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            log::debug!("Discarded {} stale feedback messages", dropped);
        }
    }
}

/// Appends up to one line to `buf`, never letting it grow past
/// `MAX_LINE_LEN + 1` bytes. Partial reads stay in `buf`, so the call can
/// be cancelled and resumed.
async fn read_line_bounded<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let limit = (MAX_LINE_LEN + 1).saturating_sub(buf.len()) as u64;
    let mut limited = reader.take(limit);
    limited.read_until(b'\n', buf).await
}
