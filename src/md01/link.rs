use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::codec::{
    decode_feedback, encode_set, encode_status_query, encode_stop, Frame, END_MARKER, FRAME_LEN,
    START_MARKER,
};
use super::error::LinkError;
use super::types::{PositionerStatus, Resolution, TargetPosition};
use crate::config::DeviceConfig;

/// Upper bound on bytes scanned for either delimiter of a feedback frame.
pub const MAX_FRAME_LEN: usize = 32;

/// TCP connection to the MD01 controller.
///
/// I/O failures never escape: they close the socket and come back as a
/// status with `connected == false`.
pub struct DeviceLink {
    addr: String,
    timeout: Duration,
    stream: Option<BufReader<TcpStream>>,
    status: PositionerStatus,
    resolution: Resolution,
}

impl DeviceLink {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            addr: config.addr(),
            timeout: config.timeout,
            stream: None,
            status: PositionerStatus::disconnected(),
            resolution: Resolution::default(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub async fn connect(&mut self) -> Result<(), LinkError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let stream = timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| LinkError::Timeout(self.timeout))?
            .map_err(|source| LinkError::Connect {
                addr: self.addr.clone(),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("Failed to set TCP_NODELAY on MD01 socket: {}", e);
        }

        self.stream = Some(BufReader::new(stream));
        self.status = PositionerStatus {
            timestamp: None,
            connected: true,
            ..self.status
        };
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.get_mut().shutdown().await {
                log::debug!("MD01 socket shutdown failed: {}", e);
            }
            log::info!("Disconnected from MD01 at {}", self.addr);
        }
        self.status = PositionerStatus::disconnected();
    }

    pub async fn query_status(&mut self) -> PositionerStatus {
        let frame = encode_status_query();
        match self.exchange(&frame).await {
            Ok(status) => status,
            Err(e) => self.fail("STATUS", e),
        }
    }

    pub async fn send_stop(&mut self) -> PositionerStatus {
        let frame = encode_stop();
        match self.exchange(&frame).await {
            Ok(status) => {
                log::info!("Sent 'STOP' command to MD01");
                status
            }
            Err(e) => self.fail("STOP", e),
        }
    }

    /// The MD01 does not answer SET, so the returned status is the last
    /// reading and says nothing about the commanded position.
    pub async fn send_set(&mut self, target: TargetPosition) -> PositionerStatus {
        let frame = match encode_set(target, self.resolution) {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("Not sending 'SET' command to MD01: {}", e);
                return self.status;
            }
        };

        match self.write_frame(&frame).await {
            Ok(()) => {
                let target = target.clamped();
                log::info!(
                    "Sent 'SET' command to MD01: AZ={:3.1}, EL={:3.1}",
                    target.azimuth_deg,
                    target.elevation_deg
                );
                self.status
            }
            Err(e) => self.fail("SET", e),
        }
    }

    /// Reads the next delimited frame, returning the time its first byte arrived.
    pub async fn receive_frame(&mut self) -> Result<(DateTime<Utc>, Vec<u8>), LinkError> {
        let stream = self.stream.as_mut().ok_or(LinkError::NotConnected)?;
        timeout(self.timeout, read_frame(stream))
            .await
            .map_err(|_| LinkError::Timeout(self.timeout))?
    }

    async fn exchange(&mut self, frame: &Frame) -> Result<PositionerStatus, LinkError> {
        self.write_frame(frame).await?;
        let (timestamp, raw) = self.receive_frame().await?;
        let feedback = decode_feedback(&raw)?;

        self.resolution = feedback.resolution;
        self.status = PositionerStatus {
            timestamp: Some(timestamp),
            connected: true,
            azimuth_deg: feedback.azimuth_deg,
            elevation_deg: feedback.elevation_deg,
        };
        Ok(self.status)
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        let stream = self.stream.as_mut().ok_or(LinkError::NotConnected)?;
        timeout(self.timeout, stream.write_all(frame))
            .await
            .map_err(|_| LinkError::Timeout(self.timeout))??;
        Ok(())
    }

    fn fail(&mut self, command: &str, err: LinkError) -> PositionerStatus {
        if self.stream.take().is_some() {
            log::warn!("MD01 '{}' failed: {}, shutting down socket", command, err);
        } else {
            log::debug!("MD01 '{}' skipped: {}", command, err);
        }
        self.status = PositionerStatus::disconnected();
        self.status
    }
}

/// Scans for a start marker, then collects bytes up to and including the
/// end marker. Both phases are bounded by [`MAX_FRAME_LEN`].
pub async fn read_frame<R>(reader: &mut R) -> Result<(DateTime<Utc>, Vec<u8>), LinkError>
where
    R: AsyncRead + Unpin,
{
    let mut skipped = 0;
    while read_byte(reader).await? != START_MARKER {
        skipped += 1;
        if skipped >= MAX_FRAME_LEN {
            return Err(LinkError::FrameTooLong(MAX_FRAME_LEN));
        }
    }
    let timestamp = Utc::now();

    let mut frame = Vec::with_capacity(FRAME_LEN);
    frame.push(START_MARKER);
    loop {
        let byte = read_byte(reader).await?;
        frame.push(byte);
        if byte == END_MARKER {
            return Ok((timestamp, frame));
        }
        if frame.len() >= MAX_FRAME_LEN {
            return Err(LinkError::FrameTooLong(MAX_FRAME_LEN));
        }
    }
}

async fn read_byte<R>(reader: &mut R) -> Result<u8, LinkError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_u8().await {
        Ok(byte) => Ok(byte),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(LinkError::Closed),
        Err(e) => Err(LinkError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::md01::codec::{OPCODE_SET, OPCODE_STATUS};
    use tokio::net::TcpListener;

    const FEEDBACK_10_20: [u8; 12] = [0x57, 3, 7, 0, 0, 10, 3, 8, 0, 0, 10, 0x20];

    fn config_for(port: u16) -> DeviceConfig {
        DeviceConfig {
            ip: "127.0.0.1".into(),
            port,
            timeout: Duration::from_millis(500),
            reconnect_backoff: None,
            poll_rate: Duration::from_millis(50),
            az_thresh: 4.0,
            el_thresh: 4.0,
        }
    }

    #[tokio::test]
    async fn read_frame_skips_leading_noise() {
        let mut input: &[u8] = &[0x01, 0x02, 0x57, 3, 6, 0, 0, 10, 3, 6, 0, 0, 10, 0x20, 0x99];
        let (_, frame) = read_frame(&mut input).await.unwrap();
        assert_eq!(frame.len(), 12);
        assert_eq!(frame[0], 0x57);
        assert_eq!(*frame.last().unwrap(), 0x20);
        assert_eq!(input, &[0x99]);
    }

    #[tokio::test]
    async fn read_frame_bounds_frame_length() {
        let mut bytes = vec![0x57];
        bytes.extend(std::iter::repeat(1u8).take(64));
        let mut input: &[u8] = &bytes;
        let err = read_frame(&mut input).await.unwrap_err();
        assert!(matches!(err, LinkError::FrameTooLong(MAX_FRAME_LEN)));
    }

    #[tokio::test]
    async fn read_frame_bounds_noise_before_start() {
        let bytes = vec![0u8; 64];
        let mut input: &[u8] = &bytes;
        let err = read_frame(&mut input).await.unwrap_err();
        assert!(matches!(err, LinkError::FrameTooLong(_)));
    }

    #[tokio::test]
    async fn read_frame_reports_closed_stream() {
        let mut input: &[u8] = &[0x57, 3, 6];
        let err = read_frame(&mut input).await.unwrap_err();
        assert!(matches!(err, LinkError::Closed));
    }

    #[tokio::test]
    async fn query_status_decodes_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 13];
            socket.read_exact(&mut request).await.unwrap();
            socket.write_all(&FEEDBACK_10_20).await.unwrap();
            request
        });

        let mut link = DeviceLink::new(&config_for(port));
        link.connect().await.unwrap();
        assert!(link.is_connected());
        let status = link.query_status().await;

        assert!(status.connected);
        let (_, az, el) = status.reading().unwrap();
        assert!((az - 10.0).abs() < 1e-9);
        assert!((el - 20.0).abs() < 1e-9);
        assert_eq!(server.await.unwrap()[11], OPCODE_STATUS);
    }

    #[tokio::test]
    async fn send_set_keeps_previous_reading() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 13];
            socket.read_exact(&mut request).await.unwrap();
            socket.write_all(&FEEDBACK_10_20).await.unwrap();
            let mut set = [0u8; 13];
            socket.read_exact(&mut set).await.unwrap();
            set
        });

        let mut link = DeviceLink::new(&config_for(port));
        link.connect().await.unwrap();
        let before = link.query_status().await;
        let after = link.send_set(TargetPosition::new(45.0, 10.0)).await;
        assert_eq!(before, after);

        let set = server.await.unwrap();
        assert_eq!(set[11], OPCODE_SET);
        assert_eq!(&set[1..5], b"4050");
        assert_eq!(&set[6..10], b"3700");
    }

    #[tokio::test]
    async fn failed_query_reports_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut link = DeviceLink::new(&config_for(port));
        link.connect().await.unwrap();
        server.await.unwrap();

        let status = link.query_status().await;
        assert_eq!(status, PositionerStatus::disconnected());
        assert!(status.reading().is_none());
        assert!(!link.is_connected());
    }

    #[tokio::test]
    async fn connect_failure_leaves_link_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut link = DeviceLink::new(&config_for(port));
        assert!(link.connect().await.is_err());
        assert!(!link.is_connected());
        assert!(!link.query_status().await.connected);
    }
}
