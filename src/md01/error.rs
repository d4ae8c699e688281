use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("pulse count for {angle_deg:.1} deg at {ppd} pulses/deg does not fit in four digits")]
    PulseOverflow { angle_deg: f64, ppd: u8 },
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("not connected")]
    NotConnected,
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection closed by positioner")]
    Closed,
    #[error("no frame delimiter within {0} bytes")]
    FrameTooLong(usize),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

#[derive(Debug, Error)]
pub enum PollerError {
    #[error("poller already running")]
    AlreadyRunning,
}
