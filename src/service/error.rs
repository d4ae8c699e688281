use thiserror::Error;

/// Reasons a client line is rejected before it reaches the daemon.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrameError {
    #[error("expected at least 4 fields, got {0}")]
    FieldCount(usize),
    #[error("subsystem id '{got}' does not match '{expected}'")]
    Ssid { expected: String, got: String },
    #[error("unknown frame type '{0}'")]
    FrameType(String),
    #[error("unknown management command '{0}'")]
    ManagementCommand(String),
    #[error("unknown motion command '{0}'")]
    MotionCommand(String),
    #[error("SET needs azimuth and elevation, got {0} fields")]
    SetFieldCount(usize),
    #[error("invalid {axis} angle '{value}'")]
    Angle { axis: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
