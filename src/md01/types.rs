use chrono::{DateTime, Utc};
use serde::Serialize;

pub const AZIMUTH_MIN_DEG: f64 = -180.0;
pub const AZIMUTH_MAX_DEG: f64 = 540.0;
pub const ELEVATION_MIN_DEG: f64 = 0.0;
pub const ELEVATION_MAX_DEG: f64 = 180.0;

/// BIG-RAS/HR default resolution until the controller reports its own.
pub const DEFAULT_PULSES_PER_DEGREE: u8 = 10;

/// Last known state of the positioner as seen by the device link.
///
/// `timestamp` is `None` until a feedback frame has been received on the
/// current connection, so a real 0/0 reading is never confused with "no data".
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PositionerStatus {
    pub timestamp: Option<DateTime<Utc>>,
    pub connected: bool,
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
}

impl PositionerStatus {
    pub fn disconnected() -> Self {
        Self {
            timestamp: None,
            connected: false,
            azimuth_deg: 0.0,
            elevation_deg: 0.0,
        }
    }

    /// Valid reading, if any: timestamp, azimuth, elevation.
    pub fn reading(&self) -> Option<(DateTime<Utc>, f64, f64)> {
        match (self.connected, self.timestamp) {
            (true, Some(ts)) => Some((ts, self.azimuth_deg, self.elevation_deg)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeedbackSample {
    pub timestamp: DateTime<Utc>,
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
    pub azimuth_rate_deg_s: f64,
    pub elevation_rate_deg_s: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TargetPosition {
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
}

impl TargetPosition {
    pub fn new(azimuth_deg: f64, elevation_deg: f64) -> Self {
        Self {
            azimuth_deg,
            elevation_deg,
        }
    }

    /// Limits the target to the travel the MD01 accepts.
    pub fn clamped(self) -> Self {
        Self {
            azimuth_deg: self.azimuth_deg.clamp(AZIMUTH_MIN_DEG, AZIMUTH_MAX_DEG),
            elevation_deg: self
                .elevation_deg
                .clamp(ELEVATION_MIN_DEG, ELEVATION_MAX_DEG),
        }
    }
}

impl Default for TargetPosition {
    fn default() -> Self {
        Self::new(180.0, 0.0)
    }
}

/// Encoder resolution in pulses per degree for each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub azimuth_ppd: u8,
    pub elevation_ppd: u8,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            azimuth_ppd: DEFAULT_PULSES_PER_DEGREE,
            elevation_ppd: DEFAULT_PULSES_PER_DEGREE,
        }
    }
}

/// Decoded content of an MD01 feedback frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feedback {
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
    pub resolution: Resolution,
}
