use chrono::{DateTime, Utc};
use thiserror::Error;

/// Raised by the device poller when the antenna turns faster than the
/// configured limits. Terminal for the device session and for the daemon.
#[derive(Debug, Clone, PartialEq, Error)]
#[error(
    "antenna motion fault at {timestamp}: az rate {azimuth_rate_deg_s:.3} deg/s (limit {azimuth_threshold:.3}), el rate {elevation_rate_deg_s:.3} deg/s (limit {elevation_threshold:.3})"
)]
pub struct ThresholdFault {
    pub timestamp: DateTime<Utc>,
    pub azimuth_fault: bool,
    pub elevation_fault: bool,
    pub azimuth_deg: f64,
    pub last_azimuth_deg: f64,
    pub elevation_deg: f64,
    pub last_elevation_deg: f64,
    pub azimuth_rate_deg_s: f64,
    pub elevation_rate_deg_s: f64,
    pub azimuth_threshold: f64,
    pub elevation_threshold: f64,
    pub time_delta_s: f64,
}

impl ThresholdFault {
    pub fn log(&self) {
        log::error!("----ERROR! ERROR! ERROR!----");
        if self.azimuth_fault {
            log::error!(
                "Antenna Azimuth Motion Fault: rotation rate {:2.3} [deg/s] exceeded threshold {:2.3} [deg/s]",
                self.azimuth_rate_deg_s,
                self.azimuth_threshold
            );
        }
        if self.elevation_fault {
            log::error!(
                "Antenna Elevation Motion Fault: rotation rate {:2.3} [deg/s] exceeded threshold {:2.3} [deg/s]",
                self.elevation_rate_deg_s,
                self.elevation_threshold
            );
        }
        log::error!(
            "cur_az: {:+3.1}, last_az: {:+3.1}",
            self.azimuth_deg,
            self.last_azimuth_deg
        );
        log::error!(
            "cur_el: {:+3.1}, last_el: {:+3.1}, time_delta: {:+3.1} [ms]",
            self.elevation_deg,
            self.last_elevation_deg,
            self.time_delta_s * 1000.0
        );
    }
}
