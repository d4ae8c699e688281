//! Rate tracking and SET/STOP planning for the poll loop.

use chrono::{DateTime, Utc};

use super::types::{FeedbackSample, TargetPosition};
use crate::fault::ThresholdFault;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotionState {
    pub az_in_motion: bool,
    pub el_in_motion: bool,
    pub az_fault: bool,
    pub el_fault: bool,
    pub stop_already_sent: bool,
}

impl MotionState {
    pub fn in_motion(&self) -> bool {
        self.az_in_motion || self.el_in_motion
    }

    pub fn faulted(&self) -> bool {
        self.az_fault || self.el_fault
    }
}

/// What the poll loop does with a pending target this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionDecision {
    /// Already there at 0.1 deg resolution.
    OnTarget,
    /// A stop went out and the antenna is still turning; retry next cycle.
    AwaitStop,
    /// Target lies against the current direction of travel; stop first, retry.
    StopFirst,
    /// Moving, but towards the target; safe to send SET straight away.
    Redirect,
    /// Stationary; send SET.
    Set,
}

impl MotionDecision {
    /// Whether the pending target must be retried on the next cycle.
    pub fn keeps_pending(self) -> bool {
        matches!(self, MotionDecision::AwaitStop | MotionDecision::StopFirst)
    }
}

#[derive(Debug, Clone, Copy)]
struct Baseline {
    timestamp: DateTime<Utc>,
    azimuth_deg: f64,
    elevation_deg: f64,
}

#[derive(Debug, Clone)]
pub struct MotionTracker {
    azimuth_threshold: f64,
    elevation_threshold: f64,
    baseline: Option<Baseline>,
    azimuth_rate: f64,
    elevation_rate: f64,
    state: MotionState,
}

impl MotionTracker {
    pub fn new(azimuth_threshold: f64, elevation_threshold: f64) -> Self {
        Self {
            azimuth_threshold,
            elevation_threshold,
            baseline: None,
            azimuth_rate: 0.0,
            elevation_rate: 0.0,
            state: MotionState::default(),
        }
    }

    #[allow(dead_code)]
    pub fn state(&self) -> MotionState {
        self.state
    }

    /// Starts a fresh baseline after (re)connecting. Rates read zero until
    /// the next reading arrives.
    pub fn seed(&mut self, timestamp: DateTime<Utc>, azimuth_deg: f64, elevation_deg: f64) -> FeedbackSample {
        self.baseline = Some(Baseline {
            timestamp,
            azimuth_deg,
            elevation_deg,
        });
        self.azimuth_rate = 0.0;
        self.elevation_rate = 0.0;
        self.state.az_in_motion = false;
        self.state.el_in_motion = false;
        self.state.stop_already_sent = false;
        self.sample(timestamp, azimuth_deg, elevation_deg)
    }

    /// Folds a new reading into the rate estimate and checks the thresholds.
    ///
    /// A non-positive time delta keeps the previous rates. Once a fault has
    /// been raised every later update fails too.
    pub fn update(
        &mut self,
        timestamp: DateTime<Utc>,
        azimuth_deg: f64,
        elevation_deg: f64,
    ) -> Result<FeedbackSample, ThresholdFault> {
        let Some(baseline) = self.baseline else {
            return Ok(self.seed(timestamp, azimuth_deg, elevation_deg));
        };

        let time_delta = seconds_between(baseline.timestamp, timestamp);
        if time_delta > 0.0 {
            self.azimuth_rate = (azimuth_deg - baseline.azimuth_deg) / time_delta;
            self.elevation_rate = (elevation_deg - baseline.elevation_deg) / time_delta;
            self.state.az_in_motion = self.azimuth_rate != 0.0;
            self.state.el_in_motion = self.elevation_rate != 0.0;
        } else {
            log::debug!(
                "Non-positive time delta ({:.6}s) between MD01 readings, keeping previous rates",
                time_delta
            );
        }

        if self.azimuth_rate.abs() > self.azimuth_threshold {
            self.state.az_fault = true;
        }
        if self.elevation_rate.abs() > self.elevation_threshold {
            self.state.el_fault = true;
        }

        if self.state.faulted() {
            return Err(ThresholdFault {
                timestamp,
                azimuth_fault: self.state.az_fault,
                elevation_fault: self.state.el_fault,
                azimuth_deg,
                last_azimuth_deg: baseline.azimuth_deg,
                elevation_deg,
                last_elevation_deg: baseline.elevation_deg,
                azimuth_rate_deg_s: self.azimuth_rate,
                elevation_rate_deg_s: self.elevation_rate,
                azimuth_threshold: self.azimuth_threshold,
                elevation_threshold: self.elevation_threshold,
                time_delta_s: time_delta,
            });
        }

        self.baseline = Some(Baseline {
            timestamp,
            azimuth_deg,
            elevation_deg,
        });
        Ok(self.sample(timestamp, azimuth_deg, elevation_deg))
    }

    /// Decides how to reach `target` from the position in `sample`, given
    /// the current direction of travel. Records whether a stop goes out.
    pub fn plan(&mut self, sample: &FeedbackSample, target: TargetPosition) -> MotionDecision {
        if round1(sample.azimuth_deg) == round1(target.azimuth_deg)
            && round1(sample.elevation_deg) == round1(target.elevation_deg)
        {
            return MotionDecision::OnTarget;
        }

        if !self.state.in_motion() {
            self.state.stop_already_sent = false;
            return MotionDecision::Set;
        }

        if self.state.stop_already_sent {
            return MotionDecision::AwaitStop;
        }

        let opposite = opposes(sample.azimuth_rate_deg_s, sample.azimuth_deg, target.azimuth_deg)
            || opposes(
                sample.elevation_rate_deg_s,
                sample.elevation_deg,
                target.elevation_deg,
            );
        if opposite {
            self.state.stop_already_sent = true;
            MotionDecision::StopFirst
        } else {
            MotionDecision::Redirect
        }
    }

    fn sample(&self, timestamp: DateTime<Utc>, azimuth_deg: f64, elevation_deg: f64) -> FeedbackSample {
        FeedbackSample {
            timestamp,
            azimuth_deg,
            elevation_deg,
            azimuth_rate_deg_s: self.azimuth_rate,
            elevation_rate_deg_s: self.elevation_rate,
        }
    }
}

fn opposes(rate: f64, current: f64, target: f64) -> bool {
    (rate < 0.0 && target > current) || (rate > 0.0 && target < current)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier)
        .num_microseconds()
        .map(|us| us as f64 / 1_000_000.0)
        .unwrap_or(0.0)
}
