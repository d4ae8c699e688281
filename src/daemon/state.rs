use serde::Serialize;
use strum_macros::Display;

/// Top-level daemon state. Owned and mutated only by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum DaemonState {
    Boot,
    Idle,
    Standby,
    Active,
    /// Reserved; nothing enters it yet.
    Calibrate,
    Fault,
}

impl DaemonState {
    /// Numeric state code used in status displays.
    pub fn code(self) -> u8 {
        match self {
            DaemonState::Boot => 0x00,
            DaemonState::Idle => 0x01,
            DaemonState::Standby => 0x02,
            DaemonState::Active => 0x04,
            DaemonState::Calibrate => 0x08,
            DaemonState::Fault => 0x80,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_and_codes() {
        assert_eq!(DaemonState::Standby.to_string(), "STANDBY");
        assert_eq!(DaemonState::Fault.to_string(), "FAULT");
        assert_eq!(DaemonState::Active.code(), 0x04);
        assert_eq!(DaemonState::Fault.code(), 0x80);
    }
}
