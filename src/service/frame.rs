//! Line protocol spoken with the client.
//!
//! Inbound: `uid,ssid,type,command[,az,el]` where type is `MGMT` or `MOT`.
//! Outbound: management feedback `uid,ssid,MGMT,<STATE>`, motion feedback
//! `uid,ssid,MOT,STATE,<az>,<el>,<az_rate>,<el_rate>`, and optionally
//! `INVALID,<line>` for rejected input.

use std::fmt;

use strum_macros::Display;

use super::error::FrameError;
use crate::daemon::DaemonState;
use crate::md01::FeedbackSample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum FrameType {
    Mgmt,
    Mot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum ManagementCommand {
    Start,
    Stop,
    Query,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionCommand {
    Set {
        azimuth_deg: f64,
        elevation_deg: f64,
    },
    Get,
    Stop,
}

impl MotionCommand {
    pub fn name(&self) -> &'static str {
        match self {
            MotionCommand::Set { .. } => "SET",
            MotionCommand::Get => "GET",
            MotionCommand::Stop => "STOP",
        }
    }
}

/// A validated client command. The SSID is stored upper-cased.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandFrame {
    Management {
        user_id: String,
        ssid: String,
        command: ManagementCommand,
    },
    Motion {
        user_id: String,
        ssid: String,
        command: MotionCommand,
    },
}

impl CommandFrame {
    pub fn user_id(&self) -> &str {
        match self {
            CommandFrame::Management { user_id, .. } | CommandFrame::Motion { user_id, .. } => {
                user_id
            }
        }
    }

    pub fn ssid(&self) -> &str {
        match self {
            CommandFrame::Management { ssid, .. } | CommandFrame::Motion { ssid, .. } => ssid,
        }
    }

    pub fn frame_type(&self) -> FrameType {
        match self {
            CommandFrame::Management { .. } => FrameType::Mgmt,
            CommandFrame::Motion { .. } => FrameType::Mot,
        }
    }
}

impl fmt::Display for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandFrame::Management {
                user_id,
                ssid,
                command,
            } => write!(f, "{},{},{},{}", user_id, ssid, self.frame_type(), command),
            CommandFrame::Motion {
                user_id,
                ssid,
                command:
                    MotionCommand::Set {
                        azimuth_deg,
                        elevation_deg,
                    },
            } => write!(
                f,
                "{},{},MOT,SET,{:.1},{:.1}",
                user_id, ssid, azimuth_deg, elevation_deg
            ),
            CommandFrame::Motion {
                user_id,
                ssid,
                command,
            } => write!(f, "{},{},{},{}", user_id, ssid, self.frame_type(), command.name()),
        }
    }
}

/// Validates one line from the client. Fields are trimmed; SSID, type and
/// command are case-insensitive. Fields past the ones a command needs are ignored.
pub fn parse_frame(line: &str, expected_ssid: &str) -> Result<CommandFrame, FrameError> {
    let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();
    if fields.len() < 4 {
        return Err(FrameError::FieldCount(fields.len()));
    }

    let user_id = fields[0].to_string();
    let ssid = fields[1].to_uppercase();
    if ssid != expected_ssid.trim().to_uppercase() {
        return Err(FrameError::Ssid {
            expected: expected_ssid.to_uppercase(),
            got: ssid,
        });
    }

    let command = fields[3].to_uppercase();
    match fields[2].to_uppercase().as_str() {
        "MGMT" => {
            let command = match command.as_str() {
                "START" => ManagementCommand::Start,
                "STOP" => ManagementCommand::Stop,
                "QUERY" => ManagementCommand::Query,
                _ => return Err(FrameError::ManagementCommand(command)),
            };
            Ok(CommandFrame::Management {
                user_id,
                ssid,
                command,
            })
        }
        "MOT" => {
            let command = match command.as_str() {
                "SET" => {
                    if fields.len() < 6 {
                        return Err(FrameError::SetFieldCount(fields.len()));
                    }
                    MotionCommand::Set {
                        azimuth_deg: parse_angle("azimuth", fields[4])?,
                        elevation_deg: parse_angle("elevation", fields[5])?,
                    }
                }
                "GET" => MotionCommand::Get,
                "STOP" => MotionCommand::Stop,
                _ => return Err(FrameError::MotionCommand(command)),
            };
            Ok(CommandFrame::Motion {
                user_id,
                ssid,
                command,
            })
        }
        other => Err(FrameError::FrameType(other.to_string())),
    }
}

fn parse_angle(axis: &'static str, value: &str) -> Result<f64, FrameError> {
    match value.parse::<f64>() {
        Ok(angle) if angle.is_finite() => Ok(angle),
        _ => Err(FrameError::Angle {
            axis,
            value: value.to_string(),
        }),
    }
}

/// Messages queued for the connected client.
#[derive(Debug, Clone, PartialEq)]
pub enum Feedback {
    Management {
        user_id: String,
        ssid: String,
        state: DaemonState,
    },
    Motion {
        user_id: String,
        ssid: String,
        sample: FeedbackSample,
    },
    Invalid {
        line: String,
    },
}

impl Feedback {
    /// Wire form, newline terminated.
    pub fn to_line(&self) -> String {
        match self {
            Feedback::Management {
                user_id,
                ssid,
                state,
            } => format!("{},{},{},{}\n", user_id, ssid, FrameType::Mgmt, state),
            Feedback::Motion {
                user_id,
                ssid,
                sample,
            } => format!(
                "{},{},{},STATE,{:3.1},{:3.1},{:1.3},{:1.3}\n",
                user_id,
                ssid,
                FrameType::Mot,
                sample.azimuth_deg,
                sample.elevation_deg,
                sample.azimuth_rate_deg_s,
                sample.elevation_rate_deg_s
            ),
            Feedback::Invalid { line } => format!("INVALID,{}\n", line.trim_end()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn parses_management_frames() {
        let frame = parse_frame("zleffke, vul, mgmt, start\n", "VUL").unwrap();
        assert_eq!(
            frame,
            CommandFrame::Management {
                user_id: "zleffke".into(),
                ssid: "VUL".into(),
                command: ManagementCommand::Start,
            }
        );
        assert_eq!(frame.frame_type(), FrameType::Mgmt);
        assert_eq!(frame.to_string(), "zleffke,VUL,MGMT,START");

        let frame = parse_frame("ops,VUL,MGMT,QUERY", "vul").unwrap();
        assert!(matches!(
            frame,
            CommandFrame::Management {
                command: ManagementCommand::Query,
                ..
            }
        ));
    }

    #[test]
    fn parses_motion_frames() {
        let frame = parse_frame("ops,VUL,MOT,SET,10.0,20.5", "VUL").unwrap();
        assert_eq!(
            frame,
            CommandFrame::Motion {
                user_id: "ops".into(),
                ssid: "VUL".into(),
                command: MotionCommand::Set {
                    azimuth_deg: 10.0,
                    elevation_deg: 20.5
                },
            }
        );
        assert_eq!(frame.to_string(), "ops,VUL,MOT,SET,10.0,20.5");

        let frame = parse_frame("ops,VUL,MOT,get", "VUL").unwrap();
        assert_eq!(frame.to_string(), "ops,VUL,MOT,GET");
        assert_eq!(frame.user_id(), "ops");
        assert_eq!(frame.ssid(), "VUL");
    }

    #[test]
    fn rejects_malformed_frames() {
        assert_eq!(
            parse_frame("ops,VUL,MGMT", "VUL"),
            Err(FrameError::FieldCount(3))
        );
        assert!(matches!(
            parse_frame("ops,XYZ,MGMT,START", "VUL"),
            Err(FrameError::Ssid { .. })
        ));
        assert_eq!(
            parse_frame("ops,VUL,CAL,START", "VUL"),
            Err(FrameError::FrameType("CAL".into()))
        );
        assert_eq!(
            parse_frame("ops,VUL,MGMT,RESET", "VUL"),
            Err(FrameError::ManagementCommand("RESET".into()))
        );
        assert_eq!(
            parse_frame("ops,VUL,MOT,SPIN", "VUL"),
            Err(FrameError::MotionCommand("SPIN".into()))
        );
        assert_eq!(
            parse_frame("ops,VUL,MOT,SET,10.0", "VUL"),
            Err(FrameError::SetFieldCount(5))
        );
        assert!(matches!(
            parse_frame("ops,VUL,MOT,SET,north,20", "VUL"),
            Err(FrameError::Angle {
                axis: "azimuth",
                ..
            })
        ));
        assert!(matches!(
            parse_frame("ops,VUL,MOT,SET,10,NaN", "VUL"),
            Err(FrameError::Angle {
                axis: "elevation",
                ..
            })
        ));
    }

    #[test]
    fn formats_feedback_lines() {
        let management = Feedback::Management {
            user_id: "ops".into(),
            ssid: "VUL".into(),
            state: DaemonState::Standby,
        };
        assert_eq!(management.to_line(), "ops,VUL,MGMT,STANDBY\n");

        let motion = Feedback::Motion {
            user_id: "ops".into(),
            ssid: "VUL".into(),
            sample: FeedbackSample {
                timestamp: Utc::now(),
                azimuth_deg: 123.456,
                elevation_deg: 7.0,
                azimuth_rate_deg_s: -1.5,
                elevation_rate_deg_s: 0.0,
            },
        };
        assert_eq!(
            motion.to_line(),
            "ops,VUL,MOT,STATE,123.5,7.0,-1.500,0.000\n"
        );

        let invalid = Feedback::Invalid {
            line: "garbage\r\n".into(),
        };
        assert_eq!(invalid.to_line(), "INVALID,garbage\n");
    }
}
