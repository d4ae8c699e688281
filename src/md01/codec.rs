//! MD01 (Rot2Prog) binary frames.
//!
//! Every command is 13 bytes: start marker, four azimuth digits, azimuth
//! resolution, four elevation digits, elevation resolution, opcode and end
//! marker. Feedback frames use the same layout up to the elevation resolution.

use super::error::CodecError;
use super::types::{Feedback, Resolution, TargetPosition};

pub const FRAME_LEN: usize = 13;
pub const FEEDBACK_MIN_LEN: usize = 11;
pub const START_MARKER: u8 = 0x57;
pub const END_MARKER: u8 = 0x20;

pub const OPCODE_STOP: u8 = 0x0F;
pub const OPCODE_STATUS: u8 = 0x1F;
pub const OPCODE_SET: u8 = 0x2F;

const OPCODE_INDEX: usize = 11;
const AZ_DIGITS: std::ops::Range<usize> = 1..5;
const AZ_PPD_INDEX: usize = 5;
const EL_DIGITS: std::ops::Range<usize> = 6..10;
const EL_PPD_INDEX: usize = 10;

pub type Frame = [u8; FRAME_LEN];

fn command_frame(opcode: u8) -> Frame {
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = START_MARKER;
    frame[OPCODE_INDEX] = opcode;
    frame[FRAME_LEN - 1] = END_MARKER;
    frame
}

pub fn encode_stop() -> Frame {
    command_frame(OPCODE_STOP)
}

pub fn encode_status_query() -> Frame {
    command_frame(OPCODE_STATUS)
}

pub fn encode_set(target: TargetPosition, resolution: Resolution) -> Result<Frame, CodecError> {
    let target = target.clamped();
    let az = pulse_digits(target.azimuth_deg, resolution.azimuth_ppd)?;
    let el = pulse_digits(target.elevation_deg, resolution.elevation_ppd)?;

    let mut frame = command_frame(OPCODE_SET);
    frame[AZ_DIGITS].copy_from_slice(&az);
    frame[AZ_PPD_INDEX] = resolution.azimuth_ppd;
    frame[EL_DIGITS].copy_from_slice(&el);
    frame[EL_PPD_INDEX] = resolution.elevation_ppd;
    Ok(frame)
}

pub fn decode_feedback(frame: &[u8]) -> Result<Feedback, CodecError> {
    if frame.len() < FEEDBACK_MIN_LEN {
        return Err(CodecError::MalformedFrame(format!(
            "expected at least {} bytes, got {}",
            FEEDBACK_MIN_LEN,
            frame.len()
        )));
    }

    Ok(Feedback {
        azimuth_deg: decode_angle(&frame[AZ_DIGITS])?,
        elevation_deg: decode_angle(&frame[EL_DIGITS])?,
        resolution: Resolution {
            azimuth_ppd: frame[AZ_PPD_INDEX],
            elevation_ppd: frame[EL_PPD_INDEX],
        },
    })
}

fn pulse_digits(angle_deg: f64, ppd: u8) -> Result<[u8; 4], CodecError> {
    let pulses = ((angle_deg + 360.0) * f64::from(ppd)).round();
    if !(0.0..=9999.0).contains(&pulses) {
        return Err(CodecError::PulseOverflow { angle_deg, ppd });
    }

    let text = format!("{:04}", pulses as u16);
    let mut digits = [0u8; 4];
    digits.copy_from_slice(text.as_bytes());
    Ok(digits)
}

// The controller reports raw digit values, an echoed SET frame carries ASCII.
fn digit_value(byte: u8) -> Result<f64, CodecError> {
    match byte {
        0..=9 => Ok(f64::from(byte)),
        b'0'..=b'9' => Ok(f64::from(byte - b'0')),
        other => Err(CodecError::MalformedFrame(format!(
            "invalid digit byte {:#04x}",
            other
        ))),
    }
}

fn decode_angle(digits: &[u8]) -> Result<f64, CodecError> {
    let d1 = digit_value(digits[0])?;
    let d2 = digit_value(digits[1])?;
    let d3 = digit_value(digits[2])?;
    let d4 = digit_value(digits[3])?;
    Ok(d1 * 100.0 + d2 * 10.0 + d3 + d4 / 10.0 - 360.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feedback_frame(az_digits: [u8; 4], el_digits: [u8; 4]) -> Vec<u8> {
        let mut frame = vec![START_MARKER];
        frame.extend_from_slice(&az_digits);
        frame.push(10);
        frame.extend_from_slice(&el_digits);
        frame.push(10);
        frame.push(END_MARKER);
        frame
    }

    #[test]
    fn stop_and_status_frames() {
        assert_eq!(
            encode_stop(),
            [0x57, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x0F, 0x20]
        );
        assert_eq!(
            encode_status_query(),
            [0x57, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x1F, 0x20]
        );
    }

    #[test]
    fn set_frame_layout() {
        let frame = encode_set(TargetPosition::new(10.0, 20.0), Resolution::default()).unwrap();
        assert_eq!(frame[0], START_MARKER);
        assert_eq!(&frame[1..5], b"3700");
        assert_eq!(frame[5], 10);
        assert_eq!(&frame[6..10], b"3800");
        assert_eq!(frame[10], 10);
        assert_eq!(frame[11], OPCODE_SET);
        assert_eq!(frame[12], END_MARKER);
    }

    #[test]
    fn set_frame_clamps_target() {
        let frame = encode_set(TargetPosition::new(600.0, -5.0), Resolution::default()).unwrap();
        assert_eq!(&frame[1..5], b"9000");
        assert_eq!(&frame[6..10], b"3600");

        let frame = encode_set(TargetPosition::new(-200.0, 190.0), Resolution::default()).unwrap();
        assert_eq!(&frame[1..5], b"1800");
        assert_eq!(&frame[6..10], b"5400");
    }

    #[test]
    fn set_frame_rounds_pulses() {
        let frame = encode_set(TargetPosition::new(0.06, 0.04), Resolution::default()).unwrap();
        assert_eq!(&frame[1..5], b"3601");
        assert_eq!(&frame[6..10], b"3600");
    }

    #[test]
    fn set_frame_uses_reported_resolution() {
        let resolution = Resolution {
            azimuth_ppd: 2,
            elevation_ppd: 1,
        };
        let frame = encode_set(TargetPosition::new(90.0, 45.0), resolution).unwrap();
        assert_eq!(&frame[1..5], b"0900");
        assert_eq!(frame[5], 2);
        assert_eq!(&frame[6..10], b"0405");
        assert_eq!(frame[10], 1);
    }

    #[test]
    fn set_frame_rejects_oversized_pulse_count() {
        let resolution = Resolution {
            azimuth_ppd: 20,
            elevation_ppd: 10,
        };
        let err = encode_set(TargetPosition::new(540.0, 0.0), resolution).unwrap_err();
        assert!(matches!(err, CodecError::PulseOverflow { ppd: 20, .. }));
    }

    #[test]
    fn decodes_raw_digit_feedback() {
        let frame = feedback_frame([3, 7, 2, 5], [3, 9, 0, 0]);
        let feedback = decode_feedback(&frame).unwrap();
        assert!((feedback.azimuth_deg - 12.5).abs() < 1e-9);
        assert!((feedback.elevation_deg - 30.0).abs() < 1e-9);
        assert_eq!(feedback.resolution, Resolution::default());
    }

    #[test]
    fn decodes_ascii_digit_feedback() {
        let frame = feedback_frame(*b"3600", *b"3600");
        let feedback = decode_feedback(&frame).unwrap();
        assert_eq!(feedback.azimuth_deg, 0.0);
        assert_eq!(feedback.elevation_deg, 0.0);
    }

    #[test]
    fn decode_is_pure() {
        let frame = feedback_frame([1, 8, 0, 0], [3, 6, 0, 5]);
        let first = decode_feedback(&frame).unwrap();
        let second = decode_feedback(&frame).unwrap();
        assert_eq!(first, second);
        assert!((first.azimuth_deg + 180.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_short_frame() {
        let err = decode_feedback(&[START_MARKER, 3, 6, 0, 0, 10]).unwrap_err();
        assert!(matches!(err, CodecError::MalformedFrame(_)));
    }

    #[test]
    fn rejects_non_digit_bytes() {
        let frame = feedback_frame([3, b'A', 0, 0], [3, 6, 0, 0]);
        assert!(matches!(
            decode_feedback(&frame),
            Err(CodecError::MalformedFrame(_))
        ));
    }

    #[test]
    fn echoed_set_frame_round_trips_within_resolution() {
        let mut az = -180.0;
        while az <= 540.0 {
            let mut el = 0.0;
            while el <= 180.0 {
                let frame =
                    encode_set(TargetPosition::new(az, el), Resolution::default()).unwrap();
                let feedback = decode_feedback(&frame).unwrap();
                assert!((feedback.azimuth_deg - az).abs() <= 0.1 + 1e-9, "az {}", az);
                assert!((feedback.elevation_deg - el).abs() <= 0.1 + 1e-9, "el {}", el);
                el += 7.37;
            }
            az += 13.13;
        }
    }
}
