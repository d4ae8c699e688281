use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::md01::FeedbackSample;
use crate::service::CommandFrame;

const FEEDBACK_HEADER: &str =
    "Timestamp [UTC],Azimuth [deg],Elevation [deg],Azimuth Rate [deg/sec],Elevation Rate [deg/sec]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionEnd {
    ClientStop,
    ClientDisconnected,
    DeviceDisconnected,
    Timeout,
    Fault,
    Shutdown,
}

/// Per-session artifacts: a feedback CSV, a command log and a YAML summary.
pub struct SessionLog {
    dir: PathBuf,
    feedback: File,
    commands: File,
    record: SessionRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: String,
    pub ssid: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub samples: u64,
    pub commands: u64,
    pub end_reason: Option<SessionEnd>,
}

impl SessionLog {
    pub fn start(log_dir: &Path, ssid: &str, session_id: &str, user_id: &str) -> io::Result<Self> {
        let started_at = Utc::now();
        let dir = log_dir.join("sessions").join(format!(
            "{}_{}",
            started_at.format("%Y%m%dT%H%M%SZ"),
            session_id
        ));
        fs::create_dir_all(&dir)?;

        let mut feedback = File::create(dir.join("feedback.csv"))?;
        writeln!(feedback, "{}", FEEDBACK_HEADER)?;
        let commands = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("commands.log"))?;

        let log = Self {
            dir,
            feedback,
            commands,
            record: SessionRecord {
                session_id: session_id.to_string(),
                user_id: user_id.to_string(),
                ssid: ssid.to_string(),
                started_at,
                stopped_at: None,
                samples: 0,
                commands: 0,
                end_reason: None,
            },
        };
        log.save()?;
        log::info!("Started Logging: {}", log.dir.display());
        Ok(log)
    }

    pub fn record(&mut self, sample: &FeedbackSample) -> io::Result<()> {
        writeln!(
            self.feedback,
            "{},{:3.1},{:3.1},{:1.3},{:1.3}",
            sample.timestamp.format("%Y-%m-%dT%H:%M:%S%.6fZ"),
            sample.azimuth_deg,
            sample.elevation_deg,
            sample.azimuth_rate_deg_s,
            sample.elevation_rate_deg_s
        )?;
        self.record.samples += 1;
        Ok(())
    }

    pub fn command(&mut self, frame: &CommandFrame) -> io::Result<()> {
        writeln!(
            self.commands,
            "{} | {}",
            Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ"),
            frame
        )?;
        self.record.commands += 1;
        Ok(())
    }

    pub fn stop(mut self, reason: SessionEnd) -> io::Result<SessionRecord> {
        self.feedback.flush()?;
        self.commands.flush()?;
        self.record.stopped_at = Some(Utc::now());
        self.record.end_reason = Some(reason);
        self.save()?;
        log::info!("Stopped Logging: {} ({})", self.dir.display(), reason);
        Ok(self.record)
    }

    #[allow(dead_code)]
    pub fn session_id(&self) -> &str {
        &self.record.session_id
    }

    #[allow(dead_code)]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn save(&self) -> io::Result<()> {
        fs::write(
            self.dir.join("session.yaml"),
            serde_yaml::to_string(&self.record)
                .map_err(|e| io::Error::other(format!("Failed to serialize session: {}", e)))?,
        )
    }
}
