use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Instant, MissedTickBehavior};
use uuid::Uuid;

use super::error::DaemonError;
use super::session::{SessionEnd, SessionLog};
use super::state::DaemonState;
use crate::config::Config;
use crate::md01::{DeviceEvent, DevicePoller, FeedbackSample};
use crate::service::{
    ClientCommand, CommandFrame, Feedback, ManagementCommand, MotionCommand, ServiceEvent,
    ServiceHandle, ServiceLink,
};

/// Channel ends handed to the service link at boot.
struct ServiceChannels {
    commands: mpsc::Sender<ClientCommand>,
    feedback: mpsc::Receiver<Feedback>,
    events: mpsc::UnboundedSender<ServiceEvent>,
}

struct Session {
    id: String,
    user_id: String,
    log: Option<SessionLog>,
    deadline: Option<Instant>,
}

/// Owns the daemon state machine. The poller and service link only talk to
/// it through channels, which it drains once per tick.
pub struct DaemonController {
    config: Arc<Config>,
    state: DaemonState,
    client: Option<u64>,
    device_connected: bool,
    poller: DevicePoller,
    device_events: mpsc::UnboundedReceiver<DeviceEvent>,
    service_events: mpsc::UnboundedReceiver<ServiceEvent>,
    commands: mpsc::Receiver<ClientCommand>,
    feedback: mpsc::Sender<Feedback>,
    service_channels: Option<ServiceChannels>,
    service: Option<ServiceHandle>,
    service_addr: Option<SocketAddr>,
    session: Option<Session>,
}

impl DaemonController {
    pub fn new(config: Arc<Config>) -> Self {
        let (device_tx, device_events) = mpsc::unbounded_channel();
        let (service_tx, service_events) = mpsc::unbounded_channel();
        let (command_tx, commands) = mpsc::channel(config.service.queue_capacity);
        let (feedback, feedback_rx) = mpsc::channel(config.service.queue_capacity);

        let poller = DevicePoller::new(config.ssid.clone(), config.device.clone(), device_tx);

        Self {
            config,
            state: DaemonState::Boot,
            client: None,
            device_connected: false,
            poller,
            device_events,
            service_events,
            commands,
            feedback,
            service_channels: Some(ServiceChannels {
                commands: command_tx,
                feedback: feedback_rx,
                events: service_tx,
            }),
            service: None,
            service_addr: None,
            session: None,
        }
    }

    pub fn state(&self) -> DaemonState {
        self.state
    }

    #[allow(dead_code)]
    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }

    pub fn service_addr(&self) -> Option<SocketAddr> {
        self.service_addr
    }

    /// Starts the service link and the device poller. IDLE on success, FAULT otherwise.
    pub async fn boot(&mut self) -> DaemonState {
        if self.state != DaemonState::Boot {
            return self.state;
        }
        log::info!("Daemon State: {}", self.state);

        match self.spawn_tasks().await {
            Ok(()) => {
                log::info!("Successfully launched service link and MD01 poller, switching to IDLE");
                self.set_state(DaemonState::Idle);
            }
            Err(e) => {
                log::error!("Failed to launch daemon tasks: {}", e);
                self.set_state(DaemonState::Fault);
            }
        }
        self.state
    }

    async fn spawn_tasks(&mut self) -> Result<(), DaemonError> {
        let Some(channels) = self.service_channels.take() else {
            return Ok(());
        };
        let link = ServiceLink::bind(
            self.config.ssid.clone(),
            self.config.service.clone(),
            channels.commands,
            channels.feedback,
            channels.events,
        )
        .await?;
        self.service_addr = link.local_addr().ok();
        self.poller.start()?;
        self.service = Some(link.spawn());
        Ok(())
    }

    /// One controller cycle: drain notifications (reconciling on every
    /// connectivity edge), apply at most one command from the current client,
    /// then check the session deadline.
    pub fn tick(&mut self, now: Instant) {
        while let Ok(event) = self.device_events.try_recv() {
            self.on_device_event(event);
        }
        while let Ok(event) = self.service_events.try_recv() {
            self.on_service_event(event);
        }

        self.reconcile();

        while let Ok(command) = self.commands.try_recv() {
            if self.client != Some(command.connection) {
                log::debug!(
                    "Dropping command from closed connection #{}: {}",
                    command.connection,
                    command.frame
                );
                continue;
            }
            self.apply_command(command.frame, now);
            break;
        }

        self.check_session_deadline(now);
    }

    /// Ticks until `shutdown` fires. Returns the final state.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) -> DaemonState {
        self.boot().await;
        if self.state == DaemonState::Fault && self.service.is_none() {
            self.shutdown().await;
            return self.state;
        }

        let mut ticker = interval(self.config.daemon.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                now = ticker.tick() => self.tick(now),
            }
        }

        self.shutdown().await;
        self.state
    }

    pub async fn shutdown(&mut self) {
        log::info!("Shutting down {} daemon in state {}", self.config.ssid, self.state);
        if let Some(service) = self.service.take() {
            service.stop().await;
        }
        self.end_session(SessionEnd::Shutdown);
        self.poller.stop().await;
    }

    fn on_device_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::Connected => self.set_device_connected(true),
            DeviceEvent::Disconnected => self.set_device_connected(false),
            DeviceEvent::Sample(sample) => self.record_sample(&sample),
            DeviceEvent::Fault(fault) => {
                log::error!("MD01 threshold fault: {}", fault);
                self.device_connected = false;
                self.end_session(SessionEnd::Fault);
                self.set_state(DaemonState::Fault);
            }
        }
    }

    fn on_service_event(&mut self, event: ServiceEvent) {
        match event {
            ServiceEvent::ClientConnected { addr, connection } => {
                log::info!("User connected from {} (#{})", addr, connection);
                if self.client.is_some() {
                    // The previous client's disconnect never arrived.
                    self.set_client(None);
                }
                self.set_client(Some(connection));
            }
            ServiceEvent::ClientDisconnected {
                addr,
                connection,
                reason,
            } => {
                log::info!("User at {} disconnected ({})", addr, reason);
                if self.client == Some(connection) {
                    self.set_client(None);
                }
            }
        }
    }

    fn client_connected(&self) -> bool {
        self.client.is_some()
    }

    fn set_device_connected(&mut self, connected: bool) {
        if self.device_connected != connected {
            self.device_connected = connected;
            self.log_connection_status();
            self.reconcile();
        }
    }

    fn set_client(&mut self, client: Option<u64>) {
        if self.client != client {
            self.client = client;
            self.log_connection_status();
            self.reconcile();
        }
    }

    /// IDLE/STANDBY follow the conjunction of client and device connectivity.
    fn reconcile(&mut self) {
        if matches!(self.state, DaemonState::Boot | DaemonState::Fault) {
            return;
        }

        if self.client_connected() && self.device_connected {
            if self.state == DaemonState::Idle {
                self.set_state(DaemonState::Standby);
            }
            return;
        }

        if !matches!(self.state, DaemonState::Standby | DaemonState::Active) {
            return;
        }

        let reason = if self.client_connected() {
            SessionEnd::DeviceDisconnected
        } else {
            SessionEnd::ClientDisconnected
        };
        if self.state == DaemonState::Active || !self.client_connected() {
            self.poller.set_stop();
        }
        self.end_session(reason);
        self.set_state(DaemonState::Idle);
    }

    /// Commands are written to the session open once they have taken effect.
    /// A START opens the log it lands in; the STOP that closes a session is
    /// kept as its end reason instead.
    fn apply_command(&mut self, frame: CommandFrame, now: Instant) {
        match &frame {
            CommandFrame::Management { command, .. } => {
                self.apply_management(&frame, *command, now)
            }
            CommandFrame::Motion { command, .. } => self.apply_motion(&frame, *command, now),
        }
        self.log_command(&frame);
    }

    fn apply_management(&mut self, frame: &CommandFrame, command: ManagementCommand, now: Instant) {
        let user_id = frame.user_id();
        log::info!("User '{}' requested session {}", user_id, command);

        match (self.state, command) {
            (DaemonState::Boot, _) => return,
            (DaemonState::Fault, ManagementCommand::Query) => {}
            (DaemonState::Fault, _) => {
                log::warn!("Ignoring {} from '{}': daemon is in FAULT", command, user_id);
                return;
            }
            (DaemonState::Standby, ManagementCommand::Start) => {
                self.start_session(user_id, now);
                self.set_state(DaemonState::Active);
            }
            (DaemonState::Active, ManagementCommand::Stop) => {
                self.poller.set_stop();
                self.end_session(SessionEnd::ClientStop);
                self.set_state(DaemonState::Standby);
            }
            (_, ManagementCommand::Query) => {}
            (state, command) => {
                log::info!("{} has no effect in state {}", command, state);
            }
        }

        self.send_feedback(Feedback::Management {
            user_id: user_id.to_string(),
            ssid: frame.ssid().to_string(),
            state: self.state,
        });
    }

    fn apply_motion(&mut self, frame: &CommandFrame, command: MotionCommand, now: Instant) {
        let user_id = frame.user_id();
        if self.state != DaemonState::Active {
            log::info!(
                "Ignoring MOTION {} from '{}' in state {}",
                command.name(),
                user_id,
                self.state
            );
            return;
        }

        match command {
            MotionCommand::Set {
                azimuth_deg,
                elevation_deg,
            } => {
                log::info!(
                    "User '{}' requested MOTION SET: AZ={:3.1}, EL={:3.1}",
                    user_id,
                    azimuth_deg,
                    elevation_deg
                );
                self.poller.set_target(azimuth_deg, elevation_deg);
                self.reset_session_deadline(now);
            }
            MotionCommand::Stop => {
                log::info!("User '{}' requested MOTION STOP", user_id);
                self.poller.set_stop();
                self.reset_session_deadline(now);
            }
            MotionCommand::Get => {
                log::debug!("User '{}' requested MOTION GET", user_id);
            }
        }

        match self.poller.feedback() {
            Some(sample) => self.send_feedback(Feedback::Motion {
                user_id: user_id.to_string(),
                ssid: frame.ssid().to_string(),
                sample,
            }),
            None => log::warn!("No MD01 feedback yet, skipping motion feedback to '{}'", user_id),
        }
    }

    fn start_session(&mut self, user_id: &str, now: Instant) {
        let id = Uuid::new_v4().to_string();
        let log = match self.open_session_log(&id, user_id) {
            Ok(log) => log,
            Err(e) => {
                log::warn!("Session {} continues without a log: {}", id, e);
                None
            }
        };
        let deadline = self.config.daemon.session_timeout.map(|t| now + t);
        if let Some(timeout) = self.config.daemon.session_timeout {
            log::info!("Started ACTIVE session watchdog: {:?}", timeout);
        }
        log::info!("Session {} started for user '{}'", id, user_id);

        self.session = Some(Session {
            id,
            user_id: user_id.to_string(),
            log,
            deadline,
        });
    }

    fn open_session_log(&self, id: &str, user_id: &str) -> Result<Option<SessionLog>, DaemonError> {
        match self.config.session_dir() {
            Some(dir) => Ok(Some(SessionLog::start(dir, &self.config.ssid, id, user_id)?)),
            None => Ok(None),
        }
    }

    fn end_session(&mut self, reason: SessionEnd) {
        let Some(session) = self.session.take() else {
            return;
        };
        log::info!("Session {} for user '{}' ended: {}", session.id, session.user_id, reason);
        if let Some(log) = session.log {
            match log.stop(reason) {
                Ok(record) => log::info!(
                    "Session {} logged {} samples, {} commands",
                    record.session_id,
                    record.samples,
                    record.commands
                ),
                Err(e) => log::warn!("Failed to finalise session log: {}", e),
            }
        }
    }

    fn log_command(&mut self, frame: &CommandFrame) {
        if let Some(log) = self.session.as_mut().and_then(|s| s.log.as_mut()) {
            if let Err(e) = log.command(frame) {
                log::warn!("Failed to write session command log: {}", e);
            }
        }
    }

    fn reset_session_deadline(&mut self, now: Instant) {
        let timeout = self.config.daemon.session_timeout;
        if let (Some(session), Some(timeout)) = (self.session.as_mut(), timeout) {
            session.deadline = Some(now + timeout);
        }
    }

    fn check_session_deadline(&mut self, now: Instant) {
        if self.state != DaemonState::Active {
            return;
        }
        let expired = self
            .session
            .as_ref()
            .and_then(|s| s.deadline)
            .is_some_and(|deadline| now >= deadline);
        if !expired {
            return;
        }

        let user_id = self
            .session
            .as_ref()
            .map(|s| s.user_id.clone())
            .unwrap_or_default();
        log::info!(
            "ACTIVE session timeout ({:?}), User '{}', switching to STANDBY",
            self.config.daemon.session_timeout.unwrap_or_default(),
            user_id
        );
        self.poller.set_stop();
        self.end_session(SessionEnd::Timeout);
        self.set_state(DaemonState::Standby);
    }

    fn record_sample(&mut self, sample: &FeedbackSample) {
        if self.state != DaemonState::Active {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Some(log) = session.log.as_mut() {
            if let Err(e) = log.record(sample) {
                log::warn!("Failed to write session feedback, disabling session log: {}", e);
                session.log = None;
            }
        }
    }

    fn send_feedback(&self, feedback: Feedback) {
        match self.feedback.try_send(feedback) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::warn!("Feedback queue full, dropping message")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                log::debug!("Service link gone, dropping feedback")
            }
        }
    }

    fn set_state(&mut self, state: DaemonState) {
        if self.state == state {
            return;
        }
        self.state = state;
        self.log_connection_status();
        log::info!("Daemon State: {} (0x{:02X})", self.state, self.state.code());
    }

    fn log_connection_status(&self) {
        log::info!(
            "Connection Status (USER/MD01): {}/{}",
            self.client_connected(),
            self.device_connected
        );
    }
}
