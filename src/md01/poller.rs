use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::error::PollerError;
use super::link::DeviceLink;
use super::motion::{MotionDecision, MotionTracker};
use super::types::{FeedbackSample, TargetPosition};
use crate::config::DeviceConfig;
use crate::fault::ThresholdFault;

/// Pause after a successful connect before the first regular poll.
const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Notifications from the poll loop to the daemon.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Connected,
    Disconnected,
    Sample(FeedbackSample),
    Fault(ThresholdFault),
}

#[derive(Debug)]
struct Shared {
    target: TargetPosition,
    set_pending: bool,
    stop_requested: bool,
    feedback: Option<FeedbackSample>,
}

#[derive(Debug)]
struct WorkerHandle {
    stop_tx: oneshot::Sender<()>,
    join: JoinHandle<Result<(), ThresholdFault>>,
}

/// Owns the MD01 poll loop. The daemon drives it through `set_target` and
/// `set_stop`; the loop reports back through [`DeviceEvent`]s.
pub struct DevicePoller {
    ssid: String,
    config: DeviceConfig,
    events: mpsc::UnboundedSender<DeviceEvent>,
    shared: Arc<StdMutex<Shared>>,
    worker: Option<WorkerHandle>,
}

impl DevicePoller {
    pub fn new(
        ssid: String,
        config: DeviceConfig,
        events: mpsc::UnboundedSender<DeviceEvent>,
    ) -> Self {
        Self {
            ssid,
            config,
            events,
            shared: Arc::new(StdMutex::new(Shared {
                target: TargetPosition::default(),
                set_pending: false,
                stop_requested: false,
                feedback: None,
            })),
            worker: None,
        }
    }

    pub fn start(&mut self) -> Result<(), PollerError> {
        if self.worker.is_some() {
            return Err(PollerError::AlreadyRunning);
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let join = tokio::spawn(run_poller_loop(
            self.ssid.clone(),
            self.config.clone(),
            self.shared.clone(),
            self.events.clone(),
            stop_rx,
        ));
        self.worker = Some(WorkerHandle { stop_tx, join });
        Ok(())
    }

    /// Stops the loop, which halts the antenna and closes the link on its way out.
    pub async fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            match worker.join.await {
                Ok(Ok(())) => log::info!("{} MD01 poller stopped", self.ssid),
                Ok(Err(fault)) => log::warn!("{} MD01 poller ended on fault: {}", self.ssid, fault),
                Err(e) => log::error!("{} MD01 poller task failed: {}", self.ssid, e),
            }
        }
    }

    /// Requests a move; the SET goes out on the next poll cycle.
    pub fn set_target(&self, azimuth_deg: f64, elevation_deg: f64) {
        let mut locked = self.shared.lock().unwrap();
        locked.target = TargetPosition::new(azimuth_deg, elevation_deg);
        locked.set_pending = true;
    }

    /// Holds the antenna where it is: the target becomes the last known
    /// position, any pending SET is dropped and a STOP goes out next cycle.
    pub fn set_stop(&self) {
        let mut locked = self.shared.lock().unwrap();
        if let Some(sample) = locked.feedback {
            locked.target = TargetPosition::new(sample.azimuth_deg, sample.elevation_deg);
        }
        locked.set_pending = false;
        locked.stop_requested = true;
    }

    pub fn target(&self) -> TargetPosition {
        self.shared.lock().unwrap().target
    }

    pub fn is_set_pending(&self) -> bool {
        self.shared.lock().unwrap().set_pending
    }

    /// Latest sample from the current device session.
    pub fn feedback(&self) -> Option<FeedbackSample> {
        self.shared.lock().unwrap().feedback
    }

    #[cfg(test)]
    pub(crate) fn is_stop_requested(&self) -> bool {
        self.shared.lock().unwrap().stop_requested
    }
}

async fn run_poller_loop(
    ssid: String,
    config: DeviceConfig,
    shared: Arc<StdMutex<Shared>>,
    events: mpsc::UnboundedSender<DeviceEvent>,
    mut stop_rx: oneshot::Receiver<()>,
) -> Result<(), ThresholdFault> {
    log::info!("{} MD01 poller started for {}", ssid, config.addr());
    log::info!("Azimuth Threshold: {:3.3}", config.az_thresh);
    log::info!("Elevation Threshold: {:3.3}", config.el_thresh);
    log::info!("MD-01 Poll Rate: {:?}", config.poll_rate);

    let mut link = DeviceLink::new(&config);
    let mut motion = MotionTracker::new(config.az_thresh, config.el_thresh);

    loop {
        let delay = if link.is_connected() {
            poll_cycle(&ssid, &mut link, &mut motion, &shared, &events).await?;
            config.poll_rate
        } else if connect_and_seed(&ssid, &mut link, &mut motion, &shared, &events).await {
            SETTLE_DELAY
        } else {
            config.reconnect_backoff()
        };

        if pause(&mut stop_rx, delay).await {
            break;
        }
    }

    if link.is_connected() {
        link.send_stop().await;
        link.disconnect().await;
        mark_disconnected(&shared, &events);
    }
    Ok(())
}

async fn pause(stop_rx: &mut oneshot::Receiver<()>, duration: Duration) -> bool {
    tokio::select! {
        _ = sleep(duration) => false,
        _ = &mut *stop_rx => true,
    }
}

async fn connect_and_seed(
    ssid: &str,
    link: &mut DeviceLink,
    motion: &mut MotionTracker,
    shared: &Arc<StdMutex<Shared>>,
    events: &mpsc::UnboundedSender<DeviceEvent>,
) -> bool {
    if let Err(e) = link.connect().await {
        log::debug!("{} MD01 connect failed: {}", ssid, e);
        return false;
    }

    let status = link.query_status().await;
    let Some((timestamp, azimuth_deg, elevation_deg)) = status.reading() else {
        log::warn!("Connected to {} MD01 Controller but got no initial reading", ssid);
        return false;
    };

    log::info!("Connected to {} MD01 Controller", ssid);
    let sample = motion.seed(timestamp, azimuth_deg, elevation_deg);
    {
        let mut locked = shared.lock().unwrap();
        locked.feedback = Some(sample);
        locked.set_pending = false;
        locked.stop_requested = false;
    }
    let _ = events.send(DeviceEvent::Connected);
    let _ = events.send(DeviceEvent::Sample(sample));
    true
}

async fn poll_cycle(
    ssid: &str,
    link: &mut DeviceLink,
    motion: &mut MotionTracker,
    shared: &Arc<StdMutex<Shared>>,
    events: &mpsc::UnboundedSender<DeviceEvent>,
) -> Result<(), ThresholdFault> {
    let stop_requested = std::mem::take(&mut shared.lock().unwrap().stop_requested);
    if stop_requested && !link.send_stop().await.connected {
        log::info!("Disconnected from {} MD01 Controller", ssid);
        mark_disconnected(shared, events);
        return Ok(());
    }

    let status = link.query_status().await;
    let Some((timestamp, azimuth_deg, elevation_deg)) = status.reading() else {
        log::info!("Disconnected from {} MD01 Controller", ssid);
        mark_disconnected(shared, events);
        return Ok(());
    };

    let sample = match motion.update(timestamp, azimuth_deg, elevation_deg) {
        Ok(sample) => sample,
        Err(fault) => {
            fault.log();
            log::error!("--- Stopping {} MD01 poller now ---", ssid);
            link.send_stop().await;
            link.disconnect().await;
            mark_disconnected(shared, events);
            let _ = events.send(DeviceEvent::Fault(fault.clone()));
            return Err(fault);
        }
    };

    let target = {
        let mut locked = shared.lock().unwrap();
        locked.feedback = Some(sample);
        if locked.set_pending {
            locked.set_pending = false;
            Some(locked.target)
        } else {
            None
        }
    };
    let _ = events.send(DeviceEvent::Sample(sample));

    let Some(target) = target else {
        return Ok(());
    };

    let decision = motion.plan(&sample, target);
    match decision {
        MotionDecision::OnTarget | MotionDecision::AwaitStop => {}
        MotionDecision::StopFirst => {
            log::info!("Set Command position opposite direction of motion, sending STOP first");
            link.send_stop().await;
        }
        MotionDecision::Redirect => {
            log::info!("Set Command position is in direction of motion");
            link.send_set(target).await;
        }
        MotionDecision::Set => {
            log::info!("Antenna is stopped, sending SET command to MD01");
            link.send_set(target).await;
        }
    }

    if !link.is_connected() {
        log::info!("Disconnected from {} MD01 Controller", ssid);
        mark_disconnected(shared, events);
    } else if decision.keeps_pending() {
        shared.lock().unwrap().set_pending = true;
    }
    Ok(())
}

fn mark_disconnected(shared: &Arc<StdMutex<Shared>>, events: &mpsc::UnboundedSender<DeviceEvent>) {
    {
        let mut locked = shared.lock().unwrap();
        locked.set_pending = false;
        locked.stop_requested = false;
        locked.feedback = None;
    }
    let _ = events.send(DeviceEvent::Disconnected);
}
