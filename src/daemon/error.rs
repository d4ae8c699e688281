use thiserror::Error;

use crate::md01::PollerError;
use crate::service::ServiceError;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("service link: {0}")]
    Bind(#[from] ServiceError),
    #[error("device poller: {0}")]
    Spawn(#[from] PollerError),
    #[error("session log: {0}")]
    Session(#[from] std::io::Error),
}
