pub mod codec;
pub mod error;
pub mod link;
pub mod motion;
pub mod poller;
pub mod types;

pub use error::PollerError;
pub use poller::{DeviceEvent, DevicePoller};
pub use types::FeedbackSample;
