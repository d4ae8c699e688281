pub mod error;
pub mod frame;
pub mod link;

pub use error::ServiceError;
pub use frame::{CommandFrame, Feedback, ManagementCommand, MotionCommand};
pub use link::{ClientCommand, ServiceEvent, ServiceHandle, ServiceLink};
