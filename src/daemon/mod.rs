mod controller;
mod error;
mod session;
mod state;

pub use controller::DaemonController;
pub use state::DaemonState;
