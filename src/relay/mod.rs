//! Producer/consumer frame relay for phone-sourced sessions

pub mod handler;
pub mod registry;
pub mod session;

pub use handler::{RelayContext, RelayOutcome};
pub use registry::RelayRegistry;
pub use session::{RelaySession, RelaySnapshot};
