//! Live realtime connections and the identity attached to each.

mod registry;
mod types;

pub use registry::{Connection, ConnectionRegistry};
pub use types::ConnectionHandle;
