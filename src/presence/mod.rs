//! Join/leave/disconnect semantics and per-(event, user) reference counts.

mod coordinator;

pub use coordinator::{PresenceCoordinator, PresenceStats};
