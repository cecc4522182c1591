//! Best-effort fan-out of chat messages and membership snapshots.

mod dispatcher;

pub use dispatcher::{
    BroadcastDispatcher, ChatMessage, DeliveryResult, DispatcherStats, DispatcherStatsSnapshot,
};
