//! Event rooms: which users are present for which event.

mod registry;

pub use registry::RoomRegistry;
