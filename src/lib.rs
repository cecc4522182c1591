// Infrastructure layer (shared components)
pub mod config;
pub mod error;
pub mod metrics;

// Domain layer (presence and broadcast logic)
pub mod broadcast;
pub mod connection;
pub mod presence;
pub mod room;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;

// Supporting modules
pub mod tasks;
