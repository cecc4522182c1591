mod health;
mod metrics;
mod rooms;
mod routes;

pub use routes::api_routes;
