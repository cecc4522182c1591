use std::sync::Arc;
use std::time::Instant;

use crate::broadcast::BroadcastDispatcher;
use crate::config::Settings;
use crate::presence::PresenceCoordinator;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub coordinator: Arc<PresenceCoordinator>,
    pub dispatcher: Arc<BroadcastDispatcher>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let coordinator = Arc::new(PresenceCoordinator::new());
        let dispatcher = Arc::new(BroadcastDispatcher::new(coordinator.clone()));

        Self {
            settings: Arc::new(settings),
            coordinator,
            dispatcher,
            start_time: Instant::now(),
        }
    }
}
