pub mod agent;
pub mod auth;
pub mod config;
pub mod docs;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;
pub mod sync;
pub mod utils;
pub mod ws;

use std::sync::Arc;

use crate::store::DocumentStore;
use crate::sync::channel::ChannelRegistry;
use crate::sync::guard::VersionGuard;
use crate::sync::presence::PresenceTracker;

/// Shared state for the sync engine: the authoritative store plus the
/// per-board serialization, fan-out and presence layers built on top of it.
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub channels: ChannelRegistry,
    pub presence: PresenceTracker,
    pub guard: VersionGuard,
}

impl AppState {
    pub fn new(store: Arc<dyn DocumentStore>, channel_capacity: usize) -> Self {
        let channels = ChannelRegistry::new(channel_capacity);
        let presence = PresenceTracker::new(channels.clone());
        let guard = VersionGuard::new(store.clone(), channels.clone());
        Self {
            store,
            channels,
            presence,
            guard,
        }
    }
}
