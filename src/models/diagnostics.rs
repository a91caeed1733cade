use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Response for the diagnostics endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct DiagnosticsResponse {
    /// Boards with an active broadcast channel
    pub n_boards: u32,
    /// Open channel subscriptions across all boards
    pub n_connections: u32,
    /// Presence entries across all boards
    pub n_members: u32,
    pub cpu_usage: f32,
    pub memory_alloc: u64,
    pub memory_total: u64,
    pub memory_free: u64,
}
