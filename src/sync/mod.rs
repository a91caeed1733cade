pub mod channel;
pub mod guard;
pub mod presence;

/// Identifies one live channel subscription. Assigned by the server at
/// upgrade time; used to suppress broadcast echo back to the originator.
pub type ConnectionId = uuid::Uuid;
