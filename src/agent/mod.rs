pub mod driver;
pub mod machine;
pub mod transport;

pub use driver::{HostEvent, LocalEdit, SyncDriver, SyncDriverConfig};
pub use machine::{
    EditorViewState, FlushRequest, RemoteApplyToken, RemoteOutcome, SaveStatus, SyncAgent,
    SyncState,
};
pub use transport::{ApplyResult, HttpTransport, SyncTransport, TransportError};
