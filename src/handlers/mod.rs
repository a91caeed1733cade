pub mod board_latest;
pub mod board_presence;
pub mod board_save;
pub mod diagnostics;
pub mod health;

pub use board_latest::board_latest;
pub use board_presence::board_presence;
pub use board_save::board_save;
pub use diagnostics::diagnostics;
pub use health::{health_check, ready_check};
