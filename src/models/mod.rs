pub mod board;
pub mod diagnostics;
pub mod error;
pub mod health;
pub mod messages;
pub mod presence;
pub mod sync;

pub use board::*;
pub use diagnostics::*;
pub use error::*;
pub use health::*;
pub use messages::*;
pub use presence::*;
pub use sync::*;
