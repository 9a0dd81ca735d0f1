pub mod change;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod health;
pub mod messages;
pub mod presence;

pub use change::*;
pub use diagnostics::*;
pub use error::*;
pub use events::*;
pub use health::*;
pub use messages::*;
pub use presence::*;
