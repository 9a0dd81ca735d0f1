pub mod diagnostics;
pub mod events;
pub mod health;
pub mod page_editors;

pub use diagnostics::*;
pub use events::*;
pub use health::*;
pub use page_editors::*;
