pub mod connctx;
pub mod handler;
pub mod msg_change_handler;
pub mod msg_editing_handler;
pub mod msg_page_handler;

pub use handler::websocket_handler;
