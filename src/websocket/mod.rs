mod handler;
mod message;

pub use handler::{ws_handler, ConnectQuery};
pub use message::{ClientMessage, OutboundMessage, ServerMessage};
