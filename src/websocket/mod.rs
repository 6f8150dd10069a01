mod commands;
mod error;
mod handler;
mod message;

pub use commands::dispatch;
pub use error::CommandError;
pub use handler::{run_session, ws_handler, WsQuery};
pub use message::{
    CommandKind, ErrorPayload, InboundFrame, OutboundFrame, ReadReceipt, ServerFrame,
    TypingIndicator,
};
