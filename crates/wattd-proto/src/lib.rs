#![warn(missing_docs)]

//! wattd wire protocol: versioned length-prefixed frames carrying
//! administrative commands, acknowledgement codes and node status records.

pub mod command;
pub mod error;
pub mod frame;
pub mod status;

pub use command::{Ack, Command, Payload, RequestCode};
pub use error::{ProtoError, Result};
pub use frame::{Frame, FrameHeader, FrameKind, FRAME_HEADER_SIZE, MAGIC, PROTOCOL_VERSION};
pub use status::{PolicyStatus, StatusRecord};
