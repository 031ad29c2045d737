//! Wire protocol for DEPOT.
//!
//! Defines the command header, acknowledgement and payload framing shared by
//! the server and the client stub.

mod frame;

pub use frame::{
    read_ack, read_command, read_payload_len, write_ack, write_command, write_payload_len, Ack,
    CommandHeader, OpCode, MAX_NAME_LIST, MAX_STRING_LENGTH, STATUS_ERROR, STATUS_OK,
};
