//! TCP server for DEPOT.

mod connection;
mod listener;

pub use connection::handle_connection;
pub use listener::DepotServer;
