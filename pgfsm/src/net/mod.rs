//! Built in transport.
mod socket;

pub use socket::Socket;
