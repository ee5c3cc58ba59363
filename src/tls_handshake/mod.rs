//! ClientHello template marshalling
//!
//! Turns a [`crate::tls_config::ClientHelloSpec`] into the exact bytes a
//! browser would put on the wire, session randoms and key shares included.

pub mod messages;

pub use messages::ClientHelloMessage;
