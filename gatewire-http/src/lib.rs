//! Public-facing dispatcher for Gatewire.
//!
//! Accepts raw connections on the shared front door, peeks at the request
//! header block to extract the routing key from the `Host` header, and hands
//! the connection, still bearing every byte read, to the matching tunnel
//! session for splicing.

pub mod facade;

pub use facade::PublicFacade;
