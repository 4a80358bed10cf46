//! Channels between the angel, its client and the core.
//!
//! - **transport**: byte-stream endpoints (descriptors, named pipes, stdio)
//! - **codec**: length-prefixed framing
//! - **interface**: framed send / wait-for-one over an endpoint
//! - **bencode**: encoding of the pre-configuration tree

pub mod bencode;
pub mod codec;
pub mod interface;
pub mod transport;
