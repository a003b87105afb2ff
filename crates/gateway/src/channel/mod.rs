//! Channel-client implementations backed by a remote protocol node.

pub mod http;

pub use http::{HttpChannelClient, HttpChannelConnector};
